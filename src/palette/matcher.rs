use std::sync::Arc;

use super::registry::TargetSynonymTable;

/// Maps a furnishing target to the scene objects whose names mention one of its aliases.
#[derive(Debug, Clone)]
pub struct ObjectMatcher {
    synonyms: Arc<TargetSynonymTable>,
}

impl ObjectMatcher {
    pub fn new(synonyms: Arc<TargetSynonymTable>) -> Self {
        Self { synonyms }
    }

    /// Alias fragments for `keyword`; an unknown keyword is its own sole alias.
    pub fn aliases(&self, keyword: &str) -> Vec<String> {
        match self.synonyms.aliases(keyword) {
            Some(aliases) => aliases.to_vec(),
            None => {
                let fallback = keyword.trim().to_lowercase();
                if fallback.is_empty() {
                    Vec::new()
                } else {
                    vec![fallback]
                }
            }
        }
    }

    /// Candidates containing any alias (case-insensitive), in input order, each at most once.
    pub fn match_objects<S: AsRef<str>>(&self, keyword: &str, candidates: &[S]) -> Vec<String> {
        let aliases = self.aliases(keyword);
        if aliases.is_empty() {
            return Vec::new();
        }
        candidates
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| {
                let lowered = name.to_lowercase();
                aliases
                    .iter()
                    .any(|alias| lowered.contains(alias.as_str()))
            })
            .map(str::to_string)
            .collect()
    }
}
