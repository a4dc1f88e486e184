use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use super::Rgb;

const BUILTIN_COLORS: &[(&str, [u8; 3])] = &[
    ("white", [255, 255, 255]),
    ("black", [0, 0, 0]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("dark gray", [64, 64, 64]),
    ("light gray", [192, 192, 192]),
    ("off white", [250, 250, 250]),
    ("beige", [245, 245, 220]),
    ("cream", [255, 253, 208]),
    ("natural wood", [210, 180, 140]),
    ("light wood", [222, 184, 135]),
    ("dark wood", [139, 90, 43]),
    ("light brown", [205, 133, 63]),
    ("dark brown", [101, 67, 33]),
    ("brown", [139, 69, 19]),
    ("blue", [0, 0, 255]),
    ("light blue", [173, 216, 230]),
    ("dark blue", [0, 0, 139]),
    ("navy", [0, 0, 128]),
    ("green", [0, 128, 0]),
    ("light green", [144, 238, 144]),
    ("dark green", [0, 100, 0]),
    ("red", [255, 0, 0]),
    ("pink", [255, 182, 193]),
    ("dark red", [139, 0, 0]),
    ("yellow", [255, 255, 0]),
    ("light yellow", [255, 255, 224]),
    ("orange", [255, 165, 0]),
    ("白色", [255, 255, 255]),
    ("黑色", [0, 0, 0]),
    ("灰色", [128, 128, 128]),
    ("深灰色", [64, 64, 64]),
    ("浅灰色", [192, 192, 192]),
    ("米白色", [245, 245, 220]),
    ("米色", [245, 245, 220]),
    ("奶油色", [255, 253, 208]),
    ("原木色", [210, 180, 140]),
    ("浅棕色", [205, 133, 63]),
    ("深棕色", [101, 67, 33]),
    ("咖啡色", [139, 69, 19]),
    ("北欧白", [250, 250, 250]),
    ("北欧灰", [200, 200, 200]),
    ("浅木色", [222, 184, 135]),
    ("深木色", [139, 90, 43]),
    ("蓝色", [0, 0, 255]),
    ("浅蓝色", [173, 216, 230]),
    ("深蓝色", [0, 0, 139]),
    ("绿色", [0, 128, 0]),
    ("浅绿色", [144, 238, 144]),
    ("深绿色", [0, 100, 0]),
    ("红色", [255, 0, 0]),
    ("浅红色", [255, 182, 193]),
    ("深红色", [139, 0, 0]),
    ("黄色", [255, 255, 0]),
    ("浅黄色", [255, 255, 224]),
    ("橙色", [255, 165, 0]),
];

const BUILTIN_TARGETS: &[(&str, &[&str])] = &[
    ("bed", &["bed"]),
    ("bedframe", &["bedframe", "bed_frame", "bed"]),
    ("nightstand", &["nightstand", "bedside"]),
    ("sofa", &["sofa", "couch"]),
    ("couch", &["sofa", "couch"]),
    ("table", &["table", "coffee_table", "coffeetable", "dining_table"]),
    ("coffee_table", &["coffee_table", "coffeetable", "table"]),
    ("dining_table", &["dining_table", "diningtable", "table"]),
    ("chair", &["chair", "dining_chair"]),
    ("dining_chair", &["dining_chair", "diningchair", "chair"]),
    ("tv_stand", &["tv_stand", "tvstand", "tv"]),
    ("desk", &["desk"]),
    ("bookshelf", &["bookshelf", "bookcase"]),
    ("bookcase", &["bookshelf", "bookcase"]),
    ("wardrobe", &["wardrobe", "closet"]),
    ("closet", &["wardrobe", "closet"]),
    ("cabinet", &["cabinet", "storage"]),
    ("curtain", &["curtain"]),
    ("curtains", &["curtain"]),
    ("rug", &["rug", "carpet"]),
    ("carpet", &["rug", "carpet"]),
    ("floor", &["floor", "ground"]),
    ("wall", &["wall"]),
    ("walls", &["wall"]),
    ("light", &["light", "lamp"]),
    ("lamp", &["lamp", "table_lamp"]),
    ("ceiling_light", &["ceiling_light", "ceilinglight", "chandelier"]),
    ("chandelier", &["ceiling_light", "ceilinglight", "chandelier"]),
    ("床", &["bed"]),
    ("床头柜", &["nightstand", "bedside"]),
    ("床架", &["bedframe", "bed_frame", "bed"]),
    ("沙发", &["sofa", "couch"]),
    ("茶几", &["coffee_table", "coffeetable", "table"]),
    ("电视柜", &["tv_stand", "tvstand", "tv"]),
    ("餐桌", &["dining_table", "diningtable", "table"]),
    ("餐椅", &["dining_chair", "diningchair", "chair"]),
    ("椅子", &["chair"]),
    ("书桌", &["desk"]),
    ("书柜", &["bookshelf", "bookcase"]),
    ("书架", &["bookshelf", "bookcase"]),
    ("衣柜", &["wardrobe", "closet"]),
    ("储物柜", &["cabinet", "storage"]),
    ("柜子", &["cabinet"]),
    ("窗帘", &["curtain"]),
    ("地毯", &["rug", "carpet"]),
    ("地板", &["floor", "ground"]),
    ("墙壁", &["wall"]),
    ("墙面", &["wall"]),
    ("墙", &["wall"]),
    ("灯具", &["light", "lamp"]),
    ("台灯", &["lamp", "table_lamp"]),
    ("吊灯", &["ceiling_light", "ceilinglight", "chandelier"]),
];

/// Lowercases, maps `_`/`-` to spaces and collapses runs of whitespace.
pub fn normalize_term(value: &str) -> String {
    value
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finds `term` inside an already-normalized haystack. ASCII terms must sit on word
/// boundaries (an `s`/`es` plural suffix is tolerated); CJK terms match anywhere.
pub fn find_term(haystack: &str, term: &str) -> Option<usize> {
    find_term_positions(haystack, term).into_iter().next()
}

pub fn find_term_positions(haystack: &str, term: &str) -> Vec<usize> {
    if term.is_empty() {
        return Vec::new();
    }
    let ascii_word = term.chars().all(|ch| ch.is_ascii());
    haystack
        .match_indices(term)
        .map(|(idx, _)| idx)
        .filter(|&idx| {
            if !ascii_word {
                return true;
            }
            let before_ok = haystack[..idx]
                .chars()
                .next_back()
                .map_or(true, |ch| !ch.is_ascii_alphanumeric());
            let tail = &haystack[idx + term.len()..];
            let tail = tail
                .strip_prefix("es")
                .filter(|rest| !starts_alphanumeric(rest))
                .or_else(|| tail.strip_prefix('s').filter(|rest| !starts_alphanumeric(rest)))
                .unwrap_or(tail);
            before_ok && !starts_alphanumeric(tail)
        })
        .collect()
}

fn starts_alphanumeric(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedColor {
    pub name: String,
    pub rgb: Rgb,
}

/// Insertion-ordered color table. Order is significant: nearest-color ties resolve to the
/// earliest entry.
#[derive(Debug, Clone, Default)]
pub struct ColorRegistry {
    entries: Vec<NamedColor>,
    index: HashMap<String, usize>,
}

impl ColorRegistry {
    pub fn builtin() -> Self {
        Self::from_entries(
            BUILTIN_COLORS
                .iter()
                .map(|(name, [r, g, b])| (name.to_string(), Rgb::new(*r, *g, *b))),
        )
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Rgb)>) -> Self {
        let mut registry = Self::default();
        for (name, rgb) in entries {
            registry.upsert(name, rgb);
        }
        registry
    }

    fn upsert(&mut self, name: String, rgb: Rgb) {
        let key = normalize_term(name.as_str());
        if key.is_empty() {
            return;
        }
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].rgb = rgb;
            return;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(NamedColor {
            name: name.trim().to_string(),
            rgb,
        });
    }

    pub fn get(&self, name: &str) -> Option<Rgb> {
        self.index
            .get(&normalize_term(name))
            .map(|&idx| self.entries[idx].rgb)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_term(name))
    }

    pub fn entries(&self) -> &[NamedColor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest registry name occurring in `text`; earlier position breaks length ties.
    pub fn find_in_text(&self, text: &str) -> Option<&NamedColor> {
        let haystack = normalize_term(text);
        self.entries
            .iter()
            .filter_map(|entry| {
                let term = normalize_term(entry.name.as_str());
                find_term(haystack.as_str(), term.as_str()).map(|pos| (entry, term.len(), pos))
            })
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.cmp(&a.2)))
            .map(|(entry, _, _)| entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSynonyms {
    pub keyword: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetSynonymTable {
    entries: Vec<TargetSynonyms>,
}

impl TargetSynonymTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (keyword, aliases) in BUILTIN_TARGETS {
            table.extend_entry(keyword, aliases.iter().map(|v| v.to_string()));
        }
        table
    }

    fn extend_entry(&mut self, keyword: &str, aliases: impl IntoIterator<Item = String>) {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return;
        }
        let key = normalize_term(keyword);
        let position = self
            .entries
            .iter()
            .position(|entry| normalize_term(entry.keyword.as_str()) == key);
        let idx = match position {
            Some(idx) => idx,
            None => {
                self.entries.push(TargetSynonyms {
                    keyword: keyword.to_string(),
                    aliases: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[idx];
        for alias in aliases {
            let alias = alias.trim().to_lowercase();
            if !alias.is_empty() && !entry.aliases.contains(&alias) {
                entry.aliases.push(alias);
            }
        }
    }

    pub fn aliases(&self, keyword: &str) -> Option<&[String]> {
        let key = normalize_term(keyword);
        self.entries
            .iter()
            .find(|entry| normalize_term(entry.keyword.as_str()) == key)
            .map(|entry| entry.aliases.as_slice())
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.keyword.as_str())
    }

    pub fn is_known_target(&self, keyword: &str) -> bool {
        self.aliases(keyword).is_some()
    }

    /// Keywords occurring in `text`, ordered by position. A keyword found only inside a
    /// longer matched keyword (`床` inside `床头柜`) is dropped.
    pub fn find_in_text(&self, text: &str) -> Vec<&str> {
        let haystack = normalize_term(text);
        let spans = self
            .entries
            .iter()
            .flat_map(|entry| {
                let term = normalize_term(entry.keyword.as_str());
                let len = term.len();
                find_term_positions(haystack.as_str(), term.as_str())
                    .into_iter()
                    .map(move |pos| (entry.keyword.as_str(), pos, pos + len))
            })
            .collect::<Vec<_>>();
        let mut hits = spans
            .iter()
            .filter(|(_, start, end)| {
                !spans.iter().any(|(_, other_start, other_end)| {
                    other_start <= start
                        && end <= other_end
                        && (other_end - other_start) > (end - start)
                })
            })
            .copied()
            .collect::<Vec<_>>();
        hits.sort_by_key(|(_, start, _)| *start);
        let mut keywords: Vec<&str> = Vec::new();
        for (keyword, _, _) in hits {
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords
    }

    /// The longest keyword found in `text`.
    pub fn longest_in_text(&self, text: &str) -> Option<&str> {
        self.find_in_text(text)
            .into_iter()
            .max_by_key(|keyword| normalize_term(keyword).len())
    }
}

#[derive(Debug, Error)]
pub enum PaletteConfigError {
    #[error("failed to read palette file '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse palette JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse palette TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
}

#[derive(Debug, Default, Deserialize)]
struct PaletteFile {
    #[serde(default)]
    colors: Vec<PaletteColorEntry>,
    #[serde(default)]
    targets: Vec<PaletteTargetEntry>,
}

#[derive(Debug, Deserialize)]
struct PaletteColorEntry {
    name: String,
    rgb: [u8; 3],
}

#[derive(Debug, Deserialize)]
struct PaletteTargetEntry {
    keyword: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Read-only lookup tables shared by the parser, resolver and matcher.
#[derive(Debug, Clone)]
pub struct PaletteTables {
    pub colors: Arc<ColorRegistry>,
    pub targets: Arc<TargetSynonymTable>,
}

impl PaletteTables {
    pub fn builtin() -> Self {
        Self {
            colors: Arc::new(ColorRegistry::builtin()),
            targets: Arc::new(TargetSynonymTable::builtin()),
        }
    }

    /// Built-in tables extended by an optional palette file. Colors whose name already
    /// exists replace that entry's RGB in place; new ones are appended.
    pub fn load(path: Option<&Path>) -> Result<Self, PaletteConfigError> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };
        let file = read_palette_file(path)?;

        let mut colors = ColorRegistry::builtin();
        for entry in file.colors {
            let [r, g, b] = entry.rgb;
            colors.upsert(entry.name, Rgb::new(r, g, b));
        }
        let mut targets = TargetSynonymTable::builtin();
        for entry in file.targets {
            let aliases = if entry.aliases.is_empty() {
                vec![entry.keyword.clone()]
            } else {
                entry.aliases
            };
            targets.extend_entry(entry.keyword.as_str(), aliases);
        }
        Ok(Self {
            colors: Arc::new(colors),
            targets: Arc::new(targets),
        })
    }
}

fn read_palette_file(path: &Path) -> Result<PaletteFile, PaletteConfigError> {
    let raw = fs::read_to_string(path).map_err(|error| PaletteConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let is_toml = path
        .extension()
        .and_then(|v| v.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str::<PaletteFile>(raw.as_str()).map_err(|error| {
            PaletteConfigError::ParseToml {
                path: path.display().to_string(),
                message: error.to_string(),
            }
        })
    } else {
        serde_json::from_str::<PaletteFile>(raw.as_str()).map_err(|error| {
            PaletteConfigError::ParseJson {
                path: path.display().to_string(),
                message: error.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir() -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("roomhue_palette_{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be created");
        dir
    }

    #[test]
    fn registry_lookup_is_case_and_separator_insensitive() {
        let registry = ColorRegistry::builtin();
        assert_eq!(registry.get("Light_Gray"), Some(Rgb::new(192, 192, 192)));
        assert_eq!(registry.get("  WHITE "), Some(Rgb::new(255, 255, 255)));
        assert_eq!(registry.get("浅木色"), Some(Rgb::new(222, 184, 135)));
        assert_eq!(registry.get("mauve"), None);
    }

    #[test]
    fn find_in_text_prefers_longest_color_name() {
        let registry = ColorRegistry::builtin();
        let hit = registry
            .find_in_text("窗帘采用浅灰色")
            .expect("color should be found");
        assert_eq!(hit.name, "浅灰色");

        let hit = registry
            .find_in_text("a light gray sofa")
            .expect("color should be found");
        assert_eq!(hit.name, "light gray");
    }

    #[test]
    fn ascii_terms_respect_word_boundaries() {
        assert_eq!(find_term("a bored cat", "red"), None);
        assert_eq!(find_term("the red chair", "red"), Some(4));
        assert_eq!(find_term("two nightstands here", "nightstand"), Some(4));
        assert_eq!(find_term("bedframe", "bed"), None);
        assert_eq!(find_term("卧室的床头柜", "床"), Some(9));
    }

    #[test]
    fn target_keywords_shadowed_by_longer_matches_are_dropped() {
        let table = TargetSynonymTable::builtin();
        assert_eq!(table.find_in_text("床头柜用浅木色"), vec!["床头柜"]);
        assert_eq!(table.find_in_text("床头柜和床都用白色"), vec!["床头柜", "床"]);
        assert_eq!(
            table.find_in_text("the coffee table and the sofa"),
            vec!["coffee_table", "sofa"]
        );
        assert_eq!(table.longest_in_text("卧室的床"), Some("床"));
    }

    #[test]
    fn synonym_lookup_normalizes_keyword() {
        let table = TargetSynonymTable::builtin();
        assert_eq!(
            table.aliases("Coffee Table"),
            Some(&["coffee_table".to_string(), "coffeetable".to_string(), "table".to_string()][..])
        );
        assert!(table.aliases("spaceship").is_none());
    }

    #[test]
    fn palette_file_extends_builtin_tables() {
        let dir = temp_dir();
        let path = dir.join("palette.toml");
        fs::write(
            &path,
            r#"
[[colors]]
name = "sage"
rgb = [178, 172, 136]

[[colors]]
name = "white"
rgb = [250, 250, 250]

[[targets]]
keyword = "ottoman"
aliases = ["ottoman", "pouf"]
"#,
        )
        .expect("palette should be written");

        let tables = PaletteTables::load(Some(path.as_path())).expect("palette should load");
        assert_eq!(tables.colors.get("sage"), Some(Rgb::new(178, 172, 136)));
        assert_eq!(tables.colors.get("white"), Some(Rgb::new(250, 250, 250)));
        assert_eq!(tables.colors.entries()[0].name, "white");
        assert_eq!(
            tables.targets.aliases("ottoman"),
            Some(&["ottoman".to_string(), "pouf".to_string()][..])
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn palette_file_rejects_out_of_range_channels() {
        let dir = temp_dir();
        let path = dir.join("palette.json");
        fs::write(&path, r#"{"colors":[{"name":"bad","rgb":[300,0,0]}]}"#)
            .expect("palette should be written");

        let err = PaletteTables::load(Some(path.as_path())).expect_err("300 is not a channel");
        assert!(matches!(err, PaletteConfigError::ParseJson { .. }));

        let _ = fs::remove_dir_all(dir);
    }
}
