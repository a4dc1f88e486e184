use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::pipeline::artifact::file_size_mb;
use crate::pipeline::runlog::{compact_stamp_now, rfc3339_now, write_pretty_json_with_newline};

pub const TEMPLATES_METADATA_FILE: &str = "templates_metadata.json";
pub const WHOLE_HOME_CATEGORY: &str = "WholeHome";
pub const UNKNOWN_SEED: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub id: String,
    /// `None` marks a whole-home template.
    #[serde(default)]
    pub category: Option<String>,
    pub artifact_path: PathBuf,
    pub seed: String,
    pub created_at: String,
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateStatistics {
    pub total_templates: usize,
    pub by_category: BTreeMap<String, usize>,
    pub total_size_mb: f64,
    pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum TemplateRegistryError {
    #[error("failed to create template root '{path}': {message}")]
    CreateRoot { path: String, message: String },
    #[error("template artifact does not exist: '{path}'")]
    ArtifactMissing { path: String },
    #[error("failed to persist template registry '{path}': {message}")]
    Persist { path: String, message: String },
}

/// Index of generated scenes that can be reused instead of regenerated.
///
/// The metadata file is rewritten wholesale on each mutation; records keep registration
/// order. Removing a record never touches the artifact file.
#[derive(Debug)]
pub struct TemplateRegistry {
    root: PathBuf,
    records: Vec<TemplateRecord>,
}

impl TemplateRegistry {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, TemplateRegistryError> {
        let root = root.into();
        fs::create_dir_all(root.as_path()).map_err(|error| TemplateRegistryError::CreateRoot {
            path: root.display().to_string(),
            message: error.to_string(),
        })?;
        let records = load_records(root.join(TEMPLATES_METADATA_FILE).as_path());
        tracing::debug!(root = %root.display(), templates = records.len(), "template registry opened");
        Ok(Self { root, records })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(TEMPLATES_METADATA_FILE)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TemplateRecord] {
        &self.records
    }

    /// Registers an existing artifact and returns the new id: `<category>_NN` (lowercased) or
    /// `whole_home_NN`, with a timestamp suffix when that id is already taken.
    pub fn register(
        &mut self,
        artifact: &Path,
        category: Option<&str>,
        seed: Option<&str>,
        note: Option<&str>,
    ) -> Result<String, TemplateRegistryError> {
        if !artifact.is_file() {
            return Err(TemplateRegistryError::ArtifactMissing {
                path: artifact.display().to_string(),
            });
        }
        let category = category.map(str::trim).filter(|v| !v.is_empty());
        let id = self.next_id(category);
        let artifact_path = fs::canonicalize(artifact).unwrap_or_else(|_| artifact.to_path_buf());

        let record = TemplateRecord {
            id: id.clone(),
            category: category.map(str::to_string),
            size_mb: file_size_mb(artifact_path.as_path()),
            artifact_path,
            seed: seed
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(UNKNOWN_SEED)
                .to_string(),
            created_at: rfc3339_now(),
            note: note.map(str::to_string),
        };
        let mut records = self.records.clone();
        records.push(record);
        self.persist(records.as_slice())?;
        self.records = records;
        tracing::info!(
            id = id.as_str(),
            category = category.unwrap_or(WHOLE_HOME_CATEGORY),
            "registered template"
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&TemplateRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn by_category(&self, category: Option<&str>) -> Vec<&TemplateRecord> {
        self.records
            .iter()
            .filter(|record| record.category.as_deref() == category)
            .collect()
    }

    /// Most recent template of `category` when `prefer_recent`, otherwise the first registered.
    pub fn find_best(&self, category: Option<&str>, prefer_recent: bool) -> Option<&TemplateRecord> {
        let candidates = self.by_category(category);
        if candidates.is_empty() {
            tracing::warn!(
                category = category.unwrap_or(WHOLE_HOME_CATEGORY),
                "no template registered for category"
            );
            return None;
        }
        if !prefer_recent {
            return candidates.first().copied();
        }
        candidates
            .into_iter()
            .max_by(|a, b| created_at_key(a).cmp(&created_at_key(b)))
    }

    pub fn list_grouped(&self) -> BTreeMap<String, Vec<TemplateRecord>> {
        let mut grouped: BTreeMap<String, Vec<TemplateRecord>> = BTreeMap::new();
        for record in &self.records {
            grouped
                .entry(group_key(record).to_string())
                .or_default()
                .push(record.clone());
        }
        grouped
    }

    /// Deletes the record only; the artifact stays on disk.
    pub fn remove(&mut self, id: &str) -> Result<bool, TemplateRegistryError> {
        let records = self
            .records
            .iter()
            .filter(|record| record.id != id)
            .cloned()
            .collect::<Vec<_>>();
        if records.len() == self.records.len() {
            return Ok(false);
        }
        self.persist(records.as_slice())?;
        self.records = records;
        tracing::info!(id, "removed template");
        Ok(true)
    }

    pub fn statistics(&self) -> TemplateStatistics {
        let mut by_category = BTreeMap::new();
        for record in &self.records {
            *by_category.entry(group_key(record).to_string()).or_insert(0) += 1;
        }
        TemplateStatistics {
            total_templates: self.records.len(),
            by_category,
            total_size_mb: self.records.iter().map(|record| record.size_mb).sum(),
            root: self.root.clone(),
        }
    }

    fn next_id(&self, category: Option<&str>) -> String {
        let prefix = category
            .map(|v| v.to_lowercase())
            .unwrap_or_else(|| String::from("whole_home"));
        let count = self.by_category(category).len();
        let id = format!("{prefix}_{:02}", count + 1);
        if self.get(id.as_str()).is_none() {
            return id;
        }
        let stamped = format!("{id}_{}", compact_stamp_now());
        if self.get(stamped.as_str()).is_none() {
            return stamped;
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{stamped}_{counter}");
            if self.get(candidate.as_str()).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Writes `records` as the metadata file. Callers commit them to memory only on success.
    fn persist(&self, records: &[TemplateRecord]) -> Result<(), TemplateRegistryError> {
        let mut document = Map::new();
        for record in records {
            let value = serde_json::to_value(record).map_err(|error| {
                TemplateRegistryError::Persist {
                    path: self.metadata_path().display().to_string(),
                    message: error.to_string(),
                }
            })?;
            document.insert(record.id.clone(), value);
        }
        let path = self.metadata_path();
        write_pretty_json_with_newline(path.as_path(), &Value::Object(document)).map_err(
            |error| TemplateRegistryError::Persist {
                path: path.display().to_string(),
                message: error.to_string(),
            },
        )
    }
}

fn group_key(record: &TemplateRecord) -> &str {
    record.category.as_deref().unwrap_or(WHOLE_HOME_CATEGORY)
}

fn created_at_key(record: &TemplateRecord) -> (i64, &str) {
    let ts = DateTime::parse_from_rfc3339(record.created_at.as_str())
        .map(|value| value.timestamp())
        .unwrap_or(i64::MIN);
    (ts, record.created_at.as_str())
}

fn load_records(path: &Path) -> Vec<TemplateRecord> {
    if !path.exists() {
        return Vec::new();
    }
    let parsed = fs::read_to_string(path)
        .map_err(|error| error.to_string())
        .and_then(|raw| {
            serde_json::from_str::<Map<String, Value>>(raw.as_str()).map_err(|e| e.to_string())
        });
    let document = match parsed {
        Ok(document) => document,
        Err(message) => {
            tracing::warn!(
                path = %path.display(),
                error = message.as_str(),
                "template registry unreadable, starting empty"
            );
            return Vec::new();
        }
    };

    let mut records = Vec::with_capacity(document.len());
    for (id, value) in document {
        match serde_json::from_value::<TemplateRecord>(value) {
            Ok(mut record) => {
                record.id = id;
                records.push(record);
            }
            Err(error) => {
                tracing::warn!(id = id.as_str(), error = %error, "skipping malformed template record");
            }
        }
    }
    records
}
