use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

pub const RUN_RECORD_FILE_NAME: &str = "roomhue_run.json";

#[derive(Debug, Error)]
pub enum RecordWriteError {
    #[error("cannot create directory '{path}' for JSON record: {message}")]
    CreateDir { path: String, message: String },
    #[error("cannot encode JSON record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("cannot write JSON record '{path}': {message}")]
    Write { path: String, message: String },
}

/// Pretty JSON plus a trailing newline, creating missing parent directories.
pub fn write_pretty_json_with_newline<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), RecordWriteError> {
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(|error| RecordWriteError::CreateDir {
            path: dir.display().to_string(),
            message: error.to_string(),
        })?;
    }

    let mut encoded = serde_json::to_vec_pretty(value).map_err(RecordWriteError::Encode)?;
    encoded.push(b'\n');
    fs::write(path, encoded).map_err(|error| RecordWriteError::Write {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub(crate) fn rfc3339_now() -> String {
    format_rfc3339(Utc::now())
}

pub(crate) fn format_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `YYYYmmdd_HHMMSS` in UTC.
pub(crate) fn compact_stamp_now() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

pub(crate) fn unix_stamp_now() -> String {
    Utc::now().timestamp().to_string()
}
