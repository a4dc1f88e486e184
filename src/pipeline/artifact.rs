use std::fs;
use std::path::{Path, PathBuf};

pub const ARTIFACT_EXTENSION: &str = "blend";
pub const PRIMARY_ARTIFACT_NAME: &str = "scene.blend";

/// Conventional artifact locations, in lookup order.
pub fn preferred_artifact_paths(output_dir: &Path) -> [PathBuf; 2] {
    [
        output_dir.join(PRIMARY_ARTIFACT_NAME),
        output_dir.join("coarse").join(PRIMARY_ARTIFACT_NAME),
    ]
}

/// First conventional location holding a file strictly larger than `min_bytes`.
pub fn find_preferred_artifact(output_dir: &Path, min_bytes: u64) -> Option<PathBuf> {
    preferred_artifact_paths(output_dir)
        .into_iter()
        .find(|path| exceeds_size(path, min_bytes))
}

/// Recursive search for any artifact file above `min_bytes`, in sorted path order.
pub fn find_any_artifact(output_dir: &Path, min_bytes: u64) -> Option<PathBuf> {
    artifact_files(output_dir)
        .into_iter()
        .find(|path| exceeds_size(path, min_bytes))
}

/// Whether a previous run already left an artifact of any size in `output_dir`.
pub fn has_existing_artifact(output_dir: &Path) -> bool {
    output_dir.is_dir() && !artifact_files(output_dir).is_empty()
}

pub fn artifact_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    collect_artifact_files(root, &mut out);
    out
}

fn collect_artifact_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut paths = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_artifact_files(path.as_path(), out);
        } else if is_artifact(path.as_path()) {
            out.push(path);
        }
    }
}

fn is_artifact(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|v| v.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
}

fn exceeds_size(path: &Path, min_bytes: u64) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > min_bytes)
        .unwrap_or(false)
}

pub fn file_size_bytes(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

pub fn file_size_mb(path: &Path) -> f64 {
    file_size_bytes(path) as f64 / (1024.0 * 1024.0)
}

/// `<dir>_<stamp>`, or `<dir>_<stamp>_<n>` with the first free counter.
pub fn collision_free_dir(output_dir: &Path, stamp: &str) -> PathBuf {
    let name = output_dir
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("output"));
    let parent = output_dir.parent().unwrap_or_else(|| Path::new(""));
    let candidate = parent.join(format!("{name}_{stamp}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1u32;
    loop {
        let candidate = parent.join(format!("{name}_{stamp}_{counter}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
