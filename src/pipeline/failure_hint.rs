use serde::Serialize;

/// Readable diagnosis for a failed generation run, derived from the captured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureHint {
    MissingTerrainDependency,
    TerrainNativeLibraryMissing,
    TerrainConfiguration,
    MissingPythonModule { module: String },
    OutOfMemory,
    ToolNotFound,
}

impl FailureHint {
    pub fn message(&self) -> String {
        match self {
            Self::MissingTerrainDependency => String::from(
                "terrain dependency 'landlab' is missing; install the terrain extras (pip install .[terrain])",
            ),
            Self::TerrainNativeLibraryMissing => String::from(
                "terrain native library (waterbody.so) is not compiled; run scripts/install/compile_terrain.sh",
            ),
            Self::TerrainConfiguration => String::from(
                "terrain module failed; install the terrain extras or disable terrain with compose_indoors.terrain_enabled=False",
            ),
            Self::MissingPythonModule { module } => {
                format!("python module '{module}' is not installed in the generator environment")
            }
            Self::OutOfMemory => String::from(
                "the generator ran out of memory; try a smaller scene or a lower seed",
            ),
            Self::ToolNotFound => String::from(
                "the generator program could not be found; check tool.program and tool.root",
            ),
        }
    }
}

/// Terrain problems take precedence over generic missing-module markers. Echoed
/// `terrain_enabled` override parameters do not count as terrain markers.
pub fn classify_failure_output(output: &str) -> Option<FailureHint> {
    let lowered = output.to_lowercase().replace("terrain_enabled", "");
    if lowered.contains("waterbody.so") || lowered.contains("terrain") {
        if lowered.contains("landlab") {
            return Some(FailureHint::MissingTerrainDependency);
        }
        if lowered.contains("waterbody.so") {
            return Some(FailureHint::TerrainNativeLibraryMissing);
        }
        return Some(FailureHint::TerrainConfiguration);
    }
    if let Some(module) = missing_module_name(output) {
        return Some(FailureHint::MissingPythonModule { module });
    }
    if lowered.contains("memoryerror")
        || lowered.contains("out of memory")
        || lowered.contains("cannot allocate memory")
        || killed_by_kernel(output)
    {
        return Some(FailureHint::OutOfMemory);
    }
    if lowered.contains("command not found") || lowered.contains("no such file or directory") {
        return Some(FailureHint::ToolNotFound);
    }
    None
}

/// The kernel OOM killer shows up as a bare `Killed` line from the shell.
fn killed_by_kernel(output: &str) -> bool {
    output.lines().any(|line| line.trim_start().starts_with("Killed"))
}

fn missing_module_name(output: &str) -> Option<String> {
    const MARKER: &str = "No module named ";
    let idx = output.find(MARKER)?;
    let rest = output[idx + MARKER.len()..].trim_start();
    let name = rest
        .trim_start_matches(['\'', '"'])
        .split(|ch: char| ch == '\'' || ch == '"' || ch.is_whitespace())
        .next()
        .unwrap_or_default();
    (!name.is_empty()).then(|| name.to_string())
}
