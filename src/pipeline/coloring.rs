use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::palette::matcher::ObjectMatcher;
use crate::palette::{ColorAssignment, Rgb};
use crate::pipeline::generation::{GenerationErrorKind, GenerationResult, GenerationState};
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner};

pub const DEFAULT_COLOR_HOST_PROGRAM: &str = "blender";
pub const OBJECTS_MARKER: &str = "ROOMHUE_OBJECTS_JSON:";
pub const APPLIED_MARKER: &str = "ROOMHUE_COLORED_JSON:";
const COLORED_SUFFIX: &str = "_colored";

const LIST_OBJECTS_SCRIPT: &str = r#"
import bpy, json
names = [obj.name for obj in bpy.data.objects if obj.type == 'MESH']
print("ROOMHUE_OBJECTS_JSON: " + json.dumps(names))
"#;

const APPLY_COLORS_SCRIPT: &str = r#"
import bpy, json, sys
argv = sys.argv[sys.argv.index("--") + 1:]
plan = json.loads(argv[0])
output = argv[1]
applied = 0
for entry in plan["entries"]:
    obj = bpy.data.objects.get(entry["object_name"])
    if obj is None or obj.type != 'MESH':
        continue
    rgb = entry["rgb"]
    color = (rgb["r"] / 255.0, rgb["g"] / 255.0, rgb["b"] / 255.0, 1.0)
    mat = bpy.data.materials.new(name="roomhue_" + entry["target"] + "_" + obj.name)
    mat.use_nodes = True
    bsdf = mat.node_tree.nodes.get("Principled BSDF")
    if bsdf is not None:
        bsdf.inputs["Base Color"].default_value = color
    mat.diffuse_color = color
    obj.data.materials.clear()
    obj.data.materials.append(mat)
    applied += 1
bpy.ops.wm.save_as_mainfile(filepath=output, copy=True)
print("ROOMHUE_COLORED_JSON: " + json.dumps({"applied": applied, "output": output}))
"#;

#[derive(Debug, Error)]
pub enum ColoringError {
    #[error("failed to run color host '{program}': {message}")]
    HostCommand { program: String, message: String },
    #[error("color host '{program}' exited with status {status_code}: {stderr}")]
    HostFailed {
        program: String,
        status_code: i32,
        stderr: String,
    },
    #[error("color host '{program}' did not report scene objects")]
    MissingObjectList { program: String },
    #[error("failed to encode color plan: {0}")]
    EncodePlan(#[source] serde_json::Error),
    #[error("colored artifact was not written to '{path}'")]
    OutputMissing { path: String },
    #[error("no scene object matched any color assignment")]
    NothingToColor,
    #[error("color host '{program}' did not report applied colors")]
    MissingAppliedReport { program: String },
    #[error("color host applied no color to '{path}'")]
    NothingApplied { path: String },
}

/// The 3D host, reduced to the two operations coloring needs.
pub trait SceneColorHost: Send + Sync {
    fn list_object_names(&self, scene: &Path) -> Result<Vec<String>, ColoringError>;

    /// Writes a copy of `scene` with `plan` applied to `output` and returns how many objects
    /// were colored. `scene` is left untouched.
    fn apply_colors(&self, scene: &Path, plan: &ColorPlan, output: &Path)
        -> Result<usize, ColoringError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorPlanEntry {
    pub object_name: String,
    pub target: String,
    pub color_name: String,
    pub rgb: Rgb,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColorPlan {
    pub entries: Vec<ColorPlanEntry>,
    /// Targets whose assignment had only a name that resolved to no color.
    pub skipped_without_rgb: Vec<String>,
    /// Targets that matched no scene object.
    pub unmatched_targets: Vec<String>,
}

impl ColorPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-object color entries. An object claimed by an earlier assignment keeps that color.
pub fn build_color_plan<S: AsRef<str>>(
    assignments: &[ColorAssignment],
    object_names: &[S],
    matcher: &ObjectMatcher,
) -> ColorPlan {
    let mut plan = ColorPlan::default();
    let mut claimed = HashSet::new();
    for assignment in assignments {
        let Some(rgb) = assignment.rgb() else {
            plan.skipped_without_rgb.push(assignment.target().to_string());
            continue;
        };
        let matched = matcher.match_objects(assignment.target(), object_names);
        if matched.is_empty() {
            plan.unmatched_targets.push(assignment.target().to_string());
            continue;
        }
        for object_name in matched {
            if !claimed.insert(object_name.clone()) {
                continue;
            }
            plan.entries.push(ColorPlanEntry {
                object_name,
                target: assignment.target().to_string(),
                color_name: assignment.color_name().to_string(),
                rgb,
            });
        }
    }
    plan
}

/// `<stem>_colored.<ext>` beside `artifact`.
pub fn colored_artifact_path(artifact: &Path) -> PathBuf {
    let stem = artifact
        .file_stem()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("scene"));
    let name = match artifact.extension() {
        Some(ext) => format!("{stem}{COLORED_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{COLORED_SUFFIX}"),
    };
    artifact.with_file_name(name)
}

/// Best-effort coloring of a finished generation.
///
/// A failed or empty coloring never turns a successful generation into a failure: the
/// returned result keeps the original artifact and carries `CallbackFailed` instead.
pub fn apply_colors(
    result: &GenerationResult,
    assignments: &[ColorAssignment],
    host: &dyn SceneColorHost,
    matcher: &ObjectMatcher,
) -> GenerationResult {
    if !result.succeeded || assignments.is_empty() {
        return result.clone();
    }
    let scene = result.artifact_path.as_path();
    match color_scene(scene, assignments, host, matcher) {
        Ok((colored, plan)) => {
            tracing::info!(
                artifact = %colored.display(),
                objects = plan.entries.len(),
                unmatched = ?plan.unmatched_targets,
                "applied color scheme to scene"
            );
            GenerationResult {
                source_artifact_path: Some(scene.to_path_buf()),
                artifact_path: colored,
                final_state: GenerationState::CallbackApplied,
                ..result.clone()
            }
        }
        Err(error) => {
            tracing::warn!(
                scene = %scene.display(),
                error = %error,
                "scene coloring failed, keeping uncolored artifact"
            );
            GenerationResult {
                error_kind: Some(GenerationErrorKind::CallbackFailed {
                    message: error.to_string(),
                }),
                ..result.clone()
            }
        }
    }
}

fn color_scene(
    scene: &Path,
    assignments: &[ColorAssignment],
    host: &dyn SceneColorHost,
    matcher: &ObjectMatcher,
) -> Result<(PathBuf, ColorPlan), ColoringError> {
    let names = host.list_object_names(scene)?;
    tracing::debug!(objects = names.len(), "scene objects listed");
    let plan = build_color_plan(assignments, names.as_slice(), matcher);
    if !plan.skipped_without_rgb.is_empty() {
        tracing::warn!(targets = ?plan.skipped_without_rgb, "assignments without RGB skipped");
    }
    if plan.is_empty() {
        return Err(ColoringError::NothingToColor);
    }
    let output = colored_artifact_path(scene);
    let applied = host.apply_colors(scene, &plan, output.as_path())?;
    if applied == 0 {
        let _ = fs::remove_file(output.as_path());
        return Err(ColoringError::NothingApplied {
            path: scene.display().to_string(),
        });
    }
    if !output.is_file() {
        return Err(ColoringError::OutputMissing {
            path: output.display().to_string(),
        });
    }
    Ok((output, plan))
}

/// Drives the 3D host binary in background mode with embedded scripts.
pub struct ScriptSceneColorHost<R> {
    runner: R,
    program: String,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl<R> ScriptSceneColorHost<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(runner: R, program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
            cwd: cwd.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run_script(&self, scene: &Path, script: &str, extra: Vec<String>) -> Result<String, ColoringError> {
        let mut args = vec![
            String::from("--background"),
            scene.to_string_lossy().to_string(),
            String::from("--python-expr"),
            script.trim().to_string(),
        ];
        if !extra.is_empty() {
            args.push(String::from("--"));
            args.extend(extra);
        }
        let mut spec = CommandSpec::new(self.program.clone(), args, self.cwd.clone());
        spec.timeout = self.timeout;
        spec.retain_lines = Some(500);

        let output = self
            .runner
            .run(&spec)
            .map_err(|error| ColoringError::HostCommand {
                program: self.program.clone(),
                message: error.to_string(),
            })?;
        if !output.success() {
            return Err(ColoringError::HostFailed {
                program: self.program.clone(),
                status_code: output.status_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

impl<R> SceneColorHost for ScriptSceneColorHost<R>
where
    R: PipelineCommandRunner,
{
    fn list_object_names(&self, scene: &Path) -> Result<Vec<String>, ColoringError> {
        let stdout = self.run_script(scene, LIST_OBJECTS_SCRIPT, Vec::new())?;
        parse_object_names_from_stdout(stdout.as_str()).ok_or_else(|| {
            ColoringError::MissingObjectList {
                program: self.program.clone(),
            }
        })
    }

    fn apply_colors(
        &self,
        scene: &Path,
        plan: &ColorPlan,
        output: &Path,
    ) -> Result<usize, ColoringError> {
        let plan_json = serde_json::to_string(plan).map_err(ColoringError::EncodePlan)?;
        let stdout = self.run_script(
            scene,
            APPLY_COLORS_SCRIPT,
            vec![plan_json, output.to_string_lossy().to_string()],
        )?;
        let applied = parse_applied_count_from_stdout(stdout.as_str()).ok_or_else(|| {
            ColoringError::MissingAppliedReport {
                program: self.program.clone(),
            }
        })?;
        tracing::debug!(applied, "color host reported applied materials");
        Ok(usize::try_from(applied).unwrap_or(usize::MAX))
    }
}

/// Last `ROOMHUE_OBJECTS_JSON:` line on stdout, decoded as a list of names.
pub(crate) fn parse_object_names_from_stdout(stdout: &str) -> Option<Vec<String>> {
    let payload = marker_payload(stdout, OBJECTS_MARKER)?;
    serde_json::from_str::<Vec<String>>(payload).ok()
}

fn parse_applied_count_from_stdout(stdout: &str) -> Option<u64> {
    let payload = marker_payload(stdout, APPLIED_MARKER)?;
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()?
        .get("applied")?
        .as_u64()
}

fn marker_payload<'a>(stdout: &'a str, marker: &str) -> Option<&'a str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(marker))
        .last()
        .map(|line| line.trim_start_matches(marker).trim())
        .filter(|payload| !payload.is_empty())
}
