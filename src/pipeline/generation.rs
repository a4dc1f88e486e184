use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::artifact::{
    collision_free_dir, find_any_artifact, find_preferred_artifact, has_existing_artifact,
};
use crate::pipeline::failure_hint::{classify_failure_output, FailureHint};
use crate::pipeline::runlog::{
    rfc3339_now, unix_stamp_now, write_pretty_json_with_newline, RUN_RECORD_FILE_NAME,
};
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};

pub const DEFAULT_GENERATOR_PROGRAM: &str = "python";
pub const DEFAULT_GENERATOR_ARGS: &[&str] = &["-m", "infinigen_examples.generate_indoors"];
pub const DEFAULT_TASK_STAGES: &[&str] = &["coarse"];
pub const DEFAULT_OVERLAY_CONFIGS: &[&str] = &["fast_solve.gin", "singleroom.gin"];
pub const DEFAULT_OVERRIDE_PARAMS: &[&str] = &["compose_indoors.terrain_enabled=False"];
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_BUDGET: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;
/// Small seeds tend to produce simpler scenes that generate faster.
pub const MAX_AUTO_SEED: u32 = 10_000;
const OUTPUT_TAIL_LINES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorToolConfig {
    pub program: String,
    pub program_args: Vec<String>,
    /// Working directory of the generator process.
    pub tool_root: PathBuf,
    pub stream_output: bool,
}

impl Default for GeneratorToolConfig {
    fn default() -> Self {
        Self {
            program: String::from(DEFAULT_GENERATOR_PROGRAM),
            program_args: to_strings(DEFAULT_GENERATOR_ARGS),
            tool_root: PathBuf::from("."),
            stream_output: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactPollConfig {
    pub interval: Duration,
    pub budget: Duration,
    /// Files of this size or smaller are treated as still being written.
    pub min_artifact_bytes: u64,
}

impl Default for ArtifactPollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            budget: DEFAULT_POLL_BUDGET,
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
        }
    }
}

pub type ContinuationError = Box<dyn std::error::Error + Send + Sync>;

/// Post-processing step run on a freshly generated artifact. The returned path replaces
/// the artifact in the result.
pub trait ArtifactContinuation: Send + Sync {
    fn on_artifact_ready(&self, artifact: &Path) -> Result<PathBuf, ContinuationError>;
}

impl<F> ArtifactContinuation for F
where
    F: Fn(&Path) -> Result<PathBuf, ContinuationError> + Send + Sync,
{
    fn on_artifact_ready(&self, artifact: &Path) -> Result<PathBuf, ContinuationError> {
        self(artifact)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerationRequestError {
    #[error("generation output directory must not be empty")]
    EmptyOutputDir,
    #[error("generation request needs at least one task stage")]
    EmptyTaskStages,
    #[error("task stage at position {index} is blank")]
    BlankTaskStage { index: usize },
    #[error("seed must not be blank")]
    BlankSeed,
}

#[derive(Clone)]
pub struct GenerationRequest {
    output_dir: PathBuf,
    seed: Option<String>,
    task_stages: Vec<String>,
    overlay_configs: Vec<String>,
    override_params: Vec<String>,
    timeout: Option<Duration>,
    auto_rename: bool,
    on_artifact_ready: Option<Arc<dyn ArtifactContinuation>>,
}

impl GenerationRequest {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        task_stages: Vec<String>,
    ) -> Result<Self, GenerationRequestError> {
        let output_dir = output_dir.into();
        if output_dir.as_os_str().is_empty() {
            return Err(GenerationRequestError::EmptyOutputDir);
        }
        if task_stages.is_empty() {
            return Err(GenerationRequestError::EmptyTaskStages);
        }
        if let Some(index) = task_stages.iter().position(|stage| stage.trim().is_empty()) {
            return Err(GenerationRequestError::BlankTaskStage { index });
        }
        Ok(Self {
            output_dir,
            seed: None,
            task_stages: task_stages.into_iter().map(|v| v.trim().to_string()).collect(),
            overlay_configs: to_strings(DEFAULT_OVERLAY_CONFIGS),
            override_params: Vec::new(),
            timeout: None,
            auto_rename: true,
            on_artifact_ready: None,
        })
    }

    pub fn with_seed(mut self, seed: impl Into<String>) -> Result<Self, GenerationRequestError> {
        let seed = seed.into().trim().to_string();
        if seed.is_empty() {
            return Err(GenerationRequestError::BlankSeed);
        }
        self.seed = Some(seed);
        Ok(self)
    }

    pub fn with_overlay_configs(mut self, configs: Vec<String>) -> Self {
        self.overlay_configs = configs;
        self
    }

    pub fn with_override_params(mut self, params: Vec<String>) -> Self {
        self.override_params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auto_rename(mut self, auto_rename: bool) -> Self {
        self.auto_rename = auto_rename;
        self
    }

    pub fn with_continuation(mut self, continuation: Arc<dyn ArtifactContinuation>) -> Self {
        self.on_artifact_ready = Some(continuation);
        self
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_path()
    }

    pub fn seed(&self) -> Option<&str> {
        self.seed.as_deref()
    }

    pub fn task_stages(&self) -> &[String] {
        &self.task_stages
    }

    pub fn overlay_configs(&self) -> &[String] {
        &self.overlay_configs
    }

    pub fn override_params(&self) -> &[String] {
        &self.override_params
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn auto_rename(&self) -> bool {
        self.auto_rename
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("output_dir", &self.output_dir)
            .field("seed", &self.seed)
            .field("task_stages", &self.task_stages)
            .field("overlay_configs", &self.overlay_configs)
            .field("override_params", &self.override_params)
            .field("timeout", &self.timeout)
            .field("auto_rename", &self.auto_rename)
            .field("on_artifact_ready", &self.on_artifact_ready.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    Launching,
    Running,
    ArtifactPolling,
    Succeeded,
    TimedOut,
    Failed,
    CallbackApplied,
}

impl GenerationState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use GenerationState::{
            ArtifactPolling, CallbackApplied, Failed, Launching, Pending, Running, Succeeded,
            TimedOut,
        };

        matches!(
            (self, next),
            (Pending, Launching)
                | (Launching, Running)
                | (Launching, Failed)
                | (Running, ArtifactPolling)
                | (Running, TimedOut)
                | (Running, Failed)
                | (ArtifactPolling, Succeeded)
                | (ArtifactPolling, Failed)
                | (Succeeded, CallbackApplied)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::TimedOut | Self::Failed | Self::CallbackApplied
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::ArtifactPolling => "artifact_polling",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::CallbackApplied => "callback_applied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationErrorKind {
    ArtifactNotFound,
    ProcessTimeout {
        timeout_ms: u64,
    },
    ProcessFailed {
        exit_code: Option<i32>,
        hint: Option<FailureHint>,
    },
    /// The artifact itself is fine; only post-processing failed.
    CallbackFailed {
        message: String,
    },
    LaunchFailed {
        message: String,
        hint: Option<FailureHint>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedOrigin {
    Given,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    /// The artifact when `succeeded`, otherwise the output directory as a fallback handle.
    pub artifact_path: PathBuf,
    pub succeeded: bool,
    pub error_kind: Option<GenerationErrorKind>,
    pub raw_output: Option<String>,
    pub seed: String,
    pub output_dir: PathBuf,
    pub final_state: GenerationState,
    /// The generated artifact before a continuation replaced it.
    pub source_artifact_path: Option<PathBuf>,
}

impl GenerationResult {
    /// A finished scene that this process did not generate, such as a pooled template,
    /// shaped like a successful run so it can be colored the same way.
    pub fn existing_scene(artifact: impl Into<PathBuf>, seed: impl Into<String>) -> Self {
        let artifact_path = artifact.into();
        Self {
            output_dir: artifact_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            artifact_path,
            succeeded: true,
            error_kind: None,
            raw_output: None,
            seed: seed.into(),
            final_state: GenerationState::Succeeded,
            source_artifact_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerationRunRecord<'a> {
    created_at: String,
    seed: &'a str,
    seed_origin: SeedOrigin,
    program: &'a str,
    args: &'a [String],
    task_stages: &'a [String],
    final_state: GenerationState,
    succeeded: bool,
    artifact_path: &'a Path,
    error_kind: Option<&'a GenerationErrorKind>,
}

struct StateTracker {
    state: GenerationState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: GenerationState::Pending,
        }
    }

    fn advance(&mut self, next: GenerationState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                from = self.state.as_str(),
                to = next.as_str(),
                "unexpected generation state transition"
            );
        }
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "generation state");
        self.state = next;
    }
}

/// Drives one run of the external scene generator.
///
/// `run` blocks for the whole child process lifetime plus artifact polling and never
/// returns an error: every process-level problem is reported through
/// [`GenerationResult::error_kind`]. There is no retry of a failed process and no locking
/// of the output directory; concurrent runs need distinct directories.
pub struct GenerationOrchestrator<R> {
    runner: R,
    tool: GeneratorToolConfig,
    polling: ArtifactPollConfig,
}

impl<R> GenerationOrchestrator<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(runner: R, tool: GeneratorToolConfig, polling: ArtifactPollConfig) -> Self {
        Self {
            runner,
            tool,
            polling,
        }
    }

    pub fn tool(&self) -> &GeneratorToolConfig {
        &self.tool
    }

    pub fn run(&self, req: &GenerationRequest) -> GenerationResult {
        let mut tracker = StateTracker::new();
        tracker.advance(GenerationState::Launching);

        let output_dir = self.prepare_output_dir(req);
        let (seed, seed_origin) = match req.seed() {
            Some(seed) => (seed.to_string(), SeedOrigin::Given),
            None => {
                let seed = auto_seed();
                tracing::info!(seed = seed.as_str(), "no seed given, generated one");
                (seed, SeedOrigin::Auto)
            }
        };

        let mut args = self.tool.program_args.clone();
        args.extend(build_generation_args(
            output_dir.as_path(),
            seed.as_str(),
            req.task_stages(),
            req.overlay_configs(),
            req.override_params(),
        ));

        let mut outcome = Outcome {
            artifact_path: output_dir.clone(),
            error_kind: None,
            raw_output: None,
            source_artifact_path: None,
        };

        if let Err(error) = fs::create_dir_all(output_dir.as_path()) {
            tracing::error!(
                output_dir = %output_dir.display(),
                error = %error,
                "failed to create generation output directory"
            );
            tracker.advance(GenerationState::Failed);
            outcome.error_kind = Some(GenerationErrorKind::LaunchFailed {
                message: format!("failed to create output directory: {error}"),
                hint: None,
            });
            return self.finish(req, tracker, outcome, &output_dir, &seed, seed_origin, &args);
        }

        tracing::info!(
            program = self.tool.program.as_str(),
            args = ?args,
            output_dir = %output_dir.display(),
            seed = seed.as_str(),
            stages = ?req.task_stages(),
            "launching scene generator"
        );
        tracker.advance(GenerationState::Running);

        let spec = CommandSpec {
            program: self.tool.program.clone(),
            args: args.clone(),
            cwd: self.tool.tool_root.clone(),
            timeout: req.timeout(),
            stream_output: self.tool.stream_output,
            retain_lines: Some(OUTPUT_TAIL_LINES),
        };

        match self.runner.run(&spec) {
            Err(PipelineRuntimeError::TimedOut {
                timeout,
                stdout,
                stderr,
                ..
            }) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::error!(timeout_ms, "scene generator timed out and was killed");
                tracker.advance(GenerationState::TimedOut);
                outcome.error_kind = Some(GenerationErrorKind::ProcessTimeout { timeout_ms });
                outcome.raw_output = non_empty(join_streams(stderr.as_str(), stdout.as_str()));
            }
            Err(PipelineRuntimeError::Launch { program, source }) => {
                let hint = (source.kind() == std::io::ErrorKind::NotFound)
                    .then_some(FailureHint::ToolNotFound);
                tracing::error!(program = program.as_str(), error = %source, "failed to launch scene generator");
                tracker.advance(GenerationState::Failed);
                outcome.raw_output = Some(source.to_string());
                outcome.error_kind = Some(GenerationErrorKind::LaunchFailed {
                    message: source.to_string(),
                    hint,
                });
            }
            Err(error) => {
                tracing::error!(error = %error, "scene generator execution failed");
                tracker.advance(GenerationState::Failed);
                outcome.raw_output = Some(error.to_string());
                outcome.error_kind = Some(GenerationErrorKind::ProcessFailed {
                    exit_code: None,
                    hint: None,
                });
            }
            Ok(output) if !output.success() => {
                let raw = output.combined();
                let hint = classify_failure_output(raw.as_str());
                let hint_message = hint.as_ref().map(FailureHint::message).unwrap_or_default();
                tracing::error!(
                    exit_code = output.status_code,
                    hint = %hint_message,
                    "scene generator failed"
                );
                tracker.advance(GenerationState::Failed);
                outcome.error_kind = Some(GenerationErrorKind::ProcessFailed {
                    exit_code: (output.status_code >= 0).then_some(output.status_code),
                    hint,
                });
                outcome.raw_output = non_empty(raw);
            }
            Ok(output) => {
                tracker.advance(GenerationState::ArtifactPolling);
                match self.poll_for_artifact(output_dir.as_path()) {
                    Some(artifact) => {
                        tracing::info!(artifact = %artifact.display(), "scene artifact ready");
                        tracker.advance(GenerationState::Succeeded);
                        outcome.artifact_path = artifact;
                    }
                    None => {
                        tracing::warn!(
                            output_dir = %output_dir.display(),
                            "generator exited cleanly but no artifact was found"
                        );
                        tracker.advance(GenerationState::Failed);
                        outcome.error_kind = Some(GenerationErrorKind::ArtifactNotFound);
                        outcome.raw_output = non_empty(output.combined());
                    }
                }
            }
        }

        if tracker.state == GenerationState::Succeeded {
            if let Some(continuation) = req.on_artifact_ready.as_ref() {
                apply_continuation(continuation.as_ref(), &mut tracker, &mut outcome);
            }
        }

        self.finish(req, tracker, outcome, &output_dir, &seed, seed_origin, &args)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        req: &GenerationRequest,
        tracker: StateTracker,
        outcome: Outcome,
        output_dir: &Path,
        seed: &str,
        seed_origin: SeedOrigin,
        args: &[String],
    ) -> GenerationResult {
        let succeeded = matches!(
            tracker.state,
            GenerationState::Succeeded | GenerationState::CallbackApplied
        );
        let record = GenerationRunRecord {
            created_at: rfc3339_now(),
            seed,
            seed_origin,
            program: self.tool.program.as_str(),
            args,
            task_stages: req.task_stages(),
            final_state: tracker.state,
            succeeded,
            artifact_path: outcome.artifact_path.as_path(),
            error_kind: outcome.error_kind.as_ref(),
        };
        if output_dir.is_dir() {
            if let Err(error) =
                write_pretty_json_with_newline(&output_dir.join(RUN_RECORD_FILE_NAME), &record)
            {
                tracing::warn!(error = %error, "failed to write generation run record");
            }
        }

        GenerationResult {
            artifact_path: outcome.artifact_path,
            succeeded,
            error_kind: outcome.error_kind,
            raw_output: outcome.raw_output,
            seed: seed.to_string(),
            output_dir: output_dir.to_path_buf(),
            final_state: tracker.state,
            source_artifact_path: outcome.source_artifact_path,
        }
    }

    fn prepare_output_dir(&self, req: &GenerationRequest) -> PathBuf {
        let requested = absolutize(req.output_dir());
        if !has_existing_artifact(requested.as_path()) {
            return requested;
        }
        if req.auto_rename() {
            let renamed = collision_free_dir(requested.as_path(), unix_stamp_now().as_str());
            tracing::warn!(
                requested = %requested.display(),
                renamed = %renamed.display(),
                "output directory already holds an artifact, using a new directory"
            );
            renamed
        } else {
            tracing::warn!(
                output_dir = %requested.display(),
                "output directory already holds an artifact and will be overwritten"
            );
            requested
        }
    }

    /// Bounded poll of the conventional locations, then one recursive search.
    fn poll_for_artifact(&self, output_dir: &Path) -> Option<PathBuf> {
        let min_bytes = self.polling.min_artifact_bytes;
        let started = Instant::now();
        loop {
            if let Some(found) = find_preferred_artifact(output_dir, min_bytes) {
                return Some(found);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.polling.budget {
                break;
            }
            tracing::debug!(
                waited_ms = elapsed.as_millis() as u64,
                budget_ms = self.polling.budget.as_millis() as u64,
                "waiting for scene artifact"
            );
            let remaining = self.polling.budget - elapsed;
            thread::sleep(self.polling.interval.min(remaining).max(Duration::from_millis(1)));
        }
        find_any_artifact(output_dir, min_bytes)
    }
}

struct Outcome {
    artifact_path: PathBuf,
    error_kind: Option<GenerationErrorKind>,
    raw_output: Option<String>,
    source_artifact_path: Option<PathBuf>,
}

fn apply_continuation(
    continuation: &dyn ArtifactContinuation,
    tracker: &mut StateTracker,
    outcome: &mut Outcome,
) {
    let original = outcome.artifact_path.clone();
    match continuation.on_artifact_ready(original.as_path()) {
        Ok(derived) if derived.exists() => {
            tracing::info!(artifact = %derived.display(), "post-processing replaced artifact");
            tracker.advance(GenerationState::CallbackApplied);
            outcome.source_artifact_path = Some(original);
            outcome.artifact_path = derived;
        }
        Ok(derived) => {
            tracing::warn!(
                returned = %derived.display(),
                "post-processing returned a missing path, keeping original artifact"
            );
            outcome.error_kind = Some(GenerationErrorKind::CallbackFailed {
                message: format!("continuation returned missing path '{}'", derived.display()),
            });
        }
        Err(error) => {
            tracing::error!(error = %error, "post-processing failed, keeping original artifact");
            outcome.error_kind = Some(GenerationErrorKind::CallbackFailed {
                message: error.to_string(),
            });
        }
    }
}

/// Generator arguments after the program's own prefix arguments:
/// `--output_folder <dir> -s <seed> -t <stage>... -g <config>... [-p <param>...]`.
/// Each element is passed to the process as-is; nothing is shell-interpreted.
pub fn build_generation_args(
    output_dir: &Path,
    seed: &str,
    task_stages: &[String],
    overlay_configs: &[String],
    override_params: &[String],
) -> Vec<String> {
    let mut args = vec![
        String::from("--output_folder"),
        output_dir.to_string_lossy().to_string(),
        String::from("-s"),
        seed.to_string(),
        String::from("-t"),
    ];
    args.extend(task_stages.iter().cloned());
    for config in overlay_configs {
        args.push(String::from("-g"));
        args.push(config.clone());
    }
    if !override_params.is_empty() {
        args.push(String::from("-p"));
        args.extend(override_params.iter().cloned());
    }
    args
}

/// Random value in `0..=MAX_AUTO_SEED` rendered as 8 lowercase hex digits, so the
/// generator's hex seed parsing yields the same small value.
pub fn auto_seed() -> String {
    format_seed(random_seed_value())
}

pub fn format_seed(value: u32) -> String {
    format!("{value:08x}")
}

fn random_seed_value() -> u32 {
    let mut bytes = [0u8; 4];
    let raw = match SystemRandom::new().fill(&mut bytes) {
        Ok(()) => u32::from_le_bytes(bytes),
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default(),
    };
    raw % (MAX_AUTO_SEED + 1)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn join_streams(stderr: &str, stdout: &str) -> String {
    [stderr, stdout]
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::CommandOutput;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn temp_root(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("roomhue_generation_{label}_{stamp}"));
        fs::create_dir_all(root.as_path()).expect("temp root should exist");
        root
    }

    /// Writes an artifact of `artifact_bytes` into the `--output_folder` directory before
    /// returning `next`.
    #[derive(Clone)]
    struct FakeRunner {
        seen: Arc<Mutex<Vec<CommandSpec>>>,
        next: Arc<Mutex<Option<Result<CommandOutput, PipelineRuntimeError>>>>,
        artifact_bytes: Option<usize>,
    }

    impl FakeRunner {
        fn producing(artifact_bytes: Option<usize>) -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
                next: Arc::new(Mutex::new(None)),
                artifact_bytes,
            }
        }

        fn with_next(result: Result<CommandOutput, PipelineRuntimeError>) -> Self {
            let runner = Self::producing(None);
            *runner.next.lock().expect("fake runner mutex poisoned") = Some(result);
            runner
        }

        fn take_seen(&self) -> Vec<CommandSpec> {
            std::mem::take(&mut *self.seen.lock().expect("fake runner mutex poisoned"))
        }
    }

    impl PipelineCommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            self.seen
                .lock()
                .expect("fake runner mutex poisoned")
                .push(spec.clone());
            if let Some(bytes) = self.artifact_bytes {
                let idx = spec
                    .args
                    .iter()
                    .position(|arg| arg == "--output_folder")
                    .expect("output folder arg");
                let dir = PathBuf::from(&spec.args[idx + 1]);
                fs::write(dir.join("scene.blend"), vec![0u8; bytes]).expect("fake artifact");
            }
            self.next
                .lock()
                .expect("fake runner mutex poisoned")
                .take()
                .unwrap_or_else(|| {
                    Ok(CommandOutput {
                        status_code: 0,
                        stdout: String::from("done"),
                        stderr: String::new(),
                    })
                })
        }
    }

    fn fast_polling() -> ArtifactPollConfig {
        ArtifactPollConfig {
            interval: Duration::from_millis(10),
            budget: Duration::from_millis(50),
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
        }
    }

    fn orchestrator(runner: FakeRunner) -> GenerationOrchestrator<FakeRunner> {
        GenerationOrchestrator::new(
            runner,
            GeneratorToolConfig {
                stream_output: false,
                ..GeneratorToolConfig::default()
            },
            fast_polling(),
        )
    }

    fn stages() -> Vec<String> {
        vec![String::from("coarse")]
    }

    #[test]
    fn request_requires_stages_and_output_dir() {
        assert_eq!(
            GenerationRequest::new("out", Vec::new()).err(),
            Some(GenerationRequestError::EmptyTaskStages)
        );
        assert_eq!(
            GenerationRequest::new("", stages()).err(),
            Some(GenerationRequestError::EmptyOutputDir)
        );
        assert_eq!(
            GenerationRequest::new("out", vec![String::from("coarse"), String::from(" ")]).err(),
            Some(GenerationRequestError::BlankTaskStage { index: 1 })
        );
        assert_eq!(
            GenerationRequest::new("out", stages())
                .and_then(|req| req.with_seed("  "))
                .err(),
            Some(GenerationRequestError::BlankSeed)
        );
    }

    #[test]
    fn state_table_allows_only_forward_transitions() {
        use GenerationState::*;
        assert!(Pending.can_transition_to(Launching));
        assert!(Running.can_transition_to(TimedOut));
        assert!(ArtifactPolling.can_transition_to(Failed));
        assert!(Succeeded.can_transition_to(CallbackApplied));
        assert!(!TimedOut.can_transition_to(ArtifactPolling));
        assert!(!Failed.can_transition_to(CallbackApplied));
        assert!(!Pending.can_transition_to(Running));
        assert!(CallbackApplied.is_terminal());
        assert!(!ArtifactPolling.is_terminal());
    }

    #[test]
    fn builds_structured_argument_vector() {
        let args = build_generation_args(
            Path::new("/tmp/out"),
            "0000002a",
            &[String::from("coarse"), String::from("render")],
            &[String::from("fast_solve.gin"), String::from("singleroom.gin")],
            &[String::from(r#"restrict_solving.restrict_parent_rooms=["Bedroom"]"#)],
        );
        assert_eq!(
            args,
            vec![
                "--output_folder",
                "/tmp/out",
                "-s",
                "0000002a",
                "-t",
                "coarse",
                "render",
                "-g",
                "fast_solve.gin",
                "-g",
                "singleroom.gin",
                "-p",
                r#"restrict_solving.restrict_parent_rooms=["Bedroom"]"#,
            ]
        );

        let no_overrides = build_generation_args(Path::new("o"), "s", &stages(), &[], &[]);
        assert!(!no_overrides.contains(&String::from("-p")));
    }

    #[test]
    fn auto_seed_is_bounded_hex() {
        for _ in 0..32 {
            let seed = auto_seed();
            assert_eq!(seed.len(), 8);
            let value = u32::from_str_radix(seed.as_str(), 16).expect("seed should be hex");
            assert!(value <= MAX_AUTO_SEED);
        }
        assert_eq!(format_seed(10_000), "00002710");
    }

    #[test]
    fn successful_run_returns_artifact_and_writes_record() {
        let root = temp_root("success");
        let runner = FakeRunner::producing(Some(4096));
        let orchestrator = orchestrator(runner.clone());
        let req = GenerationRequest::new(root.join("scene"), stages())
            .expect("request")
            .with_seed("0000002a")
            .expect("seed");

        let result = orchestrator.run(&req);
        assert!(result.succeeded);
        assert_eq!(result.final_state, GenerationState::Succeeded);
        assert_eq!(result.artifact_path, root.join("scene").join("scene.blend"));
        assert_eq!(result.seed, "0000002a");
        assert_eq!(result.error_kind, None);

        let seen = runner.take_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "python");
        assert_eq!(seen[0].args[..2], ["-m", "infinigen_examples.generate_indoors"]);
        assert_eq!(seen[0].retain_lines, Some(OUTPUT_TAIL_LINES));

        let record: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(root.join("scene").join(RUN_RECORD_FILE_NAME))
                .expect("run record"),
        )
        .expect("run record json");
        assert_eq!(record["seed"], "0000002a");
        assert_eq!(record["seed_origin"], "given");
        assert_eq!(record["final_state"], "succeeded");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn auto_seed_is_recorded_when_missing() {
        let root = temp_root("auto_seed");
        let orchestrator = orchestrator(FakeRunner::producing(Some(4096)));
        let req = GenerationRequest::new(root.join("scene"), stages()).expect("request");

        let result = orchestrator.run(&req);
        let record: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(root.join("scene").join(RUN_RECORD_FILE_NAME))
                .expect("run record"),
        )
        .expect("run record json");
        assert_eq!(record["seed"], result.seed.as_str());
        assert_eq!(record["seed_origin"], "auto");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn existing_artifact_triggers_rename() {
        let root = temp_root("rename");
        let out = root.join("scene");
        fs::create_dir_all(out.as_path()).expect("out dir");
        fs::write(out.join("scene.blend"), vec![0u8; 4096]).expect("prior artifact");

        let orchestrator = orchestrator(FakeRunner::producing(Some(4096)));
        let req = GenerationRequest::new(out.clone(), stages()).expect("request");
        let result = orchestrator.run(&req);

        assert!(result.succeeded);
        assert_ne!(result.output_dir, out);
        assert!(result
            .output_dir
            .file_name()
            .and_then(|v| v.to_str())
            .is_some_and(|name| name.starts_with("scene_")));
        assert_eq!(
            fs::read(out.join("scene.blend")).expect("prior artifact").len(),
            4096
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn rename_disabled_reuses_directory() {
        let root = temp_root("no_rename");
        let out = root.join("scene");
        fs::create_dir_all(out.as_path()).expect("out dir");
        fs::write(out.join("scene.blend"), vec![0u8; 10]).expect("prior artifact");

        let orchestrator = orchestrator(FakeRunner::producing(Some(4096)));
        let req = GenerationRequest::new(out.clone(), stages())
            .expect("request")
            .with_auto_rename(false);
        let result = orchestrator.run(&req);

        assert_eq!(result.output_dir, out);
        assert_eq!(result.artifact_path, out.join("scene.blend"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn small_artifact_is_not_accepted() {
        let root = temp_root("small");
        let orchestrator = orchestrator(FakeRunner::producing(Some(1024)));
        let req = GenerationRequest::new(root.join("scene"), stages()).expect("request");

        let result = orchestrator.run(&req);
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, Some(GenerationErrorKind::ArtifactNotFound));
        assert_eq!(result.artifact_path, root.join("scene"));
        assert_eq!(result.final_state, GenerationState::Failed);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn recursive_fallback_finds_nonstandard_location() {
        let root = temp_root("fallback");
        let out = root.join("scene");
        let orchestrator = orchestrator(FakeRunner::producing(None));
        let req = GenerationRequest::new(out.clone(), stages())
            .expect("request")
            .with_continuation(Arc::new(
                |artifact: &Path| -> Result<PathBuf, ContinuationError> { Ok(artifact.to_path_buf()) },
            ));
        // Written after the directory exists but outside the conventional paths.
        fs::create_dir_all(out.join("frames/x")).expect("nested dir");
        fs::write(out.join("frames/x/other.blend"), vec![0u8; 2048]).expect("nested artifact");

        let result = orchestrator.run(&req.with_auto_rename(false));
        assert!(result.succeeded);
        assert_eq!(result.artifact_path, out.join("frames/x/other.blend"));
        assert_eq!(result.final_state, GenerationState::CallbackApplied);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn nonzero_exit_is_classified_with_hint() {
        let root = temp_root("failed");
        let orchestrator = orchestrator(FakeRunner::with_next(Ok(CommandOutput {
            status_code: 1,
            stdout: String::from("loading"),
            stderr: String::from("ModuleNotFoundError: No module named 'landlab' in terrain"),
        })));
        let req = GenerationRequest::new(root.join("scene"), stages()).expect("request");

        let result = orchestrator.run(&req);
        assert!(!result.succeeded);
        assert_eq!(
            result.error_kind,
            Some(GenerationErrorKind::ProcessFailed {
                exit_code: Some(1),
                hint: Some(FailureHint::MissingTerrainDependency),
            })
        );
        let raw = result.raw_output.expect("raw output kept");
        assert!(raw.contains("landlab"));
        assert!(raw.contains("loading"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn timeout_skips_polling() {
        let root = temp_root("timeout");
        let out = root.join("scene");
        fs::create_dir_all(out.as_path()).expect("out dir");
        let orchestrator = orchestrator(FakeRunner::with_next(Err(PipelineRuntimeError::TimedOut {
            program: String::from("python"),
            timeout: Duration::from_secs(5),
            stdout: String::from("partial"),
            stderr: String::new(),
        })));
        let req = GenerationRequest::new(out.clone(), stages())
            .expect("request")
            .with_timeout(Some(Duration::from_secs(5)));

        let result = orchestrator.run(&req);
        assert!(!result.succeeded);
        assert_eq!(result.final_state, GenerationState::TimedOut);
        assert_eq!(
            result.error_kind,
            Some(GenerationErrorKind::ProcessTimeout { timeout_ms: 5_000 })
        );
        assert_eq!(result.raw_output.as_deref(), Some("partial"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn sub_second_timeout_is_not_reported_as_zero() {
        let root = temp_root("timeout_ms");
        let out = root.join("scene");
        let orchestrator = orchestrator(FakeRunner::with_next(Err(PipelineRuntimeError::TimedOut {
            program: String::from("python"),
            timeout: Duration::from_millis(400),
            stdout: String::new(),
            stderr: String::new(),
        })));
        let req = GenerationRequest::new(out, stages())
            .expect("request")
            .with_timeout(Some(Duration::from_millis(400)));

        let result = orchestrator.run(&req);
        assert_eq!(
            result.error_kind,
            Some(GenerationErrorKind::ProcessTimeout { timeout_ms: 400 })
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn continuation_failure_keeps_original_artifact() {
        let root = temp_root("callback_fail");
        let orchestrator = orchestrator(FakeRunner::producing(Some(4096)));
        let req = GenerationRequest::new(root.join("scene"), stages())
            .expect("request")
            .with_continuation(Arc::new(
                |_: &Path| -> Result<PathBuf, ContinuationError> { Err("host crashed".into()) },
            ));

        let result = orchestrator.run(&req);
        assert!(result.succeeded);
        assert_eq!(result.final_state, GenerationState::Succeeded);
        assert_eq!(result.artifact_path, root.join("scene").join("scene.blend"));
        assert_eq!(
            result.error_kind,
            Some(GenerationErrorKind::CallbackFailed {
                message: String::from("host crashed")
            })
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn continuation_result_replaces_artifact() {
        let root = temp_root("callback_ok");
        let orchestrator = orchestrator(FakeRunner::producing(Some(4096)));
        let req = GenerationRequest::new(root.join("scene"), stages())
            .expect("request")
            .with_continuation(Arc::new(
                |artifact: &Path| -> Result<PathBuf, ContinuationError> {
                    let colored = artifact.with_file_name("scene_colored.blend");
                    fs::copy(artifact, colored.as_path())?;
                    Ok(colored)
                },
            ));

        let result = orchestrator.run(&req);
        assert!(result.succeeded);
        assert_eq!(result.final_state, GenerationState::CallbackApplied);
        assert_eq!(
            result.artifact_path,
            root.join("scene").join("scene_colored.blend")
        );
        assert_eq!(
            result.source_artifact_path,
            Some(root.join("scene").join("scene.blend"))
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn launch_failure_is_reported_not_raised() {
        let root = temp_root("launch");
        let orchestrator = orchestrator(FakeRunner::with_next(Err(PipelineRuntimeError::Launch {
            program: String::from("python"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })));
        let req = GenerationRequest::new(root.join("scene"), stages()).expect("request");

        let result = orchestrator.run(&req);
        assert!(!result.succeeded);
        assert!(matches!(
            result.error_kind,
            Some(GenerationErrorKind::LaunchFailed {
                hint: Some(FailureHint::ToolNotFound),
                ..
            })
        ));

        let _ = fs::remove_dir_all(root);
    }
}
