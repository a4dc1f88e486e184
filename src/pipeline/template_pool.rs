use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::palette::room::RoomType;
use crate::pipeline::artifact::{collision_free_dir, has_existing_artifact};
use crate::pipeline::generation::{
    format_seed, GenerationOrchestrator, GenerationRequest, GenerationRequestError,
    GenerationResult,
};
use crate::pipeline::runlog::unix_stamp_now;
use crate::pipeline::runtime::PipelineCommandRunner;
use crate::pipeline::settings_layer::AgentSettings;
use crate::storage::templates::{
    TemplateRegistry, TemplateRegistryError, TemplateStatistics, WHOLE_HOME_CATEGORY,
};

/// Rooms the generator has complete furniture constraints for.
pub const MAIN_ROOM_TYPES: [RoomType; 5] = [
    RoomType::Bedroom,
    RoomType::LivingRoom,
    RoomType::Kitchen,
    RoomType::Bathroom,
    RoomType::DiningRoom,
];
pub const DEFAULT_TEMPLATES_PER_ROOM: u32 = 5;
pub const DEFAULT_ROOM_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_WHOLE_HOME_TIMEOUT: Duration = Duration::from_secs(1800);

pub const GENERATING_DIR: &str = "generating";
const SINGLE_ROOM_CONFIG: &str = "singleroom.gin";
const WHOLE_HOME_SEED_BASE: u32 = 1000;
const SEED_RANGE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    pub rooms: Vec<RoomType>,
    pub per_room: u32,
    pub whole_home: u32,
    pub room_timeout: Option<Duration>,
    pub whole_home_timeout: Option<Duration>,
}

impl Default for PoolPlan {
    fn default() -> Self {
        Self {
            rooms: MAIN_ROOM_TYPES.to_vec(),
            per_room: DEFAULT_TEMPLATES_PER_ROOM,
            whole_home: 0,
            room_timeout: Some(DEFAULT_ROOM_TIMEOUT),
            whole_home_timeout: Some(DEFAULT_WHOLE_HOME_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolFailure {
    pub category: String,
    pub seed: String,
    pub output_dir: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolReport {
    pub registered: Vec<String>,
    pub failures: Vec<PoolFailure>,
    pub statistics: TemplateStatistics,
}

#[derive(Debug, Error)]
pub enum TemplatePoolError {
    #[error(transparent)]
    Templates(#[from] TemplateRegistryError),
    #[error(transparent)]
    Request(#[from] GenerationRequestError),
}

/// One scene the batch will generate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PoolJob {
    room: Option<RoomType>,
    ordinal: u32,
    seed: String,
    output_dir: PathBuf,
}

impl PoolJob {
    fn category_label(&self) -> &'static str {
        self.room.map(RoomType::as_str).unwrap_or(WHOLE_HOME_CATEGORY)
    }
}

/// Pre-generates scenes into the template registry so later requests can reuse them.
///
/// Jobs run one after another. A failed scene is recorded and the batch moves on; only
/// registry or request setup errors abort it. Numbering continues after the templates a
/// category already has, so a second batch adds new seeds instead of repeating old ones.
pub struct TemplatePoolBuilder<R> {
    settings: AgentSettings,
    orchestrator: GenerationOrchestrator<R>,
}

impl<R> TemplatePoolBuilder<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(settings: AgentSettings, runner: R) -> Self {
        let orchestrator =
            GenerationOrchestrator::new(runner, settings.tool_config(), settings.poll_config());
        Self {
            settings,
            orchestrator,
        }
    }

    pub fn build(&self, plan: &PoolPlan) -> Result<PoolReport, TemplatePoolError> {
        let mut registry = TemplateRegistry::open(self.settings.templates_root.clone())?;
        let jobs = plan_jobs(&registry, plan);
        tracing::info!(
            scenes = jobs.len(),
            rooms = plan.rooms.len(),
            whole_home = plan.whole_home,
            "starting template pool generation"
        );

        let mut registered = Vec::new();
        let mut failures = Vec::new();
        for (position, job) in jobs.iter().enumerate() {
            tracing::info!(
                category = job.category_label(),
                seed = job.seed.as_str(),
                scene = position + 1,
                of = jobs.len(),
                "generating template scene"
            );
            let timeout = match job.room {
                Some(_) => plan.room_timeout,
                None => plan.whole_home_timeout,
            };
            let result = self.orchestrator.run(&self.request_for(job, timeout)?);
            if !result.succeeded {
                tracing::error!(
                    category = job.category_label(),
                    seed = job.seed.as_str(),
                    "template scene generation failed"
                );
                failures.push(failure(job, describe_failure(&result)));
                continue;
            }

            let note = format!(
                "pre-generated {} template #{}",
                job.category_label(),
                job.ordinal
            );
            match registry.register(
                result.artifact_path.as_path(),
                job.room.map(RoomType::as_str),
                Some(job.seed.as_str()),
                Some(note.as_str()),
            ) {
                Ok(id) => registered.push(id),
                Err(error) => {
                    tracing::error!(error = %error, "template registration failed");
                    failures.push(failure(job, error.to_string()));
                }
            }
        }

        let statistics = registry.statistics();
        tracing::info!(
            registered = registered.len(),
            failed = failures.len(),
            total_templates = statistics.total_templates,
            total_size_mb = statistics.total_size_mb,
            "template pool generation finished"
        );
        Ok(PoolReport {
            registered,
            failures,
            statistics,
        })
    }

    fn request_for(
        &self,
        job: &PoolJob,
        timeout: Option<Duration>,
    ) -> Result<GenerationRequest, GenerationRequestError> {
        let mut overrides = self.settings.override_params.clone();
        let configs = match job.room {
            Some(room) => {
                overrides.push(room.restrict_override());
                self.settings.overlay_configs.clone()
            }
            None => self
                .settings
                .overlay_configs
                .iter()
                .filter(|config| config.as_str() != SINGLE_ROOM_CONFIG)
                .cloned()
                .collect(),
        };
        Ok(
            GenerationRequest::new(job.output_dir.clone(), self.settings.task_stages.clone())?
                .with_seed(job.seed.as_str())?
                .with_overlay_configs(configs)
                .with_override_params(overrides)
                .with_timeout(timeout)
                .with_auto_rename(false),
        )
    }
}

fn plan_jobs(registry: &TemplateRegistry, plan: &PoolPlan) -> Vec<PoolJob> {
    let generating = registry.root().join(GENERATING_DIR);
    let mut jobs = Vec::new();
    for room in &plan.rooms {
        let existing = registry.by_category(Some(room.as_str())).len() as u32;
        let seed_base = room_seed_base(*room);
        for i in 0..plan.per_room {
            let ordinal = existing + i + 1;
            jobs.push(PoolJob {
                room: Some(*room),
                ordinal,
                seed: format_seed(seed_base + existing + i),
                output_dir: slot_dir(
                    generating.as_path(),
                    format!("{}_{ordinal:02}", room.as_str().to_lowercase()).as_str(),
                ),
            });
        }
    }
    let existing = registry.by_category(None).len() as u32;
    for i in 0..plan.whole_home {
        let ordinal = existing + i + 1;
        jobs.push(PoolJob {
            room: None,
            ordinal,
            seed: format_seed(WHOLE_HOME_SEED_BASE + existing + i),
            output_dir: slot_dir(
                generating.as_path(),
                format!("whole_home_{ordinal:02}").as_str(),
            ),
        });
    }
    jobs
}

/// Whole-home seeds take `1000..2000`; each room type gets its own range above that.
fn room_seed_base(room: RoomType) -> u32 {
    let index = RoomType::ALL
        .iter()
        .position(|candidate| *candidate == room)
        .unwrap_or_default() as u32;
    WHOLE_HOME_SEED_BASE + SEED_RANGE * (index + 1)
}

/// A slot still holding a scene (e.g. one whose template record was removed) is left alone.
fn slot_dir(generating: &Path, name: &str) -> PathBuf {
    let dir = generating.join(name);
    if has_existing_artifact(dir.as_path()) {
        return collision_free_dir(dir.as_path(), unix_stamp_now().as_str());
    }
    dir
}

fn failure(job: &PoolJob, message: String) -> PoolFailure {
    PoolFailure {
        category: job.category_label().to_string(),
        seed: job.seed.clone(),
        output_dir: job.output_dir.clone(),
        message,
    }
}

fn describe_failure(result: &GenerationResult) -> String {
    match result.error_kind.as_ref() {
        Some(kind) => serde_json::to_string(kind).unwrap_or_else(|_| format!("{kind:?}")),
        None => String::from("generation did not succeed"),
    }
}
