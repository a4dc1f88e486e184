use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::palette::matcher::ObjectMatcher;
use crate::palette::parser::{ParseOutcome, SpecParser};
use crate::palette::registry::PaletteTables;
use crate::palette::room::{detect_room_type, RoomType};
use crate::pipeline::artifact::{collision_free_dir, has_existing_artifact, PRIMARY_ARTIFACT_NAME};
use crate::pipeline::chat::{ChatCompletion, ChatError, DEFAULT_COLOR_SCHEME_SYSTEM_PROMPT};
use crate::pipeline::coloring::{apply_colors, SceneColorHost};
use crate::pipeline::generation::{
    GenerationOrchestrator, GenerationRequest, GenerationRequestError, GenerationResult,
};
use crate::pipeline::runlog::unix_stamp_now;
use crate::pipeline::runtime::PipelineCommandRunner;
use crate::pipeline::settings_layer::AgentSettings;
use crate::storage::templates::{
    TemplateRecord, TemplateRegistry, TemplateRegistryError, UNKNOWN_SEED, WHOLE_HOME_CATEGORY,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineInput {
    /// Free-form room description sent to the chat collaborator.
    pub request: String,
    pub output_dir: PathBuf,
    pub seed: Option<String>,
    pub task_stages: Option<Vec<String>>,
    /// Replaces the configured overrides and suppresses the room restriction when set.
    pub override_params: Option<Vec<String>>,
    pub register_template: bool,
    pub category: Option<String>,
    pub template_note: Option<String>,
    /// Color a copy of the best pooled template for the room instead of generating, when
    /// one exists.
    pub reuse_template: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub request: String,
    pub reply: String,
    pub parse: ParseOutcome,
    pub room_type: Option<RoomType>,
    pub generation: GenerationResult,
    pub colored: bool,
    pub template_id: Option<String>,
    /// Id of the pooled template the scene was copied from.
    pub template_reused: Option<String>,
}

/// Where the color scheme for an existing scene comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeSource {
    /// Room description, turned into a reply by the chat collaborator.
    Request(String),
    /// A reply that is already at hand.
    Reply(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneColoringReport {
    pub scene: PathBuf,
    pub reply: String,
    pub parse: ParseOutcome,
    pub result: GenerationResult,
    pub colored: bool,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Request(#[from] GenerationRequestError),
    #[error(transparent)]
    Templates(#[from] TemplateRegistryError),
    #[error("scene does not exist: '{path}'")]
    SceneMissing { path: String },
    #[error("failed to stage template into '{path}': {message}")]
    StageTemplate { path: String, message: String },
    #[error("reply contained no color assignment")]
    NothingParsed,
}

/// Request text to colored scene: chat, parse, generate (or reuse a pooled template), then
/// color as a separate step.
pub struct ColorSchemePipeline<R> {
    settings: AgentSettings,
    parser: SpecParser,
    matcher: ObjectMatcher,
    chat: Box<dyn ChatCompletion>,
    host: Box<dyn SceneColorHost>,
    orchestrator: GenerationOrchestrator<R>,
}

impl<R> ColorSchemePipeline<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(
        settings: AgentSettings,
        tables: PaletteTables,
        runner: R,
        chat: Box<dyn ChatCompletion>,
        host: Box<dyn SceneColorHost>,
    ) -> Self {
        let orchestrator =
            GenerationOrchestrator::new(runner, settings.tool_config(), settings.poll_config());
        Self {
            matcher: ObjectMatcher::new(tables.targets.clone()),
            parser: SpecParser::new(tables),
            settings,
            chat,
            host,
            orchestrator,
        }
    }

    pub fn parser(&self) -> &SpecParser {
        &self.parser
    }

    pub fn run(&self, input: PipelineInput) -> Result<PipelineReport, PipelineError> {
        let reply = self
            .chat
            .complete(DEFAULT_COLOR_SCHEME_SYSTEM_PROMPT, input.request.as_str())?;
        let parse = self.parser.parse(reply.as_str());
        if parse.is_empty() {
            tracing::warn!("reply contained no color assignment, scene will stay uncolored");
        }

        let room_type = detect_room_type(input.request.as_str());
        let staged = if input.reuse_template {
            self.stage_template(&input, room_type)?
        } else {
            None
        };
        let (generated, template_reused) = match staged {
            Some((template_id, result)) => (result, Some(template_id)),
            None => (self.generate(&input, room_type)?, None),
        };

        let generation = if parse.is_empty() {
            generated
        } else {
            apply_colors(
                &generated,
                parse.assignments.as_slice(),
                self.host.as_ref(),
                &self.matcher,
            )
        };
        let colored = generation.source_artifact_path.is_some();

        let template_id =
            if input.register_template && generation.succeeded && template_reused.is_none() {
                let category = input
                    .category
                    .clone()
                    .or_else(|| room_type.map(|room| room.as_str().to_string()));
                let scene = generation
                    .source_artifact_path
                    .as_deref()
                    .unwrap_or(generation.artifact_path.as_path());
                let mut registry = TemplateRegistry::open(self.settings.templates_root.clone())?;
                Some(registry.register(
                    scene,
                    category.as_deref(),
                    Some(generation.seed.as_str()),
                    input.template_note.as_deref(),
                )?)
            } else {
                None
            };

        Ok(PipelineReport {
            request: input.request,
            reply,
            parse,
            room_type,
            generation,
            colored,
            template_id,
            template_reused,
        })
    }

    /// Colors a scene that already exists. The colored copy lands beside it as
    /// `<stem>_colored.<ext>`; the scene itself is left untouched.
    pub fn color_existing_scene(
        &self,
        scene: &Path,
        source: SchemeSource,
    ) -> Result<SceneColoringReport, PipelineError> {
        if !scene.is_file() {
            return Err(PipelineError::SceneMissing {
                path: scene.display().to_string(),
            });
        }
        let reply = match source {
            SchemeSource::Request(request) => self
                .chat
                .complete(DEFAULT_COLOR_SCHEME_SYSTEM_PROMPT, request.as_str())?,
            SchemeSource::Reply(reply) => reply,
        };
        let parse = self.parser.parse(reply.as_str());
        if parse.is_empty() {
            return Err(PipelineError::NothingParsed);
        }

        let result = apply_colors(
            &GenerationResult::existing_scene(scene, UNKNOWN_SEED),
            parse.assignments.as_slice(),
            self.host.as_ref(),
            &self.matcher,
        );
        let colored = result.source_artifact_path.is_some();
        Ok(SceneColoringReport {
            scene: scene.to_path_buf(),
            reply,
            parse,
            result,
            colored,
        })
    }

    fn generate(
        &self,
        input: &PipelineInput,
        room_type: Option<RoomType>,
    ) -> Result<GenerationResult, PipelineError> {
        let override_params = match input.override_params.clone() {
            Some(params) => params,
            None => {
                let mut params = self.settings.override_params.clone();
                if let Some(room) = room_type {
                    tracing::info!(room = room.as_str(), "restricting generation to detected room");
                    params.push(room.restrict_override());
                }
                params
            }
        };

        let mut request = GenerationRequest::new(
            input.output_dir.clone(),
            input
                .task_stages
                .clone()
                .unwrap_or_else(|| self.settings.task_stages.clone()),
        )?
        .with_overlay_configs(self.settings.overlay_configs.clone())
        .with_override_params(override_params)
        .with_timeout(self.settings.timeout())
        .with_auto_rename(self.settings.auto_rename);
        if let Some(seed) = input.seed.as_deref() {
            request = request.with_seed(seed)?;
        }
        Ok(self.orchestrator.run(&request))
    }

    /// Copies the best pooled template for the room into the output directory. `None` sends
    /// the caller on to regular generation.
    fn stage_template(
        &self,
        input: &PipelineInput,
        room_type: Option<RoomType>,
    ) -> Result<Option<(String, GenerationResult)>, PipelineError> {
        let category = input
            .category
            .clone()
            .or_else(|| room_type.map(|room| room.as_str().to_string()));
        let registry = TemplateRegistry::open(self.settings.templates_root.clone())?;
        let Some(record) = registry.find_best(category.as_deref(), true) else {
            tracing::info!(
                category = category.as_deref().unwrap_or(WHOLE_HOME_CATEGORY),
                "no pooled template, generating a new scene"
            );
            return Ok(None);
        };
        if !record.artifact_path.is_file() {
            tracing::warn!(
                id = record.id.as_str(),
                artifact = %record.artifact_path.display(),
                "pooled template artifact is gone, generating a new scene"
            );
            return Ok(None);
        }

        let staged = self.copy_template(record, input.output_dir.as_path())?;
        tracing::info!(
            id = record.id.as_str(),
            scene = %staged.display(),
            "reusing pooled template"
        );
        Ok(Some((
            record.id.clone(),
            GenerationResult::existing_scene(staged, record.seed.clone()),
        )))
    }

    fn copy_template(
        &self,
        record: &TemplateRecord,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let target_dir = if self.settings.auto_rename && has_existing_artifact(output_dir) {
            collision_free_dir(output_dir, unix_stamp_now().as_str())
        } else {
            output_dir.to_path_buf()
        };
        let stage_error = |error: std::io::Error| PipelineError::StageTemplate {
            path: target_dir.display().to_string(),
            message: error.to_string(),
        };
        fs::create_dir_all(target_dir.as_path()).map_err(stage_error)?;
        let file_name = record
            .artifact_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| PRIMARY_ARTIFACT_NAME.into());
        let staged = target_dir.join(file_name);
        fs::copy(record.artifact_path.as_path(), staged.as_path()).map_err(stage_error)?;
        Ok(staged)
    }
}
