use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::palette::registry::PaletteTables;
use crate::pipeline::coloring::DEFAULT_COLOR_HOST_PROGRAM;
use crate::pipeline::generation::{
    ArtifactPollConfig, GeneratorToolConfig, DEFAULT_GENERATOR_ARGS, DEFAULT_GENERATOR_PROGRAM,
    DEFAULT_MIN_ARTIFACT_BYTES, DEFAULT_OVERLAY_CONFIGS, DEFAULT_OVERRIDE_PARAMS,
    DEFAULT_POLL_BUDGET, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_STAGES,
};

pub const APP_SETTINGS_TOML: &str = "config/roomhue.settings.toml";
pub const APP_SETTINGS_JSON: &str = "config/roomhue.settings.json";
pub const DEFAULT_TEMPLATES_ROOT: &str = "templates";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentSettingsOverlay {
    pub tool_program: Option<String>,
    pub tool_args: Option<Vec<String>>,
    pub tool_root: Option<String>,
    pub tool_stream_output: Option<bool>,
    pub task_stages: Option<Vec<String>>,
    pub overlay_configs: Option<Vec<String>>,
    /// May be an explicitly empty list, which disables the default overrides.
    pub override_params: Option<Vec<String>>,
    pub timeout_seconds: Option<u64>,
    pub auto_rename: Option<bool>,
    pub poll_interval_ms: Option<u64>,
    pub poll_budget_ms: Option<u64>,
    pub min_artifact_bytes: Option<u64>,
    pub palette_path: Option<String>,
    pub templates_root: Option<String>,
    pub color_host_program: Option<String>,
    pub chat_program: Option<String>,
    pub chat_args: Option<Vec<String>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentSettingsError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("settings root must be an object")]
    RootMustBeObject,
    #[error("settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
    #[error("settings field '{field}' is invalid: {message}")]
    InvalidValue { field: String, message: String },
    #[error("palette validation failed: {0}")]
    Palette(String),
}

/// Fully resolved settings: every layer merged over the built-in defaults, relative paths
/// anchored at the app root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSettings {
    pub tool_program: String,
    pub tool_args: Vec<String>,
    pub tool_root: PathBuf,
    pub tool_stream_output: bool,
    pub task_stages: Vec<String>,
    pub overlay_configs: Vec<String>,
    pub override_params: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub auto_rename: bool,
    pub poll_interval_ms: u64,
    pub poll_budget_ms: u64,
    pub min_artifact_bytes: u64,
    pub palette_path: Option<PathBuf>,
    pub templates_root: PathBuf,
    pub color_host_program: String,
    pub chat_program: Option<String>,
    pub chat_args: Vec<String>,
}

impl AgentSettings {
    pub fn resolve(
        app_root: &Path,
        overlay: &AgentSettingsOverlay,
    ) -> Result<Self, AgentSettingsError> {
        let settings = Self {
            tool_program: overlay
                .tool_program
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_GENERATOR_PROGRAM)),
            tool_args: overlay
                .tool_args
                .clone()
                .unwrap_or_else(|| to_strings(DEFAULT_GENERATOR_ARGS)),
            tool_root: resolve_path(app_root, overlay.tool_root.as_deref().unwrap_or(".")),
            tool_stream_output: overlay.tool_stream_output.unwrap_or(true),
            task_stages: overlay
                .task_stages
                .clone()
                .unwrap_or_else(|| to_strings(DEFAULT_TASK_STAGES)),
            overlay_configs: overlay
                .overlay_configs
                .clone()
                .unwrap_or_else(|| to_strings(DEFAULT_OVERLAY_CONFIGS)),
            override_params: overlay
                .override_params
                .clone()
                .unwrap_or_else(|| to_strings(DEFAULT_OVERRIDE_PARAMS)),
            timeout_seconds: overlay.timeout_seconds,
            auto_rename: overlay.auto_rename.unwrap_or(true),
            poll_interval_ms: overlay
                .poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL.as_millis() as u64),
            poll_budget_ms: overlay
                .poll_budget_ms
                .unwrap_or(DEFAULT_POLL_BUDGET.as_millis() as u64),
            min_artifact_bytes: overlay
                .min_artifact_bytes
                .unwrap_or(DEFAULT_MIN_ARTIFACT_BYTES),
            palette_path: overlay
                .palette_path
                .as_deref()
                .map(|path| resolve_path(app_root, path)),
            templates_root: resolve_path(
                app_root,
                overlay
                    .templates_root
                    .as_deref()
                    .unwrap_or(DEFAULT_TEMPLATES_ROOT),
            ),
            color_host_program: overlay
                .color_host_program
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_COLOR_HOST_PROGRAM)),
            chat_program: overlay.chat_program.clone(),
            chat_args: overlay.chat_args.clone().unwrap_or_default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AgentSettingsError> {
        if self.task_stages.is_empty() {
            return Err(invalid("generation.task_stages", "at least one stage is required"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("polling.interval_ms", "must be greater than zero"));
        }
        if self.timeout_seconds == Some(0) {
            return Err(invalid("generation.timeout_seconds", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn tool_config(&self) -> GeneratorToolConfig {
        GeneratorToolConfig {
            program: self.tool_program.clone(),
            program_args: self.tool_args.clone(),
            tool_root: self.tool_root.clone(),
            stream_output: self.tool_stream_output,
        }
    }

    pub fn poll_config(&self) -> ArtifactPollConfig {
        ArtifactPollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            budget: Duration::from_millis(self.poll_budget_ms),
            min_artifact_bytes: self.min_artifact_bytes,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

/// Explicit path (relative to `app_root`, extension selects TOML or JSON), otherwise
/// `config/roomhue.settings.toml` with a JSON fallback. Missing files are an empty layer.
pub fn load_app_agent_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<AgentSettingsOverlay, AgentSettingsError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|p| resolve_path(app_root, p))
    {
        return load_optional_overlay_by_extension(path.as_path());
    }

    let toml_path = app_root.join(APP_SETTINGS_TOML);
    if toml_path.exists() {
        return load_optional_overlay_from_toml_path(toml_path.as_path());
    }
    load_optional_overlay_from_json_path(app_root.join(APP_SETTINGS_JSON).as_path())
}

pub fn merge_agent_settings_overlays(
    file: &AgentSettingsOverlay,
    overrides: &AgentSettingsOverlay,
) -> AgentSettingsOverlay {
    AgentSettingsOverlay {
        tool_program: choose_string(overrides.tool_program.as_deref(), file.tool_program.as_deref()),
        tool_args: choose_list(&overrides.tool_args, &file.tool_args),
        tool_root: choose_string(overrides.tool_root.as_deref(), file.tool_root.as_deref()),
        tool_stream_output: overrides.tool_stream_output.or(file.tool_stream_output),
        task_stages: choose_list(&overrides.task_stages, &file.task_stages),
        overlay_configs: choose_list(&overrides.overlay_configs, &file.overlay_configs),
        override_params: choose_list(&overrides.override_params, &file.override_params),
        timeout_seconds: overrides.timeout_seconds.or(file.timeout_seconds),
        auto_rename: overrides.auto_rename.or(file.auto_rename),
        poll_interval_ms: overrides.poll_interval_ms.or(file.poll_interval_ms),
        poll_budget_ms: overrides.poll_budget_ms.or(file.poll_budget_ms),
        min_artifact_bytes: overrides.min_artifact_bytes.or(file.min_artifact_bytes),
        palette_path: choose_string(overrides.palette_path.as_deref(), file.palette_path.as_deref()),
        templates_root: choose_string(
            overrides.templates_root.as_deref(),
            file.templates_root.as_deref(),
        ),
        color_host_program: choose_string(
            overrides.color_host_program.as_deref(),
            file.color_host_program.as_deref(),
        ),
        chat_program: choose_string(overrides.chat_program.as_deref(), file.chat_program.as_deref()),
        chat_args: choose_list(&overrides.chat_args, &file.chat_args),
    }
}

/// Loads and merges every layer, resolves defaults, and checks that the palette file named by
/// the result loads.
pub fn load_agent_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
    overrides: &AgentSettingsOverlay,
) -> Result<AgentSettings, AgentSettingsError> {
    let file = load_app_agent_settings(app_root, explicit_path)?;
    let merged = merge_agent_settings_overlays(&file, overrides);
    let settings = AgentSettings::resolve(app_root, &merged)?;
    if let Some(palette) = settings.palette_path.as_deref() {
        PaletteTables::load(Some(palette))
            .map_err(|error| AgentSettingsError::Palette(error.to_string()))?;
    }
    Ok(settings)
}

pub fn parse_agent_settings_overlay_json(
    value: &Value,
) -> Result<AgentSettingsOverlay, AgentSettingsError> {
    let root = value
        .as_object()
        .ok_or(AgentSettingsError::RootMustBeObject)?;
    let agent_value = root.get("agent").unwrap_or(value);
    let agent = agent_value
        .as_object()
        .ok_or(AgentSettingsError::RootMustBeObject)?;

    let mut out = AgentSettingsOverlay::default();
    if let Some(tool) = section(agent, "tool")? {
        if let Some(v) = tool.get("program") {
            out.tool_program = Some(parse_string(v, "tool.program")?);
        }
        if let Some(v) = tool.get("args") {
            out.tool_args = Some(parse_string_array(v, "tool.args")?);
        }
        if let Some(v) = tool.get("root") {
            out.tool_root = Some(parse_string(v, "tool.root")?);
        }
        if let Some(v) = tool.get("stream_output") {
            out.tool_stream_output = Some(parse_bool(v, "tool.stream_output")?);
        }
    }
    if let Some(generation) = section(agent, "generation")? {
        if let Some(v) = generation.get("task_stages") {
            out.task_stages = Some(parse_string_array(v, "generation.task_stages")?);
        }
        if let Some(v) = generation.get("overlay_configs") {
            out.overlay_configs = Some(parse_string_array(v, "generation.overlay_configs")?);
        }
        if let Some(v) = generation.get("override_params") {
            out.override_params = Some(parse_string_array(v, "generation.override_params")?);
        }
        if let Some(v) = generation.get("timeout_seconds") {
            out.timeout_seconds = Some(parse_u64(v, "generation.timeout_seconds")?);
        }
        if let Some(v) = generation.get("auto_rename") {
            out.auto_rename = Some(parse_bool(v, "generation.auto_rename")?);
        }
    }
    if let Some(polling) = section(agent, "polling")? {
        if let Some(v) = polling.get("interval_ms") {
            out.poll_interval_ms = Some(parse_u64(v, "polling.interval_ms")?);
        }
        if let Some(v) = polling.get("budget_ms") {
            out.poll_budget_ms = Some(parse_u64(v, "polling.budget_ms")?);
        }
        if let Some(v) = polling.get("min_artifact_bytes") {
            out.min_artifact_bytes = Some(parse_u64(v, "polling.min_artifact_bytes")?);
        }
    }
    if let Some(v) = agent.get("palette_path") {
        out.palette_path = Some(parse_string(v, "palette_path")?);
    }
    if let Some(templates) = section(agent, "templates")? {
        if let Some(v) = templates.get("root") {
            out.templates_root = Some(parse_string(v, "templates.root")?);
        }
    }
    if let Some(coloring) = section(agent, "coloring")? {
        if let Some(v) = coloring.get("host_program") {
            out.color_host_program = Some(parse_string(v, "coloring.host_program")?);
        }
    }
    if let Some(chat) = section(agent, "chat")? {
        if let Some(v) = chat.get("program") {
            out.chat_program = Some(parse_string(v, "chat.program")?);
        }
        if let Some(v) = chat.get("args") {
            out.chat_args = Some(parse_string_array(v, "chat.args")?);
        }
    }
    Ok(out)
}

fn section<'a>(
    parent: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, AgentSettingsError> {
    match parent.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_object()
            .map(Some)
            .ok_or_else(|| AgentSettingsError::InvalidFieldType {
                field: key.to_string(),
            }),
    }
}

fn load_optional_overlay_by_extension(
    path: &Path,
) -> Result<AgentSettingsOverlay, AgentSettingsError> {
    match path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.to_ascii_lowercase())
    {
        Some(ext) if ext == "toml" => load_optional_overlay_from_toml_path(path),
        _ => load_optional_overlay_from_json_path(path),
    }
}

fn load_optional_overlay_from_json_path(
    path: &Path,
) -> Result<AgentSettingsOverlay, AgentSettingsError> {
    if !path.exists() {
        return Ok(AgentSettingsOverlay::default());
    }
    let raw = read_settings_file(path)?;
    let parsed = serde_json::from_str::<Value>(raw.as_str()).map_err(|error| {
        AgentSettingsError::ParseJson {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    parse_agent_settings_overlay_json(&parsed)
}

fn load_optional_overlay_from_toml_path(
    path: &Path,
) -> Result<AgentSettingsOverlay, AgentSettingsError> {
    if !path.exists() {
        return Ok(AgentSettingsOverlay::default());
    }
    let raw = read_settings_file(path)?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        AgentSettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value =
        serde_json::to_value(parsed).map_err(|error| AgentSettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
    parse_agent_settings_overlay_json(&json_value)
}

fn read_settings_file(path: &Path) -> Result<String, AgentSettingsError> {
    fs::read_to_string(path).map_err(|error| AgentSettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub(crate) fn resolve_path(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn invalid(field: &str, message: &str) -> AgentSettingsError {
    AgentSettingsError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn choose_string(a: Option<&str>, b: Option<&str>) -> Option<String> {
    a.or(b).map(str::to_string)
}

fn choose_list(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> Option<Vec<String>> {
    a.clone().or_else(|| b.clone())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn parse_string(value: &Value, field: &str) -> Result<String, AgentSettingsError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| AgentSettingsError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if parsed.is_empty() {
        return Err(AgentSettingsError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed.to_string())
}

fn parse_bool(value: &Value, field: &str) -> Result<bool, AgentSettingsError> {
    value
        .as_bool()
        .ok_or_else(|| AgentSettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_u64(value: &Value, field: &str) -> Result<u64, AgentSettingsError> {
    value
        .as_u64()
        .ok_or_else(|| AgentSettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_string_array(value: &Value, field: &str) -> Result<Vec<String>, AgentSettingsError> {
    let arr = value
        .as_array()
        .ok_or_else(|| AgentSettingsError::InvalidFieldType {
            field: field.to_string(),
        })?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(parse_string(item, field)?);
    }
    Ok(out)
}
