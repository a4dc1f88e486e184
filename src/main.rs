use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use roomhue_core::palette::format_assignments;
use roomhue_core::palette::matcher::ObjectMatcher;
use roomhue_core::palette::parser::SpecParser;
use roomhue_core::palette::registry::PaletteTables;
use roomhue_core::palette::room::RoomType;
use roomhue_core::pipeline::chat::CommandChatCompletion;
use roomhue_core::pipeline::coloring::{apply_colors, ScriptSceneColorHost};
use roomhue_core::pipeline::flow::{ColorSchemePipeline, PipelineInput, SchemeSource};
use roomhue_core::pipeline::generation::{GenerationOrchestrator, GenerationRequest};
use roomhue_core::pipeline::runtime::StdPipelineCommandRunner;
use roomhue_core::pipeline::settings_layer::{
    load_agent_settings, AgentSettings, AgentSettingsOverlay,
};
use roomhue_core::pipeline::template_pool::{PoolPlan, TemplatePoolBuilder};
use roomhue_core::storage::TemplateRegistry;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<()> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = cli_args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };
    let rest = &cli_args[1..];
    if rest
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }

    match command {
        "parse-reply" => run_parse_reply_cli(rest),
        "generate" => run_generate_cli(rest),
        "run" => run_pipeline_cli(rest),
        "color" => run_color_cli(rest),
        "templates-generate" => run_templates_generate_cli(rest),
        "templates-list" => run_templates_list_cli(rest),
        "templates-remove" => run_templates_remove_cli(rest),
        "validate-settings" => run_validate_settings_cli(rest),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        unknown => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    // stdout carries the JSON results.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CommonCliArgs {
    app_root: Option<PathBuf>,
    settings_path: Option<String>,
}

impl CommonCliArgs {
    fn app_root(&self) -> CliResult<PathBuf> {
        match self.app_root.as_ref() {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn load_settings(&self, overrides: &AgentSettingsOverlay) -> CliResult<AgentSettings> {
        let app_root = self.app_root()?;
        Ok(load_agent_settings(
            app_root.as_path(),
            self.settings_path.as_deref(),
            overrides,
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ParseReplyCliArgs {
    common: CommonCliArgs,
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct GenerateCliArgs {
    common: CommonCliArgs,
    output: PathBuf,
    seed: Option<String>,
    overrides: AgentSettingsOverlay,
    reply_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct RunCliArgs {
    common: CommonCliArgs,
    request: String,
    output: PathBuf,
    seed: Option<String>,
    task_stages: Option<Vec<String>>,
    override_params: Option<Vec<String>>,
    register_template: bool,
    category: Option<String>,
    note: Option<String>,
    reuse_template: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemeInput {
    Request(String),
    ReplyFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColorCliArgs {
    common: CommonCliArgs,
    scene: PathBuf,
    scheme: SchemeInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct TemplatesGenerateCliArgs {
    common: CommonCliArgs,
    plan: PoolPlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct TemplatesRemoveCliArgs {
    common: CommonCliArgs,
    id: String,
}

fn missing_value(flag: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("Missing value for {flag}")).into()
}

fn unknown_argument(flag: &str) -> Box<dyn std::error::Error> {
    std::io::Error::other(format!("Unknown argument: {flag}\n\nUse --help for usage.")).into()
}

/// Consumes `--app-root` / `--settings`; returns how many arguments were used (0 if `flag`
/// is not a common flag).
fn parse_common_flag(args: &[String], i: usize, common: &mut CommonCliArgs) -> CliResult<usize> {
    let flag = args[i].as_str();
    let value = || args.get(i + 1).cloned().ok_or_else(|| missing_value(flag));
    match flag {
        "--app-root" => {
            common.app_root = Some(PathBuf::from(value()?));
            Ok(2)
        }
        "--settings" => {
            common.settings_path = Some(value()?);
            Ok(2)
        }
        _ => Ok(0),
    }
}

fn parse_common_only(args: &[String]) -> CliResult<CommonCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        match parse_common_flag(args, i, &mut common)? {
            0 => return Err(unknown_argument(args[i].as_str())),
            used => i += used,
        }
    }
    Ok(common)
}

fn parse_parse_reply_cli_args(args: &[String]) -> CliResult<ParseReplyCliArgs> {
    let mut parsed = ParseReplyCliArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut parsed.common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            args.get(idx + 1).cloned().ok_or_else(|| missing_value(flag))
        };
        match flag {
            "--file" => {
                parsed.file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    Ok(parsed)
}

fn parse_generate_cli_args(args: &[String]) -> CliResult<GenerateCliArgs> {
    let mut parsed = GenerateCliArgs::default();
    let mut output = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut parsed.common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            args.get(idx + 1).cloned().ok_or_else(|| missing_value(flag))
        };
        match flag {
            "--output" => {
                output = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--seed" => {
                parsed.seed = Some(needs_value(i)?);
                i += 2;
            }
            "--task" => {
                parsed
                    .overrides
                    .task_stages
                    .get_or_insert_with(Vec::new)
                    .push(needs_value(i)?);
                i += 2;
            }
            "--config" => {
                parsed
                    .overrides
                    .overlay_configs
                    .get_or_insert_with(Vec::new)
                    .push(needs_value(i)?);
                i += 2;
            }
            "--override" => {
                parsed
                    .overrides
                    .override_params
                    .get_or_insert_with(Vec::new)
                    .push(needs_value(i)?);
                i += 2;
            }
            "--timeout" => {
                let raw = needs_value(i)?;
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    std::io::Error::other(format!("Invalid --timeout value: {raw}"))
                })?;
                parsed.overrides.timeout_seconds = Some(secs);
                i += 2;
            }
            "--no-auto-rename" => {
                parsed.overrides.auto_rename = Some(false);
                i += 1;
            }
            "--reply-file" => {
                parsed.reply_file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    parsed.output =
        output.ok_or_else(|| std::io::Error::other("Missing required --output"))?;
    Ok(parsed)
}

fn parse_run_cli_args(args: &[String]) -> CliResult<RunCliArgs> {
    let mut parsed = RunCliArgs::default();
    let mut request = None::<String>;
    let mut output = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut parsed.common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            args.get(idx + 1).cloned().ok_or_else(|| missing_value(flag))
        };
        match flag {
            "--request" => {
                request = Some(needs_value(i)?);
                i += 2;
            }
            "--output" => {
                output = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--seed" => {
                parsed.seed = Some(needs_value(i)?);
                i += 2;
            }
            "--task" => {
                parsed
                    .task_stages
                    .get_or_insert_with(Vec::new)
                    .push(needs_value(i)?);
                i += 2;
            }
            "--override" => {
                parsed
                    .override_params
                    .get_or_insert_with(Vec::new)
                    .push(needs_value(i)?);
                i += 2;
            }
            "--register-template" => {
                parsed.register_template = true;
                i += 1;
            }
            "--category" => {
                parsed.category = Some(needs_value(i)?);
                i += 2;
            }
            "--note" => {
                parsed.note = Some(needs_value(i)?);
                i += 2;
            }
            "--reuse-template" => {
                parsed.reuse_template = true;
                i += 1;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    parsed.request = request
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --request"))?;
    parsed.output =
        output.ok_or_else(|| std::io::Error::other("Missing required --output"))?;
    Ok(parsed)
}

fn parse_color_cli_args(args: &[String]) -> CliResult<ColorCliArgs> {
    let mut common = CommonCliArgs::default();
    let mut scene = None::<PathBuf>;
    let mut request = None::<String>;
    let mut reply_file = None::<PathBuf>;
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            args.get(idx + 1).cloned().ok_or_else(|| missing_value(flag))
        };
        match flag {
            "--scene" => {
                scene = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--request" => {
                request = Some(needs_value(i)?);
                i += 2;
            }
            "--reply-file" => {
                reply_file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    let scene = scene.ok_or_else(|| std::io::Error::other("Missing required --scene"))?;
    let request = request
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let scheme = match (request, reply_file) {
        (Some(request), None) => SchemeInput::Request(request),
        (None, Some(path)) => SchemeInput::ReplyFile(path),
        (Some(_), Some(_)) => {
            return Err(
                std::io::Error::other("Use either --request or --reply-file, not both").into(),
            )
        }
        (None, None) => {
            return Err(std::io::Error::other("Missing required --request or --reply-file").into())
        }
    };
    Ok(ColorCliArgs {
        common,
        scene,
        scheme,
    })
}

fn parse_templates_generate_cli_args(args: &[String]) -> CliResult<TemplatesGenerateCliArgs> {
    let mut parsed = TemplatesGenerateCliArgs::default();
    let mut rooms = Vec::<RoomType>::new();
    let mut per_room = None::<u32>;
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut parsed.common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            args.get(idx + 1).cloned().ok_or_else(|| missing_value(flag))
        };
        let count = |raw: String| -> CliResult<u32> {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| std::io::Error::other(format!("Invalid {flag} value: {raw}")).into())
        };
        match flag {
            "--room" => {
                let raw = needs_value(i)?;
                let room = RoomType::from_name(raw.as_str())
                    .ok_or_else(|| std::io::Error::other(format!("Unknown room type: {raw}")))?;
                if !rooms.contains(&room) {
                    rooms.push(room);
                }
                i += 2;
            }
            "--per-room" => {
                per_room = Some(count(needs_value(i)?)?);
                i += 2;
            }
            "--whole-home" => {
                parsed.plan.whole_home = count(needs_value(i)?)?;
                i += 2;
            }
            "--timeout" => {
                let secs = count(needs_value(i)?)?;
                parsed.plan.room_timeout = Some(Duration::from_secs(u64::from(secs)));
                i += 2;
            }
            "--timeout-home" => {
                let secs = count(needs_value(i)?)?;
                parsed.plan.whole_home_timeout = Some(Duration::from_secs(u64::from(secs)));
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    // `--whole-home N` on its own generates only whole-home scenes.
    parsed.plan.per_room = match per_room {
        Some(count) => count,
        None if rooms.is_empty() && parsed.plan.whole_home > 0 => 0,
        None => parsed.plan.per_room,
    };
    if !rooms.is_empty() {
        parsed.plan.rooms = rooms;
    }
    if parsed.plan.per_room == 0 && parsed.plan.whole_home == 0 {
        return Err(
            std::io::Error::other("Nothing to generate: room and whole-home counts are 0").into(),
        );
    }
    Ok(parsed)
}

fn parse_templates_remove_cli_args(args: &[String]) -> CliResult<TemplatesRemoveCliArgs> {
    let mut parsed = TemplatesRemoveCliArgs::default();
    let mut id = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let used = parse_common_flag(args, i, &mut parsed.common)?;
        if used > 0 {
            i += used;
            continue;
        }
        let flag = args[i].as_str();
        match flag {
            "--id" => {
                id = Some(args.get(i + 1).cloned().ok_or_else(|| missing_value(flag))?);
                i += 2;
            }
            unknown => return Err(unknown_argument(unknown)),
        }
    }
    parsed.id = id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --id"))?;
    Ok(parsed)
}

fn run_parse_reply_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_parse_reply_cli_args(args)?;
    let settings = parsed.common.load_settings(&AgentSettingsOverlay::default())?;
    let tables = PaletteTables::load(settings.palette_path.as_deref())?;

    let reply = match parsed.file.as_deref() {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let outcome = SpecParser::new(tables).parse(reply.as_str());
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": !outcome.is_empty(),
            "outcome": outcome,
            "formatted": format_assignments(outcome.assignments.as_slice()),
        }))?
    );
    Ok(())
}

fn run_generate_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_generate_cli_args(args)?;
    let settings = parsed.common.load_settings(&parsed.overrides)?;
    let tables = PaletteTables::load(settings.palette_path.as_deref())?;

    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        settings.tool_config(),
        settings.poll_config(),
    );
    let mut request = GenerationRequest::new(parsed.output.clone(), settings.task_stages.clone())?
        .with_overlay_configs(settings.overlay_configs.clone())
        .with_override_params(settings.override_params.clone())
        .with_timeout(settings.timeout())
        .with_auto_rename(settings.auto_rename);
    if let Some(seed) = parsed.seed.as_deref() {
        request = request.with_seed(seed)?;
    }

    let mut result = orchestrator.run(&request);
    if let Some(reply_file) = parsed.reply_file.as_deref() {
        let reply = fs::read_to_string(reply_file)?;
        let outcome = SpecParser::new(tables.clone()).parse(reply.as_str());
        let host = ScriptSceneColorHost::new(
            StdPipelineCommandRunner,
            settings.color_host_program.clone(),
            settings.tool_root.clone(),
        )
        .with_timeout(settings.timeout());
        result = apply_colors(
            &result,
            outcome.assignments.as_slice(),
            &host,
            &ObjectMatcher::new(tables.targets.clone()),
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": result.succeeded,
            "result": result,
        }))?
    );
    if !result.succeeded {
        return Err(std::io::Error::other("scene generation did not produce an artifact").into());
    }
    Ok(())
}

fn run_pipeline_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_run_cli_args(args)?;
    let app_root = parsed.common.app_root()?;
    let settings = parsed.common.load_settings(&AgentSettingsOverlay::default())?;
    let tables = PaletteTables::load(settings.palette_path.as_deref())?;

    let chat_program = settings.chat_program.clone().ok_or_else(|| {
        std::io::Error::other("chat.program is not configured; set [agent.chat] program in settings")
    })?;
    let chat = CommandChatCompletion::new(
        StdPipelineCommandRunner,
        chat_program,
        settings.chat_args.clone(),
    )
    .with_cwd(app_root.as_path());
    let host = ScriptSceneColorHost::new(
        StdPipelineCommandRunner,
        settings.color_host_program.clone(),
        settings.tool_root.clone(),
    )
    .with_timeout(settings.timeout());

    let pipeline = ColorSchemePipeline::new(
        settings,
        tables,
        StdPipelineCommandRunner,
        Box::new(chat),
        Box::new(host),
    );
    let report = pipeline.run(PipelineInput {
        request: parsed.request,
        output_dir: parsed.output,
        seed: parsed.seed,
        task_stages: parsed.task_stages,
        override_params: parsed.override_params,
        register_template: parsed.register_template,
        category: parsed.category,
        template_note: parsed.note,
        reuse_template: parsed.reuse_template,
    })?;

    let succeeded = report.generation.succeeded;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": succeeded,
            "report": report,
        }))?
    );
    if !succeeded {
        return Err(std::io::Error::other("scene generation did not produce an artifact").into());
    }
    Ok(())
}

fn run_color_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_color_cli_args(args)?;
    let app_root = parsed.common.app_root()?;
    let settings = parsed.common.load_settings(&AgentSettingsOverlay::default())?;
    let tables = PaletteTables::load(settings.palette_path.as_deref())?;

    let source = match parsed.scheme {
        SchemeInput::Request(request) => SchemeSource::Request(request),
        SchemeInput::ReplyFile(path) => SchemeSource::Reply(fs::read_to_string(path)?),
    };
    if matches!(source, SchemeSource::Request(_)) && settings.chat_program.is_none() {
        return Err(std::io::Error::other(
            "chat.program is not configured; set [agent.chat] program in settings or pass --reply-file",
        )
        .into());
    }
    // Only consulted for --request.
    let chat = CommandChatCompletion::new(
        StdPipelineCommandRunner,
        settings.chat_program.clone().unwrap_or_default(),
        settings.chat_args.clone(),
    )
    .with_cwd(app_root.as_path());
    let host = ScriptSceneColorHost::new(
        StdPipelineCommandRunner,
        settings.color_host_program.clone(),
        settings.tool_root.clone(),
    )
    .with_timeout(settings.timeout());

    let pipeline = ColorSchemePipeline::new(
        settings,
        tables,
        StdPipelineCommandRunner,
        Box::new(chat),
        Box::new(host),
    );
    let report = pipeline.color_existing_scene(parsed.scene.as_path(), source)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": report.colored,
            "report": report,
        }))?
    );
    if !report.colored {
        return Err(std::io::Error::other("scene coloring did not produce a colored copy").into());
    }
    Ok(())
}

fn run_templates_generate_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_templates_generate_cli_args(args)?;
    let settings = parsed.common.load_settings(&AgentSettingsOverlay::default())?;
    let report = TemplatePoolBuilder::new(settings, StdPipelineCommandRunner).build(&parsed.plan)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": report.failures.is_empty(),
            "report": report,
        }))?
    );
    Ok(())
}

fn open_template_registry(common: &CommonCliArgs) -> CliResult<TemplateRegistry> {
    let settings = common.load_settings(&AgentSettingsOverlay::default())?;
    Ok(TemplateRegistry::open(settings.templates_root)?)
}

fn run_templates_list_cli(args: &[String]) -> CliResult<()> {
    let common = parse_common_only(args)?;
    let registry = open_template_registry(&common)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "templates": registry.list_grouped(),
            "statistics": registry.statistics(),
        }))?
    );
    Ok(())
}

fn run_templates_remove_cli(args: &[String]) -> CliResult<()> {
    let parsed = parse_templates_remove_cli_args(args)?;
    let mut registry = open_template_registry(&parsed.common)?;
    let removed = registry.remove(parsed.id.as_str())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": removed,
            "id": parsed.id,
            "removed": removed,
        }))?
    );
    Ok(())
}

fn run_validate_settings_cli(args: &[String]) -> CliResult<()> {
    let common = parse_common_only(args)?;
    let settings = common.load_settings(&AgentSettingsOverlay::default())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "settings": settings,
            "settings_source": settings_source(common.app_root()?.as_path(), &common),
        }))?
    );
    Ok(())
}

fn settings_source(app_root: &Path, common: &CommonCliArgs) -> Option<String> {
    if let Some(explicit) = common.settings_path.as_deref() {
        return Some(explicit.to_string());
    }
    ["config/roomhue.settings.toml", "config/roomhue.settings.json"]
        .into_iter()
        .find(|candidate| app_root.join(candidate).exists())
        .map(str::to_string)
}

fn print_usage() {
    eprintln!(
        concat!(
            "Usage:\n",
            "  roomhue parse-reply [--file PATH]\n",
            "  roomhue generate --output DIR [--seed S] [--task T]... [--config G]... ",
            "[--override P]... [--timeout SECS] [--no-auto-rename] [--reply-file PATH]\n",
            "  roomhue run --request TEXT --output DIR [--seed S] [--task T]... [--override P]... ",
            "[--register-template] [--category C] [--note N] [--reuse-template]\n",
            "  roomhue color --scene PATH (--request TEXT | --reply-file PATH)\n",
            "  roomhue templates-list\n",
            "  roomhue templates-remove --id ID\n",
            "  roomhue templates-generate [--room R]... [--per-room N] [--whole-home N] ",
            "[--timeout SECS] [--timeout-home SECS]\n",
            "  roomhue validate-settings\n\n",
            "Common flags:\n",
            "  --app-root PATH   defaults to the current directory\n",
            "  --settings PATH   defaults to config/roomhue.settings.toml (fallback: config/roomhue.settings.json)\n\n",
            "parse-reply reads stdin when --file is absent. Output is JSON on stdout; logs go to stderr (RUST_LOG).\n"
        )
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn generate_requires_output() {
        let err = parse_generate_cli_args(&[]).expect_err("output should be required");
        assert!(err.to_string().contains("--output"));
    }

    #[test]
    fn generate_collects_repeatable_flags_into_overrides() {
        let parsed = parse_generate_cli_args(&strings(&[
            "--output",
            "out/scene",
            "--task",
            "coarse",
            "--task",
            "populate",
            "--override",
            "compose_indoors.terrain_enabled=False",
            "--timeout",
            "600",
            "--no-auto-rename",
            "--settings",
            "custom.toml",
        ]))
        .expect("parse should succeed");

        assert_eq!(parsed.output, PathBuf::from("out/scene"));
        assert_eq!(
            parsed.overrides.task_stages,
            Some(strings(&["coarse", "populate"]))
        );
        assert_eq!(parsed.overrides.overlay_configs, None);
        assert_eq!(parsed.overrides.timeout_seconds, Some(600));
        assert_eq!(parsed.overrides.auto_rename, Some(false));
        assert_eq!(parsed.common.settings_path.as_deref(), Some("custom.toml"));
    }

    #[test]
    fn generate_rejects_bad_timeout_and_unknown_flags() {
        let err = parse_generate_cli_args(&strings(&["--output", "o", "--timeout", "soon"]))
            .expect_err("timeout should be numeric");
        assert!(err.to_string().contains("--timeout"));

        let err = parse_generate_cli_args(&strings(&["--output", "o", "--bogus"]))
            .expect_err("unknown flag");
        assert!(err.to_string().contains("--bogus"));

        let err = parse_generate_cli_args(&strings(&["--output"])).expect_err("missing value");
        assert!(err.to_string().contains("Missing value for --output"));
    }

    #[test]
    fn run_requires_request_and_output() {
        let err = parse_run_cli_args(&strings(&["--output", "o"])).expect_err("request required");
        assert!(err.to_string().contains("--request"));

        let parsed = parse_run_cli_args(&strings(&[
            "--request",
            "Nordic bedroom",
            "--output",
            "o",
            "--register-template",
            "--category",
            "Bedroom",
        ]))
        .expect("parse should succeed");
        assert_eq!(parsed.request, "Nordic bedroom");
        assert!(parsed.register_template);
        assert_eq!(parsed.category.as_deref(), Some("Bedroom"));
        assert_eq!(parsed.override_params, None);
    }

    #[test]
    fn run_accepts_reuse_template() {
        let parsed = parse_run_cli_args(&strings(&[
            "--request",
            "bedroom",
            "--output",
            "o",
            "--reuse-template",
        ]))
        .expect("parse should succeed");
        assert!(parsed.reuse_template);
        assert!(!parsed.register_template);
    }

    #[test]
    fn color_needs_scene_and_exactly_one_scheme_source() {
        let parsed = parse_color_cli_args(&strings(&[
            "--scene",
            "out/scene.blend",
            "--reply-file",
            "reply.txt",
        ]))
        .expect("parse should succeed");
        assert_eq!(parsed.scene, PathBuf::from("out/scene.blend"));
        assert_eq!(
            parsed.scheme,
            SchemeInput::ReplyFile(PathBuf::from("reply.txt"))
        );

        let parsed = parse_color_cli_args(&strings(&["--scene", "s.blend", "--request", " Nordic "]))
            .expect("parse should succeed");
        assert_eq!(parsed.scheme, SchemeInput::Request(String::from("Nordic")));

        let err = parse_color_cli_args(&strings(&["--request", "Nordic"]))
            .expect_err("scene required");
        assert!(err.to_string().contains("--scene"));
        let err = parse_color_cli_args(&strings(&["--scene", "s.blend"]))
            .expect_err("scheme source required");
        assert!(err.to_string().contains("--reply-file"));
        let err = parse_color_cli_args(&strings(&[
            "--scene",
            "s.blend",
            "--request",
            "x",
            "--reply-file",
            "r.txt",
        ]))
        .expect_err("sources are exclusive");
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn templates_generate_builds_plan() {
        let parsed = parse_templates_generate_cli_args(&strings(&[
            "--room",
            "bedroom",
            "--room",
            "Kitchen",
            "--room",
            "BEDROOM",
            "--per-room",
            "3",
            "--timeout",
            "600",
        ]))
        .expect("parse should succeed");
        assert_eq!(parsed.plan.rooms, vec![RoomType::Bedroom, RoomType::Kitchen]);
        assert_eq!(parsed.plan.per_room, 3);
        assert_eq!(parsed.plan.whole_home, 0);
        assert_eq!(parsed.plan.room_timeout, Some(Duration::from_secs(600)));

        let defaults = parse_templates_generate_cli_args(&[]).expect("defaults");
        assert_eq!(defaults.plan, PoolPlan::default());

        let home_only = parse_templates_generate_cli_args(&strings(&["--whole-home", "2"]))
            .expect("parse should succeed");
        assert_eq!(home_only.plan.per_room, 0);
        assert_eq!(home_only.plan.whole_home, 2);

        let err = parse_templates_generate_cli_args(&strings(&["--room", "Attic"]))
            .expect_err("unknown room");
        assert!(err.to_string().contains("Attic"));
        let err = parse_templates_generate_cli_args(&strings(&["--per-room", "many"]))
            .expect_err("count should be numeric");
        assert!(err.to_string().contains("--per-room"));
        assert!(parse_templates_generate_cli_args(&strings(&["--per-room", "0"])).is_err());
    }

    #[test]
    fn templates_remove_requires_id() {
        let err = parse_templates_remove_cli_args(&[]).expect_err("id required");
        assert!(err.to_string().contains("--id"));

        let parsed = parse_templates_remove_cli_args(&strings(&["--id", "bedroom_01"]))
            .expect("parse should succeed");
        assert_eq!(parsed.id, "bedroom_01");
    }

    #[test]
    fn common_only_rejects_extra_arguments() {
        let common = parse_common_only(&strings(&["--app-root", "/srv/app"])).expect("parse");
        assert_eq!(common.app_root, Some(PathBuf::from("/srv/app")));
        assert!(parse_common_only(&strings(&["--id", "x"])).is_err());
    }

    #[test]
    fn parse_reply_accepts_file() {
        let parsed = parse_parse_reply_cli_args(&strings(&["--file", "reply.txt"]))
            .expect("parse should succeed");
        assert_eq!(parsed.file, Some(PathBuf::from("reply.txt")));
    }
}
