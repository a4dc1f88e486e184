#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use roomhue_core::pipeline::failure_hint::FailureHint;
use roomhue_core::pipeline::generation::{
    ArtifactPollConfig, GenerationErrorKind, GenerationOrchestrator, GenerationRequest,
    GenerationState, GeneratorToolConfig,
};
use roomhue_core::pipeline::runlog::RUN_RECORD_FILE_NAME;
use roomhue_core::pipeline::runtime::StdPipelineCommandRunner;
use serde_json::Value;

/// Generator stand-in: `$2` is the `--output_folder` value.
fn sh_generator(script: &str) -> GeneratorToolConfig {
    GeneratorToolConfig {
        program: String::from("/bin/sh"),
        program_args: vec![
            String::from("-c"),
            script.to_string(),
            String::from("generator"),
        ],
        tool_root: std::env::temp_dir(),
        stream_output: false,
    }
}

fn polling(budget_ms: u64) -> ArtifactPollConfig {
    ArtifactPollConfig {
        interval: Duration::from_millis(50),
        budget: Duration::from_millis(budget_ms),
        min_artifact_bytes: 1024,
    }
}

fn temp_root(label: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("roomhue_it_{label}_{stamp}"));
    fs::create_dir_all(root.as_path()).expect("temp root should exist");
    root
}

fn request(out: &Path) -> GenerationRequest {
    GenerationRequest::new(out, vec![String::from("coarse")])
        .expect("request")
        .with_seed("0000002a")
        .expect("seed")
}

const WRITE_SCENE: &str =
    r#"dd if=/dev/zero of="$2/scene.blend" bs=1024 count=4 2>/dev/null; echo generated"#;

#[test]
fn artifact_written_after_exit_is_found_by_polling() {
    let root = temp_root("late");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        sh_generator(
            r#"(sleep 0.3; dd if=/dev/zero of="$2/coarse/scene.blend" bs=1024 count=4) >/dev/null 2>&1 &
mkdir -p "$2/coarse"; exit 0"#,
        ),
        polling(3_000),
    );

    let result = orchestrator.run(&request(root.join("out").as_path()));
    assert!(result.succeeded, "unexpected result: {result:?}");
    assert_eq!(
        result.artifact_path,
        root.join("out").join("coarse").join("scene.blend")
    );

    let record: Value = serde_json::from_str(
        &fs::read_to_string(root.join("out").join(RUN_RECORD_FILE_NAME)).expect("run record"),
    )
    .expect("run record json");
    assert_eq!(record["seed"], "0000002a");
    assert_eq!(record["args"][0], "-c");

    let _ = fs::remove_dir_all(root);
}

#[test]
fn generator_receives_structured_arguments() {
    let root = temp_root("args");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        sh_generator(
            r#"printf '%s\n' "$@" > "$2/argv.txt"; dd if=/dev/zero of="$2/scene.blend" bs=1024 count=4 2>/dev/null"#,
        ),
        polling(500),
    );
    let req = request(root.join("out").as_path())
        .with_override_params(vec![String::from(
            r#"restrict_solving.restrict_parent_rooms=["Bedroom"]"#,
        )]);

    let result = orchestrator.run(&req);
    assert!(result.succeeded);
    let argv = fs::read_to_string(root.join("out").join("argv.txt")).expect("argv");
    let lines = argv.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "--output_folder",
            root.join("out").to_str().expect("utf8 path"),
            "-s",
            "0000002a",
            "-t",
            "coarse",
            "-g",
            "fast_solve.gin",
            "-g",
            "singleroom.gin",
            "-p",
            r#"restrict_solving.restrict_parent_rooms=["Bedroom"]"#,
        ]
    );

    let _ = fs::remove_dir_all(root);
}

#[test]
fn second_run_into_same_directory_is_renamed() {
    let root = temp_root("rename");
    let out = root.join("out");
    let orchestrator =
        GenerationOrchestrator::new(StdPipelineCommandRunner, sh_generator(WRITE_SCENE), polling(500));

    let first = orchestrator.run(&request(out.as_path()));
    assert!(first.succeeded);
    assert_eq!(first.output_dir, out);

    let second = orchestrator.run(&request(out.as_path()));
    assert!(second.succeeded);
    assert_ne!(second.output_dir, out);
    assert_eq!(second.output_dir.parent(), Some(root.as_path()));
    assert!(out.join("scene.blend").is_file());
    assert!(second.artifact_path.starts_with(second.output_dir.as_path()));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn timeout_kills_generator_within_margin() {
    let root = temp_root("timeout");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        sh_generator("echo starting; exec sleep 5"),
        polling(500),
    );
    let req = request(root.join("out").as_path()).with_timeout(Some(Duration::from_millis(400)));

    let started = Instant::now();
    let result = orchestrator.run(&req);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!result.succeeded);
    assert_eq!(result.final_state, GenerationState::TimedOut);
    assert_eq!(
        result.error_kind,
        Some(GenerationErrorKind::ProcessTimeout { timeout_ms: 400 })
    );

    let _ = fs::remove_dir_all(root);
}

#[test]
fn tiny_file_never_counts_as_artifact() {
    let root = temp_root("tiny");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        sh_generator(r#"printf 'partial' > "$2/scene.blend""#),
        polling(300),
    );

    let started = Instant::now();
    let result = orchestrator.run(&request(root.join("out").as_path()));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!result.succeeded);
    assert_eq!(result.error_kind, Some(GenerationErrorKind::ArtifactNotFound));
    assert_eq!(result.artifact_path, root.join("out"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn nonzero_exit_carries_hint_and_raw_output() {
    let root = temp_root("fail");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        sh_generator(
            "echo 'OSError: terrain/lib/waterbody.so: cannot open shared object file' >&2; exit 2",
        ),
        polling(300),
    );

    let result = orchestrator.run(&request(root.join("out").as_path()));
    assert!(!result.succeeded);
    assert_eq!(
        result.error_kind,
        Some(GenerationErrorKind::ProcessFailed {
            exit_code: Some(2),
            hint: Some(FailureHint::TerrainNativeLibraryMissing),
        })
    );
    assert!(result
        .raw_output
        .as_deref()
        .is_some_and(|raw| raw.contains("waterbody.so")));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_generator_program_is_a_launch_failure() {
    let root = temp_root("launch");
    let orchestrator = GenerationOrchestrator::new(
        StdPipelineCommandRunner,
        GeneratorToolConfig {
            program: String::from("roomhue-missing-generator"),
            program_args: Vec::new(),
            tool_root: std::env::temp_dir(),
            stream_output: false,
        },
        polling(100),
    );

    let result = orchestrator.run(&request(root.join("out").as_path()));
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
