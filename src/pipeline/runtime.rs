use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READER_JOIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Forcible kill after this long.
    pub timeout: Option<Duration>,
    /// Echo child output lines to this process's stdout/stderr as they arrive.
    pub stream_output: bool,
    /// Keep only the last N lines of each stream; `None` keeps everything.
    pub retain_lines: Option<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            timeout: None,
            stream_output: false,
            retain_lines: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// stderr followed by stdout, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
            (false, true) => self.stderr.clone(),
            _ => self.stdout.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineRuntimeError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command execution failed: {0}")]
    Io(std::io::Error),
    #[error("command '{program}' timed out after {}ms", .timeout.as_millis())]
    TimedOut {
        program: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

pub trait PipelineCommandRunner: Send + Sync + 'static {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError>;
}

/// Runs commands as real child processes with piped output.
///
/// A non-zero exit is not an error at this level; callers classify `status_code`. On unix
/// the child leads its own process group and a timeout kills the whole group, so helper
/// processes it started do not outlive it.
#[derive(Debug, Default, Clone)]
pub struct StdPipelineCommandRunner;

impl PipelineCommandRunner for StdPipelineCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        let mut command = Command::new(spec.program.as_str());
        command
            .args(spec.args.iter().map(String::as_str))
            .current_dir(spec.cwd.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|source| PipelineRuntimeError::Launch {
                program: spec.program.clone(),
                source,
            })?;

        let stdout_tail = Arc::new(Mutex::new(OutputTail::new(spec.retain_lines)));
        let stderr_tail = Arc::new(Mutex::new(OutputTail::new(spec.retain_lines)));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                stdout,
                stdout_tail.clone(),
                spec.stream_output.then_some(EchoTarget::Stdout),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                stderr,
                stderr_tail.clone(),
                spec.stream_output.then_some(EchoTarget::Stderr),
            ));
        }

        let deadline = spec.timeout.map(|timeout| Instant::now() + timeout);
        let status = loop {
            if let Some(status) = child.try_wait().map_err(PipelineRuntimeError::Io)? {
                break status;
            }
            if let (Some(deadline), Some(timeout)) = (deadline, spec.timeout) {
                if Instant::now() >= deadline {
                    kill_process_tree(&mut child);
                    let _ = child.wait();
                    join_readers(readers);
                    return Err(PipelineRuntimeError::TimedOut {
                        program: spec.program.clone(),
                        timeout,
                        stdout: snapshot(&stdout_tail),
                        stderr: snapshot(&stderr_tail),
                    });
                }
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        };

        join_readers(readers);

        Ok(CommandOutput {
            status_code: status.code().unwrap_or(-1),
            stdout: snapshot(&stdout_tail),
            stderr: snapshot(&stderr_tail),
        })
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    let kill_group = format!("kill -KILL -- -{}", child.id());
    let signalled = Command::new("/bin/sh")
        .args(["-c", kill_group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());
    if !signalled {
        tracing::warn!(pid = child.id(), "process group kill failed, killing child only");
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Waits a bounded time for the readers to drain. A reader still blocked after that (a
/// descendant outside the group holding the pipe) is left detached.
fn join_readers(readers: Vec<JoinHandle<()>>) {
    let join_deadline = Instant::now() + READER_JOIN_GRACE;
    while readers.iter().any(|handle| !handle.is_finished()) && Instant::now() < join_deadline {
        thread::sleep(Duration::from_millis(10));
    }
    for handle in readers {
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EchoTarget {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputTail {
    lines: VecDeque<String>,
    limit: Option<usize>,
}

impl OutputTail {
    fn new(limit: Option<usize>) -> Self {
        Self {
            lines: VecDeque::new(),
            limit,
        }
    }

    fn push(&mut self, line: String) {
        if let Some(limit) = self.limit {
            if limit == 0 {
                return;
            }
            while self.lines.len() >= limit {
                self.lines.pop_front();
            }
        }
        self.lines.push_back(line);
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

fn snapshot(tail: &Arc<Mutex<OutputTail>>) -> String {
    match tail.lock() {
        Ok(guard) => guard.joined(),
        Err(poisoned) => poisoned.into_inner().joined(),
    }
}

fn spawn_reader<R>(
    reader: R,
    tail: Arc<Mutex<OutputTail>>,
    echo: Option<EchoTarget>,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(buf.as_slice())
                .trim_end_matches(['\n', '\r'])
                .to_string();
            match echo {
                Some(EchoTarget::Stdout) => {
                    let mut out = std::io::stdout().lock();
                    let _ = writeln!(out, "{line}");
                }
                Some(EchoTarget::Stderr) => {
                    let mut out = std::io::stderr().lock();
                    let _ = writeln!(out, "{line}");
                }
                None => {}
            }
            match tail.lock() {
                Ok(mut guard) => guard.push(line),
                Err(poisoned) => poisoned.into_inner().push(line),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_tail_keeps_last_lines() {
        let mut tail = OutputTail::new(Some(2));
        for line in ["a", "b", "c"] {
            tail.push(line.to_string());
        }
        assert_eq!(tail.joined(), "b\nc");

        let mut unbounded = OutputTail::new(None);
        for line in ["a", "b", "c"] {
            unbounded.push(line.to_string());
        }
        assert_eq!(unbounded.joined(), "a\nb\nc");
    }

    #[test]
    fn combined_output_puts_stderr_first() {
        let output = CommandOutput {
            status_code: 1,
            stdout: String::from("out"),
            stderr: String::from("err"),
        };
        assert_eq!(output.combined(), "err\nout");
        assert!(!output.success());
    }

    #[test]
    fn launch_failure_reports_program() {
        let err = StdPipelineCommandRunner
            .run(&CommandSpec::new(
                "roomhue-definitely-missing-binary",
                Vec::new(),
                std::env::temp_dir(),
            ))
            .expect_err("missing binary should not launch");
        assert!(matches!(err, PipelineRuntimeError::Launch { ref program, .. }
            if program == "roomhue-definitely-missing-binary"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_code_and_streams() {
        let output = StdPipelineCommandRunner
            .run(&CommandSpec::new(
                "/bin/sh",
                vec![
                    String::from("-c"),
                    String::from("echo one; echo two >&2; exit 3"),
                ],
                std::env::temp_dir(),
            ))
            .expect("sh should run");
        assert_eq!(output.status_code, 3);
        assert_eq!(output.stdout, "one");
        assert_eq!(output.stderr, "two");
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_after_timeout() {
        let mut spec = CommandSpec::new(
            "/bin/sh",
            vec![String::from("-c"), String::from("echo started; exec sleep 5")],
            std::env::temp_dir(),
        );
        spec.timeout = Some(Duration::from_millis(300));

        let started = Instant::now();
        let err = StdPipelineCommandRunner
            .run(&spec)
            .expect_err("sleep should time out");
        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            PipelineRuntimeError::TimedOut { timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        // A zombie left for an init that never reaps still has a /proc entry.
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| {
                stat.rsplit_once(')')
                    .and_then(|(_, rest)| rest.split_whitespace().next())
                    .is_some_and(|state| state != "Z")
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_background_helpers_too() {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let pid_file = std::env::temp_dir().join(format!("roomhue_runtime_helper_{stamp}.pid"));
        let script = format!(
            "sleep 30 & echo $! > '{}'; wait",
            pid_file.to_string_lossy()
        );
        let mut spec = CommandSpec::new(
            "/bin/sh",
            vec![String::from("-c"), script],
            std::env::temp_dir(),
        );
        spec.timeout = Some(Duration::from_millis(500));

        let started = Instant::now();
        let err = StdPipelineCommandRunner
            .run(&spec)
            .expect_err("helper should time out");
        assert!(matches!(err, PipelineRuntimeError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));

        let pid = std::fs::read_to_string(pid_file.as_path()).expect("helper pid");
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(2);
        while process_alive(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!process_alive(pid), "background helper {pid} survived the timeout");

        let _ = std::fs::remove_file(pid_file);
    }
}
