use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner};

pub const SYSTEM_PLACEHOLDER: &str = "{system}";
pub const USER_PLACEHOLDER: &str = "{user}";

pub const DEFAULT_COLOR_SCHEME_SYSTEM_PROMPT: &str = "You are a professional interior designer. The user will describe the room style they want,
your task is to analyze and output RGB color values for various furniture in the room.

Please output in the following format (using RGB values, range 0-255):
1. bed: (255, 255, 255)
2. nightstand: (210, 180, 140)
3. sofa: (200, 200, 200)
4. chair: (192, 192, 192)
5. table: (222, 184, 135)
... (list all major furniture)

RGB value guidelines:
- White tones: (255, 255, 255) or (250, 250, 250)
- Beige/Cream: (245, 245, 220)
- Light wood: (210, 180, 140) or (222, 184, 135)
- Dark wood: (139, 90, 43) or (101, 67, 33)
- Light gray: (192, 192, 192) or (200, 200, 200)
- Dark gray: (64, 64, 64) or (128, 128, 128)

For Nordic style, use: white (250, 250, 250), light wood (222, 184, 135), light gray (200, 200, 200), beige (245, 245, 220).

Please output RGB values directly in the format: furniture_name: (R, G, B), do not add other explanations. Use English furniture names.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat command is not configured")]
    NotConfigured,
    #[error("failed to run chat command '{program}': {message}")]
    Command { program: String, message: String },
    #[error("chat command '{program}' exited with status {status_code}: {stderr}")]
    Failed {
        program: String,
        status_code: i32,
        stderr: String,
    },
    #[error("chat command '{program}' returned an empty reply")]
    EmptyReply { program: String },
}

/// Send a prompt, receive the reply text.
pub trait ChatCompletion: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, ChatError>;
}

/// Chat completion delegated to an external command whose stdout is the reply.
///
/// Arguments containing `{system}` or `{user}` get the prompts substituted in place; when
/// no argument mentions either placeholder both prompts are appended, system first.
pub struct CommandChatCompletion<R> {
    runner: R,
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl<R> CommandChatCompletion<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(runner: R, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            args,
            cwd: PathBuf::from("."),
            timeout: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_args(&self, system: &str, user: &str) -> Vec<String> {
        let templated = self
            .args
            .iter()
            .any(|arg| arg.contains(SYSTEM_PLACEHOLDER) || arg.contains(USER_PLACEHOLDER));
        if !templated {
            let mut args = self.args.clone();
            args.push(system.to_string());
            args.push(user.to_string());
            return args;
        }
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SYSTEM_PLACEHOLDER, system)
                    .replace(USER_PLACEHOLDER, user)
            })
            .collect()
    }
}

impl<R> ChatCompletion for CommandChatCompletion<R>
where
    R: PipelineCommandRunner,
{
    fn complete(&self, system: &str, user: &str) -> Result<String, ChatError> {
        if self.program.trim().is_empty() {
            return Err(ChatError::NotConfigured);
        }
        let mut spec = CommandSpec::new(
            self.program.clone(),
            self.command_args(system, user),
            self.cwd.clone(),
        );
        spec.timeout = self.timeout;

        tracing::info!(program = self.program.as_str(), "requesting color scheme");
        let output = self
            .runner
            .run(&spec)
            .map_err(|error| ChatError::Command {
                program: self.program.clone(),
                message: error.to_string(),
            })?;
        if !output.success() {
            return Err(ChatError::Failed {
                program: self.program.clone(),
                status_code: output.status_code,
                stderr: output.stderr,
            });
        }
        let reply = output.stdout.trim();
        if reply.is_empty() {
            return Err(ChatError::EmptyReply {
                program: self.program.clone(),
            });
        }
        tracing::debug!(chars = reply.chars().count(), "color scheme reply received");
        Ok(reply.to_string())
    }
}
