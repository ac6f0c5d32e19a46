//! External conversion backends.
//!
//! A backend turns one notebook page into one PDF at a given path. The
//! dispatcher treats it as an opaque, possibly slow, possibly failing call.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use futures_util::future::BoxFuture;

use crate::config::{BackendCommand, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
use crate::error::{Result, RmwatchError};

/// Trait for notebook-to-PDF converters
pub trait Backend: Send + Sync {
    /// Name used in log lines and errors
    fn tool(&self) -> &str;

    /// Render `input` into a PDF written at `output`.
    ///
    /// Must fail with `BackendMissing` when the converter is not installed.
    fn render<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<()>>;
}

/// Backend that runs an external program (`rmc`, `rm2pdf`, ...)
#[derive(Debug, Clone)]
pub struct CommandBackend {
    tool: String,
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(command: &BackendCommand) -> Self {
        let tool = Path::new(&command.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.program.clone());
        Self {
            tool,
            program: command.program.clone(),
            args: command.args.clone(),
        }
    }

    /// Argument list with `{input}` / `{output}` substituted.
    pub fn command_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                INPUT_PLACEHOLDER => input.as_os_str().to_os_string(),
                OUTPUT_PLACEHOLDER => output.as_os_str().to_os_string(),
                _ => OsString::from(
                    arg.replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
                        .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy()),
                ),
            })
            .collect()
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let result = tokio::process::Command::new(&self.program)
            .args(self.command_args(input, output))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RmwatchError::BackendMissing {
                    tool: self.tool.clone(),
                });
            }
            Err(e) => return Err(RmwatchError::Io(e)),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let reason = stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exited with {}", out.status));
            return Err(RmwatchError::BackendFailure {
                tool: self.tool.clone(),
                reason,
            });
        }

        Ok(())
    }
}

impl Backend for CommandBackend {
    fn tool(&self) -> &str {
        &self.tool
    }

    fn render<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run(input, output))
    }
}
