//! Advisor abstraction for oracle consultation.
//!
//! The [`Advisor`] trait decouples the resolution loop from the actual oracle
//! backend (by default `codex exec`). Tests use scripted advisors that return
//! predetermined responses without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Placeholder in the advisor command replaced by [`AdviceRequest::output_path`].
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Parameters for one oracle consultation.
#[derive(Debug, Clone)]
pub struct AdviceRequest {
    /// Short label for logs (`diagnosis`, `consultation-3`, ...).
    pub label: String,
    /// Rendered prompt text fed to the oracle.
    pub prompt: String,
    /// Structured payload embedded in the prompt.
    pub payload: Value,
    /// Where the oracle should write its final message, if it supports it.
    pub output_path: PathBuf,
    /// Maximum time to wait for the oracle.
    pub timeout: Duration,
}

/// Abstraction over oracle backends: structured request in, raw text out.
///
/// The response is untrusted; callers decode it with
/// [`crate::core::decode::decode`].
pub trait Advisor {
    fn advise(&self, request: &AdviceRequest) -> Result<String>;
}

/// Advisor that spawns a configured command, writes the prompt to its stdin
/// and reads the response from `{output}` (when present in the command) or
/// from stdout.
#[derive(Debug, Clone)]
pub struct CommandAdvisor {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandAdvisor {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }

    fn uses_output_file(&self) -> bool {
        self.command.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER))
    }

    fn build_command(&self, output_path: &Path) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("advisor command is empty"))?;
        let output = output_path.display().to_string();
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(arg.replace(OUTPUT_PLACEHOLDER, &output));
        }
        Ok(cmd)
    }
}

impl Advisor for CommandAdvisor {
    #[instrument(skip_all, fields(label = %request.label, timeout_secs = request.timeout.as_secs()))]
    fn advise(&self, request: &AdviceRequest) -> Result<String> {
        info!(program = ?self.command.first(), "consulting advisor");

        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create advisor output dir {}", parent.display()))?;
        }
        let cmd = self.build_command(&request.output_path)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )
        .context("run advisor command")?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "advisor timed out");
            return Err(anyhow!("advisor timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "advisor failed");
            return Err(anyhow!(
                "advisor failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let response = if self.uses_output_file() {
            fs::read_to_string(&request.output_path).with_context(|| {
                format!("read advisor output {}", request.output_path.display())
            })?
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        debug!(response_bytes = response.len(), "advisor responded");
        Ok(response)
    }
}
