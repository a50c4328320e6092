//! External format checkers.
//!
//! The pipeline talks to MIME sniffing, well-formedness and schema validation through the
//! [`ToolRunner`] trait. [`CommandToolRunner`] spawns the configured programs; tests swap in
//! mocks so no real processes are needed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{ToolCommand, ToolsConfig};
use crate::error::{PipelineError, Result};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Content-based media type of the file, e.g. `application/zip`
    async fn detect_mime_type(&self, path: &Path) -> Result<String>;

    /// Diagnostics from the well-formedness checker; empty means well-formed
    async fn check_well_formed(&self, path: &Path) -> Result<String>;

    /// Exit code of the schema validator; 0 means the document conforms
    async fn check_schema(&self, path: &Path, schema: &Path) -> Result<i32>;
}

/// Captured result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the configured command-line checkers as subprocesses
#[derive(Debug, Clone)]
pub struct CommandToolRunner {
    mime_sniffer: ToolCommand,
    well_formedness: ToolCommand,
    schema_validator: ToolCommand,
    timeout: Duration,
}

impl CommandToolRunner {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            mime_sniffer: config.mime_sniffer.clone(),
            well_formedness: config.well_formedness.clone(),
            schema_validator: config.schema_validator.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, tool: &ToolCommand, paths: &[&Path]) -> Result<ToolOutput> {
        let mut cmd = Command::new(&tool.program);
        cmd.args(&tool.args)
            .args(paths)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| PipelineError::ToolSpawn {
            tool: tool.program.clone(),
            source,
        })?;

        // Dropping the future on timeout kills the child
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::ToolTimeout {
                tool: tool.program.clone(),
                timeout_seconds: self.timeout.as_secs(),
            })??;

        let output = ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!(
            tool = %tool.program,
            exit_code = output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "tool finished"
        );

        Ok(output)
    }
}

#[async_trait]
impl ToolRunner for CommandToolRunner {
    async fn detect_mime_type(&self, path: &Path) -> Result<String> {
        let output = self.run(&self.mime_sniffer, &[path]).await?;
        Ok(parse_mime_output(&output.stdout))
    }

    async fn check_well_formed(&self, path: &Path) -> Result<String> {
        let output = self.run(&self.well_formedness, &[path]).await?;
        Ok(join_diagnostics(&output.stdout, &output.stderr))
    }

    async fn check_schema(&self, path: &Path, schema: &Path) -> Result<i32> {
        let output = self.run(&self.schema_validator, &[schema, path]).await?;
        if output.exit_code != 0 {
            tracing::debug!(
                document = %path.display(),
                diagnostics = %output.stderr.trim(),
                "schema validator reported problems"
            );
        }
        Ok(output.exit_code)
    }
}

/// Take the media type from `path: type` output; whatever follows the last separator wins
pub fn parse_mime_output(stdout: &str) -> String {
    let trimmed = stdout.trim();
    match trimmed.rsplit_once(": ") {
        Some((_, mime)) => mime.trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn join_diagnostics(stdout: &str, stderr: &str) -> String {
    [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
