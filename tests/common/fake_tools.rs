use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use validate_upload::{PipelineError, ToolRunner};

/// A recorded call to one of the checkers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Mime(PathBuf),
    WellFormed(PathBuf),
    Schema { document: PathBuf, schema: PathBuf },
}

impl ToolCall {
    pub fn path(&self) -> &Path {
        match self {
            ToolCall::Mime(path) | ToolCall::WellFormed(path) => path,
            ToolCall::Schema { document, .. } => document,
        }
    }

    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Content-driven stand-in for `file`, `xmlwf` and `xmllint`.
///
/// - MIME: a zip signature is `application/zip`, a leading `<` is `text/xml`, NUL bytes are
///   `application/octet-stream`, anything else is `text/plain`.
/// - Well-formed: trimmed content starts with `<` and ends with `>`.
/// - Schema: the document contains an `<item` element.
pub struct ScriptedToolRunner {
    calls: Mutex<Vec<ToolCall>>,
    delay: Duration,
    fail_well_formedness: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedToolRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail_well_formedness: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every call take at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the well-formedness checker time out
    pub fn failing_well_formedness(mut self) -> Self {
        self.fail_well_formedness = true;
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn well_formed_calls(&self) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ToolCall::WellFormed(_)))
            .collect()
    }

    pub fn schema_calls(&self) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ToolCall::Schema { .. }))
            .collect()
    }

    /// Highest number of uploads seen inside a checker at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: ToolCall) -> Result<Vec<u8>, PipelineError> {
        let path = call.path().to_path_buf();
        self.calls.lock().unwrap().push(call);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let content = tokio::fs::read(&path).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(content?)
    }
}

#[async_trait]
impl ToolRunner for ScriptedToolRunner {
    async fn detect_mime_type(&self, path: &Path) -> Result<String, PipelineError> {
        let content = self.enter(ToolCall::Mime(path.to_path_buf())).await?;

        let mime = if content.starts_with(b"PK\x03\x04") || content.starts_with(b"PK\x05\x06") {
            "application/zip"
        } else if content.contains(&0) {
            "application/octet-stream"
        } else if content.trim_ascii_start().starts_with(b"<") {
            "text/xml"
        } else {
            "text/plain"
        };
        Ok(mime.to_string())
    }

    async fn check_well_formed(&self, path: &Path) -> Result<String, PipelineError> {
        let content = self.enter(ToolCall::WellFormed(path.to_path_buf())).await?;

        if self.fail_well_formedness {
            return Err(PipelineError::ToolTimeout {
                tool: "xmlwf".to_string(),
                timeout_seconds: 30,
            });
        }

        let trimmed = content.trim_ascii();
        if trimmed.starts_with(b"<") && trimmed.ends_with(b">") {
            Ok(String::new())
        } else {
            Ok(format!("{}:1:0: syntax error", path.display()))
        }
    }

    async fn check_schema(&self, path: &Path, schema: &Path) -> Result<i32, PipelineError> {
        let content = self
            .enter(ToolCall::Schema {
                document: path.to_path_buf(),
                schema: schema.to_path_buf(),
            })
            .await?;

        let text = String::from_utf8_lossy(&content);
        Ok(if text.contains("<item") { 0 } else { 1 })
    }
}
