//! # validate-upload Library
//!
//! An async validation pipeline for `.zip` and `.xml` uploads. Each upload passes a fixed,
//! fail-fast sequence of checks (extension, size, MIME type, archive integrity and contents,
//! XML well-formedness, XML schema conformity) and ends in either acceptance or a single
//! user-facing rejection reason. Format checks are delegated to external tools.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod tools;
pub mod upload;

pub use archive::{
    ArchiveInspector, ExtractOutcome, ExtractedArchive, IntegrityReport, ScratchWorkspace,
};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager, EnvProvider, ToolCommand};
pub use error::{IntegrityFault, PipelineError, Scope, Stage, ValidationError, Verdict};
pub use output::Output;
pub use pipeline::{PipelineConfig, UploadKind, ValidationPipeline};
pub use report::{BatchProgress, BatchSummary, ProgressCallback, ReportStatus, UploadReport};
pub use tools::{CommandToolRunner, ToolOutput, ToolRunner};
pub use upload::{Materialized, MaterializedUpload, Materializer, UploadCandidate, UploadSource};
