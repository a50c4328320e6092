use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Whether a rejection concerns a standalone document or members of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Single,
    Archive,
}

/// What the integrity test found wrong with an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFault {
    /// The archive could not be read at all
    Unreadable,
    /// At least one member failed its checksum or could not be decompressed
    CorruptedMembers,
    /// A member uses a compression method or encryption the reader does not support
    Unsupported,
    /// The members decompress to more than the extraction limit
    Oversized,
}

/// Pipeline stages, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extension,
    Size,
    MimeType,
    ZipIntegrity,
    ZipContents,
    WellFormedness,
    SchemaConformity,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extension => "extension",
            Stage::Size => "size",
            Stage::MimeType => "mime-type",
            Stage::ZipIntegrity => "zip-integrity",
            Stage::ZipContents => "zip-contents",
            Stage::WellFormedness => "well-formedness",
            Stage::SchemaConformity => "schema-conformity",
        };
        f.write_str(name)
    }
}

/// User-correctable reason for rejecting an upload.
///
/// The `Display` output is the message shown to the uploader.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Upload must be in .zip or .xml format.")]
    Extension,

    #[error("Upload too large. The current limit is {}MB.", format_megabytes(.limit_bytes))]
    Size { limit_bytes: u64 },

    #[error("File appears to be in {extension} format, but it is not (MIME-type: {detected}).")]
    MimeType { extension: String, detected: String },

    #[error("{}", integrity_message(.0))]
    ZipIntegrity(IntegrityFault),

    #[error("Archive contains files that are not in XML format")]
    ZipContents,

    #[error("{}", well_formedness_message(.0))]
    XmlWellFormedness(Scope),

    #[error("{}", schema_message(.0))]
    XmlSchemaConformity(Scope),
}

impl ValidationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Extension => "extension",
            ValidationError::Size { .. } => "size",
            ValidationError::MimeType { .. } => "mime_type",
            ValidationError::ZipIntegrity(_) => "zip_integrity",
            ValidationError::ZipContents => "zip_contents",
            ValidationError::XmlWellFormedness(_) => "xml_well_formedness",
            ValidationError::XmlSchemaConformity(_) => "xml_schema_conformity",
        }
    }

    /// The stage that produced this rejection
    pub fn stage(&self) -> Stage {
        match self {
            ValidationError::Extension => Stage::Extension,
            ValidationError::Size { .. } => Stage::Size,
            ValidationError::MimeType { .. } => Stage::MimeType,
            ValidationError::ZipIntegrity(_) => Stage::ZipIntegrity,
            ValidationError::ZipContents => Stage::ZipContents,
            ValidationError::XmlWellFormedness(_) => Stage::WellFormedness,
            ValidationError::XmlSchemaConformity(_) => Stage::SchemaConformity,
        }
    }
}

fn format_megabytes(bytes: &u64) -> String {
    let mb = *bytes as f64 / (1024.0 * 1024.0);
    if mb.fract() == 0.0 {
        format!("{}", mb as u64)
    } else {
        format!("{:.2}", mb)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

fn integrity_message(fault: &IntegrityFault) -> &'static str {
    match fault {
        IntegrityFault::Unreadable => "Archive is corrupted",
        IntegrityFault::CorruptedMembers => "Archive contains corrupted files",
        IntegrityFault::Unsupported => "Archive uses an unsupported compression method",
        IntegrityFault::Oversized => "Archive contents exceed the allowed extracted size",
    }
}

fn well_formedness_message(scope: &Scope) -> &'static str {
    match scope {
        Scope::Single => "XML file is not well-formed",
        Scope::Archive => "Archive contains XML files that are not well-formed",
    }
}

fn schema_message(scope: &Scope) -> &'static str {
    match scope {
        Scope::Single => "XML file does not validate against the XML schema",
        Scope::Archive => "Archive contains XML files that do not validate against the XML schema",
    }
}

/// Outcome of validating one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    Rejected(ValidationError),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn rejection(&self) -> Option<&ValidationError> {
        match self {
            Verdict::Accepted => None,
            Verdict::Rejected(error) => Some(error),
        }
    }
}

/// Unexpected failures that abort a validation run instead of producing a verdict
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to store upload at {path}: {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} did not finish within {timeout_seconds} seconds")]
    ToolTimeout { tool: String, timeout_seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Concurrency {
            details: format!("Task join error: {}", err),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
