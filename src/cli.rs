use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show rejections and failures
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default tracing filter when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "validate_upload=debug,info",
        }
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Check uploaded .zip and .xml files before they are accepted for processing
#[derive(Parser, Debug, Clone)]
#[command(name = "validate-upload")]
#[command(about = "Validate .zip and .xml uploads for format, size and XML schema conformity")]
#[command(version)]
pub struct Cli {
    /// Files to validate
    #[arg(required = true, help = "Upload files to validate")]
    pub files: Vec<PathBuf>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// XML Schema used for conformity checks
    #[arg(short = 's', long = "schema")]
    pub schema: Option<PathBuf>,

    /// Maximum upload size in bytes
    #[arg(long = "max-size")]
    pub max_size: Option<u64>,

    /// Directory for materialized uploads and extracted archives
    #[arg(long = "upload-dir")]
    pub upload_dir: Option<PathBuf>,

    /// Timeout for each external tool call in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Number of uploads validated concurrently
    #[arg(short = 'j', long = "concurrency")]
    pub concurrency: Option<usize>,

    /// Reject archives that cannot be parsed instead of passing them through
    #[arg(long = "strict-archives")]
    pub strict_archives: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (rejections only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Show progress indicators
    #[arg(long = "progress")]
    pub progress: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        for file in &self.files {
            if !file.is_file() {
                return Err(format!("File does not exist: {}", file.display()));
            }
        }
        if let Some(concurrency) = self.concurrency
            && concurrency == 0
        {
            return Err("Concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}
