use crate::cli::{Cli, OutputFormat};
use crate::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub schema: SchemaConfig,
    pub mime: MimeConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
}

/// Upload limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted upload in bytes
    pub max_upload_size: u64,
    /// Extracted archive contents may be at most this many times `max_upload_size`
    pub max_expansion_ratio: u64,
}

/// Schema used for conformity checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    /// Path to the XML Schema document
    pub path: PathBuf,
    /// Archive members exempt from well-formedness and schema checks
    pub reserved_entries: Vec<String>,
}

/// MIME allow-sets, keyed by upload kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MimeConfig {
    pub xml_types: Vec<String>,
    pub zip_types: Vec<String>,
}

/// Scratch storage for materialized uploads and extracted archives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    /// Reject archives the zip reader cannot parse instead of letting them through
    pub strict_archives: bool,
}

/// External checker commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-invocation timeout in seconds
    pub timeout_seconds: u64,
    pub mime_sniffer: ToolCommand,
    pub well_formedness: ToolCommand,
    pub schema_validator: ToolCommand,
}

/// A program plus leading arguments; paths are appended at call time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Batch validation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of uploads validated at once
    pub concurrency: Option<usize>,
    /// Show progress indicators
    pub show_progress: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024,
            max_expansion_ratio: 20,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("schema.xsd"),
            reserved_entries: vec!["om.xml".to_string()],
        }
    }
}

impl Default for MimeConfig {
    fn default() -> Self {
        Self {
            xml_types: vec![
                "application/xml".to_string(),
                "text/xml".to_string(),
                "text/plain".to_string(),
            ],
            zip_types: vec![
                "application/zip".to_string(),
                "application/x-zip".to_string(),
                "application/x-zip-compressed".to_string(),
            ],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: std::env::temp_dir().join("validate-upload"),
            strict_archives: false,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            mime_sniffer: ToolCommand::new("file", &["--mime-type"]),
            well_formedness: ToolCommand::new("xmlwf", &[]),
            schema_validator: ToolCommand::new("xmllint", &["--noout", "--schema"]),
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(cli, &SystemEnvProvider).await
    }

    /// Load configuration using a custom environment provider
    pub async fn load_config_with(cli: &Cli, env: &impl EnvProvider) -> Result<Config> {
        let mut config = if let Some(config_path) = &cli.config {
            Self::load_from_file(config_path).await?
        } else {
            Self::find_config_file().await?.unwrap_or_default()
        };

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "validate-upload.toml",
            "validate-upload.json",
            ".validate-upload.toml",
            ".validate-upload.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("validate-upload");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(max_size) = env.get("VALIDATE_UPLOAD_MAX_SIZE") {
            config.limits.max_upload_size = parse_env("VALIDATE_UPLOAD_MAX_SIZE", &max_size)?;
        }

        if let Some(ratio) = env.get("VALIDATE_UPLOAD_MAX_EXPANSION_RATIO") {
            config.limits.max_expansion_ratio =
                parse_env("VALIDATE_UPLOAD_MAX_EXPANSION_RATIO", &ratio)?;
        }

        if let Some(schema_path) = env.get("VALIDATE_UPLOAD_SCHEMA_PATH") {
            config.schema.path = PathBuf::from(schema_path);
        }

        if let Some(xml_types) = env.get("VALIDATE_UPLOAD_XML_MIME_TYPES") {
            config.mime.xml_types = split_list(&xml_types);
        }

        if let Some(zip_types) = env.get("VALIDATE_UPLOAD_ZIP_MIME_TYPES") {
            config.mime.zip_types = split_list(&zip_types);
        }

        if let Some(upload_dir) = env.get("VALIDATE_UPLOAD_UPLOAD_DIR") {
            config.storage.upload_dir = PathBuf::from(upload_dir);
        }

        if let Some(strict) = env.get("VALIDATE_UPLOAD_STRICT_ARCHIVES") {
            config.storage.strict_archives = parse_env("VALIDATE_UPLOAD_STRICT_ARCHIVES", &strict)?;
        }

        if let Some(timeout) = env.get("VALIDATE_UPLOAD_TOOL_TIMEOUT") {
            config.tools.timeout_seconds = parse_env("VALIDATE_UPLOAD_TOOL_TIMEOUT", &timeout)?;
        }

        if let Some(concurrency) = env.get("VALIDATE_UPLOAD_CONCURRENCY") {
            config.validation.concurrency =
                Some(parse_env("VALIDATE_UPLOAD_CONCURRENCY", &concurrency)?);
        }

        if let Some(verbose) = env.get("VALIDATE_UPLOAD_VERBOSE") {
            config.output.verbose = parse_env("VALIDATE_UPLOAD_VERBOSE", &verbose)?;
        }

        if let Some(quiet) = env.get("VALIDATE_UPLOAD_QUIET") {
            config.output.quiet = parse_env("VALIDATE_UPLOAD_QUIET", &quiet)?;
        }

        if let Some(format) = env.get("VALIDATE_UPLOAD_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid VALIDATE_UPLOAD_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration; only flags actually given win
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(max_size) = cli.max_size {
            config.limits.max_upload_size = max_size;
        }
        if let Some(schema) = &cli.schema {
            config.schema.path = schema.clone();
        }
        if let Some(upload_dir) = &cli.upload_dir {
            config.storage.upload_dir = upload_dir.clone();
        }
        if cli.strict_archives {
            config.storage.strict_archives = true;
        }
        if let Some(timeout) = cli.timeout {
            config.tools.timeout_seconds = timeout;
        }
        if cli.concurrency.is_some() {
            config.validation.concurrency = cli.concurrency;
        }
        if cli.progress {
            config.validation.show_progress = true;
        }
        if let Some(format) = &cli.format {
            config.output.format = (*format).into();
        }
        if cli.verbose {
            config.output.verbose = true;
        }
        if cli.quiet {
            config.output.quiet = true;
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.limits.max_upload_size == 0 {
            return Err(ConfigError::Validation(
                "Maximum upload size must be greater than 0".to_string(),
            ));
        }

        if config.limits.max_expansion_ratio == 0 {
            return Err(ConfigError::Validation(
                "Maximum expansion ratio must be greater than 0".to_string(),
            ));
        }

        if config.mime.xml_types.is_empty() || config.mime.zip_types.is_empty() {
            return Err(ConfigError::Validation(
                "Both MIME allow-sets must contain at least one type".to_string(),
            ));
        }

        if config.tools.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Tool timeout must be greater than 0".to_string(),
            ));
        }

        for (name, command) in [
            ("mime_sniffer", &config.tools.mime_sniffer),
            ("well_formedness", &config.tools.well_formedness),
            ("schema_validator", &config.tools.schema_validator),
        ] {
            if command.program.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Tool program for {} must not be empty",
                    name
                )));
            }
        }

        if let Some(concurrency) = config.validation.concurrency {
            if concurrency == 0 {
                return Err(ConfigError::Validation(
                    "Concurrency must be greater than 0".to_string(),
                ));
            }
            if concurrency > 1000 {
                return Err(ConfigError::Validation(
                    "Concurrency cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the effective concurrency for batch validation
    pub fn get_concurrency(config: &Config) -> usize {
        config.validation.concurrency.unwrap_or_else(num_cpus::get)
    }

    /// Build the explicit pipeline configuration
    pub fn pipeline_config(config: &Config) -> PipelineConfig {
        PipelineConfig {
            max_upload_size: config.limits.max_upload_size,
            max_extracted_size: config
                .limits
                .max_upload_size
                .saturating_mul(config.limits.max_expansion_ratio),
            schema_path: config.schema.path.clone(),
            reserved_entries: config.schema.reserved_entries.clone(),
            xml_mime_types: config.mime.xml_types.clone(),
            zip_mime_types: config.mime.zip_types.clone(),
            upload_dir: config.storage.upload_dir.clone(),
            strict_archives: config.storage.strict_archives,
            max_concurrent_validations: Self::get_concurrency(config),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
