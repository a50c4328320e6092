use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use validate_upload::cli::{Cli, OutputFormat, VerbosityLevel};
use validate_upload::config::ConfigManager;
use validate_upload::output::Output;
use validate_upload::pipeline::ValidationPipeline;
use validate_upload::report::{BatchProgress, BatchSummary, ProgressCallback};
use validate_upload::upload::UploadCandidate;

/// Exit status for configuration problems and other fatal errors
const EXIT_FATAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse_args();
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;

    let verbosity = VerbosityLevel::from_flags(config.output.verbose, config.output.quiet);
    let format = OutputFormat::from(config.output.format.clone());
    init_logging(verbosity, format);

    let pipeline = ValidationPipeline::from_config(&config);
    tracing::debug!(config = ?pipeline.config(), "pipeline configured");

    let mut candidates = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let candidate = UploadCandidate::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        candidates.push(candidate);
    }

    let output = Output::new(verbosity, format);
    let progress: Option<ProgressCallback> = if config.validation.show_progress {
        let renderer = Output::plain(verbosity, OutputFormat::Human);
        Some(Arc::new(move |update: BatchProgress| {
            eprintln!("{}", renderer.format_progress(&update));
        }))
    } else {
        None
    };

    let reports = pipeline.validate_batch(candidates, progress).await?;
    let summary = BatchSummary::aggregate(reports);

    let rendered = output.format_summary(&summary);
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{}", rendered)?;
    if !rendered.is_empty() && !rendered.ends_with('\n') {
        writeln!(stdout)?;
    }
    stdout.flush()?;

    Ok(summary.exit_code() as u8)
}

/// Logs go to stderr; stdout carries the report
fn init_logging(verbosity: VerbosityLevel, format: OutputFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Human => builder.init(),
    }
}
