//! Fail-fast upload validation pipeline
//!
//! Stages run strictly in order and the first failing stage decides the verdict:
//!
//! 1. extension (`.zip` / `.xml`, case-insensitive)
//! 2. declared size against the configured maximum
//! 3. sniffed MIME type against the allow-set for the extension
//! 4. archive integrity (archives only)
//! 5. archive member names (archives only)
//! 6. XML well-formedness
//! 7. XML schema conformity
//!
//! Name and size checks never touch the disk. The upload is materialized right before the
//! MIME stage and an archive is extracted once, on first use, into a scratch workspace that
//! both content stages share. Everything a run creates is removed when the run ends, on
//! acceptance, rejection and fatal error alike.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::try_join_all;

use crate::archive::{
    ArchiveInspector, ExtractOutcome, ExtractedArchive, IntegrityReport, is_xml_name,
};
use crate::config::{Config, ConfigManager};
use crate::error::{IntegrityFault, PipelineError, Result, Scope, ValidationError, Verdict};
use crate::report::{BatchProgress, ProgressCallback, ReportStatus, UploadReport};
use crate::tools::{CommandToolRunner, ToolRunner};
use crate::upload::{Materialized, MaterializedUpload, Materializer, UploadCandidate, UploadSource};

/// Settings the pipeline needs, handed in explicitly at construction
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Largest accepted upload in bytes
    pub max_upload_size: u64,
    /// Cap on bytes written when unpacking one archive
    pub max_extracted_size: u64,
    /// XML Schema document used for conformity checks
    pub schema_path: PathBuf,
    /// Archive members exempt from content checks
    pub reserved_entries: Vec<String>,
    pub xml_mime_types: Vec<String>,
    pub zip_mime_types: Vec<String>,
    /// Root for materialized uploads and scratch workspaces
    pub upload_dir: PathBuf,
    /// Reject archives the zip reader cannot parse or extract
    pub strict_archives: bool,
    /// Bound on uploads validated at once by `validate_batch`
    pub max_concurrent_validations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        ConfigManager::pipeline_config(&Config::default())
    }
}

/// Accepted upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Zip,
    Xml,
}

/// Why the stage sequence stopped early
#[derive(Debug)]
enum Halt {
    Reject(ValidationError),
    Fatal(PipelineError),
}

impl From<ValidationError> for Halt {
    fn from(error: ValidationError) -> Self {
        Halt::Reject(error)
    }
}

impl From<PipelineError> for Halt {
    fn from(error: PipelineError) -> Self {
        Halt::Fatal(error)
    }
}

impl From<tokio::task::JoinError> for Halt {
    fn from(error: tokio::task::JoinError) -> Self {
        Halt::Fatal(error.into())
    }
}

/// Archive extraction state for one run
#[derive(Debug)]
enum Extraction {
    Pending,
    Unavailable,
    Ready(ExtractedArchive),
}

/// Scratch state owned by a single validation run
struct ValidationRun {
    name: String,
    extension: String,
    kind: UploadKind,
    size: u64,
    source: Option<UploadSource>,
    upload: Option<MaterializedUpload>,
    extraction: Extraction,
}

impl ValidationRun {
    fn new(candidate: UploadCandidate, kind: UploadKind) -> Self {
        let name = candidate.name().to_string();
        let extension = accepted_suffix(&name).to_string();
        let size = candidate.size();
        Self {
            name,
            extension,
            kind,
            size,
            source: Some(candidate.into_source()),
            upload: None,
            extraction: Extraction::Pending,
        }
    }

    /// Remove the workspace and the stored upload, reporting anything left behind
    fn cleanup(self) {
        if let Extraction::Ready(extracted) = self.extraction {
            let workspace = extracted.workspace().path().to_path_buf();
            if let Err(e) = extracted.close() {
                tracing::warn!(
                    workspace = %workspace.display(),
                    error = %e,
                    "failed to remove scratch workspace"
                );
            }
        }
        // MaterializedUpload removes its file on drop
        drop(self.upload);
    }
}

/// Accept only `.zip` and `.xml` names
pub fn check_extension(name: &str) -> std::result::Result<UploadKind, ValidationError> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".zip") {
        Ok(UploadKind::Zip)
    } else if lower.ends_with(".xml") {
        Ok(UploadKind::Xml)
    } else {
        Err(ValidationError::Extension)
    }
}

/// The `.zip` / `.xml` suffix of a name that passed `check_extension`, in its original case
fn accepted_suffix(name: &str) -> &str {
    name.get(name.len().saturating_sub(4)..).unwrap_or_default()
}

pub fn check_size(size: u64, limit: u64) -> std::result::Result<(), ValidationError> {
    if size > limit {
        Err(ValidationError::Size { limit_bytes: limit })
    } else {
        Ok(())
    }
}

/// The sniffed type must be in the allow-set for the upload kind
pub fn check_mime_type(
    kind: UploadKind,
    extension: &str,
    detected: &str,
    config: &PipelineConfig,
) -> std::result::Result<(), ValidationError> {
    let allowed = match kind {
        UploadKind::Zip => &config.zip_mime_types,
        UploadKind::Xml => &config.xml_mime_types,
    };

    if allowed.iter().any(|mime| mime == detected) {
        Ok(())
    } else {
        Err(ValidationError::MimeType {
            extension: extension.to_string(),
            detected: detected.to_string(),
        })
    }
}

/// Every archive entry must be an XML document
pub fn check_entry_names(names: &[String]) -> std::result::Result<(), ValidationError> {
    if names.iter().all(|name| is_xml_name(name)) {
        Ok(())
    } else {
        Err(ValidationError::ZipContents)
    }
}

/// Runs the validation stages for uploads; clones share configuration and tools
#[derive(Clone)]
pub struct ValidationPipeline {
    config: Arc<PipelineConfig>,
    tools: Arc<dyn ToolRunner>,
    materializer: Materializer,
}

impl ValidationPipeline {
    pub fn new(config: PipelineConfig, tools: Arc<dyn ToolRunner>) -> Self {
        let materializer = Materializer::new(config.upload_dir.clone());
        Self {
            config: Arc::new(config),
            tools,
            materializer,
        }
    }

    /// Pipeline backed by the command-line tools named in the configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ConfigManager::pipeline_config(config),
            Arc::new(CommandToolRunner::new(&config.tools)),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate one upload.
    ///
    /// Rejections come back as `Ok(Verdict::Rejected(..))`; `Err` is reserved for fatal
    /// problems such as an unwritable upload directory or a missing checker binary.
    #[tracing::instrument(name = "validate", skip_all, fields(upload = %candidate.name(), size = candidate.size()))]
    pub async fn validate(&self, candidate: UploadCandidate) -> Result<Verdict> {
        let kind = match check_extension(candidate.name()) {
            Ok(kind) => kind,
            Err(rejection) => {
                tracing::info!(stage = %rejection.stage(), reason = %rejection, "upload rejected");
                return Ok(Verdict::Rejected(rejection));
            }
        };

        let mut run = ValidationRun::new(candidate, kind);
        let outcome = self.run_stages(&mut run).await;
        run.cleanup();

        match outcome {
            Ok(()) => {
                tracing::info!("upload accepted");
                Ok(Verdict::Accepted)
            }
            Err(Halt::Reject(rejection)) => {
                tracing::info!(stage = %rejection.stage(), reason = %rejection, "upload rejected");
                Ok(Verdict::Rejected(rejection))
            }
            Err(Halt::Fatal(error)) => {
                tracing::error!(error = %error, "validation aborted");
                Err(error)
            }
        }
    }

    /// Validate one upload and summarize the outcome
    pub async fn validate_report(&self, candidate: UploadCandidate) -> UploadReport {
        let start = Instant::now();
        let name = candidate.name().to_string();
        let outcome = self.validate(candidate).await;

        UploadReport {
            name,
            status: ReportStatus::from(&outcome),
            duration: start.elapsed(),
        }
    }

    /// Validate independent uploads concurrently; reports come back in input order
    pub async fn validate_batch(
        &self,
        candidates: Vec<UploadCandidate>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<UploadReport>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let total = candidates.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations.max(1),
        ));

        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|candidate| {
                let pipeline = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let completed = Arc::clone(&completed);
                let progress_callback = progress_callback.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        PipelineError::Concurrency {
                            details: "Failed to acquire validation semaphore".to_string(),
                        }
                    })?;

                    let report = pipeline.validate_report(candidate).await;

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(BatchProgress {
                            name: report.name.clone(),
                            completed: done,
                            total,
                        });
                    }

                    Ok::<UploadReport, PipelineError>(report)
                })
            })
            .collect();

        let results = try_join_all(tasks).await?;
        results.into_iter().collect()
    }

    async fn run_stages(&self, run: &mut ValidationRun) -> std::result::Result<(), Halt> {
        tracing::debug!(stage = "extension", "stage passed");

        check_size(run.size, self.config.max_upload_size)?;
        tracing::debug!(stage = "size", "stage passed");

        self.check_mime(run).await?;
        tracing::debug!(stage = "mime-type", "stage passed");

        if run.kind == UploadKind::Zip {
            self.check_zip_integrity(run).await?;
            tracing::debug!(stage = "zip-integrity", "stage passed");

            self.check_zip_contents(run).await?;
            tracing::debug!(stage = "zip-contents", "stage passed");
        }

        self.check_well_formedness(run).await?;
        tracing::debug!(stage = "well-formedness", "stage passed");

        self.check_schema_conformity(run).await?;
        tracing::debug!(stage = "schema-conformity", "stage passed");

        Ok(())
    }

    /// Path of the stored upload, writing it out on first use
    async fn upload_path(&self, run: &mut ValidationRun) -> std::result::Result<PathBuf, Halt> {
        if let Some(upload) = &run.upload {
            return Ok(upload.path().to_path_buf());
        }

        let source = run.source.take().ok_or_else(|| PipelineError::Concurrency {
            details: format!("upload source for {} already consumed", run.name),
        })?;

        match self
            .materializer
            .materialize(&run.name, source, self.config.max_upload_size)
            .await?
        {
            Materialized::Stored(upload) => {
                let path = upload.path().to_path_buf();
                run.upload = Some(upload);
                Ok(path)
            }
            Materialized::TooLarge { bytes_seen } => {
                tracing::info!(
                    declared = run.size,
                    bytes_seen,
                    "upload exceeded its declared size"
                );
                Err(ValidationError::Size {
                    limit_bytes: self.config.max_upload_size,
                }
                .into())
            }
        }
    }

    async fn check_mime(&self, run: &mut ValidationRun) -> std::result::Result<(), Halt> {
        let path = self.upload_path(run).await?;
        let detected = self.tools.detect_mime_type(&path).await?;
        tracing::debug!(mime = %detected, "sniffed MIME type");

        check_mime_type(run.kind, &run.extension, &detected, &self.config)?;
        Ok(())
    }

    async fn check_zip_integrity(&self, run: &mut ValidationRun) -> std::result::Result<(), Halt> {
        let path = self.upload_path(run).await?;
        let report =
            tokio::task::spawn_blocking(move || ArchiveInspector::test_integrity(&path)).await?;

        match report {
            IntegrityReport::Intact => Ok(()),
            IntegrityReport::Malformed(detail) if !self.config.strict_archives => {
                tracing::debug!(detail = %detail, "archive structure not recognised, continuing");
                Ok(())
            }
            IntegrityReport::Malformed(detail) | IntegrityReport::Unreadable(detail) => {
                tracing::debug!(detail = %detail, "archive unreadable");
                Err(ValidationError::ZipIntegrity(IntegrityFault::Unreadable).into())
            }
            IntegrityReport::CorruptedMember(member) => {
                tracing::info!(member = %member, "archive member failed integrity test");
                Err(ValidationError::ZipIntegrity(IntegrityFault::CorruptedMembers).into())
            }
            IntegrityReport::Unsupported(member) => {
                tracing::info!(member = %member, "archive member uses an unsupported method");
                Err(ValidationError::ZipIntegrity(IntegrityFault::Unsupported).into())
            }
        }
    }

    async fn check_zip_contents(&self, run: &mut ValidationRun) -> std::result::Result<(), Halt> {
        let path = self.upload_path(run).await?;
        let listing =
            tokio::task::spawn_blocking(move || ArchiveInspector::list_entries(&path)).await?;

        let names = match listing {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(error = %e, "archive could not be listed, nothing to check");
                Vec::new()
            }
        };

        check_entry_names(&names)?;
        Ok(())
    }

    /// Members to check, extracting the archive on first use; `None` when nothing is available
    async fn archive_members(
        &self,
        run: &mut ValidationRun,
    ) -> std::result::Result<Option<Vec<PathBuf>>, Halt> {
        if let Extraction::Pending = run.extraction {
            let path = self.upload_path(run).await?;
            let config = Arc::clone(&self.config);
            let outcome = tokio::task::spawn_blocking(move || {
                ArchiveInspector::extract(
                    &path,
                    &config.upload_dir,
                    &config.reserved_entries,
                    config.max_extracted_size,
                )
            })
            .await?;

            run.extraction = match outcome {
                ExtractOutcome::Extracted(extracted) => Extraction::Ready(extracted),
                ExtractOutcome::TooLarge { .. } => {
                    return Err(ValidationError::ZipIntegrity(IntegrityFault::Oversized).into());
                }
                ExtractOutcome::Failed if self.config.strict_archives => {
                    return Err(ValidationError::ZipIntegrity(IntegrityFault::Unreadable).into());
                }
                ExtractOutcome::Failed => {
                    tracing::warn!(upload = %run.name, "archive could not be extracted, skipping content checks");
                    Extraction::Unavailable
                }
            };
        }

        match &run.extraction {
            Extraction::Ready(extracted) => Ok(Some(extracted.members().to_vec())),
            Extraction::Unavailable | Extraction::Pending => Ok(None),
        }
    }

    async fn check_well_formedness(&self, run: &mut ValidationRun) -> std::result::Result<(), Halt> {
        match run.kind {
            UploadKind::Xml => {
                let path = self.upload_path(run).await?;
                let diagnostics = self.tools.check_well_formed(&path).await?;
                if !diagnostics.is_empty() {
                    tracing::debug!(diagnostics = %diagnostics, "document is not well-formed");
                    return Err(ValidationError::XmlWellFormedness(Scope::Single).into());
                }
            }
            UploadKind::Zip => {
                for member in self.archive_members(run).await?.unwrap_or_default() {
                    let diagnostics = self.tools.check_well_formed(&member).await?;
                    if !diagnostics.is_empty() {
                        tracing::info!(member = %member_name(&member), "archive member is not well-formed");
                        return Err(ValidationError::XmlWellFormedness(Scope::Archive).into());
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_schema_conformity(
        &self,
        run: &mut ValidationRun,
    ) -> std::result::Result<(), Halt> {
        let schema = self.config.schema_path.clone();

        match run.kind {
            UploadKind::Xml => {
                let path = self.upload_path(run).await?;
                let exit_code = self.tools.check_schema(&path, &schema).await?;
                if exit_code != 0 {
                    return Err(ValidationError::XmlSchemaConformity(Scope::Single).into());
                }
            }
            UploadKind::Zip => {
                for member in self.archive_members(run).await?.unwrap_or_default() {
                    let exit_code = self.tools.check_schema(&member, &schema).await?;
                    if exit_code != 0 {
                        tracing::info!(member = %member_name(&member), exit_code, "archive member does not conform to the schema");
                        return Err(ValidationError::XmlSchemaConformity(Scope::Archive).into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn member_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
