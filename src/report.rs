use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Stage, Verdict};

/// Status of a single upload after validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Accepted,
    Rejected {
        code: String,
        stage: Stage,
        message: String,
    },
    /// A fatal error stopped validation; no verdict was reached
    Failed { message: String },
}

impl ReportStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReportStatus::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ReportStatus::Rejected { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ReportStatus::Failed { .. })
    }
}

impl From<&std::result::Result<Verdict, PipelineError>> for ReportStatus {
    fn from(outcome: &std::result::Result<Verdict, PipelineError>) -> Self {
        match outcome {
            Ok(Verdict::Accepted) => ReportStatus::Accepted,
            Ok(Verdict::Rejected(error)) => ReportStatus::Rejected {
                code: error.code().to_string(),
                stage: error.stage(),
                message: error.to_string(),
            },
            Err(error) => ReportStatus::Failed {
                message: error.to_string(),
            },
        }
    }
}

/// Result of validating one upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReport {
    /// Name the upload was submitted under
    pub name: String,
    pub status: ReportStatus,
    pub duration: Duration,
}

/// Progress update for batch validation
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Upload that just finished
    pub name: String,
    pub completed: usize,
    pub total: usize,
}

/// Progress callback type for batch updates
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Aggregated results of validating several uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub total_duration: Duration,
    pub reports: Vec<UploadReport>,
}

impl BatchSummary {
    /// Aggregate individual reports into a summary
    pub fn aggregate(reports: Vec<UploadReport>) -> Self {
        let mut accepted = 0;
        let mut rejected = 0;
        let mut failed = 0;
        let mut total_duration = Duration::ZERO;

        for report in &reports {
            match report.status {
                ReportStatus::Accepted => accepted += 1,
                ReportStatus::Rejected { .. } => rejected += 1,
                ReportStatus::Failed { .. } => failed += 1,
            }
            total_duration += report.duration;
        }

        Self {
            total: reports.len(),
            accepted,
            rejected,
            failed,
            total_duration,
            reports,
        }
    }

    pub fn all_accepted(&self) -> bool {
        self.total > 0 && self.accepted == self.total
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// 0 when everything was accepted, 1 on rejections, 2 on fatal errors
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            2
        } else if self.rejected > 0 {
            1
        } else {
            0
        }
    }
}
