//! Outcome of a job.

use std::time::Duration;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
    Canceled,
}

/// Recorded exactly once per job, before any completion subscriber runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub status: JobStatus,
    /// Response body; empty unless the fetch succeeded.
    pub data: Vec<u8>,
    /// Wall time spent on the job by its worker (zero when canceled while pending).
    pub elapsed: Duration,
    pub error: Option<FetchError>,
}

impl JobResult {
    pub fn succeeded(data: Vec<u8>, elapsed: Duration) -> Self {
        Self {
            status: JobStatus::Succeeded,
            data,
            elapsed,
            error: None,
        }
    }

    pub fn failed(error: FetchError, elapsed: Duration) -> Self {
        Self {
            status: JobStatus::Failed,
            data: Vec::new(),
            elapsed,
            error: Some(error),
        }
    }

    pub fn canceled(elapsed: Duration) -> Self {
        Self {
            status: JobStatus::Canceled,
            data: Vec::new(),
            elapsed,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}
