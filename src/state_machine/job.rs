use std::fmt;

use serde::{Deserialize, Serialize};

use crate::jobs::{JobExecutionData, JobStatus, JobsError};

/// A unit of work handed out by the job queue. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    /// Application-defined payload, e.g. `{"operation": ..., "version": ...}`.
    pub job_document: serde_json::Value,
}

impl From<JobExecutionData> for JobDescriptor {
    fn from(execution: JobExecutionData) -> Self {
        Self {
            job_id: execution.job_id,
            job_document: execution.job_document.unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Result of one work executor invocation, sent back to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkCompletion {
    pub job_id: String,
    pub succeeded: bool,
}

impl WorkCompletion {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_success(self.succeeded)
    }
}

/// Why the coordinator stopped.
#[derive(Debug)]
pub enum ShutdownReason {
    /// Stop was requested from outside (signal).
    Requested,
    /// A protocol or transport failure ended the session.
    Failed(JobsError),
    /// The transport stopped delivering messages.
    TransportClosed,
}

impl ShutdownReason {
    pub fn is_failure(&self) -> bool {
        !matches!(self, ShutdownReason::Requested)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => write!(f, "shutdown requested"),
            ShutdownReason::Failed(e) => write!(f, "{e}"),
            ShutdownReason::TransportClosed => write!(f, "transport closed"),
        }
    }
}

impl From<JobsError> for ShutdownReason {
    fn from(error: JobsError) -> Self {
        ShutdownReason::Failed(error)
    }
}
