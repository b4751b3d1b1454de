//! Errors of the job-queue protocol.

use std::fmt;

use thiserror::Error;

use super::types::RejectedError;
use crate::transport::TransportError;

/// Requests the agent sends to the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    GetPendingJobExecutions,
    StartNextPendingJobExecution,
    UpdateJobExecution,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::GetPendingJobExecutions => write!(f, "GetPendingJobExecutions"),
            Request::StartNextPendingJobExecution => write!(f, "StartNextPendingJobExecution"),
            Request::UpdateJobExecution => write!(f, "UpdateJobExecution"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobsError {
    /// Subscribing to a response stream failed.
    #[error("subscribe to {topic} failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// Publishing a request failed locally.
    #[error("publish of {request} failed: {source}")]
    Publish {
        request: Request,
        #[source]
        source: TransportError,
    },

    /// The job queue refused a request.
    #[error("{request} rejected with code '{code}': {message}")]
    Rejected {
        request: Request,
        code: String,
        message: String,
    },

    /// A payload on a routed topic could not be decoded.
    #[error("malformed payload on {topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("disconnect failed: {0}")]
    Disconnect(#[source] TransportError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl JobsError {
    pub fn rejected(request: Request, error: RejectedError) -> Self {
        JobsError::Rejected {
            request,
            code: error.code,
            message: error.message.unwrap_or_default(),
        }
    }

    /// Rejection code, when the job queue refused the request.
    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            JobsError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}
