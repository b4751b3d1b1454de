//! Request and response payloads of the IoT Jobs MQTT API.
//!
//! Field names follow the service's camelCase JSON. Timestamps are epoch
//! seconds on the wire and `DateTime<Utc>` here.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a job execution as tracked by the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
    Removed,
    Canceled,
}

impl JobStatus {
    /// Terminal status reported for a finished unit of work.
    pub fn from_success(succeeded: bool) -> Self {
        if succeeded {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Rejected => "REJECTED",
            JobStatus::Removed => "REMOVED",
            JobStatus::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// Summary entry of the pending-jobs listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionSummary {
    pub job_id: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_number: Option<i64>,
    #[serde(default)]
    pub version_number: Option<i64>,
}

/// Full job execution, including the application-defined document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionData {
    pub job_id: String,
    #[serde(default)]
    pub thing_name: Option<String>,
    #[serde(default)]
    pub job_document: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub status_details: Option<HashMap<String, String>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_number: Option<i64>,
    #[serde(default)]
    pub version_number: Option<i64>,
}

/// Body of `.../jobs/get` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPendingJobExecutionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPendingJobExecutionsResponse {
    #[serde(default)]
    pub in_progress_jobs: Vec<JobExecutionSummary>,
    #[serde(default)]
    pub queued_jobs: Vec<JobExecutionSummary>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Event published on `.../jobs/notify-next`; `execution` is absent when
/// no job is currently assigned to the thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextJobExecutionChangedEvent {
    #[serde(default)]
    pub execution: Option<JobExecutionData>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Body of `.../jobs/start-next` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartNextPendingJobExecutionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_in_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartNextJobExecutionResponse {
    #[serde(default)]
    pub execution: Option<JobExecutionData>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Body of `.../jobs/{jobId}/update` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobExecutionRequest {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobExecutionResponse {
    #[serde(default)]
    pub execution_state: Option<serde_json::Value>,
    #[serde(default)]
    pub job_document: Option<serde_json::Value>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Payload of every `.../rejected` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedError {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}
