use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::error::{JobsError, Request};
use super::topics::{EventKind, JobTopics};
use super::types::{
    GetPendingJobExecutionsRequest, GetPendingJobExecutionsResponse, JobStatus,
    NextJobExecutionChangedEvent, RejectedError, StartNextJobExecutionResponse,
    StartNextPendingJobExecutionRequest, UpdateJobExecutionRequest, UpdateJobExecutionResponse,
};
use crate::transport::{IncomingMessage, Transport};

/// A decoded message from one of the job streams.
#[derive(Debug, Clone)]
pub enum JobEvent {
    PendingJobs(GetPendingJobExecutionsResponse),
    PendingJobsRejected(RejectedError),
    NextJobChanged(NextJobExecutionChangedEvent),
    StartNextAccepted(StartNextJobExecutionResponse),
    StartNextRejected(RejectedError),
    UpdateAccepted {
        job_id: String,
        response: UpdateJobExecutionResponse,
    },
    UpdateRejected {
        job_id: String,
        error: RejectedError,
    },
}

/// Job-queue client for one thing, speaking JSON over a [`Transport`].
pub struct JobsClient {
    thing_name: String,
    topics: JobTopics,
    transport: Arc<dyn Transport>,
}

impl JobsClient {
    pub fn new(thing_name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let thing_name = thing_name.into();
        Self {
            topics: JobTopics::new(&thing_name),
            thing_name,
            transport,
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Subscribe to the stream for `kind` and wait for the broker to confirm.
    pub async fn subscribe(&self, kind: EventKind) -> Result<(), JobsError> {
        let topic = self.topics.subscription(kind);
        tracing::debug!(topic = %topic, "Subscribing");
        self.transport
            .subscribe(&topic)
            .await
            .map_err(|source| JobsError::Subscribe { topic, source })
    }

    pub async fn publish_get_pending(&self) -> Result<(), JobsError> {
        let request = GetPendingJobExecutionsRequest {
            client_token: Some(client_token()),
        };
        self.publish(
            Request::GetPendingJobExecutions,
            &self.topics.get_pending(),
            &request,
        )
        .await
    }

    pub async fn publish_start_next(&self) -> Result<(), JobsError> {
        let request = StartNextPendingJobExecutionRequest {
            client_token: Some(client_token()),
            step_timeout_in_minutes: None,
            status_details: None,
        };
        self.publish(
            Request::StartNextPendingJobExecution,
            &self.topics.start_next(),
            &request,
        )
        .await
    }

    pub async fn publish_update(&self, job_id: &str, status: JobStatus) -> Result<(), JobsError> {
        let request = UpdateJobExecutionRequest {
            status,
            status_details: None,
            client_token: Some(client_token()),
        };
        self.publish(
            Request::UpdateJobExecution,
            &self.topics.update(job_id),
            &request,
        )
        .await
    }

    /// Closes the underlying session. No request may follow.
    pub async fn disconnect(&self) -> Result<(), JobsError> {
        self.transport
            .disconnect()
            .await
            .map_err(JobsError::Disconnect)
    }

    /// Decode a message from the broker.
    ///
    /// Returns `Ok(None)` for topics outside this thing's job streams.
    pub fn decode(&self, message: &IncomingMessage) -> Result<Option<JobEvent>, JobsError> {
        let Some(route) = self.topics.route(&message.topic) else {
            return Ok(None);
        };
        let job_id = route.job_id.unwrap_or_default();
        let event = match route.kind {
            EventKind::GetPendingAccepted => JobEvent::PendingJobs(parse(message)?),
            EventKind::GetPendingRejected => JobEvent::PendingJobsRejected(parse(message)?),
            EventKind::NextJobChanged => JobEvent::NextJobChanged(parse(message)?),
            EventKind::StartNextAccepted => JobEvent::StartNextAccepted(parse(message)?),
            EventKind::StartNextRejected => JobEvent::StartNextRejected(parse(message)?),
            EventKind::UpdateAccepted => JobEvent::UpdateAccepted {
                job_id,
                response: parse(message)?,
            },
            EventKind::UpdateRejected => JobEvent::UpdateRejected {
                job_id,
                error: parse(message)?,
            },
        };
        Ok(Some(event))
    }

    async fn publish<T: Serialize>(
        &self,
        request: Request,
        topic: &str,
        body: &T,
    ) -> Result<(), JobsError> {
        let payload = serde_json::to_vec(body)?;
        tracing::debug!(%request, topic, "Publishing request");
        self.transport
            .publish(topic, payload)
            .await
            .map_err(|source| JobsError::Publish { request, source })
    }
}

fn parse<T: DeserializeOwned>(message: &IncomingMessage) -> Result<T, JobsError> {
    serde_json::from_slice(&message.payload).map_err(|source| JobsError::Decode {
        topic: message.topic.clone(),
        source,
    })
}

fn client_token() -> String {
    Uuid::new_v4().to_string()
}
