//! Client for the IoT Jobs request/response protocol.
//!
//! Requests are published to reserved per-thing topics and answered on
//! matching `accepted`/`rejected` topics; next-job changes arrive as events.
//! [`JobsClient`] encodes requests and decodes whatever the transport
//! delivers into [`JobEvent`]s.

pub mod client;
pub mod error;
pub mod topics;
pub mod types;

pub use client::{JobEvent, JobsClient};
pub use error::{JobsError, Request};
pub use topics::EventKind;
pub use types::{JobExecutionData, JobExecutionSummary, JobStatus};
