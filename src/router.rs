use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::executor::WorkExecutor;

/// Operation that deploys a firmware version to the device.
pub const DEPLOY_FIRMWARE: &str = "Deploy-ROS-Firmware";

/// Routes a job to the executor registered for its `operation` field.
///
/// Documents without an operation, or with one nobody registered, fail the
/// job rather than the agent.
#[derive(Default)]
pub struct OperationRouter {
    routes: HashMap<String, Arc<dyn WorkExecutor>>,
}

impl OperationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `operation`, replacing any previous one.
    pub fn route(mut self, operation: &str, executor: Arc<dyn WorkExecutor>) -> Self {
        self.routes.insert(operation.to_string(), executor);
        self
    }

    pub fn operation_of(job_document: &Value) -> Option<&str> {
        job_document.get("operation").and_then(Value::as_str)
    }
}

#[async_trait]
impl WorkExecutor for OperationRouter {
    async fn execute(&self, job_id: &str, job_document: &Value) -> bool {
        let Some(operation) = Self::operation_of(job_document) else {
            tracing::warn!(job_id, "Job document has no operation");
            return false;
        };
        let Some(executor) = self.routes.get(operation) else {
            tracing::warn!(job_id, operation, "Unknown operation");
            return false;
        };

        tracing::info!(job_id, operation, "Routing job");
        let succeeded = executor.execute(job_id, job_document).await;
        tracing::info!(job_id, operation, succeeded, "Job handler complete");
        succeeded
    }
}
