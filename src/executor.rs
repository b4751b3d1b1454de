//! Work executors: the side effects a job asks for.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use crate::container::{ContainerRuntime, FirmwareLayout};

/// Performs the work of one job.
///
/// Called exactly once per accepted job, off the message-delivery path.
/// Implementations report failure by returning `false`; they never error.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, job_id: &str, job_document: &Value) -> bool;
}

/// Switches the device to the firmware version named in the job document.
///
/// Running firmware containers of the device are stopped first; the first
/// of them is restarted again if the new version cannot be started.
pub struct FirmwareUpdater {
    runtime: Arc<dyn ContainerRuntime>,
    layout: FirmwareLayout,
}

impl FirmwareUpdater {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, layout: FirmwareLayout) -> Self {
        Self { runtime, layout }
    }

    async fn deploy(&self, version: &str) -> Result<bool> {
        let stopped = self
            .runtime
            .stop_labelled(&self.layout.device_label())
            .await
            .context("Failed to stop running firmware")?;
        let fallback = stopped.into_iter().next();
        if fallback.is_none() {
            tracing::info!("No firmware containers running for this device");
        }

        let name = self.layout.container_name(version);
        if self.runtime.exists(&name).await? {
            tracing::info!(container = %name, "Container already exists, restarting");
            self.runtime.restart(&name).await?;
            return Ok(true);
        }

        tracing::info!(container = %name, "Container does not exist, creating");
        match self.start_new(version).await {
            Ok(id) => {
                tracing::info!(container = %name, id = %id, "Firmware container started");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Failed to start firmware");
                match fallback {
                    Some(previous) => {
                        tracing::info!(container = %previous, "Falling back to previous firmware");
                        self.runtime.restart(&previous).await?;
                    }
                    None => tracing::warn!("No fallback container available"),
                }
                Ok(false)
            }
        }
    }

    async fn start_new(&self, version: &str) -> Result<String> {
        let spec = self.layout.spec(version);
        self.runtime.pull(&spec.image).await?;
        tracing::info!(image = %spec.image, container = %spec.name, "Starting container");
        self.runtime.run(&spec).await
    }
}

/// Version field of a firmware job document; numbers are accepted too.
fn version_of(job_document: &Value) -> Result<String> {
    match job_document.get("version") {
        Some(Value::String(v)) if !v.is_empty() => Ok(v.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(anyhow!("unsupported version value {other}")),
        None => Err(anyhow!("job document has no version")),
    }
}

#[async_trait]
impl WorkExecutor for FirmwareUpdater {
    async fn execute(&self, job_id: &str, job_document: &Value) -> bool {
        let version = match version_of(job_document) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Rejecting firmware job");
                return false;
            }
        };

        tracing::info!(job_id, version = %version, "Deploying firmware");
        let succeeded = match self.deploy(&version).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(job_id, version = %version, error = %e, "Firmware deployment failed");
                false
            }
        };
        tracing::info!(job_id, succeeded, "Firmware deployment complete");
        succeeded
    }
}
