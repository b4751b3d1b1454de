//! Container lifecycle for firmware images.
//!
//! [`ContainerRuntime`] is the small set of Docker operations the firmware
//! executor needs; [`DockerRuntime`] implements it against the local daemon
//! with `bollard`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures_util::StreamExt;

use crate::config::AgentConfig;

/// Everything needed to create one firmware container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// `host:container:mode` bind mounts.
    pub binds: Vec<String>,
    pub network_mode: String,
}

/// Builds the firmware container for a given version from configuration.
#[derive(Debug, Clone)]
pub struct FirmwareLayout {
    device_name: String,
    firmware_thing: String,
    cert_dir: String,
    cert_mount: String,
    registry: String,
    image: String,
    network: String,
    timer_period: String,
    extra_env: Vec<(String, String)>,
}

impl FirmwareLayout {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            firmware_thing: config.firmware_thing_name(),
            cert_dir: config.firmware_cert_dir().display().to_string(),
            cert_mount: config.firmware.cert_mount.clone(),
            registry: config.firmware.registry.clone(),
            image: config.firmware.image.clone(),
            network: config.firmware.network.clone(),
            timer_period: config.firmware.timer_period.clone(),
            extra_env: config
                .firmware
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Label key/value shared by every container of this device.
    pub fn device_label(&self) -> String {
        format!("device={}", self.device_name)
    }

    pub fn container_name(&self, version: &str) -> String {
        format!("{}-firmware-{version}", self.device_name)
    }

    pub fn image_ref(&self, version: &str) -> String {
        format!("{}/{}:{version}", self.registry, self.image)
    }

    pub fn spec(&self, version: &str) -> ContainerSpec {
        let mut env = vec![
            format!("THING_NAME={}", self.firmware_thing),
            format!("TOPIC=clients/{}/hello/world", self.firmware_thing),
            format!("TIMER_PERIOD={}", self.timer_period),
        ];
        env.extend(self.extra_env.iter().map(|(k, v)| format!("{k}={v}")));

        ContainerSpec {
            name: self.container_name(version),
            image: self.image_ref(version),
            labels: HashMap::from([("device".to_string(), self.device_name.clone())]),
            env,
            binds: vec![format!("{}:{}:ro", self.cert_dir, self.cert_mount)],
            network_mode: self.network.clone(),
        }
    }
}

/// Docker operations used by the firmware executor. Containers are named.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Stop every running container carrying `label` (`key=value`), returning
    /// their names in listing order.
    async fn stop_labelled(&self, label: &str) -> Result<Vec<String>>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn restart(&self, name: &str) -> Result<()>;

    async fn pull(&self, image: &str) -> Result<()>;

    /// Create and start a detached container, returning its id.
    async fn run(&self, spec: &ContainerSpec) -> Result<String>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon (socket or `DOCKER_HOST`).
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn stop_labelled(&self, label: &str) -> Result<Vec<String>> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let options = ListContainersOptions {
            filters: Some(filters),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        let names: Vec<String> = containers
            .into_iter()
            .filter_map(|c| {
                c.names
                    .and_then(|names| names.first().cloned())
                    .map(|name| name.trim_start_matches('/').to_string())
            })
            .collect();

        for name in &names {
            tracing::info!(container = %name, "Stopping container");
            self.docker
                .stop_container(name, None::<StopContainerOptions>)
                .await
                .with_context(|| format!("Failed to stop container {name}"))?;
        }
        Ok(names)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e).context("Failed to inspect container"),
        }
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await
            .with_context(|| format!("Failed to restart container {name}"))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let info = progress.with_context(|| format!("Failed to pull image {image}"))?;
            if let Some(status) = info.status {
                tracing::debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            network_mode: Some(spec.network_mode.clone()),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .context("Failed to create container")?;
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions>)
            .await
            .context("Failed to start container")?;
        Ok(created.id)
    }
}
