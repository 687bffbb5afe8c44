use std::collections::HashMap;
use std::path::PathBuf;
use bollard::container::{Config, CreateContainerOptions, InspectContainerOptions, StartContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use crate::config::ToolchainConfig;
use crate::errors::CegirError;
use tracing::{debug, info};

const ROLE_LABEL: &str = "dev.cegir.role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    Missing,
}

/// Long-lived toolchain container (compiler and symbolic engine). Host
/// directories are bind-mounted at identical paths so harness and artifact
/// paths resolve the same inside and out.
pub struct ContainerManager {
    docker: Docker,
    image: String,
    name: String,
    mounts: Vec<PathBuf>,
}

impl ContainerManager {
    pub async fn new(config: &ToolchainConfig, mounts: Vec<PathBuf>) -> Result<Self, CegirError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| CegirError::Container(format!("Docker daemon unreachable: {}", e)))?;
        Ok(Self { docker, image: config.image(), name: config.container_name(), mounts })
    }

    pub async fn status(&self) -> Result<ContainerStatus, CegirError> {
        match self.docker.inspect_container(&self.name, None::<InspectContainerOptions>).await {
            Ok(details) => {
                let running = details.state.and_then(|s| s.running).unwrap_or(false);
                Ok(if running { ContainerStatus::Running } else { ContainerStatus::Stopped })
            }
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(ContainerStatus::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Reuse the named container when it exists, otherwise create it from
    /// the configured image. The image must already be present locally.
    pub async fn ensure_running(&self) -> Result<(), CegirError> {
        let status = self.status().await?;
        debug!(container = %self.name, ?status, "Toolchain container state");
        match status {
            ContainerStatus::Running => return Ok(()),
            ContainerStatus::Stopped => {}
            ContainerStatus::Missing => self.create().await?,
        }
        self.docker
            .start_container(&self.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| CegirError::Container(format!("Cannot start '{}': {}", self.name, e)))?;
        info!(container = %self.name, image = %self.image, "Toolchain container started");
        Ok(())
    }

    async fn create(&self) -> Result<(), CegirError> {
        if self.docker.inspect_image(&self.image).await.is_err() {
            return Err(CegirError::Config(format!(
                "Toolchain image '{}' is not available locally; pull or build it first",
                self.image
            )));
        }
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(HashMap::from([(ROLE_LABEL.to_string(), "toolchain".to_string())])),
            host_config: Some(HostConfig {
                binds: Some(self.binds()),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions { name: self.name.as_str(), platform: None };
        self.docker.create_container(Some(options), config).await
            .map_err(|e| CegirError::Container(format!("Cannot create '{}': {}", self.name, e)))?;
        info!(container = %self.name, mounts = self.mounts.len(), "Toolchain container created");
        Ok(())
    }

    fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(|p| format!("{0}:{0}", p.display())).collect()
    }

    pub(super) fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
