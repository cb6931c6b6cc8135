// ABOUTME: Docker provider implementation for container-backed sandbox environments
// ABOUTME: Uses bollard to boot long-lived containers, exec shell commands, and upload tar payloads

use super::{
    with_timeout, Environment, EnvironmentSpec, ExecResult, ProviderError, Result,
    SandboxProvider,
};
use crate::config::DEFAULT_IMAGE;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        UploadToContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const LABEL_PREFIX: &str = "sandbox-runner";

pub struct DockerProvider {
    client: Docker,
    default_image: String,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Connect with default settings and a 10 minute pull timeout
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            default_image: DEFAULT_IMAGE.to_string(),
            pull_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Convert an environment spec to a bollard container config
    fn to_bollard_config(&self, spec: &EnvironmentSpec) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(format!("{}.managed", LABEL_PREFIX), "true".to_string());

        let host_ip = if spec.public { "0.0.0.0" } else { "127.0.0.1" };
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();

        for port in &spec.ports {
            let container_port = format!("{}/tcp", port);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            // Empty host port lets the daemon pick a free one
            let binding = vec![PortBinding {
                host_ip: Some(host_ip.to_string()),
                host_port: Some(String::new()),
            }];
            port_bindings.insert(container_port, Some(binding));
        }

        let env: Vec<String> = spec
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        Config {
            image: Some(
                spec.image
                    .clone()
                    .unwrap_or_else(|| self.default_image.clone()),
            ),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            debug!("Pull status: {}", status);
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    /// Read container port -> host port bindings after start
    async fn published_ports(&self, container_id: &str) -> Result<HashMap<u16, u16>> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut ports = HashMap::new();
        let port_map = inspect.network_settings.and_then(|ns| ns.ports);
        for (container_port, bindings) in port_map.into_iter().flatten() {
            let host_port = bindings
                .and_then(|b| b.into_iter().next())
                .and_then(|b| b.host_port);
            // Container port format: "3000/tcp"
            let container_port = container_port
                .split('/')
                .next()
                .and_then(|p| p.parse::<u16>().ok());
            if let (Some(container_port), Some(host_port)) =
                (container_port, host_port.and_then(|p| p.parse::<u16>().ok()))
            {
                ports.insert(container_port, host_port);
            }
        }

        Ok(ports)
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create(&self, spec: &EnvironmentSpec) -> Result<Arc<dyn Environment>> {
        let config = self.to_bollard_config(spec);
        let image = config.image.clone().unwrap_or_default();

        if !self.image_exists(&image).await? {
            self.pull_image(&image).await?;
        }

        if spec.network_allow_list.is_some() {
            debug!("Docker provider does not enforce network allow lists; ignoring");
        }

        let name = format!("{}-{}", LABEL_PREFIX, uuid::Uuid::new_v4().simple());
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        self.client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let host_ports = self.published_ports(&container.id).await?;
        info!("Started container {} ({})", name, container.id);

        Ok(Arc::new(DockerEnvironment {
            client: self.client.clone(),
            id: container.id,
            host_ports,
            sessions: RwLock::new(HashSet::new()),
        }))
    }
}

/// One running container
pub struct DockerEnvironment {
    client: Docker,
    id: String,
    host_ports: HashMap<u16, u16>,
    sessions: RwLock<HashSet<String>>,
}

impl DockerEnvironment {
    async fn run(&self, command: &str) -> Result<ExecResult> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(&self.id, exec_config)
            .await
            .map_err(|e| map_container_error(&self.id, e))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => return Err(ProviderError::ContainerError(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::ContainerError(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        Ok(ExecResult {
            exit_code: exec_inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn home_dir(&self) -> Result<Option<String>> {
        let result = self.run("printf %s \"$HOME\"").await?;
        let home = String::from_utf8_lossy(&result.stdout).trim().to_string();
        Ok(if result.exit_code == 0 && !home.is_empty() {
            Some(home)
        } else {
            None
        })
    }

    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecResult> {
        debug!("Executing in container {}: {}", self.id, command);
        with_timeout(timeout, self.run(command)).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            ProviderError::ConfigError(format!(
                "Failed to read {}: {}",
                local_path.display(),
                e
            ))
        })?;
        self.upload_bytes(&data, remote_path).await
    }

    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<()> {
        let remote = Path::new(remote_path);
        let (parent, file_name) = match (remote.parent(), remote.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(ProviderError::ConfigError(format!(
                    "Invalid remote path: {}",
                    remote_path
                )))
            }
        };

        info!(
            "Uploading {} bytes to container {}:{}",
            data.len(),
            self.id,
            remote_path
        );

        let tar_data = single_file_tar(file_name, data)
            .map_err(|e| ProviderError::InternalError(e.to_string()))?;

        let options = UploadToContainerOptions {
            path: parent.to_string_lossy().into_owned(),
            ..Default::default()
        };

        self.client
            .upload_to_container(&self.id, Some(options), tar_data.into())
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        Ok(())
    }

    async fn preview_url(&self, port: u16) -> Result<String> {
        self.host_ports
            .get(&port)
            .map(|host_port| format!("http://127.0.0.1:{}", host_port))
            .ok_or_else(|| {
                ProviderError::NotSupported(format!(
                    "Port {} was not published when container {} was created",
                    port, self.id
                ))
            })
    }

    async fn create_session(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.insert(session_id.to_string());
        Ok(())
    }

    async fn exec_in_session(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        if !self.sessions.read().await.contains(session_id) {
            return Err(ProviderError::NotFound(format!(
                "Shell session {}",
                session_id
            )));
        }
        // Every exec already runs under `sh -c`, so pipes and redirects behave
        self.exec(command, timeout).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Removing container: {}", self.id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(&self.id, Some(options)).await {
            Ok(_) => Ok(()),
            // Container already removed is not an error
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", self.id);
                Ok(())
            }
            Err(e) => Err(ProviderError::ContainerError(e.to_string())),
        }
    }
}

fn map_container_error(container_id: &str, error: bollard::errors::Error) -> ProviderError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ProviderError::NotFound(format!("Container {}", container_id)),
        e => ProviderError::ContainerError(e.to_string()),
    }
}

fn single_file_tar(file_name: &std::ffi::OsStr, data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, data)?;
    archive.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Option<DockerProvider> {
        // Building a client does not contact the daemon
        DockerProvider::new().ok()
    }

    #[test]
    fn test_container_config_conversion() {
        let Some(provider) = provider() else {
            return;
        };

        let spec = EnvironmentSpec {
            image: None,
            env_vars: HashMap::from([("FOO".to_string(), "bar".to_string())]),
            ports: vec![4111],
            public: false,
            network_allow_list: None,
            labels: HashMap::new(),
        };

        let config = provider.to_bollard_config(&spec);

        assert_eq!(config.image.as_deref(), Some(DEFAULT_IMAGE));
        assert_eq!(config.env, Some(vec!["FOO=bar".to_string()]));
        assert!(config.exposed_ports.unwrap().contains_key("4111/tcp"));

        let bindings = config
            .host_config
            .and_then(|hc| hc.port_bindings)
            .expect("port bindings");
        let binding = bindings["4111/tcp"].as_ref().unwrap()[0].clone();
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get("sandbox-runner.managed").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_public_spec_binds_all_interfaces() {
        let Some(provider) = provider() else {
            return;
        };

        let spec = EnvironmentSpec {
            image: Some("alpine:latest".to_string()),
            ports: vec![3000],
            public: true,
            ..Default::default()
        };

        let config = provider.to_bollard_config(&spec);
        assert_eq!(config.image.as_deref(), Some("alpine:latest"));
        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings["3000/tcp"].as_ref().unwrap()[0].clone();
        assert_eq!(binding.host_ip.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn test_single_file_tar_contains_one_entry() {
        let data = single_file_tar(std::ffi::OsStr::new("bundle.tar.gz"), b"payload").unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["bundle.tar.gz".to_string()]);
    }

    #[tokio::test]
    async fn test_with_timeout_reports_seconds() {
        let result = with_timeout(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ExecResult::default())
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout { seconds: 0 })));
    }
}
