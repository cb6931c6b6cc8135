// ABOUTME: Provider traits for remote execution environments
// ABOUTME: Narrow capability interface: create/delete, exec, upload, preview URL, shell sessions

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod docker;
pub mod local;
#[cfg(test)]
pub(crate) mod testing;

pub use docker::DockerProvider;
pub use local::LocalProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Parameters for creating a new environment
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSpec {
    /// Image to boot; the provider picks its default when unset
    pub image: Option<String>,
    pub env_vars: HashMap<String, String>,
    /// Ports that must be reachable through `preview_url`
    pub ports: Vec<u16>,
    pub public: bool,
    pub network_allow_list: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Raw result of a command run inside an environment
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    /// Stdout followed by stderr, lossily decoded
    pub fn combined_output(&self) -> String {
        let mut output = String::from_utf8_lossy(&self.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&self.stderr));
        output
    }
}

/// A live remote environment created by a provider
///
/// Non-zero exit codes are returned as data; only transport problems,
/// timeouts and deleted environments produce errors.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Provider-assigned identifier, used as the session id
    fn id(&self) -> &str;

    /// Home directory of the default user, if the provider knows it
    async fn home_dir(&self) -> Result<Option<String>>;

    /// Run a shell command
    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecResult>;

    /// Upload a local file to an absolute remote path
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Upload an in-memory buffer to an absolute remote path
    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<()>;

    /// Externally reachable URL for a port inside the environment
    async fn preview_url(&self, port: u16) -> Result<String>;

    /// Create a named shell session for commands that rely on pipes and redirects
    async fn create_session(&self, session_id: &str) -> Result<()>;

    /// Run a command in a previously created session
    async fn exec_in_session(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Tear down the environment; in-flight commands are terminated
    async fn delete(&self) -> Result<()>;
}

/// Factory for environments of one backend
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    /// Check if the provider is reachable and configured correctly
    async fn is_available(&self) -> Result<bool>;

    /// Create and boot a new environment
    async fn create(&self, spec: &EnvironmentSpec) -> Result<Arc<dyn Environment>>;
}

/// Apply an optional deadline to an exec future
pub(crate) async fn with_timeout<F>(timeout: Option<Duration>, fut: F) -> Result<ExecResult>
where
    F: std::future::Future<Output = Result<ExecResult>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ProviderError::Timeout {
                seconds: limit.as_secs(),
            })?,
        None => fut.await,
    }
}
