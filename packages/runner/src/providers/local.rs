// ABOUTME: Host-process provider that runs each environment in a private temp directory
// ABOUTME: Used for development without a container daemon and by the integration tests

use super::{
    with_timeout, Environment, EnvironmentSpec, ExecResult, ProviderError, Result,
    SandboxProvider,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Creates environments as temp directories on the host
#[derive(Debug, Clone, Default)]
pub struct LocalProvider {
    base_dir: Option<PathBuf>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place environment directories under `base_dir` instead of the system temp dir
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(cfg!(unix))
    }

    async fn create(&self, spec: &EnvironmentSpec) -> Result<Arc<dyn Environment>> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sandbox-");
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| ProviderError::InternalError(format!("Failed to create temp dir: {}", e)))?;

        let id = format!("local-{}", uuid::Uuid::new_v4().simple());
        let root = dir.path().to_path_buf();
        let (shutdown, _) = watch::channel(false);

        info!("Created local environment {} at {}", id, root.display());

        Ok(Arc::new(LocalEnvironment {
            id,
            root,
            dir: Mutex::new(Some(dir)),
            env_vars: spec.env_vars.clone(),
            sessions: RwLock::new(HashSet::new()),
            shutdown,
        }))
    }
}

pub struct LocalEnvironment {
    id: String,
    root: PathBuf,
    dir: Mutex<Option<TempDir>>,
    env_vars: HashMap<String, String>,
    sessions: RwLock<HashSet<String>>,
    shutdown: watch::Sender<bool>,
}

impl LocalEnvironment {
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_deleted(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn resolve(&self, remote_path: &str) -> PathBuf {
        let path = Path::new(remote_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    async fn run(&self, command: &str) -> Result<ExecResult> {
        if self.is_deleted() {
            return Err(ProviderError::NotFound(format!("Environment {}", self.id)));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env("HOME", &self.root)
            .envs(&self.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so everything the shell starts can be signalled together
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ProviderError::InternalError(format!("Failed to spawn sh: {}", e)))?;
        let group = ProcessGroupGuard::new(child.id());

        let mut shutdown = self.shutdown.subscribe();

        // Timeouts drop this future and deletion takes the second branch; both
        // leave `group` armed so the whole process tree is killed
        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| ProviderError::InternalError(e.to_string()))?;
                group.disarm();
                Ok(ExecResult {
                    exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            _ = shutdown.wait_for(|deleted| *deleted) => {
                Err(ProviderError::NotFound(format!("Environment {} was deleted", self.id)))
            }
        }
    }
}

/// Sends SIGKILL to a command's process group when dropped, unless disarmed
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The command finished on its own; leave its group alone
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;

                match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                    Ok(()) => debug!("Killed process group {}", pgid),
                    Err(e) => debug!("Process group {} already gone: {}", pgid, e),
                }
            }
            #[cfg(not(unix))]
            {
                debug!("Cannot signal process group {} on this platform", pgid);
            }
        }
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn home_dir(&self) -> Result<Option<String>> {
        Ok(Some(self.root.to_string_lossy().into_owned()))
    }

    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecResult> {
        debug!("Executing in {}: {}", self.id, command);
        with_timeout(timeout, self.run(command)).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            ProviderError::ConfigError(format!("Failed to read {}: {}", local_path.display(), e))
        })?;
        self.upload_bytes(&data, remote_path).await
    }

    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<()> {
        if self.is_deleted() {
            return Err(ProviderError::NotFound(format!("Environment {}", self.id)));
        }

        let target = self.resolve(remote_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::InternalError(e.to_string()))?;
        }
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| ProviderError::InternalError(e.to_string()))?;
        Ok(())
    }

    async fn preview_url(&self, port: u16) -> Result<String> {
        Ok(format!("http://localhost:{}", port))
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
        self.exec(command, timeout).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting local environment {}", self.id);
        self.shutdown.send_replace(true);

        let dir = self
            .dir
            .lock()
            .map_err(|_| ProviderError::InternalError("Environment lock poisoned".to_string()))?
            .take();
        if let Some(dir) = dir {
            dir.close()
                .map_err(|e| ProviderError::InternalError(e.to_string()))?;
        }
        Ok(())
    }
}
