// ABOUTME: Test doubles wrapping the local provider with injected faults
// ABOUTME: Used to drive upload, extraction and preview URL failure paths

use super::{
    Environment, EnvironmentSpec, ExecResult, LocalProvider, ProviderError, Result,
    SandboxProvider,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    UploadFails,
    /// Garbage lands at the remote path instead of the uploaded file
    UploadCorrupt,
    PreviewFails,
}

/// Local environment that misbehaves in one configured way
pub struct FaultyEnvironment {
    inner: Arc<dyn Environment>,
    fault: Fault,
    uploaded_from: Mutex<Option<PathBuf>>,
}

impl FaultyEnvironment {
    pub async fn local(fault: Fault) -> Self {
        let inner = LocalProvider::new()
            .create(&EnvironmentSpec::default())
            .await
            .unwrap();
        Self {
            inner,
            fault,
            uploaded_from: Mutex::new(None),
        }
    }

    /// Local file handed to the last `upload_file` call
    pub fn uploaded_from(&self) -> Option<PathBuf> {
        self.uploaded_from.lock().unwrap().clone()
    }
}

#[async_trait]
impl Environment for FaultyEnvironment {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn home_dir(&self) -> Result<Option<String>> {
        self.inner.home_dir().await
    }

    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<ExecResult> {
        self.inner.exec(command, timeout).await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        assert!(local_path.exists());
        *self.uploaded_from.lock().unwrap() = Some(local_path.to_path_buf());

        match self.fault {
            Fault::UploadFails => Err(ProviderError::ContainerError(
                "upload rejected".to_string(),
            )),
            Fault::UploadCorrupt => {
                self.inner
                    .upload_bytes(b"definitely not gzip", remote_path)
                    .await
            }
            Fault::PreviewFails => self.inner.upload_file(local_path, remote_path).await,
        }
    }

    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<()> {
        self.inner.upload_bytes(data, remote_path).await
    }

    async fn preview_url(&self, port: u16) -> Result<String> {
        if self.fault == Fault::PreviewFails {
            return Err(ProviderError::NotSupported(format!(
                "Port {} is not exposed",
                port
            )));
        }
        self.inner.preview_url(port).await
    }

    async fn create_session(&self, session_id: &str) -> Result<()> {
        self.inner.create_session(session_id).await
    }

    async fn exec_in_session(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecResult> {
        self.inner
            .exec_in_session(session_id, command, timeout)
            .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.delete_session(session_id).await
    }

    async fn delete(&self) -> Result<()> {
        self.inner.delete().await
    }
}

/// Provider handing out `FaultyEnvironment`s
pub struct FaultyProvider {
    pub fault: Fault,
}

#[async_trait]
impl SandboxProvider for FaultyProvider {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create(&self, _spec: &EnvironmentSpec) -> Result<Arc<dyn Environment>> {
        Ok(Arc::new(FaultyEnvironment::local(self.fault).await))
    }
}
