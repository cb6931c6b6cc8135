// ABOUTME: Bundle transport that packs a build output directory and installs it in an environment
// ABOUTME: Archive, upload, remote extract and dependency install, each failing with its own stage

use crate::command::{run_in_session, shell_quote, CommandResult};
use crate::config::RunnerOptions;
use crate::error::{Result, RunnerError, TransportStage};
use crate::logger::Logger;
use crate::providers::Environment;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub const BUNDLE_FILE_NAME: &str = "bundle.tar.gz";

/// Pack `source` into a gzip tarball, skipping directories named in `excludes` at any depth
///
/// The archive is removed from disk when the returned handle is dropped.
pub fn create_archive(source: &Path, excludes: &[String]) -> std::io::Result<NamedTempFile> {
    let archive_file = tempfile::Builder::new()
        .prefix("bundle-")
        .suffix(".tar.gz")
        .tempfile()?;

    let encoder = GzEncoder::new(archive_file.reopen()?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    append_dir_contents(&mut builder, source, Path::new(""), excludes)?;
    builder.into_inner()?.finish()?;

    Ok(archive_file)
}

fn append_dir_contents<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    prefix: &Path,
    excludes: &[String],
) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let path = entry.path();
        let archive_path = prefix.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if excludes.iter().any(|exclude| name.to_string_lossy() == exclude.as_str()) {
                continue;
            }
            builder.append_dir(&archive_path, &path)?;
            append_dir_contents(builder, &path, &archive_path, excludes)?;
        } else {
            builder.append_path_with_name(&path, &archive_path)?;
        }
    }

    Ok(())
}

/// Moves a bundle into an environment and prepares it to run
#[derive(Clone)]
pub struct BundleTransport {
    excludes: Vec<String>,
    extract_timeout: Duration,
    install_command: Option<String>,
    install_timeout: Duration,
    logger: Arc<dyn Logger>,
}

impl BundleTransport {
    pub fn new(options: &RunnerOptions, logger: Arc<dyn Logger>) -> Self {
        Self {
            excludes: options.bundle_excludes.clone(),
            extract_timeout: options.extract_timeout,
            install_command: options.install_command.clone(),
            install_timeout: options.install_timeout,
            logger,
        }
    }

    /// Archive `source`, upload it to `root_dir`, extract it there and install dependencies
    pub async fn deliver(&self, env: &dyn Environment, source: &Path, root_dir: &str) -> Result<()> {
        let session_id = env.id().to_string();

        self.logger
            .info(&format!("[{}] Archiving {}", session_id, source.display()));
        let source_dir = source.to_path_buf();
        let excludes = self.excludes.clone();
        let archive = tokio::task::spawn_blocking(move || create_archive(&source_dir, &excludes))
            .await
            .map_err(|e| failure(&session_id, TransportStage::Archive, e))?
            .map_err(|e| failure(&session_id, TransportStage::Archive, e))?;

        let remote_path = format!("{}/{}", root_dir.trim_end_matches('/'), BUNDLE_FILE_NAME);
        self.logger
            .info(&format!("[{}] Uploading bundle to {}", session_id, remote_path));
        let uploaded = env.upload_file(archive.path(), &remote_path).await;
        // Local archive goes away regardless of the upload outcome
        drop(archive);
        uploaded.map_err(|e| failure(&session_id, TransportStage::Upload, e))?;

        let root = shell_quote(root_dir);
        self.logger
            .info(&format!("[{}] Extracting bundle", session_id));
        let extract = format!(
            "cd {} && tar -xzf {} && rm {}",
            root, BUNDLE_FILE_NAME, BUNDLE_FILE_NAME
        );
        self.run_stage(env, &session_id, TransportStage::Extract, &extract, self.extract_timeout)
            .await?;

        if let Some(install) = &self.install_command {
            self.logger
                .info(&format!("[{}] Installing dependencies: {}", session_id, install));
            let command = format!("cd {} && {}", root, install);
            self.run_stage(env, &session_id, TransportStage::Install, &command, self.install_timeout)
                .await?;
        }

        Ok(())
    }

    async fn run_stage(
        &self,
        env: &dyn Environment,
        session_id: &str,
        stage: TransportStage,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let result = run_in_session(env, command, Some(timeout))
            .await
            .map_err(|e| failure(session_id, stage, e))?;

        if !result.success() {
            self.logger.error(&format!(
                "[{}] Bundle {} exited with {}",
                session_id, stage, result.exit_code
            ));
            return Err(RunnerError::TransportFailure {
                session_id: session_id.to_string(),
                stage,
                exit_code: result.exit_code,
                output: result.output,
            });
        }

        Ok(result)
    }
}

/// Failure that never produced a remote exit code
fn failure(session_id: &str, stage: TransportStage, error: impl std::fmt::Display) -> RunnerError {
    RunnerError::TransportFailure {
        session_id: session_id.to_string(),
        stage,
        exit_code: -1,
        output: error.to_string(),
    }
}
