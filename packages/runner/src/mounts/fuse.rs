// ABOUTME: Mount and unmount procedures for s3fs and gcsfuse
// ABOUTME: Missing tools surface as ToolNotFound so callers can downgrade them to an unavailable mount

use super::config::{GcsMountConfig, MountConfig, S3MountConfig};
use super::platform::{
    find_tool, get_active_fuse_mounts, get_install_instructions, is_mount_point, unmount_fuse,
};
use super::{MountContext, Platform};
use crate::error::{Result, RunnerError};
use serde::Serialize;
use std::time::Duration;

const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);
const MACFUSE_BUNDLE: &str = "/Library/Filesystems/macfuse.fs";

/// Outcome of a mount request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MountStatus {
    Mounted { path: String },
    /// Something is already mounted at the path; it was left untouched
    AlreadyMounted { path: String },
    /// A required FUSE tool is missing on this machine
    Unavailable { reason: String },
}

/// Result of `unmount_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmountReport {
    pub unmounted: Vec<String>,
    /// Path and error message for every mount that could not be released
    pub failed: Vec<(String, String)>,
}

impl UnmountReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Mount a bucket at its configured path
pub async fn mount(config: &MountConfig, ctx: &MountContext) -> Result<MountStatus> {
    config.validate()?;
    let path = config.mount_path();

    if is_mount_point(path, ctx).await {
        ctx.logger
            .info(&format!("{} is already a mount point, skipping", path));
        return Ok(MountStatus::AlreadyMounted {
            path: path.to_string(),
        });
    }

    require_tools(config.tool(), ctx).await?;

    run_checked(ctx, "mkdir", &["-p", path], SETUP_TIMEOUT).await?;

    ctx.logger.info(&format!(
        "Mounting {} bucket {} at {}",
        config.tool(),
        config.bucket(),
        path
    ));

    match config {
        MountConfig::S3(s3) => mount_s3(s3, ctx).await?,
        MountConfig::Gcs(gcs) => mount_gcs(gcs, ctx).await?,
    }

    if !is_mount_point(path, ctx).await {
        return Err(RunnerError::Mount(format!(
            "{} reported success but {} is not a mount point",
            config.tool(),
            path
        )));
    }

    ctx.logger.info(&format!("Mounted {} at {}", config.bucket(), path));
    Ok(MountStatus::Mounted {
        path: path.to_string(),
    })
}

/// Like `mount`, but a missing tool becomes `MountStatus::Unavailable` with a warning
pub async fn mount_or_unavailable(config: &MountConfig, ctx: &MountContext) -> Result<MountStatus> {
    match mount(config, ctx).await {
        Err(e) if e.is_tool_not_found() => {
            ctx.logger.warn(&format!(
                "Mount of {} at {} unavailable: {}",
                config.bucket(),
                config.mount_path(),
                e
            ));
            Ok(MountStatus::Unavailable {
                reason: e.to_string(),
            })
        }
        other => other,
    }
}

pub async fn unmount(path: &str, ctx: &MountContext) -> Result<()> {
    unmount_fuse(path, ctx).await
}

/// Unmount every active FUSE mount, continuing past failures
pub async fn unmount_all(ctx: &MountContext) -> UnmountReport {
    let mut report = UnmountReport::default();

    for path in get_active_fuse_mounts(ctx).await {
        match unmount_fuse(&path, ctx).await {
            Ok(()) => report.unmounted.push(path),
            Err(e) => {
                ctx.logger.error(&e.to_string());
                report.failed.push((path, e.to_string()));
            }
        }
    }

    report
}

async fn require_tools(tool: &str, ctx: &MountContext) -> Result<()> {
    if ctx.platform == Platform::MacOs {
        let fuse_layer = ctx
            .runner
            .run("test", &["-d", MACFUSE_BUNDLE], Some(SETUP_TIMEOUT))
            .await;
        if !matches!(fuse_layer, Ok(output) if output.success()) {
            return Err(tool_not_found("macfuse", &ctx.platform));
        }
    }

    match find_tool(tool, ctx).await {
        Some(path) => {
            ctx.logger.debug(&format!("Found {} at {}", tool, path));
            Ok(())
        }
        None => Err(tool_not_found(tool, &ctx.platform)),
    }
}

fn tool_not_found(tool: &str, platform: &Platform) -> RunnerError {
    RunnerError::ToolNotFound {
        tool: tool.to_string(),
        instructions: get_install_instructions(tool, platform),
    }
}

/// Location of the per-bucket s3fs password file
pub fn s3fs_passwd_path(bucket: &str) -> String {
    format!("/tmp/.passwd-s3fs-{}", bucket)
}

async fn mount_s3(config: &S3MountConfig, ctx: &MountContext) -> Result<()> {
    let mut options: Vec<String> = Vec::new();

    match &config.credentials {
        Some(credentials) => {
            let passwd_file = s3fs_passwd_path(&config.bucket);
            let passwd_line = credentials.passwd_line();
            // s3fs refuses password files readable by others
            run_checked(
                ctx,
                "sh",
                &[
                    "-c",
                    "umask 077 && printf '%s\\n' \"$1\" > \"$2\" && chmod 600 \"$2\"",
                    "sh",
                    passwd_line.as_str(),
                    passwd_file.as_str(),
                ],
                SETUP_TIMEOUT,
            )
            .await?;
            options.push(format!("passwd_file={}", passwd_file));
        }
        None => options.push("public_bucket=1".to_string()),
    }

    if let Some(endpoint) = &config.endpoint {
        options.push(format!("url={}", endpoint));
    }
    if let Some(region) = &config.region {
        options.push(format!("endpoint={}", region));
    }
    if config.path_style {
        options.push("use_path_request_style".to_string());
    }
    if config.read_only {
        options.push("ro".to_string());
    }

    let mut args: Vec<&str> = vec![config.bucket.as_str(), config.mount_path.as_str()];
    for option in &options {
        args.push("-o");
        args.push(option);
    }

    run_checked(ctx, "s3fs", &args, MOUNT_TIMEOUT).await
}

async fn mount_gcs(config: &GcsMountConfig, ctx: &MountContext) -> Result<()> {
    let mut args: Vec<String> = vec!["--implicit-dirs".to_string()];

    if let Some(key_file) = &config.key_file {
        args.push(format!("--key-file={}", key_file));
    }
    if let Some(endpoint) = &config.endpoint {
        args.push(format!("--custom-endpoint={}", endpoint));
    }
    if config.read_only {
        args.push("-o".to_string());
        args.push("ro".to_string());
    }
    args.push(config.bucket.clone());
    args.push(config.mount_path.clone());

    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_checked(ctx, "gcsfuse", &args, MOUNT_TIMEOUT).await
}

async fn run_checked(
    ctx: &MountContext,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<()> {
    let output = ctx.runner.run(program, args, Some(timeout)).await?;
    if output.success() {
        Ok(())
    } else {
        Err(RunnerError::Mount(format!(
            "{} exited with {}: {}",
            program,
            output.exit_code,
            output.diagnostic()
        )))
    }
}
