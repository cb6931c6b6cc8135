// ABOUTME: FUSE storage mounts for S3-compatible and GCS buckets
// ABOUTME: Every operation takes an explicit MountContext; there is no global mount state

pub mod config;
pub mod fuse;
pub mod platform;
pub mod validate;

pub use config::{GcsMountConfig, MountConfig, S3Credentials, S3MountConfig};
pub use fuse::{mount, mount_or_unavailable, unmount, unmount_all, MountStatus, UnmountReport};
pub use platform::{
    find_tool, get_active_fuse_mounts, get_install_instructions, is_mount_point, unmount_fuse,
};
pub use validate::{validate_bucket_name, validate_endpoint};

use crate::command::{CommandRunner, HostCommandRunner};
use crate::logger::{Logger, TracingLogger};
use std::fmt;
use std::sync::Arc;

/// Operating system family the mount commands are issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Other(String),
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "macos" | "darwin" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::MacOs => f.write_str("macos"),
            Platform::Other(name) => f.write_str(name),
        }
    }
}

/// Command runner, target platform and logger shared by mount operations
#[derive(Clone)]
pub struct MountContext {
    pub runner: Arc<dyn CommandRunner>,
    pub platform: Platform,
    pub logger: Arc<dyn Logger>,
}

impl MountContext {
    pub fn new(runner: Arc<dyn CommandRunner>, platform: Platform, logger: Arc<dyn Logger>) -> Self {
        Self {
            runner,
            platform,
            logger,
        }
    }

    /// Context for mounting on the machine this process runs on
    pub fn host() -> Self {
        Self::new(
            Arc::new(HostCommandRunner),
            Platform::current(),
            TracingLogger::shared("mounts"),
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_os() {
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("macos"), Platform::MacOs);
        assert_eq!(Platform::from_os("darwin"), Platform::MacOs);
        assert_eq!(
            Platform::from_os("windows"),
            Platform::Other("windows".to_string())
        );
        assert_eq!(Platform::MacOs.to_string(), "macos");
    }
}
