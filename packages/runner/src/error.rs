// ABOUTME: Error types for sandbox runner and mount operations
// ABOUTME: Separates lookup, transport, mount tooling, and validation failures so callers can react per kind

use crate::config::ConfigError;
use crate::providers::ProviderError;
use std::fmt;
use thiserror::Error;

/// Step of the bundle transport that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    Archive,
    Upload,
    Extract,
    Install,
}

impl fmt::Display for TransportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TransportStage::Archive => "archive",
            TransportStage::Upload => "upload",
            TransportStage::Extract => "extraction",
            TransportStage::Install => "dependency installation",
        };
        f.write_str(stage)
    }
}

/// Main error type for runner and mount operations
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Operation referenced a session id the registry does not know
    #[error("Session {0} not found")]
    NotFound(String),

    /// A required FUSE tool (s3fs, gcsfuse, macFUSE) is not installed
    #[error("{tool} is not installed. {instructions}")]
    ToolNotFound { tool: String, instructions: String },

    /// Bundle setup failed inside the environment
    #[error("Bundle {stage} failed for session {session_id} (exit {exit_code}): {output}")]
    TransportFailure {
        session_id: String,
        stage: TransportStage,
        exit_code: i64,
        output: String,
    },

    /// Every step of the platform unmount chain failed
    #[error("Failed to unmount {path}: {last_error}")]
    UnmountExhausted { path: String, last_error: String },

    /// Malformed bucket name, endpoint, or mount configuration
    #[error("Validation error: {0}")]
    Validation(String),

    /// `start` could not find or create a pending session
    #[error("Failed to find a prepared session for port {port}")]
    NoPreparedSession { port: u16 },

    /// Host command exceeded its timeout
    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Mount command failed for a reason other than a missing tool
    #[error("Mount error: {0}")]
    Mount(String),

    /// Provider adapter error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RunnerError {
    /// True when the error only means a mount helper is missing on the host
    pub fn is_tool_not_found(&self) -> bool {
        matches!(self, RunnerError::ToolNotFound { .. })
    }
}

/// Type alias for Results that return RunnerError
pub type Result<T> = std::result::Result<T, RunnerError>;
