// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names read by the sandbox runner

// Provider Selection
pub const SANDBOX_RUNNER_PROVIDER: &str = "SANDBOX_RUNNER_PROVIDER";
pub const SANDBOX_RUNNER_IMAGE: &str = "SANDBOX_RUNNER_IMAGE";
pub const SANDBOX_RUNNER_PUBLIC: &str = "SANDBOX_RUNNER_PUBLIC";
pub const SANDBOX_RUNNER_NETWORK_ALLOW_LIST: &str = "SANDBOX_RUNNER_NETWORK_ALLOW_LIST";

// Server Defaults
pub const SANDBOX_RUNNER_DEFAULT_PORT: &str = "SANDBOX_RUNNER_DEFAULT_PORT";
pub const SANDBOX_RUNNER_START_COMMAND: &str = "SANDBOX_RUNNER_START_COMMAND";
pub const SANDBOX_RUNNER_READY_TIMEOUT_SECS: &str = "SANDBOX_RUNNER_READY_TIMEOUT_SECS";
pub const SANDBOX_RUNNER_LOG_PATH: &str = "SANDBOX_RUNNER_LOG_PATH";

// Bundle Transport
pub const SANDBOX_RUNNER_INSTALL_COMMAND: &str = "SANDBOX_RUNNER_INSTALL_COMMAND";
pub const SANDBOX_RUNNER_INSTALL_TIMEOUT_SECS: &str = "SANDBOX_RUNNER_INSTALL_TIMEOUT_SECS";
pub const SANDBOX_RUNNER_EXTRACT_TIMEOUT_SECS: &str = "SANDBOX_RUNNER_EXTRACT_TIMEOUT_SECS";
pub const SANDBOX_RUNNER_CLEANUP_ON_FAILURE: &str = "SANDBOX_RUNNER_CLEANUP_ON_FAILURE";

// Command Execution
pub const SANDBOX_RUNNER_EXEC_TIMEOUT_SECS: &str = "SANDBOX_RUNNER_EXEC_TIMEOUT_SECS";

// Variables injected into the remote server process
pub const PORT: &str = "PORT";
pub const SERVER_HOST: &str = "SERVER_HOST";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
