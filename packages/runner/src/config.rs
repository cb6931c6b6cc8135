// ABOUTME: Runner options with defaults and environment overrides
// ABOUTME: Mirrors the provider adapter options: image, ports, start command, timeouts, bundle rules

use runner_config::constants::*;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_START_COMMAND: &str = "npm start";
pub const DEFAULT_INSTALL_COMMAND: &str = "npm install --omit=dev";
pub const DEFAULT_LOG_PATH: &str = "/tmp/server.log";
pub const DEFAULT_IMAGE: &str = "node:20-slim";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Which environment provider the binary should construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Docker,
    Local,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(ProviderKind::Docker),
            "local" => Ok(ProviderKind::Local),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// Options applied to every session a runner creates
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Image used when creating environments (provider default when unset)
    pub image: Option<String>,
    /// Whether preview URLs should be publicly reachable
    pub public: bool,
    /// Comma-separated CIDR list for outbound traffic
    pub network_allow_list: Option<String>,
    pub default_port: u16,
    pub default_start_command: String,
    /// Overall readiness timeout used when `StartOptions::timeout` is unset
    pub default_timeout: Duration,
    /// Dependency install command; `None` skips installation
    pub install_command: Option<String>,
    pub install_timeout: Duration,
    pub extract_timeout: Duration,
    pub exec_timeout: Duration,
    /// Remote file the server output is redirected into
    pub log_path: String,
    /// Directory names left out of the bundle archive
    pub bundle_excludes: Vec<String>,
    pub probe_interval: Duration,
    pub probe_attempt_timeout: Duration,
    /// Delete the environment when `prepare` fails instead of leaving it to the caller
    pub cleanup_on_prepare_failure: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            image: None,
            public: false,
            network_allow_list: None,
            default_port: DEFAULT_PORT,
            default_start_command: DEFAULT_START_COMMAND.to_string(),
            default_timeout: Duration::from_secs(60),
            install_command: Some(DEFAULT_INSTALL_COMMAND.to_string()),
            install_timeout: Duration::from_secs(120),
            extract_timeout: Duration::from_secs(60),
            exec_timeout: Duration::from_secs(60),
            log_path: DEFAULT_LOG_PATH.to_string(),
            bundle_excludes: vec!["node_modules".to_string()],
            probe_interval: Duration::from_secs(1),
            probe_attempt_timeout: Duration::from_secs(5),
            cleanup_on_prepare_failure: false,
        }
    }
}

impl RunnerOptions {
    /// Build options from defaults overridden by `SANDBOX_RUNNER_*` variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Ok(image) = env::var(SANDBOX_RUNNER_IMAGE) {
            if !image.trim().is_empty() {
                options.image = Some(image);
            }
        }

        if let Some(public) = parse_var::<bool>(SANDBOX_RUNNER_PUBLIC)? {
            options.public = public;
        }

        if let Ok(allow_list) = env::var(SANDBOX_RUNNER_NETWORK_ALLOW_LIST) {
            if !allow_list.trim().is_empty() {
                options.network_allow_list = Some(allow_list);
            }
        }

        if let Some(port) = parse_var::<u16>(SANDBOX_RUNNER_DEFAULT_PORT)? {
            if port == 0 {
                return Err(ConfigError::PortOutOfRange(port));
            }
            options.default_port = port;
        }

        if let Ok(command) = env::var(SANDBOX_RUNNER_START_COMMAND) {
            if !command.trim().is_empty() {
                options.default_start_command = command;
            }
        }

        if let Some(secs) = parse_var::<u64>(SANDBOX_RUNNER_READY_TIMEOUT_SECS)? {
            options.default_timeout = Duration::from_secs(secs);
        }

        if let Ok(path) = env::var(SANDBOX_RUNNER_LOG_PATH) {
            if !path.trim().is_empty() {
                options.log_path = path;
            }
        }

        // An empty install command disables installation
        if let Ok(command) = env::var(SANDBOX_RUNNER_INSTALL_COMMAND) {
            options.install_command = if command.trim().is_empty() {
                None
            } else {
                Some(command)
            };
        }

        if let Some(secs) = parse_var::<u64>(SANDBOX_RUNNER_INSTALL_TIMEOUT_SECS)? {
            options.install_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(SANDBOX_RUNNER_EXTRACT_TIMEOUT_SECS)? {
            options.extract_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(SANDBOX_RUNNER_EXEC_TIMEOUT_SECS)? {
            options.exec_timeout = Duration::from_secs(secs);
        }

        if let Some(cleanup) = parse_var::<bool>(SANDBOX_RUNNER_CLEANUP_ON_FAILURE)? {
            options.cleanup_on_prepare_failure = cleanup;
        }

        Ok(options)
    }
}

/// Provider selected through `SANDBOX_RUNNER_PROVIDER`, defaulting to Docker
pub fn provider_from_env() -> Result<ProviderKind, ConfigError> {
    match env::var(SANDBOX_RUNNER_PROVIDER) {
        Ok(value) if !value.trim().is_empty() => value.parse(),
        _ => Ok(ProviderKind::Docker),
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    name: name.to_string(),
                    value,
                })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for name in [
            SANDBOX_RUNNER_IMAGE,
            SANDBOX_RUNNER_PUBLIC,
            SANDBOX_RUNNER_DEFAULT_PORT,
            SANDBOX_RUNNER_START_COMMAND,
            SANDBOX_RUNNER_INSTALL_COMMAND,
            SANDBOX_RUNNER_INSTALL_TIMEOUT_SECS,
            SANDBOX_RUNNER_PROVIDER,
        ] {
            env::remove_var(name);
        }
    }

    // Environment mutation is process-wide, so all env cases live in one test
    #[test]
    fn test_options_from_env() {
        clear_env();

        let defaults = RunnerOptions::from_env().unwrap();
        assert_eq!(defaults.default_port, 3000);
        assert_eq!(defaults.default_start_command, "npm start");
        assert_eq!(
            defaults.install_command.as_deref(),
            Some("npm install --omit=dev")
        );
        assert_eq!(provider_from_env().unwrap(), ProviderKind::Docker);

        env::set_var(SANDBOX_RUNNER_DEFAULT_PORT, "4111");
        env::set_var(SANDBOX_RUNNER_INSTALL_COMMAND, "");
        env::set_var(SANDBOX_RUNNER_INSTALL_TIMEOUT_SECS, "300");
        env::set_var(SANDBOX_RUNNER_PUBLIC, "true");
        env::set_var(SANDBOX_RUNNER_PROVIDER, "local");

        let custom = RunnerOptions::from_env().unwrap();
        assert_eq!(custom.default_port, 4111);
        assert!(custom.install_command.is_none());
        assert_eq!(custom.install_timeout, Duration::from_secs(300));
        assert!(custom.public);
        assert_eq!(provider_from_env().unwrap(), ProviderKind::Local);

        env::set_var(SANDBOX_RUNNER_DEFAULT_PORT, "not-a-port");
        assert!(matches!(
            RunnerOptions::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        env::set_var(SANDBOX_RUNNER_DEFAULT_PORT, "0");
        assert!(matches!(
            RunnerOptions::from_env(),
            Err(ConfigError::PortOutOfRange(0))
        ));

        clear_env();
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Docker".parse::<ProviderKind>().unwrap(), ProviderKind::Docker);
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!("daytona".parse::<ProviderKind>().is_err());
    }
}
