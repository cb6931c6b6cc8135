// ABOUTME: Sandbox runner orchestrating prepare, start, stop, exec, status and log retrieval
// ABOUTME: Drives one provider, keeps sessions in the registry and reports server failures asynchronously

use crate::command::{run_in_session, shell_quote, CommandResult};
use crate::config::RunnerOptions;
use crate::error::{Result, RunnerError};
use crate::logger::{Logger, TracingLogger};
use crate::providers::{Environment, EnvironmentSpec, SandboxProvider};
use crate::readiness::ReadinessProbe;
use crate::registry::{Session, SessionRegistry, SessionStatus};
use crate::transport::BundleTransport;
use chrono::Utc;
use runner_config::constants::{PORT, SERVER_HOST, SERVER_PORT, SERVER_PROTOCOL};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Used when the environment cannot report a home directory
const FALLBACK_ROOT_DIR: &str = "/tmp";
const DEFAULT_LOG_TAIL: usize = 100;

/// Parameters for `SandboxRunner::start`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Build output directory to ship when no prepared session exists
    pub output_directory: PathBuf,
    pub env_vars: HashMap<String, String>,
    pub port: Option<u16>,
    pub start_command: Option<String>,
    /// Readiness deadline
    pub timeout: Option<Duration>,
}

impl StartOptions {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            ..Default::default()
        }
    }
}

/// Lifecycle manager for sandbox sessions backed by a single provider
pub struct SandboxRunner {
    provider: Arc<dyn SandboxProvider>,
    options: RunnerOptions,
    registry: SessionRegistry,
    transport: BundleTransport,
    logger: Arc<dyn Logger>,
}

impl SandboxRunner {
    pub fn new(provider: Arc<dyn SandboxProvider>, options: RunnerOptions) -> Self {
        Self::with_logger(provider, options, TracingLogger::shared("sandbox-runner"))
    }

    pub fn with_logger(
        provider: Arc<dyn SandboxProvider>,
        options: RunnerOptions,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let transport = BundleTransport::new(&options, logger.clone());
        Self {
            provider,
            options,
            registry: SessionRegistry::new(),
            transport,
            logger,
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Create an environment, ship the bundle into it and leave it `pending`
    pub async fn prepare(
        &self,
        output_directory: &Path,
        env_vars: HashMap<String, String>,
        port: Option<u16>,
    ) -> Result<Session> {
        self.prepare_session(output_directory, env_vars, port, false)
            .await
    }

    /// `claimed` keeps a session prepared by `start` away from concurrent `start` calls
    async fn prepare_session(
        &self,
        output_directory: &Path,
        env_vars: HashMap<String, String>,
        port: Option<u16>,
        claimed: bool,
    ) -> Result<Session> {
        let port = port.unwrap_or(self.options.default_port);

        self.logger.info(&format!(
            "Creating {} sandbox for port {}",
            self.provider.name(),
            port
        ));

        let spec = EnvironmentSpec {
            image: self.options.image.clone(),
            env_vars,
            ports: vec![port],
            public: self.options.public,
            network_allow_list: self.options.network_allow_list.clone(),
            labels: HashMap::new(),
        };
        let env = self.provider.create(&spec).await?;
        let id = env.id().to_string();

        let session = Session::new(&id, SessionStatus::Preparing, Some(port));
        if claimed {
            self.registry.insert_claimed(session, env.clone()).await;
        } else {
            self.registry.insert(session, env.clone()).await;
        }

        let root_dir = self.root_dir(env.as_ref()).await;
        if let Err(e) = self
            .transport
            .deliver(env.as_ref(), output_directory, &root_dir)
            .await
        {
            self.logger
                .error(&format!("Preparing sandbox {} failed: {}", id, e));
            self.registry.set_status(&id, SessionStatus::Error).await;

            if self.options.cleanup_on_prepare_failure {
                self.registry.remove(&id).await;
                if let Err(delete_err) = env.delete().await {
                    self.logger.warn(&format!(
                        "Failed to delete sandbox {} after prepare failure: {}",
                        id, delete_err
                    ));
                }
            }
            return Err(e);
        }

        self.registry.set_status(&id, SessionStatus::Pending).await;
        self.logger.info(&format!("Sandbox {} prepared", id));

        self.registry
            .get(&id)
            .await
            .ok_or_else(|| RunnerError::NotFound(id))
    }

    /// Start the server in a prepared session, preparing one first if needed
    pub async fn start(&self, options: StartOptions) -> Result<Session> {
        let port = options.port.unwrap_or(self.options.default_port);
        let start_command = options
            .start_command
            .clone()
            .unwrap_or_else(|| self.options.default_start_command.clone());
        let timeout = options.timeout.unwrap_or(self.options.default_timeout);

        if let Some(name) = options.env_vars.keys().find(|name| !is_env_name(name)) {
            return Err(RunnerError::Validation(format!(
                "Invalid environment variable name: \"{}\"",
                name
            )));
        }

        let (session, env) = match self.registry.claim_pending(port).await {
            Some(claimed) => claimed,
            None => {
                let prepared = self
                    .prepare_session(
                        &options.output_directory,
                        options.env_vars.clone(),
                        Some(port),
                        true,
                    )
                    .await?;
                let env = self
                    .registry
                    .environment(&prepared.id)
                    .await
                    .ok_or(RunnerError::NoPreparedSession { port })?;
                (prepared, env)
            }
        };
        let id = session.id.clone();

        self.logger
            .info(&format!("Starting server in sandbox {}...", id));

        let root_dir = self.root_dir(env.as_ref()).await;
        // The session is claimed from here on; failures must not leave it pending
        let url = match env.preview_url(port).await {
            Ok(url) => url,
            Err(e) => {
                self.logger.error(&format!(
                    "No preview URL for port {} in sandbox {}: {}",
                    port, id, e
                ));
                self.registry.set_status(&id, SessionStatus::Error).await;
                return Err(e.into());
            }
        };
        self.registry
            .update(&id, |session| session.url = Some(url.clone()))
            .await;

        let command = build_start_command(
            &root_dir,
            port,
            &url,
            &options.env_vars,
            &start_command,
            &self.options.log_path,
        );
        self.launch_detached(&id, env.clone(), command).await?;

        let probe = ReadinessProbe::from_options(&self.options, timeout);
        if !probe.wait_until_ready(env.as_ref(), port).await {
            self.logger.warn(&format!(
                "Server in sandbox {} not ready after {}s, proceeding anyway",
                id,
                timeout.as_secs()
            ));
        }

        let started_at = Utc::now();
        self.registry
            .update(&id, |session| {
                // A server that already failed stays in error
                if session.status.can_transition_to(SessionStatus::Running) {
                    session.status = SessionStatus::Running;
                    session.started_at = Some(started_at);
                }
            })
            .await;

        let session = self
            .registry
            .get(&id)
            .await
            .ok_or_else(|| RunnerError::NotFound(id.clone()))?;

        if session.status == SessionStatus::Running {
            self.logger
                .info(&format!("Sandbox {} running at {}", id, url));
        }
        Ok(session)
    }

    /// Run the server command in its own shell session without waiting for it
    async fn launch_detached(
        &self,
        id: &str,
        env: Arc<dyn Environment>,
        command: String,
    ) -> Result<()> {
        let server_session = format!("server-{}", id);
        if let Err(e) = env.create_session(&server_session).await {
            self.registry.set_status(id, SessionStatus::Error).await;
            return Err(e.into());
        }

        let registry = self.registry.clone();
        let logger = self.logger.clone();
        let id = id.to_string();

        tokio::spawn(async move {
            match env.exec_in_session(&server_session, &command, None).await {
                Ok(result) if result.exit_code == 0 => {
                    logger.warn(&format!("Server process in sandbox {} exited", id));
                }
                Ok(result) => {
                    logger.error(&format!(
                        "Server process in sandbox {} exited with code {}",
                        id, result.exit_code
                    ));
                    registry.set_status(&id, SessionStatus::Error).await;
                }
                Err(e) => {
                    logger.error(&format!("Server process in sandbox {} exited: {}", id, e));
                    registry.set_status(&id, SessionStatus::Error).await;
                }
            }
        });

        Ok(())
    }

    /// Delete the session's environment and forget the session
    pub async fn stop(&self, id: &str) -> Result<()> {
        let env = self
            .registry
            .environment(id)
            .await
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))?;

        self.logger.info(&format!("Stopping sandbox {}...", id));
        env.delete().await?;

        self.registry.set_status(id, SessionStatus::Stopped).await;
        self.registry.remove(id).await;

        self.logger
            .info(&format!("Sandbox {} stopped and deleted", id));
        Ok(())
    }

    pub async fn get_status(&self, id: &str) -> Option<Session> {
        self.registry.get(id).await
    }

    /// Run a command in the session; a non-zero exit is returned, not raised
    pub async fn exec(
        &self,
        id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let env = self.environment(id).await?;
        run_in_session(
            env.as_ref(),
            command,
            Some(timeout.unwrap_or(self.options.exec_timeout)),
        )
        .await
    }

    /// Last `tail` lines of the server log, or an empty string when there is none
    pub async fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        let env = self.environment(id).await?;
        let command = format!(
            "tail -n {} {} 2>/dev/null || echo \"\"",
            tail.unwrap_or(DEFAULT_LOG_TAIL),
            shell_quote(&self.options.log_path)
        );
        let result = run_in_session(env.as_ref(), &command, Some(self.options.exec_timeout)).await?;

        if result.output.trim().is_empty() {
            Ok(String::new())
        } else {
            Ok(result.output)
        }
    }

    pub async fn list(&self) -> Vec<Session> {
        self.registry.list().await
    }

    async fn environment(&self, id: &str) -> Result<Arc<dyn Environment>> {
        self.registry
            .environment(id)
            .await
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))
    }

    async fn root_dir(&self, env: &dyn Environment) -> String {
        match env.home_dir().await {
            Ok(Some(home)) => home,
            Ok(None) => FALLBACK_ROOT_DIR.to_string(),
            Err(e) => {
                self.logger.debug(&format!(
                    "Could not read home directory of {}: {}",
                    env.id(),
                    e
                ));
                FALLBACK_ROOT_DIR.to_string()
            }
        }
    }
}

/// Names that can appear unquoted on the left of a shell assignment
fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Variables that tell the server how it is reached from outside
pub fn server_env_vars(port: u16, public_url: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert(PORT.to_string(), port.to_string());

    if let Ok(url) = url::Url::parse(public_url) {
        if let Some(host) = url.host_str() {
            vars.insert(SERVER_HOST.to_string(), host.to_string());
        }
        if let Some(public_port) = url.port_or_known_default() {
            vars.insert(SERVER_PORT.to_string(), public_port.to_string());
        }
        vars.insert(SERVER_PROTOCOL.to_string(), url.scheme().to_string());
    }

    vars
}

/// Shell line that launches the server with its env, sending all output to the log file
///
/// The line exits with the server's own status so a crash can be detected.
pub fn build_start_command(
    root_dir: &str,
    port: u16,
    public_url: &str,
    extra_env: &HashMap<String, String>,
    start_command: &str,
    log_path: &str,
) -> String {
    let mut vars: BTreeMap<String, String> = extra_env
        .iter()
        .filter(|(k, _)| is_env_name(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    vars.extend(server_env_vars(port, public_url));

    let assignments: Vec<String> = vars
        .iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
        .collect();

    format!(
        "cd {} && export {} && ({}) > {} 2>&1",
        shell_quote(root_dir),
        assignments.join(" "),
        start_command,
        shell_quote(log_path)
    )
}
