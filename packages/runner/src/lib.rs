// ABOUTME: Ephemeral sandbox lifecycle manager and FUSE storage mount subsystem
// ABOUTME: Ships a server bundle into a disposable environment, runs it, and attaches cloud buckets

pub mod command;
pub mod config;
pub mod error;
pub mod logger;
pub mod mounts;
pub mod providers;
pub mod readiness;
pub mod registry;
pub mod runner;
pub mod transport;

pub use command::{
    run_command, run_in_session, shell_quote, CommandResult, CommandRunner,
    EnvironmentCommandRunner, HostCommandRunner, ProcessOutput,
};
pub use config::{provider_from_env, ConfigError, ProviderKind, RunnerOptions};
pub use error::{Result, RunnerError, TransportStage};
pub use logger::{Logger, TracingLogger};
pub use mounts::{MountConfig, MountContext, MountStatus, Platform};
pub use providers::{
    DockerProvider, Environment, EnvironmentSpec, ExecResult, LocalProvider, ProviderError,
    SandboxProvider,
};
pub use readiness::ReadinessProbe;
pub use registry::{Session, SessionRegistry, SessionStatus};
pub use runner::{SandboxRunner, StartOptions};
pub use transport::BundleTransport;
