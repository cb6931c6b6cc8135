// ABOUTME: Operator CLI for starting, debugging and inspecting sandbox sessions and host FUSE mounts
// ABOUTME: Loads .env, initialises tracing, then dispatches to the library runner and mount helpers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use sandbox_runner::mounts::{self, MountContext};
use sandbox_runner::{
    provider_from_env, DockerProvider, LocalProvider, ProviderKind, RunnerError, RunnerOptions,
    SandboxProvider, SandboxRunner, StartOptions,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEBUG_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const FUSE_TOOLS: [&str; 2] = ["s3fs", "gcsfuse"];

#[derive(Parser)]
#[command(name = "sandbox-runner")]
#[command(about = "Run server bundles in disposable sandboxes and manage FUSE bucket mounts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ship a bundle into a sandbox, start it and keep it running until Ctrl+C
    Start {
        /// Build output directory to ship
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        start_command: Option<String>,
        /// Readiness timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Extra environment variable (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
    },
    /// Prepare a sandbox and run the start command in the foreground for a few seconds
    Debug {
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        port: Option<u16>,
        /// Command to run instead of the configured start command
        #[arg(long)]
        command: Option<String>,
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
    },
    /// Inspect and manage FUSE mounts on this machine
    #[command(subcommand)]
    Mounts(MountCommands),
}

#[derive(Subcommand)]
enum MountCommands {
    /// List active FUSE mounts
    List,
    /// Unmount a FUSE mount, or every FUSE mount with --all
    Unmount {
        path: Option<String>,
        #[arg(long, conflicts_with = "path")]
        all: bool,
    },
    /// Check that a bucket name (and optional endpoint) is safe to mount
    CheckBucket {
        name: String,
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Show which mount tools are installed
    Tools,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    Docker,
    Local,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Docker => ProviderKind::Docker,
            ProviderArg::Local => ProviderKind::Local,
        }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Start {
            output_dir,
            port,
            start_command,
            timeout,
            env,
            provider,
        } => {
            let options = StartOptions {
                output_directory: output_dir,
                env_vars: env.into_iter().collect(),
                port,
                start_command,
                timeout: timeout.map(Duration::from_secs),
            };
            start_command_handler(options, provider).await
        }
        Commands::Debug {
            output_dir,
            port,
            command,
            provider,
        } => debug_command(output_dir, port, command, provider).await,
        Commands::Mounts(mount_cmd) => handle_mount_command(mount_cmd).await,
    }
}

async fn build_runner(provider: Option<ProviderArg>) -> Result<SandboxRunner> {
    let options = RunnerOptions::from_env().context("Invalid runner configuration")?;
    let kind = match provider {
        Some(arg) => arg.into(),
        None => provider_from_env()?,
    };

    let provider: Arc<dyn SandboxProvider> = match kind {
        ProviderKind::Docker => {
            let mut docker = DockerProvider::new().context("Failed to connect to Docker")?;
            if let Some(image) = &options.image {
                docker = docker.with_default_image(image.clone());
            }
            Arc::new(docker)
        }
        ProviderKind::Local => Arc::new(LocalProvider::new()),
    };

    if !provider.is_available().await? {
        anyhow::bail!("The {} provider is not available", provider.name());
    }

    Ok(SandboxRunner::new(provider, options))
}

async fn start_command_handler(options: StartOptions, provider: Option<ProviderArg>) -> Result<()> {
    let runner = build_runner(provider).await?;

    println!(
        "🚀 Starting sandbox from {}",
        options.output_directory.display()
    );
    let session = runner.start(options).await?;

    let url = session.url.clone().unwrap_or_default();
    println!("✅ Session {} is {}", session.id.bold(), session.status);
    println!("🔗 URL: {}", url.cyan());

    let port = session.port.unwrap_or(runner.options().default_port);
    let health = runner
        .exec(
            &session.id,
            &format!("curl -sf http://localhost:{}/health", port),
            Some(Duration::from_secs(10)),
        )
        .await?;
    if health.success() {
        println!("{} {}", "Health check passed:".green(), health.output.trim());
    } else {
        println!(
            "{} exit code {}",
            "Health check failed:".yellow(),
            health.exit_code
        );
    }

    let logs = runner.get_logs(&session.id, Some(50)).await?;
    if !logs.is_empty() {
        println!("\n📄 Server logs:\n{}", logs);
    }

    println!("\nPress Ctrl+C to stop the sandbox");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\n🛑 Stopping sandbox {}", session.id);
    runner.stop(&session.id).await?;
    println!("✅ Sandbox stopped");
    Ok(())
}

async fn debug_command(
    output_dir: PathBuf,
    port: Option<u16>,
    command: Option<String>,
    provider: Option<ProviderArg>,
) -> Result<()> {
    let runner = build_runner(provider).await?;
    let port = port.unwrap_or(runner.options().default_port);
    let command = command.unwrap_or_else(|| runner.options().default_start_command.clone());

    println!("📦 Preparing sandbox from {}", output_dir.display());
    let session = runner.prepare(&output_dir, HashMap::new(), Some(port)).await?;
    println!("✅ Session {} is {}", session.id.bold(), session.status);

    println!(
        "🐛 Running `{}` in the foreground for up to {}s",
        command,
        DEBUG_COMMAND_TIMEOUT.as_secs()
    );
    let foreground = format!("cd \"$HOME\" && PORT={} {} 2>&1", port, command);
    let outcome = runner
        .exec(&session.id, &foreground, Some(DEBUG_COMMAND_TIMEOUT))
        .await;

    match outcome {
        Ok(result) => {
            println!("Exit code: {}", result.exit_code);
            println!("Output:\n{}", result.output);
        }
        Err(RunnerError::Provider(e)) => {
            println!(
                "{} {} (the server probably kept running, which is expected)",
                "Command did not exit:".yellow(),
                e
            );
        }
        Err(e) => {
            runner.stop(&session.id).await.ok();
            return Err(e.into());
        }
    }

    runner.stop(&session.id).await?;
    println!("✅ Sandbox stopped");
    Ok(())
}

async fn handle_mount_command(command: MountCommands) -> Result<()> {
    let ctx = MountContext::host();

    match command {
        MountCommands::List => {
            let active = mounts::get_active_fuse_mounts(&ctx).await;
            if active.is_empty() {
                println!("No active FUSE mounts.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Mount path"]);
            for path in active {
                table.add_row(vec![path]);
            }
            println!("{}", table);
            Ok(())
        }
        MountCommands::Unmount { path, all } => {
            if all {
                let report = mounts::unmount_all(&ctx).await;
                for path in &report.unmounted {
                    println!("✅ Unmounted {}", path);
                }
                for (path, error) in &report.failed {
                    println!("{} {}: {}", "Failed:".red(), path, error);
                }
                if !report.is_clean() {
                    anyhow::bail!("{} mount(s) could not be unmounted", report.failed.len());
                }
                return Ok(());
            }

            let path = path.context("Provide a mount path or --all")?;
            mounts::unmount(&path, &ctx).await?;
            println!("✅ Unmounted {}", path);
            Ok(())
        }
        MountCommands::CheckBucket { name, endpoint } => {
            mounts::validate_bucket_name(&name)?;
            if let Some(endpoint) = &endpoint {
                mounts::validate_endpoint(endpoint)?;
            }
            println!("✅ {} is a valid bucket name", name.bold());
            Ok(())
        }
        MountCommands::Tools => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Tool", "Path", "Install"]);

            for tool in FUSE_TOOLS {
                let (path, install) = match mounts::find_tool(tool, &ctx).await {
                    Some(path) => (path, String::new()),
                    None => (
                        "not installed".to_string(),
                        mounts::get_install_instructions(tool, &ctx.platform),
                    ),
                };
                table.add_row(vec![tool.to_string(), path, install]);
            }
            println!("Platform: {}", ctx.platform);
            println!("{}", table);
            Ok(())
        }
    }
}
