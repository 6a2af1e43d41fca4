//! Warden Daemon
//!
//! Serves a single base directory to authenticated clients over TCP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use wardend::auth::password::generate_password;
use wardend::auth::{JsonUserStore, SessionGate, UserRepository};
use wardend::config::{default_config_path, Config};
use wardend::orchestrator::{DaemonOrchestrator, OrchestratorEvent};

/// Warden Daemon - session-authenticated file browser.
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the file server until SIGINT or SIGTERM
    Start,

    /// Manage user accounts
    #[command(subcommand)]
    Users(UsersCommands),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for user management.
#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommands {
    /// List all accounts
    List,

    /// Create an account
    Add {
        /// Login name
        username: String,

        /// Password (generated and printed when omitted)
        #[arg(long, short)]
        password: Option<String>,

        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let _log_guard = init_logging(cli.verbose, &config)?;

    match cli.command {
        Commands::Start => {
            config.validate()?;
            tracing::info!("Using config file: {:?}", config_path);
            run_headless(config).await?;
        }
        Commands::Users(UsersCommands::List) => {
            let store = JsonUserStore::open(config.users_path())?;
            let users = store.list()?;
            if users.is_empty() {
                println!("No users.");
            } else {
                println!("{:<6} {:<32} ROLE", "ID", "USERNAME");
                for user in users {
                    let role = if user.is_admin { "admin" } else { "user" };
                    println!("{:<6} {:<32} {}", user.id, user.username, role);
                }
            }
        }
        Commands::Users(UsersCommands::Add {
            username,
            password,
            admin,
        }) => {
            config.validate()?;
            let store = JsonUserStore::open(config.users_path())?;
            let gate = SessionGate::new(Arc::new(store), config.auth.session_ttl());

            let generated = password.is_none();
            let password = password.unwrap_or_else(generate_password);
            let user = gate
                .create_user(&username, &password, admin)
                .with_context(|| format!("Failed to add user {username}"))?;

            println!("Added user {} (id {})", user.username, user.id);
            if generated {
                println!("Password: {password}");
            }
        }
        Commands::Config(ConfigCommands::Show) => {
            let mut shown = config.clone();
            if shown.auth.admin_password.is_some() {
                shown.auth.admin_password = Some("********".to_string());
            }
            println!("# {}", config_path.display());
            print!("{}", shown.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            init_config(&config_path, force)?;
            println!("Wrote {}", config_path.display());
        }
    }

    Ok(())
}

/// Set up stdout logging plus an optional non-blocking log file.
///
/// `--verbose` wins over `RUST_LOG`, which wins over `daemon.log_level`.
fn init_logging(verbose: bool, config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.to_lowercase()))
    };

    let (file_layer, guard) = match &config.daemon.log_file {
        Some(path) => {
            let name = path
                .file_name()
                .with_context(|| format!("log_file must name a file: {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Write the default configuration to `path`.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)
}

/// Run the daemon until a shutdown signal arrives.
async fn run_headless(config: Config) -> anyhow::Result<()> {
    let mut orchestrator = DaemonOrchestrator::new(config)?;

    // Subscribe before starting so the Listening event is not missed
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::Listening { addr } => {
                    tracing::info!("Accepting connections on {}", addr);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
