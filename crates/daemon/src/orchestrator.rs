//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that validates the base
//! root, opens the user store, bootstraps the admin account, builds the
//! message router and runs the TCP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{JsonUserStore, SessionGate};
use crate::config::Config;
use crate::files::{BaseRoot, DirectoryLister, FileTransfer, ListOptions, PathResolver};
use crate::router::MessageRouter;
use crate::server::{FileServer, ServerError, ServerOptions};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The server is accepting connections.
    Listening { addr: SocketAddr },
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    gate: Arc<SessionGate>,
    router: Arc<MessageRouter>,
    local_addr: Option<SocketAddr>,
    server_task: Option<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    ///
    /// Fails if the configuration is invalid, the base directory is missing,
    /// or the user store cannot be read.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let root = BaseRoot::new(&config.file.base_path).with_context(|| {
            format!(
                "Base directory is not usable: {}",
                config.file.base_path.display()
            )
        })?;
        info!(base = %root.canonical().display(), "Serving files");

        let users = JsonUserStore::open(config.users_path()).context("Failed to load user store")?;
        let gate = Arc::new(SessionGate::new(Arc::new(users), config.auth.session_ttl()));
        gate.ensure_admin(
            &config.auth.admin_username,
            config.auth.admin_password.as_deref(),
        )
        .context("Failed to create admin account")?;

        let resolver = PathResolver::new(root.clone());
        let lister = DirectoryLister::new(
            root,
            ListOptions {
                include_hidden: config.file.include_hidden,
                sort: config.file.sort_entries,
            },
        );
        let transfer = FileTransfer::new(resolver.clone(), config.file.max_size);
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&gate),
            resolver,
            lister,
            transfer,
        ));

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            gate,
            router,
            local_addr: None,
            server_task: None,
            shutdown_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts the daemon orchestrator.
    pub async fn start(&mut self) -> Result<()> {
        let addr = self.config.listen_addr().with_context(|| {
            format!("Invalid listen address: {}", self.config.server.listen_addr)
        })?;
        let options = ServerOptions {
            max_connections: self.config.server.max_connections,
            idle_timeout: self.config.server.idle_timeout(),
        };

        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        // A previous stop() cancelled the old token for good
        if self.shutdown_token.is_cancelled() {
            self.shutdown_token = CancellationToken::new();
        }

        let server = match FileServer::bind(
            addr,
            Arc::clone(&self.router),
            options,
            self.shutdown_token.child_token(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e).context("Failed to start server");
            }
        };

        let local_addr = server.local_addr()?;
        self.local_addr = Some(local_addr);

        let event_tx = self.event_tx.clone();
        self.server_task = Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Server error: {}", e);
                let _ = event_tx.send(e.into());
            }
        }));

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));
        self.emit_event(OrchestratorEvent::Listening { addr: local_addr });

        info!(addr = %local_addr, "Daemon orchestrator started successfully");
        Ok(())
    }

    /// Stops the daemon orchestrator gracefully.
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        // Signal shutdown to the accept loop and every connection
        self.shutdown_token.cancel();

        if let Some(task) = self.server_task.take() {
            if let Err(e) = task.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }

        let purged = self.gate.sessions().purge_expired();
        info!(
            purged,
            remaining = self.gate.sessions().len(),
            "Dropping sessions"
        );

        self.local_addr = None;
        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    ///
    /// Each run after a restart has its own token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

impl From<ServerError> for OrchestratorEvent {
    fn from(err: ServerError) -> Self {
        OrchestratorEvent::Error {
            message: err.to_string(),
        }
    }
}
