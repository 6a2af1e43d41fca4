//! # Warden Daemon Library
//!
//! This crate provides the daemon (server) functionality for Warden, a file
//! browser that lets authenticated users list, download, upload and delete
//! files beneath a single configured base directory.
//!
//! ## Overview
//!
//! - **Path confinement**: every request path is resolved against the base
//!   root and refused if it escapes, lexically or through a symlink
//! - **File operations**: directory listing, chunked download, atomic
//!   upload and recursive delete
//! - **Sessions**: Argon2-hashed accounts, token sessions, admin-only
//!   registration
//! - **Transport**: framed MessagePack over TCP
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Daemon Orchestrator                    │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                  TCP File Server                   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                  Message Router                    │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────────────────────────┐    │
//! │  │   Session   │  │ PathResolver → Lister/Transfer/ │    │
//! │  │    Gate     │  │           Deletion              │    │
//! │  └─────────────┘  └─────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wardend::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Wait for shutdown signal...
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`auth`]: Users, passwords and sessions
//! - [`files`]: Path resolution, listing, transfer and deletion
//! - [`router`]: Message routing to handlers
//! - [`server`]: TCP accept loop and per-connection tasks
//! - [`client`]: Async client for the daemon
//! - [`orchestrator`]: Main daemon coordinator

pub mod auth;
pub mod client;
pub mod config;
pub mod files;
pub mod orchestrator;
pub mod router;
pub mod server;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use auth::{AuthError, JsonUserStore, Session, SessionGate, User, UserRepository};

pub use files::{
    BaseRoot, DeletionHandler, DirectoryEntry, DirectoryLister, FileError, FileTransfer,
    ListOptions, PathResolver, ResolvedPath,
};

pub use router::{ConnectionContext, MessageRouter, RouterError, RouterResult};

pub use server::{FileServer, ServerError, ServerOptions};

pub use client::{ClientError, Download, FileClient};

pub use orchestrator::{DaemonOrchestrator, OrchestratorEvent, OrchestratorState};
