//! Message router for dispatching incoming messages to appropriate handlers.
//!
//! This module provides the `MessageRouter` struct that receives protocol
//! messages, checks the caller's session through the [`SessionGate`], and
//! hands resolved paths to the file handlers.

use std::sync::Arc;

use protocol::messages::{
    ErrorCode, ErrorMessage, FileDeleteRequest, FileDeleteResponse, FileDownloadChunk,
    FileDownloadRequest, FileListRequest, FileListResponse, FileUploadRequest, FileUploadResponse,
    LoginRequest, LoginResponse, LogoutResponse, Message, Ping, Pong, RegisterRequest,
    RegisterResponse,
};
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, Session, SessionGate};
use crate::files::{DeletionHandler, DirectoryLister, FileError, FileTransfer, PathResolver};

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported protocol version {got}, expected {expected}")]
    VersionMismatch { expected: u8, got: u8 },

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    ///
    /// Access denials and I/O failures are reported with a fixed message so
    /// that nothing about the filesystem leaks to the client.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let (code, recoverable) = match self {
            RouterError::File(e) => match e {
                FileError::AccessDenied => (ErrorCode::AccessDenied, false),
                FileError::NotFound(_) => (ErrorCode::NotFound, false),
                FileError::NotADirectory(_) => (ErrorCode::NotADirectory, false),
                FileError::IsADirectory(_) => (ErrorCode::IsADirectory, false),
                FileError::InvalidName(_) | FileError::InvalidOffset { .. } => {
                    (ErrorCode::InvalidRequest, false)
                }
                FileError::FileTooLarge { .. } => (ErrorCode::TooLarge, false),
                FileError::ChecksumMismatch { .. } => (ErrorCode::ChecksumMismatch, true),
                FileError::Io(_) => (ErrorCode::InternalError, true),
            },
            RouterError::Auth(e) => match e {
                AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                    (ErrorCode::Unauthorized, false)
                }
                AuthError::NotAdmin => (ErrorCode::PermissionDenied, false),
                AuthError::UsernameTaken(_) => (ErrorCode::AlreadyExists, false),
                AuthError::InvalidInput(_) => (ErrorCode::InvalidRequest, false),
                AuthError::Hash(_) | AuthError::Storage(_) => (ErrorCode::InternalError, true),
            },
            RouterError::InvalidRequest(_) => (ErrorCode::InvalidRequest, false),
            RouterError::VersionMismatch { .. } => (ErrorCode::VersionMismatch, false),
            RouterError::Task(_) => (ErrorCode::InternalError, true),
        };

        let (message, context) = match code {
            ErrorCode::AccessDenied => ("access denied".to_string(), None),
            ErrorCode::InternalError => {
                error!(error = %self, "request failed");
                ("internal error".to_string(), None)
            }
            _ => (self.to_string(), context),
        };

        ErrorMessage {
            code,
            message,
            context,
            recoverable,
        }
    }
}

/// Per-connection state.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    /// Session token issued by a successful login on this connection.
    pub token: Option<String>,
}

impl ConnectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }
}

/// Message router that dispatches messages to appropriate handlers.
///
/// The router holds the session gate and one instance of each file handler.
/// Every file request is authorized first, then its path is resolved, and
/// only then does the handler run.
pub struct MessageRouter {
    gate: Arc<SessionGate>,
    resolver: PathResolver,
    lister: DirectoryLister,
    transfer: FileTransfer,
    deletion: DeletionHandler,
}

impl MessageRouter {
    /// Create a new message router with the given dependencies.
    pub fn new(
        gate: Arc<SessionGate>,
        resolver: PathResolver,
        lister: DirectoryLister,
        transfer: FileTransfer,
    ) -> Self {
        Self {
            gate,
            resolver,
            lister,
            transfer,
            deletion: DeletionHandler::new(),
        }
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Route a message to the appropriate handler.
    ///
    /// Returns `Ok(Some(response))` if a response should be sent back,
    /// `Ok(None)` if no response is needed, or `Err(error)` if the request
    /// failed and an error should be reported.
    pub async fn route(&self, ctx: &mut ConnectionContext, message: Message) -> RouterResult {
        debug!(kind = message.kind(), "Routing message");

        match message {
            // Auth messages
            Message::Login(req) => self.handle_login(ctx, req).await,
            Message::Logout(_) => self.handle_logout(ctx).await,
            Message::Register(req) => self.handle_register(ctx, req).await,

            // File messages (require an authenticated session)
            Message::FileListRequest(req) => self.handle_file_list(ctx, req).await,
            Message::FileDownloadRequest(req) => self.handle_file_download(ctx, req).await,
            Message::FileUploadRequest(req) => self.handle_file_upload(ctx, req).await,
            Message::FileDeleteRequest(req) => self.handle_file_delete(ctx, req).await,

            // Control messages
            Message::Ping(ping) => self.handle_ping(ping).await,
            Message::Error(err) => {
                warn!(?err, "Received error from peer");
                Ok(None)
            }

            Message::LoginResponse(_)
            | Message::LogoutResponse(_)
            | Message::RegisterResponse(_)
            | Message::FileListResponse(_)
            | Message::FileDownloadChunk(_)
            | Message::FileUploadResponse(_)
            | Message::FileDeleteResponse(_)
            | Message::Pong(_) => {
                // These are response messages, not requests - ignore them
                debug!("Ignoring response message received as request");
                Ok(None)
            }
        }
    }

    fn authorize(&self, ctx: &ConnectionContext) -> Result<Session, RouterError> {
        Ok(self.gate.authorize(ctx.token.as_deref())?)
    }

    /// Run a gate call that hashes or verifies a password on the blocking pool.
    async fn with_gate_blocking<T, F>(&self, f: F) -> Result<T, RouterError>
    where
        F: FnOnce(&SessionGate) -> Result<T, AuthError> + Send + 'static,
        T: Send + 'static,
    {
        let gate = Arc::clone(&self.gate);
        Ok(tokio::task::spawn_blocking(move || f(&gate)).await??)
    }

    // =========================================================================
    // Auth Handlers
    // =========================================================================

    async fn handle_login(&self, ctx: &mut ConnectionContext, req: LoginRequest) -> RouterResult {
        let LoginRequest { username, password } = req;
        let (token, session) = self
            .with_gate_blocking(move |gate| gate.login(&username, &password))
            .await?;

        // A second login on the same connection replaces the first session.
        if let Some(previous) = ctx.token.replace(token) {
            self.gate.logout(&previous);
        }

        Ok(Some(Message::LoginResponse(LoginResponse {
            username: session.username,
            is_admin: session.is_admin,
        })))
    }

    async fn handle_logout(&self, ctx: &mut ConnectionContext) -> RouterResult {
        let was_logged_in = match ctx.token.take() {
            Some(token) => self.gate.logout(&token),
            None => false,
        };

        Ok(Some(Message::LogoutResponse(LogoutResponse { was_logged_in })))
    }

    async fn handle_register(&self, ctx: &ConnectionContext, req: RegisterRequest) -> RouterResult {
        let token = ctx.token.clone();
        let RegisterRequest {
            username,
            password,
            is_admin,
        } = req;
        let user = self
            .with_gate_blocking(move |gate| {
                gate.register(token.as_deref(), &username, &password, is_admin)
            })
            .await?;

        Ok(Some(Message::RegisterResponse(RegisterResponse {
            username: user.username,
            is_admin: user.is_admin,
        })))
    }

    // =========================================================================
    // File Handlers
    // =========================================================================

    async fn handle_file_list(&self, ctx: &ConnectionContext, req: FileListRequest) -> RouterResult {
        let session = self.authorize(ctx)?;
        debug!(user = %session.username, path = %req.path, "Listing directory");

        let dir = self.resolver.resolve(&req.path)?;
        let entries = match self.lister.list(&dir) {
            Ok(entries) => Some(entries.iter().map(|e| e.to_protocol()).collect()),
            Err(FileError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Message::FileListResponse(FileListResponse {
            path: req.path,
            entries,
        })))
    }

    async fn handle_file_download(
        &self,
        ctx: &ConnectionContext,
        req: FileDownloadRequest,
    ) -> RouterResult {
        let session = self.authorize(ctx)?;
        debug!(
            user = %session.username,
            path = %req.path,
            offset = req.offset,
            chunk_size = req.chunk_size,
            "Downloading file chunk"
        );

        let resolved = self.resolver.resolve(&req.path)?;
        let chunk = self
            .transfer
            .read_chunk(&resolved, req.offset, req.chunk_size)?;

        if req.offset == 0 {
            info!(user = %session.username, path = %resolved.relative(), size = chunk.total_size, "download");
        }

        Ok(Some(Message::FileDownloadChunk(FileDownloadChunk {
            path: req.path,
            filename: resolved.file_name().unwrap_or_default(),
            offset: req.offset,
            total_size: chunk.total_size,
            data: chunk.data,
            is_last: chunk.is_last,
        })))
    }

    async fn handle_file_upload(
        &self,
        ctx: &ConnectionContext,
        req: FileUploadRequest,
    ) -> RouterResult {
        let session = self.authorize(ctx)?;
        debug!(
            user = %session.username,
            path = %req.path,
            filename = %req.filename,
            size = req.data.len(),
            "Receiving upload"
        );

        let dir = self.resolver.resolve(&req.path)?;
        let stored =
            self.transfer
                .receive(&dir, &req.filename, &req.data[..], req.checksum.as_deref())?;

        info!(
            user = %session.username,
            path = %stored.destination.relative(),
            size = stored.size,
            "upload"
        );

        Ok(Some(Message::FileUploadResponse(FileUploadResponse {
            path: stored.destination.relative().to_string(),
            filename: req.filename,
            size: stored.size,
            checksum: stored.checksum,
            redirect: dir.relative().to_string(),
        })))
    }

    async fn handle_file_delete(
        &self,
        ctx: &ConnectionContext,
        req: FileDeleteRequest,
    ) -> RouterResult {
        let session = self.authorize(ctx)?;
        debug!(user = %session.username, path = %req.path, "Deleting");

        let resolved = self.resolver.resolve_entry(&req.path)?;
        let deleted = self.deletion.delete(&resolved, &req.path)?;

        Ok(Some(Message::FileDeleteResponse(FileDeleteResponse {
            path: deleted.path,
            was_directory: deleted.was_directory,
            redirect: deleted.parent,
        })))
    }

    // =========================================================================
    // Control Handlers
    // =========================================================================

    async fn handle_ping(&self, ping: Ping) -> RouterResult {
        Ok(Some(Message::Pong(Pong {
            timestamp: ping.timestamp,
            payload: ping.payload,
        })))
    }
}
