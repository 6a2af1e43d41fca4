//! Protocol message definitions for Warden.
//!
//! Every request and response exchanged between `wardend` and its clients is
//! a [`Message`] carried in an [`Envelope`] and serialized with MessagePack.
//! Responses echo the sequence number of the request they answer.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest download chunk the daemon will return (1 MiB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// Chunk size used when a request asks for 0.
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Request sequence number, echoed in the matching response.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Auth messages
    Login(LoginRequest),
    LoginResponse(LoginResponse),
    Logout(LogoutRequest),
    LogoutResponse(LogoutResponse),
    /// Create a user account (admin only).
    Register(RegisterRequest),
    RegisterResponse(RegisterResponse),

    // File messages
    FileListRequest(FileListRequest),
    FileListResponse(FileListResponse),
    FileDownloadRequest(FileDownloadRequest),
    FileDownloadChunk(FileDownloadChunk),
    FileUploadRequest(FileUploadRequest),
    FileUploadResponse(FileUploadResponse),
    FileDeleteRequest(FileDeleteRequest),
    FileDeleteResponse(FileDeleteResponse),

    // Control messages
    Ping(Ping),
    Pong(Pong),
    Error(ErrorMessage),
}

impl Message {
    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Login(_) => "login",
            Message::LoginResponse(_) => "login_response",
            Message::Logout(_) => "logout",
            Message::LogoutResponse(_) => "logout_response",
            Message::Register(_) => "register",
            Message::RegisterResponse(_) => "register_response",
            Message::FileListRequest(_) => "file_list",
            Message::FileListResponse(_) => "file_list_response",
            Message::FileDownloadRequest(_) => "file_download",
            Message::FileDownloadChunk(_) => "file_download_chunk",
            Message::FileUploadRequest(_) => "file_upload",
            Message::FileUploadResponse(_) => "file_upload_response",
            Message::FileDeleteRequest(_) => "file_delete",
            Message::FileDeleteResponse(_) => "file_delete_response",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Error(_) => "error",
        }
    }
}

// ============================================================================
// Auth Messages
// ============================================================================

/// Authenticate this connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
    pub is_admin: bool,
}

/// Drop the session attached to this connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    /// False when the connection had no session to drop.
    pub was_logged_in: bool,
}

/// Create a new user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub username: String,
    pub is_admin: bool,
}

// ============================================================================
// File Messages
// ============================================================================
//
// All `path` fields are relative to the daemon's base directory. A leading
// separator is ignored, so "" and "/" both name the base directory itself.

/// Request to list a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListRequest {
    pub path: String,
}

/// Directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListResponse {
    /// Normalized path that was listed.
    pub path: String,
    /// `None` when nothing exists at `path`.
    pub entries: Option<Vec<FileEntry>>,
}

/// A single file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not full path).
    pub name: String,
    pub entry_type: FileEntryType,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
}

/// Type of file entry. Symlinks are reported as the type of their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEntryType {
    File,
    Directory,
}

/// Request one chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadRequest {
    pub path: String,
    /// Starting offset in bytes.
    pub offset: u64,
    /// Maximum chunk size; 0 selects [`DEFAULT_CHUNK_SIZE`], values above
    /// [`MAX_CHUNK_SIZE`] are clamped.
    pub chunk_size: u32,
}

/// Chunk of downloaded file data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadChunk {
    pub path: String,
    /// Original file name, for saving on the client side.
    pub filename: String,
    pub offset: u64,
    pub total_size: u64,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// Upload a file into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadRequest {
    /// Destination directory.
    pub path: String,
    /// Name to store the file under; must be a single path component.
    pub filename: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    /// Expected SHA-256 of `data`, verified before the file becomes visible.
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadResponse {
    /// Directory the file was stored in.
    pub path: String,
    pub filename: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the stored content.
    pub checksum: String,
    /// Where the client should navigate next: the same directory.
    pub redirect: String,
}

/// Delete a file, or a directory and everything under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeleteRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDeleteResponse {
    pub path: String,
    pub was_directory: bool,
    /// Parent of the deleted item; "" for the base directory.
    pub redirect: String,
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive and latency measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub timestamp: u64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub timestamp: u64,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (e.g. the requested path).
    pub context: Option<String>,
    /// Whether the client may retry or continue.
    pub recoverable: bool,
}

/// Error codes for common error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Unknown or unspecified error.
    Unknown,
    /// No authenticated session, or bad credentials.
    Unauthorized,
    /// Authenticated but not allowed (e.g. non-admin registering users).
    PermissionDenied,
    /// Path resolves outside the base directory or is otherwise refused.
    AccessDenied,
    NotFound,
    /// A directory operation was requested on a file.
    NotADirectory,
    /// A file operation was requested on a directory.
    IsADirectory,
    AlreadyExists,
    /// Invalid request or parameters.
    InvalidRequest,
    TooLarge,
    ChecksumMismatch,
    /// Server-side error.
    InternalError,
    /// Protocol version mismatch.
    VersionMismatch,
}

// ============================================================================
// Serialization helpers
// ============================================================================

impl Envelope {
    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) -> Message {
        let envelope = Envelope::new(42, msg);
        let bytes = envelope.to_msgpack().expect("serialization failed");
        let decoded = Envelope::from_msgpack(&bytes).expect("deserialization failed");
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        decoded.payload
    }

    #[test]
    fn test_list_response_distinguishes_missing_from_empty() {
        let missing = Message::FileListResponse(FileListResponse {
            path: "reports".to_string(),
            entries: None,
        });
        let empty = Message::FileListResponse(FileListResponse {
            path: "reports".to_string(),
            entries: Some(Vec::new()),
        });

        assert_eq!(roundtrip(missing.clone()), missing);
        assert_eq!(roundtrip(empty.clone()), empty);
        assert_ne!(missing, empty);
    }

    #[test]
    fn test_list_response_with_entries() {
        let msg = Message::FileListResponse(FileListResponse {
            path: String::new(),
            entries: Some(vec![
                FileEntry {
                    name: "reports".to_string(),
                    entry_type: FileEntryType::Directory,
                    size: 0,
                    modified: 1_704_067_200,
                },
                FileEntry {
                    name: "My Notes (1).txt".to_string(),
                    entry_type: FileEntryType::File,
                    size: 1024,
                    modified: 1_704_067_200,
                },
            ]),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_upload_request_binary_payload() {
        let msg = Message::FileUploadRequest(FileUploadRequest {
            path: "reports".to_string(),
            filename: "q1.csv".to_string(),
            data: (0u8..=255).collect(),
            checksum: Some("00".repeat(32)),
        });
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_logout_request_empty_struct() {
        let msg = Message::Logout(LogoutRequest::default());
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_all_error_codes_roundtrip() {
        let codes = [
            ErrorCode::Unknown,
            ErrorCode::Unauthorized,
            ErrorCode::PermissionDenied,
            ErrorCode::AccessDenied,
            ErrorCode::NotFound,
            ErrorCode::NotADirectory,
            ErrorCode::IsADirectory,
            ErrorCode::AlreadyExists,
            ErrorCode::InvalidRequest,
            ErrorCode::TooLarge,
            ErrorCode::ChecksumMismatch,
            ErrorCode::InternalError,
            ErrorCode::VersionMismatch,
        ];

        for code in codes {
            let msg = Message::Error(ErrorMessage {
                code,
                message: format!("test error: {:?}", code),
                context: None,
                recoverable: true,
            });
            assert_eq!(roundtrip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_adjacent_tagging_shape() {
        let msg = Message::FileDeleteRequest(FileDeleteRequest {
            path: "old".to_string(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "FileDeleteRequest");
        assert_eq!(json["data"]["path"], "old");
    }

    #[test]
    fn test_ping_message_compact() {
        let envelope = Envelope::new(
            1,
            Message::Ping(Ping {
                timestamp: u64::MAX,
                payload: vec![],
            }),
        );
        let bytes = envelope.to_msgpack().unwrap();
        assert!(bytes.len() < 100, "ping too large: {} bytes", bytes.len());
    }

    #[test]
    fn test_message_kind() {
        let msg = Message::FileListRequest(FileListRequest {
            path: "/".to_string(),
        });
        assert_eq!(msg.kind(), "file_list");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::from_msgpack(&[0xc1, 0x00, 0x01]).is_err());
    }
}
