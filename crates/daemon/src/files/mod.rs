//! File operations confined to a single base directory.
//!
//! Every request path goes through [`PathResolver`] first. Only a
//! [`ResolvedPath`] can be handed to the listing, transfer and deletion
//! handlers, so nothing below this module ever touches a path that was not
//! checked against the base root.

pub mod browser;
pub mod deletion;
pub mod resolver;
pub mod transfer;

use std::io;

use thiserror::Error;

pub use browser::{DirectoryEntry, DirectoryLister, ListOptions};
pub use deletion::{parent_path, Deleted, DeletionHandler};
pub use resolver::{ensure_contained, BaseRoot, PathResolver, ResolvedPath};
pub use transfer::{FileDownload, FileTransfer, StoredFile};

/// Errors produced by the file handlers.
///
/// `AccessDenied` deliberately carries no detail; the reason is logged at
/// debug level where it is detected.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("access denied")]
    AccessDenied,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("offset {offset} is beyond the end of the file ({size} bytes)")]
    InvalidOffset { offset: u64, size: u64 },

    #[error("file too large: exceeds limit of {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FileError {
    /// Map an I/O error on `relative` to `NotFound` when the entry is gone.
    pub(crate) fn from_io(err: io::Error, relative: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileError::NotFound(relative.to_string()),
            _ => FileError::Io(err),
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;
