//! Deletion of resolved files and directory trees.
//!
//! Deletion is immediate and recursive for directories. There is no trash,
//! dry-run or undo.

use std::fs;

use tracing::{debug, info};

use super::resolver::ResolvedPath;
use super::{FileError, FileResult};

/// Outcome of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    /// Root-relative path that was removed.
    pub path: String,
    /// Where to navigate afterwards; `""` is the base root.
    pub parent: String,
    pub was_directory: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeletionHandler;

impl DeletionHandler {
    pub fn new() -> Self {
        Self
    }

    /// Remove `resolved`, recursing into directories.
    ///
    /// `requested` is the path as the client sent it and is only used to
    /// compute [`Deleted::parent`]. The base root itself cannot be deleted.
    /// A symlink from [`PathResolver::resolve_entry`] is unlinked; its target
    /// is left alone.
    ///
    /// [`PathResolver::resolve_entry`]: super::PathResolver::resolve_entry
    pub fn delete(&self, resolved: &ResolvedPath, requested: &str) -> FileResult<Deleted> {
        if resolved.is_root() {
            debug!(requested, "refusing to delete the base root");
            return Err(FileError::AccessDenied);
        }

        let relative = resolved.relative();
        let metadata =
            fs::symlink_metadata(resolved.path()).map_err(|e| FileError::from_io(e, relative))?;
        let was_directory = metadata.is_dir();

        let removed = if was_directory {
            fs::remove_dir_all(resolved.path())
        } else {
            fs::remove_file(resolved.path())
        };
        removed.map_err(|e| FileError::from_io(e, relative))?;

        info!(path = %relative, was_directory, "deleted");

        Ok(Deleted {
            path: relative.to_string(),
            parent: parent_path(requested),
            was_directory,
        })
    }
}

/// Drop the last segment of a request path.
///
/// Both `/` and `\` separate segments; empty and `.` segments are ignored and
/// `..` removes the previous one. Returns `""` for items at the root.
pub fn parent_path(requested: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in requested.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.pop();
    segments.join("/")
}
