//! Confinement of user-supplied paths to the base directory.
//!
//! A requested path is always interpreted relative to the base root: leading
//! separators, drive prefixes and root components are dropped. The path is
//! then walked one component at a time. Each existing component is
//! canonicalized (following symlinks) and the walk is abandoned with
//! [`FileError::AccessDenied`] the moment it leaves the root. Components that
//! do not exist yet are appended lexically so callers can report `NotFound`
//! or create them.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{FileError, FileResult};

/// The directory all file operations are confined to.
///
/// Validated once at startup; it must exist and be a directory.
#[derive(Debug, Clone)]
pub struct BaseRoot {
    configured: PathBuf,
    canonical: PathBuf,
}

impl BaseRoot {
    pub fn new(path: impl AsRef<Path>) -> FileResult<Self> {
        let configured = path.as_ref().to_path_buf();
        let display = configured.display().to_string();

        let canonical =
            fs::canonicalize(&configured).map_err(|e| FileError::from_io(e, &display))?;
        if !canonical.is_dir() {
            return Err(FileError::NotADirectory(display));
        }

        Ok(Self {
            configured,
            canonical,
        })
    }

    /// The path as it was configured.
    pub fn configured(&self) -> &Path {
        &self.configured
    }

    /// The canonical, symlink-free form every result is checked against.
    pub fn canonical(&self) -> &Path {
        &self.canonical
    }
}

/// A path that has passed confinement checks.
///
/// Only [`PathResolver`] constructs these. `path()` is absolute and lies at
/// or below the canonical base root; it may not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    relative: String,
}

impl ResolvedPath {
    /// Absolute filesystem path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the root, `/`-separated, `""` for the root itself.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Last component, or `None` for the root.
    pub fn file_name(&self) -> Option<String> {
        if self.is_root() {
            return None;
        }
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Resolves untrusted request paths against a [`BaseRoot`].
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: BaseRoot,
}

impl PathResolver {
    pub fn new(root: BaseRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &BaseRoot {
        &self.root
    }

    /// Resolve `requested` under the base root.
    ///
    /// `""`, `"/"` and `"."` all name the root. Fails with `AccessDenied` if
    /// the path escapes the root lexically or through a symlink, names a
    /// dangling symlink, or cannot be inspected.
    pub fn resolve(&self, requested: &str) -> FileResult<ResolvedPath> {
        let current = self.walk(requested, request_path(requested))?;
        self.finish(current)
    }

    /// Resolve `requested` as a directory entry to be removed.
    ///
    /// Same as [`resolve`](Self::resolve), except that a final component
    /// which is a symlink is not followed. The result is the link itself,
    /// joined onto its canonical parent directory, wherever it points.
    pub fn resolve_entry(&self, requested: &str) -> FileResult<ResolvedPath> {
        let mut components = request_path(requested).components();
        if let Some(Component::Normal(name)) = components.next_back() {
            let parent = self.walk(requested, components.as_path())?;
            let entry = parent.join(name);
            let is_link = fs::symlink_metadata(&entry).is_ok_and(|m| m.file_type().is_symlink());
            if is_link {
                return self.finish(entry);
            }
        }
        self.resolve(requested)
    }

    /// Canonicalize `path` under the root one component at a time.
    fn walk(&self, requested: &str, path: &Path) -> FileResult<PathBuf> {
        let base = self.root.canonical();
        let mut current = base.to_path_buf();

        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    current.pop();
                }
                Component::Normal(name) => {
                    current = canonical_step(&current, name)?;
                }
            }

            if let Err(e) = ensure_contained(base, &current) {
                debug!(requested, resolved = ?current, "path escapes base root");
                return Err(e);
            }
        }

        Ok(current)
    }

    /// Resolve an upload destination: `filename` inside the directory `dir`.
    ///
    /// `filename` must be exactly one normal path component. If something
    /// already exists under that name it must itself resolve inside the root.
    pub fn resolve_child(&self, dir: &ResolvedPath, filename: &str) -> FileResult<ResolvedPath> {
        let name = single_component(filename)
            .ok_or_else(|| FileError::InvalidName(filename.to_string()))?;

        let candidate = dir.path().join(name);
        let resolved = match fs::symlink_metadata(&candidate) {
            Ok(_) => fs::canonicalize(&candidate).map_err(|e| {
                debug!(path = ?candidate, error = %e, "upload destination cannot be resolved");
                FileError::AccessDenied
            })?,
            Err(_) => candidate,
        };

        if let Err(e) = ensure_contained(self.root.canonical(), &resolved) {
            debug!(filename, resolved = ?resolved, "upload destination escapes base root");
            return Err(e);
        }

        self.finish(resolved)
    }

    fn finish(&self, path: PathBuf) -> FileResult<ResolvedPath> {
        let relative = relative_to(self.root.canonical(), &path)?;
        Ok(ResolvedPath { path, relative })
    }
}

/// Accept `candidate` only if it is `root` or lies below it.
///
/// Compares whole components, so `/srv/data-evil` is not inside `/srv/data`.
/// Both paths must already be canonical.
pub fn ensure_contained(root: &Path, candidate: &Path) -> FileResult<()> {
    if candidate.starts_with(root) {
        Ok(())
    } else {
        Err(FileError::AccessDenied)
    }
}

/// The request with leading separators dropped, so it is always relative.
fn request_path(requested: &str) -> &Path {
    Path::new(requested.trim_start_matches(['/', '\\']))
}

fn canonical_step(current: &Path, name: &OsStr) -> FileResult<PathBuf> {
    let candidate = current.join(name);
    match fs::canonicalize(&candidate) {
        Ok(canonical) => Ok(canonical),
        Err(e) if is_missing(&e) => {
            if fs::symlink_metadata(&candidate).is_ok() {
                debug!(path = ?candidate, "dangling symlink");
                Err(FileError::AccessDenied)
            } else {
                Ok(candidate)
            }
        }
        Err(e) => {
            debug!(path = ?candidate, error = %e, "canonicalization failed");
            Err(FileError::AccessDenied)
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn single_component(filename: &str) -> Option<&OsStr> {
    if filename.contains(['/', '\\', '\0']) {
        return None;
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(name),
        _ => None,
    }
}

fn relative_to(root: &Path, path: &Path) -> FileResult<String> {
    let rest = path.strip_prefix(root).map_err(|_| FileError::AccessDenied)?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
