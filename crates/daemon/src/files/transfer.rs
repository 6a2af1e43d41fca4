//! File upload and download for resolved paths.
//!
//! Uploads are streamed into a hidden temporary file next to the destination
//! and renamed into place only after the size limit and optional checksum
//! have been checked, so a partially written upload is never visible under
//! its final name.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::resolver::{PathResolver, ResolvedPath};
use super::{FileError, FileResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub destination: ResolvedPath,
    pub size: u64,
    /// Hex-encoded SHA-256 of the stored bytes.
    pub checksum: String,
}

/// An open file ready to be streamed to the client.
#[derive(Debug)]
pub struct FileDownload {
    /// Name the client should save the file under.
    pub filename: String,
    pub size: u64,
    pub file: File,
}

/// One slice of a file read for a chunked download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub total_size: u64,
    pub is_last: bool,
}

/// Upload and download handler.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    resolver: PathResolver,
    max_file_size: u64,
}

impl FileTransfer {
    pub fn new(resolver: PathResolver, max_file_size: u64) -> Self {
        Self {
            resolver,
            max_file_size,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Store `payload` as `filename` inside the directory `dir`.
    ///
    /// The destination is re-validated with [`PathResolver::resolve_child`].
    /// An existing file of the same name is replaced. When `expected_checksum`
    /// is given (hex SHA-256) the upload is rejected unless it matches.
    pub fn receive<R: Read>(
        &self,
        dir: &ResolvedPath,
        filename: &str,
        payload: R,
        expected_checksum: Option<&str>,
    ) -> FileResult<StoredFile> {
        let metadata =
            fs::metadata(dir.path()).map_err(|e| FileError::from_io(e, dir.relative()))?;
        if !metadata.is_dir() {
            return Err(FileError::NotFound(dir.relative().to_string()));
        }

        let destination = self.resolver.resolve_child(dir, filename)?;
        if destination.path().is_dir() {
            return Err(FileError::IsADirectory(destination.relative().to_string()));
        }

        let temp_path = temp_path_for(destination.path(), dir.path());
        let result = self
            .write_temp(&temp_path, payload)
            .and_then(|(size, checksum)| {
                if let Some(expected) = expected_checksum {
                    if !expected.eq_ignore_ascii_case(&checksum) {
                        return Err(FileError::ChecksumMismatch {
                            expected: expected.to_string(),
                            actual: checksum,
                        });
                    }
                }
                fs::rename(&temp_path, destination.path())?;
                Ok((size, checksum))
            });

        match result {
            Ok((size, checksum)) => {
                debug!(path = %destination.relative(), size, "upload stored");
                Ok(StoredFile {
                    destination,
                    size,
                    checksum,
                })
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    if cleanup.kind() != ErrorKind::NotFound {
                        warn!(path = ?temp_path, error = %cleanup, "Failed to cleanup temp file after failed upload");
                    }
                }
                Err(e)
            }
        }
    }

    fn write_temp<R: Read>(&self, temp_path: &Path, mut payload: R) -> FileResult<(u64, String)> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = match payload.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            written += n as u64;
            if written > self.max_file_size {
                return Err(FileError::FileTooLarge {
                    max: self.max_file_size,
                });
            }

            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n])?;
        }

        file.sync_all()?;
        Ok((written, hex::encode(hasher.finalize())))
    }

    /// Open a resolved file for download.
    pub fn send(&self, resolved: &ResolvedPath) -> FileResult<FileDownload> {
        let size = self.file_size(resolved)?;
        let file = File::open(resolved.path()).map_err(|e| FileError::from_io(e, resolved.relative()))?;

        Ok(FileDownload {
            filename: resolved.file_name().unwrap_or_default(),
            size,
            file,
        })
    }

    /// Read up to `chunk_size` bytes starting at `offset`.
    ///
    /// A `chunk_size` of 0 selects the default; larger values are clamped to
    /// [`MAX_CHUNK_SIZE`]. Reading at exactly the end of the file returns an
    /// empty last chunk.
    pub fn read_chunk(
        &self,
        resolved: &ResolvedPath,
        offset: u64,
        chunk_size: u32,
    ) -> FileResult<Chunk> {
        let FileDownload { size, mut file, .. } = self.send(resolved)?;

        if offset > size {
            return Err(FileError::InvalidOffset { offset, size });
        }

        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        };
        let want = u64::from(chunk_size).min(size - offset);

        file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut data)?;

        let is_last = offset + data.len() as u64 >= size;
        Ok(Chunk {
            data,
            total_size: size,
            is_last,
        })
    }

    fn file_size(&self, resolved: &ResolvedPath) -> FileResult<u64> {
        let metadata = fs::metadata(resolved.path())
            .map_err(|e| FileError::from_io(e, resolved.relative()))?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(resolved.relative().to_string()));
        }
        Ok(metadata.len())
    }
}

fn temp_path_for(destination: &Path, fallback_dir: &Path) -> PathBuf {
    let dir = destination.parent().unwrap_or(fallback_dir);
    dir.join(format!(".warden-upload-{:016x}.tmp", rand::random::<u64>()))
}
