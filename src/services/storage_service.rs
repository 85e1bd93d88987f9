//! src/services/storage_service.rs
//!
//! StorageService — writes uploads beneath `base_path/{year}/{month}/{day}/`
//! and resolves public paths back to files on disk. There is no metadata
//! store; the directory layout is the index.

use crate::models::storage_key::StorageKey;
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored file `{0}` not found")]
    NotFound(String),
    #[error("invalid path segment `{0}`")]
    InvalidSegment(String),
    #[error("failed to read upload body: {0}")]
    Body(#[source] BoxError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A file that has been fully written and moved into place.
#[derive(Debug)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// StorageService owns the upload root and performs all disk access:
/// - Store an upload under its `StorageKey` (temp file + atomic rename)
/// - Locate a previously stored file from its public path segments
/// - Check that the upload root is writable
#[derive(Clone, Debug)]
pub struct StorageService {
    /// Base directory on disk where uploads are stored.
    pub base_path: PathBuf,
}

const READY_MARKER: &[u8] = b"readyz";

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject segments that could step outside `base_path` once joined.
    fn ensure_segment_safe(segment: &str) -> StorageResult<()> {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidSegment(segment.to_string()));
        }
        if segment.bytes().any(|b| b == b'/' || b == b'\\' || b == b'\0') {
            return Err(StorageError::InvalidSegment(segment.to_string()));
        }
        Ok(())
    }

    /// Stream an upload to disk under `key`.
    ///
    /// - Creates the date directory if needed.
    /// - Writes chunks to a temporary file next to the destination.
    /// - Syncs, then renames into the final location.
    ///
    /// The temporary file is removed on every path that does not reach the
    /// rename, including when this future is dropped mid-upload.
    pub async fn store_stream<S, E>(
        &self,
        key: &StorageKey,
        stream: S,
    ) -> StorageResult<StoredFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<BoxError>,
    {
        let dir = key.directory(&self.base_path);
        fs::create_dir_all(&dir).await?;

        let file_path = key.filesystem_path(&self.base_path);
        let tmp_name = format!(".tmp-{}", Uuid::new_v4());
        let tmp = TempFileGuard::new(dir.join(tmp_name));
        let mut file = File::create(tmp.path()).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| StorageError::Body(err.into()))?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp.path(), &file_path).await?;
        tmp.disarm();

        debug!("stored {} bytes at {}", size_bytes, file_path.display());
        Ok(StoredFile {
            path: file_path,
            size_bytes,
        })
    }

    /// Resolve public path segments to an existing regular file.
    ///
    /// Segments are joined verbatim; the date parts are not parsed. Returns
    /// NotFound for missing paths and directories, InvalidSegment for
    /// traversal attempts, and Io for any other stat failure.
    pub async fn locate(
        &self,
        year: &str,
        month: &str,
        day: &str,
        filename: &str,
    ) -> StorageResult<PathBuf> {
        for segment in [year, month, day, filename] {
            Self::ensure_segment_safe(segment)?;
        }

        let path = self
            .base_path
            .join(year)
            .join(month)
            .join(day)
            .join(filename);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => return Ok(path),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        let relative = display_relative(&path, &self.base_path);
        Err(StorageError::NotFound(relative))
    }

    /// Write, read back and remove a small file directly under `base_path`.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let marker_name = format!(".readyz-{}", Uuid::new_v4());
        let marker = TempFileGuard::new(self.base_path.join(marker_name));
        fs::write(marker.path(), READY_MARKER).await?;
        let read_back = fs::read(marker.path()).await?;
        if read_back != READY_MARKER {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "readiness marker content mismatch",
            )));
        }
        Ok(())
    }
}

/// Deletes the file at `path` when dropped, unless disarmed first.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed temporary file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(
                "failed to remove temporary file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
