//! Represents the location of an uploaded file.

use chrono::{Datelike, Local};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// The date-partitioned name of a stored upload.
///
/// A key renders to the same relative path on disk and in the public URL:
/// `{year}/{month:02}/{day:02}/{id}{extension}`. Keys are minted once per
/// upload and never change afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageKey {
    /// Calendar year of the upload.
    pub year: i32,

    /// Month of the upload (1-12).
    pub month: u32,

    /// Day of month of the upload (1-31).
    pub day: u32,

    /// Random identifier; the unguessable part of the public URL.
    pub id: Uuid,

    /// Extension of the client filename including the leading dot, or empty.
    pub extension: String,
}

impl StorageKey {
    /// Mint a key for `filename` dated with the server's local time.
    pub fn generate(filename: &str) -> Self {
        Self::dated(filename, Local::now())
    }

    /// Mint a key for `filename` with a fresh identifier and the given date.
    pub fn dated(filename: &str, date: impl Datelike) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            id: Uuid::new_v4(),
            extension: extension_of(filename).to_string(),
        }
    }

    /// `{year}/{month:02}/{day:02}`
    pub fn date_dir(&self) -> String {
        format!("{}/{:02}/{:02}", self.year, self.month, self.day)
    }

    /// `{id}{extension}`
    pub fn file_name(&self) -> String {
        format!("{}{}", self.id, self.extension)
    }

    /// Path relative to both the upload root and the access prefix.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.date_dir(), self.file_name())
    }

    /// Directory under `root` that holds this key's file.
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(self.year.to_string())
            .join(format!("{:02}", self.month))
            .join(format!("{:02}", self.day))
    }

    /// Full on-disk location of this key under `root`.
    pub fn filesystem_path(&self, root: &Path) -> PathBuf {
        self.directory(root).join(self.file_name())
    }

    /// URL handed back to the uploader, e.g. `files/2024/03/05/<uuid>.png`.
    pub fn public_url(&self, access_prefix: &str) -> String {
        format!("{}/{}", access_prefix, self.relative_path())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path())
    }
}

/// Extension of the last path component of `filename`, starting at its final
/// dot. Returns an empty string when that component has no dot.
pub fn extension_of(filename: &str) -> &str {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    base.rfind('.').map(|idx| &base[idx..]).unwrap_or("")
}
