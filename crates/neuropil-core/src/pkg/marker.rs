//! Content marker for extracted versions.
//!
//! After a successful extraction the published shasum is written to
//! `<version dir>/.neuropil-shasum`. A later run that finds the same shasum
//! there skips the download entirely.

use super::error::PkgError;
use neuropil_util::fs::{atomic_write, read_trimmed};
use std::io;
use std::path::{Path, PathBuf};

/// Marker file name inside a version directory.
pub const MARKER_FILE: &str = ".neuropil-shasum";

#[must_use]
pub fn marker_path(version_dir: &Path) -> PathBuf {
    version_dir.join(MARKER_FILE)
}

/// Read the recorded shasum, if any.
///
/// # Errors
/// Returns an error if the marker exists but cannot be read.
pub fn read_marker(version_dir: &Path) -> Result<Option<String>, PkgError> {
    let path = marker_path(version_dir);
    read_trimmed(&path).map_err(|e| PkgError::io(&path, &e))
}

/// Record the shasum of the extracted content.
///
/// # Errors
/// Returns an error if the marker cannot be written.
pub fn write_marker(version_dir: &Path, shasum: &str) -> Result<(), PkgError> {
    let path = marker_path(version_dir);
    atomic_write(&path, shasum.as_bytes()).map_err(|e| PkgError::io(&path, &e))
}

/// Whether the version directory already holds content with `shasum`.
///
/// An empty published shasum never matches.
///
/// # Errors
/// Returns an error if the marker exists but cannot be read.
pub fn is_current(version_dir: &Path, shasum: &str) -> Result<bool, PkgError> {
    if shasum.is_empty() {
        return Ok(false);
    }
    Ok(read_marker(version_dir)?.as_deref() == Some(shasum))
}

/// [`is_current`] on the blocking pool.
///
/// # Errors
/// Returns an error if the marker cannot be read or the task fails.
pub async fn is_current_blocking(
    version_dir: PathBuf,
    shasum: String,
) -> Result<bool, PkgError> {
    let path = marker_path(&version_dir);
    tokio::task::spawn_blocking(move || is_current(&version_dir, &shasum))
        .await
        .map_err(|e| PkgError::io(&path, &io::Error::other(e)))?
}

/// [`write_marker`] on the blocking pool.
///
/// # Errors
/// Returns an error if the marker cannot be written or the task fails.
pub async fn write_marker_blocking(
    version_dir: PathBuf,
    shasum: String,
) -> Result<(), PkgError> {
    let path = marker_path(&version_dir);
    tokio::task::spawn_blocking(move || write_marker(&version_dir, &shasum))
        .await
        .map_err(|e| PkgError::io(&path, &io::Error::other(e)))?
}
