//! Tarball download and extraction.

use super::error::PkgError;
use super::registry::RegistryClient;
use flate2::read::GzDecoder;
use neuropil_util::fs::replace_path;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio::io::AsyncWriteExt;

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// File name a tarball is stored under inside its version directory.
///
/// Uses the last path segment of the URL, or `package.tgz` if there is none.
#[must_use]
pub fn tarball_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map_or_else(|| "package.tgz".to_string(), ToString::to_string)
}

/// Stream a tarball from `url` into the file at `dest`.
///
/// The body is written chunk by chunk, never buffered whole. A partial file
/// is removed on failure. Returns the number of bytes written.
///
/// # Errors
/// - `TarballFetchError` for a non-2xx response
/// - `DownloadFailed` for transport failures or bodies over `max_bytes`
/// - `Io` if the file cannot be written
pub async fn download_tarball(
    registry: &RegistryClient,
    url: &str,
    dest: &Path,
    max_bytes: u64,
) -> Result<u64, PkgError> {
    let mut response = registry
        .tarball_request(url)
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Failed to download '{url}': {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PkgError::tarball_fetch(url, status.as_u16()));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {len} bytes (max: {max_bytes})"
            )));
        }
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| PkgError::io(dest, &e))?;

    let written = async {
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PkgError::download_failed(format!("Failed to read '{url}': {e}")))?
        {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(PkgError::download_failed(format!(
                    "Tarball too large: more than {max_bytes} bytes from '{url}'"
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| PkgError::io(dest, &e))?;
        }
        file.flush().await.map_err(|e| PkgError::io(dest, &e))?;
        Ok(written)
    }
    .await;

    if written.is_err() {
        drop(file);
        let _ = tokio::fs::remove_file(dest).await;
    }
    written
}

/// Extract a `.tgz` into `version_dir`, replacing prior outputs.
///
/// Entries are unpacked into a scratch directory first. Each top-level
/// output (usually `package/`) then replaces the same-named path in
/// `version_dir`, so re-extraction never leaves stale files behind.
/// Returns the replaced paths.
///
/// # Errors
/// Returns an error if the archive is invalid, contains absolute or
/// traversing paths, or the filesystem operations fail.
pub fn extract_tgz(archive: &Path, version_dir: &Path) -> Result<Vec<PathBuf>, PkgError> {
    fs::create_dir_all(version_dir).map_err(|e| PkgError::io(version_dir, &e))?;

    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(version_dir)
        .map_err(|e| PkgError::io(version_dir, &e))?;

    let file = File::open(archive).map_err(|e| PkgError::io(archive, &e))?;
    unpack_entries(file, scratch.path())?;

    let mut outputs = Vec::new();
    for entry in fs::read_dir(scratch.path()).map_err(|e| PkgError::io(scratch.path(), &e))? {
        let entry = entry.map_err(|e| PkgError::io(scratch.path(), &e))?;
        let target = version_dir.join(entry.file_name());
        replace_path(&entry.path(), &target).map_err(|e| PkgError::io(&target, &e))?;
        outputs.push(target);
    }

    if outputs.is_empty() {
        return Err(PkgError::extract_failed(format!(
            "Tarball '{}' has no entries",
            archive.display()
        )));
    }

    outputs.sort();
    Ok(outputs)
}

/// Run [`extract_tgz`] on the blocking pool.
///
/// # Errors
/// See [`extract_tgz`]; a panicked or cancelled extraction becomes
/// `ExtractFailed`.
pub async fn extract_tgz_blocking(
    archive: PathBuf,
    version_dir: PathBuf,
) -> Result<Vec<PathBuf>, PkgError> {
    tokio::task::spawn_blocking(move || extract_tgz(&archive, &version_dir))
        .await
        .map_err(|e| PkgError::extract_failed(format!("Extraction task failed: {e}")))?
}

fn unpack_entries(reader: impl io::Read, dest: &Path) -> Result<(), PkgError> {
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entries: {e}")))?
    {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();
        let shown = path.to_string_lossy();

        if path.is_absolute() {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains absolute path: {shown}"
            )));
        }

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains path traversal: {shown}"
            )));
        }

        let dest_path = dest.join(&path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| PkgError::io(parent, &e))?;
        }

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| PkgError::io(&dest_path, &e))?;
        } else if kind.is_file() {
            let mut file = File::create(&dest_path).map_err(|e| PkgError::io(&dest_path, &e))?;
            io::copy(&mut entry, &mut file).map_err(|e| PkgError::io(&dest_path, &e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
                }
            }
        }
        // Symlinks and special entries are skipped
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (path, data) in files {
                let mut header = tar::Header::new_gnu();
                header.set_path(path).unwrap();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, *data).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_archive(dir: &Path, bytes: &[u8]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("pkg-1.0.0.tgz");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_tarball_filename() {
        assert_eq!(
            tarball_filename("http://r/jquery/-/jquery-1.9.2.tgz"),
            "jquery-1.9.2.tgz"
        );
        assert_eq!(tarball_filename("http://r/a.tgz?token=x"), "a.tgz");
        assert_eq!(tarball_filename("http://r/dir/"), "package.tgz");
    }

    #[test]
    fn test_extract_tarball() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("pkg").join("1.0.0");
        let archive = write_archive(
            &version_dir,
            &tgz(&[
                ("package/package.json", br#"{"name":"pkg","version":"1.0.0"}"#),
                ("package/index.js", b"module.exports = 42;"),
            ]),
        );

        let outputs = extract_tgz(&archive, &version_dir).unwrap();
        assert_eq!(outputs, vec![version_dir.join("package")]);
        assert!(version_dir.join("package/package.json").exists());
        assert_eq!(
            fs::read_to_string(version_dir.join("package/index.js")).unwrap(),
            "module.exports = 42;"
        );
    }

    #[test]
    fn test_reextract_replaces_old_contents() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");

        let stale = version_dir.join("package");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("stale.js"), "old").unwrap();
        fs::write(stale.join("index.js"), "old").unwrap();

        let archive = write_archive(&version_dir, &tgz(&[("package/index.js", b"new")]));
        extract_tgz(&archive, &version_dir).unwrap();

        assert!(!stale.join("stale.js").exists());
        assert_eq!(fs::read_to_string(stale.join("index.js")).unwrap(), "new");
        // The archive itself is untouched
        assert!(archive.exists());
    }

    #[test]
    fn test_non_package_prefix() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");
        let archive = write_archive(&version_dir, &tgz(&[("node/index.d.ts", b"test")]));

        extract_tgz(&archive, &version_dir).unwrap();
        assert!(version_dir.join("node/index.d.ts").exists());
    }

    #[test]
    fn test_reject_empty_tarball() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");
        let archive = write_archive(&version_dir, &tgz(&[]));

        let err = extract_tgz(&archive, &version_dir).unwrap_err();
        assert_eq!(err.code(), "PKG_EXTRACT_FAILED");
    }

    #[test]
    fn test_reject_garbage() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");
        let archive = write_archive(&version_dir, b"not a tarball");

        assert!(extract_tgz(&archive, &version_dir).is_err());
    }

    #[test]
    fn test_scratch_dir_is_cleaned_up() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");
        let archive = write_archive(&version_dir, &tgz(&[("package/a.js", b"a")]));

        extract_tgz(&archive, &version_dir).unwrap();

        let leftovers: Vec<_> = fs::read_dir(&version_dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".extract-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_extract_on_blocking_pool() {
        let dir = tempdir().unwrap();
        let version_dir = dir.path().join("1.0.0");
        let archive = write_archive(&version_dir, &tgz(&[("package/a.js", b"a")]));

        let outputs = extract_tgz_blocking(archive, version_dir.clone())
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(version_dir.join("package/a.js").exists());
    }
}
