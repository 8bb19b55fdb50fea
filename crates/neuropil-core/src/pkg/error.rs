//! Package manager error types.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Package manager error codes.
pub mod codes {
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_RANGE_INVALID: &str = "PKG_RANGE_INVALID";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_VERSION_NOT_FOUND: &str = "PKG_VERSION_NOT_FOUND";
    pub const PKG_STABLE_NOT_FOUND: &str = "PKG_STABLE_NOT_FOUND";
    pub const PKG_TARBALL_FETCH_FAILED: &str = "PKG_TARBALL_FETCH_FAILED";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_IO_ERROR: &str = "PKG_IO_ERROR";
    pub const PKG_INSTALL_ABANDONED: &str = "PKG_INSTALL_ABANDONED";
}

/// Package manager error.
///
/// `Clone` so that a single failed document fetch can be handed to every
/// installer waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PkgError {
    #[error("Invalid package spec: {message}")]
    InvalidSpec { message: String },

    #[error("Invalid version range '{range}' for {name}")]
    InvalidRange { name: String, range: String },

    #[error("Package not found: {name}")]
    PkgNotFound { name: String },

    #[error("No version of {name} matches '{request}'")]
    VersionNotFound { name: String, request: String },

    #[error("No stable version of {name} matches '{request}'{}", fallback_hint(.fallback))]
    StableNotFound {
        name: String,
        request: String,
        fallback: Option<String>,
    },

    #[error("Tarball download failed with status {status} for '{url}'")]
    TarballFetchError { url: String, status: u16 },

    #[error("{message}")]
    DownloadFailed { message: String },

    #[error("{message}")]
    Registry { message: String },

    #[error("{message}")]
    ExtractFailed { message: String },

    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("{message}")]
    Abandoned { message: String },
}

fn fallback_hint(fallback: &Option<String>) -> String {
    fallback
        .as_deref()
        .map(|v| format!(" (prerelease {v} is available; request it explicitly)"))
        .unwrap_or_default()
}

impl PkgError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSpec { .. } => codes::PKG_SPEC_INVALID,
            Self::InvalidRange { .. } => codes::PKG_RANGE_INVALID,
            Self::PkgNotFound { .. } => codes::PKG_NOT_FOUND,
            Self::VersionNotFound { .. } => codes::PKG_VERSION_NOT_FOUND,
            Self::StableNotFound { .. } => codes::PKG_STABLE_NOT_FOUND,
            Self::TarballFetchError { .. } => codes::PKG_TARBALL_FETCH_FAILED,
            Self::DownloadFailed { .. } => codes::PKG_DOWNLOAD_FAILED,
            Self::Registry { .. } => codes::PKG_REGISTRY_ERROR,
            Self::ExtractFailed { .. } => codes::PKG_EXTRACT_FAILED,
            Self::Io { .. } => codes::PKG_IO_ERROR,
            Self::Abandoned { .. } => codes::PKG_INSTALL_ABANDONED,
        }
    }

    /// Create a spec invalid error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: msg.into(),
        }
    }

    /// Create a range invalid error.
    #[must_use]
    pub fn range_invalid(name: &str, range: &str) -> Self {
        Self::InvalidRange {
            name: name.to_string(),
            range: range.to_string(),
        }
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::PkgNotFound {
            name: name.to_string(),
        }
    }

    /// Create a version not found error.
    #[must_use]
    pub fn version_not_found(name: &str, request: &str) -> Self {
        Self::VersionNotFound {
            name: name.to_string(),
            request: request.to_string(),
        }
    }

    /// Create a stable-version-not-found error carrying the prerelease the
    /// user could request instead.
    #[must_use]
    pub fn stable_not_found(name: &str, request: &str, fallback: Option<String>) -> Self {
        Self::StableNotFound {
            name: name.to_string(),
            request: request.to_string(),
            fallback,
        }
    }

    /// Create a tarball fetch error for a non-success HTTP status.
    #[must_use]
    pub fn tarball_fetch(url: &str, status: u16) -> Self {
        Self::TarballFetchError {
            url: url.to_string(),
            status,
        }
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: msg.into(),
        }
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry {
            message: msg.into(),
        }
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::ExtractFailed {
            message: msg.into(),
        }
    }

    /// Wrap a filesystem error with the path it happened on.
    #[must_use]
    pub fn io(path: &Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Create an abandoned-operation error.
    pub fn abandoned(msg: impl Into<String>) -> Self {
        Self::Abandoned {
            message: msg.into(),
        }
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::registry(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::registry(format!("Connection failed: {e}"))
        } else {
            Self::registry(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::registry(format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::spec_invalid("bad spec");
        assert_eq!(err.code(), codes::PKG_SPEC_INVALID);
        assert!(err.to_string().contains("bad spec"));
    }

    #[test]
    fn test_stable_not_found_mentions_fallback() {
        let err = PkgError::stable_not_found("a", "^1.0.0", Some("1.0.0-alpha".into()));
        let msg = err.to_string();
        assert!(msg.contains("1.0.0-alpha"), "{msg}");

        let err = PkgError::stable_not_found("a", "^1.0.0", None);
        assert!(!err.to_string().contains("prerelease"));
    }

    #[test]
    fn test_tarball_fetch_carries_status() {
        let err = PkgError::tarball_fetch("http://r/a/-/a-1.0.0.tgz", 500);
        assert_eq!(err.code(), codes::PKG_TARBALL_FETCH_FAILED);
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::PKG_SPEC_INVALID,
            codes::PKG_RANGE_INVALID,
            codes::PKG_NOT_FOUND,
            codes::PKG_VERSION_NOT_FOUND,
            codes::PKG_STABLE_NOT_FOUND,
            codes::PKG_TARBALL_FETCH_FAILED,
            codes::PKG_DOWNLOAD_FAILED,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_EXTRACT_FAILED,
            codes::PKG_IO_ERROR,
            codes::PKG_INSTALL_ABANDONED,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
