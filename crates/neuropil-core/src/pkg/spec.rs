//! Package request parsing.
//!
//! Parses requests like:
//! - `jquery` (same as `jquery@latest`)
//! - `jquery@1.9.2`
//! - `jquery@~1.9.0`
//! - `@scope/name@^2`

use super::error::PkgError;
use std::fmt;

/// Range used when a request does not name one.
pub const DEFAULT_RANGE: &str = "latest";

/// A root or transitive package request: a name plus a range or explicit
/// version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageRequest {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Semver range, explicit version or dist-tag.
    pub range: String,
}

impl PackageRequest {
    /// Build a request from already-separated parts.
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        let range = range.into();
        let range = if range.trim().is_empty() {
            DEFAULT_RANGE.to_string()
        } else {
            range
        };
        Self {
            name: name.into(),
            range,
        }
    }

    /// Build a dependency edge read from a manifest.
    ///
    /// # Errors
    /// Returns an error if the name could not be used as a directory
    /// under the install dir.
    pub fn dependency(name: &str, range: impl Into<String>) -> Result<Self, PkgError> {
        validate_name(name, name)?;
        Ok(Self::new(name, range))
    }

    /// Parse a `name@range` string.
    ///
    /// # Errors
    /// Returns an error if the name is empty or malformed, or if an `@` is
    /// present with nothing after it.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package request"));
        }

        // The version delimiter is the first '@' after any leading scope marker
        let search_from = usize::from(input.starts_with('@'));
        let (name, range) = match input[search_from..].find('@') {
            Some(pos) => {
                let at = pos + search_from;
                let range = &input[at + 1..];
                if range.is_empty() {
                    return Err(PkgError::spec_invalid(format!(
                        "Empty version range in '{input}'"
                    )));
                }
                (&input[..at], range)
            }
            None => (input, DEFAULT_RANGE),
        };

        validate_name(name, input)?;

        Ok(Self {
            name: name.to_string(),
            range: range.to_string(),
        })
    }

    /// Check if this is a scoped package.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.name.starts_with('@')
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.range)
    }
}

/// Check that `name` is a plain or `@scope/name` package name.
///
/// # Errors
/// Returns `InvalidSpec` for empty segments, path separators, segments
/// starting with `.` and other characters outside `[A-Za-z0-9._-]`.
pub fn validate_package_name(name: &str) -> Result<(), PkgError> {
    validate_name(name, name)
}

fn validate_name(name: &str, input: &str) -> Result<(), PkgError> {
    let bare = if let Some(scoped) = name.strip_prefix('@') {
        let Some((scope, bare)) = scoped.split_once('/') else {
            return Err(PkgError::spec_invalid(format!(
                "Scoped package is missing '/' in '{input}'"
            )));
        };
        check_segment(scope, input)?;
        bare
    } else {
        name
    };

    check_segment(bare, input)
}

fn check_segment(segment: &str, input: &str) -> Result<(), PkgError> {
    if segment.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Empty package name in '{input}'"
        )));
    }

    if segment.starts_with('.') {
        return Err(PkgError::spec_invalid(format!(
            "Package name segment '{segment}' starts with '.' in '{input}'"
        )));
    }

    if let Some(c) = segment
        .chars()
        .find(|c| !c.is_alphanumeric() && !matches!(c, '-' | '_' | '.'))
    {
        return Err(PkgError::spec_invalid(format!(
            "Invalid character '{c}' in package name '{input}'"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name_defaults_to_latest() {
        let req = PackageRequest::parse("jquery").unwrap();
        assert_eq!(req.name, "jquery");
        assert_eq!(req.range, "latest");
    }

    #[test]
    fn test_parse_with_version() {
        let req = PackageRequest::parse("jquery@1.9.2").unwrap();
        assert_eq!(req.name, "jquery");
        assert_eq!(req.range, "1.9.2");
    }

    #[test]
    fn test_parse_with_range() {
        let req = PackageRequest::parse("pkgA@^1.0.0").unwrap();
        assert_eq!(req, PackageRequest::new("pkgA", "^1.0.0"));
    }

    #[test]
    fn test_parse_scoped() {
        let req = PackageRequest::parse("@types/node@^20").unwrap();
        assert_eq!(req.name, "@types/node");
        assert_eq!(req.range, "^20");
        assert!(req.is_scoped());

        let req = PackageRequest::parse("@types/node").unwrap();
        assert_eq!(req.range, "latest");
    }

    #[test]
    fn test_parse_errors() {
        assert!(PackageRequest::parse("").is_err());
        assert!(PackageRequest::parse("jquery@").is_err());
        assert!(PackageRequest::parse("@scope").is_err());
        assert!(PackageRequest::parse("@scope/").is_err());
        assert!(PackageRequest::parse("@/x").is_err());
        assert!(PackageRequest::parse("bad name@1.0.0").is_err());
    }

    #[test]
    fn test_names_cannot_leave_install_dir() {
        let names = [
            "..", ".", ".hidden", "../escaped", "/abs", "a/b", "@scope/..", "@../x", "a\\b",
        ];
        for name in names {
            assert_eq!(
                validate_package_name(name).unwrap_err().code(),
                "PKG_SPEC_INVALID",
                "{name}"
            );
        }
        assert!(validate_package_name("lodash.merge").is_ok());
        assert!(validate_package_name("@types/node").is_ok());
    }

    #[test]
    fn test_dependency_edge_is_validated() {
        let edge = PackageRequest::dependency("pkgB", "^1.0.0").unwrap();
        assert_eq!(edge, PackageRequest::new("pkgB", "^1.0.0"));
        assert_eq!(PackageRequest::dependency("pkgB", "").unwrap().range, "latest");
        assert!(PackageRequest::dependency("../escaped", "^1.0.0").is_err());
    }

    #[test]
    fn test_display_round_trips_key() {
        let req = PackageRequest::new("a", "");
        assert_eq!(req.to_string(), "a@latest");
    }
}
