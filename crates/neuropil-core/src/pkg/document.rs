//! Registry package documents.
//!
//! A CouchDB registry stores one document per package name. Each document
//! embeds every published version's manifest under `versions`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Dependency map: name -> range or explicit version.
pub type DependencyMap = BTreeMap<String, String>;

/// Dependency key read when none is configured.
pub const DEFAULT_DEPENDENCY_KEY: &str = "dependencies";

/// The registry's per-package record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
}

/// One published version's manifest.
///
/// Fields beyond `version` and `dist` are kept verbatim so that any
/// configured dependency key can be read from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dist: Dist,
    #[serde(flatten)]
    pub manifest: Map<String, Value>,
}

/// Distribution info for a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: String,
    #[serde(default)]
    pub shasum: String,
}

impl PackageDocument {
    /// Parse a document from a registry JSON body.
    ///
    /// # Errors
    /// Returns an error if the body is not a valid package document.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// All published version strings.
    pub fn version_strings(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// The record for an exact version string.
    #[must_use]
    pub fn record(&self, version: &str) -> Option<&VersionRecord> {
        self.versions.get(version)
    }

    /// The version a dist-tag points at.
    #[must_use]
    pub fn tagged(&self, tag: &str) -> Option<&str> {
        self.dist_tags.get(tag).map(String::as_str)
    }
}

impl VersionRecord {
    /// Collect dependencies declared under the given keys.
    ///
    /// Each key may be a dotted path into nested objects
    /// (`cortex.dependencies`). Maps from several keys are merged in order;
    /// a later key wins on conflicting names. Non-string ranges are ignored.
    #[must_use]
    pub fn dependencies<S: AsRef<str>>(&self, keys: &[S]) -> DependencyMap {
        let mut deps = DependencyMap::new();

        for key in keys {
            let Some(Value::Object(obj)) = self.member(key.as_ref()) else {
                continue;
            };
            for (name, range) in obj {
                if let Some(range) = range.as_str() {
                    deps.insert(name.clone(), range.to_string());
                }
            }
        }

        deps
    }

    fn member(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut value = self.manifest.get(parts.next()?)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }
}
