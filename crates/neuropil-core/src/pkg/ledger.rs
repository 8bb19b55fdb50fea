//! Run-scoped dedup ledger.
//!
//! Every installer in a run shares one ledger. It records what was requested,
//! how ranges resolved, which concrete versions are installed and the
//! dependency edges discovered along the way. All mutation goes through one
//! mutex; check-and-set operations are atomic with respect to each other.

use super::document::{DependencyMap, PackageDocument};
use super::version::ResolveWarning;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Format the `name@version` key used in the installed set.
#[must_use]
pub fn package_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

#[derive(Debug, Default)]
struct LedgerState {
    origins: BTreeMap<String, BTreeSet<String>>,
    requested: BTreeMap<String, BTreeSet<String>>,
    ranges: BTreeMap<String, BTreeMap<String, String>>,
    dependencies: BTreeMap<String, BTreeMap<String, DependencyMap>>,
    installed: HashSet<String>,
    documents: HashMap<String, Arc<PackageDocument>>,
    warnings: Vec<ResolveWarning>,
}

/// Shared dedup ledger for one install run.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a root request.
    pub async fn save_origin(&self, name: &str, request: &str) {
        let mut state = self.state.lock().await;
        state
            .origins
            .entry(name.to_string())
            .or_default()
            .insert(request.to_string());
    }

    /// Claim a `(name, request)` pair for scheduling.
    ///
    /// Returns `true` exactly once per pair per run; the caller that gets
    /// `true` is the one that spawns the installer.
    pub async fn try_schedule(&self, name: &str, request: &str) -> bool {
        let mut state = self.state.lock().await;
        state
            .requested
            .entry(name.to_string())
            .or_default()
            .insert(request.to_string())
    }

    /// Check whether a concrete version is installed (or being installed).
    pub async fn exists(&self, name: &str, version: &str) -> bool {
        let state = self.state.lock().await;
        state.installed.contains(&package_key(name, version))
    }

    /// Claim a concrete version for installation.
    ///
    /// Returns `true` if the pair was not installed before. Entries are
    /// never removed during a run.
    pub async fn mark_installed(&self, name: &str, version: &str) -> bool {
        let mut state = self.state.lock().await;
        state.installed.insert(package_key(name, version))
    }

    /// Memoize a range resolution. The first write for a `(name, range)`
    /// wins; returns `false` if it was already set.
    pub async fn save_range(&self, name: &str, range: &str, version: &str) -> bool {
        let mut state = self.state.lock().await;
        let ranges = state.ranges.entry(name.to_string()).or_default();
        if ranges.contains_key(range) {
            return false;
        }
        ranges.insert(range.to_string(), version.to_string());
        true
    }

    /// Look up a memoized range resolution.
    pub async fn range(&self, name: &str, range: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.ranges.get(name)?.get(range).cloned()
    }

    /// Record the dependency set captured for a resolved version.
    pub async fn save_dependencies(&self, name: &str, version: &str, deps: DependencyMap) {
        let mut state = self.state.lock().await;
        state
            .dependencies
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), deps);
    }

    /// Cache a fetched document.
    pub async fn save_document(&self, doc: Arc<PackageDocument>) {
        let mut state = self.state.lock().await;
        state.documents.insert(doc.name.clone(), doc);
    }

    /// A previously fetched document.
    pub async fn document(&self, name: &str) -> Option<Arc<PackageDocument>> {
        let state = self.state.lock().await;
        state.documents.get(name).cloned()
    }

    pub async fn record_warning(&self, warning: ResolveWarning) {
        let mut state = self.state.lock().await;
        state.warnings.push(warning);
    }

    /// Copy out everything a caller needs to persist a lockfile.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock().await;
        let mut installed: Vec<String> = state.installed.iter().cloned().collect();
        installed.sort();

        LedgerSnapshot {
            origins: state.origins.clone(),
            ranges: state.ranges.clone(),
            dependencies: state.dependencies.clone(),
            installed,
            warnings: state.warnings.clone(),
        }
    }
}

/// Immutable view of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    /// Root requests per package name.
    pub origins: BTreeMap<String, BTreeSet<String>>,
    /// name -> range -> resolved version.
    pub ranges: BTreeMap<String, BTreeMap<String, String>>,
    /// name -> version -> declared dependencies.
    pub dependencies: BTreeMap<String, BTreeMap<String, DependencyMap>>,
    /// Sorted `name@version` keys.
    pub installed: Vec<String>,
    pub warnings: Vec<ResolveWarning>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn is_installed(&self, name: &str, version: &str) -> bool {
        self.installed
            .binary_search(&package_key(name, version))
            .is_ok()
    }

    #[must_use]
    pub fn dependencies_of(&self, name: &str, version: &str) -> Option<&DependencyMap> {
        self.dependencies.get(name)?.get(version)
    }

    #[must_use]
    pub fn resolved_range(&self, name: &str, range: &str) -> Option<&str> {
        self.ranges.get(name)?.get(range).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_schedule_once_per_request() {
        let ledger = Ledger::new();
        assert!(ledger.try_schedule("a", "^1.0.0").await);
        assert!(!ledger.try_schedule("a", "^1.0.0").await);
        assert!(ledger.try_schedule("a", "~1.0.0").await);
    }

    #[tokio::test]
    async fn test_mark_installed_is_check_and_set() {
        let ledger = Arc::new(Ledger::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.mark_installed("c", "1.0.0").await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(ledger.exists("c", "1.0.0").await);
        assert!(!ledger.exists("c", "1.0.1").await);
    }

    #[tokio::test]
    async fn test_save_range_first_write_wins() {
        let ledger = Ledger::new();
        assert!(ledger.save_range("a", "^1.0.0", "1.2.0").await);
        assert!(!ledger.save_range("a", "^1.0.0", "1.3.0").await);
        assert_eq!(ledger.range("a", "^1.0.0").await.as_deref(), Some("1.2.0"));
        assert_eq!(ledger.range("a", "^2.0.0").await, None);
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let ledger = Ledger::new();
        ledger.save_origin("pkgA", "^1.0.0").await;
        ledger.mark_installed("pkgB", "2.1.0").await;
        ledger.mark_installed("pkgA", "1.2.0").await;

        let mut deps = DependencyMap::new();
        deps.insert("pkgB".to_string(), "^2.0.0".to_string());
        ledger.save_dependencies("pkgA", "1.2.0", deps).await;

        let snap = ledger.snapshot().await;
        assert_eq!(snap.installed, vec!["pkgA@1.2.0", "pkgB@2.1.0"]);
        assert!(snap.is_installed("pkgB", "2.1.0"));
        assert_eq!(snap.dependencies_of("pkgA", "1.2.0").unwrap()["pkgB"], "^2.0.0");
        assert!(snap.origins["pkgA"].contains("^1.0.0"));
    }

    #[tokio::test]
    async fn test_document_cache() {
        let ledger = Ledger::new();
        let doc = Arc::new(PackageDocument {
            name: "a".to_string(),
            ..PackageDocument::default()
        });
        ledger.save_document(Arc::clone(&doc)).await;
        assert_eq!(ledger.document("a").await, Some(doc));
        assert!(ledger.document("b").await.is_none());
    }
}
