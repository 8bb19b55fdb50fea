//! Package installation engine.
//!
//! Provides:
//! - Parsing package requests (`name@range`)
//! - Fetching package documents from a CouchDB registry, once per name
//! - Resolving explicit versions, dist-tags and ranges under a stability policy
//! - A run-scoped dedup ledger and a fan-in completion queue
//! - Per-request installers that download and extract tarballs
//! - Orchestration of a whole recursive install

pub mod document;
pub mod error;
pub mod fetcher;
pub mod install;
pub mod installer;
pub mod ledger;
pub mod marker;
pub mod queue;
pub mod registry;
pub mod spec;
pub mod tarball;
pub mod version;

pub use document::{DependencyMap, Dist, PackageDocument, VersionRecord, DEFAULT_DEPENDENCY_KEY};
pub use error::{codes as pkg_codes, PkgError};
pub use fetcher::DocumentFetcher;
pub use install::{install, InstallOptions, DEFAULT_CONCURRENCY};
pub use installer::{InstallOutcome, InstallerState, SkipReason};
pub use ledger::{package_key, Ledger, LedgerSnapshot};
pub use marker::MARKER_FILE;
pub use queue::{CompletionHandle, CompletionOutcome, CompletionQueue};
pub use registry::{
    sanitize_tarball_url, RegistryClient, RegistryConfig, DEFAULT_REGISTRY, REGISTRY_ENV,
};
pub use spec::{validate_package_name, PackageRequest};
pub use tarball::MAX_TARBALL_SIZE;
pub use version::{
    resolve_document, resolve_version, RangeSet, RequestKind, Resolution, ResolvePolicy,
    ResolveWarning, Stability, WarningKind,
};
