//! Per-request installer.
//!
//! Each scheduled `(name, request)` pair gets one installer, which walks a
//! linear state machine:
//!
//! ```text
//! Pending -> Resolved -> DependenciesEmitted -> Downloaded -> Extracted
//!     \          \               \
//!      `----------`---------------`--> Skipped
//! ```
//!
//! Any failure aborts the remaining states and is reported to the
//! completion queue by the caller.

use super::document::{DependencyMap, PackageDocument, VersionRecord};
use super::error::PkgError;
use super::fetcher::DocumentFetcher;
use super::ledger::Ledger;
use super::marker;
use super::queue::{CompletionHandle, CompletionQueue};
use super::registry::sanitize_tarball_url;
use super::spec::{validate_package_name, PackageRequest};
use super::tarball::{download_tarball, extract_tgz_blocking, tarball_filename, MAX_TARBALL_SIZE};
use super::version::{resolve_document, RequestKind, ResolvePolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Dependency edges found by one installer, sent back to the orchestrator.
///
/// `handle` keeps the run open until the orchestrator has scheduled the
/// edges.
#[derive(Debug)]
pub struct Discovered {
    pub edges: Vec<PackageRequest>,
    pub handle: CompletionHandle,
}

/// Run-wide settings every installer reads.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub install_dir: PathBuf,
    pub dependency_keys: Vec<String>,
    pub recursive: bool,
    pub policy: ResolvePolicy,
}

/// Everything installers in one run share.
#[derive(Debug)]
pub struct InstallContext {
    pub settings: InstallSettings,
    pub ledger: Arc<Ledger>,
    pub fetcher: Arc<DocumentFetcher>,
    pub queue: CompletionQueue,
    pub discovered: mpsc::UnboundedSender<Discovered>,
    /// Gates download and extraction.
    pub permits: Arc<Semaphore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerState {
    Pending,
    Resolved,
    DependenciesEmitted,
    Downloaded,
    Extracted,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another installer owns this concrete version.
    AlreadyInstalled,
    /// The version directory already holds content with the published shasum.
    UpToDate,
}

/// How an installer finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { name: String, version: String },
    Skipped {
        name: String,
        version: String,
        reason: SkipReason,
    },
}

#[derive(Debug)]
struct Resolved {
    version: String,
    record: VersionRecord,
    tarball_url: String,
    shasum: String,
    version_dir: PathBuf,
}

/// Installs one request.
#[derive(Debug)]
pub struct Installer {
    ctx: Arc<InstallContext>,
    request: PackageRequest,
    state: InstallerState,
}

impl Installer {
    #[must_use]
    pub fn new(ctx: Arc<InstallContext>, request: PackageRequest) -> Self {
        Self {
            ctx,
            request,
            state: InstallerState::Pending,
        }
    }

    /// Drive the state machine to completion.
    ///
    /// # Errors
    /// Returns the first error hit by any state.
    pub async fn run(mut self) -> Result<InstallOutcome, PkgError> {
        validate_package_name(&self.request.name)?;

        let resolved = self.resolve().await?;
        let name = self.request.name.clone();

        if !self.ctx.ledger.mark_installed(&name, &resolved.version).await {
            return Ok(self.skip(resolved.version, SkipReason::AlreadyInstalled));
        }

        self.emit_dependencies(&resolved).await?;

        let current =
            marker::is_current_blocking(resolved.version_dir.clone(), resolved.shasum.clone())
                .await?;
        if current {
            return Ok(self.skip(resolved.version, SkipReason::UpToDate));
        }

        // Held through extraction so at most `concurrency` versions touch
        // the network and disk at once
        let _permit = Arc::clone(&self.ctx.permits)
            .acquire_owned()
            .await
            .map_err(|_| PkgError::abandoned("download slots closed"))?;

        let archive = self.download(&resolved).await?;
        self.extract(&resolved, archive).await?;

        Ok(InstallOutcome::Installed {
            name,
            version: resolved.version,
        })
    }

    fn transition(&mut self, next: InstallerState) {
        debug!(
            package = %self.request,
            from = ?self.state,
            to = ?next,
            "installer state"
        );
        self.state = next;
    }

    fn skip(&mut self, version: String, reason: SkipReason) -> InstallOutcome {
        self.transition(InstallerState::Skipped);
        debug!(package = %self.request.name, %version, ?reason, "skipped");
        InstallOutcome::Skipped {
            name: self.request.name.clone(),
            version,
            reason,
        }
    }

    async fn resolve(&mut self) -> Result<Resolved, PkgError> {
        let PackageRequest { name, range } = &self.request;
        let doc = self.ctx.fetcher.get_document(name).await?;

        let version = match self.ctx.ledger.range(name, range).await {
            Some(memo) => memo,
            None => self.resolve_fresh(&doc).await?,
        };

        let record = doc
            .record(&version)
            .cloned()
            .ok_or_else(|| PkgError::version_not_found(name, range))?;

        let resolved = Resolved {
            tarball_url: sanitize_tarball_url(&record.dist.tarball),
            shasum: record.dist.shasum.clone(),
            version_dir: self.ctx.settings.install_dir.join(name).join(&version),
            version,
            record,
        };

        self.transition(InstallerState::Resolved);
        Ok(resolved)
    }

    async fn resolve_fresh(&self, doc: &PackageDocument) -> Result<String, PkgError> {
        let PackageRequest { name, range } = &self.request;
        let resolution = resolve_document(doc, range, &self.ctx.settings.policy)?;

        if let Some(warning) = resolution.warning {
            warn!(package = %name, "{warning}");
            self.ctx.ledger.record_warning(warning).await;
        }

        if resolution.kind != RequestKind::Range {
            return Ok(resolution.version);
        }

        if self
            .ctx
            .ledger
            .save_range(name, range, &resolution.version)
            .await
        {
            return Ok(resolution.version);
        }

        // Lost the race to memoize; use whatever was recorded first
        Ok(self
            .ctx
            .ledger
            .range(name, range)
            .await
            .unwrap_or(resolution.version))
    }

    async fn emit_dependencies(&mut self, resolved: &Resolved) -> Result<(), PkgError> {
        let name = &self.request.name;
        let deps: DependencyMap = resolved
            .record
            .dependencies(&self.ctx.settings.dependency_keys);

        self.ctx
            .ledger
            .save_dependencies(name, &resolved.version, deps.clone())
            .await;

        if self.ctx.settings.recursive && !deps.is_empty() {
            let edges = deps
                .into_iter()
                .map(|(dep, range)| PackageRequest::dependency(&dep, range))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(package = %name, version = %resolved.version, count = edges.len(), "dependencies discovered");

            let handle = self
                .ctx
                .queue
                .register(format!("dependencies of {name}@{}", resolved.version));
            self.ctx
                .discovered
                .send(Discovered { edges, handle })
                .map_err(|_| PkgError::abandoned("install run stopped accepting dependencies"))?;
        }

        self.transition(InstallerState::DependenciesEmitted);
        Ok(())
    }

    async fn download(&mut self, resolved: &Resolved) -> Result<PathBuf, PkgError> {
        if resolved.tarball_url.is_empty() {
            return Err(PkgError::download_failed(format!(
                "{}@{} has no tarball URL",
                self.request.name, resolved.version
            )));
        }

        tokio::fs::create_dir_all(&resolved.version_dir)
            .await
            .map_err(|e| PkgError::io(&resolved.version_dir, &e))?;

        let archive = resolved
            .version_dir
            .join(tarball_filename(&resolved.tarball_url));
        let bytes = download_tarball(
            self.ctx.fetcher.registry(),
            &resolved.tarball_url,
            &archive,
            MAX_TARBALL_SIZE,
        )
        .await?;

        debug!(url = %resolved.tarball_url, bytes, "downloaded");
        self.transition(InstallerState::Downloaded);
        Ok(archive)
    }

    async fn extract(&mut self, resolved: &Resolved, archive: PathBuf) -> Result<(), PkgError> {
        let outputs = extract_tgz_blocking(archive, resolved.version_dir.clone()).await?;
        marker::write_marker_blocking(resolved.version_dir.clone(), resolved.shasum.clone())
            .await?;

        debug!(
            package = %self.request.name,
            version = %resolved.version,
            outputs = outputs.len(),
            "extracted"
        );
        self.transition(InstallerState::Extracted);
        Ok(())
    }
}
