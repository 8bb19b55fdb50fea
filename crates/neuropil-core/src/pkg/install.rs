//! Install orchestration.
//!
//! Seeds the ledger and completion queue from the root requests, spawns an
//! installer per unique `(name, request)` and keeps scheduling as installers
//! report dependency edges, until the queue reaches zero or something fails.

use super::document::DEFAULT_DEPENDENCY_KEY;
use super::error::PkgError;
use super::fetcher::DocumentFetcher;
use super::installer::{Discovered, InstallContext, InstallOutcome, InstallSettings, Installer};
use super::ledger::{Ledger, LedgerSnapshot};
use super::queue::CompletionQueue;
use super::registry::RegistryClient;
use super::spec::PackageRequest;
use super::version::{ResolvePolicy, Stability};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Default number of concurrent download/extract slots.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Options for one install run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Root requests as `name@range`.
    pub packages: Vec<String>,
    /// Manifest keys to read dependencies from; dotted paths traverse
    /// nested objects.
    pub dependency_keys: Vec<String>,
    pub install_dir: PathBuf,
    pub recursive: bool,
    pub stable_only: bool,
    pub prerelease_channel: Option<String>,
    /// Saving implies stable-only resolution.
    pub save: bool,
    pub concurrency: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            dependency_keys: vec![DEFAULT_DEPENDENCY_KEY.to_string()],
            install_dir: PathBuf::from("neuropil_modules"),
            recursive: true,
            stable_only: false,
            prerelease_channel: None,
            save: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl InstallOptions {
    #[must_use]
    pub fn new<I, S>(packages: I, install_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            install_dir: install_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_dependency_keys(mut self, keys: Vec<String>) -> Self {
        if !keys.is_empty() {
            self.dependency_keys = keys;
        }
        self
    }

    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub fn with_stable_only(mut self, stable_only: bool) -> Self {
        self.stable_only = stable_only;
        self
    }

    #[must_use]
    pub fn with_prerelease_channel(mut self, channel: Option<String>) -> Self {
        self.prerelease_channel = channel;
        self
    }

    #[must_use]
    pub fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// The resolver policy these options imply.
    #[must_use]
    pub fn policy(&self) -> ResolvePolicy {
        let stability = if self.stable_only || self.save {
            Stability::Required
        } else {
            Stability::Preferred
        };
        ResolvePolicy {
            stability,
            prerelease_channel: self.prerelease_channel.clone(),
        }
    }

    fn settings(&self) -> InstallSettings {
        InstallSettings {
            install_dir: self.install_dir.clone(),
            dependency_keys: self.dependency_keys.clone(),
            recursive: self.recursive,
            policy: self.policy(),
        }
    }
}

/// Install the requested packages and everything they depend on.
///
/// Returns the ledger snapshot on success. On the first failure no further
/// installers are scheduled, in-flight installers are aborted and that
/// failure is returned. Work already completed is not rolled back.
///
/// # Errors
/// - `InvalidSpec` if a root request cannot be parsed
/// - any error raised by an installer
pub async fn install(
    registry: RegistryClient,
    options: &InstallOptions,
) -> Result<LedgerSnapshot, PkgError> {
    let requests = options
        .packages
        .iter()
        .map(|p| PackageRequest::parse(p))
        .collect::<Result<Vec<_>, _>>()?;

    let ledger = Arc::new(Ledger::new());
    if requests.is_empty() {
        return Ok(ledger.snapshot().await);
    }

    let fetcher = Arc::new(DocumentFetcher::new(registry, Arc::clone(&ledger)));
    let (queue, outcome) = CompletionQueue::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(InstallContext {
        settings: options.settings(),
        ledger: Arc::clone(&ledger),
        fetcher: Arc::clone(&fetcher),
        queue: queue.clone(),
        discovered: tx,
        permits: Arc::new(Semaphore::new(options.concurrency.max(1))),
    });

    let mut orchestrator = Orchestrator {
        ctx,
        tasks: JoinSet::new(),
    };

    // Seeds keep the count above zero until every root is scheduled
    let seeds: Vec<_> = requests
        .iter()
        .map(|r| queue.register(format!("root {r}")))
        .collect();

    for (request, seed) in requests.into_iter().zip(seeds) {
        ledger.save_origin(&request.name, &request.range).await;
        orchestrator.schedule(request).await;
        seed.complete(Ok(()));
    }

    let outcome = outcome.wait();
    tokio::pin!(outcome);

    let result = loop {
        tokio::select! {
            biased;
            result = &mut outcome => break result,
            Some(discovered) = rx.recv() => orchestrator.on_discovered(discovered).await,
            Some(joined) = orchestrator.tasks.join_next(), if !orchestrator.tasks.is_empty() => {
                if let Err(e) = joined {
                    debug!(error = %e, "installer task ended abnormally");
                }
            }
        }
    };

    orchestrator.tasks.abort_all();
    result?;

    let snapshot = ledger.snapshot().await;
    info!(
        installed = snapshot.installed.len(),
        documents = fetcher.fetch_count(),
        warnings = snapshot.warnings.len(),
        "install complete"
    );
    Ok(snapshot)
}

struct Orchestrator {
    ctx: Arc<InstallContext>,
    tasks: JoinSet<()>,
}

impl Orchestrator {
    async fn on_discovered(&mut self, discovered: Discovered) {
        let Discovered { edges, handle } = discovered;
        for edge in edges {
            self.schedule(edge).await;
        }
        handle.complete(Ok(()));
    }

    async fn schedule(&mut self, request: PackageRequest) {
        if self.ctx.queue.is_failed() {
            return;
        }

        if !self
            .ctx
            .ledger
            .try_schedule(&request.name, &request.range)
            .await
        {
            debug!(package = %request, "already scheduled");
            return;
        }

        let handle = self.ctx.queue.register(request.to_string());
        let installer = Installer::new(Arc::clone(&self.ctx), request);

        self.tasks.spawn(async move {
            let result = installer.run().await;
            match &result {
                Ok(InstallOutcome::Installed { name, version }) => {
                    debug!(package = %name, %version, "installed");
                }
                Ok(InstallOutcome::Skipped { .. }) => {}
                Err(e) => debug!(code = e.code(), error = %e, "installer failed"),
            }
            handle.complete(result.map(|_| ()));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::registry::RegistryConfig;

    #[test]
    fn test_default_options() {
        let options = InstallOptions::default();
        assert_eq!(options.dependency_keys, vec!["dependencies"]);
        assert!(options.recursive);
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(options.policy(), ResolvePolicy::default());
    }

    #[test]
    fn test_save_implies_stable_required() {
        let options = InstallOptions::new(["a"], "/tmp/x").with_save(true);
        assert_eq!(options.policy().stability, Stability::Required);

        let options = InstallOptions::new(["a"], "/tmp/x").with_stable_only(true);
        assert_eq!(options.policy().stability, Stability::Required);
    }

    #[test]
    fn test_empty_dependency_keys_keep_default() {
        let options = InstallOptions::default().with_dependency_keys(Vec::new());
        assert_eq!(options.dependency_keys, vec!["dependencies"]);
    }

    #[tokio::test]
    async fn test_install_nothing() {
        let registry = RegistryClient::new(&RegistryConfig::default()).unwrap();
        let snapshot = install(registry, &InstallOptions::default()).await.unwrap();
        assert!(snapshot.installed.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_root_request() {
        let registry = RegistryClient::new(&RegistryConfig::default()).unwrap();
        let options = InstallOptions::new(["bad name"], "/tmp/never-used");
        let err = install(registry, &options).await.unwrap_err();
        assert_eq!(err.code(), "PKG_SPEC_INVALID");
    }
}
