//! Single-flight package document fetcher.
//!
//! The first caller for a name issues the registry request. Callers that
//! arrive while it is in flight wait on the same cell and receive the same
//! result, error included.

use super::document::PackageDocument;
use super::error::PkgError;
use super::ledger::Ledger;
use super::registry::RegistryClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::debug;

type DocumentCell = Arc<OnceCell<Result<Arc<PackageDocument>, PkgError>>>;

/// Fetches each package document at most once per run.
#[derive(Debug)]
pub struct DocumentFetcher {
    registry: RegistryClient,
    ledger: Arc<Ledger>,
    cells: Mutex<HashMap<String, DocumentCell>>,
    fetches: AtomicUsize,
}

impl DocumentFetcher {
    #[must_use]
    pub fn new(registry: RegistryClient, ledger: Arc<Ledger>) -> Self {
        Self {
            registry,
            ledger,
            cells: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Get the document for `name`, fetching it if nobody has yet.
    ///
    /// # Errors
    /// - `PkgNotFound` if the registry has no such package
    /// - `Registry` for transport and HTTP failures
    pub async fn get_document(&self, name: &str) -> Result<Arc<PackageDocument>, PkgError> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(name.to_string()).or_default())
        };

        cell.get_or_init(|| self.fetch(name)).await.clone()
    }

    /// Number of registry requests issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// The registry client used for documents and tarballs.
    #[must_use]
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    async fn fetch(&self, name: &str) -> Result<Arc<PackageDocument>, PkgError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(package = name, "fetching document");

        let doc = Arc::new(self.registry.fetch_document(name).await?);
        self.ledger.save_document(Arc::clone(&doc)).await;
        debug!(package = name, versions = doc.versions.len(), "document fetched");
        Ok(doc)
    }
}
