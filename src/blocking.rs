//! Blocking facade over the async registry and backends.
//!
//! Every call drives the async implementation to completion on a current-thread tokio
//! runtime owned by [BlockingRegistry]. Do not use these from inside an async runtime.

use crate::backend::{Backend, Error, Result, Target};
use crate::model::{Chapter, Page, Title, TitleSummary};
use crate::registry::{BackendFailure, Registry, SearchOutcome, Snapshot};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

impl Registry {
    /// Blocking view of this registry with its own runtime.
    pub fn blocking(&self) -> Result<BlockingRegistry<'_>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| Error::Runtime { source })?;
        Ok(BlockingRegistry {
            registry: self,
            runtime,
        })
    }
}

pub struct BlockingRegistry<'r> {
    registry: &'r Registry,
    runtime: Runtime,
}

impl<'r> BlockingRegistry<'r> {
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Lazily search backends one after another in registration order. A backend is only
    /// queried once the previous one's results are consumed; its failure is recorded in
    /// [SearchIter::failures] and the iteration moves on.
    pub fn search(&self, query: &str) -> Result<SearchIter<'_>> {
        if query.trim().is_empty() {
            return Err(Error::argument(query, "search query is empty"));
        }
        Ok(SearchIter {
            backends: self.registry.backends(),
            next_backend: 0,
            current: Vec::new().into_iter(),
            query: query.to_string(),
            runtime: &self.runtime,
            failures: Vec::new(),
        })
    }

    /// Search all backends concurrently and wait for every one of them.
    pub fn search_concurrent(&self, query: &str) -> Result<SearchOutcome> {
        self.runtime.block_on(self.registry.search(query))
    }

    pub fn title(&self, target: impl Target) -> Result<Title> {
        self.runtime.block_on(self.registry.title(target))
    }

    pub fn chapters(&self, target: impl Target) -> Result<Vec<Chapter>> {
        self.runtime.block_on(self.registry.chapters(target))
    }

    pub fn pages(&self, target: impl Target) -> Result<Vec<Page>> {
        self.runtime.block_on(self.registry.pages(target))
    }

    pub fn resolve_by_uri(&self, target: impl Target) -> Result<BlockingBackend<'_>> {
        let backend = self.registry.resolve_by_uri(target)?;
        Ok(BlockingBackend {
            backend,
            runtime: &self.runtime,
        })
    }

    pub fn resolve_by_kind(&self, id: &str) -> Result<BlockingBackend<'_>> {
        let backend = self.registry.resolve_by_kind(id)?;
        Ok(BlockingBackend {
            backend,
            runtime: &self.runtime,
        })
    }
}

/// Blocking handle to one backend.
pub struct BlockingBackend<'a> {
    backend: Arc<dyn Backend>,
    runtime: &'a Runtime,
}

impl BlockingBackend<'_> {
    pub fn id(&self) -> &str {
        self.backend.id()
    }

    pub fn authority(&self) -> &str {
        self.backend.authority()
    }

    pub fn inner(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn search(&self, query: &str) -> Result<Vec<TitleSummary>> {
        self.runtime.block_on(self.backend.search(query))
    }

    pub fn title(&self, target: impl Target) -> Result<Title> {
        let url = target.target_url()?;
        self.runtime.block_on(self.backend.title(&url))
    }

    pub fn chapters(&self, target: impl Target) -> Result<Vec<Chapter>> {
        let url = target.target_url()?;
        self.runtime.block_on(self.backend.chapters(&url))
    }

    pub fn pages(&self, target: impl Target) -> Result<Vec<Page>> {
        let url = target.target_url()?;
        self.runtime.block_on(self.backend.pages(&url))
    }
}

/// Lazy search across backends in registration order. See [BlockingRegistry::search].
pub struct SearchIter<'a> {
    backends: Snapshot,
    next_backend: usize,
    current: std::vec::IntoIter<TitleSummary>,
    query: String,
    runtime: &'a Runtime,
    failures: Vec<BackendFailure>,
}

impl SearchIter<'_> {
    /// Backends that failed so far.
    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<BackendFailure> {
        self.failures
    }
}

impl Iterator for SearchIter<'_> {
    type Item = TitleSummary;

    fn next(&mut self) -> Option<TitleSummary> {
        loop {
            if let Some(title) = self.current.next() {
                return Some(title);
            }
            let backend = Arc::clone(self.backends.get(self.next_backend)?);
            self.next_backend += 1;
            match self.runtime.block_on(backend.search(&self.query)) {
                Ok(titles) => {
                    debug!(backend = backend.id(), hits = titles.len(), "search finished");
                    self.current = titles.into_iter();
                }
                Err(error) => {
                    warn!(backend = backend.id(), error = %error, "search failed");
                    self.failures.push(BackendFailure {
                        backend: backend.id().to_string(),
                        error,
                    });
                }
            }
        }
    }
}
