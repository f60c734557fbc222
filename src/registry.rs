//! Backend registry: routes a request to the backend serving its URI host, and fans
//! searches out across every registered backend.
//!
//! The backend list is an immutable snapshot swapped on register/unregister, so a
//! search already in flight keeps the list it started with.

use crate::backend::{Backend, Error, Lookup, Result, Target};
use crate::model::{Chapter, Page, Title, TitleSummary};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

pub(crate) type Snapshot = Arc<Vec<Arc<dyn Backend>>>;

/// One backend's error inside an aggregate operation.
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: Error,
}

/// Result of a search across all backends: what succeeded, and what failed.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub titles: Vec<TitleSummary>,
    pub failures: Vec<BackendFailure>,
}

impl SearchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owned set of backends. Build one, register backends, use it, drop it.
#[derive(Default)]
pub struct Registry {
    backends: RwLock<Snapshot>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.backends().iter().map(|b| b.id().to_string()).collect();
        f.debug_struct("Registry").field("backends", &ids).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current backends in registration order.
    pub fn backends(&self) -> Snapshot {
        match self.backends.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.backends().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends().is_empty()
    }

    fn update<F: FnOnce(&mut Vec<Arc<dyn Backend>>) -> bool>(&self, f: F) -> bool {
        let mut guard = match self.backends.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next: Vec<Arc<dyn Backend>> = guard.as_ref().clone();
        let changed = f(&mut next);
        if changed {
            *guard = Arc::new(next);
        }
        changed
    }

    /// Add a backend. Returns false if it, or another backend with the same id, is already registered.
    pub fn register(&self, backend: Arc<dyn Backend>) -> bool {
        let id = backend.id().to_string();
        let authority = backend.authority().to_string();
        let added = self.update(|list| {
            if list
                .iter()
                .any(|b| Arc::ptr_eq(b, &backend) || b.id() == backend.id())
            {
                return false;
            }
            list.push(backend);
            true
        });
        if added {
            info!(backend = %id, host = %authority, "registered backend");
        } else {
            debug!(backend = %id, "backend already registered");
        }
        added
    }

    /// Remove a backend. Returns false if it was not registered.
    pub fn unregister(&self, backend: &Arc<dyn Backend>) -> bool {
        let removed = self.update(|list| {
            let before = list.len();
            list.retain(|b| !Arc::ptr_eq(b, backend));
            list.len() != before
        });
        if removed {
            info!(backend = %backend.id(), "unregistered backend");
        }
        removed
    }

    /// Remove the backend with this id. Returns false if none matched.
    pub fn unregister_id(&self, id: &str) -> bool {
        let removed = self.update(|list| {
            let before = list.len();
            list.retain(|b| b.id() != id);
            list.len() != before
        });
        if removed {
            info!(backend = %id, "unregistered backend");
        }
        removed
    }

    /// First backend, in registration order, whose authority is the URI host.
    pub fn resolve_by_uri(&self, target: impl Target) -> Result<Arc<dyn Backend>> {
        let url = target.target_url()?;
        self.resolve_url(&url)
    }

    fn resolve_url(&self, url: &Url) -> Result<Arc<dyn Backend>> {
        let host = url.host_str().unwrap_or_default();
        self.backends()
            .iter()
            .find(|b| b.authority().eq_ignore_ascii_case(host))
            .cloned()
            .ok_or_else(|| Error::ParserNotFound {
                lookup: Lookup::Host(host.to_string()),
            })
    }

    /// Backend registered under this id.
    pub fn resolve_by_kind(&self, id: &str) -> Result<Arc<dyn Backend>> {
        self.backends()
            .iter()
            .find(|b| b.id() == id)
            .cloned()
            .ok_or_else(|| Error::ParserNotFound {
                lookup: Lookup::Kind(id.to_string()),
            })
    }

    /// First registered backend whose concrete type is `T`.
    pub fn resolve_as<T: Backend>(&self) -> Result<Arc<T>> {
        self.backends()
            .iter()
            .find_map(|b| Arc::clone(b).into_any().downcast::<T>().ok())
            .ok_or_else(|| Error::ParserNotFound {
                lookup: Lookup::Kind(std::any::type_name::<T>().to_string()),
            })
    }

    /// Search every backend concurrently. Failures are collected, not raised; result blocks
    /// arrive in completion order.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(Error::argument(query, "search query is empty"));
        }
        let snapshot = self.backends();
        let mut pending: FuturesUnordered<_> = snapshot
            .iter()
            .map(|backend| async move { (backend.id().to_string(), backend.search(query).await) })
            .collect();

        let mut outcome = SearchOutcome::default();
        while let Some((id, result)) = pending.next().await {
            match result {
                Ok(mut titles) => {
                    debug!(backend = %id, hits = titles.len(), "search finished");
                    outcome.titles.append(&mut titles);
                }
                Err(error) => {
                    warn!(backend = %id, error = %error, "search failed");
                    outcome.failures.push(BackendFailure { backend: id, error });
                }
            }
        }
        Ok(outcome)
    }

    pub async fn title(&self, target: impl Target) -> Result<Title> {
        let url = target.target_url()?;
        self.resolve_url(&url)?.title(&url).await
    }

    pub async fn chapters(&self, target: impl Target) -> Result<Vec<Chapter>> {
        let url = target.target_url()?;
        self.resolve_url(&url)?.chapters(&url).await
    }

    pub async fn pages(&self, target: impl Target) -> Result<Vec<Page>> {
        let url = target.target_url()?;
        self.resolve_url(&url)?.pages(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{line_backend, FailingFetcher, LineExtractor, StaticFetcher};
    use crate::backend::Pipeline;
    use crate::model::Name;
    use std::time::Duration;

    fn alpha() -> (Arc<StaticFetcher>, Arc<dyn Backend>) {
        let fetcher = Arc::new(
            StaticFetcher::new()
                .with(
                    "https://alpha.example/search?q=berserk",
                    "Berserk|/t/berserk\nBerserk Prototype|/t/proto",
                )
                .with("https://alpha.example/t/berserk", "Berserk|/t/berserk")
                .with(
                    "https://alpha.example/t/berserk/chapters",
                    "Chapter 1|/c/1\nChapter 2|/c/2",
                ),
        );
        let backend: Arc<dyn Backend> =
            line_backend("alpha", "https://alpha.example/", fetcher.clone());
        (fetcher, backend)
    }

    fn beta() -> Arc<dyn Backend> {
        let fetcher = Arc::new(
            StaticFetcher::new().with("https://beta.example/search?q=berserk", "Berserk (beta)|/m/1"),
        );
        line_backend("beta", "https://beta.example/", fetcher)
    }

    #[test]
    fn resolve_by_uri_picks_earliest_registered_for_host() -> Result<()> {
        let registry = Registry::new();
        let first = line_backend("alpha", "https://alpha.example/", Arc::new(StaticFetcher::new()));
        let second = line_backend("alpha-mirror", "https://alpha.example/", Arc::new(StaticFetcher::new()));
        assert!(registry.register(first));
        assert!(registry.register(second));
        registry.register(beta());

        assert_eq!(registry.resolve_by_uri("https://alpha.example/t/1")?.id(), "alpha");
        assert_eq!(registry.resolve_by_uri("https://BETA.example/m/1")?.id(), "beta");
        Ok(())
    }

    #[test]
    fn resolve_by_uri_unknown_host_is_not_found_with_host() {
        let registry = Registry::new();
        registry.register(beta());
        match registry.resolve_by_uri("https://unknown.example/t/1") {
            Err(Error::ParserNotFound {
                lookup: Lookup::Host(host),
            }) => assert_eq!(host, "unknown.example"),
            other => panic!("expected ParserNotFound, got {:?}", other.map(|b| b.id().to_string())),
        }
    }

    #[test]
    fn resolve_by_kind_and_type() -> Result<()> {
        let registry = Registry::new();
        registry.register(beta());
        assert_eq!(registry.resolve_by_kind("beta")?.id(), "beta");
        assert!(matches!(
            registry.resolve_by_kind("gamma"),
            Err(Error::ParserNotFound {
                lookup: Lookup::Kind(_)
            })
        ));
        let typed = registry.resolve_as::<Pipeline<LineExtractor>>()?;
        assert_eq!(typed.id(), "beta");
        Ok(())
    }

    #[test]
    fn register_rejects_duplicates_and_unregister_removes() {
        let registry = Registry::new();
        let b = beta();
        assert!(registry.register(b.clone()));
        assert!(!registry.register(b.clone()));
        assert!(!registry.register(line_backend(
            "beta",
            "https://other.example/",
            Arc::new(StaticFetcher::new())
        )));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&b));
        assert!(!registry.unregister(&b));
        assert!(registry.is_empty());

        registry.register(b);
        assert!(registry.unregister_id("beta"));
        assert!(!registry.unregister_id("beta"));
    }

    #[test]
    fn concurrent_register_never_duplicates() {
        let registry = Arc::new(Registry::new());
        let b = beta();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let b = Arc::clone(&b);
                std::thread::spawn(move || registry.register(b))
            })
            .collect();
        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|added| *added)
            .count();
        assert_eq!(added, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn chapters_with_invalid_uri_is_argument_error_without_fetch() {
        let registry = Registry::new();
        let (fetcher, backend) = alpha();
        registry.register(backend);
        assert!(matches!(
            registry.chapters("not-a-uri").await,
            Err(Error::Argument { .. })
        ));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn dispatch_by_summary_and_string() -> Result<()> {
        let registry = Registry::new();
        let (_, backend) = alpha();
        registry.register(backend);
        registry.register(beta());

        let summary = TitleSummary {
            name: Name::english("Berserk"),
            uri: Url::parse("https://alpha.example/t/berserk").unwrap(),
        };
        let title = registry.title(&summary).await?;
        assert_eq!(title.name().display(), "Berserk");

        let chapters = registry
            .chapters("https://alpha.example/t/berserk/chapters")
            .await?;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].uri.as_str(), "https://alpha.example/c/2");
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_to_unknown_host_is_not_found() {
        let registry = Registry::new();
        registry.register(beta());
        assert!(matches!(
            registry.pages("https://gamma.example/c/1").await,
            Err(Error::ParserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn search_isolates_failing_backend() -> Result<()> {
        let registry = Registry::new();
        registry.register(line_backend(
            "broken",
            "https://broken.example/",
            Arc::new(FailingFetcher),
        ));
        registry.register(beta());

        let outcome = registry.search("berserk").await?;
        assert_eq!(outcome.titles.len(), 1);
        assert_eq!(outcome.titles[0].name.display(), "Berserk (beta)");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].backend, "broken");
        assert!(matches!(outcome.failures[0].error, Error::Transport { .. }));
        assert!(!outcome.is_complete());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn search_merges_all_backends_in_any_order() -> Result<()> {
        let registry = Registry::new();
        let slow = Arc::new(
            StaticFetcher::new()
                .with("https://alpha.example/search?q=berserk", "Berserk|/t/berserk")
                .delayed(Duration::from_secs(5)),
        );
        registry.register(line_backend("alpha", "https://alpha.example/", slow));
        registry.register(beta());

        let outcome = registry.search("berserk").await?;
        let mut names: Vec<&str> = outcome.titles.iter().map(|t| t.name.display()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Berserk", "Berserk (beta)"]);
        assert!(outcome.is_complete());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_search_leaves_registry_usable() -> Result<()> {
        let registry = Registry::new();
        let slow = Arc::new(
            StaticFetcher::new()
                .with("https://alpha.example/search?q=berserk", "Berserk|/t/berserk")
                .delayed(Duration::from_secs(60)),
        );
        registry.register(line_backend("alpha", "https://alpha.example/", slow.clone()));

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), registry.search("berserk")).await;
        assert!(cancelled.is_err());
        assert_eq!(slow.calls(), 1);

        registry.register(beta());
        assert_eq!(registry.len(), 2);
        let backend = registry.resolve_by_kind("beta")?;
        assert_eq!(backend.search("berserk").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let registry = Registry::new();
        registry.register(beta());
        assert!(matches!(
            registry.search("").await,
            Err(Error::Argument { .. })
        ));
    }
}
