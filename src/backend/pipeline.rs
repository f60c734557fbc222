//! Fetch-then-extract pipeline shared by every backend.
//!
//! A [Pipeline] owns a [Fetcher] (network) and an [Extractor] (pure parsing of the fetched
//! document). Each call is one fresh run: `Idle -> Fetching -> Fetched -> Extracting ->
//! Completed`, failing out at `FetchFailed` or `ExtractFailed`. The fetch is the only
//! await point.

use crate::backend::{Backend, Error, Result};
use crate::model::{Chapter, Page, Title, TitleSummary};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// One HTTP request issued by a pipeline: a GET, or a POST with form fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub form: Option<Vec<(String, String)>>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self { url, form: None }
    }

    pub fn post_form(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            url,
            form: Some(form),
        }
    }
}

/// A fetched document. `url` is the final URL after redirects; relative links resolve against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub url: Url,
    pub body: String,
}

/// Network half of the pipeline.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawDocument>;
}

/// Site-specific half of the pipeline. Pure: no I/O, no awaiting.
///
/// Return [Error::Format] when the document shape is not recognized. An empty `Vec`
/// means the shape was recognized and holds nothing (a search with no hits).
pub trait Extractor: Send + Sync {
    fn search(&self, doc: &RawDocument) -> Result<Vec<TitleSummary>>;
    fn title(&self, doc: &RawDocument) -> Result<Title>;
    fn chapters(&self, doc: &RawDocument) -> Result<Vec<Chapter>>;
    fn pages(&self, doc: &RawDocument) -> Result<Vec<Page>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    #[default]
    Get,
    Post,
}

const QUERY_PLACEHOLDER: &str = "{query}";

/// How a backend's search endpoint takes the query.
///
/// GET: `{query}` in `path` is replaced by the encoded query; without a placeholder the
/// query is appended as `field=...`. POST: the query is posted as form field `field`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchEndpoint {
    pub path: String,
    #[serde(default)]
    pub method: SearchMethod,
    #[serde(default = "default_search_field")]
    pub field: String,
}

fn default_search_field() -> String {
    "q".to_string()
}

impl Default for SearchEndpoint {
    fn default() -> Self {
        Self {
            path: "/search".to_string(),
            method: SearchMethod::Get,
            field: default_search_field(),
        }
    }
}

impl SearchEndpoint {
    /// Build the request for `query` against `base`.
    pub fn request(&self, base: &Url, query: &str) -> Result<FetchRequest> {
        match self.method {
            SearchMethod::Get if self.path.contains(QUERY_PLACEHOLDER) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
                let path = self.path.replace(QUERY_PLACEHOLDER, &encoded);
                Ok(FetchRequest::get(self.join(base, &path)?))
            }
            SearchMethod::Get => {
                let mut url = self.join(base, &self.path)?;
                url.query_pairs_mut().append_pair(&self.field, query);
                Ok(FetchRequest::get(url))
            }
            SearchMethod::Post => Ok(FetchRequest::post_form(
                self.join(base, &self.path)?,
                vec![(self.field.clone(), query.to_string())],
            )),
        }
    }

    fn join(&self, base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| Error::argument(path, format!("invalid search path: {}", e)))
    }
}

/// Operation a pipeline run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Title,
    Chapters,
    Pages,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Search => "search",
            Operation::Title => "title",
            Operation::Chapters => "chapters",
            Operation::Pages => "pages",
        })
    }
}

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    FetchFailed,
    Fetched,
    Extracting,
    ExtractFailed,
    Completed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Idle, Stage::Fetching)
                | (Stage::Fetching, Stage::Fetched)
                | (Stage::Fetching, Stage::FetchFailed)
                | (Stage::Fetched, Stage::Extracting)
                | (Stage::Extracting, Stage::Completed)
                | (Stage::Extracting, Stage::ExtractFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::FetchFailed | Stage::ExtractFailed | Stage::Completed
        )
    }
}

/// One invocation of the pipeline. Never reused.
struct Run<'a> {
    backend: &'a str,
    operation: Operation,
    url: &'a Url,
    stage: Stage,
}

impl<'a> Run<'a> {
    fn new(backend: &'a str, operation: Operation, url: &'a Url) -> Self {
        Self {
            backend,
            operation,
            url,
            stage: Stage::Idle,
        }
    }

    fn enter(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal pipeline transition {:?} -> {:?}",
            self.stage,
            next
        );
        debug!(
            backend = self.backend,
            operation = %self.operation,
            url = %self.url,
            from = ?self.stage,
            to = ?next,
            "pipeline stage"
        );
        self.stage = next;
    }
}

/// A backend assembled from a fetcher and an extractor.
pub struct Pipeline<E> {
    id: String,
    base_url: Url,
    fetcher: Arc<dyn Fetcher>,
    extractor: E,
    search: SearchEndpoint,
}

impl<E: Extractor> Pipeline<E> {
    /// `base_url` must be absolute with a host; its host becomes the routing key.
    pub fn new(
        id: impl Into<String>,
        base_url: Url,
        fetcher: Arc<dyn Fetcher>,
        extractor: E,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::argument(id, "backend id is empty"));
        }
        if base_url.host_str().map_or(true, str::is_empty) {
            return Err(Error::argument(base_url.as_str(), "base URL has no host"));
        }
        Ok(Self {
            id,
            base_url,
            fetcher,
            extractor,
            search: SearchEndpoint::default(),
        })
    }

    pub fn with_search(mut self, endpoint: SearchEndpoint) -> Self {
        self.search = endpoint;
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn search_endpoint(&self) -> &SearchEndpoint {
        &self.search
    }

    /// `uri` must be on this backend's host, so everything built from it routes back here.
    fn check_host(&self, uri: &Url) -> Result<()> {
        let expected = self.base_url.host_str().unwrap_or_default();
        let actual = uri.host_str().unwrap_or_default();
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(Error::HostMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    async fn execute<T, F>(
        &self,
        operation: Operation,
        request: FetchRequest,
        extract: F,
    ) -> Result<T>
    where
        F: FnOnce(&E, &RawDocument) -> Result<T>,
    {
        let mut run = Run::new(&self.id, operation, &request.url);
        run.enter(Stage::Fetching);
        // A redirect off the backend's host would give results another backend's authority.
        let fetched = self
            .fetcher
            .fetch(&request)
            .await
            .and_then(|doc| self.check_host(&doc.url).map(|()| doc));
        let doc = match fetched {
            Ok(doc) => {
                run.enter(Stage::Fetched);
                doc
            }
            Err(e) => {
                run.enter(Stage::FetchFailed);
                return Err(e);
            }
        };
        run.enter(Stage::Extracting);
        match extract(&self.extractor, &doc) {
            Ok(value) => {
                run.enter(Stage::Completed);
                Ok(value)
            }
            Err(e) => {
                run.enter(Stage::ExtractFailed);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<E: Extractor + 'static> Backend for Pipeline<E> {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn search(&self, query: &str) -> Result<Vec<TitleSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::argument(query, "search query is empty"));
        }
        let request = self.search.request(&self.base_url, query)?;
        self.execute(Operation::Search, request, |e, doc| e.search(doc))
            .await
    }

    async fn title(&self, uri: &Url) -> Result<Title> {
        self.check_host(uri)?;
        self.execute(Operation::Title, FetchRequest::get(uri.clone()), |e, doc| {
            e.title(doc)
        })
        .await
    }

    async fn chapters(&self, uri: &Url) -> Result<Vec<Chapter>> {
        self.check_host(uri)?;
        self.execute(
            Operation::Chapters,
            FetchRequest::get(uri.clone()),
            |e, doc| e.chapters(doc),
        )
        .await
    }

    async fn pages(&self, uri: &Url) -> Result<Vec<Page>> {
        self.check_host(uri)?;
        self.execute(Operation::Pages, FetchRequest::get(uri.clone()), |e, doc| {
            e.pages(doc)
        })
        .await
    }
}
