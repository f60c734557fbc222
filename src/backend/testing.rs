//! In-memory fetchers and a line-based extractor for tests. No network.

use crate::backend::{Error, Extractor, FetchRequest, Fetcher, Pipeline, RawDocument, Result};
use crate::model::{Chapter, Name, Page, Title, TitleSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Serves fixed bodies keyed by URL; anything else is a 404. Redirects are followed once.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    docs: HashMap<String, String>,
    redirects: HashMap<String, String>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, body: &str) -> Self {
        self.docs.insert(url.to_string(), body.to_string());
        self
    }

    /// Requests for `from` end up at `to`, which becomes the document URL.
    pub(crate) fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let url = match self.redirects.get(request.url.as_str()) {
            Some(to) => Url::parse(to).map_err(|e| Error::format(to, e.to_string()))?,
            None => request.url.clone(),
        };
        match self.docs.get(url.as_str()) {
            Some(body) => Ok(RawDocument {
                url,
                body: body.clone(),
            }),
            None => Err(Error::HttpStatus {
                status: 404,
                url: request.url.to_string(),
            }),
        }
    }
}

/// Every request fails as if the connection were refused.
pub(crate) struct FailingFetcher;

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawDocument> {
        Err(Error::Transport {
            url: request.url.to_string(),
            source: Box::new(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )),
        })
    }
}

/// Documents are lines of `name|url`; pages are bare URLs. A line without `|` is unrecognized.
pub(crate) struct LineExtractor;

fn entries(doc: &RawDocument) -> Result<Vec<(String, Url)>> {
    doc.body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (name, url) = line
                .split_once('|')
                .ok_or_else(|| Error::format(&doc.url, format!("unexpected line {:?}", line)))?;
            let url = doc
                .url
                .join(url.trim())
                .map_err(|e| Error::format(&doc.url, e.to_string()))?;
            Ok((name.trim().to_string(), url))
        })
        .collect()
}

impl Extractor for LineExtractor {
    fn search(&self, doc: &RawDocument) -> Result<Vec<TitleSummary>> {
        Ok(entries(doc)?
            .into_iter()
            .map(|(name, uri)| TitleSummary {
                name: Name::english(name),
                uri,
            })
            .collect())
    }

    fn title(&self, doc: &RawDocument) -> Result<Title> {
        let (name, uri) = entries(doc)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::format(&doc.url, "no title line"))?;
        Ok(Title {
            summary: TitleSummary {
                name: Name::english(name),
                uri,
            },
            covers: Vec::new(),
            authors: Vec::new(),
            genres: Vec::new(),
            description: String::new(),
        })
    }

    fn chapters(&self, doc: &RawDocument) -> Result<Vec<Chapter>> {
        Ok(entries(doc)?
            .into_iter()
            .map(|(name, uri)| Chapter {
                name: Name::english(name),
                uri,
                added_date: None,
                cover: None,
            })
            .collect())
    }

    fn pages(&self, doc: &RawDocument) -> Result<Vec<Page>> {
        doc.body
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                doc.url
                    .join(l.trim())
                    .map(|uri| Page { uri })
                    .map_err(|e| Error::format(&doc.url, e.to_string()))
            })
            .collect()
    }
}

pub(crate) fn line_backend(
    id: &str,
    base: &str,
    fetcher: Arc<dyn Fetcher>,
) -> Arc<Pipeline<LineExtractor>> {
    let base = Url::parse(base).expect("test base URL");
    Arc::new(Pipeline::new(id, base, fetcher, LineExtractor).expect("test backend"))
}
