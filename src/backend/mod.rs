//! Backend contract, request targets, and the shared fetch/extract machinery.

mod client;
mod error;

pub mod html;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HttpFetcher, HttpFetcherBuilder};
pub use error::{BoxError, Error, Lookup, Result};
pub use pipeline::{
    Extractor, FetchRequest, Fetcher, Pipeline, RawDocument, SearchEndpoint, SearchMethod,
};

use crate::model::{Chapter, Page, Title, TitleSummary};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use url::Url;

/// Lets the registry hand back a backend as its concrete type.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One remote content source.
///
/// Backends declare the host they serve through [Backend::base_url]; the registry routes
/// requests on that host. Operations are async; blocking forms live in [crate::blocking].
#[async_trait]
pub trait Backend: AsAny {
    /// Stable identifier (e.g. `"mangahost"`), used for lookup by kind and in diagnostics.
    fn id(&self) -> &str;

    /// Root URI of the site.
    fn base_url(&self) -> &Url;

    /// Host portion of [Backend::base_url]; the routing key.
    fn authority(&self) -> &str {
        self.base_url().host_str().unwrap_or_default()
    }

    async fn search(&self, query: &str) -> Result<Vec<TitleSummary>>;

    async fn title(&self, uri: &Url) -> Result<Title>;

    async fn chapters(&self, uri: &Url) -> Result<Vec<Chapter>>;

    async fn pages(&self, uri: &Url) -> Result<Vec<Page>>;
}

/// Anything that names an absolute URI: text, a parsed [Url], or a model entity.
pub trait Target {
    fn target_url(&self) -> Result<Url>;
}

/// Parse caller input into an absolute URI with a host. Empty or relative input is an argument error.
pub fn parse_target(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::argument(input, "URI is empty"));
    }
    let url = Url::parse(trimmed).map_err(|e| Error::argument(input, e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::argument(input, "URI has no host"));
    }
    Ok(url)
}

impl Target for str {
    fn target_url(&self) -> Result<Url> {
        parse_target(self)
    }
}

impl Target for String {
    fn target_url(&self) -> Result<Url> {
        parse_target(self)
    }
}

impl Target for Url {
    fn target_url(&self) -> Result<Url> {
        if self.host_str().map_or(true, str::is_empty) {
            return Err(Error::argument(self.as_str(), "URI has no host"));
        }
        Ok(self.clone())
    }
}

impl Target for TitleSummary {
    fn target_url(&self) -> Result<Url> {
        self.uri.target_url()
    }
}

impl Target for Title {
    fn target_url(&self) -> Result<Url> {
        self.summary.uri.target_url()
    }
}

impl Target for Chapter {
    fn target_url(&self) -> Result<Url> {
        self.uri.target_url()
    }
}

impl Target for Page {
    fn target_url(&self) -> Result<Url> {
        self.uri.target_url()
    }
}

impl<T: Target + ?Sized> Target for &T {
    fn target_url(&self) -> Result<Url> {
        (**self).target_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Name;

    #[test]
    fn parse_target_rejects_empty_and_relative() {
        assert!(matches!(parse_target(""), Err(Error::Argument { .. })));
        assert!(matches!(parse_target("   "), Err(Error::Argument { .. })));
        match parse_target("not-a-uri") {
            Err(Error::Argument { input, .. }) => assert_eq!(input, "not-a-uri"),
            other => panic!("expected Argument, got {:?}", other),
        }
        assert!(matches!(
            parse_target("/manga/berserk"),
            Err(Error::Argument { .. })
        ));
        assert!(matches!(
            parse_target("mailto:someone@example.com"),
            Err(Error::Argument { .. })
        ));
    }

    #[test]
    fn parse_target_trims_and_accepts_absolute() -> Result<()> {
        let url = parse_target("  https://manga.example/title/berserk ")?;
        assert_eq!(url.host_str(), Some("manga.example"));
        Ok(())
    }

    #[test]
    fn entities_are_targets() -> Result<()> {
        let summary = TitleSummary {
            name: Name::english("Berserk"),
            uri: parse_target("https://manga.example/title/berserk")?,
        };
        assert_eq!(summary.target_url()?, summary.uri);
        assert_eq!((&summary).target_url()?, summary.uri);
        assert_eq!("https://manga.example/x".target_url()?.path(), "/x");
        Ok(())
    }
}
