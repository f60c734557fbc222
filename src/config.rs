//! Optional config file loading. Search order: ./chapterdex.toml, then
//! $XDG_CONFIG_HOME/chapterdex/config.toml (or ~/.config/chapterdex/config.toml).
//!
//! The file declares HTTP client defaults and the backends to register.

use crate::backend::html::{HtmlExtractor, SiteProfile};
use crate::backend::{HttpFetcher, Pipeline, SearchEndpoint};
use crate::cover::{CoverScheme, TokenAnchor};
use crate::registry::Registry;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid backend '{id}': {reason}")]
    Backend { id: String, reason: String },
}

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// HTTP User-Agent header for every backend.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Redirects followed per request.
    pub max_redirects: Option<usize>,
    /// Minimum delay in milliseconds between two requests to the same backend.
    pub request_delay_ms: Option<u64>,
    pub backends: Vec<BackendConfig>,
}

/// One `[[backends]]` entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    pub id: String,
    pub base_url: Url,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_redirects: Option<usize>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub search: SearchEndpoint,
    #[serde(default)]
    pub cover: Option<CoverConfig>,
    #[serde(default)]
    pub selectors: SiteProfile,
}

fn default_true() -> bool {
    true
}

/// `[backends.cover]`: resolution tokens and where they sit in the filename.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoverConfig {
    pub low: String,
    #[serde(default)]
    pub medium: String,
    pub high: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub before_extension: bool,
}

impl CoverConfig {
    fn scheme(&self, id: &str) -> Result<CoverScheme, ConfigError> {
        let anchor = match (self.offset, self.before_extension) {
            (Some(n), false) => TokenAnchor::Offset(n),
            (None, true) => TokenAnchor::BeforeExtension,
            _ => {
                return Err(ConfigError::Backend {
                    id: id.to_string(),
                    reason: "cover needs exactly one of `offset` or `before_extension = true`"
                        .to_string(),
                })
            }
        };
        CoverScheme::with_medium(
            self.low.clone(),
            self.medium.clone(),
            self.high.clone(),
            anchor,
        )
        .map_err(|e| ConfigError::Backend {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Client settings given on the command line; they win over the file.
#[derive(Debug, Default, Clone)]
pub struct ClientOverrides {
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Build a registry holding every enabled backend, in file order.
    pub fn build_registry(&self, overrides: &ClientOverrides) -> Result<Registry, ConfigError> {
        let registry = Registry::new();
        for backend in self.backends.iter().filter(|b| b.enabled) {
            let fetcher = self.fetcher_for(backend, overrides)?;
            let covers = backend
                .cover
                .as_ref()
                .map(|c| c.scheme(&backend.id))
                .transpose()?;
            let extractor =
                HtmlExtractor::new(backend.selectors.clone(), covers).map_err(|e| {
                    ConfigError::Backend {
                        id: backend.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
            let pipeline = Pipeline::new(
                backend.id.clone(),
                backend.base_url.clone(),
                Arc::new(fetcher),
                extractor,
            )
            .map_err(|e| ConfigError::Backend {
                id: backend.id.clone(),
                reason: e.to_string(),
            })?
            .with_search(backend.search.clone());
            if !registry.register(Arc::new(pipeline)) {
                return Err(ConfigError::Backend {
                    id: backend.id.clone(),
                    reason: "duplicate backend id".to_string(),
                });
            }
        }
        Ok(registry)
    }

    fn fetcher_for(
        &self,
        backend: &BackendConfig,
        overrides: &ClientOverrides,
    ) -> Result<HttpFetcher, ConfigError> {
        let mut builder = HttpFetcher::builder();
        if let Some(ua) = overrides
            .user_agent
            .clone()
            .or_else(|| backend.user_agent.clone())
            .or_else(|| self.user_agent.clone())
        {
            builder = builder.user_agent(ua);
        }
        if let Some(secs) = overrides
            .timeout_secs
            .or(backend.timeout_secs)
            .or(self.timeout_secs)
        {
            builder = builder.timeout_secs(secs);
        }
        if let Some(n) = backend.max_redirects.or(self.max_redirects) {
            builder = builder.max_redirects(n);
        }
        if let Some(ms) = backend.request_delay_ms.or(self.request_delay_ms) {
            builder = builder.delay_ms(ms);
        }
        builder.build().map_err(|e| ConfigError::Backend {
            id: backend.id.clone(),
            reason: format!("failed to create HTTP client: {}", e),
        })
    }
}

/// Read and parse one config file. A missing file is an error here.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Search order: (1) ./chapterdex.toml, (2) $XDG_CONFIG_HOME/chapterdex/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, ConfigError> {
    let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
    let mut paths = vec![cwd.join("chapterdex.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("chapterdex").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            return load_config_from(path).map(Some);
        }
    }
    Ok(None)
}
