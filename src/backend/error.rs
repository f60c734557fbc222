//! Shared error type for backends, the pipeline and the registry.

use std::fmt;
use thiserror::Error;

/// Boxed error source for transport failures, from reqwest or any other [Fetcher](crate::backend::Fetcher).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

/// What a failed backend lookup was keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Host(String),
    Kind(String),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Host(host) => write!(f, "host '{}'", host),
            Lookup::Kind(kind) => write!(f, "backend '{}'", kind),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Empty or unparsable query/URI. Raised before any network activity.
    #[error("Invalid argument {input:?}: {reason}")]
    Argument { input: String, reason: String },

    #[error("No registered backend serves {lookup}")]
    ParserNotFound { lookup: Lookup },

    /// A backend was handed a URI for another host.
    #[error("Backend for '{expected}' cannot serve a URI on host '{actual}'")]
    HostMismatch { expected: String, actual: String },

    #[error("Network error: could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    /// The document was fetched but its structure was not recognized.
    #[error("Unrecognized document at {url}: {reason}")]
    Format { url: String, reason: String },

    #[error("Could not start blocking runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn argument(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Argument {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn format(url: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::Format {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request later could succeed. The library never retries;
    /// this is for callers that layer their own policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
