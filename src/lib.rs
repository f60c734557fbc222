//! chapterdex: one API over many manga sites. Backends are registered by host, searched
//! together, and asked for title details, chapter lists and page images.

pub mod backend;
pub mod blocking;
pub mod cli;
pub mod config;
pub mod cover;
pub mod model;
pub mod registry;

// Re-exports for CLI and consumers.
pub use backend::{Backend, Error, HttpFetcher, Pipeline, Result, Target};
pub use blocking::{BlockingBackend, BlockingRegistry, SearchIter};
pub use config::{load_config, Config, ConfigError};
pub use cover::{CoverScheme, TokenAnchor};
pub use model::{AttributedValue, Chapter, Cover, Name, Page, Title, TitleSummary};
pub use registry::{BackendFailure, Registry, SearchOutcome};
