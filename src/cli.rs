//! CLI parsing and orchestration. Loads config, builds the registry, runs one lookup and prints
//! JSON or text. Maps errors to exit codes.

use crate::backend::Error as BackendError;
use crate::blocking::BlockingRegistry;
use crate::config::{self, ClientOverrides, Config, ConfigError};
use crate::model::{Chapter, Page, Title, TitleSummary};
use crate::registry::Registry;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Lookup(String),

    #[error("Cannot write output {target}: {source}")]
    Output {
        target: String,
        source: std::io::Error,
    },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Config(_) => 1,
            CliRunError::Backend(BackendError::Argument { .. }) => 1,
            CliRunError::Backend(_) | CliRunError::Lookup(_) => 2,
            CliRunError::Output { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "chapterdex")]
#[command(about = "Search manga sites and list titles, chapters and pages")]
#[command(
    after_help = "Backends are declared in chapterdex.toml ([[backends]] with id, base_url, search, cover and selectors). CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file. Default: ./chapterdex.toml, then the user config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format: json or text.
    #[arg(long, global = true, default_value = "text", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Write output to this path instead of stdout.
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// HTTP User-Agent (overrides config).
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Suppress progress output (errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug logging and verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured backends.
    Backends,
    /// Search titles by name.
    Search {
        query: String,
        /// Only search this backend.
        #[arg(long)]
        backend: Option<String>,
        /// Query backends one after another instead of concurrently.
        #[arg(long)]
        sequential: bool,
        /// Stop after this many results.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show title details.
    Title { uri: String },
    /// List chapters of a title.
    Chapters {
        uri: String,
        /// Only these chapters (1-based inclusive), e.g. 1-10.
        #[arg(long, value_parser = parse_chapter_range)]
        range: Option<(usize, usize)>,
    },
    /// List page images of a chapter.
    Pages { uri: String },
}

fn parse_chapter_range(s: &str) -> Result<(usize, usize), String> {
    let s = s.trim();
    let (from_str, to_str) = s.split_once('-').ok_or_else(|| {
        format!(
            "Invalid --range: expected 'from-to' (e.g. 1-10), got '{}'",
            s
        )
    })?;
    let from_str = from_str.trim();
    let to_str = to_str.trim();
    let from: usize = from_str
        .parse()
        .map_err(|_| format!("Invalid --range: '{}' is not a valid start chapter", from_str))?;
    let to: usize = to_str
        .parse()
        .map_err(|_| format!("Invalid --range: '{}' is not a valid end chapter", to_str))?;
    if from == 0 {
        return Err("Invalid --range: chapters are numbered from 1".to_string());
    }
    if from > to {
        return Err(format!(
            "Invalid --range: start ({}) must be <= end ({})",
            from, to
        ));
    }
    Ok((from, to))
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "json" => Ok(OutputFormat::Json),
        "text" | "txt" => Ok(OutputFormat::Text),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use json or text.",
            s
        )),
    }
}

/// Keep chapters `from..=to` (1-based); out-of-range bounds are clamped.
fn select_range(chapters: Vec<Chapter>, range: Option<(usize, usize)>) -> Vec<Chapter> {
    match range {
        None => chapters,
        Some((from, to)) => chapters
            .into_iter()
            .skip(from - 1)
            .take(to - from + 1)
            .collect(),
    }
}

/// Ensure output path parent exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn load(args: &Args) -> Result<Config, CliRunError> {
    let config = match &args.config {
        Some(path) => Some(config::load_config_from(path)?),
        None => config::load_config()?,
    };
    Ok(config.unwrap_or_default())
}

fn spinner(quiet: bool, msg: String) -> Option<indicatif::ProgressBar> {
    if quiet {
        return None;
    }
    let bar = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::default_spinner()
        .template("{spinner} {msg} ({elapsed})")
    {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.set_message(msg);
    bar.enable_steady_tick(Duration::from_millis(80));
    Some(bar)
}

fn with_spinner<T>(quiet: bool, msg: String, f: impl FnOnce() -> T) -> T {
    let bar = spinner(quiet, msg);
    let out = f();
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    out
}

/// What a command produced, ready to print.
enum Report {
    Backends(Vec<BackendRow>),
    Titles(Vec<TitleSummary>),
    Title(Box<Title>),
    Chapters(Vec<Chapter>),
    Pages(Vec<Page>),
}

#[derive(Debug, Serialize)]
struct BackendRow {
    id: String,
    authority: String,
    base_url: String,
}

impl Report {
    fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Report::Backends(v) => serde_json::to_string_pretty(v),
            Report::Titles(v) => serde_json::to_string_pretty(v),
            Report::Title(t) => serde_json::to_string_pretty(t),
            Report::Chapters(v) => serde_json::to_string_pretty(v),
            Report::Pages(v) => serde_json::to_string_pretty(v),
        }
    }

    fn to_text(&self) -> String {
        let mut out = String::new();
        match self {
            Report::Backends(rows) => {
                for r in rows {
                    out.push_str(&format!("{}\t{}\t{}\n", r.id, r.authority, r.base_url));
                }
            }
            Report::Titles(titles) => {
                for t in titles {
                    out.push_str(&format!("{}\t{}\n", t.name, t.uri));
                }
            }
            Report::Title(t) => {
                out.push_str(&format!("{}\n{}\n", t.name(), t.uri()));
                let name = t.name();
                if let Some(original) = &name.original {
                    if original != name.display() {
                        out.push_str(&format!("Original: {}\n", original));
                    }
                }
                let join = |vals: &[crate::model::AttributedValue]| {
                    vals.iter()
                        .map(|v| v.value.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                if !t.authors.is_empty() {
                    out.push_str(&format!("Authors: {}\n", join(&t.authors)));
                }
                if !t.genres.is_empty() {
                    out.push_str(&format!("Genres: {}\n", join(&t.genres)));
                }
                if let Some(url) = t.covers.iter().find_map(|c| c.best()) {
                    out.push_str(&format!("Cover: {}\n", url));
                }
                if !t.description.is_empty() {
                    out.push_str(&format!("\n{}\n", t.description));
                }
            }
            Report::Chapters(chapters) => {
                for (i, c) in chapters.iter().enumerate() {
                    let date = c
                        .added_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    out.push_str(&format!("{}\t{}\t{}\t{}\n", i + 1, c.name, date, c.uri));
                }
            }
            Report::Pages(pages) => {
                for p in pages {
                    out.push_str(&format!("{}\n", p.uri));
                }
            }
        }
        out
    }
}

fn search(
    blocking: &BlockingRegistry<'_>,
    query: &str,
    backend: Option<&str>,
    sequential: bool,
    limit: Option<usize>,
) -> Result<Vec<TitleSummary>, CliRunError> {
    let limit = limit.unwrap_or(usize::MAX);
    if let Some(id) = backend {
        let backend = blocking.resolve_by_kind(id)?;
        let mut titles = backend.search(query)?;
        titles.truncate(limit);
        return Ok(titles);
    }

    let (titles, failures) = if sequential {
        let mut iter = blocking.search(query)?;
        let titles: Vec<TitleSummary> = iter.by_ref().take(limit).collect();
        (titles, iter.into_failures())
    } else {
        let outcome = blocking.search_concurrent(query)?;
        let mut titles = outcome.titles;
        titles.truncate(limit);
        (titles, outcome.failures)
    };

    if titles.is_empty() && !failures.is_empty() {
        let reasons: Vec<String> = failures
            .iter()
            .map(|f| format!("{}: {}", f.backend, f.error))
            .collect();
        return Err(CliRunError::Lookup(format!(
            "Search failed on every backend that was queried:\n  {}",
            reasons.join("\n  ")
        )));
    }
    for f in &failures {
        warn!(backend = %f.backend, error = %f.error, "backend search failed; results are partial");
    }
    Ok(titles)
}

fn backend_rows(registry: &Registry) -> Vec<BackendRow> {
    registry
        .backends()
        .iter()
        .map(|b| BackendRow {
            id: b.id().to_string(),
            authority: b.authority().to_string(),
            base_url: b.base_url().to_string(),
        })
        .collect()
}

fn execute(args: &Args, registry: &Registry) -> Result<Report, CliRunError> {
    // Search query or target URI.
    let subject = match &args.command {
        Command::Backends => return Ok(Report::Backends(backend_rows(registry))),
        Command::Search { query, .. } => query,
        Command::Title { uri } | Command::Chapters { uri, .. } | Command::Pages { uri } => uri,
    };
    if registry.is_empty() {
        return Err(CliRunError::InvalidInput(
            "No backends configured. Add [[backends]] entries to chapterdex.toml or pass --config."
                .to_string(),
        ));
    }

    let blocking = registry.blocking()?;
    let quiet = args.quiet;
    let report = match &args.command {
        Command::Backends => Report::Backends(backend_rows(registry)),
        Command::Search {
            query,
            backend,
            sequential,
            limit,
        } => Report::Titles(with_spinner(quiet, format!("Searching '{}'", subject), || {
            search(&blocking, query, backend.as_deref(), *sequential, *limit)
        })?),
        Command::Title { .. } => Report::Title(Box::new(with_spinner(
            quiet,
            format!("Fetching {}", subject),
            || blocking.title(subject.as_str()),
        )?)),
        Command::Chapters { range, .. } => {
            let chapters = with_spinner(quiet, format!("Fetching {}", subject), || {
                blocking.chapters(subject.as_str())
            })?;
            Report::Chapters(select_range(chapters, *range))
        }
        Command::Pages { .. } => Report::Pages(with_spinner(
            quiet,
            format!("Fetching {}", subject),
            || blocking.pages(subject.as_str()),
        )?),
    };
    Ok(report)
}

fn write_report(args: &Args, report: &Report) -> Result<(), CliRunError> {
    let body = match args.format {
        OutputFormat::Json => {
            let mut s = report
                .to_json()
                .map_err(|e| CliRunError::InvalidInput(format!("Failed to encode JSON: {}", e)))?;
            s.push('\n');
            s
        }
        OutputFormat::Text => report.to_text(),
    };
    match &args.output {
        Some(path) => std::fs::write(path, body).map_err(|source| CliRunError::Output {
            target: path.display().to_string(),
            source,
        }),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(body.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|source| CliRunError::Output {
                    target: "stdout".to_string(),
                    source,
                })
        }
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    if let Some(path) = &args.output {
        validate_output_path(path)?;
    }
    let config = load(args)?;
    let overrides = ClientOverrides {
        user_agent: args.user_agent.clone(),
        timeout_secs: args.timeout,
    };
    let registry = config.build_registry(&overrides)?;
    let report = execute(args, &registry)?;
    write_report(args, &report)
}
