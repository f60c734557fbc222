//! Catalog data model shared by every backend.
//!
//! Values are built once by a backend's extraction step and handed to the caller.
//! Nothing here points back at the backend that produced it; the URI host is the
//! only routing information an entity carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Structured name of a work or chapter. Sites expose any subset of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub english: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized: Option<String>,
}

impl Name {
    /// Name known only in its original form.
    pub fn original(name: impl Into<String>) -> Self {
        Self {
            original: Some(name.into()),
            ..Self::default()
        }
    }

    /// Name known only in English.
    pub fn english(name: impl Into<String>) -> Self {
        Self {
            english: Some(name.into()),
            ..Self::default()
        }
    }

    /// Best name for display: English, then original, then localized.
    pub fn display(&self) -> &str {
        self.english
            .as_deref()
            .or(self.original.as_deref())
            .or(self.localized.as_deref())
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.display().is_empty()
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display())
    }
}

/// A labeled fact (author, genre, ...) with an optional absolute link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Url>,
}

impl AttributedValue {
    pub fn new(value: impl Into<String>, link: Option<Url>) -> Self {
        Self {
            value: value.into(),
            link,
        }
    }
}

/// Minimal identification of a work, as returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleSummary {
    pub name: Name,
    pub uri: Url,
}

/// Full record of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    #[serde(flatten)]
    pub summary: TitleSummary,
    #[serde(default)]
    pub covers: Vec<Cover>,
    #[serde(default)]
    pub authors: Vec<AttributedValue>,
    #[serde(default)]
    pub genres: Vec<AttributedValue>,
    #[serde(default)]
    pub description: String,
}

impl Title {
    pub fn name(&self) -> &Name {
        &self.summary.name
    }

    pub fn uri(&self) -> &Url {
        &self.summary.uri
    }
}

/// One chapter of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub name: Name,
    pub uri: Url,
    /// When the site published the chapter. `None` if the site shows no date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<Cover>,
}

/// One viewable image of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub uri: Url,
}

/// Three resolutions of one image asset. Any of them may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cover {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<Url>,
}

impl Cover {
    /// True when no resolution could be determined.
    pub fn is_empty(&self) -> bool {
        self.small.is_none() && self.medium.is_none() && self.large.is_none()
    }

    /// Largest known resolution.
    pub fn best(&self) -> Option<&Url> {
        self.large
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.small.as_ref())
    }
}
