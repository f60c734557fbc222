//! Cover resolution variants computed from one known cover URL.
//!
//! Sites usually show only one resolution of a cover on a given page, but name the
//! other resolutions after it with a short filename token (`0012p.jpg`, `0012.jpg`,
//! `0012o.jpg`). A [CoverScheme] describes those tokens for one backend.

use crate::backend::{Error, Result};
use crate::model::Cover;
use url::Url;

/// Where the resolution token sits in the cover filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAnchor {
    /// Token starts at this character offset from the start of the filename.
    Offset(usize),
    /// Token ends right before the last `.` of the filename (or at its end if none).
    BeforeExtension,
}

/// Filename tokens distinguishing the three cover resolutions of a backend.
///
/// Only built through [CoverScheme::new] or [CoverScheme::with_medium], which reject token
/// sets that would make a derived variant read back as a different resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverScheme {
    low: String,
    /// Usually empty: the medium resolution is the bare filename.
    medium: String,
    high: String,
    anchor: TokenAnchor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Small,
    Medium,
    Large,
}

impl CoverScheme {
    /// Scheme with an empty medium token.
    pub fn new(
        low: impl Into<String>,
        high: impl Into<String>,
        anchor: TokenAnchor,
    ) -> Result<Self> {
        Self::with_medium(low, String::new(), high, anchor)
    }

    /// `low` and `high` must be non-empty; `medium` may be empty. No token may contain `/`,
    /// repeat another, or overlap another at the anchor: a prefix of another under
    /// [TokenAnchor::Offset], a suffix of another under [TokenAnchor::BeforeExtension].
    pub fn with_medium(
        low: impl Into<String>,
        medium: impl Into<String>,
        high: impl Into<String>,
        anchor: TokenAnchor,
    ) -> Result<Self> {
        let scheme = Self {
            low: low.into(),
            medium: medium.into(),
            high: high.into(),
            anchor,
        };
        if scheme.low.is_empty() || scheme.high.is_empty() {
            return Err(Error::argument(
                format!("low={:?} high={:?}", scheme.low, scheme.high),
                "cover `low` and `high` tokens must be non-empty",
            ));
        }
        let tokens = [&scheme.low, &scheme.medium, &scheme.high];
        for token in tokens {
            if token.contains('/') {
                return Err(Error::argument(token.as_str(), "cover token contains '/'"));
            }
        }
        for (i, a) in tokens.iter().enumerate() {
            for b in tokens.iter().skip(i + 1) {
                if a.is_empty() || b.is_empty() {
                    continue;
                }
                let overlaps = match anchor {
                    TokenAnchor::Offset(_) => {
                        a.starts_with(b.as_str()) || b.starts_with(a.as_str())
                    }
                    TokenAnchor::BeforeExtension => {
                        a.ends_with(b.as_str()) || b.ends_with(a.as_str())
                    }
                };
                if overlaps {
                    return Err(Error::argument(
                        format!("{:?} / {:?}", a, b),
                        "cover tokens overlap at the anchor",
                    ));
                }
            }
        }
        Ok(scheme)
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn medium(&self) -> &str {
        &self.medium
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    pub fn anchor(&self) -> TokenAnchor {
        self.anchor
    }

    /// Compute all three resolutions from `canonical`. Never fails: anything that
    /// cannot be built is left `None`.
    pub fn derive(&self, canonical: &str) -> Cover {
        let url = match Url::parse(canonical.trim()) {
            Ok(u) if !u.cannot_be_a_base() => u,
            _ => return Cover::default(),
        };
        let filename = match url.path_segments().and_then(|mut s| s.next_back()) {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => {
                return Cover {
                    medium: Some(url),
                    ..Cover::default()
                }
            }
        };

        let (found, bare) = self.classify(&filename);
        let variant = |res: Resolution| -> Option<Url> {
            if res == found {
                return Some(url.clone());
            }
            let token = self.token(res);
            let name = if token.is_empty() {
                bare.clone()
            } else {
                self.insert(&bare, token)?
            };
            with_filename(&url, &filename, &name)
        };

        Cover {
            small: variant(Resolution::Small),
            medium: variant(Resolution::Medium),
            large: variant(Resolution::Large),
        }
    }

    fn token(&self, res: Resolution) -> &str {
        match res {
            Resolution::Small => &self.low,
            Resolution::Medium => &self.medium,
            Resolution::Large => &self.high,
        }
    }

    /// Which resolution `filename` is, and the filename with its token removed.
    /// Tokens never overlap at the anchor, so at most one can match.
    fn classify(&self, filename: &str) -> (Resolution, String) {
        for res in [Resolution::Large, Resolution::Small, Resolution::Medium] {
            let token = self.token(res);
            if token.is_empty() {
                continue;
            }
            if let Some(bare) = self.remove(filename, token) {
                return (res, bare);
            }
        }
        (Resolution::Medium, filename.to_string())
    }

    fn remove(&self, filename: &str, token: &str) -> Option<String> {
        match self.anchor {
            TokenAnchor::Offset(n) => {
                let pos = char_offset(filename, n)?;
                filename[pos..]
                    .starts_with(token)
                    .then(|| format!("{}{}", &filename[..pos], &filename[pos + token.len()..]))
            }
            TokenAnchor::BeforeExtension => {
                let split = extension_split(filename);
                let stem = &filename[..split];
                stem.ends_with(token).then(|| {
                    format!("{}{}", &stem[..stem.len() - token.len()], &filename[split..])
                })
            }
        }
    }

    fn insert(&self, bare: &str, token: &str) -> Option<String> {
        let pos = match self.anchor {
            TokenAnchor::Offset(n) => char_offset(bare, n)?,
            TokenAnchor::BeforeExtension => extension_split(bare),
        };
        Some(format!("{}{}{}", &bare[..pos], token, &bare[pos..]))
    }
}

/// Byte index of the `n`th character; `None` past the end.
fn char_offset(s: &str, n: usize) -> Option<usize> {
    if n == s.chars().count() {
        return Some(s.len());
    }
    s.char_indices().nth(n).map(|(i, _)| i)
}

fn extension_split(filename: &str) -> usize {
    match filename.rfind('.') {
        Some(i) if i > 0 => i,
        _ => filename.len(),
    }
}

/// Replace the last path segment of `url`, keeping query and fragment.
fn with_filename(url: &Url, old: &str, new: &str) -> Option<Url> {
    if new.is_empty() {
        return None;
    }
    let path = url.path();
    let dir = path.strip_suffix(old)?;
    let mut out = url.clone();
    out.set_path(&format!("{}{}", dir, new));
    Url::parse(out.as_str()).ok()
}
