//! Selector-driven extractor. A [SiteProfile] names the CSS selectors for one site, so
//! a backend can be declared in configuration instead of compiled in.
//!
//! Container selectors decide between "unrecognized page" ([Error::Format]) and
//! "recognized page with nothing on it" (empty `Vec`).

use crate::backend::{Error, Extractor, RawDocument, Result};
use crate::cover::CoverScheme;
use crate::model::{AttributedValue, Chapter, Cover, Name, Page, Title, TitleSummary};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

/// CSS selectors for one site. Unset optional selectors skip that field.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Must match on a search results page, even with zero hits.
    pub search_container: String,
    pub search_item: String,
    /// Element carrying `href`, relative to the item. Unset: the item itself.
    pub search_link: Option<String>,
    /// Element carrying the name, relative to the item. Unset: the link text.
    pub search_name: Option<String>,

    /// Title name; required on a title page.
    pub title_name: String,
    pub title_alt_name: Option<String>,
    pub title_cover: Option<String>,
    pub title_author: Option<String>,
    pub title_genre: Option<String>,
    pub title_description: Option<String>,
    /// Suffixes stripped from the end of the title name (e.g. " - MangaHost").
    pub title_suffixes: Vec<String>,

    /// Must match on a chapter list page, even with zero chapters.
    pub chapter_container: String,
    pub chapter_item: String,
    pub chapter_link: Option<String>,
    pub chapter_name: Option<String>,
    pub chapter_date: Option<String>,
    /// chrono format for `chapter_date`, e.g. `"%b %d, %Y"`.
    pub chapter_date_format: String,
    pub chapter_cover: Option<String>,
    /// Site lists newest first; return oldest first.
    pub chapters_newest_first: bool,

    /// Must match on a reader page, even with zero images.
    pub page_container: String,
    pub page_image: String,
    /// Attributes tried in order for image URLs (lazy loaders use `data-src`).
    pub image_attrs: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            search_container: "body".to_string(),
            search_item: "a".to_string(),
            search_link: None,
            search_name: None,
            title_name: "h1".to_string(),
            title_alt_name: None,
            title_cover: None,
            title_author: None,
            title_genre: None,
            title_description: None,
            title_suffixes: Vec::new(),
            chapter_container: "body".to_string(),
            chapter_item: "li".to_string(),
            chapter_link: Some("a".to_string()),
            chapter_name: None,
            chapter_date: None,
            chapter_date_format: "%Y-%m-%d".to_string(),
            chapter_cover: None,
            chapters_newest_first: false,
            page_container: "body".to_string(),
            page_image: "img".to_string(),
            image_attrs: vec!["data-src".to_string(), "src".to_string()],
        }
    }
}

/// Parse a CSS selector or return an argument error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector> {
    Selector::parse(sel).map_err(|e| Error::argument(sel, format!("invalid selector: {}", e)))
}

fn parse_optional(sel: &Option<String>) -> Result<Option<Selector>> {
    sel.as_deref().map(parse_selector).transpose()
}

struct Compiled {
    search_container: Selector,
    search_item: Selector,
    search_link: Option<Selector>,
    search_name: Option<Selector>,
    title_name: Selector,
    title_alt_name: Option<Selector>,
    title_cover: Option<Selector>,
    title_author: Option<Selector>,
    title_genre: Option<Selector>,
    title_description: Option<Selector>,
    chapter_container: Selector,
    chapter_item: Selector,
    chapter_link: Option<Selector>,
    chapter_name: Option<Selector>,
    chapter_date: Option<Selector>,
    chapter_cover: Option<Selector>,
    page_container: Selector,
    page_image: Selector,
}

impl Compiled {
    fn new(p: &SiteProfile) -> Result<Self> {
        Ok(Self {
            search_container: parse_selector(&p.search_container)?,
            search_item: parse_selector(&p.search_item)?,
            search_link: parse_optional(&p.search_link)?,
            search_name: parse_optional(&p.search_name)?,
            title_name: parse_selector(&p.title_name)?,
            title_alt_name: parse_optional(&p.title_alt_name)?,
            title_cover: parse_optional(&p.title_cover)?,
            title_author: parse_optional(&p.title_author)?,
            title_genre: parse_optional(&p.title_genre)?,
            title_description: parse_optional(&p.title_description)?,
            chapter_container: parse_selector(&p.chapter_container)?,
            chapter_item: parse_selector(&p.chapter_item)?,
            chapter_link: parse_optional(&p.chapter_link)?,
            chapter_name: parse_optional(&p.chapter_name)?,
            chapter_date: parse_optional(&p.chapter_date)?,
            chapter_cover: parse_optional(&p.chapter_cover)?,
            page_container: parse_selector(&p.page_container)?,
            page_image: parse_selector(&p.page_image)?,
        })
    }
}

/// [Extractor] driven by a [SiteProfile]. Covers are expanded with the backend's [CoverScheme].
pub struct HtmlExtractor {
    profile: SiteProfile,
    selectors: Compiled,
    covers: Option<CoverScheme>,
}

impl HtmlExtractor {
    /// Compile every selector up front; an invalid one fails here rather than per request.
    pub fn new(profile: SiteProfile, covers: Option<CoverScheme>) -> Result<Self> {
        let selectors = Compiled::new(&profile)?;
        Ok(Self {
            profile,
            selectors,
            covers,
        })
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    fn cover(&self, url: &Url) -> Cover {
        match &self.covers {
            Some(scheme) => scheme.derive(url.as_str()),
            None => Cover {
                medium: Some(url.clone()),
                ..Cover::default()
            },
        }
    }

    fn image_url(&self, el: ElementRef<'_>, base: &Url) -> Option<Url> {
        self.profile
            .image_attrs
            .iter()
            .filter_map(|attr| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .and_then(|v| base.join(v).ok())
    }

    fn parse_date(&self, raw: &str, doc: &RawDocument) -> Result<DateTime<Utc>> {
        let fmt = &self.profile.chapter_date_format;
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.and_utc());
        }
        NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .ok_or_else(|| {
                Error::format(
                    &doc.url,
                    format!("chapter date {:?} does not match {:?}", raw, fmt),
                )
            })
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip a known site suffix from the end of a name, so names containing " - " keep their text.
fn strip_site_suffix(s: &str, suffixes: &[String]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if let Some(stripped) = t.strip_suffix(suffix.as_str()) {
            t = stripped.trim();
            break;
        }
    }
    t.to_string()
}

fn first_text(scope: ElementRef<'_>, sel: Option<&Selector>) -> Option<String> {
    let el = match sel {
        Some(sel) => scope.select(sel).next()?,
        None => scope,
    };
    Some(text_of(el)).filter(|s| !s.is_empty())
}

/// Element with `href` inside `scope` (or `scope` itself), resolved against `base`.
fn link_in<'a>(
    scope: ElementRef<'a>,
    sel: Option<&Selector>,
    base: &Url,
) -> Option<(ElementRef<'a>, Url)> {
    let el = match sel {
        Some(sel) => scope.select(sel).next()?,
        None => scope,
    };
    let href = el.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    base.join(href).ok().map(|u| (el, u))
}

fn attributed(doc: &Html, sel: Option<&Selector>, base: &Url) -> Vec<AttributedValue> {
    let Some(sel) = sel else {
        return Vec::new();
    };
    doc.select(sel)
        .filter_map(|el| {
            let value = text_of(el);
            if value.is_empty() {
                return None;
            }
            let link = el
                .value()
                .attr("href")
                .filter(|h| !h.trim().is_empty())
                .and_then(|h| base.join(h.trim()).ok());
            Some(AttributedValue { value, link })
        })
        .collect()
}

impl Extractor for HtmlExtractor {
    fn search(&self, doc: &RawDocument) -> Result<Vec<TitleSummary>> {
        let html = Html::parse_document(&doc.body);
        let s = &self.selectors;
        let container = html
            .select(&s.search_container)
            .next()
            .ok_or_else(|| Error::format(&doc.url, "search results container not found"))?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for item in container.select(&s.search_item) {
            let Some((link, uri)) = link_in(item, s.search_link.as_ref(), &doc.url) else {
                continue;
            };
            let name = match &s.search_name {
                Some(sel) => first_text(item, Some(sel)),
                None => first_text(link, None),
            };
            let Some(name) = name else { continue };
            if seen.insert(uri.clone()) {
                results.push(TitleSummary {
                    name: Name::english(name),
                    uri,
                });
            }
        }
        Ok(results)
    }

    fn title(&self, doc: &RawDocument) -> Result<Title> {
        let html = Html::parse_document(&doc.body);
        let s = &self.selectors;
        let root = html.root_element();
        let name = first_text(root, Some(&s.title_name))
            .map(|n| strip_site_suffix(&n, &self.profile.title_suffixes))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::format(&doc.url, "title name not found"))?;
        let original = s
            .title_alt_name
            .as_ref()
            .and_then(|sel| first_text(root, Some(sel)));

        let covers: Vec<Cover> = s
            .title_cover
            .as_ref()
            .map(|sel| {
                html.select(sel)
                    .filter_map(|el| self.image_url(el, &doc.url))
                    .map(|u| self.cover(&u))
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let description = s
            .title_description
            .as_ref()
            .and_then(|sel| first_text(root, Some(sel)))
            .unwrap_or_default();

        Ok(Title {
            summary: TitleSummary {
                name: Name {
                    original,
                    english: Some(name),
                    localized: None,
                },
                uri: doc.url.clone(),
            },
            covers,
            authors: attributed(&html, s.title_author.as_ref(), &doc.url),
            genres: attributed(&html, s.title_genre.as_ref(), &doc.url),
            description,
        })
    }

    fn chapters(&self, doc: &RawDocument) -> Result<Vec<Chapter>> {
        let html = Html::parse_document(&doc.body);
        let s = &self.selectors;
        let container = html
            .select(&s.chapter_container)
            .next()
            .ok_or_else(|| Error::format(&doc.url, "chapter list container not found"))?;

        let mut seen = HashSet::new();
        let mut chapters = Vec::new();
        for item in container.select(&s.chapter_item) {
            let (link, uri) = link_in(item, s.chapter_link.as_ref(), &doc.url)
                .ok_or_else(|| Error::format(&doc.url, "chapter entry without link"))?;
            if !seen.insert(uri.clone()) {
                continue;
            }
            let name = match &s.chapter_name {
                Some(sel) => first_text(item, Some(sel)),
                None => first_text(link, None),
            }
            .unwrap_or_default();
            let raw_date = s
                .chapter_date
                .as_ref()
                .and_then(|sel| first_text(item, Some(sel)));
            let added_date = match raw_date {
                Some(raw) => Some(self.parse_date(&raw, doc)?),
                None => None,
            };
            let cover = s
                .chapter_cover
                .as_ref()
                .and_then(|sel| item.select(sel).next())
                .and_then(|el| self.image_url(el, &doc.url))
                .map(|u| self.cover(&u))
                .filter(|c| !c.is_empty());
            chapters.push(Chapter {
                name: Name::english(name),
                uri,
                added_date,
                cover,
            });
        }
        if self.profile.chapters_newest_first {
            chapters.reverse();
        }
        Ok(chapters)
    }

    fn pages(&self, doc: &RawDocument) -> Result<Vec<Page>> {
        let html = Html::parse_document(&doc.body);
        let s = &self.selectors;
        let container = html
            .select(&s.page_container)
            .next()
            .ok_or_else(|| Error::format(&doc.url, "reader container not found"))?;
        Ok(container
            .select(&s.page_image)
            .filter_map(|el| self.image_url(el, &doc.url))
            .map(|uri| Page { uri })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cover::TokenAnchor;

    fn doc(url: &str, body: &str) -> RawDocument {
        RawDocument {
            url: Url::parse(url).unwrap(),
            body: body.to_string(),
        }
    }

    fn profile() -> SiteProfile {
        SiteProfile {
            search_container: "div.search-results".to_string(),
            search_item: "div.result".to_string(),
            search_link: Some("a.title".to_string()),
            title_name: "div.info h1".to_string(),
            title_alt_name: Some("div.info span.alt".to_string()),
            title_cover: Some("div.cover img".to_string()),
            title_author: Some("div.info a.author".to_string()),
            title_genre: Some("div.info a.genre".to_string()),
            title_description: Some("div.summary".to_string()),
            title_suffixes: vec![" - Manga Host".to_string()],
            chapter_container: "ul.chapters".to_string(),
            chapter_item: "li".to_string(),
            chapter_name: Some("a span.name".to_string()),
            chapter_date: Some("span.date".to_string()),
            chapter_date_format: "%b %d, %Y".to_string(),
            chapters_newest_first: true,
            page_container: "div.reader".to_string(),
            page_image: "img.page".to_string(),
            ..SiteProfile::default()
        }
    }

    fn extractor() -> HtmlExtractor {
        HtmlExtractor::new(
            profile(),
            Some(CoverScheme::new("p", "o", TokenAnchor::Offset(4)).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn invalid_selector_is_rejected_at_construction() {
        let bad = SiteProfile {
            page_image: "img[".to_string(),
            ..SiteProfile::default()
        };
        assert!(matches!(
            HtmlExtractor::new(bad, None),
            Err(Error::Argument { .. })
        ));
    }

    #[test]
    fn search_resolves_links_and_dedups() -> Result<()> {
        let d = doc(
            "https://mangahost.example/search?q=ber",
            r#"<html><body><div class="search-results">
<div class="result"><a class="title" href="/title/berserk">Berserk</a></div>
<div class="result"><a class="title" href="https://mangahost.example/title/berserk">Berserk</a></div>
<div class="result"><a class="title" href="title/berserk-prototype">  Berserk
   Prototype </a></div>
<div class="result"><span>no link</span></div>
</div></body></html>"#,
        );
        let results = extractor().search(&d)?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].uri.as_str(), "https://mangahost.example/title/berserk");
        assert_eq!(results[1].name.display(), "Berserk Prototype");
        assert_eq!(results[1].uri.path(), "/title/berserk-prototype");
        Ok(())
    }

    #[test]
    fn search_with_no_hits_is_empty_but_missing_container_is_format() -> Result<()> {
        let empty = doc(
            "https://mangahost.example/search?q=zzz",
            r#"<div class="search-results"><p>No results</p></div>"#,
        );
        assert!(extractor().search(&empty)?.is_empty());

        let captcha = doc(
            "https://mangahost.example/search?q=zzz",
            "<html><body><form id=\"challenge\"></form></body></html>",
        );
        assert!(matches!(
            extractor().search(&captcha),
            Err(Error::Format { .. })
        ));
        Ok(())
    }

    #[test]
    fn title_page_extracts_metadata_and_derived_covers() -> Result<()> {
        let d = doc(
            "https://mangahost.example/title/berserk",
            r#"<html><body>
<div class="cover"><img data-src="https://img.mangahost.example/c/0012o.jpg" src="/lazy.gif"></div>
<div class="info"><h1>Berserk - Manga Host</h1><span class="alt">ベルセルク</span>
<a class="author" href="/author/miura">Kentaro Miura</a>
<a class="genre" href="/genre/action">Action</a><a class="genre">Dark Fantasy</a></div>
<div class="summary">  Guts, a former
 mercenary.</div>
</body></html>"#,
        );
        let title = extractor().title(&d)?;
        assert_eq!(title.name().english.as_deref(), Some("Berserk"));
        assert_eq!(title.name().original.as_deref(), Some("ベルセルク"));
        assert_eq!(title.uri().as_str(), "https://mangahost.example/title/berserk");
        assert_eq!(title.description, "Guts, a former mercenary.");
        assert_eq!(title.authors.len(), 1);
        assert_eq!(
            title.authors[0].link.as_ref().map(Url::as_str),
            Some("https://mangahost.example/author/miura")
        );
        assert_eq!(title.genres.len(), 2);
        assert!(title.genres[1].link.is_none());

        assert_eq!(title.covers.len(), 1);
        let cover = &title.covers[0];
        assert_eq!(
            cover.medium.as_ref().map(Url::as_str),
            Some("https://img.mangahost.example/c/0012.jpg")
        );
        assert_eq!(
            cover.small.as_ref().map(Url::as_str),
            Some("https://img.mangahost.example/c/0012p.jpg")
        );
        Ok(())
    }

    #[test]
    fn title_without_name_is_format_error() {
        let d = doc("https://mangahost.example/title/x", "<html><body></body></html>");
        assert!(matches!(extractor().title(&d), Err(Error::Format { .. })));
    }

    #[test]
    fn chapters_parse_dates_and_reverse_newest_first() -> Result<()> {
        let d = doc(
            "https://mangahost.example/title/berserk",
            r#"<ul class="chapters">
<li><a href="/title/berserk/2"><span class="name">Chapter 2</span></a><span class="date">Mar 02, 1990</span></li>
<li><a href="/title/berserk/1"><span class="name">Chapter 1</span></a><span class="date">Feb 01, 1990</span></li>
</ul>"#,
        );
        let chapters = extractor().chapters(&d)?;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name.display(), "Chapter 1");
        assert_eq!(chapters[0].uri.path(), "/title/berserk/1");
        assert_eq!(
            chapters[0].added_date.map(|d| d.to_rfc3339()),
            Some("1990-02-01T00:00:00+00:00".to_string())
        );
        assert!(chapters[1].cover.is_none());
        Ok(())
    }

    #[test]
    fn unparsable_chapter_date_is_format_error() {
        let d = doc(
            "https://mangahost.example/title/berserk",
            r#"<ul class="chapters"><li><a href="/c/1"><span class="name">1</span></a><span class="date">yesterday</span></li></ul>"#,
        );
        assert!(matches!(extractor().chapters(&d), Err(Error::Format { .. })));
    }

    #[test]
    fn chapter_entry_without_link_is_format_error() {
        let d = doc(
            "https://mangahost.example/title/berserk",
            r#"<ul class="chapters"><li><span class="name">1</span></li></ul>"#,
        );
        assert!(matches!(extractor().chapters(&d), Err(Error::Format { .. })));
    }

    #[test]
    fn pages_prefer_lazy_attribute_and_allow_empty_reader() -> Result<()> {
        let d = doc(
            "https://mangahost.example/title/berserk/1",
            r#"<div class="reader">
<img class="page" data-src="https://img.mangahost.example/p/1.jpg" src="/blank.gif">
<img class="page" src="2.jpg">
<img class="ad" src="/ad.jpg">
</div>"#,
        );
        let pages = extractor().pages(&d)?;
        let uris: Vec<&str> = pages.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://img.mangahost.example/p/1.jpg",
                "https://mangahost.example/title/berserk/2.jpg"
            ]
        );

        let empty = doc("https://mangahost.example/c/9", r#"<div class="reader"></div>"#);
        assert!(extractor().pages(&empty)?.is_empty());
        Ok(())
    }

    #[test]
    fn strip_site_suffix_removes_trailing_suffix_only() {
        let suffixes = vec![" - Manga Host".to_string(), " | Manga Host".to_string()];
        assert_eq!(
            strip_site_suffix("Chapter 1 - The Beginning - Manga Host", &suffixes),
            "Chapter 1 - The Beginning"
        );
        assert_eq!(strip_site_suffix("Berserk", &suffixes), "Berserk");
    }
}
