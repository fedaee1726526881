//! Pure mapping from source-specific records to [`NormalizedRecord`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::NormalizeError;
use crate::record::{ForumPost, NormalizedRecord, Publication, RawRecord, SearchHit};

pub const DEFAULT_MAX_COMMENTS: usize = 7;

const FORUM_BASE: &str = "https://www.reddit.com";
const SCHOLAR_CLUSTER_BASE: &str = "https://scholar.google.com/scholar?cluster=";

static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("invalid year regex"));

#[derive(Debug, Clone)]
pub struct Normalizer {
    max_comments: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMMENTS)
    }
}

impl Normalizer {
    pub fn new(max_comments: usize) -> Self {
        Self { max_comments }
    }

    pub fn max_comments(&self) -> usize {
        self.max_comments
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord, NormalizeError> {
        match raw {
            RawRecord::Post(post) => self.normalize_post(post),
            RawRecord::Paper(paper) => normalize_paper(paper),
            RawRecord::Hit(hit) => normalize_hit(hit),
        }
    }

    fn normalize_post(&self, post: &ForumPost) -> Result<NormalizedRecord, NormalizeError> {
        let title = require_title(post.title.as_deref(), "forum post")?;

        let url = post.url.as_deref().and_then(absolute_url).or_else(|| {
            post.permalink
                .as_deref()
                .and_then(|link| resolve_against(FORUM_BASE, link))
        });

        let mut extra = BTreeMap::new();
        insert_text(&mut extra, "id", post.id.as_deref());
        insert_text(&mut extra, "subreddit", post.subreddit.as_deref());
        insert_text(&mut extra, "permalink", post.permalink.as_deref());
        if let Some(score) = post.score {
            extra.insert("score".to_string(), score.to_string());
        }
        if let Some(count) = post.num_comments {
            extra.insert("num_comments".to_string(), count.to_string());
        }

        let comments = post
            .comments
            .iter()
            .take(self.max_comments)
            .map(|comment| comment.trim().to_string())
            .collect();

        Ok(NormalizedRecord::new(
            title,
            trimmed(post.selftext.as_deref()),
            url,
            None,
            extra,
            comments,
        ))
    }
}

fn normalize_paper(paper: &Publication) -> Result<NormalizedRecord, NormalizeError> {
    let title = require_title(paper.title.as_deref(), "publication")?;

    let url = paper
        .url
        .as_deref()
        .and_then(absolute_url)
        .or_else(|| paper.pdf_url.as_deref().and_then(absolute_url));

    let mut extra = BTreeMap::new();
    let authors: Vec<&str> = paper
        .authors
        .iter()
        .map(|author| author.trim())
        .filter(|author| !author.is_empty())
        .collect();
    if !authors.is_empty() {
        extra.insert("authors".to_string(), authors.join(", "));
    }
    insert_text(&mut extra, "doi", paper.doi.as_deref());
    insert_text(&mut extra, "venue", paper.venue.as_deref());
    if let Some(citations) = paper.citations {
        extra.insert("citations".to_string(), citations.to_string());
    }
    if let Some(cluster) = paper.cluster_id.as_deref().map(str::trim) {
        if !cluster.is_empty() {
            extra.insert(
                "scholar_url".to_string(),
                format!("{SCHOLAR_CLUSTER_BASE}{cluster}"),
            );
        }
    }
    if let Some(pdf) = paper.pdf_url.as_deref().and_then(absolute_url) {
        extra.insert("pdf_url".to_string(), pdf.to_string());
    }

    Ok(NormalizedRecord::new(
        title,
        trimmed(paper.abstract_text.as_deref()),
        url,
        paper.year.as_deref().and_then(extract_year),
        extra,
        Vec::new(),
    ))
}

fn normalize_hit(hit: &SearchHit) -> Result<NormalizedRecord, NormalizeError> {
    let title = require_title(hit.title.as_deref(), "search hit")?;

    let mut extra = BTreeMap::new();
    if let Some(position) = hit.position {
        extra.insert("position".to_string(), position.to_string());
    }
    insert_text(&mut extra, "date", hit.date.as_deref());

    Ok(NormalizedRecord::new(
        title,
        trimmed(hit.snippet.as_deref()),
        hit.link.as_deref().and_then(absolute_url),
        hit.date.as_deref().and_then(extract_year),
        extra,
        Vec::new(),
    ))
}

fn require_title(title: Option<&str>, source_kind: &'static str) -> Result<String, NormalizeError> {
    match title.map(str::trim) {
        Some(title) if !title.is_empty() => Ok(title.to_string()),
        _ => Err(NormalizeError::MissingTitle { source_kind }),
    }
}

fn trimmed(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

fn insert_text(extra: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim) {
        if !value.is_empty() {
            extra.insert(key.to_string(), value.to_string());
        }
    }
}

/// Accept only absolute http(s) URLs.
fn absolute_url(raw: &str) -> Option<Url> {
    let parsed = Url::parse(raw.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Some(parsed),
        _ => None,
    }
}

fn resolve_against(base: &str, link: &str) -> Option<Url> {
    if let Some(url) = absolute_url(link) {
        return Some(url);
    }
    let base = Url::parse(base).ok()?;
    base.join(link.trim()).ok().and_then(|url| absolute_url(url.as_str()))
}

pub(crate) fn extract_year(text: &str) -> Option<i32> {
    YEAR_PATTERN
        .find(text)
        .and_then(|found| found.as_str().parse().ok())
}
