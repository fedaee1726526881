//! Record types flowing from content sources to the role pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// A single search string submitted to a content source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query(String);

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A forum post with its top-level comments in the forum's native order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForumPost {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub permalink: Option<String>,
    pub selftext: Option<String>,
    pub subreddit: Option<String>,
    pub score: Option<i64>,
    pub num_comments: Option<u64>,
    pub comments: Vec<String>,
}

/// Bibliographic entry from an academic search index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publication {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub year: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub citations: Option<u64>,
    pub venue: Option<String>,
    pub cluster_id: Option<String>,
    pub pdf_url: Option<String>,
}

/// One organic result from a web search API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHit {
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: Option<String>,
    pub date: Option<String>,
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    Post(ForumPost),
    Paper(Publication),
    Hit(SearchHit),
}

impl RawRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            RawRecord::Post(_) => "forum post",
            RawRecord::Paper(_) => "publication",
            RawRecord::Hit(_) => "search hit",
        }
    }
}

/// Uniform record handed to the text-generation stage.
///
/// Built only by [`crate::Normalizer`]; the title is never empty and the URL,
/// when present, is absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    title: String,
    body: String,
    url: Option<Url>,
    year: Option<i32>,
    extra: BTreeMap<String, String>,
    comments: Vec<String>,
}

impl NormalizedRecord {
    pub(crate) fn new(
        title: String,
        body: String,
        url: Option<Url>,
        year: Option<i32>,
        extra: BTreeMap<String, String>,
        comments: Vec<String>,
    ) -> Self {
        debug_assert!(!title.trim().is_empty());
        Self {
            title,
            body,
            url,
            year,
            extra,
            comments,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Plain-text rendering used as model context.
    pub fn render(&self) -> String {
        let mut out = format!("Title: {}\n", self.title);
        match &self.url {
            Some(url) => out.push_str(&format!("URL: {url}\n")),
            None => out.push_str("URL: (none)\n"),
        }
        if let Some(year) = self.year {
            out.push_str(&format!("Year: {year}\n"));
        }
        for (key, value) in &self.extra {
            out.push_str(&format!("{key}: {value}\n"));
        }
        if !self.body.is_empty() {
            out.push_str(&format!("{}\n", self.body));
        }
        if !self.comments.is_empty() {
            out.push_str("Comments:\n");
            for comment in &self.comments {
                out.push_str(&format!("- {}\n", comment.replace('\n', " ")));
            }
        }
        out
    }
}

/// Render a harvest as one block of numbered records.
pub fn render_records(records: &[NormalizedRecord]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(idx, record)| format!("[{}]\n{}", idx + 1, record.render()))
        .collect::<Vec<_>>()
        .join("\n")
}
