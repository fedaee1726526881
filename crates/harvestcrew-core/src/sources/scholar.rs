//! Google Scholar result pages, scraped with `scraper`.
//!
//! Scholar has no public API; the HTML layout (`.gs_r` blocks holding a
//! `.gs_ri` body) has been stable for years but any change shows up here as
//! records without titles, which the normalizer rejects.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::http::{build_client, send_text};
use super::{ContentSource, RecordStream};
use crate::error::{SourceError, SourceErrorKind};
use crate::normalize::extract_year;
use crate::record::{Publication, Query, RawRecord};

const RESULTS_PER_PAGE: usize = 10;

static RESULT: Lazy<Selector> = Lazy::new(|| selector("div.gs_r"));
static BODY: Lazy<Selector> = Lazy::new(|| selector("div.gs_ri"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("h3.gs_rt"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| selector("h3.gs_rt a"));
static BYLINE: Lazy<Selector> = Lazy::new(|| selector("div.gs_a"));
static SNIPPET: Lazy<Selector> = Lazy::new(|| selector("div.gs_rs"));
static FOOTER_LINKS: Lazy<Selector> = Lazy::new(|| selector("div.gs_fl a"));
static PDF_LINK: Lazy<Selector> = Lazy::new(|| selector("div.gs_or_ggsm a"));

static TYPE_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\[[A-Z]+\]\s*)+").expect("invalid type tag regex"));
static CITES_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]cites=(\d+)").expect("invalid cites regex"));
static CITED_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Cited by (\d+)").expect("invalid cited-by regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("invalid scholar selector")
}

#[derive(Debug, Clone)]
pub struct ScholarSettings {
    pub base_url: String,
    pub user_agent: String,
    pub max_pages: u32,
    pub timeout: Duration,
}

impl Default for ScholarSettings {
    fn default() -> Self {
        Self {
            base_url: "https://scholar.google.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) harvestcrew".to_string(),
            max_pages: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ScholarSource {
    settings: ScholarSettings,
    client: Client,
}

impl ScholarSource {
    pub fn new(settings: ScholarSettings) -> Result<Self, SourceError> {
        let client = build_client(&settings.user_agent, settings.timeout)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl ContentSource for ScholarSource {
    fn name(&self) -> &str {
        "scholar"
    }

    async fn open(&self, query: &Query) -> Result<Box<dyn RecordStream>, SourceError> {
        let base = Url::parse(&self.settings.base_url).map_err(|err| {
            SourceError::terminal(
                SourceErrorKind::Transport,
                format!("invalid scholar base url: {err}"),
            )
        })?;
        Ok(Box::new(ScholarStream {
            client: self.client.clone(),
            base,
            max_pages: self.settings.max_pages,
            query: query.as_str().to_string(),
            pages_fetched: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }
}

struct ScholarStream {
    client: Client,
    base: Url,
    max_pages: u32,
    query: String,
    pages_fetched: u32,
    buffer: VecDeque<Publication>,
    exhausted: bool,
}

impl ScholarStream {
    async fn fetch_page(&mut self) -> Result<(), SourceError> {
        let url = self.base.join("scholar").map_err(|err| {
            SourceError::terminal(SourceErrorKind::Transport, err.to_string())
        })?;
        let start = (self.pages_fetched as usize * RESULTS_PER_PAGE).to_string();
        let html = send_text(self.client.get(url).query(&[
            ("q", self.query.as_str()),
            ("start", start.as_str()),
            ("hl", "en"),
        ]))
        .await?;

        let papers = parse_results(&html, &self.base)?;
        debug!(
            query = %self.query,
            start = %start,
            results = papers.len(),
            "scholar page fetched"
        );

        self.pages_fetched += 1;
        if papers.len() < RESULTS_PER_PAGE || self.pages_fetched >= self.max_pages {
            self.exhausted = true;
        }
        self.buffer.extend(papers);
        Ok(())
    }
}

#[async_trait]
impl RecordStream for ScholarStream {
    async fn next_record(&mut self) -> Result<Option<RawRecord>, SourceError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front().map(RawRecord::Paper))
    }
}

fn is_blocked(html: &str) -> bool {
    html.contains("gs_captcha") || html.contains("unusual traffic") || html.contains("id=\"recaptcha\"")
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_results(html: &str, base: &Url) -> Result<Vec<Publication>, SourceError> {
    if is_blocked(html) {
        return Err(SourceError::transient(
            SourceErrorKind::Blocked,
            "scholar served a captcha page",
        ));
    }

    let document = Html::parse_document(html);
    let resolve = |href: &str| base.join(href).ok().map(|url| url.to_string());

    let papers = document
        .select(&RESULT)
        .filter_map(|result| {
            let body = result.select(&BODY).next()?;

            let title = body
                .select(&TITLE_LINK)
                .next()
                .or_else(|| body.select(&TITLE).next())
                .map(text_of)
                .map(|title| TYPE_TAGS.replace(&title, "").trim().to_string())
                .filter(|title| !title.is_empty());
            let url = body
                .select(&TITLE_LINK)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(resolve);

            let byline = body.select(&BYLINE).next().map(text_of).unwrap_or_default();
            let (authors, venue, year) = parse_byline(&byline);

            let abstract_text = body
                .select(&SNIPPET)
                .next()
                .map(text_of)
                .filter(|text| !text.is_empty());

            let mut citations = None;
            let mut cluster_id = None;
            for link in body.select(&FOOTER_LINKS) {
                let label = text_of(link);
                if let Some(count) = CITED_BY.captures(&label) {
                    citations = count[1].parse().ok();
                    cluster_id = link
                        .value()
                        .attr("href")
                        .and_then(|href| CITES_ID.captures(href))
                        .map(|caps| caps[1].to_string());
                }
            }

            let pdf_url = result
                .select(&PDF_LINK)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(resolve);

            Some(Publication {
                title,
                authors,
                abstract_text,
                year,
                url,
                doi: None,
                citations,
                venue,
                cluster_id,
                pdf_url,
            })
        })
        .collect();

    Ok(papers)
}

/// Split "A Author, B Author - Venue, 2020 - publisher.org".
fn parse_byline(byline: &str) -> (Vec<String>, Option<String>, Option<String>) {
    let mut parts = byline.split(" - ");
    let authors = parts
        .next()
        .map(|authors| {
            authors
                .split(',')
                .map(|author| author.trim().trim_end_matches('…').trim().to_string())
                .filter(|author| !author.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let middle = parts.next().unwrap_or_default();
    let year = extract_year(middle).map(|year| year.to_string());
    let venue = middle
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && extract_year(part).map(|y| y.to_string()).as_deref() != Some(part))
        .collect::<Vec<_>>()
        .join(", ");
    let venue = Some(venue.trim_end_matches('…').trim().to_string()).filter(|v| !v.is_empty());

    (authors, venue, year)
}
