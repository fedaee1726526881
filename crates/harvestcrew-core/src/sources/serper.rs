//! Web search results through the Serper Google Search API.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{DEFAULT_USER_AGENT, build_client, send_json};
use super::{ContentSource, RecordStream};
use crate::error::SourceError;
use crate::record::{Query, RawRecord, SearchHit};
use crate::security::SecretValue;

#[derive(Debug, Clone)]
pub struct SerperSettings {
    pub base_url: String,
    pub api_key: SecretValue,
    pub results_per_page: u32,
    pub max_pages: u32,
    pub timeout: Duration,
}

impl SerperSettings {
    pub fn new(api_key: SecretValue) -> Self {
        Self {
            base_url: "https://google.serper.dev".to_string(),
            api_key,
            results_per_page: 10,
            max_pages: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct SerperSource {
    settings: SerperSettings,
    client: Client,
}

impl SerperSource {
    pub fn new(settings: SerperSettings) -> Result<Self, SourceError> {
        let client = build_client(DEFAULT_USER_AGENT, settings.timeout)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl ContentSource for SerperSource {
    fn name(&self) -> &str {
        "serper"
    }

    async fn open(&self, query: &Query) -> Result<Box<dyn RecordStream>, SourceError> {
        Ok(Box::new(SerperStream {
            client: self.client.clone(),
            settings: self.settings.clone(),
            query: query.as_str().to_string(),
            next_page: 1,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: u32,
    page: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
    date: Option<String>,
    position: Option<u32>,
}

impl From<OrganicResult> for SearchHit {
    fn from(value: OrganicResult) -> Self {
        SearchHit {
            title: value.title,
            link: value.link,
            snippet: value.snippet,
            date: value.date,
            position: value.position,
        }
    }
}

struct SerperStream {
    client: Client,
    settings: SerperSettings,
    query: String,
    next_page: u32,
    buffer: VecDeque<SearchHit>,
    exhausted: bool,
}

impl SerperStream {
    async fn fetch_page(&mut self) -> Result<(), SourceError> {
        let url = format!("{}/search", self.settings.base_url.trim_end_matches('/'));
        let body = SearchRequest {
            q: &self.query,
            num: self.settings.results_per_page,
            page: self.next_page,
        };

        let response: SearchResponse = send_json(
            self.client
                .post(url)
                .header("X-API-KEY", self.settings.api_key.expose())
                .json(&body),
        )
        .await?;

        debug!(
            query = %self.query,
            page = self.next_page,
            results = response.organic.len(),
            "serper page fetched"
        );

        let received = response.organic.len();
        self.buffer
            .extend(response.organic.into_iter().map(SearchHit::from));
        self.next_page += 1;
        if received < self.settings.results_per_page as usize
            || self.next_page > self.settings.max_pages
        {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStream for SerperStream {
    async fn next_record(&mut self) -> Result<Option<RawRecord>, SourceError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front().map(RawRecord::Hit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> SerperSettings {
        let mut settings = SerperSettings::new(SecretValue::new("test-key"));
        settings.base_url = server.uri();
        settings.results_per_page = 2;
        settings
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "test-key"))
            .and(body_partial_json(json!({"q": "ai tools", "page": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "One", "link": "https://one.example", "snippet": "first", "position": 1},
                    {"title": "Two", "link": "https://two.example", "snippet": "second", "position": 2}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"page": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "organic": [
                    {"title": "Three", "link": "https://three.example", "date": "2 days ago", "position": 3}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = SerperSource::new(settings(&server)).unwrap();
        let mut stream = source.open(&Query::new("ai tools")).await.unwrap();

        let mut titles = Vec::new();
        while let Some(record) = stream.next_record().await.unwrap() {
            match record {
                RawRecord::Hit(hit) => titles.push(hit.title.unwrap_or_default()),
                other => panic!("unexpected record {other:?}"),
            }
        }
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn rate_limit_is_transient_and_bad_key_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"q": "busy"})))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"q": "denied"})))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = SerperSource::new(settings(&server)).unwrap();

        let mut stream = source.open(&Query::new("busy")).await.unwrap();
        let err = stream.next_record().await.unwrap_err();
        assert!(err.retryable);

        let mut stream = source.open(&Query::new("denied")).await.unwrap();
        let err = stream.next_record().await.unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn empty_organic_list_is_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"searchParameters": {}})))
            .mount(&server)
            .await;

        let source = SerperSource::new(settings(&server)).unwrap();
        let mut stream = source.open(&Query::new("nothing")).await.unwrap();
        assert!(stream.next_record().await.unwrap().is_none());
        assert!(stream.next_record().await.unwrap().is_none());
    }
}
