//! Subreddit listings through Reddit's application-only OAuth API.
//!
//! The query names the subreddit. Each post is returned with its top-level
//! comments; "load more" placeholders are never expanded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::http::{build_client, send_json};
use super::{ContentSource, RecordStream};
use crate::error::{SourceError, SourceErrorKind};
use crate::record::{ForumPost, Query, RawRecord};
use crate::security::SecretValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedditListing {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl RedditListing {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedditListing::Hot => "hot",
            RedditListing::New => "new",
            RedditListing::Top => "top",
            RedditListing::Rising => "rising",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedditSettings {
    pub auth_base_url: String,
    pub api_base_url: String,
    pub client_id: SecretValue,
    pub client_secret: SecretValue,
    pub user_agent: String,
    pub listing: RedditListing,
    pub page_size: u32,
    pub comment_limit: u32,
    pub load_comments: bool,
    pub timeout: Duration,
}

impl RedditSettings {
    pub fn new(
        client_id: SecretValue,
        client_secret: SecretValue,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            auth_base_url: "https://www.reddit.com".to_string(),
            api_base_url: "https://oauth.reddit.com".to_string(),
            client_id,
            client_secret,
            user_agent: user_agent.into(),
            listing: RedditListing::Hot,
            page_size: 25,
            comment_limit: 7,
            load_comments: true,
            timeout: Duration::from_secs(30),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

struct Shared {
    settings: RedditSettings,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl Shared {
    async fn bearer(&self) -> Result<String, SourceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/api/v1/access_token",
            self.settings.auth_base_url.trim_end_matches('/')
        );
        let response: TokenResponse = send_json(
            self.client
                .post(url)
                .basic_auth(
                    self.settings.client_id.expose(),
                    Some(self.settings.client_secret.expose()),
                )
                .form(&[("grant_type", "client_credentials")]),
        )
        .await?;

        let Some(value) = response.access_token.filter(|token| !token.is_empty()) else {
            return Err(SourceError::terminal(
                SourceErrorKind::Auth,
                response
                    .error
                    .unwrap_or_else(|| "token endpoint returned no access token".to_string()),
            ));
        };

        // Treated as expired one minute before the advertised lifetime.
        let lifetime = response.expires_in.unwrap_or(3600).saturating_sub(60);
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!("reddit access token refreshed");
        Ok(value)
    }

    async fn comments(&self, post_id: &str) -> Result<Vec<String>, SourceError> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/comments/{post_id}",
            self.settings.api_base_url.trim_end_matches('/')
        );
        let limit = self.settings.comment_limit.to_string();
        let listings: Vec<Listing> = send_json(
            self.client
                .get(url)
                .bearer_auth(token)
                .query(&[("depth", "1"), ("limit", limit.as_str()), ("raw_json", "1")]),
        )
        .await?;

        Ok(listings
            .into_iter()
            .nth(1)
            .map(|listing| {
                listing
                    .data
                    .children
                    .into_iter()
                    .filter(|child| child.kind == "t1")
                    .filter_map(|child| child.data.body)
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct RedditSource {
    shared: Arc<Shared>,
}

impl RedditSource {
    pub fn new(settings: RedditSettings) -> Result<Self, SourceError> {
        let client = build_client(&settings.user_agent, settings.timeout)?;
        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                client,
                token: Mutex::new(None),
            }),
        })
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn open(&self, query: &Query) -> Result<Box<dyn RecordStream>, SourceError> {
        let subreddit = query
            .as_str()
            .trim()
            .trim_start_matches("/r/")
            .trim_start_matches("r/")
            .trim_matches('/')
            .to_string();
        Ok(Box::new(RedditStream {
            shared: self.shared.clone(),
            subreddit,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    kind: String,
    data: ThingData,
}

#[derive(Deserialize, Default)]
struct ThingData {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    permalink: Option<String>,
    selftext: Option<String>,
    subreddit: Option<String>,
    score: Option<i64>,
    num_comments: Option<u64>,
    body: Option<String>,
}

struct RedditStream {
    shared: Arc<Shared>,
    subreddit: String,
    after: Option<String>,
    buffer: VecDeque<ThingData>,
    exhausted: bool,
}

impl RedditStream {
    async fn fetch_page(&mut self) -> Result<(), SourceError> {
        let settings = &self.shared.settings;
        let token = self.shared.bearer().await?;
        let url = format!(
            "{}/r/{}/{}",
            settings.api_base_url.trim_end_matches('/'),
            self.subreddit,
            settings.listing.as_str()
        );

        let mut params = vec![
            ("limit", settings.page_size.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = &self.after {
            params.push(("after", after.clone()));
        }

        let listing: Listing = send_json(
            self.shared
                .client
                .get(url)
                .bearer_auth(token)
                .query(&params),
        )
        .await?;

        let posts: Vec<ThingData> = listing
            .data
            .children
            .into_iter()
            .filter(|child| child.kind == "t3")
            .map(|child| child.data)
            .collect();

        debug!(
            subreddit = %self.subreddit,
            posts = posts.len(),
            after = ?listing.data.after,
            "reddit listing fetched"
        );

        if posts.is_empty() || listing.data.after.is_none() {
            self.exhausted = true;
        }
        self.after = listing.data.after;
        self.buffer.extend(posts);
        Ok(())
    }
}

#[async_trait]
impl RecordStream for RedditStream {
    async fn next_record(&mut self) -> Result<Option<RawRecord>, SourceError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        let Some(post) = self.buffer.pop_front() else {
            return Ok(None);
        };

        let comments = match (&post.id, self.shared.settings.load_comments) {
            (Some(id), true) => self.shared.comments(id).await?,
            _ => Vec::new(),
        };

        Ok(Some(RawRecord::Post(ForumPost {
            id: post.id,
            title: post.title,
            url: post.url,
            permalink: post.permalink,
            selftext: post.selftext,
            subreddit: post.subreddit,
            score: post.score,
            num_comments: post.num_comments,
            comments,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> RedditSettings {
        let mut settings = RedditSettings::new(
            SecretValue::new("client"),
            SecretValue::new("secret"),
            "harvestcrew-tests/0.1",
        );
        settings.auth_base_url = server.uri();
        settings.api_base_url = server.uri();
        settings
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn post(id: &str, title: &str) -> serde_json::Value {
        json!({
            "kind": "t3",
            "data": {
                "id": id,
                "title": title,
                "url": format!("https://example.com/{id}"),
                "permalink": format!("/r/LocalLLaMA/comments/{id}/slug/"),
                "selftext": "",
                "subreddit": "LocalLLaMA",
                "score": 10,
                "num_comments": 2
            }
        })
    }

    #[tokio::test]
    async fn lists_posts_with_top_level_comments() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path("/r/LocalLLaMA/hot"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "Listing",
                "data": {"after": null, "children": [post("a1", "First"), post("b2", "Second")]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        for id in ["a1", "b2"] {
            Mock::given(method("GET"))
                .and(path(format!("/comments/{id}")))
                .and(query_param("depth", "1"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                    {"kind": "Listing", "data": {"after": null, "children": [post(id, "ignored")]}},
                    {"kind": "Listing", "data": {"after": null, "children": [
                        {"kind": "t1", "data": {"body": format!("{id} top comment")}},
                        {"kind": "more", "data": {"id": "zz"}},
                        {"kind": "t1", "data": {"body": format!("{id} second comment")}}
                    ]}}
                ])))
                .mount(&server)
                .await;
        }

        let source = RedditSource::new(settings(&server)).unwrap();
        let mut stream = source.open(&Query::new("r/LocalLLaMA")).await.unwrap();

        let mut posts = Vec::new();
        while let Some(record) = stream.next_record().await.unwrap() {
            match record {
                RawRecord::Post(post) => posts.push(post),
                other => panic!("unexpected record {other:?}"),
            }
        }

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title.as_deref(), Some("First"));
        assert_eq!(
            posts[1].comments,
            vec!["b2 top comment", "b2 second comment"]
        );
    }

    #[tokio::test]
    async fn follows_after_cursor() {
        let server = MockServer::start().await;
        mount_token(&server).await;

        Mock::given(method("GET"))
            .and(path("/r/rust/new"))
            .and(query_param("after", "t3_a1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"after": null, "children": [post("b2", "Second page")]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/rust/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"after": "t3_a1", "children": [post("a1", "First page")]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = settings(&server);
        settings.listing = RedditListing::New;
        settings.load_comments = false;
        let source = RedditSource::new(settings).unwrap();
        let mut stream = source.open(&Query::new("rust")).await.unwrap();

        let mut titles = Vec::new();
        while let Some(RawRecord::Post(post)) = stream.next_record().await.unwrap() {
            titles.push(post.title.unwrap_or_default());
        }
        assert_eq!(titles, vec!["First page", "Second page"]);
    }

    #[tokio::test]
    async fn rejected_credentials_are_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = RedditSource::new(settings(&server)).unwrap();
        let mut stream = source.open(&Query::new("LocalLLaMA")).await.unwrap();
        let err = stream.next_record().await.unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::Auth);
        assert!(!err.retryable);
    }
}
