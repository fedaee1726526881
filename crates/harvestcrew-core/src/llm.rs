//! Text-generation backends used by the role pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::GenerationError;
use crate::security::SecretValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Role framing: who the model is and what it is trying to achieve.
    pub system: String,
    /// Task instructions plus the context handed over by the previous step.
    pub prompt: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

pub type DynGenerator = Arc<dyn TextGenerator>;

fn http_client(timeout: Duration, backend: &str) -> Result<Client, GenerationError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| GenerationError::new(backend, format!("failed to build HTTP client: {err}")))
}

async fn post_json<T: for<'de> Deserialize<'de>>(
    backend: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, GenerationError> {
    let response = request
        .send()
        .await
        .map_err(|err| GenerationError::new(backend, err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::new(
            backend,
            format!("{status}: {}", body.chars().take(300).collect::<String>()),
        ));
    }
    response
        .json()
        .await
        .map_err(|err| GenerationError::new(backend, format!("unexpected response: {err}")))
}

/// Local models served by Ollama's chat endpoint.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client(timeout, "ollama")?,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<ChatMessage>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        debug!(model = %self.model, prompt_chars = request.prompt.len(), "ollama request");
        let response: OllamaChatResponse = post_json(
            "ollama",
            self.client.post(url).json(&json!({
                "model": self.model,
                "stream": false,
                "messages": [
                    {"role": "system", "content": request.system},
                    {"role": "user", "content": request.prompt},
                ],
            })),
        )
        .await?;

        if let Some(error) = response.error {
            return Err(GenerationError::new("ollama", error));
        }
        response
            .message
            .map(|message| message.content)
            .ok_or_else(|| GenerationError::new("ollama", "response carried no message"))
    }
}

/// Any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client(timeout, "openai")?,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(model = %self.model, prompt_chars = request.prompt.len(), "chat completion request");
        let response: CompletionResponse = post_json(
            "openai",
            self.client
                .post(url)
                .bearer_auth(self.api_key.expose())
                .json(&json!({
                    "model": self.model,
                    "messages": [
                        {"role": "system", "content": request.system},
                        {"role": "user", "content": request.prompt},
                    ],
                })),
        )
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| GenerationError::new("openai", "response carried no choices"))
    }
}

/// Deterministic stand-in for dry runs; never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGenerator;

#[async_trait]
impl TextGenerator for OfflineGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let role = request.system.lines().next().unwrap_or_default();
        let context_lines = request.prompt.lines().count();
        let preview: String = request
            .prompt
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .chars()
            .take(120)
            .collect();
        Ok(format!(
            "[offline draft] {role}\nContext lines: {context_lines}\nLast context line: {preview}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "You are the Senior Researcher.".into(),
            prompt: "Summarize:\n[1] Title: Something".into(),
        }
    }

    #[tokio::test]
    async fn ollama_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "mistral",
                "message": {"role": "assistant", "content": "report body"},
                "done": true
            })))
            .mount(&server)
            .await;

        let generator =
            OllamaGenerator::new(server.uri(), "mistral", Duration::from_secs(5)).unwrap();
        let text = generator.generate(&request()).await.unwrap();
        assert_eq!(text, "report body");
    }

    #[tokio::test]
    async fn openai_sends_bearer_and_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "draft"}}]
            })))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(
            server.uri(),
            "gpt-4",
            SecretValue::new("sk-test"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(generator.generate(&request()).await.unwrap(), "draft");
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let generator =
            OllamaGenerator::new(server.uri(), "mistral", Duration::from_secs(5)).unwrap();
        let err = generator.generate(&request()).await.unwrap_err();
        assert_eq!(err.backend, "ollama");
        assert!(err.reason.contains("model not loaded"));
    }

    #[tokio::test]
    async fn offline_generator_is_deterministic() {
        let first = OfflineGenerator.generate(&request()).await.unwrap();
        let second = OfflineGenerator.generate(&request()).await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("Senior Researcher"));
        assert!(first.contains("Title: Something"));
    }
}
