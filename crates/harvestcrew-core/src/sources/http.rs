use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::{SourceError, SourceErrorKind};

/// User-Agent sent by sources that do not configure their own.
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("harvestcrew/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|err| {
            SourceError::terminal(
                SourceErrorKind::Transport,
                format!("failed to build HTTP client: {err}"),
            )
        })
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, SourceError> {
    let response = request.send().await.map_err(SourceError::from_reqwest)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(SourceError::from_status(
            status.as_u16(),
            format!("{status}: {snippet}"),
        ));
    }
    Ok(response)
}

pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SourceError> {
    let response = send(request).await?;
    let bytes = response.bytes().await.map_err(SourceError::from_reqwest)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        SourceError::terminal(SourceErrorKind::Decode, format!("unexpected payload: {err}"))
    })
}

pub(crate) async fn send_text(request: RequestBuilder) -> Result<String, SourceError> {
    send(request)
        .await?
        .text()
        .await
        .map_err(SourceError::from_reqwest)
}
