use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for HarvestCrew.
#[derive(Debug, Error)]
pub enum HarvestCrewError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarvestCrewError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Malformed arguments handed to the harvester. Source-side failures never
/// surface through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarvestError {
    #[error("invalid harvest input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{source_kind} record has no title")]
    MissingTitle { source_kind: &'static str },
}

/// Failure reported by a text-generation backend.
#[derive(Debug, Clone, Error)]
#[error("{backend} generation failed: {reason}")]
pub struct GenerationError {
    pub backend: String,
    pub reason: String,
}

impl GenerationError {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    RateLimited,
    HttpStatus(u16),
    Transport,
    Timeout,
    Blocked,
    Auth,
    Decode,
}

/// Error raised by a content source while serving a query.
#[derive(Debug, Clone)]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub reason: String,
    pub retryable: bool,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            reason: reason.into(),
            retryable,
        }
    }

    pub fn transient(kind: SourceErrorKind, reason: impl Into<String>) -> Self {
        Self::new(kind, reason, true)
    }

    pub fn terminal(kind: SourceErrorKind, reason: impl Into<String>) -> Self {
        Self::new(kind, reason, false)
    }

    /// Classify an HTTP status: 429 and 5xx are worth waiting out, the rest are not.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            429 => Self::transient(SourceErrorKind::RateLimited, reason),
            401 | 403 => Self::terminal(SourceErrorKind::Auth, reason),
            500..=599 => Self::transient(SourceErrorKind::HttpStatus(status), reason),
            _ => Self::terminal(SourceErrorKind::HttpStatus(status), reason),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transient(SourceErrorKind::Timeout, err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::terminal(SourceErrorKind::Decode, err.to_string());
        }
        Self::transient(SourceErrorKind::Transport, err.to_string())
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.retryable {
            "transient"
        } else {
            "terminal"
        };
        write!(f, "{retry} source failure ({:?}): {}", self.kind, self.reason)
    }
}

impl std::error::Error for SourceError {}
