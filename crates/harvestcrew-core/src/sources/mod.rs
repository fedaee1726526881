//! Content sources the harvester pulls raw records from.
//!
//! A source turns a [`Query`] into a [`RecordStream`]; streams fetch pages
//! lazily and report exhaustion with `Ok(None)`.

mod http;
mod reddit;
mod scholar;
mod serper;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::record::{Query, RawRecord};

pub use reddit::{RedditListing, RedditSettings, RedditSource};
pub use scholar::{ScholarSettings, ScholarSource};
pub use serper::{SerperSettings, SerperSource};

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn open(&self, query: &Query) -> Result<Box<dyn RecordStream>, SourceError>;
}

#[async_trait]
pub trait RecordStream: Send {
    /// Next record in the source's native order, `Ok(None)` once exhausted.
    async fn next_record(&mut self) -> Result<Option<RawRecord>, SourceError>;
}

pub type DynSource = Arc<dyn ContentSource>;

/// Which concrete source a pipeline harvests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Serper,
    Reddit,
    Scholar,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serper => "serper",
            Self::Reddit => "reddit",
            Self::Scholar => "scholar",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serper" | "web" => Ok(Self::Serper),
            "reddit" | "forum" => Ok(Self::Reddit),
            "scholar" | "academic" => Ok(Self::Scholar),
            other => Err(format!("unknown source `{other}`")),
        }
    }
}
