#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harvestcrew_core::record::SearchHit;
use harvestcrew_core::{
    ContentSource, Query, RawRecord, RecordStream, SourceError, SourceErrorKind,
};

/// One scripted response of a fake stream.
#[derive(Debug, Clone)]
pub enum Step {
    Hit(String),
    Untitled,
    Fail(SourceError),
}

pub fn hit(title: &str) -> Step {
    Step::Hit(title.to_string())
}

pub fn transient() -> Step {
    Step::Fail(SourceError::transient(
        SourceErrorKind::RateLimited,
        "429 Too Many Requests",
    ))
}

pub fn terminal() -> Step {
    Step::Fail(SourceError::terminal(SourceErrorKind::Auth, "401 Unauthorized"))
}

/// `count` hits titled `{prefix}-1`, `{prefix}-2`, ...
pub fn hits(prefix: &str, count: usize) -> Vec<Step> {
    (1..=count).map(|n| hit(&format!("{prefix}-{n}"))).collect()
}

type Script = Arc<Mutex<VecDeque<Step>>>;

/// Source replaying a fixed script per query; an unscripted or drained
/// query is exhausted.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Script>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, query: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), Arc::new(Mutex::new(steps.into())));
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, query: &Query) -> Result<Box<dyn RecordStream>, SourceError> {
        self.opened.lock().unwrap().push(query.as_str().to_string());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .entry(query.as_str().to_string())
            .or_default()
            .clone();
        Ok(Box::new(ScriptedStream { script }))
    }
}

struct ScriptedStream {
    script: Script,
}

#[async_trait]
impl RecordStream for ScriptedStream {
    async fn next_record(&mut self) -> Result<Option<RawRecord>, SourceError> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(None),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Untitled) => Ok(Some(RawRecord::Hit(SearchHit {
                link: Some("https://example.com/untitled".into()),
                ..SearchHit::default()
            }))),
            Some(Step::Hit(title)) => Ok(Some(RawRecord::Hit(SearchHit {
                link: Some(format!("https://example.com/{title}")),
                snippet: Some(format!("about {title}")),
                title: Some(title),
                ..SearchHit::default()
            }))),
        }
    }
}

/// Source whose every request fails with a transient error.
#[derive(Default)]
pub struct FailingSource {
    attempts: Mutex<usize>,
}

impl FailingSource {
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl ContentSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn open(&self, _query: &Query) -> Result<Box<dyn RecordStream>, SourceError> {
        *self.attempts.lock().unwrap() += 1;
        Err(SourceError::transient(
            SourceErrorKind::HttpStatus(503),
            "503 Service Unavailable",
        ))
    }
}
