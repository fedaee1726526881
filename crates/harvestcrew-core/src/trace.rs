use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One pipeline stage boundary as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn record(&mut self, stage: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(stage, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub stage: String,
    pub message: String,
    /// Time since the previous step, 0 for the first one.
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                stage: event.stage.clone(),
                message: event.message.clone(),
                elapsed_ms: idx
                    .checked_sub(1)
                    .map(|prev| (event.at - events[prev].at).num_milliseconds().max(0) as u64)
                    .unwrap_or(0),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. {} -> {} (+{} ms)",
                step.index, step.stage, step.message, step.elapsed_ms
            );
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn markdown_renders_steps_in_order() {
        let mut collector = TraceCollector::new();
        collector.record("harvest", "12 records from reddit");
        collector.record("role-1", "Senior Researcher produced 840 chars");

        let markdown = collector.summary().render_markdown();
        let harvest = markdown.find("1. harvest").unwrap();
        let role = markdown.find("2. role-1").unwrap();
        assert!(harvest < role);
    }

    #[test]
    fn elapsed_is_measured_between_steps() {
        let events = vec![
            TraceEvent {
                stage: "harvest".into(),
                message: "done".into(),
                at: Utc.timestamp_millis_opt(1_000).unwrap(),
            },
            TraceEvent {
                stage: "role-1".into(),
                message: "done".into(),
                at: Utc.timestamp_millis_opt(1_250).unwrap(),
            },
        ];
        let summary = TraceSummary::from_events(&events);
        assert_eq!(summary.steps[0].elapsed_ms, 0);
        assert_eq!(summary.steps[1].elapsed_ms, 250);
    }

    #[test]
    fn empty_trace_has_placeholder() {
        assert_eq!(
            TraceCollector::new().summary().render_markdown(),
            "No trace events recorded."
        );
    }
}
