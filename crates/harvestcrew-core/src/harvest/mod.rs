//! Bounded, rate-limited harvesting of records from a single content source.
//!
//! Queries run strictly one after another in the order the caller supplied.
//! Transient source failures cost one fixed backoff pause each and never reach
//! the caller; whatever was collected before a failure is kept.

mod pause;

pub use pause::{InstantPause, Pause, TokioPause};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{HarvestError, SourceError};
use crate::normalize::Normalizer;
use crate::record::{NormalizedRecord, Query, RawRecord};
use crate::sources::{DynSource, RecordStream};

/// How `max_results` is split across queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapRule {
    /// `max_results / queries` for every query; the remainder is dropped.
    #[default]
    Truncate,
    /// Remainder handed out one unit at a time to the earliest queries.
    Spread,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestPolicy {
    pub backoff: Duration,
    pub request_interval: Duration,
    pub max_consecutive_failures: usize,
    pub cap_rule: CapRule,
}

impl Default for HarvestPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            request_interval: Duration::ZERO,
            max_consecutive_failures: 2,
            cap_rule: CapRule::Truncate,
        }
    }
}

impl HarvestPolicy {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_failures = failures.max(1);
        self
    }

    pub fn with_cap_rule(mut self, rule: CapRule) -> Self {
        self.cap_rule = rule;
        self
    }
}

/// Per-query caps for `queries` queries sharing `max_results`.
pub fn per_query_caps(
    max_results: usize,
    queries: usize,
    rule: CapRule,
) -> Result<Vec<usize>, HarvestError> {
    if queries == 0 {
        return Err(HarvestError::InvalidInput(
            "at least one query is required".into(),
        ));
    }
    if max_results == 0 {
        return Err(HarvestError::InvalidInput(
            "max_results must be at least 1".into(),
        ));
    }

    let base = max_results / queries;
    match rule {
        CapRule::Truncate => {
            if base == 0 {
                return Err(HarvestError::InvalidInput(format!(
                    "max_results ({max_results}) is smaller than the number of queries ({queries})"
                )));
            }
            Ok(vec![base; queries])
        }
        CapRule::Spread => {
            let remainder = max_results % queries;
            Ok((0..queries)
                .map(|idx| base + usize::from(idx < remainder))
                .collect())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    CapReached,
    Exhausted,
    Abandoned { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryOutcome {
    pub query: Query,
    pub cap: usize,
    pub collected: usize,
    pub rejected: usize,
    pub transient_failures: usize,
    pub termination: Termination,
}

impl QueryOutcome {
    fn new(query: Query, cap: usize) -> Self {
        Self {
            query,
            cap,
            collected: 0,
            rejected: 0,
            transient_failures: 0,
            termination: Termination::Exhausted,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.termination, Termination::Abandoned { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarvestStatus {
    Complete,
    Partial { failed_queries: usize },
    /// Every query was abandoned before yielding a record.
    Failed,
}

/// Records in discovery order plus what happened to every query.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub records: Vec<NormalizedRecord>,
    pub queries: Vec<QueryOutcome>,
}

impl HarvestReport {
    pub fn status(&self) -> HarvestStatus {
        let failed = self.queries.iter().filter(|q| q.is_abandoned()).count();
        if failed == 0 {
            HarvestStatus::Complete
        } else if failed == self.queries.len() && self.records.is_empty() {
            HarvestStatus::Failed
        } else {
            HarvestStatus::Partial {
                failed_queries: failed,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

pub struct Harvester {
    source: DynSource,
    normalizer: Normalizer,
    policy: HarvestPolicy,
    pause: Arc<dyn Pause>,
}

impl Harvester {
    pub fn new(source: DynSource, policy: HarvestPolicy) -> Self {
        Self {
            source,
            normalizer: Normalizer::default(),
            policy,
            pause: Arc::new(TokioPause),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn policy(&self) -> &HarvestPolicy {
        &self.policy
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Collect up to `max_results` normalized records across `queries`.
    ///
    /// Only malformed arguments produce an error.
    #[instrument(
        name = "harvest",
        skip(self, queries),
        fields(source = %self.source.name(), queries = queries.len())
    )]
    pub async fn harvest(
        &self,
        queries: &[Query],
        max_results: usize,
    ) -> Result<HarvestReport, HarvestError> {
        if let Some(blank) = queries.iter().position(Query::is_blank) {
            return Err(HarvestError::InvalidInput(format!(
                "query #{} is empty",
                blank + 1
            )));
        }
        let caps = per_query_caps(max_results, queries.len(), self.policy.cap_rule)?;

        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(queries.len());

        for (query, cap) in queries.iter().zip(caps) {
            let outcome = self.harvest_query(query, cap, &mut records).await;
            info!(
                query = %outcome.query,
                collected = outcome.collected,
                cap = outcome.cap,
                termination = ?outcome.termination,
                "query finished"
            );
            outcomes.push(outcome);
        }

        let report = HarvestReport {
            records,
            queries: outcomes,
        };
        info!(records = report.len(), status = ?report.status(), "harvest finished");
        Ok(report)
    }

    async fn harvest_query(
        &self,
        query: &Query,
        cap: usize,
        records: &mut Vec<NormalizedRecord>,
    ) -> QueryOutcome {
        let mut outcome = QueryOutcome::new(query.clone(), cap);
        let mut stream: Option<Box<dyn RecordStream>> = None;
        let mut consecutive_failures = 0;

        loop {
            if outcome.collected >= cap {
                outcome.termination = Termination::CapReached;
                break;
            }

            match self.pull(query, &mut stream).await {
                Ok(Some(raw)) => {
                    consecutive_failures = 0;
                    self.accept(raw, &mut outcome, records);
                    if outcome.collected < cap && !self.policy.request_interval.is_zero() {
                        self.pause.wait(self.policy.request_interval).await;
                    }
                }
                Ok(None) => {
                    debug!(%query, "source exhausted");
                    outcome.termination = Termination::Exhausted;
                    break;
                }
                Err(err) if err.retryable => {
                    consecutive_failures += 1;
                    outcome.transient_failures += 1;
                    warn!(
                        %query,
                        error = %err,
                        backoff_ms = self.policy.backoff.as_millis() as u64,
                        consecutive_failures,
                        "source request failed, backing off"
                    );
                    self.pause.wait(self.policy.backoff).await;
                    if consecutive_failures >= self.policy.max_consecutive_failures {
                        outcome.termination = Termination::Abandoned {
                            error: err.to_string(),
                        };
                        break;
                    }
                }
                Err(err) => {
                    warn!(%query, error = %err, "source request failed, abandoning query");
                    outcome.termination = Termination::Abandoned {
                        error: err.to_string(),
                    };
                    break;
                }
            }
        }

        outcome
    }

    async fn pull(
        &self,
        query: &Query,
        stream: &mut Option<Box<dyn RecordStream>>,
    ) -> Result<Option<RawRecord>, SourceError> {
        if stream.is_none() {
            *stream = Some(self.source.open(query).await?);
        }
        match stream.as_mut() {
            Some(stream) => stream.next_record().await,
            None => Ok(None),
        }
    }

    fn accept(
        &self,
        raw: RawRecord,
        outcome: &mut QueryOutcome,
        records: &mut Vec<NormalizedRecord>,
    ) {
        match self.normalizer.normalize(&raw) {
            Ok(record) => {
                outcome.collected += 1;
                records.push(record);
            }
            Err(err) => {
                outcome.rejected += 1;
                warn!(query = %outcome.query, error = %err, "skipping record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncating_caps() {
        assert_eq!(
            per_query_caps(20, 3, CapRule::Truncate).unwrap(),
            vec![6, 6, 6]
        );
        assert_eq!(per_query_caps(12, 1, CapRule::Truncate).unwrap(), vec![12]);
        assert!(per_query_caps(2, 3, CapRule::Truncate).is_err());
    }

    #[test]
    fn spreading_caps() {
        assert_eq!(
            per_query_caps(20, 3, CapRule::Spread).unwrap(),
            vec![7, 7, 6]
        );
        assert_eq!(
            per_query_caps(2, 3, CapRule::Spread).unwrap(),
            vec![1, 1, 0]
        );
        let caps = per_query_caps(101, 7, CapRule::Spread).unwrap();
        assert_eq!(caps.iter().sum::<usize>(), 101);
    }

    #[test]
    fn malformed_inputs() {
        assert!(matches!(
            per_query_caps(5, 0, CapRule::Truncate),
            Err(HarvestError::InvalidInput(_))
        ));
        assert!(matches!(
            per_query_caps(0, 2, CapRule::Spread),
            Err(HarvestError::InvalidInput(_))
        ));
    }

    #[test]
    fn failure_threshold_is_at_least_one() {
        let policy = HarvestPolicy::default().with_max_consecutive_failures(0);
        assert_eq!(policy.max_consecutive_failures, 1);
    }

    #[test]
    fn status_reflects_abandoned_queries() {
        let mut ok = QueryOutcome::new(Query::new("a"), 3);
        ok.termination = Termination::CapReached;
        let mut failed = QueryOutcome::new(Query::new("b"), 3);
        failed.termination = Termination::Abandoned {
            error: "boom".into(),
        };

        let report = HarvestReport {
            records: vec![],
            queries: vec![ok.clone(), failed.clone()],
        };
        assert_eq!(
            report.status(),
            HarvestStatus::Partial { failed_queries: 1 }
        );

        let report = HarvestReport {
            records: vec![],
            queries: vec![failed],
        };
        assert_eq!(report.status(), HarvestStatus::Failed);

        let report = HarvestReport {
            records: vec![],
            queries: vec![ok],
        };
        assert_eq!(report.status(), HarvestStatus::Complete);
    }

    #[test]
    fn abandoned_queries_with_records_are_partial() {
        let mut failed = QueryOutcome::new(Query::new("b"), 3);
        failed.collected = 1;
        failed.termination = Termination::Abandoned {
            error: "429 Too Many Requests".into(),
        };
        let record = NormalizedRecord::new(
            "kept".into(),
            String::new(),
            None,
            None,
            Default::default(),
            Vec::new(),
        );

        let report = HarvestReport {
            records: vec![record],
            queries: vec![failed],
        };
        assert_eq!(
            report.status(),
            HarvestStatus::Partial { failed_queries: 1 }
        );
    }
}
