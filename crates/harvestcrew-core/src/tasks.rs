use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{GenerationError, HarvestError};
use crate::harvest::{HarvestStatus, Harvester};
use crate::llm::{DynGenerator, GenerationRequest};
use crate::profiles::RoleSpec;
use crate::record::{Query, render_records};
use crate::trace::TraceEvent;
use crate::HarvestCrewError;

pub(crate) const KEY_QUERIES: &str = "harvest.queries";
pub(crate) const KEY_MAX_RESULTS: &str = "harvest.max_results";
pub(crate) const KEY_RECORD_COUNT: &str = "harvest.records";
pub(crate) const KEY_HARVEST_STATUS: &str = "harvest.status";
pub(crate) const KEY_HANDOFF: &str = "pipeline.handoff";
pub(crate) const KEY_FAILURE: &str = "pipeline.failure";
pub(crate) const KEY_ARTIFACT: &str = "final.artifact";
pub(crate) const KEY_TRACE: &str = "trace.events";

pub(crate) fn role_output_key(index: usize) -> String {
    format!("role.{index}.output")
}

/// Why a stage stopped the pipeline. Kept in the session context so the
/// driver can turn it back into a typed error once the graph has ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StageFailure {
    InvalidHarvest { reason: String },
    EmptyHarvest { status: String },
    Generation {
        role: String,
        backend: String,
        reason: String,
    },
}

impl From<StageFailure> for HarvestCrewError {
    fn from(failure: StageFailure) -> Self {
        match failure {
            StageFailure::InvalidHarvest { reason } => {
                HarvestCrewError::Harvest(HarvestError::InvalidInput(reason))
            }
            StageFailure::EmptyHarvest { status } => HarvestCrewError::Pipeline(format!(
                "harvest produced no records ({status}); nothing to write about"
            )),
            StageFailure::Generation {
                backend, reason, ..
            } => HarvestCrewError::Generation(GenerationError::new(backend, reason)),
        }
    }
}

async fn append_trace(context: &Context, stage: &str, message: String) {
    let mut events: Vec<TraceEvent> = context.get(KEY_TRACE).await.unwrap_or_default();
    events.push(TraceEvent::new(stage, message));
    context.set(KEY_TRACE, &events).await;
}

async fn fail(context: &Context, failure: StageFailure) -> graph_flow::Result<TaskResult> {
    let summary = HarvestCrewError::from(failure.clone()).to_string();
    context.set(KEY_FAILURE, &failure).await;
    Ok(TaskResult::new(Some(summary), NextAction::End))
}

/// Runs the harvester and hands the rendered records to the first role.
pub struct HarvestTask {
    harvester: Arc<Harvester>,
}

impl HarvestTask {
    pub const ID: &'static str = "harvest";

    pub fn new(harvester: Arc<Harvester>) -> Self {
        Self { harvester }
    }
}

#[async_trait]
impl Task for HarvestTask {
    fn id(&self) -> &str {
        Self::ID
    }

    #[instrument(name = "task.harvest", skip(self, context), fields(source = %self.harvester.source_name()))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let queries: Vec<Query> = context
            .get::<Vec<String>>(KEY_QUERIES)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(Query::from)
            .collect();
        let max_results: usize = context.get(KEY_MAX_RESULTS).await.unwrap_or_default();

        let report = match self.harvester.harvest(&queries, max_results).await {
            Ok(report) => report,
            Err(HarvestError::InvalidInput(reason)) => {
                return fail(&context, StageFailure::InvalidHarvest { reason }).await;
            }
        };

        let status = report.status();
        let status_label = match &status {
            HarvestStatus::Complete => "complete".to_string(),
            HarvestStatus::Partial { failed_queries } => {
                format!("partial, {failed_queries} queries abandoned")
            }
            HarvestStatus::Failed => "failed, every query abandoned".to_string(),
        };
        context.set(KEY_RECORD_COUNT, report.len()).await;
        context.set(KEY_HARVEST_STATUS, &status_label).await;
        append_trace(
            &context,
            Self::ID,
            format!(
                "{} records from {} ({status_label})",
                report.len(),
                self.harvester.source_name()
            ),
        )
        .await;

        if report.is_empty() {
            warn!(status = %status_label, "harvest produced no records");
            return fail(
                &context,
                StageFailure::EmptyHarvest {
                    status: status_label,
                },
            )
            .await;
        }

        let material = render_records(&report.into_records());
        debug!(material_chars = material.len(), "harvest material rendered");
        context.set(KEY_HANDOFF, &material).await;

        Ok(TaskResult::new(
            Some(format!("Harvest finished: {status_label}")),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// One role-prompted generation step. Reads the previous step's hand-off
/// and replaces it with its own output.
pub struct RoleTask {
    id: String,
    index: usize,
    role: RoleSpec,
    generator: DynGenerator,
    is_final: bool,
}

impl RoleTask {
    pub fn new(index: usize, role: RoleSpec, generator: DynGenerator, is_final: bool) -> Self {
        Self {
            id: format!("role-{}", index + 1),
            index,
            role,
            generator,
            is_final,
        }
    }
}

#[async_trait]
impl Task for RoleTask {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(name = "task.role", skip(self, context), fields(role = %self.role.name))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let handoff: String = context.get(KEY_HANDOFF).await.unwrap_or_default();
        let request = GenerationRequest {
            system: self.role.system_prompt(),
            prompt: self.role.task_prompt(&handoff),
        };

        info!(backend = %self.generator.name(), context_chars = handoff.len(), "role generating");
        let output = match self.generator.generate(&request).await {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "generation failed");
                return fail(
                    &context,
                    StageFailure::Generation {
                        role: self.role.name.to_string(),
                        backend: err.backend,
                        reason: err.reason,
                    },
                )
                .await;
            }
        };

        context.set(role_output_key(self.index), &output).await;
        context.set(KEY_HANDOFF, &output).await;
        append_trace(
            &context,
            &self.id,
            format!("{} produced {} chars", self.role.name, output.len()),
        )
        .await;

        if self.is_final {
            context.set(KEY_ARTIFACT, &output).await;
            return Ok(TaskResult::new(
                Some(format!("{} delivered the final artifact", self.role.name)),
                NextAction::End,
            ));
        }

        Ok(TaskResult::new(
            Some(format!("{} finished", self.role.name)),
            NextAction::ContinueAndExecute,
        ))
    }
}
