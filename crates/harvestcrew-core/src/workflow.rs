use std::sync::Arc;

use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::harvest::Harvester;
use crate::llm::DynGenerator;
use crate::profiles::Profile;
use crate::record::Query;
use crate::tasks::{
    HarvestTask, KEY_ARTIFACT, KEY_FAILURE, KEY_HARVEST_STATUS, KEY_MAX_RESULTS, KEY_QUERIES,
    KEY_RECORD_COUNT, KEY_TRACE, RoleTask, StageFailure, role_output_key,
};
use crate::trace::{TraceCollector, TraceEvent};
use crate::HarvestCrewError;

/// What to run: a profile, optionally with its queries or cap overridden.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub profile: &'static Profile,
    pub queries: Vec<Query>,
    pub max_results: usize,
    pub session_id: Option<String>,
}

impl PipelineRequest {
    pub fn for_profile(profile: &'static Profile) -> Self {
        Self {
            profile,
            queries: profile.default_queries(),
            max_results: profile.max_results,
            session_id: None,
        }
    }

    /// Replace the profile's default queries; an empty list keeps the defaults.
    pub fn with_queries(mut self, queries: Vec<Query>) -> Self {
        if !queries.is_empty() {
            self.queries = queries;
        }
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RoleOutput {
    pub role: &'static str,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub session_id: String,
    /// Output of the last role.
    pub artifact: String,
    pub roles: Vec<RoleOutput>,
    pub records: usize,
    pub harvest_status: String,
    pub trace: TraceCollector,
}

fn build_graph(profile: &Profile, harvester: Arc<Harvester>, generator: DynGenerator) -> Arc<Graph> {
    let harvest = Arc::new(HarvestTask::new(harvester));
    let last = profile.roles.len() - 1;
    let roles: Vec<Arc<RoleTask>> = profile
        .roles
        .iter()
        .enumerate()
        .map(|(index, role)| {
            Arc::new(RoleTask::new(index, *role, generator.clone(), index == last))
        })
        .collect();

    let mut builder =
        GraphBuilder::new(&format!("{}_workflow", profile.name)).add_task(harvest.clone());
    for role in &roles {
        builder = builder.add_task(role.clone());
    }

    let mut previous = harvest.id().to_string();
    for role in &roles {
        builder = builder.add_edge(previous.as_str(), role.id());
        previous = role.id().to_string();
    }

    Arc::new(builder.set_start_task(harvest.id()).build())
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

fn pipeline_error(action: &str, err: impl std::fmt::Display) -> HarvestCrewError {
    HarvestCrewError::Pipeline(format!("{action}: {err}"))
}

/// Harvest with `harvester`, then run the profile's roles in order through
/// `generator`, each one reading the previous one's output.
#[instrument(
    name = "pipeline",
    skip(request, harvester, generator),
    fields(profile = request.profile.name, backend = %generator.name())
)]
pub async fn run_pipeline(
    request: PipelineRequest,
    harvester: Arc<Harvester>,
    generator: DynGenerator,
) -> Result<PipelineOutput, HarvestCrewError> {
    let profile = request.profile;
    let graph = build_graph(profile, harvester, generator);

    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());

    let session_id = request.session_id.clone().unwrap_or_else(new_session_id);
    let session = Session::new_from_task(session_id.clone(), HarvestTask::ID);

    let queries: Vec<String> = request
        .queries
        .iter()
        .map(|query| query.as_str().to_string())
        .collect();
    session.context.set(KEY_QUERIES, &queries).await;
    session.context.set(KEY_MAX_RESULTS, request.max_results).await;

    storage
        .save(session)
        .await
        .map_err(|err| pipeline_error("failed to persist session", err))?;

    info!(%session_id, queries = queries.len(), max_results = request.max_results, "pipeline started");

    loop {
        let result = runner
            .run(&session_id)
            .await
            .map_err(|err| pipeline_error("graph execution failure", err))?;

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::WaitingForInput => continue,
            ExecutionStatus::Error(message) => return Err(HarvestCrewError::Pipeline(message)),
        }
    }

    let session = storage
        .get(&session_id)
        .await
        .map_err(|err| pipeline_error("failed to reload session", err))?
        .ok_or_else(|| HarvestCrewError::Pipeline("session missing after execution".into()))?;
    let context = &session.context;

    if let Some(failure) = context.get::<StageFailure>(KEY_FAILURE).await {
        return Err(failure.into());
    }

    let artifact: String = context
        .get(KEY_ARTIFACT)
        .await
        .ok_or_else(|| HarvestCrewError::Pipeline("no artifact recorded".into()))?;

    let mut roles = Vec::with_capacity(profile.roles.len());
    for (index, role) in profile.roles.iter().enumerate() {
        let text: String = context.get(&role_output_key(index)).await.unwrap_or_default();
        roles.push(RoleOutput {
            role: role.name,
            text,
        });
    }

    let events: Vec<TraceEvent> = context.get(KEY_TRACE).await.unwrap_or_default();
    let records: usize = context.get(KEY_RECORD_COUNT).await.unwrap_or_default();
    let harvest_status: String = context.get(KEY_HARVEST_STATUS).await.unwrap_or_default();

    info!(%session_id, records, artifact_chars = artifact.len(), "pipeline finished");

    Ok(PipelineOutput {
        session_id,
        artifact,
        roles,
        records,
        harvest_status,
        trace: TraceCollector::from_events(events),
    })
}
