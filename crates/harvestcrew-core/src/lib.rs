//! HarvestCrew core: rate-limited harvesting from web search, forum and
//! academic sources, record normalization, and a `graph_flow` pipeline that
//! chains role-prompted generation steps over the harvested material.

pub mod config;
pub mod error;
pub mod harvest;
pub mod llm;
pub mod normalize;
pub mod profiles;
pub mod record;
pub mod security;
pub mod sources;
mod tasks;
pub mod telemetry;
mod trace;
mod workflow;

pub use config::{Config, ConfigLoader, LlmProvider};
pub use error::{
    GenerationError, HarvestCrewError, HarvestError, NormalizeError, SourceError, SourceErrorKind,
};
pub use harvest::{
    CapRule, HarvestPolicy, HarvestReport, HarvestStatus, Harvester, InstantPause, Pause,
    QueryOutcome, Termination, TokioPause, per_query_caps,
};
pub use llm::{DynGenerator, GenerationRequest, OfflineGenerator, TextGenerator};
pub use normalize::Normalizer;
pub use profiles::{Profile, RoleSpec, all_profiles, find_profile};
pub use record::{NormalizedRecord, Query, RawRecord, render_records};
pub use security::{SecretValue, require_env, require_env_pair};
pub use sources::{ContentSource, DynSource, RecordStream, SourceKind};
pub use tasks::{HarvestTask, RoleTask};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary};
pub use workflow::{PipelineOutput, PipelineRequest, RoleOutput, run_pipeline};
