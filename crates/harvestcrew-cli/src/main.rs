use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use harvestcrew_core::{
    Config, ConfigLoader, HarvestStatus, LlmProvider, PipelineRequest, Profile, Query,
    SourceKind, TelemetryOptions, Termination, all_profiles, find_profile, init_telemetry,
    render_records, run_pipeline,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};

const SEPARATOR: &str = "######################";

#[derive(Parser, Debug)]
#[command(
    name = "harvestcrew",
    version,
    about = "Harvest web, forum and academic content and turn it into newsletters and reports"
)]
struct Cli {
    /// Configuration file (defaults to $HARVESTCREW_CONFIG, then ./harvestcrew.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest, then run the profile's roles and print the final artifact.
    Run(RunArgs),
    /// Harvest only and print the normalized records.
    Harvest(HarvestArgs),
    /// List the built-in profiles.
    Profiles,
}

#[derive(Args, Debug, Clone)]
struct Selection {
    /// Built-in profile to run.
    #[arg(long, default_value = "forum-newsletter")]
    profile: String,

    /// Query to harvest; repeat to issue several. Defaults to the profile's queries.
    #[arg(long = "query", short = 'q')]
    queries: Vec<String>,

    /// Upper bound on harvested records across all queries.
    #[arg(long)]
    max_results: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    selection: Selection,

    /// Text-generation backend, overriding `[llm] provider`.
    #[arg(long)]
    backend: Option<LlmProvider>,

    /// Model name, overriding `[llm] model`.
    #[arg(long)]
    model: Option<String>,

    /// Optional session ID.
    #[arg(long)]
    session: Option<String>,

    /// Print every role's output, not just the final artifact.
    #[arg(long, default_value_t = false)]
    verbose_roles: bool,

    /// Print a stage-by-stage trace summary after the artifact.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Args, Debug)]
struct HarvestArgs {
    #[command(flatten)]
    selection: Selection,

    /// Harvest from this source instead of the profile's.
    #[arg(long)]
    source: Option<SourceKind>,

    /// Emit the harvest report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.clone()).context("failed to load configuration")?;
    init_telemetry(TelemetryOptions {
        default_level: config.logging.level.clone(),
        ..TelemetryOptions::default()
    })?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(config, args).await?,
            Command::Harvest(args) => harvest_command(config, args).await?,
            Command::Profiles => profiles_command(),
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn build_request(selection: &Selection) -> Result<PipelineRequest> {
    let profile = find_profile(&selection.profile)?;
    let queries = selection.queries.iter().map(|query| Query::new(query.as_str())).collect();
    let mut request = PipelineRequest::for_profile(profile).with_queries(queries);
    if let Some(max_results) = selection.max_results {
        request = request.with_max_results(max_results);
    }
    Ok(request)
}

fn apply_overrides(mut config: Config, args: &RunArgs) -> Config {
    if let Some(backend) = args.backend {
        config.llm.provider = backend;
    }
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    config
}

async fn run_command(config: Config, args: RunArgs) -> Result<()> {
    let mut request = build_request(&args.selection)?;
    if let Some(session) = &args.session {
        request = request.with_session_id(session.clone());
    }
    let config = apply_overrides(config, &args);

    // Resolve every credential before the first network call.
    let harvester = Arc::new(config.build_harvester(request.profile.source)?);
    let generator = config.build_generator()?;

    info!(
        profile = request.profile.name,
        source = %request.profile.source,
        backend = %config.llm.provider,
        model = %config.llm.model,
        "starting pipeline"
    );

    let output = run_pipeline(request, harvester, generator).await?;

    if args.verbose_roles {
        for role in &output.roles {
            println!("## {}\n\n{}\n", role.role, role.text);
        }
    }

    println!("{SEPARATOR}");
    println!("{}", output.artifact);

    if args.trace {
        println!();
        println!("{}", output.trace.summary().render_markdown());
    }
    Ok(())
}

async fn harvest_command(config: Config, args: HarvestArgs) -> Result<()> {
    let request = build_request(&args.selection)?;
    let source = args.source.unwrap_or(request.profile.source);
    let harvester = config.build_harvester(source)?;

    let report = harvester
        .harvest(&request.queries, request.max_results)
        .await?;

    for outcome in &report.queries {
        if let Termination::Abandoned { error } = &outcome.termination {
            warn!(query = %outcome.query, %error, "query abandoned");
        }
    }
    if report.status() == HarvestStatus::Failed {
        warn!("every query was abandoned");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_records(&report.records));
    }
    Ok(())
}

fn describe(profile: &Profile) -> String {
    let roles: Vec<&str> = profile.roles.iter().map(|role| role.name).collect();
    format!(
        "{name}\n  {description}\n  source: {source}, max results: {max}\n  queries: {queries}\n  roles: {roles}",
        name = profile.name,
        description = profile.description,
        source = profile.source,
        max = profile.max_results,
        queries = profile.queries.join(" | "),
        roles = roles.join(" -> "),
    )
}

fn profiles_command() {
    for profile in all_profiles() {
        println!("{}\n", describe(profile));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "harvestcrew",
            "--config",
            "custom.toml",
            "run",
            "--profile",
            "scholar-report",
            "-q",
            "NDN DPDK",
            "-q",
            "NDN forwarding",
            "--max-results",
            "8",
            "--backend",
            "offline",
            "--trace",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.backend, Some(LlmProvider::Offline));
        assert!(args.trace);

        let request = build_request(&args.selection).unwrap();
        assert_eq!(request.profile.name, "scholar-report");
        assert_eq!(request.queries.len(), 2);
        assert_eq!(request.max_results, 8);
    }

    #[test]
    fn defaults_come_from_the_profile() {
        let cli = Cli::try_parse_from(["harvestcrew", "harvest"]).unwrap();
        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest command");
        };
        let request = build_request(&args.selection).unwrap();
        assert_eq!(request.profile.name, "forum-newsletter");
        assert_eq!(request.queries, vec![Query::new("LocalLLaMA")]);
        assert_eq!(request.max_results, 12);
    }

    #[test]
    fn unknown_backend_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["harvestcrew", "run", "--backend", "telegraph"]).is_err());
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let selection = Selection {
            profile: "podcast".into(),
            queries: vec![],
            max_results: None,
        };
        assert!(build_request(&selection).is_err());
    }

    #[test]
    fn backend_override_replaces_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\nprovider = \"ollama\"\nmodel = \"mistral\"").unwrap();
        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();

        let cli = Cli::try_parse_from([
            "harvestcrew",
            "run",
            "--backend",
            "offline",
            "--model",
            "qwen2.5:7b",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let config = apply_overrides(config, &args);
        assert_eq!(config.llm.provider, LlmProvider::Offline);
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.build_generator().unwrap().name(), "offline");
    }

    #[test]
    fn profile_listing_names_roles() {
        let text = describe(find_profile("scholar-report").unwrap());
        assert!(text.contains("NDN Research Specialist -> Technical Analyst -> Technical Report Writer"));
    }
}
