use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::harvest::{CapRule, HarvestPolicy, Harvester};
use crate::llm::{DynGenerator, OfflineGenerator, OllamaGenerator, OpenAiGenerator};
use crate::normalize::Normalizer;
use crate::sources::{
    DynSource, RedditListing, RedditSettings, RedditSource, ScholarSettings, ScholarSource,
    SerperSettings, SerperSource, SourceKind,
};
use crate::{HarvestCrewError, require_env, require_env_pair};

const DEFAULT_CONFIG_PATH: &str = "harvestcrew.toml";
const CONFIG_PATH_ENV: &str = "HARVESTCREW_CONFIG";

/// Top-level configuration. Every section is optional; omitted keys fall back
/// to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub harvest: HarvestConfig,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

/// Helper to load configuration from disk.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `HARVESTCREW_CONFIG` environment variable.
    /// 3. `harvestcrew.toml` in the current working directory.
    ///
    /// Only the last one may be absent, in which case defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Config, HarvestCrewError> {
        let (candidate, explicit) = resolve_path(path);
        Self::load_from(&candidate, explicit)
    }

    fn load_from(candidate: &Path, explicit: bool) -> Result<Config, HarvestCrewError> {
        if !explicit && !candidate.exists() {
            debug!(path = %candidate.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let raw = fs::read_to_string(candidate)
            .map_err(|err| HarvestCrewError::config_io(candidate.to_path_buf(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, HarvestCrewError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| HarvestCrewError::InvalidConfiguration(err.to_string()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), HarvestCrewError> {
        if config.llm.model.trim().is_empty() && config.llm.provider != LlmProvider::Offline {
            return Err(HarvestCrewError::InvalidConfiguration(
                "llm.model must name a model".into(),
            ));
        }
        if config.llm.provider == LlmProvider::OpenAi && config.llm.api_key_env.trim().is_empty()
        {
            return Err(HarvestCrewError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.harvest.max_consecutive_failures == 0 {
            return Err(HarvestCrewError::InvalidConfiguration(
                "harvest.max_consecutive_failures must be at least 1".into(),
            ));
        }
        if config.sources.serper.results_per_page == 0 || config.sources.reddit.page_size == 0 {
            return Err(HarvestCrewError::InvalidConfiguration(
                "source page sizes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

impl Config {
    /// Harvest policy for `kind`: the source's pacing plus the shared failure rules.
    pub fn harvest_policy(&self, kind: SourceKind) -> HarvestPolicy {
        let pacing = self.sources.pacing(kind);
        HarvestPolicy::default()
            .with_backoff(Duration::from_secs(pacing.backoff_secs))
            .with_request_interval(Duration::from_millis(pacing.request_interval_ms))
            .with_max_consecutive_failures(self.harvest.max_consecutive_failures)
            .with_cap_rule(self.harvest.cap_rule)
    }

    /// Build the configured source, resolving its credentials from the environment.
    pub fn build_source(&self, kind: SourceKind) -> Result<DynSource, HarvestCrewError> {
        let source: DynSource = match kind {
            SourceKind::Serper => {
                let cfg = &self.sources.serper;
                let mut settings = SerperSettings::new(require_env(&cfg.api_key_env)?);
                settings.base_url = cfg.base_url.clone();
                settings.results_per_page = cfg.results_per_page;
                settings.max_pages = cfg.max_pages;
                settings.timeout = Duration::from_secs(cfg.timeout_secs);
                Arc::new(SerperSource::new(settings).map_err(source_setup)?)
            }
            SourceKind::Reddit => {
                let cfg = &self.sources.reddit;
                let (client_id, client_secret) =
                    require_env_pair(&cfg.client_id_env, &cfg.client_secret_env)?;
                let mut settings =
                    RedditSettings::new(client_id, client_secret, cfg.user_agent.clone());
                settings.auth_base_url = cfg.auth_base_url.clone();
                settings.api_base_url = cfg.api_base_url.clone();
                settings.listing = cfg.listing;
                settings.page_size = cfg.page_size;
                settings.comment_limit = cfg.comment_limit;
                settings.load_comments = cfg.comment_limit > 0;
                settings.timeout = Duration::from_secs(cfg.timeout_secs);
                Arc::new(RedditSource::new(settings).map_err(source_setup)?)
            }
            SourceKind::Scholar => {
                let cfg = &self.sources.scholar;
                let settings = ScholarSettings {
                    base_url: cfg.base_url.clone(),
                    user_agent: cfg.user_agent.clone(),
                    max_pages: cfg.max_pages,
                    timeout: Duration::from_secs(cfg.timeout_secs),
                };
                Arc::new(ScholarSource::new(settings).map_err(source_setup)?)
            }
        };
        Ok(source)
    }

    /// Source, normalizer and policy wired together for `kind`.
    pub fn build_harvester(&self, kind: SourceKind) -> Result<Harvester, HarvestCrewError> {
        let mut harvester = Harvester::new(self.build_source(kind)?, self.harvest_policy(kind));
        if kind == SourceKind::Reddit {
            harvester = harvester
                .with_normalizer(Normalizer::new(self.sources.reddit.comment_limit as usize));
        }
        Ok(harvester)
    }

    /// Build the configured text-generation backend.
    pub fn build_generator(&self) -> Result<DynGenerator, HarvestCrewError> {
        let llm = &self.llm;
        let timeout = Duration::from_secs(llm.timeout_secs);
        let generator: DynGenerator = match llm.provider {
            LlmProvider::Ollama => Arc::new(OllamaGenerator::new(
                llm.base_url(),
                llm.model.clone(),
                timeout,
            )?),
            LlmProvider::OpenAi => Arc::new(OpenAiGenerator::new(
                llm.base_url(),
                llm.model.clone(),
                require_env(&llm.api_key_env)?,
                timeout,
            )?),
            LlmProvider::Offline => Arc::new(OfflineGenerator),
        };
        Ok(generator)
    }
}

fn source_setup(err: crate::error::SourceError) -> HarvestCrewError {
    HarvestCrewError::InvalidConfiguration(format!("source setup failed: {err}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "offline")]
    Offline,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown llm provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    /// Falls back to the provider's public endpoint when unset.
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            model: "mistral".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 300,
        }
    }
}

impl LlmConfig {
    pub fn base_url(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com".to_string(),
            (None, _) => "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub max_consecutive_failures: usize,
    pub cap_rule: CapRule,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 2,
            cap_rule: CapRule::Truncate,
        }
    }
}

/// Wait times shared by every source section.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub backoff_secs: u64,
    pub request_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub serper: SerperConfig,
    pub reddit: RedditConfig,
    pub scholar: ScholarConfig,
}

impl SourcesConfig {
    pub fn pacing(&self, kind: SourceKind) -> Pacing {
        let (backoff_secs, request_interval_ms) = match kind {
            SourceKind::Serper => (self.serper.backoff_secs, self.serper.request_interval_ms),
            SourceKind::Reddit => (self.reddit.backoff_secs, self.reddit.request_interval_ms),
            SourceKind::Scholar => (self.scholar.backoff_secs, self.scholar.request_interval_ms),
        };
        Pacing {
            backoff_secs,
            request_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerperConfig {
    pub api_key_env: String,
    pub base_url: String,
    pub results_per_page: u32,
    pub max_pages: u32,
    pub backoff_secs: u64,
    pub request_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SerperConfig {
    fn default() -> Self {
        Self {
            api_key_env: "SERPER_API_KEY".to_string(),
            base_url: "https://google.serper.dev".to_string(),
            results_per_page: 10,
            max_pages: 5,
            backoff_secs: 10,
            request_interval_ms: 0,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id_env: String,
    pub client_secret_env: String,
    pub user_agent: String,
    pub auth_base_url: String,
    pub api_base_url: String,
    pub listing: RedditListing,
    pub page_size: u32,
    /// Top-level comments kept per post; 0 skips the comment requests.
    pub comment_limit: u32,
    pub backoff_secs: u64,
    pub request_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id_env: "REDDIT_CLIENT_ID".to_string(),
            client_secret_env: "REDDIT_CLIENT_SECRET".to_string(),
            user_agent: concat!("harvestcrew/", env!("CARGO_PKG_VERSION"), " (newsletter)")
                .to_string(),
            auth_base_url: "https://www.reddit.com".to_string(),
            api_base_url: "https://oauth.reddit.com".to_string(),
            listing: RedditListing::Hot,
            page_size: 25,
            comment_limit: 7,
            backoff_secs: 60,
            request_interval_ms: 0,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScholarConfig {
    pub base_url: String,
    pub user_agent: String,
    pub max_pages: u32,
    pub backoff_secs: u64,
    pub request_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ScholarConfig {
    fn default() -> Self {
        let settings = ScholarSettings::default();
        Self {
            base_url: settings.base_url,
            user_agent: settings.user_agent,
            max_pages: settings.max_pages,
            backoff_secs: 10,
            request_interval_ms: 2_000,
            timeout_secs: settings.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_default_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join(DEFAULT_CONFIG_PATH);

        let config = ConfigLoader::load_from(&absent, false).unwrap();
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.harvest.max_consecutive_failures, 2);

        assert!(matches!(
            ConfigLoader::load_from(&absent, true),
            Err(HarvestCrewError::ConfigIo { .. })
        ));
    }

    #[test]
    fn default_config_paces_each_source() {
        let config = Config::default();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.base_url(), "http://localhost:11434");
        assert_eq!(config.sources.reddit.comment_limit, 7);

        let forum = config.harvest_policy(SourceKind::Reddit);
        assert_eq!(forum.backoff, Duration::from_secs(60));
        let scholar = config.harvest_policy(SourceKind::Scholar);
        assert_eq!(scholar.backoff, Duration::from_secs(10));
        assert_eq!(scholar.request_interval, Duration::from_secs(2));
        assert_eq!(scholar.max_consecutive_failures, 2);
    }

    #[test]
    fn loads_partial_file_and_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"

[harvest]
cap_rule = "spread"

[sources.reddit]
listing = "top"
backoff_secs = 5

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = ConfigLoader::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.base_url(), "https://api.openai.com");
        assert_eq!(config.harvest.cap_rule, CapRule::Spread);
        assert_eq!(config.sources.reddit.listing, RedditListing::Top);
        assert_eq!(config.sources.reddit.page_size, 25);
        assert_eq!(
            config.harvest_policy(SourceKind::Reddit).backoff,
            Duration::from_secs(5)
        );
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, HarvestCrewError::ConfigIo { .. }));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let err = ConfigLoader::from_toml("[harvest]\nmax_consecutive_failures = 0\n").unwrap_err();
        assert!(matches!(err, HarvestCrewError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = ConfigLoader::from_toml("[llm]\nprovider = \"carrier-pigeon\"\n").unwrap_err();
        assert!(matches!(err, HarvestCrewError::InvalidConfiguration(_)));
    }

    #[test]
    fn missing_credentials_fail_before_any_request() {
        let mut config = Config::default();
        config.sources.serper.api_key_env = "HARVESTCREW_TEST_UNSET_SERPER_KEY".into();
        let err = config.build_source(SourceKind::Serper).err().unwrap();
        assert!(
            matches!(err, HarvestCrewError::MissingSecret(var) if var == "HARVESTCREW_TEST_UNSET_SERPER_KEY")
        );
    }

    #[test]
    fn offline_generator_needs_no_credentials() {
        let mut config = Config::default();
        config.llm.provider = LlmProvider::Offline;
        let generator = config.build_generator().unwrap();
        assert_eq!(generator.name(), "offline");
    }

    #[test]
    fn scholar_source_builds_without_credentials() {
        let config = Config::default();
        let harvester = config.build_harvester(SourceKind::Scholar).unwrap();
        assert_eq!(harvester.source_name(), "scholar");
    }
}
