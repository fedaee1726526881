use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::HarvestCrewError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Directive used when `RUST_LOG` is unset, typically `[logging] level`.
    pub default_level: Option<String>,
    pub with_ansi: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            default_level: None,
            with_ansi: true,
        }
    }
}

fn resolve_filter(rust_log: Option<String>, default_level: Option<String>) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .or(default_level)
        .unwrap_or_else(|| "info".to_string())
}

/// Initialise the global tracing subscriber. Logs go to stderr so stdout
/// stays reserved for the generated artifact.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), HarvestCrewError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = resolve_filter(std::env::var("RUST_LOG").ok(), options.default_level);

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(options.with_ansi)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            HarvestCrewError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
