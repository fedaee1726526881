//! Credentials read from the environment: the Serper API key, the Reddit
//! client id and secret, and the OpenAI-compatible API key.

use std::env;

use crate::HarvestCrewError;

/// A credential that prints as `***redacted***` in `Debug` output, so source
/// and backend settings can be logged whole.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value for request headers and auth.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***redacted***")
    }
}

/// Read `var` from the environment. Surrounding whitespace (a trailing
/// newline from `.env` files, say) is stripped; blank counts as missing.
pub fn require_env(var: &str) -> Result<SecretValue, HarvestCrewError> {
    lookup(var).ok_or_else(|| HarvestCrewError::MissingSecret(var.to_string()))
}

/// Read two credentials that only work together, such as an OAuth client id
/// and secret. The error names every missing variable, not just the first.
pub fn require_env_pair(
    first: &str,
    second: &str,
) -> Result<(SecretValue, SecretValue), HarvestCrewError> {
    match (lookup(first), lookup(second)) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, None) => Err(HarvestCrewError::MissingSecret(format!(
            "{first}, {second}"
        ))),
        (None, Some(_)) => Err(HarvestCrewError::MissingSecret(first.to_string())),
        (Some(_), None) => Err(HarvestCrewError::MissingSecret(second.to_string())),
    }
}

fn lookup(var: &str) -> Option<SecretValue> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(SecretValue)
}
