//! Vendor credential loading for model-backed session kinds (spec §4.E
//! item 3: "materialize the vendor configuration file with merged
//! credentials (env-sourced token / base URL / default model /
//! timeouts)").
//!
//! Mirrors `toka-llm-gateway::config::EnvLoader`
//! (`examples/scrappyAI-Toka/crates/toka-llm-gateway/src/config.rs`):
//! secrets are read once into a `secrecy::Secret` and never logged or
//! serialized in cleartext.

use std::env;
use std::time::Duration;

use secrecy::Secret;
use serde::Serialize;

/// Merged, env-sourced credentials for one vendor-backed agent.
#[derive(Clone)]
pub struct VendorCredentials {
    /// API token, held behind `Secret` so `Debug`/logging can't leak it.
    pub token: Secret<String>,
    /// Vendor API base URL, if overridden.
    pub base_url: Option<String>,
    /// Default model identifier.
    pub default_model: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

/// Errors raised while assembling vendor credentials.
#[derive(Debug, thiserror::Error)]
pub enum VendorCredentialsError {
    /// The required token environment variable was not set.
    #[error("missing required environment variable {0}")]
    MissingToken(String),
}

impl VendorCredentials {
    /// Load credentials for vendor `prefix` (e.g. `"ANTHROPIC"`) from
    /// `{PREFIX}_API_KEY` (required), `{PREFIX}_BASE_URL`,
    /// `{PREFIX}_DEFAULT_MODEL`, and `{PREFIX}_TIMEOUT_SECS` (default 60).
    pub fn from_env(prefix: &str) -> Result<Self, VendorCredentialsError> {
        let key_var = format!("{prefix}_API_KEY");
        let token = env::var(&key_var).map_err(|_| VendorCredentialsError::MissingToken(key_var))?;
        let base_url = env::var(format!("{prefix}_BASE_URL")).ok();
        let default_model = env::var(format!("{prefix}_DEFAULT_MODEL")).ok();
        let timeout_secs = env::var(format!("{prefix}_TIMEOUT_SECS"))
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        Ok(Self {
            token: Secret::new(token),
            base_url,
            default_model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Render the vendor configuration document written into the agent's
    /// working directory. The token is the only sensitive field and is
    /// exposed here deliberately — this is the file the agent process
    /// itself reads, not a log line.
    pub fn to_vendor_config_json(&self) -> serde_json::Value {
        use secrecy::ExposeSecret;
        #[derive(Serialize)]
        struct VendorConfigDoc<'a> {
            token: &'a str,
            base_url: Option<&'a str>,
            default_model: Option<&'a str>,
            timeout_seconds: u64,
        }
        serde_json::to_value(VendorConfigDoc {
            token: self.token.expose_secret(),
            base_url: self.base_url.as_deref(),
            default_model: self.default_model.as_deref(),
            timeout_seconds: self.timeout.as_secs(),
        })
        .expect("vendor config doc always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_errors() {
        // SAFETY (test-only): no concurrent access to this process's env in
        // this test binary; required to exercise the missing-var path.
        unsafe {
            env::remove_var("AGENTMUX_TEST_VENDOR_API_KEY");
        }
        assert!(matches!(
            VendorCredentials::from_env("AGENTMUX_TEST_VENDOR"),
            Err(VendorCredentialsError::MissingToken(_))
        ));
    }

    #[test]
    fn defaults_fill_in_when_optional_vars_absent() {
        unsafe {
            env::set_var("AGENTMUX_TEST_VENDOR2_API_KEY", "secret-token");
        }
        let creds = VendorCredentials::from_env("AGENTMUX_TEST_VENDOR2").unwrap();
        assert_eq!(creds.timeout, Duration::from_secs(60));
        assert!(creds.base_url.is_none());
        let doc = creds.to_vendor_config_json();
        assert_eq!(doc["token"], "secret-token");
        unsafe {
            env::remove_var("AGENTMUX_TEST_VENDOR2_API_KEY");
        }
    }
}
