//! Bearer credential read from the environment
//!
//! Token acquisition (device code, client credentials, refresh) is left to
//! whatever launches the process; the adapter only needs a current token.

use anyhow::{bail, Result};
use mailmirror_core::config::GraphConfig;
use mailmirror_core::ports::ICredentialProvider;

/// Reads the bearer token from an environment variable on every request
///
/// The variable is re-read each time so a supervisor can rotate the token
/// while a long run is in progress.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.token_env.clone())
    }

    /// Name of the environment variable consulted
    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait::async_trait]
impl ICredentialProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Ok(_) => bail!("environment variable {} is empty", self.var),
            Err(_) => bail!("environment variable {} is not set", self.var),
        }
    }
}
