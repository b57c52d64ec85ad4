//! Credential provider port
//!
//! Token acquisition and refresh happen outside the engine. Adapters ask the
//! provider for a bearer token before each request and surface authorization
//! failures as [`SourceError::Unauthorized`](super::SourceError::Unauthorized).

/// Supplies a bearer credential on demand
#[async_trait::async_trait]
pub trait ICredentialProvider: Send + Sync {
    /// Returns the bearer token to attach to the next request
    async fn bearer_token(&self) -> anyhow::Result<String>;
}

/// A provider that always hands out the same token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait::async_trait]
impl ICredentialProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}
