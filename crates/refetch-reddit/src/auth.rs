//! Script-app credentials for the Reddit OAuth password grant

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Contents of the credential file (`auth/AUTH.json` by default)
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read credentials {}", path.display()))?;
        let creds: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid credentials file {}", path.display()))?;
        anyhow::ensure!(!creds.client_id.is_empty(), "client_id is empty");
        anyhow::ensure!(!creds.user_agent.is_empty(), "user_agent is empty");
        Ok(creds)
    }

    /// Replace the file's user agent (config override)
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        if let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) {
            self.user_agent = ua.to_string();
        }
        self
    }
}
