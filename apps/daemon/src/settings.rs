//! Daemon settings file: orchestrator configuration plus the wiring the
//! library deliberately leaves to the host (upstream credentials, the
//! organization roster, webhook endpoints).

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use givesync_core::config::OrchestratorConfig;
use givesync_core::organizations::Organization;

/// Upstream API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSettings {
    /// Base URL of the fundraising API, e.g. "https://api.example.org".
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// One organization to synchronize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationEntry {
    pub id: String,
    pub external_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl From<OrganizationEntry> for Organization {
    fn from(entry: OrganizationEntry) -> Self {
        Organization {
            id: entry.id,
            external_id: entry.external_id,
            name: entry.name,
            is_active: entry.is_active,
        }
    }
}

/// One downstream webhook endpoint, registered as a dispatch plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    pub name: String,
    pub url: String,
}

/// Full daemon settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSettings {
    pub upstream: UpstreamSettings,
    pub organizations: Vec<OrganizationEntry>,
    #[serde(default)]
    pub webhooks: Vec<WebhookSettings>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl DaemonSettings {
    /// Load and validate settings from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.upstream.base_url.trim().is_empty(),
            "upstream.baseUrl must not be empty"
        );
        anyhow::ensure!(
            !self.upstream.api_key.trim().is_empty(),
            "upstream.apiKey must not be empty"
        );
        anyhow::ensure!(
            !self.organizations.is_empty(),
            "at least one organization is required"
        );
        for webhook in &self.webhooks {
            anyhow::ensure!(
                !webhook.url.trim().is_empty(),
                "webhook '{}' has an empty url",
                webhook.name
            );
        }
        self.orchestrator.validate()?;
        Ok(())
    }
}
