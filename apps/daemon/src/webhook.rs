//! Webhook dispatch plugin: POSTs consented records as JSON to a configured
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use givesync_core::plugins::{DispatchOutcome, DispatchPlugin, PluginConfig, PluginError};
use givesync_core::storage::DispatchRecord;

use crate::settings::WebhookSettings;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One downstream webhook endpoint.
pub struct WebhookPlugin {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookPlugin {
    pub fn new(settings: &WebhookSettings) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            name: settings.name.clone(),
            url: settings.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl DispatchPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &PluginConfig) -> Result<(), PluginError> {
        reqwest::Url::parse(&self.url)
            .map_err(|err| PluginError::Init(format!("invalid webhook url: {err}")))?;
        info!("[Webhook:{}] ready, endpoint {}", self.name, self.url);
        Ok(())
    }

    async fn dispatch(&self, records: &[DispatchRecord]) -> Result<DispatchOutcome, PluginError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(records)
            .send()
            .await
            .map_err(|err| PluginError::Dispatch(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PluginError::Dispatch(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        debug!(
            "[Webhook:{}] delivered {} record(s)",
            self.name,
            records.len()
        );
        Ok(DispatchOutcome {
            applied: records.len(),
            failed: 0,
        })
    }

    async fn shutdown(&self) {
        debug!("[Webhook:{}] shut down", self.name);
    }
}
