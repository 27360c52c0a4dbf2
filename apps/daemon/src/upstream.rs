//! HTTP client for the fundraising platform's export API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;

use givesync_core::sync::EntityType;
use givesync_core::upstream::{FetchPage, UpstreamClientTrait, UpstreamError};

use crate::settings::UpstreamSettings;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Structured error body returned by the upstream API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

fn entity_path(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Supporter => "supporters",
        EntityType::Campaign => "campaigns",
        EntityType::Donation => "donations",
        EntityType::RecurringPlan => "recurring-plans",
    }
}

/// Client for the upstream export endpoints.
///
/// One instance is shared by every synchronizer; reqwest pools connections
/// internally.
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpUpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| UpstreamError::api(401, "invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Upstream] response status: {status}");
            return;
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Upstream] response error ({status}): {preview}");
    }

    fn map_send_error(err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }

    async fn parse_page(response: reqwest::Response) -> Result<FetchPage, UpstreamError> {
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            return Err(UpstreamError::RateLimited { retry_after_secs });
        }

        let body = response
            .text()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(UpstreamError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(UpstreamError::api(
                status.as_u16(),
                format!("request failed: {body}"),
            ));
        }

        serde_json::from_str(&body).map_err(|err| UpstreamError::Decode(err.to_string()))
    }
}

#[async_trait]
impl UpstreamClientTrait for HttpUpstreamClient {
    /// GET /api/v1/organizations/{externalId}/{entity}?updatedSince=&pageToken=
    async fn fetch_page(
        &self,
        org_external_id: &str,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<FetchPage, UpstreamError> {
        let url = format!(
            "{}/api/v1/organizations/{}/{}",
            self.base_url,
            org_external_id,
            entity_path(entity_type)
        );

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(cutoff) = since {
            query.push((
                "updatedSince",
                cutoff.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let mut request = self.client.get(&url).headers(self.headers()?);
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request.send().await.map_err(Self::map_send_error)?;
        Self::parse_page(response).await
    }
}
