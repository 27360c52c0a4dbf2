//! Upstream SaaS API client contract.
//!
//! The core never speaks HTTP itself; it consumes this trait and expects
//! rate limits and timeouts to arrive as typed failures, never as silent
//! empty pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::model::EntityType;

/// Retry policy class for upstream API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors surfaced by the upstream API client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Rate limited by the upstream; honor `retry_after` when present.
    #[error("rate limited by upstream (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Request exceeded the client's own deadline.
    #[error("upstream request timed out")]
    Timeout,

    /// Transport-level failure (connect, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// API error response with an HTTP status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> UpstreamRetryClass {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Transport(_) => {
                UpstreamRetryClass::Retryable
            }
            Self::Api { status, .. } => match *status {
                401 | 403 => UpstreamRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => UpstreamRetryClass::Retryable,
                500..=599 => UpstreamRetryClass::Retryable,
                _ => UpstreamRetryClass::Permanent,
            },
            Self::Decode(_) => UpstreamRetryClass::Permanent,
        }
    }
}

/// One raw record as returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// One page of upstream records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    pub next_page_token: Option<String>,
}

/// Upstream API client contract.
///
/// `since == None` requests a full export; otherwise only records updated at
/// or after the given instant are returned. Pagination is forward-only and
/// not restartable mid-fetch.
#[async_trait]
pub trait UpstreamClientTrait: Send + Sync {
    async fn fetch_page(
        &self,
        org_external_id: &str,
        entity_type: EntityType,
        since: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<FetchPage, UpstreamError>;
}
