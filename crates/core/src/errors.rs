//! Error types for the sync orchestration core.

use thiserror::Error;

use crate::sync::model::OperationKey;
use crate::upstream::UpstreamError;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while orchestrating sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Upstream API failure, already classified for retry policy.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Storage collaborator failure (record store, watermark store, audit log).
    #[error("storage error: {0}")]
    Storage(String),

    /// Organization is unknown or inactive.
    #[error("organization '{0}' not found or inactive")]
    OrganizationUnavailable(String),

    /// An operation with the same key is already running.
    #[error("operation already in progress: {0}")]
    OperationInProgress(OperationKey),

    /// The orchestrator is not in a state that permits the request.
    #[error("invalid orchestrator state: {0}")]
    InvalidState(String),

    /// Configuration rejected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Create a storage error from any displayable cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// True when the failure should be handed to the recovery scheduler.
    /// Permanent upstream errors and credential problems are not; retrying
    /// them cannot succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream(err) => {
                err.retry_class() == crate::upstream::UpstreamRetryClass::Retryable
            }
            Self::Storage(_) => true,
            _ => false,
        }
    }
}
