//! Tenant organization model and directory contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A tenant whose data is synchronized. Created and managed elsewhere;
/// read-only to the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    /// Identifier used when talking to the upstream API.
    pub external_id: String,
    pub name: String,
    pub is_active: bool,
}

/// Directory of tenant organizations.
#[async_trait]
pub trait OrganizationDirectoryTrait: Send + Sync {
    /// All organizations currently eligible for scheduling.
    async fn list_active(&self) -> Result<Vec<Organization>>;

    /// Resolve one organization by id. Retry paths use this to re-check
    /// status before consuming a retry attempt.
    async fn get(&self, organization_id: &str) -> Result<Option<Organization>>;
}
