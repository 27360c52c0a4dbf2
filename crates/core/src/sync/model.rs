//! Sync domain models: entity types, operation keys, run results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity types pulled from the upstream fundraising API.
///
/// `Supporter` is the independent party; `Donation` and `RecurringPlan`
/// reference supporters and campaigns and must be synced after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Supporter,
    Campaign,
    Donation,
    RecurringPlan,
}

impl EntityType {
    /// Stable name used in operation keys and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supporter => "supporter",
            Self::Campaign => "campaign",
            Self::Donation => "donation",
            Self::RecurringPlan => "recurring_plan",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental (since watermark) or full (ignore watermark) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Incremental,
    Full,
}

/// What caused a sync run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Scheduled,
    Manual,
    Retry,
}

/// Outcome of one idempotent upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Applied,
    Skipped { reason: String },
}

/// Skip reason used when a record references an entity not yet stored
/// locally; the next incremental pass retries it naturally.
pub const SKIP_DEPENDENCY_MISSING: &str = "dependency_missing";

/// A per-record failure captured in a run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub record_id: String,
    pub message: String,
}

/// Outcome of one synchronizer invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub total_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
    pub skipped_records: usize,
    pub record_errors: Vec<RecordError>,
    pub duration_ms: i64,
}

/// The scope half of an operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationScope {
    Entity(EntityType),
    Plugins,
    Organization,
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(entity) => f.write_str(entity.as_str()),
            Self::Plugins => f.write_str("plugins"),
            Self::Organization => f.write_str("organization"),
        }
    }
}

/// Composite identifier used to detect and prevent overlapping work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationKey {
    pub organization_id: String,
    pub scope: OperationScope,
}

impl OperationKey {
    pub fn entity(organization_id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            organization_id: organization_id.into(),
            scope: OperationScope::Entity(entity_type),
        }
    }

    pub fn plugins(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            scope: OperationScope::Plugins,
        }
    }

    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            scope: OperationScope::Organization,
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.organization_id, self.scope)
    }
}

/// Per-entity row in a "sync all" pass or the status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunSummary {
    pub organization_id: String,
    pub entity_type: EntityType,
    pub sync_type: SyncType,
    pub trigger: SyncTrigger,
    pub started_at: DateTime<Utc>,
    pub succeeded: bool,
    pub result: Option<SyncResult>,
    pub error: Option<String>,
}

/// Aggregate of one "sync all" pass for one organization. A failed entity
/// does not abort the pass; its slot carries the error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSyncReport {
    pub organization_id: String,
    pub sync_type: SyncType,
    pub entity_runs: Vec<SyncRunSummary>,
}

impl OrganizationSyncReport {
    pub fn succeeded_count(&self) -> usize {
        self.entity_runs.iter().filter(|r| r.succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entity_runs.iter().filter(|r| !r.succeeded).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0 && !self.entity_runs.is_empty()
    }
}
