//! Storage collaborator contracts: record store, watermark store, audit log.
//!
//! All methods must be safely retryable; upserts are idempotent by contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::sync::model::{EntityType, SyncType, UpsertOutcome};
use crate::upstream::RawRecord;

/// A locally-stored record eligible for downstream dispatch consideration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub id: String,
    pub organization_id: String,
    pub entity_type: EntityType,
    pub email: Option<String>,
    /// Explicit communication consent flag. The dispatcher never forwards
    /// records without it.
    pub email_opt_in: bool,
    pub payload: serde_json::Value,
}

/// Local record storage for synced entities.
#[async_trait]
pub trait RecordStoreTrait: Send + Sync {
    /// Idempotent upsert. A record referencing an entity that does not yet
    /// exist locally returns `Skipped("dependency_missing")`, never an error.
    async fn upsert(
        &self,
        organization_id: &str,
        entity_type: EntityType,
        record: &RawRecord,
    ) -> Result<UpsertOutcome>;

    /// Maximum `synced_at` across stored rows for this (org, entity) pair.
    /// First fallback when the watermark store has no entry.
    async fn max_record_synced_at(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Candidate records for downstream plugin dispatch. Consent filtering
    /// is the dispatcher's responsibility; this returns candidates only.
    async fn list_dispatchable(&self, organization_id: &str) -> Result<Vec<DispatchRecord>>;
}

/// Last-successful-sync timestamps per (org, entity) pair.
#[async_trait]
pub trait WatermarkStoreTrait: Send + Sync {
    async fn read(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn write(
        &self,
        organization_id: &str,
        entity_type: EntityType,
        last_synced_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// One completed sync run as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAuditEntry {
    pub organization_id: String,
    pub entity_type: EntityType,
    pub sync_type: SyncType,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_records: usize,
    pub failed_records: usize,
}

/// Append-only record of completed runs. Second watermark fallback: a
/// missing or corrupted watermark store widens the re-fetch window instead
/// of blocking sync.
#[async_trait]
pub trait SyncAuditLogTrait: Send + Sync {
    async fn record_run(&self, entry: SyncAuditEntry) -> Result<()>;

    async fn last_completed_run(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<SyncAuditEntry>>;
}
