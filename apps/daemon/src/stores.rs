//! In-memory storage collaborators and a settings-backed organization
//! directory.
//!
//! The daemon keeps synced records in process memory; the library behind it
//! only ever sees the storage traits, so swapping in a database later is a
//! wiring change here, not a core change.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use givesync_core::errors::Result;
use givesync_core::organizations::{Organization, OrganizationDirectoryTrait};
use givesync_core::storage::{
    DispatchRecord, RecordStoreTrait, SyncAuditEntry, SyncAuditLogTrait, WatermarkStoreTrait,
};
use givesync_core::sync::{EntityType, UpsertOutcome, SKIP_DEPENDENCY_MISSING};
use givesync_core::upstream::RawRecord;

/// Directory backed by the settings file. `is_active` can be flipped at
/// runtime, which the orchestrator observes on the next tick or retry.
pub struct StaticOrganizationDirectory {
    organizations: Mutex<Vec<Organization>>,
}

impl StaticOrganizationDirectory {
    pub fn new(organizations: Vec<Organization>) -> Self {
        Self {
            organizations: Mutex::new(organizations),
        }
    }
}

#[async_trait]
impl OrganizationDirectoryTrait for StaticOrganizationDirectory {
    async fn list_active(&self) -> Result<Vec<Organization>> {
        Ok(self
            .organizations
            .lock()
            .expect("directory poisoned")
            .iter()
            .filter(|organization| organization.is_active)
            .cloned()
            .collect())
    }

    async fn get(&self, organization_id: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .lock()
            .expect("directory poisoned")
            .iter()
            .find(|organization| organization.id == organization_id)
            .cloned())
    }
}

struct StoredRecord {
    raw: RawRecord,
    synced_at: DateTime<Utc>,
}

/// In-memory record store keyed by (organization, entity type, record id).
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<(String, EntityType), HashMap<String, StoredRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Referenced supporter id, for entities that hang off a supporter.
    fn supporter_reference(entity_type: EntityType, record: &RawRecord) -> Option<String> {
        match entity_type {
            EntityType::Donation | EntityType::RecurringPlan => record
                .payload
                .get("supporterId")
                .and_then(|value| value.as_str())
                .map(str::to_string),
            EntityType::Supporter | EntityType::Campaign => None,
        }
    }
}

#[async_trait]
impl RecordStoreTrait for MemoryRecordStore {
    async fn upsert(
        &self,
        organization_id: &str,
        entity_type: EntityType,
        record: &RawRecord,
    ) -> Result<UpsertOutcome> {
        let mut records = self.records.lock().expect("record store poisoned");

        // Records referencing a supporter not yet stored are skipped; the
        // next pass picks them up once the supporter sync has landed it.
        if let Some(supporter_id) = Self::supporter_reference(entity_type, record) {
            let supporters = records
                .get(&(organization_id.to_string(), EntityType::Supporter))
                .map(|map| map.contains_key(&supporter_id))
                .unwrap_or(false);
            if !supporters {
                return Ok(UpsertOutcome::Skipped {
                    reason: SKIP_DEPENDENCY_MISSING.to_string(),
                });
            }
        }

        records
            .entry((organization_id.to_string(), entity_type))
            .or_default()
            .insert(
                record.id.clone(),
                StoredRecord {
                    raw: record.clone(),
                    synced_at: Utc::now(),
                },
            );
        Ok(UpsertOutcome::Applied)
    }

    async fn max_record_synced_at(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .records
            .lock()
            .expect("record store poisoned")
            .get(&(organization_id.to_string(), entity_type))
            .and_then(|map| map.values().map(|stored| stored.synced_at).max()))
    }

    async fn list_dispatchable(&self, organization_id: &str) -> Result<Vec<DispatchRecord>> {
        let records = self.records.lock().expect("record store poisoned");
        let Some(supporters) = records.get(&(organization_id.to_string(), EntityType::Supporter))
        else {
            return Ok(Vec::new());
        };

        let mut dispatchable: Vec<DispatchRecord> = supporters
            .values()
            .map(|stored| DispatchRecord {
                id: stored.raw.id.clone(),
                organization_id: organization_id.to_string(),
                entity_type: EntityType::Supporter,
                email: stored
                    .raw
                    .payload
                    .get("email")
                    .and_then(|value| value.as_str())
                    .map(str::to_string),
                email_opt_in: stored
                    .raw
                    .payload
                    .get("emailOptIn")
                    .and_then(|value| value.as_bool())
                    .unwrap_or(false),
                payload: stored.raw.payload.clone(),
            })
            .collect();
        dispatchable.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(dispatchable)
    }
}

/// In-memory watermark store keyed by (organization, entity type).
#[derive(Default)]
pub struct MemoryWatermarkStore {
    watermarks: Mutex<HashMap<(String, EntityType), DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStoreTrait for MemoryWatermarkStore {
    async fn read(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .watermarks
            .lock()
            .expect("watermark store poisoned")
            .get(&(organization_id.to_string(), entity_type))
            .copied())
    }

    async fn write(
        &self,
        organization_id: &str,
        entity_type: EntityType,
        last_synced_at: DateTime<Utc>,
    ) -> Result<()> {
        self.watermarks
            .lock()
            .expect("watermark store poisoned")
            .insert((organization_id.to_string(), entity_type), last_synced_at);
        Ok(())
    }
}

/// In-memory append-only audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<SyncAuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncAuditLogTrait for MemoryAuditLog {
    async fn record_run(&self, entry: SyncAuditEntry) -> Result<()> {
        self.entries
            .lock()
            .expect("audit log poisoned")
            .push(entry);
        Ok(())
    }

    async fn last_completed_run(
        &self,
        organization_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<SyncAuditEntry>> {
        Ok(self
            .entries
            .lock()
            .expect("audit log poisoned")
            .iter()
            .filter(|entry| {
                entry.organization_id == organization_id && entry.entity_type == entity_type
            })
            .max_by_key(|entry| entry.completed_at)
            .cloned())
    }
}
