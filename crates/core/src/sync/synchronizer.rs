//! Entity synchronizer contract, the shared page-loop runner, and the
//! compile-time registry mapping entity types to synchronizers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};

use crate::errors::Result;
use crate::organizations::Organization;
use crate::storage::{RecordStoreTrait, SyncAuditEntry, SyncAuditLogTrait, WatermarkStoreTrait};
use crate::sync::model::{EntityType, RecordError, SyncResult, SyncType, UpsertOutcome};
use crate::sync::sequence::SYNC_SEQUENCE;
use crate::upstream::UpstreamClientTrait;

/// Per-record errors retained in one `SyncResult`.
const RECORD_ERROR_CAP: usize = 25;

/// Capability set every entity type implements. The orchestrator only ever
/// talks to this trait; concrete synchronizers are registered at
/// construction time, never looked up by name at runtime.
#[async_trait]
pub trait EntitySynchronizerTrait: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Fetch and upsert records changed since the resolved watermark.
    async fn run_incremental(&self, organization: &Organization) -> Result<SyncResult>;

    /// Fetch and upsert all records regardless of watermark.
    async fn run_full(&self, organization: &Organization) -> Result<SyncResult>;
}

/// Shared synchronizer implementation backed by the upstream client and the
/// storage collaborators. One instance per entity type.
pub struct RecordSynchronizer {
    entity_type: EntityType,
    upstream: Arc<dyn UpstreamClientTrait>,
    store: Arc<dyn RecordStoreTrait>,
    watermarks: Arc<dyn WatermarkStoreTrait>,
    audit: Arc<dyn SyncAuditLogTrait>,
    lookback: ChronoDuration,
}

impl RecordSynchronizer {
    pub fn new(
        entity_type: EntityType,
        upstream: Arc<dyn UpstreamClientTrait>,
        store: Arc<dyn RecordStoreTrait>,
        watermarks: Arc<dyn WatermarkStoreTrait>,
        audit: Arc<dyn SyncAuditLogTrait>,
        lookback_days: i64,
    ) -> Self {
        Self {
            entity_type,
            upstream,
            store,
            watermarks,
            audit,
            lookback: ChronoDuration::days(lookback_days),
        }
    }

    /// Resolve the incremental starting point for an organization.
    ///
    /// Order: stored watermark, then max `synced_at` over local rows, then
    /// the audit log's last completed run, then the default lookback window.
    /// A failing watermark store degrades to the next fallback; it never
    /// blocks the run, it only widens the re-fetch window.
    async fn resolve_watermark(
        &self,
        organization: &Organization,
        run_started_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self.watermarks.read(&organization.id, self.entity_type).await {
            Ok(Some(watermark)) => return watermark,
            Ok(None) => {}
            Err(err) => {
                warn!(
                    "[Sync] {}:{}: watermark read failed ({err}), falling back",
                    organization.id, self.entity_type
                );
            }
        }

        match self
            .store
            .max_record_synced_at(&organization.id, self.entity_type)
            .await
        {
            Ok(Some(max_synced)) => return max_synced,
            Ok(None) => {}
            Err(err) => {
                warn!(
                    "[Sync] {}:{}: stored-row watermark fallback failed ({err})",
                    organization.id, self.entity_type
                );
            }
        }

        match self
            .audit
            .last_completed_run(&organization.id, self.entity_type)
            .await
        {
            Ok(Some(entry)) => return entry.started_at,
            Ok(None) => {}
            Err(err) => {
                warn!(
                    "[Sync] {}:{}: audit-log watermark fallback failed ({err})",
                    organization.id, self.entity_type
                );
            }
        }

        run_started_at - self.lookback
    }

    async fn run(&self, organization: &Organization, sync_type: SyncType) -> Result<SyncResult> {
        let run_started_at = Utc::now();
        let clock = std::time::Instant::now();

        let since = match sync_type {
            SyncType::Full => None,
            SyncType::Incremental => {
                Some(self.resolve_watermark(organization, run_started_at).await)
            }
        };
        debug!(
            "[Sync] {}:{}: {:?} run starting (since {:?})",
            organization.id, self.entity_type, sync_type, since
        );

        let mut result = SyncResult::default();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .upstream
                .fetch_page(
                    &organization.external_id,
                    self.entity_type,
                    since,
                    page_token.as_deref(),
                )
                .await?;

            for record in &page.records {
                result.total_records += 1;
                match self
                    .store
                    .upsert(&organization.id, self.entity_type, record)
                    .await
                {
                    Ok(UpsertOutcome::Applied) => result.successful_records += 1,
                    Ok(UpsertOutcome::Skipped { reason }) => {
                        result.skipped_records += 1;
                        debug!(
                            "[Sync] {}:{}: record {} skipped ({reason})",
                            organization.id, self.entity_type, record.id
                        );
                    }
                    Err(err) => {
                        // A single bad record never aborts the batch; the
                        // next incremental pass re-attempts it naturally.
                        result.failed_records += 1;
                        warn!(
                            "[Sync] {}:{}: upsert failed for record {}: {err}",
                            organization.id, self.entity_type, record.id
                        );
                        if result.record_errors.len() < RECORD_ERROR_CAP {
                            result.record_errors.push(RecordError {
                                record_id: record.id.clone(),
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // The new watermark is the run's start time, not the max updated_at
        // observed in the batch: records updated upstream mid-fetch land in
        // the next run's window and idempotent upserts absorb the overlap.
        self.commit_watermark(organization, run_started_at).await;

        result.duration_ms = clock.elapsed().as_millis() as i64;
        let completed_at = Utc::now();
        if let Err(err) = self
            .audit
            .record_run(SyncAuditEntry {
                organization_id: organization.id.clone(),
                entity_type: self.entity_type,
                sync_type,
                started_at: run_started_at,
                completed_at,
                total_records: result.total_records,
                failed_records: result.failed_records,
            })
            .await
        {
            warn!(
                "[Sync] {}:{}: audit log write failed: {err}",
                organization.id, self.entity_type
            );
        }

        debug!(
            "[Sync] {}:{}: done total={} ok={} failed={} skipped={} in {}ms",
            organization.id,
            self.entity_type,
            result.total_records,
            result.successful_records,
            result.failed_records,
            result.skipped_records,
            result.duration_ms
        );
        Ok(result)
    }

    /// Write the watermark, clamped so it never moves backwards.
    async fn commit_watermark(&self, organization: &Organization, run_started_at: DateTime<Utc>) {
        let existing = self
            .watermarks
            .read(&organization.id, self.entity_type)
            .await
            .unwrap_or(None);
        let next = match existing {
            Some(current) if current > run_started_at => current,
            _ => run_started_at,
        };
        if let Err(err) = self
            .watermarks
            .write(&organization.id, self.entity_type, next)
            .await
        {
            // Not fatal: the next run degrades to the fallback chain and
            // simply re-fetches a wider window.
            warn!(
                "[Sync] {}:{}: watermark write failed: {err}",
                organization.id, self.entity_type
            );
        }
    }
}

#[async_trait]
impl EntitySynchronizerTrait for RecordSynchronizer {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    async fn run_incremental(&self, organization: &Organization) -> Result<SyncResult> {
        self.run(organization, SyncType::Incremental).await
    }

    async fn run_full(&self, organization: &Organization) -> Result<SyncResult> {
        self.run(organization, SyncType::Full).await
    }
}

/// Compile-time registry mapping each entity type to its synchronizer.
#[derive(Default, Clone)]
pub struct SynchronizerRegistry {
    synchronizers: HashMap<EntityType, Arc<dyn EntitySynchronizerTrait>>,
}

impl SynchronizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, synchronizer: Arc<dyn EntitySynchronizerTrait>) -> Self {
        self.synchronizers
            .insert(synchronizer.entity_type(), synchronizer);
        self
    }

    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn EntitySynchronizerTrait>> {
        self.synchronizers.get(&entity_type).cloned()
    }

    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types: Vec<EntityType> = self.synchronizers.keys().copied().collect();
        types.sort_by_key(|entity| crate::sync::sequence::sequence_position(*entity));
        types
    }

    /// Registry with one `RecordSynchronizer` per entity type, wired to the
    /// given collaborators.
    pub fn standard(
        upstream: Arc<dyn UpstreamClientTrait>,
        store: Arc<dyn RecordStoreTrait>,
        watermarks: Arc<dyn WatermarkStoreTrait>,
        audit: Arc<dyn SyncAuditLogTrait>,
        lookback_days: i64,
    ) -> Self {
        let mut registry = Self::new();
        for entity_type in SYNC_SEQUENCE {
            registry = registry.with(Arc::new(RecordSynchronizer::new(
                entity_type,
                Arc::clone(&upstream),
                Arc::clone(&store),
                Arc::clone(&watermarks),
                Arc::clone(&audit),
                lookback_days,
            )));
        }
        registry
    }
}
