//! End-to-end orchestrator tests over in-memory collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use givesync_core::config::{OrchestratorConfig, RecoveryConfig};
use givesync_core::errors::{Result, SyncError};
use givesync_core::organizations::{Organization, OrganizationDirectoryTrait};
use givesync_core::plugins::{DispatchOutcome, DispatchPlugin, PluginConfig, PluginError};
use givesync_core::storage::{DispatchRecord, RecordStoreTrait};
use givesync_core::sync::{
    EntitySynchronizerTrait, EntityType, ManualSyncReport, OperationKey, OrchestratorState,
    SyncOrchestrator, SyncResult, SyncTarget, SyncType, SynchronizerRegistry, UpsertOutcome,
    SYNC_SEQUENCE,
};
use givesync_core::upstream::{RawRecord, UpstreamError};

fn org(id: &str) -> Organization {
    Organization {
        id: id.into(),
        external_id: format!("ext-{id}"),
        name: format!("Org {id}"),
        is_active: true,
    }
}

#[derive(Default)]
struct FakeDirectory {
    organizations: Mutex<Vec<Organization>>,
    fail_listing: AtomicBool,
}

impl FakeDirectory {
    fn with(organizations: Vec<Organization>) -> Arc<Self> {
        Arc::new(Self {
            organizations: Mutex::new(organizations),
            fail_listing: AtomicBool::new(false),
        })
    }

    fn deactivate(&self, organization_id: &str) {
        for organization in self.organizations.lock().unwrap().iter_mut() {
            if organization.id == organization_id {
                organization.is_active = false;
            }
        }
    }
}

#[async_trait]
impl OrganizationDirectoryTrait for FakeDirectory {
    async fn list_active(&self) -> Result<Vec<Organization>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SyncError::storage("directory unreachable"));
        }
        Ok(self
            .organizations
            .lock()
            .unwrap()
            .iter()
            .filter(|organization| organization.is_active)
            .cloned()
            .collect())
    }

    async fn get(&self, organization_id: &str) -> Result<Option<Organization>> {
        Ok(self
            .organizations
            .lock()
            .unwrap()
            .iter()
            .find(|organization| organization.id == organization_id)
            .cloned())
    }
}

#[derive(Default)]
struct FakeRecordStore {
    dispatchable: Mutex<Vec<DispatchRecord>>,
}

#[async_trait]
impl RecordStoreTrait for FakeRecordStore {
    async fn upsert(
        &self,
        _organization_id: &str,
        _entity_type: EntityType,
        _record: &RawRecord,
    ) -> Result<UpsertOutcome> {
        Ok(UpsertOutcome::Applied)
    }

    async fn max_record_synced_at(
        &self,
        _organization_id: &str,
        _entity_type: EntityType,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn list_dispatchable(&self, _organization_id: &str) -> Result<Vec<DispatchRecord>> {
        Ok(self.dispatchable.lock().unwrap().clone())
    }
}

/// Scripted synchronizer: records start/end events, optionally fails or
/// blocks on a notify pair.
struct ScriptedSynchronizer {
    entity_type: EntityType,
    events: Arc<Mutex<Vec<String>>>,
    runs: AtomicUsize,
    fail: AtomicBool,
    fail_permanent: AtomicBool,
    started: Option<Arc<Notify>>,
    release: Option<Arc<Notify>>,
}

impl ScriptedSynchronizer {
    fn new(entity_type: EntityType, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            entity_type,
            events,
            runs: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            fail_permanent: AtomicBool::new(false),
            started: None,
            release: None,
        })
    }

    fn failing(entity_type: EntityType, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        let sync = Self::new(entity_type, events);
        sync.fail.store(true, Ordering::SeqCst);
        sync
    }

    /// Fails with an upstream 400, which no amount of retrying will fix.
    fn failing_permanently(entity_type: EntityType, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        let sync = Self::failing(entity_type, events);
        sync.fail_permanent.store(true, Ordering::SeqCst);
        sync
    }

    fn blocking(
        entity_type: EntityType,
        events: Arc<Mutex<Vec<String>>>,
        started: Arc<Notify>,
        release: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entity_type,
            events,
            runs: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            fail_permanent: AtomicBool::new(false),
            started: Some(started),
            release: Some(release),
        })
    }

    fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitySynchronizerTrait for ScriptedSynchronizer {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    async fn run_incremental(&self, _organization: &Organization) -> Result<SyncResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:start", self.entity_type));
        if let (Some(started), Some(release)) = (&self.started, &self.release) {
            started.notify_one();
            release.notified().await;
        }
        let outcome = if self.fail_permanent.load(Ordering::SeqCst) {
            Err(SyncError::Upstream(UpstreamError::api(
                400,
                "malformed filter",
            )))
        } else if self.fail.load(Ordering::SeqCst) {
            Err(SyncError::storage("scripted failure"))
        } else {
            Ok(SyncResult {
                total_records: 1,
                successful_records: 1,
                ..SyncResult::default()
            })
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:end", self.entity_type));
        outcome
    }

    async fn run_full(&self, organization: &Organization) -> Result<SyncResult> {
        self.run_incremental(organization).await
    }
}

struct StubPlugin {
    name: String,
    fail_dispatch: bool,
    dispatched: AtomicUsize,
}

impl StubPlugin {
    fn new(name: &str, fail_dispatch: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_dispatch,
            dispatched: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DispatchPlugin for StubPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &PluginConfig) -> std::result::Result<(), PluginError> {
        Ok(())
    }

    async fn dispatch(
        &self,
        records: &[DispatchRecord],
    ) -> std::result::Result<DispatchOutcome, PluginError> {
        if self.fail_dispatch {
            return Err(PluginError::Dispatch("downstream 500".into()));
        }
        self.dispatched.fetch_add(records.len(), Ordering::SeqCst);
        Ok(DispatchOutcome {
            applied: records.len(),
            failed: 0,
        })
    }

    async fn shutdown(&self) {}
}

fn scripted_registry(
    events: &Arc<Mutex<Vec<String>>>,
) -> (SynchronizerRegistry, Vec<Arc<ScriptedSynchronizer>>) {
    let mut registry = SynchronizerRegistry::new();
    let mut synchronizers = Vec::new();
    for entity_type in SYNC_SEQUENCE {
        let sync = ScriptedSynchronizer::new(entity_type, Arc::clone(events));
        synchronizers.push(Arc::clone(&sync));
        registry = registry.with(sync);
    }
    (registry, synchronizers)
}

fn quiet_config() -> OrchestratorConfig {
    // Hour-scale intervals so recurring timers stay out of the way.
    let mut entity_intervals_ms = HashMap::new();
    for entity_type in SYNC_SEQUENCE {
        entity_intervals_ms.insert(entity_type, 3_600_000);
    }
    OrchestratorConfig {
        entity_intervals_ms,
        plugin_dispatch_interval_ms: 3_600_000,
        health_check_interval_ms: 3_600_000,
        ..OrchestratorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn start_registers_schedules_and_stop_cancels_them() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let plugins: Vec<Arc<dyn DispatchPlugin>> = vec![StubPlugin::new("mailer", false)];
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1"), org("org-2")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        plugins,
    );

    orchestrator.start(quiet_config()).await.expect("start");
    assert!(orchestrator.is_running());

    // 4 entity timers + 1 plugin timer per organization.
    let schedule = orchestrator.get_sync_schedule();
    assert_eq!(schedule.len(), 10);
    assert!(schedule.windows(2).all(|w| w[0].next_run <= w[1].next_run));

    orchestrator.stop().await.expect("stop");
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert!(orchestrator.get_sync_schedule().is_empty());
    assert!(!orchestrator.status().running);
}

#[tokio::test(start_paused = true)]
async fn startup_failure_propagates_and_leaves_orchestrator_stopped() {
    let directory = FakeDirectory::with(vec![org("org-1")]);
    directory.fail_listing.store(true, Ordering::SeqCst);
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let orchestrator = SyncOrchestrator::new(
        directory,
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let outcome = orchestrator.start(quiet_config()).await;
    assert!(outcome.is_err());
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn double_start_is_rejected() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );
    orchestrator.start(quiet_config()).await.expect("start");
    assert!(matches!(
        orchestrator.start(quiet_config()).await,
        Err(SyncError::InvalidState(_))
    ));
    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn sync_all_runs_entities_in_dependency_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let report = orchestrator
        .trigger_manual_sync("org-1", SyncTarget::All, SyncType::Incremental)
        .await
        .expect("manual sync all");

    let ManualSyncReport::All(report) = report else {
        panic!("expected org-wide report");
    };
    assert_eq!(report.entity_runs.len(), 4);
    assert!(report.all_succeeded());

    let events = events.lock().unwrap().clone();
    let position = |needle: &str| {
        events
            .iter()
            .position(|event| event == needle)
            .unwrap_or_else(|| panic!("missing event {needle}"))
    };
    // Each entity runs to completion before the next starts.
    assert!(position("supporter:end") < position("campaign:start"));
    assert!(position("campaign:end") < position("donation:start"));
    assert!(position("donation:end") < position("recurring_plan:start"));
}

#[tokio::test(start_paused = true)]
async fn failed_entity_is_recorded_but_does_not_abort_the_pass() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SynchronizerRegistry::new();
    let mut synchronizers = Vec::new();
    for entity_type in SYNC_SEQUENCE {
        let sync = if entity_type == EntityType::Campaign {
            ScriptedSynchronizer::failing(entity_type, Arc::clone(&events))
        } else {
            ScriptedSynchronizer::new(entity_type, Arc::clone(&events))
        };
        synchronizers.push(Arc::clone(&sync));
        registry = registry.with(sync);
    }
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let ManualSyncReport::All(report) = orchestrator
        .trigger_manual_sync("org-1", SyncTarget::All, SyncType::Incremental)
        .await
        .expect("manual sync all")
    else {
        panic!("expected org-wide report");
    };

    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.succeeded_count(), 3);
    let campaign_slot = report
        .entity_runs
        .iter()
        .find(|run| run.entity_type == EntityType::Campaign)
        .expect("campaign slot");
    assert!(!campaign_slot.succeeded);
    assert!(campaign_slot.error.as_deref().unwrap().contains("scripted"));

    // The donation sync still ran, after the campaign failure.
    let events = events.lock().unwrap().clone();
    let campaign_end = events.iter().position(|e| e == "campaign:end").unwrap();
    let donation_start = events.iter().position(|e| e == "donation:start").unwrap();
    assert!(campaign_end < donation_start);

    let failure_keys: Vec<OperationKey> = orchestrator
        .failure_status()
        .into_iter()
        .map(|record| record.key)
        .collect();
    assert_eq!(
        failure_keys,
        vec![OperationKey::entity("org-1", EntityType::Campaign)]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_same_key_sync_is_rejected_not_queued() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let blocking = ScriptedSynchronizer::blocking(
        EntityType::Donation,
        Arc::clone(&events),
        Arc::clone(&started),
        Arc::clone(&release),
    );
    let registry = SynchronizerRegistry::new().with(blocking.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let background = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .trigger_manual_sync(
                    "org-1",
                    SyncTarget::Entity(EntityType::Donation),
                    SyncType::Incremental,
                )
                .await
        })
    };
    started.notified().await;

    // Second request for the same key while the first is in flight.
    let second = orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Donation),
            SyncType::Incremental,
        )
        .await;
    assert!(matches!(second, Err(SyncError::OperationInProgress(_))));
    assert_eq!(orchestrator.status().active_operations.len(), 1);

    release.notify_one();
    let first = background.await.expect("join").expect("first sync");
    assert!(matches!(first, ManualSyncReport::Entity(_)));
    assert_eq!(blocking.run_count(), 1);
    assert!(orchestrator.status().active_operations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failures_retry_with_backoff_then_disable() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let failing = ScriptedSynchronizer::failing(EntityType::Donation, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(failing.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.recovery = RecoveryConfig {
        max_retries: 3,
        base_delay_ms: 1000,
        backoff_multiplier: 2.0,
    };
    orchestrator.start(config).await.expect("start");

    let manual = orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Donation),
            SyncType::Incremental,
        )
        .await
        .expect("manual sync completes with failure recorded");
    let ManualSyncReport::Entity(summary) = manual else {
        panic!("expected entity summary");
    };
    assert!(!summary.succeeded);
    assert_eq!(failing.run_count(), 1);

    // Retries fire at +1s, then +2s, then +4s; the fourth failure disables.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(failing.run_count(), 2);
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(failing.run_count(), 3);
    tokio::time::sleep(Duration::from_millis(4100)).await;
    assert_eq!(failing.run_count(), 4);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(failing.run_count(), 4);

    let status = orchestrator.failure_status();
    assert_eq!(status.len(), 1);
    assert!(status[0].disabled);
    assert!(status[0].next_retry_at.is_none());

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn clearing_a_disabled_key_rearms_it() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let failing = ScriptedSynchronizer::failing(EntityType::Donation, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(failing.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );
    let mut config = quiet_config();
    config.recovery = RecoveryConfig {
        max_retries: 0,
        base_delay_ms: 1000,
        backoff_multiplier: 2.0,
    };
    orchestrator.start(config).await.expect("start");

    orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Donation),
            SyncType::Incremental,
        )
        .await
        .expect("manual sync");
    let key = OperationKey::entity("org-1", EntityType::Donation);
    assert!(orchestrator.failure_status()[0].disabled);

    assert!(orchestrator.clear_failure_tracking(&key));
    assert!(orchestrator.failure_status().is_empty());

    // The key accepts work again; succeed this time.
    failing.fail.store(false, Ordering::SeqCst);
    orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Donation),
            SyncType::Incremental,
        )
        .await
        .expect("manual sync after clear");
    assert_eq!(failing.run_count(), 2);
    assert!(orchestrator.failure_status().is_empty());

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn disabled_key_is_skipped_by_its_recurring_timer() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let donations = ScriptedSynchronizer::failing(EntityType::Donation, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(donations.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.entity_intervals_ms = HashMap::from([(EntityType::Donation, 1000)]);
    config.enable_plugins = false;
    config.recovery = RecoveryConfig {
        max_retries: 0,
        base_delay_ms: 1000,
        backoff_multiplier: 2.0,
    };
    orchestrator.start(config).await.expect("start");

    // The first tick fails and disables the key.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(donations.run_count(), 1);
    assert!(orchestrator.failure_status()[0].disabled);

    // Further ticks keep firing but drop the disabled key.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(donations.run_count(), 1);

    // An operator clear re-arms the regular schedule.
    orchestrator.clear_failure_tracking(&OperationKey::entity("org-1", EntityType::Donation));
    donations.fail.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(donations.run_count(), 2);
    assert!(orchestrator.failure_status().is_empty());

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_disable_without_retry_timers() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let donations =
        ScriptedSynchronizer::failing_permanently(EntityType::Donation, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(donations.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.recovery = RecoveryConfig {
        max_retries: 3,
        base_delay_ms: 1000,
        backoff_multiplier: 2.0,
    };
    orchestrator.start(config).await.expect("start");

    let ManualSyncReport::Entity(summary) = orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Donation),
            SyncType::Incremental,
        )
        .await
        .expect("manual sync completes with failure recorded")
    else {
        panic!("expected entity summary");
    };
    assert!(!summary.succeeded);
    assert_eq!(donations.run_count(), 1);

    // A 400 never arms a retry timer; the key goes straight to disabled
    // with its retry budget untouched.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(donations.run_count(), 1);

    let status = orchestrator.failure_status();
    assert_eq!(status.len(), 1);
    assert!(status[0].disabled);
    assert_eq!(status[0].retry_count, 0);
    assert!(status[0].next_retry_at.is_none());

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn retry_skips_organizations_deactivated_in_the_meantime() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let failing = ScriptedSynchronizer::failing(EntityType::Supporter, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(failing.clone());
    let directory = FakeDirectory::with(vec![org("org-1")]);
    let orchestrator = SyncOrchestrator::new(
        directory.clone(),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );
    let mut config = quiet_config();
    config.recovery = RecoveryConfig {
        max_retries: 3,
        base_delay_ms: 1000,
        backoff_multiplier: 2.0,
    };
    orchestrator.start(config).await.expect("start");

    orchestrator
        .trigger_manual_sync(
            "org-1",
            SyncTarget::Entity(EntityType::Supporter),
            SyncType::Incremental,
        )
        .await
        .expect("manual sync");
    assert_eq!(failing.run_count(), 1);

    directory.deactivate("org-1");
    tokio::time::sleep(Duration::from_secs(10)).await;

    // The retry fired but skipped the deactivated org without consuming
    // another failure.
    assert_eq!(failing.run_count(), 1);
    let status = orchestrator.failure_status();
    assert_eq!(status[0].retry_count, 1);
    assert!(!status[0].disabled);

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn plugin_failure_does_not_alter_entity_results() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let store = Arc::new(FakeRecordStore::default());
    store.dispatchable.lock().unwrap().push(DispatchRecord {
        id: "s-1".into(),
        organization_id: "org-1".into(),
        entity_type: EntityType::Supporter,
        email: Some("s-1@example.org".into()),
        email_opt_in: true,
        payload: serde_json::json!({}),
    });
    let healthy = StubPlugin::new("mailer", false);
    let broken = StubPlugin::new("crm", true);
    let plugins: Vec<Arc<dyn DispatchPlugin>> =
        vec![broken.clone(), healthy.clone()];
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        store.clone(),
        plugins,
    );
    orchestrator.start(quiet_config()).await.expect("start");

    let ManualSyncReport::All(report) = orchestrator
        .trigger_manual_sync("org-1", SyncTarget::All, SyncType::Incremental)
        .await
        .expect("manual sync all")
    else {
        panic!("expected org-wide report");
    };

    // Entity results are untouched by the failing plugin.
    assert!(report.all_succeeded());
    assert_eq!(healthy.dispatched.load(Ordering::SeqCst), 1);

    // No failure tracking for the plugins key: one plugin succeeded.
    assert!(orchestrator.failure_status().is_empty());

    orchestrator.stop().await.expect("stop");
}

#[tokio::test(start_paused = true)]
async fn scheduled_ticks_launch_incremental_runs() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let donations = ScriptedSynchronizer::new(EntityType::Donation, Arc::clone(&events));
    let registry = SynchronizerRegistry::new().with(donations.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.entity_intervals_ms = HashMap::from([(EntityType::Donation, 1000)]);
    config.enable_plugins = false;
    orchestrator.start(config).await.expect("start");

    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert_eq!(donations.run_count(), 3);

    let schedule = orchestrator.get_sync_schedule();
    assert_eq!(schedule.len(), 1);
    assert!(schedule[0].last_run.is_some());

    orchestrator.stop().await.expect("stop");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(donations.run_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_abandons_operations_past_the_drain_timeout() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let blocking = ScriptedSynchronizer::blocking(
        EntityType::Supporter,
        Arc::clone(&events),
        Arc::clone(&started),
        Arc::clone(&release),
    );
    let registry = SynchronizerRegistry::new().with(blocking.clone());
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.shutdown_timeout_ms = 200;
    orchestrator.start(config).await.expect("start");

    let in_flight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .trigger_manual_sync(
                    "org-1",
                    SyncTarget::Entity(EntityType::Supporter),
                    SyncType::Incremental,
                )
                .await
        })
    };
    started.notified().await;

    // stop() returns despite the stuck operation; the work is abandoned,
    // not killed, and may complete afterwards.
    orchestrator.stop().await.expect("stop");
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(orchestrator.status().active_operations.len(), 1);

    release.notify_one();
    let outcome = in_flight.await.expect("join");
    assert!(outcome.is_ok());
    assert!(orchestrator.status().active_operations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn health_timer_records_snapshots_in_history() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (registry, _) = scripted_registry(&events);
    let orchestrator = SyncOrchestrator::new(
        FakeDirectory::with(vec![org("org-1")]),
        registry,
        Arc::new(FakeRecordStore::default()),
        Vec::new(),
    );

    let mut config = quiet_config();
    config.health_check_interval_ms = 1000;
    orchestrator.start(config).await.expect("start");

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let history = orchestrator.status().recent_history;
    let health_entries = history
        .iter()
        .filter(|event| {
            matches!(
                event,
                givesync_core::health::HistoryEvent::Health(_)
            )
        })
        .count();
    assert_eq!(health_entries, 2);

    orchestrator.stop().await.expect("stop");
}
