//! Orchestrator facade: the `start`/`stop`/`status` surface that wires the
//! schedule registry, operation tracker, dependency sequencer, failure
//! tracker, and plugin dispatcher together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::errors::{Result, SyncError};
use crate::health::{HealthSnapshot, HistoryEvent, HistoryRing};
use crate::organizations::{Organization, OrganizationDirectoryTrait};
use crate::plugins::{DispatchPlugin, DispatchReport, PluginDispatcher};
use crate::storage::RecordStoreTrait;
use crate::sync::model::{
    EntityType, OperationKey, OperationScope, OrganizationSyncReport, SyncRunSummary, SyncTrigger,
    SyncType,
};
use crate::sync::operations::{ActiveOperation, OperationKind, OperationTracker};
use crate::sync::recovery::{FailureContext, FailureRecord, FailureTracker, RetryDecision};
use crate::sync::schedule::{ScheduleEntry, ScheduleRegistry};
use crate::sync::sequence::SYNC_SEQUENCE;
use crate::sync::synchronizer::SynchronizerRegistry;

/// Delay between staggered immediate syncs at startup.
const START_IMMEDIATE_STAGGER: Duration = Duration::from_millis(500);

/// Orchestrator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Answer to `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub running: bool,
    pub state: OrchestratorState,
    pub active_operations: Vec<ActiveOperation>,
    pub scheduled_tasks: Vec<ScheduleEntry>,
    pub recent_history: Vec<HistoryEvent>,
}

/// Target of a manual sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Entity(EntityType),
    All,
}

/// Result of a manual sync request.
#[derive(Debug, Clone)]
pub enum ManualSyncReport {
    Entity(SyncRunSummary),
    All(OrganizationSyncReport),
}

/// Outcome of one guarded entity run attempt.
enum EntityRunOutcome {
    /// The key was already claimed; nothing ran.
    Busy,
    Completed(SyncRunSummary),
}

struct Inner {
    state: Mutex<OrchestratorState>,
    config: RwLock<OrchestratorConfig>,
    directory: Arc<dyn OrganizationDirectoryTrait>,
    synchronizers: SynchronizerRegistry,
    record_store: Arc<dyn RecordStoreTrait>,
    tracker: OperationTracker,
    failures: FailureTracker,
    schedule: ScheduleRegistry,
    dispatcher: PluginDispatcher,
    history: HistoryRing,
    /// Retry timers and staggered startup syncs; aborted at stop so no new
    /// work starts during drain.
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    organization_count: AtomicUsize,
}

/// Top-level synchronization orchestration engine. All collaborators are
/// injected at construction; there is no ambient global state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        directory: Arc<dyn OrganizationDirectoryTrait>,
        synchronizers: SynchronizerRegistry,
        record_store: Arc<dyn RecordStoreTrait>,
        plugins: Vec<Arc<dyn DispatchPlugin>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(OrchestratorState::Stopped),
                config: RwLock::new(OrchestratorConfig::default()),
                directory,
                synchronizers,
                record_store,
                tracker: OperationTracker::new(),
                failures: FailureTracker::default(),
                schedule: ScheduleRegistry::new(),
                dispatcher: PluginDispatcher::new(plugins),
                history: HistoryRing::new(),
                background_tasks: Mutex::new(Vec::new()),
                health_task: Mutex::new(None),
                organization_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        *self.inner.state.lock().expect("state poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.state() == OrchestratorState::Running
    }

    /// Start scheduling. Fatal collaborator failures here (for example an
    /// unreachable organization directory) propagate to the caller and leave
    /// the orchestrator stopped.
    pub async fn start(&self, config: OrchestratorConfig) -> Result<()> {
        config.validate()?;
        self.inner
            .transition(OrchestratorState::Stopped, OrchestratorState::Starting)?;

        self.inner.failures.set_config(config.recovery.clone());
        *self.inner.config.write().expect("config poisoned") = config.clone();

        let organizations = match self.inner.directory.list_active().await {
            Ok(organizations) => organizations,
            Err(err) => {
                self.inner.set_state(OrchestratorState::Stopped);
                return Err(err);
            }
        };
        self.inner
            .organization_count
            .store(organizations.len(), Ordering::SeqCst);
        info!(
            "[Orchestrator] starting: {} active organization(s)",
            organizations.len()
        );

        if config.enable_plugins {
            self.inner
                .dispatcher
                .initialize_all(&config.plugin_settings)
                .await;
        }

        for organization in &organizations {
            self.inner.register_organization(organization, &config);
        }
        self.inner.spawn_health_timer(&config);

        if config.start_immediate {
            for (position, organization) in organizations.iter().cloned().enumerate() {
                let inner = Arc::clone(&self.inner);
                let delay = START_IMMEDIATE_STAGGER * position as u32;
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner
                        .run_sequence(
                            &organization,
                            SyncType::Incremental,
                            SyncTrigger::Startup,
                        )
                        .await;
                });
                self.inner.track_background_task(handle);
            }
        }

        self.inner.set_state(OrchestratorState::Running);
        info!("[Orchestrator] running");
        Ok(())
    }

    /// Stop scheduling: cancel every timer, then drain in-flight operations
    /// up to the configured timeout. Operations still active past the
    /// timeout are abandoned with a warning, never forcibly killed — their
    /// side effects are idempotent and may complete after this returns.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().expect("state poisoned");
            match *state {
                OrchestratorState::Running => *state = OrchestratorState::Stopping,
                OrchestratorState::Stopped => return Ok(()),
                other => {
                    return Err(SyncError::InvalidState(format!(
                        "cannot stop while {other}"
                    )))
                }
            }
        }
        info!("[Orchestrator] stopping: cancelling timers");

        self.inner.schedule.cancel_all();
        if let Some(handle) = self
            .inner
            .health_task
            .lock()
            .expect("health task poisoned")
            .take()
        {
            handle.abort();
        }
        for handle in self
            .inner
            .background_tasks
            .lock()
            .expect("background tasks poisoned")
            .drain(..)
        {
            handle.abort();
        }

        let timeout = self
            .inner
            .config
            .read()
            .expect("config poisoned")
            .shutdown_timeout();
        let drained = self.inner.tracker.wait_idle(timeout).await;
        if !drained {
            let abandoned: Vec<String> = self
                .inner
                .tracker
                .active()
                .iter()
                .map(|op| op.key.to_string())
                .collect();
            warn!(
                "[Orchestrator] drain timeout after {timeout:?}; abandoning in-flight operations: {}",
                abandoned.join(", ")
            );
        }

        self.inner.dispatcher.shutdown_all().await;
        self.inner.set_state(OrchestratorState::Stopped);
        info!("[Orchestrator] stopped (drained={drained})");
        Ok(())
    }

    pub fn status(&self) -> OrchestratorStatus {
        let state = self.state();
        OrchestratorStatus {
            running: state == OrchestratorState::Running,
            state,
            active_operations: self.inner.tracker.active(),
            scheduled_tasks: self.inner.schedule.snapshot(),
            recent_history: self.inner.history.recent(),
        }
    }

    /// All registered recurring tasks, soonest `next_run` first.
    pub fn get_sync_schedule(&self) -> Vec<ScheduleEntry> {
        self.inner.schedule.snapshot()
    }

    /// Run a sync now, bypassing the schedule but not the overlap rules: a
    /// key that is already running yields `OperationInProgress` immediately,
    /// never a queued run.
    pub async fn trigger_manual_sync(
        &self,
        organization_id: &str,
        target: SyncTarget,
        sync_type: SyncType,
    ) -> Result<ManualSyncReport> {
        match self.state() {
            OrchestratorState::Stopped | OrchestratorState::Running => {}
            other => {
                return Err(SyncError::InvalidState(format!(
                    "manual sync rejected while {other}"
                )))
            }
        }

        let organization = self
            .inner
            .directory
            .get(organization_id)
            .await?
            .filter(|organization| organization.is_active)
            .ok_or_else(|| SyncError::OrganizationUnavailable(organization_id.to_string()))?;

        match target {
            SyncTarget::Entity(entity_type) => {
                match self
                    .inner
                    .run_entity(&organization, entity_type, sync_type, SyncTrigger::Manual)
                    .await
                {
                    EntityRunOutcome::Busy => Err(SyncError::OperationInProgress(
                        OperationKey::entity(&organization.id, entity_type),
                    )),
                    EntityRunOutcome::Completed(summary) => {
                        Ok(ManualSyncReport::Entity(summary))
                    }
                }
            }
            SyncTarget::All => {
                let report = self
                    .inner
                    .run_sequence(&organization, sync_type, SyncTrigger::Manual)
                    .await
                    .ok_or_else(|| {
                        SyncError::OperationInProgress(OperationKey::organization(
                            &organization.id,
                        ))
                    })?;
                Ok(ManualSyncReport::All(report))
            }
        }
    }

    pub fn failure_status(&self) -> Vec<FailureRecord> {
        self.inner.failures.status()
    }

    /// Operator action: forget one key's failure history, re-arming the
    /// regular schedule for a disabled key.
    pub fn clear_failure_tracking(&self, key: &OperationKey) -> bool {
        self.inner.failures.clear(key)
    }

    pub fn reset_failure_tracking(&self) -> usize {
        self.inner.failures.reset()
    }
}

impl Inner {
    fn set_state(&self, next: OrchestratorState) {
        *self.state.lock().expect("state poisoned") = next;
    }

    fn transition(&self, from: OrchestratorState, to: OrchestratorState) -> Result<()> {
        let mut state = self.state.lock().expect("state poisoned");
        if *state != from {
            return Err(SyncError::InvalidState(format!(
                "expected {from}, found {}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }

    fn accepting_work(&self) -> bool {
        matches!(
            *self.state.lock().expect("state poisoned"),
            OrchestratorState::Running
        )
    }

    fn track_background_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self
            .background_tasks
            .lock()
            .expect("background tasks poisoned");
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Register the per-entity and plugin timers for one organization.
    fn register_organization(self: &Arc<Self>, organization: &Organization, config: &OrchestratorConfig) {
        for entity_type in SYNC_SEQUENCE {
            let Some(interval_ms) = config.entity_intervals_ms.get(&entity_type).copied() else {
                continue;
            };
            if self.synchronizers.get(entity_type).is_none() {
                continue;
            }
            let key = OperationKey::entity(&organization.id, entity_type);
            let inner = Arc::clone(self);
            let tick_org = organization.clone();
            self.schedule.register(
                key.clone(),
                Duration::from_millis(interval_ms),
                move || {
                    if inner.tracker.is_active(&key) {
                        return false;
                    }
                    if inner.failures.is_disabled(&key) {
                        debug!(
                            "[Orchestrator] {key}: tick dropped, key disabled pending operator clear"
                        );
                        return false;
                    }
                    let inner = Arc::clone(&inner);
                    let organization = tick_org.clone();
                    tokio::spawn(async move {
                        inner
                            .run_entity(
                                &organization,
                                entity_type,
                                SyncType::Incremental,
                                SyncTrigger::Scheduled,
                            )
                            .await;
                    });
                    true
                },
            );
        }

        if config.enable_plugins {
            let key = OperationKey::plugins(&organization.id);
            let inner = Arc::clone(self);
            let tick_org = organization.clone();
            self.schedule.register(
                key.clone(),
                Duration::from_millis(config.plugin_dispatch_interval_ms),
                move || {
                    if inner.tracker.is_active(&key) {
                        return false;
                    }
                    if inner.failures.is_disabled(&key) {
                        debug!(
                            "[Orchestrator] {key}: tick dropped, key disabled pending operator clear"
                        );
                        return false;
                    }
                    let inner = Arc::clone(&inner);
                    let organization = tick_org.clone();
                    tokio::spawn(async move {
                        inner
                            .run_plugin_dispatch(&organization, SyncTrigger::Scheduled)
                            .await;
                    });
                    true
                },
            );
        }
    }

    fn spawn_health_timer(self: &Arc<Self>, config: &OrchestratorConfig) {
        let interval = Duration::from_millis(config.health_check_interval_ms);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticks = tokio::time::interval_at(start, interval);
            loop {
                ticks.tick().await;
                inner.history.push(HistoryEvent::Health(HealthSnapshot {
                    at: Utc::now(),
                    active_operations: inner.tracker.active_count(),
                    scheduled_tasks: inner.schedule.len(),
                    organizations: inner.organization_count.load(Ordering::SeqCst),
                    disabled_keys: inner.failures.disabled_keys(),
                }));
            }
        });
        *self.health_task.lock().expect("health task poisoned") = Some(handle);
    }

    /// One guarded synchronizer run for one (org, entity) key.
    async fn run_entity(
        self: &Arc<Self>,
        organization: &Organization,
        entity_type: EntityType,
        sync_type: SyncType,
        trigger: SyncTrigger,
    ) -> EntityRunOutcome {
        let key = OperationKey::entity(&organization.id, entity_type);
        let Some(_guard) = self.tracker.begin(key.clone(), OperationKind::Entity) else {
            debug!("[Orchestrator] {key}: run skipped, operation already in progress");
            return EntityRunOutcome::Busy;
        };

        let Some(synchronizer) = self.synchronizers.get(entity_type) else {
            warn!("[Orchestrator] {key}: no synchronizer registered");
            return EntityRunOutcome::Completed(SyncRunSummary {
                organization_id: organization.id.clone(),
                entity_type,
                sync_type,
                trigger,
                started_at: Utc::now(),
                succeeded: false,
                result: None,
                error: Some("no synchronizer registered".into()),
            });
        };

        let started_at = Utc::now();
        let run = match sync_type {
            SyncType::Incremental => synchronizer.run_incremental(organization).await,
            SyncType::Full => synchronizer.run_full(organization).await,
        };

        let summary = match run {
            Ok(result) => {
                self.failures.record_success(&key);
                SyncRunSummary {
                    organization_id: organization.id.clone(),
                    entity_type,
                    sync_type,
                    trigger,
                    started_at,
                    succeeded: true,
                    result: Some(result),
                    error: None,
                }
            }
            Err(err) => {
                warn!("[Orchestrator] {key}: sync failed: {err}");
                let context = FailureContext {
                    organization_id: organization.id.clone(),
                    entity_type: Some(entity_type),
                    sync_type: Some(sync_type),
                };
                self.route_failure(&key, context, err.to_string(), err.is_retryable(), sync_type);
                SyncRunSummary {
                    organization_id: organization.id.clone(),
                    entity_type,
                    sync_type,
                    trigger,
                    started_at,
                    succeeded: false,
                    result: None,
                    error: Some(err.to_string()),
                }
            }
        };
        self.history.push(HistoryEvent::EntityRun(summary.clone()));
        EntityRunOutcome::Completed(summary)
    }

    /// One "sync all" pass for one organization, in dependency order. Each
    /// entity runs to completion before the next starts; a failed entity is
    /// recorded and the pass continues. Returns `None` when another
    /// organization-wide pass is already running.
    async fn run_sequence(
        self: &Arc<Self>,
        organization: &Organization,
        sync_type: SyncType,
        trigger: SyncTrigger,
    ) -> Option<OrganizationSyncReport> {
        let pass_key = OperationKey::organization(&organization.id);
        let Some(_guard) = self
            .tracker
            .begin(pass_key.clone(), OperationKind::Organization)
        else {
            debug!("[Orchestrator] {pass_key}: sync-all pass already in progress");
            return None;
        };

        let mut entity_runs = Vec::with_capacity(SYNC_SEQUENCE.len());
        for entity_type in SYNC_SEQUENCE {
            if self.synchronizers.get(entity_type).is_none() {
                continue;
            }
            match self
                .run_entity(organization, entity_type, sync_type, trigger)
                .await
            {
                EntityRunOutcome::Completed(summary) => entity_runs.push(summary),
                EntityRunOutcome::Busy => entity_runs.push(SyncRunSummary {
                    organization_id: organization.id.clone(),
                    entity_type,
                    sync_type,
                    trigger,
                    started_at: Utc::now(),
                    succeeded: false,
                    result: None,
                    error: Some("skipped: operation already in progress".into()),
                }),
            }
        }

        let report = OrganizationSyncReport {
            organization_id: organization.id.clone(),
            sync_type,
            entity_runs,
        };

        let enable_plugins = self
            .config
            .read()
            .expect("config poisoned")
            .enable_plugins;
        if enable_plugins {
            self.run_plugin_dispatch(organization, trigger).await;
        }
        Some(report)
    }

    /// One guarded consent-filtered dispatch pass for one organization.
    async fn run_plugin_dispatch(
        self: &Arc<Self>,
        organization: &Organization,
        trigger: SyncTrigger,
    ) -> Option<DispatchReport> {
        let key = OperationKey::plugins(&organization.id);
        let Some(_guard) = self.tracker.begin(key.clone(), OperationKind::Plugins) else {
            debug!("[Orchestrator] {key}: dispatch skipped, already in progress");
            return None;
        };
        if self.dispatcher.ready_count() == 0 {
            return None;
        }

        let candidates = match self.record_store.list_dispatchable(&organization.id).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("[Orchestrator] {key}: loading dispatch candidates failed: {err}");
                let context = FailureContext {
                    organization_id: organization.id.clone(),
                    entity_type: None,
                    sync_type: None,
                };
                self.route_failure(
                    &key,
                    context,
                    err.to_string(),
                    err.is_retryable(),
                    SyncType::Incremental,
                );
                return None;
            }
        };

        let report = self.dispatcher.dispatch(&candidates).await;
        self.history.push(HistoryEvent::PluginDispatch {
            organization_id: organization.id.clone(),
            at: Utc::now(),
            report: report.clone(),
        });

        if report.total_failure() {
            let context = FailureContext {
                organization_id: organization.id.clone(),
                entity_type: None,
                sync_type: None,
            };
            self.route_failure(
                &key,
                context,
                "all plugins failed dispatch".to_string(),
                true,
                SyncType::Incremental,
            );
        } else {
            self.failures.record_success(&key);
        }
        Some(report)
    }

    /// Record a failure and, when it is retryable and the backoff budget
    /// allows, schedule a one-shot retry timer for the key. Non-retryable
    /// failures (auth, bad requests, decode) disable the key immediately.
    fn route_failure(
        self: &Arc<Self>,
        key: &OperationKey,
        context: FailureContext,
        message: String,
        retryable: bool,
        sync_type: SyncType,
    ) {
        if !retryable {
            self.failures.record_disabled(key, context, message);
            warn!("[Recovery] {key}: permanent failure, disabled until operator clear");
            return;
        }
        match self.failures.record_failure(key, context, message) {
            RetryDecision::Retry { attempt, delay } => {
                info!("[Recovery] {key}: scheduling retry attempt {attempt} in {delay:?}");
                self.spawn_retry(key.clone(), delay, sync_type);
            }
            RetryDecision::Disabled => {
                warn!("[Recovery] {key}: disabled, waiting for operator clear");
            }
        }
    }

    fn spawn_retry(self: &Arc<Self>, key: OperationKey, delay: Duration, sync_type: SyncType) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.accepting_work() {
                debug!("[Recovery] {key}: retry skipped, orchestrator not running");
                return;
            }
            // Re-resolve the organization: one deactivated between failure
            // and retry is skipped without recording another failure.
            let organization = match inner.directory.get(&key.organization_id).await {
                Ok(Some(organization)) if organization.is_active => organization,
                Ok(_) => {
                    info!("[Recovery] {key}: retry skipped, organization no longer active");
                    return;
                }
                Err(err) => {
                    warn!("[Recovery] {key}: retry aborted, directory lookup failed: {err}");
                    return;
                }
            };
            match key.scope {
                OperationScope::Entity(entity_type) => {
                    inner
                        .run_entity(&organization, entity_type, sync_type, SyncTrigger::Retry)
                        .await;
                }
                OperationScope::Plugins => {
                    inner
                        .run_plugin_dispatch(&organization, SyncTrigger::Retry)
                        .await;
                }
                OperationScope::Organization => {}
            }
        });
        self.track_background_task(handle);
    }
}
