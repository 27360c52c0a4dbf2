//! Failure tracking and bounded exponential-backoff recovery policy.
//!
//! The tracker owns the decision (retry after delay, or disable); the
//! orchestrator owns the one-shot retry timers themselves.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use crate::sync::model::{EntityType, OperationKey, SyncType};

/// Most recent failure events retained per operation key.
const FAILURE_EVENT_CAP: usize = 10;

/// What the failing operation was, for operator display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureContext {
    pub organization_id: String,
    pub entity_type: Option<EntityType>,
    pub sync_type: Option<SyncType>,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Accumulated failure history for one operation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub key: OperationKey,
    pub context: FailureContext,
    pub failures: VecDeque<FailureEvent>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

/// What the caller should do after recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule a one-shot retry after `delay`; this is attempt `attempt`
    /// (1-based) out of `max_retries`.
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted; the key is disabled until an operator clears it.
    Disabled,
}

/// Mutex-guarded map of failure records, shared across operation call sites.
#[derive(Clone)]
pub struct FailureTracker {
    records: Arc<Mutex<HashMap<OperationKey, FailureRecord>>>,
    config: Arc<RwLock<RecoveryConfig>>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl FailureTracker {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Replace the recovery policy; applied to failures recorded afterwards.
    pub fn set_config(&self, config: RecoveryConfig) {
        *self.config.write().expect("recovery config poisoned") = config;
    }

    /// Record a failure and decide whether to retry.
    ///
    /// The event list is capped at the most recent ten entries, oldest
    /// evicted first. Once a key is disabled it stays disabled; further
    /// failures only append history.
    pub fn record_failure(
        &self,
        key: &OperationKey,
        context: FailureContext,
        message: impl Into<String>,
    ) -> RetryDecision {
        let config = self
            .config
            .read()
            .expect("recovery config poisoned")
            .clone();
        let mut records = self.records.lock().expect("failure tracker poisoned");
        let record = records.entry(key.clone()).or_insert_with(|| FailureRecord {
            key: key.clone(),
            context,
            failures: VecDeque::new(),
            retry_count: 0,
            next_retry_at: None,
            disabled: false,
        });

        record.failures.push_back(FailureEvent {
            at: Utc::now(),
            message: message.into(),
        });
        while record.failures.len() > FAILURE_EVENT_CAP {
            record.failures.pop_front();
        }

        if record.disabled || record.retry_count >= config.max_retries {
            if !record.disabled {
                warn!(
                    "[Recovery] {key}: {} retries exhausted, disabling automatic retries",
                    config.max_retries
                );
            }
            record.disabled = true;
            record.next_retry_at = None;
            return RetryDecision::Disabled;
        }

        let delay = config.delay_for(record.retry_count);
        record.retry_count += 1;
        record.next_retry_at =
            Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
        RetryDecision::Retry {
            attempt: record.retry_count,
            delay,
        }
    }

    /// Record a failure that retrying cannot fix and disable the key at
    /// once, without consuming any of its retry budget.
    pub fn record_disabled(
        &self,
        key: &OperationKey,
        context: FailureContext,
        message: impl Into<String>,
    ) {
        let mut records = self.records.lock().expect("failure tracker poisoned");
        let record = records.entry(key.clone()).or_insert_with(|| FailureRecord {
            key: key.clone(),
            context,
            failures: VecDeque::new(),
            retry_count: 0,
            next_retry_at: None,
            disabled: false,
        });
        record.failures.push_back(FailureEvent {
            at: Utc::now(),
            message: message.into(),
        });
        while record.failures.len() > FAILURE_EVENT_CAP {
            record.failures.pop_front();
        }
        record.disabled = true;
        record.next_retry_at = None;
    }

    /// A success removes the key's record entirely, so failure history never
    /// leaks across unrelated successful periods.
    pub fn record_success(&self, key: &OperationKey) {
        self.records
            .lock()
            .expect("failure tracker poisoned")
            .remove(key);
    }

    pub fn is_disabled(&self, key: &OperationKey) -> bool {
        self.records
            .lock()
            .expect("failure tracker poisoned")
            .get(key)
            .map(|record| record.disabled)
            .unwrap_or(false)
    }

    /// Snapshot of all records, disabled keys first then by next retry.
    pub fn status(&self) -> Vec<FailureRecord> {
        let mut records: Vec<FailureRecord> = self
            .records
            .lock()
            .expect("failure tracker poisoned")
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.disabled
                .cmp(&a.disabled)
                .then(a.next_retry_at.cmp(&b.next_retry_at))
        });
        records
    }

    pub fn disabled_keys(&self) -> Vec<OperationKey> {
        self.records
            .lock()
            .expect("failure tracker poisoned")
            .values()
            .filter(|record| record.disabled)
            .map(|record| record.key.clone())
            .collect()
    }

    /// Operator action: drop one key's record, re-arming the regular
    /// schedule. Returns false when the key had no record.
    pub fn clear(&self, key: &OperationKey) -> bool {
        self.records
            .lock()
            .expect("failure tracker poisoned")
            .remove(key)
            .is_some()
    }

    /// Operator action: drop everything. Returns the number of cleared keys.
    pub fn reset(&self) -> usize {
        let mut records = self.records.lock().expect("failure tracker poisoned");
        let cleared = records.len();
        records.clear();
        cleared
    }
}
