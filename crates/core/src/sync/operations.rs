//! Operation tracker: at most one running operation per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::OperationKey;

/// Kind of work a running operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Entity,
    Plugins,
    Organization,
}

/// A currently-running operation, as surfaced by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOperation {
    pub key: OperationKey,
    pub kind: OperationKind,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

/// In-memory set of running operation keys.
///
/// `begin` performs the is-active check and the insert under one lock so two
/// callers racing on the same key can never both win.
#[derive(Clone, Default)]
pub struct OperationTracker {
    inner: Arc<Mutex<HashMap<OperationKey, ActiveOperation>>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a key. Returns `None` when an operation for the same key is
    /// already running; the caller skips, it never queues.
    pub fn begin(&self, key: OperationKey, kind: OperationKind) -> Option<OperationGuard> {
        let mut active = self.inner.lock().expect("operation tracker poisoned");
        if active.contains_key(&key) {
            return None;
        }
        let operation = ActiveOperation {
            key: key.clone(),
            kind,
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        };
        active.insert(key.clone(), operation);
        Some(OperationGuard {
            key,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn is_active(&self, key: &OperationKey) -> bool {
        self.inner
            .lock()
            .expect("operation tracker poisoned")
            .contains_key(key)
    }

    /// Snapshot of running operations, oldest first.
    pub fn active(&self) -> Vec<ActiveOperation> {
        let mut operations: Vec<ActiveOperation> = self
            .inner
            .lock()
            .expect("operation tracker poisoned")
            .values()
            .cloned()
            .collect();
        operations.sort_by_key(|op| op.started_at);
        operations
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .expect("operation tracker poisoned")
            .len()
    }

    /// Poll until no operations remain or the timeout elapses. Returns true
    /// when fully drained. Used by shutdown; in-flight work is never
    /// interrupted, only awaited.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// RAII claim on an operation key; releases the key on drop, on both the
/// success and failure paths.
pub struct OperationGuard {
    key: OperationKey,
    inner: Arc<Mutex<HashMap<OperationKey, ActiveOperation>>>,
}

impl OperationGuard {
    pub fn key(&self) -> &OperationKey {
        &self.key
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.inner.lock() {
            active.remove(&self.key);
        }
    }
}
