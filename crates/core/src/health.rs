//! Bounded run history and periodic health aggregation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plugins::DispatchReport;
use crate::sync::model::{OperationKey, SyncRunSummary};

/// Entries retained in the status history ring.
const HISTORY_CAP: usize = 50;

/// Point-in-time aggregate recorded by the health timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub at: DateTime<Utc>,
    pub active_operations: usize,
    pub scheduled_tasks: usize,
    pub organizations: usize,
    pub disabled_keys: Vec<OperationKey>,
}

/// One entry in the status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum HistoryEvent {
    EntityRun(SyncRunSummary),
    PluginDispatch {
        organization_id: String,
        at: DateTime<Utc>,
        report: DispatchReport,
    },
    Health(HealthSnapshot),
}

/// Fixed-capacity ring of recent events, oldest evicted first.
#[derive(Clone, Default)]
pub struct HistoryRing {
    events: Arc<Mutex<VecDeque<HistoryEvent>>>,
}

impl HistoryRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: HistoryEvent) {
        let mut events = self.events.lock().expect("history ring poisoned");
        events.push_back(event);
        while events.len() > HISTORY_CAP {
            events.pop_front();
        }
    }

    /// Most recent events, newest first.
    pub fn recent(&self) -> Vec<HistoryEvent> {
        self.events
            .lock()
            .expect("history ring poisoned")
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("history ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
