//! Downstream plugin contract and the consent-filtered dispatcher.
//!
//! Plugins are independent: one plugin's failure is caught and reported in
//! its own result slot, never propagated to siblings or back into the entity
//! sync that produced the records. Delivery is at-least-once; downstream
//! targets are expected to upsert idempotently.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::DispatchRecord;

/// Errors surfaced by downstream plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin initialization failed: {0}")]
    Init(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

/// Opaque plugin configuration, forwarded as-is from the orchestrator config
/// surface to each plugin's `initialize`.
pub type PluginConfig = serde_json::Value;

/// A downstream marketing-platform integration.
#[async_trait]
pub trait DispatchPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, config: &PluginConfig) -> Result<(), PluginError>;

    /// Deliver a batch of consented records. Counts, not errors, report
    /// partial per-record trouble; an `Err` marks the whole batch failed for
    /// this plugin only.
    async fn dispatch(&self, records: &[DispatchRecord]) -> Result<DispatchOutcome, PluginError>;

    async fn shutdown(&self);
}

/// Counts reported by one plugin for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub applied: usize,
    pub failed: usize,
}

/// One plugin's slot in a dispatch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub plugin: String,
    pub succeeded: bool,
    pub outcome: Option<DispatchOutcome>,
    pub error: Option<String>,
}

/// Aggregate result of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub successful_plugins: usize,
    pub failed_plugins: usize,
    pub records_considered: usize,
    pub records_dispatched: usize,
    pub plugin_results: Vec<PluginResult>,
}

impl DispatchReport {
    /// True when at least one plugin was attempted and all of them failed.
    pub fn total_failure(&self) -> bool {
        self.failed_plugins > 0 && self.successful_plugins == 0
    }
}

/// Routes consented records to every initialized plugin independently.
///
/// Plugins that fail `initialize` are excluded for the process lifetime;
/// that exclusion is deliberately coarser than per-entity failure recovery.
pub struct PluginDispatcher {
    registered: Vec<Arc<dyn DispatchPlugin>>,
    ready: Mutex<Vec<Arc<dyn DispatchPlugin>>>,
}

impl PluginDispatcher {
    pub fn new(plugins: Vec<Arc<dyn DispatchPlugin>>) -> Self {
        Self {
            registered: plugins,
            ready: Mutex::new(Vec::new()),
        }
    }

    /// Initialize every registered plugin once. Failures are logged and the
    /// plugin is left out of the ready set; never fatal to startup.
    pub async fn initialize_all(&self, config: &PluginConfig) {
        let mut ready = Vec::new();
        for plugin in &self.registered {
            match plugin.initialize(config).await {
                Ok(()) => {
                    info!("[Plugins] '{}' initialized", plugin.name());
                    ready.push(Arc::clone(plugin));
                }
                Err(err) => {
                    warn!(
                        "[Plugins] '{}' failed to initialize, excluded for this process: {err}",
                        plugin.name()
                    );
                }
            }
        }
        *self.ready.lock().expect("plugin dispatcher poisoned") = ready;
    }

    pub fn ready_count(&self) -> usize {
        self.ready.lock().expect("plugin dispatcher poisoned").len()
    }

    /// Filter candidates down to consented records and hand them to every
    /// ready plugin.
    pub async fn dispatch(&self, candidates: &[DispatchRecord]) -> DispatchReport {
        let consented: Vec<DispatchRecord> = candidates
            .iter()
            .filter(|record| record.email_opt_in)
            .cloned()
            .collect();

        let ready: Vec<Arc<dyn DispatchPlugin>> = self
            .ready
            .lock()
            .expect("plugin dispatcher poisoned")
            .clone();

        let mut report = DispatchReport {
            records_considered: candidates.len(),
            records_dispatched: consented.len(),
            ..DispatchReport::default()
        };

        if consented.is_empty() || ready.is_empty() {
            return report;
        }

        for plugin in ready {
            match plugin.dispatch(&consented).await {
                Ok(outcome) => {
                    report.successful_plugins += 1;
                    report.plugin_results.push(PluginResult {
                        plugin: plugin.name().to_string(),
                        succeeded: true,
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!("[Plugins] '{}' dispatch failed: {err}", plugin.name());
                    report.failed_plugins += 1;
                    report.plugin_results.push(PluginResult {
                        plugin: plugin.name().to_string(),
                        succeeded: false,
                        outcome: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        report
    }

    pub async fn shutdown_all(&self) {
        let ready: Vec<Arc<dyn DispatchPlugin>> = self
            .ready
            .lock()
            .expect("plugin dispatcher poisoned")
            .drain(..)
            .collect();
        for plugin in ready {
            plugin.shutdown().await;
        }
    }
}
