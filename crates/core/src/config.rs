//! Orchestrator configuration with serde defaults.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::sync::model::EntityType;

/// Bounded exponential backoff parameters for failed operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RecoveryConfig {
    /// Delay before retry attempt number `retry_count + 1`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry_count as i32);
        Duration::from_millis((self.base_delay_ms as f64 * factor).round() as u64)
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Recurring interval per entity type, in milliseconds. Entities absent
    /// from the map are not scheduled (but remain manually syncable).
    pub entity_intervals_ms: HashMap<EntityType, u64>,
    pub plugin_dispatch_interval_ms: u64,
    pub health_check_interval_ms: u64,
    /// Fire one staggered sequence per organization right after start.
    pub start_immediate: bool,
    pub enable_plugins: bool,
    /// Opaque per-plugin settings, handed to every plugin's `initialize`.
    pub plugin_settings: serde_json::Value,
    pub recovery: RecoveryConfig,
    /// Lookback window for a first-ever sync with no derivable watermark.
    pub default_lookback_days: i64,
    /// Bounded drain timeout applied by `stop()`.
    pub shutdown_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut entity_intervals_ms = HashMap::new();
        entity_intervals_ms.insert(EntityType::Supporter, 15 * 60 * 1000);
        entity_intervals_ms.insert(EntityType::Campaign, 30 * 60 * 1000);
        entity_intervals_ms.insert(EntityType::Donation, 10 * 60 * 1000);
        entity_intervals_ms.insert(EntityType::RecurringPlan, 30 * 60 * 1000);
        Self {
            entity_intervals_ms,
            plugin_dispatch_interval_ms: 30 * 60 * 1000,
            health_check_interval_ms: 5 * 60 * 1000,
            start_immediate: false,
            enable_plugins: true,
            plugin_settings: serde_json::Value::Null,
            recovery: RecoveryConfig::default(),
            default_lookback_days: 30,
            shutdown_timeout_ms: 60_000,
        }
    }
}

impl OrchestratorConfig {
    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        for (entity, interval) in &self.entity_intervals_ms {
            if *interval == 0 {
                return Err(SyncError::Config(format!(
                    "interval for entity '{entity}' must be > 0"
                )));
            }
        }
        if self.plugin_dispatch_interval_ms == 0 {
            return Err(SyncError::Config(
                "pluginDispatchIntervalMs must be > 0".into(),
            ));
        }
        if self.health_check_interval_ms == 0 {
            return Err(SyncError::Config("healthCheckIntervalMs must be > 0".into()));
        }
        if self.recovery.base_delay_ms == 0 {
            return Err(SyncError::Config("recovery.baseDelayMs must be > 0".into()));
        }
        if self.default_lookback_days <= 0 {
            return Err(SyncError::Config("defaultLookbackDays must be > 0".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
