//! GiveSync daemon: wires the HTTP upstream client, in-memory stores, and
//! webhook plugins into the orchestrator and runs it until interrupted.

mod settings;
mod stores;
mod upstream;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};

use givesync_core::plugins::DispatchPlugin;
use givesync_core::sync::{SyncOrchestrator, SynchronizerRegistry};

use crate::settings::DaemonSettings;
use crate::stores::{
    MemoryAuditLog, MemoryRecordStore, MemoryWatermarkStore, StaticOrganizationDirectory,
};
use crate::upstream::HttpUpstreamClient;
use crate::webhook::WebhookPlugin;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("givesync.json"));
    let settings = DaemonSettings::load(&settings_path)?;
    info!(
        "loaded settings from {} ({} organization(s), {} webhook(s))",
        settings_path.display(),
        settings.organizations.len(),
        settings.webhooks.len()
    );

    let upstream = Arc::new(HttpUpstreamClient::new(&settings.upstream)?);
    let record_store: Arc<dyn givesync_core::storage::RecordStoreTrait> =
        Arc::new(MemoryRecordStore::new());
    let watermarks = Arc::new(MemoryWatermarkStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let directory = Arc::new(StaticOrganizationDirectory::new(
        settings.organizations.iter().cloned().map(Into::into).collect(),
    ));

    let synchronizers = SynchronizerRegistry::standard(
        upstream,
        Arc::clone(&record_store),
        watermarks,
        audit,
        settings.orchestrator.default_lookback_days,
    );

    let mut plugins: Vec<Arc<dyn DispatchPlugin>> = Vec::new();
    for webhook in &settings.webhooks {
        plugins.push(Arc::new(WebhookPlugin::new(webhook)?));
    }

    let orchestrator = SyncOrchestrator::new(directory, synchronizers, record_store, plugins);
    orchestrator
        .start(settings.orchestrator.clone())
        .await
        .context("starting orchestrator")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    if let Err(err) = orchestrator.stop().await {
        error!("orchestrator stop failed: {err}");
        return Err(err.into());
    }
    Ok(())
}
