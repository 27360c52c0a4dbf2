//! GiveSync core: the synchronization orchestration engine.
//!
//! Pulls fundraising entities (supporters, campaigns, donations, recurring
//! plans) from an upstream SaaS API per tenant organization, upserts them
//! through storage collaborators, and forwards consented records to
//! downstream marketing plugins. Scheduling, overlap prevention, dependency
//! ordering, watermark tracking, and bounded backoff recovery live here;
//! HTTP, SQL, and credential handling are injected behind traits.

pub mod config;
pub mod errors;
pub mod health;
pub mod organizations;
pub mod plugins;
pub mod storage;
pub mod sync;
pub mod upstream;

pub use config::{OrchestratorConfig, RecoveryConfig};
pub use errors::{Result, SyncError};
