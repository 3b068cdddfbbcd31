//! Strata Cache - Tiered Result Cache
//!
//! A key-value cache with three tiers:
//!
//! - **Hot**: uncompressed values, checked first
//! - **Compressed**: zstd frames, decompressed on read
//! - **Predictive**: values fetched ahead of demand by the preloader
//!
//! Eviction is cost-aware: an entry's retention score is
//! `priority * cost / (1 + idle / recency_scale)` and the lowest score goes
//! first. Hot victims are demoted to Compressed before anything is deleted.
//!
//! The engine is synchronous and lock-sharded; only preloading is async, and
//! it never holds a shard lock across a loader call.

mod budget;
mod compression;
pub mod config;
mod engine;
mod entry;
pub mod loader;
pub mod maintenance;
mod pattern;
mod stats;

pub use config::CacheConfig;
pub use engine::{CacheEngine, PreloadReport};
pub use entry::{retention_score, EntryInfo};
pub use loader::{LoaderRegistry, PreloadLoader};
pub use maintenance::{cache_maintenance_task, MaintenanceMetrics, MaintenanceSnapshot};
pub use stats::{CacheStats, TierUsage};
