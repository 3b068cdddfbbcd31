//! Background sweep and preload task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::CacheConfig;
use crate::engine::CacheEngine;
use crate::loader::PreloadLoader;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the maintenance task.
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub sweep_cycles: AtomicU64,
    pub entries_expired: AtomicU64,
    pub preload_cycles: AtomicU64,
    pub entries_preloaded: AtomicU64,
    pub preload_failures: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
            preload_cycles: self.preload_cycles.load(Ordering::Relaxed),
            entries_preloaded: self.entries_preloaded.load(Ordering::Relaxed),
            preload_failures: self.preload_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of maintenance metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSnapshot {
    pub sweep_cycles: u64,
    pub entries_expired: u64,
    pub preload_cycles: u64,
    pub entries_preloaded: u64,
    pub preload_failures: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run expiry sweeps and preload passes on their own intervals until the
/// shutdown signal flips to `true` or its sender is dropped.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_maintenance_task(engine, loader, config, shutdown_rx));
/// // ...
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_maintenance_task(
    engine: Arc<CacheEngine>,
    loader: Arc<dyn PreloadLoader>,
    config: CacheConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<MaintenanceMetrics> {
    let metrics = Arc::new(MaintenanceMetrics::new());

    let mut sweep_interval = interval(config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut preload_interval = interval(config.preload_interval);
    preload_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_ms = config.sweep_interval.as_millis() as u64,
        preload_interval_ms = config.preload_interval.as_millis() as u64,
        preload_top_n = config.preload_top_n,
        "Cache maintenance task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache maintenance task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
                let expired = engine.sweep_expired();
                metrics.entries_expired.fetch_add(expired as u64, Ordering::Relaxed);
            }

            _ = preload_interval.tick() => {
                metrics.preload_cycles.fetch_add(1, Ordering::Relaxed);
                let report = engine.preload(loader.as_ref()).await;
                metrics.entries_preloaded.fetch_add(report.loaded as u64, Ordering::Relaxed);
                metrics.preload_failures.fetch_add(report.failed as u64, Ordering::Relaxed);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        entries_expired = snapshot.entries_expired,
        preload_cycles = snapshot.preload_cycles,
        entries_preloaded = snapshot.entries_preloaded,
        "Cache maintenance task completed"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use strata_core::CacheError;

    struct NothingLoader;

    #[async_trait]
    impl PreloadLoader for NothingLoader {
        async fn load(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_task_sweeps_and_stops_on_shutdown() {
        let config = CacheConfig::default()
            .with_intervals(Duration::from_millis(10), Duration::from_millis(10));
        let engine = Arc::new(CacheEngine::new(config.clone()).unwrap());
        engine
            .put_with_ttl("k", Bytes::from_static(b"v"), 1, 1.0, Some(Duration::from_millis(1)))
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cache_maintenance_task(
            engine.clone(),
            Arc::new(NothingLoader),
            config,
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();

        assert!(metrics.sweep_cycles >= 1);
        assert!(metrics.preload_cycles >= 1);
        assert!(!engine.contains("k"));
    }

    #[tokio::test]
    async fn test_task_stops_when_sender_dropped() {
        let config = CacheConfig::default();
        let engine = Arc::new(CacheEngine::new(config.clone()).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cache_maintenance_task(
            engine,
            Arc::new(NothingLoader),
            config,
            shutdown_rx,
        ));
        drop(shutdown_tx);
        let metrics = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.snapshot().entries_preloaded, 0);
    }
}
