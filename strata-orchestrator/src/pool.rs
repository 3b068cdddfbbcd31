//! Bounded work queue, worker pool and the scaling controller.
//!
//! Workers pull jobs from a single bounded queue. The pool never grows the
//! queue: a full queue rejects the job immediately. Only the scaling
//! controller adds or retires workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A unit of work. Jobs report their own results.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Sizing and scaling parameters for [`WorkerPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub scale_tick: Duration,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub consecutive_samples: u32,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub queue_capacity: usize,
    pub jobs_completed: u64,
    pub jobs_rejected: u64,
}

impl PoolStats {
    /// `(busy + queued) / workers`; infinite when work waits on zero workers.
    pub fn load(&self) -> f64 {
        let demand = (self.busy + self.queued) as f64;
        if self.workers == 0 {
            if demand > 0.0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            demand / self.workers as f64
        }
    }
}

/// The job was not queued because the queue is full or closed.
#[derive(Debug)]
pub struct QueueFull;

/// Reserved queue capacity for one job.
pub struct QueueSlot<'a> {
    permit: Option<mpsc::Permit<'a, Job>>,
    queued: &'a AtomicUsize,
}

impl QueueSlot<'_> {
    pub fn submit(mut self, job: Job) {
        if let Some(permit) = self.permit.take() {
            permit.send(job);
        }
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if self.permit.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct WorkerSlot {
    id: u64,
    /// Set while the worker runs a job.
    busy: Arc<AtomicBool>,
    retire: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolShared {
    config: PoolConfig,
    rx: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    queued: AtomicUsize,
    busy: AtomicUsize,
    jobs_completed: AtomicU64,
    jobs_rejected: AtomicU64,
    next_worker_id: AtomicU64,
    workers: Mutex<Vec<WorkerSlot>>,
    shutdown: CancellationToken,
}

impl PoolShared {
    fn workers(&self) -> MutexGuard<'_, Vec<WorkerSlot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity queue served by a resizable set of workers.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create the queue. No workers run until [`start`](Self::start).
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            tx,
            shared: Arc::new(PoolShared {
                config,
                rx: tokio::sync::Mutex::new(rx),
                queued: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                jobs_completed: AtomicU64::new(0),
                jobs_rejected: AtomicU64::new(0),
                next_worker_id: AtomicU64::new(0),
                workers: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Spawn the minimum number of workers. Must run inside a tokio runtime.
    pub fn start(&self) {
        let missing = self
            .shared
            .config
            .min_workers
            .saturating_sub(self.shared.workers().len());
        for _ in 0..missing {
            spawn_worker(&self.shared);
        }
        tracing::info!(
            workers = self.shared.workers().len(),
            queue_capacity = self.shared.config.queue_capacity,
            "Worker pool started"
        );
    }

    /// Reserve room for one job without waiting.
    ///
    /// The reservation counts as queued until it is used or dropped.
    pub fn try_reserve(&self) -> Result<QueueSlot<'_>, QueueFull> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
                Ok(QueueSlot {
                    permit: Some(permit),
                    queued: &self.shared.queued,
                })
            }
            Err(_) => {
                self.shared.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                Err(QueueFull)
            }
        }
    }

    /// Queue a job without waiting.
    pub fn try_submit(&self, job: Job) -> Result<(), QueueFull> {
        self.try_reserve().map(|slot| slot.submit(job))
    }

    pub fn stats(&self) -> PoolStats {
        stats(&self.shared)
    }

    /// Run the scaling controller until `shutdown_rx` flips to `true`.
    pub fn scaling_task(&self, shutdown_rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
        scaling_controller_task(Arc::clone(&self.shared), shutdown_rx)
    }

    /// Stop every worker after its current job and wait for them.
    ///
    /// The queue is then closed and jobs still in it are dropped, so later
    /// submissions fail and nothing waits on a job that will never run.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let slots: Vec<WorkerSlot> = self.shared.workers().drain(..).collect();
        let count = slots.len();
        for slot in slots {
            if let Err(e) = slot.handle.await {
                tracing::warn!(worker_id = slot.id, error = %e, "Worker task ended abnormally");
            }
        }

        let mut rx = self.shared.rx.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while let Ok(job) = rx.try_recv() {
            drop(job);
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        tracing::info!(workers = count, dropped_jobs = dropped, "Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn stats(shared: &PoolShared) -> PoolStats {
    PoolStats {
        workers: shared.workers().len(),
        busy: shared.busy.load(Ordering::SeqCst),
        queued: shared.queued.load(Ordering::SeqCst),
        queue_capacity: shared.config.queue_capacity,
        jobs_completed: shared.jobs_completed.load(Ordering::Relaxed),
        jobs_rejected: shared.jobs_rejected.load(Ordering::Relaxed),
    }
}

// ============================================================================
// WORKERS
// ============================================================================

fn spawn_worker(shared: &Arc<PoolShared>) {
    let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let retire = shared.shutdown.child_token();
    let busy = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(worker_loop(
        Arc::clone(shared),
        id,
        Arc::clone(&busy),
        retire.clone(),
    ));
    shared.workers().push(WorkerSlot {
        id,
        busy,
        retire,
        handle,
    });
    tracing::debug!(worker_id = id, "Worker spawned");
}

/// Retire the newest idle worker, or the newest worker when all are busy.
/// A busy worker exits once its current job finishes.
fn retire_worker(shared: &PoolShared) -> bool {
    let slot = {
        let mut workers = shared.workers();
        let idle = workers
            .iter()
            .rposition(|slot| !slot.busy.load(Ordering::SeqCst));
        idle.or_else(|| workers.len().checked_sub(1))
            .map(|index| workers.remove(index))
    };
    match slot {
        Some(slot) => {
            slot.retire.cancel();
            tracing::debug!(
                worker_id = slot.id,
                busy = slot.busy.load(Ordering::SeqCst),
                "Worker retired"
            );
            true
        }
        None => false,
    }
}

async fn worker_loop(
    shared: Arc<PoolShared>,
    id: u64,
    busy: Arc<AtomicBool>,
    retire: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = retire.cancelled() => break,
            job = async { shared.rx.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };

        shared.queued.fetch_sub(1, Ordering::SeqCst);
        busy.store(true, Ordering::SeqCst);
        shared.busy.fetch_add(1, Ordering::SeqCst);
        job.await;
        shared.busy.fetch_sub(1, Ordering::SeqCst);
        busy.store(false, Ordering::SeqCst);
        shared.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }
    tracing::debug!(worker_id = id, "Worker exited");
}

// ============================================================================
// SCALING CONTROLLER
// ============================================================================

/// Decision taken on one load sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Grow,
    Shrink,
    Hold,
}

/// Hysteresis state: a resize needs `consecutive_samples` in a row past a
/// watermark, and each resize restarts the count.
#[derive(Debug, Default, Clone)]
pub struct ScalingController {
    high_streak: u32,
    low_streak: u32,
}

impl ScalingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, stats: &PoolStats, config: &PoolConfig) -> ScaleDecision {
        let load = stats.load();
        if load > config.high_watermark {
            self.high_streak += 1;
            self.low_streak = 0;
        } else if load < config.low_watermark {
            self.low_streak += 1;
            self.high_streak = 0;
        } else {
            self.high_streak = 0;
            self.low_streak = 0;
        }

        let needed = config.consecutive_samples.max(1);
        if self.high_streak >= needed && stats.workers < config.max_workers {
            self.high_streak = 0;
            ScaleDecision::Grow
        } else if self.low_streak >= needed && stats.workers > config.min_workers {
            self.low_streak = 0;
            ScaleDecision::Shrink
        } else {
            ScaleDecision::Hold
        }
    }
}

async fn scaling_controller_task(shared: Arc<PoolShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut tick = interval(shared.config.scale_tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut controller = ScalingController::new();

    tracing::info!(
        tick_ms = shared.config.scale_tick.as_millis() as u64,
        min_workers = shared.config.min_workers,
        max_workers = shared.config.max_workers,
        "Scaling controller started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = tick.tick() => {
                let sample = stats(&shared);
                match controller.observe(&sample, &shared.config) {
                    ScaleDecision::Grow => {
                        spawn_worker(&shared);
                        tracing::info!(workers = sample.workers + 1, load = sample.load(), "Scaled worker pool up");
                    }
                    ScaleDecision::Shrink => {
                        if retire_worker(&shared) {
                            tracing::info!(workers = sample.workers - 1, load = sample.load(), "Scaled worker pool down");
                        }
                    }
                    ScaleDecision::Hold => {}
                }
            }
        }
    }

    tracing::info!("Scaling controller stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: usize, max: usize, queue: usize) -> PoolConfig {
        PoolConfig {
            min_workers: min,
            max_workers: max,
            queue_capacity: queue,
            scale_tick: Duration::from_millis(20),
            high_watermark: 0.8,
            low_watermark: 0.2,
            consecutive_samples: 2,
        }
    }

    fn sample(workers: usize, busy: usize, queued: usize) -> PoolStats {
        PoolStats {
            workers,
            busy,
            queued,
            queue_capacity: 10,
            jobs_completed: 0,
            jobs_rejected: 0,
        }
    }

    #[test]
    fn test_controller_grows_after_consecutive_high_samples() {
        let cfg = config(1, 4, 10);
        let mut controller = ScalingController::new();
        assert_eq!(controller.observe(&sample(2, 2, 3), &cfg), ScaleDecision::Hold);
        assert_eq!(controller.observe(&sample(2, 2, 3), &cfg), ScaleDecision::Grow);
        assert_eq!(controller.observe(&sample(3, 3, 3), &cfg), ScaleDecision::Hold);
    }

    #[test]
    fn test_controller_streak_resets_between_watermarks() {
        let cfg = config(1, 4, 10);
        let mut controller = ScalingController::new();
        controller.observe(&sample(2, 2, 3), &cfg);
        controller.observe(&sample(2, 1, 0), &cfg);
        assert_eq!(controller.observe(&sample(2, 2, 3), &cfg), ScaleDecision::Hold);
    }

    #[test]
    fn test_controller_respects_bounds() {
        let cfg = config(2, 2, 10);
        let mut controller = ScalingController::new();
        for _ in 0..5 {
            assert_eq!(controller.observe(&sample(2, 2, 10), &cfg), ScaleDecision::Hold);
        }
        for _ in 0..5 {
            assert_eq!(controller.observe(&sample(2, 0, 0), &cfg), ScaleDecision::Hold);
        }
    }

    #[test]
    fn test_controller_shrinks_when_idle() {
        let cfg = config(1, 4, 10);
        let mut controller = ScalingController::new();
        assert_eq!(controller.observe(&sample(3, 0, 0), &cfg), ScaleDecision::Hold);
        assert_eq!(controller.observe(&sample(3, 0, 0), &cfg), ScaleDecision::Shrink);
    }

    #[test]
    fn test_load_with_no_workers() {
        assert_eq!(sample(0, 0, 0).load(), 0.0);
        assert!(sample(0, 0, 1).load().is_infinite());
        assert_eq!(sample(4, 2, 2).load(), 1.0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let pool = WorkerPool::new(config(1, 1, 2));
        // Not started: nothing drains the queue.
        assert!(pool.try_submit(Box::pin(async {})).is_ok());
        assert!(pool.try_submit(Box::pin(async {})).is_ok());
        assert!(pool.try_submit(Box::pin(async {})).is_err());

        let stats = pool.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.jobs_rejected, 1);
    }

    #[tokio::test]
    async fn test_reservation_holds_capacity_until_dropped() {
        let pool = WorkerPool::new(config(1, 1, 1));
        let slot = pool.try_reserve();
        assert!(slot.is_ok());
        assert_eq!(pool.stats().queued, 1);
        assert!(pool.try_submit(Box::pin(async {})).is_err());

        drop(slot);
        assert_eq!(pool.stats().queued, 0);
        assert!(pool.try_submit(Box::pin(async {})).is_ok());
        assert_eq!(pool.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_workers_run_jobs_and_stop() {
        let pool = WorkerPool::new(config(2, 2, 8));
        pool.start();
        assert_eq!(pool.stats().workers, 2);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let job: Job = Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
            let _ = done_tx.send(());
        });
        assert!(pool.try_submit(job).is_ok());
        assert!(done_rx.await.is_ok());
        assert!(ran.load(Ordering::SeqCst));

        pool.shutdown().await;
        assert_eq!(pool.stats().workers, 0);
    }

    #[tokio::test]
    async fn test_scaling_task_grows_under_load() {
        let pool = WorkerPool::new(config(1, 3, 16));
        pool.start();

        let gate = CancellationToken::new();
        for _ in 0..6 {
            let gate = gate.clone();
            assert!(pool.try_submit(Box::pin(async move { gate.cancelled().await })).is_ok());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = tokio::spawn(pool.scaling_task(shutdown_rx));

        let mut grown = false;
        for _ in 0..100 {
            if pool.stats().workers == 3 {
                grown = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(grown, "pool should reach max_workers under load");

        gate.cancel();
        let _ = shutdown_tx.send(true);
        assert!(controller.await.is_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shrink_prefers_idle_worker() {
        let pool = WorkerPool::new(config(2, 2, 8));
        pool.start();

        let gate = CancellationToken::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let held = gate.clone();
        let job: Job = Box::pin(async move {
            let _ = started_tx.send(());
            held.cancelled().await;
        });
        assert!(pool.try_submit(job).is_ok());
        assert!(started_rx.await.is_ok());

        assert!(retire_worker(&pool.shared));
        {
            let workers = pool.shared.workers();
            assert_eq!(workers.len(), 1);
            assert!(workers[0].busy.load(Ordering::SeqCst), "the busy worker must survive");
        }

        gate.cancel();
        pool.shutdown().await;
        assert_eq!(pool.stats().jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_shrink_falls_back_to_newest_when_all_busy() {
        let pool = WorkerPool::new(config(1, 1, 8));
        pool.start();

        let gate = CancellationToken::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let held = gate.clone();
        let job: Job = Box::pin(async move {
            let _ = started_tx.send(());
            held.cancelled().await;
        });
        assert!(pool.try_submit(job).is_ok());
        assert!(started_rx.await.is_ok());

        assert!(retire_worker(&pool.shared));
        assert_eq!(pool.stats().workers, 0);
        assert!(!retire_worker(&pool.shared));
        gate.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drops_queued_jobs_and_closes_queue() {
        let pool = WorkerPool::new(config(1, 1, 4));
        // Not started: the job stays queued until shutdown.
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel::<()>();
        let job: Job = Box::pin(async move {
            let _ = reply_tx.send(());
        });
        assert!(pool.try_submit(job).is_ok());
        assert_eq!(pool.stats().queued, 1);

        pool.shutdown().await;

        assert!(reply_rx.await.is_err(), "queued job must be dropped unrun");
        assert_eq!(pool.stats().queued, 0);
        assert!(pool.try_submit(Box::pin(async {})).is_err());
    }
}
