//! In-flight coalescing: at most one computation per cache key.
//!
//! The first request for a key becomes the leader and gets an
//! [`InFlightGuard`], which travels with the computation. Every request,
//! leader included, waits on a [`Waiter`]. The guard publishes exactly once;
//! dropping it unpublished releases waiters with `Cancelled`.
//!
//! A computation belongs to its waiters, not to the request that started it.
//! When the last waiter goes away before the outcome is published, the key is
//! released and the computation's cancellation token fires.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use strata_core::DispatchError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Result shared between a leader and its followers.
pub type Outcome = Result<Value, DispatchError>;

struct Slot {
    tx: watch::Sender<Option<Outcome>>,
    /// Fires when every waiter has gone.
    cancel: CancellationToken,
}

/// Marker table keyed by cache key.
#[derive(Default)]
pub struct InFlightTable {
    entries: DashMap<String, Arc<Slot>>,
}

impl std::fmt::Debug for InFlightTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTable")
            .field("keys", &self.entries.len())
            .finish()
    }
}

/// What a caller got when claiming a key.
pub enum Claim {
    /// No computation was running; the caller must start one and hand it the guard.
    Leader(InFlightGuard, Waiter),
    /// A computation is running; wait on it.
    Follower(Waiter),
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(self: &Arc<Self>, key: &str) -> Claim {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                let slot = Arc::clone(existing.get());
                Claim::Follower(Waiter::new(self, key, slot))
            }
            Entry::Vacant(vacant) => {
                let (tx, _rx) = watch::channel(None);
                let slot = Arc::new(Slot {
                    tx,
                    cancel: CancellationToken::new(),
                });
                vacant.insert(Arc::clone(&slot));
                let waiter = Waiter::new(self, key, Arc::clone(&slot));
                Claim::Leader(
                    InFlightGuard {
                        table: Arc::clone(self),
                        key: key.to_string(),
                        slot,
                        published: false,
                    },
                    waiter,
                )
            }
        }
    }

    /// Keys with a computation currently running.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release(&self, key: &str, slot: &Arc<Slot>) {
        self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Release the key and cancel its computation if nobody waits on it.
    fn abandon(&self, key: &str, slot: &Arc<Slot>) {
        let removed = self.entries.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot) && slot.tx.receiver_count() == 0
        });
        if removed.is_some() {
            slot.cancel.cancel();
            tracing::debug!(key = %key, "In-flight computation abandoned by all waiters");
        }
    }
}

/// Owned by the computation for one key.
pub struct InFlightGuard {
    table: Arc<InFlightTable>,
    key: String,
    slot: Arc<Slot>,
    published: bool,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Requests currently waiting on this computation.
    pub fn waiter_count(&self) -> usize {
        self.slot.tx.receiver_count()
    }

    /// Cancelled once every waiter has gone.
    pub fn cancellation(&self) -> CancellationToken {
        self.slot.cancel.clone()
    }

    /// Release the marker and hand `outcome` to every waiter.
    pub fn publish(mut self, outcome: Outcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome) {
        if self.published {
            return;
        }
        self.published = true;
        self.table.release(&self.key, &self.slot);
        self.slot.tx.send_replace(Some(outcome));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.published {
            let action = self.key.split(':').next().unwrap_or_default().to_string();
            self.finish(Err(DispatchError::Cancelled { action }));
        }
    }
}

/// One request's interest in a computation. Dropping it before the outcome
/// arrives withdraws that interest.
pub struct Waiter {
    table: Arc<InFlightTable>,
    key: String,
    slot: Arc<Slot>,
    rx: Option<watch::Receiver<Option<Outcome>>>,
}

impl Waiter {
    fn new(table: &Arc<InFlightTable>, key: &str, slot: Arc<Slot>) -> Self {
        let rx = slot.tx.subscribe();
        Self {
            table: Arc::clone(table),
            key: key.to_string(),
            slot,
            rx: Some(rx),
        }
    }

    /// Wait for the published outcome.
    pub async fn outcome(&mut self, action: &str) -> Outcome {
        let cancelled = || {
            Err(DispatchError::Cancelled {
                action: action.to_string(),
            })
        };
        let Some(rx) = self.rx.as_mut() else {
            return cancelled();
        };
        match rx.wait_for(Option::is_some).await {
            Ok(published) => (*published).clone().unwrap_or_else(cancelled),
            Err(_) => cancelled(),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        drop(self.rx.take());
        self.table.abandon(&self.key, &self.slot);
    }
}
