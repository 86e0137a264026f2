// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work Queue (C3): a deduplicating, rate-limited FIFO of Machine ids that
//! feeds the reconcile workers (§4.3).
//!
//! Modeled on the dedup-plus-rate-limiter shape common to reconciliation
//! queues: a FIFO of ready ids, a set of ids currently checked out by a
//! worker, and a "dirty while in flight" bit so an id added again during
//! processing is redelivered exactly once after `done`.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use lvp_core::MachineId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// First rate-limited retry delay.
const BASE_DELAY: Duration = Duration::from_millis(5);
/// Rate-limited retries never wait longer than this.
const MAX_DELAY: Duration = Duration::from_secs(1000);

struct RateLimiter {
    failures: u32,
}

impl RateLimiter {
    fn delay_for(failures: u32) -> Duration {
        BASE_DELAY.saturating_mul(1u32.checked_shl(failures).unwrap_or(u32::MAX)).min(MAX_DELAY)
    }
}

struct State {
    queue: VecDeque<MachineId>,
    queued: HashSet<MachineId>,
    processing: HashSet<MachineId>,
    dirty: HashSet<MachineId>,
    rate_limiters: std::collections::HashMap<MachineId, RateLimiter>,
    shutting_down: bool,
}

impl State {
    fn push_ready(&mut self, id: MachineId) {
        if self.processing.contains(&id) {
            self.dirty.insert(id);
            return;
        }
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }
}

/// Deduplicating, rate-limited FIFO of [`MachineId`]s (§4.3).
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                rate_limiters: std::collections::HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `id` immediately, unless it is already queued or currently
    /// being processed (in which case it is marked dirty for redelivery).
    pub fn add(&self, id: MachineId) {
        self.state.lock().push_ready(id);
        self.notify.notify_one();
    }

    /// Enqueue `id` after an exponential backoff delay keyed on its own
    /// failure count; the delay doubles on each call and resets via
    /// [`WorkQueue::forget`].
    pub async fn add_rate_limited(self: &std::sync::Arc<Self>, id: MachineId) {
        let delay = {
            let mut state = self.state.lock();
            let entry = state.rate_limiters.entry(id).or_insert(RateLimiter { failures: 0 });
            let delay = RateLimiter::delay_for(entry.failures);
            entry.failures = entry.failures.saturating_add(1);
            delay
        };

        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(Instant::now() + delay).await;
            this.add(id);
        });
    }

    /// Clear the rate-limit counter for `id`; call after a successful
    /// reconcile.
    pub fn forget(&self, id: &MachineId) {
        self.state.lock().rate_limiters.remove(id);
    }

    /// Block until an id is ready or the queue is shut down. A `true`
    /// second element means shut down; the caller should stop pulling.
    pub async fn get(&self) -> (Option<MachineId>, bool) {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(id) = state.queue.pop_front() {
                    state.queued.remove(&id);
                    state.processing.insert(id);
                    return (Some(id), false);
                }
                if state.shutting_down {
                    return (None, true);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Release `id` back from "processing"; if it was marked dirty while
    /// checked out, it is re-queued immediately.
    pub fn done(&self, id: &MachineId) {
        let mut state = self.state.lock();
        state.processing.remove(id);
        if state.dirty.remove(id) {
            state.push_ready(*id);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Unblock all waiters; subsequent `get` calls return `shutdown=true`
    /// once the queue drains.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(n: u128) -> MachineId {
        MachineId::from(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn add_then_get_returns_the_id_and_not_shut_down() {
        let q = WorkQueue::new();
        q.add(id(1));
        let (got, shutdown) = q.get().await;
        assert_eq!(got, Some(id(1)));
        assert!(!shutdown);
    }

    #[tokio::test]
    async fn adding_same_id_twice_before_get_does_not_duplicate() {
        let q = WorkQueue::new();
        q.add(id(1));
        q.add(id(1));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn adding_while_processing_marks_dirty_and_redelivers_after_done() {
        let q = WorkQueue::new();
        q.add(id(1));
        let (got, _) = q.get().await;
        assert_eq!(got, Some(id(1)));

        // Re-added while checked out: must not be immediately re-delivered.
        q.add(id(1));
        assert_eq!(q.len(), 0);

        q.done(&id(1));
        assert_eq!(q.len(), 1);
        let (got_again, _) = q.get().await;
        assert_eq!(got_again, Some(id(1)));
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_waiting_get() {
        let q = Arc::new(WorkQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        let (got, shutdown) = waiter.await.unwrap();
        assert_eq!(got, None);
        assert!(shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn add_rate_limited_delays_and_doubles_on_repeat_calls() {
        let q = Arc::new(WorkQueue::new());
        q.add_rate_limited(id(1)).await;
        assert!(q.is_empty());
        tokio::time::advance(BASE_DELAY).await;
        tokio::task::yield_now().await;
        assert_eq!(q.len(), 1);

        let (got, _) = q.get().await;
        assert_eq!(got, Some(id(1)));
        q.done(&id(1));

        q.add_rate_limited(id(1)).await;
        tokio::time::advance(BASE_DELAY).await;
        tokio::task::yield_now().await;
        assert!(q.is_empty(), "second failure should wait longer than the first delay");
    }

    #[test]
    fn forget_resets_the_backoff_counter() {
        let q = WorkQueue::new();
        {
            let mut state = q.state.lock();
            state.rate_limiters.insert(id(1), RateLimiter { failures: 3 });
        }
        q.forget(&id(1));
        assert!(q.state.lock().rate_limiters.get(&id(1)).is_none());
    }
}
