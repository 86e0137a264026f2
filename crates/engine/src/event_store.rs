// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Store: the reconciler's external record of what it did to each
//! Machine, surfaced through the MRI `ListEvents` operation (§4.9, §4.10).
//!
//! A mutex-guarded ring buffer per machine id, capacity-bounded and swept on
//! a tick — the same shared-state-behind-one-mutex-updated-on-an-interval
//! shape the teacher uses for its usage metrics collector.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lvp_core::{selector_matches, Event, MachineId, Selector};
use parking_lot::Mutex;
use tracing::debug;

/// Default per-machine ring buffer capacity.
pub const DEFAULT_MAX_EVENTS: usize = 100;
/// Default event retention before a sweep evicts it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default sweep tick interval.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Selection criteria for [`EventStore::list`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub selector: Selector,
    pub from: Option<SystemTime>,
    pub to: Option<SystemTime>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(from) = self.from {
            if event.time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.time > to {
                return false;
            }
        }
        selector_matches(&event.labels, &self.selector)
    }
}

struct Inner {
    by_machine: HashMap<MachineId, VecDeque<Event>>,
    max_events: usize,
    ttl: Duration,
}

impl Inner {
    fn push(&mut self, event: Event) {
        let buf = self.by_machine.entry(event.machine_id).or_default();
        if buf.len() >= self.max_events {
            buf.pop_front();
        }
        buf.push_back(event);
    }

    fn sweep(&mut self, now: SystemTime) {
        self.by_machine.retain(|_, buf| {
            buf.retain(|e| now.duration_since(e.time).unwrap_or_default() < self.ttl);
            !buf.is_empty()
        });
    }
}

/// Mutex-guarded, capacity-bounded, TTL-swept record of [`Event`]s (§3.1).
pub struct EventStore {
    inner: Mutex<Inner>,
}

impl EventStore {
    pub fn new(max_events: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { by_machine: HashMap::new(), max_events, ttl }),
        }
    }

    /// Append an event to its machine's ring buffer, evicting the oldest
    /// entry once `max_events` is reached.
    pub fn record(&self, event: Event) {
        self.inner.lock().push(event);
    }

    /// All recorded events for `machine_id` matching `filter`, oldest first.
    pub fn list_for_machine(&self, machine_id: &MachineId, filter: &EventFilter) -> Vec<Event> {
        self.inner
            .lock()
            .by_machine
            .get(machine_id)
            .into_iter()
            .flatten()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// All recorded events across every machine matching `filter`, oldest
    /// first within each machine's buffer.
    pub fn list(&self, filter: &EventFilter) -> Vec<Event> {
        self.inner
            .lock()
            .by_machine
            .values()
            .flatten()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Drop events older than `ttl`, and any machine left with an empty
    /// buffer. Called on each `machine_event_resync_interval` tick.
    pub fn sweep(&self, now: SystemTime) {
        self.inner.lock().sweep(now);
    }

    /// Spawn the periodic sweep loop; the returned handle should be aborted
    /// on shutdown alongside the reconciler's other background tasks.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let before: usize = this.inner.lock().by_machine.values().map(VecDeque::len).sum();
                this.sweep(SystemTime::now());
                let after: usize = this.inner.lock().by_machine.values().map(VecDeque::len).sum();
                if after < before {
                    debug!(evicted = before - after, "event store sweep evicted expired events");
                }
            }
        })
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvp_core::event::reason;
    use std::time::Duration;

    fn event(machine_id: MachineId, time: SystemTime, reason: &str) -> Event {
        Event::normal(machine_id, time, reason, "msg", HashMap::new())
    }

    #[test]
    fn ring_buffer_evicts_oldest_once_capacity_is_reached() {
        let store = EventStore::new(2, DEFAULT_TTL);
        let id = MachineId::new();
        let t0 = SystemTime::UNIX_EPOCH;
        store.record(event(id, t0, reason::PULLING_IMAGE));
        store.record(event(id, t0 + Duration::from_secs(1), reason::PULLED_IMAGE));
        store.record(event(id, t0 + Duration::from_secs(2), reason::ATTCHED_VOLUME));

        let all = store.list_for_machine(&id, &EventFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].reason, reason::PULLED_IMAGE);
        assert_eq!(all[1].reason, reason::ATTCHED_VOLUME);
    }

    #[test]
    fn sweep_drops_events_older_than_ttl() {
        let store = EventStore::new(DEFAULT_MAX_EVENTS, Duration::from_secs(10));
        let id = MachineId::new();
        let t0 = SystemTime::UNIX_EPOCH;
        store.record(event(id, t0, reason::PULLING_IMAGE));

        store.sweep(t0 + Duration::from_secs(20));
        assert!(store.list_for_machine(&id, &EventFilter::default()).is_empty());
    }

    #[test]
    fn filter_applies_time_window_and_selector() {
        let store = EventStore::default();
        let id = MachineId::new();
        let t0 = SystemTime::UNIX_EPOCH;
        let mut labeled = event(id, t0 + Duration::from_secs(5), reason::ATTCHED_NIC);
        labeled.labels.insert("class".to_string(), "standard".to_string());
        store.record(labeled);
        store.record(event(id, t0 + Duration::from_secs(100), reason::ATTCH_DETACH_NIC));

        let window = EventFilter {
            selector: Selector::new(),
            from: Some(t0),
            to: Some(t0 + Duration::from_secs(10)),
        };
        let results = store.list_for_machine(&id, &window);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].reason, reason::ATTCHED_NIC);

        let by_label = EventFilter {
            selector: Selector::from([("class".to_string(), "standard".to_string())]),
            ..Default::default()
        };
        assert_eq!(store.list_for_machine(&id, &by_label).len(), 1);

        let by_wrong_label = EventFilter {
            selector: Selector::from([("class".to_string(), "gpu".to_string())]),
            ..Default::default()
        };
        assert!(store.list_for_machine(&id, &by_wrong_label).is_empty());
    }

    #[test]
    fn list_spans_every_machine() {
        let store = EventStore::default();
        let a = MachineId::new();
        let b = MachineId::new();
        store.record(event(a, SystemTime::UNIX_EPOCH, reason::PULLING_IMAGE));
        store.record(event(b, SystemTime::UNIX_EPOCH, reason::PULLED_IMAGE));
        assert_eq!(store.list(&EventFilter::default()).len(), 2);
    }
}
