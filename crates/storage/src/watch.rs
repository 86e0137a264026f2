// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watch events emitted by the object store (§4.1), fanned out to
//! per-watcher bounded channels.

use tokio::sync::mpsc;

/// Depth of each watcher's channel before it is considered slow and
/// dropped (§4.1: "a slow watcher may be dropped and MUST be signalled by
/// closing its channel").
pub const WATCH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent<T> {
    pub event_type: WatchEventType,
    pub object: T,
}

/// The receiving half of a watch subscription. Dropping it unsubscribes.
pub struct Watch<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
}

impl<T> Watch<T> {
    pub fn new(rx: mpsc::Receiver<WatchEvent<T>>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }
}

/// Registry of active watchers for one object store instance. A send that
/// would block (buffer full) instead drops the watcher, closing its
/// channel, rather than backpressuring the writer that holds the store
/// lock.
pub struct WatchRegistry<T> {
    senders: Vec<mpsc::Sender<WatchEvent<T>>>,
}

impl<T: Clone> WatchRegistry<T> {
    pub fn new() -> Self {
        Self { senders: Vec::new() }
    }

    pub fn subscribe(&mut self) -> Watch<T> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        self.senders.push(tx);
        Watch::new(rx)
    }

    /// Broadcast an event to every live watcher, dropping any whose buffer
    /// is full or whose receiver has gone away.
    pub fn notify(&mut self, event_type: WatchEventType, object: &T) {
        self.senders.retain(|tx| {
            tx.try_send(WatchEvent { event_type, object: object.clone() }).is_ok()
        });
    }
}

impl<T: Clone> Default for WatchRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_delivers_to_every_subscriber() {
        let mut reg: WatchRegistry<u32> = WatchRegistry::new();
        let mut a = reg.subscribe();
        let mut b = reg.subscribe();

        reg.notify(WatchEventType::Created, &7);

        assert_eq!(a.recv().await.unwrap().object, 7);
        assert_eq!(b.recv().await.unwrap().object, 7);
    }

    #[tokio::test]
    async fn dropped_watcher_is_pruned_on_next_notify() {
        let mut reg: WatchRegistry<u32> = WatchRegistry::new();
        {
            let _watch = reg.subscribe();
        }
        assert_eq!(reg.senders.len(), 1);
        reg.notify(WatchEventType::Created, &1);
        assert_eq!(reg.senders.len(), 0);
    }
}
