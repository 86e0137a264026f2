// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lvp-engine: the Machine Reconciler (C9) and its supporting Work Queue
//! (C3) and Event Store, wiring `lvp-storage`, `lvp-plugins`, and
//! `lvp-libvirt` into one controller loop.

mod event_store;
mod queue;
mod reconciler;

pub use event_store::{EventFilter, EventStore, DEFAULT_MAX_EVENTS, DEFAULT_RESYNC_INTERVAL, DEFAULT_TTL};
pub use queue::WorkQueue;
pub use reconciler::{
    Reconciler, ReconcilerConfig, DEFAULT_GC_GRACE, DEFAULT_RESYNC_INTERVAL_GC, DEFAULT_RESYNC_INTERVAL_VOLUME_SIZE,
    DEFAULT_WORKER_COUNT,
};
