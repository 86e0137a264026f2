// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine event records backed by the reconciler's event store (§3.1),
//! surfaced through the MRI `ListEvents` operation.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::id::{EventId, MachineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    Normal,
    Warning,
}

crate::simple_display! {
    EventType {
        Normal => "Normal",
        Warning => "Warning",
    }
}

/// Well-known event reasons emitted by the reconciler (§4.9). Kept
/// deliberately as the exact wire-visible strings from the spec, misspellings
/// included, because external consumers match on these reason strings.
pub mod reason {
    pub const PULLING_IMAGE: &str = "PullingImage";
    pub const PULLED_IMAGE: &str = "PulledImage";
    pub const NO_IGNITION_DATA: &str = "NoIgnitionData";
    pub const ATTCHED_VOLUME: &str = "AttchedVolume";
    pub const ATTCH_DETACH_VOLUME: &str = "AttchDetachVolume";
    pub const ATTCHED_NIC: &str = "AttchedNIC";
    pub const ATTCH_DETACH_NIC: &str = "AttchDetachNIC";
    pub const TRIGGERING_SHUTDOWN: &str = "TriggeringShutdown";
    pub const DESTROYED_DOMAIN: &str = "DestroyedDomain";
    pub const SIZE_CHANGED_VOLUME: &str = "SizeChangedVolume";
    pub const COMPLETED_DELETION: &str = "CompletedDeletion";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub machine_id: MachineId,
    pub time: SystemTime,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Event {
    pub fn normal(
        machine_id: MachineId,
        time: SystemTime,
        reason: &str,
        message: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            machine_id,
            time,
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
            labels,
        }
    }

    pub fn warning(
        machine_id: MachineId,
        time: SystemTime,
        reason: &str,
        message: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            machine_id,
            time,
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_event_carries_requested_reason_and_type() {
        let e = Event::warning(
            MachineId::new(),
            SystemTime::now(),
            reason::NO_IGNITION_DATA,
            "no ignition payload set",
            HashMap::new(),
        );
        assert_eq!(e.event_type, EventType::Warning);
        assert_eq!(e.reason, "NoIgnitionData");
    }
}
