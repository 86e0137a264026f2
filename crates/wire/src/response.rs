// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Responses the MRI server returns (§4.10).

use lvp_core::{Event, Machine};
use serde::{Deserialize, Serialize};

use crate::status::StatusCode;
use crate::types::{ExecHandle, MachineClassInfo};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success for operations that only mutate spec and let the
    /// reconciler converge (power/annotation/volume/NIC updates).
    Ok,

    Version {
        version: String,
    },

    Machine {
        machine: Box<Machine>,
    },

    Machines {
        machines: Vec<Machine>,
    },

    Deleted,

    Events {
        events: Vec<Event>,
    },

    Exec {
        handle: ExecHandle,
    },

    Status {
        classes: Vec<MachineClassInfo>,
    },

    Error {
        code: StatusCode,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_round_trips_through_json() {
        let resp = Response::Error { code: StatusCode::NotFound, message: "no such machine".into() };
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, back);
    }
}
