// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small DTOs shared by response variants that are not part of the core
//! data model itself.

use serde::{Deserialize, Serialize};

/// One advertised machine class and its (currently unbounded) capacity, as
/// returned by `Status()` (§4.10.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineClassInfo {
    pub name: String,
    pub cpu: u32,
    pub memory_bytes: u64,
    /// `None` means capacity accounting is not wired up (§4.10.2); a real
    /// host-resources collaborator would populate this.
    #[serde(default)]
    pub capacity: Option<u32>,
}

/// A one-shot console connection handle returned by `Exec` (§4.10, out of
/// scope: the actual console byte stream).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecHandle {
    pub url: String,
    pub token: String,
}
