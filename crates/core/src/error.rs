// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the object store, plugins, and the reconciler.
//!
//! This is the single closed vocabulary every crate in the workspace maps
//! its own errors into at its boundary; `lvp-wire` turns a [`CoreError`] into
//! a wire status code by matching variants, never by string comparison.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("resource version conflict: expected {expected}, store has {actual}")]
    ResourceVersionNotLatest { expected: u64, actual: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient, expected: the image referenced by the machine is still
    /// being pulled. Suppressed by the reconciler and retried after
    /// `pull_done` rather than surfaced as a failure.
    #[error("image still pulling")]
    ImagePulling,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {e}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
