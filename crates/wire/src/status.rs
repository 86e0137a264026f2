// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gRPC-like status codes (§4.10) mapped from [`lvp_core::CoreError`] by an
//! exhaustive match, never by string comparison.

use lvp_core::CoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
}

impl From<&CoreError> for StatusCode {
    fn from(e: &CoreError) -> Self {
        match e {
            CoreError::NotFound(_) => StatusCode::NotFound,
            CoreError::AlreadyExists(_) => StatusCode::AlreadyExists,
            CoreError::ResourceVersionNotLatest { .. } => StatusCode::FailedPrecondition,
            CoreError::InvalidRequest(_) => StatusCode::InvalidArgument,
            CoreError::ImagePulling => StatusCode::Unavailable,
            CoreError::Unavailable(_) => StatusCode::Unavailable,
            CoreError::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            CoreError::ResourceExhausted(_) => StatusCode::ResourceExhausted,
            CoreError::Internal(_) => StatusCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_version_conflict_maps_to_failed_precondition() {
        let e = CoreError::ResourceVersionNotLatest { expected: 1, actual: 2 };
        assert_eq!(StatusCode::from(&e), StatusCode::FailedPrecondition);
    }

    #[test]
    fn image_pulling_maps_to_unavailable() {
        assert_eq!(StatusCode::from(&CoreError::ImagePulling), StatusCode::Unavailable);
    }
}
