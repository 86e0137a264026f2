// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no volume plugin supports spec {0:?}")]
    NoPluginFor(String),

    #[error("{0} volume plugins support spec {1:?}, expected exactly one")]
    AmbiguousPlugin(usize, String),

    #[error("unknown network interface driver: {0}")]
    UnknownNetworkDriver(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<PluginError> for lvp_core::CoreError {
    fn from(e: PluginError) -> Self {
        lvp_core::CoreError::Internal(e.to_string())
    }
}
