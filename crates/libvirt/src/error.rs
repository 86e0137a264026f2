// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use lvp_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibvirtError {
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("disk already attached: {0}")]
    DiskAlreadyExists(String),

    #[error("disk not attached: {0}")]
    DiskNotFound(String),

    #[error("interface already attached: {0}")]
    InterfaceAlreadyExists(String),

    #[error("interface not attached: {0}")]
    InterfaceNotFound(String),

    #[error("secret not defined: {0}")]
    NoSecret(String),

    #[error("image still pulling: {0}")]
    ImagePulling(String),

    #[error("digest mismatch pulling {image_ref}: source {source} local {local}")]
    DigestMismatch { image_ref: String, source: String, local: String },

    #[error(transparent)]
    Plugin(#[from] lvp_plugins::PluginError),

    #[error("xml encode error: {0}")]
    XmlEncode(#[from] quick_xml::SeError),

    #[error("xml decode error: {0}")]
    XmlDecode(#[from] quick_xml::DeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    #[error("{0}")]
    Other(String),
}

impl From<LibvirtError> for CoreError {
    fn from(e: LibvirtError) -> Self {
        match e {
            LibvirtError::DomainNotFound(msg)
            | LibvirtError::DiskNotFound(msg)
            | LibvirtError::InterfaceNotFound(msg)
            | LibvirtError::NoSecret(msg) => CoreError::NotFound(msg),
            LibvirtError::DiskAlreadyExists(msg) | LibvirtError::InterfaceAlreadyExists(msg) => {
                CoreError::AlreadyExists(msg)
            }
            LibvirtError::ImagePulling(_) => CoreError::ImagePulling,
            other => CoreError::Internal(other.to_string()),
        }
    }
}

pub type LibvirtResult<T> = Result<T, LibvirtError>;
