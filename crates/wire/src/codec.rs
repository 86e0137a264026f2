// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing: 4-byte big-endian length prefix + JSON payload, read and
//! written over any `AsyncRead`/`AsyncWrite` (in practice a `UnixStream`
//! half).

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest message this codec will read; guards against a corrupt or
/// malicious length prefix driving an unbounded allocation.
pub const MAX_MESSAGE_LEN: usize = 64 << 20;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message length {0} exceeds max {MAX_MESSAGE_LEN}")]
    MessageTooLarge(usize),
}

/// Serialize `value` to JSON. Does not add the length prefix.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize `bytes` as JSON.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write `payload` prefixed with its big-endian u32 length.
pub async fn write_message<W: AsyncWrite + Unpin>(
    w: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }
    w.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one length-prefixed message.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read one message and decode it as a `Request`.
pub async fn read_request<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<crate::Request, ProtocolError> {
    let bytes = read_message(r).await?;
    decode(&bytes)
}

/// Encode `response` and write it length-prefixed.
pub async fn write_response<W: AsyncWrite + Unpin>(
    w: &mut W,
    response: &crate::Response,
) -> Result<(), ProtocolError> {
    let bytes = encode(response)?;
    write_message(w, &bytes).await
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
