//! Protocol definitions for client-server communication
//!
//! MessagePack payloads, each prefixed with its length as a big-endian u32.

mod message;

pub use message::{ClientMessage, Reply, Request, ServerMessage};

use anyhow::{anyhow, bail, Result};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame payload (1 MB); a poker table snapshot is far smaller
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol version mismatch: client={client}, server={server}")]
    VersionMismatch { client: u32, server: u32 },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u32, max: u32 },
}

/// Serialize a message to MessagePack bytes
pub fn serialize<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(msg)?)
}

/// Deserialize a message from MessagePack bytes
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| anyhow!(ProtocolError::MalformedMessage(e.to_string())))
}

/// Prefix a payload with its length
pub fn frame_message(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Check if client and server protocol versions are compatible
pub fn check_version_compatibility(client_version: u32, server_version: u32) -> Result<()> {
    if client_version != server_version {
        bail!(ProtocolError::VersionMismatch {
            client: client_version,
            server: server_version
        });
    }
    Ok(())
}

/// Read one frame; `None` on a clean end of stream
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];

    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_MESSAGE_SIZE {
        bail!(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE
        });
    }

    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}

/// Serialize, frame and flush one message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let framed = frame_message(&serialize(msg)?);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_survives_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
        };
        write_frame(&mut client, &msg).await.unwrap();
        drop(client);

        let bytes = read_frame(&mut server).await.unwrap().unwrap();
        let decoded: ClientMessage = deserialize(&bytes).unwrap();
        assert!(matches!(
            decoded,
            ClientMessage::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION
        ));
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_MESSAGE_SIZE + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_version_mismatch() {
        assert!(check_version_compatibility(1, 1).is_ok());
        let err = check_version_compatibility(2, 1).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }
}
