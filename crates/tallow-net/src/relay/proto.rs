//! Relay control protocol
//!
//! A short postcard-encoded exchange before the relay degrades into a
//! dumb byte pump. The relay only ever sees the room code's BLAKE3 hash;
//! everything after binding is opaque peer traffic.

use crate::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a control message
const MAX_MESSAGE: usize = 4096;

/// Client-to-relay control messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRequest {
    /// Open a room; the caller becomes the creator and waits for a joiner
    CreateRoom {
        /// BLAKE3 of the room code
        code_hash: [u8; 32],
    },
    /// Join an existing room by code hash
    JoinRoom {
        /// BLAKE3 of the room code
        code_hash: [u8; 32],
    },
}

/// Relay-to-client control messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayResponse {
    /// Room created; wait for [`RelayResponse::PeerJoined`]
    RoomCreated,
    /// Joined; the pump starts immediately
    Joined,
    /// The second peer arrived; the pump starts now (sent to the creator)
    PeerJoined,
    /// This room lives on another shard
    Redirect {
        /// Address of the owning shard
        addr: String,
    },
    /// Request refused
    Error {
        /// Human-readable reason (never contains the room code)
        message: String,
    },
}

/// Write a length-prefixed control message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = postcard::to_stdvec(message)?;
    if body.len() > MAX_MESSAGE {
        return Err(NetworkError::Relay("control message too large".into()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed control message
pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_MESSAGE {
        return Err(NetworkError::Relay(format!(
            "control message of {} bytes exceeds cap",
            len
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(postcard::from_bytes(&body)?)
}
