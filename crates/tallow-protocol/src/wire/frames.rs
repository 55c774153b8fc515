//! Frame types and their byte layouts
//!
//! Handshake frame:
//! ```text
//! [1 byte version][1 byte kind][2 bytes payload length][payload]
//! ```
//!
//! Chunk frame:
//! ```text
//! [8 bytes chunk index][12 bytes nonce][4 bytes ciphertext length]
//! [ciphertext][16 bytes auth tag]
//! ```
//!
//! Control frames are postcard-encoded behind a 4-byte length prefix; they
//! never leave the encrypted channel, so their encoding may evolve freely.

use crate::error::{ProtocolError, Result};
use crate::WIRE_VERSION;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// AEAD tag length on the wire
pub const TAG_LEN: usize = 16;

/// Maximum handshake payload (u16 length field)
pub const MAX_HANDSHAKE_PAYLOAD: usize = u16::MAX as usize;

/// Maximum chunk ciphertext (covers the largest chunk tier plus overhead)
pub const MAX_CHUNK_CIPHERTEXT: usize = 1024 * 1024;

/// Maximum encoded control frame
pub const MAX_CONTROL_FRAME: usize = 4 * 1024 * 1024;

/// Handshake message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeKind {
    /// Version and session nonce exchange
    Hello = 0,
    /// Hybrid KEM ciphertext (PAKE-encrypted)
    KemCiphertext = 1,
    /// PAKE public message
    PakeMsg = 2,
    /// Handshake completion
    Ready = 3,
}

impl HandshakeKind {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Hello),
            1 => Ok(Self::KemCiphertext),
            2 => Ok(Self::PakeMsg),
            3 => Ok(Self::Ready),
            other => Err(ProtocolError::MalformedFrame(format!(
                "unknown handshake kind {}",
                other
            ))),
        }
    }
}

/// A handshake frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    /// Message kind
    pub kind: HandshakeKind,
    /// Opaque payload (kind-specific)
    pub payload: Vec<u8>,
}

impl HandshakeFrame {
    /// Construct a frame, rejecting oversize payloads
    pub fn new(kind: HandshakeKind, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_HANDSHAKE_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_HANDSHAKE_PAYLOAD,
            });
        }
        Ok(Self { kind, payload })
    }

    /// Encode into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    /// Decode from a buffer; returns None if more bytes are needed
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let version = buf[0];
        if version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = HandshakeKind::from_byte(buf[1])?;
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        let payload = buf.split_to(len).to_vec();
        Ok(Some(Self { kind, payload }))
    }
}

/// An encrypted chunk frame
///
/// `ciphertext` holds the AEAD output including the trailing 16-byte tag;
/// the wire length field counts the ciphertext without the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    /// Chunk index within the transfer
    pub index: u64,
    /// The counter nonce used to seal this chunk
    pub nonce: [u8; 12],
    /// AEAD output: ciphertext followed by the tag
    pub ciphertext: Vec<u8>,
}

impl ChunkFrame {
    /// Encoded size of this frame
    pub fn encoded_len(&self) -> usize {
        8 + 12 + 4 + self.ciphertext.len()
    }

    /// Encode into a buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if self.ciphertext.len() < TAG_LEN {
            return Err(ProtocolError::MalformedFrame(
                "chunk ciphertext shorter than tag".into(),
            ));
        }
        let ct_len = self.ciphertext.len() - TAG_LEN;
        if ct_len > MAX_CHUNK_CIPHERTEXT {
            return Err(ProtocolError::FrameTooLarge {
                size: ct_len,
                max: MAX_CHUNK_CIPHERTEXT,
            });
        }
        buf.put_u64(self.index);
        buf.put_slice(&self.nonce);
        buf.put_u32(ct_len as u32);
        buf.put_slice(&self.ciphertext[..ct_len]);
        buf.put_slice(&self.ciphertext[ct_len..]);
        Ok(())
    }

    /// Decode from a buffer; returns None if more bytes are needed
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        const HEADER: usize = 8 + 12 + 4;
        if buf.len() < HEADER {
            return Ok(None);
        }
        let ct_len = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]) as usize;
        if ct_len > MAX_CHUNK_CIPHERTEXT {
            return Err(ProtocolError::FrameTooLarge {
                size: ct_len,
                max: MAX_CHUNK_CIPHERTEXT,
            });
        }
        if buf.len() < HEADER + ct_len + TAG_LEN {
            return Ok(None);
        }
        let index = u64::from_be_bytes(buf[..8].try_into().expect("8 bytes"));
        let nonce: [u8; 12] = buf[8..20].try_into().expect("12 bytes");
        buf.advance(HEADER);
        let ciphertext = buf.split_to(ct_len + TAG_LEN).to_vec();
        Ok(Some(Self {
            index,
            nonce,
            ciphertext,
        }))
    }
}

/// Control messages, multiplexed on channel 0
///
/// A closed enum on purpose: every variant must be handled exhaustively,
/// and unknown message types cannot exist past the decode boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlFrame {
    /// Offer a transfer: the manifest the receiver needs to accept
    Offer {
        /// 128-bit transfer id
        transfer_id: [u8; 16],
        /// Filename sealed under the session's filename key
        file_name_ciphertext: Vec<u8>,
        /// File size in bytes
        file_size: u64,
        /// Chunk size in bytes (fixed for this transfer)
        chunk_size: u32,
        /// Total number of chunks
        total_chunks: u64,
        /// BLAKE3 of every chunk plaintext, in order
        chunk_hashes: Vec<[u8; 32]>,
        /// Root over the chunk hashes
        merkle_root: [u8; 32],
    },
    /// Accept an offered transfer, optionally resuming
    Accept {
        /// Transfer id being accepted
        transfer_id: [u8; 16],
        /// Receiver's bitmap when resuming a partial transfer
        have_bitmap: Option<Vec<u8>>,
    },
    /// Pause the transfer (user action or transport loss)
    Pause {
        /// Transfer id
        transfer_id: [u8; 16],
    },
    /// Resume a paused transfer
    Resume {
        /// Transfer id
        transfer_id: [u8; 16],
    },
    /// Receiver's current acknowledgement bitmap
    BitmapSync {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Packed bitmap, bit per chunk
        bitmap: Vec<u8>,
    },
    /// Request retransmission of specific chunks
    ResendRequest {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Indices needing retransmission
        indices: Vec<u64>,
    },
    /// Receiver-driven flow-control window update
    WindowUpdate {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Chunks the receiver is ready to absorb
        window: u32,
    },
    /// Coordinated chunk-size change, effective at a chunk boundary
    ChunkSizeChange {
        /// Transfer id
        transfer_id: [u8; 16],
        /// New chunk size in bytes
        chunk_size: u32,
        /// First chunk index the new size applies to
        effective_index: u64,
    },
    /// Receiver's delta-sync block signatures for a repeated transfer
    DeltaSignatures {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Block size the signatures were computed over
        block_size: u32,
        /// Serialized signature list
        signatures: Vec<u8>,
    },
    /// Sender's reply: which blocks will be retransmitted
    DeltaPlan {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Block indices that differ and will be sent
        changed_blocks: Vec<u64>,
    },
    /// Sender finished; receiver verifies the root and closes
    Complete {
        /// Transfer id
        transfer_id: [u8; 16],
        /// Sender's root for final verification
        merkle_root: [u8; 32],
    },
    /// Explicit cancel from either side
    Cancel {
        /// Transfer id
        transfer_id: [u8; 16],
    },
}

impl ControlFrame {
    /// Encode behind a 4-byte length prefix
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let body = postcard::to_stdvec(self)?;
        if body.len() > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_CONTROL_FRAME,
            });
        }
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(())
    }

    /// Decode from a buffer; returns None if more bytes are needed
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_CONTROL_FRAME,
            });
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        let body = buf.split_to(len);
        Ok(Some(postcard::from_bytes(&body)?))
    }
}

/// Any frame travelling over a peer channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake frame (plaintext layer; payloads themselves are sealed)
    Handshake(HandshakeFrame),
    /// Encrypted chunk frame
    Chunk(ChunkFrame),
    /// Control frame
    Control(ControlFrame),
    /// Opaque signaling envelope bytes (JSON, sealed end to end)
    Signal(Vec<u8>),
    /// A ratchet-sealed frame: control traffic the transport never sees
    /// in the clear
    Secure {
        /// Serialized ratchet header
        header: Vec<u8>,
        /// Ratchet ciphertext
        ciphertext: Vec<u8>,
    },
}

impl Frame {
    /// Encode a signaling payload behind a 4-byte length prefix
    pub(crate) fn encode_signal(bytes: &[u8], buf: &mut BytesMut) -> Result<()> {
        if bytes.len() > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_CONTROL_FRAME,
            });
        }
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(bytes);
        Ok(())
    }

    /// Encode a secure frame: `[u16 header len][header][u32 ct len][ct]`
    pub(crate) fn encode_secure(
        header: &[u8],
        ciphertext: &[u8],
        buf: &mut BytesMut,
    ) -> Result<()> {
        if header.len() > u16::MAX as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: header.len(),
                max: u16::MAX as usize,
            });
        }
        if ciphertext.len() > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: ciphertext.len(),
                max: MAX_CONTROL_FRAME,
            });
        }
        buf.put_u16(header.len() as u16);
        buf.put_slice(header);
        buf.put_u32(ciphertext.len() as u32);
        buf.put_slice(ciphertext);
        Ok(())
    }

    /// Decode a secure frame; returns None if more bytes are needed
    pub(crate) fn decode_secure(buf: &mut BytesMut) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let header_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < 2 + header_len + 4 {
            return Ok(None);
        }
        let ct_len = u32::from_be_bytes([
            buf[2 + header_len],
            buf[3 + header_len],
            buf[4 + header_len],
            buf[5 + header_len],
        ]) as usize;
        if ct_len > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: ct_len,
                max: MAX_CONTROL_FRAME,
            });
        }
        if buf.len() < 2 + header_len + 4 + ct_len {
            return Ok(None);
        }
        buf.advance(2);
        let header = buf.split_to(header_len).to_vec();
        buf.advance(4);
        let ciphertext = buf.split_to(ct_len).to_vec();
        Ok(Some((header, ciphertext)))
    }

    /// Decode a signaling payload; returns None if more bytes are needed
    pub(crate) fn decode_signal(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_CONTROL_FRAME {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_CONTROL_FRAME,
            });
        }
        if buf.len() < 4 + len {
            return Ok(None);
        }
        buf.advance(4);
        Ok(Some(buf.split_to(len).to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_roundtrip() {
        let frame = HandshakeFrame::new(HandshakeKind::PakeMsg, vec![1, 2, 3]).unwrap();
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let decoded = HandshakeFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_handshake_partial_input() {
        let frame = HandshakeFrame::new(HandshakeKind::Hello, vec![0u8; 100]).unwrap();
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut partial = BytesMut::from(&buf[..50]);
        assert!(HandshakeFrame::decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_handshake_rejects_bad_version() {
        let mut buf = BytesMut::new();
        buf.put_u8(99);
        buf.put_u8(0);
        buf.put_u16(0);
        assert!(matches!(
            HandshakeFrame::decode(&mut buf),
            Err(ProtocolError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_chunk_frame_layout() {
        let frame = ChunkFrame {
            index: 7,
            nonce: [9u8; 12],
            ciphertext: vec![0xAA; 48 + TAG_LEN],
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();

        // [8 index][12 nonce][4 len][ct][16 tag]
        assert_eq!(buf.len(), 8 + 12 + 4 + 48 + 16);
        assert_eq!(u64::from_be_bytes(buf[..8].try_into().unwrap()), 7);
        assert_eq!(
            u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            48 // ciphertext length excludes the tag
        );

        let decoded = ChunkFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_chunk_frame_partial_input() {
        let frame = ChunkFrame {
            index: 1,
            nonce: [0u8; 12],
            ciphertext: vec![1u8; 64],
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let mut partial = BytesMut::from(&buf[..30]);
        assert!(ChunkFrame::decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_control_roundtrip() {
        let frame = ControlFrame::ResendRequest {
            transfer_id: [3u8; 16],
            indices: vec![4, 8, 15, 16, 23, 42],
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let decoded = ControlFrame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_chunk_rejects_undersize_ciphertext() {
        let frame = ChunkFrame {
            index: 0,
            nonce: [0u8; 12],
            ciphertext: vec![1u8; 8],
        };
        let mut buf = BytesMut::new();
        assert!(frame.encode(&mut buf).is_err());
    }
}
