//! Stream codec multiplexing frame types over one byte stream
//!
//! Each frame is preceded by a single type byte; the frame body carries
//! its own length information. Implements the tokio-util codec traits so
//! a `Framed` transport can read/write [`Frame`] values directly.

use crate::error::ProtocolError;
use crate::wire::frames::{ChunkFrame, ControlFrame, Frame, HandshakeFrame};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Type byte for handshake frames
const TYPE_HANDSHAKE: u8 = 0;
/// Type byte for chunk frames
const TYPE_CHUNK: u8 = 1;
/// Type byte for control frames
const TYPE_CONTROL: u8 = 2;
/// Type byte for signaling envelopes
const TYPE_SIGNAL: u8 = 3;
/// Type byte for ratchet-sealed frames
const TYPE_SECURE: u8 = 4;

/// Frame codec for peer channels
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            Frame::Handshake(f) => {
                buf.put_u8(TYPE_HANDSHAKE);
                f.encode(buf);
            }
            Frame::Chunk(f) => {
                buf.put_u8(TYPE_CHUNK);
                f.encode(buf)?;
            }
            Frame::Control(f) => {
                buf.put_u8(TYPE_CONTROL);
                f.encode(buf)?;
            }
            Frame::Signal(bytes) => {
                buf.put_u8(TYPE_SIGNAL);
                Frame::encode_signal(&bytes, buf)?;
            }
            Frame::Secure { header, ciphertext } => {
                buf.put_u8(TYPE_SECURE);
                Frame::encode_secure(&header, &ciphertext, buf)?;
            }
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // Peek the type byte, but only consume it together with a full body
        let frame_type = buf[0];
        let mut body = buf.clone();
        body.advance(1);

        let decoded = match frame_type {
            TYPE_HANDSHAKE => HandshakeFrame::decode(&mut body)?.map(Frame::Handshake),
            TYPE_CHUNK => ChunkFrame::decode(&mut body)?.map(Frame::Chunk),
            TYPE_CONTROL => ControlFrame::decode(&mut body)?.map(Frame::Control),
            TYPE_SIGNAL => Frame::decode_signal(&mut body)?.map(Frame::Signal),
            TYPE_SECURE => Frame::decode_secure(&mut body)?
                .map(|(header, ciphertext)| Frame::Secure { header, ciphertext }),
            other => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "unknown frame type {}",
                    other
                )))
            }
        };

        match decoded {
            Some(frame) => {
                let consumed = buf.len() - body.len();
                buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}
