//! # Stream Framing
//!
//! TCP delivers a byte stream, not messages. [`PacketFramer`] cuts that
//! stream into whole top-level messages using the length carried in the
//! header, so that each frame can be handed to [`Schema::decode_top_level`].
//!
//! A front guard mismatch means the stream is desynchronised. The framer
//! reports it as an error and the caller is expected to drop the connection;
//! there is no resynchronisation attempt.
//!
//! [`Schema::decode_top_level`]: crate::core::Schema::decode_top_level

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::core::schema::{FRONT_GUARD_BYTE, HEADER_LEN, REAR_GUARD_BYTE};
use crate::error::{CoreError, DecodeError, Result};

/// Splits a byte stream into top-level frames. Frames keep their header.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFramer;

impl PacketFramer {
    /// Smallest possible frame: header, one flag byte, rear guard.
    pub const MIN_FRAME: usize = HEADER_LEN + 1 + 1;
}

impl Decoder for PacketFramer {
    type Item = BytesMut;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if src.len() < 3 {
            return Ok(None);
        }
        if src[0] != FRONT_GUARD_BYTE {
            debug!(byte = src[0], "Stream desynchronised");
            return Err(CoreError::Decode(DecodeError::BadGuard));
        }
        let declared = u16::from_le_bytes([src[1], src[2]]) as usize;
        if declared < Self::MIN_FRAME {
            return Err(CoreError::Decode(DecodeError::BadLength));
        }
        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }
        if src[declared - 1] != REAR_GUARD_BYTE {
            debug!(len = declared, "Rear guard mismatch");
            return Err(CoreError::Decode(DecodeError::BadGuard));
        }
        Ok(Some(src.split_to(declared)))
    }
}

impl Encoder<Bytes> for PacketFramer {
    type Error = CoreError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len());
        dst.put(item);
        Ok(())
    }
}

impl Encoder<&[u8]> for PacketFramer {
    type Error = CoreError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(item);
        Ok(())
    }
}

/// Drain every complete frame currently buffered in `src`.
///
/// Returns an error on the first desynchronised frame; frames already
/// pushed to `out` stay valid.
pub fn drain_frames(src: &mut BytesMut, out: &mut Vec<BytesMut>) -> Result<usize> {
    let mut framer = PacketFramer;
    let before = out.len();
    while let Some(frame) = framer.decode(src)? {
        out.push(frame);
    }
    Ok(out.len() - before)
}
