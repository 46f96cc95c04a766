// src/forward/codec.rs

//! Encoder for RTSP interleaved binary frames (`$`, channel, u16 length, payload).

use crate::core::RelayError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

const FRAME_MAGIC: u8 = b'$';
const HEADER_LEN: usize = 4;

/// One media packet addressed to an interleaved channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

impl InterleavedFrame {
    /// RTP packets of track `n` travel on channel `2n`; `2n + 1` is left to RTCP.
    pub fn rtp(track: usize, payload: Bytes) -> Result<Self, RelayError> {
        let channel = track
            .checked_mul(2)
            .and_then(|c| u8::try_from(c).ok())
            .ok_or_else(|| RelayError::Forward(format!("track {track} has no interleaved channel")))?;
        Ok(Self { channel, payload })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InterleavedCodec;

impl Encoder<InterleavedFrame> for InterleavedCodec {
    type Error = RelayError;

    fn encode(&mut self, item: InterleavedFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = u16::try_from(item.payload.len()).map_err(|_| {
            RelayError::Forward(format!(
                "payload of {} bytes does not fit an interleaved frame",
                item.payload.len()
            ))
        })?;
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(FRAME_MAGIC);
        dst.put_u8(item.channel);
        dst.put_u16(len);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
