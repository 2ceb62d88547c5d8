//! Tokio codec framing [`Packet`]s over a byte stream.
//!
//! Decoding rejects a foreign magic as soon as eight bytes are buffered and an
//! oversized `data_size` as soon as the header is complete, so neither ever
//! causes the payload to be buffered.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::buffer::ByteBuffer;
use crate::core::packet::{Header, Packet, HEADER_SIZE, MAGIC_LENGTH};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::AUTH_TAG_LENGTH;

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload: usize,
}

impl PacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < MAGIC_LENGTH {
            return Ok(None);
        }
        Header::check_magic(src)?;
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let data_size = Header::peek_data_size(src)?;
        if data_size > self.max_payload as u64 {
            return Err(ProtocolError::OversizedPacket(data_size as usize));
        }
        let data_size = data_size as usize;

        let frame_len = HEADER_SIZE + data_size + AUTH_TAG_LENGTH;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let header = frame.split_to(HEADER_SIZE);
        let payload = frame.split_to(data_size);
        let mut auth_tag = [0u8; AUTH_TAG_LENGTH];
        frame.copy_to_slice(&mut auth_tag);

        Packet::open(&header, ByteBuffer::from(payload), auth_tag).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload {
            return Err(ProtocolError::OversizedPacket(item.payload.len()));
        }
        item.write_into(dst);
        Ok(())
    }
}
