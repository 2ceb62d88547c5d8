//! # Packet Framing
//!
//! A packet is a fixed 73-byte header, `data_size` payload bytes and a 32-byte
//! auth tag. All integers are big-endian.
//!
//! ```text
//! [magic(8)] [command(4)] [payload_type(1)] [data_size(8)]
//! [session_token(32)] [nonce(8)] [init_vector(12)]
//! [payload(data_size)] [auth_tag(32)]
//! ```
//!
//! A [`Packet`] exists in two states. [`Packet::encode`] yields the *sealed*
//! form that goes on the wire: with a session the payload is AES-GCM
//! ciphertext and the tag is an HMAC over header and ciphertext. The decode
//! paths ([`Packet::open`], [`Packet::from_bytes`]) verify and decrypt, and
//! yield the *opened* form whose payload is plaintext and whose `data_size`
//! is the plaintext length. Without a session both forms are identical and
//! the tag is all zero.
//!
//! Verification order: magic first (an incompatible peer is rejected before
//! anything else is interpreted), then the HMAC over the raw header bytes,
//! then the remaining header fields, then decryption.

use bytes::{Buf, BufMut, BytesMut};

use crate::config::{MAGIC, MAX_PAYLOAD_SIZE};
use crate::core::buffer::ByteBuffer;
use crate::core::serialization::{PayloadType, WirePayload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::command::Command;
use crate::utils::crypto::{
    is_no_session, Crypto, SessionToken, AUTH_TAG_LENGTH, IV_LENGTH, NO_SESSION,
    SESSION_TOKEN_LENGTH,
};

/// Size of the magic field, checked before the rest of the header is read
pub const MAGIC_LENGTH: usize = 8;

/// Size of the fixed header
pub const HEADER_SIZE: usize = MAGIC_LENGTH + 4 + 1 + 8 + SESSION_TOKEN_LENGTH + 8 + IV_LENGTH;

const DATA_SIZE_OFFSET: usize = MAGIC_LENGTH + 4 + 1;
const TOKEN_OFFSET: usize = DATA_SIZE_OFFSET + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: i64,
    pub command: Command,
    pub payload_type: PayloadType,
    pub data_size: u64,
    pub session_token: SessionToken,
    pub nonce: u64,
    pub init_vector: [u8; IV_LENGTH],
}

impl Header {
    pub fn new(
        command: Command,
        payload_type: PayloadType,
        session_token: SessionToken,
        nonce: u64,
    ) -> Self {
        Self {
            magic: MAGIC,
            command,
            payload_type,
            data_size: 0,
            session_token,
            nonce,
            init_vector: [0u8; IV_LENGTH],
        }
    }

    pub fn has_session(&self) -> bool {
        !is_no_session(&self.session_token)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut w = &mut out[..];
        w.put_i64(self.magic);
        w.put_i32(self.command.id());
        w.put_u8(self.payload_type.as_byte());
        w.put_u64(self.data_size);
        w.put_slice(&self.session_token);
        w.put_u64(self.nonce);
        w.put_slice(&self.init_vector);
        out
    }

    /// Reject anything whose first eight bytes are not this version's magic.
    pub fn check_magic(prefix: &[u8]) -> Result<()> {
        if prefix.len() < MAGIC_LENGTH {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_HEADER.into()));
        }
        let magic = (&prefix[..MAGIC_LENGTH]).get_i64();
        if magic != MAGIC {
            return Err(ProtocolError::IncompatiblePeer { magic });
        }
        Ok(())
    }

    /// The `data_size` field of raw header bytes, without further validation.
    pub fn peek_data_size(bytes: &[u8]) -> Result<u64> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_HEADER.into()));
        }
        Ok((&bytes[DATA_SIZE_OFFSET..]).get_u64())
    }

    fn peek_token(bytes: &[u8]) -> SessionToken {
        let mut token = NO_SESSION;
        token.copy_from_slice(&bytes[TOKEN_OFFSET..TOKEN_OFFSET + SESSION_TOKEN_LENGTH]);
        token
    }

    pub fn parse(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_HEADER.into()));
        }
        Self::check_magic(bytes)?;

        let mut r = &bytes[..HEADER_SIZE];
        let magic = r.get_i64();
        let command = Command::from_id(r.get_i32());
        let payload_type = PayloadType::try_from(r.get_u8())?;
        let data_size = r.get_u64();
        let mut session_token = NO_SESSION;
        r.copy_to_slice(&mut session_token);
        let nonce = r.get_u64();
        let mut init_vector = [0u8; IV_LENGTH];
        r.copy_to_slice(&mut init_vector);

        Ok(Header {
            magic,
            command,
            payload_type,
            data_size,
            session_token,
            nonce,
            init_vector,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: ByteBuffer,
    pub auth_tag: [u8; AUTH_TAG_LENGTH],
}

impl Packet {
    /// Build a sealed packet, encrypting and authenticating when `session` is set.
    pub fn encode(
        command: Command,
        payload: &[u8],
        payload_type: PayloadType,
        session: Option<&SessionToken>,
        nonce: u64,
    ) -> Result<Packet> {
        let token = session.copied().unwrap_or(NO_SESSION);
        let mut header = Header::new(command, payload_type, token, nonce);

        if !header.has_session() {
            header.data_size = payload.len() as u64;
            return Ok(Packet {
                header,
                payload: ByteBuffer::from(payload),
                auth_tag: [0u8; AUTH_TAG_LENGTH],
            });
        }

        let crypto = Crypto::new(&token);
        let body = if payload.is_empty() {
            ByteBuffer::new()
        } else {
            header.init_vector = Crypto::generate_iv()?;
            ByteBuffer::from(crypto.encrypt(payload, &header.init_vector)?)
        };
        header.data_size = body.len() as u64;
        let auth_tag = crypto.authenticate(&header.to_bytes(), &body)?;

        Ok(Packet {
            header,
            payload: body,
            auth_tag,
        })
    }

    /// Encode a typed value in the requested representation.
    pub fn encode_value<P: WirePayload>(
        command: Command,
        value: &P,
        payload_type: PayloadType,
        session: Option<&SessionToken>,
        nonce: u64,
    ) -> Result<Packet> {
        let payload = value.to_payload(payload_type)?;
        Self::encode(command, &payload, payload_type, session, nonce)
    }

    /// Verify and decrypt a packet read off the wire in three pieces.
    pub fn open(
        header_bytes: &[u8],
        payload: ByteBuffer,
        auth_tag: [u8; AUTH_TAG_LENGTH],
    ) -> Result<Packet> {
        if header_bytes.len() != HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_HEADER.into()));
        }
        Header::check_magic(header_bytes)?;

        let token = Header::peek_token(header_bytes);
        let crypto = if is_no_session(&token) {
            None
        } else {
            let crypto = Crypto::new(&token);
            crypto.verify(header_bytes, &payload, &auth_tag)?;
            Some(crypto)
        };

        let mut header = Header::parse(header_bytes)?;
        if header.data_size != payload.len() as u64 {
            return Err(ProtocolError::InvalidHeader(format!(
                "data_size {} does not match {} payload bytes",
                header.data_size,
                payload.len()
            )));
        }

        let Some(crypto) = crypto else {
            if !header.command.is_sessionless() {
                return Err(ProtocolError::Unauthenticated(format!(
                    "{} for {}",
                    constants::ERR_NO_SESSION,
                    header.command
                )));
            }
            if auth_tag.iter().any(|b| *b != 0) {
                return Err(ProtocolError::IntegrityFailure);
            }
            return Ok(Packet {
                header,
                payload,
                auth_tag,
            });
        };

        let payload = if payload.is_empty() {
            payload
        } else {
            ByteBuffer::from(crypto.decrypt(&payload, &header.init_vector)?)
        };
        header.data_size = payload.len() as u64;

        Ok(Packet {
            header,
            payload,
            auth_tag,
        })
    }

    /// Decode one complete frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Packet> {
        Header::check_magic(bytes)?;
        let data_size = Header::peek_data_size(bytes)?;
        if data_size > MAX_PAYLOAD_SIZE as u64 {
            return Err(ProtocolError::OversizedPacket(data_size as usize));
        }
        let data_size = data_size as usize;

        let frame = HEADER_SIZE + data_size + AUTH_TAG_LENGTH;
        if bytes.len() < frame {
            return Err(ProtocolError::InvalidHeader(constants::ERR_SHORT_PACKET.into()));
        }
        if bytes.len() > frame {
            return Err(ProtocolError::InvalidHeader(constants::ERR_TRAILING_BYTES.into()));
        }

        let payload = ByteBuffer::from(&bytes[HEADER_SIZE..HEADER_SIZE + data_size]);
        let mut auth_tag = [0u8; AUTH_TAG_LENGTH];
        auth_tag.copy_from_slice(&bytes[HEADER_SIZE + data_size..]);

        Self::open(&bytes[..HEADER_SIZE], payload, auth_tag)
    }

    /// Total size on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + AUTH_TAG_LENGTH
    }

    /// Serialize a sealed packet.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut frame = self.payload.clone();
        frame.prepend(&self.header.to_bytes())?;
        frame.extend_from_slice(&self.auth_tag);
        Ok(frame.into_vec())
    }

    /// Append a sealed packet to `dst`.
    pub fn write_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        dst.put_slice(&self.auth_tag);
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn payload_type(&self) -> PayloadType {
        self.header.payload_type
    }

    pub fn session(&self) -> Option<SessionToken> {
        self.header.has_session().then_some(self.header.session_token)
    }

    /// Decode the opened payload as a single typed value.
    pub fn decode_value<P: WirePayload>(&self) -> Result<P> {
        P::from_payload(&self.payload, self.header.payload_type)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    const TOKEN: SessionToken = [0x5A; SESSION_TOKEN_LENGTH];

    #[test]
    fn header_is_73_bytes_big_endian() {
        assert_eq!(HEADER_SIZE, 73);
        let header = Header::new(Command::GetUptime, PayloadType::Json, TOKEN, 0x0102);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..8], &MAGIC.to_be_bytes());
        assert_eq!(&bytes[8..12], &6i32.to_be_bytes());
        assert_eq!(bytes[12], 1);
        assert_eq!(&bytes[59..61], &[0x01, 0x02]);
        assert_eq!(Header::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn session_packet_roundtrips_through_the_wire() {
        let sealed = Packet::encode(
            Command::WriteMsgToChatId,
            b"hello",
            PayloadType::Binary,
            Some(&TOKEN),
            9,
        )
        .unwrap();
        assert_ne!(sealed.payload.as_slice(), b"hello");
        assert_eq!(sealed.header.data_size, 5 + 16);

        let opened = Packet::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(opened.command(), Command::WriteMsgToChatId);
        assert_eq!(opened.payload.as_slice(), b"hello");
        assert_eq!(opened.header.data_size, 5);
        assert_eq!(opened.header.nonce, 9);
        assert_eq!(opened.session(), Some(TOKEN));
    }

    #[test]
    fn empty_session_payload_is_authenticated_not_encrypted() {
        let sealed =
            Packet::encode(Command::GetUptime, &[], PayloadType::Binary, Some(&TOKEN), 1).unwrap();
        assert_eq!(sealed.header.data_size, 0);
        assert_eq!(sealed.header.init_vector, [0u8; IV_LENGTH]);
        assert_ne!(sealed.auth_tag, [0u8; AUTH_TAG_LENGTH]);

        let mut bytes = sealed.to_bytes().unwrap();
        assert!(Packet::from_bytes(&bytes).is_ok());
        bytes[9] ^= 0x01;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::IntegrityFailure)
        ));
    }

    #[test]
    fn sessionless_packets_only_for_open_session() {
        let open = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1).unwrap();
        assert_eq!(open.auth_tag, [0u8; AUTH_TAG_LENGTH]);
        assert!(Packet::from_bytes(&open.to_bytes().unwrap()).is_ok());

        let uptime = Packet::encode(Command::GetUptime, &[], PayloadType::Binary, None, 1).unwrap();
        assert!(matches!(
            Packet::from_bytes(&uptime.to_bytes().unwrap()),
            Err(ProtocolError::Unauthenticated(_))
        ));
    }

    #[test]
    fn sessionless_packet_with_nonzero_tag_is_rejected() {
        let mut bytes = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1)
            .unwrap()
            .to_bytes()
            .unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::IntegrityFailure)
        ));
    }

    #[test]
    fn wrong_magic_is_an_incompatible_peer() {
        let mut bytes = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1)
            .unwrap()
            .to_bytes()
            .unwrap();
        bytes[..8].copy_from_slice(&(MAGIC - 1).to_be_bytes());
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::IncompatiblePeer { magic }) if magic == MAGIC - 1
        ));
    }

    #[test]
    fn truncated_and_padded_frames_are_rejected() {
        let bytes = Packet::encode(Command::OpenSession, b"x", PayloadType::Binary, None, 1)
            .unwrap()
            .to_bytes()
            .unwrap();
        assert!(Packet::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(Packet::from_bytes(&padded).is_err());
        assert!(Packet::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn to_bytes_matches_write_into() {
        let sealed =
            Packet::encode(Command::GetUptime, b"abc", PayloadType::Json, Some(&TOKEN), 3).unwrap();
        let mut dst = BytesMut::new();
        sealed.write_into(&mut dst);
        assert_eq!(dst.as_ref(), sealed.to_bytes().unwrap().as_slice());
        assert_eq!(dst.len(), sealed.wire_len());
    }
}
