#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for framing, sessions and command handling
//! Boundary conditions, malformed input and resource limits

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use bot_socket::config::{MAGIC, MAX_MSG_SIZE};
use bot_socket::core::codec::PacketCodec;
use bot_socket::core::packet::{Packet, HEADER_SIZE};
use bot_socket::core::serialization::{PayloadType, WirePayload};
use bot_socket::error::ProtocolError;
use bot_socket::protocol::command::{help_text, Command};
use bot_socket::protocol::dispatcher::{Dispatcher, HandlerOutcome, PayloadSize};
use bot_socket::protocol::message::{AckType, GenericAck, UptimeReport};
use bot_socket::protocol::session::SessionManager;
use bot_socket::utils::crypto::{AEAD_TAG_LENGTH, AUTH_TAG_LENGTH};

const TOKEN: [u8; 32] = [0x11; 32];

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_sealed_empty_payload_is_not_encrypted() {
    let packet = Packet::encode(Command::GetUptime, &[], PayloadType::Binary, Some(&TOKEN), 3).unwrap();
    assert_eq!(packet.header.data_size, 0);
    assert_eq!(packet.header.init_vector, [0u8; 12]);
    assert_ne!(packet.auth_tag, [0u8; AUTH_TAG_LENGTH]);

    let bytes = packet.to_bytes().unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + AUTH_TAG_LENGTH);
    let decoded = Packet::from_bytes(&bytes).unwrap();
    assert!(decoded.payload.is_empty());
}

#[test]
fn test_sealed_payload_carries_cipher_tag() {
    let packet = Packet::encode(Command::GetUptime, b"abc", PayloadType::Binary, Some(&TOKEN), 3).unwrap();
    assert_eq!(packet.header.data_size, (3 + AEAD_TAG_LENGTH) as u64);
    assert_ne!(packet.payload.as_slice(), b"abc");

    let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded.header.data_size, 3);
    assert_eq!(decoded.payload.as_slice(), b"abc");
}

#[test]
fn test_magic_is_big_endian_at_offset_zero() {
    let bytes = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    assert_eq!(&bytes[..8], &MAGIC.to_be_bytes());
}

#[test]
fn test_older_protocol_version_rejected() {
    let mut bytes = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    bytes[..8].copy_from_slice(&(MAGIC - 1).to_be_bytes());
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::IncompatiblePeer { .. })
    ));
}

#[test]
fn test_truncated_packet_rejected() {
    let bytes = Packet::encode(Command::GetUptime, b"payload", PayloadType::Binary, Some(&TOKEN), 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    for cut in [0, 7, HEADER_SIZE - 1, HEADER_SIZE, bytes.len() - 1] {
        let err = Packet::from_bytes(&bytes[..cut]).unwrap_err();
        assert!(err.is_fatal(), "cut at {cut}: {err}");
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = Packet::encode(Command::GetUptime, &[], PayloadType::Binary, Some(&TOKEN), 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    bytes.push(0);
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::InvalidHeader(_))
    ));
}

#[test]
fn test_sessionless_command_requires_open_session() {
    let bytes = Packet::encode(Command::GetUptime, &[], PayloadType::Binary, None, 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::Unauthenticated(_))
    ));
}

#[test]
fn test_sessionless_packet_with_tag_rejected() {
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
fn test_unknown_payload_type_rejected() {
    let mut bytes = Packet::encode(Command::OpenSession, &[], PayloadType::Binary, None, 1)
        .unwrap()
        .to_bytes()
        .unwrap();
    // magic (8) + command (4)
    bytes[12] = 9;
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::InvalidPayloadType(9))
    ));
}

#[test]
fn test_codec_handles_back_to_back_frames() {
    let mut codec = PacketCodec::default();
    let mut buf = BytesMut::new();
    for nonce in 1..=3u64 {
        let packet = Packet::encode(Command::GetUptime, &nonce.to_be_bytes(), PayloadType::Binary, Some(&TOKEN), nonce).unwrap();
        codec.encode(packet, &mut buf).unwrap();
    }

    for nonce in 1..=3u64 {
        let packet = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(packet.header.nonce, nonce);
        assert_eq!(packet.payload.as_slice(), &nonce.to_be_bytes());
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_codec_refuses_to_encode_oversized() {
    let mut codec = PacketCodec::new(8);
    let packet = Packet::encode(Command::OpenSession, &[0u8; 9], PayloadType::Binary, None, 1).unwrap();
    let mut buf = BytesMut::new();
    assert!(matches!(
        codec.encode(packet, &mut buf),
        Err(ProtocolError::OversizedPacket(9))
    ));
}

// ============================================================================
// SESSION EDGE CASES
// ============================================================================

#[test]
fn test_expired_session_is_treated_as_unknown() {
    let sessions = SessionManager::new(Duration::from_millis(20), 8);
    let grant = sessions.open().unwrap();
    sessions.verify(&grant.token, 1).unwrap();

    std::thread::sleep(Duration::from_millis(40));
    assert!(matches!(
        sessions.verify(&grant.token, 2),
        Err(ProtocolError::Unauthenticated(_))
    ));
    assert!(!sessions.contains(&grant.token));
    assert!(matches!(
        sessions.verify(&grant.token, 3),
        Err(ProtocolError::Unauthenticated(_))
    ));
}

#[test]
fn test_activity_extends_session() {
    let sessions = SessionManager::new(Duration::from_millis(120), 8);
    let grant = sessions.open().unwrap();
    for nonce in 1..=4 {
        std::thread::sleep(Duration::from_millis(50));
        sessions.verify(&grant.token, nonce).unwrap();
    }
    assert!(sessions.contains(&grant.token));
}

#[test]
fn test_full_table_evicts_oldest_session() {
    let sessions = SessionManager::new(Duration::from_secs(60), 2);
    let first = sessions.open().unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let second = sessions.open().unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let third = sessions.open().unwrap();

    assert_eq!(sessions.len(), 2);
    assert!(!sessions.contains(&first.token));
    assert!(sessions.contains(&second.token));
    assert!(sessions.contains(&third.token));
}

#[test]
fn test_close_hooks_fire_once_per_session() {
    let sessions = SessionManager::default();
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    sessions
        .on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let grant = sessions.open().unwrap();
    assert!(sessions.close(&grant.token));
    assert!(!sessions.close(&grant.token));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_token_is_never_a_session() {
    let sessions = SessionManager::default();
    sessions.open().unwrap();
    assert!(matches!(
        sessions.verify(&[0u8; 32], 1),
        Err(ProtocolError::Unauthenticated(_))
    ));
}

// ============================================================================
// DISPATCHER AND COMMAND EDGE CASES
// ============================================================================

fn sealed(command: Command, payload: &[u8]) -> Packet {
    let packet = Packet::encode(command, payload, PayloadType::Binary, Some(&TOKEN), 1).unwrap();
    Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap()
}

#[test]
fn test_unregistered_internal_command_is_ignored() {
    let dispatcher = Dispatcher::new();
    assert!(dispatcher.dispatch(&sealed(Command::GenericAck, &[])).unwrap().is_none());
    assert!(dispatcher.dispatch(&sealed(Command::Unknown(250), &[])).unwrap().is_none());
}

#[test]
fn test_registered_internal_command_is_dispatched() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Command::UploadFileDry, PayloadSize::Any, |_| Ok(HandlerOutcome::ok()))
        .unwrap();
    let reply = dispatcher
        .dispatch(&sealed(Command::UploadFileDry, b"x"))
        .unwrap()
        .expect("reply");
    assert_eq!(reply.command(), Command::GenericAck);
    assert_eq!(reply.session(), Some(TOKEN));
}

#[test]
fn test_handler_error_becomes_ack() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(Command::ObserveAllChats, PayloadSize::Any, |_| {
            Err(ProtocolError::CommandIgnored("already observing".into()))
        })
        .unwrap();
    let reply = dispatcher
        .dispatch(&sealed(Command::ObserveAllChats, &[1]))
        .unwrap()
        .expect("reply");
    let ack: GenericAck = reply.decode_value().unwrap();
    assert_eq!(ack.result, AckType::CommandIgnored);
    assert!(ack.message.contains("already observing"));
}

#[test]
fn test_long_ack_message_is_truncated_on_char_boundary() {
    let ack = GenericAck::new(AckType::RuntimeError, "é".repeat(300));
    assert!(ack.message.len() < MAX_MSG_SIZE);
    assert!(ack.message.chars().all(|c| c == 'é'));
    let encoded = ack.to_payload(PayloadType::Binary).unwrap();
    assert_eq!(GenericAck::from_payload(&encoded, PayloadType::Binary).unwrap(), ack);
}

#[test]
fn test_uptime_saturates() {
    let report = UptimeReport::from_duration(Duration::from_secs(5000 * 3600 + 61));
    assert_eq!(report.uptime, "Uptime: 999h 1m 1s");
    assert!(report.to_payload(PayloadType::Binary).is_ok());
}

#[test]
fn test_command_id_boundaries() {
    assert_eq!(Command::from_id(0), Command::Unknown(0));
    assert_eq!(Command::from_id(12), Command::Unknown(12));
    assert_eq!(Command::from_id(99), Command::Unknown(99));
    assert!(Command::from_id(11).is_client());
    assert!(Command::from_id(100).is_internal());
    assert!(!Command::Unknown(12).is_client());
}

#[test]
fn test_help_text_lists_client_commands_only() {
    let help = help_text();
    assert!(help.contains("CMD_WRITE_MSG_TO_CHAT_ID (1): 2 arg(s)"));
    assert!(help.contains("CMD_GET_UPTIME (6): 0 arg(s)"));
    assert!(!help.contains("CMD_OPEN_SESSION"));
}
