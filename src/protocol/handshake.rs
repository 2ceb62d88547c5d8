//! Session open and close exchanges.
//!
//! Opening a session is the only exchange that travels without one: the
//! client sends an empty `OpenSession` packet, the server answers with an
//! `OpenSessionAck` whose plaintext payload is a [`SessionGrant`]. Everything
//! after that is sealed with the granted token.
//!
//! The functions here only build and check packets; the caller owns the
//! connection and the nonce source.

use tracing::{debug, instrument};

use crate::core::packet::Packet;
use crate::core::serialization::PayloadType;
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::message::SessionGrant;
use crate::protocol::session::SessionManager;
use crate::utils::crypto::{is_no_session, SessionToken};

/// Client request for a new session.
pub fn client_open_session(nonce: u64, payload_type: PayloadType) -> Result<Packet> {
    Packet::encode(Command::OpenSession, &[], payload_type, None, nonce)
}

/// Server answer to an `OpenSession` request.
///
/// The grant is encoded in the payload type the client asked with.
#[instrument(skip_all, fields(nonce = request.header.nonce))]
pub fn server_open_session(
    sessions: &SessionManager,
    request: &Packet,
    nonce: u64,
) -> Result<Packet> {
    if request.command() != Command::OpenSession {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "expected {}, got {}",
            Command::OpenSession,
            request.command()
        )));
    }

    let grant = sessions.open()?;
    debug!(expires_at = grant.expires_at, "Granted session");
    Packet::encode_value(
        Command::OpenSessionAck,
        &grant,
        request.payload_type(),
        None,
        nonce,
    )
}

/// Extract the grant from the server's reply.
pub fn client_accept_grant(reply: &Packet) -> Result<SessionGrant> {
    if reply.command() != Command::OpenSessionAck {
        return Err(ProtocolError::UnexpectedMessage(format!(
            "expected {}, got {}",
            Command::OpenSessionAck,
            reply.command()
        )));
    }
    let grant: SessionGrant = reply.decode_value()?;
    if is_no_session(&grant.token) {
        return Err(ProtocolError::SecurityError(
            "server granted an all-zero session token".into(),
        ));
    }
    Ok(grant)
}

/// Client request to end `session`. The server does not answer it.
pub fn client_close_session(
    session: &SessionToken,
    nonce: u64,
    payload_type: PayloadType,
) -> Result<Packet> {
    Packet::encode(Command::CloseSession, &[], payload_type, Some(session), nonce)
}
