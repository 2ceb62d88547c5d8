//! Command routing.
//!
//! Handlers are registered per [`Command`] together with the payload size
//! their Binary layout requires. A Binary payload of the wrong size never
//! reaches its handler; the peer gets an `InvalidArgument` ack instead. A
//! handler error becomes an ack classified by [`ProtocolError::ack_type`].
//! Replies are sealed with the session token of the request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::core::packet::Packet;
use crate::core::serialization::{PayloadType, WirePayload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::message::{AckType, GenericAck};
use crate::utils::crypto::SessionToken;
use crate::utils::metrics::Timer;
use crate::utils::nonce::NonceGenerator;

/// Binary payload size a route accepts. JSON payloads are not size-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl PayloadSize {
    fn accepts(self, len: usize) -> bool {
        match self {
            PayloadSize::Exact(n) => len == n,
            PayloadSize::AtLeast(n) => len >= n,
            PayloadSize::Any => true,
        }
    }
}

/// An opened packet as seen by a handler.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub command: Command,
    pub payload: &'a [u8],
    pub payload_type: PayloadType,
    pub session: Option<SessionToken>,
    pub nonce: u64,
}

impl<'a> Request<'a> {
    pub fn from_packet(packet: &'a Packet) -> Self {
        Self {
            command: packet.command(),
            payload: &packet.payload,
            payload_type: packet.payload_type(),
            session: packet.session(),
            nonce: packet.header.nonce,
        }
    }

    pub fn decode<P: WirePayload>(&self) -> Result<P> {
        P::from_payload(self.payload, self.payload_type)
    }

    pub fn decode_with_trailing<P: WirePayload>(&self) -> Result<(P, &'a [u8])> {
        P::from_payload_with_trailing(self.payload, self.payload_type)
    }

    /// A typed reply in the request's payload type.
    pub fn respond<P: WirePayload>(&self, command: Command, value: &P) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Reply {
            command,
            payload: value.to_payload(self.payload_type)?,
        })
    }

    /// A typed reply followed by raw bytes.
    pub fn respond_with_trailing<P: WirePayload>(
        &self,
        command: Command,
        value: &P,
        tail: &[u8],
    ) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Reply {
            command,
            payload: value.to_payload_with_trailing(self.payload_type, tail)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Ack(GenericAck),
    Reply { command: Command, payload: Vec<u8> },
}

impl HandlerOutcome {
    pub fn ok() -> Self {
        HandlerOutcome::Ack(GenericAck::ok())
    }
}

type HandlerFn = dyn Fn(&Request<'_>) -> Result<HandlerOutcome> + Send + Sync + 'static;

struct Route {
    expected: PayloadSize,
    handler: Arc<HandlerFn>,
}

pub struct Dispatcher {
    routes: Arc<RwLock<HashMap<Command, Route>>>,
    nonces: Arc<NonceGenerator>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_nonces(Arc::new(NonceGenerator::new()))
    }

    /// Share a nonce source with other senders on the same side.
    pub fn with_nonces(nonces: Arc<NonceGenerator>) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            nonces,
        }
    }

    pub fn register<F>(&self, command: Command, expected: PayloadSize, handler: F) -> Result<()>
    where
        F: Fn(&Request<'_>) -> Result<HandlerOutcome> + Send + Sync + 'static,
    {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.into()))?;
        if routes
            .insert(
                command,
                Route {
                    expected,
                    handler: Arc::new(handler),
                },
            )
            .is_some()
        {
            debug!(%command, "Replaced command handler");
        }
        Ok(())
    }

    pub fn is_registered(&self, command: Command) -> bool {
        self.routes
            .read()
            .map(|routes| routes.contains_key(&command))
            .unwrap_or(false)
    }

    /// Run the handler for `packet` and seal its reply.
    ///
    /// Returns `Ok(None)` for commands nobody registered.
    pub fn dispatch(&self, packet: &Packet) -> Result<Option<Packet>> {
        let _timer = Timer::start("dispatch");
        let request = Request::from_packet(packet);
        let command = request.command;

        let (expected, handler) = {
            let routes = self
                .routes
                .read()
                .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.into()))?;
            match routes.get(&command) {
                Some(route) => (route.expected, route.handler.clone()),
                None => {
                    if command.is_internal() {
                        debug!(%command, "Ignoring unregistered internal command");
                    } else {
                        warn!(%command, "No handler registered for command");
                    }
                    return Ok(None);
                }
            }
        };

        let outcome = if request.payload_type == PayloadType::Binary
            && !expected.accepts(request.payload.len())
        {
            warn!(%command, len = request.payload.len(), "Payload size rejected");
            HandlerOutcome::Ack(GenericAck::new(
                AckType::InvalidArgument,
                format!(
                    "{}: {} bytes for {}",
                    constants::ERR_PAYLOAD_SIZE,
                    request.payload.len(),
                    command
                ),
            ))
        } else {
            match handler(&request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%command, error = %e, "Command failed");
                    HandlerOutcome::Ack(GenericAck::from_error(&e))
                }
            }
        };

        self.seal(&request, outcome).map(Some)
    }

    fn seal(&self, request: &Request<'_>, outcome: HandlerOutcome) -> Result<Packet> {
        let nonce = self.nonces.next_nonce();
        let session = request.session.as_ref();
        match outcome {
            HandlerOutcome::Ack(ack) => Packet::encode_value(
                Command::GenericAck,
                &ack,
                request.payload_type,
                session,
                nonce,
            ),
            HandlerOutcome::Reply { command, payload } => {
                Packet::encode(command, &payload, request.payload_type, session, nonce)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::protocol::message::{ObserveAllChats, WriteMsgToChatId};

    const TOKEN: SessionToken = [3u8; 32];

    fn opened(command: Command, payload: &[u8], payload_type: PayloadType) -> Packet {
        let sealed = Packet::encode(command, payload, payload_type, Some(&TOKEN), 5).unwrap();
        Packet::from_bytes(&sealed.to_bytes().unwrap()).unwrap()
    }

    fn reply_ack(reply: Packet) -> GenericAck {
        let opened = Packet::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(opened.command(), Command::GenericAck);
        opened.decode_value().unwrap()
    }

    fn echo_dispatcher() -> Dispatcher {
        let d = Dispatcher::new();
        d.register(
            Command::WriteMsgToChatId,
            PayloadSize::Exact(WriteMsgToChatId::BINARY_SIZE),
            |req| {
                let msg: WriteMsgToChatId = req.decode()?;
                if msg.chat == 0 {
                    return Err(ProtocolError::InvalidArgument("chat 0".into()));
                }
                Ok(HandlerOutcome::ok())
            },
        )
        .unwrap();
        d
    }

    #[test]
    fn routes_by_command_and_seals_with_request_session() {
        let d = echo_dispatcher();
        let payload = WriteMsgToChatId {
            chat: 42,
            message: "hi".into(),
        }
        .to_payload(PayloadType::Binary)
        .unwrap();
        let reply = d
            .dispatch(&opened(Command::WriteMsgToChatId, &payload, PayloadType::Binary))
            .unwrap()
            .unwrap();
        assert_eq!(reply.header.session_token, TOKEN);
        assert!(reply_ack(reply).is_success());
    }

    #[test]
    fn wrong_binary_size_never_reaches_handler() {
        let d = echo_dispatcher();
        let reply = d
            .dispatch(&opened(Command::WriteMsgToChatId, &[0u8; 7], PayloadType::Binary))
            .unwrap()
            .unwrap();
        assert_eq!(reply_ack(reply).result, AckType::InvalidArgument);
    }

    #[test]
    fn handler_errors_become_acks_in_request_encoding() {
        let d = echo_dispatcher();
        let payload = WriteMsgToChatId {
            chat: 0,
            message: "hi".into(),
        }
        .to_payload(PayloadType::Json)
        .unwrap();
        let reply = d
            .dispatch(&opened(Command::WriteMsgToChatId, &payload, PayloadType::Json))
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload_type(), PayloadType::Json);
        assert_eq!(reply_ack(reply).result, AckType::InvalidArgument);
    }

    #[test]
    fn unregistered_commands_get_no_reply() {
        let d = echo_dispatcher();
        let payload = ObserveAllChats { observe: true }
            .to_payload(PayloadType::Binary)
            .unwrap();
        assert!(d
            .dispatch(&opened(Command::ObserveAllChats, &payload, PayloadType::Binary))
            .unwrap()
            .is_none());
        assert!(d
            .dispatch(&opened(Command::GenericAck, &[], PayloadType::Binary))
            .unwrap()
            .is_none());
        assert!(d
            .dispatch(&opened(Command::Unknown(77), &[], PayloadType::Binary))
            .unwrap()
            .is_none());
    }

    #[test]
    fn registered_internal_commands_are_dispatched() {
        let d = Dispatcher::new();
        d.register(Command::UploadFileDry, PayloadSize::Any, |_| {
            Ok(HandlerOutcome::Ack(GenericAck::new(AckType::CommandIgnored, "exists")))
        })
        .unwrap();
        assert!(d.is_registered(Command::UploadFileDry));
        let reply = d
            .dispatch(&opened(Command::UploadFileDry, &[], PayloadType::Binary))
            .unwrap()
            .unwrap();
        assert_eq!(reply_ack(reply).result, AckType::CommandIgnored);
    }
}
