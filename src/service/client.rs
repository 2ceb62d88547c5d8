//! # Client
//!
//! Drives one connection to a server: opens a session, sends typed commands
//! and interprets the replies.
//!
//! ## Usage
//! ```ignore
//! let context = TcpContext::client(TransportOptions::default());
//! let mut client = Client::connect(&context, &Endpoint::inet("127.0.0.1", 50000)).await?;
//! client.open_session().await?;
//! println!("{}", client.get_uptime().await?);
//! client.close_session().await?;
//! ```

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::config::{ClientConfig, MAX_PAYLOAD_SIZE};
use crate::core::packet::Packet;
use crate::core::serialization::{PayloadType, WirePayload};
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::handshake::{client_accept_grant, client_close_session, client_open_session};
use crate::protocol::message::{
    AckType, FileTransferMeta, GenericAck, SessionGrant, TransferBegin, TransferChunk,
    TransferChunkResponse, TransferEnd, TransferOptions, UploadDryCallback, UptimeReport,
};
use crate::transport::{read_packet, write_packet, Connection, Context, Endpoint};
use crate::utils::crypto::sha256;
use crate::utils::nonce::NonceGenerator;

pub struct Client {
    conn: Box<dyn Connection>,
    session: Option<SessionGrant>,
    nonces: NonceGenerator,
    last_reply_nonce: u64,
    payload_type: PayloadType,
    max_payload: usize,
    chunk_size: usize,
}

impl Client {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            conn,
            session: None,
            nonces: NonceGenerator::new(),
            last_reply_nonce: 0,
            payload_type: PayloadType::Binary,
            max_payload: MAX_PAYLOAD_SIZE,
            chunk_size: ClientConfig::default().transfer_chunk_size,
        }
    }

    pub async fn connect(context: &dyn Context, endpoint: &Endpoint) -> Result<Self> {
        let conn = context.connect(endpoint).await?;
        info!(peer = %endpoint, "Client connected");
        Ok(Self::new(conn))
    }

    /// Encode requests as `payload_type`; replies follow the same choice.
    pub fn with_payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn session(&self) -> Option<&SessionGrant> {
        self.session.as_ref()
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    #[instrument(skip(self))]
    pub async fn open_session(&mut self) -> Result<SessionGrant> {
        let request = client_open_session(self.nonces.next_nonce(), self.payload_type)?;
        self.write_packet(&request).await?;
        let reply = self.read_reply().await?;
        let grant = client_accept_grant(&reply)?;
        debug!(expires_at = grant.expires_at, "Session opened");
        self.session = Some(grant);
        Ok(grant)
    }

    /// End the session. The server closes the connection afterwards.
    pub async fn close_session(&mut self) -> Result<()> {
        let Some(grant) = self.session.take() else {
            return Ok(());
        };
        let request = client_close_session(&grant.token, self.nonces.next_nonce(), self.payload_type)?;
        self.write_packet(&request).await
    }

    /// Seal and send `payload` as `command` under the current session.
    pub async fn send_raw(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let token = self.session.as_ref().map(|grant| grant.token);
        let packet = Packet::encode(
            command,
            payload,
            self.payload_type,
            token.as_ref(),
            self.nonces.next_nonce(),
        )?;
        self.write_packet(&packet).await
    }

    pub async fn send<P: WirePayload>(&mut self, command: Command, value: &P) -> Result<()> {
        let payload = value.to_payload(self.payload_type)?;
        self.send_raw(command, &payload).await
    }

    /// Send and wait for the single reply.
    pub async fn request<P: WirePayload>(&mut self, command: Command, value: &P) -> Result<Packet> {
        self.send(command, value).await?;
        self.read_reply().await
    }

    /// Send a command that is answered with a [`GenericAck`].
    pub async fn send_command<P: WirePayload>(
        &mut self,
        command: Command,
        value: &P,
    ) -> Result<GenericAck> {
        let reply = self.request(command, value).await?;
        expect_ack(&reply)
    }

    pub async fn get_uptime(&mut self) -> Result<String> {
        self.send_raw(Command::GetUptime, &[]).await?;
        let reply = self.read_reply().await?;
        if reply.command() != Command::GetUptimeCallback {
            return Err(unexpected(Command::GetUptimeCallback, &reply));
        }
        Ok(reply.decode_value::<UptimeReport>()?.uptime)
    }

    /// Ask whether an upload described by `meta` would be accepted.
    pub async fn dry_run_upload(&mut self, meta: &FileTransferMeta) -> Result<GenericAck> {
        let reply = self.request(Command::UploadFileDry, meta).await?;
        if reply.command() != Command::UploadFileDryCallback {
            return expect_ack(&reply);
        }
        Ok(reply.decode_value::<UploadDryCallback>()?.ack)
    }

    /// Upload `data` to `remote`, checking with a dry run first.
    ///
    /// Returns the first unsuccessful ack, or the live upload's ack.
    pub async fn upload_bytes(
        &mut self,
        data: &[u8],
        local_name: &str,
        remote: &str,
        options: TransferOptions,
    ) -> Result<GenericAck> {
        let meta = FileTransferMeta::new(
            local_name,
            remote,
            sha256(data),
            TransferOptions {
                dry_run: true,
                ..options
            },
        );
        let verdict = self.dry_run_upload(&meta).await?;
        if !verdict.is_success() {
            return Ok(verdict);
        }

        let live = FileTransferMeta {
            dry_run: false,
            ..meta
        };
        let payload = live.to_payload_with_trailing(self.payload_type, data)?;
        self.send_raw(Command::UploadFile, &payload).await?;
        let reply = self.read_reply().await?;
        expect_ack(&reply)
    }

    pub async fn upload_file(
        &mut self,
        local: &Path,
        remote: &str,
        options: TransferOptions,
    ) -> Result<GenericAck> {
        let data = tokio::fs::read(local).await?;
        self.upload_bytes(&data, &local.to_string_lossy(), remote, options)
            .await
    }

    /// Upload `data` in chunks of the configured size.
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn upload_chunked(
        &mut self,
        data: &[u8],
        remote: &str,
        verify_hash: bool,
    ) -> Result<GenericAck> {
        let chunk_size = u32::try_from(self.chunk_size).unwrap_or(u32::MAX);
        let begin = TransferBegin {
            dest: remote.to_owned(),
            total_size: data.len() as u64,
            chunk_size,
            sha256: sha256(data),
        };
        let ack = self.send_command(Command::TransferFileBegin, &begin).await?;
        if !ack.is_success() {
            return Ok(ack);
        }

        for (index, part) in data.chunks(chunk_size as usize).enumerate() {
            let chunk = TransferChunk {
                index: index as u32,
                size: part.len() as u32,
            };
            let payload = chunk.to_payload_with_trailing(self.payload_type, part)?;
            self.send_raw(Command::TransferFileChunk, &payload).await?;
            let reply = self.read_reply().await?;
            if reply.command() != Command::TransferFileChunkResponse {
                return expect_ack(&reply);
            }
            let response: TransferChunkResponse = reply.decode_value()?;
            if !response.success {
                return Ok(GenericAck::new(AckType::InvalidArgument, response.message));
            }
        }

        self.send_command(Command::TransferFileEnd, &TransferEnd { verify_hash })
            .await
    }

    /// Fetch `remote` and write it to `local` when given.
    pub async fn download_file(&mut self, remote: &str, local: Option<&Path>) -> Result<Vec<u8>> {
        let local_name = local
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let meta = FileTransferMeta::new(remote, local_name, [0; 32], TransferOptions::default());
        let reply = self.request(Command::DownloadFile, &meta).await?;
        if reply.command() != Command::DownloadFileCallback {
            expect_ack(&reply)?.into_result()?;
            return Err(unexpected(Command::DownloadFileCallback, &reply));
        }

        let (meta, data) =
            FileTransferMeta::from_payload_with_trailing(&reply.payload, reply.payload_type())?;
        if meta.has_hash() && sha256(data) != meta.sha256 {
            return Err(ProtocolError::IntegrityFailure);
        }
        let data = data.to_vec();
        if let Some(local) = local {
            tokio::fs::write(local, &data).await?;
        }
        Ok(data)
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        write_packet(self.conn.as_mut(), packet).await
    }

    /// Read one reply and check it belongs to this session.
    pub async fn read_reply(&mut self) -> Result<Packet> {
        let reply = read_packet(self.conn.as_mut(), self.max_payload).await?;
        if !reply.command().is_sessionless() {
            let expected = self.session.as_ref().map(|grant| grant.token);
            if reply.session() != expected {
                return Err(ProtocolError::SecurityError(
                    "reply sealed with a different session".into(),
                ));
            }
        }
        let nonce = reply.header.nonce;
        if nonce <= self.last_reply_nonce {
            return Err(ProtocolError::ReplayDetected {
                nonce,
                last_nonce: self.last_reply_nonce,
            });
        }
        self.last_reply_nonce = nonce;
        Ok(reply)
    }

    pub async fn close(mut self) -> Result<()> {
        self.conn.close().await
    }
}

fn unexpected(expected: Command, reply: &Packet) -> ProtocolError {
    ProtocolError::UnexpectedMessage(format!("expected {expected}, got {}", reply.command()))
}

fn expect_ack(reply: &Packet) -> Result<GenericAck> {
    if reply.command() != Command::GenericAck {
        return Err(unexpected(Command::GenericAck, reply));
    }
    reply.decode_value()
}
