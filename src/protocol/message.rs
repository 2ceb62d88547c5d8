//! Typed payloads carried by each command.
//!
//! Every type implements [`WirePayload`] so it can travel either as its fixed
//! big-endian struct or as a JSON object; the header's payload type decides.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_MSG_SIZE, MAX_PATH_SIZE};
use crate::core::serialization::{get_array, get_fixed_str, hex_array, put_fixed_str, WirePayload};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{SessionToken, SESSION_TOKEN_LENGTH, SHA256_LENGTH};

/// Width of the uptime text field
pub const UPTIME_FIELD_SIZE: usize = 21;

/// Outcome classification carried by every [`GenericAck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum AckType {
    Success,
    BackendError,
    InvalidArgument,
    CommandIgnored,
    RuntimeError,
    ClientError,
}

impl From<AckType> for i32 {
    fn from(value: AckType) -> i32 {
        match value {
            AckType::Success => 0,
            AckType::BackendError => 1,
            AckType::InvalidArgument => 2,
            AckType::CommandIgnored => 3,
            AckType::RuntimeError => 4,
            AckType::ClientError => 5,
        }
    }
}

impl TryFrom<i32> for AckType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => AckType::Success,
            1 => AckType::BackendError,
            2 => AckType::InvalidArgument,
            3 => AckType::CommandIgnored,
            4 => AckType::RuntimeError,
            5 => AckType::ClientError,
            other => {
                return Err(ProtocolError::DeserializeError(format!(
                    "unknown ack type {other}"
                )))
            }
        })
    }
}

impl std::fmt::Display for AckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AckType::Success => "Success",
            AckType::BackendError => "Backend error",
            AckType::InvalidArgument => "Invalid argument",
            AckType::CommandIgnored => "Command ignored",
            AckType::RuntimeError => "Runtime error",
            AckType::ClientError => "Client error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericAck {
    pub result: AckType,
    #[serde(rename = "error_msg", default)]
    pub message: String,
}

impl GenericAck {
    pub fn ok() -> Self {
        Self {
            result: AckType::Success,
            message: String::new(),
        }
    }

    /// An ack whose message is cut to fit the fixed-width field.
    pub fn new(result: AckType, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() >= MAX_MSG_SIZE {
            let mut end = MAX_MSG_SIZE - 1;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Self { result, message }
    }

    pub fn from_error(error: &ProtocolError) -> Self {
        Self::new(error.ack_type(), error.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.result == AckType::Success
    }

    /// Turn a failed ack back into the matching error.
    pub fn into_result(self) -> Result<()> {
        match self.result {
            AckType::Success => Ok(()),
            AckType::InvalidArgument => Err(ProtocolError::InvalidArgument(self.message)),
            AckType::CommandIgnored => Err(ProtocolError::CommandIgnored(self.message)),
            AckType::BackendError => Err(ProtocolError::Backend(self.message)),
            AckType::RuntimeError | AckType::ClientError => {
                Err(ProtocolError::Runtime(self.message))
            }
        }
    }
}

impl WirePayload for GenericAck {
    const BINARY_SIZE: usize = 4 + MAX_MSG_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_i32(self.result.into());
        put_fixed_str(out, &self.message, MAX_MSG_SIZE)
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let result = AckType::try_from(src.get_i32())?;
        let message = get_fixed_str(&mut src, MAX_MSG_SIZE)?;
        Ok(Self { result, message })
    }
}

/// Media kind for [`SendFileToChatId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum FileType {
    Photo,
    Video,
    Gif,
    Document,
    Dice,
    Sticker,
}

impl From<FileType> for i32 {
    fn from(value: FileType) -> i32 {
        value as i32
    }
}

impl TryFrom<i32> for FileType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => FileType::Photo,
            1 => FileType::Video,
            2 => FileType::Gif,
            3 => FileType::Document,
            4 => FileType::Dice,
            5 => FileType::Sticker,
            other => {
                return Err(ProtocolError::InvalidArgument(format!(
                    "unknown file type {other}"
                )))
            }
        })
    }
}

/// Spam-block behaviour for [`CtrlSpamBlock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SpamBlockMode {
    Off,
    LoggingOnly,
    Purge,
    PurgeAndMute,
}

impl From<SpamBlockMode> for i32 {
    fn from(value: SpamBlockMode) -> i32 {
        value as i32
    }
}

impl TryFrom<i32> for SpamBlockMode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => SpamBlockMode::Off,
            1 => SpamBlockMode::LoggingOnly,
            2 => SpamBlockMode::Purge,
            3 => SpamBlockMode::PurgeAndMute,
            other => {
                return Err(ProtocolError::InvalidArgument(format!(
                    "unknown spam block mode {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMsgToChatId {
    pub chat: i64,
    pub message: String,
}

impl WirePayload for WriteMsgToChatId {
    const BINARY_SIZE: usize = 8 + MAX_MSG_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_i64(self.chat);
        put_fixed_str(out, &self.message, MAX_MSG_SIZE)
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let chat = src.get_i64();
        let message = get_fixed_str(&mut src, MAX_MSG_SIZE)?;
        Ok(Self { chat, message })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveChatId {
    pub chat: i64,
    pub observe: bool,
}

impl WirePayload for ObserveChatId {
    const BINARY_SIZE: usize = 8 + 1;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_i64(self.chat);
        out.put_u8(self.observe as u8);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            chat: src.get_i64(),
            observe: src.get_u8() != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFileToChatId {
    pub chat: i64,
    pub file_type: FileType,
    pub path: String,
}

impl WirePayload for SendFileToChatId {
    const BINARY_SIZE: usize = 8 + 4 + MAX_PATH_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_i64(self.chat);
        out.put_i32(self.file_type.into());
        put_fixed_str(out, &self.path, MAX_PATH_SIZE)
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let chat = src.get_i64();
        let file_type = FileType::try_from(src.get_i32())?;
        let path = get_fixed_str(&mut src, MAX_PATH_SIZE)?;
        Ok(Self {
            chat,
            file_type,
            path,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveAllChats {
    pub observe: bool,
}

impl WirePayload for ObserveAllChats {
    const BINARY_SIZE: usize = 1;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_u8(self.observe as u8);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            observe: src.get_u8() != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtrlSpamBlock {
    pub mode: SpamBlockMode,
}

impl WirePayload for CtrlSpamBlock {
    const BINARY_SIZE: usize = 4;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_i32(self.mode.into());
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            mode: SpamBlockMode::try_from(src.get_i32())?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeReport {
    pub uptime: String,
}

impl UptimeReport {
    /// Hours saturate at 999 to keep the text inside its field.
    pub fn from_duration(elapsed: Duration) -> Self {
        let secs = elapsed.as_secs();
        let hours = (secs / 3600).min(999);
        let minutes = (secs / 60) % 60;
        let seconds = secs % 60;
        Self {
            uptime: format!("Uptime: {hours}h {minutes}m {seconds}s"),
        }
    }
}

impl WirePayload for UptimeReport {
    const BINARY_SIZE: usize = UPTIME_FIELD_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        put_fixed_str(out, &self.uptime, UPTIME_FIELD_SIZE)
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            uptime: get_fixed_str(&mut src, UPTIME_FIELD_SIZE)?,
        })
    }
}

/// Handshake reply: the new session token and its absolute expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    #[serde(with = "hex_array")]
    pub token: SessionToken,
    pub expires_at: i64,
}

impl WirePayload for SessionGrant {
    const BINARY_SIZE: usize = SESSION_TOKEN_LENGTH + 8;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_slice(&self.token);
        out.put_i64(self.expires_at);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let token = get_array::<SESSION_TOKEN_LENGTH>(&mut src)?;
        Ok(Self {
            token,
            expires_at: src.get_i64(),
        })
    }
}

/// Flags for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    pub overwrite: bool,
    pub hash_ignore: bool,
    pub dry_run: bool,
}

/// Metadata for single-shot upload and download.
///
/// The Json form nests the flags under `options` and leaves `hash` out when
/// `hash_ignore` is set; a missing `hash` is only accepted in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MetaJson", try_from = "MetaJson")]
pub struct FileTransferMeta {
    pub src: String,
    pub dest: String,
    pub sha256: [u8; SHA256_LENGTH],
    pub overwrite: bool,
    pub hash_ignore: bool,
    pub dry_run: bool,
}

#[derive(Serialize, Deserialize)]
struct MetaJson {
    srcfilepath: String,
    destfilepath: String,
    #[serde(default)]
    options: TransferOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl From<FileTransferMeta> for MetaJson {
    fn from(meta: FileTransferMeta) -> Self {
        let options = meta.options();
        Self {
            hash: (!options.hash_ignore).then(|| hex::encode(meta.sha256)),
            srcfilepath: meta.src,
            destfilepath: meta.dest,
            options,
        }
    }
}

impl TryFrom<MetaJson> for FileTransferMeta {
    type Error = String;

    fn try_from(json: MetaJson) -> std::result::Result<Self, String> {
        let mut sha256 = [0u8; SHA256_LENGTH];
        match json.hash {
            Some(text) => hex::decode_to_slice(&text, &mut sha256)
                .map_err(|e| format!("hash: {e}"))?,
            None if !json.options.hash_ignore => {
                return Err("hash is required unless options.hash_ignore is set".into())
            }
            None => {}
        }
        Ok(Self::new(json.srcfilepath, json.destfilepath, sha256, json.options))
    }
}

impl FileTransferMeta {
    pub fn new(
        src: impl Into<String>,
        dest: impl Into<String>,
        sha256: [u8; SHA256_LENGTH],
        options: TransferOptions,
    ) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            sha256,
            overwrite: options.overwrite,
            hash_ignore: options.hash_ignore,
            dry_run: options.dry_run,
        }
    }

    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            overwrite: self.overwrite,
            hash_ignore: self.hash_ignore,
            dry_run: self.dry_run,
        }
    }

    pub fn has_hash(&self) -> bool {
        self.sha256.iter().any(|b| *b != 0)
    }
}

impl WirePayload for FileTransferMeta {
    const BINARY_SIZE: usize = MAX_PATH_SIZE * 2 + SHA256_LENGTH + 3;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        put_fixed_str(out, &self.src, MAX_PATH_SIZE)?;
        put_fixed_str(out, &self.dest, MAX_PATH_SIZE)?;
        out.put_slice(&self.sha256);
        out.put_u8(self.overwrite as u8);
        out.put_u8(self.hash_ignore as u8);
        out.put_u8(self.dry_run as u8);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let source = get_fixed_str(&mut src, MAX_PATH_SIZE)?;
        let dest = get_fixed_str(&mut src, MAX_PATH_SIZE)?;
        let sha256 = get_array::<SHA256_LENGTH>(&mut src)?;
        Ok(Self {
            src: source,
            dest,
            sha256,
            overwrite: src.get_u8() != 0,
            hash_ignore: src.get_u8() != 0,
            dry_run: src.get_u8() != 0,
        })
    }
}

/// Reply to a dry-run upload: the verdict plus the request echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDryCallback {
    pub ack: GenericAck,
    pub request: FileTransferMeta,
}

impl WirePayload for UploadDryCallback {
    const BINARY_SIZE: usize = GenericAck::BINARY_SIZE + FileTransferMeta::BINARY_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        self.ack.write_binary(out)?;
        self.request.write_binary(out)
    }

    fn read_binary(src: &[u8]) -> Result<Self> {
        let (ack, request) = src.split_at(GenericAck::BINARY_SIZE);
        Ok(Self {
            ack: GenericAck::read_binary(ack)?,
            request: FileTransferMeta::read_binary(request)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBegin {
    #[serde(rename = "destfilepath")]
    pub dest: String,
    pub total_size: u64,
    pub chunk_size: u32,
    #[serde(rename = "sha256_hash", with = "hex_array")]
    pub sha256: [u8; SHA256_LENGTH],
}

impl WirePayload for TransferBegin {
    const BINARY_SIZE: usize = MAX_PATH_SIZE + 8 + 4 + SHA256_LENGTH;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        put_fixed_str(out, &self.dest, MAX_PATH_SIZE)?;
        out.put_u64(self.total_size);
        out.put_u32(self.chunk_size);
        out.put_slice(&self.sha256);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let dest = get_fixed_str(&mut src, MAX_PATH_SIZE)?;
        let total_size = src.get_u64();
        let chunk_size = src.get_u32();
        let sha256 = get_array::<SHA256_LENGTH>(&mut src)?;
        Ok(Self {
            dest,
            total_size,
            chunk_size,
            sha256,
        })
    }
}

/// Chunk header; `size` raw bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferChunk {
    #[serde(rename = "chunk_index")]
    pub index: u32,
    #[serde(rename = "chunk_data_size")]
    pub size: u32,
}

impl WirePayload for TransferChunk {
    const BINARY_SIZE: usize = 8;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_u32(self.index);
        out.put_u32(self.size);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            index: src.get_u32(),
            size: src.get_u32(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferChunkResponse {
    pub index: u32,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl WirePayload for TransferChunkResponse {
    const BINARY_SIZE: usize = 4 + 1 + MAX_MSG_SIZE;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_u32(self.index);
        out.put_u8(self.success as u8);
        put_fixed_str(out, &self.message, MAX_MSG_SIZE)
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        let index = src.get_u32();
        let success = src.get_u8() != 0;
        let message = get_fixed_str(&mut src, MAX_MSG_SIZE)?;
        Ok(Self {
            index,
            success,
            message,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEnd {
    pub verify_hash: bool,
}

impl WirePayload for TransferEnd {
    const BINARY_SIZE: usize = 1;

    fn write_binary(&self, out: &mut BytesMut) -> Result<()> {
        out.put_u8(self.verify_hash as u8);
        Ok(())
    }

    fn read_binary(mut src: &[u8]) -> Result<Self> {
        Ok(Self {
            verify_hash: src.get_u8() != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::core::serialization::PayloadType;

    #[test]
    fn ack_json_uses_wire_keys() {
        let ack = GenericAck::new(AckType::CommandIgnored, "busy");
        let json = ack.to_payload(PayloadType::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["result"], 3);
        assert_eq!(value["error_msg"], "busy");
    }

    #[test]
    fn ack_binary_layout() {
        let bin = GenericAck::new(AckType::InvalidArgument, "bad")
            .to_payload(PayloadType::Binary)
            .unwrap();
        assert_eq!(bin.len(), 260);
        assert_eq!(&bin[..4], &2i32.to_be_bytes());
        assert_eq!(&bin[4..7], b"bad");
    }

    #[test]
    fn long_ack_messages_are_cut_on_char_boundary() {
        let ack = GenericAck::new(AckType::RuntimeError, "é".repeat(300));
        assert!(ack.message.len() < MAX_MSG_SIZE);
        assert!(ack.to_payload(PayloadType::Binary).is_ok());
    }

    #[test]
    fn ack_converts_back_to_errors() {
        assert!(GenericAck::ok().into_result().is_ok());
        assert!(matches!(
            GenericAck::new(AckType::CommandIgnored, "x").into_result(),
            Err(ProtocolError::CommandIgnored(_))
        ));
    }

    #[test]
    fn unknown_enum_values_are_rejected() {
        let mut bin = CtrlSpamBlock {
            mode: SpamBlockMode::Purge,
        }
        .to_payload(PayloadType::Binary)
        .unwrap();
        bin[3] = 9;
        assert!(CtrlSpamBlock::from_payload(&bin, PayloadType::Binary).is_err());
        assert!(FileType::try_from(6).is_err());
    }

    #[test]
    fn file_meta_is_547_bytes_with_hex_hash_in_json() {
        assert_eq!(FileTransferMeta::BINARY_SIZE, 547);
        let meta = FileTransferMeta::new(
            "a.txt",
            "/tmp/a.txt",
            [0xAB; SHA256_LENGTH],
            TransferOptions {
                overwrite: true,
                ..Default::default()
            },
        );
        let json = meta.to_payload(PayloadType::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["srcfilepath"], "a.txt");
        assert_eq!(value["destfilepath"], "/tmp/a.txt");
        assert_eq!(value["hash"], "ab".repeat(32));
        assert_eq!(value["options"]["overwrite"], true);
        assert_eq!(value["options"]["dry_run"], false);
        let back = FileTransferMeta::from_payload(&json, PayloadType::Json).unwrap();
        assert_eq!(back, meta);
        assert!(back.has_hash());
    }

    #[test]
    fn file_meta_json_hash_follows_hash_ignore() {
        let ignored = FileTransferMeta::new(
            "a",
            "/b",
            [0x11; SHA256_LENGTH],
            TransferOptions {
                hash_ignore: true,
                ..Default::default()
            },
        );
        let json = ignored.to_payload(PayloadType::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert!(value.get("hash").is_none());
        let back = FileTransferMeta::from_payload(&json, PayloadType::Json).unwrap();
        assert!(back.hash_ignore);
        assert!(!back.has_hash());

        let missing = br#"{"srcfilepath":"a","destfilepath":"/b","options":{"overwrite":true}}"#;
        assert!(matches!(
            FileTransferMeta::from_payload(missing, PayloadType::Json),
            Err(ProtocolError::DeserializeError(_))
        ));
        let bad_hex = br#"{"srcfilepath":"a","destfilepath":"/b","hash":"zz"}"#;
        assert!(FileTransferMeta::from_payload(bad_hex, PayloadType::Json).is_err());
    }

    #[test]
    fn chunked_transfer_json_keys() {
        let begin = TransferBegin {
            dest: "/big.bin".into(),
            total_size: 10,
            chunk_size: 4,
            sha256: [0xCD; SHA256_LENGTH],
        };
        let value: serde_json::Value =
            serde_json::from_slice(&begin.to_payload(PayloadType::Json).unwrap()).unwrap();
        assert_eq!(value["destfilepath"], "/big.bin");
        assert_eq!(value["sha256_hash"], "cd".repeat(32));

        let chunk = TransferChunk { index: 2, size: 4 };
        let value: serde_json::Value =
            serde_json::from_slice(&chunk.to_payload(PayloadType::Json).unwrap()).unwrap();
        assert_eq!(value["chunk_index"], 2);
        assert_eq!(value["chunk_data_size"], 4);
    }

    #[test]
    fn uptime_text_fits_its_field() {
        let report = UptimeReport::from_duration(Duration::from_secs(3 * 3600 + 4 * 60 + 5));
        assert_eq!(report.uptime, "Uptime: 3h 4m 5s");
        let long = UptimeReport::from_duration(Duration::from_secs(10_000 * 3600 + 3599));
        assert_eq!(long.uptime, "Uptime: 999h 59m 59s");
        assert!(long.to_payload(PayloadType::Binary).is_ok());
    }

    #[test]
    fn dry_callback_concatenates_ack_and_meta() {
        let callback = UploadDryCallback {
            ack: GenericAck::ok(),
            request: FileTransferMeta::new("s", "d", [0; SHA256_LENGTH], TransferOptions::default()),
        };
        let bin = callback.to_payload(PayloadType::Binary).unwrap();
        assert_eq!(bin.len(), 260 + 547);
        assert_eq!(
            UploadDryCallback::from_payload(&bin, PayloadType::Binary).unwrap(),
            callback
        );
    }
}
