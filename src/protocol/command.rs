//! Command identifiers.
//!
//! Ids below [`CLIENT_MAX`] are client-addressable requests. Ids from
//! [`INTERNAL_START`] upward are reserved for replies and protocol plumbing;
//! an unregistered internal id is dropped without a response.

use std::fmt;

/// First id of the internal range
pub const INTERNAL_START: i32 = 100;

/// One past the last client command id
pub const CLIENT_MAX: i32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    WriteMsgToChatId,
    CtrlSpamBlock,
    ObserveChatId,
    SendFileToChatId,
    ObserveAllChats,
    GetUptime,
    UploadFile,
    DownloadFile,
    TransferFileBegin,
    TransferFileChunk,
    TransferFileEnd,
    GetUptimeCallback,
    GenericAck,
    OpenSession,
    OpenSessionAck,
    CloseSession,
    UploadFileDry,
    UploadFileDryCallback,
    DownloadFileCallback,
    TransferFileChunkResponse,
    /// Any id this build does not know
    Unknown(i32),
}

impl Command {
    /// Every known command, in id order.
    pub const ALL: [Command; 20] = [
        Command::WriteMsgToChatId,
        Command::CtrlSpamBlock,
        Command::ObserveChatId,
        Command::SendFileToChatId,
        Command::ObserveAllChats,
        Command::GetUptime,
        Command::UploadFile,
        Command::DownloadFile,
        Command::TransferFileBegin,
        Command::TransferFileChunk,
        Command::TransferFileEnd,
        Command::GetUptimeCallback,
        Command::GenericAck,
        Command::OpenSession,
        Command::OpenSessionAck,
        Command::CloseSession,
        Command::UploadFileDry,
        Command::UploadFileDryCallback,
        Command::DownloadFileCallback,
        Command::TransferFileChunkResponse,
    ];

    pub fn id(self) -> i32 {
        match self {
            Command::WriteMsgToChatId => 1,
            Command::CtrlSpamBlock => 2,
            Command::ObserveChatId => 3,
            Command::SendFileToChatId => 4,
            Command::ObserveAllChats => 5,
            Command::GetUptime => 6,
            Command::UploadFile => 7,
            Command::DownloadFile => 8,
            Command::TransferFileBegin => 9,
            Command::TransferFileChunk => 10,
            Command::TransferFileEnd => 11,
            Command::GetUptimeCallback => 100,
            Command::GenericAck => 101,
            Command::OpenSession => 102,
            Command::OpenSessionAck => 103,
            Command::CloseSession => 104,
            Command::UploadFileDry => 105,
            Command::UploadFileDryCallback => 106,
            Command::DownloadFileCallback => 107,
            Command::TransferFileChunkResponse => 108,
            Command::Unknown(id) => id,
        }
    }

    pub fn from_id(id: i32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.id() == id)
            .unwrap_or(Command::Unknown(id))
    }

    pub fn is_client(self) -> bool {
        (1..CLIENT_MAX).contains(&self.id())
    }

    pub fn is_internal(self) -> bool {
        self.id() >= INTERNAL_START
    }

    /// Packets that may travel without a session.
    pub fn is_sessionless(self) -> bool {
        matches!(self, Command::OpenSession | Command::OpenSessionAck)
    }

    /// Wire name, e.g. `CMD_GET_UPTIME`.
    pub fn name(self) -> &'static str {
        match self {
            Command::WriteMsgToChatId => "CMD_WRITE_MSG_TO_CHAT_ID",
            Command::CtrlSpamBlock => "CMD_CTRL_SPAMBLOCK",
            Command::ObserveChatId => "CMD_OBSERVE_CHAT_ID",
            Command::SendFileToChatId => "CMD_SEND_FILE_TO_CHAT_ID",
            Command::ObserveAllChats => "CMD_OBSERVE_ALL_CHATS",
            Command::GetUptime => "CMD_GET_UPTIME",
            Command::UploadFile => "CMD_UPLOAD_FILE",
            Command::DownloadFile => "CMD_DOWNLOAD_FILE",
            Command::TransferFileBegin => "CMD_TRANSFER_FILE_BEGIN",
            Command::TransferFileChunk => "CMD_TRANSFER_FILE_CHUNK",
            Command::TransferFileEnd => "CMD_TRANSFER_FILE_END",
            Command::GetUptimeCallback => "CMD_GET_UPTIME_CALLBACK",
            Command::GenericAck => "CMD_GENERIC_ACK",
            Command::OpenSession => "CMD_OPEN_SESSION",
            Command::OpenSessionAck => "CMD_OPEN_SESSION_ACK",
            Command::CloseSession => "CMD_CLOSE_SESSION",
            Command::UploadFileDry => "CMD_UPLOAD_FILE_DRY",
            Command::UploadFileDryCallback => "CMD_UPLOAD_FILE_DRY_CALLBACK",
            Command::DownloadFileCallback => "CMD_DOWNLOAD_FILE_CALLBACK",
            Command::TransferFileChunkResponse => "CMD_TRANSFER_FILE_CHUNK_RESPONSE",
            Command::Unknown(_) => "CMD_UNKNOWN",
        }
    }

    /// Required argument names for client commands.
    pub fn arguments(self) -> &'static [&'static str] {
        match self {
            Command::WriteMsgToChatId => &["Chat ID", "Text"],
            Command::CtrlSpamBlock => &["Off/LoggingOnly/Purge/PurgeAndMute (0-3)"],
            Command::ObserveChatId => &["Chat ID", "Observe (true/false)"],
            Command::SendFileToChatId => &["Chat ID", "File type", "File path"],
            Command::ObserveAllChats => &["Observe (true/false)"],
            Command::GetUptime => &[],
            Command::UploadFile => &["Source file path", "Destination file path"],
            Command::DownloadFile => &["Remote file path", "Local file path"],
            Command::TransferFileBegin => &["Source file path", "Destination file path"],
            Command::TransferFileChunk => &["Chunk index"],
            Command::TransferFileEnd => &["Verify hash (true/false)"],
            _ => &[],
        }
    }

    pub fn arg_count(self) -> usize {
        self.arguments().len()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(id) => write!(f, "CMD_UNKNOWN({id})"),
            known => f.write_str(known.name()),
        }
    }
}

/// Usage text listing every client command with its arguments.
pub fn help_text() -> String {
    let mut help = String::from("Available commands:\n");
    for cmd in Command::ALL.iter().filter(|c| c.is_client()) {
        let args = cmd.arguments();
        help.push_str(&format!("  {} ({}): {} arg(s)", cmd, cmd.id(), args.len()));
        if !args.is_empty() {
            help.push_str(&format!(" - {}", args.join(", ")));
        }
        help.push('\n');
    }
    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_and_unknowns_survive() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_id(cmd.id()), cmd);
        }
        assert_eq!(Command::from_id(55), Command::Unknown(55));
        assert_eq!(Command::from_id(150).id(), 150);
    }

    #[test]
    fn ranges_partition_the_id_space() {
        assert!(Command::GetUptime.is_client());
        assert!(!Command::GetUptime.is_internal());
        assert!(Command::GenericAck.is_internal());
        assert!(Command::Unknown(199).is_internal());
        assert!(!Command::Unknown(0).is_client());
        assert!(!Command::Unknown(CLIENT_MAX).is_client());
    }

    #[test]
    fn argument_counts() {
        assert_eq!(Command::WriteMsgToChatId.arg_count(), 2);
        assert_eq!(Command::CtrlSpamBlock.arg_count(), 1);
        assert_eq!(Command::SendFileToChatId.arg_count(), 3);
        assert_eq!(Command::GetUptime.arg_count(), 0);
        assert_eq!(Command::UploadFile.arg_count(), 2);
    }

    #[test]
    fn help_lists_only_client_commands() {
        let help = help_text();
        assert!(help.contains("CMD_SEND_FILE_TO_CHAT_ID (4): 3 arg(s)"));
        assert!(help.contains("CMD_GET_UPTIME (6): 0 arg(s)\n"));
        assert!(!help.contains("CMD_GENERIC_ACK"));
    }
}
