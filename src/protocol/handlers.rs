//! Built-in command handlers.
//!
//! Chat commands are forwarded to a [`BotApi`] implementation supplied by the
//! embedding application; this crate only decodes, validates and acks them.

use std::sync::Arc;
use std::time::Instant;

use crate::core::serialization::WirePayload;
use crate::error::Result;
use crate::protocol::command::Command;
use crate::protocol::dispatcher::{Dispatcher, HandlerOutcome, PayloadSize};
use crate::protocol::message::{
    CtrlSpamBlock, FileType, ObserveAllChats, ObserveChatId, SendFileToChatId, SpamBlockMode,
    UptimeReport, WriteMsgToChatId,
};

/// The bot side of the control protocol.
///
/// Errors map to ack types: `InvalidArgument` for bad input, `Backend` for
/// failures of the chat service, anything else as a runtime error.
pub trait BotApi: Send + Sync {
    fn send_message(&self, chat: i64, text: &str) -> Result<()>;
    fn observe_chat(&self, chat: i64, observe: bool) -> Result<()>;
    fn observe_all_chats(&self, observe: bool) -> Result<()>;
    fn send_file(&self, chat: i64, file_type: FileType, path: &str) -> Result<()>;
    fn set_spam_block(&self, mode: SpamBlockMode) -> Result<()>;
}

/// Route the chat commands to `bot`.
pub fn register_bot_commands(dispatcher: &Dispatcher, bot: Arc<dyn BotApi>) -> Result<()> {
    let api = bot.clone();
    dispatcher.register(
        Command::WriteMsgToChatId,
        PayloadSize::Exact(WriteMsgToChatId::BINARY_SIZE),
        move |req| {
            let msg: WriteMsgToChatId = req.decode()?;
            api.send_message(msg.chat, &msg.message)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let api = bot.clone();
    dispatcher.register(
        Command::ObserveChatId,
        PayloadSize::Exact(ObserveChatId::BINARY_SIZE),
        move |req| {
            let msg: ObserveChatId = req.decode()?;
            api.observe_chat(msg.chat, msg.observe)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let api = bot.clone();
    dispatcher.register(
        Command::ObserveAllChats,
        PayloadSize::Exact(ObserveAllChats::BINARY_SIZE),
        move |req| {
            let msg: ObserveAllChats = req.decode()?;
            api.observe_all_chats(msg.observe)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let api = bot.clone();
    dispatcher.register(
        Command::SendFileToChatId,
        PayloadSize::Exact(SendFileToChatId::BINARY_SIZE),
        move |req| {
            let msg: SendFileToChatId = req.decode()?;
            api.send_file(msg.chat, msg.file_type, &msg.path)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    dispatcher.register(
        Command::CtrlSpamBlock,
        PayloadSize::Exact(CtrlSpamBlock::BINARY_SIZE),
        move |req| {
            let msg: CtrlSpamBlock = req.decode()?;
            bot.set_spam_block(msg.mode)?;
            Ok(HandlerOutcome::ok())
        },
    )
}

/// Handlers that need nothing from the bot.
pub fn register_builtin_commands(dispatcher: &Dispatcher, started: Instant) -> Result<()> {
    dispatcher.register(Command::GetUptime, PayloadSize::Exact(0), move |req| {
        req.respond(
            Command::GetUptimeCallback,
            &UptimeReport::from_duration(started.elapsed()),
        )
    })
}
