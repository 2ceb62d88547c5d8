//! # File Transfer
//!
//! Upload and download of files through a [`Vfs`].
//!
//! ## Single-shot
//! - `UploadFileDry`: metadata only. The receiver decides whether the live
//!   upload would be accepted and answers with `UploadFileDryCallback`.
//! - `UploadFile`: metadata followed by the file bytes, answered with an ack.
//! - `DownloadFile`: metadata naming the remote file, answered with
//!   `DownloadFileCallback` carrying the metadata and the bytes.
//!
//! ## Chunked
//! `TransferFileBegin` opens one pending upload per session, each
//! `TransferFileChunk` must carry the next index, and `TransferFileEnd` checks
//! the size and hash and writes the file. A rejected chunk aborts the
//! transfer. Closing or losing the session discards it.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_TRANSFER_SIZE;
use crate::core::serialization::WirePayload;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::dispatcher::{Dispatcher, HandlerOutcome, PayloadSize, Request};
use crate::protocol::message::{
    AckType, FileTransferMeta, GenericAck, TransferBegin, TransferChunk, TransferChunkResponse,
    TransferEnd, UploadDryCallback,
};
use crate::protocol::session::SessionManager;
use crate::utils::crypto::{sha256, SessionToken, SHA256_LENGTH};

/// Largest buffer reserved up front for a chunked upload
const INITIAL_TRANSFER_CAPACITY: usize = 1024 * 1024;

/// File access used by the transfer handlers.
pub trait Vfs: Send + Sync {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    fn exists(&self, path: &str) -> bool;

    /// Reject a path this filesystem will never accept.
    fn check_path(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    fn hash(&self, data: &[u8]) -> [u8; SHA256_LENGTH] {
        sha256(data)
    }
}

/// The local filesystem, optionally confined below a root directory.
#[derive(Debug, Clone, Default)]
pub struct RealFs {
    root: Option<PathBuf>,
}

impl RealFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every path relative to `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Map `path` below the root. `..` and drive prefixes are refused so a
    /// rooted filesystem never touches anything outside its root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };
        let mut resolved = root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ProtocolError::InvalidArgument(format!(
                        "{path}: {}",
                        constants::ERR_PATH_OUTSIDE_ROOT
                    )));
                }
            }
        }
        Ok(resolved)
    }
}

impl Vfs for RealFs {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn check_path(&self, path: &str) -> Result<()> {
        self.resolve(path).map(|_| ())
    }
}

/// In-memory files, for tests and dry environments.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: &[u8]) -> Result<()> {
        self.write_file(path, data)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vfs for MemoryFs {
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))?
            .insert(path.to_owned(), data.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.get(path).ok_or_else(|| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{path}: no such file"),
            ))
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.files
            .lock()
            .map(|f| f.contains_key(path))
            .unwrap_or(false)
    }
}

/// Whether a live upload described by `meta` would be accepted.
pub fn check_dry_run(vfs: &dyn Vfs, meta: &FileTransferMeta) -> GenericAck {
    if meta.dest.is_empty() {
        return GenericAck::new(AckType::InvalidArgument, "destination path is empty");
    }
    if let Err(e) = vfs.check_path(&meta.dest) {
        return GenericAck::from_error(&e);
    }
    if !vfs.exists(&meta.dest) {
        return GenericAck::ok();
    }
    if !meta.overwrite {
        return GenericAck::new(
            AckType::CommandIgnored,
            format!("{} exists and overwrite is not set", meta.dest),
        );
    }
    let existing = match vfs.read_file(&meta.dest) {
        Ok(data) => data,
        Err(e) => return GenericAck::from_error(&e),
    };
    if vfs.hash(&existing) == meta.sha256 && !meta.hash_ignore {
        return GenericAck::new(
            AckType::CommandIgnored,
            format!("{} already has the same content", meta.dest),
        );
    }
    GenericAck::ok()
}

/// Write a live upload, enforcing the same rules as its dry run.
pub fn store_upload(vfs: &dyn Vfs, meta: &FileTransferMeta, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(ProtocolError::InvalidArgument("upload carries no file bytes".into()));
    }
    if meta.has_hash() && !meta.hash_ignore && vfs.hash(data) != meta.sha256 {
        return Err(ProtocolError::InvalidArgument(format!(
            "{}: content does not match its sha256",
            meta.dest
        )));
    }
    check_dry_run(vfs, meta).into_result()?;
    vfs.write_file(&meta.dest, data)?;
    info!(dest = %meta.dest, bytes = data.len(), "Stored uploaded file");
    Ok(())
}

#[derive(Debug)]
struct PendingTransfer {
    begin: TransferBegin,
    next_index: u32,
    data: Vec<u8>,
}

/// Chunked uploads in progress, one per session.
pub struct TransferRegistry {
    pending: DashMap<SessionToken, PendingTransfer>,
    max_total: u64,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_TRANSFER_SIZE)
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse transfers announcing more than `max_total` bytes.
    pub fn with_limit(max_total: u64) -> Self {
        Self {
            pending: DashMap::new(),
            max_total,
        }
    }

    pub fn max_total(&self) -> u64 {
        self.max_total
    }

    pub fn is_active(&self, session: &SessionToken) -> bool {
        self.pending.contains_key(session)
    }

    pub fn active_count(&self) -> usize {
        self.pending.len()
    }

    pub fn discard(&self, session: &SessionToken) {
        if self.pending.remove(session).is_some() {
            debug!("Discarded pending transfer");
        }
    }

    pub fn begin(&self, session: SessionToken, begin: TransferBegin) -> Result<()> {
        if begin.dest.is_empty() {
            return Err(ProtocolError::InvalidArgument("destination path is empty".into()));
        }
        if begin.total_size == 0 || begin.chunk_size == 0 {
            return Err(ProtocolError::InvalidArgument(
                "total size and chunk size must be non-zero".into(),
            ));
        }
        if begin.total_size > self.max_total {
            return Err(ProtocolError::InvalidArgument(format!(
                "{}: {} bytes exceed the transfer limit of {}",
                begin.dest, begin.total_size, self.max_total
            )));
        }
        let capacity = usize::try_from(begin.total_size)
            .unwrap_or(usize::MAX)
            .min(INITIAL_TRANSFER_CAPACITY);

        match self.pending.entry(session) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ProtocolError::CommandIgnored(
                "a transfer is already in progress".into(),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(dest = %begin.dest, total = begin.total_size, "Transfer started");
                slot.insert(PendingTransfer {
                    begin,
                    next_index: 0,
                    data: Vec::with_capacity(capacity),
                });
                Ok(())
            }
        }
    }

    /// Append one chunk; any rejection aborts the transfer.
    pub fn chunk(&self, session: &SessionToken, chunk: TransferChunk, bytes: &[u8]) -> Result<()> {
        let outcome = {
            let Some(mut pending) = self.pending.get_mut(session) else {
                return Err(ProtocolError::CommandIgnored("no transfer in progress".into()));
            };
            Self::append(&mut pending, chunk, bytes)
        };
        if outcome.is_err() {
            self.discard(session);
        }
        outcome
    }

    fn append(pending: &mut PendingTransfer, chunk: TransferChunk, bytes: &[u8]) -> Result<()> {
        if chunk.index != pending.next_index {
            return Err(ProtocolError::InvalidArgument(format!(
                "chunk {} out of order, expected {}",
                chunk.index, pending.next_index
            )));
        }
        if bytes.len() != chunk.size as usize || chunk.size == 0 {
            return Err(ProtocolError::InvalidArgument(format!(
                "chunk {} declares {} bytes but carries {}",
                chunk.index,
                chunk.size,
                bytes.len()
            )));
        }
        if chunk.size > pending.begin.chunk_size {
            return Err(ProtocolError::InvalidArgument(format!(
                "chunk {} exceeds the agreed chunk size",
                chunk.index
            )));
        }
        if pending.data.len() as u64 + chunk.size as u64 > pending.begin.total_size {
            return Err(ProtocolError::InvalidArgument(format!(
                "chunk {} overruns the declared total of {} bytes",
                chunk.index, pending.begin.total_size
            )));
        }
        pending.data.extend_from_slice(bytes);
        pending.next_index += 1;
        Ok(())
    }

    /// Finish the transfer and write the file.
    pub fn finish(&self, vfs: &dyn Vfs, session: &SessionToken, end: TransferEnd) -> Result<()> {
        let Some((_, pending)) = self.pending.remove(session) else {
            return Err(ProtocolError::CommandIgnored("no transfer in progress".into()));
        };
        let begin = pending.begin;
        if pending.data.len() as u64 != begin.total_size {
            return Err(ProtocolError::InvalidArgument(format!(
                "received {} of {} bytes",
                pending.data.len(),
                begin.total_size
            )));
        }
        if end.verify_hash && vfs.hash(&pending.data) != begin.sha256 {
            return Err(ProtocolError::InvalidArgument(format!(
                "{}: content does not match its sha256",
                begin.dest
            )));
        }
        vfs.write_file(&begin.dest, &pending.data)?;
        info!(dest = %begin.dest, bytes = pending.data.len(), "Stored chunked upload");
        Ok(())
    }
}

fn session_of(req: &Request<'_>) -> Result<SessionToken> {
    req.session
        .ok_or_else(|| ProtocolError::Unauthenticated(constants::ERR_NO_SESSION.into()))
}

/// Route every transfer command to `vfs`, holding chunked uploads of at
/// most `max_transfer_size` bytes.
///
/// The returned registry is already wired to drop a session's pending
/// transfer when the session goes away.
pub fn register_transfer_commands(
    dispatcher: &Dispatcher,
    vfs: Arc<dyn Vfs>,
    sessions: &SessionManager,
    max_transfer_size: u64,
) -> Result<Arc<TransferRegistry>> {
    let registry = Arc::new(TransferRegistry::with_limit(max_transfer_size));

    let fs = vfs.clone();
    dispatcher.register(
        Command::UploadFileDry,
        PayloadSize::Exact(FileTransferMeta::BINARY_SIZE),
        move |req| {
            let meta: FileTransferMeta = req.decode()?;
            let ack = check_dry_run(fs.as_ref(), &meta);
            debug!(dest = %meta.dest, result = %ack.result, "Dry-run upload checked");
            req.respond(
                Command::UploadFileDryCallback,
                &UploadDryCallback { ack, request: meta },
            )
        },
    )?;

    let fs = vfs.clone();
    dispatcher.register(
        Command::UploadFile,
        PayloadSize::AtLeast(FileTransferMeta::BINARY_SIZE),
        move |req| {
            let (meta, data) = req.decode_with_trailing::<FileTransferMeta>()?;
            if meta.dry_run {
                let ack = check_dry_run(fs.as_ref(), &meta);
                return req.respond(
                    Command::UploadFileDryCallback,
                    &UploadDryCallback { ack, request: meta },
                );
            }
            store_upload(fs.as_ref(), &meta, data)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let fs = vfs.clone();
    dispatcher.register(
        Command::DownloadFile,
        PayloadSize::Exact(FileTransferMeta::BINARY_SIZE),
        move |req| {
            let meta: FileTransferMeta = req.decode()?;
            let data = fs.read_file(&meta.src).map_err(|e| {
                warn!(src = %meta.src, error = %e, "Download source unreadable");
                ProtocolError::Runtime(format!("{}: {}", meta.src, e))
            })?;
            let reply = FileTransferMeta {
                sha256: fs.hash(&data),
                ..meta
            };
            req.respond_with_trailing(Command::DownloadFileCallback, &reply, &data)
        },
    )?;

    let pending = registry.clone();
    dispatcher.register(
        Command::TransferFileBegin,
        PayloadSize::Exact(TransferBegin::BINARY_SIZE),
        move |req| {
            let begin: TransferBegin = req.decode()?;
            pending.begin(session_of(req)?, begin)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let pending = registry.clone();
    dispatcher.register(
        Command::TransferFileChunk,
        PayloadSize::AtLeast(TransferChunk::BINARY_SIZE),
        move |req| {
            let (chunk, bytes) = req.decode_with_trailing::<TransferChunk>()?;
            let response = match pending.chunk(&session_of(req)?, chunk, bytes) {
                Ok(()) => TransferChunkResponse {
                    index: chunk.index,
                    success: true,
                    message: String::new(),
                },
                Err(e) => {
                    warn!(index = chunk.index, error = %e, "Chunk rejected, transfer aborted");
                    TransferChunkResponse {
                        index: chunk.index,
                        success: false,
                        message: GenericAck::from_error(&e).message,
                    }
                }
            };
            req.respond(Command::TransferFileChunkResponse, &response)
        },
    )?;

    let pending = registry.clone();
    dispatcher.register(
        Command::TransferFileEnd,
        PayloadSize::Exact(TransferEnd::BINARY_SIZE),
        move |req| {
            let end: TransferEnd = req.decode()?;
            pending.finish(vfs.as_ref(), &session_of(req)?, end)?;
            Ok(HandlerOutcome::ok())
        },
    )?;

    let pending = registry.clone();
    sessions.on_close(move |token| pending.discard(token))?;

    Ok(registry)
}
