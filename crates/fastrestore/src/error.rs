//! Error types for the restore protocol.

use std::time::Duration;

use fastrestore_codec::CodecError;
use fastrestore_types::{NodeId, Version};
use thiserror::Error;

use crate::message::RemoteError;

/// Result type for restore operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Restore errors.
#[derive(Debug, Error)]
pub enum Error {
    /// One command got no reply within the round deadline.
    #[error("{command} to {node} timed out")]
    RpcTimeout { node: NodeId, command: &'static str },

    /// The reply to a command was lost in transit.
    #[error("reply to {command} from {node} was lost")]
    ReplyLost { node: NodeId, command: &'static str },

    /// A round kept failing after every retry.
    #[error("round {round} failed after {attempts} attempts: {last}")]
    RoundFailed {
        round: &'static str,
        attempts: u32,
        last: Box<Error>,
    },

    /// The receiver dropped the command without replying (protocol desync).
    #[error("{command} was dropped by {node}")]
    CommandDropped { node: NodeId, command: &'static str },

    /// The receiver executed the command and reported a failure.
    #[error("{node} failed {command}: {error}")]
    Remote {
        node: NodeId,
        command: &'static str,
        error: RemoteError,
    },

    /// The request or cluster setup is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command arrived that the receiver cannot handle in its role/state.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("backup container error: {0}")]
    Container(#[from] ContainerError),

    /// A backup file failed to decode.
    #[error("corrupted backup file {file}: {source}")]
    Codec {
        file: String,
        #[source]
        source: CodecError,
    },

    #[error("transport error: {0}")]
    Transport(String),

    /// The whole restore request exceeded its deadline.
    #[error("restore request timed out after {0:?}")]
    RequestTimeout(Duration),
}

impl Error {
    /// True for transient transport failures that a round re-send may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RpcTimeout { .. } | Error::ReplyLost { .. })
    }

    pub(crate) fn codec(file: &str, source: CodecError) -> Self {
        Error::Codec {
            file: file.to_string(),
            source,
        }
    }
}

/// Errors from the target store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The transaction conflicted with another writer.
    #[error("transaction conflict")]
    Conflict,

    /// The database is locked by another restore.
    #[error("database is locked by {owner}")]
    Locked { owner: uuid::Uuid },

    #[error("database is not locked by {uid}")]
    NotLocked { uid: uuid::Uuid },
}

impl StoreError {
    /// True for errors a transaction retry may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

/// Errors from a backup container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("unsupported backup URL {0}")]
    InvalidUrl(String),

    #[error("backup file {0} not found")]
    NotFound(String),

    #[error("malformed backup file name {0}")]
    BadFileName(String),

    #[error("read of {len} bytes at {offset} in {file} returned {got}")]
    ShortRead {
        file: String,
        offset: u64,
        len: u64,
        got: u64,
    },

    /// No consistent restore set exists for the requested version.
    #[error("backup is not restorable to version {target}: {reason}")]
    NotRestorable { target: Version, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
