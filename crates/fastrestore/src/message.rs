//! Coordination commands and replies.
//!
//! Every RPC is a [`Command`] envelope stamped with a [`CommandId`] and
//! answered by exactly one [`Reply`] (or dropped, on protocol desync).
//!
//! ## Role assignment
//! - `SetRole`, `SetRoleDone` - Master → Worker
//!
//! ## Per version batch
//! - `ResetVersionBatch` - Master → Worker
//! - `SampleRangeFile`, `SampleLogFile`, `SampleFileDone` - Master → Loader
//! - `LoaderSendSampleMutationToApplier(+Done)` - Loader/Master → Master applier
//! - `CalculateApplierKeyRange`, `GetApplierKeyRange(+Done)` - Master → Master applier
//! - `AssignApplierKeyRange(+Done)` - Master → Applier
//! - `NotifyLoaderApplierKeyRange(+Done)` - Master → Loader
//! - `AssignLoaderRangeFile`, `AssignLoaderLogFile`, `AssignLoaderFileDone` - Master → Loader
//! - `LoaderSendMutationsToApplier(+Done)` - Loader/Master → Applier
//! - `LoaderNotifyApplierToApplyMutation` - Master → Applier
//! - `ApplyMutationToDb(+Skip)` - Master → Applier
//!
//! ## End of request
//! - `FinishRestore` - Master → Worker

use fastrestore_types::{
    CommandId, Key, KeyRangeAssignment, LoadingParam, NodeId, Phase, Role, VersionedMutation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ============================================================================
// Envelope
// ============================================================================

/// A coordination command with routing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub from: NodeId,
    pub to: NodeId,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(id: CommandId, from: NodeId, to: NodeId, payload: CommandPayload) -> Self {
        Self {
            id,
            from,
            to,
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// Role assignment pushed to a worker at the start of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRole {
    pub role: Role,
    /// Position among the workers of the same role.
    pub index: u32,
    /// Applier that collects samples and computes key ranges.
    pub master_applier: NodeId,
    /// Request identity; appliers write under this lock owner.
    pub request_uid: Uuid,
    pub lock_db: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    SetRole(SetRole),
    SetRoleDone,
    ResetVersionBatch,

    // === Sampling ===
    SampleRangeFile(LoadingParam),
    SampleLogFile(LoadingParam),
    SampleFileDone,
    LoaderSendSampleMutationToApplier(Vec<VersionedMutation>),
    LoaderSendSampleMutationToApplierDone,
    CalculateApplierKeyRange { num_appliers: u32 },
    GetApplierKeyRange { index: u32 },
    GetApplierKeyRangeDone,

    // === Key-range assignment ===
    AssignApplierKeyRange(KeyRangeAssignment),
    AssignApplierKeyRangeDone,
    NotifyLoaderApplierKeyRange(KeyRangeAssignment),
    NotifyLoaderApplierKeyRangeDone,

    // === Load ===
    AssignLoaderRangeFile(LoadingParam),
    AssignLoaderLogFile(LoadingParam),
    AssignLoaderFileDone,
    LoaderSendMutationsToApplier(Vec<VersionedMutation>),
    LoaderSendMutationsToApplierDone,

    // === Apply ===
    LoaderNotifyApplierToApplyMutation,
    ApplyMutationToDb,
    ApplyMutationToDbSkip,

    FinishRestore,
}

impl CommandPayload {
    /// Phase a command of this kind is stamped with.
    pub fn phase(&self) -> Phase {
        match self {
            CommandPayload::SetRole(_) | CommandPayload::SetRoleDone => Phase::SetRole,
            CommandPayload::ResetVersionBatch => Phase::ResetBatch,
            CommandPayload::SampleRangeFile(_)
            | CommandPayload::SampleLogFile(_)
            | CommandPayload::SampleFileDone => Phase::SampleFile,
            CommandPayload::LoaderSendSampleMutationToApplier(_)
            | CommandPayload::LoaderSendSampleMutationToApplierDone => Phase::SendSampleMutations,
            CommandPayload::CalculateApplierKeyRange { .. } => Phase::CalculateKeyRange,
            CommandPayload::GetApplierKeyRange { .. } | CommandPayload::GetApplierKeyRangeDone => {
                Phase::GetKeyRange
            }
            CommandPayload::AssignApplierKeyRange(_)
            | CommandPayload::AssignApplierKeyRangeDone => Phase::AssignApplierKeyRange,
            CommandPayload::NotifyLoaderApplierKeyRange(_)
            | CommandPayload::NotifyLoaderApplierKeyRangeDone => Phase::NotifyLoaderKeyRange,
            CommandPayload::AssignLoaderRangeFile(_)
            | CommandPayload::AssignLoaderLogFile(_)
            | CommandPayload::AssignLoaderFileDone => Phase::AssignLoaderFile,
            CommandPayload::LoaderSendMutationsToApplier(_)
            | CommandPayload::LoaderSendMutationsToApplierDone
            | CommandPayload::LoaderNotifyApplierToApplyMutation => Phase::SendMutations,
            CommandPayload::ApplyMutationToDb | CommandPayload::ApplyMutationToDbSkip => {
                Phase::ApplyToDb
            }
            CommandPayload::FinishRestore => Phase::FinishRestore,
        }
    }

    /// Returns a human-readable name for the command.
    pub fn name(&self) -> &'static str {
        match self {
            CommandPayload::SetRole(_) => "SetRole",
            CommandPayload::SetRoleDone => "SetRoleDone",
            CommandPayload::ResetVersionBatch => "ResetVersionBatch",
            CommandPayload::SampleRangeFile(_) => "SampleRangeFile",
            CommandPayload::SampleLogFile(_) => "SampleLogFile",
            CommandPayload::SampleFileDone => "SampleFileDone",
            CommandPayload::LoaderSendSampleMutationToApplier(_) => {
                "LoaderSendSampleMutationToApplier"
            }
            CommandPayload::LoaderSendSampleMutationToApplierDone => {
                "LoaderSendSampleMutationToApplierDone"
            }
            CommandPayload::CalculateApplierKeyRange { .. } => "CalculateApplierKeyRange",
            CommandPayload::GetApplierKeyRange { .. } => "GetApplierKeyRange",
            CommandPayload::GetApplierKeyRangeDone => "GetApplierKeyRangeDone",
            CommandPayload::AssignApplierKeyRange(_) => "AssignApplierKeyRange",
            CommandPayload::AssignApplierKeyRangeDone => "AssignApplierKeyRangeDone",
            CommandPayload::NotifyLoaderApplierKeyRange(_) => "NotifyLoaderApplierKeyRange",
            CommandPayload::NotifyLoaderApplierKeyRangeDone => "NotifyLoaderApplierKeyRangeDone",
            CommandPayload::AssignLoaderRangeFile(_) => "AssignLoaderRangeFile",
            CommandPayload::AssignLoaderLogFile(_) => "AssignLoaderLogFile",
            CommandPayload::AssignLoaderFileDone => "AssignLoaderFileDone",
            CommandPayload::LoaderSendMutationsToApplier(_) => "LoaderSendMutationsToApplier",
            CommandPayload::LoaderSendMutationsToApplierDone => "LoaderSendMutationsToApplierDone",
            CommandPayload::LoaderNotifyApplierToApplyMutation => {
                "LoaderNotifyApplierToApplyMutation"
            }
            CommandPayload::ApplyMutationToDb => "ApplyMutationToDb",
            CommandPayload::ApplyMutationToDbSkip => "ApplyMutationToDbSkip",
            CommandPayload::FinishRestore => "FinishRestore",
        }
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyBody {
    Ack,
    /// Number of key-range lower bounds the master applier computed.
    KeyRangeCount(u32),
    /// One computed lower bound.
    KeyRangeBound { index: u32, lower_bound: Key },
}

/// Category of a failure reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    CorruptedData,
    Store,
    Container,
    Protocol,
    Internal,
}

/// A failure reported by the receiver of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&Error> for RemoteError {
    fn from(error: &Error) -> Self {
        let kind = match error {
            Error::Codec { .. } => RemoteErrorKind::CorruptedData,
            Error::Store(_) => RemoteErrorKind::Store,
            Error::Container(_) => RemoteErrorKind::Container,
            Error::Protocol(_) | Error::CommandDropped { .. } => RemoteErrorKind::Protocol,
            Error::Remote { error, .. } => error.kind,
            Error::RoundFailed { last, .. } => RemoteError::from(last.as_ref()).kind,
            _ => RemoteErrorKind::Internal,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// The worker that executed the command.
    pub worker: NodeId,
    pub id: CommandId,
    pub outcome: Result<ReplyBody, RemoteError>,
}

impl Reply {
    pub fn ack(worker: NodeId, id: CommandId) -> Self {
        Self {
            worker,
            id,
            outcome: Ok(ReplyBody::Ack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_markers_share_their_phase() {
        let pairs = [
            (CommandPayload::SetRoleDone, Phase::SetRole),
            (CommandPayload::SampleFileDone, Phase::SampleFile),
            (
                CommandPayload::LoaderSendSampleMutationToApplierDone,
                Phase::SendSampleMutations,
            ),
            (CommandPayload::GetApplierKeyRangeDone, Phase::GetKeyRange),
            (CommandPayload::AssignLoaderFileDone, Phase::AssignLoaderFile),
            (CommandPayload::ApplyMutationToDbSkip, Phase::ApplyToDb),
        ];
        for (payload, phase) in pairs {
            assert_eq!(payload.phase(), phase, "{}", payload.name());
        }
    }

    #[test]
    fn test_remote_error_kind_from_codec() {
        let error = Error::codec("logs/log,1,2,x,16", fastrestore_codec::CodecError::MalformedLogKey { len: 3 });
        let remote = RemoteError::from(&error);
        assert_eq!(remote.kind, RemoteErrorKind::CorruptedData);
        assert!(remote.message.contains("logs/log,1,2,x,16"));
    }

    #[test]
    fn test_command_survives_postcard() {
        let mut id = CommandId::initial();
        let command = Command::new(
            id.next_in(1, Phase::CalculateKeyRange),
            NodeId::MASTER,
            NodeId::new(2),
            CommandPayload::CalculateApplierKeyRange { num_appliers: 3 },
        );
        let bytes = postcard::to_allocvec(&command).unwrap();
        let decoded: Command = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, command);
        assert_eq!(decoded.name(), "CalculateApplierKeyRange");
    }
}
