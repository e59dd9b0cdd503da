//! Command identity: the `(batch, phase, sequence)` triple carried by every
//! coordination message.
//!
//! Command ids are totally ordered lexicographically. A sender calls
//! [`CommandId::init_phase`] when it moves to a new phase and
//! [`CommandId::next`] before each command it issues in that phase.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Phase
// ============================================================================

/// Protocol phase, declared in protocol order.
///
/// The derived ordering is significant: a command whose phase sorts before
/// the receiver's current phase belongs to a phase the receiver has already
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Freshly started worker, no role yet.
    Init,
    /// Role assignment (`SetRole`, `SetRoleDone`).
    SetRole,
    /// Start of a version batch (`ResetVersionBatch`).
    ResetBatch,
    /// Sample blocks handed to loaders.
    SampleFile,
    /// Loaders forwarding sampled mutations to the master applier.
    SendSampleMutations,
    /// Master applier computing key-range boundaries.
    CalculateKeyRange,
    /// Master collecting the computed boundaries.
    GetKeyRange,
    /// Appliers receiving the key-range assignment.
    AssignApplierKeyRange,
    /// Loaders receiving the key-range assignment.
    NotifyLoaderKeyRange,
    /// Backup files handed to loaders.
    AssignLoaderFile,
    /// Loaders forwarding decoded mutations to appliers.
    SendMutations,
    /// Appliers writing buffered mutations to the target store.
    ApplyToDb,
    /// End of the restore request.
    FinishRestore,
}

impl Phase {
    /// All phases in protocol order.
    pub const ALL: [Phase; 13] = [
        Phase::Init,
        Phase::SetRole,
        Phase::ResetBatch,
        Phase::SampleFile,
        Phase::SendSampleMutations,
        Phase::CalculateKeyRange,
        Phase::GetKeyRange,
        Phase::AssignApplierKeyRange,
        Phase::NotifyLoaderKeyRange,
        Phase::AssignLoaderFile,
        Phase::SendMutations,
        Phase::ApplyToDb,
        Phase::FinishRestore,
    ];

    /// Returns true for phases that may arrive with a newer batch number
    /// than the receiver's.
    pub fn starts_batch(self) -> bool {
        matches!(
            self,
            Phase::SetRole | Phase::ResetBatch | Phase::FinishRestore
        )
    }

    /// Returns a human-readable name for the phase.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::SetRole => "SetRole",
            Phase::ResetBatch => "ResetBatch",
            Phase::SampleFile => "SampleFile",
            Phase::SendSampleMutations => "SendSampleMutations",
            Phase::CalculateKeyRange => "CalculateKeyRange",
            Phase::GetKeyRange => "GetKeyRange",
            Phase::AssignApplierKeyRange => "AssignApplierKeyRange",
            Phase::NotifyLoaderKeyRange => "NotifyLoaderKeyRange",
            Phase::AssignLoaderFile => "AssignLoaderFile",
            Phase::SendMutations => "SendMutations",
            Phase::ApplyToDb => "ApplyToDb",
            Phase::FinishRestore => "FinishRestore",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// CommandId
// ============================================================================

/// Identity of one coordination command.
///
/// Field order matters: the derived `Ord` compares batch, then phase, then
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId {
    batch: u32,
    phase: Phase,
    sequence: u64,
}

impl CommandId {
    /// Creates a command id at the start of `phase` in `batch`.
    pub fn new(batch: u32, phase: Phase) -> Self {
        Self {
            batch,
            phase,
            sequence: 0,
        }
    }

    /// Initial id of a process that has issued nothing yet.
    pub fn initial() -> Self {
        Self::new(0, Phase::Init)
    }

    pub fn batch(&self) -> u32 {
        self.batch
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Enters `phase`, resetting the sequence to 0.
    pub fn init_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.sequence = 0;
    }

    /// Enters `batch` at `phase`, resetting the sequence to 0.
    pub fn init_batch(&mut self, batch: u32, phase: Phase) {
        self.batch = batch;
        self.init_phase(phase);
    }

    /// Advances the sequence and returns the id to stamp on the next command.
    pub fn next(&mut self) -> CommandId {
        self.sequence += 1;
        *self
    }

    /// Like [`next`](Self::next), entering `batch`/`phase` first if the
    /// sender is not already there. Staying in the same phase keeps the
    /// sequence running, so every id a sender stamps is unique.
    pub fn next_in(&mut self, batch: u32, phase: Phase) -> CommandId {
        if self.batch != batch || self.phase != phase {
            self.init_batch(batch, phase);
        }
        self.next()
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::initial()
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.batch, self.phase, self.sequence)
    }
}
