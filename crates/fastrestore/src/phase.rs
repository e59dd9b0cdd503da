//! Phase tracking on the receiving side of a command.
//!
//! Each worker tracks the `(batch, phase)` it is in. An incoming command is
//! admitted, ignored as stale, or rejected as a protocol desync, based on
//! its [`CommandId`] and the transition table below.

use fastrestore_types::{CommandId, Phase};

/// Phases a receiver in `from` may move to.
///
/// ```text
/// Init                  -> SetRole
/// SetRole               -> ResetBatch | FinishRestore
/// ResetBatch            -> SampleFile | SendSampleMutations | AssignApplierKeyRange | FinishRestore
/// SampleFile            -> NotifyLoaderKeyRange | FinishRestore
/// SendSampleMutations   -> CalculateKeyRange | FinishRestore
/// CalculateKeyRange     -> GetKeyRange | FinishRestore
/// GetKeyRange           -> AssignApplierKeyRange | FinishRestore
/// AssignApplierKeyRange -> SendMutations | ApplyToDb | ResetBatch | FinishRestore
/// NotifyLoaderKeyRange  -> AssignLoaderFile | FinishRestore
/// AssignLoaderFile      -> ResetBatch | FinishRestore
/// SendMutations         -> ApplyToDb | FinishRestore
/// ApplyToDb             -> ResetBatch | FinishRestore
/// FinishRestore         -> SetRole
/// ```
///
/// Appliers owning no key range jump from `AssignApplierKeyRange` straight
/// to `ApplyToDb` (skip) or to the next batch. `FinishRestore` is reachable
/// from every assigned phase so a failed request can release its workers.
pub fn successors(from: Phase) -> &'static [Phase] {
    match from {
        Phase::Init => &[Phase::SetRole],
        Phase::SetRole => &[Phase::ResetBatch, Phase::FinishRestore],
        Phase::ResetBatch => &[
            Phase::SampleFile,
            Phase::SendSampleMutations,
            Phase::AssignApplierKeyRange,
            Phase::FinishRestore,
        ],
        Phase::SampleFile => &[Phase::NotifyLoaderKeyRange, Phase::FinishRestore],
        Phase::SendSampleMutations => &[Phase::CalculateKeyRange, Phase::FinishRestore],
        Phase::CalculateKeyRange => &[Phase::GetKeyRange, Phase::FinishRestore],
        Phase::GetKeyRange => &[Phase::AssignApplierKeyRange, Phase::FinishRestore],
        Phase::AssignApplierKeyRange => &[
            Phase::SendMutations,
            Phase::ApplyToDb,
            Phase::ResetBatch,
            Phase::FinishRestore,
        ],
        Phase::NotifyLoaderKeyRange => &[Phase::AssignLoaderFile, Phase::FinishRestore],
        Phase::AssignLoaderFile => &[Phase::ResetBatch, Phase::FinishRestore],
        Phase::SendMutations => &[Phase::ApplyToDb, Phase::FinishRestore],
        Phase::ApplyToDb => &[Phase::ResetBatch, Phase::FinishRestore],
        Phase::FinishRestore => &[Phase::SetRole],
    }
}

/// Returns true if the table allows `from -> to`.
pub fn can_transition(from: Phase, to: Phase) -> bool {
    successors(from).contains(&to)
}

/// What a receiver does with an incoming command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Same batch and phase as the receiver: execute.
    Current,
    /// A legal transition: the receiver moved to the command's phase
    /// (and batch, when `new_batch`) and executes it.
    Advance { new_batch: bool },
    /// From a batch or phase the receiver already left: acknowledge only.
    Stale,
    /// Neither current, stale nor a legal successor: drop without reply.
    Desync,
}

/// The `(batch, phase)` a worker is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTracker {
    batch: u32,
    phase: Phase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            batch: 0,
            phase: Phase::Init,
        }
    }

    pub fn batch(&self) -> u32 {
        self.batch
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Classifies `id` and, on [`Admission::Advance`], moves to its phase.
    pub fn admit(&mut self, id: CommandId) -> Admission {
        let (batch, phase) = (id.batch(), id.phase());

        if batch < self.batch {
            return Admission::Stale;
        }

        if batch == self.batch {
            if phase == self.phase {
                return Admission::Current;
            }
            if phase < self.phase {
                return Admission::Stale;
            }
            if can_transition(self.phase, phase) {
                self.phase = phase;
                return Admission::Advance { new_batch: false };
            }
            return Admission::Desync;
        }

        if phase.starts_batch() && can_transition(self.phase, phase) {
            self.batch = batch;
            self.phase = phase;
            return Admission::Advance { new_batch: true };
        }
        Admission::Desync
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
