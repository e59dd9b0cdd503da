//! Worker processes: the command loop shared by loaders and appliers.
//!
//! A worker owns all of its state and handles commands one at a time:
//!
//! 1. A command already in the [`CommandLog`] is answered from the log.
//! 2. Otherwise the [`PhaseTracker`] classifies it. Stale commands are
//!    acknowledged without effect; desynchronized ones are dropped without a
//!    reply.
//! 3. Admitted commands are executed by the worker's role and the reply is
//!    logged before it is sent.

use std::sync::Arc;

use fastrestore_config::RestoreConfig;
use fastrestore_types::{NodeId, Role};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::applier::ApplierState;
use crate::backup::ContainerResolver;
use crate::command_log::CommandLog;
use crate::loader::LoaderState;
use crate::message::{Command, CommandPayload, RemoteError, Reply, ReplyBody};
use crate::phase::{Admission, PhaseTracker};
use crate::rpc::RoundPolicy;
use crate::store::Store;
use crate::transport::{Envelope, Transport};
use crate::{Error, Result};

/// What a worker needs from the outside world. Immutable once started.
#[derive(Debug, Clone)]
pub struct WorkerEnv<T, S> {
    pub node: NodeId,
    pub transport: T,
    pub store: S,
    pub containers: ContainerResolver,
    pub config: Arc<RestoreConfig>,
}

impl<T: Transport, S: Store> WorkerEnv<T, S> {
    pub(crate) fn round_policy(&self) -> RoundPolicy {
        RoundPolicy::from_config(&self.config.rpc)
    }
}

/// Per-role state, rebuilt by every `SetRole`.
#[derive(Debug)]
enum RoleState {
    Loader(LoaderState),
    Applier(ApplierState),
}

/// A worker and everything it owns.
#[derive(Debug)]
pub struct Worker<T, S> {
    env: WorkerEnv<T, S>,
    tracker: PhaseTracker,
    log: CommandLog,
    role: Option<RoleState>,
}

impl<T: Transport, S: Store> Worker<T, S> {
    pub fn new(env: WorkerEnv<T, S>) -> Self {
        Self {
            env,
            tracker: PhaseTracker::new(),
            log: CommandLog::new(),
            role: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.env.node
    }

    pub fn role(&self) -> Option<Role> {
        self.role.as_ref().map(|role| match role {
            RoleState::Loader(_) => Role::Loader,
            RoleState::Applier(_) => Role::Applier,
        })
    }

    /// Handles commands until the inbox closes.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Envelope>) {
        info!(node = %self.env.node, "worker started");
        while let Some(Envelope { command, reply }) = inbox.recv().await {
            if let Some(answer) = self.handle(command).await {
                // The sender may have given up on this command already.
                let _ = reply.send(answer);
            }
        }
        info!(node = %self.env.node, "worker stopped");
    }

    /// Handles one command. `None` means the command was dropped.
    pub async fn handle(&mut self, command: Command) -> Option<Reply> {
        let node = self.env.node;
        if let Some(cached) = self.log.get(command.from, command.id) {
            debug!(node = %node, cmd = %command.id, name = command.name(), "answering repeat from log");
            return Some(cached.clone());
        }

        match self.tracker.admit(command.id) {
            Admission::Stale => {
                debug!(
                    node = %node,
                    cmd = %command.id,
                    name = command.name(),
                    phase = %self.tracker.phase(),
                    "acknowledging stale command"
                );
                let reply = Reply::ack(node, command.id);
                self.log.record(command.from, command.id, reply.clone());
                return Some(reply);
            }
            Admission::Desync => {
                error!(
                    node = %node,
                    cmd = %command.id,
                    name = command.name(),
                    batch = self.tracker.batch(),
                    phase = %self.tracker.phase(),
                    "protocol desync, dropping command"
                );
                return None;
            }
            Admission::Advance { new_batch: true } => {
                self.log.clear();
                debug!(node = %node, batch = command.id.batch(), phase = %command.id.phase(), "entered batch");
            }
            Admission::Advance { new_batch: false } | Admission::Current => {}
        }

        debug!(node = %node, cmd = %command.id, from = %command.from, name = command.name(), "executing");
        let outcome = self.execute(&command).await.map_err(|e| {
            warn!(node = %node, cmd = %command.id, name = command.name(), error = %e, "command failed");
            RemoteError::from(&e)
        });
        let reply = Reply {
            worker: node,
            id: command.id,
            outcome,
        };
        self.log.record(command.from, command.id, reply.clone());
        Some(reply)
    }

    async fn execute(&mut self, command: &Command) -> Result<ReplyBody> {
        let batch = command.id.batch();
        match &command.payload {
            CommandPayload::SetRole(set) => {
                self.role = Some(match set.role {
                    Role::Loader => RoleState::Loader(LoaderState::new(set)),
                    Role::Applier => RoleState::Applier(ApplierState::new(set)),
                    Role::Master => {
                        return Err(Error::Protocol(format!(
                            "{} cannot take the master role",
                            self.env.node
                        )));
                    }
                });
                info!(node = %self.env.node, role = %set.role, index = set.index, "role assigned");
                Ok(ReplyBody::Ack)
            }
            CommandPayload::SetRoleDone => Ok(ReplyBody::Ack),
            CommandPayload::ResetVersionBatch => {
                match self.role.as_mut() {
                    Some(RoleState::Loader(loader)) => loader.reset_batch(),
                    Some(RoleState::Applier(applier)) => applier.reset_batch(),
                    None => return Err(self.no_role(command)),
                }
                info!(node = %self.env.node, batch, "version batch reset");
                Ok(ReplyBody::Ack)
            }
            CommandPayload::FinishRestore => {
                self.role = None;
                info!(node = %self.env.node, "restore finished");
                Ok(ReplyBody::Ack)
            }

            CommandPayload::SampleRangeFile(param) | CommandPayload::SampleLogFile(param) => {
                let loader = loader_of(&mut self.role, self.env.node, command)?;
                loader.sample_file(&self.env, batch, param).await?;
                Ok(ReplyBody::Ack)
            }
            CommandPayload::NotifyLoaderApplierKeyRange(assignment) => {
                loader_of(&mut self.role, self.env.node, command)?.set_assignment(assignment.clone());
                Ok(ReplyBody::Ack)
            }
            CommandPayload::AssignLoaderRangeFile(param)
            | CommandPayload::AssignLoaderLogFile(param) => {
                let loader = loader_of(&mut self.role, self.env.node, command)?;
                loader.load_file(&self.env, batch, param).await?;
                Ok(ReplyBody::Ack)
            }
            CommandPayload::SampleFileDone
            | CommandPayload::NotifyLoaderApplierKeyRangeDone
            | CommandPayload::AssignLoaderFileDone => {
                loader_of(&mut self.role, self.env.node, command)?;
                Ok(ReplyBody::Ack)
            }

            CommandPayload::LoaderSendSampleMutationToApplier(samples) => {
                applier_of(&mut self.role, self.env.node, command)?.add_samples(samples);
                Ok(ReplyBody::Ack)
            }
            CommandPayload::CalculateApplierKeyRange { num_appliers } => {
                let count = applier_of(&mut self.role, self.env.node, command)?.calculate_bounds(*num_appliers);
                Ok(ReplyBody::KeyRangeCount(count))
            }
            CommandPayload::GetApplierKeyRange { index } => {
                let lower_bound = applier_of(&mut self.role, self.env.node, command)?.bound(*index)?;
                Ok(ReplyBody::KeyRangeBound {
                    index: *index,
                    lower_bound,
                })
            }
            CommandPayload::AssignApplierKeyRange(assignment) => {
                applier_of(&mut self.role, self.env.node, command)?
                    .set_assignment(self.env.node, assignment);
                Ok(ReplyBody::Ack)
            }
            CommandPayload::LoaderSendMutationsToApplier(mutations) => {
                applier_of(&mut self.role, self.env.node, command)?
                    .add_mutations(command.from, command.id, mutations)?;
                Ok(ReplyBody::Ack)
            }
            CommandPayload::LoaderNotifyApplierToApplyMutation => {
                applier_of(&mut self.role, self.env.node, command)?.freeze();
                Ok(ReplyBody::Ack)
            }
            CommandPayload::ApplyMutationToDb => {
                let applier = applier_of(&mut self.role, self.env.node, command)?;
                applier.apply(&self.env).await?;
                Ok(ReplyBody::Ack)
            }
            CommandPayload::ApplyMutationToDbSkip => {
                applier_of(&mut self.role, self.env.node, command)?.skip_apply();
                Ok(ReplyBody::Ack)
            }
            CommandPayload::LoaderSendSampleMutationToApplierDone
            | CommandPayload::GetApplierKeyRangeDone
            | CommandPayload::AssignApplierKeyRangeDone
            | CommandPayload::LoaderSendMutationsToApplierDone => {
                applier_of(&mut self.role, self.env.node, command)?;
                Ok(ReplyBody::Ack)
            }
        }
    }

    fn no_role(&self, command: &Command) -> Error {
        Error::Protocol(format!("{} sent to {} before SetRole", command.name(), self.env.node))
    }
}

fn loader_of<'a>(
    role: &'a mut Option<RoleState>,
    node: NodeId,
    command: &Command,
) -> Result<&'a mut LoaderState> {
    match role {
        Some(RoleState::Loader(loader)) => Ok(loader),
        _ => Err(wrong_role(node, command, Role::Loader)),
    }
}

fn applier_of<'a>(
    role: &'a mut Option<RoleState>,
    node: NodeId,
    command: &Command,
) -> Result<&'a mut ApplierState> {
    match role {
        Some(RoleState::Applier(applier)) => Ok(applier),
        _ => Err(wrong_role(node, command, Role::Applier)),
    }
}

fn wrong_role(node: NodeId, command: &Command, expected: Role) -> Error {
    Error::Protocol(format!("{} sent to {node} which is not a {expected}", command.name()))
}
