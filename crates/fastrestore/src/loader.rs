//! Loader role: turns backup file bytes into mutations and ships them to
//! the appliers owning their keys.

use std::collections::{BTreeMap, HashSet};

use fastrestore_codec::{
    ParseMode, PartAssembler, decode_log_block, decode_mutation_group, decode_range_block,
};
use fastrestore_types::{
    CommandId, KeyRangeAssignment, LoadingParam, Mutation, NodeId, Phase, VersionedMutation,
};
use tracing::{debug, info, warn};

use crate::backup::BackupContainer;
use crate::message::{Command, CommandPayload, SetRole};
use crate::rpc::send_round;
use crate::store::Store;
use crate::transport::Transport;
use crate::worker::WorkerEnv;
use crate::{Error, Result};

#[derive(Debug)]
pub struct LoaderState {
    index: u32,
    master_applier: NodeId,
    assignment: Option<KeyRangeAssignment>,
    /// Files loaded in the current batch.
    processed: HashSet<LoadingParam>,
    ids: CommandId,
}

impl LoaderState {
    pub fn new(role: &SetRole) -> Self {
        Self {
            index: role.index,
            master_applier: role.master_applier,
            assignment: None,
            processed: HashSet::new(),
            ids: CommandId::initial(),
        }
    }

    pub fn reset_batch(&mut self) {
        self.assignment = None;
        self.processed.clear();
    }

    pub fn set_assignment(&mut self, assignment: KeyRangeAssignment) {
        self.assignment = Some(assignment);
    }

    /// Parses a sampled block and forwards every mutation to the master
    /// applier. Malformed data is skipped.
    pub async fn sample_file<T: Transport, S: Store>(
        &mut self,
        env: &WorkerEnv<T, S>,
        batch: u32,
        param: &LoadingParam,
    ) -> Result<()> {
        let mutations = parse_file(env, param, ParseMode::Sampling).await?;
        debug!(node = %env.node, file = %param, samples = mutations.len(), "sampled");

        let mut routed = BTreeMap::new();
        routed.insert(self.master_applier, mutations);
        self.send(
            env,
            batch,
            Phase::SendSampleMutations,
            routed,
            CommandPayload::LoaderSendSampleMutationToApplier,
        )
        .await
    }

    /// Parses a file and sends its mutations to their appliers. A file
    /// already loaded in this batch is acknowledged without reloading.
    pub async fn load_file<T: Transport, S: Store>(
        &mut self,
        env: &WorkerEnv<T, S>,
        batch: u32,
        param: &LoadingParam,
    ) -> Result<()> {
        if self.processed.contains(param) {
            debug!(node = %env.node, file = %param, "file already loaded in this batch");
            return Ok(());
        }
        let assignment = self
            .assignment
            .clone()
            .ok_or_else(|| Error::Protocol(format!("{} has no key-range assignment", env.node)))?;

        let mutations = parse_file(env, param, ParseMode::Load).await?;
        let count = mutations.len();
        let routed = route(&assignment, mutations);
        self.send(
            env,
            batch,
            Phase::SendMutations,
            routed,
            CommandPayload::LoaderSendMutationsToApplier,
        )
        .await?;

        self.processed.insert(param.clone());
        info!(node = %env.node, loader = self.index, file = %param, mutations = count, "file loaded");
        Ok(())
    }

    /// Sends routed mutations, `mutations_per_request` per command and at
    /// most `send_window` commands in flight.
    async fn send<T: Transport, S: Store>(
        &mut self,
        env: &WorkerEnv<T, S>,
        batch: u32,
        phase: Phase,
        routed: BTreeMap<NodeId, Vec<VersionedMutation>>,
        payload: fn(Vec<VersionedMutation>) -> CommandPayload,
    ) -> Result<()> {
        let per_request = env.config.loader.mutations_per_request.max(1);
        let window = env.config.loader.send_window.max(1);

        let mut commands = Vec::new();
        for (applier, mutations) in routed {
            for chunk in mutations.chunks(per_request) {
                commands.push(Command::new(
                    self.ids.next_in(batch, phase),
                    env.node,
                    applier,
                    payload(chunk.to_vec()),
                ));
            }
        }

        for round in commands.chunks(window) {
            send_round(&env.transport, phase.name(), round, env.round_policy()).await?;
        }
        Ok(())
    }
}

/// Splits mutations by owning applier. Clear ranges crossing an applier
/// boundary are cut at the boundary.
fn route(
    assignment: &KeyRangeAssignment,
    mutations: Vec<VersionedMutation>,
) -> BTreeMap<NodeId, Vec<VersionedMutation>> {
    let mut routed: BTreeMap<NodeId, Vec<VersionedMutation>> = BTreeMap::new();
    for vm in mutations {
        if vm.mutation.is_range() {
            for (range, owner) in assignment.split(&vm.mutation.key, &vm.mutation.value) {
                let piece = Mutation::clear_range(range.begin, range.end);
                routed
                    .entry(owner)
                    .or_default()
                    .push(VersionedMutation::new(vm.version, piece));
            }
        } else {
            let owner = assignment.owner(&vm.mutation.key);
            routed.entry(owner).or_default().push(vm);
        }
    }
    routed
}

/// Reads `param`'s byte span block by block and decodes it into mutations,
/// clipped to the restore range and rewritten to their destination keys.
async fn parse_file<T: Transport, S: Store>(
    env: &WorkerEnv<T, S>,
    param: &LoadingParam,
    mode: ParseMode,
) -> Result<Vec<VersionedMutation>> {
    let container = env.containers.open(&param.url)?;
    let step = if param.block_size == 0 {
        param.length
    } else {
        u64::from(param.block_size)
    };
    let end = param.offset + param.length;

    let mut mutations = Vec::new();
    let mut assembler = PartAssembler::new();
    let mut offset = param.offset;
    while offset < end {
        let len = step.min(end - offset);
        let data = container.read(&param.file_name, offset, len).await?;
        offset += len;

        let decoded = if param.is_range {
            decode_range_block(&data).map(|block| {
                if param
                    .restore_range
                    .intersects_closed(block.first_key(), block.last_key())
                {
                    for kv in block.pairs() {
                        if param.restore_range.contains(&kv.key) {
                            mutations.push(VersionedMutation::new(
                                param.version,
                                Mutation::set(param.rewrite_key(&kv.key), kv.value.clone()),
                            ));
                        }
                    }
                }
            })
        } else {
            decode_log_block(&data).and_then(|pairs| assembler.push_all(&pairs))
        };

        if let Err(e) = decoded {
            if mode == ParseMode::Sampling {
                warn!(file = %param.file_name, offset, error = %e, "skipping undecodable block while sampling");
                continue;
            }
            return Err(Error::codec(&param.file_name, e));
        }
    }

    if !param.is_range {
        if assembler.out_of_order_parts() > 0 {
            warn!(
                file = %param.file_name,
                parts = assembler.out_of_order_parts(),
                "log parts arrived out of order"
            );
        }
        for group in assembler.into_groups() {
            if !param.accepts_log_version(group.version) {
                continue;
            }
            let decoded = decode_mutation_group(group.version, &group.data, mode)
                .map_err(|e| Error::codec(&param.file_name, e))?;
            let Some(decoded) = decoded else { continue };
            for mutation in decoded.mutations {
                if let Some(clipped) = clip(param, mutation) {
                    mutations.push(VersionedMutation::new(group.version, clipped));
                }
            }
        }
    }
    Ok(mutations)
}

/// Restricts a log mutation to the restore range and rewrites its keys.
fn clip(param: &LoadingParam, mutation: Mutation) -> Option<Mutation> {
    let inside = if mutation.is_range() {
        let range = fastrestore_types::KeyRange::new(mutation.key, mutation.value);
        let clipped = range.intersection(&param.restore_range)?;
        Mutation::clear_range(clipped.begin, clipped.end)
    } else if param.restore_range.contains(&mutation.key) {
        mutation
    } else {
        return None;
    };
    Some(inside.map_keys(|k| param.rewrite_key(k)))
}
