//! Sampling and key-range partitioning of a version batch.

use fastrestore_types::{
    Key, KeyRangeAssignment, LoadingParam, NodeId, Phase, RestoreRequest, Version, printable,
};
use tracing::{debug, info, warn};

use super::{Master, Roles, VersionBatch};
use crate::message::{CommandPayload, ReplyBody};
use crate::store::Store;
use crate::transport::Transport;
use crate::{Error, Result};

/// Blocks of `batch` to sample: the first block, then one block each time
/// the running byte count crosses the next multiple of `stride`.
pub(super) fn sample_blocks(
    request: &RestoreRequest,
    batch: &VersionBatch,
    target: Version,
    stride: u64,
) -> Vec<LoadingParam> {
    let stride = stride.max(1);
    let mut params = Vec::new();
    let mut running = 0u64;
    let mut next_sample = 0u64;

    for file in batch.files().filter(|f| !f.is_empty()) {
        for index in 0..file.block_count() {
            let (offset, length) = file.block_span(index);
            if running >= next_sample {
                params.push(request.loading_param(file, target).with_span(offset, length));
                while next_sample <= running {
                    next_sample += stride;
                }
            }
            running += length;
        }
    }
    params
}

impl<T: Transport, S: Store> Master<T, S> {
    /// Has loaders parse the sampled blocks and forward every mutation to
    /// the master applier.
    pub(super) async fn sample(
        &mut self,
        request: &RestoreRequest,
        roles: &Roles,
        batch: &VersionBatch,
        target: Version,
    ) -> Result<()> {
        let stride = self.config.sampling.stride(batch.bytes);
        let blocks = sample_blocks(request, batch, target, stride);
        info!(batch = self.batch, blocks = blocks.len(), stride, "sampling");

        for round in blocks.chunks(roles.loaders.len()) {
            let commands: Vec<_> = round
                .iter()
                .zip(&roles.loaders)
                .map(|(param, &loader)| {
                    let payload = if param.is_range {
                        CommandPayload::SampleRangeFile(param.clone())
                    } else {
                        CommandPayload::SampleLogFile(param.clone())
                    };
                    self.command(Phase::SampleFile, loader, payload)
                })
                .collect();
            self.round("SampleFile", &commands).await?;
        }

        let done = self.broadcast(&roles.loaders, &CommandPayload::SampleFileDone);
        self.round("SampleFileDone", &done).await?;

        let done = self.broadcast(
            &[roles.master_applier],
            &CommandPayload::LoaderSendSampleMutationToApplierDone,
        );
        self.round("LoaderSendSampleMutationToApplierDone", &done).await?;
        Ok(())
    }

    /// Asks the master applier for the key-range bounds and turns them into
    /// an assignment. Appliers beyond the number of bounds stay idle.
    pub(super) async fn calculate_key_ranges(&mut self, roles: &Roles) -> Result<KeyRangeAssignment> {
        let num_appliers = roles.appliers.len() as u32;
        let calculate = self.command(
            Phase::CalculateKeyRange,
            roles.master_applier,
            CommandPayload::CalculateApplierKeyRange { num_appliers },
        );
        let count = match self.round("CalculateApplierKeyRange", &[calculate]).await?.as_slice() {
            [ReplyBody::KeyRangeCount(count)] => (*count).min(num_appliers),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected reply to CalculateApplierKeyRange: {other:?}"
                )));
            }
        };

        let requests: Vec<_> = (0..count)
            .map(|index| {
                self.command(
                    Phase::GetKeyRange,
                    roles.master_applier,
                    CommandPayload::GetApplierKeyRange { index },
                )
            })
            .collect();
        let replies = self.round("GetApplierKeyRange", &requests).await?;

        let mut bounds: Vec<Key> = Vec::with_capacity(replies.len());
        for (expected, reply) in (0..count).zip(replies) {
            match reply {
                ReplyBody::KeyRangeBound { index, lower_bound } if index == expected => {
                    bounds.push(lower_bound);
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected reply to GetApplierKeyRange {expected}: {other:?}"
                    )));
                }
            }
        }

        let done = self.broadcast(&[roles.master_applier], &CommandPayload::GetApplierKeyRangeDone);
        self.round("GetApplierKeyRangeDone", &done).await?;

        let assignment = assignment_from_bounds(bounds, &roles.appliers)?;
        for (bound, applier) in assignment.iter() {
            debug!(applier = %applier, lower_bound = %printable(bound), "key range");
        }
        if assignment.len() < roles.appliers.len() {
            warn!(
                ranges = assignment.len(),
                appliers = roles.appliers.len(),
                "fewer key ranges than appliers, some appliers stay idle"
            );
        }
        Ok(assignment)
    }

    /// Sends the assignment to every applier, then to every loader.
    pub(super) async fn assign_key_ranges(
        &mut self,
        roles: &Roles,
        assignment: &KeyRangeAssignment,
    ) -> Result<()> {
        let assign = self.broadcast(
            &roles.appliers,
            &CommandPayload::AssignApplierKeyRange(assignment.clone()),
        );
        self.round("AssignApplierKeyRange", &assign).await?;
        let done = self.broadcast(&roles.appliers, &CommandPayload::AssignApplierKeyRangeDone);
        self.round("AssignApplierKeyRangeDone", &done).await?;

        let notify = self.broadcast(
            &roles.loaders,
            &CommandPayload::NotifyLoaderApplierKeyRange(assignment.clone()),
        );
        self.round("NotifyLoaderApplierKeyRange", &notify).await?;
        let done = self.broadcast(&roles.loaders, &CommandPayload::NotifyLoaderApplierKeyRangeDone);
        self.round("NotifyLoaderApplierKeyRangeDone", &done).await?;
        Ok(())
    }
}

/// Pairs `bounds` with the first appliers, the first bound widened to the
/// empty key. Without bounds the first applier takes the whole keyspace.
fn assignment_from_bounds(bounds: Vec<Key>, appliers: &[NodeId]) -> Result<KeyRangeAssignment> {
    let Some(&first) = appliers.first() else {
        return Err(Error::Config("no appliers to assign key ranges to".to_string()));
    };
    if bounds.is_empty() {
        return Ok(KeyRangeAssignment::single(first));
    }
    KeyRangeAssignment::from_bounds(&bounds, appliers)
        .ok_or_else(|| Error::Protocol("empty key range assignment".to_string()))
}
