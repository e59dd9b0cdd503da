//! Load and apply phases of a version batch.

use std::collections::BTreeSet;

use fastrestore_types::{KeyRangeAssignment, NodeId, Phase, RestoreRequest, Version};
use tracing::info;

use super::{Master, Roles, VersionBatch};
use crate::Result;
use crate::message::CommandPayload;
use crate::rpc::send_round;
use crate::store::Store;
use crate::transport::Transport;

impl<T: Transport, S: Store> Master<T, S> {
    /// Hands every file of the batch to a loader, round-robin, and waits
    /// until each loader has forwarded its mutations.
    pub(super) async fn load(
        &mut self,
        request: &RestoreRequest,
        roles: &Roles,
        batch: &VersionBatch,
        target: Version,
        assignment: &KeyRangeAssignment,
    ) -> Result<()> {
        let files: Vec<_> = batch.load_order().collect();
        info!(batch = self.batch, files = files.len(), "loading");

        for (round_index, round) in files.chunks(roles.loaders.len()).enumerate() {
            let commands: Vec<_> = round
                .iter()
                .zip(&roles.loaders)
                .map(|(file, &loader)| {
                    let param = request.loading_param(file, target);
                    let payload = if file.is_range {
                        CommandPayload::AssignLoaderRangeFile(param)
                    } else {
                        CommandPayload::AssignLoaderLogFile(param)
                    };
                    self.command(Phase::AssignLoaderFile, loader, payload)
                })
                .collect();
            self.round("AssignLoaderFile", &commands).await?;
            info!(
                batch = self.batch,
                round = round_index,
                dispatched = round_index * roles.loaders.len() + round.len(),
                "load round done"
            );
        }

        let done = self.broadcast(&roles.loaders, &CommandPayload::AssignLoaderFileDone);
        self.round("AssignLoaderFileDone", &done).await?;

        let busy: Vec<NodeId> = assignment.appliers().into_iter().collect();
        let done = self.broadcast(&busy, &CommandPayload::LoaderSendMutationsToApplierDone);
        self.round("LoaderSendMutationsToApplierDone", &done).await?;
        Ok(())
    }

    /// Freezes the busy appliers' buffers and has them apply; idle appliers
    /// are told to skip.
    pub(super) async fn apply(&mut self, roles: &Roles, assignment: &KeyRangeAssignment) -> Result<()> {
        let busy: BTreeSet<NodeId> = assignment.appliers();
        let busy_list: Vec<NodeId> = busy.iter().copied().collect();
        let idle: Vec<NodeId> = roles
            .appliers
            .iter()
            .copied()
            .filter(|node| !busy.contains(node))
            .collect();

        let notify = self.broadcast(&busy_list, &CommandPayload::LoaderNotifyApplierToApplyMutation);
        self.round("LoaderNotifyApplierToApplyMutation", &notify).await?;

        let mut commands = self.broadcast(&busy_list, &CommandPayload::ApplyMutationToDb);
        commands.extend(self.broadcast(&idle, &CommandPayload::ApplyMutationToDbSkip));
        // Applying a large batch can take arbitrarily long.
        send_round(
            &self.transport,
            "ApplyMutationToDb",
            &commands,
            self.policy().without_timeout(),
        )
        .await?;

        info!(batch = self.batch, busy = busy_list.len(), idle = idle.len(), "applied");
        Ok(())
    }
}
