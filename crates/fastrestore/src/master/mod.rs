//! The master: turns restore requests into rounds of worker commands.
//!
//! # Request lifecycle
//!
//! ```text
//! open container ─► select restore set ─► lock + clear ─► quorum ─► SetRole
//!        │
//!        └─► per version batch:
//!              ResetVersionBatch ─► sampling ─► key ranges ─► load ─► apply
//!        │
//!        └─► FinishRestore ─► unlock
//! ```
//!
//! Every command the master sends is stamped from one monotonic
//! [`CommandId`]: `SetRole` opens a new batch number, every
//! `ResetVersionBatch` opens the next one and `FinishRestore` closes the
//! last. Rounds that time out are re-sent with the same ids.

mod batching;
mod load;
mod roles;
mod sampling;
mod status;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fastrestore_config::RestoreConfig;
use fastrestore_types::{
    CommandId, KeyRange, KeyRangeAssignment, NodeId, Phase, RestoreRequest, Role, Version,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

pub use batching::{
    ForbiddenRange, VersionBatch, build_batches, forbidden_ranges, is_version_in_forbidden_range,
};
pub use roles::Roles;
pub use status::{RestoreState, RestoreStatus, STATUS_PREFIX, status_key};

use crate::backup::{BackupContainer, ContainerResolver, RestoreSet};
use crate::message::{Command, CommandPayload, ReplyBody, SetRole};
use crate::rpc::{RoundPolicy, send_round};
use crate::store::{Store, Transaction};
use crate::transport::Transport;
use crate::{Error, Result};

/// Outcome of a successful restore request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub uid: uuid::Uuid,
    pub target_version: Version,
    pub batches: usize,
    pub range_files: usize,
    pub log_files: usize,
    pub bytes: u64,
    pub elapsed_ms: u64,
    /// Applier key ranges of the last version batch. Byte-keyed, so left
    /// out of the JSON form.
    #[serde(skip)]
    pub last_assignment: Option<KeyRangeAssignment>,
}

/// A queued request and where to send its outcome.
#[derive(Debug)]
pub struct RestoreTicket {
    pub request: RestoreRequest,
    pub reply: oneshot::Sender<Result<RestoreSummary>>,
}

/// What a request has acquired so far, released when it ends.
#[derive(Debug, Default)]
struct Session {
    roles: Option<Roles>,
    locked: bool,
    status: Option<RestoreStatus>,
}

/// Coordinates restore requests across the registered workers.
#[derive(Debug)]
pub struct Master<T, S> {
    transport: T,
    store: S,
    containers: ContainerResolver,
    config: Arc<RestoreConfig>,
    ids: CommandId,
    batch: u32,
}

impl<T: Transport, S: Store> Master<T, S> {
    pub fn new(
        transport: T,
        store: S,
        containers: ContainerResolver,
        config: Arc<RestoreConfig>,
    ) -> Self {
        Self {
            transport,
            store,
            containers,
            config,
            ids: CommandId::initial(),
            batch: 0,
        }
    }

    /// Serves queued requests one at a time until the queue closes.
    pub async fn serve(mut self, mut requests: mpsc::Receiver<RestoreTicket>) {
        info!("master waiting for restore requests");
        while let Some(RestoreTicket { request, reply }) = requests.recv().await {
            let outcome = self.restore(&request).await;
            if reply.send(outcome).is_err() {
                warn!(uid = %request.uid, "requester went away before the restore finished");
            }
        }
        info!("master stopped");
    }

    /// Runs one restore request to completion.
    ///
    /// Whatever happens, participating workers are sent `FinishRestore` and
    /// the database lock is released.
    pub async fn restore(&mut self, request: &RestoreRequest) -> Result<RestoreSummary> {
        let started = Instant::now();
        let deadline = self.config.rpc.restore_timeout();
        let mut session = Session::default();

        let outcome = match tokio::time::timeout(deadline, self.run(request, &mut session)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::RequestTimeout(deadline)),
        };

        match outcome {
            Ok(mut summary) => {
                self.finish(request, &mut session, None).await?;
                summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    uid = %request.uid,
                    version = %summary.target_version,
                    batches = summary.batches,
                    bytes = summary.bytes,
                    elapsed_ms = summary.elapsed_ms,
                    "restore completed"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(uid = %request.uid, error = %e, "restore failed");
                if let Err(cleanup) = self.finish(request, &mut session, Some(&e)).await {
                    warn!(uid = %request.uid, error = %cleanup, "cleanup after failed restore");
                }
                Err(e)
            }
        }
    }

    async fn run(&mut self, request: &RestoreRequest, session: &mut Session) -> Result<RestoreSummary> {
        info!(uid = %request.uid, url = %request.url, range = %request.range, "restore started");

        let container = self.containers.open(&request.url)?;
        let files = container.list_files().await?;
        let set = RestoreSet::select(files, request.target_version)?;
        let forbidden = forbidden_ranges(&set.log_files)?;
        let target = set.target_version;
        info!(
            uid = %request.uid,
            version = %target,
            range_files = set.range_files.len(),
            log_files = set.log_files.len(),
            bytes = set.total_bytes(),
            "restore set selected"
        );

        let mut status = RestoreStatus::new(request, Utc::now());
        status.target_version = Some(target);

        if request.lock_db {
            self.store.lock(request.uid).await?;
            session.locked = true;
            self.store.check_lock(request.uid).await?;
            self.clear_destination(request).await?;
        }
        let lock_uid = request.lock_db.then_some(request.uid);

        let workers = self
            .transport
            .wait_for_workers(
                self.config.cluster.min_workers as usize,
                self.config.cluster.quorum_timeout(),
            )
            .await?;
        let roles = Roles::assign(&workers, self.config.cluster.loader_ratio)?;
        session.roles = Some(roles.clone());
        self.set_roles(request, &roles).await?;

        let summary_files = (set.range_files.len(), set.log_files.len(), set.total_bytes());
        let batches = build_batches(
            set.files().cloned().collect(),
            &forbidden,
            self.config.batching.batch_size_threshold_bytes,
        );
        status.batches_total = batches.len();
        status.write(&self.store, lock_uid).await?;
        session.status = Some(status.clone());

        let mut last_assignment = None;
        for batch in &batches {
            last_assignment = Some(self.run_batch(request, &roles, batch, target).await?);

            status.batches_done += 1;
            status.files_done += batch.file_count();
            status.bytes_done += batch.bytes;
            status.applied_version = Some(batch.end_version);
            status.write(&self.store, lock_uid).await?;
            session.status = Some(status.clone());
        }

        Ok(RestoreSummary {
            uid: request.uid,
            target_version: target,
            batches: batches.len(),
            range_files: summary_files.0,
            log_files: summary_files.1,
            bytes: summary_files.2,
            elapsed_ms: 0,
            last_assignment,
        })
    }

    async fn run_batch(
        &mut self,
        request: &RestoreRequest,
        roles: &Roles,
        batch: &VersionBatch,
        target: Version,
    ) -> Result<KeyRangeAssignment> {
        self.batch += 1;
        info!(
            batch = self.batch,
            index = batch.index,
            begin = %batch.begin_version,
            end = %batch.end_version,
            files = batch.file_count(),
            bytes = batch.bytes,
            "version batch started"
        );

        let workers: Vec<NodeId> = roles.all().collect();
        let reset = self.broadcast(&workers, &CommandPayload::ResetVersionBatch);
        self.round("ResetVersionBatch", &reset).await?;

        self.sample(request, roles, batch, target).await?;
        let assignment = self.calculate_key_ranges(roles).await?;
        self.assign_key_ranges(roles, &assignment).await?;
        if request.lock_db {
            self.store.check_lock(request.uid).await?;
        }
        self.load(request, roles, batch, target, &assignment).await?;
        self.apply(roles, &assignment).await?;

        info!(batch = self.batch, end = %batch.end_version, "version batch applied");
        Ok(assignment)
    }

    async fn set_roles(&mut self, request: &RestoreRequest, roles: &Roles) -> Result<()> {
        self.batch += 1;
        let phase = Phase::SetRole;
        let mut commands = Vec::with_capacity(roles.len());
        let assignments = roles
            .loaders
            .iter()
            .map(|&node| (node, Role::Loader))
            .enumerate()
            .chain(roles.appliers.iter().map(|&node| (node, Role::Applier)).enumerate());
        for (index, (node, role)) in assignments {
            let set = SetRole {
                role,
                index: index as u32,
                master_applier: roles.master_applier,
                request_uid: request.uid,
                lock_db: request.lock_db,
            };
            commands.push(self.command(phase, node, CommandPayload::SetRole(set)));
        }
        self.round("SetRole", &commands).await?;

        let workers: Vec<NodeId> = roles.all().collect();
        let done = self.broadcast(&workers, &CommandPayload::SetRoleDone);
        self.round("SetRoleDone", &done).await?;

        info!(
            loaders = roles.loaders.len(),
            appliers = roles.appliers.len(),
            master_applier = %roles.master_applier,
            "roles assigned"
        );
        Ok(())
    }

    /// Clears the destination range before anything is restored into it.
    async fn clear_destination(&self, request: &RestoreRequest) -> Result<()> {
        let destination: KeyRange = request.destination_range();
        let mut tx = self.store.begin(request.lock_db.then_some(request.uid));
        tx.clear(destination.clone());
        tx.commit().await?;
        info!(uid = %request.uid, range = %destination, "destination range cleared");
        Ok(())
    }

    /// Releases workers and the database lock, recording the final status.
    ///
    /// Fails with [`crate::StoreError::NotLocked`] if another request took the lock
    /// away; the status record is then left to the new owner.
    async fn finish(
        &mut self,
        request: &RestoreRequest,
        session: &mut Session,
        failure: Option<&Error>,
    ) -> Result<()> {
        let mut lost_lock = None;
        if session.locked
            && let Err(e) = self.store.check_lock(request.uid).await
        {
            error!(uid = %request.uid, error = %e, "database lock lost before the restore finished");
            session.locked = false;
            lost_lock = Some(e);
        }
        let lock_uid = session.locked.then_some(request.uid);

        if let Some(roles) = session.roles.take() {
            let workers: Vec<NodeId> = roles.all().collect();
            let finish = self.broadcast(&workers, &CommandPayload::FinishRestore);
            match failure {
                None => {
                    self.round("FinishRestore", &finish).await?;
                }
                Some(_) => {
                    // Workers that never saw this request's SetRole drop it.
                    let policy = RoundPolicy {
                        max_retries: 0,
                        ..self.policy()
                    };
                    if let Err(e) = send_round(&self.transport, "FinishRestore", &finish, policy).await {
                        warn!(uid = %request.uid, error = %e, "not every worker acknowledged FinishRestore");
                    }
                }
            }
        }

        if let Some(mut status) = session.status.take()
            && lost_lock.is_none()
        {
            status.state = match failure {
                None => RestoreState::Completed,
                Some(_) => RestoreState::Failed,
            };
            status.error = failure.map(ToString::to_string);
            status.write(&self.store, lock_uid).await?;
        }

        if session.locked {
            self.store.unlock(request.uid).await?;
            session.locked = false;
        }
        match lost_lock {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Command helpers
    // ========================================================================

    fn policy(&self) -> RoundPolicy {
        RoundPolicy::from_config(&self.config.rpc)
    }

    fn command(&mut self, phase: Phase, to: NodeId, payload: CommandPayload) -> Command {
        Command::new(self.ids.next_in(self.batch, phase), NodeId::MASTER, to, payload)
    }

    fn broadcast(&mut self, to: &[NodeId], payload: &CommandPayload) -> Vec<Command> {
        to.iter()
            .map(|&node| self.command(payload.phase(), node, payload.clone()))
            .collect()
    }

    async fn round(&self, name: &'static str, commands: &[Command]) -> Result<Vec<ReplyBody>> {
        send_round(&self.transport, name, commands, self.policy()).await
    }
}
