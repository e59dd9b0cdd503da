//! Applier role: buffers mutations for its key range and writes them to the
//! target store in version order.
//!
//! The master applier additionally collects key samples and derives the
//! applier key-range bounds from them.

use std::collections::BTreeMap;

use fastrestore_types::{
    CommandId, Key, KeyRange, KeyRangeAssignment, Mutation, MutationType, NodeId, Version,
    VersionedMutation, printable,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::SetRole;
use crate::store::{Store, Transaction};
use crate::transport::Transport;
use crate::worker::WorkerEnv;
use crate::{Error, Result};

#[derive(Debug)]
pub struct ApplierState {
    request_uid: Uuid,
    lock_db: bool,

    /// Mutations per commit version, each list in arrival order.
    pending: BTreeMap<Version, Vec<Mutation>>,
    /// Set once every loader has finished sending; later mutations are
    /// rejected.
    frozen: bool,

    // Master applier only.
    sample_counts: BTreeMap<Key, u64>,
    bounds: Vec<Key>,

    /// Key range owned in the current batch.
    range: Option<KeyRange>,
}

impl ApplierState {
    pub fn new(role: &SetRole) -> Self {
        Self {
            request_uid: role.request_uid,
            lock_db: role.lock_db,
            pending: BTreeMap::new(),
            frozen: false,
            sample_counts: BTreeMap::new(),
            bounds: Vec::new(),
            range: None,
        }
    }

    /// The key range this applier owns in the current batch, if assigned.
    pub fn range(&self) -> Option<&KeyRange> {
        self.range.as_ref()
    }

    /// Mutations buffered for the current batch.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn reset_batch(&mut self) {
        self.pending.clear();
        self.frozen = false;
        self.sample_counts.clear();
        self.bounds.clear();
        self.range = None;
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[VersionedMutation]) {
        for sample in samples {
            *self.sample_counts.entry(sample.mutation.key.clone()).or_insert(0) += 1;
        }
    }

    /// Splits the sampled keys into at most `num_appliers` ranges of roughly
    /// equal sample weight and returns how many lower bounds were produced.
    ///
    /// Bound `i` is the first key whose cumulative count before it reaches
    /// `i * total / num_appliers`.
    pub fn calculate_bounds(&mut self, num_appliers: u32) -> u32 {
        let num_appliers = u64::from(num_appliers.max(1));
        let total: u64 = self.sample_counts.values().sum();
        let interval = (total / num_appliers).max(1);

        let mut bounds = Vec::new();
        let mut cumulative = 0u64;
        for (key, count) in &self.sample_counts {
            if cumulative >= bounds.len() as u64 * interval {
                bounds.push(key.clone());
            }
            cumulative += count;
        }
        bounds.truncate(usize::try_from(num_appliers).unwrap_or(usize::MAX));

        debug!(samples = total, keys = self.sample_counts.len(), bounds = bounds.len(), "applier key ranges calculated");
        self.bounds = bounds;
        u32::try_from(self.bounds.len()).unwrap_or(u32::MAX)
    }

    pub fn bound(&self, index: u32) -> Result<Key> {
        self.bounds
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "key range bound {index} requested but only {} exist",
                    self.bounds.len()
                ))
            })
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    pub fn set_assignment(&mut self, node: NodeId, assignment: &KeyRangeAssignment) {
        self.range = assignment.range_of(node);
        match &self.range {
            Some(range) => debug!(node = %node, range = %range, "key range assigned"),
            None => debug!(node = %node, "no key range assigned, idle this batch"),
        }
    }

    pub fn add_mutations(
        &mut self,
        sender: NodeId,
        id: CommandId,
        mutations: &[VersionedMutation],
    ) -> Result<()> {
        if self.frozen {
            return Err(Error::Protocol(format!(
                "mutations from {sender} arrived after the apply notification"
            )));
        }
        for vm in mutations {
            if let Some(range) = &self.range
                && !vm.mutation.is_range()
                && !range.contains(&vm.mutation.key)
            {
                warn!(
                    key = %printable(&vm.mutation.key),
                    range = %range,
                    sender = %sender,
                    "mutation outside the assigned key range"
                );
            }
            self.pending
                .entry(vm.version)
                .or_default()
                .push(vm.mutation.clone());
        }
        debug!(sender = %sender, cmd = %id, mutations = mutations.len(), "mutations buffered");
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    // ========================================================================
    // Applying
    // ========================================================================

    /// Writes every buffered mutation, one transaction each, in ascending
    /// version order. Within a version, mutations are applied in the order
    /// they arrived.
    pub async fn apply<T: Transport, S: Store>(&mut self, env: &WorkerEnv<T, S>) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let versions = pending.len();
        let mut applied = 0usize;

        for (version, mutations) in pending {
            for mutation in &mutations {
                self.commit(env, version, mutation).await?;
                applied += 1;
            }
        }

        self.frozen = false;
        info!(node = %env.node, versions, mutations = applied, "batch applied");
        Ok(())
    }

    pub fn skip_apply(&mut self) {
        if !self.pending.is_empty() {
            warn!(mutations = self.pending_len(), "discarding mutations on an idle applier");
        }
        self.pending.clear();
        self.frozen = false;
    }

    async fn commit<T: Transport, S: Store>(
        &self,
        env: &WorkerEnv<T, S>,
        version: Version,
        mutation: &Mutation,
    ) -> Result<()> {
        let lock_uid = self.lock_db.then_some(self.request_uid);
        let max_retries = env.config.applier.max_commit_retries;

        let mut attempt = 0u32;
        loop {
            let mut tx = env.store.begin(lock_uid);
            stage(&mut tx, mutation);
            match tx.commit().await {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::Conflict) if attempt < max_retries => {
                    attempt += 1;
                    debug!(
                        node = %env.node,
                        version = %version,
                        key = %printable(&mutation.key),
                        attempt,
                        error = %e,
                        "retrying commit"
                    );
                    tokio::time::sleep(env.config.applier.backoff(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn stage<X: Transaction>(tx: &mut X, mutation: &Mutation) {
    match mutation.kind {
        MutationType::SetValue => tx.set(mutation.key.clone(), mutation.value.clone()),
        MutationType::ClearRange => {
            tx.clear(KeyRange::new(mutation.key.clone(), mutation.value.clone()));
        }
        kind => tx.atomic_op(kind, mutation.key.clone(), mutation.value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use fastrestore_config::RestoreConfig;
    use fastrestore_types::{Phase, Role};

    use crate::backup::ContainerResolver;
    use crate::store::MemoryStore;
    use crate::transport::LocalNetwork;

    fn state(lock_db: bool) -> ApplierState {
        ApplierState::new(&SetRole {
            role: Role::Applier,
            index: 0,
            master_applier: NodeId::new(2),
            request_uid: Uuid::nil(),
            lock_db,
        })
    }

    fn env(store: MemoryStore) -> WorkerEnv<LocalNetwork, MemoryStore> {
        WorkerEnv {
            node: NodeId::new(2),
            transport: LocalNetwork::new(),
            store,
            containers: ContainerResolver::new(),
            config: Arc::new(RestoreConfig::development()),
        }
    }

    fn vm(version: u64, mutation: Mutation) -> VersionedMutation {
        VersionedMutation::new(Version::new(version), mutation)
    }

    fn id(sequence: u64) -> CommandId {
        let mut id = CommandId::new(1, Phase::SendMutations);
        for _ in 0..sequence {
            id.next();
        }
        id
    }

    #[test]
    fn test_bounds_split_samples_evenly() {
        let mut applier = state(false);
        applier.add_samples(&[
            vm(1, Mutation::set("a", "1")),
            vm(1, Mutation::set("m", "2")),
            vm(1, Mutation::set("z", "3")),
        ]);
        assert_eq!(applier.calculate_bounds(2), 2);
        assert_eq!(applier.bound(0).unwrap(), Bytes::from_static(b"a"));
        assert_eq!(applier.bound(1).unwrap(), Bytes::from_static(b"m"));
        assert!(applier.bound(2).is_err());
    }

    #[test]
    fn test_bounds_without_samples() {
        let mut applier = state(false);
        assert_eq!(applier.calculate_bounds(3), 0);
    }

    #[test]
    fn test_bounds_weighted_by_count() {
        let mut applier = state(false);
        let heavy: Vec<_> = (0..6).map(|_| vm(1, Mutation::set("b", "x"))).collect();
        applier.add_samples(&heavy);
        applier.add_samples(&[vm(1, Mutation::set("c", "x")), vm(1, Mutation::set("d", "x"))]);
        // total 8, interval 4: "b" covers the first half on its own.
        assert_eq!(applier.calculate_bounds(2), 2);
        assert_eq!(applier.bound(1).unwrap(), Bytes::from_static(b"c"));
    }

    #[test]
    fn test_frozen_rejects_mutations() {
        let mut applier = state(false);
        applier.freeze();
        let err = applier
            .add_mutations(NodeId::new(1), id(0), &[vm(1, Mutation::set("a", "1"))])
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_apply_orders_by_version_then_arrival() {
        let store = MemoryStore::new();
        let env = env(store.clone());
        let mut applier = state(false);

        applier
            .add_mutations(NodeId::new(9), id(0), &[vm(7, Mutation::set("k", "first"))])
            .unwrap();
        applier
            .add_mutations(NodeId::new(3), id(0), &[vm(7, Mutation::set("k", "second"))])
            .unwrap();
        applier
            .add_mutations(
                NodeId::new(3),
                id(1),
                &[vm(5, Mutation::set("k", "old")), vm(5, Mutation::set("j", "1"))],
            )
            .unwrap();
        applier.freeze();
        applier.apply(&env).await.unwrap();

        // Same version: the later arrival wins regardless of sender id.
        assert_eq!(store.get(b"k").await, Some(Bytes::from_static(b"second")));
        assert_eq!(store.get(b"j").await, Some(Bytes::from_static(b"1")));
        assert_eq!(store.commits().await, 4);
        assert_eq!(applier.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_apply_clear_and_atomic() {
        let store = MemoryStore::with_data([
            (Bytes::from_static(b"b"), Bytes::from_static(b"x")),
            (Bytes::from_static(b"n"), Bytes::from(1u64.to_le_bytes().to_vec())),
        ]);
        let env = env(store.clone());
        let mut applier = state(false);
        applier
            .add_mutations(
                NodeId::new(3),
                id(0),
                &[
                    vm(3, Mutation::clear_range("a", "c")),
                    vm(4, Mutation::new(MutationType::AddValue, "n", 2u64.to_le_bytes().to_vec())),
                ],
            )
            .unwrap();
        applier.apply(&env).await.unwrap();

        assert_eq!(store.get(b"b").await, None);
        assert_eq!(store.get(b"n").await, Some(Bytes::from(3u64.to_le_bytes().to_vec())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_are_retried() {
        let store = MemoryStore::new();
        store.inject_conflicts(3).await;
        let env = env(store.clone());
        let mut applier = state(false);
        applier
            .add_mutations(NodeId::new(3), id(0), &[vm(1, Mutation::set("a", "1"))])
            .unwrap();
        applier.apply(&env).await.unwrap();
        assert_eq!(store.get(b"a").await, Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn test_locked_store_requires_request_uid() {
        let store = MemoryStore::new();
        store.lock(Uuid::new_v4()).await.unwrap();
        let env = env(store.clone());
        let mut applier = state(true);
        applier
            .add_mutations(NodeId::new(3), id(0), &[vm(1, Mutation::set("a", "1"))])
            .unwrap();
        let err = applier.apply(&env).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Locked { .. })));
    }
}
