//! The target database, seen through a narrow transactional interface.
//!
//! [`Store`] and [`Transaction`] are what appliers and the master need:
//! buffered writes committed atomically, point reads, and an advisory lock
//! that keeps other writers out while a restore runs. [`MemoryStore`] is the
//! in-process implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::sync::Arc;

use fastrestore_types::{Key, KeyRange, MutationType, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;

/// A transactional key-value database.
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Transaction;

    /// Starts a transaction. With `lock_uid`, the transaction may write
    /// while the database is locked by that uid.
    fn begin(&self, lock_uid: Option<Uuid>) -> Self::Tx;

    /// Locks the database for `uid`. Re-locking with the same uid succeeds.
    fn lock(&self, uid: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Releases the lock held by `uid`.
    fn unlock(&self, uid: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Succeeds if `uid` holds the lock.
    fn check_lock(&self, uid: Uuid) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A buffered set of writes, applied atomically on commit.
///
/// Reads see committed data only, not the transaction's own writes.
pub trait Transaction: Send {
    fn get(&self, key: &[u8]) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    fn set(&mut self, key: Key, value: Value);

    /// Clears every key in `range`.
    fn clear(&mut self, range: KeyRange);

    /// Applies an atomic read-modify-write at commit time.
    fn atomic_op(&mut self, kind: MutationType, key: Key, operand: Value);

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory [`Store`] backed by an ordered map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<Key, Value>,
    lock_owner: Option<Uuid>,
    /// Commits left to fail with [`StoreError::Conflict`].
    injected_conflicts: u32,
    /// Commits left before the lock passes to the paired uid.
    lock_handoff: Option<(u64, Uuid)>,
    commits: u64,
}

impl State {
    fn clear_range(&mut self, range: &KeyRange) {
        if range.is_empty() {
            return;
        }
        let doomed: Vec<Key> = self
            .data
            .range::<[u8], _>((Bound::Included(&range.begin[..]), Bound::Excluded(&range.end[..])))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.data.remove(&key);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `pairs`.
    pub fn with_data(pairs: impl IntoIterator<Item = (Key, Value)>) -> Self {
        let state = State {
            data: pairs.into_iter().collect(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Makes the next `count` commits fail with a conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.lock().await.injected_conflicts = count;
    }

    /// Hands the lock to `owner` once `commits` more commits have succeeded,
    /// as if another request had taken the database over.
    pub async fn hand_lock_after(&self, commits: u64, owner: Uuid) {
        self.state.lock().await.lock_handoff = Some((commits, owner));
    }

    pub async fn get(&self, key: &[u8]) -> Option<Value> {
        self.state.lock().await.data.get(key).cloned()
    }

    /// Every pair, system keys included.
    pub async fn snapshot(&self) -> BTreeMap<Key, Value> {
        self.state.lock().await.data.clone()
    }

    /// Pairs below the system keyspace.
    pub async fn user_data(&self) -> BTreeMap<Key, Value> {
        let normal = KeyRange::normal_keys();
        self.state
            .lock()
            .await
            .data
            .iter()
            .filter(|(k, _)| normal.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn lock_owner(&self) -> Option<Uuid> {
        self.state.lock().await.lock_owner
    }

    /// Successful commits so far.
    pub async fn commits(&self) -> u64 {
        self.state.lock().await.commits
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    fn begin(&self, lock_uid: Option<Uuid>) -> MemoryTransaction {
        MemoryTransaction {
            store: self.clone(),
            lock_uid,
            writes: Vec::new(),
        }
    }

    async fn lock(&self, uid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.lock_owner {
            Some(owner) if owner != uid => Err(StoreError::Locked { owner }),
            _ => {
                state.lock_owner = Some(uid);
                Ok(())
            }
        }
    }

    async fn unlock(&self, uid: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.lock_owner {
            Some(owner) if owner == uid => {
                state.lock_owner = None;
                Ok(())
            }
            Some(owner) => Err(StoreError::Locked { owner }),
            None => Err(StoreError::NotLocked { uid }),
        }
    }

    async fn check_lock(&self, uid: Uuid) -> Result<(), StoreError> {
        match self.state.lock().await.lock_owner {
            Some(owner) if owner == uid => Ok(()),
            _ => Err(StoreError::NotLocked { uid }),
        }
    }
}

#[derive(Debug, Clone)]
enum Write {
    Set(Key, Value),
    Clear(KeyRange),
    Atomic(MutationType, Key, Value),
}

/// Transaction on a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTransaction {
    store: MemoryStore,
    lock_uid: Option<Uuid>,
    writes: Vec<Write>,
}

impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError> {
        Ok(self.store.get(key).await)
    }

    fn set(&mut self, key: Key, value: Value) {
        self.writes.push(Write::Set(key, value));
    }

    fn clear(&mut self, range: KeyRange) {
        self.writes.push(Write::Clear(range));
    }

    fn atomic_op(&mut self, kind: MutationType, key: Key, operand: Value) {
        self.writes.push(Write::Atomic(kind, key, operand));
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.store.state.lock().await;

        if state.injected_conflicts > 0 {
            state.injected_conflicts -= 1;
            return Err(StoreError::Conflict);
        }
        if let Some(owner) = state.lock_owner
            && self.lock_uid != Some(owner)
        {
            return Err(StoreError::Locked { owner });
        }

        for write in self.writes {
            match write {
                Write::Set(key, value) => {
                    state.data.insert(key, value);
                }
                Write::Clear(range) => state.clear_range(&range),
                Write::Atomic(kind, key, operand) => {
                    let existing = state.data.get(&key).cloned();
                    match kind.evaluate(existing.as_deref(), &operand) {
                        Some(value) => {
                            state.data.insert(key, Value::from(value));
                        }
                        None => {
                            state.data.remove(&key);
                        }
                    }
                }
            }
        }
        state.commits += 1;
        if let Some((left, owner)) = state.lock_handoff {
            if left <= 1 {
                state.lock_owner = Some(owner);
                state.lock_handoff = None;
            } else {
                state.lock_handoff = Some((left - 1, owner));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_commit_applies_writes_in_order() {
        let store = MemoryStore::with_data([(b("a"), b("1")), (b("b"), b("2")), (b("c"), b("3"))]);
        let mut tx = store.begin(None);
        tx.clear(KeyRange::new("a", "c"));
        tx.set(b("b"), b("new"));
        tx.atomic_op(MutationType::AppendIfFits, b("c"), b("!"));
        tx.commit().await.unwrap();

        let data = store.snapshot().await;
        assert_eq!(data.get(&b("a")), None);
        assert_eq!(data.get(&b("b")), Some(&b("new")));
        assert_eq!(data.get(&b("c")), Some(&b("3!")));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin(None);
        tx.set(b("k"), b("v"));
        assert_eq!(tx.get(b"k").await.unwrap(), None);
        drop(tx);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_clear_removes_key() {
        let store = MemoryStore::with_data([(b("k"), b("v"))]);
        let mut tx = store.begin(None);
        tx.atomic_op(MutationType::CompareAndClear, b("k"), b("v"));
        tx.commit().await.unwrap();
        assert_eq!(store.get(b"k").await, None);
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let store = MemoryStore::new();
        store.inject_conflicts(2).await;
        for _ in 0..2 {
            let mut tx = store.begin(None);
            tx.set(b("k"), b("v"));
            assert_eq!(tx.commit().await, Err(StoreError::Conflict));
        }
        let mut tx = store.begin(None);
        tx.set(b("k"), b("v"));
        tx.commit().await.unwrap();
        assert_eq!(store.commits().await, 1);
    }

    #[tokio::test]
    async fn test_lock_blocks_other_writers() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        store.lock(owner).await.unwrap();
        store.lock(owner).await.unwrap();
        assert_eq!(
            store.lock(Uuid::new_v4()).await,
            Err(StoreError::Locked { owner })
        );

        let mut outsider = store.begin(None);
        outsider.set(b("k"), b("v"));
        assert_eq!(outsider.commit().await, Err(StoreError::Locked { owner }));

        let mut insider = store.begin(Some(owner));
        insider.set(b("k"), b("v"));
        insider.commit().await.unwrap();

        store.check_lock(owner).await.unwrap();
        store.unlock(owner).await.unwrap();
        assert!(store.check_lock(owner).await.is_err());
        assert_eq!(store.unlock(owner).await, Err(StoreError::NotLocked { uid: owner }));
    }

    #[tokio::test]
    async fn test_lock_handoff_after_commits() {
        let store = MemoryStore::new();
        let (owner, thief) = (Uuid::new_v4(), Uuid::new_v4());
        store.lock(owner).await.unwrap();
        store.hand_lock_after(2, thief).await;

        let mut tx = store.begin(Some(owner));
        tx.set(b("a"), b("1"));
        tx.commit().await.unwrap();
        store.check_lock(owner).await.unwrap();

        let mut tx = store.begin(Some(owner));
        tx.set(b("b"), b("2"));
        tx.commit().await.unwrap();
        assert_eq!(store.check_lock(owner).await, Err(StoreError::NotLocked { uid: owner }));
        assert_eq!(store.lock_owner().await, Some(thief));

        let mut tx = store.begin(Some(owner));
        tx.set(b("c"), b("3"));
        assert_eq!(tx.commit().await, Err(StoreError::Locked { owner: thief }));
    }

    #[tokio::test]
    async fn test_user_data_excludes_system_keys() {
        let store = MemoryStore::with_data([
            (b("a"), b("1")),
            (Bytes::from_static(b"\xff\x02/restoreStatus/x"), b("{}")),
        ]);
        let user = store.user_data().await;
        assert_eq!(user.len(), 1);
        assert_eq!(store.snapshot().await.len(), 2);
    }
}
