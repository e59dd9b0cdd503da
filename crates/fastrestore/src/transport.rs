//! Transport between the master and the workers.
//!
//! The protocol only needs "send a command, await its reply": [`Transport`]
//! is that seam. [`LocalNetwork`] implements it for processes living in one
//! runtime. Every command and reply crosses it as postcard bytes, so no
//! state is ever shared between nodes by reference.
//!
//! The local network can inject faults from a seeded RNG:
//! - **Duplicate delivery**: the command is enqueued a second time and the
//!   second reply is discarded.
//! - **Dropped reply**: the receiver executes the command but the sender
//!   gets [`Error::ReplyLost`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use fastrestore_types::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tracing::{debug, trace};

use crate::message::{Command, Reply};
use crate::{Error, Result};

/// Commands queued per worker before senders wait.
const INBOX_CAPACITY: usize = 1024;

/// Sends commands and awaits their replies.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Delivers `command` to `command.to` and waits for the reply.
    ///
    /// Fails with [`Error::CommandDropped`] if the receiver dropped the
    /// command without answering.
    fn send(&self, command: Command) -> impl Future<Output = Result<Reply>> + Send;

    /// Waits until at least `min` workers registered and returns them,
    /// sorted by id.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the quorum is not reached within `timeout`.
    fn wait_for_workers(
        &self,
        min: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<NodeId>>> + Send;
}

/// A command as it sits in a worker's inbox.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub reply: oneshot::Sender<Reply>,
}

// ============================================================================
// Fault injection
// ============================================================================

/// Fault probabilities of a [`LocalNetwork`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    pub seed: u64,
    /// Probability that a command is delivered twice.
    pub duplicate_probability: f64,
    /// Probability that a reply is lost after the command executed.
    pub drop_reply_probability: f64,
}

impl FaultConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duplicate_probability: 0.0,
            drop_reply_probability: 0.0,
        }
    }

    pub fn with_duplicates(mut self, probability: f64) -> Self {
        self.duplicate_probability = probability;
        self
    }

    pub fn with_dropped_replies(mut self, probability: f64) -> Self {
        self.drop_reply_probability = probability;
        self
    }
}

#[derive(Debug)]
struct Faults {
    config: FaultConfig,
    rng: StdRng,
}

impl Faults {
    fn new(config: FaultConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Returns `(duplicate, drop_reply)` for the next command.
    fn roll(&mut self) -> (bool, bool) {
        let duplicate = chance(&mut self.rng, self.config.duplicate_probability);
        let drop_reply = chance(&mut self.rng, self.config.drop_reply_probability);
        (duplicate, drop_reply)
    }
}

fn chance(rng: &mut StdRng, probability: f64) -> bool {
    probability > 0.0 && rng.gen_bool(probability.min(1.0))
}

/// Traffic counters of a [`LocalNetwork`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub duplicated: u64,
    pub replies_dropped: u64,
}

// ============================================================================
// LocalNetwork
// ============================================================================

/// In-process network connecting the master and the workers.
#[derive(Debug, Clone)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    inboxes: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    next_id: AtomicU32,
    registered: watch::Sender<usize>,
    faults: Mutex<Option<Faults>>,
    delivered: AtomicU64,
    duplicated: AtomicU64,
    replies_dropped: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a network that injects faults as configured.
    pub fn with_faults(config: FaultConfig) -> Self {
        Self::build(Some(Faults::new(config)))
    }

    fn build(faults: Option<Faults>) -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                inboxes: RwLock::new(HashMap::new()),
                next_id: AtomicU32::new(1),
                registered,
                faults: Mutex::new(faults),
                delivered: AtomicU64::new(0),
                duplicated: AtomicU64::new(0),
                replies_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new worker and returns its id and inbox.
    ///
    /// Ids are handed out from 1 in registration order.
    pub async fn register(&self) -> (NodeId, mpsc::Receiver<Envelope>) {
        let node = NodeId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let count = {
            let mut inboxes = self.inner.inboxes.write().await;
            inboxes.insert(node, tx);
            inboxes.len()
        };
        self.inner.registered.send_replace(count);
        debug!(node = %node, workers = count, "worker registered");
        (node, rx)
    }

    /// Registered workers, sorted by id.
    pub async fn workers(&self) -> Vec<NodeId> {
        let mut workers: Vec<NodeId> = self.inner.inboxes.read().await.keys().copied().collect();
        workers.sort();
        workers
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            duplicated: self.inner.duplicated.load(Ordering::Relaxed),
            replies_dropped: self.inner.replies_dropped.load(Ordering::Relaxed),
        }
    }

    async fn roll(&self) -> (bool, bool) {
        match self.inner.faults.lock().await.as_mut() {
            Some(faults) => faults.roll(),
            None => (false, false),
        }
    }

    async fn deliver(&self, command: Command) -> Result<Reply> {
        let (to, name) = (command.to, command.name());
        let inbox = self
            .inner
            .inboxes
            .read()
            .await
            .get(&to)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("{to} is not registered")))?;

        let command = copy(&command)?;
        let (duplicate, drop_reply) = self.roll().await;
        let duplicate = duplicate.then(|| command.clone());

        let (tx, rx) = oneshot::channel();
        inbox
            .send(Envelope { command, reply: tx })
            .await
            .map_err(|_| Error::Transport(format!("{to} stopped")))?;
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(command) = duplicate {
            let (tx, _discarded) = oneshot::channel();
            if inbox.send(Envelope { command, reply: tx }).await.is_ok() {
                self.inner.duplicated.fetch_add(1, Ordering::Relaxed);
                trace!(node = %to, cmd = name, "duplicate delivered");
            }
        }

        let reply = rx
            .await
            .map_err(|_| Error::CommandDropped { node: to, command: name })?;

        if drop_reply {
            self.inner.replies_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(node = %to, cmd = name, "reply dropped");
            return Err(Error::ReplyLost { node: to, command: name });
        }
        copy(&reply)
    }
}

impl Default for LocalNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalNetwork {
    fn send(&self, command: Command) -> impl Future<Output = Result<Reply>> + Send {
        let network = self.clone();
        async move { network.deliver(command).await }
    }

    async fn wait_for_workers(&self, min: usize, timeout: Duration) -> Result<Vec<NodeId>> {
        let mut registered = self.inner.registered.subscribe();
        let reached = tokio::time::timeout(timeout, async {
            registered.wait_for(|count| *count >= min).await.map(|_| ())
        })
        .await;

        match reached {
            Ok(Ok(())) => Ok(self.workers().await),
            Ok(Err(_)) => Err(Error::Transport("worker registry closed".to_string())),
            Err(_) => Err(Error::Config(format!(
                "only {} of {min} workers registered within {timeout:?}",
                *registered.borrow()
            ))),
        }
    }
}

/// Moves a value across the network boundary as postcard bytes.
fn copy<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
    let bytes = postcard::to_allocvec(value).map_err(|e| Error::Transport(e.to_string()))?;
    postcard::from_bytes(&bytes).map_err(|e| Error::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandPayload;
    use fastrestore_types::{CommandId, Phase};

    fn command(to: NodeId) -> Command {
        Command::new(
            CommandId::new(1, Phase::ResetBatch).next(),
            NodeId::MASTER,
            to,
            CommandPayload::ResetVersionBatch,
        )
    }

    /// Answers every command with an ack, counting deliveries.
    fn spawn_acker(node: NodeId, mut inbox: mpsc::Receiver<Envelope>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut seen = 0;
            while let Some(envelope) = inbox.recv().await {
                seen += 1;
                let _ = envelope.reply.send(Reply::ack(node, envelope.command.id));
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let network = LocalNetwork::new();
        let (a, _ra) = network.register().await;
        let (b, _rb) = network.register().await;
        assert_eq!((a, b), (NodeId::new(1), NodeId::new(2)));
        assert_eq!(network.workers().await, vec![a, b]);
    }

    #[tokio::test]
    async fn test_send_round_trips_reply() {
        let network = LocalNetwork::new();
        let (node, inbox) = network.register().await;
        spawn_acker(node, inbox);

        let cmd = command(node);
        let reply = network.send(cmd.clone()).await.unwrap();
        assert_eq!(reply, Reply::ack(node, cmd.id));
        assert_eq!(network.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_dropped_inbox_reports_command_dropped() {
        let network = LocalNetwork::new();
        let (node, mut inbox) = network.register().await;
        tokio::spawn(async move {
            // Drop every reply sender without answering.
            while let Some(envelope) = inbox.recv().await {
                drop(envelope);
            }
        });

        let err = network.send(command(node)).await.unwrap_err();
        assert!(matches!(err, Error::CommandDropped { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let network = LocalNetwork::new();
        let err = network.send(command(NodeId::new(7))).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_faults_duplicate_and_drop() {
        let faults = FaultConfig::new(7).with_duplicates(1.0).with_dropped_replies(1.0);
        let network = LocalNetwork::with_faults(faults);
        let (node, inbox) = network.register().await;
        spawn_acker(node, inbox);

        let err = network.send(command(node)).await.unwrap_err();
        assert!(err.is_retryable());
        let stats = network.stats();
        assert_eq!((stats.delivered, stats.duplicated, stats.replies_dropped), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_workers_times_out() {
        let network = LocalNetwork::new();
        let _keep = network.register().await;
        let err = network
            .wait_for_workers(3, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_wait_for_workers_sees_late_registration() {
        let network = LocalNetwork::new();
        let waiter = {
            let network = network.clone();
            tokio::spawn(async move { network.wait_for_workers(2, Duration::from_secs(5)).await })
        };
        let _a = network.register().await;
        let _b = network.register().await;
        let workers = waiter.await.unwrap().unwrap();
        assert_eq!(workers.len(), 2);
    }
}
