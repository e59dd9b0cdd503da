//! An in-process restore cluster: one master and N workers on a
//! [`LocalNetwork`], all sharing one target store.

use std::sync::Arc;

use fastrestore_config::RestoreConfig;
use fastrestore_types::{NodeId, RestoreRequest};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::backup::ContainerResolver;
use crate::master::{Master, RestoreSummary, RestoreTicket};
use crate::store::Store;
use crate::transport::{FaultConfig, LocalNetwork};
use crate::worker::{Worker, WorkerEnv};
use crate::{Error, Result};

/// Requests waiting for the master.
const REQUEST_QUEUE: usize = 16;

/// Configures and starts a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    config: RestoreConfig,
    workers: usize,
    faults: Option<FaultConfig>,
    containers: ContainerResolver,
}

impl ClusterBuilder {
    /// A cluster with `config.cluster.min_workers` workers.
    pub fn new(config: RestoreConfig) -> Self {
        let workers = config.cluster.min_workers as usize;
        Self {
            config,
            workers,
            faults: None,
            containers: ContainerResolver::new(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn faults(mut self, faults: FaultConfig) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn containers(mut self, containers: ContainerResolver) -> Self {
        self.containers = containers;
        self
    }

    /// Spawns the workers and the master onto the current runtime.
    pub async fn start<S: Store>(self, store: S) -> LocalCluster<S> {
        let network = match self.faults {
            Some(faults) => LocalNetwork::with_faults(faults),
            None => LocalNetwork::new(),
        };
        let config = Arc::new(self.config);

        let mut workers = Vec::with_capacity(self.workers);
        let mut nodes = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let (node, inbox) = network.register().await;
            let worker = Worker::new(WorkerEnv {
                node,
                transport: network.clone(),
                store: store.clone(),
                containers: self.containers.clone(),
                config: Arc::clone(&config),
            });
            nodes.push(node);
            workers.push(tokio::spawn(worker.run(inbox)));
        }

        let (requests, queue) = mpsc::channel(REQUEST_QUEUE);
        let master = Master::new(network.clone(), store.clone(), self.containers, config);
        let master = tokio::spawn(master.serve(queue));

        info!(workers = nodes.len(), "local cluster started");
        LocalCluster {
            network,
            store,
            nodes,
            requests,
            master,
            workers,
        }
    }
}

/// A running in-process cluster.
#[derive(Debug)]
pub struct LocalCluster<S> {
    network: LocalNetwork,
    store: S,
    nodes: Vec<NodeId>,
    requests: mpsc::Sender<RestoreTicket>,
    master: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: Store> LocalCluster<S> {
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Worker ids in registration order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Queues `request` and waits for its outcome.
    pub async fn restore(&self, request: RestoreRequest) -> Result<RestoreSummary> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(RestoreTicket { request, reply })
            .await
            .map_err(|_| Error::Transport("master stopped".to_string()))?;
        outcome
            .await
            .map_err(|_| Error::Transport("master dropped the request".to_string()))?
    }

    /// Stops the master after queued requests finish, then the workers.
    pub async fn shutdown(self) {
        drop(self.requests);
        let _ = self.master.await;
        for worker in &self.workers {
            worker.abort();
        }
        info!("local cluster stopped");
    }
}
