//! # fastrestore: parallel restore coordination
//!
//! Restores a key-value database from a backup of immutable range and log
//! files by spreading the work over a fleet of workers:
//!
//! - the **master** ([`Master`]) assigns roles, cuts the backup into version
//!   batches and drives every batch through its phases,
//! - **loaders** ([`loader`]) decode backup file blocks into mutations and
//!   route them by key,
//! - **appliers** ([`applier`]) buffer the mutations of their key range and
//!   write them to the target [`Store`] in commit-version order.
//!
//! Coordination runs over a [`Transport`] that may duplicate commands, lose
//! replies or time out. Every command carries a [`CommandId`]; workers
//! answer repeats from their [`CommandLog`] and classify the rest with a
//! [`PhaseTracker`], so re-sending a whole round is always safe.
//!
//! [`CommandId`]: fastrestore_types::CommandId
//!
//! # Example
//!
//! ```no_run
//! use fastrestore::{ClusterBuilder, MemoryContainer, ContainerResolver, MemoryStore};
//! use fastrestore_config::RestoreConfig;
//! use fastrestore_types::{RestoreRequest, Version};
//! use bytes::Bytes;
//!
//! # async fn example() -> fastrestore::Result<()> {
//! let mut backup = MemoryContainer::new("memory://docs");
//! backup.add_range_file(Version::new(10), 4096, &[(Bytes::from("k"), Bytes::from("v"))])?;
//! let mut containers = ContainerResolver::new();
//! containers.register(backup);
//!
//! let store = MemoryStore::new();
//! let cluster = ClusterBuilder::new(RestoreConfig::development())
//!     .containers(containers)
//!     .start(store.clone())
//!     .await;
//! cluster.restore(RestoreRequest::new("memory://docs")).await?;
//! assert_eq!(store.get(b"k").await, Some(Bytes::from("v")));
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod backup;
pub mod cluster;
pub mod command_log;
pub mod error;
pub mod loader;
pub mod master;
pub mod message;
pub mod phase;
pub mod rpc;
pub mod store;
pub mod transport;
pub mod worker;

pub use backup::{
    AnyContainer, BackupContainer, BackupDescription, ContainerResolver, DirectoryContainer,
    MemoryContainer, RestoreSet, open_container,
};
pub use cluster::{ClusterBuilder, LocalCluster};
pub use command_log::CommandLog;
pub use error::{ContainerError, Error, Result, StoreError};
pub use master::{Master, RestoreState, RestoreStatus, RestoreSummary, RestoreTicket};
pub use message::{Command, CommandPayload, RemoteError, RemoteErrorKind, Reply, ReplyBody};
pub use phase::{Admission, PhaseTracker};
pub use store::{MemoryStore, Store, Transaction};
pub use transport::{FaultConfig, LocalNetwork, NetworkStats, Transport};
pub use worker::{Worker, WorkerEnv};
