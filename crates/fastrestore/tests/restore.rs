//! End-to-end restores on an in-process cluster.

use bytes::Bytes;
use fastrestore::backup::{DirectoryContainer, EncodedFile, log_file_name, range_file};
use fastrestore::{
    ClusterBuilder, ContainerResolver, Error, FaultConfig, LocalCluster, MemoryContainer,
    MemoryStore, RemoteError, RemoteErrorKind, RestoreState, RestoreStatus, StoreError,
};
use fastrestore_codec::{LogFileWriter, encode_mutation_group, split_into_parts};
use fastrestore_config::RestoreConfig;
use fastrestore_types::{Key, KeyRange, Mutation, MutationType, RestoreRequest, Value, Version};

// ============================================================================
// Helpers
// ============================================================================

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn pairs(items: &[(&str, &str)]) -> Vec<(Key, Value)> {
    items.iter().map(|(k, v)| (b(k), b(v))).collect()
}

fn counter(n: u64) -> Bytes {
    Bytes::from(n.to_le_bytes().to_vec())
}

fn config(workers: u32) -> RestoreConfig {
    let mut config = RestoreConfig::development();
    config.cluster.min_workers = workers;
    config
}

async fn start(config: RestoreConfig, containers: ContainerResolver) -> (LocalCluster<MemoryStore>, MemoryStore) {
    let store = MemoryStore::new();
    let workers = config.cluster.min_workers as usize;
    let cluster = ClusterBuilder::new(config)
        .workers(workers)
        .containers(containers)
        .start(store.clone())
        .await;
    (cluster, store)
}

fn resolver(container: MemoryContainer) -> ContainerResolver {
    let mut containers = ContainerResolver::new();
    containers.register(container);
    containers
}

/// A log file whose only mutation group claims one byte more than it holds.
fn corrupt_log_file(begin: u64, end: u64, at: u64) -> EncodedFile {
    let mut group = encode_mutation_group(at, &[Mutation::set("c", "3")]);
    let total = u32::from_le_bytes([group[8], group[9], group[10], group[11]]) + 1;
    group[8..12].copy_from_slice(&total.to_le_bytes());

    let mut writer = LogFileWriter::new(1024);
    for part in split_into_parts(Version::new(at), &group, 16) {
        writer.write_kv(&part.key, &part.value).unwrap();
    }
    EncodedFile {
        name: log_file_name(Version::new(begin), Version::new(end), "corrupt", 1024),
        data: Bytes::from(writer.finish()),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn full_restore_of_a_single_range_file() {
    let mut backup = MemoryContainer::new("memory://full");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1"), ("m", "2"), ("z", "3")]))
        .unwrap();

    // Two loaders and two appliers.
    let (cluster, store) = start(config(4), resolver(backup)).await;
    let request = RestoreRequest::new("memory://full");
    let summary = cluster.restore(request.clone()).await.unwrap();

    assert_eq!(summary.target_version, Version::new(10));
    assert_eq!(summary.batches, 1);
    assert_eq!(
        store.user_data().await.into_iter().collect::<Vec<_>>(),
        pairs(&[("a", "1"), ("m", "2"), ("z", "3")])
    );
    assert_eq!(store.lock_owner().await, None);

    // Three sampled keys over two appliers: ["", "m") and ["m", end).
    let assignment = summary.last_assignment.expect("one batch ran");
    let bounds: Vec<Key> = assignment.iter().map(|(bound, _)| bound.clone()).collect();
    assert_eq!(bounds, vec![b(""), b("m")]);
    assert_eq!(assignment.appliers().len(), 2);

    let status = RestoreStatus::read(&store, request.uid).await.unwrap().unwrap();
    assert_eq!(status.state, RestoreState::Completed);
    assert_eq!(status.batches_done, 1);
    assert_eq!(status.applied_version, Some(Version::new(10)));
    cluster.shutdown().await;
}

#[tokio::test]
async fn losing_the_lock_midway_fails_the_request() {
    let mut backup = MemoryContainer::new("memory://stolen");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1"), ("b", "2")]))
        .unwrap();

    let (cluster, store) = start(config(4), resolver(backup)).await;
    let request = RestoreRequest::new("memory://stolen");
    // The destination clear and the first status write succeed, then another
    // request owns the database before anything is loaded.
    let thief = uuid::Uuid::new_v4();
    store.hand_lock_after(2, thief).await;
    let err = cluster.restore(request.clone()).await.unwrap_err();

    assert!(
        matches!(err, Error::Store(StoreError::NotLocked { uid }) if uid == request.uid),
        "{err}"
    );
    assert!(store.user_data().await.is_empty());
    assert_eq!(store.lock_owner().await, Some(thief));

    // The final status belongs to the new owner; ours stays as last written.
    let status = RestoreStatus::read(&store, request.uid).await.unwrap().unwrap();
    assert_eq!(status.state, RestoreState::Running);
    assert_eq!(status.batches_done, 0);
    cluster.shutdown().await;
}

#[tokio::test]
async fn corrupt_log_fails_the_request_and_leaves_data_untouched() {
    let mut backup = MemoryContainer::new("memory://corrupt");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1")]))
        .unwrap();
    backup.put(corrupt_log_file(5, 20, 15));

    let (cluster, store) = start(config(4), resolver(backup)).await;
    let request = RestoreRequest::new("memory://corrupt").with_target_version(Version::new(15));
    let err = cluster.restore(request.clone()).await.unwrap_err();

    assert!(matches!(err, Error::Remote { .. }), "{err}");
    assert_eq!(RemoteError::from(&err).kind, RemoteErrorKind::CorruptedData);
    assert!(store.user_data().await.is_empty());
    assert_eq!(store.lock_owner().await, None);

    let status = RestoreStatus::read(&store, request.uid).await.unwrap().unwrap();
    assert_eq!(status.state, RestoreState::Failed);
    assert!(status.error.is_some());
    cluster.shutdown().await;
}

#[tokio::test]
async fn workers_are_reusable_after_a_failed_request() {
    let mut backup = MemoryContainer::new("memory://retry");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1"), ("b", "2")]))
        .unwrap();
    backup.put(corrupt_log_file(5, 20, 15));

    let (cluster, store) = start(config(3), resolver(backup)).await;
    let failing = RestoreRequest::new("memory://retry").with_target_version(Version::new(15));
    assert!(cluster.restore(failing).await.is_err());

    // Restoring the snapshot alone needs no log.
    let request = RestoreRequest::new("memory://retry").with_target_version(Version::new(10));
    cluster.restore(request).await.unwrap();
    assert_eq!(store.user_data().await.len(), 2);
    cluster.shutdown().await;
}

#[tokio::test]
async fn logs_replay_across_version_batches() {
    let mut backup = MemoryContainer::new("memory://logs");
    backup
        .add_range_file(
            Version::new(10),
            64,
            &[
                (b("a"), b("1")),
                (b("b"), b("2")),
                (b("c"), b("3")),
                (b("d"), b("4")),
                (b("e"), b("5")),
                (b("n"), counter(1)),
            ],
        )
        .unwrap();
    backup
        .add_log_file(
            Version::new(11),
            Version::new(20),
            128,
            24,
            &[
                (Version::new(12), vec![Mutation::set("b", "x")]),
                (
                    Version::new(15),
                    vec![Mutation::new(MutationType::AddValue, "n", counter(1))],
                ),
                (Version::new(18), vec![Mutation::clear_range("c", "e")]),
            ],
        )
        .unwrap();
    backup
        .add_log_file(
            Version::new(20),
            Version::new(30),
            128,
            24,
            &[(
                Version::new(25),
                vec![
                    Mutation::new(MutationType::AddValue, "n", counter(2)),
                    Mutation::set("f", "6"),
                ],
            )],
        )
        .unwrap();

    let mut config = config(4);
    config.batching.batch_size_threshold_bytes = 1;
    let (cluster, store) = start(config, resolver(backup)).await;
    let summary = cluster.restore(RestoreRequest::new("memory://logs")).await.unwrap();

    assert_eq!(summary.target_version, Version::new(29));
    assert_eq!(summary.batches, 3);
    assert_eq!((summary.range_files, summary.log_files), (1, 2));

    let data = store.user_data().await;
    assert_eq!(data.get(&b("a")), Some(&b("1")));
    assert_eq!(data.get(&b("b")), Some(&b("x")));
    assert_eq!(data.get(&b("c")), None);
    assert_eq!(data.get(&b("d")), None);
    assert_eq!(data.get(&b("e")), Some(&b("5")));
    assert_eq!(data.get(&b("f")), Some(&b("6")));
    assert_eq!(data.get(&b("n")), Some(&counter(4)));
    cluster.shutdown().await;
}

#[tokio::test]
async fn target_version_cuts_the_log() {
    let mut backup = MemoryContainer::new("memory://target");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1")]))
        .unwrap();
    backup
        .add_log_file(
            Version::new(11),
            Version::new(40),
            4096,
            64,
            &[
                (Version::new(20), vec![Mutation::set("a", "20")]),
                (Version::new(30), vec![Mutation::set("a", "30")]),
            ],
        )
        .unwrap();

    let (cluster, store) = start(config(3), resolver(backup)).await;
    let request = RestoreRequest::new("memory://target").with_target_version(Version::new(25));
    cluster.restore(request).await.unwrap();
    assert_eq!(store.get(b"a").await, Some(b("20")));
    cluster.shutdown().await;
}

#[tokio::test]
async fn range_and_prefixes_are_applied() {
    let mut backup = MemoryContainer::new("memory://prefix");
    backup
        .add_range_file(
            Version::new(10),
            4096,
            &pairs(&[("app/a", "1"), ("app/b", "2"), ("other/c", "3")]),
        )
        .unwrap();

    let (cluster, store) = start(config(3), resolver(backup)).await;
    let request = RestoreRequest::new("memory://prefix")
        .with_range(KeyRange::new("app/", "app0"))
        .with_prefixes("app/", "restored/")
        .with_lock_db(false);
    cluster.restore(request).await.unwrap();

    assert_eq!(
        store.user_data().await.into_iter().collect::<Vec<_>>(),
        pairs(&[("restored/a", "1"), ("restored/b", "2")])
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn locked_restore_replaces_destination_range() {
    let mut backup = MemoryContainer::new("memory://lock");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("k1", "new")]))
        .unwrap();

    let store = MemoryStore::with_data(pairs(&[("k1", "old"), ("k2", "stale")]));
    let cluster = ClusterBuilder::new(config(3))
        .containers(resolver(backup))
        .start(store.clone())
        .await;
    cluster.restore(RestoreRequest::new("memory://lock")).await.unwrap();

    assert_eq!(
        store.user_data().await.into_iter().collect::<Vec<_>>(),
        pairs(&[("k1", "new")])
    );
    cluster.shutdown().await;
}

#[tokio::test]
async fn more_appliers_than_key_ranges() {
    let mut backup = MemoryContainer::new("memory://idle");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("only", "1")]))
        .unwrap();

    // Five workers: two loaders and three appliers, one sampled key.
    let (cluster, store) = start(config(5), resolver(backup)).await;
    cluster.restore(RestoreRequest::new("memory://idle")).await.unwrap();
    assert_eq!(store.get(b"only").await, Some(b("1")));
    cluster.shutdown().await;
}

#[tokio::test]
async fn restore_survives_duplicates_and_lost_replies() {
    let mut backup = MemoryContainer::new("memory://faults");
    let items: Vec<(Key, Value)> = (0..40)
        .map(|i| (Bytes::from(format!("key{i:03}")), Bytes::from(format!("v{i}"))))
        .collect();
    backup.add_range_file(Version::new(10), 128, &items).unwrap();
    backup
        .add_log_file(
            Version::new(11),
            Version::new(20),
            128,
            32,
            &[(
                Version::new(15),
                vec![Mutation::new(MutationType::AddValue, "counter", counter(5))],
            )],
        )
        .unwrap();

    let mut config = config(4);
    config.rpc.max_round_retries = 100;
    config.loader.mutations_per_request = 4;
    config.loader.send_window = 3;
    let store = MemoryStore::new();
    let cluster = ClusterBuilder::new(config)
        .workers(4)
        .faults(FaultConfig::new(7).with_duplicates(0.2).with_dropped_replies(0.05))
        .containers(resolver(backup))
        .start(store.clone())
        .await;
    cluster.restore(RestoreRequest::new("memory://faults")).await.unwrap();

    let data = store.user_data().await;
    assert_eq!(data.len(), 41);
    // Applied exactly once despite re-deliveries.
    assert_eq!(data.get(&b("counter")), Some(&counter(5)));
    let stats = cluster.network().stats();
    assert!(stats.duplicated > 0);
    cluster.shutdown().await;
}

#[tokio::test]
async fn directory_backup_restores() {
    let dir = tempfile::tempdir().unwrap();
    let container = DirectoryContainer::new(dir.path());
    let file = range_file(Version::new(3), "dir", 256, &pairs(&[("x", "1"), ("y", "2")])).unwrap();
    container.write(&file).await.unwrap();

    let (cluster, store) = start(config(3), ContainerResolver::new()).await;
    let url = format!("file://{}", dir.path().display());
    cluster.restore(RestoreRequest::new(url)).await.unwrap();
    assert_eq!(store.user_data().await.len(), 2);
    cluster.shutdown().await;
}

#[tokio::test]
async fn sequential_requests_share_the_workers() {
    let mut backup = MemoryContainer::new("memory://twice");
    backup
        .add_range_file(Version::new(10), 4096, &pairs(&[("a", "1")]))
        .unwrap();
    backup
        .add_log_file(
            Version::new(11),
            Version::new(20),
            4096,
            64,
            &[(Version::new(15), vec![Mutation::set("a", "2")])],
        )
        .unwrap();

    let (cluster, store) = start(config(3), resolver(backup)).await;
    cluster
        .restore(RestoreRequest::new("memory://twice").with_target_version(Version::new(10)))
        .await
        .unwrap();
    assert_eq!(store.get(b"a").await, Some(b("1")));

    cluster
        .restore(RestoreRequest::new("memory://twice").with_target_version(Version::new(19)))
        .await
        .unwrap();
    assert_eq!(store.get(b"a").await, Some(b("2")));
    cluster.shutdown().await;
}
