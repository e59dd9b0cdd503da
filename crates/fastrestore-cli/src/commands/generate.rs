//! Generate command: write a synthetic directory backup.
//!
//! The backup holds one snapshot of `keys` keys at version 100 followed by
//! `logs` contiguous log files of 100 versions each. Log groups mix sets,
//! range clears and atomic adds to a `counter` key.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use fastrestore::DirectoryContainer;
use fastrestore::backup::{log_file, range_file};
use fastrestore_types::{Key, Mutation, MutationType, Value, Version};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::style::colors::SemanticStyle;
use crate::style::{Mark, create_spinner, finish_success, print_section, report};

const SNAPSHOT_VERSION: u64 = 100;
const LOG_SPAN: u64 = 100;
const PART_SIZE: usize = 64;

pub struct GenerateOptions {
    pub path: PathBuf,
    pub keys: usize,
    pub logs: u64,
    pub groups: u64,
    pub block_size: u32,
    pub seed: u64,
}

pub async fn run(options: GenerateOptions) -> Result<()> {
    if options.keys == 0 {
        bail!("--keys must be at least 1");
    }
    if options.groups > LOG_SPAN {
        bail!("--groups must be at most {LOG_SPAN}");
    }

    let sp = create_spinner("Generating backup...");
    let mut rng = StdRng::seed_from_u64(options.seed);
    let container = DirectoryContainer::new(&options.path);

    let snapshot = snapshot_pairs(&mut rng, options.keys);
    let file = range_file(
        Version::new(SNAPSHOT_VERSION),
        &format!("{:016x}", options.seed),
        options.block_size,
        &snapshot,
    )?;
    container
        .write(&file)
        .await
        .with_context(|| format!("Failed to write {}", file.name))?;

    for index in 0..options.logs {
        let begin = SNAPSHOT_VERSION + 1 + index * LOG_SPAN;
        let groups = log_groups(&mut rng, begin, options.groups, options.keys);
        let file = log_file(
            Version::new(begin),
            Version::new(begin + LOG_SPAN),
            &format!("{:016x}", options.seed.wrapping_add(index + 1)),
            options.block_size,
            PART_SIZE,
            &groups,
        )?;
        container
            .write(&file)
            .await
            .with_context(|| format!("Failed to write {}", file.name))?;
    }

    let max_version = SNAPSHOT_VERSION + options.logs * LOG_SPAN;
    finish_success(&sp, &format!("Backup written to {}", options.path.display()));
    print_section(
        "Backup",
        &[
            ("Range files", "1".to_string()),
            ("Log files", options.logs.to_string()),
            ("Max restorable version", max_version.to_string()),
        ],
    );
    report(Mark::Hint, &format!(
        "Restore it with {}",
        format!("fastrestore restore {}", options.path.display()).code()
    ));
    Ok(())
}

fn key(index: usize) -> Key {
    Bytes::from(format!("key{index:06}"))
}

fn random_value(rng: &mut StdRng) -> Value {
    Bytes::from(format!("{:016x}", rng.r#gen::<u64>()))
}

fn snapshot_pairs(rng: &mut StdRng, keys: usize) -> Vec<(Key, Value)> {
    // "counter" sorts before every "key..." key.
    let mut pairs = vec![(Bytes::from_static(b"counter"), counter(0))];
    pairs.extend((0..keys).map(|i| (key(i), random_value(rng))));
    pairs
}

fn log_groups(
    rng: &mut StdRng,
    begin: u64,
    groups: u64,
    keys: usize,
) -> Vec<(Version, Vec<Mutation>)> {
    let stride = LOG_SPAN / groups.max(1);
    (0..groups)
        .map(|g| {
            let version = Version::new(begin + g * stride);
            let target = rng.gen_range(0..keys);
            let mutation = match rng.gen_range(0..4) {
                0 => Mutation::clear_range(key(target), key(target + 2)),
                1 => Mutation::new(MutationType::AddValue, "counter", counter(1)),
                _ => Mutation::set(key(target), random_value(rng)),
            };
            (version, vec![mutation])
        })
        .collect()
}

fn counter(n: u64) -> Value {
    Bytes::from(n.to_le_bytes().to_vec())
}
