//! Export orchestration.
//!
//! Drives the reader and decoder over the shards of an export. Each shard is
//! read start to finish by one thread. With `concurrency > 1` a scoped pool of
//! workers pulls shard indices from a shared counter and sends decoded
//! entities to the calling thread, which is the only one that runs the
//! callback. Entities of one shard arrive in file order; shards interleave.

use crate::decode::{Decoder, DecoderConfig, Entity, UnknownFieldPolicy};
use crate::error::{Error, Result};
use crate::log::{ReaderConfig, ShardReader};
use crate::manifest;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use tracing::{debug, info, warn};

/// Entities buffered per worker before a worker blocks on the channel
const CHANNEL_CAPACITY_PER_WORKER: usize = 64;

/// What to do when a document fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrorPolicy {
    /// Stop reading the shard and report the error
    #[default]
    Abort,
    /// Log the error, count the document as skipped and continue
    Skip,
}

/// Configuration for reading an export
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Number of shards read at once
    pub concurrency: usize,
    /// Shard reader settings
    pub reader: ReaderConfig,
    /// Decoder settings
    pub decoder: DecoderConfig,
    /// Handling of per-document decode errors
    pub on_decode_error: DecodeErrorPolicy,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            reader: ReaderConfig::default(),
            decoder: DecoderConfig::default(),
            on_decode_error: DecodeErrorPolicy::default(),
        }
    }
}

impl ExportConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of shards read in parallel (at least 1)
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets whether record checksums are verified
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.reader = self.reader.verify_checksums(verify);
        self
    }

    /// Sets the unknown field policy
    pub fn unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.decoder = self.decoder.unknown_fields(policy);
        self
    }

    /// Sets the decode error policy
    pub fn on_decode_error(mut self, policy: DecodeErrorPolicy) -> Self {
        self.on_decode_error = policy;
        self
    }
}

/// Counters for one shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// The shard file
    pub path: PathBuf,
    /// Non-empty documents read
    pub documents: u64,
    /// Entities handed to the callback
    pub entities: u64,
    /// Documents dropped under [`DecodeErrorPolicy::Skip`]
    pub skipped: u64,
}

impl ShardStats {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Self::default()
        }
    }
}

/// A shard that stopped early
#[derive(Debug)]
pub struct ShardFailure {
    /// Counts up to the failure
    pub stats: ShardStats,
    /// What went wrong
    pub error: Error,
}

/// Result of reading a set of shards, in input order
#[derive(Debug, Default)]
pub struct ExportSummary {
    /// Shards read to the end
    pub completed: Vec<ShardStats>,
    /// Shards that failed
    pub failed: Vec<ShardFailure>,
}

impl ExportSummary {
    /// True if every shard was read to the end
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Entities delivered across all shards, including failed ones
    pub fn entities(&self) -> u64 {
        self.all_stats().map(|s| s.entities).sum()
    }

    /// Documents read across all shards
    pub fn documents(&self) -> u64 {
        self.all_stats().map(|s| s.documents).sum()
    }

    /// Documents skipped across all shards
    pub fn skipped(&self) -> u64 {
        self.all_stats().map(|s| s.skipped).sum()
    }

    fn all_stats(&self) -> impl Iterator<Item = &ShardStats> {
        self.completed
            .iter()
            .chain(self.failed.iter().map(|f| &f.stats))
    }

    fn record(&mut self, stats: ShardStats, error: Option<Error>) {
        match error {
            None => self.completed.push(stats),
            Some(error) => {
                warn!("shard {} failed: {}", stats.path.display(), error);
                self.failed.push(ShardFailure { stats, error });
            }
        }
    }
}

/// Reads exactly one shard, calling `callback` for each entity in file order.
///
/// Framing errors, and decode errors under [`DecodeErrorPolicy::Abort`], end
/// the read. Entities delivered before the error stay delivered.
pub fn read_shard<F>(
    path: impl AsRef<Path>,
    config: &ExportConfig,
    mut callback: F,
) -> Result<ShardStats>
where
    F: FnMut(Entity),
{
    let path = path.as_ref();
    let decoder = Decoder::new()?.with_config(config.decoder.clone());
    let mut stats = ShardStats::new(path);
    process(path, config, &decoder, &mut stats, &mut callback)?;
    Ok(stats)
}

/// Reads every shard listed in a manifest.
///
/// Fails only if the manifest cannot be read. Shard failures are logged and
/// recorded in the summary while the other shards carry on.
pub fn read_export<F>(
    manifest: impl AsRef<Path>,
    config: &ExportConfig,
    callback: F,
) -> Result<ExportSummary>
where
    F: FnMut(Entity),
{
    let manifest = manifest.as_ref();
    let paths = manifest::shard_paths(manifest)?;
    info!("{}: {} shard(s)", manifest.display(), paths.len());
    read_shards(&paths, config, callback)
}

/// Reads the given shards, sequentially or with `config.concurrency`
/// workers.
pub fn read_shards<F>(
    paths: &[PathBuf],
    config: &ExportConfig,
    mut callback: F,
) -> Result<ExportSummary>
where
    F: FnMut(Entity),
{
    let decoder = Decoder::new()?.with_config(config.decoder.clone());
    let workers = config.concurrency.min(paths.len());

    let summary = if workers <= 1 {
        let mut summary = ExportSummary::default();
        for path in paths {
            let mut stats = ShardStats::new(path);
            let result = process(path, config, &decoder, &mut stats, &mut callback);
            summary.record(stats, result.err());
        }
        summary
    } else {
        read_parallel(paths, config, &decoder, workers, &mut callback)
    };

    info!(
        "read {} entities from {} document(s) in {} shard(s), {} skipped, {} shard(s) failed",
        summary.entities(),
        summary.documents(),
        paths.len(),
        summary.skipped(),
        summary.failed.len()
    );
    Ok(summary)
}

enum Event {
    Entity(Entity),
    Done {
        index: usize,
        stats: ShardStats,
        error: Option<Error>,
    },
}

fn read_parallel<F>(
    paths: &[PathBuf],
    config: &ExportConfig,
    decoder: &Decoder<'_>,
    workers: usize,
    callback: &mut F,
) -> ExportSummary
where
    F: FnMut(Entity),
{
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::sync_channel(workers * CHANNEL_CAPACITY_PER_WORKER);
    let mut outcomes: Vec<Option<(ShardStats, Option<Error>)>> =
        std::iter::repeat_with(|| None).take(paths.len()).collect();

    debug!("reading {} shards with {} workers", paths.len(), workers);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = paths.get(index) else {
                    break;
                };

                let mut stats = ShardStats::new(path);
                let mut emit = |entity| {
                    // the receiver lives until every sender is gone
                    let _ = tx.send(Event::Entity(entity));
                };
                let error = process(path, config, decoder, &mut stats, &mut emit).err();
                if tx.send(Event::Done { index, stats, error }).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for event in rx {
            match event {
                Event::Entity(entity) => callback(entity),
                Event::Done {
                    index,
                    stats,
                    error,
                } => outcomes[index] = Some((stats, error)),
            }
        }
    });

    let mut summary = ExportSummary::default();
    for (stats, error) in outcomes.into_iter().flatten() {
        summary.record(stats, error);
    }
    summary
}

fn process<F>(
    path: &Path,
    config: &ExportConfig,
    decoder: &Decoder<'_>,
    stats: &mut ShardStats,
    emit: &mut F,
) -> Result<()>
where
    F: FnMut(Entity),
{
    debug!("reading shard {}", path.display());
    let mut reader = ShardReader::open(path, config.reader.clone())?;

    for document in reader.documents() {
        let document = document?;
        stats.documents += 1;
        match decoder.decode(&document) {
            Ok(entity) => {
                stats.entities += 1;
                emit(entity);
            }
            Err(e)
                if e.is_document_scoped() && config.on_decode_error == DecodeErrorPolicy::Skip =>
            {
                stats.skipped += 1;
                warn!(
                    "skipping document {} of {}: {}",
                    stats.documents,
                    path.display(),
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }

    debug!(
        "finished {}: {} entities, {} skipped",
        path.display(),
        stats.entities,
        stats.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Value;
    use crate::encode::EntityBuilder;
    use crate::log::ShardWriter;
    use std::fs::File;

    fn write_shard(path: &Path, documents: &[Vec<u8>]) {
        let mut writer = ShardWriter::new(File::create(path).unwrap());
        for document in documents {
            writer.add_document(document).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_config_builder() {
        let config = ExportConfig::new()
            .concurrency(0)
            .verify_checksums(false)
            .unknown_fields(UnknownFieldPolicy::Fail)
            .on_decode_error(DecodeErrorPolicy::Skip);
        assert_eq!(config.concurrency, 1);
        assert!(!config.reader.verify_checksums);
        assert_eq!(config.decoder.unknown_fields, UnknownFieldPolicy::Fail);
        assert_eq!(config.on_decode_error, DecodeErrorPolicy::Skip);
    }

    #[test]
    fn test_read_shard_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output-0");
        let documents: Vec<_> = (0..5)
            .map(|i| {
                EntityBuilder::new("Item", format!("k{i}"))
                    .property("n", i as i64)
                    .build()
            })
            .collect();
        write_shard(&path, &documents);

        let mut keys = Vec::new();
        let stats = read_shard(&path, &ExportConfig::default(), |entity| {
            keys.push(entity.key().and_then(Value::as_str).map(str::to_string));
        })
        .unwrap();

        assert_eq!(stats.documents, 5);
        assert_eq!(stats.entities, 5);
        assert_eq!(stats.skipped, 0);
        let expected: Vec<_> = (0..5).map(|i| Some(format!("k{i}"))).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_skip_policy_counts_bad_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output-0");
        write_shard(
            &path,
            &[
                EntityBuilder::new("Item", "a").build(),
                vec![0x76, 0x00],
                EntityBuilder::new("Item", "b").build(),
            ],
        );

        let aborted = read_shard(&path, &ExportConfig::default(), |_| {});
        assert!(matches!(aborted, Err(Error::UnknownWireType { .. })));

        let config = ExportConfig::new().on_decode_error(DecodeErrorPolicy::Skip);
        let mut seen = 0;
        let stats = read_shard(&path, &config, |_| seen += 1).unwrap();
        assert_eq!((stats.documents, stats.entities, stats.skipped), (3, 2, 1));
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_missing_shard_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("output-0");
        write_shard(&good, &[EntityBuilder::new("Item", "a").build()]);
        let paths = vec![dir.path().join("missing"), good.clone()];

        let summary = read_shards(&paths, &ExportConfig::default(), |_| {}).unwrap();
        assert!(!summary.is_complete());
        assert_eq!(summary.completed.len(), 1);
        assert_eq!(summary.completed[0].path, good);
        assert!(matches!(summary.failed[0].error, Error::Io { .. }));
        assert_eq!(summary.entities(), 1);
    }

    #[test]
    fn test_empty_shard_list() {
        let config = ExportConfig::new().concurrency(4);
        let summary = read_shards(&[], &config, |_| {}).unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.entities(), 0);
    }
}
