//! fsbackup - Dump Firestore/Datastore export backups as JSON lines
//!
//! This tool reads the shard files of an export, decodes every entity and
//! writes one JSON object per entity to stdout or a file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use fsbackup_core::{
    read_export, read_shard, DecodeErrorPolicy, Entity, ExportConfig, ExportSummary,
    UnknownFieldPolicy,
};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const MANIFEST_SUFFIX: &str = ".export_metadata";

/// Dump Firestore/Datastore export backups as JSON lines
#[derive(Parser, Debug)]
#[command(name = "fsbackup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Write JSON lines here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of shards read in parallel
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Do not verify record checksums
    #[arg(long)]
    no_verify: bool,

    /// Skip documents that fail to decode instead of abandoning the shard
    #[arg(long)]
    skip_invalid: bool,

    /// Handling of field ids the entity schema does not declare
    #[arg(long, value_enum, default_value = "skip")]
    unknown_fields: UnknownFields,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to an `.export_metadata` manifest
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Path to a single shard file
    #[arg(short, long)]
    shard: Option<PathBuf>,

    /// Directory searched recursively for manifests
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnknownFields {
    /// Ignore undeclared fields
    Skip,
    /// Treat undeclared fields as a decode error
    Fail,
}

impl From<UnknownFields> for UnknownFieldPolicy {
    fn from(value: UnknownFields) -> Self {
        match value {
            UnknownFields::Skip => UnknownFieldPolicy::Skip,
            UnknownFields::Fail => UnknownFieldPolicy::Fail,
        }
    }
}

impl Cli {
    fn export_config(&self) -> ExportConfig {
        let on_decode_error = if self.skip_invalid {
            DecodeErrorPolicy::Skip
        } else {
            DecodeErrorPolicy::Abort
        };
        ExportConfig::new()
            .concurrency(self.jobs)
            .verify_checksums(!self.no_verify)
            .unknown_fields(self.unknown_fields.into())
            .on_decode_error(on_decode_error)
    }
}

/// Writes entities as JSON lines, keeping the first write error
struct JsonLines<W: Write> {
    out: W,
    written: u64,
    error: Option<io::Error>,
}

impl<W: Write> JsonLines<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            error: None,
        }
    }

    fn write(&mut self, entity: &Entity) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.out, entity)
            .map_err(io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(mut self) -> io::Result<u64> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.written)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    run(&cli, BufWriter::new(out))
}

fn run<W: Write>(cli: &Cli, out: W) -> Result<()> {
    let config = cli.export_config();
    let mut sink = JsonLines::new(out);

    // Dispatch based on input mode
    let failed = if let Some(ref shard) = cli.input.shard {
        process_shard(&config, shard, &mut sink)?;
        0
    } else if let Some(ref manifest) = cli.input.manifest {
        process_manifest(&config, manifest, &mut sink)?.failed.len()
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&config, directory, &mut sink)?
    } else {
        bail!("One of --manifest, --shard or --directory must be specified")
    };

    let written = sink.finish().context("Failed to write output")?;
    info!("Wrote {} entities", written);

    if failed > 0 {
        bail!("{} shard(s) could not be read completely", failed);
    }
    Ok(())
}

/// Process exactly one shard file
fn process_shard<W: Write>(
    config: &ExportConfig,
    shard: &Path,
    sink: &mut JsonLines<W>,
) -> Result<()> {
    if !shard.is_file() {
        bail!("Shard file does not exist: {}", shard.display());
    }

    let stats = read_shard(shard, config, |entity| sink.write(&entity))
        .with_context(|| format!("Failed to read shard: {}", shard.display()))?;
    debug!(
        "{}: {} documents, {} skipped",
        shard.display(),
        stats.documents,
        stats.skipped
    );
    Ok(())
}

/// Process every shard listed in a manifest
fn process_manifest<W: Write>(
    config: &ExportConfig,
    manifest: &Path,
    sink: &mut JsonLines<W>,
) -> Result<ExportSummary> {
    let summary = read_export(manifest, config, |entity| sink.write(&entity))
        .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
    for failure in &summary.failed {
        debug!(
            "{}: stopped after {} entities",
            failure.stats.path.display(),
            failure.stats.entities
        );
    }
    Ok(summary)
}

/// Process every manifest under a directory, returning the failed shard count
fn process_directory<W: Write>(
    config: &ExportConfig,
    directory: &Path,
    sink: &mut JsonLines<W>,
) -> Result<usize> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut manifests = 0;
    let mut failed = 0;
    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_manifest(path) {
            continue;
        }

        manifests += 1;
        match process_manifest(config, path, sink) {
            Ok(summary) => failed += summary.failed.len(),
            Err(e) => {
                // Log error but continue with other manifests
                warn!("Error processing {}: {:#}", path.display(), e);
                failed += 1;
            }
        }
    }

    if manifests == 0 {
        bail!("No {} files found under {}", MANIFEST_SUFFIX, directory.display());
    }
    info!("Processed {} manifests", manifests);
    Ok(failed)
}

fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(MANIFEST_SUFFIX))
        .unwrap_or(false)
}
