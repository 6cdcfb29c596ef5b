use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use frens_core::event::RawBlock;
use frens_core::io::blocklog;
use frens_core::io::config::ProjectionConfig;
use frens_core::store::{MemoryStore, Store};
use frens_core::Dispatcher;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "frensstep",
    about = "Batch projector from an NDJSON block log to NDJSON block reports"
)]
struct Args {
    /// NDJSON block log, one block per line.
    #[arg(long, value_name = "PATH")]
    events: PathBuf,

    /// Projection config JSON. Defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output NDJSON file for per-block reports.
    #[arg(long)]
    out: PathBuf,

    /// Write the final store snapshot here.
    #[arg(long = "snapshot-out", value_name = "PATH")]
    snapshot_out: Option<PathBuf>,

    /// Start from a previously written snapshot instead of an empty store.
    #[arg(long, value_name = "PATH")]
    resume: Option<PathBuf>,
}

/// Ingest `blocks` in order and write one report line per block.
///
/// Blocks at or below the store's last recorded block are skipped, so a
/// resumed run can be pointed at the full log.
fn project<W: Write>(
    store: MemoryStore,
    config: ProjectionConfig,
    blocks: &[RawBlock],
    out: &mut W,
) -> Result<MemoryStore> {
    let resume_after = store.blocks()?.last().map(|block| block.number);
    let mut dispatcher = Dispatcher::new(store, config)?;

    for block in blocks {
        if resume_after.is_some_and(|last| block.number <= last) {
            continue;
        }
        let report = dispatcher
            .ingest_block(block)
            .with_context(|| format!("block {} failed", block.number))?;
        out.write_all(report.to_ndjson()?.as_bytes())?;
    }
    Ok(dispatcher.into_store())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ProjectionConfig::load_from_path(path)?,
        None => ProjectionConfig::default(),
    };
    let blocks = blocklog::load_from_path(&args.events)?;
    let store = match &args.resume {
        Some(path) => MemoryStore::load_from_path(path)?,
        None => MemoryStore::default(),
    };

    let report_file =
        File::create(&args.out).with_context(|| format!("failed to create {:?}", args.out))?;
    let mut report_writer = BufWriter::new(report_file);
    let store = project(store, config, &blocks, &mut report_writer)?;
    report_writer.flush()?;

    if let Some(path) = &args.snapshot_out {
        store.save_to_path(path)?;
    }
    info!(blocks = blocks.len(), out = ?args.out, "projection finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{project, Args};
    use clap::{error::ErrorKind, Parser};
    use frens_core::event::RawBlock;
    use frens_core::io::blocklog;
    use frens_core::io::config::ProjectionConfig;
    use frens_core::store::MemoryStore;

    const LOG: &[&str] = &[
        r#"{"number": 10, "hash": "0xa", "timestamp": 1000, "events": [{"name": "NewGame", "transaction_hash": "0x1", "data": ["0x11", "0x5", "0x64"]}]}"#,
        r#"{"number": 11, "hash": "0xb", "timestamp": 1010, "events": [{"name": "Build", "transaction_hash": "0x2", "data": ["0x11", "0x5", "0x65", "0x3", "0x9", "0x4d", "0x2", "0x3"]}, {"name": "Build", "transaction_hash": "0x3", "data": ["0x11", "0x5", "0x65", "0x3", "0x9", "0x4d", "0x2", "0x3"]}]}"#,
        "",
        r#"{"number": 12, "hash": "0xc", "timestamp": 1020, "events": [{"name": "FuelProduction", "transaction_hash": "0x4", "data": ["0x11", "0x5", "0x6e", "0x3", "0x9", "0x2", "0x3", "0xa"]}, {"name": "Transfer", "transaction_hash": "0x5", "data": ["0x0", "0x11", "0x5", "0x0"]}]}"#,
    ];

    fn log() -> Vec<RawBlock> {
        blocklog::read_blocks(LOG.join("\n").as_bytes())
            .collect::<anyhow::Result<_>>()
            .expect("log parses")
    }

    fn run(store: MemoryStore) -> (String, MemoryStore) {
        let mut out = Vec::new();
        let store = project(store, ProjectionConfig::default(), &log(), &mut out)
            .expect("projection succeeds");
        (String::from_utf8(out).expect("utf8"), store)
    }

    #[test]
    fn requires_events_and_out() {
        let err = Args::try_parse_from(["frensstep", "--out", "out.ndjson"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        let err = Args::try_parse_from(["frensstep", "--events", "log.ndjson"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn optional_paths_parse() {
        let args = Args::try_parse_from([
            "frensstep",
            "--events",
            "log.ndjson",
            "--out",
            "out.ndjson",
            "--snapshot-out",
            "snap.json",
            "--resume",
            "old.json",
        ])
        .unwrap();
        assert!(args.config.is_none());
        assert_eq!(args.snapshot_out.unwrap().to_str(), Some("snap.json"));
        assert_eq!(args.resume.unwrap().to_str(), Some("old.json"));
    }

    #[test]
    fn reports_one_line_per_block() {
        let (out, _) = run(MemoryStore::default());
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).expect("report is json"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["number"], 11);
        assert_eq!(lines[1]["applied"].as_array().unwrap().len(), 2);
        assert_eq!(lines[1]["rejected"].as_array().unwrap().len(), 1);
        assert!(lines[0].get("rejected").is_none());
    }

    #[test]
    fn paired_runs_are_deterministic() {
        let (first_out, first_store) = run(MemoryStore::default());
        let (second_out, second_store) = run(MemoryStore::default());
        assert_eq!(first_out, second_out);
        assert_eq!(first_store, second_store);
    }

    #[test]
    fn resume_skips_blocks_already_in_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let (_, full) = run(MemoryStore::default());
        full.save_to_path(&path).unwrap();

        let restored = MemoryStore::load_from_path(&path).unwrap();
        let (out, resumed) = run(restored);
        assert!(out.is_empty());
        assert_eq!(resumed, full);
    }
}
