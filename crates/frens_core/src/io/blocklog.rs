//! NDJSON block logs: one [`RawBlock`] per line, in chain order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};

use crate::event::RawBlock;

/// Read every block of a log file.
pub fn load_from_path(path: &Path) -> Result<Vec<RawBlock>> {
    let file =
        File::open(path).with_context(|| format!("failed to open block log {:?}", path))?;
    read_blocks(BufReader::new(file)).collect()
}

/// Lazily parse blocks from an NDJSON reader. Blank lines are ignored.
pub fn read_blocks<R: BufRead>(reader: R) -> impl Iterator<Item = Result<RawBlock>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(index, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<RawBlock>(&line)
                    .with_context(|| format!("invalid block on line {}", index + 1)),
            ),
            Err(err) => Some(Err(anyhow::Error::new(err).context("failed to read block log"))),
        })
}
