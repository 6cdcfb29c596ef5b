use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Projection settings. Every field has a default so a partial document, or
/// none at all, is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub grid: GridDims,
    pub cabin: CabinSpec,
    pub claim_clock: ClaimClock,
    /// How many times a grid write is re-applied after a version conflict.
    pub max_conflict_retries: u32,
}

/// Dimensions assigned to every land grid at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    pub rows: u32,
    pub cols: u32,
}

/// The permanent building seeded on every land at initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CabinSpec {
    pub building_type_id: u64,
    pub pos_x: u32,
    pub pos_y: u32,
    pub block_comp: u64,
    pub decay: u64,
}

/// Which claim field is compared against `last_fuel`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimClock {
    #[default]
    Time,
    BlockNumber,
}

impl Default for GridDims {
    fn default() -> Self {
        Self { rows: 16, cols: 40 }
    }
}

impl Default for CabinSpec {
    fn default() -> Self {
        Self {
            building_type_id: 1,
            pos_x: 20,
            pos_y: 8,
            block_comp: 1,
            decay: 100,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            grid: GridDims::default(),
            cabin: CabinSpec::default(),
            claim_clock: ClaimClock::default(),
            max_conflict_retries: 3,
        }
    }
}

impl ProjectionConfig {
    /// Load a configuration JSON document from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open config file {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Deserialize and validate a configuration document from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader).context("invalid config json")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.grid.rows > 0 && self.grid.cols > 0,
            "grid must have at least one cell, got {}x{}",
            self.grid.rows,
            self.grid.cols
        );
        ensure!(
            self.cabin.pos_x < self.grid.cols && self.cabin.pos_y < self.grid.rows,
            "cabin position ({}, {}) lies outside the {}x{} grid",
            self.cabin.pos_x,
            self.cabin.pos_y,
            self.grid.rows,
            self.grid.cols
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ProjectionConfig::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, ProjectionConfig::default());
        assert_eq!(config.claim_clock, ClaimClock::Time);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let json = r#"{
            "grid": {"rows": 4, "cols": 6},
            "cabin": {"pos_x": 1, "pos_y": 1},
            "claim_clock": "block_number"
        }"#;
        let config = ProjectionConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.grid, GridDims { rows: 4, cols: 6 });
        assert_eq!(config.cabin.decay, 100);
        assert_eq!(config.claim_clock, ClaimClock::BlockNumber);
        assert_eq!(config.max_conflict_retries, 3);
    }

    #[test]
    fn cabin_outside_grid_is_rejected() {
        let json = r#"{"grid": {"rows": 2, "cols": 2}}"#;
        let err = ProjectionConfig::from_reader(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("cabin position"));
    }
}
