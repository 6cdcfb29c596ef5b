//! Document store boundary.
//!
//! [`Store`] is the repository interface the reducer is written against. The
//! store serializes writes per document but offers no multi-document
//! transactions; the only conditional write is the versioned land replace.
//! [`MemoryStore`] is the reference implementation and persists as a JSON
//! snapshot.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::COLLECTIONS;
use crate::felt::Felt;
use crate::history::HistoryRecord;
use crate::world::{BlockRecord, Building, Land, Token};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown history collection {0:?}")]
    UnknownCollection(String),
    #[error("land {0} is already stored")]
    DuplicateLand(Felt),
    #[error("land {0} is not stored")]
    MissingLand(Felt),
    #[error("land {land_id} is at version {found}, expected {expected}")]
    VersionConflict {
        land_id: Felt,
        expected: u64,
        found: u64,
    },
}

pub trait Store {
    fn land(&self, land_id: &Felt) -> Result<Option<Land>, StoreError>;
    fn lands(&self) -> Result<Vec<Land>, StoreError>;
    fn insert_land(&mut self, land: Land) -> Result<(), StoreError>;
    /// Replace the land if its stored version equals `expected_version`.
    /// Returns the new version.
    fn replace_land(&mut self, land: Land, expected_version: u64) -> Result<u64, StoreError>;

    /// Raw lookup; destroyed records are returned as well.
    fn building(&self, land_id: &Felt, building_uid: &Felt)
        -> Result<Option<Building>, StoreError>;
    /// Every record for the land, ordered by uid.
    fn buildings(&self, land_id: &Felt) -> Result<Vec<Building>, StoreError>;
    fn put_building(&mut self, building: Building) -> Result<(), StoreError>;

    fn append_history(&mut self, record: HistoryRecord) -> Result<(), StoreError>;
    /// Records of one collection in insertion order.
    fn history(&self, collection: &str) -> Result<Vec<HistoryRecord>, StoreError>;

    fn insert_block(&mut self, block: BlockRecord) -> Result<(), StoreError>;
    fn blocks(&self) -> Result<Vec<BlockRecord>, StoreError>;

    fn upsert_token(&mut self, token: Token) -> Result<(), StoreError>;
    fn token(&self, token_id: &Felt) -> Result<Option<Token>, StoreError>;
    fn tokens(&self) -> Result<Vec<Token>, StoreError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    lands: BTreeMap<Felt, Land>,
    buildings: BTreeMap<Felt, BTreeMap<Felt, Building>>,
    history: BTreeMap<String, Vec<HistoryRecord>>,
    blocks: Vec<BlockRecord>,
    tokens: BTreeMap<Felt, Token>,
}

impl MemoryStore {
    /// Load a snapshot previously written by [`MemoryStore::save_to_path`].
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open snapshot {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        serde_json::from_reader(reader).context("invalid snapshot json")
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create snapshot {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).context("failed to serialize snapshot")?;
        writer.flush()?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn land(&self, land_id: &Felt) -> Result<Option<Land>, StoreError> {
        Ok(self.lands.get(land_id).cloned())
    }

    fn lands(&self) -> Result<Vec<Land>, StoreError> {
        Ok(self.lands.values().cloned().collect())
    }

    fn insert_land(&mut self, land: Land) -> Result<(), StoreError> {
        if self.lands.contains_key(&land.land_id) {
            return Err(StoreError::DuplicateLand(land.land_id));
        }
        self.lands.insert(land.land_id, land);
        Ok(())
    }

    fn replace_land(&mut self, mut land: Land, expected_version: u64) -> Result<u64, StoreError> {
        let stored = self
            .lands
            .get_mut(&land.land_id)
            .ok_or(StoreError::MissingLand(land.land_id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                land_id: land.land_id,
                expected: expected_version,
                found: stored.version,
            });
        }
        land.version = expected_version + 1;
        *stored = land;
        Ok(expected_version + 1)
    }

    fn building(
        &self,
        land_id: &Felt,
        building_uid: &Felt,
    ) -> Result<Option<Building>, StoreError> {
        Ok(self
            .buildings
            .get(land_id)
            .and_then(|by_uid| by_uid.get(building_uid))
            .cloned())
    }

    fn buildings(&self, land_id: &Felt) -> Result<Vec<Building>, StoreError> {
        Ok(self
            .buildings
            .get(land_id)
            .map(|by_uid| by_uid.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put_building(&mut self, building: Building) -> Result<(), StoreError> {
        self.buildings
            .entry(building.land_id)
            .or_default()
            .insert(building.building_uid, building);
        Ok(())
    }

    fn append_history(&mut self, record: HistoryRecord) -> Result<(), StoreError> {
        if !COLLECTIONS.contains(&record.collection.as_str()) {
            return Err(StoreError::UnknownCollection(record.collection));
        }
        self.history
            .entry(record.collection.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn history(&self, collection: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        if !COLLECTIONS.contains(&collection) {
            return Err(StoreError::UnknownCollection(collection.to_string()));
        }
        Ok(self.history.get(collection).cloned().unwrap_or_default())
    }

    fn insert_block(&mut self, block: BlockRecord) -> Result<(), StoreError> {
        self.blocks.push(block);
        Ok(())
    }

    fn blocks(&self) -> Result<Vec<BlockRecord>, StoreError> {
        Ok(self.blocks.clone())
    }

    fn upsert_token(&mut self, token: Token) -> Result<(), StoreError> {
        self.tokens.insert(token.token_id, token);
        Ok(())
    }

    fn token(&self, token_id: &Felt) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens.get(token_id).cloned())
    }

    fn tokens(&self) -> Result<Vec<Token>, StoreError> {
        Ok(self.tokens.values().cloned().collect())
    }
}
