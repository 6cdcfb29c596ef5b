use serde::{Deserialize, Serialize};

use crate::cycles::Cycles;
use crate::felt::Felt;
use crate::grid::Grid;

/// Building uid reserved for the cabin seeded on every land.
pub const CABIN_UID: u64 = 1;

pub fn cabin_uid() -> Felt {
    Felt::from_u64(CABIN_UID)
}

/// A player's land and its occupancy grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Land {
    pub land_id: Felt,
    pub owner: Felt,
    pub grid: Grid,
    pub created_at_time: u64,
    pub updated_at: u64,
    /// Bumped on every committed write; used for compare-and-swap.
    #[serde(default)]
    pub version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingStatus {
    Built,
    Destroyed,
}

/// Lifecycle and production record for one building on one land.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub land_id: Felt,
    pub building_uid: Felt,
    pub owner: Felt,
    pub building_type_id: u64,
    pub pos_x: u32,
    pub pos_y: u32,
    pub status: BuildingStatus,
    pub decay: u64,
    pub block_comp: u64,
    #[serde(flatten)]
    pub cycles: Cycles,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Building {
    pub fn is_cabin(&self) -> bool {
        self.building_uid == cabin_uid()
    }

    pub fn is_built(&self) -> bool {
        self.status == BuildingStatus::Built
    }
}

/// Current owner of a land token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token_id: Felt,
    pub owner: Felt,
    pub updated_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: Felt,
    pub timestamp: u64,
}
