//! Read-side accessors over a [`Store`]. Nothing here mutates.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::felt::Felt;
use crate::grid::Grid;
use crate::history::HistoryRecord;
use crate::ledger::StatusFilter;
use crate::store::{Store, StoreError};
use crate::world::{BlockRecord, Building, Land, Token};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        items.skip(self.skip).take(self.limit.min(MAX_LIMIT)).collect()
    }
}

/// History filter. Time and block bounds are inclusive.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub land_id: Option<Felt>,
    pub owner: Option<Felt>,
    pub from_time: Option<u64>,
    pub to_time: Option<u64>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        let field_matches = |name: &str, wanted: &Option<Felt>| match wanted {
            Some(value) => record.field(name) == Some(value),
            None => true,
        };
        field_matches("land_id", &self.land_id)
            && field_matches("owner", &self.owner)
            && self.from_time.map_or(true, |t| record.block_time >= t)
            && self.to_time.map_or(true, |t| record.block_time <= t)
            && self.from_block.map_or(true, |b| record.block_number >= b)
            && self.to_block.map_or(true, |b| record.block_number <= b)
    }

    pub fn page(&self) -> Page {
        Page {
            skip: self.skip.unwrap_or(0),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
        }
    }
}

/// A built building whose grid cell disagrees with its `block_comp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GridMismatch {
    pub building_uid: Felt,
    pub pos_x: u32,
    pub pos_y: u32,
    pub expected: u64,
    pub found: Option<u64>,
}

pub fn land<S: Store + ?Sized>(store: &S, land_id: &Felt) -> Result<Option<Land>, StoreError> {
    store.land(land_id)
}

/// Lands, optionally restricted to one owner, in land id order.
pub fn lands<S: Store + ?Sized>(
    store: &S,
    owner: Option<&Felt>,
    page: Page,
) -> Result<Vec<Land>, StoreError> {
    Ok(page.apply(
        store
            .lands()?
            .into_iter()
            .filter(|land| owner.map_or(true, |owner| &land.owner == owner)),
    ))
}

pub fn grid<S: Store + ?Sized>(store: &S, land_id: &Felt) -> Result<Option<Grid>, StoreError> {
    Ok(store.land(land_id)?.map(|land| land.grid))
}

pub fn buildings<S: Store + ?Sized>(
    store: &S,
    land_id: &Felt,
    filter: StatusFilter,
) -> Result<Vec<Building>, StoreError> {
    Ok(store
        .buildings(land_id)?
        .into_iter()
        .filter(|building| filter.matches(building.status))
        .collect())
}

pub fn building<S: Store + ?Sized>(
    store: &S,
    land_id: &Felt,
    building_uid: &Felt,
) -> Result<Option<Building>, StoreError> {
    store.building(land_id, building_uid)
}

/// Matching records of `collection`, newest first.
pub fn history<S: Store + ?Sized>(
    store: &S,
    collection: &str,
    filter: &HistoryFilter,
) -> Result<Vec<HistoryRecord>, StoreError> {
    let records = store.history(collection)?;
    Ok(filter
        .page()
        .apply(records.into_iter().rev().filter(|record| filter.matches(record))))
}

/// The initialization record of a land, if it was ever initialized.
pub fn init_record<S: Store + ?Sized>(
    store: &S,
    land_id: &Felt,
) -> Result<Option<HistoryRecord>, StoreError> {
    Ok(store
        .history("inits")?
        .into_iter()
        .find(|record| record.field("land_id") == Some(land_id)))
}

/// Tokens, optionally restricted to one owner, most recently updated first.
pub fn tokens<S: Store + ?Sized>(
    store: &S,
    owner: Option<&Felt>,
    page: Page,
) -> Result<Vec<Token>, StoreError> {
    let mut tokens: Vec<Token> = store
        .tokens()?
        .into_iter()
        .filter(|token| owner.map_or(true, |owner| &token.owner == owner))
        .collect();
    tokens.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.token_id.cmp(&b.token_id))
    });
    Ok(page.apply(tokens.into_iter()))
}

pub fn token<S: Store + ?Sized>(store: &S, token_id: &Felt) -> Result<Option<Token>, StoreError> {
    store.token(token_id)
}

/// Transfers of one token, newest first.
pub fn transfers<S: Store + ?Sized>(
    store: &S,
    token_id: &Felt,
    page: Page,
) -> Result<Vec<HistoryRecord>, StoreError> {
    let records = store.history("transfers")?;
    Ok(page.apply(
        records
            .into_iter()
            .rev()
            .filter(|record| record.field("token_id") == Some(token_id)),
    ))
}

pub fn blocks<S: Store + ?Sized>(store: &S, page: Page) -> Result<Vec<BlockRecord>, StoreError> {
    Ok(page.apply(store.blocks()?.into_iter().rev()))
}

/// Built buildings whose cell does not hold their `block_comp`.
///
/// The cabin is exempt: its cell belongs to the starting map, which is not
/// projected.
pub fn grid_mismatches<S: Store + ?Sized>(
    store: &S,
    land_id: &Felt,
) -> Result<Vec<GridMismatch>, StoreError> {
    let Some(land) = store.land(land_id)? else {
        return Ok(Vec::new());
    };
    Ok(buildings(store, land_id, StatusFilter::Built)?
        .into_iter()
        .filter(|building| !building.is_cabin())
        .filter_map(|building| {
            let found = land.grid.cell(building.pos_x, building.pos_y).ok();
            (found != Some(building.block_comp)).then_some(GridMismatch {
                building_uid: building.building_uid,
                pos_x: building.pos_x,
                pos_y: building.pos_y,
                expected: building.block_comp,
                found,
            })
        })
        .collect())
}
