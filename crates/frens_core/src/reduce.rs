//! Event reducer.
//!
//! Each handler validates first, so a rejected event leaves no partial
//! mutation, then writes the grid before the ledger and finally appends the
//! history record. A land or building that does not exist skips that
//! aggregate's mutation; the skip is logged and returned in [`Outcome`].
//! A create step that hits a live key is aborted on its own and the event
//! is still recorded.

use serde::Serialize;
use tracing::{debug, warn};

use crate::cycles::Cycles;
use crate::error::ProjectionError;
use crate::event::{Build, Claim, Destroy, Event, Fuel, Harvest, Init, Move, Repair, Reset, Transfer};
use crate::felt::Felt;
use crate::grid::{Grid, GridStore};
use crate::history::HistoryRecord;
use crate::io::config::{ClaimClock, ProjectionConfig};
use crate::ledger::{BuildingLedger, StatusFilter};
use crate::store::Store;
use crate::world::{cabin_uid, Building, BuildingStatus, Land, Token};

/// Block a batch of events was emitted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
}

/// An aggregate mutation that was skipped because its target is missing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "missing", rename_all = "snake_case")]
pub enum Skip {
    Land { land_id: Felt },
    Building { land_id: Felt, building_uid: Felt },
}

impl Skip {
    fn from_error(err: &ProjectionError) -> Option<Self> {
        match err {
            ProjectionError::LandNotFound(land_id) => Some(Skip::Land { land_id: *land_id }),
            ProjectionError::BuildingNotFound {
                land_id,
                building_uid,
            } => Some(Skip::Building {
                land_id: *land_id,
                building_uid: *building_uid,
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub record: HistoryRecord,
    pub skipped: Vec<Skip>,
    /// Why a create step was refused, if one was.
    pub aborted: Option<String>,
}

pub struct Reducer<'a, S: Store + ?Sized> {
    store: &'a mut S,
    config: &'a ProjectionConfig,
    skipped: Vec<Skip>,
}

impl<'a, S: Store + ?Sized> Reducer<'a, S> {
    pub fn new(store: &'a mut S, config: &'a ProjectionConfig) -> Self {
        Self {
            store,
            config,
            skipped: Vec::new(),
        }
    }

    /// Apply one event and append its history record.
    pub fn apply(
        mut self,
        block: BlockContext,
        transaction_hash: Felt,
        event: &Event,
    ) -> Result<Outcome, ProjectionError> {
        let at = block.timestamp;
        let applied = match event {
            Event::Init(e) => self.init(e, at),
            Event::Reset(e) => self.reset(e, at),
            Event::Harvest(e) => self.harvest(e, at),
            Event::Build(e) => self.build(e, at),
            Event::Destroy(e) => self.destroy(e, at),
            Event::Repair(e) => self.repair(e, at),
            Event::Move(e) => self.relocate(e, at),
            Event::Fuel(e) => self.fuel(e, at),
            Event::Claim(e) => self.claim(e, at),
            Event::Transfer(e) => self.transfer(e, at),
        };
        let aborted = match applied {
            Ok(()) => None,
            Err(err) if err.is_duplicate() => Some(err.to_string()),
            Err(err) => return Err(err),
        };

        let record = HistoryRecord::new(event, transaction_hash, block.number, block.timestamp);
        self.store.append_history(record.clone())?;
        Ok(Outcome {
            record,
            skipped: self.skipped,
            aborted,
        })
    }

    fn grids(&mut self) -> GridStore<'_, S> {
        GridStore::new(&mut *self.store, self.config.max_conflict_retries)
    }

    fn ledger(&mut self) -> BuildingLedger<'_, S> {
        BuildingLedger::new(&mut *self.store)
    }

    /// Turn a not-found error into a recorded skip.
    fn skip_missing<T>(
        &mut self,
        result: Result<T, ProjectionError>,
    ) -> Result<Option<T>, ProjectionError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => match Skip::from_error(&err) {
                Some(skip) => {
                    warn!(%err, "skipping mutation of missing aggregate");
                    self.skipped.push(skip);
                    Ok(None)
                }
                None => Err(err),
            },
        }
    }

    /// Bounds-check `(x, y)` against the land's grid, if the land exists.
    fn check_cell(&self, land_id: &Felt, x: i64, y: i64) -> Result<(), ProjectionError> {
        let Some(land) = self.store.land(land_id)? else {
            return Ok(());
        };
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(cx), Ok(cy)) => land.grid.cell(cx, cy).map(|_| ()),
            _ => Err(land.grid.out_of_bounds(x, y)),
        }
    }

    fn init(&mut self, e: &Init, at: u64) -> Result<(), ProjectionError> {
        if self.store.land(&e.land_id)?.is_some() {
            return Err(ProjectionError::LandAlreadyExists(e.land_id));
        }
        let cabin = self.config.cabin;
        self.store.insert_land(Land {
            land_id: e.land_id,
            owner: e.owner,
            grid: Grid::new(self.config.grid),
            created_at_time: e.time,
            updated_at: at,
            version: 0,
        })?;
        self.ledger().create(Building {
            land_id: e.land_id,
            building_uid: cabin_uid(),
            owner: e.owner,
            building_type_id: cabin.building_type_id,
            pos_x: cabin.pos_x,
            pos_y: cabin.pos_y,
            status: BuildingStatus::Built,
            decay: cabin.decay,
            block_comp: cabin.block_comp,
            cycles: Cycles {
                last_fuel: e.time,
                ..Cycles::default()
            },
            created_at: at,
            updated_at: at,
        })?;
        debug!(land_id = %e.land_id, "land initialized");
        Ok(())
    }

    fn reset(&mut self, e: &Reset, at: u64) -> Result<(), ProjectionError> {
        let cleared = self.grids().reset_all(&e.land_id, at);
        self.skip_missing(cleared)?;
        let decay = self.config.cabin.decay;
        let summary = self.ledger().reset(&e.land_id, decay, at)?;
        debug!(
            land_id = %e.land_id,
            removed = summary.removed.len(),
            cabin_restored = summary.cabin_restored,
            "land reset"
        );
        Ok(())
    }

    fn harvest(&mut self, e: &Harvest, at: u64) -> Result<(), ProjectionError> {
        let written = self
            .grids()
            .set_cell(&e.land_id, e.pos_x, e.pos_y, e.block_comp, at);
        self.skip_missing(written)?;
        Ok(())
    }

    fn build(&mut self, e: &Build, at: u64) -> Result<(), ProjectionError> {
        self.ledger().ensure_vacant(&e.land_id, &e.building_uid)?;
        self.check_cell(&e.land_id, i64::from(e.pos_x), i64::from(e.pos_y))?;

        let written = self
            .grids()
            .set_cell(&e.land_id, e.pos_x, e.pos_y, e.block_comp, at);
        self.skip_missing(written)?;
        self.ledger().create(Building {
            land_id: e.land_id,
            building_uid: e.building_uid,
            owner: e.owner,
            building_type_id: e.building_type_id,
            pos_x: e.pos_x,
            pos_y: e.pos_y,
            status: BuildingStatus::Built,
            decay: 0,
            block_comp: e.block_comp,
            cycles: Cycles::for_new_building(e.building_type_id, e.time),
            created_at: at,
            updated_at: at,
        })?;
        Ok(())
    }

    fn destroy(&mut self, e: &Destroy, at: u64) -> Result<(), ProjectionError> {
        // Destroy coordinates are one-based on the wire.
        let x = i64::from(e.pos_x) - 1;
        let y = i64::from(e.pos_y) - 1;
        self.check_cell(&e.land_id, x, y)?;

        if let (Ok(cx), Ok(cy)) = (u32::try_from(x), u32::try_from(y)) {
            let cleared = self.grids().set_cell(&e.land_id, cx, cy, 0, at);
            self.skip_missing(cleared)?;
        } else {
            // Only reachable when the land is missing; nothing to clear.
            self.skipped.push(Skip::Land { land_id: e.land_id });
        }
        let removed = self.ledger().remove(&e.land_id, &e.building_uid, at);
        self.skip_missing(removed)?;
        Ok(())
    }

    fn repair(&mut self, e: &Repair, at: u64) -> Result<(), ProjectionError> {
        let repaired = self
            .ledger()
            .update(&e.land_id, &e.building_uid, at, |building| building.decay = 0);
        self.skip_missing(repaired)?;
        Ok(())
    }

    fn relocate(&mut self, e: &Move, at: u64) -> Result<(), ProjectionError> {
        let from = (e.pos_x, e.pos_y);
        let to = (e.new_pos_x, e.new_pos_y);
        let moved = self
            .grids()
            .mutate(&e.land_id, at, |grid| grid.relocate(from, to));
        self.skip_missing(moved)?;

        let updated = self.ledger().update(&e.land_id, &e.infra_uid, at, |building| {
            building.pos_x = e.new_pos_x;
            building.pos_y = e.new_pos_y;
        });
        self.skip_missing(updated)?;
        Ok(())
    }

    fn fuel(&mut self, e: &Fuel, at: u64) -> Result<(), ProjectionError> {
        let fueled = self.ledger().update(&e.land_id, &e.building_uid, at, |building| {
            building.cycles = building.cycles.fuel(e.nb_blocks, e.time);
        });
        if let Some(building) = self.skip_missing(fueled)? {
            debug!(
                land_id = %e.land_id,
                building_uid = %e.building_uid,
                active = building.cycles.active_cycles,
                incoming = building.cycles.incoming_cycles,
                "fuel accounted"
            );
        }
        Ok(())
    }

    fn claim(&mut self, e: &Claim, at: u64) -> Result<(), ProjectionError> {
        let reference_time = match self.config.claim_clock {
            ClaimClock::Time => e.time,
            ClaimClock::BlockNumber => e.block_number,
        };
        let land = self.grids().get(&e.land_id);
        if self.skip_missing(land)?.is_none() {
            return Ok(());
        }
        let live = self.ledger().list_by_land(&e.land_id, StatusFilter::Built)?;
        for building in live {
            self.ledger()
                .update(&e.land_id, &building.building_uid, at, |building| {
                    building.cycles = building.cycles.claim(reference_time);
                })?;
        }
        Ok(())
    }

    fn transfer(&mut self, e: &Transfer, at: u64) -> Result<(), ProjectionError> {
        if e.from_address.is_zero() {
            debug!(token_id = %e.token_id, owner = %e.to_address, "token minted");
        }
        self.store.upsert_token(Token {
            token_id: e.token_id,
            owner: e.to_address,
            updated_at: at,
        })?;
        Ok(())
    }
}
