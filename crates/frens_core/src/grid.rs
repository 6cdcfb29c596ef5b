//! Per-land occupancy grids.
//!
//! Writes follow read → mutate a local copy → compare-and-swap on the land
//! version. A conflicting writer makes the mutation re-run against the fresh
//! document, up to the configured retry budget.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProjectionError;
use crate::felt::Felt;
use crate::io::config::GridDims;
use crate::store::{Store, StoreError};

/// Row-major matrix of cell codes, indexed `cells[y][x]`. Zero is empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid(Vec<Vec<u64>>);

impl Grid {
    pub fn new(dims: GridDims) -> Self {
        Self(vec![vec![0; dims.cols as usize]; dims.rows as usize])
    }

    pub fn rows(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn cols(&self) -> u32 {
        self.0.first().map_or(0, |row| row.len() as u32)
    }

    pub fn as_rows(&self) -> &[Vec<u64>] {
        &self.0
    }

    pub fn out_of_bounds(&self, x: i64, y: i64) -> ProjectionError {
        ProjectionError::OutOfBounds {
            x,
            y,
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    fn slot(&mut self, x: u32, y: u32) -> Result<&mut u64, ProjectionError> {
        let err = self.out_of_bounds(i64::from(x), i64::from(y));
        self.0
            .get_mut(y as usize)
            .and_then(|row| row.get_mut(x as usize))
            .ok_or(err)
    }

    pub fn cell(&self, x: u32, y: u32) -> Result<u64, ProjectionError> {
        self.0
            .get(y as usize)
            .and_then(|row| row.get(x as usize))
            .copied()
            .ok_or_else(|| self.out_of_bounds(i64::from(x), i64::from(y)))
    }

    pub fn set(&mut self, x: u32, y: u32, value: u64) -> Result<(), ProjectionError> {
        *self.slot(x, y)? = value;
        Ok(())
    }

    /// Copy the code at `from` onto `to`, then empty `from`.
    ///
    /// Both coordinates are checked before either cell changes.
    pub fn relocate(&mut self, from: (u32, u32), to: (u32, u32)) -> Result<u64, ProjectionError> {
        let value = self.cell(from.0, from.1)?;
        self.cell(to.0, to.1)?;
        self.set(to.0, to.1, value)?;
        self.set(from.0, from.1, 0)?;
        Ok(value)
    }

    pub fn clear(&mut self) {
        for row in &mut self.0 {
            row.iter_mut().for_each(|cell| *cell = 0);
        }
    }

    pub fn occupied(&self) -> usize {
        self.0.iter().flatten().filter(|cell| **cell != 0).count()
    }
}

/// Grid operations over any [`Store`].
pub struct GridStore<'a, S: Store + ?Sized> {
    store: &'a mut S,
    max_retries: u32,
}

impl<'a, S: Store + ?Sized> GridStore<'a, S> {
    pub fn new(store: &'a mut S, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub fn get(&self, land_id: &Felt) -> Result<Grid, ProjectionError> {
        self.store
            .land(land_id)?
            .map(|land| land.grid)
            .ok_or(ProjectionError::LandNotFound(*land_id))
    }

    pub fn set_cell(
        &mut self,
        land_id: &Felt,
        x: u32,
        y: u32,
        value: u64,
        at: u64,
    ) -> Result<(), ProjectionError> {
        self.mutate(land_id, at, |grid| grid.set(x, y, value))
    }

    pub fn reset_all(&mut self, land_id: &Felt, at: u64) -> Result<(), ProjectionError> {
        self.mutate(land_id, at, |grid| {
            grid.clear();
            Ok(())
        })
    }

    /// Apply `change` to a copy of the land's grid and write it back.
    ///
    /// Nothing is written when `change` fails.
    pub fn mutate<T, F>(&mut self, land_id: &Felt, at: u64, mut change: F) -> Result<T, ProjectionError>
    where
        F: FnMut(&mut Grid) -> Result<T, ProjectionError>,
    {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            let mut land = self
                .store
                .land(land_id)?
                .ok_or(ProjectionError::LandNotFound(*land_id))?;
            let expected = land.version;
            let mut grid = land.grid.clone();
            let output = change(&mut grid)?;
            land.grid = grid;
            land.updated_at = at;
            match self.store.replace_land(land, expected) {
                Ok(_) => return Ok(output),
                Err(StoreError::VersionConflict { found, .. }) => {
                    debug!(%land_id, attempt, expected, found, "grid write lost a version race");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ProjectionError::Conflict {
            land_id: *land_id,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::world::Land;
    use proptest::prelude::*;

    fn land(dims: GridDims) -> Land {
        Land {
            land_id: Felt::from_u64(5),
            owner: Felt::from_u64(1),
            grid: Grid::new(dims),
            created_at_time: 0,
            updated_at: 0,
            version: 0,
        }
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::default();
        store.insert_land(land(GridDims { rows: 3, cols: 4 })).unwrap();
        store
    }

    #[test]
    fn set_cell_writes_row_major() {
        let mut store = store();
        let id = Felt::from_u64(5);
        let mut grids = GridStore::new(&mut store, 0);
        grids.set_cell(&id, 3, 2, 77, 10).unwrap();
        let grid = grids.get(&id).unwrap();
        assert_eq!(grid.as_rows()[2][3], 77);
        assert_eq!(grid.occupied(), 1);
        assert_eq!(store.land(&id).unwrap().unwrap().updated_at, 10);
    }

    #[test]
    fn out_of_bounds_never_writes() {
        let mut store = store();
        let id = Felt::from_u64(5);
        let before = store.land(&id).unwrap().unwrap();
        let err = GridStore::new(&mut store, 0)
            .set_cell(&id, 4, 0, 9, 10)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::OutOfBounds { x: 4, y: 0, rows: 3, cols: 4 }));
        assert_eq!(store.land(&id).unwrap().unwrap(), before);
    }

    #[test]
    fn missing_land_is_not_found() {
        let mut store = MemoryStore::default();
        let err = GridStore::new(&mut store, 0)
            .reset_all(&Felt::from_u64(8), 0)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn relocate_checks_destination_first() {
        let mut grid = Grid::new(GridDims { rows: 2, cols: 2 });
        grid.set(0, 0, 5).unwrap();
        assert!(grid.relocate((0, 0), (2, 0)).is_err());
        assert_eq!(grid.cell(0, 0).unwrap(), 5);
        assert_eq!(grid.relocate((0, 0), (1, 1)).unwrap(), 5);
        assert_eq!(grid.cell(0, 0).unwrap(), 0);
        assert_eq!(grid.cell(1, 1).unwrap(), 5);
    }

    /// Store whose land version moves under the writer a fixed number of times.
    struct Contended {
        inner: MemoryStore,
        races: u32,
    }

    impl Store for Contended {
        fn land(&self, land_id: &Felt) -> Result<Option<Land>, StoreError> {
            self.inner.land(land_id)
        }
        fn lands(&self) -> Result<Vec<Land>, StoreError> {
            self.inner.lands()
        }
        fn insert_land(&mut self, land: Land) -> Result<(), StoreError> {
            self.inner.insert_land(land)
        }
        fn replace_land(&mut self, land: Land, expected_version: u64) -> Result<u64, StoreError> {
            if self.races > 0 {
                self.races -= 1;
                let mut current = self.inner.land(&land.land_id)?.expect("land present");
                let version = current.version;
                current.grid.set(0, 0, 1).expect("in bounds");
                self.inner.replace_land(current, version)?;
            }
            self.inner.replace_land(land, expected_version)
        }
        fn building(
            &self,
            land_id: &Felt,
            building_uid: &Felt,
        ) -> Result<Option<crate::world::Building>, StoreError> {
            self.inner.building(land_id, building_uid)
        }
        fn buildings(&self, land_id: &Felt) -> Result<Vec<crate::world::Building>, StoreError> {
            self.inner.buildings(land_id)
        }
        fn put_building(&mut self, building: crate::world::Building) -> Result<(), StoreError> {
            self.inner.put_building(building)
        }
        fn append_history(
            &mut self,
            record: crate::history::HistoryRecord,
        ) -> Result<(), StoreError> {
            self.inner.append_history(record)
        }
        fn history(&self, collection: &str) -> Result<Vec<crate::history::HistoryRecord>, StoreError> {
            self.inner.history(collection)
        }
        fn insert_block(&mut self, block: crate::world::BlockRecord) -> Result<(), StoreError> {
            self.inner.insert_block(block)
        }
        fn blocks(&self) -> Result<Vec<crate::world::BlockRecord>, StoreError> {
            self.inner.blocks()
        }
        fn upsert_token(&mut self, token: crate::world::Token) -> Result<(), StoreError> {
            self.inner.upsert_token(token)
        }
        fn token(&self, token_id: &Felt) -> Result<Option<crate::world::Token>, StoreError> {
            self.inner.token(token_id)
        }
        fn tokens(&self) -> Result<Vec<crate::world::Token>, StoreError> {
            self.inner.tokens()
        }
    }

    #[test]
    fn lost_race_reapplies_on_fresh_grid() {
        let mut store = Contended {
            inner: store(),
            races: 1,
        };
        let id = Felt::from_u64(5);
        GridStore::new(&mut store, 1).set_cell(&id, 2, 2, 9, 3).unwrap();
        let grid = store.inner.land(&id).unwrap().unwrap().grid;
        assert_eq!(grid.cell(0, 0).unwrap(), 1);
        assert_eq!(grid.cell(2, 2).unwrap(), 9);
    }

    #[test]
    fn exhausted_retries_report_conflict() {
        let mut store = Contended {
            inner: store(),
            races: 5,
        };
        let id = Felt::from_u64(5);
        let err = GridStore::new(&mut store, 2)
            .set_cell(&id, 2, 2, 9, 3)
            .unwrap_err();
        assert!(matches!(err, ProjectionError::Conflict { attempts: 3, .. }));
        assert_eq!(store.inner.land(&id).unwrap().unwrap().grid.cell(2, 2).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn move_there_and_back_restores_the_grid(
            code in 1u64..u64::MAX,
            a in (0u32..6, 0u32..4),
            b in (0u32..6, 0u32..4),
        ) {
            prop_assume!(a != b);
            let mut grid = Grid::new(GridDims { rows: 4, cols: 6 });
            grid.set(a.0, a.1, code).unwrap();
            let start = grid.clone();

            prop_assert_eq!(grid.relocate(a, b).unwrap(), code);
            prop_assert_eq!(grid.cell(a.0, a.1).unwrap(), 0);
            grid.relocate(b, a).unwrap();
            prop_assert_eq!(grid.cell(b.0, b.1).unwrap(), 0);
            prop_assert_eq!(grid, start);
        }
    }
}
