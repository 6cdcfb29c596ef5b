//! Building lifecycle records keyed by `(land_id, building_uid)`.
//!
//! Removal marks a record destroyed rather than deleting it. Destroyed
//! records are invisible to [`BuildingLedger::get`] and free their key for a
//! later [`BuildingLedger::create`].

use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;
use crate::felt::Felt;
use crate::store::Store;
use crate::world::{Building, BuildingStatus};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    Built,
    Destroyed,
    Any,
}

impl StatusFilter {
    pub fn matches(self, status: BuildingStatus) -> bool {
        match self {
            StatusFilter::Built => status == BuildingStatus::Built,
            StatusFilter::Destroyed => status == BuildingStatus::Destroyed,
            StatusFilter::Any => true,
        }
    }
}

/// What a land reset did to the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub removed: Vec<Felt>,
    pub cabin_restored: bool,
}

pub struct BuildingLedger<'a, S: Store + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: Store + ?Sized> BuildingLedger<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Fails with `BuildingAlreadyExists` if a live record holds the key.
    pub fn ensure_vacant(&self, land_id: &Felt, building_uid: &Felt) -> Result<(), ProjectionError> {
        match self.store.building(land_id, building_uid)? {
            Some(existing) if existing.is_built() => Err(ProjectionError::BuildingAlreadyExists {
                land_id: *land_id,
                building_uid: *building_uid,
            }),
            _ => Ok(()),
        }
    }

    pub fn create(&mut self, building: Building) -> Result<(), ProjectionError> {
        self.ensure_vacant(&building.land_id, &building.building_uid)?;
        self.store.put_building(building)?;
        Ok(())
    }

    pub fn get(&self, land_id: &Felt, building_uid: &Felt) -> Result<Building, ProjectionError> {
        self.store
            .building(land_id, building_uid)?
            .filter(Building::is_built)
            .ok_or(ProjectionError::BuildingNotFound {
                land_id: *land_id,
                building_uid: *building_uid,
            })
    }

    pub fn list_by_land(
        &self,
        land_id: &Felt,
        filter: StatusFilter,
    ) -> Result<Vec<Building>, ProjectionError> {
        Ok(self
            .store
            .buildings(land_id)?
            .into_iter()
            .filter(|building| filter.matches(building.status))
            .collect())
    }

    /// Apply `change` to a live building and stamp `updated_at`.
    pub fn update<F>(
        &mut self,
        land_id: &Felt,
        building_uid: &Felt,
        at: u64,
        change: F,
    ) -> Result<Building, ProjectionError>
    where
        F: FnOnce(&mut Building),
    {
        let mut building = self.get(land_id, building_uid)?;
        change(&mut building);
        building.updated_at = at;
        self.store.put_building(building.clone())?;
        Ok(building)
    }

    pub fn remove(
        &mut self,
        land_id: &Felt,
        building_uid: &Felt,
        at: u64,
    ) -> Result<Building, ProjectionError> {
        self.update(land_id, building_uid, at, |building| {
            building.status = BuildingStatus::Destroyed;
        })
    }

    /// Remove every live building except the cabin and restore the cabin's
    /// decay to `cabin_decay`.
    pub fn reset(
        &mut self,
        land_id: &Felt,
        cabin_decay: u64,
        at: u64,
    ) -> Result<ResetSummary, ProjectionError> {
        let mut summary = ResetSummary::default();
        for building in self.list_by_land(land_id, StatusFilter::Built)? {
            if building.is_cabin() {
                self.update(land_id, &building.building_uid, at, |cabin| {
                    cabin.decay = cabin_decay;
                })?;
                summary.cabin_restored = true;
            } else {
                self.remove(land_id, &building.building_uid, at)?;
                summary.removed.push(building.building_uid);
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycles::Cycles;
    use crate::store::MemoryStore;
    use crate::world::cabin_uid;

    fn building(uid: u64) -> Building {
        Building {
            land_id: Felt::from_u64(5),
            building_uid: Felt::from_u64(uid),
            owner: Felt::from_u64(1),
            building_type_id: 3,
            pos_x: 1,
            pos_y: 1,
            status: BuildingStatus::Built,
            decay: 40,
            block_comp: 77,
            cycles: Cycles::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn create_refuses_live_duplicates_but_reuses_destroyed_keys() {
        let mut store = MemoryStore::default();
        let mut ledger = BuildingLedger::new(&mut store);
        let land = Felt::from_u64(5);
        let uid = Felt::from_u64(9);
        ledger.create(building(9)).unwrap();
        assert!(matches!(
            ledger.create(building(9)),
            Err(ProjectionError::BuildingAlreadyExists { .. })
        ));

        ledger.remove(&land, &uid, 3).unwrap();
        assert!(ledger.get(&land, &uid).unwrap_err().is_not_found());
        ledger.create(building(9)).unwrap();
        assert!(ledger.get(&land, &uid).unwrap().is_built());
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut store = MemoryStore::default();
        let err = BuildingLedger::new(&mut store)
            .remove(&Felt::from_u64(5), &Felt::from_u64(2), 0)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_filters_by_status() {
        let mut store = MemoryStore::default();
        let mut ledger = BuildingLedger::new(&mut store);
        let land = Felt::from_u64(5);
        for uid in [2, 3, 4] {
            ledger.create(building(uid)).unwrap();
        }
        ledger.remove(&land, &Felt::from_u64(3), 1).unwrap();
        let built = ledger.list_by_land(&land, StatusFilter::Built).unwrap();
        let destroyed = ledger.list_by_land(&land, StatusFilter::Destroyed).unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(destroyed.len(), 1);
        assert_eq!(ledger.list_by_land(&land, StatusFilter::Any).unwrap().len(), 3);
    }

    #[test]
    fn reset_spares_the_cabin() {
        let mut store = MemoryStore::default();
        let mut ledger = BuildingLedger::new(&mut store);
        let land = Felt::from_u64(5);
        for uid in [1, 2, 3] {
            ledger.create(building(uid)).unwrap();
        }
        let summary = ledger.reset(&land, 100, 7).unwrap();
        assert!(summary.cabin_restored);
        assert_eq!(summary.removed, vec![Felt::from_u64(2), Felt::from_u64(3)]);

        let live = ledger.list_by_land(&land, StatusFilter::Built).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].building_uid, cabin_uid());
        assert_eq!(live[0].decay, 100);
        assert_eq!(live[0].updated_at, 7);
    }
}
