pub mod cycles;
pub mod error;
pub mod event;
pub mod felt;
pub mod grid;
pub mod history;
pub mod io;
pub mod ledger;
pub mod query;
pub mod reduce;
pub mod store;
pub mod world;

use serde::Serialize;
use tracing::{debug, info, warn};

use error::ProjectionError;
use event::{decode, RawBlock};
use felt::Felt;
use history::HistoryRecord;
use io::config::ProjectionConfig;
use reduce::{BlockContext, Reducer, Skip};
use store::Store;
use world::BlockRecord;

/// An event the dispatcher refused without touching any aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub name: String,
    pub transaction_hash: Felt,
    pub reason: String,
}

/// Per-block summary of what the projection did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub number: u64,
    pub applied: Vec<HistoryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Skip>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
}

impl BlockReport {
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Sequential router from raw blocks to the reducer.
///
/// Owns the store so that it is the only writer. Events are applied one at
/// a time in block order, then in emission order within a block.
pub struct Dispatcher<S: Store> {
    store: S,
    config: ProjectionConfig,
    last_block: Option<u64>,
}

impl<S: Store> Dispatcher<S> {
    pub fn new(store: S, config: ProjectionConfig) -> Result<Self, ProjectionError> {
        let last_block = store.blocks()?.last().map(|block| block.number);
        Ok(Self {
            store,
            config,
            last_block,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Apply every event of `block`.
    ///
    /// Malformed and out-of-bounds events are rejected and reported;
    /// processing continues with the next event. A duplicate create is
    /// reported as a rejection but its history record is still written.
    /// Store failures and exhausted write retries stop the block and are
    /// returned. The block is only recorded once every event was handled, so
    /// a failed block can be delivered again.
    pub fn ingest_block(&mut self, block: &RawBlock) -> Result<BlockReport, ProjectionError> {
        if let Some(previous) = self.last_block {
            if block.number <= previous {
                return Err(ProjectionError::BlockOrder {
                    previous,
                    number: block.number,
                });
            }
        }

        let context = BlockContext {
            number: block.number,
            timestamp: block.timestamp,
        };
        let mut report = BlockReport {
            number: block.number,
            ..BlockReport::default()
        };

        for (index, raw) in block.events.iter().enumerate() {
            let result = decode(raw).map_err(ProjectionError::from).and_then(|event| {
                debug!(
                    block = block.number,
                    index,
                    event = event.name(),
                    tx = %raw.transaction_hash,
                    "applying event"
                );
                Reducer::new(&mut self.store, &self.config).apply(
                    context,
                    raw.transaction_hash,
                    &event,
                )
            });
            match result {
                Ok(outcome) => {
                    if let Some(reason) = outcome.aborted {
                        warn!(
                            block = block.number,
                            index,
                            event = %raw.name,
                            tx = %raw.transaction_hash,
                            %reason,
                            "create step refused"
                        );
                        report.rejected.push(Rejection {
                            index,
                            name: raw.name.clone(),
                            transaction_hash: raw.transaction_hash,
                            reason,
                        });
                    }
                    report.skipped.extend(outcome.skipped);
                    report.applied.push(outcome.record);
                }
                Err(err) if err.is_rejection() => {
                    warn!(
                        block = block.number,
                        index,
                        event = %raw.name,
                        tx = %raw.transaction_hash,
                        %err,
                        "event rejected"
                    );
                    report.rejected.push(Rejection {
                        index,
                        name: raw.name.clone(),
                        transaction_hash: raw.transaction_hash,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        self.store.insert_block(BlockRecord {
            number: block.number,
            hash: block.hash,
            timestamp: block.timestamp,
        })?;
        self.last_block = Some(block.number);

        info!(
            block = block.number,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            rejected = report.rejected.len(),
            "block ingested"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use crate::store::MemoryStore;

    fn block(number: u64, events: Vec<RawEvent>) -> RawBlock {
        RawBlock {
            number,
            hash: Felt::from_u64(number),
            timestamp: 1_000 + number,
            events,
        }
    }

    fn raw(name: &str, data: &[u64]) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            transaction_hash: Felt::from_u64(0x77),
            data: data.iter().copied().map(Felt::from_u64).collect(),
        }
    }

    #[test]
    fn blocks_must_advance() {
        let mut dispatcher =
            Dispatcher::new(MemoryStore::default(), ProjectionConfig::default()).unwrap();
        dispatcher.ingest_block(&block(10, Vec::new())).unwrap();
        let err = dispatcher.ingest_block(&block(10, Vec::new())).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::BlockOrder {
                previous: 10,
                number: 10
            }
        ));
        assert_eq!(dispatcher.store().blocks().unwrap().len(), 1);
    }

    #[test]
    fn rejections_do_not_stop_the_block() {
        let mut dispatcher =
            Dispatcher::new(MemoryStore::default(), ProjectionConfig::default()).unwrap();
        let report = dispatcher
            .ingest_block(&block(
                1,
                vec![
                    raw("NewGame", &[1, 5, 100]),
                    raw("Build", &[1, 5]),
                    raw("NewGame", &[1, 5, 101]),
                    raw("Repair", &[1, 5, 102, 1, 1, 20, 8]),
                ],
            ))
            .unwrap();
        assert_eq!(report.applied.len(), 3);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].index, 1);
        assert_eq!(report.rejected[1].index, 2);
        assert!(report.rejected[1].reason.contains("already exists"));
        assert_eq!(report.applied[1].collection, "inits");
        assert_eq!(report.applied[2].collection, "repairs");
    }

    #[test]
    fn resumed_dispatcher_remembers_last_block() {
        let mut dispatcher =
            Dispatcher::new(MemoryStore::default(), ProjectionConfig::default()).unwrap();
        dispatcher.ingest_block(&block(4, Vec::new())).unwrap();
        let store = dispatcher.into_store();
        let mut resumed = Dispatcher::new(store, ProjectionConfig::default()).unwrap();
        assert!(resumed.ingest_block(&block(3, Vec::new())).is_err());
        assert!(resumed.ingest_block(&block(5, Vec::new())).is_ok());
    }

    /// Delegates to a [`MemoryStore`] but refuses the first history append.
    struct FailsFirstAppend {
        inner: MemoryStore,
        armed: bool,
    }

    impl Store for FailsFirstAppend {
        fn land(&self, land_id: &Felt) -> Result<Option<world::Land>, store::StoreError> {
            self.inner.land(land_id)
        }
        fn lands(&self) -> Result<Vec<world::Land>, store::StoreError> {
            self.inner.lands()
        }
        fn insert_land(&mut self, land: world::Land) -> Result<(), store::StoreError> {
            self.inner.insert_land(land)
        }
        fn replace_land(
            &mut self,
            land: world::Land,
            expected_version: u64,
        ) -> Result<u64, store::StoreError> {
            self.inner.replace_land(land, expected_version)
        }
        fn building(
            &self,
            land_id: &Felt,
            building_uid: &Felt,
        ) -> Result<Option<world::Building>, store::StoreError> {
            self.inner.building(land_id, building_uid)
        }
        fn buildings(&self, land_id: &Felt) -> Result<Vec<world::Building>, store::StoreError> {
            self.inner.buildings(land_id)
        }
        fn put_building(&mut self, building: world::Building) -> Result<(), store::StoreError> {
            self.inner.put_building(building)
        }
        fn append_history(&mut self, record: HistoryRecord) -> Result<(), store::StoreError> {
            if self.armed {
                self.armed = false;
                return Err(store::StoreError::UnknownCollection(record.collection));
            }
            self.inner.append_history(record)
        }
        fn history(&self, collection: &str) -> Result<Vec<HistoryRecord>, store::StoreError> {
            self.inner.history(collection)
        }
        fn insert_block(&mut self, block: BlockRecord) -> Result<(), store::StoreError> {
            self.inner.insert_block(block)
        }
        fn blocks(&self) -> Result<Vec<BlockRecord>, store::StoreError> {
            self.inner.blocks()
        }
        fn upsert_token(&mut self, token: world::Token) -> Result<(), store::StoreError> {
            self.inner.upsert_token(token)
        }
        fn token(&self, token_id: &Felt) -> Result<Option<world::Token>, store::StoreError> {
            self.inner.token(token_id)
        }
        fn tokens(&self) -> Result<Vec<world::Token>, store::StoreError> {
            self.inner.tokens()
        }
    }

    #[test]
    fn failed_block_is_not_recorded_and_can_be_redelivered() {
        let store = FailsFirstAppend {
            inner: MemoryStore::default(),
            armed: true,
        };
        let mut dispatcher = Dispatcher::new(store, ProjectionConfig::default()).unwrap();
        let delivery = block(
            7,
            vec![raw("NewGame", &[1, 5, 100]), raw("Transfer", &[0, 0xa, 7, 0])],
        );

        let err = dispatcher.ingest_block(&delivery).unwrap_err();
        assert!(matches!(err, ProjectionError::Store(_)));
        assert!(dispatcher.store().blocks().unwrap().is_empty());
        assert!(dispatcher.store().token(&Felt::from_u64(7)).unwrap().is_none());

        let report = dispatcher.ingest_block(&delivery).unwrap();
        assert_eq!(report.applied.len(), 2);
        assert!(dispatcher.store().token(&Felt::from_u64(7)).unwrap().is_some());
        assert_eq!(dispatcher.store().blocks().unwrap().len(), 1);
        assert!(dispatcher.ingest_block(&delivery).is_err());
    }
}
