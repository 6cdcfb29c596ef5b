use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Map};

use crate::event::Event;
use crate::felt::Felt;

/// Immutable audit entry, one per decoded event.
///
/// `fields` keeps the event's declaration order and serializes as a JSON
/// object.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub collection: String,
    #[serde_as(as = "Map<_, _>")]
    pub fields: Vec<(String, Felt)>,
    pub transaction_hash: Felt,
    pub block_number: u64,
    pub block_time: u64,
}

impl HistoryRecord {
    pub fn new(event: &Event, transaction_hash: Felt, block_number: u64, block_time: u64) -> Self {
        Self {
            collection: event.collection().to_string(),
            fields: event
                .fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            transaction_hash,
            block_number,
            block_time,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Felt> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}
