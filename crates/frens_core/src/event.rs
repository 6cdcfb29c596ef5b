//! Typed game events and the decoder for raw `(name, data)` tuples.
//!
//! Raw events arrive as an event name plus an ordered list of field elements.
//! They are decoded once into [`Event`]; everything downstream matches on the
//! variant instead of looking fields up by name.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::felt::Felt;

/// A raw event as emitted by the chain, still untyped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub transaction_hash: Felt,
    pub data: Vec<Felt>,
}

/// A block header and the raw events it carries, in emission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub number: u64,
    pub hash: Felt,
    pub timestamp: u64,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("unknown event name {0:?}")]
    UnknownKind(String),
    #[error("{kind} expects {expected} fields, got {actual}")]
    Arity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{kind}.{field} = {value} does not fit in {bits} bits")]
    Overflow {
        kind: &'static str,
        field: &'static str,
        value: Felt,
        bits: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Init {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reset {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Harvest {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub resource_type: u64,
    pub resource_uid: Felt,
    pub block_comp: u64,
    pub pos_x: u32,
    pub pos_y: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Build {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub building_type_id: u64,
    pub building_uid: Felt,
    pub block_comp: u64,
    pub pos_x: u32,
    pub pos_y: u32,
}

/// Destroy coordinates are one-based, unlike every other event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destroy {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub building_type_id: u64,
    pub building_uid: Felt,
    pub block_comp: u64,
    pub pos_x: u32,
    pub pos_y: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repair {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub building_type_id: u64,
    pub building_uid: Felt,
    pub pos_x: u32,
    pub pos_y: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub infra_type: u64,
    pub infra_type_id: u64,
    pub infra_uid: Felt,
    pub pos_x: u32,
    pub pos_y: u32,
    pub new_pos_x: u32,
    pub new_pos_y: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fuel {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub building_type_id: u64,
    pub building_uid: Felt,
    pub pos_x: u32,
    pub pos_y: u32,
    pub nb_blocks: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub owner: Felt,
    pub land_id: Felt,
    pub time: u64,
    pub block_number: u64,
    pub building_counter: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub from_address: Felt,
    pub to_address: Felt,
    pub token_id: Felt,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Init(Init),
    Reset(Reset),
    Harvest(Harvest),
    Build(Build),
    Destroy(Destroy),
    Repair(Repair),
    Move(Move),
    Fuel(Fuel),
    Claim(Claim),
    Transfer(Transfer),
}

/// History collection names, one per event kind.
pub const COLLECTIONS: &[&str] = &[
    "inits",
    "resets",
    "harvest",
    "build",
    "destroy",
    "repairs",
    "moves",
    "fuel",
    "claims",
    "transfers",
];

impl Event {
    /// Raw chain-side name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Init(_) => "NewGame",
            Event::Reset(_) => "ResetGame",
            Event::Harvest(_) => "HarvestResource",
            Event::Build(_) => "Build",
            Event::Destroy(_) => "Destroy",
            Event::Repair(_) => "Repair",
            Event::Move(_) => "Move",
            Event::Fuel(_) => "FuelProduction",
            Event::Claim(_) => "Claim",
            Event::Transfer(_) => "Transfer",
        }
    }

    /// History collection the event is appended to.
    pub fn collection(&self) -> &'static str {
        match self {
            Event::Init(_) => "inits",
            Event::Reset(_) => "resets",
            Event::Harvest(_) => "harvest",
            Event::Build(_) => "build",
            Event::Destroy(_) => "destroy",
            Event::Repair(_) => "repairs",
            Event::Move(_) => "moves",
            Event::Fuel(_) => "fuel",
            Event::Claim(_) => "claims",
            Event::Transfer(_) => "transfers",
        }
    }

    pub fn land_id(&self) -> Option<&Felt> {
        match self {
            Event::Init(e) => Some(&e.land_id),
            Event::Reset(e) => Some(&e.land_id),
            Event::Harvest(e) => Some(&e.land_id),
            Event::Build(e) => Some(&e.land_id),
            Event::Destroy(e) => Some(&e.land_id),
            Event::Repair(e) => Some(&e.land_id),
            Event::Move(e) => Some(&e.land_id),
            Event::Fuel(e) => Some(&e.land_id),
            Event::Claim(e) => Some(&e.land_id),
            Event::Transfer(_) => None,
        }
    }

    /// Named fields in declaration order, re-encoded for the history record.
    pub fn fields(&self) -> Vec<(&'static str, Felt)> {
        let u = Felt::from_u64;
        let c = |v: u32| Felt::from_u64(u64::from(v));
        match self {
            Event::Init(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
            ],
            Event::Reset(e) => vec![
                ("owner", e.owner),
                ("time", u(e.time)),
                ("land_id", e.land_id),
            ],
            Event::Harvest(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("resource_type", u(e.resource_type)),
                ("resource_uid", e.resource_uid),
                ("block_comp", u(e.block_comp)),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
            ],
            Event::Build(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("building_type_id", u(e.building_type_id)),
                ("building_uid", e.building_uid),
                ("block_comp", u(e.block_comp)),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
            ],
            Event::Destroy(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("building_type_id", u(e.building_type_id)),
                ("building_uid", e.building_uid),
                ("block_comp", u(e.block_comp)),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
            ],
            Event::Repair(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("building_type_id", u(e.building_type_id)),
                ("building_uid", e.building_uid),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
            ],
            Event::Move(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("infra_type", u(e.infra_type)),
                ("infra_type_id", u(e.infra_type_id)),
                ("infra_uid", e.infra_uid),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
                ("new_pos_x", c(e.new_pos_x)),
                ("new_pos_y", c(e.new_pos_y)),
            ],
            Event::Fuel(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("building_type_id", u(e.building_type_id)),
                ("building_uid", e.building_uid),
                ("pos_x", c(e.pos_x)),
                ("pos_y", c(e.pos_y)),
                ("nb_blocks", u(e.nb_blocks)),
            ],
            Event::Claim(e) => vec![
                ("owner", e.owner),
                ("land_id", e.land_id),
                ("time", u(e.time)),
                ("block_number", u(e.block_number)),
                ("building_counter", u(e.building_counter)),
            ],
            Event::Transfer(e) => vec![
                ("from_address", e.from_address),
                ("to_address", e.to_address),
                ("token_id", e.token_id),
            ],
        }
    }
}

/// Cursor over a raw data array that narrows each field as it is read.
struct Fields<'a> {
    kind: &'static str,
    data: &'a [Felt],
    next: usize,
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, data: &'a [Felt], expected: usize) -> Result<Self, MalformedEvent> {
        if data.len() != expected {
            return Err(MalformedEvent::Arity {
                kind,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            kind,
            data,
            next: 0,
        })
    }

    fn felt(&mut self) -> Felt {
        let value = self.data[self.next];
        self.next += 1;
        value
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, MalformedEvent> {
        let value = self.felt();
        value.to_u64().ok_or(MalformedEvent::Overflow {
            kind: self.kind,
            field,
            value,
            bits: 64,
        })
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, MalformedEvent> {
        let value = self.felt();
        value
            .to_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(MalformedEvent::Overflow {
                kind: self.kind,
                field,
                value,
                bits: 32,
            })
    }
}

/// Decode a raw event into its typed variant.
pub fn decode(raw: &RawEvent) -> Result<Event, MalformedEvent> {
    let data = raw.data.as_slice();
    let event = match raw.name.as_str() {
        "NewGame" => {
            let mut f = Fields::new("NewGame", data, 3)?;
            Event::Init(Init {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
            })
        }
        "ResetGame" => {
            let mut f = Fields::new("ResetGame", data, 3)?;
            let owner = f.felt();
            let time = f.u64("time")?;
            Event::Reset(Reset {
                owner,
                time,
                land_id: f.felt(),
            })
        }
        "HarvestResource" => {
            let mut f = Fields::new("HarvestResource", data, 8)?;
            Event::Harvest(Harvest {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                resource_type: f.u64("resource_type")?,
                resource_uid: f.felt(),
                block_comp: f.u64("block_comp")?,
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
            })
        }
        "Build" => {
            let mut f = Fields::new("Build", data, 8)?;
            Event::Build(Build {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                building_type_id: f.u64("building_type_id")?,
                building_uid: f.felt(),
                block_comp: f.u64("block_comp")?,
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
            })
        }
        "Destroy" => {
            let mut f = Fields::new("Destroy", data, 8)?;
            Event::Destroy(Destroy {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                building_type_id: f.u64("building_type_id")?,
                building_uid: f.felt(),
                block_comp: f.u64("block_comp")?,
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
            })
        }
        "Repair" => {
            let mut f = Fields::new("Repair", data, 7)?;
            Event::Repair(Repair {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                building_type_id: f.u64("building_type_id")?,
                building_uid: f.felt(),
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
            })
        }
        "Move" => {
            let mut f = Fields::new("Move", data, 10)?;
            Event::Move(Move {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                infra_type: f.u64("infra_type")?,
                infra_type_id: f.u64("infra_type_id")?,
                infra_uid: f.felt(),
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
                new_pos_x: f.u32("new_pos_x")?,
                new_pos_y: f.u32("new_pos_y")?,
            })
        }
        "FuelProduction" => {
            let mut f = Fields::new("FuelProduction", data, 8)?;
            Event::Fuel(Fuel {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                building_type_id: f.u64("building_type_id")?,
                building_uid: f.felt(),
                pos_x: f.u32("pos_x")?,
                pos_y: f.u32("pos_y")?,
                nb_blocks: f.u64("nb_blocks")?,
            })
        }
        "Claim" => {
            let mut f = Fields::new("Claim", data, 5)?;
            Event::Claim(Claim {
                owner: f.felt(),
                land_id: f.felt(),
                time: f.u64("time")?,
                block_number: f.u64("block_number")?,
                building_counter: f.u64("building_counter")?,
            })
        }
        "Transfer" => {
            let mut f = Fields::new("Transfer", data, 4)?;
            let from_address = f.felt();
            let to_address = f.felt();
            let low = f.felt();
            let high = f.felt();
            let token_id =
                Felt::from_uint256(low, high).ok_or(MalformedEvent::Overflow {
                    kind: "Transfer",
                    field: "token_id",
                    value: if low.to_u128().is_none() { low } else { high },
                    bits: 128,
                })?;
            Event::Transfer(Transfer {
                from_address,
                to_address,
                token_id,
            })
        }
        other => return Err(MalformedEvent::UnknownKind(other.to_string())),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, data: &[u64]) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            transaction_hash: Felt::from_u64(0xabc),
            data: data.iter().copied().map(Felt::from_u64).collect(),
        }
    }

    #[test]
    fn reset_reads_time_before_land() {
        let event = decode(&raw("ResetGame", &[1, 100, 5])).unwrap();
        assert_eq!(
            event,
            Event::Reset(Reset {
                owner: Felt::from_u64(1),
                land_id: Felt::from_u64(5),
                time: 100,
            })
        );
        assert_eq!(event.collection(), "resets");
    }

    #[test]
    fn build_fields_follow_abi_order() {
        let event = decode(&raw("Build", &[1, 5, 100, 3, 9, 77, 2, 3])).unwrap();
        let Event::Build(build) = event else {
            panic!("expected build");
        };
        assert_eq!(build.building_type_id, 3);
        assert_eq!(build.building_uid, Felt::from_u64(9));
        assert_eq!(build.block_comp, 77);
        assert_eq!((build.pos_x, build.pos_y), (2, 3));
    }

    #[test]
    fn wrong_arity_is_malformed() {
        let err = decode(&raw("FuelProduction", &[1, 5, 100])).unwrap_err();
        assert_eq!(
            err,
            MalformedEvent::Arity {
                kind: "FuelProduction",
                expected: 8,
                actual: 3,
            }
        );
    }

    #[test]
    fn oversized_coordinate_is_malformed() {
        let err = decode(&raw("Build", &[1, 5, 100, 3, 9, 77, u64::MAX, 3])).unwrap_err();
        assert!(matches!(
            err,
            MalformedEvent::Overflow { field: "pos_x", bits: 32, .. }
        ));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = decode(&raw("Approval", &[])).unwrap_err();
        assert_eq!(err, MalformedEvent::UnknownKind("Approval".to_string()));
    }

    #[test]
    fn transfer_joins_token_halves() {
        let event = decode(&raw("Transfer", &[0, 42, 7, 0])).unwrap();
        let Event::Transfer(transfer) = event else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.token_id, Felt::from_u64(7));
        assert_eq!(transfer.to_address, Felt::from_u64(42));
    }

    #[test]
    fn history_fields_cover_every_raw_field() {
        let data = [1, 5, 100, 1, 2, 9, 4, 4, 6, 7];
        let event = decode(&raw("Move", &data)).unwrap();
        let fields = event.fields();
        assert_eq!(fields.len(), data.len());
        assert_eq!(fields[8], ("new_pos_x", Felt::from_u64(6)));
    }
}
