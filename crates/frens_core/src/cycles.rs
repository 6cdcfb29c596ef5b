//! Production-cycle accounting.
//!
//! A building accrues production while it has fuel queued. `incoming_cycles`
//! is the fuel that has not yet elapsed, `active_cycles` the elapsed
//! production waiting to be claimed, and `last_fuel` the time of the last
//! accounting touch. All times are block-count units.
//!
//! Both steps assume non-decreasing time per building. An earlier reference
//! time saturates the elapsed delta to zero instead of wrapping.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycles {
    pub active_cycles: u64,
    pub incoming_cycles: u64,
    pub last_fuel: u64,
}

impl Cycles {
    /// Seed state for a freshly built building.
    pub fn for_new_building(building_type_id: u64, time: u64) -> Self {
        Self {
            active_cycles: 0,
            incoming_cycles: if building_type_id > 2 { 1 } else { 0 },
            last_fuel: time,
        }
    }

    /// Queue `nb_blocks` of fuel at `event_time`.
    ///
    /// Fuel already queued is consumed up to the elapsed time first. When it
    /// ran out entirely, whatever was left over is dropped and the new fuel
    /// starts a fresh window.
    pub fn fuel(self, nb_blocks: u64, event_time: u64) -> Self {
        let (active_cycles, incoming_cycles) = if self.incoming_cycles == 0 {
            (self.active_cycles, nb_blocks)
        } else {
            let passed = event_time.saturating_sub(self.last_fuel);
            if self.incoming_cycles <= passed {
                (
                    self.active_cycles.saturating_add(self.incoming_cycles),
                    nb_blocks,
                )
            } else {
                (
                    self.active_cycles.saturating_add(passed),
                    (self.incoming_cycles - passed).saturating_add(nb_blocks),
                )
            }
        };
        Self {
            active_cycles,
            incoming_cycles,
            last_fuel: event_time,
        }
    }

    /// Claim accumulated production at `reference_time`.
    ///
    /// Active cycles are always cleared; the remaining fuel is drained by the
    /// elapsed time.
    pub fn claim(self, reference_time: u64) -> Self {
        let incoming_cycles = if self.incoming_cycles == 0 {
            0
        } else {
            let passed = reference_time.saturating_sub(self.last_fuel);
            if self.incoming_cycles <= passed {
                0
            } else {
                self.incoming_cycles - passed
            }
        };
        Self {
            active_cycles: 0,
            incoming_cycles,
            last_fuel: reference_time,
        }
    }
}
