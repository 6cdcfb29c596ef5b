use thiserror::Error;

use crate::event::MalformedEvent;
use crate::felt::Felt;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("land {0} not found")]
    LandNotFound(Felt),
    #[error("building {building_uid} not found on land {land_id}")]
    BuildingNotFound { land_id: Felt, building_uid: Felt },
    #[error("land {0} already exists")]
    LandAlreadyExists(Felt),
    #[error("building {building_uid} already exists on land {land_id}")]
    BuildingAlreadyExists { land_id: Felt, building_uid: Felt },
    #[error("cell ({x}, {y}) is outside the {rows}x{cols} grid")]
    OutOfBounds { x: i64, y: i64, rows: u32, cols: u32 },
    #[error("malformed event: {0}")]
    Malformed(#[from] MalformedEvent),
    #[error("block {number} arrived after block {previous}")]
    BlockOrder { previous: u64, number: u64 },
    #[error("land {land_id} kept changing underneath after {attempts} attempts")]
    Conflict { land_id: Felt, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProjectionError {
    /// Missing land or building; handlers skip the affected aggregate.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProjectionError::LandNotFound(_) | ProjectionError::BuildingNotFound { .. }
        )
    }

    /// A create step hit a live key. Only that step is aborted; the event
    /// is still recorded in history.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            ProjectionError::LandAlreadyExists(_) | ProjectionError::BuildingAlreadyExists { .. }
        )
    }

    /// Errors that abort a single event without halting the pipeline.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProjectionError::LandAlreadyExists(_)
                | ProjectionError::BuildingAlreadyExists { .. }
                | ProjectionError::OutOfBounds { .. }
                | ProjectionError::Malformed(_)
        )
    }
}
