//! Scene error types.

use thiserror::Error;

use crate::render_item::MaterialId;

/// Scene error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    /// A fixed-size pool ran out of slots
    #[error("{what} capacity exceeded: {requested} requested, capacity {capacity}")]
    CapacityExceeded {
        /// Which pool.
        what: &'static str,
        /// Slots needed after the request.
        requested: u64,
        /// Configured capacity.
        capacity: u32,
    },

    /// A material ID that this registry never issued
    #[error("Unknown material: {0:?}")]
    UnknownMaterial(MaterialId),
}

/// Result type alias for scene operations.
pub type SceneResult<T> = std::result::Result<T, SceneError>;
