//! MeshPicError: Unified error type for mesh-pic public APIs
//!
//! Every fallible operation in the crate reports through this enum so that a
//! time-stepping driver can tell a guarded lookup miss apart from a failed
//! halo round or a mesh that is too large for the key codec.

use crate::topology::direction::Direction;
use crate::topology::entity_key::EntityKey;
use thiserror::Error;

/// Unified error type for mesh-pic operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshPicError {
    /// Guarded access (`at`) on a key that has no bucket.
    #[error("no bucket stored for key {0:?}")]
    NotFound(EntityKey),

    /// Link registration or transfer failure during halo synchronization.
    /// Aborts only the current round.
    #[error("halo transfer failed (direction {direction:?}, peer {peer}): {reason}")]
    TransferError {
        direction: Direction,
        peer: usize,
        reason: String,
    },

    /// Storage limit reached while inserting or generating particles.
    #[error("particle storage exhausted: {requested} records requested, capacity {capacity}")]
    OutOfCapacity { requested: usize, capacity: usize },

    /// Fatal setup error, e.g. a coordinate the key codec cannot address.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation called in the wrong phase (e.g. reading a receive buffer
    /// before `wait`).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Reading or writing a particle dataset failed.
    #[error("dataset I/O error: {0}")]
    DatasetIo(String),

    /// Reported by invariant checking.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl MeshPicError {
    pub(crate) fn transfer(direction: Direction, peer: usize, reason: impl Into<String>) -> Self {
        MeshPicError::TransferError {
            direction,
            peer,
            reason: reason.into(),
        }
    }

    /// `true` for errors scoped to one synchronization round.
    pub fn is_round_scoped(&self) -> bool {
        matches!(self, MeshPicError::TransferError { .. })
    }
}
