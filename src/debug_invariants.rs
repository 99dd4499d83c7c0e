//! Self-checks for the particle container and the decomposed mesh.
//!
//! `validate_invariants` is always available and returns the first broken
//! invariant. `debug_assert_invariants` panics on one, but only in debug
//! builds or with the `check-invariants` feature; release builds skip it.

use crate::mesh_error::MeshPicError;
use crate::topology::structured::{StructuredMesh, Zone};

pub trait DebugInvariants {
    /// Panic on a broken invariant when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// First broken invariant, if any.
    fn validate_invariants(&self) -> Result<(), MeshPicError>;
}

/// Run a fallible check and panic with context on error, when invariant
/// checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        {
            if let Err(e) = $expr {
                panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
            }
        }
    };
}

impl DebugInvariants for StructuredMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "StructuredMesh");
    }

    /// Zones partition the memory box and owned zones cover the local box.
    fn validate_invariants(&self) -> Result<(), MeshPicError> {
        let mut seen = 0usize;
        for zone in Zone::ALL {
            let keys = self.zone_keys(zone);
            for &k in keys {
                if self.zone_of(k) != Some(zone) {
                    return Err(MeshPicError::InvariantViolation(format!(
                        "{k:?} listed as {zone:?} but classified as {:?}",
                        self.zone_of(k)
                    )));
                }
                let owned = self.index_box().contains(k.coord());
                if owned == (zone == Zone::Ghost) {
                    return Err(MeshPicError::InvariantViolation(format!(
                        "{k:?} in {zone:?} has the wrong ownership"
                    )));
                }
            }
            seen += keys.len();
        }
        if seen != self.memory_box().volume() {
            return Err(MeshPicError::InvariantViolation(format!(
                "zones hold {seen} cells, memory box has {}",
                self.memory_box().volume()
            )));
        }
        Ok(())
    }
}
