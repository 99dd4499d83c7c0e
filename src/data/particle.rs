//! Plain-old-data particle record.
//!
//! Records have no identity beyond their field values: they are copied into
//! wire buffers and snapshots freely. `payload` is opaque to this crate
//! (species id, global tag, ...).

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, serde::Serialize, serde::Deserialize,
)]
pub struct ParticleRecord {
    /// Position.
    pub x: [f64; 3],
    /// Velocity (or momentum, depending on the policy).
    pub v: [f64; 3],
    /// Statistical weight.
    pub w: f64,
    /// Engine-defined payload.
    pub payload: u64,
}

impl ParticleRecord {
    pub const fn new(x: [f64; 3], v: [f64; 3], w: f64) -> Self {
        Self { x, v, w, payload: 0 }
    }

    pub const fn with_payload(mut self, payload: u64) -> Self {
        self.payload = payload;
        self
    }

    /// Translate the position, used for periodic images.
    #[inline]
    pub fn shift(&mut self, offset: [f64; 3]) {
        for (x, o) in self.x.iter_mut().zip(offset) {
            *x += o;
        }
    }
}
