//! Half-open integer boxes `[lo, hi)` over the three index axes.

use crate::mesh_error::MeshPicError;
use crate::topology::entity_key::EntityKey;

/// Half-open box of cell indices. Unused axes of a lower-dimensional mesh
/// are `[0, 1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexBox {
    pub lo: [i64; 3],
    pub hi: [i64; 3],
}

impl IndexBox {
    pub const fn new(lo: [i64; 3], hi: [i64; 3]) -> Self {
        Self { lo, hi }
    }

    /// Extent per axis (zero when empty on that axis).
    pub fn extent(&self) -> [usize; 3] {
        let mut out = [0usize; 3];
        for (a, e) in out.iter_mut().enumerate() {
            *e = (self.hi[a] - self.lo[a]).max(0) as usize;
        }
        out
    }

    pub fn volume(&self) -> usize {
        self.extent().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    #[inline]
    pub fn contains(&self, c: [i64; 3]) -> bool {
        (0..3).all(|a| c[a] >= self.lo[a] && c[a] < self.hi[a])
    }

    /// Intersection; may be empty.
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        let mut lo = [0i64; 3];
        let mut hi = [0i64; 3];
        for a in 0..3 {
            lo[a] = self.lo[a].max(other.lo[a]);
            hi[a] = self.hi[a].min(other.hi[a]).max(lo[a]);
        }
        IndexBox { lo, hi }
    }

    /// Grow (or shrink, for negative widths) each side independently.
    pub fn expand(&self, below: [i64; 3], above: [i64; 3]) -> IndexBox {
        let mut out = *self;
        for a in 0..3 {
            out.lo[a] -= below[a];
            out.hi[a] += above[a];
        }
        out
    }

    /// Iterate every coordinate in row-major order (axis 2 fastest).
    pub fn coords(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        let b = *self;
        (b.lo[0]..b.hi[0]).flat_map(move |i| {
            (b.lo[1]..b.hi[1]).flat_map(move |j| (b.lo[2]..b.hi[2]).map(move |k| [i, j, k]))
        })
    }

    /// Volume keys of every cell in the box, row-major.
    pub fn cell_keys(&self) -> Result<Vec<EntityKey>, MeshPicError> {
        self.coords().map(EntityKey::cell).collect()
    }
}
