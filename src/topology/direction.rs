//! Neighbour directions of a block in a structured decomposition.
//!
//! A direction is a tuple over `{-1, 0, +1}` per spatial axis. Faces have one
//! nonzero component, edges two, corners three. Components of axes beyond
//! the mesh dimension are always zero.

use itertools::Itertools;

/// Offset to a neighbouring sub-domain, one component per axis.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Direction(pub [i8; 3]);

/// Number of distinct direction indices (`3^3`).
pub const DIRECTION_SLOTS: u16 = 27;

impl Direction {
    pub const ZERO: Direction = Direction([0, 0, 0]);

    /// Every nonzero direction for an `ndims`-dimensional decomposition, in
    /// lexicographic order.
    pub fn all(ndims: usize) -> Vec<Direction> {
        let ndims = ndims.min(3);
        (0..ndims)
            .map(|_| [-1i8, 0, 1])
            .multi_cartesian_product()
            .map(|comps| {
                let mut d = [0i8; 3];
                d[..comps.len()].copy_from_slice(&comps);
                Direction(d)
            })
            .filter(|d| !d.is_zero())
            .collect()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    #[inline]
    pub fn component(&self, axis: usize) -> i8 {
        self.0[axis]
    }

    /// Direction pointing back at the sender.
    #[inline]
    pub fn opposite(&self) -> Direction {
        Direction([-self.0[0], -self.0[1], -self.0[2]])
    }

    /// Dense index in `0..DIRECTION_SLOTS`; the zero direction is 13.
    #[inline]
    pub fn index(&self) -> u16 {
        let d = self.0;
        ((d[0] + 1) as u16) * 9 + ((d[1] + 1) as u16) * 3 + (d[2] + 1) as u16
    }

    /// Number of nonzero components (1 face, 2 edge, 3 corner).
    pub fn order(&self) -> usize {
        self.0.iter().filter(|c| **c != 0).count()
    }
}
