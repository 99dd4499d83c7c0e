//! `EntityKey`: a packed, ordered handle for structured-mesh entities
//!
//! A structured mesh has eight entity classes per cell: one vertex, three
//! edges, three faces and one volume. `EntityKey` packs the integer cell
//! coordinate and the entity class into a single `u64` so that
//! - keys are totally ordered and hashable (usable in maps and sets),
//! - stepping one cell along an axis is a single integer addition on the
//!   key, and the result is the adjacent entity of the *same* class,
//! - the structural operators [`EntityKey::dual`] and
//!   [`EntityKey::rotate`] are bit manipulations.
//!
//! Each axis occupies a 21-bit field holding the biased *doubled*
//! coordinate `2 * c + bit + BIAS`. The low bit of each field is the
//! orientation bit of that axis, so the entity class is the three low bits
//! taken together. Axis 2 occupies the most significant field.

use std::fmt;

use crate::mesh_error::MeshPicError;

const AXIS_BITS: u32 = 21;
const FIELD_MASK: u64 = (1 << AXIS_BITS) - 1;
const BIAS: i64 = 1 << (AXIS_BITS - 1);
const ORIENTATION_BITS: u64 = 1 | (1 << AXIS_BITS) | (1 << (2 * AXIS_BITS));

/// Largest cell index the codec can address on any axis.
pub const MAX_INDEX: i64 = (1 << (AXIS_BITS - 2)) - 1;
/// Smallest cell index the codec can address on any axis.
pub const MIN_INDEX: i64 = -(1 << (AXIS_BITS - 2));

/// Entity class of a key: which sub-entity of a cell it names.
///
/// The discriminant is the orientation bit mask: bit `a` is set when the
/// entity extends along axis `a`. Edges extend along one axis, faces along
/// two (a `FaceX` is normal to x), volumes along all three.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum EntityTag {
    Vertex = 0b000,
    EdgeX = 0b001,
    EdgeY = 0b010,
    FaceZ = 0b011,
    EdgeZ = 0b100,
    FaceY = 0b101,
    FaceX = 0b110,
    Volume = 0b111,
}

impl EntityTag {
    pub const ALL: [EntityTag; 8] = [
        EntityTag::Vertex,
        EntityTag::EdgeX,
        EntityTag::EdgeY,
        EntityTag::EdgeZ,
        EntityTag::FaceX,
        EntityTag::FaceY,
        EntityTag::FaceZ,
        EntityTag::Volume,
    ];

    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => EntityTag::Vertex,
            0b001 => EntityTag::EdgeX,
            0b010 => EntityTag::EdgeY,
            0b011 => EntityTag::FaceZ,
            0b100 => EntityTag::EdgeZ,
            0b101 => EntityTag::FaceY,
            0b110 => EntityTag::FaceX,
            _ => EntityTag::Volume,
        }
    }

    /// Topological dimension of the entity: 0 vertex, 1 edge, 2 face, 3 volume.
    #[inline]
    pub const fn iform(self) -> u8 {
        (self as u8).count_ones() as u8
    }

    /// Position of the entity among the entities of the same `iform` in one
    /// cell (0 for vertex and volume, the axis for edges, the normal axis for
    /// faces).
    pub const fn sub_index(self) -> usize {
        match self {
            EntityTag::Vertex | EntityTag::Volume => 0,
            EntityTag::EdgeX | EntityTag::FaceX => 0,
            EntityTag::EdgeY | EntityTag::FaceY => 1,
            EntityTag::EdgeZ | EntityTag::FaceZ => 2,
        }
    }

    /// Complementary orientation class.
    #[inline]
    pub const fn dual(self) -> Self {
        Self::from_bits(!(self as u8))
    }

    /// Cyclic axis permutation x -> y -> z -> x.
    #[inline]
    pub const fn rotate(self) -> Self {
        let b = self as u8;
        Self::from_bits(((b << 1) | (b >> 2)) & 0b111)
    }

    /// Inverse of [`EntityTag::rotate`].
    #[inline]
    pub const fn inverse_rotate(self) -> Self {
        let b = self as u8;
        Self::from_bits(((b >> 1) | (b << 2)) & 0b111)
    }
}

/// Ordered, hashable key for one mesh entity.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct EntityKey(u64);

impl EntityKey {
    /// Encode a cell coordinate and entity class.
    ///
    /// # Errors
    /// `Configuration` when any component lies outside
    /// `[MIN_INDEX, MAX_INDEX]`: the mesh is larger than the key can address.
    pub fn encode(coord: [i64; 3], tag: EntityTag) -> Result<Self, MeshPicError> {
        let mut raw = 0u64;
        for (axis, &c) in coord.iter().enumerate() {
            if !(MIN_INDEX..=MAX_INDEX).contains(&c) {
                return Err(MeshPicError::Configuration(format!(
                    "cell index {c} on axis {axis} is outside the addressable range \
                     [{MIN_INDEX}, {MAX_INDEX}]"
                )));
            }
            let bit = ((tag.bits() >> axis) & 1) as i64;
            let field = (2 * c + bit + BIAS) as u64;
            raw |= field << (AXIS_BITS * axis as u32);
        }
        Ok(EntityKey(raw))
    }

    /// Volume key of a cell; this is the key particle buckets live under.
    #[inline]
    pub fn cell(coord: [i64; 3]) -> Result<Self, MeshPicError> {
        Self::encode(coord, EntityTag::Volume)
    }

    /// Split the key back into `(coordinate, tag)`.
    #[inline]
    pub fn decode(self) -> ([i64; 3], EntityTag) {
        (self.coord(), self.tag())
    }

    /// Cell coordinate of the entity.
    pub fn coord(self) -> [i64; 3] {
        let mut out = [0i64; 3];
        for (axis, c) in out.iter_mut().enumerate() {
            // arithmetic shift floors, so negative coordinates decode correctly
            *c = self.doubled(axis) >> 1;
        }
        out
    }

    /// Entity class of the key.
    #[inline]
    pub fn tag(self) -> EntityTag {
        let b = (self.0 & 1)
            | ((self.0 >> (AXIS_BITS - 1)) & 0b10)
            | ((self.0 >> (2 * AXIS_BITS - 2)) & 0b100);
        EntityTag::from_bits(b as u8)
    }

    #[inline]
    fn doubled(self, axis: usize) -> i64 {
        ((self.0 >> (AXIS_BITS * axis as u32)) & FIELD_MASK) as i64 - BIAS
    }

    /// Adjacent entity of the same class, `step` cells along `axis`.
    ///
    /// # Errors
    /// `Configuration` for an axis other than 0, 1, 2 or when the result
    /// leaves the addressable range.
    pub fn neighbor(self, axis: usize, step: i64) -> Result<Self, MeshPicError> {
        if axis >= 3 {
            return Err(MeshPicError::Configuration(format!("axis {axis} out of range")));
        }
        let shift = AXIS_BITS * axis as u32;
        let field = ((self.0 >> shift) & FIELD_MASK) as i64 + 2 * step;
        if !(0..=FIELD_MASK as i64).contains(&field) {
            return Err(MeshPicError::Configuration(format!(
                "stepping {step} along axis {axis} from {self:?} leaves the addressable range"
            )));
        }
        Ok(EntityKey((self.0 & !(FIELD_MASK << shift)) | ((field as u64) << shift)))
    }

    /// Same cell, complementary orientation (vertex <-> volume, edge-x <-> face-x, ...).
    #[inline]
    pub fn dual(self) -> Self {
        EntityKey(self.0 ^ ORIENTATION_BITS)
    }

    /// Same cell, orientation permuted x -> y -> z -> x.
    #[inline]
    pub fn rotate(self) -> Self {
        self.with_tag(self.tag().rotate())
    }

    /// Inverse of [`EntityKey::rotate`].
    #[inline]
    pub fn inverse_rotate(self) -> Self {
        self.with_tag(self.tag().inverse_rotate())
    }

    /// The two axes orthogonal to an edge (or spanning the plane normal to a
    /// face's normal), in cyclic order. `None` for vertices and volumes.
    pub fn orthogonal_axes(self) -> Option<[usize; 2]> {
        match self.tag().iform() {
            1 | 2 => {
                let a = self.tag().sub_index();
                Some([(a + 1) % 3, (a + 2) % 3])
            }
            _ => None,
        }
    }

    #[inline]
    fn with_tag(self, tag: EntityTag) -> Self {
        EntityKey((self.0 & !ORIENTATION_BITS) ^ Self::orientation_mask(tag))
    }

    #[inline]
    fn orientation_mask(tag: EntityTag) -> u64 {
        let b = tag.bits() as u64;
        (b & 1) | ((b & 0b10) << (AXIS_BITS - 1)) | ((b & 0b100) << (2 * AXIS_BITS - 2))
    }

    /// Dense row-major offset of this entity's cell inside the box starting
    /// at `origin` with extent `dimensions` (axis 2 fastest).
    ///
    /// Periodic axes wrap modulo their extent; on a non-periodic axis a
    /// coordinate outside the box yields `None`.
    pub fn hash(
        self,
        origin: [i64; 3],
        dimensions: [usize; 3],
        periodic: [bool; 3],
    ) -> Option<usize> {
        let c = self.coord();
        let mut offset = 0usize;
        for axis in 0..3 {
            let dim = dimensions[axis] as i64;
            if dim == 0 {
                return None;
            }
            let mut rel = c[axis] - origin[axis];
            if periodic[axis] {
                rel = rel.rem_euclid(dim);
            } else if rel < 0 || rel >= dim {
                return None;
            }
            offset = offset * dimensions[axis] + rel as usize;
        }
        Some(offset)
    }

    /// Raw packed value. Not a stable format.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

// -----------------------------------------------------------------------------
// Formatting traits
// -----------------------------------------------------------------------------

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (c, t) = self.decode();
        write!(f, "EntityKey({t:?} @ [{}, {}, {}])", c[0], c[1], c[2])
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (c, t) = self.decode();
        write!(f, "{t:?}({},{},{})", c[0], c[1], c[2])
    }
}



#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let k = EntityKey::encode([7, 8, -9], EntityTag::FaceZ).unwrap();
        let s = serde_json::to_string(&k).unwrap();
        let k2: EntityKey = serde_json::from_str(&s).unwrap();
        assert_eq!(k2, k);
    }
}
