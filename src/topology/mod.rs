//! Mesh addressing for the particle substrate.
//!
//! - [`entity_key`]: the bit-packed `(coordinate, orientation)` key
//! - [`index_box`] and [`direction`]: integer boxes and neighbour offsets
//! - [`structured`]: the block-decomposed mesh that supplies zones,
//!   neighbour links and point location
//!
//! Most users construct a [`StructuredMesh`] from a [`MeshConfig`] and hand
//! it to the container's hasher.

pub mod direction;
pub mod entity_key;
pub mod index_box;
pub mod structured;

pub use direction::Direction;
pub use entity_key::{EntityKey, EntityTag};
pub use index_box::IndexBox;
pub use structured::{MeshConfig, Neighbor, StructuredMesh, Zone};
