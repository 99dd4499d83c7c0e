//! Particle snapshot I/O.
//!
//! The container hands out a flat [`ParticleDataset`] for an external
//! writer and loads one back through [`bulk_load`]. The traits below are
//! the seam for concrete file formats; [`RawDatasetFormat`] is the one
//! shipped here.

pub mod dataset;

use std::io::{Read, Write};

use crate::mesh_error::MeshPicError;

pub use dataset::{ParticleDataset, RawDatasetFormat, bulk_load};

/// Trait for writers that serialize a particle snapshot.
pub trait DatasetWriter {
    fn write<W: Write>(&self, writer: W, dataset: &ParticleDataset) -> Result<(), MeshPicError>;
}

/// Trait for readers that produce a particle snapshot.
pub trait DatasetReader {
    fn read<R: Read>(&self, reader: R) -> Result<ParticleDataset, MeshPicError>;
}
