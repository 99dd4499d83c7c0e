//! Flat particle snapshots: `(count, records)`.
//!
//! A snapshot is what the container hands to an external columnar or file
//! writer. Records are in ascending key order, bucket order within a key.
//! Loading goes the other way: each rank keeps the records that fall in its
//! owned cells and one rehash round rebuilds the ghost copies, so the same
//! whole-domain snapshot can be loaded under any decomposition.

use std::io::{Read, Write};

use crate::algs::communicator::Communicator;
use crate::algs::exchange::HaloCommTags;
use crate::algs::rehash::{RehashReport, rehash};
use crate::algs::wire::{cast_slice, decode_records};
use crate::data::container::{CellHash, ParticleContainer};
use crate::data::particle::ParticleRecord;
use crate::io::{DatasetReader, DatasetWriter};
use crate::mesh_error::MeshPicError;
use crate::topology::structured::{StructuredMesh, Zone};

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParticleDataset {
    pub count: usize,
    pub records: Vec<ParticleRecord>,
}

impl ParticleDataset {
    pub fn new(records: Vec<ParticleRecord>) -> Self {
        Self {
            count: records.len(),
            records,
        }
    }

    /// Raw record bytes, native layout.
    pub fn as_bytes(&self) -> &[u8] {
        cast_slice(&self.records)
    }

    /// Rebuild a snapshot from raw record bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MeshPicError> {
        let size = std::mem::size_of::<ParticleRecord>();
        if bytes.len() % size != 0 {
            return Err(MeshPicError::DatasetIo(format!(
                "{} bytes is not a whole number of {size}-byte records",
                bytes.len()
            )));
        }
        let records = decode_records(bytes, bytes.len() / size).map_err(MeshPicError::DatasetIo)?;
        Ok(Self::new(records))
    }

    pub fn validate(&self) -> Result<(), MeshPicError> {
        if self.count != self.records.len() {
            return Err(MeshPicError::DatasetIo(format!(
                "count {} does not match {} records",
                self.count,
                self.records.len()
            )));
        }
        Ok(())
    }
}

impl<H: CellHash> ParticleContainer<H> {
    /// Snapshot of every stored record, ghost copies included.
    pub fn dataset(&self) -> ParticleDataset {
        let mut records = Vec::with_capacity(self.len());
        self.copy_all(&mut records);
        ParticleDataset::new(records)
    }
}

/// Snapshot of the records this rank owns (boundary and center cells), in
/// ascending key order.
pub fn owned_dataset<H: CellHash>(
    container: &ParticleContainer<H>,
    mesh: &StructuredMesh,
) -> ParticleDataset {
    let mut keys: Vec<_> = mesh
        .zone_keys(Zone::Boundary)
        .iter()
        .chain(mesh.zone_keys(Zone::Center))
        .copied()
        .collect();
    keys.sort_unstable();
    let mut records = Vec::new();
    container.copy_keys(&keys, &mut records);
    ParticleDataset::new(records)
}

/// Outcome of [`bulk_load`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkLoadReport {
    /// Records kept because they fall in an owned cell.
    pub inserted: usize,
    /// Records owned by another rank or outside the domain.
    pub skipped: usize,
    pub rehash: RehashReport,
}

/// Insert the records of `dataset` that this rank owns, then run one rehash
/// round to rebuild ghost content.
///
/// # Errors
/// `DatasetIo` for an inconsistent snapshot, `OutOfCapacity` before anything
/// is inserted, `Configuration` for a record that cannot be located, and
/// whatever the rehash round reports.
pub fn bulk_load<H, C>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    comm: &C,
    tags: HaloCommTags,
    dataset: &ParticleDataset,
) -> Result<BulkLoadReport, MeshPicError>
where
    H: CellHash,
    C: Communicator,
{
    dataset.validate()?;
    let mut mine = Vec::new();
    for p in &dataset.records {
        let key = container.hash_cell(p)?;
        if matches!(mesh.zone_of(key), Some(Zone::Boundary | Zone::Center)) {
            mine.push(*p);
        }
    }
    let skipped = dataset.count - mine.len();
    let inserted = container.insert_many(mine)?;
    container.mark_dirty();
    let rehash = rehash(container, mesh, comm, tags)?;
    log::debug!(
        "rank {}: bulk load kept {inserted} of {} records",
        mesh.rank(),
        dataset.count
    );
    Ok(BulkLoadReport {
        inserted,
        skipped,
        rehash,
    })
}

/// Little-endian `u64` count followed by the raw records.
#[derive(Copy, Clone, Debug, Default)]
pub struct RawDatasetFormat;

fn io_err(e: std::io::Error) -> MeshPicError {
    MeshPicError::DatasetIo(e.to_string())
}

impl DatasetWriter for RawDatasetFormat {
    fn write<W: Write>(
        &self,
        mut writer: W,
        dataset: &ParticleDataset,
    ) -> Result<(), MeshPicError> {
        dataset.validate()?;
        writer.write_all(&(dataset.count as u64).to_le_bytes()).map_err(io_err)?;
        writer.write_all(dataset.as_bytes()).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

impl DatasetReader for RawDatasetFormat {
    fn read<R: Read>(&self, mut reader: R) -> Result<ParticleDataset, MeshPicError> {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).map_err(io_err)?;
        let count = usize::try_from(u64::from_le_bytes(header))
            .map_err(|_| MeshPicError::DatasetIo("record count does not fit in memory".into()))?;
        let len = count
            .checked_mul(std::mem::size_of::<ParticleRecord>())
            .ok_or_else(|| MeshPicError::DatasetIo(format!("record count {count} overflows")))?;
        let mut bytes = Vec::new();
        reader.take(len as u64).read_to_end(&mut bytes).map_err(io_err)?;
        if bytes.len() != len {
            return Err(MeshPicError::DatasetIo(format!(
                "truncated dataset: {count} records announced, {} bytes present",
                bytes.len()
            )));
        }
        ParticleDataset::from_bytes(&bytes)
    }
}
