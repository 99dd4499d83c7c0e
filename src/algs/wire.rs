//! Fixed, little-endian wire types for halo exchange.
//!
//! A halo message is two frames on separate tags: a [`WireCount`] header
//! giving the number of records and the exchange round they belong to, then
//! the records themselves as raw `Pod` bytes. Record payloads are exchanged
//! between ranks of the same build, so they use native layout; only the
//! header is normalized to little-endian.

use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,     // count of following records
    pub epoch_le: u32, // exchange round of the sender
}

impl WireCount {
    /// `None` when `n` does not fit the 32-bit header.
    pub fn try_new(n: usize) -> Option<Self> {
        let n = u32::try_from(n).ok()?;
        Some(Self {
            n_le: n.to_le(),
            epoch_le: 0,
        })
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch_le = epoch.to_le();
        self
    }

    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }

    pub fn epoch(&self) -> u32 {
        u32::from_le(self.epoch_le)
    }

    pub const BYTES: usize = std::mem::size_of::<WireCount>();

    /// Decode a received header frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        expect_exact_len(bytes.len(), Self::BYTES)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

/// Decode `count` records of `T` from a received data frame. The frame may
/// be unaligned, so records are copied out.
pub fn decode_records<T: Pod>(bytes: &[u8], count: usize) -> Result<Vec<T>, String> {
    let size = std::mem::size_of::<T>();
    expect_exact_len(bytes.len(), count * size)?;
    Ok(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
}
