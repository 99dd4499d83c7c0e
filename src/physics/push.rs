//! Zone-wide particle kernels: advancing records and depositing moments.
//!
//! Kernels address buckets by key; a key with no bucket contributes
//! nothing.

use crate::data::container::{CellHash, ParticleContainer};
use crate::physics::policy::{FieldProbe, ParticlePolicy};
use crate::topology::entity_key::EntityKey;
use crate::topology::structured::{StructuredMesh, Zone};

/// Advance every record stored under `keys` by `dt`. Returns how many
/// records were pushed. Leaves the container `Dirty`.
pub fn push_keys<H, P, F>(
    container: &mut ParticleContainer<H>,
    keys: &[EntityKey],
    policy: &P,
    fields: &F,
    dt: f64,
) -> usize
where
    H: CellHash,
    P: ParticlePolicy + ?Sized,
    F: FieldProbe + ?Sized,
{
    let mut pushed = 0;
    container.mark_dirty();
    for &key in keys {
        let Ok(bucket) = container.at_mut(key) else {
            continue;
        };
        for p in bucket.iter_mut() {
            let sample = fields.sample(policy.project(p));
            policy.push(p, &sample, dt);
            pushed += 1;
        }
    }
    pushed
}

/// Advance the records this rank owns (boundary and center zones). Ghost
/// records are copies owned elsewhere and are left untouched.
pub fn push_owned<H, P, F>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    policy: &P,
    fields: &F,
    dt: f64,
) -> usize
where
    H: CellHash,
    P: ParticlePolicy + ?Sized,
    F: FieldProbe + ?Sized,
{
    let mut pushed = push_keys(container, mesh.zone_keys(Zone::Boundary), policy, fields, dt);
    pushed += push_keys(container, mesh.zone_keys(Zone::Center), policy, fields, dt);
    log::trace!("rank {}: pushed {pushed} records", mesh.rank());
    pushed
}

/// Nearest-grid-point weight density over the memory box, laid out by
/// [`StructuredMesh::memory_offset`]. Records under keys outside the memory
/// box are ignored.
pub fn deposit_weights<H: CellHash>(
    container: &ParticleContainer<H>,
    mesh: &StructuredMesh,
) -> Vec<f64> {
    let mut rho = vec![0.0; mesh.memory_box().volume()];
    let inv_vol = 1.0 / mesh.cell_volume();
    for (key, _) in container.iter() {
        if let Some(off) = mesh.memory_offset(key) {
            rho[off] += container.weight(key) * inv_vol;
        }
    }
    rho
}

/// Records stored in the owned zones (boundary and center).
pub fn owned_count<H: CellHash>(container: &ParticleContainer<H>, mesh: &StructuredMesh) -> usize {
    [Zone::Boundary, Zone::Center]
        .iter()
        .flat_map(|z| mesh.zone_keys(*z))
        .map(|k| container.size(*k))
        .sum()
}
