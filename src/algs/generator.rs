//! Initial particle populations.
//!
//! Each owned cell receives `per_cell` records: positions uniform in the
//! cell, velocities Maxwellian around `drift` with spread
//! `thermal_velocity`, equal weights summing to `density * cell_volume`.
//! Every cell draws from its own generator seeded by the run seed and the
//! cell key, so the population does not depend on the decomposition or on
//! the order cells are visited.
//!
//! Boundary cells are filled first and shipped to the neighbours as ghost
//! copies while the center cells are being filled.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::algs::communicator::Communicator;
use crate::algs::exchange::HaloCommTags;
use crate::algs::halo::{SendScope, append_received, start_halo_round};
use crate::data::container::{CellHash, ParticleContainer};
use crate::data::particle::ParticleRecord;
use crate::mesh_error::MeshPicError;
use crate::physics::policy::ParticlePolicy;
use crate::topology::entity_key::EntityKey;
use crate::topology::structured::{StructuredMesh, Zone};

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Records per owned cell.
    pub per_cell: usize,
    /// Physical density; total weight of a cell is `density * cell_volume`.
    pub density: f64,
    /// Standard deviation of each velocity component.
    pub thermal_velocity: f64,
    /// Mean velocity.
    pub drift: [f64; 3],
    pub seed: u64,
    /// Copied into every generated record.
    pub payload: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            per_cell: 8,
            density: 1.0,
            thermal_velocity: 0.0,
            drift: [0.0; 3],
            seed: 0x5eed,
            payload: 0,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), MeshPicError> {
        if !(self.density.is_finite() && self.density >= 0.0) {
            return Err(MeshPicError::Configuration(format!(
                "density must be finite and non-negative (got {})",
                self.density
            )));
        }
        if !(self.thermal_velocity.is_finite() && self.thermal_velocity >= 0.0) {
            return Err(MeshPicError::Configuration(format!(
                "thermal velocity must be finite and non-negative (got {})",
                self.thermal_velocity
            )));
        }
        if self.drift.iter().any(|d| !d.is_finite()) {
            return Err(MeshPicError::Configuration("drift must be finite".into()));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Records created in owned cells.
    pub generated: usize,
    /// Ghost copies received from neighbours.
    pub ghosts: usize,
}

/// splitmix64 finalizer: spreads neighbouring keys over the seed space.
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Standard normal deviate (Box-Muller).
fn normal(rng: &mut SmallRng) -> f64 {
    let u1 = 1.0 - rng.r#gen::<f64>();
    let u2 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Records of one cell, deterministic in `(cfg.seed, key)`.
pub fn generate_cell<P: ParticlePolicy + ?Sized>(
    mesh: &StructuredMesh,
    policy: &P,
    key: EntityKey,
    cfg: &GeneratorConfig,
) -> Result<Vec<ParticleRecord>, MeshPicError> {
    if cfg.per_cell == 0 {
        return Ok(Vec::new());
    }
    let mut rng = SmallRng::seed_from_u64(cfg.seed ^ mix(key.raw()));
    let (lo, hi) = mesh.cell_extent(key);
    let w = cfg.density * mesh.cell_volume() / cfg.per_cell as f64;
    let mut out = Vec::with_capacity(cfg.per_cell);
    for _ in 0..cfg.per_cell {
        let mut x = lo;
        for a in 0..mesh.ndims() {
            x[a] = lo[a] + rng.r#gen::<f64>() * (hi[a] - lo[a]);
        }
        // rounding can land exactly on the upper face
        if mesh.id(x)? != key {
            x = mesh.point(key);
        }
        let mut v = cfg.drift;
        for c in v.iter_mut() {
            *c += cfg.thermal_velocity * normal(&mut rng);
        }
        out.push(policy.lift(x, v, w).with_payload(cfg.payload));
    }
    Ok(out)
}

fn fill_zone<H, P>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    policy: &P,
    zone: Zone,
    cfg: &GeneratorConfig,
) -> Result<usize, MeshPicError>
where
    H: CellHash,
    P: ParticlePolicy + ?Sized,
{
    let mut n = 0;
    for &key in mesh.zone_keys(zone) {
        n += container.insert_many(generate_cell(mesh, policy, key, cfg)?)?;
    }
    Ok(n)
}

/// Ghost cells that mirror an owned cell somewhere in the decomposition,
/// so receive a full population of copies.
fn mirrored_ghost_cells(mesh: &StructuredMesh) -> usize {
    let global = mesh.global_box();
    let periodic = mesh.config().periodic;
    mesh.zone_keys(Zone::Ghost)
        .iter()
        .filter(|k| {
            let c = k.coord();
            (0..3).all(|a| periodic[a] || (global.lo[a]..global.hi[a]).contains(&c[a]))
        })
        .count()
}

/// Populate the owned cells of `mesh` and fill the ghost cells with the
/// neighbours' boundary populations. Previous ghost content is replaced.
///
/// # Errors
/// `OutOfCapacity` before anything is generated when the container cannot
/// hold the owned population plus the ghost copies it will receive;
/// `TransferError` from the ghost round.
pub fn generate<H, P, C>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    policy: &P,
    comm: &C,
    tags: HaloCommTags,
    cfg: &GeneratorConfig,
) -> Result<GenerationReport, MeshPicError>
where
    H: CellHash,
    P: ParticlePolicy + ?Sized,
    C: Communicator,
{
    // numbered before any early return so peers stay in step
    let epoch = container.next_exchange_round();
    cfg.validate()?;
    let owned_cells = mesh.index_box().volume();
    let total = cfg.per_cell * (owned_cells + mirrored_ghost_cells(mesh));
    let old_ghosts: usize = mesh.zone_keys(Zone::Ghost).iter().map(|&k| container.size(k)).sum();
    if let Some(room) = container.remaining_capacity() {
        if total > room + old_ghosts {
            let capacity = container.capacity().unwrap_or(room);
            return Err(MeshPicError::OutOfCapacity {
                requested: container.len() - old_ghosts + total,
                capacity,
            });
        }
    }
    for &k in mesh.zone_keys(Zone::Ghost) {
        container.erase(k);
    }

    let mut generated = fill_zone(container, mesh, policy, Zone::Boundary, cfg)?;
    let round = start_halo_round(&*container, mesh, comm, tags, SendScope::GhostRefresh, epoch)?;
    generated += fill_zone(container, mesh, policy, Zone::Center, cfg)?;
    let received = round.wait()?;
    let ghosts = append_received(container, received)?;

    log::debug!(
        "rank {}: generated {generated} records over {owned_cells} cells, {ghosts} ghost copies",
        mesh.rank()
    );
    Ok(GenerationReport { generated, ghosts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalUniverse;
    use crate::data::container::MeshLocator;
    use crate::physics::policy::BallisticPolicy;
    use crate::topology::structured::MeshConfig;
    use std::sync::Arc;

    fn mesh_2d() -> Arc<StructuredMesh> {
        let cfg = MeshConfig {
            ndims: 2,
            global_cells: [3, 2, 1],
            dx: [0.5, 2.0, 1.0],
            ..Default::default()
        };
        Arc::new(StructuredMesh::serial(cfg).unwrap())
    }

    #[test]
    fn cell_population_is_deterministic_and_inside() {
        let mesh = mesh_2d();
        let cfg = GeneratorConfig {
            per_cell: 16,
            density: 3.0,
            thermal_velocity: 1.0,
            ..Default::default()
        };
        let key = EntityKey::cell([2, 1, 0]).unwrap();
        let a = generate_cell(&mesh, &BallisticPolicy, key, &cfg).unwrap();
        let b = generate_cell(&mesh, &BallisticPolicy, key, &cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        for p in &a {
            assert_eq!(mesh.id(p.x).unwrap(), key);
            assert!((p.w - 3.0 * 1.0 / 16.0).abs() < 1e-12);
        }
        let next = EntityKey::cell([1, 1, 0]).unwrap();
        let other = generate_cell(&mesh, &BallisticPolicy, next, &cfg).unwrap();
        assert_ne!(a[0].x, other[0].x);
    }

    #[test]
    fn cold_population_has_drift_velocity() {
        let mesh = mesh_2d();
        let cfg = GeneratorConfig {
            per_cell: 4,
            drift: [1.0, -2.0, 0.5],
            payload: 3,
            ..Default::default()
        };
        let key = EntityKey::cell([0, 0, 0]).unwrap();
        for p in generate_cell(&mesh, &BallisticPolicy, key, &cfg).unwrap() {
            assert_eq!(p.v, [1.0, -2.0, 0.5]);
            assert_eq!(p.payload, 3);
        }
    }

    #[test]
    fn capacity_is_checked_up_front() {
        let mesh = mesh_2d();
        let locator = MeshLocator::new(mesh.clone(), BallisticPolicy);
        let mut c = ParticleContainer::with_capacity_limit(locator, 10);
        let cfg = GeneratorConfig {
            per_cell: 2,
            ..Default::default()
        };
        let u = LocalUniverse::new(1);
        let tags = HaloCommTags::default();
        let err = generate(&mut c, &mesh, &BallisticPolicy, &u.comm(0), tags, &cfg).unwrap_err();
        assert_eq!(
            err,
            MeshPicError::OutOfCapacity {
                requested: 12,
                capacity: 10
            }
        );
        assert!(c.is_empty());
    }

    #[test]
    fn capacity_check_counts_incoming_ghost_copies() {
        let mesh = Arc::new(
            StructuredMesh::serial(MeshConfig {
                ndims: 1,
                global_cells: [4, 1, 1],
                periodic: [true, false, false],
                ..Default::default()
            })
            .unwrap(),
        );
        assert_eq!(mirrored_ghost_cells(&mesh), 2);
        let cfg = GeneratorConfig {
            per_cell: 2,
            ..Default::default()
        };
        let u = LocalUniverse::new(1);
        let tags = HaloCommTags::default();

        // the 8 owned records fit, the 4 ghost copies would not
        let locator = MeshLocator::new(mesh.clone(), BallisticPolicy);
        let mut small = ParticleContainer::with_capacity_limit(locator, 10);
        let err =
            generate(&mut small, &mesh, &BallisticPolicy, &u.comm(0), tags, &cfg).unwrap_err();
        assert_eq!(
            err,
            MeshPicError::OutOfCapacity {
                requested: 12,
                capacity: 10
            }
        );
        assert!(small.is_empty());

        let locator = MeshLocator::new(mesh.clone(), BallisticPolicy);
        let mut exact = ParticleContainer::with_capacity_limit(locator, 12);
        let report = generate(&mut exact, &mesh, &BallisticPolicy, &u.comm(0), tags, &cfg).unwrap();
        assert_eq!((report.generated, report.ghosts), (8, 4));
        // a second run replaces the ghost copies instead of adding to them
        let err =
            generate(&mut exact, &mesh, &BallisticPolicy, &u.comm(0), tags, &cfg).unwrap_err();
        assert!(matches!(err, MeshPicError::OutOfCapacity { requested: 20, .. }));
        assert_eq!(exact.len(), 12);
    }

    #[test]
    fn rejects_negative_density() {
        let cfg = GeneratorConfig {
            density: -1.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(MeshPicError::Configuration(_))));
    }
}
