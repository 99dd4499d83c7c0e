#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mesh_pic::prelude::*;

pub type Particles = ParticleContainer<MeshLocator<BallisticPolicy>>;

/// Every rank of `cfg`, sharing one in-process universe.
pub struct Decomposition {
    pub universe: LocalUniverse,
    pub comms: Vec<LocalComm>,
    pub meshes: Vec<Arc<StructuredMesh>>,
    pub parts: Vec<Particles>,
}

impl Decomposition {
    pub fn new(cfg: MeshConfig) -> Self {
        Self::with_timeout(cfg, LocalUniverse::DEFAULT_TIMEOUT)
    }

    /// Like `new`, with receives giving up after `timeout`.
    pub fn with_timeout(cfg: MeshConfig, timeout: Duration) -> Self {
        let universe = LocalUniverse::with_timeout(cfg.n_ranks(), timeout);
        let comms = universe.comms();
        let meshes: Vec<Arc<StructuredMesh>> = (0..cfg.n_ranks())
            .map(|r| Arc::new(StructuredMesh::new(cfg.clone(), r).unwrap()))
            .collect();
        let parts = meshes
            .iter()
            .map(|m| ParticleContainer::new(MeshLocator::new(m.clone(), BallisticPolicy)))
            .collect();
        Self {
            universe,
            comms,
            meshes,
            parts,
        }
    }

    /// Rank owning the cell of `x`.
    pub fn owner_of(&self, x: [f64; 3]) -> usize {
        let key = self.meshes[0].id(x).unwrap();
        self.meshes
            .iter()
            .position(|m| m.index_box().contains(key.coord()))
            .expect("point outside the global box")
    }

    /// Insert `p` on the rank that owns it.
    pub fn insert(&mut self, p: ParticleRecord) {
        let r = self.owner_of(p.x);
        self.parts[r].insert(p).unwrap();
    }

    /// One rehash round on every rank, all started before any finishes.
    pub fn rehash(&mut self) -> Vec<RehashReport> {
        let tags = HaloCommTags::default();
        let pending: Vec<_> = self
            .parts
            .iter_mut()
            .zip(&self.meshes)
            .zip(&self.comms)
            .map(|((c, m), comm)| rehash_begin(c, m, comm, tags).unwrap())
            .collect();
        pending.into_iter().map(|p| p.finish().unwrap()).collect()
    }

    pub fn push(&mut self, dt: f64) {
        for (c, m) in self.parts.iter_mut().zip(&self.meshes) {
            push_owned(c, m, &BallisticPolicy, &UniformField::default(), dt);
        }
    }

    pub fn owned_total(&self) -> usize {
        self.parts
            .iter()
            .zip(&self.meshes)
            .map(|(c, m)| owned_count(c, m))
            .sum()
    }

    /// Payloads of the records rank `r` owns, sorted.
    pub fn owned_payloads(&self, r: usize) -> Vec<u64> {
        let mut out: Vec<u64> = owned_dataset_of(&self.parts[r], &self.meshes[r])
            .into_iter()
            .map(|p| p.payload)
            .collect();
        out.sort_unstable();
        out
    }
}

pub fn owned_dataset_of(c: &Particles, mesh: &StructuredMesh) -> Vec<ParticleRecord> {
    mesh_pic::io::dataset::owned_dataset(c, mesh).records
}

pub fn record(x: [f64; 3], v: [f64; 3], payload: u64) -> ParticleRecord {
    ParticleRecord::new(x, v, 1.0).with_payload(payload)
}

pub fn cell(c: [i64; 3]) -> EntityKey {
    EntityKey::cell(c).unwrap()
}
