#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-pic
//!
//! mesh-pic is the particle substrate of a particle-in-cell code on structured, block-decomposed meshes. It stores a variable number of particle records per mesh cell, keeps that storage consistent as particles move, and exchanges particles with neighbouring sub-domains in a distributed run.
//!
//! ## Features
//! - Bit-packed [`EntityKey`](topology::EntityKey) addressing cells and their vertices, edges and faces, with neighbour arithmetic and `dual`/`rotate` operators
//! - Bucketed [`ParticleContainer`](data::ParticleContainer) with O(1) bucket splicing
//! - Two-phase rehash that overlaps local migration with the halo exchange
//! - Pluggable communication backends (serial, in-process, MPI) passed explicitly, no process-wide state
//! - Deterministic per-cell population generator
//! - Unit, integration and property-based tests
//!
//! ## Determinism
//!
//! The generator seeds one `SmallRng` per cell from the configured seed and the cell key, so a
//! population does not depend on the decomposition. Rehash with the `rayon` feature produces the
//! same container as the serial path.
//!
//! ## Usage
//! Add `mesh-pic` as a dependency in your `Cargo.toml` and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! mesh-pic = "0.1"
//! # Optional features:
//! # features = ["mpi-support","rayon","check-invariants"]
//! ```
//!
//! One time step on rank `r` of an in-process universe:
//!
//! ```
//! use std::sync::Arc;
//! use mesh_pic::prelude::*;
//!
//! let cfg = MeshConfig { ndims: 2, global_cells: [8, 8, 1], periodic: [true, true, false], ..Default::default() };
//! let mesh = Arc::new(StructuredMesh::serial(cfg).unwrap());
//! let comm = LocalComm::solo();
//! let mut particles = ParticleContainer::new(MeshLocator::new(mesh.clone(), BallisticPolicy));
//! let gen_cfg = GeneratorConfig { per_cell: 4, thermal_velocity: 0.3, ..Default::default() };
//! generate(&mut particles, &mesh, &BallisticPolicy, &comm, HaloCommTags::default(), &gen_cfg).unwrap();
//!
//! push_owned(&mut particles, &mesh, &BallisticPolicy, &UniformField::default(), 0.5);
//! let report = rehash(&mut particles, &mesh, &comm, HaloCommTags::default()).unwrap();
//! assert_eq!(owned_count(&particles, &mesh), 8 * 8 * 4);
//! assert!(particles.is_well_hashed());
//! # let _ = report;
//! ```

//! Public prelude for mesh-pic: particle storage and migration for PIC codes

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod io;
pub mod mesh_error;
pub mod physics;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use mesh_error::MeshPicError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{
        CommTag, Communicator, LocalComm, LocalUniverse, NoComm, Wait,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::exchange::{ExchangeChannel, HaloCommTags};
    pub use crate::algs::generator::{GeneratorConfig, generate};
    pub use crate::algs::halo::sync_ghosts;
    pub use crate::algs::rehash::{PendingRehash, RehashReport, rehash, rehash_begin, rehash_local};
    pub use crate::data::bucket::Bucket;
    pub use crate::data::container::{CellHash, ContainerState, MeshLocator, ParticleContainer};
    pub use crate::data::particle::ParticleRecord;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::io::{DatasetReader, DatasetWriter, ParticleDataset, RawDatasetFormat, bulk_load};
    pub use crate::mesh_error::MeshPicError;
    pub use crate::physics::policy::{
        BallisticPolicy, BorisPolicy, FieldProbe, FieldSample, ParticlePolicy, UniformField,
    };
    pub use crate::physics::push::{deposit_weights, owned_count, push_owned};
    pub use crate::topology::direction::Direction;
    pub use crate::topology::entity_key::{EntityKey, EntityTag};
    pub use crate::topology::index_box::IndexBox;
    pub use crate::topology::structured::{MeshConfig, StructuredMesh, Zone};
}
