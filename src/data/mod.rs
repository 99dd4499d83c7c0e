//! Data module: particle records, buckets and the bucketed container

pub mod bucket;
pub mod container;
pub mod particle;

pub use bucket::Bucket;
pub use container::{BucketMap, CellHash, ContainerState, MeshLocator, ParticleContainer};
pub use particle::ParticleRecord;
