//! Re-export public algorithms.

pub mod communicator;
pub mod exchange;
pub mod generator;
pub mod halo;
pub mod rehash;
pub mod wire;

pub use generator::generate;
pub use halo::sync_ghosts;
pub use rehash::{rehash, rehash_begin, rehash_local};
