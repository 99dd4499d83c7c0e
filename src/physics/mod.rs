//! Particle physics capabilities and zone-wide kernels.

pub mod policy;
pub mod push;

pub use policy::{
    BallisticPolicy, BorisPolicy, FieldProbe, FieldSample, ParticlePolicy, UniformField,
};
