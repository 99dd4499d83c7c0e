//! Particle physics policies.
//!
//! A policy is the capability object the rehash engine and the generator are
//! handed: it advances a record (`push`), tells where a record sits
//! (`project`) and builds a record from phase-space values (`lift`).
//! Field values come from an external [`FieldProbe`].

use std::sync::Arc;

use crate::data::particle::ParticleRecord;

/// Electric and magnetic field at a point.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FieldSample {
    pub e: [f64; 3],
    pub b: [f64; 3],
}

/// Source of field values for the pusher (interpolated mesh fields in a
/// full code).
pub trait FieldProbe: Sync {
    fn sample(&self, x: [f64; 3]) -> FieldSample;
}

/// Spatially constant field.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UniformField(pub FieldSample);

impl FieldProbe for UniformField {
    #[inline]
    fn sample(&self, _x: [f64; 3]) -> FieldSample {
        self.0
    }
}

pub trait ParticlePolicy: Send + Sync {
    /// Advance one record by `dt` under `fields`.
    fn push(&self, p: &mut ParticleRecord, fields: &FieldSample, dt: f64);

    /// Spatial coordinate used to bucket the record.
    fn project(&self, p: &ParticleRecord) -> [f64; 3];

    /// Build a record from position, velocity and weight.
    fn lift(&self, x: [f64; 3], v: [f64; 3], w: f64) -> ParticleRecord;
}

impl<P: ParticlePolicy + ?Sized> ParticlePolicy for &P {
    fn push(&self, p: &mut ParticleRecord, fields: &FieldSample, dt: f64) {
        (**self).push(p, fields, dt)
    }
    fn project(&self, p: &ParticleRecord) -> [f64; 3] {
        (**self).project(p)
    }
    fn lift(&self, x: [f64; 3], v: [f64; 3], w: f64) -> ParticleRecord {
        (**self).lift(x, v, w)
    }
}

impl<P: ParticlePolicy + ?Sized> ParticlePolicy for Arc<P> {
    fn push(&self, p: &mut ParticleRecord, fields: &FieldSample, dt: f64) {
        (**self).push(p, fields, dt)
    }
    fn project(&self, p: &ParticleRecord) -> [f64; 3] {
        (**self).project(p)
    }
    fn lift(&self, x: [f64; 3], v: [f64; 3], w: f64) -> ParticleRecord {
        (**self).lift(x, v, w)
    }
}

/// Free streaming, fields ignored.
#[derive(Copy, Clone, Debug, Default)]
pub struct BallisticPolicy;

impl ParticlePolicy for BallisticPolicy {
    fn push(&self, p: &mut ParticleRecord, _fields: &FieldSample, dt: f64) {
        for a in 0..3 {
            p.x[a] += p.v[a] * dt;
        }
    }

    fn project(&self, p: &ParticleRecord) -> [f64; 3] {
        p.x
    }

    fn lift(&self, x: [f64; 3], v: [f64; 3], w: f64) -> ParticleRecord {
        ParticleRecord::new(x, v, w)
    }
}

/// Non-relativistic Boris pusher for a species with charge-to-mass ratio
/// `q_over_m`.
#[derive(Copy, Clone, Debug)]
pub struct BorisPolicy {
    pub q_over_m: f64,
}

impl BorisPolicy {
    pub fn new(q_over_m: f64) -> Self {
        Self { q_over_m }
    }
}

#[inline]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

impl ParticlePolicy for BorisPolicy {
    fn push(&self, p: &mut ParticleRecord, fields: &FieldSample, dt: f64) {
        let h = 0.5 * self.q_over_m * dt;
        let mut v_minus = p.v;
        for a in 0..3 {
            v_minus[a] += h * fields.e[a];
        }
        let t = fields.b.map(|b| h * b);
        let t2: f64 = t.iter().map(|c| c * c).sum();
        let s = t.map(|c| 2.0 * c / (1.0 + t2));
        let vt = cross(v_minus, t);
        let v_prime = [v_minus[0] + vt[0], v_minus[1] + vt[1], v_minus[2] + vt[2]];
        let vs = cross(v_prime, s);
        for a in 0..3 {
            p.v[a] = v_minus[a] + vs[a] + h * fields.e[a];
            p.x[a] += p.v[a] * dt;
        }
    }

    fn project(&self, p: &ParticleRecord) -> [f64; 3] {
        p.x
    }

    fn lift(&self, x: [f64; 3], v: [f64; 3], w: f64) -> ParticleRecord {
        ParticleRecord::new(x, v, w)
    }
}
