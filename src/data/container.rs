//! Bucketed particle container: `EntityKey` (cell) -> [`Bucket`].
//!
//! The container is *well-hashed* when every record stored under key `k`
//! hashes to `k`. Insertion keeps that true; moving particles (`push`, or
//! any mutable bucket access) breaks it until the rehash engine restores it.
//! [`ContainerState`] tracks which of the two situations holds.
//!
//! Access comes in two flavours:
//! - guarded ([`ParticleContainer::at`]): a missing key is `NotFound`,
//! - unguarded ([`ParticleContainer::get_or_create`]): a missing key gets an
//!   empty bucket.
//!
//! Removal and zone-wide queries treat missing keys as empty.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::data::bucket::Bucket;
use crate::data::particle::ParticleRecord;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshPicError;
use crate::physics::policy::ParticlePolicy;
use crate::topology::entity_key::EntityKey;
use crate::topology::structured::{StructuredMesh, Zone};

/// Bucket storage without a hasher; used for scratch space during rehash.
pub type BucketMap = HashMap<EntityKey, Bucket>;

/// Maps a record to the key of the cell it belongs to.
pub trait CellHash: Send + Sync {
    fn hash_cell(&self, p: &ParticleRecord) -> Result<EntityKey, MeshPicError>;
}

impl<H: CellHash + ?Sized> CellHash for Arc<H> {
    fn hash_cell(&self, p: &ParticleRecord) -> Result<EntityKey, MeshPicError> {
        (**self).hash_cell(p)
    }
}

/// The standard hasher: project with the policy, locate with the mesh.
#[derive(Clone, Debug)]
pub struct MeshLocator<P> {
    mesh: Arc<StructuredMesh>,
    policy: P,
}

impl<P: ParticlePolicy> MeshLocator<P> {
    pub fn new(mesh: Arc<StructuredMesh>, policy: P) -> Self {
        Self { mesh, policy }
    }

    pub fn mesh(&self) -> &StructuredMesh {
        &self.mesh
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl<P: ParticlePolicy> CellHash for MeshLocator<P> {
    #[inline]
    fn hash_cell(&self, p: &ParticleRecord) -> Result<EntityKey, MeshPicError> {
        self.mesh.id(self.policy.project(p))
    }
}

/// Consistency state of bucket assignment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    /// Positions may have changed since the last rehash.
    Dirty,
    /// A rehash round has merged local content and waits on its exchange.
    Migrating,
    /// Every record sits under its own cell key.
    Reconciled,
}

#[derive(Clone, Debug)]
pub struct ParticleContainer<H> {
    buckets: BucketMap,
    hasher: H,
    capacity: Option<usize>,
    /// Cached total; `None` after unguarded mutable access.
    count: Option<usize>,
    state: ContainerState,
    /// Halo rounds started on this container, failed ones included.
    exchange_round: u32,
}

impl<H: CellHash> ParticleContainer<H> {
    pub fn new(hasher: H) -> Self {
        Self {
            buckets: BucketMap::new(),
            hasher,
            capacity: None,
            count: Some(0),
            state: ContainerState::Reconciled,
            exchange_round: 0,
        }
    }

    /// Container that refuses to hold more than `capacity` records.
    pub fn with_capacity_limit(hasher: H, capacity: usize) -> Self {
        let mut c = Self::new(hasher);
        c.capacity = Some(capacity);
        c
    }

    #[inline]
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[inline]
    pub fn state(&self) -> ContainerState {
        self.state
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: ContainerState) {
        self.state = state;
    }

    /// Number of the last halo round run on this container.
    #[inline]
    pub fn exchange_round(&self) -> u32 {
        self.exchange_round
    }

    /// Advance to the next halo round and return its number. Every attempt
    /// advances, so ranks that run the same sequence of rounds agree.
    pub(crate) fn next_exchange_round(&mut self) -> u32 {
        self.exchange_round = self.exchange_round.wrapping_add(1);
        self.exchange_round
    }

    /// Flag that positions changed outside the container's knowledge.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.state = ContainerState::Dirty;
    }

    #[inline]
    pub fn hash_cell(&self, p: &ParticleRecord) -> Result<EntityKey, MeshPicError> {
        self.hasher.hash_cell(p)
    }

    fn recount(&mut self) -> usize {
        match self.count {
            Some(n) => n,
            None => {
                let n = self.buckets.values().map(Bucket::len).sum();
                self.count = Some(n);
                n
            }
        }
    }

    fn check_capacity(&mut self, additional: usize) -> Result<(), MeshPicError> {
        if let Some(cap) = self.capacity {
            let requested = self.recount() + additional;
            if requested > cap {
                return Err(MeshPicError::OutOfCapacity {
                    requested,
                    capacity: cap,
                });
            }
        }
        Ok(())
    }

    /// Remaining room before the capacity limit, `None` when unlimited.
    pub fn remaining_capacity(&mut self) -> Option<usize> {
        let cap = self.capacity?;
        Some(cap.saturating_sub(self.recount()))
    }

    /// Place `p` under its own cell key, creating the bucket if needed.
    pub fn insert(&mut self, p: ParticleRecord) -> Result<EntityKey, MeshPicError> {
        self.check_capacity(1)?;
        let key = self.hasher.hash_cell(&p)?;
        self.buckets.entry(key).or_default().push(p);
        if let Some(n) = self.count.as_mut() {
            *n += 1;
        }
        Ok(key)
    }

    /// Insert a batch, all or nothing with respect to capacity. Hashing
    /// errors stop the batch; records before the failing one stay inserted.
    pub fn insert_many<I>(&mut self, records: I) -> Result<usize, MeshPicError>
    where
        I: IntoIterator<Item = ParticleRecord>,
    {
        let records: Vec<ParticleRecord> = records.into_iter().collect();
        self.check_capacity(records.len())?;
        let n = records.len();
        for p in records {
            let key = self.hasher.hash_cell(&p)?;
            self.buckets.entry(key).or_default().push(p);
            if let Some(c) = self.count.as_mut() {
                *c += 1;
            }
        }
        Ok(n)
    }

    /// Guarded lookup.
    pub fn at(&self, key: EntityKey) -> Result<&Bucket, MeshPicError> {
        self.buckets.get(&key).ok_or(MeshPicError::NotFound(key))
    }

    /// Guarded mutable lookup. Marks the container dirty.
    pub fn at_mut(&mut self, key: EntityKey) -> Result<&mut Bucket, MeshPicError> {
        match self.buckets.get_mut(&key) {
            Some(b) => {
                self.state = ContainerState::Dirty;
                self.count = None;
                Ok(b)
            }
            None => Err(MeshPicError::NotFound(key)),
        }
    }

    #[inline]
    pub fn get(&self, key: EntityKey) -> Option<&Bucket> {
        self.buckets.get(&key)
    }

    /// Unguarded access: creates an empty bucket for an unseen key. Marks the
    /// container dirty since the caller may put anything in it.
    pub fn get_or_create(&mut self, key: EntityKey) -> &mut Bucket {
        self.state = ContainerState::Dirty;
        self.count = None;
        self.buckets.entry(key).or_default()
    }

    #[inline]
    pub fn contains_key(&self, key: EntityKey) -> bool {
        self.buckets.contains_key(&key)
    }

    /// Remove one bucket; returns how many records it held (0 when absent).
    pub fn erase(&mut self, key: EntityKey) -> usize {
        let removed = self.buckets.remove(&key).map_or(0, |b| b.len());
        if let Some(n) = self.count.as_mut() {
            *n -= removed;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.count = Some(0);
        self.state = ContainerState::Reconciled;
    }

    /// Records under `key` (0 when absent).
    #[inline]
    pub fn size(&self, key: EntityKey) -> usize {
        self.buckets.get(&key).map_or(0, Bucket::len)
    }

    /// Records over all buckets.
    pub fn len(&self) -> usize {
        match self.count {
            Some(n) => n,
            None => self.buckets.values().map(Bucket::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets, including empty ones.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.buckets.keys().copied()
    }

    /// Keys in ascending order.
    pub fn sorted_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.keys().collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &Bucket)> + '_ {
        self.buckets.iter().map(|(k, b)| (*k, b))
    }

    /// Mutable iteration over every bucket. Marks the container dirty.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityKey, &mut Bucket)> + '_ {
        self.state = ContainerState::Dirty;
        self.count = None;
        self.buckets.iter_mut().map(|(k, b)| (*k, b))
    }

    /// Append the records of one bucket to `out`; returns how many.
    pub fn copy_key(&self, key: EntityKey, out: &mut Vec<ParticleRecord>) -> usize {
        match self.buckets.get(&key) {
            Some(b) => {
                out.extend(b.iter().copied());
                b.len()
            }
            None => 0,
        }
    }

    /// Append the records of every listed key (e.g. a zone) to `out`.
    pub fn copy_keys(&self, keys: &[EntityKey], out: &mut Vec<ParticleRecord>) -> usize {
        keys.iter().map(|k| self.copy_key(*k, out)).sum()
    }

    /// Append the records of one zone of `mesh` to `out`.
    pub fn copy_zone(
        &self,
        mesh: &StructuredMesh,
        zone: Zone,
        out: &mut Vec<ParticleRecord>,
    ) -> usize {
        self.copy_keys(mesh.zone_keys(zone), out)
    }

    /// Append every record to `out`, buckets in ascending key order.
    pub fn copy_all(&self, out: &mut Vec<ParticleRecord>) -> usize {
        self.sorted_keys().into_iter().map(|k| self.copy_key(k, out)).sum()
    }

    /// Move all records of `other[key]` to the end of `self[key]`.
    ///
    /// Whatever non-empty content `other` holds under `key` is spliced, and
    /// the key is removed from `other`; merging again is a no-op.
    pub fn merge<H2: CellHash>(
        &mut self,
        key: EntityKey,
        other: &mut ParticleContainer<H2>,
    ) -> usize {
        match other.take_bucket(key) {
            Some(b) => self.merge_bucket(key, b),
            None => 0,
        }
    }

    /// Merge every bucket of `other` into `self`.
    pub fn merge_all<H2: CellHash>(&mut self, other: &mut ParticleContainer<H2>) -> usize {
        let keys: Vec<EntityKey> = other.keys().collect();
        keys.into_iter().map(|k| self.merge(k, other)).sum()
    }

    /// Splice a detached bucket under `key`; empty buckets are ignored.
    pub(crate) fn merge_bucket(&mut self, key: EntityKey, mut bucket: Bucket) -> usize {
        let n = bucket.len();
        if n == 0 {
            return 0;
        }
        self.buckets.entry(key).or_default().splice(&mut bucket);
        if let Some(c) = self.count.as_mut() {
            *c += n;
        }
        n
    }

    /// Detach a bucket from the container.
    pub fn take_bucket(&mut self, key: EntityKey) -> Option<Bucket> {
        let b = self.buckets.remove(&key)?;
        if let Some(c) = self.count.as_mut() {
            *c -= b.len();
        }
        Some(b)
    }

    /// Sum of `f` over the records under `key`; 0 for an absent key.
    pub fn integral<F>(&self, key: EntityKey, f: F) -> f64
    where
        F: Fn(&ParticleRecord) -> f64,
    {
        self.buckets.get(&key).map_or(0.0, |b| b.iter().map(&f).sum())
    }

    /// Total weight under `key`.
    pub fn weight(&self, key: EntityKey) -> f64 {
        self.integral(key, |p| p.w)
    }

    /// First record found under a key other than its own cell, if any.
    pub fn find_misplaced(&self) -> Result<Option<(EntityKey, EntityKey)>, MeshPicError> {
        for (k, b) in &self.buckets {
            for p in b {
                let h = self.hasher.hash_cell(p)?;
                if h != *k {
                    return Ok(Some((*k, h)));
                }
            }
        }
        Ok(None)
    }

    /// `true` when every record sits under its own cell key.
    pub fn is_well_hashed(&self) -> bool {
        matches!(self.find_misplaced(), Ok(None))
    }
}

impl<H: CellHash> DebugInvariants for ParticleContainer<H> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ParticleContainer");
    }

    fn validate_invariants(&self) -> Result<(), MeshPicError> {
        if let Some(n) = self.count {
            let actual: usize = self.buckets.values().map(Bucket::len).sum();
            if n != actual {
                return Err(MeshPicError::InvariantViolation(format!(
                    "cached count {n} differs from stored records {actual}"
                )));
            }
        }
        if let Some(cap) = self.capacity {
            if self.len() > cap {
                return Err(MeshPicError::InvariantViolation(format!(
                    "{} records exceed capacity {cap}",
                    self.len()
                )));
            }
        }
        if self.state == ContainerState::Reconciled {
            if let Some((stored, actual)) = self.find_misplaced()? {
                return Err(MeshPicError::InvariantViolation(format!(
                    "record under {stored:?} belongs to {actual:?}"
                )));
            }
        }
        Ok(())
    }
}
