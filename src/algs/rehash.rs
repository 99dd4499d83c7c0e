//! Local migration: restore the well-hashed invariant after particles moved.
//!
//! A round runs in a fixed order:
//! 1. drain the boundary zone into a scratch map, partitioned by each
//!    record's current cell,
//! 2. start a halo round from that scratch (boundary copies plus records
//!    that crossed into ghost cells),
//! 3. drain the ghost zone, the center zone and any stray key (outside the
//!    memory box, or not a cell key) into the same scratch,
//! 4. merge scratch back for boundary and center keys; ghost keys filled by
//!    steps 1-2 are dropped (shipped or about to be replaced), ghost keys
//!    first filled in step 3 missed the halo round and are lost, as are
//!    keys outside the memory box,
//! 5. wait for the halo round and insert what arrived.
//!
//! Steps 1-4 happen in [`rehash_begin`], step 5 in [`PendingRehash::finish`],
//! so the caller may overlap the exchange with other work or drive several
//! in-process sub-domains from one thread.
//!
//! Records that stay in their cell keep their relative order. Records that
//! change cell are appended to the destination with no order promised.
//!
//! Failure handling: a hash failure in the boundary pass, or a failure to
//! start the halo round, aborts before anything is sent. Every record taken
//! so far goes back into the container, which stays `Dirty`. Later failures
//! cannot stop the already started round; they are reported by `finish`
//! after the round completed, again leaving the container `Dirty`. A
//! pending round dropped without `finish` also leaves it `Dirty`.

use crate::algs::communicator::{Communicator, LocalComm};
use crate::algs::exchange::HaloCommTags;
use crate::algs::halo::{HaloRound, SendScope, append_received_partial, start_halo_round};
use crate::data::bucket::Bucket;
use crate::data::container::{BucketMap, CellHash, ContainerState, ParticleContainer};
use crate::data::particle::ParticleRecord;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshPicError;
use crate::topology::entity_key::{EntityKey, EntityTag};
use crate::topology::structured::{StructuredMesh, Zone};

/// Record counts of one rehash round.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RehashReport {
    /// Records taken out of the container and re-hashed.
    pub examined: usize,
    /// Examined records whose cell changed.
    pub migrated: usize,
    /// Records posted to neighbours (migrants and boundary copies).
    pub sent: usize,
    /// Records inserted from neighbours.
    pub received: usize,
    /// Ghost-cell content discarded before the refresh.
    pub dropped_ghost: usize,
    /// Records that left the memory box, or reached a ghost cell after the
    /// halo round was started, and had nowhere to go.
    pub lost: usize,
}

struct CellScan {
    key: EntityKey,
    stay: Bucket,
    movers: Vec<(EntityKey, ParticleRecord)>,
}

struct ScanFailure {
    key: EntityKey,
    error: MeshPicError,
    /// Every record of the cell, nothing dropped.
    bucket: Bucket,
}

/// Re-hash every record of one detached bucket.
fn scan_cell<H: CellHash + ?Sized>(
    hasher: &H,
    key: EntityKey,
    mut bucket: Bucket,
) -> Result<CellScan, ScanFailure> {
    let mut stay = Bucket::new();
    let mut movers = Vec::new();
    while let Some(p) = bucket.pop_front() {
        match hasher.hash_cell(&p) {
            Ok(dest) if dest == key => stay.push(p),
            Ok(dest) => movers.push((dest, p)),
            Err(error) => {
                bucket.push_front(p);
                stay.splice(&mut bucket);
                stay.extend(movers.into_iter().map(|(_, p)| p));
                return Err(ScanFailure {
                    key,
                    error,
                    bucket: stay,
                });
            }
        }
    }
    Ok(CellScan { key, stay, movers })
}

type ScanResults = Vec<Result<CellScan, ScanFailure>>;

#[cfg(feature = "rayon")]
fn scan_all<H: CellHash>(hasher: &H, taken: Vec<(EntityKey, Bucket)>) -> ScanResults {
    use rayon::prelude::*;
    // indexed collect keeps zone order, so the outcome matches the serial path
    taken
        .into_par_iter()
        .map(|(k, b)| scan_cell(hasher, k, b))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn scan_all<H: CellHash>(hasher: &H, taken: Vec<(EntityKey, Bucket)>) -> ScanResults {
    taken
        .into_iter()
        .map(|(k, b)| scan_cell(hasher, k, b))
        .collect()
}

/// Move the buckets under `keys` out of `container` and into `scratch`, by
/// destination. A bucket whose scan fails goes back into the container
/// whole; the first such error is returned after every key was handled.
fn drain_keys<H: CellHash>(
    container: &mut ParticleContainer<H>,
    keys: &[EntityKey],
    scratch: &mut BucketMap,
    report: &mut RehashReport,
) -> Result<(), MeshPicError> {
    let taken: Vec<(EntityKey, Bucket)> = keys
        .iter()
        .filter_map(|&k| container.take_bucket(k).map(|b| (k, b)))
        .collect();
    let scans = scan_all(container.hasher(), taken);

    let mut first_err = None;
    for scan in scans {
        match scan {
            Ok(CellScan { key, mut stay, movers }) => {
                report.examined += stay.len() + movers.len();
                report.migrated += movers.len();
                if !stay.is_empty() {
                    scratch.entry(key).or_default().splice(&mut stay);
                }
                for (dest, p) in movers {
                    scratch.entry(dest).or_default().push(p);
                }
            }
            Err(ScanFailure { key, error, bucket }) => {
                log::warn!("rehash: cell {key:?} could not be scanned: {error}");
                container.merge_bucket(key, bucket);
                first_err.get_or_insert(error);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

/// File scratch records back into the container by zone. Ghost keys hold
/// shipped or stale content when `ghosts_shipped`, records that missed the
/// halo round otherwise.
fn settle<H: CellHash>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    scratch: BucketMap,
    ghosts_shipped: bool,
    report: &mut RehashReport,
) {
    for (key, bucket) in scratch {
        let n = bucket.len();
        match mesh.zone_of(key) {
            Some(Zone::Boundary | Zone::Center) => {
                container.merge_bucket(key, bucket);
            }
            Some(Zone::Ghost) if ghosts_shipped => report.dropped_ghost += n,
            Some(Zone::Ghost) => {
                log::warn!(
                    "rank {}: {n} records reached ghost cell {key:?} after the halo round started",
                    mesh.rank()
                );
                report.lost += n;
            }
            None => report.lost += n,
        }
    }
}

/// Put every scratch record back under the key it was filed under.
fn abort<H: CellHash>(container: &mut ParticleContainer<H>, scratch: BucketMap) {
    for (key, bucket) in scratch {
        container.merge_bucket(key, bucket);
    }
    container.mark_dirty();
}

/// A rehash round whose local part is done and whose halo round is in
/// flight. Holds the container until [`finish`](Self::finish); dropping it
/// unfinished marks the container `Dirty`, and records it shipped never
/// arrive anywhere.
#[must_use = "records are only received by `finish`"]
pub struct PendingRehash<'a, 'c, H: CellHash, C: Communicator> {
    container: &'a mut ParticleContainer<H>,
    /// `None` once finished.
    round: Option<HaloRound<'c, C>>,
    report: RehashReport,
    deferred: Option<MeshPicError>,
}

impl<'a, 'c, H: CellHash, C: Communicator> PendingRehash<'a, 'c, H, C> {
    /// Counts so far; `received` is filled in by `finish`.
    pub fn report(&self) -> &RehashReport {
        &self.report
    }

    /// Wait for the halo round and insert the received records.
    ///
    /// # Errors
    /// The first error of the round: a deferred scan failure, a
    /// `TransferError`, or a failure inserting a received record. Every
    /// received record is attempted either way.
    pub fn finish(mut self) -> Result<RehashReport, MeshPicError> {
        let Some(round) = self.round.take() else {
            return Err(MeshPicError::InvalidState("rehash round already finished"));
        };
        let mut report = self.report;
        let mut deferred = self.deferred.take();
        let container = &mut *self.container;

        match round.wait() {
            Ok(received) => {
                let (n, err) = append_received_partial(container, received);
                report.received = n;
                if let Some(e) = err {
                    deferred.get_or_insert(e);
                }
            }
            Err(e) => {
                deferred.get_or_insert(e);
            }
        }

        match deferred {
            Some(e) => {
                container.mark_dirty();
                log::warn!("rehash round incomplete: {e}");
                Err(e)
            }
            None => {
                container.set_state(ContainerState::Reconciled);
                container.debug_assert_invariants();
                log::debug!("rehash done: {report:?}");
                Ok(report)
            }
        }
    }
}

impl<H: CellHash, C: Communicator> Drop for PendingRehash<'_, '_, H, C> {
    fn drop(&mut self) {
        if self.round.is_some() {
            log::warn!(
                "rehash round dropped before finish; {} sent records are not received here",
                self.report.sent
            );
            self.container.mark_dirty();
        }
    }
}

/// Run the local part of a rehash round and start its halo exchange.
pub fn rehash_begin<'a, 'c, H, C>(
    container: &'a mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    comm: &'c C,
    tags: HaloCommTags,
) -> Result<PendingRehash<'a, 'c, H, C>, MeshPicError>
where
    H: CellHash,
    C: Communicator,
{
    // numbered before any early return so peers stay in step
    let epoch = container.next_exchange_round();
    container.set_state(ContainerState::Migrating);
    let mut report = RehashReport::default();
    let mut scratch = BucketMap::new();

    let boundary = mesh.zone_keys(Zone::Boundary);
    if let Err(e) = drain_keys(container, boundary, &mut scratch, &mut report) {
        abort(container, scratch);
        return Err(e);
    }

    let round = match start_halo_round(&scratch, mesh, comm, tags, SendScope::Migration, epoch) {
        Ok(round) => round,
        Err(e) => {
            abort(container, scratch);
            return Err(e);
        }
    };
    report.sent = round.sent();

    let ghosts = mesh.zone_keys(Zone::Ghost);
    let mut deferred = drain_keys(container, ghosts, &mut scratch, &mut report).err();
    // ghost keys filled from here on were not part of the snapshot
    let mut late = BucketMap::new();
    let center = mesh.zone_keys(Zone::Center);
    if let Err(e) = drain_keys(container, center, &mut late, &mut report) {
        deferred.get_or_insert(e);
    }
    let stray: Vec<EntityKey> = container
        .sorted_keys()
        .into_iter()
        .filter(|k| k.tag() != EntityTag::Volume || mesh.zone_of(*k).is_none())
        .collect();
    if let Err(e) = drain_keys(container, &stray, &mut late, &mut report) {
        deferred.get_or_insert(e);
    }

    settle(container, mesh, scratch, true, &mut report);
    settle(container, mesh, late, false, &mut report);
    if report.lost > 0 {
        log::warn!(
            "rank {}: {} records had nowhere to go and were dropped",
            mesh.rank(),
            report.lost
        );
    }
    log::trace!(
        "rank {}: rehash local part done, {} examined, {} migrated, {} sent",
        mesh.rank(),
        report.examined,
        report.migrated,
        report.sent
    );

    Ok(PendingRehash {
        container,
        round: Some(round),
        report,
        deferred,
    })
}

/// One full rehash round.
pub fn rehash<H, C>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    comm: &C,
    tags: HaloCommTags,
) -> Result<RehashReport, MeshPicError>
where
    H: CellHash,
    C: Communicator,
{
    rehash_begin(container, mesh, comm, tags)?.finish()
}

/// Rehash on a single-rank mesh; periodic wraps exchange with itself.
pub fn rehash_local<H: CellHash>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
) -> Result<RehashReport, MeshPicError> {
    if mesh.n_ranks() != 1 {
        return Err(MeshPicError::Configuration(format!(
            "local rehash needs a single-rank mesh, this one has {} ranks",
            mesh.n_ranks()
        )));
    }
    rehash(container, mesh, &LocalComm::solo(), HaloCommTags::default())
}
