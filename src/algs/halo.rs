//! Halo synchronization of particles between neighbouring sub-domains.
//!
//! For every realizable neighbour direction the records inside the send
//! range (the boundary slab facing the neighbour plus the ghost slab beyond
//! it, see [`StructuredMesh::send_range`]) are copied into one outgoing
//! payload. Across a periodic wrap the copies are shifted by the domain
//! length so the receiver sees them in its own coordinates. A matching
//! receive is registered for the same direction, then the round starts
//! without blocking.
//!
//! What the receiver gets per direction is a mix of
//! - records that migrated into the sender's ghost cells, which land in
//!   the receiver's owned cells, and
//! - copies of the sender's boundary records, which land in the receiver's
//!   ghost cells.

use std::collections::BTreeMap;

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{ExchangeChannel, HaloCommTags};
use crate::data::bucket::Bucket;
use crate::data::container::{BucketMap, CellHash, ParticleContainer};
use crate::data::particle::ParticleRecord;
use crate::mesh_error::MeshPicError;
use crate::topology::direction::Direction;
use crate::topology::entity_key::EntityKey;
use crate::topology::index_box::IndexBox;
use crate::topology::structured::{Neighbor, StructuredMesh, Zone};

/// Read access to buckets by key, for building outgoing payloads.
pub trait BucketSource {
    fn bucket(&self, key: EntityKey) -> Option<&Bucket>;
}

impl BucketSource for BucketMap {
    #[inline]
    fn bucket(&self, key: EntityKey) -> Option<&Bucket> {
        self.get(&key)
    }
}

impl<H: CellHash> BucketSource for ParticleContainer<H> {
    #[inline]
    fn bucket(&self, key: EntityKey) -> Option<&Bucket> {
        self.get(key)
    }
}

/// Which part of the send range is shipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendScope {
    /// Boundary and ghost slabs: used right after the boundary pass of a
    /// rehash, when ghost keys hold only freshly migrated records.
    Migration,
    /// Owned cells only: refreshes neighbour ghosts without moving
    /// ownership.
    GhostRefresh,
}

/// Received payloads, keyed by the direction they arrived from.
pub type HaloPayloads = BTreeMap<Direction, Vec<ParticleRecord>>;

/// Copy every record of `source` whose cell lies in `range`, shifted by the
/// link's periodic offset.
pub fn collect_outgoing<S: BucketSource + ?Sized>(
    source: &S,
    range: IndexBox,
    neighbor: &Neighbor,
) -> Result<Vec<ParticleRecord>, MeshPicError> {
    let mut out = Vec::new();
    let shifted = neighbor.shift != [0.0; 3];
    for c in range.coords() {
        let Some(bucket) = source.bucket(EntityKey::cell(c)?) else {
            continue;
        };
        out.extend(bucket.iter().map(|p| {
            let mut p = *p;
            if shifted {
                p.shift(neighbor.shift);
            }
            p
        }));
    }
    Ok(out)
}

/// An exchange round in flight.
pub struct HaloRound<'c, C: Communicator> {
    channel: ExchangeChannel<'c, C, ParticleRecord>,
    sent: usize,
    links: usize,
}

impl<'c, C: Communicator> HaloRound<'c, C> {
    /// Records posted to neighbours in this round.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Number of neighbour links of the round.
    pub fn links(&self) -> usize {
        self.links
    }

    /// Block until every transfer of the round has completed.
    pub fn wait(mut self) -> Result<HaloPayloads, MeshPicError> {
        self.channel.wait()?;
        self.channel.into_received()
    }
}

/// Build and start one synchronization round from `source`, its frames
/// stamped with `epoch`.
///
/// # Errors
/// `TransferError` when a link cannot be registered; nothing has been sent
/// in that case.
pub fn start_halo_round<'c, S, C>(
    source: &S,
    mesh: &StructuredMesh,
    comm: &'c C,
    tags: HaloCommTags,
    scope: SendScope,
    epoch: u32,
) -> Result<HaloRound<'c, C>, MeshPicError>
where
    S: BucketSource + ?Sized,
    C: Communicator,
{
    let mut channel = ExchangeChannel::new(comm, tags).with_epoch(epoch);
    let neighbors = mesh.neighbors();
    for nb in &neighbors {
        let mut range = mesh.send_range(nb.direction);
        if scope == SendScope::GhostRefresh {
            range = range.intersect(&mesh.index_box());
        }
        let payload = collect_outgoing(source, range, nb)?;
        channel.add_link_send(nb.direction, nb.rank, payload)?;
        channel.add_link_recv(nb.direction, nb.rank)?;
    }
    let sent = channel.send_count();
    channel.start()?;
    Ok(HaloRound {
        channel,
        sent,
        links: neighbors.len(),
    })
}

/// Insert received records into `container` by their own cell. Every record
/// is attempted; the first failure is returned after the rest went in.
pub fn append_received<H: CellHash>(
    container: &mut ParticleContainer<H>,
    received: HaloPayloads,
) -> Result<usize, MeshPicError> {
    match append_received_partial(container, received) {
        (n, None) => Ok(n),
        (_, Some(e)) => Err(e),
    }
}

/// Like [`append_received`], but reports how many records went in next to
/// the first failure.
pub(crate) fn append_received_partial<H: CellHash>(
    container: &mut ParticleContainer<H>,
    received: HaloPayloads,
) -> (usize, Option<MeshPicError>) {
    let mut n = 0;
    let mut first_err = None;
    for (direction, records) in received {
        for p in records {
            match container.insert(p) {
                Ok(_) => n += 1,
                Err(e) => {
                    log::warn!("record received from {direction:?} not inserted: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
    }
    (n, first_err)
}

/// Replace ghost content with fresh copies of the neighbours' owned
/// records. Owned content is untouched.
pub fn sync_ghosts<H, C>(
    container: &mut ParticleContainer<H>,
    mesh: &StructuredMesh,
    comm: &C,
    tags: HaloCommTags,
) -> Result<usize, MeshPicError>
where
    H: CellHash,
    C: Communicator,
{
    let epoch = container.next_exchange_round();
    let round = start_halo_round(&*container, mesh, comm, tags, SendScope::GhostRefresh, epoch)?;
    let received = round.wait()?;
    for &k in mesh.zone_keys(Zone::Ghost) {
        container.erase(k);
    }
    append_received(container, received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalUniverse;
    use crate::data::container::MeshLocator;
    use crate::physics::policy::BallisticPolicy;
    use crate::topology::structured::MeshConfig;
    use std::sync::Arc;

    fn periodic_1d() -> Arc<StructuredMesh> {
        let cfg = MeshConfig {
            ndims: 1,
            global_cells: [4, 1, 1],
            periodic: [true, false, false],
            ..Default::default()
        };
        Arc::new(StructuredMesh::serial(cfg).unwrap())
    }

    #[test]
    fn outgoing_copies_are_shifted_across_wrap() {
        let mesh = periodic_1d();
        let mut c = ParticleContainer::new(MeshLocator::new(mesh.clone(), BallisticPolicy));
        c.insert(ParticleRecord::new([3.5, 0.0, 0.0], [0.0; 3], 1.0)).unwrap();
        c.insert(ParticleRecord::new([1.5, 0.0, 0.0], [0.0; 3], 1.0)).unwrap();
        let nb = mesh.neighbor(Direction([1, 0, 0])).unwrap();
        let out = collect_outgoing(&c, mesh.send_range(nb.direction), &nb).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].x[0], -0.5);
    }

    #[test]
    fn ghost_refresh_on_periodic_ring() {
        let mesh = periodic_1d();
        let mut c = ParticleContainer::new(MeshLocator::new(mesh.clone(), BallisticPolicy));
        c.insert(ParticleRecord::new([0.5, 0.0, 0.0], [0.0; 3], 1.0).with_payload(1)).unwrap();
        c.insert(ParticleRecord::new([3.5, 0.0, 0.0], [0.0; 3], 1.0).with_payload(2)).unwrap();
        let u = LocalUniverse::new(1);
        let got = sync_ghosts(&mut c, &mesh, &u.comm(0), HaloCommTags::default()).unwrap();
        assert_eq!(got, 2);
        let low_ghost = EntityKey::cell([-1, 0, 0]).unwrap();
        let high_ghost = EntityKey::cell([4, 0, 0]).unwrap();
        assert_eq!(c.at(low_ghost).unwrap().front().unwrap().payload, 2);
        assert_eq!(c.at(high_ghost).unwrap().front().unwrap().payload, 1);
        // refreshing again replaces, not accumulates
        sync_ghosts(&mut c, &mesh, &u.comm(0), HaloCommTags::default()).unwrap();
        assert_eq!(c.len(), 4);
        assert!(c.is_well_hashed());
    }
}
