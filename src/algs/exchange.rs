//! One round of paired, direction-indexed point-to-point transfers.
//!
//! Usage is strictly phased:
//! 1. register outgoing links (`add_link_send`) and incoming placeholders
//!    (`add_link_recv`),
//! 2. `start()` posts everything without blocking,
//! 3. `wait()` blocks until every send and receive of the round completed,
//! 4. `recv_buffer()` exposes `direction -> payload`.
//!
//! Each link is a two-frame message: a [`WireCount`] on the size tag, then
//! the `Pod` payload on the data tag. Tags are offset by the *sender's*
//! direction index, so a receiver listening on direction `d` matches the
//! frames its neighbour sent along `d.opposite()`.
//!
//! Every channel carries an epoch, stamped into each size header. A round
//! that failed on one rank can leave its peer's frames queued; the next
//! round on that link consumes and drops frames of earlier epochs until it
//! reaches its own. Ranks stay paired as long as each one numbers its
//! rounds the same way, failed rounds included.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut, decode_records};
use crate::mesh_error::MeshPicError;
use crate::topology::direction::{DIRECTION_SLOTS, Direction};

/// Records a single link accepts unless configured otherwise.
pub const DEFAULT_MAX_LINK_RECORDS: u32 = 1 << 22;

fn default_max_link_records() -> u32 {
    DEFAULT_MAX_LINK_RECORDS
}

/// Tag block and per-link limit for one family of exchange rounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HaloCommTags {
    pub sizes: CommTag,
    pub data: CommTag,
    /// Largest record count accepted on one link, either way. A size header
    /// above it fails the link before any buffer is allocated.
    #[serde(default = "default_max_link_records")]
    pub max_link_records: u32,
}

impl HaloCommTags {
    /// Sizes at `base`, data right after the size block.
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(DIRECTION_SLOTS),
            max_link_records: DEFAULT_MAX_LINK_RECORDS,
        }
    }

    pub const fn with_max_link_records(mut self, max: u32) -> Self {
        self.max_link_records = max;
        self
    }
}

impl Default for HaloCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x5000))
    }
}

struct SendLink<T> {
    direction: Direction,
    peer: usize,
    payload: Vec<T>,
}

#[derive(Copy, Clone)]
struct RecvLink {
    direction: Direction,
    peer: usize,
}

enum Phase<C: Communicator> {
    Registering,
    InFlight {
        size_recvs: Vec<(RecvLink, C::RecvHandle)>,
        sends: Vec<C::SendHandle>,
    },
    Completed,
    Failed,
}

pub struct ExchangeChannel<'c, C: Communicator, T: Pod> {
    comm: &'c C,
    tags: HaloCommTags,
    epoch: u32,
    sends: Vec<SendLink<T>>,
    recvs: Vec<RecvLink>,
    phase: Phase<C>,
    recv_buffer: BTreeMap<Direction, Vec<T>>,
}

impl<'c, C: Communicator, T: Pod> ExchangeChannel<'c, C, T> {
    pub fn new(comm: &'c C, tags: HaloCommTags) -> Self {
        Self {
            comm,
            tags,
            epoch: 0,
            sends: Vec::new(),
            recvs: Vec::new(),
            phase: Phase::Registering,
            recv_buffer: BTreeMap::new(),
        }
    }

    /// Stamp this round's frames with `epoch`. Both ends of a link must use
    /// the same value for the same round.
    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    fn check_registration(&self, direction: Direction, peer: usize) -> Result<(), MeshPicError> {
        if !matches!(self.phase, Phase::Registering) {
            return Err(MeshPicError::transfer(
                direction,
                peer,
                "link registered after the round started",
            ));
        }
        if direction.is_zero() {
            return Err(MeshPicError::transfer(direction, peer, "zero direction"));
        }
        if peer >= self.comm.size() {
            return Err(MeshPicError::transfer(
                direction,
                peer,
                format!("peer outside communicator of size {}", self.comm.size()),
            ));
        }
        Ok(())
    }

    /// Register an outgoing payload for `direction`.
    pub fn add_link_send(
        &mut self,
        direction: Direction,
        peer: usize,
        payload: Vec<T>,
    ) -> Result<(), MeshPicError> {
        self.check_registration(direction, peer)?;
        if self.sends.iter().any(|l| l.direction == direction) {
            return Err(MeshPicError::transfer(direction, peer, "duplicate outgoing link"));
        }
        if let Err(reason) = self.check_count(payload.len()) {
            return Err(MeshPicError::transfer(direction, peer, reason));
        }
        log::trace!(
            "rank {}: send link {:?} -> {peer} ({} records)",
            self.comm.rank(),
            direction,
            payload.len()
        );
        self.sends.push(SendLink {
            direction,
            peer,
            payload,
        });
        Ok(())
    }

    /// Register an incoming placeholder for `direction`.
    pub fn add_link_recv(&mut self, direction: Direction, peer: usize) -> Result<(), MeshPicError> {
        self.check_registration(direction, peer)?;
        if self.recvs.iter().any(|l| l.direction == direction) {
            return Err(MeshPicError::transfer(direction, peer, "duplicate incoming link"));
        }
        log::trace!("rank {}: recv link {:?} <- {peer}", self.comm.rank(), direction);
        self.recvs.push(RecvLink { direction, peer });
        Ok(())
    }

    fn check_count(&self, n: usize) -> Result<(), String> {
        if n > self.tags.max_link_records as usize {
            return Err(format!(
                "{n} records exceed the per-link limit of {}",
                self.tags.max_link_records
            ));
        }
        Ok(())
    }

    /// Zeroed receive buffer for `n` records, allocated fallibly.
    fn payload_buffer(&self, n: usize) -> Result<Vec<u8>, String> {
        self.check_count(n)?;
        let bytes = n
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| format!("{n} records overflow the buffer size"))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|e| format!("cannot allocate {bytes} bytes for {n} records: {e}"))?;
        buf.resize(bytes, 0);
        Ok(buf)
    }

    fn post_size_recv(&self, link: RecvLink) -> C::RecvHandle {
        let mut cnt = WireCount::default();
        let tag = self.tags.sizes.offset(link.direction.opposite().index());
        self.comm.irecv(
            link.peer,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        )
    }

    /// Wait for the size header of this round on `link` and return its
    /// count. Frames from earlier rounds, header and payload, are consumed
    /// and dropped on the way.
    fn current_count(&self, link: RecvLink, first: C::RecvHandle) -> Result<usize, String> {
        let data_tag = self.tags.data.offset(link.direction.opposite().index());
        let mut h = first;
        loop {
            let bytes = h.wait().ok_or("no size header received")?;
            let header =
                WireCount::from_bytes(&bytes).map_err(|e| format!("malformed size header: {e}"))?;
            let n = header.get();
            self.check_count(n)?;
            // wrapping distance, so epochs may roll over
            let behind = self.epoch.wrapping_sub(header.epoch()) as i32;
            if behind == 0 {
                return Ok(n);
            }
            if behind < 0 {
                return Err(format!(
                    "size header from round {} while in round {}",
                    header.epoch(),
                    self.epoch
                ));
            }
            log::debug!(
                "rank {}: dropping {n} stale records of round {} from {} ({:?})",
                self.comm.rank(),
                header.epoch(),
                link.peer,
                link.direction
            );
            let mut buf = self.payload_buffer(n)?;
            self.comm
                .irecv(link.peer, data_tag.as_u16(), &mut buf)
                .wait()
                .ok_or("stale payload missing")?;
            h = self.post_size_recv(link);
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.iter().map(|l| l.payload.len()).sum()
    }

    pub fn link_count(&self) -> (usize, usize) {
        (self.sends.len(), self.recvs.len())
    }

    /// Post every registered transfer. Never blocks.
    pub fn start(&mut self) -> Result<(), MeshPicError> {
        if !matches!(self.phase, Phase::Registering) {
            return Err(MeshPicError::InvalidState("exchange round already started"));
        }

        // 1) post size receives
        let size_recvs: Vec<_> = self
            .recvs
            .iter()
            .map(|&link| (link, self.post_size_recv(link)))
            .collect();

        // 2) post sizes and payloads
        let mut sends = Vec::with_capacity(2 * self.sends.len());
        for link in &self.sends {
            let count = WireCount::try_new(link.payload.len())
                .unwrap_or_default()
                .with_epoch(self.epoch);
            let idx = link.direction.index();
            sends.push(self.comm.isend(
                link.peer,
                self.tags.sizes.offset(idx).as_u16(),
                cast_slice(std::slice::from_ref(&count)),
            ));
            sends.push(self.comm.isend(
                link.peer,
                self.tags.data.offset(idx).as_u16(),
                cast_slice(&link.payload),
            ));
        }

        log::debug!(
            "rank {}: exchange round {} started ({} sends, {} recvs, {} records out)",
            self.comm.rank(),
            self.epoch,
            self.sends.len(),
            self.recvs.len(),
            self.send_count()
        );
        self.phase = Phase::InFlight { size_recvs, sends };
        Ok(())
    }

    /// Block until the round completes. Every handle is drained even when a
    /// link fails; the first failure is returned.
    pub fn wait(&mut self) -> Result<(), MeshPicError> {
        let (size_recvs, sends) = match std::mem::replace(&mut self.phase, Phase::Failed) {
            Phase::InFlight { size_recvs, sends } => (size_recvs, sends),
            other => {
                self.phase = other;
                return Err(MeshPicError::InvalidState(
                    "wait called on an exchange round that is not in flight",
                ));
            }
        };

        let mut maybe_err: Option<MeshPicError> = None;

        // 1) sizes, then post data receives for each known count
        let mut data_recvs = Vec::with_capacity(size_recvs.len());
        for (link, h) in size_recvs {
            let posted = self.current_count(link, h).and_then(|n| {
                let mut buf = self.payload_buffer(n)?;
                let tag = self.tags.data.offset(link.direction.opposite().index());
                Ok((n, self.comm.irecv(link.peer, tag.as_u16(), &mut buf)))
            });
            match posted {
                Ok((n, dh)) => data_recvs.push((link, n, dh)),
                Err(reason) if maybe_err.is_none() => {
                    maybe_err = Some(MeshPicError::transfer(link.direction, link.peer, reason));
                }
                Err(_) => {}
            }
        }

        // 2) payloads
        for (link, n, h) in data_recvs {
            let result = match h.wait() {
                Some(bytes) => decode_records::<T>(&bytes, n),
                None => Err("no payload received".to_string()),
            };
            match result {
                Ok(records) => {
                    self.recv_buffer.insert(link.direction, records);
                }
                Err(reason) if maybe_err.is_none() => {
                    maybe_err = Some(MeshPicError::transfer(link.direction, link.peer, reason));
                }
                Err(_) => {}
            }
        }

        // 3) always drain all send handles before returning
        for s in sends {
            let _ = s.wait();
        }

        match maybe_err {
            Some(err) => {
                log::warn!("rank {}: exchange round failed: {err}", self.comm.rank());
                self.phase = Phase::Failed;
                Err(err)
            }
            None => {
                self.phase = Phase::Completed;
                Ok(())
            }
        }
    }

    /// Received payloads by direction; valid only after a successful `wait`.
    pub fn recv_buffer(&self) -> Result<&BTreeMap<Direction, Vec<T>>, MeshPicError> {
        match self.phase {
            Phase::Completed => Ok(&self.recv_buffer),
            _ => Err(MeshPicError::InvalidState("receive buffer read before the round completed")),
        }
    }

    /// Consume the channel and take the received payloads.
    pub fn into_received(self) -> Result<BTreeMap<Direction, Vec<T>>, MeshPicError> {
        match self.phase {
            Phase::Completed => Ok(self.recv_buffer),
            _ => Err(MeshPicError::InvalidState("receive buffer read before the round completed")),
        }
    }
}
