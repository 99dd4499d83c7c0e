//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: posting a send or a
//! receive returns immediately, and the exchange channel calls `.wait()`
//! before it trusts that a buffer is ready.
//!
//! Communicators are explicit values. The in-process backend routes through
//! a [`LocalUniverse`] that the caller creates and hands out per rank, so
//! several simulated sub-domains can live in one test process without any
//! process-wide state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

/// Message tag. Tags separate concurrent exchange epochs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `n` slots above this one (wrapping).
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `buf.len()` bytes; the data is handed back
    /// by `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Compile-time no-op comm for pure serial runs. Receives never complete
/// with data.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: intra-process / multi-thread ---

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    slots: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

/// Shared message space for a set of in-process ranks.
#[derive(Clone, Debug)]
pub struct LocalUniverse {
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl LocalUniverse {
    /// Default time a receive waits before reporting failure.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(size: usize) -> Self {
        Self::with_timeout(size, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(size: usize, timeout: Duration) -> Self {
        Self {
            size,
            mailbox: Arc::new(Mailbox::default()),
            timeout,
        }
    }

    /// Communicator for `rank`.
    pub fn comm(&self, rank: usize) -> LocalComm {
        LocalComm {
            rank,
            size: self.size,
            mailbox: Arc::clone(&self.mailbox),
            timeout: self.timeout,
        }
    }

    /// One communicator per rank, in rank order.
    pub fn comms(&self) -> Vec<LocalComm> {
        (0..self.size).map(|r| self.comm(r)).collect()
    }

    /// Messages posted but not yet received.
    pub fn pending(&self) -> usize {
        self.mailbox.slots.lock().values().map(VecDeque::len).sum()
    }
}

#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

/// Pending receive on a [`LocalComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
    timeout: Duration,
}

impl LocalHandle {
    fn take(slots: &mut HashMap<Key, VecDeque<Bytes>>, key: &Key) -> Option<Bytes> {
        let queue = slots.get_mut(key)?;
        let msg = queue.pop_front();
        if queue.is_empty() {
            slots.remove(key);
        }
        msg
    }
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut slots = self.mailbox.slots.lock();
        loop {
            if let Some(bytes) = Self::take(&mut slots, &self.key) {
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
            if self.mailbox.arrived.wait_until(&mut slots, deadline).timed_out() {
                let bytes = Self::take(&mut slots, &self.key)?;
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
        }
    }
}

impl LocalComm {
    /// Standalone single-rank communicator (periodic self-exchange).
    pub fn solo() -> Self {
        LocalUniverse::new(1).comm(0)
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        let mut slots = self.mailbox.slots.lock();
        slots
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.mailbox.arrived.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
            timeout: self.timeout,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as MpiCommunicator, Destination, Source};
    use std::rc::Rc;

    /// MPI communicator wrapper. Built from a communicator obtained from the
    /// caller's `mpi::environment::Universe`; the universe must outlive it.
    #[derive(Clone)]
    pub struct MpiComm {
        world: Rc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world: Rc::new(world),
                rank,
                size,
            }
        }
    }

    /// Completes a non-blocking send and frees its buffer.
    pub struct MpiSendHandle(Box<dyn FnOnce()>);

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            (self.0)();
            None
        }
    }

    pub struct MpiRecvHandle {
        world: Rc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut msg, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            msg.truncate(self.len);
            Some(msg)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            // the buffer must stay put until the request completes
            let data: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = data;
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*data, i32::from(tag));
            MpiSendHandle(Box::new(move || {
                req.wait();
                // SAFETY: `ptr` came from `Box::leak` above and the request
                // that borrowed it has completed.
                unsafe { drop(Box::from_raw(ptr)) };
            }))
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Rc::clone(&self.world),
                peer: peer as i32,
                tag: i32::from(tag),
                len: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let universe = LocalUniverse::new(2);
        let comm0 = universe.comm(0);
        let comm1 = universe.comm(1);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
        assert_eq!(universe.pending(), 0);
    }

    #[test]
    fn universes_are_isolated() {
        let a = LocalUniverse::with_timeout(2, Duration::from_millis(20));
        let b = LocalUniverse::with_timeout(2, Duration::from_millis(20));
        a.comm(0).isend(1, 3, &[9]);
        let mut buf = [0u8; 1];
        assert!(b.comm(1).irecv(0, 3, &mut buf).wait().is_none());
        assert_eq!(a.comm(1).irecv(0, 3, &mut buf).wait(), Some(vec![9]));
    }

    #[test]
    fn receive_from_another_thread() {
        let universe = LocalUniverse::new(2);
        let c1 = universe.comm(1);
        let mut buf = [0u8; 3];
        let h = c1.irecv(0, 11, &mut buf);
        let c0 = universe.comm(0);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            c0.isend(1, 11, b"abc");
        });
        assert_eq!(h.wait(), Some(b"abc".to_vec()));
        t.join().unwrap();
    }

    #[test]
    fn no_comm_never_delivers() {
        let mut buf = [0u8; 2];
        NoComm.isend(0, 1, &[1, 2]).wait();
        assert!(NoComm.irecv(0, 1, &mut buf).wait().is_none());
        assert_eq!(NoComm.size(), 1);
    }
}
