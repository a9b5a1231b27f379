//! Thin façade over intra-process (thread) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking; transports call `.wait()`
//! before they trust that a buffer is ready.
//!
//! Matching model: messages on the same `(source, destination, tag)` channel
//! are delivered in posting order. Every rank of an SPMD program posts its
//! receives and sends in the same program order, which is all the ordering
//! the engine relies on.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

pub mod collective;

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Clone + Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Send;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of exactly `nbytes` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Fixed tags for the engine's message classes. Correctness comes from
/// per-channel posting order, not from tag uniqueness per operation.
pub mod tag {
    pub const SETUP_COUNT: u16 = 1;
    pub const SETUP_INDICES: u16 = 2;
    pub const BCAST: u16 = 3;
    pub const REDUCE: u16 = 4;
    pub const FETCH_REQ: u16 = 5;
    pub const FETCH_REP: u16 = 6;
    pub const RENDEZVOUS: u16 = 7;
    pub const LAYOUT: u16 = 8;
}

// --- ThreadComm: intra-process simulated ranks ---

type Key = (u64, usize, usize, u16); // (channel, src, dst, tag)

#[derive(Default)]
struct Slot {
    sent: u64,
    claimed: u64,
    msgs: HashMap<u64, Bytes>,
}

static MAILBOX: Lazy<DashMap<Key, Slot>> = Lazy::new(DashMap::new);
// Ranks whose thread unwound while holding a communicator. Receives from a
// dead rank complete empty instead of spinning forever.
static DEAD: Lazy<DashMap<(u64, usize), ()>> = Lazy::new(DashMap::new);
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(0);

/// One simulated rank of an intra-process communicator.
///
/// `split(n)` hands out `n` ranks that share a private channel id, so
/// concurrently running communicators (e.g. parallel tests) never see each
/// other's traffic. Each rank is meant to be driven by its own thread.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    channel: u64,
    rank: usize,
    size: usize,
}

impl ThreadComm {
    /// Create a fresh `size`-rank communicator, one handle per rank.
    pub fn split(size: usize) -> Vec<ThreadComm> {
        let channel = NEXT_CHANNEL.fetch_add(1, Relaxed);
        (0..size)
            .map(|rank| ThreadComm { channel, rank, size })
            .collect()
    }

    /// A single-rank communicator; self-sends loop back through the mailbox.
    pub fn solo() -> ThreadComm {
        ThreadComm {
            channel: NEXT_CHANNEL.fetch_add(1, Relaxed),
            rank: 0,
            size: 1,
        }
    }
}

/// Receive handle holding a claim ticket on one mailbox channel.
pub struct ThreadHandle {
    key: Key,
    ticket: u64,
}

impl Wait for ThreadHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (channel, src, _, _) = self.key;
        loop {
            if let Some(mut slot) = MAILBOX.get_mut(&self.key) {
                if let Some(bytes) = slot.msgs.remove(&self.ticket) {
                    return Some(bytes.to_vec());
                }
            }
            if DEAD.contains_key(&(channel, src)) {
                // The rank may have sent between the two looks; take one
                // last pass over the mailbox before giving up.
                return MAILBOX
                    .get_mut(&self.key)
                    .and_then(|mut slot| slot.msgs.remove(&self.ticket))
                    .map(|bytes| bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }
}

impl Drop for ThreadComm {
    fn drop(&mut self) {
        // A communicator dropped during unwinding means its rank will never
        // send again; mark it so peers blocked on it fail instead of hang.
        if std::thread::panicking() {
            DEAD.insert((self.channel, self.rank), ());
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.channel, self.rank, peer, tag);
        let mut slot = MAILBOX.entry(key).or_default();
        let seq = slot.sent;
        slot.sent += 1;
        slot.msgs.insert(seq, Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _nbytes: usize) -> ThreadHandle {
        let key = (self.channel, peer, self.rank, tag);
        let mut slot = MAILBOX.entry(key).or_default();
        let ticket = slot.claimed;
        slot.claimed += 1;
        ThreadHandle { key, ticket }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Wait;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    struct World {
        _universe: mpi::environment::Universe,
        comm: SimpleCommunicator,
    }

    /// Inter-process backend over rsmpi. One `MpiComm` per process.
    #[derive(Clone)]
    pub struct MpiComm {
        world: Arc<World>,
        rank: usize,
        size: usize,
    }

    // SimpleCommunicator wraps an MPI_Comm handle; the MPI library is
    // initialized with THREAD_MULTIPLE semantics left to the caller.
    unsafe impl Send for World {}
    unsafe impl Sync for World {}

    impl MpiComm {
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let comm = universe.world();
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Some(MpiComm {
                world: Arc::new(World {
                    _universe: universe,
                    comm,
                }),
                rank,
                size,
            })
        }
    }

    pub struct MpiSendHandle {
        req: mpi::request::Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    pub struct MpiRecvHandle {
        req: mpi::request::Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    // The raw pointers refer to leaked allocations reclaimed in wait().
    unsafe impl Send for MpiSendHandle {}
    unsafe impl Send for MpiRecvHandle {}

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            let buf = unsafe { Box::from_raw(self.buf) };
            Some(buf.into_vec())
        }
    }

    impl super::Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let staged: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr = staged as *mut [u8];
            let req = self
                .world
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*staged, tag as i32);
            MpiSendHandle { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, nbytes: usize) -> MpiRecvHandle {
            let staged: &'static mut [u8] = Box::leak(vec![0u8; nbytes].into_boxed_slice());
            let ptr = staged as *mut [u8];
            let req = self
                .world
                .comm
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, staged, tag as i32);
            MpiRecvHandle { req, buf: ptr }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
