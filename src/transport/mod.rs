//! Pluggable transports: how a star forest actually moves bytes.
//!
//! A [`Transport`] owns the resolved communication plans for one graph and
//! starts byte-level exchanges; typed packing and operator fusion stay in
//! the dispatching layer. The default `*_begin` methods implement the
//! two-sided exchange every transport here ultimately uses; specialized
//! transports differ in how their plans are produced, not in the wire
//! mechanics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::comm::collective::recv_exact;
use crate::comm::{tag, Communicator, Wait};
use crate::graph::{Remote, SfGraph};
use crate::ranks::{LeafRanks, RankTable};
use crate::sf_error::SfError;

pub mod allgather;
pub mod alltoall;
pub mod basic;
pub mod relay;

pub use allgather::{AllgatherTransport, AllgathervTransport, GatherTransport, GathervTransport};
pub use alltoall::AlltoallTransport;
pub use basic::BasicTransport;
pub use relay::{NeighborTransport, WindowTransport};

/// Transport selector, the `sf_type` configuration surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SfType {
    Basic,
    Window,
    Neighbor,
    Alltoall,
    Allgather,
    Allgatherv,
    Gather,
    Gatherv,
}

impl SfType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SfType::Basic => "basic",
            SfType::Window => "window",
            SfType::Neighbor => "neighbor",
            SfType::Alltoall => "alltoall",
            SfType::Allgather => "allgather",
            SfType::Allgatherv => "allgatherv",
            SfType::Gather => "gather",
            SfType::Gatherv => "gatherv",
        }
    }
}

impl fmt::Display for SfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SfType {
    type Err = SfError;

    fn from_str(s: &str) -> Result<Self, SfError> {
        match s {
            "basic" => Ok(SfType::Basic),
            "window" => Ok(SfType::Window),
            "neighbor" => Ok(SfType::Neighbor),
            "alltoall" => Ok(SfType::Alltoall),
            "allgather" => Ok(SfType::Allgather),
            "allgatherv" => Ok(SfType::Allgatherv),
            "gather" => Ok(SfType::Gather),
            "gatherv" => Ok(SfType::Gatherv),
            other => Err(SfError::UnknownTransport(other.to_string())),
        }
    }
}

/// An in-flight exchange: posted receives plus the sends backing them.
///
/// Begin returns one of these and the matching End consumes it; there is no
/// hidden per-object operation state.
pub struct PendingOp<C: Communicator> {
    sends: Vec<C::SendHandle>,
    recvs: Vec<RecvSlot<C>>,
    total_units: usize,
    unit: usize,
}

struct RecvSlot<C: Communicator> {
    peer: usize,
    start: usize,
    units: usize,
    handle: C::RecvHandle,
}

impl<C: Communicator> PendingOp<C> {
    pub(crate) fn new(unit: usize, total_units: usize) -> Self {
        PendingOp {
            sends: Vec::new(),
            recvs: Vec::new(),
            total_units,
            unit,
        }
    }

    pub(crate) fn push_send(&mut self, handle: C::SendHandle) {
        self.sends.push(handle);
    }

    pub(crate) fn push_recv(&mut self, peer: usize, start: usize, units: usize, handle: C::RecvHandle) {
        self.recvs.push(RecvSlot {
            peer,
            start,
            units,
            handle,
        });
    }

    /// Wait for every receive, assemble the incoming blocks into one
    /// plan-ordered buffer, then drain the sends.
    pub(crate) fn finish(self) -> Result<Vec<u8>, SfError> {
        let mut buf = vec![0u8; self.total_units * self.unit];
        for slot in self.recvs {
            let nbytes = slot.units * self.unit;
            let data = recv_exact(slot.handle, slot.peer, nbytes)?;
            buf[slot.start * self.unit..slot.start * self.unit + nbytes].copy_from_slice(&data);
        }
        for send in self.sends {
            send.wait();
        }
        Ok(buf)
    }
}

/// Start a two-sided exchange: receives are posted per `recv_*` plan slice,
/// then data is gathered at `send_idx` positions and sent per `send_*`
/// plan slice.
pub(crate) fn exchange_begin<C: Communicator>(
    comm: &C,
    channel: u16,
    send_ranks: &[usize],
    send_offsets: &[usize],
    send_idx: &[usize],
    recv_ranks: &[usize],
    recv_offsets: &[usize],
    data: &[u8],
    unit: usize,
) -> Result<PendingOp<C>, SfError> {
    let total = recv_offsets.last().copied().unwrap_or(0);
    let mut pending = PendingOp::new(unit, total);
    for (k, &peer) in recv_ranks.iter().enumerate() {
        let units = recv_offsets[k + 1] - recv_offsets[k];
        let handle = comm.irecv(peer, channel, units * unit);
        pending.push_recv(peer, recv_offsets[k], units, handle);
    }
    for (k, &peer) in send_ranks.iter().enumerate() {
        let lo = send_offsets[k];
        let hi = send_offsets[k + 1];
        let mut staged = Vec::with_capacity((hi - lo) * unit);
        for &idx in &send_idx[lo..hi] {
            staged.extend_from_slice(&data[idx * unit..(idx + 1) * unit]);
        }
        pending.push_send(comm.isend(peer, channel, &staged));
    }
    Ok(pending)
}

/// Graph pieces handed back by transport-specialized derived operations.
pub struct GraphParts {
    pub nroots: usize,
    pub nleaves: usize,
    pub local: Option<Vec<usize>>,
    pub remote: Vec<Remote>,
}

/// An embedded star forest built by a transport shortcut, optionally with
/// its communication plans already resolved.
pub struct EmbeddedGraph {
    pub parts: GraphParts,
    pub tables: Option<(RankTable, LeafRanks)>,
}

/// Byte-level engine behind one star forest.
pub trait Transport<C: Communicator>: Send {
    fn kind(&self) -> SfType;

    /// Resolve communication plans for `graph`.
    fn setup(&mut self, graph: &SfGraph, comm: &C, dgroup: &[usize]) -> Result<(), SfError>;

    /// Outgoing plan (roots this rank's leaves reference).
    fn root_ranks(&self) -> Result<&RankTable, SfError>;

    /// Incoming plan (local roots referenced by other ranks).
    fn leaf_ranks(&self) -> Result<&LeafRanks, SfError>;

    /// Start moving root data towards leaves. The returned buffer from
    /// `PendingOp::finish` is ordered like `root_ranks().rmine`.
    fn bcast_begin(&self, comm: &C, rootdata: &[u8], unit: usize) -> Result<PendingOp<C>, SfError> {
        let rr = self.root_ranks()?;
        let lr = self.leaf_ranks()?;
        exchange_begin(
            comm,
            tag::BCAST,
            &lr.ranks,
            &lr.ioffset,
            &lr.irootloc,
            &rr.ranks,
            &rr.roffset,
            rootdata,
            unit,
        )
    }

    /// Start moving leaf data towards roots. The finished buffer is ordered
    /// like `leaf_ranks().irootloc`.
    fn reduce_begin(&self, comm: &C, leafdata: &[u8], unit: usize) -> Result<PendingOp<C>, SfError> {
        let rr = self.root_ranks()?;
        let lr = self.leaf_ranks()?;
        exchange_begin(
            comm,
            tag::REDUCE,
            &rr.ranks,
            &rr.roffset,
            &rr.rmine,
            &lr.ranks,
            &lr.ioffset,
            leafdata,
            unit,
        )
    }

    /// Intra-process restriction, when the transport can produce it without
    /// communication.
    fn local_graph(&self, _graph: &SfGraph, _my_rank: usize) -> Option<GraphParts> {
        None
    }

    /// Embedding shortcut for sorted, deduplicated `selected` roots.
    fn embedded(
        &self,
        _graph: &SfGraph,
        _comm: &C,
        _selected: &[usize],
    ) -> Result<Option<EmbeddedGraph>, SfError> {
        Ok(None)
    }
}

/// Instantiate the transport behind a type selector.
pub(crate) fn make_transport<C: Communicator>(kind: SfType) -> Box<dyn Transport<C>> {
    match kind {
        SfType::Basic => Box::new(BasicTransport::new()),
        SfType::Window => Box::new(WindowTransport::new()),
        SfType::Neighbor => Box::new(NeighborTransport::new()),
        SfType::Alltoall => Box::new(AlltoallTransport::new()),
        SfType::Allgather => Box::new(AllgatherTransport::new()),
        SfType::Allgatherv => Box::new(AllgathervTransport::new()),
        SfType::Gather => Box::new(GatherTransport::new()),
        SfType::Gatherv => Box::new(GathervTransport::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_roundtrip() {
        for t in [
            SfType::Basic,
            SfType::Window,
            SfType::Neighbor,
            SfType::Alltoall,
            SfType::Allgather,
            SfType::Allgatherv,
            SfType::Gather,
            SfType::Gatherv,
        ] {
            assert_eq!(t.as_str().parse::<SfType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = "bruck".parse::<SfType>().unwrap_err();
        assert_eq!(err, SfError::UnknownTransport("bruck".into()));
    }
}
