//! Collective shapes built from point-to-point sends and receives.
//!
//! Every helper follows the same discipline: post all receives, post all
//! sends, then drain. Receives are waited in ascending peer order so the
//! result layout is deterministic.

use log::trace;

use crate::comm::{Communicator, Wait};
use crate::sf_error::SfError;
use crate::wire::{self, WireCount, WireIdx};

/// Wait on a receive and insist on an exact byte count.
pub fn recv_exact<H: Wait>(handle: H, peer: usize, nbytes: usize) -> Result<Vec<u8>, SfError> {
    let data = handle.wait().ok_or_else(|| SfError::CommError {
        neighbor: peer,
        message: "receive completed without data".into(),
    })?;
    wire::expect_exact_len(data.len(), nbytes).map_err(|message| SfError::CommError {
        neighbor: peer,
        message,
    })?;
    Ok(data)
}

/// Dense symmetric exchange of one element count per rank pair.
///
/// `outgoing[r]` is what this rank reports to rank `r`; the result holds
/// what every rank reported to us, indexed by rank.
pub fn exchange_counts<C: Communicator>(
    comm: &C,
    tag: u16,
    outgoing: &[usize],
) -> Result<Vec<usize>, SfError> {
    let size = comm.size();
    debug_assert_eq!(outgoing.len(), size);
    trace!("exchange_counts: rank {} of {}", comm.rank(), size);

    let recvs: Vec<_> = (0..size)
        .map(|peer| comm.irecv(peer, tag, std::mem::size_of::<WireCount>()))
        .collect();
    let sends: Vec<_> = (0..size)
        .map(|peer| comm.isend(peer, tag, wire::cast_slice(&[WireCount::new(outgoing[peer])])))
        .collect();

    let mut incoming = Vec::with_capacity(size);
    for (peer, handle) in recvs.into_iter().enumerate() {
        let bytes = recv_exact(handle, peer, std::mem::size_of::<WireCount>())?;
        let counts: Vec<WireCount> =
            wire::decode_vec(&bytes).map_err(|message| SfError::CommError { neighbor: peer, message })?;
        incoming.push(counts[0].get());
    }
    for send in sends {
        send.wait();
    }
    Ok(incoming)
}

/// Exchange variable-length index lists.
///
/// `outgoing` pairs each destination rank with the indices to send there;
/// `incoming` names the peers we expect and how many indices each will send.
/// Results are returned in `incoming` order.
pub fn exchange_index_lists<C: Communicator>(
    comm: &C,
    tag: u16,
    outgoing: &[(usize, Vec<usize>)],
    incoming: &[(usize, usize)],
) -> Result<Vec<Vec<usize>>, SfError> {
    let recvs: Vec<_> = incoming
        .iter()
        .map(|&(peer, count)| comm.irecv(peer, tag, count * std::mem::size_of::<WireIdx>()))
        .collect();
    let sends: Vec<_> = outgoing
        .iter()
        .map(|(peer, list)| {
            let staged: Vec<WireIdx> = list.iter().copied().map(WireIdx::of).collect();
            comm.isend(*peer, tag, wire::cast_slice(&staged))
        })
        .collect();

    let mut lists = Vec::with_capacity(incoming.len());
    for (&(peer, count), handle) in incoming.iter().zip(recvs) {
        let bytes = recv_exact(handle, peer, count * std::mem::size_of::<WireIdx>())?;
        let decoded: Vec<WireIdx> =
            wire::decode_vec(&bytes).map_err(|message| SfError::CommError { neighbor: peer, message })?;
        lists.push(decoded.iter().map(WireIdx::get).collect());
    }
    for send in sends {
        send.wait();
    }
    Ok(lists)
}

/// Every rank contributes one count; every rank learns all of them.
pub fn allgather_counts<C: Communicator>(
    comm: &C,
    tag: u16,
    mine: usize,
) -> Result<Vec<usize>, SfError> {
    exchange_counts(comm, tag, &vec![mine; comm.size()])
}

/// Two-sided rendezvous: each rank names the peers it targets and learns,
/// in ascending order, which ranks target it.
pub fn build_two_sided<C: Communicator>(
    comm: &C,
    tag: u16,
    targets: &[usize],
) -> Result<Vec<usize>, SfError> {
    let mut outgoing = vec![0usize; comm.size()];
    for &t in targets {
        outgoing[t] = 1;
    }
    let incoming = exchange_counts(comm, tag, &outgoing)?;
    Ok(incoming
        .iter()
        .enumerate()
        .filter(|&(_, &n)| n != 0)
        .map(|(peer, _)| peer)
        .collect())
}
