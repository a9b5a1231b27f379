//! Default two-sided transport for general graphs.
//!
//! Setup resolves the outgoing rank table, then runs a dense symmetric
//! count exchange so every rank learns which peers reference its roots and
//! which root indices they want. After that, data movement is the generic
//! pack/send/recv/unpack path.

use log::debug;

use crate::comm::{collective, tag, Communicator};
use crate::graph::SfGraph;
use crate::ranks::{setup_ranks, LeafRanks, RankTable};
use crate::sf_error::SfError;
use crate::transport::{SfType, Transport};

#[derive(Default)]
pub struct BasicTransport {
    root: Option<RankTable>,
    leaf: Option<LeafRanks>,
}

impl BasicTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt plans resolved elsewhere (embedding shortcuts build these by
    /// hand instead of re-running discovery).
    pub(crate) fn from_parts(root: RankTable, leaf: LeafRanks) -> Self {
        BasicTransport {
            root: Some(root),
            leaf: Some(leaf),
        }
    }
}

impl<C: Communicator> Transport<C> for BasicTransport {
    fn kind(&self) -> SfType {
        SfType::Basic
    }

    fn setup(&mut self, graph: &SfGraph, comm: &C, dgroup: &[usize]) -> Result<(), SfError> {
        if self.root.is_some() && self.leaf.is_some() {
            return Ok(());
        }
        let table = setup_ranks(graph, dgroup)?;

        // Announce to every rank how many of its roots we reference.
        let mut outgoing = vec![0usize; comm.size()];
        for (k, &rank) in table.ranks.iter().enumerate() {
            outgoing[rank] = table.count(k);
        }
        let incoming = collective::exchange_counts(comm, tag::SETUP_COUNT, &outgoing)?;

        // Trade the requested root index lists.
        let sends: Vec<(usize, Vec<usize>)> = table
            .ranks
            .iter()
            .enumerate()
            .map(|(k, &rank)| {
                (
                    rank,
                    table.rremote[table.roffset[k]..table.roffset[k + 1]].to_vec(),
                )
            })
            .collect();
        let expect: Vec<(usize, usize)> = incoming
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n != 0)
            .map(|(rank, &n)| (rank, n))
            .collect();
        let lists = collective::exchange_index_lists(comm, tag::SETUP_INDICES, &sends, &expect)?;

        let mut ioffset = vec![0usize];
        let mut irootloc = Vec::new();
        for list in &lists {
            irootloc.extend_from_slice(list);
            ioffset.push(irootloc.len());
        }
        debug!(
            "basic setup: {} outgoing ranks, {} incoming ranks",
            table.ranks.len(),
            expect.len()
        );
        self.leaf = Some(LeafRanks {
            ranks: expect.iter().map(|&(rank, _)| rank).collect(),
            ioffset,
            irootloc,
        });
        self.root = Some(table);
        Ok(())
    }

    fn root_ranks(&self) -> Result<&RankTable, SfError> {
        self.root
            .as_ref()
            .ok_or(SfError::WrongState("transport has not been set up"))
    }

    fn leaf_ranks(&self) -> Result<&LeafRanks, SfError> {
        self.leaf
            .as_ref()
            .ok_or(SfError::WrongState("transport has not been set up"))
    }
}
