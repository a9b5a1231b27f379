//! Complete-bipartite transport: every rank holds one root and one leaf per
//! peer (`nroots == nleaves == comm size`).
//!
//! The shape is fully determined by the communicator, so setup synthesizes
//! its plans analytically instead of running the generic resolver and
//! discovery exchange. Data ops then degenerate into one contiguous
//! single-unit message per peer.

use crate::comm::{collective, tag, Communicator};
use crate::graph::{Remote, SfGraph};
use crate::ranks::{LeafRanks, RankTable};
use crate::sf_error::SfError;
use crate::transport::{EmbeddedGraph, GraphParts, SfType, Transport};

#[derive(Default)]
pub struct AlltoallTransport {
    root: Option<RankTable>,
    leaf: Option<LeafRanks>,
}

impl AlltoallTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Communicator> Transport<C> for AlltoallTransport {
    fn kind(&self) -> SfType {
        SfType::Alltoall
    }

    fn setup(&mut self, graph: &SfGraph, comm: &C, _dgroup: &[usize]) -> Result<(), SfError> {
        let size = comm.size();
        let rank = comm.rank();
        if graph.nroots != size || graph.nleaves != size {
            return Err(SfError::Unsupported {
                transport: SfType::Alltoall,
                op: "graphs without nroots == nleaves == communicator size",
            });
        }
        // Leaf j pulls root index `rank` from rank j; rank k pulls our root
        // k. No distinguished ranks on patterned graphs.
        self.root = Some(RankTable {
            ranks: (0..size).collect(),
            ndranks: 0,
            roffset: (0..=size).collect(),
            rmine: (0..size).collect(),
            rremote: vec![rank; size],
        });
        self.leaf = Some(LeafRanks {
            ranks: (0..size).collect(),
            ioffset: (0..=size).collect(),
            irootloc: (0..size).collect(),
        });
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

    fn local_graph(&self, graph: &SfGraph, my_rank: usize) -> Option<GraphParts> {
        // The only intra-process edge is the diagonal one. Root indices are
        // not remapped, so the root space keeps its original extent.
        Some(GraphParts {
            nroots: graph.nroots,
            nleaves: 1,
            local: Some(vec![my_rank]),
            remote: vec![Remote::new(0, my_rank)],
        })
    }

    fn embedded(
        &self,
        graph: &SfGraph,
        comm: &C,
        selected: &[usize],
    ) -> Result<Option<EmbeddedGraph>, SfError> {
        let rank = comm.rank();

        // Selecting root r keeps exactly the edge from rank r's leaf, and
        // our root index r is owned by rank r in the symmetric graph, so the
        // rendezvous targets are the selected indices themselves.
        let mut leaves = collective::build_two_sided(comm, tag::RENDEZVOUS, selected)?;
        distinguish_self(&mut leaves, rank);
        let ndranks = usize::from(leaves.first() == Some(&rank));

        let parts = GraphParts {
            nroots: graph.nleaves,
            nleaves: leaves.len(),
            local: Some(leaves.clone()),
            remote: leaves.iter().map(|&l| Remote::new(l, l)).collect(),
        };

        // Both plans are 1:1 maps, so fill them in directly rather than
        // re-running setup on the embedded forest.
        let n = leaves.len();
        let root = RankTable {
            ranks: leaves.clone(),
            ndranks,
            roffset: (0..=n).collect(),
            rmine: leaves.clone(),
            rremote: leaves,
        };
        let mut sources = selected.to_vec();
        distinguish_self(&mut sources, rank);
        let leaf = LeafRanks {
            ranks: sources.clone(),
            ioffset: (0..=sources.len()).collect(),
            irootloc: sources,
        };
        Ok(Some(EmbeddedGraph {
            parts,
            tables: Some((root, leaf)),
        }))
    }
}

/// Move `rank` to the front if present, keeping the rest ascending.
fn distinguish_self(ranks: &mut [usize], rank: usize) {
    ranks.sort_unstable();
    if let Ok(pos) = ranks.binary_search(&rank) {
        ranks[..=pos].rotate_right(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_rank_moves_to_front() {
        let mut v = vec![0, 2, 3, 5];
        distinguish_self(&mut v, 3);
        assert_eq!(v, vec![3, 0, 2, 5]);
    }

    #[test]
    fn absent_self_keeps_ascending_order() {
        let mut v = vec![5, 0, 2];
        distinguish_self(&mut v, 3);
        assert_eq!(v, vec![0, 2, 5]);
    }
}
