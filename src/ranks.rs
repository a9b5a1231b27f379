//! Rank resolver: turn the per-leaf edge list into per-rank communication
//! plans.
//!
//! [`setup_ranks`] classifies every leaf by the rank owning its root and
//! produces the outgoing plan: which ranks this rank pulls from, and the
//! leaf/root index pairs grouped per rank. Distinguished ranks (typically
//! just the caller itself, or a shared-memory group) are listed first so
//! transports can special-case them; each class is sorted by rank number so
//! schedules are deterministic.

use hashbrown::HashMap;
use log::debug;

use crate::graph::SfGraph;
use crate::sf_error::SfError;

/// Outgoing plan: roots referenced by this rank's leaves, grouped by owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RankTable {
    /// Referenced ranks, distinguished-first, each class ascending.
    pub ranks: Vec<usize>,
    /// How many leading entries of `ranks` are distinguished.
    pub ndranks: usize,
    /// Slice boundaries into `rmine`/`rremote`, length `ranks.len() + 1`.
    pub roffset: Vec<usize>,
    /// Leaf buffer positions, grouped by owning rank.
    pub rmine: Vec<usize>,
    /// Root indices on the owning rank, parallel to `rmine`.
    pub rremote: Vec<usize>,
}

impl RankTable {
    /// Number of edges aimed at `ranks[i]`.
    pub fn count(&self, i: usize) -> usize {
        self.roffset[i + 1] - self.roffset[i]
    }
}

/// Incoming plan: local roots referenced by other ranks' leaves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafRanks {
    /// Ranks holding leaves of our roots.
    pub ranks: Vec<usize>,
    /// Slice boundaries into `irootloc`, length `ranks.len() + 1`.
    pub ioffset: Vec<usize>,
    /// Local root indices requested by each rank, grouped per rank.
    pub irootloc: Vec<usize>,
}

/// Build the outgoing [`RankTable`] for `graph`.
///
/// `dgroup` lists the distinguished ranks; it is expected to stay small
/// (usually one entry), so membership is checked by linear scan.
pub fn setup_ranks(graph: &SfGraph, dgroup: &[usize]) -> Result<RankTable, SfError> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for r in &graph.remote {
        *counts.entry(r.rank).or_insert(0) += 1;
    }

    let (mut dist, mut rest): (Vec<(usize, usize)>, Vec<(usize, usize)>) = counts
        .into_iter()
        .partition(|(rank, _)| dgroup.contains(rank));
    dist.sort_unstable();
    rest.sort_unstable();
    let ndranks = dist.len();

    let mut ranks = Vec::with_capacity(dist.len() + rest.len());
    let mut roffset = Vec::with_capacity(dist.len() + rest.len() + 1);
    roffset.push(0);
    for &(rank, count) in dist.iter().chain(rest.iter()) {
        ranks.push(rank);
        roffset.push(roffset.last().copied().unwrap_or(0) + count);
    }
    debug!(
        "setup_ranks: {} leaves over {} ranks ({} distinguished)",
        graph.nleaves,
        ranks.len(),
        ndranks
    );

    // Relocate each leaf into its rank's slice. Leaves referencing the same
    // rank usually come in runs, so the previous hit short-circuits the
    // lookup.
    let mut cursor = roffset[..ranks.len()].to_vec();
    let mut rmine = vec![0usize; graph.nleaves];
    let mut rremote = vec![0usize; graph.nleaves];
    let mut prev_rank = usize::MAX;
    let mut irank = usize::MAX;
    for (i, r) in graph.remote.iter().enumerate() {
        if r.rank != prev_rank {
            irank = match ranks[..ndranks].binary_search(&r.rank) {
                Ok(k) => k,
                Err(_) => match ranks[ndranks..].binary_search(&r.rank) {
                    Ok(k) => ndranks + k,
                    Err(_) => {
                        debug_assert!(false, "rank {} missing from rank table", r.rank);
                        return Err(SfError::Internal(format!(
                            "could not find rank {} in rank table",
                            r.rank
                        )));
                    }
                },
            };
            prev_rank = r.rank;
        }
        rmine[cursor[irank]] = graph.leaf_id(i);
        rremote[cursor[irank]] = r.index;
        cursor[irank] += 1;
    }

    Ok(RankTable {
        ranks,
        ndranks,
        roffset,
        rmine,
        rremote,
    })
}
