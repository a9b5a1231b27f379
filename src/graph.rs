//! The bipartite root/leaf graph description.
//!
//! A star forest on each rank owns `nroots` root slots and holds `nleaves`
//! leaf references into root slots anywhere on the communicator. `local`
//! gives each leaf's position in leaf data buffers (`None` means the
//! identity layout 0..nleaves), and `remote[i]` names the `(rank, index)`
//! of the root that leaf `i` points at.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::sf_error::SfError;

/// Location of a root slot on the communicator.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Remote {
    pub rank: usize,
    pub index: usize,
}

impl Remote {
    /// Sentinel for "no contributor"; used when compacting reduction results.
    pub const NONE: Remote = Remote {
        rank: usize::MAX,
        index: usize::MAX,
    };

    pub fn new(rank: usize, index: usize) -> Self {
        Remote { rank, index }
    }

    pub fn is_none(&self) -> bool {
        self.rank == usize::MAX
    }
}

/// Canned graph shapes that map onto specialized transports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SfPattern {
    General,
    Allgather,
    Gather,
    Alltoall,
}

/// A validated star-forest graph.
#[derive(Clone, Debug)]
pub struct SfGraph {
    pub nroots: usize,
    pub nleaves: usize,
    /// Leaf positions in leaf data buffers; `None` encodes the identity.
    pub local: Option<Vec<usize>>,
    /// Root location for each leaf, parallel to `local`.
    pub remote: Vec<Remote>,
    pub pattern: SfPattern,
    /// Per-rank root counts; present only on patterned graphs.
    pub layout: Option<Vec<usize>>,
    min_leaf: usize,
    /// One past the largest leaf id; also the required leaf buffer length.
    width: usize,
}

impl SfGraph {
    /// Validate and normalize a general graph.
    ///
    /// Identity `local` permutations are discarded: they encode contiguous
    /// storage, and dropping them lets transports skip a level of
    /// indirection. Observable semantics do not change.
    pub fn new(
        nroots: usize,
        nleaves: usize,
        local: Option<Vec<usize>>,
        remote: Vec<Remote>,
        my_rank: usize,
        comm_size: usize,
    ) -> Result<Self, SfError> {
        if let Some(ref l) = local {
            if l.len() != nleaves {
                return Err(SfError::MismatchedLengths {
                    what: "local leaf indices",
                    expected: nleaves,
                    got: l.len(),
                });
            }
        }
        if remote.len() != nleaves {
            return Err(SfError::MismatchedLengths {
                what: "remote root locations",
                expected: nleaves,
                got: remote.len(),
            });
        }
        for (leaf, r) in remote.iter().enumerate() {
            if r.rank >= comm_size {
                return Err(SfError::RankOutOfRange {
                    leaf,
                    rank: r.rank,
                    size: comm_size,
                });
            }
            // Only self-references can be validated without communication.
            if r.rank == my_rank && r.index >= nroots {
                return Err(SfError::RootIndexOutOfRange {
                    leaf,
                    index: r.index,
                    nroots,
                });
            }
        }

        let (local, min_leaf, width) = match local {
            Some(l) if nleaves > 0 => {
                let min = l.iter().copied().min().unwrap_or(0);
                let max = l.iter().copied().max().unwrap_or(0);
                let identity = l.iter().enumerate().all(|(i, &v)| v == i);
                (if identity { None } else { Some(l) }, min, max + 1)
            }
            _ => (None, 0, nleaves),
        };

        Ok(SfGraph {
            nroots,
            nleaves,
            local,
            remote,
            pattern: SfPattern::General,
            layout: None,
            min_leaf,
            width,
        })
    }

    /// Build a patterned graph with a known root layout. Patterned leaves
    /// are always contiguous, and the edge list may be deferred (alltoall).
    pub(crate) fn patterned(
        nroots: usize,
        nleaves: usize,
        remote: Vec<Remote>,
        pattern: SfPattern,
        layout: Vec<usize>,
    ) -> SfGraph {
        SfGraph {
            nroots,
            nleaves,
            local: None,
            remote,
            pattern,
            layout: Some(layout),
            min_leaf: 0,
            width: nleaves,
        }
    }

    /// Leaf data buffer position of leaf `i`.
    #[inline]
    pub fn leaf_id(&self, i: usize) -> usize {
        match &self.local {
            Some(l) => l[i],
            None => i,
        }
    }

    /// Half-open range spanned by leaf ids.
    pub fn leaf_range(&self) -> std::ops::Range<usize> {
        self.min_leaf..self.width
    }

    /// Required length for dense leaf data buffers.
    #[inline]
    pub fn leaf_width(&self) -> usize {
        self.width
    }

    /// Synthesize the complete-bipartite edge list of an alltoall graph.
    ///
    /// Patterned alltoall graphs carry no edge list until someone asks for
    /// one; the synthesized form reports leaf `i` as attached to
    /// `(rank i, index i)`, matching the graph's symmetric role rather than
    /// the analytic communication plan the transport actually uses.
    pub(crate) fn materialize_alltoall(&mut self) {
        if self.pattern == SfPattern::Alltoall && self.remote.is_empty() && self.nleaves > 0 {
            self.remote = (0..self.nleaves).map(|i| Remote::new(i, i)).collect();
        }
    }
}
