//! The star forest object: graph lifecycle, configuration, and setup.
//!
//! A [`StarForest`] describes a bipartite communication graph between root
//! slots this rank owns and leaf slots that reference roots anywhere on the
//! communicator. Data movement (`bcast`, `reduce`, `fetch_and_op`,
//! `gather`/`scatter`) lives in the dispatch layer; derived-graph surgery
//! (inverse, compose, embedding) in the derived layer.

use std::io::Write as IoWrite;

use log::debug;

use crate::comm::Communicator;
use crate::dispatch::DegreePending;
use crate::graph::{Remote, SfGraph, SfPattern};
use crate::ranks::{LeafRanks, RankTable};
use crate::sf_error::SfError;
use crate::transport::{make_transport, SfType, Transport};

/// Options for [`StarForest::duplicate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DuplicateOption {
    /// Copy configuration (type, rank ordering, distinguished group) only.
    ConfOnly,
    /// Like `ConfOnly`; kept as a distinct intent marker for callers that
    /// will immediately attach a graph over the same rank connectivity.
    Ranks,
    /// Copy the graph as well (patterned graphs are re-derived).
    Graph,
}

/// Incoming and outgoing neighbor ranks, cached by [`StarForest::get_groups`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Groups {
    /// Ranks whose leaves reference our roots.
    pub incoming: Vec<usize>,
    /// Ranks our leaves reference.
    pub outgoing: Vec<usize>,
}

/// A bulk data-movement graph over a communicator.
pub struct StarForest<C: Communicator> {
    pub(crate) comm: C,
    pub(crate) graph: Option<SfGraph>,
    pub(crate) kind: SfType,
    pub(crate) transport: Option<Box<dyn Transport<C>>>,
    pub(crate) setup_done: bool,
    pub(crate) rank_order: bool,
    pub(crate) dgroup: Vec<usize>,
    pub(crate) multi: Option<Box<StarForest<C>>>,
    pub(crate) degree: Option<Vec<u64>>,
    pub(crate) degree_pending: Option<DegreePending<C>>,
    pub(crate) groups: Option<Groups>,
}

impl<C: Communicator> StarForest<C> {
    /// An empty forest; no graph until [`set_graph`](Self::set_graph) or
    /// [`set_graph_with_pattern`](Self::set_graph_with_pattern).
    pub fn new(comm: C) -> Self {
        let dgroup = vec![comm.rank()];
        StarForest {
            comm,
            graph: None,
            kind: SfType::Basic,
            transport: None,
            setup_done: false,
            rank_order: true,
            dgroup,
            multi: None,
            degree: None,
            degree_pending: None,
            groups: None,
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of local root slots, once a graph is set.
    pub fn nroots(&self) -> Option<usize> {
        self.graph.as_ref().map(|g| g.nroots)
    }

    /// Number of local leaves, once a graph is set.
    pub fn nleaves(&self) -> Option<usize> {
        self.graph.as_ref().map(|g| g.nleaves)
    }

    pub(crate) fn graph_checked(&self) -> Result<&SfGraph, SfError> {
        self.graph.as_ref().ok_or(SfError::GraphNotSet)
    }

    pub(crate) fn transport_ref(&self) -> Result<&dyn Transport<C>, SfError> {
        self.transport
            .as_deref()
            .ok_or(SfError::WrongState("star forest has not been set up"))
    }

    /// Describe the graph. `local` is the leaf placement in leaf buffers
    /// (`None` for the identity); `remote[i]` is the root referenced by
    /// leaf `i`. An identity `local` permutation is discarded on entry.
    ///
    /// Setting a graph discards any resolved state from a previous graph;
    /// the chosen transport type and rank ordering survive.
    pub fn set_graph(
        &mut self,
        nroots: usize,
        nleaves: usize,
        local: Option<Vec<usize>>,
        remote: Vec<Remote>,
    ) -> Result<(), SfError> {
        let graph = SfGraph::new(
            nroots,
            nleaves,
            local,
            remote,
            self.comm.rank(),
            self.comm.size(),
        )?;
        self.reset();
        debug!(
            "set_graph: rank {} with {} roots, {} leaves",
            self.comm.rank(),
            nroots,
            nleaves
        );
        self.graph = Some(graph);
        Ok(())
    }

    /// Describe a patterned graph from a root layout.
    ///
    /// `local_roots` is this rank's share of the root space (insignificant
    /// for `Alltoall`). `Allgather`/`Gather` pick the degree-uniform
    /// transport variant when every rank contributes the same count,
    /// otherwise the general `-v` form. Patterned graphs have no
    /// distinguished ranks.
    pub fn set_graph_with_pattern(
        &mut self,
        local_roots: usize,
        pattern: SfPattern,
    ) -> Result<(), SfError> {
        let size = self.comm.size();
        let rank = self.comm.rank();
        match pattern {
            SfPattern::General => return Err(SfError::UnsupportedPattern("general")),
            SfPattern::Alltoall => {
                self.reset();
                self.kind = SfType::Alltoall;
                // The edge list is synthesized lazily on the first
                // get_graph call.
                self.graph = Some(SfGraph::patterned(
                    size,
                    size,
                    Vec::new(),
                    SfPattern::Alltoall,
                    vec![size; size],
                ));
            }
            SfPattern::Allgather | SfPattern::Gather => {
                let sizes = crate::comm::collective::allgather_counts(
                    &self.comm,
                    crate::comm::tag::LAYOUT,
                    local_roots,
                )?;
                self.reset();
                let total: usize = sizes.iter().sum();
                let uniform = sizes.windows(2).all(|w| w[0] == w[1]);
                self.kind = match (pattern, uniform) {
                    (SfPattern::Allgather, true) => SfType::Allgather,
                    (SfPattern::Allgather, false) => SfType::Allgatherv,
                    (SfPattern::Gather, true) => SfType::Gather,
                    _ => SfType::Gatherv,
                };
                let nleaves = if pattern == SfPattern::Gather && rank != 0 {
                    0
                } else {
                    total
                };
                let mut remote = Vec::with_capacity(nleaves);
                if nleaves > 0 {
                    for (owner, &count) in sizes.iter().enumerate() {
                        remote.extend((0..count).map(|idx| Remote::new(owner, idx)));
                    }
                }
                self.graph = Some(SfGraph::patterned(
                    local_roots,
                    nleaves,
                    remote,
                    pattern,
                    sizes,
                ));
            }
        }
        Ok(())
    }

    /// The graph, legal before setup. Alltoall forests synthesize their
    /// symmetric edge list on first request.
    pub fn get_graph(&mut self) -> Result<(usize, usize, Option<&[usize]>, &[Remote]), SfError> {
        let g = self.graph.as_mut().ok_or(SfError::GraphNotSet)?;
        g.materialize_alltoall();
        Ok((g.nroots, g.nleaves, g.local.as_deref(), &g.remote))
    }

    /// Half-open range spanned by leaf buffer positions.
    pub fn leaf_range(&self) -> Result<std::ops::Range<usize>, SfError> {
        Ok(self.graph_checked()?.leaf_range())
    }

    /// Release the graph and all resolved state; the transport type, rank
    /// ordering, and distinguished group survive. Idempotent.
    pub fn reset(&mut self) {
        self.graph = None;
        self.transport = None;
        self.setup_done = false;
        self.multi = None;
        self.degree = None;
        self.degree_pending = None;
        self.groups = None;
    }

    /// Resolve communication plans. Runs implicitly before the first data
    /// movement or rank query; calling it again is a no-op until the graph
    /// changes.
    pub fn setup(&mut self) -> Result<(), SfError> {
        if self.setup_done {
            return Ok(());
        }
        let graph = self.graph.as_ref().ok_or(SfError::GraphNotSet)?;
        let mut transport = self
            .transport
            .take()
            .unwrap_or_else(|| make_transport(self.kind));
        transport.setup(graph, &self.comm, &self.dgroup)?;
        self.transport = Some(transport);
        self.setup_done = true;
        Ok(())
    }

    /// Select the transport. Changing the type discards resolved plans.
    pub fn set_type(&mut self, kind: SfType) -> Result<(), SfError> {
        if kind != self.kind {
            self.kind = kind;
            self.transport = None;
            self.setup_done = false;
        }
        Ok(())
    }

    /// Select the transport by its `sf_type` configuration name.
    pub fn set_type_by_name(&mut self, name: &str) -> Result<(), SfError> {
        self.set_type(name.parse()?)
    }

    pub fn get_type(&self) -> SfType {
        self.kind
    }

    /// Whether gather/scatter slots are ordered by contributing rank
    /// (default true). Must be chosen before the first gather or scatter.
    pub fn set_rank_order(&mut self, flag: bool) -> Result<(), SfError> {
        if self.multi.is_some() {
            return Err(SfError::RankOrderAfterMulti);
        }
        self.rank_order = flag;
        Ok(())
    }

    /// Ranks to distinguish in the resolved tables (e.g. self or a
    /// shared-memory group). Defaults to just this rank.
    pub fn set_distinguished_group(&mut self, dgroup: Vec<usize>) -> Result<(), SfError> {
        if self.setup_done {
            return Err(SfError::WrongState(
                "distinguished group must be set before setup",
            ));
        }
        self.dgroup = dgroup;
        Ok(())
    }

    /// Outgoing plan: ranks our leaves pull from. Sets up if needed.
    pub fn root_ranks(&mut self) -> Result<&RankTable, SfError> {
        self.setup()?;
        self.transport_ref()?.root_ranks()
    }

    /// Incoming plan: ranks that pull from our roots. Sets up if needed.
    pub fn leaf_ranks(&mut self) -> Result<&LeafRanks, SfError> {
        self.setup()?;
        self.transport_ref()?.leaf_ranks()
    }

    /// Duplicate configuration and optionally the graph.
    pub fn duplicate(&self, opt: DuplicateOption) -> Result<StarForest<C>, SfError> {
        let mut new = StarForest::new(self.comm.clone());
        new.kind = self.kind;
        new.rank_order = self.rank_order;
        new.dgroup = self.dgroup.clone();
        if opt == DuplicateOption::Graph {
            let g = self.graph_checked()?;
            if g.pattern == SfPattern::General {
                new.set_graph(g.nroots, g.nleaves, g.local.clone(), g.remote.clone())?;
            } else {
                new.set_graph_with_pattern(g.nroots, g.pattern)?;
            }
        }
        Ok(new)
    }

    /// A configuration-only duplicate whose transport accepts general
    /// graphs; patterned-only types fall back to `basic`.
    pub(crate) fn duplicate_as_general(&self) -> Result<StarForest<C>, SfError> {
        let mut new = self.duplicate(DuplicateOption::ConfOnly)?;
        if !matches!(
            new.kind,
            SfType::Basic | SfType::Window | SfType::Neighbor
        ) {
            new.set_type(SfType::Basic)?;
        }
        Ok(new)
    }

    /// Write a diagnostic dump. With `detail`, the resolved per-rank edge
    /// groups are included as well.
    pub fn view<W: IoWrite>(&mut self, w: &mut W, detail: bool) -> Result<(), SfError> {
        let io = |e: std::io::Error| SfError::Io(e.to_string());
        if self.graph.is_some() {
            self.setup()?;
        }
        writeln!(
            w,
            "star forest: type={}, rank order={}",
            self.kind, self.rank_order
        )
        .map_err(io)?;
        let rank = self.comm.rank();
        let Some(g) = self.graph.as_ref() else {
            writeln!(w, "  graph has not been set yet").map_err(io)?;
            return Ok(());
        };
        if g.pattern != SfPattern::General {
            writeln!(w, "  [{rank}] patterned graph ({:?})", g.pattern).map_err(io)?;
            return Ok(());
        }
        let table = self.transport_ref()?.root_ranks()?;
        writeln!(
            w,
            "  [{rank}] number of roots={}, leaves={}, remote ranks={}",
            g.nroots,
            g.nleaves,
            table.ranks.len()
        )
        .map_err(io)?;
        for (i, r) in g.remote.iter().enumerate() {
            writeln!(w, "  [{rank}] {} <- ({},{})", g.leaf_id(i), r.rank, r.index).map_err(io)?;
        }
        if detail {
            writeln!(w, "  [{rank}] roots referenced by my leaves, by rank").map_err(io)?;
            let mut order: Vec<usize> = (0..table.ranks.len()).collect();
            order.sort_by_key(|&k| table.ranks[k]);
            for k in order {
                writeln!(
                    w,
                    "  [{rank}] {}: {} edges",
                    table.ranks[k],
                    table.count(k)
                )
                .map_err(io)?;
                for j in table.roffset[k]..table.roffset[k + 1] {
                    writeln!(w, "  [{rank}]    {} <- {}", table.rmine[j], table.rremote[j])
                        .map_err(io)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;

    #[test]
    fn no_graph_until_set() {
        let sf = StarForest::new(ThreadComm::solo());
        assert_eq!(sf.nroots(), None);
        assert!(matches!(sf.leaf_range(), Err(SfError::GraphNotSet)));
    }

    #[test]
    fn setup_requires_graph() {
        let mut sf = StarForest::new(ThreadComm::solo());
        assert_eq!(sf.setup().unwrap_err(), SfError::GraphNotSet);
    }

    #[test]
    fn set_graph_resets_resolved_state() {
        let mut sf = StarForest::new(ThreadComm::solo());
        sf.set_graph(2, 1, None, vec![Remote::new(0, 1)]).unwrap();
        sf.setup().unwrap();
        assert!(sf.setup_done);
        sf.set_graph(3, 1, None, vec![Remote::new(0, 2)]).unwrap();
        assert!(!sf.setup_done);
        sf.setup().unwrap();
        assert_eq!(sf.root_ranks().unwrap().ranks, vec![0]);
    }

    #[test]
    fn rank_order_locked_by_multi() {
        let mut sf = StarForest::new(ThreadComm::solo());
        sf.set_graph(1, 2, None, vec![Remote::new(0, 0), Remote::new(0, 0)])
            .unwrap();
        let mut out = vec![0u64; 2];
        sf.gather(&[5u64, 7u64], &mut out).unwrap();
        assert_eq!(sf.set_rank_order(false), Err(SfError::RankOrderAfterMulti));
    }

    #[test]
    fn view_prints_edges() {
        let mut sf = StarForest::new(ThreadComm::solo());
        sf.set_graph(2, 2, None, vec![Remote::new(0, 1), Remote::new(0, 0)])
            .unwrap();
        let mut out = Vec::new();
        sf.view(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("type=basic"));
        assert!(text.contains("0 <- (0,1)"));
        assert!(text.contains("roots referenced by my leaves"));
    }

    #[test]
    fn view_before_graph_is_harmless() {
        let mut sf = StarForest::new(ThreadComm::solo());
        let mut out = Vec::new();
        sf.view(&mut out, false).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("not been set"));
    }
}
