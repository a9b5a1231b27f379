//! Operations that build new star forests out of existing ones: inversion,
//! composition, embedding, intra-process restriction, and neighbor groups.

use log::debug;

use crate::comm::{Communicator, ThreadComm};
use crate::graph::Remote;
use crate::op::Replace;
use crate::sf::{Groups, StarForest};
use crate::sf_error::SfError;
use crate::transport::BasicTransport;

impl<C: Communicator> StarForest<C> {
    /// Swap the roles of roots and leaves: the inverse forest's roots are
    /// our leaf buffer positions and its leaves are our referenced roots.
    /// Roots of degree zero produce no inverse leaf; roots of degree above
    /// one keep one contributor (the highest-ranked one wins).
    pub fn create_inverse(&mut self) -> Result<StarForest<C>, SfError> {
        self.setup()?;
        let (nroots, width) = {
            let g = self.graph_checked()?;
            (g.nroots, g.leaf_width())
        };
        let me = self.comm.rank();
        let leaves: Vec<Remote> = (0..width).map(|i| Remote::new(me, i)).collect();
        let mut roots = vec![Remote::NONE; nroots];
        self.reduce(&leaves, &mut roots, Replace)?;

        let count = roots.iter().filter(|r| !r.is_none()).count();
        let (local, remote) = if count == nroots {
            (None, roots)
        } else {
            let mut local = Vec::with_capacity(count);
            let mut remote = Vec::with_capacity(count);
            for (i, r) in roots.into_iter().enumerate() {
                if !r.is_none() {
                    local.push(i);
                    remote.push(r);
                }
            }
            (Some(local), remote)
        };
        let mut inverse = self.duplicate_as_general()?;
        inverse.set_graph(width, count, local, remote)?;
        Ok(inverse)
    }

    /// Chain two forests: the result's leaves are `other`'s leaves and its
    /// roots are ours, pairing our leaf ids with `other`'s root indices.
    /// Our leaf space must be dense and as large as `other`'s root space.
    pub fn compose(&mut self, other: &mut StarForest<C>) -> Result<StarForest<C>, SfError> {
        let (nroots_a, nleaves_a, range_a, remote_a, local_a) = {
            let g = self.graph_checked()?;
            (
                g.nroots,
                g.nleaves,
                g.leaf_range(),
                g.remote.clone(),
                g.local.clone(),
            )
        };
        if range_a.len() != nleaves_a {
            return Err(SfError::IncompatibleGraphs(
                "first star forest cannot have a sparse leaf space",
            ));
        }
        let (nroots_b, nleaves_b, width_b, local_b) = {
            let g = other.graph_checked()?;
            (g.nroots, g.nleaves, g.leaf_width(), g.local.clone())
        };
        if nroots_b != nleaves_a {
            return Err(SfError::IncompatibleGraphs(
                "second star forest must have one root per leaf of the first",
            ));
        }
        // Push each of our roots' locations through the second forest.
        let mut rootdata = vec![Remote::NONE; nroots_b];
        for (i, r) in remote_a.iter().enumerate() {
            let lid = local_a.as_ref().map_or(i, |l| l[i]);
            rootdata[lid - range_a.start] = *r;
        }
        let mut leafdata = vec![Remote::NONE; width_b];
        other.bcast(&rootdata, &mut leafdata)?;

        let remote_ba: Vec<Remote> = (0..nleaves_b)
            .map(|j| leafdata[local_b.as_ref().map_or(j, |l| l[j])])
            .collect();
        let mut out = StarForest::new(self.comm.clone());
        out.set_graph(nroots_a, nleaves_b, local_b, remote_ba)?;
        Ok(out)
    }

    /// Chain this forest with the inverse of `other`, without building the
    /// inverse: leaf values of ours are reduced onto `other`'s roots. Both
    /// forests must share their leaf space, and every root of `other` must
    /// be referenced exactly once.
    pub fn compose_inverse(&mut self, other: &mut StarForest<C>) -> Result<StarForest<C>, SfError> {
        let (nroots_a, nleaves_a, width_a, remote_a, local_a) = {
            let g = self.graph_checked()?;
            (
                g.nroots,
                g.nleaves,
                g.leaf_width(),
                g.remote.clone(),
                g.local.clone(),
            )
        };
        let (nroots_b, nleaves_b, width_b) = {
            let g = other.graph_checked()?;
            (g.nroots, g.nleaves, g.leaf_width())
        };
        if nleaves_a != nleaves_b {
            return Err(SfError::IncompatibleGraphs(
                "both star forests must share their leaf space",
            ));
        }
        let mut leafdata = vec![Remote::NONE; width_a.max(width_b)];
        for (i, r) in remote_a.iter().enumerate() {
            let lid = local_a.as_ref().map_or(i, |l| l[i]);
            leafdata[lid] = *r;
        }
        let mut remote_ba = vec![Remote::NONE; nroots_b];
        other.reduce(&leafdata, &mut remote_ba, Replace)?;
        if remote_ba.iter().any(|r| r.is_none()) {
            return Err(SfError::IncompatibleGraphs(
                "every root of the second star forest needs exactly one leaf",
            ));
        }
        let mut out = StarForest::new(self.comm.clone());
        out.set_graph(nroots_a, nroots_b, None, remote_ba)?;
        Ok(out)
    }

    /// Restrict the forest to edges ending in `selected` roots. Collective;
    /// leaves pointing at unselected roots (anywhere) are dropped, root and
    /// leaf indices keep their original numbering.
    pub fn create_embedded(&mut self, selected: &[usize]) -> Result<StarForest<C>, SfError> {
        let mut sel = selected.to_vec();
        sel.sort_unstable();
        sel.dedup();
        let nroots = self.graph_checked()?.nroots;
        if let Some(&max) = sel.last() {
            if max >= nroots {
                return Err(SfError::SelectionOutOfRange {
                    index: max,
                    limit: nroots,
                });
            }
        }
        self.setup()?;

        if let Some(built) =
            self.transport_ref()?
                .embedded(self.graph_checked()?, &self.comm, &sel)?
        {
            let mut esf = StarForest::new(self.comm.clone());
            esf.set_graph(
                built.parts.nroots,
                built.parts.nleaves,
                built.parts.local,
                built.parts.remote,
            )?;
            if let Some((root, leaf)) = built.tables {
                esf.transport = Some(Box::new(BasicTransport::from_parts(root, leaf)));
                esf.setup_done = true;
            }
            return Ok(esf);
        }

        // Generic path: broadcast a selection indicator over a dense-leaf
        // twin of this graph, then keep the flagged edges.
        let (nleaves, local, remote) = {
            let g = self.graph_checked()?;
            (g.nleaves, g.local.clone(), g.remote.clone())
        };
        let mut indicator = vec![0u64; nroots];
        for &r in &sel {
            indicator[r] = 1;
        }
        let mut twin = self.duplicate_as_general()?;
        twin.set_graph(nroots, nleaves, None, remote.clone())?;
        let mut flags = vec![0u64; nleaves];
        twin.bcast(&indicator, &mut flags)?;

        let mut new_local = Vec::new();
        let mut new_remote = Vec::new();
        for i in 0..nleaves {
            if flags[i] != 0 {
                new_local.push(local.as_ref().map_or(i, |l| l[i]));
                new_remote.push(remote[i]);
            }
        }
        debug!(
            "embedded: rank {} keeps {} of {} leaves",
            self.rank(),
            new_remote.len(),
            nleaves
        );
        let n = new_remote.len();
        let mut esf = StarForest::new(self.comm.clone());
        esf.set_graph(nroots, n, Some(new_local), new_remote)?;
        Ok(esf)
    }

    /// Restrict the forest to edges starting at `selected` leaf buffer
    /// positions. Purely local; no communication.
    pub fn create_embedded_leaf(&mut self, selected: &[usize]) -> Result<StarForest<C>, SfError> {
        self.get_graph()?;
        let g = self.graph_checked()?;
        let width = g.leaf_width();
        let mut sel = selected.to_vec();
        sel.sort_unstable();
        sel.dedup();
        if let Some(&max) = sel.last() {
            if max >= width {
                return Err(SfError::SelectionOutOfRange {
                    index: max,
                    limit: width,
                });
            }
        }
        let mut new_local = Vec::new();
        let mut new_remote = Vec::new();
        for i in 0..g.nleaves {
            let lid = g.leaf_id(i);
            if sel.binary_search(&lid).is_ok() {
                new_local.push(lid);
                new_remote.push(g.remote[i]);
            }
        }
        let (nroots, n) = (g.nroots, new_remote.len());
        let mut esf = StarForest::new(self.comm.clone());
        esf.set_graph(nroots, n, Some(new_local), new_remote)?;
        Ok(esf)
    }

    /// The single-rank forest of this rank's self-edges, on its own
    /// communicator. Root indices are not remapped.
    pub fn create_local(&mut self) -> Result<StarForest<ThreadComm>, SfError> {
        self.setup()?;
        let me = self.comm.rank();
        let mut lsf = StarForest::new(ThreadComm::solo());
        if let Some(parts) = self
            .transport_ref()?
            .local_graph(self.graph_checked()?, me)
        {
            lsf.set_graph(parts.nroots, parts.nleaves, parts.local, parts.remote)?;
            return Ok(lsf);
        }
        let g = self.graph_checked()?;
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for (i, r) in g.remote.iter().enumerate() {
            if r.rank == me {
                local.push(g.leaf_id(i));
                remote.push(Remote::new(0, r.index));
            }
        }
        let (nroots, n) = (g.nroots, remote.len());
        lsf.set_graph(nroots, n, Some(local), remote)?;
        Ok(lsf)
    }

    /// Ranks we exchange data with: `outgoing` are the owners our leaves
    /// reference, `incoming` the ranks whose leaves reference our roots
    /// (sorted ascending). Cached; collective on first use.
    pub fn get_groups(&mut self) -> Result<&Groups, SfError> {
        self.setup()?;
        if self.groups.is_none() {
            let outgoing = self.transport_ref()?.root_ranks()?.ranks.clone();
            // A one-root bookkeeping forest: each referenced owner gets one
            // leaf, so the degree of our root counts the ranks referencing
            // us, and a gather tells us who they are.
            let remote: Vec<Remote> = outgoing.iter().map(|&r| Remote::new(r, 0)).collect();
            let mut bg = self.duplicate_as_general()?;
            bg.set_graph(1, outgoing.len(), None, remote)?;
            let indegree = bg.compute_degree()?[0] as usize;
            let announce = vec![self.comm.rank() as u64; outgoing.len()];
            let mut sources = vec![0u64; indegree];
            bg.gather(&announce, &mut sources)?;
            let mut incoming: Vec<usize> = sources.into_iter().map(|r| r as usize).collect();
            incoming.sort_unstable();
            self.groups = Some(Groups { incoming, outgoing });
        }
        self.groups
            .as_ref()
            .ok_or_else(|| SfError::Internal("neighbor groups missing after construction".into()))
    }
}
