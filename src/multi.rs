//! The multi star forest: per-edge root slots for gather and scatter.
//!
//! A root referenced by `d` leaves is expanded into `d` consecutive slots,
//! each owned by exactly one leaf. `gather` then moves every leaf's value
//! into its private slot and `scatter` moves slot values back, with no
//! combining and no contention. Slot claiming runs a fetch-and-add over the
//! original forest; with rank ordering (the default) a second round sorts
//! each root's slots by contributing rank so the layout is independent of
//! claim timing.

use bytemuck::Pod;
use log::debug;

use crate::comm::Communicator;
use crate::dispatch::{BcastHandle, ReduceHandle};
use crate::graph::Remote;
use crate::op::{Add, Replace};
use crate::sf::{DuplicateOption, StarForest};
use crate::sf_error::SfError;
use crate::transport::SfType;

impl<C: Communicator> StarForest<C> {
    /// The multi star forest, built and cached on first use.
    pub fn get_multi(&mut self) -> Result<&mut StarForest<C>, SfError> {
        self.build_multi()?;
        self.multi
            .as_deref_mut()
            .ok_or_else(|| SfError::Internal("multi star forest missing after construction".into()))
    }

    /// Total number of multi-root slots on this rank (the required
    /// `multirootdata` length for gather and scatter).
    pub fn multi_nroots(&mut self) -> Result<usize, SfError> {
        let multi = self.get_multi()?;
        multi.graph_checked().map(|g| g.nroots)
    }

    fn build_multi(&mut self) -> Result<(), SfError> {
        if self.multi.is_some() {
            return Ok(());
        }
        self.setup()?;
        let degree = self.compute_degree()?.to_vec();
        let (nroots, nleaves, local, remote, width) = {
            let g = self.graph_checked()?;
            (
                g.nroots,
                g.nleaves,
                g.local.clone(),
                g.remote.clone(),
                g.leaf_width(),
            )
        };
        let leaf_id = |i: usize| local.as_ref().map_or(i, |l| l[i]);

        let mut inoffset = vec![0u64; nroots + 1];
        for i in 0..nroots {
            inoffset[i + 1] = inoffset[i] + degree[i];
        }
        let mroots = inoffset[nroots] as usize;

        // Each leaf claims the next free slot under its root.
        let mut rootoff: Vec<u64> = inoffset[..nroots].to_vec();
        let ones = vec![1u64; width];
        let mut leafoff = vec![0u64; width];
        self.fetch_and_op(&mut rootoff, &ones, &mut leafoff, Add)?;

        let mremote: Vec<Remote> = (0..nleaves)
            .map(|i| Remote::new(remote[i].rank, leafoff[leaf_id(i)] as usize))
            .collect();
        debug!(
            "multi graph: rank {} expands {} roots into {} slots",
            self.rank(),
            nroots,
            mroots
        );
        let mut msf = self.duplicate(DuplicateOption::Ranks)?;
        if !matches!(
            msf.get_type(),
            SfType::Basic | SfType::Window | SfType::Neighbor
        ) {
            msf.set_type(SfType::Basic)?;
        }
        msf.set_graph(mroots, nleaves, local.clone(), mremote)?;

        if self.rank_order {
            // Re-key each root's slots by contributing rank so the slot
            // layout does not depend on claim order.
            let outranks = vec![self.comm.rank() as u64; width];
            let mut inranks = vec![0u64; mroots];
            msf.reduce(&outranks, &mut inranks, Replace)?;
            let mut newoffset = vec![0u64; mroots];
            for i in 0..nroots {
                let base = inoffset[i] as usize;
                let deg = degree[i] as usize;
                let mut perm: Vec<usize> = (0..deg).collect();
                perm.sort_by_key(|&j| inranks[base + j]);
                for (j, &p) in perm.iter().enumerate() {
                    newoffset[base + p] = (base + j) as u64;
                }
            }
            let mut newout = vec![0u64; width];
            msf.bcast(&newoffset, &mut newout)?;
            let reordered: Vec<Remote> = (0..nleaves)
                .map(|i| Remote::new(remote[i].rank, newout[leaf_id(i)] as usize))
                .collect();
            msf.set_graph(mroots, nleaves, local, reordered)?;
        }

        self.multi = Some(Box::new(msf));
        Ok(())
    }

    /// Start moving each leaf's value into its private multi-root slot.
    pub fn gather_begin<T: Pod>(&mut self, leafdata: &[T]) -> Result<ReduceHandle<C, T>, SfError> {
        self.get_multi()?.reduce_begin(leafdata)
    }

    pub fn gather_end<T: Pod>(
        &mut self,
        handle: ReduceHandle<C, T>,
        multirootdata: &mut [T],
    ) -> Result<(), SfError> {
        let multi = self
            .multi
            .as_deref()
            .ok_or(SfError::WrongState("gather_end without gather_begin"))?;
        multi.reduce_end(handle, multirootdata, Replace)
    }

    /// Collect one value per referencing leaf under each root, blocking.
    pub fn gather<T: Pod>(
        &mut self,
        leafdata: &[T],
        multirootdata: &mut [T],
    ) -> Result<(), SfError> {
        let handle = self.gather_begin(leafdata)?;
        self.gather_end(handle, multirootdata)
    }

    /// Start moving multi-root slot values back to their owning leaves.
    pub fn scatter_begin<T: Pod>(
        &mut self,
        multirootdata: &[T],
    ) -> Result<BcastHandle<C, T>, SfError> {
        self.get_multi()?.bcast_and_op_begin(multirootdata)
    }

    pub fn scatter_end<T: Pod>(
        &mut self,
        handle: BcastHandle<C, T>,
        leafdata: &mut [T],
    ) -> Result<(), SfError> {
        let multi = self
            .multi
            .as_deref()
            .ok_or(SfError::WrongState("scatter_end without scatter_begin"))?;
        multi.bcast_and_op_end(handle, leafdata, Replace)
    }

    /// Send a distinct value to every leaf, blocking.
    pub fn scatter<T: Pod>(
        &mut self,
        multirootdata: &[T],
        leafdata: &mut [T],
    ) -> Result<(), SfError> {
        let handle = self.scatter_begin(multirootdata)?;
        self.scatter_end(handle, leafdata)
    }

    /// Original root index of each multi-root slot: root `i` with degree
    /// `d` contributes `d` consecutive entries of value `i`.
    pub fn compute_multi_root_original_numbering(&mut self) -> Result<Vec<usize>, SfError> {
        let degree = self.compute_degree()?.to_vec();
        let nroots = self.graph_checked()?.nroots;
        let mroots = self.multi_nroots()?;
        let mut numbering = Vec::with_capacity(mroots);
        for i in 0..nroots {
            numbering.extend(std::iter::repeat(i).take(degree[i] as usize));
        }
        if numbering.len() != mroots {
            return Err(SfError::Internal(
                "multi-root count does not match degree sum".into(),
            ));
        }
        Ok(numbering)
    }
}
