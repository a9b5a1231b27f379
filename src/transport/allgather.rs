//! Allgather-family transports for patterned graphs.
//!
//! `Allgatherv` is the general form: every rank's leaves mirror the whole
//! root layout. `Gatherv` restricts leaves to rank 0. The degree-uniform
//! `Allgather`/`Gather` variants delegate to their -v counterparts through
//! explicit wrapper types; the uniform layout changes nothing about the
//! plans, only which type name the forest reports.

use crate::comm::Communicator;
use crate::graph::SfGraph;
use crate::ranks::{LeafRanks, RankTable};
use crate::sf_error::SfError;
use crate::transport::{SfType, Transport};

/// Owner layout derived from per-rank root counts.
fn offsets(layout: &[usize]) -> Vec<usize> {
    let mut off = Vec::with_capacity(layout.len() + 1);
    off.push(0);
    for &n in layout {
        off.push(off.last().copied().unwrap_or(0) + n);
    }
    off
}

fn layout_of(graph: &SfGraph, transport: SfType) -> Result<&[usize], SfError> {
    graph.layout.as_deref().ok_or(SfError::Unsupported {
        transport,
        op: "general graphs without a root layout",
    })
}

/// Plans for a rank whose leaves mirror the full root layout.
fn mirror_root_table(layout: &[usize]) -> RankTable {
    let off = offsets(layout);
    let total = *off.last().unwrap_or(&0);
    let mut rremote = Vec::with_capacity(total);
    for &n in layout {
        rremote.extend(0..n);
    }
    RankTable {
        ranks: (0..layout.len()).collect(),
        ndranks: 0,
        roffset: off,
        rmine: (0..total).collect(),
        rremote,
    }
}

fn empty_root_table() -> RankTable {
    RankTable {
        roffset: vec![0],
        ..RankTable::default()
    }
}

/// Incoming plan when each rank in `readers` pulls all `nroots` local roots.
fn full_leaf_ranks(readers: impl Iterator<Item = usize>, nroots: usize) -> LeafRanks {
    let ranks: Vec<usize> = readers.collect();
    let mut ioffset = Vec::with_capacity(ranks.len() + 1);
    let mut irootloc = Vec::with_capacity(ranks.len() * nroots);
    ioffset.push(0);
    for _ in &ranks {
        irootloc.extend(0..nroots);
        ioffset.push(irootloc.len());
    }
    LeafRanks {
        ranks,
        ioffset,
        irootloc,
    }
}

#[derive(Default)]
pub struct AllgathervTransport {
    root: Option<RankTable>,
    leaf: Option<LeafRanks>,
}

impl AllgathervTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Communicator> Transport<C> for AllgathervTransport {
    fn kind(&self) -> SfType {
        SfType::Allgatherv
    }

    fn setup(&mut self, graph: &SfGraph, comm: &C, _dgroup: &[usize]) -> Result<(), SfError> {
        let layout = layout_of(graph, SfType::Allgatherv)?;
        self.root = Some(mirror_root_table(layout));
        self.leaf = Some(full_leaf_ranks(0..comm.size(), graph.nroots));
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

#[derive(Default)]
pub struct GathervTransport {
    root: Option<RankTable>,
    leaf: Option<LeafRanks>,
}

impl GathervTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Communicator> Transport<C> for GathervTransport {
    fn kind(&self) -> SfType {
        SfType::Gatherv
    }

    fn setup(&mut self, graph: &SfGraph, comm: &C, _dgroup: &[usize]) -> Result<(), SfError> {
        let layout = layout_of(graph, SfType::Gatherv)?;
        self.root = Some(if comm.rank() == 0 {
            mirror_root_table(layout)
        } else {
            empty_root_table()
        });
        self.leaf = Some(full_leaf_ranks(std::iter::once(0), graph.nroots));
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

macro_rules! delegating_transport {
    ($(#[$doc:meta])* $name:ident, $inner:ty, $kind:expr) => {
        $(#[$doc])*
        #[derive(Default)]
        pub struct $name {
            inner: $inner,
        }

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl<C: Communicator> Transport<C> for $name {
            fn kind(&self) -> SfType {
                $kind
            }

            fn setup(&mut self, graph: &SfGraph, comm: &C, dgroup: &[usize]) -> Result<(), SfError> {
                Transport::<C>::setup(&mut self.inner, graph, comm, dgroup)
            }

            fn root_ranks(&self) -> Result<&RankTable, SfError> {
                Transport::<C>::root_ranks(&self.inner)
            }

            fn leaf_ranks(&self) -> Result<&LeafRanks, SfError> {
                Transport::<C>::leaf_ranks(&self.inner)
            }
        }
    };
}

delegating_transport!(
    /// Degree-uniform allgather; plans come from [`AllgathervTransport`].
    AllgatherTransport,
    AllgathervTransport,
    SfType::Allgather
);
delegating_transport!(
    /// Degree-uniform gather; plans come from [`GathervTransport`].
    GatherTransport,
    GathervTransport,
    SfType::Gather
);

pub(crate) use delegating_transport;
