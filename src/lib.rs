//! # star-forest
//!
//! A communication-graph engine for bulk data movement between *roots*
//! (owned slots) and *leaves* (references to roots anywhere on the
//! communicator), in the style of PETSc's `PetscSF`.
//!
//! The core object is [`StarForest`]: describe the bipartite graph once
//! with [`StarForest::set_graph`] (or a canned pattern), then move typed
//! data along its edges with broadcast, reduce, fetch-and-op, gather and
//! scatter. Every operation comes in a split `begin`/`end` pair so
//! unrelated communication and computation can overlap.
//!
//! Communication runs over a pluggable [`Communicator`]: an intra-process
//! [`ThreadComm`] for simulated ranks and tests, or MPI behind the
//! `mpi-support` feature. Transports (`sf_type`) specialize how plans are
//! resolved, not the wire mechanics.
//!
//! ```
//! use star_forest::prelude::*;
//!
//! // One rank, two roots; leaf 0 reads root 1, leaf 1 reads root 0.
//! let mut sf = StarForest::new(ThreadComm::solo());
//! sf.set_graph(2, 2, None, vec![Remote::new(0, 1), Remote::new(0, 0)])?;
//! let mut leaves = vec![0u32; 2];
//! sf.bcast(&[7u32, 9u32], &mut leaves)?;
//! assert_eq!(leaves, vec![9, 7]);
//! # Ok::<(), star_forest::SfError>(())
//! ```

pub mod comm;
pub mod derived;
pub mod dispatch;
pub mod graph;
pub mod multi;
pub mod op;
pub mod ranks;
pub mod sf;
pub mod sf_error;
pub mod transport;
pub mod wire;

pub use comm::{Communicator, ThreadComm};
pub use graph::{Remote, SfGraph, SfPattern};
pub use sf::{DuplicateOption, Groups, StarForest};
pub use sf_error::SfError;
pub use transport::SfType;

/// Commonly used types, in one import.
pub mod prelude {
    pub use crate::comm::{Communicator, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::dispatch::{BcastHandle, FetchHandle, ReduceHandle};
    pub use crate::graph::{Remote, SfGraph, SfPattern};
    pub use crate::op::{Add, Max, Min, Replace, SfOp};
    pub use crate::ranks::{LeafRanks, RankTable};
    pub use crate::sf::{DuplicateOption, Groups, StarForest};
    pub use crate::sf_error::SfError;
    pub use crate::transport::SfType;
}
