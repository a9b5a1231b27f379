//! SfError: unified error type for star-forest public APIs
//!
//! Every public operation returns `Result<_, SfError>` so that callers can
//! install their own failure policy (abort, retry, log) instead of the
//! library panicking on their behalf.

use thiserror::Error;

use crate::transport::SfType;

/// Unified error type for star-forest operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SfError {
    /// An array argument had the wrong length for the current graph.
    #[error("size mismatch for {what}: expected {expected}, got {got}")]
    MismatchedLengths {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A leaf referenced a rank outside the communicator.
    #[error("leaf {leaf} references rank {rank}, not in [0,{size})")]
    RankOutOfRange { leaf: usize, rank: usize, size: usize },
    /// A root index was outside the owning rank's root space.
    #[error("leaf {leaf} references root {index}, not in [0,{nroots})")]
    RootIndexOutOfRange {
        leaf: usize,
        index: usize,
        nroots: usize,
    },
    /// A selection passed to an embedding operation was out of range.
    #[error("selected index {index} is not in [0,{limit})")]
    SelectionOutOfRange { index: usize, limit: usize },
    /// Operation requires `set_graph` to have been called first.
    #[error("graph has not been set on this star forest")]
    GraphNotSet,
    /// Unknown transport name passed to `set_type`/`FromStr`.
    #[error("unable to find requested star-forest transport type `{0}`")]
    UnknownTransport(String),
    /// `set_graph_with_pattern` called with a pattern that has no canned shape.
    #[error("pattern `{0}` cannot be constructed analytically; use set_graph")]
    UnsupportedPattern(&'static str),
    /// Generic wrong-state error (setup ordering, illegal reconfiguration).
    #[error("wrong state: {0}")]
    WrongState(&'static str),
    /// Degree computations on one star forest cannot be nested.
    #[error("calls to compute_degree_begin cannot be nested")]
    DegreeNested,
    /// `compute_degree_end` without a matching begin.
    #[error("must call compute_degree_begin before compute_degree_end")]
    DegreeEndWithoutBegin,
    /// Rank ordering must be chosen before the multi star forest exists.
    #[error("rank ordering must be set before the first gather or scatter")]
    RankOrderAfterMulti,
    /// The active transport does not implement an optional capability.
    #[error("transport `{transport}` does not support {op}")]
    Unsupported {
        transport: SfType,
        op: &'static str,
    },
    /// Graphs passed to a composite operation do not fit together.
    #[error("incompatible graphs: {0}")]
    IncompatibleGraphs(&'static str),
    /// Writing a diagnostic view failed.
    #[error("i/o error: {0}")]
    Io(String),
    /// A transport-level exchange with a neighbor failed.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },
    /// Engine invariant violation; indicates a bug, not misuse.
    #[error("internal error: {0}")]
    Internal(String),
}
