//! `window` and `neighbor` type names.
//!
//! The communicator façade exposes two-sided byte channels only, with no
//! one-sided window or neighborhood collective to specialize on. Both names
//! are accepted and relay to the basic engine; selecting them is
//! configuration, not an error.

use crate::comm::Communicator;
use crate::graph::SfGraph;
use crate::ranks::{LeafRanks, RankTable};
use crate::sf_error::SfError;
use crate::transport::allgather::delegating_transport;
use crate::transport::{BasicTransport, SfType, Transport};

delegating_transport!(
    /// One-sided window semantics relayed through the two-sided engine.
    WindowTransport,
    BasicTransport,
    SfType::Window
);
delegating_transport!(
    /// Neighborhood-collective semantics relayed through the two-sided engine.
    NeighborTransport,
    BasicTransport,
    SfType::Neighbor
);
