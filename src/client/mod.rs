//! Client endpoint: the active opener of transport connections.

mod tsap;

pub use tsap::*;
