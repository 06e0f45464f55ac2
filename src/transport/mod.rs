//! Transport layer: TPDU wire format and the connection itself.
//!
//! [`TConnection`] owns one duplex byte stream and carries whole messages
//! (TSDUs) over it as sequences of DT fragments with TPKT framing. The
//! TPDU codec is pure and I/O-free; the connection drives it against the
//! stream with the two-phase read deadlines described in the crate docs.

mod connection;
mod tpdu;

pub use connection::*;
pub use tpdu::*;
