//! An OSI transport layer (class 0) over TCP/IP, as defined in RFC 1006
//! and ISO 8073.
//!
//! Messages (TSDUs) travel as sequences of DT TPDUs, each wrapped in a
//! TPKT packet, over a plain TCP stream. A connection starts with a
//! CR/CC handshake that negotiates the maximum TPDU size and the
//! transport selectors, then both sides exchange messages symmetrically
//! until one of them sends a DR or drops the socket.
//!
//! The crate splits along the same lines as the protocol:
//!
//! * [`client`]: [`ClientTSap`] actively opens connections.
//! * [`server`]: [`ServerTSap`] listens, admits sockets against a
//!   connection cap, answers handshakes and delivers established
//!   connections as [`ServerEvent`]s.
//! * [`transport`]: [`TConnection`] with the TPDU codec behind it. The
//!   stream type is generic, so TLS or in-memory streams slot in where
//!   TCP normally goes.
//! * [`core`](crate::core): errors, constants and the source-reference
//!   counter shared by both endpoints.
//!
//! Reads run under two deadlines: the message timeout bounds the wait
//! for the first byte of a message (zero means wait forever, and hitting
//! it is recoverable), while the message fragment timeout bounds every
//! later byte (hitting it is fatal for the connection).
//!
//! ```ignore
//! use ositransport::{ClientTSap, ServerEvent, ServerTSap, server::ServerTSapBuilder};
//!
//! let config = ServerTSapBuilder::new().port(102).build();
//! let (server, mut events) = ServerTSap::listen(config).await?;
//!
//! let tsap = ClientTSap::new();
//! let mut connection = tsap.connect(server.local_addr()).await?;
//! connection.send(b"hello").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod core;
pub mod server;
pub mod transport;

pub use crate::client::ClientTSap;
pub use crate::core::{SequenceCounter, TransportError, TransportResult};
pub use crate::server::{ServerEvent, ServerTSap};
pub use crate::transport::TConnection;

/// Single-line import of the types most applications touch.
pub mod prelude {
    pub use crate::client::ClientTSap;
    pub use crate::core::{SequenceCounter, TransportError, TransportResult};
    pub use crate::server::{ServerConfig, ServerEvent, ServerTSap, ServerTSapBuilder};
    pub use crate::transport::TConnection;
}
