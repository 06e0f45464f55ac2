//! Error types for the transport service.

use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by transport connections and endpoints.
///
/// The taxonomy separates conditions a caller may react to differently:
/// [`TransportError::MessageTimeout`] means the peer was quiet and the
/// caller may simply retry `receive`, while [`TransportError::Disconnect`]
/// reports an orderly peer-initiated close. Everything else is fatal to the
/// connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed TPKT or COTP header, unexpected TPDU code, or a
    /// selector/reference that does not match the connection state.
    #[error("protocol syntax error: {0}")]
    Syntax(String),

    /// The first byte of a new message did not arrive within the message
    /// timeout. The connection is still usable.
    #[error("no message arrived within the message timeout")]
    MessageTimeout,

    /// The stream stalled or failed while the remainder of a message was
    /// still outstanding. A partial delivery is a protocol violation, so
    /// this is fatal to the connection.
    #[error("stalled while receiving the remainder of a message")]
    FragmentStall(#[source] std::io::Error),

    /// The peer sent a valid Disconnect Request. Not a failure.
    #[error("peer sent a disconnect request (reason {reason})")]
    Disconnect {
        /// DR reason code, 0..=4 in class 0.
        reason: u8,
    },

    /// The peer reported a protocol error with an ER TPDU.
    #[error("peer reported a protocol error (ER TPDU)")]
    ErrorTpdu,

    /// The caller's buffer cannot hold the incoming message.
    #[error("receive buffer too small: fragment of {needed} bytes, {available} bytes free")]
    BufferTooSmall {
        /// Size of the pending fragment.
        needed: usize,
        /// Remaining capacity in the caller's buffer.
        available: usize,
    },

    /// The connection was already closed locally.
    #[error("connection is closed")]
    Closed,

    /// Invalid endpoint configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
