//! Client Transport Service Access Point.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};

use crate::core::SequenceCounter;
use crate::core::constants::*;
use crate::core::{TransportError, TransportResult};
use crate::transport::{ConnectionSettings, TConnection, validate_tsel};

/// A client TSAP over TCP/IP as defined in RFC 1006 and ISO 8073.
///
/// Configure it once, then open any number of connections to remote
/// server TSAPs with [`connect`](Self::connect). Each call dials the
/// remote address, drives the active side of the handshake (CR out, CC
/// in) and hands back an established [`TConnection`].
///
/// # Example
///
/// ```ignore
/// use ositransport::ClientTSap;
///
/// let mut tsap = ClientTSap::new();
/// tsap.set_max_tpdu_size_param(7)?;
/// let mut connection = tsap.connect("10.0.0.12:102".parse()?).await?;
/// connection.send(&request).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ClientTSap {
    max_tpdu_size_param: u8,
    message_timeout: Duration,
    message_fragment_timeout: Duration,
    t_sel_local: Option<Vec<u8>>,
    t_sel_remote: Option<Vec<u8>>,
    refs: Arc<SequenceCounter>,
}

impl Default for ClientTSap {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTSap {
    /// Create a client TSAP with protocol defaults.
    pub fn new() -> Self {
        Self {
            max_tpdu_size_param: DEFAULT_MAX_TPDU_SIZE_PARAM,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            message_fragment_timeout: DEFAULT_MESSAGE_FRAGMENT_TIMEOUT,
            t_sel_local: None,
            t_sel_remote: None,
            refs: SequenceCounter::shared(),
        }
    }

    /// Set the maximum-TPDU-size exponent proposed in the CR.
    ///
    /// Must lie in `[7, 16]`; the default of 16 means 65531 octets per
    /// RFC 1006.
    pub fn set_max_tpdu_size_param(&mut self, param: u8) -> TransportResult<()> {
        if !(MIN_TPDU_SIZE_PARAM..=MAX_TPDU_SIZE_PARAM).contains(&param) {
            return Err(TransportError::Config(format!(
                "maximum TPDU size parameter {param} is out of bounds"
            )));
        }
        self.max_tpdu_size_param = param;
        Ok(())
    }

    /// Maximum-TPDU-size exponent this TSAP proposes.
    pub fn max_tpdu_size_param(&self) -> u8 {
        self.max_tpdu_size_param
    }

    /// Set the wait for the first byte of a new message, also used as the
    /// TCP connect deadline. Zero (the default) waits forever.
    pub fn set_message_timeout(&mut self, timeout: Duration) {
        self.message_timeout = timeout;
    }

    /// Set the wait for each further byte once a message has started
    /// arriving. Defaults to 60 seconds.
    pub fn set_message_fragment_timeout(&mut self, timeout: Duration) {
        self.message_fragment_timeout = timeout;
    }

    /// Set the local (calling) transport selector sent in the CR.
    ///
    /// Selectors are capped at 32 octets per ISO 8073.
    pub fn set_t_sel_local(&mut self, tsel: Option<Vec<u8>>) -> TransportResult<()> {
        validate_tsel(&tsel)?;
        self.t_sel_local = tsel;
        Ok(())
    }

    /// Set the remote (called) transport selector sent in the CR.
    ///
    /// Selectors are capped at 32 octets per ISO 8073.
    pub fn set_t_sel_remote(&mut self, tsel: Option<Vec<u8>>) -> TransportResult<()> {
        validate_tsel(&tsel)?;
        self.t_sel_remote = tsel;
        Ok(())
    }

    /// Replace the source-reference counter. Connections opened by this
    /// TSAP draw their src-ref from it; tests inject a counter with a
    /// known range to make reference assignment deterministic.
    pub fn set_sequence_counter(&mut self, refs: Arc<SequenceCounter>) {
        self.refs = refs;
    }

    /// Connect to a server TSAP listening at `remote`.
    pub async fn connect(&self, remote: SocketAddr) -> TransportResult<TConnection> {
        if remote.port() == 0 {
            return Err(TransportError::Config("remote port must be nonzero".into()));
        }
        let stream = self.dial(TcpStream::connect(remote)).await?;
        self.connect_over(stream).await
    }

    /// Connect to `remote` from a specific local address and port.
    pub async fn connect_from(
        &self,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> TransportResult<TConnection> {
        if remote.port() == 0 {
            return Err(TransportError::Config("remote port must be nonzero".into()));
        }
        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(local)?;
        let stream = self.dial(socket.connect(remote)).await?;
        self.connect_over(stream).await
    }

    /// Drive the active handshake over an already-established stream.
    ///
    /// This is the substitution seam for secure transports: hand in a TLS
    /// stream (or any other duplex byte stream) and get back the same
    /// [`TConnection`] API.
    pub async fn connect_over<S>(&self, stream: S) -> TransportResult<TConnection<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let settings = ConnectionSettings {
            src_ref: self.refs.next_ref(),
            max_tpdu_size_param: self.max_tpdu_size_param,
            message_timeout: self.message_timeout,
            message_fragment_timeout: self.message_fragment_timeout,
            t_sel_local: self.t_sel_local.clone(),
            t_sel_remote: self.t_sel_remote.clone(),
        };
        let mut connection = TConnection::new(stream, settings, None);
        if let Err(e) = connection.start_connection().await {
            connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    /// Open the TCP socket, bounded by the message timeout when nonzero.
    async fn dial(
        &self,
        connect: impl Future<Output = std::io::Result<TcpStream>>,
    ) -> TransportResult<TcpStream> {
        if self.message_timeout.is_zero() {
            Ok(connect.await?)
        } else {
            match tokio::time::timeout(self.message_timeout, connect).await {
                Ok(stream) => Ok(stream?),
                Err(_) => Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "TCP connect deadline elapsed",
                ))),
            }
        }
    }
}
