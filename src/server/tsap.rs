//! Server Transport Service Access Point.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::accept::{AcceptContext, accept_loop};
use crate::core::SequenceCounter;
use crate::core::constants::*;
use crate::core::{TransportError, TransportResult};
use crate::transport::{TConnection, validate_tsel};

/// Event delivered by a listening [`ServerTSap`].
#[derive(Debug)]
pub enum ServerEvent {
    /// A remote TSAP completed the handshake; the application now owns
    /// the connection and must eventually close or disconnect it.
    ConnectionIndication(TConnection),

    /// The listening socket failed for a reason other than a call to
    /// [`ServerTSap::stop_listening`]. Carries the causing error.
    StoppedListening(std::io::Error),
}

/// Server TSAP configuration, consumed by [`ServerTSap::listen`].
///
/// Listening parameters cannot change once the server has started; taking
/// the configuration by value makes late mutation unrepresentable.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on, 1..=65535.
    pub port: u16,

    /// Address to bind to.
    pub bind_addr: IpAddr,

    /// TCP accept backlog.
    pub backlog: u32,

    /// Cap on concurrent connections. Sockets accepted above the cap are
    /// dropped before any handshake.
    pub max_connections: usize,

    /// Maximum-TPDU-size exponent offered in the CC, in `[7, 16]`.
    pub max_tpdu_size_param: u8,

    /// Wait for the first byte of a new message (zero = unlimited).
    pub message_timeout: Duration,

    /// Wait for each further byte once a message has started arriving.
    pub message_fragment_timeout: Duration,

    /// Expected local (called) transport selector. `None` accepts
    /// whatever the CR offers.
    pub t_sel_local: Option<Vec<u8>>,

    /// Expected remote (calling) transport selector. `None` accepts
    /// whatever the CR offers.
    pub t_sel_remote: Option<Vec<u8>>,

    /// Source-reference counter for accepted connections.
    pub refs: Arc<SequenceCounter>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 102, // RFC 1006 well-known port
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            backlog: DEFAULT_BACKLOG,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_tpdu_size_param: DEFAULT_MAX_TPDU_SIZE_PARAM,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            message_fragment_timeout: DEFAULT_MESSAGE_FRAGMENT_TIMEOUT,
            t_sel_local: None,
            t_sel_remote: None,
            refs: SequenceCounter::shared(),
        }
    }
}

/// Builder for a [`ServerConfig`].
#[derive(Debug)]
pub struct ServerTSapBuilder {
    config: ServerConfig,
}

impl ServerTSapBuilder {
    /// Start from protocol defaults.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the TCP port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the address to bind to.
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the TCP accept backlog.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the cap on concurrent connections (default 100).
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the maximum-TPDU-size exponent offered in the CC.
    pub fn max_tpdu_size_param(mut self, param: u8) -> Self {
        self.config.max_tpdu_size_param = param;
        self
    }

    /// Set the wait for the first byte of a new message.
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config.message_timeout = timeout;
        self
    }

    /// Set the wait for each further byte of a started message.
    pub fn message_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.config.message_fragment_timeout = timeout;
        self
    }

    /// Require a specific local (called) transport selector.
    ///
    /// Selectors are capped at 32 octets per ISO 8073; an oversized one
    /// fails [`ServerTSap::listen`].
    pub fn t_sel_local(mut self, tsel: Option<Vec<u8>>) -> Self {
        self.config.t_sel_local = tsel;
        self
    }

    /// Require a specific remote (calling) transport selector.
    ///
    /// Selectors are capped at 32 octets per ISO 8073; an oversized one
    /// fails [`ServerTSap::listen`].
    pub fn t_sel_remote(mut self, tsel: Option<Vec<u8>>) -> Self {
        self.config.t_sel_remote = tsel;
        self
    }

    /// Replace the source-reference counter.
    pub fn sequence_counter(mut self, refs: Arc<SequenceCounter>) -> Self {
        self.config.refs = refs;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerTSapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A server TSAP over TCP/IP as defined in RFC 1006 and ISO 8073.
///
/// [`listen`](Self::listen) binds the port and spawns the accept loop;
/// each admitted socket gets its own task that drives the passive side of
/// the handshake (CR in, CC out) and then delivers the established
/// [`TConnection`] as a [`ServerEvent::ConnectionIndication`].
///
/// # Example
///
/// ```ignore
/// use ositransport::server::{ServerEvent, ServerTSap, ServerTSapBuilder};
///
/// let config = ServerTSapBuilder::new().port(102).build();
/// let (server, mut events) = ServerTSap::listen(config).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ServerEvent::ConnectionIndication(connection) => {
///             tokio::spawn(serve(connection));
///         }
///         ServerEvent::StoppedListening(e) => {
///             eprintln!("listener failed: {e}");
///             break;
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ServerTSap {
    local_addr: SocketAddr,
    live: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ServerTSap {
    /// Bind the configured port and start listening.
    ///
    /// Returns the server handle and the event receiver. Dropping either
    /// the handle or calling [`stop_listening`](Self::stop_listening)
    /// stops the accept loop; established connections are untouched.
    pub async fn listen(
        config: ServerConfig,
    ) -> TransportResult<(Self, mpsc::Receiver<ServerEvent>)> {
        if config.port == 0 {
            return Err(TransportError::Config("port must be nonzero".into()));
        }
        if !(MIN_TPDU_SIZE_PARAM..=MAX_TPDU_SIZE_PARAM).contains(&config.max_tpdu_size_param) {
            return Err(TransportError::Config(format!(
                "maximum TPDU size parameter {} is out of bounds",
                config.max_tpdu_size_param
            )));
        }
        validate_tsel(&config.t_sel_local)?;
        validate_tsel(&config.t_sel_remote)?;

        let bind = SocketAddr::new(config.bind_addr, config.port);
        let socket = if bind.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(bind)?;
        let listener = socket.listen(config.backlog)?;
        let local_addr = listener.local_addr()?;

        let live = Arc::new(AtomicUsize::new(0));
        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let ctx = AcceptContext {
            max_connections: config.max_connections,
            max_tpdu_size_param: config.max_tpdu_size_param,
            message_timeout: config.message_timeout,
            message_fragment_timeout: config.message_fragment_timeout,
            t_sel_local: config.t_sel_local,
            t_sel_remote: config.t_sel_remote,
            refs: config.refs,
            live: live.clone(),
            events: event_tx,
        };
        tokio::spawn(accept_loop(listener, ctx, shutdown_rx));
        info!(%local_addr, "server TSAP listening");

        let server = Self {
            local_addr,
            live,
            shutdown_tx: Some(shutdown_tx),
        };
        Ok((server, event_rx))
    }

    /// The address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently live connections.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Stop accepting connections. Caller-initiated, so no
    /// [`ServerEvent::StoppedListening`] is emitted. Existing connections
    /// are not touched.
    pub fn stop_listening(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ServerTSap {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientTSap;

    #[tokio::test]
    async fn test_listen_rejects_port_zero() {
        let config = ServerTSapBuilder::new().port(0).build();
        assert!(matches!(
            ServerTSap::listen(config).await,
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_listen_rejects_oversized_selector() {
        let config = ServerTSapBuilder::new()
            .port(19185)
            .t_sel_local(Some(vec![0u8; 33]))
            .build();
        assert!(matches!(
            ServerTSap::listen(config).await,
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_listening_closes_events_without_notification() {
        let config = ServerTSapBuilder::new()
            .port(19182)
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .build();
        let (mut server, mut events) = ServerTSap::listen(config).await.unwrap();

        server.stop_listening();

        // caller-initiated shutdown: the channel just closes, no
        // StoppedListening event
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_admission_cap_drops_excess_connections() {
        let config = ServerTSapBuilder::new()
            .port(19183)
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .max_connections(1)
            .build();
        let (server, mut events) = ServerTSap::listen(config).await.unwrap();

        let tsap = ClientTSap::new();
        let first = tsap.connect("127.0.0.1:19183".parse().unwrap()).await.unwrap();
        let accepted = match events.recv().await {
            Some(ServerEvent::ConnectionIndication(connection)) => connection,
            other => panic!("expected a connection indication, got {other:?}"),
        };
        assert_eq!(server.live_connections(), 1);

        // the second socket is dropped before any handshake; the client
        // never sees a CC
        let mut strict = ClientTSap::new();
        strict.set_message_timeout(Duration::from_millis(500));
        assert!(strict.connect("127.0.0.1:19183".parse().unwrap()).await.is_err());
        assert_eq!(server.live_connections(), 1);

        // releasing the first connection frees its slot
        let mut accepted = accepted;
        accepted.close().await;
        assert_eq!(server.live_connections(), 0);

        drop(first);
    }

    #[tokio::test]
    async fn test_connection_close_releases_slot_once() {
        let config = ServerTSapBuilder::new()
            .port(19184)
            .bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .build();
        let (server, mut events) = ServerTSap::listen(config).await.unwrap();

        let tsap = ClientTSap::new();
        let _client = tsap.connect("127.0.0.1:19184".parse().unwrap()).await.unwrap();
        let mut accepted = match events.recv().await {
            Some(ServerEvent::ConnectionIndication(connection)) => connection,
            other => panic!("expected a connection indication, got {other:?}"),
        };
        assert_eq!(server.live_connections(), 1);

        accepted.close().await;
        accepted.close().await;
        assert_eq!(server.live_connections(), 0);
    }
}
