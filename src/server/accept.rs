//! The accept loop: admission control and per-connection handshake tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::ServerEvent;
use crate::core::SequenceCounter;
use crate::transport::{ConnectionSettings, LiveSlot, TConnection};

/// Shared state of one listening server, cloned into every handler task.
#[derive(Clone)]
pub(crate) struct AcceptContext {
    pub max_connections: usize,
    pub max_tpdu_size_param: u8,
    pub message_timeout: Duration,
    pub message_fragment_timeout: Duration,
    pub t_sel_local: Option<Vec<u8>>,
    pub t_sel_remote: Option<Vec<u8>>,
    pub refs: Arc<SequenceCounter>,
    pub live: Arc<AtomicUsize>,
    pub events: mpsc::Sender<ServerEvent>,
}

/// Accept sockets until the listener fails or the server shuts down.
///
/// Admission is a single atomic check-and-increment against the live
/// count, so the cap can never be exceeded by racing accepts. Over-limit
/// sockets are dropped without a handshake; the remote peer simply
/// observes the close.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    ctx: AcceptContext,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let stream = tokio::select! {
            _ = &mut shutdown => {
                debug!("listener shut down by caller");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(%peer, "accepted transport connection");
                    stream
                }
                Err(e) => {
                    warn!(error = %e, "listening socket failed");
                    let _ = ctx.events.send(ServerEvent::StoppedListening(e)).await;
                    return;
                }
            },
        };

        let admitted = ctx
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < ctx.max_connections).then_some(n + 1)
            })
            .is_ok();
        if !admitted {
            debug!("connection limit reached, dropping accepted socket");
            continue;
        }

        let slot = LiveSlot::new(ctx.live.clone());
        tokio::spawn(handle_connection(stream, ctx.clone(), slot));
    }
}

/// Drive the passive handshake on one admitted socket and deliver the
/// established connection, or close it without notifying anyone.
async fn handle_connection(stream: TcpStream, ctx: AcceptContext, slot: LiveSlot) {
    let settings = ConnectionSettings {
        src_ref: ctx.refs.next_ref(),
        max_tpdu_size_param: ctx.max_tpdu_size_param,
        message_timeout: ctx.message_timeout,
        message_fragment_timeout: ctx.message_fragment_timeout,
        t_sel_local: ctx.t_sel_local.clone(),
        t_sel_remote: ctx.t_sel_remote.clone(),
    };
    let mut connection = TConnection::new(stream, settings, Some(slot));

    match connection.listen_for_cr().await {
        Ok(()) => {
            let event = ServerEvent::ConnectionIndication(connection);
            if let Err(SendError(event)) = ctx.events.send(event).await {
                // nobody consumes events anymore; release the connection
                if let ServerEvent::ConnectionIndication(mut connection) = event {
                    connection.close().await;
                }
            }
        }
        Err(e) => {
            debug!(error = %e, "passive handshake failed");
            connection.close().await;
        }
    }
}
