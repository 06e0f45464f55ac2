//! The transport connection: handshake, fragmentation/reassembly, teardown.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::tpdu::{self, ConnectTpdu};
use crate::core::constants::*;
use crate::core::{TransportError, TransportResult};

/// One slot in a server's live-connection budget. Dropping it releases the
/// slot, so the count decrements exactly once however the connection ends.
#[derive(Debug)]
pub(crate) struct LiveSlot(Arc<AtomicUsize>);

impl LiveSlot {
    pub(crate) fn new(live: Arc<AtomicUsize>) -> Self {
        Self(live)
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Everything an endpoint configures on a connection before the handshake.
pub(crate) struct ConnectionSettings {
    pub src_ref: u16,
    pub max_tpdu_size_param: u8,
    pub message_timeout: Duration,
    pub message_fragment_timeout: Duration,
    pub t_sel_local: Option<Vec<u8>>,
    pub t_sel_remote: Option<Vec<u8>>,
}

/// A class 0 transport connection over a duplex byte stream.
///
/// Created by [`ClientTSap`](crate::client::ClientTSap) (active side) or
/// handed out by [`ServerTSap`](crate::server::ServerTSap) (passive side);
/// both sides use the same API symmetrically after the handshake. The
/// stream type is generic so a TLS or in-memory stream substitutes
/// transparently for plain TCP.
///
/// One task owns the connection; `send` and `receive` take `&mut self` and
/// must not be interleaved from several tasks.
pub struct TConnection<S = TcpStream> {
    stream: S,
    src_ref: u16,
    dst_ref: u16,
    max_tpdu_size_param: u8,
    max_tpdu_size: usize,
    message_timeout: Duration,
    message_fragment_timeout: Duration,
    t_sel_local: Option<Vec<u8>>,
    t_sel_remote: Option<Vec<u8>>,
    closed: bool,
    live_slot: Option<LiveSlot>,
}

/// Run an I/O future under a deadline; `None` means the deadline elapsed.
/// A zero deadline waits forever.
async fn with_deadline<T>(
    deadline: Duration,
    io: impl Future<Output = io::Result<T>>,
) -> Option<io::Result<T>> {
    if deadline.is_zero() {
        Some(io.await)
    } else {
        tokio::time::timeout(deadline, io).await.ok()
    }
}

/// Adopt an offered selector if none was set locally, or require the
/// offered value to match the one already set.
fn adopt_or_verify(
    slot: &mut Option<Vec<u8>>,
    offered: Option<Vec<u8>>,
    role: &str,
) -> TransportResult<()> {
    match (slot.as_ref(), offered) {
        (_, None) => Ok(()),
        (None, Some(tsel)) => {
            *slot = Some(tsel);
            Ok(())
        }
        (Some(mine), Some(theirs)) if *mine == theirs => Ok(()),
        (Some(_), Some(_)) => Err(TransportError::Syntax(format!(
            "{role} transport selector does not match"
        ))),
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> TConnection<S> {
    pub(crate) fn new(stream: S, settings: ConnectionSettings, live_slot: Option<LiveSlot>) -> Self {
        debug_assert!(
            (MIN_TPDU_SIZE_PARAM..=MAX_TPDU_SIZE_PARAM).contains(&settings.max_tpdu_size_param)
        );
        Self {
            stream,
            src_ref: settings.src_ref,
            dst_ref: 0,
            max_tpdu_size_param: settings.max_tpdu_size_param,
            max_tpdu_size: tpdu::max_tpdu_size(settings.max_tpdu_size_param),
            message_timeout: settings.message_timeout,
            message_fragment_timeout: settings.message_fragment_timeout,
            t_sel_local: settings.t_sel_local,
            t_sel_remote: settings.t_sel_remote,
            closed: false,
            live_slot,
        }
    }

    /// Active side of the handshake: send a CR, block for the CC, adopt or
    /// verify the echoed parameters.
    pub(crate) async fn start_connection(&mut self) -> TransportResult<()> {
        let cr = ConnectTpdu {
            code: TPDU_CR,
            dst_ref: 0,
            src_ref: self.src_ref,
            max_tpdu_size_param: Some(self.max_tpdu_size_param),
            calling_tsel: self.t_sel_local.clone(),
            called_tsel: self.t_sel_remote.clone(),
        };
        self.stream.write_all(&cr.encode()).await?;
        self.stream.flush().await?;

        let body = self.read_packet(self.message_timeout).await?;
        let cc = ConnectTpdu::decode(&body)?;
        if cc.code != TPDU_CC {
            return Err(TransportError::Syntax(format!(
                "expected a CC, got TPDU code {:#04x}",
                cc.code
            )));
        }
        // the peer's src-ref is this side's dst-ref
        self.dst_ref = cc.src_ref;

        if let Some(param) = cc.max_tpdu_size_param {
            if param > self.max_tpdu_size_param {
                return Err(TransportError::Syntax(format!(
                    "peer confirmed TPDU size parameter {param}, larger than the proposed {}",
                    self.max_tpdu_size_param
                )));
            }
            self.set_max_tpdu_size_param(param);
        }
        adopt_or_verify(&mut self.t_sel_local, cc.calling_tsel, "calling")?;
        adopt_or_verify(&mut self.t_sel_remote, cc.called_tsel, "called")?;
        Ok(())
    }

    /// Passive side of the handshake: read the CR, validate and negotiate,
    /// reply with a CC.
    ///
    /// A syntax error in the CR aborts the handshake without sending an ER;
    /// dropping the socket is considered sufficient.
    pub(crate) async fn listen_for_cr(&mut self) -> TransportResult<()> {
        let body = self.read_packet(self.message_fragment_timeout).await?;
        let cr = ConnectTpdu::decode(&body)?;
        if cr.code != TPDU_CR {
            return Err(TransportError::Syntax(format!(
                "expected a CR, got TPDU code {:#04x}",
                cr.code
            )));
        }
        if cr.dst_ref != 0 {
            return Err(TransportError::Syntax(
                "dst-ref of a CR must be 0".into(),
            ));
        }
        self.dst_ref = cr.src_ref;

        // negotiate down to the stricter of the two proposals
        if let Some(param) = cr.max_tpdu_size_param {
            if param < self.max_tpdu_size_param {
                self.set_max_tpdu_size_param(param);
            }
        }
        adopt_or_verify(&mut self.t_sel_local, cr.called_tsel, "called")?;
        adopt_or_verify(&mut self.t_sel_remote, cr.calling_tsel, "calling")?;

        let cc = ConnectTpdu {
            code: TPDU_CC,
            dst_ref: self.dst_ref,
            src_ref: self.src_ref,
            max_tpdu_size_param: Some(self.max_tpdu_size_param),
            calling_tsel: self.t_sel_remote.clone(),
            called_tsel: self.t_sel_local.clone(),
        };
        self.stream.write_all(&cc.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send one message.
    ///
    /// Equivalent to [`send_vectored`](Self::send_vectored) with a single
    /// chunk.
    pub async fn send(&mut self, tsdu: &[u8]) -> TransportResult<()> {
        self.send_vectored(&[tsdu]).await
    }

    /// Send one logical message given as a sequence of chunks.
    ///
    /// The message is split into DT fragments of at most `maxTPduSize - 3`
    /// payload octets; only the final fragment carries the EOT bit. A
    /// fragment may span several input chunks. An empty message sends
    /// nothing at all.
    pub async fn send_vectored(&mut self, chunks: &[&[u8]]) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut bytes_left: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        let max_payload = self.max_tpdu_size - DT_PAYLOAD_RESERVE;

        let mut chunk_index = 0;
        let mut chunk_offset = 0;
        let mut frame = Vec::with_capacity(DT_HEADER_SIZE + bytes_left.min(max_payload));

        while bytes_left > 0 {
            let fragment_len = bytes_left.min(max_payload);
            let last = fragment_len == bytes_left;

            frame.clear();
            frame.extend_from_slice(&tpdu::encode_dt_header(fragment_len, last));

            let mut remaining = fragment_len;
            while remaining > 0 {
                let chunk = chunks[chunk_index];
                let available = chunk.len() - chunk_offset;
                if available == 0 {
                    chunk_index += 1;
                    chunk_offset = 0;
                    continue;
                }
                let take = remaining.min(available);
                frame.extend_from_slice(&chunk[chunk_offset..chunk_offset + take]);
                chunk_offset += take;
                remaining -= take;
            }
            bytes_left -= fragment_len;

            self.stream.write_all(&frame).await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    /// Receive one message into `buffer`, returning its length.
    ///
    /// Waits up to the message timeout for the first byte and raises
    /// [`TransportError::MessageTimeout`] if nothing arrives; the caller
    /// may retry. Once a message has started, every further read runs under
    /// the message fragment timeout and a stall is fatal
    /// ([`TransportError::FragmentStall`]). A valid DR surfaces as
    /// [`TransportError::Disconnect`] with the peer's reason code.
    pub async fn receive(&mut self, buffer: &mut [u8]) -> TransportResult<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut filled = 0;
        let mut version = self.read_first_byte().await?;
        loop {
            let mut rest = [0u8; 3];
            self.read_remainder(&mut rest).await?;
            let packet_length =
                tpdu::parse_tpkt_header([version, rest[0], rest[1], rest[2]])?;

            let mut cotp = [0u8; 2];
            self.read_remainder(&mut cotp).await?;
            let (length_indicator, tpdu_code) = (cotp[0], cotp[1]);

            match tpdu_code {
                TPDU_DT => {
                    if length_indicator != 2 {
                        return Err(TransportError::Syntax(
                            "DT length indicator is not 2".into(),
                        ));
                    }
                    let mut nr_eot = [0u8; 1];
                    self.read_remainder(&mut nr_eot).await?;
                    let eot = nr_eot[0];
                    if eot != 0x00 && eot != EOT {
                        return Err(TransportError::Syntax(
                            "TPDU-NR/EOT octet is neither 0x00 nor 0x80".into(),
                        ));
                    }

                    let fragment_len = packet_length - DT_HEADER_SIZE;
                    let available = buffer.len() - filled;
                    if fragment_len > available {
                        return Err(TransportError::BufferTooSmall {
                            needed: fragment_len,
                            available,
                        });
                    }
                    self.read_remainder(&mut buffer[filled..filled + fragment_len])
                        .await?;
                    filled += fragment_len;

                    if eot == EOT {
                        return Ok(filled);
                    }
                    // more fragments of the same message follow; the
                    // fragment deadline stays in force
                    let mut next = [0u8; 1];
                    self.read_remainder(&mut next).await?;
                    version = next[0];
                }
                TPDU_DR => {
                    if length_indicator != 6 {
                        return Err(TransportError::Syntax(
                            "DR length indicator is not 6".into(),
                        ));
                    }
                    let mut tail = [0u8; 5];
                    self.read_remainder(&mut tail).await?;
                    let dst_ref = u16::from_be_bytes([tail[0], tail[1]]);
                    let src_ref = u16::from_be_bytes([tail[2], tail[3]]);
                    let reason = tail[4];
                    if dst_ref != self.src_ref {
                        return Err(TransportError::Syntax(
                            "DR dst-ref does not match this connection".into(),
                        ));
                    }
                    if src_ref != self.dst_ref {
                        return Err(TransportError::Syntax(
                            "DR src-ref does not match the peer".into(),
                        ));
                    }
                    if reason > DR_REASON_MAX {
                        return Err(TransportError::Syntax(format!(
                            "DR reason {reason} is out of bounds for class 0"
                        )));
                    }
                    return Err(TransportError::Disconnect { reason });
                }
                TPDU_ER => return Err(TransportError::ErrorTpdu),
                other => {
                    return Err(TransportError::Syntax(format!(
                        "unknown TPDU code {other:#04x}"
                    )));
                }
            }
        }
    }

    /// Send a best-effort DR (reason "not specified") and close.
    ///
    /// The peer may already be gone, so a failed write is logged and
    /// swallowed. No Disconnect Confirm is awaited.
    pub async fn disconnect(&mut self) {
        if !self.closed {
            let frame = tpdu::encode_dr(self.dst_ref, self.src_ref, DR_REASON_NOT_SPECIFIED);
            let write = async {
                self.stream.write_all(&frame).await?;
                self.stream.flush().await
            };
            if let Err(e) = write.await {
                debug!(error = %e, "disconnect request could not be delivered");
            }
        }
        self.close().await;
    }

    /// Close the connection. Idempotent; a second call is a no-op.
    ///
    /// Shuts the stream down and, for server-owned connections, releases
    /// the live-connection slot exactly once. Any later `send`/`receive`
    /// fails with [`TransportError::Closed`].
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // nothing meaningful to be done if shutdown fails
        let _ = self.stream.shutdown().await;
        self.live_slot.take();
    }

    /// Read the first byte of a new message under the message timeout.
    async fn read_first_byte(&mut self) -> TransportResult<u8> {
        let mut byte = [0u8; 1];
        match with_deadline(self.message_timeout, self.stream.read_exact(&mut byte)).await {
            Some(Ok(_)) => Ok(byte[0]),
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Err(TransportError::MessageTimeout),
        }
    }

    /// Read mid-message bytes under the message fragment timeout.
    async fn read_remainder(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        match with_deadline(self.message_fragment_timeout, self.stream.read_exact(buf)).await {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(TransportError::FragmentStall(e)),
            None => Err(TransportError::FragmentStall(io::Error::new(
                io::ErrorKind::TimedOut,
                "message fragment deadline elapsed",
            ))),
        }
    }

    /// Read one whole TPKT packet and return its body (everything after
    /// the TPKT header). Used by the handshake, where the packet length
    /// field sizes the read.
    async fn read_packet(&mut self, first_deadline: Duration) -> TransportResult<Vec<u8>> {
        let mut header = [0u8; TPKT_HEADER_SIZE];
        match with_deadline(first_deadline, self.stream.read_exact(&mut header)).await {
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(TransportError::Io(e)),
            None => return Err(TransportError::MessageTimeout),
        }
        let packet_length = tpdu::parse_tpkt_header(header)?;
        let mut body = vec![0u8; packet_length - TPKT_HEADER_SIZE];
        self.read_remainder(&mut body).await?;
        Ok(body)
    }

    fn set_max_tpdu_size_param(&mut self, param: u8) {
        self.max_tpdu_size_param = param;
        self.max_tpdu_size = tpdu::max_tpdu_size(param);
    }

    /// Source reference of this side.
    pub fn src_ref(&self) -> u16 {
        self.src_ref
    }

    /// Destination reference, learned from the peer during the handshake.
    pub fn dst_ref(&self) -> u16 {
        self.dst_ref
    }

    /// Negotiated maximum-TPDU-size exponent.
    pub fn max_tpdu_size_param(&self) -> u8 {
        self.max_tpdu_size_param
    }

    /// Negotiated maximum TPDU size in octets.
    pub fn max_tpdu_size(&self) -> usize {
        self.max_tpdu_size
    }

    /// Local transport selector, if any.
    pub fn t_sel_local(&self) -> Option<&[u8]> {
        self.t_sel_local.as_deref()
    }

    /// Remote transport selector, if any.
    pub fn t_sel_remote(&self) -> Option<&[u8]> {
        self.t_sel_remote.as_deref()
    }

    /// Wait for the first byte of a new message (zero = unlimited).
    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }

    /// Set the wait for the first byte of a new message.
    pub fn set_message_timeout(&mut self, timeout: Duration) {
        self.message_timeout = timeout;
    }

    /// Wait for each further byte once a message has started arriving.
    pub fn message_fragment_timeout(&self) -> Duration {
        self.message_fragment_timeout
    }

    /// Set the wait for each further byte once a message has started.
    pub fn set_message_fragment_timeout(&mut self, timeout: Duration) {
        self.message_fragment_timeout = timeout;
    }

    /// Whether the connection has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S> fmt::Debug for TConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TConnection")
            .field("src_ref", &self.src_ref)
            .field("dst_ref", &self.dst_ref)
            .field("max_tpdu_size_param", &self.max_tpdu_size_param)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
