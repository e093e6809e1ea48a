// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connections: socket handle, buffers, flags, handlers, protocol state.
//!
//! A connection's lifecycle runs resolve -> connect -> TLS handshake ->
//! steady state -> drain/close, each phase an explicit flag progressed by
//! the manager's poll step. Flags split into driver-managed (read-only
//! accessors) and user-settable (`drain`, `close`, hexdumping) so
//! applications can observe the machine without being able to wedge it.

use crate::addr::Addr;
use crate::buf::IoBuf;
use crate::config::RngFn;
use crate::event::Handler;
use crate::mqtt::MqttOpts;
use crate::transport::Socket;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Instant;

/// Flag bits. Driver-managed except the three user-settable ones noted on
/// the accessors.
pub(crate) mod flag {
    pub const LISTENING: u32 = 1 << 0;
    pub const CLIENT: u32 = 1 << 1;
    pub const ACCEPTED: u32 = 1 << 2;
    pub const RESOLVING: u32 = 1 << 3;
    pub const CONNECTING: u32 = 1 << 4;
    pub const TLS: u32 = 1 << 5;
    pub const TLS_HS: u32 = 1 << 6;
    pub const UDP: u32 = 1 << 7;
    pub const WEBSOCKET: u32 = 1 << 8;
    pub const HEXDUMPING: u32 = 1 << 9;
    pub const DRAINING: u32 = 1 << 10;
    pub const CLOSING: u32 = 1 << 11;
    pub const READABLE: u32 = 1 << 12;
    pub const WRITABLE: u32 = 1 << 13;
}

/// Built-in protocol stage attached to a connection.
pub(crate) enum Proto {
    /// No protocol: raw reads and writes.
    Raw,
    Http(HttpState),
    Ws(WsState),
    Mqtt(MqttState),
    Sntp(SntpState),
}

/// In-flight chunked message bookkeeping: head stays at the front of
/// `recv`, de-framed chunk data accumulates right after it.
pub(crate) struct ChunkState {
    pub head_len: usize,
    pub assembled: usize,
}

#[derive(Default)]
pub(crate) struct HttpState {
    /// Server side of a `ws://` listener: upgrade automatically on a
    /// request carrying `Sec-WebSocket-Key`.
    pub ws_auto: bool,
    pub chunk: Option<ChunkState>,
}

pub(crate) enum WsState {
    /// Client handshake in flight; the request goes out on `Connect`.
    Handshake { key: String, uri: String },
    Open,
}

#[derive(Default)]
pub(crate) struct MqttState {
    /// CONNECT options sent automatically on `Connect` (clients).
    pub login: Option<MqttOpts>,
}

#[derive(Default)]
pub(crate) struct SntpState {
    pub last_tx: Option<Instant>,
}

/// One connection owned by a [`crate::Manager`].
pub struct Conn {
    pub(crate) id: u64,
    pub(crate) label: String,
    pub(crate) sock: Option<Socket>,
    pub(crate) peer: Option<SocketAddr>,
    /// Port to connect to once resolution finishes.
    pub(crate) pending_port: u16,
    /// Connect hostname, kept for DNS, TLS SNI and the WS Host header.
    pub(crate) host: String,
    pub(crate) recv: IoBuf,
    pub(crate) send: IoBuf,
    pub(crate) flags: u32,
    pub(crate) handler: Option<Box<dyn Handler>>,
    pub(crate) proto: Proto,
    pub(crate) rng: RngFn,
    pub(crate) mqtt_id: u16,
    /// Error to surface (then close) at the next dispatch point.
    pub(crate) pending_error: Option<String>,
    /// Set by [`Conn::delete_chunk`] during an `HttpChunk` dispatch.
    pub(crate) chunk_delete: bool,
    /// Set by [`Conn::ws_upgrade`] during an `HttpMsg` dispatch.
    pub(crate) ws_upgrade_pending: bool,
    #[cfg(feature = "tls")]
    pub(crate) tls: Option<crate::tls::TlsState>,
    #[cfg(feature = "tls")]
    pub(crate) tls_server_cfg: Option<std::sync::Arc<rustls::ServerConfig>>,
    /// Client TLS options applied when the TCP connect completes.
    #[cfg(feature = "tls")]
    pub(crate) tls_pending: Option<crate::tls::TlsOpts>,
}

impl Conn {
    pub(crate) fn new(id: u64, io_align: usize, rng: RngFn) -> Self {
        Self {
            id,
            label: String::new(),
            sock: None,
            peer: None,
            pending_port: 0,
            host: String::new(),
            recv: IoBuf::with_align(io_align),
            send: IoBuf::with_align(io_align),
            flags: 0,
            handler: None,
            proto: Proto::Raw,
            rng,
            mqtt_id: 0,
            pending_error: None,
            chunk_delete: false,
            ws_upgrade_pending: false,
            #[cfg(feature = "tls")]
            tls: None,
            #[cfg(feature = "tls")]
            tls_server_cfg: None,
            #[cfg(feature = "tls")]
            tls_pending: None,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Unique id, also the connection's poll token. Ids are never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Free-form label for log correlation.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    /// Peer address, known once connected (and per-datagram for UDP
    /// listeners).
    pub fn peer(&self) -> Option<Addr> {
        self.peer.map(Addr::from)
    }

    // ========================================================================
    // Flags
    // ========================================================================

    pub(crate) fn has(&self, f: u32) -> bool {
        self.flags & f != 0
    }

    pub(crate) fn set(&mut self, f: u32) {
        self.flags |= f;
    }

    pub(crate) fn clear(&mut self, f: u32) {
        self.flags &= !f;
    }

    pub fn is_listening(&self) -> bool {
        self.has(flag::LISTENING)
    }

    pub fn is_client(&self) -> bool {
        self.has(flag::CLIENT)
    }

    pub fn is_accepted(&self) -> bool {
        self.has(flag::ACCEPTED)
    }

    pub fn is_resolving(&self) -> bool {
        self.has(flag::RESOLVING)
    }

    pub fn is_connecting(&self) -> bool {
        self.has(flag::CONNECTING)
    }

    pub fn is_tls(&self) -> bool {
        self.has(flag::TLS)
    }

    pub fn is_tls_handshaking(&self) -> bool {
        self.has(flag::TLS_HS)
    }

    pub fn is_udp(&self) -> bool {
        self.has(flag::UDP)
    }

    pub fn is_websocket(&self) -> bool {
        self.has(flag::WEBSOCKET)
    }

    pub fn is_hexdumping(&self) -> bool {
        self.has(flag::HEXDUMPING)
    }

    pub fn is_draining(&self) -> bool {
        self.has(flag::DRAINING)
    }

    pub fn is_closing(&self) -> bool {
        self.has(flag::CLOSING)
    }

    pub fn is_readable(&self) -> bool {
        self.has(flag::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.has(flag::WRITABLE)
    }

    /// User-settable: log a hex dump of everything sent and received.
    pub fn set_hexdumping(&mut self, on: bool) {
        if on {
            self.set(flag::HEXDUMPING);
        } else {
            self.clear(flag::HEXDUMPING);
        }
    }

    /// User-settable: flush the send buffer, then close. Terminal.
    pub fn drain(&mut self) {
        self.set(flag::DRAINING);
    }

    /// User-settable: close at the end of the current poll step. Terminal.
    pub fn close(&mut self) {
        self.set(flag::CLOSING);
    }

    // ========================================================================
    // Buffers and sending
    // ========================================================================

    /// The receive buffer. During a protocol event dispatch the parsed
    /// bytes have been taken out for borrowing; what remains here is
    /// whatever the protocol stage has not claimed.
    pub fn recv_buf(&self) -> &IoBuf {
        &self.recv
    }

    pub fn recv_buf_mut(&mut self) -> &mut IoBuf {
        &mut self.recv
    }

    pub fn send_buf(&self) -> &IoBuf {
        &self.send
    }

    pub fn send_buf_mut(&mut self) -> &mut IoBuf {
        &mut self.send
    }

    /// Queue bytes for transmission. Refused once the connection is
    /// closing; accepted while draining (the flush happens before the
    /// close).
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.is_closing() {
            return Err(Error::ConnectionClosed);
        }
        self.send.append(data)
    }

    /// Formatting variant of [`Conn::send`].
    pub fn printf(&mut self, args: std::fmt::Arguments<'_>) -> Result<()> {
        let s = crate::util::format_string(args);
        self.send(s.as_bytes())
    }

    /// Record a fault. The manager emits `Error` with this text and then
    /// closes the connection at the end of the step. The first recorded
    /// error wins.
    pub fn error(&mut self, msg: &str) {
        if self.pending_error.is_none() {
            self.pending_error = Some(msg.to_string());
        }
    }

    pub(crate) fn fail(&mut self, e: &Error) {
        log::debug!("[conn {}] error: {}", self.id, e);
        self.error(&e.to_string());
    }

    // ========================================================================
    // Protocol hooks
    // ========================================================================

    /// During an `HttpChunk` dispatch: release the current chunk from the
    /// receive buffer once the handler returns. If every chunk is deleted
    /// this way, the final `HttpMsg` carries an empty body.
    pub fn delete_chunk(&mut self) {
        self.chunk_delete = true;
    }

    /// During an `HttpMsg` dispatch on a server connection: upgrade to
    /// WebSocket. Queues the `101` response; the protocol switch happens
    /// when the handler returns, followed by a `WsOpen` event.
    pub fn ws_upgrade(&mut self, msg: &crate::http::HttpMessage<'_>, extra_headers: &str) -> Result<()> {
        let key = msg
            .header("Sec-WebSocket-Key")
            .ok_or(Error::BadMessage("missing Sec-WebSocket-Key"))?
            .to_string();
        crate::ws::put_upgrade_response(self, &key, extra_headers)?;
        self.ws_upgrade_pending = true;
        Ok(())
    }

    /// Allocate the next MQTT message id, wrapping past 0xFFFF to 1.
    pub(crate) fn next_mqtt_id(&mut self) -> u16 {
        self.mqtt_id = if self.mqtt_id == 0xFFFF {
            1
        } else {
            self.mqtt_id + 1
        };
        self.mqtt_id
    }

    pub(crate) fn fill_random(&self, buf: &mut [u8]) {
        (self.rng)(buf);
    }

    // ========================================================================
    // TLS
    // ========================================================================

    /// Initialize TLS on this connection.
    ///
    /// On a listener this prepares the server configuration that accepted
    /// connections will handshake with. On a client it must be called in
    /// the `Connect` handler at the latest (connections made through a
    /// TLS-scheme URL do this automatically). On an accepted connection it
    /// starts the server-side handshake.
    #[cfg(feature = "tls")]
    pub fn tls_init(&mut self, opts: &crate::tls::TlsOpts) -> Result<()> {
        use crate::tls;
        if self.is_listening() {
            self.tls_server_cfg = Some(tls::make_server_config(opts)?);
            self.set(flag::TLS);
            return Ok(());
        }
        let state = if self.is_accepted() {
            let cfg = match &self.tls_server_cfg {
                Some(cfg) => cfg.clone(),
                None => tls::make_server_config(opts)?,
            };
            tls::server_state(cfg)?
        } else {
            let name = if opts.server_name.is_empty() {
                self.host.as_str()
            } else {
                opts.server_name.as_str()
            };
            tls::client_state(tls::make_client_config(opts)?, name)?
        };
        self.tls = Some(state);
        self.set(flag::TLS | flag::TLS_HS);
        Ok(())
    }

    /// TLS is compiled out; always fails with `Unsupported`.
    #[cfg(not(feature = "tls"))]
    pub fn tls_init(&mut self, _opts: &crate::tls::TlsOpts) -> Result<()> {
        Err(Error::Unsupported)
    }

    // ========================================================================
    // Test support
    // ========================================================================

    /// Bare connection with no socket, for codec-level tests.
    #[cfg(test)]
    pub(crate) fn detached_for_tests() -> Self {
        Self::new(1, 64, crate::config::sys_rand)
    }

    #[cfg(test)]
    pub(crate) fn force_mqtt_id(&mut self, id: u16) {
        self.mqtt_id = id;
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("peer", &self.peer)
            .field("flags", &format_args!("{:#016b}", self.flags))
            .field("recv", &self.recv.len())
            .field("send", &self.send.len())
            .finish()
    }
}
