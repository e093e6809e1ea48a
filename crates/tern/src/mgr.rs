// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The event manager: a single-threaded readiness-driven reactor.
//!
//! One [`Manager::poll`] step advances, in order: timers, the readiness
//! wait, DNS, then every connection (newest first) through its state
//! machine - connect completion, TLS handshake, accept, reads, writes,
//! the per-step `Poll` event - and finally frees connections marked
//! closing, after delivering `Close`. Connections are never destroyed
//! while their handler is on the stack.
//!
//! All of this is single-thread cooperative; the only cross-thread entry
//! point is the [`Wakeup`] handle from [`Manager::make_pipe`].

use crate::addr::Addr;
use crate::config::Config;
use crate::conn::{flag, Conn, HttpState, MqttState, Proto, SntpState, WsState};
use crate::dns::{DnsClient, DnsOutcome};
use crate::event::{dispatch, Command, Event, Handler, Queue};
use crate::mqtt::MqttOpts;
use crate::timer::{fire_timers, TimerEntry, TimerFn};
use crate::transport::{
    self, pipe, Poller, Socket, Wakeup, CONN_TOKEN_BASE, DNS_V4_TOKEN, DNS_V6_TOKEN,
};
use crate::url::Url;
use crate::{Error, Result};
use mio::Token;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Owner of all connections, timers and the poller.
pub struct Manager {
    cfg: Config,
    poller: Poller,
    /// Connection list; the end of the vector is the head (newest).
    conns: Vec<Conn>,
    next_id: u64,
    timers: Vec<TimerEntry>,
    next_timer_id: u64,
    dns: DnsClient,
    start: Instant,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let poller = Poller::new().map_err(Error::Io)?;
        let dns = DnsClient::new(&cfg);
        Ok(Self {
            cfg,
            poller,
            conns: Vec::new(),
            next_id: CONN_TOKEN_BASE,
            timers: Vec::new(),
            next_timer_id: 1,
            dns,
            start: Instant::now(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    /// Milliseconds since the manager was created (monotonic).
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn alloc_conn(&mut self) -> Conn {
        let id = self.next_id;
        self.next_id += 1;
        Conn::new(id, self.cfg.io_size, self.cfg.rng)
    }

    fn conn_index(&self, id: u64) -> Option<usize> {
        self.conns.iter().position(|c| c.id == id)
    }

    /// Borrow a connection by id.
    pub fn conn(&self, id: u64) -> Option<&Conn> {
        self.conns.iter().find(|c| c.id == id)
    }

    /// Mutably borrow a connection by id (queue sends, set flags).
    pub fn conn_mut(&mut self, id: u64) -> Option<&mut Conn> {
        self.conns.iter_mut().find(|c| c.id == id)
    }

    /// Number of live connections (listeners and pipes included).
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// Local address of a connection's socket (useful after binding to
    /// port 0).
    pub fn local_addr(&self, id: u64) -> Option<Addr> {
        self.conn(id)
            .and_then(|c| c.sock.as_ref())
            .and_then(|s| s.local_addr().ok())
            .map(Addr::from)
    }

    // ========================================================================
    // Listen / connect
    // ========================================================================

    /// Listen on a URL. The scheme picks transport and protocol engine:
    /// `tcp`/`udp` raw, `http` HTTP, `ws` HTTP with automatic WebSocket
    /// upgrade, `mqtt` MQTT. TLS schemes need [`Manager::listen_tls`].
    pub fn listen(&mut self, url: &str, handler: impl Handler) -> Result<u64> {
        self.do_listen(url, None, Box::new(handler))
    }

    /// Listen with TLS; `https`, `wss` and `mqtts` schemes land here with
    /// the server certificate in `opts`.
    pub fn listen_tls(
        &mut self,
        url: &str,
        opts: &crate::tls::TlsOpts,
        handler: impl Handler,
    ) -> Result<u64> {
        self.do_listen(url, Some(opts), Box::new(handler))
    }

    fn do_listen(
        &mut self,
        url: &str,
        tls_opts: Option<&crate::tls::TlsOpts>,
        handler: Box<dyn Handler>,
    ) -> Result<u64> {
        let u = Url::parse(url)?;
        let addr = Addr::parse(u.host, u.port)
            .ok_or_else(|| Error::BadUrl(format!("listen host must be an IP: {}", url)))?;
        let sa = addr.to_socket_addr();

        let mut conn = self.alloc_conn();
        conn.set(flag::LISTENING);
        let mut sock = if u.is_udp() {
            conn.set(flag::UDP);
            Socket::Dgram(transport::listen_udp(sa).map_err(Error::Io)?)
        } else {
            Socket::Listener(transport::listen_tcp(sa).map_err(Error::Io)?)
        };
        sock.register(self.poller.registry(), Token(conn.id as usize))
            .map_err(Error::Io)?;
        conn.sock = Some(sock);
        conn.proto = proto_for_scheme(u.scheme, &u, &self.cfg, true)?;

        if u.is_tls() {
            let opts = tls_opts.ok_or_else(|| {
                Error::TlsFailure("TLS listener needs certificate options".into())
            })?;
            conn.tls_init(opts)?;
        }

        conn.handler = Some(handler);
        let id = conn.id;
        log::info!("[mgr] listening id={} url={} addr={}", id, url, sa);
        self.conns.push(conn);
        Ok(id)
    }

    /// Connect to a URL. Hostnames resolve through the non-blocking DNS
    /// client; the connection passes resolve -> connect -> (TLS) ->
    /// steady state, with `Resolve`/`Connect` events along the way.
    pub fn connect(&mut self, url: &str, handler: impl Handler) -> Result<u64> {
        self.do_connect(url, Box::new(handler), None, None, false)
    }

    /// Connect with explicit TLS options (client cert, custom CA, SNI).
    pub fn connect_tls(
        &mut self,
        url: &str,
        opts: &crate::tls::TlsOpts,
        handler: impl Handler,
    ) -> Result<u64> {
        self.do_connect(url, Box::new(handler), Some(opts.clone()), None, false)
    }

    /// Connect an MQTT client. CONNECT is sent automatically once the
    /// transport is up; credentials in the URL override `opts`.
    pub fn mqtt_connect(
        &mut self,
        url: &str,
        opts: &MqttOpts,
        handler: impl Handler,
    ) -> Result<u64> {
        self.do_connect(url, Box::new(handler), None, Some(opts.clone()), false)
    }

    /// Open an SNTP connection; `None` uses the default time server. The
    /// first request goes out on connect, later ones through
    /// [`crate::sntp`] helpers, rate-limited to one per hour.
    pub fn sntp_connect(&mut self, url: Option<&str>, handler: impl Handler) -> Result<u64> {
        let url = url.unwrap_or(crate::config::SNTP_URL);
        self.do_connect(url, Box::new(handler), None, None, true)
    }

    fn do_connect(
        &mut self,
        url: &str,
        handler: Box<dyn Handler>,
        tls_opts: Option<crate::tls::TlsOpts>,
        mqtt_opts: Option<MqttOpts>,
        is_sntp: bool,
    ) -> Result<u64> {
        let u = Url::parse(url)?;
        if u.is_tls() && cfg!(not(feature = "tls")) {
            return Err(Error::Unsupported);
        }

        let mut conn = self.alloc_conn();
        conn.set(flag::CLIENT);
        conn.host = u.host.to_string();
        conn.pending_port = u.port;

        conn.proto = if is_sntp {
            Proto::Sntp(SntpState::default())
        } else if let Some(mut opts) = mqtt_opts {
            if !u.user.is_empty() {
                opts.user = u.user.to_string();
                opts.pass = u.pass.to_string();
            }
            Proto::Mqtt(MqttState { login: Some(opts) })
        } else {
            proto_for_scheme(u.scheme, &u, &self.cfg, false)?
        };
        if is_sntp || u.is_udp() {
            conn.set(flag::UDP);
        }

        #[cfg(feature = "tls")]
        if u.is_tls() {
            let opts = tls_opts.unwrap_or_default();
            conn.tls_pending = Some(opts);
        }
        #[cfg(not(feature = "tls"))]
        let _ = tls_opts;

        if let Some(addr) = Addr::parse(u.host, u.port) {
            Self::start_connect(&mut conn, addr.to_socket_addr(), &mut self.poller)?;
        } else {
            conn.set(flag::RESOLVING);
            self.dns.resolve(
                self.poller.registry(),
                conn.id,
                u.host,
                self.cfg.enable_ipv6,
                self.cfg.rng,
            )?;
        }

        conn.handler = Some(handler);
        let id = conn.id;
        log::debug!("[mgr] connect id={} url={}", id, url);
        self.conns.push(conn);
        Ok(id)
    }

    fn start_connect(conn: &mut Conn, sa: SocketAddr, poller: &mut Poller) -> Result<()> {
        let mut sock = if conn.has(flag::UDP) {
            Socket::Dgram(transport::connect_udp(sa).map_err(Error::Io)?)
        } else {
            Socket::Stream(transport::connect_tcp(sa).map_err(Error::Io)?)
        };
        sock.register(poller.registry(), Token(conn.id as usize))
            .map_err(Error::Io)?;
        conn.peer = Some(sa);
        conn.sock = Some(sock);
        conn.set(flag::CONNECTING);
        Ok(())
    }

    /// Create the cross-thread wakeup pipe. The returned [`Wakeup`] may be
    /// used from any thread; the pipe's handler sees a `Read` on the next
    /// poll after each wakeup.
    pub fn make_pipe(&mut self, handler: impl Handler) -> Result<(u64, Wakeup)> {
        let (mut rx, wk) = pipe::make_pair().map_err(Error::Io)?;
        let mut conn = self.alloc_conn();
        self.poller
            .registry()
            .register(&mut rx, Token(conn.id as usize), mio::Interest::READABLE)
            .map_err(Error::Io)?;
        conn.sock = Some(Socket::Dgram(rx));
        conn.set(flag::CLIENT | flag::UDP);
        conn.handler = Some(Box::new(handler));
        let id = conn.id;
        self.conns.push(conn);
        Ok((id, wk))
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Add a software timer; see [`crate::timer`] for the flags. Returns
    /// an id for [`Manager::timer_del`].
    pub fn timer_add(
        &mut self,
        period_ms: u64,
        flags: u32,
        cb: impl FnMut(&mut Queue) + 'static,
    ) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let now = self.now_ms();
        self.timers
            .push(TimerEntry::new(id, period_ms, flags, now, Box::new(cb) as TimerFn));
        id
    }

    pub fn timer_del(&mut self, id: u64) {
        self.timers.retain(|t| t.id != id);
    }

    // ========================================================================
    // The poll step
    // ========================================================================

    /// Run one reactor step, waiting at most `timeout_ms` for readiness.
    pub fn poll(&mut self, timeout_ms: u64) -> Result<()> {
        let mut q = Queue::default();

        // 1. Timers.
        let now_ms = self.now_ms();
        fire_timers(&mut self.timers, now_ms, &mut q);
        self.apply(&mut q);

        // 2. Readiness wait, DNS socket included via its reserved tokens.
        let ready = self
            .poller
            .wait(Duration::from_millis(timeout_ms))
            .map_err(Error::Io)?;
        let mut dns_ready = false;
        for r in &ready {
            if r.token == DNS_V4_TOKEN.0 || r.token == DNS_V6_TOKEN.0 {
                dns_ready = true;
                continue;
            }
            if let Some(c) = self.conns.iter_mut().find(|c| c.id as usize == r.token) {
                if r.readable {
                    c.set(flag::READABLE);
                }
                if r.writable {
                    c.set(flag::WRITABLE);
                }
            }
        }

        // 2b. DNS progress and timeouts.
        if dns_ready {
            for outcome in self.dns.drain() {
                self.finish_resolve(outcome, &mut q);
            }
        }
        if self.dns.has_pending() {
            for conn_id in self.dns.expire(Instant::now()) {
                if let Some(c) = self.conn_mut(conn_id) {
                    c.fail(&Error::DnsTimeout);
                }
            }
        }

        // 3. Per-connection step, head (newest) to tail.
        let now_ms = self.now_ms();
        let mut fresh: Vec<Conn> = Vec::new();
        let mut scratch = vec![0u8; self.cfg.io_size];
        for idx in (0..self.conns.len()).rev() {
            Self::step_conn(
                &self.cfg,
                &mut self.poller,
                &mut self.conns[idx],
                &mut q,
                &mut fresh,
                &mut self.next_id,
                &mut scratch,
                now_ms,
            );
        }
        self.conns.append(&mut fresh);
        self.apply(&mut q);

        // 4. Surface errors, drain, close.
        self.sweep(&mut q);
        self.apply(&mut q);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn step_conn(
        cfg: &Config,
        poller: &mut Poller,
        conn: &mut Conn,
        q: &mut Queue,
        fresh: &mut Vec<Conn>,
        next_id: &mut u64,
        scratch: &mut [u8],
        now_ms: u64,
    ) {
        // (b) connect completion.
        if conn.has(flag::CONNECTING) && conn.pending_error.is_none() {
            let finished = if conn.has(flag::UDP) {
                true
            } else if conn.has(flag::WRITABLE) {
                let probed = conn.sock.as_ref().map(|s| s.take_error());
                match probed {
                    Some(Ok(None)) => true,
                    Some(Ok(Some(e))) | Some(Err(e)) => {
                        conn.fail(&Error::Io(e));
                        false
                    }
                    None => false,
                }
            } else {
                false
            };
            if finished {
                conn.clear(flag::CONNECTING);
                #[cfg(feature = "tls")]
                if let Some(opts) = conn.tls_pending.take() {
                    if let Err(e) = conn.tls_init(&opts) {
                        conn.fail(&e);
                    }
                }
                crate::proto::on_connect(conn, q);
                dispatch(conn, Event::Connect, q);
            }
        }

        // (c) TLS handshake.
        #[cfg(feature = "tls")]
        if conn.has(flag::TLS_HS) && conn.pending_error.is_none() {
            match Self::tls_step(conn) {
                Ok(true) => {
                    conn.clear(flag::TLS_HS);
                    log::debug!("[conn {}] tls handshake done", conn.id);
                }
                Ok(false) => {}
                Err(e) => conn.fail(&e),
            }
        }

        // (d) accept.
        if conn.has(flag::LISTENING) && !conn.has(flag::UDP) && conn.has(flag::READABLE) {
            Self::accept_all(cfg, poller, conn, q, fresh, next_id);
        }

        // (e) read.
        let may_read = conn.sock.is_some()
            && !conn.has(flag::LISTENING | flag::CONNECTING | flag::RESOLVING | flag::TLS_HS)
            || (conn.has(flag::LISTENING) && conn.has(flag::UDP));
        if may_read && conn.has(flag::READABLE) && conn.pending_error.is_none() {
            Self::read_all(cfg, conn, q, scratch);
        }

        // (f) write.
        let may_write = conn.sock.is_some()
            && !conn.send.is_empty()
            && !conn.has(flag::CONNECTING | flag::RESOLVING | flag::TLS_HS | flag::LISTENING)
            || (conn.has(flag::LISTENING) && conn.has(flag::UDP) && !conn.send.is_empty());
        if may_write && conn.pending_error.is_none() {
            Self::write_all(conn, q);
        }

        // (g) per-step poll event.
        dispatch(conn, Event::Poll { now_ms }, q);

        conn.clear(flag::READABLE | flag::WRITABLE);
    }

    #[cfg(feature = "tls")]
    fn tls_step(conn: &mut Conn) -> Result<bool> {
        use crate::tls::HandshakeStatus;
        let (sock, tls) = (conn.sock.as_mut(), conn.tls.as_mut());
        let (Some(Socket::Stream(s)), Some(tls)) = (sock, tls) else {
            return Err(Error::TlsFailure("tls on a socketless connection".into()));
        };
        Ok(matches!(tls.handshake(s)?, HandshakeStatus::Done))
    }

    fn accept_all(
        cfg: &Config,
        poller: &mut Poller,
        listener: &mut Conn,
        q: &mut Queue,
        fresh: &mut Vec<Conn>,
        next_id: &mut u64,
    ) {
        loop {
            let (stream, peer) = match listener.sock.as_ref().map(|s| s.accept()) {
                Some(Ok(pair)) => pair,
                Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Some(Err(e)) => {
                    log::error!("[conn {}] accept error: {}", listener.id, e);
                    break;
                }
                None => break,
            };
            let id = *next_id;
            *next_id += 1;
            let mut nc = Conn::new(id, cfg.io_size, cfg.rng);
            nc.set(flag::ACCEPTED);
            nc.peer = Some(peer);
            let mut sock = Socket::Stream(stream);
            if let Err(e) = sock.register(poller.registry(), Token(id as usize)) {
                log::error!("[conn {}] register failed: {}", id, e);
                continue;
            }
            nc.sock = Some(sock);
            nc.proto = inherit_proto(&listener.proto);
            nc.handler = listener.handler.as_ref().map(|h| h.clone_box());

            #[cfg(feature = "tls")]
            if let Some(srv_cfg) = &listener.tls_server_cfg {
                match crate::tls::server_state(srv_cfg.clone()) {
                    Ok(state) => {
                        nc.tls = Some(state);
                        nc.set(flag::TLS | flag::TLS_HS);
                    }
                    Err(e) => {
                        log::error!("[conn {}] tls accept setup failed: {}", id, e);
                        continue;
                    }
                }
            }

            log::debug!("[conn {}] accepted peer={}", id, peer);
            dispatch(&mut nc, Event::Accept, q);
            fresh.push(nc);
        }
    }

    fn read_all(cfg: &Config, conn: &mut Conn, q: &mut Queue, scratch: &mut [u8]) {
        loop {
            if conn.recv.len() >= cfg.max_recv_size {
                conn.fail(&Error::BufferOverflow);
                return;
            }
            match Self::io_recv(conn, scratch) {
                Ok((0, None)) => {
                    // Peer EOF: one Close, no spurious Read.
                    crate::proto::on_eof(conn, q);
                    conn.set(flag::CLOSING);
                    return;
                }
                Ok((n, from)) => {
                    if let Some(from) = from {
                        conn.peer = Some(from);
                        if n == 0 {
                            continue; // empty datagram
                        }
                    }
                    if conn.is_hexdumping() {
                        log::debug!(
                            "[conn {}] recv {} bytes\n{}",
                            conn.id,
                            n,
                            crate::util::hexdump(&scratch[..n])
                        );
                    }
                    if let Err(e) = conn.recv.append(&scratch[..n]) {
                        conn.fail(&e);
                        return;
                    }
                    crate::proto::on_read(conn, q);
                    dispatch(conn, Event::Read(n), q);
                    if conn.pending_error.is_some() || conn.is_closing() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    conn.fail(&Error::Io(e));
                    return;
                }
            }
        }
    }

    /// One non-blocking read into `scratch`, through TLS when active.
    /// `(0, None)` is stream EOF; datagrams report their source.
    fn io_recv(
        conn: &mut Conn,
        scratch: &mut [u8],
    ) -> std::io::Result<(usize, Option<SocketAddr>)> {
        #[cfg(feature = "tls")]
        if conn.tls.is_some() {
            let (sock, tls) = (conn.sock.as_mut(), conn.tls.as_mut());
            if let (Some(Socket::Stream(s)), Some(tls)) = (sock, tls) {
                return tls.read_plain(s, scratch).map(|n| (n, None));
            }
        }
        match conn.sock.as_mut() {
            Some(s) => s.recv(scratch),
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    fn write_all(conn: &mut Conn, q: &mut Queue) {
        while !conn.send.is_empty() {
            let n = match Self::io_send(conn) {
                Ok(0) => {
                    conn.fail(&Error::Io(std::io::ErrorKind::WriteZero.into()));
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    conn.fail(&Error::Io(e));
                    return;
                }
            };
            if conn.is_hexdumping() {
                log::debug!(
                    "[conn {}] sent {} bytes\n{}",
                    conn.id,
                    n,
                    crate::util::hexdump(&conn.send[..n])
                );
            }
            conn.send.delete(0, n);
            dispatch(conn, Event::Write(n), q);
        }
    }

    fn io_send(conn: &mut Conn) -> std::io::Result<usize> {
        #[cfg(feature = "tls")]
        if conn.tls.is_some() {
            let (sock, tls) = (conn.sock.as_mut(), conn.tls.as_mut());
            if let (Some(Socket::Stream(s)), Some(tls)) = (sock, tls) {
                return tls.write_plain(s, &conn.send[..]);
            }
        }
        let to = if conn.has(flag::UDP) && conn.has(flag::LISTENING) {
            conn.peer
        } else {
            None
        };
        let send = &conn.send[..];
        match conn.sock.as_mut() {
            Some(s) => s.send(send, to),
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    fn finish_resolve(&mut self, outcome: DnsOutcome, q: &mut Queue) {
        match outcome {
            DnsOutcome::Resolved(id, ip) => {
                let Some(idx) = self.conn_index(id) else {
                    return;
                };
                self.conns[idx].clear(flag::RESOLVING);
                dispatch(&mut self.conns[idx], Event::Resolve, q);
                let sa = SocketAddr::new(ip, self.conns[idx].pending_port);
                if let Err(e) = Self::start_connect(&mut self.conns[idx], sa, &mut self.poller) {
                    self.conns[idx].fail(&e);
                }
            }
            DnsOutcome::Failed(id, msg) => {
                if let Some(c) = self.conn_mut(id) {
                    c.error(&msg);
                }
            }
        }
    }

    /// Surface pending errors, advance draining connections, then free
    /// everything marked closing after delivering `Close`.
    fn sweep(&mut self, q: &mut Queue) {
        for c in self.conns.iter_mut() {
            if let Some(msg) = c.pending_error.take() {
                dispatch(c, Event::Error(&msg), q);
                c.set(flag::DRAINING | flag::CLOSING);
            }
            if c.is_draining() && c.send.is_empty() {
                c.set(flag::CLOSING);
            }
        }
        for idx in (0..self.conns.len()).rev() {
            if !self.conns[idx].is_closing() {
                continue;
            }
            let mut conn = self.conns.remove(idx);
            log::debug!("[conn {}] closing", conn.id);
            dispatch(&mut conn, Event::Close, q);
            if let Some(mut s) = conn.sock.take() {
                s.deregister(self.poller.registry());
            }
            self.dns.cancel(conn.id);
        }
    }

    /// Apply queued cross-connection commands, including any that the
    /// triggered handlers enqueue in turn.
    fn apply(&mut self, q: &mut Queue) {
        while !q.cmds.is_empty() {
            let cmds = std::mem::take(&mut q.cmds);
            for cmd in cmds {
                match cmd {
                    Command::Send { id, data } => {
                        if let Some(c) = self.conn_mut(id) {
                            if let Err(e) = c.send(&data) {
                                log::debug!("[conn {}] queued send dropped: {}", id, e);
                            }
                        }
                    }
                    Command::Close { id } => {
                        if let Some(c) = self.conn_mut(id) {
                            c.close();
                        }
                    }
                    Command::Drain { id } => {
                        if let Some(c) = self.conn_mut(id) {
                            c.drain();
                        }
                    }
                    Command::Post { id, value } => {
                        if let Some(idx) = self.conn_index(id) {
                            dispatch(&mut self.conns[idx], Event::User(value), q);
                        }
                    }
                }
            }
        }
    }

    /// Close every connection, delivering `Close` to each.
    pub fn close_all(&mut self) {
        let mut q = Queue::default();
        for idx in (0..self.conns.len()).rev() {
            let mut conn = self.conns.remove(idx);
            dispatch(&mut conn, Event::Close, &mut q);
            if let Some(mut s) = conn.sock.take() {
                s.deregister(self.poller.registry());
            }
        }
        self.timers.clear();
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn proto_for_scheme(scheme: &str, u: &Url<'_>, cfg: &Config, server: bool) -> Result<Proto> {
    Ok(match scheme {
        "http" | "https" => Proto::Http(HttpState::default()),
        "ws" | "wss" if server => Proto::Http(HttpState {
            ws_auto: true,
            chunk: None,
        }),
        "ws" | "wss" => Proto::Ws(WsState::Handshake {
            key: crate::ws::make_client_key(cfg.rng),
            uri: u.uri.to_string(),
        }),
        "mqtt" | "mqtts" => Proto::Mqtt(MqttState::default()),
        _ => Proto::Raw,
    })
}

/// Protocol state for a connection accepted off a listener: same engine,
/// fresh per-connection state.
fn inherit_proto(p: &Proto) -> Proto {
    match p {
        Proto::Raw => Proto::Raw,
        Proto::Http(st) => Proto::Http(HttpState {
            ws_auto: st.ws_auto,
            chunk: None,
        }),
        Proto::Ws(_) => Proto::Ws(WsState::Open),
        Proto::Mqtt(_) => Proto::Mqtt(MqttState::default()),
        Proto::Sntp(_) => Proto::Sntp(SntpState::default()),
    }
}
