// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # tern - event-driven networking library
//!
//! A single-threaded, readiness-driven reactor for building TCP and UDP
//! clients and servers, with built-in protocol engines for HTTP/1.x,
//! WebSocket, MQTT 3.1.1 and SNTP, optional TLS via rustls, and a
//! non-blocking DNS client. It targets cooperative use on anything from
//! large servers down to small embedded hosts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tern::{http, Conn, Event, Manager, Queue, Result};
//!
//! fn main() -> Result<()> {
//!     let mut mgr = Manager::with_defaults()?;
//!     mgr.listen("http://0.0.0.0:8080", |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
//!         if let Event::HttpMsg(m) = ev {
//!             http::reply(c, 200, "", format_args!("hello from {}", m.uri)).ok();
//!         }
//!     })?;
//!     loop {
//!         mgr.poll(100)?;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |        handlers (two-stage: protocol engine, then user)            |
//! +--------------------------------------------------------------------+
//! |                        Protocol Engines                            |
//! |        HTTP/1.x | WebSocket | MQTT 3.1.1 | SNTP                    |
//! +--------------------------------------------------------------------+
//! |                        Event Manager                               |
//! |   poll loop | connection list | timers | DNS | wakeup pipe         |
//! +--------------------------------------------------------------------+
//! |                        Transport Layer                             |
//! |   mio readiness | TCP | UDP | TLS (rustls, optional)               |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Manager`] | The reactor: owns connections, timers, DNS, the poller |
//! | [`Conn`] | One connection: socket, buffers, flags, protocol state |
//! | [`Event`] | What handlers receive, from `Connect` to `MqttMsg` |
//! | [`Queue`] | Deferred cross-connection effects from handler context |
//! | [`Wakeup`] | The only thread-safe entry point into the reactor |
//! | [`IoBuf`] | Growable buffer with insert/delete at arbitrary offsets |
//!
//! ## Threading model
//!
//! Everything runs on the thread that calls [`Manager::poll`]. Handlers
//! must not block. The one exception is [`Wakeup::wakeup`], callable from
//! any thread; it surfaces as a `Read` event on the pipe connection.

/// Peer addresses: IPv4/IPv6 parsing and formatting.
pub mod addr;
/// Growable byte buffer with insert/delete at arbitrary offsets.
pub mod buf;
/// Compile-time constants and the runtime [`Config`].
pub mod config;
/// Connections: socket handle, buffers, flags, protocol state.
pub mod conn;
/// Non-blocking DNS client (A/AAAA over UDP with timeout and retry).
mod dns;
/// Events, handlers and the deferred command queue.
pub mod event;
/// HTTP/1.x incremental parser and encoder.
pub mod http;
/// The event manager and its poll loop.
pub mod mgr;
/// MQTT 3.1.1 packet codec and client helpers.
pub mod mqtt;
/// Protocol stage drivers (internal half of the dispatch pipeline).
mod proto;
/// SNTP client packet build and parse.
pub mod sntp;
/// Software timers driven by the poll loop.
pub mod timer;
/// TLS driver over rustls (behind the `tls` feature).
pub mod tls;
/// Socket driver: non-blocking TCP/UDP and the readiness poller.
mod transport;
/// URL parsing and glob URI matching.
pub mod url;
/// Small formatting helpers.
mod util;
/// WebSocket (RFC 6455) framing and handshake.
pub mod ws;

pub use addr::Addr;
pub use buf::IoBuf;
pub use config::Config;
pub use conn::Conn;
pub use event::{Event, EventCode, Handler, Queue};
pub use http::HttpMessage;
pub use mgr::Manager;
pub use mqtt::{MqttMessage, MqttOpts};
pub use sntp::SntpTime;
pub use timer::{TIMER_REPEAT, TIMER_RUN_NOW};
pub use tls::TlsOpts;
pub use transport::Wakeup;
pub use url::{match_uri, Url};
pub use ws::WsMessage;

/// Errors surfaced by manager operations and protocol engines.
///
/// A failure on one connection never tears down the manager or its other
/// connections: protocol faults surface as an `Error` event on that
/// connection followed by `Close`.
#[derive(Debug)]
pub enum Error {
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// URL failed to parse or is unusable for the operation.
    BadUrl(String),
    /// Hostname did not resolve in time.
    DnsTimeout,
    /// Resolver said no (NXDOMAIN and friends).
    DnsFailure(String),
    /// Malformed protocol input; fatal for the connection.
    BadMessage(&'static str),
    /// Receive buffer cap exceeded; fatal for the connection.
    BufferOverflow,
    /// Allocation failed.
    OutOfMemory,
    /// Operation refused: the connection is closing.
    ConnectionClosed,
    /// Feature not compiled in (e.g. a TLS URL without the `tls` feature).
    Unsupported,
    /// TLS configuration or handshake failure.
    TlsFailure(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::BadUrl(url) => write!(f, "Bad URL: {}", url),
            Error::DnsTimeout => write!(f, "DNS timeout"),
            Error::DnsFailure(msg) => write!(f, "DNS failure: {}", msg),
            Error::BadMessage(msg) => write!(f, "Malformed message: {}", msg),
            Error::BufferOverflow => write!(f, "Receive buffer overflow"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::ConnectionClosed => write!(f, "Connection is closing"),
            Error::Unsupported => write!(f, "Unsupported operation"),
            Error::TlsFailure(msg) => write!(f, "TLS failure: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::DnsTimeout.to_string(), "DNS timeout");
        assert_eq!(
            Error::BadMessage("bad chunk").to_string(),
            "Malformed message: bad chunk"
        );
        let io = Error::from(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(io.to_string().starts_with("I/O error"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as _;
        let e = Error::Io(std::io::ErrorKind::ConnectionRefused.into());
        assert!(e.source().is_some());
        assert!(Error::Unsupported.source().is_none());
    }
}
