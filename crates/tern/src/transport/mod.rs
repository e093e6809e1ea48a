// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket driver: non-blocking TCP/UDP sockets and the readiness poller.
//!
//! The driver owns nothing beyond socket handles. It never touches
//! connection flags (other than the readiness marks the manager derives
//! from its wait results) and never invokes handlers.

pub(crate) mod pipe;
pub(crate) mod poll;

pub use pipe::Wakeup;
pub(crate) use poll::{Poller, Readiness, CONN_TOKEN_BASE, DNS_V4_TOKEN, DNS_V6_TOKEN};

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Type};
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// A registered socket handle: TCP listener, TCP stream, or UDP socket.
pub(crate) enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
    Dgram(UdpSocket),
}

impl Socket {
    /// Register with the poller. Listeners only need read readiness.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Socket::Listener(l) => registry.register(l, token, Interest::READABLE),
            Socket::Stream(s) => {
                registry.register(s, token, Interest::READABLE | Interest::WRITABLE)
            }
            Socket::Dgram(s) => {
                registry.register(s, token, Interest::READABLE | Interest::WRITABLE)
            }
        }
    }

    pub fn deregister(&mut self, registry: &Registry) {
        let _ = match self {
            Socket::Listener(l) => registry.deregister(l),
            Socket::Stream(s) => registry.deregister(s),
            Socket::Dgram(s) => registry.deregister(s),
        };
    }

    /// Accept one pending connection (listeners only).
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match self {
            Socket::Listener(l) => l.accept(),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a listener")),
        }
    }

    /// Non-blocking read. UDP reads one datagram and reports its source.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        match self {
            Socket::Stream(s) => s.read(buf).map(|n| (n, None)),
            Socket::Dgram(s) => s.recv_from(buf).map(|(n, from)| (n, Some(from))),
            Socket::Listener(_) => {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "listener recv"))
            }
        }
    }

    /// Non-blocking write. UDP sends one datagram to `peer`.
    pub fn send(&mut self, buf: &[u8], peer: Option<SocketAddr>) -> io::Result<usize> {
        match self {
            Socket::Stream(s) => s.write(buf),
            Socket::Dgram(s) => match peer {
                Some(to) => s.send_to(buf, to),
                None => s.send(buf),
            },
            Socket::Listener(_) => {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "listener send"))
            }
        }
    }

    /// Pending socket error, used to learn the fate of a non-blocking
    /// connect once the socket turns writable.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            Socket::Listener(l) => l.take_error(),
            Socket::Stream(s) => s.take_error(),
            Socket::Dgram(s) => s.take_error(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Socket::Listener(l) => l.local_addr(),
            Socket::Stream(s) => s.local_addr(),
            Socket::Dgram(s) => s.local_addr(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Socket::Stream(_))
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Socket::Listener(_) => "Listener",
            Socket::Stream(_) => "Stream",
            Socket::Dgram(_) => "Dgram",
        };
        write!(f, "Socket::{}", kind)
    }
}

/// Bind a TCP listener with SO_REUSEADDR so restarts do not fight
/// TIME_WAIT remnants.
pub(crate) fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let sock = socket2::Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.listen(128)?;
    sock.set_nonblocking(true)?;
    Ok(TcpListener::from_std(sock.into()))
}

/// Bind a UDP "listener" socket.
pub(crate) fn listen_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let sock = socket2::Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(sock.into()))
}

/// Start a non-blocking TCP connect; completion is signaled by the socket
/// turning writable (check `take_error` there).
pub(crate) fn connect_tcp(addr: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(addr)
}

/// Open a UDP socket connected to `addr` (an ephemeral local port).
pub(crate) fn connect_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let any: SocketAddr = if addr.is_ipv6() {
        "[::]:0".parse().map_err(|_| io::Error::other("bad any-addr"))?
    } else {
        "0.0.0.0:0".parse().map_err(|_| io::Error::other("bad any-addr"))?
    };
    let sock = UdpSocket::bind(any)?;
    sock.connect(addr)?;
    Ok(sock)
}

/// Unbound-destination UDP socket for the DNS client.
pub(crate) fn bind_udp_any(v6: bool) -> io::Result<UdpSocket> {
    let any: SocketAddr = if v6 {
        "[::]:0".parse().map_err(|_| io::Error::other("bad any-addr"))?
    } else {
        "0.0.0.0:0".parse().map_err(|_| io::Error::other("bad any-addr"))?
    };
    UdpSocket::bind(any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_tcp_ephemeral() {
        let l = listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = l.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_listen_udp_and_connect_udp() {
        let l = listen_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let c = connect_udp(l.local_addr().unwrap()).unwrap();
        assert_ne!(c.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_socket_enum_dispatch() {
        let l = listen_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let sock = Socket::Listener(l);
        assert!(!sock.is_stream());
        assert!(sock.local_addr().is_ok());
        // Accept with nothing pending is WouldBlock.
        match sock.accept() {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            Ok(_) => panic!("unexpected accept"),
        }
    }
}
