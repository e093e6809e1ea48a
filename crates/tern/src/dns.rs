// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking DNS client.
//!
//! One UDP socket per address family, lazily bound and registered with the
//! poller under reserved tokens. Each outstanding request records the
//! connection it resolves for, a random transaction id, and a deadline.
//! Malformed responses are dropped on the floor (the timeout governs);
//! NXDOMAIN and other server errors fail the request immediately.

use crate::transport::{bind_udp_any, DNS_V4_TOKEN, DNS_V6_TOKEN};
use crate::{Error, Result};
use mio::net::UdpSocket;
use mio::{Interest, Registry};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;

/// One outstanding resolution.
#[derive(Debug)]
struct DnsRequest {
    conn_id: u64,
    txid: u16,
    deadline: Instant,
}

/// Terminal outcome of a resolution, reported to the manager.
#[derive(Debug)]
pub(crate) enum DnsOutcome {
    Resolved(u64, IpAddr),
    Failed(u64, String),
}

pub(crate) struct DnsClient {
    server_v4: SocketAddr,
    server_v6: SocketAddr,
    timeout: Duration,
    sock_v4: Option<UdpSocket>,
    sock_v6: Option<UdpSocket>,
    pending: Vec<DnsRequest>,
}

impl DnsClient {
    pub fn new(cfg: &crate::Config) -> Self {
        Self {
            server_v4: cfg.dns_server_v4,
            server_v6: cfg.dns_server_v6,
            timeout: Duration::from_millis(cfg.dns_timeout_ms),
            sock_v4: None,
            sock_v6: None,
            pending: Vec::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Start resolving `host` for connection `conn_id`.
    pub fn resolve(
        &mut self,
        registry: &Registry,
        conn_id: u64,
        host: &str,
        want_v6: bool,
        rng: crate::config::RngFn,
    ) -> Result<()> {
        let mut txid_bytes = [0u8; 2];
        rng(&mut txid_bytes);
        let txid = u16::from_be_bytes(txid_bytes);

        let query = make_query(txid, host, want_v6)?;
        let server = if want_v6 { self.server_v6 } else { self.server_v4 };

        let sock = self.socket_for(registry, want_v6)?;
        if let Err(e) = sock.send_to(&query, server) {
            // Unroutable resolver: leave the request pending and let the
            // timeout surface it as a DNS failure.
            log::debug!("[DNS] send to {} failed: {}", server, e);
        }
        log::debug!(
            "[DNS] query host={} type={} txid={:#06x} server={}",
            host,
            if want_v6 { "AAAA" } else { "A" },
            txid,
            server
        );

        self.pending.push(DnsRequest {
            conn_id,
            txid,
            deadline: Instant::now() + self.timeout,
        });
        Ok(())
    }

    fn socket_for(&mut self, registry: &Registry, v6: bool) -> Result<&mut UdpSocket> {
        let (slot, token) = if v6 {
            (&mut self.sock_v6, DNS_V6_TOKEN)
        } else {
            (&mut self.sock_v4, DNS_V4_TOKEN)
        };
        if slot.is_none() {
            let mut sock = bind_udp_any(v6).map_err(Error::Io)?;
            registry
                .register(&mut sock, token, Interest::READABLE)
                .map_err(Error::Io)?;
            *slot = Some(sock);
        }
        // Just created above when absent.
        slot.as_mut().ok_or(Error::Unsupported)
    }

    /// Drain responses from both sockets, matching them to pending
    /// requests by transaction id.
    pub fn drain(&mut self) -> Vec<DnsOutcome> {
        let mut out = Vec::new();
        let mut buf = [0u8; 2048];
        for sock in [self.sock_v4.as_ref(), self.sock_v6.as_ref()].into_iter().flatten() {
            loop {
                let n = match sock.recv_from(&mut buf) {
                    Ok((n, _)) => n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::debug!("[DNS] recv error: {}", e);
                        break;
                    }
                };
                let reply = match parse_reply(&buf[..n]) {
                    Some(r) => r,
                    None => continue, // malformed, let the timeout handle it
                };
                let Some(pos) = self.pending.iter().position(|p| p.txid == reply.txid) else {
                    continue; // stale or spoofed txid
                };
                let req = self.pending.swap_remove(pos);
                if reply.nxdomain {
                    out.push(DnsOutcome::Failed(req.conn_id, "DNS name not found".into()));
                } else if let Some(ip) = reply.ip {
                    log::debug!("[DNS] resolved txid={:#06x} ip={}", reply.txid, ip);
                    out.push(DnsOutcome::Resolved(req.conn_id, ip));
                } else {
                    out.push(DnsOutcome::Failed(req.conn_id, "DNS no address".into()));
                }
            }
        }
        out
    }

    /// Expire requests past their deadline; returns the failed conn ids.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let mut out = Vec::new();
        self.pending.retain(|p| {
            if p.deadline <= now {
                out.push(p.conn_id);
                false
            } else {
                true
            }
        });
        out
    }

    /// Forget a request when its connection dies first.
    pub fn cancel(&mut self, conn_id: u64) {
        self.pending.retain(|p| p.conn_id != conn_id);
    }
}

// ============================================================================
// Wire codec
// ============================================================================

/// Build a standard recursive query for an A (or AAAA) record.
pub(crate) fn make_query(txid: u16, host: &str, want_aaaa: bool) -> Result<Vec<u8>> {
    if host.is_empty() || host.len() > 253 {
        return Err(Error::BadUrl(host.to_string()));
    }
    let mut pkt = Vec::with_capacity(17 + host.len());
    pkt.extend_from_slice(&txid.to_be_bytes());
    pkt.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    pkt.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    pkt.extend_from_slice(&[0u8; 6]); // AN/NS/AR
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(Error::BadUrl(host.to_string()));
        }
        pkt.push(label.len() as u8);
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.push(0);
    let qtype = if want_aaaa { TYPE_AAAA } else { TYPE_A };
    pkt.extend_from_slice(&qtype.to_be_bytes());
    pkt.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(pkt)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DnsReply {
    pub txid: u16,
    pub nxdomain: bool,
    /// First A/AAAA record of the answer section; CNAMEs are skipped.
    pub ip: Option<IpAddr>,
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]))
}

/// Skip a possibly-compressed name, returning the following position.
fn skip_name(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *buf.get(pos)?;
        if len & 0xC0 == 0xC0 {
            // Compression pointer: two bytes, then done.
            return Some(pos + 2);
        }
        if len == 0 {
            return Some(pos + 1);
        }
        pos += 1 + len as usize;
        if pos > buf.len() {
            return None;
        }
    }
}

/// Parse a response; `None` means malformed (and therefore ignored).
pub(crate) fn parse_reply(buf: &[u8]) -> Option<DnsReply> {
    let txid = read_u16(buf, 0)?;
    let flags = read_u16(buf, 2)?;
    if flags & 0x8000 == 0 {
        return None; // not a response
    }
    let rcode = flags & 0x000F;
    if rcode != 0 {
        return Some(DnsReply {
            txid,
            nxdomain: true,
            ip: None,
        });
    }
    let qdcount = read_u16(buf, 4)?;
    let ancount = read_u16(buf, 6)?;

    let mut pos = 12;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos)?;
        pos += 4; // qtype + qclass
        if pos > buf.len() {
            return None;
        }
    }

    for _ in 0..ancount {
        pos = skip_name(buf, pos)?;
        let rtype = read_u16(buf, pos)?;
        let rdlen = read_u16(buf, pos + 8)? as usize;
        let rdata_at = pos + 10;
        let rdata = buf.get(rdata_at..rdata_at + rdlen)?;
        match (rtype, rdlen) {
            (TYPE_A, 4) => {
                let mut b = [0u8; 4];
                b.copy_from_slice(rdata);
                return Some(DnsReply {
                    txid,
                    nxdomain: false,
                    ip: Some(IpAddr::V4(Ipv4Addr::from(b))),
                });
            }
            (TYPE_AAAA, 16) => {
                let mut b = [0u8; 16];
                b.copy_from_slice(rdata);
                return Some(DnsReply {
                    txid,
                    nxdomain: false,
                    ip: Some(IpAddr::V6(Ipv6Addr::from(b))),
                });
            }
            _ => {
                // CNAME and friends: skip to the next record.
                pos = rdata_at + rdlen;
            }
        }
    }

    Some(DnsReply {
        txid,
        nxdomain: false,
        ip: None,
    })
}
