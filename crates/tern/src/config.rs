// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth.
//!
//! Two levels, never hardcode elsewhere:
//!
//! - **Level 1 (Static)**: compile-time constants (buffer granularity,
//!   caps, protocol defaults)
//! - **Level 2 (Dynamic)**: [`Config`] carried by the manager (DNS servers,
//!   timeouts, RNG hook)

use std::net::SocketAddr;

// =======================================================================
// Buffer sizing
// =======================================================================

/// Allocation granularity for IO buffers, bytes. Buffer capacity is always
/// rounded up to a multiple of this value.
pub const IO_SIZE: usize = 2048;

/// Hard cap on a connection's receive buffer. A peer that pushes past this
/// without the application consuming is treated as faulty and the
/// connection is closed with an error.
pub const MAX_RECV_SIZE: usize = 3 * 1024 * 1024;

// =======================================================================
// HTTP
// =======================================================================

/// Maximum number of headers retained per HTTP message. Extra headers are
/// parsed past and silently dropped.
pub const MAX_HTTP_HEADERS: usize = 40;

// =======================================================================
// DNS
// =======================================================================

/// Default IPv4 resolver (Google public DNS).
pub const DNS_SERVER_V4: &str = "8.8.8.8:53";

/// Default IPv6 resolver (Google public DNS).
pub const DNS_SERVER_V6: &str = "[2001:4860:4860::8888]:53";

/// Default per-request DNS timeout, milliseconds.
pub const DNS_TIMEOUT_MS: u64 = 3000;

// =======================================================================
// SNTP
// =======================================================================

/// Default SNTP server URL.
pub const SNTP_URL: &str = "udp://time.google.com:123";

/// Minimum interval between SNTP requests on one connection, milliseconds.
pub const SNTP_MIN_INTERVAL_MS: u64 = 3_600_000;

// =======================================================================
// MQTT
// =======================================================================

/// Default MQTT keepalive, seconds.
pub const MQTT_KEEPALIVE_SECS: u16 = 60;

/// RNG hook: fills the slice with random bytes. Replaceable for platforms
/// with their own entropy source.
pub type RngFn = fn(&mut [u8]);

/// Default RNG backed by the system entropy source.
pub fn sys_rand(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    if rng.fill(buf).is_err() {
        // Entropy exhaustion is not survivable for handshake material;
        // fall back to a counter so callers never see all-zero keys.
        static FALLBACK: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0x9E37);
        for (i, b) in buf.iter_mut().enumerate() {
            let v = FALLBACK.fetch_add(0x9E3779B97F4A7C15, std::sync::atomic::Ordering::Relaxed);
            *b = (v >> ((i % 8) * 8)) as u8;
        }
    }
}

/// Runtime configuration for a [`crate::Manager`].
#[derive(Clone, Debug)]
pub struct Config {
    /// IPv4 resolver address.
    pub dns_server_v4: SocketAddr,
    /// IPv6 resolver address.
    pub dns_server_v6: SocketAddr,
    /// Per-request DNS timeout, milliseconds.
    pub dns_timeout_ms: u64,
    /// Resolve AAAA records and open IPv6 sockets.
    pub enable_ipv6: bool,
    /// Receive buffer hard cap, bytes.
    pub max_recv_size: usize,
    /// IO buffer allocation granularity, bytes.
    pub io_size: usize,
    /// Random byte source for WebSocket keys/masks, DNS txids, MQTT ids.
    pub rng: RngFn,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Constants above are valid socket addresses, checked in tests.
            dns_server_v4: DNS_SERVER_V4.parse().unwrap_or_else(|_| {
                SocketAddr::from(([8, 8, 8, 8], 53))
            }),
            dns_server_v6: DNS_SERVER_V6.parse().unwrap_or_else(|_| {
                SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 1], 53))
            }),
            dns_timeout_ms: DNS_TIMEOUT_MS,
            enable_ipv6: cfg!(feature = "ipv6"),
            max_recv_size: MAX_RECV_SIZE,
            io_size: IO_SIZE,
            rng: sys_rand,
        }
    }
}
