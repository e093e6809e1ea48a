// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SNTP (RFC 4330) client packet build and parse.
//!
//! The request is a 48-byte NTPv4 client packet. The reply's transmit
//! timestamp is 64-bit fixed point seconds since 1900-01-01 UTC; the 1970
//! epoch offset is 2,208,988,800 seconds.

use crate::conn::{Conn, Proto};
use crate::{Error, Result};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// SNTP packet size.
pub const PACKET_LEN: usize = 48;

/// Wall-clock time extracted from a server reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SntpTime {
    /// Seconds since the UNIX epoch.
    pub seconds: i64,
    /// Microseconds within the second.
    pub micros: u32,
}

impl SntpTime {
    /// Milliseconds since the UNIX epoch.
    pub fn unix_ms(&self) -> i64 {
        self.seconds * 1000 + i64::from(self.micros / 1000)
    }
}

/// Build the 48-byte client request.
///
/// LI=0, VN=4, Mode=3 (client); every other field zero, as SNTP permits.
pub fn make_request() -> [u8; PACKET_LEN] {
    let mut pkt = [0u8; PACKET_LEN];
    pkt[0] = 0x23; // (0 << 6) | (4 << 3) | 3
    pkt
}

/// Convert UNIX seconds to NTP-era seconds.
pub fn unix_to_ntp(unix_secs: i64) -> u64 {
    (unix_secs + NTP_UNIX_OFFSET as i64) as u64
}

/// Convert NTP-era seconds and fraction to [`SntpTime`].
pub fn ntp_to_unix(ntp_secs: u32, ntp_frac: u32) -> SntpTime {
    let seconds = i64::from(ntp_secs) - NTP_UNIX_OFFSET as i64;
    // fraction is 1/2^32 seconds; scale to microseconds.
    let micros = ((u64::from(ntp_frac) * 1_000_000) >> 32) as u32;
    SntpTime { seconds, micros }
}

/// Parse a server reply, validating mode, version and stratum.
pub fn parse_reply(buf: &[u8]) -> Result<SntpTime> {
    if buf.len() < PACKET_LEN {
        return Err(Error::BadMessage("short sntp reply"));
    }
    let mode = buf[0] & 0x07;
    let version = (buf[0] >> 3) & 0x07;
    if mode != 4 && mode != 5 {
        return Err(Error::BadMessage("sntp reply mode"));
    }
    if !(3..=4).contains(&version) {
        return Err(Error::BadMessage("sntp reply version"));
    }
    // Stratum 0 is a kiss-of-death packet.
    if buf[1] == 0 {
        return Err(Error::BadMessage("sntp kiss of death"));
    }
    // Transmit timestamp at offset 40.
    let secs = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
    let frac = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);
    if secs == 0 {
        return Err(Error::BadMessage("sntp zero timestamp"));
    }
    Ok(ntp_to_unix(secs, frac))
}

/// Send a request on an SNTP connection (opened with
/// [`crate::Manager::sntp_connect`]). Rate-limited to one request per
/// hour per connection; returns whether a packet actually went out.
pub fn request(c: &mut Conn) -> Result<bool> {
    let mut proto = std::mem::replace(&mut c.proto, Proto::Raw);
    let out = match &mut proto {
        Proto::Sntp(st) => crate::proto::sntp_request(c, st),
        _ => Err(Error::BadMessage("not an sntp connection")),
    };
    c.proto = proto;
    out
}
