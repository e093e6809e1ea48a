// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness poller wrapping `mio::Poll`.
//!
//! Token space: low values are reserved for manager internals (the DNS
//! sockets); connection ids start at [`CONN_TOKEN_BASE`] and double as mio
//! tokens, so the mapping back from an event is direct.

use mio::{Events, Poll, Token};
use std::io;
use std::time::Duration;

/// Token of the IPv4 DNS client socket.
pub(crate) const DNS_V4_TOKEN: Token = Token(1);

/// Token of the IPv6 DNS client socket.
pub(crate) const DNS_V6_TOKEN: Token = Token(2);

/// First token value handed to connections.
pub(crate) const CONN_TOKEN_BASE: u64 = 16;

/// Maximum events drained per wait.
const MAX_EVENTS: usize = 128;

/// One readiness observation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Readiness {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
}

/// Bounded readiness wait over all registered sockets.
pub(crate) struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(MAX_EVENTS),
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Wait up to `timeout` and collect readiness marks. A rare
    /// `Interrupted` wait is treated as an empty one.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<Readiness>> {
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(e);
        }
        let mut out = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            // Error and write-closed conditions count as writable so a
            // failed non-blocking connect surfaces through take_error.
            out.push(Readiness {
                token: event.token().0,
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_error() || event.is_write_closed(),
            });
        }
        Ok(out)
    }
}
