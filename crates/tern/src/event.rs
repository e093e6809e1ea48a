// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events, handlers and the deferred command queue.
//!
//! Dispatch is two-stage: the built-in protocol stage parses bytes and
//! synthesizes higher-level events, then the user handler runs. Both see
//! the same [`Event`] type. Protocol-borne events (`HttpMsg`, `WsMsg`,
//! `MqttMsg`, ...) carry views into the connection's receive buffer; while
//! one is being delivered the buffer itself reads as empty, which is what
//! makes the borrow sound. Copy out anything needed past the callback.
//!
//! A handler gets `&mut` access to its own connection only. Effects on
//! *other* connections go through [`Queue`] and are applied by the manager
//! when the handler returns.

use crate::conn::Conn;
use crate::http::HttpMessage;
use crate::mqtt::MqttMessage;
use crate::sntp::SntpTime;
use crate::ws::WsMessage;

/// Stable event codes, exposed for applications that route on numbers.
/// `User` is the first value available for application-defined events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventCode {
    Error = 0,
    Poll = 1,
    Resolve = 2,
    Connect = 3,
    Accept = 4,
    Read = 5,
    Write = 6,
    Close = 7,
    HttpMsg = 8,
    HttpChunk = 9,
    WsOpen = 10,
    WsMsg = 11,
    WsCtl = 12,
    MqttCmd = 13,
    MqttMsg = 14,
    MqttOpen = 15,
    SntpTime = 16,
    User = 17,
}

/// An event delivered to a connection handler.
#[derive(Debug)]
pub enum Event<'a> {
    /// Fault on this connection; the connection closes at the end of the
    /// current poll step.
    Error(&'a str),
    /// One per connection per poll step; `now_ms` is milliseconds since
    /// the manager started.
    Poll { now_ms: u64 },
    /// Hostname resolution finished; connect begins.
    Resolve,
    /// Outbound connection established (TLS handshake may still follow).
    Connect,
    /// Inbound connection accepted on a listener.
    Accept,
    /// Bytes arrived in the receive buffer.
    Read(usize),
    /// Bytes were flushed from the send buffer to the socket.
    Write(usize),
    /// Last event a connection ever sees.
    Close,
    /// Complete HTTP request or response.
    HttpMsg(&'a HttpMessage<'a>),
    /// One chunk of a chunked-transfer body.
    HttpChunk(&'a HttpMessage<'a>),
    /// WebSocket handshake finished; for servers the upgrading request is
    /// attached.
    WsOpen(&'a HttpMessage<'a>),
    /// WebSocket data frame.
    WsMsg(&'a WsMessage<'a>),
    /// WebSocket control frame (close/ping/pong).
    WsCtl(&'a WsMessage<'a>),
    /// Any MQTT packet, before type-specific handling.
    MqttCmd(&'a MqttMessage<'a>),
    /// MQTT PUBLISH delivery.
    MqttMsg(&'a MqttMessage<'a>),
    /// MQTT CONNACK; value is the return code (0 = accepted).
    MqttOpen(u8),
    /// SNTP server time received.
    SntpTime(SntpTime),
    /// Application-defined event posted through [`Queue::post`].
    User(u64),
}

impl Event<'_> {
    /// Stable code of this event.
    pub fn code(&self) -> EventCode {
        match self {
            Event::Error(_) => EventCode::Error,
            Event::Poll { .. } => EventCode::Poll,
            Event::Resolve => EventCode::Resolve,
            Event::Connect => EventCode::Connect,
            Event::Accept => EventCode::Accept,
            Event::Read(_) => EventCode::Read,
            Event::Write(_) => EventCode::Write,
            Event::Close => EventCode::Close,
            Event::HttpMsg(_) => EventCode::HttpMsg,
            Event::HttpChunk(_) => EventCode::HttpChunk,
            Event::WsOpen(_) => EventCode::WsOpen,
            Event::WsMsg(_) => EventCode::WsMsg,
            Event::WsCtl(_) => EventCode::WsCtl,
            Event::MqttCmd(_) => EventCode::MqttCmd,
            Event::MqttMsg(_) => EventCode::MqttMsg,
            Event::MqttOpen(_) => EventCode::MqttOpen,
            Event::SntpTime(_) => EventCode::SntpTime,
            Event::User(_) => EventCode::User,
        }
    }
}

/// Connection event handler.
///
/// Closures implement this automatically when they are `Clone` (cloning is
/// how a listener seeds its accepted connections):
///
/// ```ignore
/// mgr.listen("http://0.0.0.0:8080", |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
///     if let Event::HttpMsg(m) = ev {
///         http::reply(c, 200, "", format_args!("hello {}", m.uri)).ok();
///     }
/// })?;
/// ```
pub trait Handler: 'static {
    fn on_event(&mut self, conn: &mut Conn, ev: Event<'_>, q: &mut Queue);

    /// Clone into a new box; used when a listener's handler is inherited
    /// by an accepted connection.
    fn clone_box(&self) -> Box<dyn Handler>;
}

impl<F> Handler for F
where
    F: FnMut(&mut Conn, Event<'_>, &mut Queue) + Clone + 'static,
{
    fn on_event(&mut self, conn: &mut Conn, ev: Event<'_>, q: &mut Queue) {
        self(conn, ev, q);
    }

    fn clone_box(&self) -> Box<dyn Handler> {
        Box::new(self.clone())
    }
}

/// Deferred commands applied by the manager after a handler returns.
#[derive(Debug)]
pub(crate) enum Command {
    Send { id: u64, data: Vec<u8> },
    Close { id: u64 },
    Drain { id: u64 },
    Post { id: u64, value: u64 },
}

/// Cross-connection effect queue handed to every handler invocation.
#[derive(Debug, Default)]
pub struct Queue {
    pub(crate) cmds: Vec<Command>,
}

impl Queue {
    /// Append bytes to another connection's send buffer.
    pub fn send_to(&mut self, id: u64, data: &[u8]) {
        self.cmds.push(Command::Send {
            id,
            data: data.to_vec(),
        });
    }

    /// Close another connection immediately (at the end of this step).
    pub fn close(&mut self, id: u64) {
        self.cmds.push(Command::Close { id });
    }

    /// Flush another connection's send buffer, then close it.
    pub fn drain(&mut self, id: u64) {
        self.cmds.push(Command::Drain { id });
    }

    /// Deliver an [`Event::User`] to another connection's handler.
    pub fn post(&mut self, id: u64, value: u64) {
        self.cmds.push(Command::Post { id, value });
    }
}

/// Run the user stage for one event. The handler is taken out of the
/// connection for the duration of the call, so re-entrant dispatch on the
/// same connection is impossible by construction.
pub(crate) fn dispatch(conn: &mut Conn, ev: Event<'_>, q: &mut Queue) {
    if let Some(mut h) = conn.handler.take() {
        h.on_event(conn, ev, q);
        if conn.handler.is_none() {
            conn.handler = Some(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes_are_stable() {
        assert_eq!(EventCode::Error as u8, 0);
        assert_eq!(EventCode::Poll as u8, 1);
        assert_eq!(EventCode::Close as u8, 7);
        assert_eq!(EventCode::HttpMsg as u8, 8);
        assert_eq!(EventCode::SntpTime as u8, 16);
        assert_eq!(EventCode::User as u8, 17);
    }

    #[test]
    fn test_event_code_mapping() {
        assert_eq!(Event::Read(3).code(), EventCode::Read);
        assert_eq!(Event::Poll { now_ms: 0 }.code(), EventCode::Poll);
        assert_eq!(Event::User(9).code(), EventCode::User);
    }

    #[test]
    fn test_dispatch_restores_handler() {
        let mut conn = Conn::detached_for_tests();
        let hits = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let h = hits.clone();
        conn.handler = Some(Box::new(
            move |_c: &mut Conn, _ev: Event<'_>, _q: &mut Queue| {
                h.set(h.get() + 1);
            },
        ));
        let mut q = Queue::default();
        dispatch(&mut conn, Event::Poll { now_ms: 1 }, &mut q);
        dispatch(&mut conn, Event::Poll { now_ms: 2 }, &mut q);
        assert_eq!(hits.get(), 2);
        assert!(conn.handler.is_some());
    }

    #[test]
    fn test_queue_records_commands() {
        let mut q = Queue::default();
        q.send_to(5, b"x");
        q.close(6);
        q.post(7, 42);
        assert_eq!(q.cmds.len(), 3);
    }
}
