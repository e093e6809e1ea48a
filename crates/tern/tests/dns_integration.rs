// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking resolution against an in-process fake DNS server.

mod common;

use common::poll_until;
use std::cell::RefCell;
use std::rc::Rc;
use tern::{Config, Conn, Event, Manager, Queue};

/// Answer every A query with 127.0.0.1, echoing txid and question.
fn fake_dns_handler(c: &mut Conn, ev: Event<'_>, _q: &mut Queue) {
    if let Event::Read(_) = ev {
        let query = c.recv_buf().to_vec();
        let n = c.recv_buf().len();
        c.recv_buf_mut().delete(0, n);
        if query.len() < 12 {
            return;
        }
        let mut reply = Vec::with_capacity(query.len() + 16);
        reply.extend_from_slice(&query[..2]); // txid
        reply.extend_from_slice(&0x8180u16.to_be_bytes());
        reply.extend_from_slice(&1u16.to_be_bytes()); // QD
        reply.extend_from_slice(&1u16.to_be_bytes()); // AN
        reply.extend_from_slice(&[0u8; 4]);
        reply.extend_from_slice(&query[12..]); // question verbatim
        reply.extend_from_slice(&[0xC0, 0x0C]); // name ptr
        reply.extend_from_slice(&[0, 1, 0, 1]); // A IN
        reply.extend_from_slice(&[0, 0, 0, 60]); // TTL
        reply.extend_from_slice(&4u16.to_be_bytes());
        reply.extend_from_slice(&[127, 0, 0, 1]);
        c.send(&reply).unwrap();
    }
}

#[test]
fn test_resolve_then_connect() {
    let mut bootstrap = Manager::with_defaults().unwrap();
    let dns_id = bootstrap.listen("udp://127.0.0.1:0", fake_dns_handler).unwrap();
    let dns_port = bootstrap.local_addr(dns_id).unwrap().port;
    drop(bootstrap);

    let cfg = Config {
        dns_server_v4: format!("127.0.0.1:{}", dns_port).parse().unwrap(),
        dns_timeout_ms: 2000,
        ..Config::default()
    };
    let mut mgr = Manager::new(cfg).unwrap();
    // The fake resolver lives inside the same reactor.
    mgr.listen(
        &format!("udp://127.0.0.1:{}", dns_port),
        fake_dns_handler,
    )
    .unwrap();

    // A TCP listener the resolved connect will land on.
    let lid = mgr
        .listen("tcp://127.0.0.1:0", |_: &mut Conn, _: Event<'_>, _: &mut Queue| {})
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    #[derive(Default)]
    struct Log {
        resolved: bool,
        connected: bool,
    }
    let log = Rc::new(RefCell::new(Log::default()));
    let l = log.clone();
    let id = mgr
        .connect(
            &format!("tcp://api.service.test:{}", port),
            move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
                let mut log = l.borrow_mut();
                match ev {
                    Event::Resolve => log.resolved = true,
                    Event::Connect => log.connected = true,
                    _ => {}
                }
            },
        )
        .unwrap();
    assert!(mgr.conn(id).unwrap().is_resolving());

    assert!(
        poll_until(&mut mgr, 4000, || log.borrow().connected),
        "resolution or connect never completed"
    );
    assert!(log.borrow().resolved);
}

#[test]
fn test_dns_timeout_errors_and_closes() {
    // Resolver that never answers: a bound UDP port nobody reads.
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let cfg = Config {
        dns_server_v4: silent.local_addr().unwrap(),
        dns_timeout_ms: 200,
        ..Config::default()
    };
    let mut mgr = Manager::new(cfg).unwrap();

    #[derive(Default)]
    struct Log {
        errors: Vec<String>,
        closed: bool,
    }
    let log = Rc::new(RefCell::new(Log::default()));
    let l = log.clone();
    mgr.connect(
        "tcp://never.resolves.test:80",
        move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            let mut log = l.borrow_mut();
            match ev {
                Event::Error(msg) => log.errors.push(msg.to_string()),
                Event::Close => log.closed = true,
                _ => {}
            }
        },
    )
    .unwrap();

    assert!(poll_until(&mut mgr, 3000, || log.borrow().closed));
    let log = log.borrow();
    assert_eq!(log.errors.len(), 1);
    assert!(log.errors[0].contains("DNS timeout"), "got {:?}", log.errors);
}
