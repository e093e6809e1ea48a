// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw TCP reactor behavior: echo, EOF close, accept FIFO, recv cap.

mod common;

use common::poll_until;
use std::cell::RefCell;
use std::rc::Rc;
use tern::{Config, Conn, Event, Manager, Queue};

#[test]
fn test_tcp_echo() {
    let mut mgr = Manager::with_defaults().unwrap();

    // Server: append recv to send, then delete recv.
    let lid = mgr
        .listen("tcp://127.0.0.1:0", |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Read(_) = ev {
                let data = c.recv_buf().to_vec();
                c.recv_buf_mut().delete(0, data.len());
                c.send(&data).unwrap();
            }
        })
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    let echoed = Rc::new(RefCell::new(Vec::<u8>::new()));
    let seen = echoed.clone();
    mgr.connect(
        &format!("tcp://127.0.0.1:{}", port),
        move |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| match ev {
            Event::Connect => c.send(b"abc").unwrap(),
            Event::Read(_) => {
                seen.borrow_mut().extend_from_slice(&c.recv_buf()[..]);
                let n = c.recv_buf().len();
                c.recv_buf_mut().delete(0, n);
            }
            _ => {}
        },
    )
    .unwrap();

    assert!(
        poll_until(&mut mgr, 3000, || echoed.borrow().as_slice() == b"abc"),
        "client never saw the echo, got {:?}",
        echoed.borrow()
    );
}

#[test]
fn test_peer_eof_yields_exactly_one_close_no_spurious_read() {
    let mut mgr = Manager::with_defaults().unwrap();

    #[derive(Default)]
    struct Counts {
        accepted: u32,
        reads: u32,
        closes: u32,
    }
    let counts = Rc::new(RefCell::new(Counts::default()));

    let srv = counts.clone();
    let lid = mgr
        .listen("tcp://127.0.0.1:0", move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            let mut s = srv.borrow_mut();
            match ev {
                Event::Accept => s.accepted += 1,
                Event::Read(_) => s.reads += 1,
                Event::Close => s.closes += 1,
                _ => {}
            }
        })
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    let connected = Rc::new(RefCell::new(false));
    let flag = connected.clone();
    let cid = mgr
        .connect(
            &format!("tcp://127.0.0.1:{}", port),
            move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
                if let Event::Connect = ev {
                    *flag.borrow_mut() = true;
                }
            },
        )
        .unwrap();

    assert!(poll_until(&mut mgr, 3000, || *connected.borrow()
        && counts.borrow().accepted == 1));

    // Close the client without sending a byte; the server side must see
    // exactly one Close and zero Reads.
    mgr.conn_mut(cid).unwrap().close();
    assert!(poll_until(&mut mgr, 3000, || counts.borrow().closes >= 1));
    let c = counts.borrow();
    assert_eq!(c.closes, 1);
    assert_eq!(c.reads, 0);
}

#[test]
fn test_accept_fifo_multiple_clients() {
    let mut mgr = Manager::with_defaults().unwrap();

    let accepted = Rc::new(RefCell::new(Vec::<u64>::new()));
    let log = accepted.clone();
    let lid = mgr
        .listen("tcp://127.0.0.1:0", move |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Accept = ev {
                log.borrow_mut().push(c.id());
            }
        })
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    let noop = |_: &mut Conn, _: Event<'_>, _: &mut Queue| {};
    for _ in 0..3 {
        mgr.connect(&format!("tcp://127.0.0.1:{}", port), noop).unwrap();
    }

    assert!(poll_until(&mut mgr, 3000, || accepted.borrow().len() == 3));
    // FIFO: connection ids are allocated in accept order.
    let ids = accepted.borrow();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", ids);
}

#[test]
fn test_recv_cap_overflow_closes_with_error() {
    let cfg = Config {
        max_recv_size: 1024,
        ..Config::default()
    };
    let mut mgr = Manager::new(cfg).unwrap();

    let errors = Rc::new(RefCell::new(Vec::<String>::new()));
    let closed = Rc::new(RefCell::new(false));
    let (e, cl) = (errors.clone(), closed.clone());
    // Server never consumes recv.
    let lid = mgr
        .listen("tcp://127.0.0.1:0", move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            match ev {
                Event::Error(msg) => e.borrow_mut().push(msg.to_string()),
                Event::Close => *cl.borrow_mut() = true,
                _ => {}
            }
        })
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    mgr.connect(
        &format!("tcp://127.0.0.1:{}", port),
        |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Connect = ev {
                c.send(&[0x55u8; 8192]).unwrap();
            }
        },
    )
    .unwrap();

    assert!(
        poll_until(&mut mgr, 3000, || *closed.borrow()),
        "overflowing connection never closed"
    );
    let errs = errors.borrow();
    assert_eq!(errs.len(), 1, "exactly one error event, got {:?}", errs);
    assert!(errs[0].contains("overflow"), "unexpected error: {}", errs[0]);
}

#[test]
fn test_listener_survives_connection_errors() {
    // A fault on one connection must not affect the listener or peers.
    let cfg = Config {
        max_recv_size: 512,
        ..Config::default()
    };
    let mut mgr = Manager::new(cfg).unwrap();

    let lid = mgr
        .listen("tcp://127.0.0.1:0", |_: &mut Conn, _: Event<'_>, _: &mut Queue| {})
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    // First client overflows the server side.
    mgr.connect(
        &format!("tcp://127.0.0.1:{}", port),
        |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Connect = ev {
                c.send(&[1u8; 4096]).unwrap();
            }
        },
    )
    .unwrap();
    common::settle(&mut mgr, 50);

    // Listener is still alive and accepts a second client.
    let ok = Rc::new(RefCell::new(false));
    let flag = ok.clone();
    mgr.connect(
        &format!("tcp://127.0.0.1:{}", port),
        move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Connect = ev {
                *flag.borrow_mut() = true;
            }
        },
    )
    .unwrap();
    assert!(poll_until(&mut mgr, 3000, || *ok.borrow()));
    assert!(mgr.conn(lid).is_some());
}
