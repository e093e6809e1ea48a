// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-thread wakeup pipe: the one sanctioned foreign-thread entry.

mod common;

use common::poll_until;
use std::cell::RefCell;
use std::rc::Rc;
use tern::{Conn, Event, Manager, Queue};

#[test]
fn test_wakeup_from_worker_thread_feeds_a_connection() {
    let mut mgr = Manager::with_defaults().unwrap();

    // Echo-less server: just records what arrives.
    let received = Rc::new(RefCell::new(Vec::<u8>::new()));
    let rx = received.clone();
    let lid = mgr
        .listen("tcp://127.0.0.1:0", move |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Read(_) = ev {
                rx.borrow_mut().extend_from_slice(&c.recv_buf()[..]);
                let n = c.recv_buf().len();
                c.recv_buf_mut().delete(0, n);
            }
        })
        .unwrap();
    let port = mgr.local_addr(lid).unwrap().port;

    let connected = Rc::new(RefCell::new(false));
    let flag = connected.clone();
    let client_id = mgr
        .connect(
            &format!("tcp://127.0.0.1:{}", port),
            move |_c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
                if let Event::Connect = ev {
                    *flag.borrow_mut() = true;
                }
            },
        )
        .unwrap();
    assert!(poll_until(&mut mgr, 3000, || *connected.borrow()));

    // Pipe handler pushes the worker's result onto the client connection.
    let woke = Rc::new(RefCell::new(0u32));
    let w = woke.clone();
    let (_pipe_id, wakeup) = mgr
        .make_pipe(move |c: &mut Conn, ev: Event<'_>, q: &mut Queue| {
            if let Event::Read(_) = ev {
                *w.borrow_mut() += 1;
                let n = c.recv_buf().len();
                c.recv_buf_mut().delete(0, n);
                q.send_to(client_id, b"result-from-worker");
            }
        })
        .unwrap();

    // Worker thread computes, then wakes the reactor.
    let t = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        wakeup.wakeup().unwrap();
    });

    assert!(
        poll_until(&mut mgr, 3000, || received.borrow().as_slice()
            == b"result-from-worker"),
        "worker result never travelled through the pipe, got {:?}",
        received.borrow()
    );
    assert_eq!(*woke.borrow(), 1);
    t.join().unwrap();
}

#[test]
fn test_wakeup_clone_multiple_pokes() {
    let mut mgr = Manager::with_defaults().unwrap();

    let reads = Rc::new(RefCell::new(0u32));
    let r = reads.clone();
    let (_id, wakeup) = mgr
        .make_pipe(move |c: &mut Conn, ev: Event<'_>, _q: &mut Queue| {
            if let Event::Read(n) = ev {
                *r.borrow_mut() += n as u32;
                let len = c.recv_buf().len();
                c.recv_buf_mut().delete(0, len);
            }
        })
        .unwrap();

    let wk2 = wakeup.try_clone().unwrap();
    let t1 = std::thread::spawn(move || wakeup.wakeup().unwrap());
    let t2 = std::thread::spawn(move || wk2.wakeup().unwrap());
    t1.join().unwrap();
    t2.join().unwrap();

    // Two single-byte pokes arrive (possibly across several polls).
    assert!(poll_until(&mut mgr, 3000, || *reads.borrow() >= 2));
}
