// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-thread wakeup pipe.
//!
//! The reactor is single-threaded; [`Wakeup`] is the one sanctioned way to
//! poke it from another thread. It is the send half of a connected
//! loopback UDP pair. The receive half lives inside the manager as an
//! ordinary connection, so a wakeup surfaces as a normal `Read` event on
//! the pipe's handler within one poll.

use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};

/// Thread-safe wakeup handle for a pipe connection created with
/// [`crate::Manager::make_pipe`]. Sending is `&self` and safe from any
/// thread; everything else in this crate is single-thread only.
#[derive(Debug)]
pub struct Wakeup {
    sock: StdUdpSocket,
}

impl Wakeup {
    /// Write one byte into the pipe. The reactor reads it on its next poll
    /// and delivers `Read` to the pipe's handler.
    pub fn wakeup(&self) -> io::Result<()> {
        self.sock.send(&[1u8]).map(|_| ())
    }

    /// Duplicate the handle for another thread.
    pub fn try_clone(&self) -> io::Result<Wakeup> {
        Ok(Wakeup {
            sock: self.sock.try_clone()?,
        })
    }
}

/// Build the connected pair: the mio half is registered by the manager,
/// the std half becomes the [`Wakeup`].
pub(crate) fn make_pair() -> io::Result<(mio::net::UdpSocket, Wakeup)> {
    let loopback: SocketAddr = "127.0.0.1:0"
        .parse()
        .map_err(|_| io::Error::other("bad loopback addr"))?;
    let rx = StdUdpSocket::bind(loopback)?;
    let tx = StdUdpSocket::bind(loopback)?;
    rx.connect(tx.local_addr()?)?;
    tx.connect(rx.local_addr()?)?;
    rx.set_nonblocking(true)?;
    Ok((mio::net::UdpSocket::from_std(rx), Wakeup { sock: tx }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_delivers_byte() {
        let (rx, wk) = make_pair().unwrap();
        wk.wakeup().unwrap();
        // Spin briefly: loopback delivery is immediate in practice.
        let mut buf = [0u8; 8];
        let mut got = 0;
        for _ in 0..100 {
            match rx.recv(&mut buf) {
                Ok(n) => {
                    got = n;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => panic!("recv failed: {}", e),
            }
        }
        assert_eq!(got, 1);
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_wakeup_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Wakeup>();
    }

    #[test]
    fn test_wakeup_from_foreign_thread() {
        let (rx, wk) = make_pair().unwrap();
        let wk2 = wk.try_clone().unwrap();
        let t = std::thread::spawn(move || {
            wk2.wakeup().unwrap();
        });
        t.join().unwrap();
        let mut buf = [0u8; 8];
        let mut got = 0;
        for _ in 0..100 {
            if let Ok(n) = rx.recv(&mut buf) {
                got = n;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(got, 1);
    }
}
