// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS driver over rustls (behind the `tls` feature).
//!
//! The core drives a connection's handshake while its `tls_hs` flag is
//! set; once the handshake completes the driver is a transparent byte
//! pipe: plaintext in via [`TlsState::write_plain`], plaintext out via
//! [`TlsState::read_plain`], ciphertext pumped to and from the socket by
//! the same calls.
//!
//! Without the feature, [`TlsOpts`] still exists so signatures stay
//! stable, and any attempt to use a TLS scheme fails with
//! `Error::Unsupported`.

/// TLS parameters for one connection or listener.
///
/// `ca`, `cert` and `key` each take a filesystem path or inline PEM text
/// (anything starting with `-----BEGIN` is treated as inline). Empty
/// strings mean unset. Two-way auth is in effect when a server sets both
/// `ca` and `cert`.
#[derive(Clone, Debug, Default)]
pub struct TlsOpts {
    /// CA bundle for peer verification. Clients fall back to the built-in
    /// web roots when unset.
    pub ca: String,
    /// Certificate chain to present.
    pub cert: String,
    /// Private key for `cert`.
    pub key: String,
    /// Server name for SNI and verification (clients). Defaults to the
    /// connect host.
    pub server_name: String,
}

#[cfg(feature = "tls")]
pub(crate) use imp::*;

#[cfg(feature = "tls")]
mod imp {
    use super::TlsOpts;
    use crate::{Error, Result};
    use std::io::{self, Read, Write};
    use std::sync::Arc;

    /// Handshake progress report.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) enum HandshakeStatus {
        NeedRead,
        NeedWrite,
        Done,
    }

    /// Per-connection TLS state, client or server side.
    pub(crate) enum TlsState {
        Client(rustls::ClientConnection),
        Server(rustls::ServerConnection),
    }

    impl TlsState {
        fn is_handshaking(&self) -> bool {
            match self {
                Self::Client(c) => c.is_handshaking(),
                Self::Server(c) => c.is_handshaking(),
            }
        }

        fn read_tls(&mut self, rd: &mut dyn Read) -> io::Result<usize> {
            match self {
                Self::Client(c) => c.read_tls(rd),
                Self::Server(c) => c.read_tls(rd),
            }
        }

        fn write_tls(&mut self, wr: &mut dyn Write) -> io::Result<usize> {
            match self {
                Self::Client(c) => c.write_tls(wr),
                Self::Server(c) => c.write_tls(wr),
            }
        }

        fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
            match self {
                Self::Client(c) => c.process_new_packets(),
                Self::Server(c) => c.process_new_packets(),
            }
        }

        fn wants_write(&self) -> bool {
            match self {
                Self::Client(c) => c.wants_write(),
                Self::Server(c) => c.wants_write(),
            }
        }

        /// Flush pending ciphertext to the socket. Returns false when the
        /// socket would block with data still pending.
        fn flush_tls(&mut self, sock: &mut dyn Write) -> Result<bool> {
            while self.wants_write() {
                match self.write_tls(sock) {
                    Ok(0) => return Err(Error::TlsFailure("socket closed".into())),
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(Error::TlsFailure(e.to_string())),
                }
            }
            Ok(true)
        }

        /// Run one handshake step against the socket.
        pub fn handshake<S: Read + Write>(&mut self, sock: &mut S) -> Result<HandshakeStatus> {
            if !self.flush_tls(sock)? {
                return Ok(HandshakeStatus::NeedWrite);
            }
            if !self.is_handshaking() {
                return Ok(HandshakeStatus::Done);
            }
            match self.read_tls(sock) {
                Ok(0) => Err(Error::TlsFailure("eof during handshake".into())),
                Ok(_) => {
                    self.process_new_packets()
                        .map_err(|e| Error::TlsFailure(e.to_string()))?;
                    if !self.flush_tls(sock)? {
                        return Ok(HandshakeStatus::NeedWrite);
                    }
                    if self.is_handshaking() {
                        Ok(HandshakeStatus::NeedRead)
                    } else {
                        Ok(HandshakeStatus::Done)
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(HandshakeStatus::NeedRead),
                Err(e) => Err(Error::TlsFailure(e.to_string())),
            }
        }

        /// Read decrypted plaintext into `out`, pumping ciphertext from
        /// the socket first. Returns `Ok(0)` at clean TLS EOF and
        /// `WouldBlock` when nothing is available yet.
        pub fn read_plain<S: Read + Write>(
            &mut self,
            sock: &mut S,
            out: &mut [u8],
        ) -> io::Result<usize> {
            let mut saw_eof = false;
            loop {
                match self.read_tls(sock) {
                    Ok(0) => {
                        saw_eof = true;
                        break;
                    }
                    Ok(_) => {
                        if let Err(e) = self.process_new_packets() {
                            return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            let reader_result = match self {
                Self::Client(c) => c.reader().read(out),
                Self::Server(c) => c.reader().read(out),
            };
            match reader_result {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && saw_eof => Ok(0),
                Err(e) => Err(e),
            }
        }

        /// Write plaintext, then flush ciphertext to the socket. Returns
        /// the number of plaintext bytes consumed.
        pub fn write_plain<S: Read + Write>(
            &mut self,
            sock: &mut S,
            data: &[u8],
        ) -> io::Result<usize> {
            let n = match self {
                Self::Client(c) => c.writer().write(data)?,
                Self::Server(c) => c.writer().write(data)?,
            };
            while self.wants_write() {
                match self.write_tls(sock) {
                    Ok(0) => {
                        return Err(io::Error::new(io::ErrorKind::WriteZero, "socket closed"))
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(n)
        }
    }

    fn load_pem(spec: &str) -> Result<Vec<u8>> {
        if spec.trim_start().starts_with("-----BEGIN") {
            Ok(spec.as_bytes().to_vec())
        } else {
            std::fs::read(spec).map_err(|e| {
                Error::TlsFailure(crate::util::format_string(format_args!(
                    "read {}: {}",
                    spec, e
                )))
            })
        }
    }

    fn load_certs(spec: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
        let pem = load_pem(spec)?;
        rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::TlsFailure(e.to_string()))
    }

    fn load_key(spec: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
        let pem = load_pem(spec)?;
        rustls_pemfile::private_key(&mut pem.as_slice())
            .map_err(|e| Error::TlsFailure(e.to_string()))?
            .ok_or_else(|| Error::TlsFailure("no private key found".into()))
    }

    /// Build a client config: CA from opts, or the built-in web roots.
    pub(crate) fn make_client_config(opts: &TlsOpts) -> Result<Arc<rustls::ClientConfig>> {
        let mut roots = rustls::RootCertStore::empty();
        if opts.ca.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in load_certs(&opts.ca)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::TlsFailure(e.to_string()))?;
            }
        }
        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let config = if !opts.cert.is_empty() && !opts.key.is_empty() {
            builder
                .with_client_auth_cert(load_certs(&opts.cert)?, load_key(&opts.key)?)
                .map_err(|e| Error::TlsFailure(e.to_string()))?
        } else {
            builder.with_no_client_auth()
        };
        Ok(Arc::new(config))
    }

    /// Build a server config. Setting `ca` as well turns on client
    /// certificate verification (two-way auth).
    pub(crate) fn make_server_config(opts: &TlsOpts) -> Result<Arc<rustls::ServerConfig>> {
        if opts.cert.is_empty() || opts.key.is_empty() {
            return Err(Error::TlsFailure("server cert and key required".into()));
        }
        let certs = load_certs(&opts.cert)?;
        let key = load_key(&opts.key)?;
        let builder = if opts.ca.is_empty() {
            rustls::ServerConfig::builder().with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(&opts.ca)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::TlsFailure(e.to_string()))?;
            }
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| Error::TlsFailure(e.to_string()))?;
            rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
        };
        builder
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsFailure(e.to_string()))
            .map(Arc::new)
    }

    /// Client-side state for one connection.
    pub(crate) fn client_state(
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<TlsState> {
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::TlsFailure(e.to_string()))?;
        rustls::ClientConnection::new(config, name)
            .map(TlsState::Client)
            .map_err(|e| Error::TlsFailure(e.to_string()))
    }

    /// Server-side state for one accepted connection.
    pub(crate) fn server_state(config: Arc<rustls::ServerConfig>) -> Result<TlsState> {
        rustls::ServerConnection::new(config)
            .map(TlsState::Server)
            .map_err(|e| Error::TlsFailure(e.to_string()))
    }

}
