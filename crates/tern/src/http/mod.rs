// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP/1.x incremental parser and encoder.
//!
//! Parsing is zero-copy: every field of [`HttpMessage`] is a borrowed view
//! into the buffer handed to [`parse`]. Parsing never consumes bytes;
//! consumption is the caller's explicit act (the connection driver deletes
//! a message from `recv` only after it has been dispatched).
//!
//! Line endings: CRLF preferred, bare LF accepted in the request line and
//! header block. Control characters in the head are rejected outright.

mod auth;
mod multipart;

pub use auth::{credentials, Credentials};
pub use multipart::{next_multipart, Part};

use crate::conn::Conn;
use crate::config::MAX_HTTP_HEADERS;
use crate::{Error, Result};
use std::fmt;

/// One parsed header, name and value borrowed from the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// How the message body is delimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyLen {
    /// `Content-Length` present.
    Measured(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Response with neither: body extends to end of connection.
    UntilClose,
    /// Request with neither: no body.
    None,
}

/// A parsed request or response. All fields are views into the buffer
/// given to [`parse`]; any mutation of that buffer invalidates them.
#[derive(Debug)]
pub struct HttpMessage<'a> {
    /// Request method, or `HTTP/1.x` for responses.
    pub method: &'a str,
    /// Request URI without the query, or the status code for responses.
    pub uri: &'a str,
    /// Query string after `?`, empty if absent.
    pub query: &'a str,
    /// Protocol version for requests, reason phrase for responses.
    pub proto: &'a str,
    /// Up to [`MAX_HTTP_HEADERS`] headers; extras are dropped.
    pub headers: Vec<Header<'a>>,
    /// Body bytes available in the buffer (clamped to what has arrived).
    pub body: &'a [u8],
    /// The whole message as buffered (head + available body).
    pub message: &'a [u8],
    /// Byte length of the head through the blank line.
    pub head_len: usize,
    /// Declared body delimitation.
    pub body_len: BodyLen,
}

impl<'a> HttpMessage<'a> {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }

    /// Whether this message is a response.
    pub fn is_response(&self) -> bool {
        self.method.starts_with("HTTP/")
    }

    /// Status code for responses, 0 for requests.
    pub fn status(&self) -> u16 {
        if self.is_response() {
            self.uri.parse().unwrap_or(0)
        } else {
            0
        }
    }

    /// Query string variable lookup.
    pub fn query_var(&self, name: &str) -> Option<&'a str> {
        crate::url::query_var(self.query, name)
    }
}

// ============================================================================
// Request-length probe
// ============================================================================

/// Outcome of probing a buffer for a complete HTTP head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// Head is syntactically impossible (stray control bytes).
    Malformed,
    /// More bytes needed.
    Partial,
    /// Head complete; value is the byte count through the blank line.
    Complete(usize),
}

/// Find the end of the header block.
///
/// Accepts `\r\n\r\n` and bare `\n\n` (and the mixed `\n\r\n`). Control
/// characters other than CR, LF and TAB anywhere in the head make the
/// buffer malformed.
pub fn get_request_len(buf: &[u8]) -> Probe {
    for (i, &b) in buf.iter().enumerate() {
        if b < 0x20 && b != b'\r' && b != b'\n' && b != b'\t' {
            return Probe::Malformed;
        }
        if b == b'\n' {
            if buf.get(i + 1) == Some(&b'\n') {
                return Probe::Complete(i + 2);
            }
            if buf.get(i + 1) == Some(&b'\r') && buf.get(i + 2) == Some(&b'\n') {
                return Probe::Complete(i + 3);
            }
        }
    }
    Probe::Partial
}

// ============================================================================
// Full parse
// ============================================================================

fn trim_ascii(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r')
}

/// Parse one message head from `buf`.
///
/// Returns `Ok(None)` while the head is incomplete. The body view covers
/// whatever part of a measured body is already buffered; `body_len` tells
/// the caller how much to wait for. A head carrying both `Content-Length`
/// and `Transfer-Encoding: chunked` is rejected: that combination is the
/// request-smuggling shape and no honest peer sends it.
pub fn parse(buf: &[u8]) -> Result<Option<HttpMessage<'_>>> {
    let head_len = match get_request_len(buf) {
        Probe::Malformed => return Err(Error::BadMessage("malformed http head")),
        Probe::Partial => return Ok(None),
        Probe::Complete(n) => n,
    };

    let head = std::str::from_utf8(&buf[..head_len])
        .map_err(|_| Error::BadMessage("non-utf8 http head"))?;
    let mut lines = head.split('\n');

    let start = trim_ascii(lines.next().unwrap_or(""));
    let mut words = start.splitn(3, ' ');
    let method = words.next().unwrap_or("");
    let target = words.next().unwrap_or("");
    let proto = trim_ascii(words.next().unwrap_or(""));
    if method.is_empty() || target.is_empty() {
        return Err(Error::BadMessage("malformed request line"));
    }

    let (uri, query) = match target.find('?') {
        Some(i) => (&target[..i], &target[i + 1..]),
        None => (target, ""),
    };

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        let line = trim_ascii(line);
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.find(':') else {
            return Err(Error::BadMessage("malformed header line"));
        };
        let name = &line[..colon];
        let value = trim_ascii(&line[colon + 1..]);
        if name.is_empty() || name.contains(' ') {
            return Err(Error::BadMessage("malformed header name"));
        }
        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| Error::BadMessage("bad content-length"))?,
            );
        }
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            chunked = true;
        }
        if headers.len() < MAX_HTTP_HEADERS {
            headers.push(Header { name, value });
        }
    }

    if chunked && content_length.is_some() {
        return Err(Error::BadMessage("conflicting body length"));
    }

    let is_response = method.starts_with("HTTP/");
    let body_len = if chunked {
        BodyLen::Chunked
    } else if let Some(n) = content_length {
        BodyLen::Measured(n)
    } else if is_response {
        BodyLen::UntilClose
    } else {
        BodyLen::None
    };

    let body_avail = match body_len {
        BodyLen::Measured(n) => n.min(buf.len() - head_len),
        BodyLen::UntilClose => buf.len() - head_len,
        BodyLen::Chunked | BodyLen::None => 0,
    };

    Ok(Some(HttpMessage {
        method,
        uri,
        query,
        proto,
        headers,
        body: &buf[head_len..head_len + body_avail],
        message: &buf[..head_len + body_avail],
        head_len,
        body_len,
    }))
}

// ============================================================================
// Chunked transfer
// ============================================================================

/// Outcome of probing for one chunk at the start of `buf`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkProbe {
    Partial,
    Malformed,
    /// Data chunk: size-line length, data length, and total framed length
    /// (size line + data + trailing CRLF).
    Data {
        line: usize,
        size: usize,
        total: usize,
    },
    /// Terminating zero chunk; `total` covers it and any trailer lines.
    End {
        total: usize,
    },
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|i| i + 1)
}

pub(crate) fn probe_chunk(buf: &[u8]) -> ChunkProbe {
    let Some(line) = find_line_end(buf) else {
        return if buf.len() > 18 {
            // A chunk-size line is at most a few hex digits.
            ChunkProbe::Malformed
        } else {
            ChunkProbe::Partial
        };
    };
    let digits = std::str::from_utf8(&buf[..line])
        .map(|s| s.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' '))
        .unwrap_or("");
    // Chunk extensions after ';' are tolerated and ignored.
    let digits = digits.split(';').next().unwrap_or("");
    let Ok(size) = usize::from_str_radix(digits, 16) else {
        return ChunkProbe::Malformed;
    };

    if size == 0 {
        // Skip trailer lines until the blank line.
        let mut pos = line;
        loop {
            let Some(n) = find_line_end(&buf[pos..]) else {
                return ChunkProbe::Partial;
            };
            let line_body = &buf[pos..pos + n];
            pos += n;
            if line_body == b"\r\n" || line_body == b"\n" {
                return ChunkProbe::End { total: pos };
            }
        }
    }

    // Need the data plus the trailing line ending.
    if buf.len() < line + size + 1 {
        return ChunkProbe::Partial;
    }
    let tail = &buf[line + size..];
    let trail = if tail.starts_with(b"\r\n") {
        2
    } else if tail.starts_with(b"\n") {
        1
    } else if tail.len() < 2 {
        return ChunkProbe::Partial;
    } else {
        return ChunkProbe::Malformed;
    };
    ChunkProbe::Data {
        line,
        size,
        total: line + size + trail,
    }
}

// ============================================================================
// Response encoding
// ============================================================================

/// Canonical reason phrase for a status code.
pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Queue a full response: status line, `Content-Length`, extra headers,
/// blank line, formatted body.
///
/// `extra_headers` is pre-formatted `Name: value\r\n` lines (may be empty).
/// The body is formatted first so its length is exact.
pub fn reply(
    c: &mut Conn,
    status: u16,
    extra_headers: &str,
    body: fmt::Arguments<'_>,
) -> Result<()> {
    let body = crate::util::format_string(body);
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n{}\r\n",
        status,
        status_text(status),
        body.len(),
        extra_headers,
    );
    c.send(head.as_bytes())?;
    c.send(body.as_bytes())
}

/// Queue one chunked-transfer segment. The caller terminates the stream
/// with a zero-length chunk.
pub fn write_chunk(c: &mut Conn, data: &[u8]) -> Result<()> {
    let head = format!("{:x}\r\n", data.len());
    c.send(head.as_bytes())?;
    c.send(data)?;
    c.send(b"\r\n")
}

/// Formatting variant of [`write_chunk`].
pub fn printf_chunk(c: &mut Conn, body: fmt::Arguments<'_>) -> Result<()> {
    let body = crate::util::format_string(body);
    write_chunk(c, body.as_bytes())
}

/// Cookie lookup inside a `Cookie` header value.
pub fn cookie_var<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    for pair in cookies.split(';') {
        let pair = pair.trim();
        let (k, v) = match pair.find('=') {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        if k == name {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET: &[u8] = b"GET /x?y=1 HTTP/1.1\r\nHost: h\r\n\r\n";

    #[test]
    fn test_probe_complete_crlf() {
        assert_eq!(get_request_len(GET), Probe::Complete(GET.len()));
    }

    #[test]
    fn test_probe_lf_only() {
        let req = b"GET / HTTP/1.0\nHost: h\n\n";
        assert_eq!(get_request_len(req), Probe::Complete(req.len()));
    }

    #[test]
    fn test_probe_partial() {
        assert_eq!(get_request_len(b"GET / HTTP/1.1\r\nHost:"), Probe::Partial);
        assert_eq!(get_request_len(b""), Probe::Partial);
    }

    #[test]
    fn test_probe_rejects_control_bytes() {
        assert_eq!(get_request_len(b"GET /\x01 HTTP/1.1\r\n\r\n"), Probe::Malformed);
        assert_eq!(get_request_len(b"\x00GET"), Probe::Malformed);
    }

    #[test]
    fn test_parse_request() {
        let m = parse(GET).unwrap().unwrap();
        assert_eq!(m.method, "GET");
        assert_eq!(m.uri, "/x");
        assert_eq!(m.query, "y=1");
        assert_eq!(m.proto, "HTTP/1.1");
        assert_eq!(m.header("host"), Some("h"));
        assert_eq!(m.header("HOST"), Some("h"));
        assert_eq!(m.body_len, BodyLen::None);
        assert!(m.body.is_empty());
        assert!(!m.is_response());
    }

    #[test]
    fn test_parse_request_with_body() {
        let req = b"POST /u HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let m = parse(req).unwrap().unwrap();
        assert_eq!(m.body_len, BodyLen::Measured(5));
        assert_eq!(m.body, b"hello");
        assert_eq!(m.message, &req[..]);
    }

    #[test]
    fn test_parse_response() {
        let rsp = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let m = parse(rsp).unwrap().unwrap();
        assert!(m.is_response());
        assert_eq!(m.status(), 200);
        assert_eq!(m.proto, "OK");
        assert_eq!(m.body, b"ok");
    }

    #[test]
    fn test_parse_response_until_close() {
        let rsp = b"HTTP/1.0 200 OK\r\n\r\npartial body so far";
        let m = parse(rsp).unwrap().unwrap();
        assert_eq!(m.body_len, BodyLen::UntilClose);
        assert_eq!(m.body, b"partial body so far");
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse(b"GET / HTTP/1.1\r\nHost").unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_conflicting_length() {
        let req =
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(parse(req).is_err());
    }

    #[test]
    fn test_parse_drops_excess_headers() {
        let mut req = String::from("GET / HTTP/1.1\r\n");
        for i in 0..50 {
            req.push_str(&format!("X-H{}: v\r\n", i));
        }
        req.push_str("\r\n");
        let m = parse(req.as_bytes()).unwrap().unwrap();
        assert_eq!(m.headers.len(), MAX_HTTP_HEADERS);
        // Dropped headers are not findable, kept ones are.
        assert_eq!(m.header("X-H0"), Some("v"));
        assert!(m.header("X-H45").is_none());
    }

    #[test]
    fn test_parse_reserialize_roundtrip() {
        let m = parse(GET).unwrap().unwrap();
        let mut re = format!("{} {}?{} {}\r\n", m.method, m.uri, m.query, m.proto);
        for h in &m.headers {
            re.push_str(&format!("{}: {}\r\n", h.name, h.value));
        }
        re.push_str("\r\n");
        let again = parse(re.as_bytes()).unwrap().unwrap();
        assert_eq!(again.method, m.method);
        assert_eq!(again.uri, m.uri);
        assert_eq!(again.query, m.query);
        assert_eq!(again.headers, m.headers);
    }

    #[test]
    fn test_chunk_probe_data() {
        match probe_chunk(b"3\r\nabc\r\n2\r\nde\r\n") {
            ChunkProbe::Data { line, size, total } => {
                assert_eq!(line, 3);
                assert_eq!(size, 3);
                assert_eq!(total, 8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_chunk_probe_end() {
        assert_eq!(probe_chunk(b"0\r\n\r\n"), ChunkProbe::End { total: 5 });
        // Trailer lines before the blank line are skipped.
        assert_eq!(
            probe_chunk(b"0\r\nX-Sum: 1\r\n\r\n"),
            ChunkProbe::End { total: 15 }
        );
    }

    #[test]
    fn test_chunk_probe_partial_and_malformed() {
        assert_eq!(probe_chunk(b"3\r\nab"), ChunkProbe::Partial);
        assert_eq!(probe_chunk(b"3\r\n"), ChunkProbe::Partial);
        assert_eq!(probe_chunk(b"zz\r\nabc\r\n"), ChunkProbe::Malformed);
        assert_eq!(probe_chunk(b"3\r\nabcXY"), ChunkProbe::Malformed);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(999), "");
    }

    #[test]
    fn test_cookie_var() {
        let c = "a=1; access_token=t0k3n; b=2";
        assert_eq!(cookie_var(c, "access_token"), Some("t0k3n"));
        assert_eq!(cookie_var(c, "missing"), None);
    }
}
