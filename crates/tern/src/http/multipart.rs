// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming `multipart/form-data` part iteration.
//!
//! The boundary is read off the body itself (it opens with
//! `--boundary\r\n`), so callers do not need to thread the Content-Type
//! header through. Parts are borrowed views into the body.

/// One multipart body part.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Part<'a> {
    /// `name` attribute of the Content-Disposition header.
    pub name: &'a str,
    /// `filename` attribute, empty for non-file fields.
    pub filename: &'a str,
    /// Raw part body.
    pub body: &'a [u8],
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn attr<'a>(headers: &'a str, name: &str) -> &'a str {
    // name="value" inside Content-Disposition
    let pat = format!("{}=\"", name);
    let Some(start) = headers.find(&pat) else {
        return "";
    };
    let rest = &headers[start + pat.len()..];
    match rest.find('"') {
        Some(end) => &rest[..end],
        None => "",
    }
}

/// Advance to the next part of a multipart body.
///
/// `offset` is 0 for the first call; pass the returned offset to continue.
/// Returns `None` past the terminating `--boundary--`.
pub fn next_multipart(body: &[u8], offset: usize) -> Option<(usize, Part<'_>)> {
    // Boundary is the first line of the body.
    if !body.starts_with(b"--") {
        return None;
    }
    let line_end = body.iter().position(|&b| b == b'\n')?;
    let boundary = body[..line_end]
        .strip_suffix(b"\r")
        .unwrap_or(&body[..line_end]);

    let offset = if offset == 0 { line_end + 1 } else { offset };
    if offset >= body.len() {
        return None;
    }

    // Part headers through the blank line.
    let head_end = find(body, b"\r\n\r\n", offset).map(|i| (i, i + 4)).or_else(|| {
        find(body, b"\n\n", offset).map(|i| (i, i + 2))
    })?;
    let headers = std::str::from_utf8(&body[offset..head_end.0]).ok()?;
    let name = attr(headers, "name");
    let filename = attr(headers, "filename");

    // Part body runs to the next boundary marker.
    let mut marker = Vec::with_capacity(boundary.len() + 2);
    marker.extend_from_slice(b"\r\n");
    marker.extend_from_slice(boundary);
    let body_start = head_end.1;
    let (body_end, next) = match find(body, &marker, body_start) {
        Some(i) => (i, i + marker.len()),
        None => {
            // LF-only framing.
            let mut lf_marker = Vec::with_capacity(boundary.len() + 1);
            lf_marker.push(b'\n');
            lf_marker.extend_from_slice(boundary);
            let i = find(body, &lf_marker, body_start)?;
            (i, i + lf_marker.len())
        }
    };

    // Skip the line ending after the boundary; a trailing "--" ends it all.
    let mut next = next;
    if body[next..].starts_with(b"--") {
        next = body.len();
    } else {
        while next < body.len() && (body[next] == b'\r' || body[next] == b'\n') {
            next += 1;
        }
    }

    Some((
        next,
        Part {
            name,
            filename,
            body: &body[body_start..body_end],
        },
    ))
}
