// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Small formatting helpers shared across modules.

use std::fmt::{self, Arguments, Write};

#[inline]
pub fn format_string(args: Arguments<'_>) -> String {
    fmt::format(args)
}

/// Render a classic 16-bytes-per-line hex dump with an ASCII gutter.
///
/// Used by the manager when a connection has hexdumping enabled.
pub fn hexdump(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 4 + 16);
    for (line, chunk) in buf.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push(' ');
        for &b in chunk {
            out.push(if (0x20..0x7f).contains(&b) { b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

/// Case-insensitive ASCII equality without allocating.
#[inline]
pub fn ascii_eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
