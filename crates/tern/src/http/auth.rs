// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request credential extraction.

use super::{cookie_var, HttpMessage};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Credentials recovered from a request. Bearer tokens, cookies and query
/// tokens fill only `pass`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

/// Extract credentials, consulting in order: `Authorization: Basic`,
/// `Authorization: Bearer`, the `access_token` cookie, the `access_token`
/// query variable.
pub fn credentials(msg: &HttpMessage<'_>) -> Option<Credentials> {
    if let Some(auth) = msg.header("Authorization") {
        if let Some(b64) = auth.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(b64.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (user, pass) = match decoded.find(':') {
                Some(i) => (&decoded[..i], &decoded[i + 1..]),
                None => (decoded.as_str(), ""),
            };
            return Some(Credentials {
                user: user.to_string(),
                pass: pass.to_string(),
            });
        }
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(Credentials {
                user: String::new(),
                pass: token.trim().to_string(),
            });
        }
    }
    if let Some(cookies) = msg.header("Cookie") {
        if let Some(token) = cookie_var(cookies, "access_token") {
            return Some(Credentials {
                user: String::new(),
                pass: token.to_string(),
            });
        }
    }
    if let Some(token) = msg.query_var("access_token") {
        return Some(Credentials {
            user: String::new(),
            pass: token.to_string(),
        });
    }
    None
}
