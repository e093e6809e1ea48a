// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration suite.
#![allow(dead_code)]

use std::time::{Duration, Instant};
use tern::Manager;

/// Poll the manager until `done` returns true or the deadline passes.
/// Returns whether the condition was reached.
pub fn poll_until(mgr: &mut Manager, deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(deadline_ms) {
        mgr.poll(10).expect("poll failed");
        if done() {
            return true;
        }
    }
    false
}

/// Run a few more poll steps to let in-flight writes settle.
pub fn settle(mgr: &mut Manager, steps: usize) {
    for _ in 0..steps {
        mgr.poll(5).expect("poll failed");
    }
}
