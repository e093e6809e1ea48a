// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Software timers driven by the poll loop.
//!
//! Timers live in a flat manager-owned list and are checked once per poll
//! step against the monotonic clock, so granularity equals the poll
//! timeout. A repeating timer fires at most once per poll step; late fires
//! do not loop to catch up. One-shot timers stay in the list after firing
//! until the caller deletes them.

use crate::event::Queue;

/// Reschedule after each fire.
pub const TIMER_REPEAT: u32 = 1 << 0;
/// Fire on the first poll step after creation.
pub const TIMER_RUN_NOW: u32 = 1 << 1;

/// Timer callback; cross-connection effects go through the queue.
pub type TimerFn = Box<dyn FnMut(&mut Queue)>;

pub(crate) struct TimerEntry {
    pub id: u64,
    pub period_ms: u64,
    pub flags: u32,
    pub next_fire_ms: u64,
    pub fired: bool,
    pub cb: TimerFn,
}

impl TimerEntry {
    pub fn new(id: u64, period_ms: u64, flags: u32, now_ms: u64, cb: TimerFn) -> Self {
        let next_fire_ms = if flags & TIMER_RUN_NOW != 0 {
            now_ms
        } else {
            now_ms + period_ms
        };
        Self {
            id,
            period_ms,
            flags,
            next_fire_ms,
            fired: false,
            cb,
        }
    }
}

/// Fire every due timer once. Repeating timers advance by their period;
/// expired one-shots are marked so they never fire again.
pub(crate) fn fire_timers(timers: &mut [TimerEntry], now_ms: u64, q: &mut Queue) {
    for t in timers.iter_mut() {
        if t.fired || t.next_fire_ms > now_ms {
            continue;
        }
        (t.cb)(q);
        if t.flags & TIMER_REPEAT != 0 {
            t.next_fire_ms += t.period_ms.max(1);
        } else {
            t.fired = true;
        }
    }
}
