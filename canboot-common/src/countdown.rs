// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Countdown to the application.
//!
//! The bootloader starts a countdown at boot; if it expires the board restarts
//! into the application. The protocol stops it on first contact and re-arms
//! it with a short delay after END so the last ack leaves the bus first.
//!
//! [`CountdownTimer`] is shared between the frame-processing loop and the
//! context that checks for expiry. It is only ever written with plain atomic
//! stores, which Cortex-M0+ supports.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// What the protocol state machine needs from the countdown.
pub trait Countdown {
    /// Cancel the countdown. Calling it when nothing is armed is fine.
    fn stop_countdown(&mut self) -> bool;

    /// Arm the countdown with a fresh duration, replacing any previous one.
    fn start_countdown(&mut self, countdown_ms: u32) -> bool;
}

/// Armed flag plus deadline, in milliseconds of a free-running wrapping clock.
pub struct CountdownTimer {
    armed: AtomicBool,
    deadline_ms: AtomicU32,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            deadline_ms: AtomicU32::new(0),
        }
    }

    /// Arm to expire `duration_ms` after `now_ms`.
    pub fn arm(&self, now_ms: u32, duration_ms: u32) {
        // disarm first so a concurrent check never sees the old deadline armed
        self.armed.store(false, Ordering::Release);
        self.deadline_ms
            .store(now_ms.wrapping_add(duration_ms), Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Deadline of the armed countdown.
    pub fn deadline(&self) -> Option<u32> {
        self.is_armed()
            .then(|| self.deadline_ms.load(Ordering::Acquire))
    }

    /// True once the armed deadline has been reached. Handles clock wrap for
    /// durations below 2^31 ms.
    pub fn has_expired(&self, now_ms: u32) -> bool {
        match self.deadline() {
            Some(deadline) => now_ms.wrapping_sub(deadline) as i32 >= 0,
            None => false,
        }
    }

    /// Like [`CountdownTimer::has_expired`], disarming on expiry so the
    /// caller acts on it once.
    pub fn take_expired(&self, now_ms: u32) -> bool {
        if self.has_expired(now_ms) {
            self.disarm();
            true
        } else {
            false
        }
    }
}

/// [`Countdown`] over a shared [`CountdownTimer`] and a millisecond clock.
pub struct ClockedCountdown<'a, C: Fn() -> u32> {
    timer: &'a CountdownTimer,
    now_ms: C,
}

impl<'a, C: Fn() -> u32> ClockedCountdown<'a, C> {
    pub fn new(timer: &'a CountdownTimer, now_ms: C) -> Self {
        Self { timer, now_ms }
    }

    pub fn timer(&self) -> &CountdownTimer {
        self.timer
    }
}

impl<C: Fn() -> u32> Countdown for ClockedCountdown<'_, C> {
    fn stop_countdown(&mut self) -> bool {
        self.timer.disarm();
        true
    }

    fn start_countdown(&mut self, countdown_ms: u32) -> bool {
        self.timer.arm((self.now_ms)(), countdown_ms);
        true
    }
}
