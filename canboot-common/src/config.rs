// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader configuration.

use crate::protocol::APP_ADDR;

/// Countdown before restarting into the application when nobody talks to us.
pub const DEFAULT_COUNTDOWN_MS: u32 = 5_000;

/// Delay between the END ack and the restart, so the ack leaves the bus.
pub const DEFAULT_RESTART_DELAY_MS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootConfig {
    pub countdown_ms: u32,
    pub restart_delay_ms: u32,
    pub application_address: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            application_address: APP_ADDR,
        }
    }
}
