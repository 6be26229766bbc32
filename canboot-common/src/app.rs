// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Application-side helpers to hand control back to the bootloader.
//!
//! An application that receives a firmware-update request leaves a
//! [`JumpCommand::Stay`] record in RAM and resets; the bootloader then stays
//! in the CAN protocol loop without a countdown.

use crate::jumper::{JumpCommand, JumpRecord};
use crate::protocol::JUMP_RECORD_ADDR;

/// Leave `command` for the next boot and reset.
pub fn restart_with(command: JumpCommand) -> ! {
    unsafe {
        JumpRecord::new(command).write_to(JUMP_RECORD_ADDR);
    }

    // Small delay to ensure write completes
    cortex_m::asm::delay(100_000);

    cortex_m::peripheral::SCB::sys_reset();
}

/// Reset into the bootloader and stay there.
pub fn restart_to_bootloader() -> ! {
    restart_with(JumpCommand::Stay)
}

/// Reset and let the bootloader jump to the image at `address`.
pub fn restart_to_application(address: u32) -> ! {
    restart_with(JumpCommand::Jump(address))
}

/// Reset with no command: the bootloader runs its countdown.
pub fn reboot() -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}
