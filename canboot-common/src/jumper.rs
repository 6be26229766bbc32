// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot decision - pure logic without hardware dependencies.
//!
//! A [`JumpRecord`] left in RAM before a soft reset tells the next boot what
//! to do. The bootloader reads it before initialising any hardware and
//! [`decide`]s whether to jump to the application or to stay.

use crate::config::BootConfig;
use crate::protocol::{SRAM_BASE, SRAM_END};

pub const JUMP_RECORD_MAGIC: u32 = 0x4A55_4D50; // "JUMP"

const CMD_NONE: u32 = 0;
const CMD_JUMP: u32 = 1;
const CMD_STAY: u32 = 2;

/// Command left for the next boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JumpCommand {
    /// Cold boot, or nothing requested.
    None,
    /// Jump to the image whose vector table is at the address.
    Jump(u32),
    /// Stay in the bootloader, e.g. the application asked for an update.
    Stay,
}

/// Command record, four words in RAM that survive a soft reset (repr(C), 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpRecord {
    pub magic: u32,
    pub command: u32,
    pub parameter: u32,
    pub check: u32,
}

// Compile-time size check
const _: () = assert!(core::mem::size_of::<JumpRecord>() == 16);

impl JumpRecord {
    pub fn new(command: JumpCommand) -> Self {
        let (command, parameter) = match command {
            JumpCommand::None => (CMD_NONE, 0),
            JumpCommand::Jump(address) => (CMD_JUMP, address),
            JumpCommand::Stay => (CMD_STAY, 0),
        };
        Self {
            magic: JUMP_RECORD_MAGIC,
            command,
            parameter,
            check: Self::check_word(JUMP_RECORD_MAGIC, command, parameter),
        }
    }

    /// Record that decodes to [`JumpCommand::None`].
    pub const fn cleared() -> Self {
        Self {
            magic: 0,
            command: 0,
            parameter: 0,
            check: 0,
        }
    }

    const fn check_word(magic: u32, command: u32, parameter: u32) -> u32 {
        !(magic ^ command ^ parameter)
    }

    pub fn is_valid(&self) -> bool {
        self.magic == JUMP_RECORD_MAGIC
            && self.check == Self::check_word(self.magic, self.command, self.parameter)
    }

    /// Command carried by the record. Garbage left by a power cycle reads as None.
    pub fn command(&self) -> JumpCommand {
        if !self.is_valid() {
            return JumpCommand::None;
        }
        match self.command {
            CMD_JUMP => JumpCommand::Jump(self.parameter),
            CMD_STAY => JumpCommand::Stay,
            _ => JumpCommand::None,
        }
    }

    /// Read the record via volatile reads.
    ///
    /// # Safety
    /// `addr` must point to a readable, word-aligned region of at least 16 bytes.
    pub unsafe fn read_from(addr: u32) -> Self {
        core::ptr::read_volatile(addr as *const Self)
    }

    /// Write the record via volatile writes.
    ///
    /// # Safety
    /// `addr` must point to a writable, word-aligned region of at least 16
    /// bytes that nothing else uses.
    pub unsafe fn write_to(&self, addr: u32) {
        core::ptr::write_volatile(addr as *mut Self, *self);
    }
}

/// First two words of an image's vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorTable {
    pub initial_sp: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    /// A bootable image has its stack in SRAM and its reset handler, a Thumb
    /// address, inside `[image_start, image_end)`.
    pub fn is_valid_for(&self, image_start: u32, image_end: u32) -> bool {
        let sp_ok = (SRAM_BASE..=SRAM_END).contains(&self.initial_sp);
        let entry = self.reset_vector & !1;
        let reset_ok = self.reset_vector & 1 == 1 && (image_start..image_end).contains(&entry);
        sp_ok && reset_ok
    }
}

/// What the bootloader does at power-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    JumpToApplication(u32),
    /// Run the CAN bootloader; with a countdown it falls back to the application.
    RunBootloader { countdown_ms: Option<u32> },
}

/// Select the boot action from the persisted command.
///
/// `app_valid` tells whether the image at the jump address looks bootable.
pub fn decide(command: JumpCommand, app_valid: bool, config: &BootConfig) -> BootAction {
    match command {
        JumpCommand::Jump(address) if app_valid => BootAction::JumpToApplication(address),
        JumpCommand::Jump(_) | JumpCommand::Stay => BootAction::RunBootloader { countdown_ms: None },
        JumpCommand::None => BootAction::RunBootloader {
            countdown_ms: Some(config.countdown_ms),
        },
    }
}
