// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Protocol constants shared by the bootloader and the host tools.
//!
//! Command codes, board and process identifiers, and the flash layout of the
//! RP2040 joint board.

use serde::{Deserialize, Serialize};

// --- Flash layout constants ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024; // 2MB

/// boot2 + bootloader
pub const BOOTLOADER_SIZE: u32 = 64 * 1024;

pub const APP_ADDR: u32 = FLASH_BASE + BOOTLOADER_SIZE;
pub const BOARD_INFO_ADDR: u32 = FLASH_BASE + FLASH_SIZE - 2 * FLASH_SECTOR_SIZE;
pub const USER_DATA_ADDR: u32 = FLASH_BASE + FLASH_SIZE - FLASH_SECTOR_SIZE;
pub const APP_SIZE: u32 = BOARD_INFO_ADDR - APP_ADDR;

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;

pub const SRAM_BASE: u32 = 0x2000_0000;
pub const SRAM_END: u32 = 0x2004_2000;

/// Jump record, 16 bytes at 0x2003BFF0..0x2003C000, just past the end of the
/// linker's RAM region, so neither `.bss` init nor the stack touches it.
pub const JUMP_RECORD_ADDR: u32 = 0x2003_BFF0;

// Compile-time layout checks
const _: () = assert!(APP_ADDR % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(APP_SIZE % FLASH_SECTOR_SIZE == 0);
const _: () = assert!(BOARD_INFO_ADDR + FLASH_SECTOR_SIZE == USER_DATA_ADDR);

// --- CAN addressing ---

/// Destination nibble that every board accepts.
pub const BROADCAST_ADDRESS: u8 = 0x0F;

/// Requested address that asks the board to pick a random one.
pub const RANDOM_ADDRESS: u8 = 0xFF;

/// Address bits 0 and 15 that can never be assigned.
pub const RESERVED_ADDRESS_MASK: u16 = 0x8001;

/// Attempts allowed to draw a random address outside the invalid mask.
pub const RANDOM_ADDRESS_ATTEMPTS: u16 = 250;

/// Size of the user-defined additional info block.
pub const ADDITIONAL_INFO_SIZE: usize = 32;

/// Number of 4-byte chunks carrying the additional info block.
pub const ADDITIONAL_INFO_CHUNKS: u8 = 8;

// --- Command codes ---

/// Commands of the bootloader class. The code is payload byte 0.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootloaderCmd {
    Board = 0x00,
    Address = 0x01,
    Start = 0x02,
    Data = 0x03,
    End = 0x04,
    GetAdditionalInfo = 0x0C,
    SetAdditionalInfo = 0x0D,
    SetCanAddress = 0x32,
    Broadcast = 0xFF,
}

impl BootloaderCmd {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Board),
            0x01 => Some(Self::Address),
            0x02 => Some(Self::Start),
            0x03 => Some(Self::Data),
            0x04 => Some(Self::End),
            0x0C => Some(Self::GetAdditionalInfo),
            0x0D => Some(Self::SetAdditionalInfo),
            0x32 => Some(Self::SetCanAddress),
            0xFF => Some(Self::Broadcast),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// SET_BOARD_ID of the motor-control polling class.
pub const MCPOLL_SET_BOARD_ID: u8 = 0x32;

/// SET_BOARD_ADX of the analog-sensor polling class.
pub const ASPOLL_SET_BOARD_ADX: u8 = 0x32;

// --- Identity ---

/// Board type as reported in the BROADCAST reply.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Board {
    Dsp = 0,
    Pic = 1,
    Foc2 = 2,
    Mais = 3,
    Strain = 4,
    Mtb = 5,
    Skin = 6,
    Mtb4 = 11,
    Strain2 = 12,
    Rfe = 13,
    Sg3 = 14,
    Psc = 15,
    Unknown = 255,
}

impl Board {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Dsp,
            1 => Self::Pic,
            2 => Self::Foc2,
            3 => Self::Mais,
            4 => Self::Strain,
            5 => Self::Mtb,
            6 => Self::Skin,
            11 => Self::Mtb4,
            12 => Self::Strain2,
            13 => Self::Rfe,
            14 => Self::Sg3,
            15 => Self::Psc,
            _ => Self::Unknown,
        }
    }
}

/// Which process answered a BROADCAST.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Process {
    Bootloader,
    Application,
}

/// Firmware version. Bootloaders report `build` as 255 and do not send it.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

/// Version of the CAN protocol spoken by the application.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}
