// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common types and logic for the CAN bootloader of joint and sensor boards.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `embedded` feature: Application-side helpers to re-enter the bootloader
//! - `defmt` feature: `defmt::Format` derives and state-machine tracing
//!
//! The bootloader core is [`parser::CanParser`]: it consumes CAN frames
//! addressed to this board and drives the [`flash_burner::FlashBurner`],
//! the board identity store and the countdown that restarts into the
//! application.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

#[macro_use]
mod fmt;

pub mod board_info;
pub mod config;
pub mod countdown;
pub mod flash_burner;
pub mod frame;
pub mod jumper;
pub mod message;
pub mod parser;
pub mod protocol;

// Application-side helpers (requires embedded feature)
#[cfg(feature = "embedded")]
pub mod app;

// Re-export commonly used types
pub use board_info::{BoardInfoStore, StoredInfo};
pub use config::BootConfig;
pub use countdown::{Countdown, CountdownTimer};
pub use flash_burner::{FlashBurner, FlashDevice, FlashError, FlashProgrammer};
pub use frame::{CanFrame, Clas};
pub use jumper::{BootAction, JumpCommand, JumpRecord};
pub use parser::{BootContext, CanParser, Replies, State};
pub use protocol::{BootloaderCmd, Board, Process};
pub use protocol::{APP_ADDR, APP_SIZE, BOARD_INFO_ADDR, FLASH_BASE, USER_DATA_ADDR};
