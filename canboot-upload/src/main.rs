// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host tool for the CAN bootloader, through a USB CDC bus attachment.
//!
//! Usage:
//!   canboot-upload --port /dev/ttyACM0 discover
//!   canboot-upload --port /dev/ttyACM0 upload firmware.bin --target 3 --erase-eeprom
//!   canboot-upload --port /dev/ttyACM0 set-address --target 3 --new 5
//!   canboot-upload --port /dev/ttyACM0 set-address --target 3 --random --mask 0x00F0
//!   canboot-upload --port /dev/ttyACM0 get-info --target 3
//!   canboot-upload --port /dev/ttyACM0 set-info --target 3 "left wrist"

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
