// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use canboot_common::protocol::APP_ADDR;

use crate::commands;
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "canboot-upload")]
#[command(about = "Host tool for the CAN bootloader")]
pub struct Cli {
    /// Serial port of the bus attachment (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: String,

    /// Reply timeout in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    /// Print every frame exchanged
    #[arg(short, long)]
    pub verbose: bool,

    /// CAN address the tool sends from
    #[arg(long, default_value = "0", value_parser = parse_address)]
    pub host_address: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// List the boards answering a broadcast discovery
    Discover,

    /// Upload a raw firmware image
    Upload {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// CAN address of the board
        #[arg(long, value_parser = parse_address)]
        target: u8,

        /// Flash address of the first byte of the image
        #[arg(long, default_value_t = APP_ADDR, value_parser = parse_u32)]
        address: u32,

        /// Also erase the application's user data
        #[arg(long)]
        erase_eeprom: bool,
    },

    /// Change the CAN address of a board
    SetAddress {
        /// Current CAN address of the board
        #[arg(long, value_parser = parse_address)]
        target: u8,

        /// New address (1..=14)
        #[arg(long, value_parser = parse_address, conflicts_with = "random", required_unless_present = "random")]
        new: Option<u8>,

        /// Let the board pick a random address
        #[arg(long)]
        random: bool,

        /// Addresses the random pick must avoid, one bit per address
        #[arg(long, value_parser = parse_u16, requires = "random")]
        mask: Option<u16>,
    },

    /// Read the 32-byte additional info of a board
    GetInfo {
        /// CAN address of the board
        #[arg(long, value_parser = parse_address)]
        target: u8,
    },

    /// Write the 32-byte additional info of a board
    SetInfo {
        /// CAN address of the board
        #[arg(long, value_parser = parse_address)]
        target: u8,

        /// Text to store, at most 32 bytes
        #[arg(value_name = "TEXT")]
        text: String,
    },
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| format!("'{}' does not fit in 16 bits", s))
}

/// A 4-bit CAN address.
fn parse_address(s: &str) -> Result<u8, String> {
    let value = parse_u32(s)?;
    if value > 0xF {
        return Err(format!("CAN address {} out of range 0..=15", value));
    }
    Ok(value as u8)
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut transport = Transport::new(&cli.port, cli.timeout, cli.verbose)?;
    let host = cli.host_address;

    match cli.command {
        Commands::Discover => commands::discover(&mut transport, host),
        Commands::Upload {
            file,
            target,
            address,
            erase_eeprom,
        } => commands::upload(&mut transport, host, target, &file, address, erase_eeprom),
        Commands::SetAddress {
            target,
            new,
            random,
            mask,
        } => match (new, random) {
            (_, true) => commands::set_random_address(&mut transport, host, target, mask),
            (Some(new), false) => commands::set_address(&mut transport, host, target, new),
            (None, false) => bail!("Either --new or --random is required"),
        },
        Commands::GetInfo { target } => commands::get_info(&mut transport, host, target),
        Commands::SetInfo { target, text } => commands::set_info(&mut transport, host, target, &text),
    }
}
