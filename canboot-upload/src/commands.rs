// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use canboot_common::frame::{CanFrame, Clas};
use canboot_common::message::{self, BroadcastInfo};
use canboot_common::protocol::{
    Board, BootloaderCmd, ADDITIONAL_INFO_CHUNKS, ADDITIONAL_INFO_SIZE, BROADCAST_ADDRESS,
    RANDOM_ADDRESS,
};

use crate::transport::Transport;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Bytes announced by one ADDRESS.
pub const ROW_SIZE: usize = 16;

/// Bytes per DATA frame.
pub const DATA_CHUNK: usize = 6;

/// START flushes the last flash page.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Split an image loaded at `base` into `(address, bytes)` rows.
pub fn rows(image: &[u8], base: u32) -> impl Iterator<Item = (u32, &[u8])> {
    image
        .chunks(ROW_SIZE)
        .enumerate()
        .map(move |(i, row)| (base + (i * ROW_SIZE) as u32, row))
}

fn print_board(info: &BroadcastInfo) {
    let build = match info.process {
        canboot_common::Process::Bootloader => String::new(),
        canboot_common::Process::Application => format!(".{}", info.firmware.build),
    };
    println!(
        "  address {:2}  {:?} ({})  {:?} {}.{}{}",
        info.address,
        Board::from_code(info.board),
        info.board,
        info.process,
        info.firmware.major,
        info.firmware.minor,
        build
    );
}

fn is_broadcast_reply(frame: &CanFrame, host: u8) -> bool {
    frame.clas() == Clas::Bootloader
        && frame.cmd() == BootloaderCmd::Broadcast.code()
        && frame.destination() == host
}

/// BROADCAST to `target` and wait for its identity.
///
/// This also moves a bootloader from Idle to Connected.
fn connect(transport: &mut Transport, host: u8, target: u8) -> Result<BroadcastInfo> {
    transport.drain_rx();
    let request = message::broadcast_request(host, target).context("Invalid broadcast request")?;
    transport.send(&request)?;

    let timeout = transport.timeout();
    let reply = transport
        .wait_for(timeout, |f| is_broadcast_reply(f, host) && f.sender() == target)?
        .with_context(|| format!("Board {} did not answer", target))?;

    BroadcastInfo::load(&reply).with_context(|| format!("Malformed reply from board {}", target))
}

fn expect_ack(transport: &mut Transport, cmd: BootloaderCmd, target: u8, timeout: Duration) -> Result<bool> {
    Ok(transport
        .wait_for(timeout, |f| message::is_ack(f, cmd, target))?
        .is_some())
}

/// Discover the boards on the bus.
pub fn discover(transport: &mut Transport, host: u8) -> Result<()> {
    transport.drain_rx();
    let request =
        message::broadcast_request(host, BROADCAST_ADDRESS).context("Invalid broadcast request")?;
    transport.send(&request)?;

    let timeout = transport.timeout();
    let replies = transport.collect(timeout, |f| is_broadcast_reply(f, host))?;
    let mut boards: Vec<BroadcastInfo> = replies.iter().filter_map(BroadcastInfo::load).collect();
    boards.sort_by_key(|b| b.address);

    if boards.is_empty() {
        println!("No board answered.");
        return Ok(());
    }

    println!("Found {} board(s):", boards.len());
    for board in &boards {
        print_board(board);
    }
    Ok(())
}

/// Upload a raw image to the board at `target`, row by row.
pub fn upload(
    transport: &mut Transport,
    host: u8,
    target: u8,
    file: &Path,
    address: u32,
    erase_eeprom: bool,
) -> Result<()> {
    let firmware = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if firmware.is_empty() {
        bail!("{} is empty", file.display());
    }
    let size = firmware.len() as u32;

    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        size,
        CRC32.checksum(&firmware)
    );
    println!("Target:   board {} at 0x{:08x}", target, address);
    println!();

    let info = connect(transport, host, target)?;
    print_board(&info);

    print!("Entering update mode... ");
    std::io::stdout().flush()?;
    let request = message::board_request(host, target, erase_eeprom).context("Invalid BOARD request")?;
    transport.send(&request)?;
    let timeout = transport.timeout();
    if !expect_ack(transport, BootloaderCmd::Board, target, timeout)? {
        bail!("Board {} did not acknowledge BOARD", target);
    }
    println!("OK");

    let pb = ProgressBar::new(size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut sent = 0u64;
    for (row_address, row) in rows(&firmware, address) {
        let request = message::address_request(host, target, row.len() as u8, row_address)
            .context("Invalid ADDRESS request")?;
        transport.send(&request)?;

        for chunk in row.chunks(DATA_CHUNK) {
            let request = message::data_request(host, target, chunk).context("Invalid DATA request")?;
            transport.send(&request)?;
        }

        if !expect_ack(transport, BootloaderCmd::Data, target, timeout)? {
            pb.abandon();
            bail!("No ack for row at 0x{:08x}", row_address);
        }

        sent += row.len() as u64;
        pb.set_position(sent);
    }

    pb.finish_with_message("Upload complete");
    println!();

    print!("Flushing... ");
    std::io::stdout().flush()?;
    transport.send(&message::start_request(host, target).context("Invalid START request")?)?;
    if !expect_ack(transport, BootloaderCmd::Start, target, START_TIMEOUT.max(timeout))? {
        bail!("Board {} did not acknowledge START", target);
    }
    println!("OK");

    print!("Restarting... ");
    std::io::stdout().flush()?;
    transport.send(&message::end_request(host, target).context("Invalid END request")?)?;
    if !expect_ack(transport, BootloaderCmd::End, target, timeout)? {
        bail!("Board {} did not acknowledge END", target);
    }
    println!("OK");

    println!();
    println!("Firmware uploaded successfully!");
    Ok(())
}

/// Give the board at `target` the address `new`, then check it answers there.
pub fn set_address(transport: &mut Transport, host: u8, target: u8, new: u8) -> Result<()> {
    if new == 0 || new == BROADCAST_ADDRESS {
        bail!("Address {} is reserved", new);
    }

    connect(transport, host, target)?;

    println!("Changing address {} -> {}...", target, new);
    let request = message::set_can_address_request(host, target, new, None)
        .context("Invalid SETCANADDRESS request")?;
    transport.send(&request)?;

    let info = connect(transport, host, new)
        .with_context(|| format!("Board did not move to address {}", new))?;
    print_board(&info);
    Ok(())
}

/// Ask the board at `target` to pick a random address avoiding `mask`.
pub fn set_random_address(
    transport: &mut Transport,
    host: u8,
    target: u8,
    mask: Option<u16>,
) -> Result<()> {
    connect(transport, host, target)?;

    println!("Requesting a random address for board {}...", target);
    let request = message::set_can_address_request(host, target, RANDOM_ADDRESS, mask)
        .context("Invalid SETCANADDRESS request")?;
    transport.send(&request)?;

    // the board does not reply; find it again
    discover(transport, host)
}

/// Read and print the additional info of the board at `target`.
pub fn get_info(transport: &mut Transport, host: u8, target: u8) -> Result<()> {
    let info = read_info(transport, host, target)?;

    let text_len = info.iter().position(|&b| b == 0).unwrap_or(info.len());
    println!("Additional info of board {}:", target);
    println!("  text: {:?}", String::from_utf8_lossy(&info[..text_len]));
    println!("  raw:  {:02x?}", info);
    Ok(())
}

fn read_info(transport: &mut Transport, host: u8, target: u8) -> Result<[u8; ADDITIONAL_INFO_SIZE]> {
    connect(transport, host, target)?;

    let request = message::get_additional_info_request(host, target)
        .context("Invalid GET_ADDITIONAL_INFO request")?;
    transport.send(&request)?;

    let timeout = transport.timeout();
    let replies = transport.collect(timeout, |f| {
        f.clas() == Clas::Bootloader
            && f.cmd() == BootloaderCmd::GetAdditionalInfo.code()
            && f.sender() == target
            && f.data_size() == 5
    })?;

    let mut info = [0u8; ADDITIONAL_INFO_SIZE];
    let mut seen = 0u8;
    for reply in &replies {
        let counter = reply.payload_byte(0);
        if counter >= ADDITIONAL_INFO_CHUNKS {
            continue;
        }
        let offset = 4 * counter as usize;
        info[offset..offset + 4].copy_from_slice(&reply.payload()[1..5]);
        seen |= 1 << counter;
    }

    if seen != 0xFF {
        bail!("Incomplete additional info from board {} (chunks 0b{:08b})", target, seen);
    }
    Ok(info)
}

/// Store `text` as the additional info of the board at `target`.
pub fn set_info(transport: &mut Transport, host: u8, target: u8, text: &str) -> Result<()> {
    let bytes = text.as_bytes();
    if bytes.len() > ADDITIONAL_INFO_SIZE {
        bail!("Text is {} bytes, at most {} fit", bytes.len(), ADDITIONAL_INFO_SIZE);
    }
    let mut info = [0u8; ADDITIONAL_INFO_SIZE];
    info[..bytes.len()].copy_from_slice(bytes);

    connect(transport, host, target)?;

    println!("Writing additional info of board {}...", target);
    for (counter, chunk) in info.chunks(4).enumerate() {
        let request = message::set_additional_info_request(
            host,
            target,
            counter as u8,
            [chunk[0], chunk[1], chunk[2], chunk[3]],
        )
        .context("Invalid SET_ADDITIONAL_INFO request")?;
        transport.send(&request)?;
    }

    let stored = read_info(transport, host, target)?;
    if stored != info {
        bail!("Board {} stored {:02x?}", target, stored);
    }
    println!("OK");
    Ok(())
}
