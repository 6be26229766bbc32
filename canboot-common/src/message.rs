// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader messages: request decoders, reply builders and the request
//! builders used by host tools.
//!
//! Offsets below are relative to the user data of the frame (payload byte 1
//! onwards for the bootloader class).

use crate::frame::{CanFrame, Clas};
use crate::protocol::{
    BootloaderCmd, FirmwareVersion, Process, ADDITIONAL_INFO_CHUNKS, ADDITIONAL_INFO_SIZE,
};

/// BOARD: enter firmware update, optionally erasing application storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRequest {
    pub erase_eeprom: bool,
}

impl BoardRequest {
    pub fn load(frame: &CanFrame) -> Self {
        Self {
            erase_eeprom: frame.payload_byte(0) == 1,
        }
    }
}

/// ADDRESS: start of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRequest {
    pub datalen: u8,
    pub address: u32,
}

impl AddressRequest {
    /// The address is assembled from offsets 1, 2, 4 and 5; offset 3 is not
    /// part of it. Existing host tools rely on this layout.
    pub fn load(frame: &CanFrame) -> Self {
        let address = frame.payload_byte(1) as u32
            | (frame.payload_byte(2) as u32) << 8
            | (frame.payload_byte(4) as u32) << 16
            | (frame.payload_byte(5) as u32) << 24;
        Self {
            datalen: frame.payload_byte(0),
            address,
        }
    }
}

/// SETCANADDRESS: new address, or [`crate::protocol::RANDOM_ADDRESS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCanAddressRequest {
    pub address: u8,
    pub random_invalid_mask: u16,
}

impl SetCanAddressRequest {
    /// The invalid mask is read only from frames of CAN size 3; its high byte
    /// then sits in the frame buffer past the declared size.
    pub fn load(frame: &CanFrame) -> Self {
        let random_invalid_mask = if frame.size == 3 {
            u16::from_le_bytes([frame.payload_byte(1), frame.payload_byte(2)])
        } else {
            0x0000
        };
        Self {
            address: frame.payload_byte(0),
            random_invalid_mask,
        }
    }
}

/// SET_BOARD_ID / SET_BOARD_ADX of the polling classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetIdRequest {
    pub address: u8,
}

impl SetIdRequest {
    pub fn load(frame: &CanFrame) -> Self {
        Self {
            address: frame.payload_byte(0),
        }
    }
}

/// One SET_ADDITIONAL_INFO chunk: 4 bytes at `4 * counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdditionalInfoChunk {
    pub counter: u8,
    pub bytes: [u8; 4],
}

impl AdditionalInfoChunk {
    /// Returns `None` for counters above 7.
    pub fn load(frame: &CanFrame) -> Option<Self> {
        let counter = frame.payload_byte(0);
        if counter >= ADDITIONAL_INFO_CHUNKS {
            return None;
        }
        Some(Self {
            counter,
            bytes: [
                frame.payload_byte(1),
                frame.payload_byte(2),
                frame.payload_byte(3),
                frame.payload_byte(4),
            ],
        })
    }
}

/// Reassembles the 32-byte additional info from SET_ADDITIONAL_INFO chunks.
///
/// Chunks may arrive in any order; chunk 0 discards any partial block.
#[derive(Debug, Clone)]
pub struct AdditionalInfoAssembler {
    received_mask: u8,
    block: [u8; ADDITIONAL_INFO_SIZE],
}

impl Default for AdditionalInfoAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl AdditionalInfoAssembler {
    pub const fn new() -> Self {
        Self {
            received_mask: 0,
            block: [0; ADDITIONAL_INFO_SIZE],
        }
    }

    /// Add a chunk. Returns the whole block once all 8 chunks have been seen.
    pub fn push(&mut self, chunk: &AdditionalInfoChunk) -> Option<[u8; ADDITIONAL_INFO_SIZE]> {
        if chunk.counter == 0 {
            self.reset();
        }

        let offset = 4 * chunk.counter as usize;
        self.block[offset..offset + 4].copy_from_slice(&chunk.bytes);
        self.received_mask |= 1 << chunk.counter;

        self.is_complete().then_some(self.block)
    }

    pub fn is_complete(&self) -> bool {
        self.received_mask == 0xFF
    }

    pub fn reset(&mut self) {
        self.received_mask = 0;
        self.block = [0; ADDITIONAL_INFO_SIZE];
    }
}

// --- Replies (board -> host) ---

/// BROADCAST reply: board type and firmware version.
pub fn broadcast_reply(
    sender: u8,
    destination: u8,
    board: u8,
    firmware: FirmwareVersion,
    process: Process,
) -> Option<CanFrame> {
    let data = [board, firmware.major, firmware.minor, firmware.build];
    let len = match process {
        Process::Bootloader => 3,
        Process::Application => 4,
    };
    CanFrame::build(
        Clas::Bootloader,
        BootloaderCmd::Broadcast.code(),
        sender,
        destination,
        &data[..len],
    )
}

/// BOARD reply: the bare command.
pub fn board_reply(sender: u8, destination: u8) -> Option<CanFrame> {
    CanFrame::build(Clas::Bootloader, BootloaderCmd::Board.code(), sender, destination, &[])
}

/// DATA, START and END reply: `[ok]`.
pub fn ack_reply(cmd: BootloaderCmd, sender: u8, destination: u8, ok: bool) -> Option<CanFrame> {
    CanFrame::build(Clas::Bootloader, cmd.code(), sender, destination, &[ok as u8])
}

/// GET_ADDITIONAL_INFO reply number `counter`: `[counter, 4 bytes]`.
pub fn additional_info_reply(
    sender: u8,
    destination: u8,
    counter: u8,
    info: &[u8; ADDITIONAL_INFO_SIZE],
) -> Option<CanFrame> {
    if counter >= ADDITIONAL_INFO_CHUNKS {
        return None;
    }
    let offset = 4 * counter as usize;
    let mut data = [0u8; 5];
    data[0] = counter;
    data[1..].copy_from_slice(&info[offset..offset + 4]);
    CanFrame::build(
        Clas::Bootloader,
        BootloaderCmd::GetAdditionalInfo.code(),
        sender,
        destination,
        &data,
    )
}

/// Decoded BROADCAST reply, as seen by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastInfo {
    pub address: u8,
    pub board: u8,
    pub firmware: FirmwareVersion,
    pub process: Process,
}

impl BroadcastInfo {
    pub fn load(frame: &CanFrame) -> Option<Self> {
        if frame.clas() != Clas::Bootloader || frame.cmd() != BootloaderCmd::Broadcast.code() {
            return None;
        }
        let (process, build) = match frame.data_size() {
            3 => (Process::Bootloader, 255),
            4 => (Process::Application, frame.payload_byte(3)),
            _ => return None,
        };
        Some(Self {
            address: frame.sender(),
            board: frame.payload_byte(0),
            firmware: FirmwareVersion {
                major: frame.payload_byte(1),
                minor: frame.payload_byte(2),
                build,
            },
            process,
        })
    }
}

/// True if `frame` is a positive ack of `cmd` from `board`.
pub fn is_ack(frame: &CanFrame, cmd: BootloaderCmd, board: u8) -> bool {
    frame.clas() == Clas::Bootloader
        && frame.sender() == board
        && frame.cmd() == cmd.code()
        && match cmd {
            BootloaderCmd::Board => true,
            _ => frame.data_size() >= 1 && frame.payload_byte(0) == 1,
        }
}

// --- Requests (host -> board) ---

fn request(cmd: BootloaderCmd, host: u8, board: u8, data: &[u8]) -> Option<CanFrame> {
    CanFrame::build(Clas::Bootloader, cmd.code(), host, board, data)
}

pub fn broadcast_request(host: u8, board: u8) -> Option<CanFrame> {
    request(BootloaderCmd::Broadcast, host, board, &[])
}

pub fn board_request(host: u8, board: u8, erase_eeprom: bool) -> Option<CanFrame> {
    request(BootloaderCmd::Board, host, board, &[erase_eeprom as u8])
}

/// ADDRESS request, laid out as [`AddressRequest::load`] expects.
pub fn address_request(host: u8, board: u8, datalen: u8, address: u32) -> Option<CanFrame> {
    let a = address.to_le_bytes();
    request(
        BootloaderCmd::Address,
        host,
        board,
        &[datalen, a[0], a[1], 0, a[2], a[3]],
    )
}

/// DATA request carrying at most 7 bytes.
pub fn data_request(host: u8, board: u8, chunk: &[u8]) -> Option<CanFrame> {
    if chunk.len() > 7 {
        return None;
    }
    request(BootloaderCmd::Data, host, board, chunk)
}

pub fn start_request(host: u8, board: u8) -> Option<CanFrame> {
    request(BootloaderCmd::Start, host, board, &[])
}

pub fn end_request(host: u8, board: u8) -> Option<CanFrame> {
    request(BootloaderCmd::End, host, board, &[])
}

/// SETCANADDRESS request.
///
/// With a mask the frame is sent with CAN size 3, as boards expect, and the
/// mask high byte rides in the buffer just past it.
pub fn set_can_address_request(
    host: u8,
    board: u8,
    address: u8,
    random_invalid_mask: Option<u16>,
) -> Option<CanFrame> {
    match random_invalid_mask {
        Some(mask) => {
            let m = mask.to_le_bytes();
            let mut frame =
                request(BootloaderCmd::SetCanAddress, host, board, &[address, m[0], m[1]])?;
            frame.size = 3;
            Some(frame)
        }
        None => request(BootloaderCmd::SetCanAddress, host, board, &[address]),
    }
}

pub fn get_additional_info_request(host: u8, board: u8) -> Option<CanFrame> {
    request(BootloaderCmd::GetAdditionalInfo, host, board, &[])
}

pub fn set_additional_info_request(
    host: u8,
    board: u8,
    counter: u8,
    bytes: [u8; 4],
) -> Option<CanFrame> {
    request(
        BootloaderCmd::SetAdditionalInfo,
        host,
        board,
        &[counter, bytes[0], bytes[1], bytes[2], bytes[3]],
    )
}
