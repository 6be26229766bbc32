// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Board identity: CAN address, board type, versions and the 32-byte
//! additional info, persisted across resets.
//!
//! The record codec lives here so that firmware and host tools agree on the
//! layout; the storage itself is behind [`BoardInfoStore`].

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::protocol::{FirmwareVersion, ProtocolVersion, ADDITIONAL_INFO_SIZE};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const BOARD_INFO_MAGIC: u32 = 0x424F_4944; // "BOID"

/// Size of the persisted record, padded with 0xFF.
pub const RECORD_SIZE: usize = 64;

/// Bytes covered by the CRC.
const RECORD_BODY: usize = 48;

/// Address a board gets before anyone assigned one.
pub const DEFAULT_CAN_ADDRESS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredInfo {
    pub can_address: u8,
    pub board_type: u8,
    pub bootloader: FirmwareVersion,
    pub application: FirmwareVersion,
    pub protocol: ProtocolVersion,
    pub info32: [u8; ADDITIONAL_INFO_SIZE],
}

impl Default for StoredInfo {
    fn default() -> Self {
        Self {
            can_address: DEFAULT_CAN_ADDRESS,
            board_type: crate::protocol::Board::Unknown as u8,
            bootloader: FirmwareVersion {
                major: 0,
                minor: 0,
                build: 255,
            },
            application: FirmwareVersion::default(),
            protocol: ProtocolVersion::default(),
            info32: [0; ADDITIONAL_INFO_SIZE],
        }
    }
}

impl StoredInfo {
    /// Encode as a flash record: magic, fields, info, CRC-32, 0xFF padding.
    pub fn to_record(&self) -> [u8; RECORD_SIZE] {
        let mut rec = [0xFFu8; RECORD_SIZE];
        rec[0..4].copy_from_slice(&BOARD_INFO_MAGIC.to_le_bytes());
        rec[4] = self.can_address;
        rec[5] = self.board_type;
        rec[6] = self.bootloader.major;
        rec[7] = self.bootloader.minor;
        rec[8] = self.application.major;
        rec[9] = self.application.minor;
        rec[10] = self.application.build;
        rec[11] = self.protocol.major;
        rec[12] = self.protocol.minor;
        rec[13..16].copy_from_slice(&[0; 3]);
        rec[16..RECORD_BODY].copy_from_slice(&self.info32);

        let crc = CRC32.checksum(&rec[..RECORD_BODY]);
        rec[RECORD_BODY..RECORD_BODY + 4].copy_from_slice(&crc.to_le_bytes());
        rec
    }

    /// Decode a flash record. Returns `None` on bad magic or CRC.
    pub fn from_record(rec: &[u8]) -> Option<Self> {
        if rec.len() < RECORD_BODY + 4 {
            return None;
        }
        let magic = u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
        if magic != BOARD_INFO_MAGIC {
            return None;
        }
        let stored_crc = u32::from_le_bytes([
            rec[RECORD_BODY],
            rec[RECORD_BODY + 1],
            rec[RECORD_BODY + 2],
            rec[RECORD_BODY + 3],
        ]);
        if CRC32.checksum(&rec[..RECORD_BODY]) != stored_crc {
            return None;
        }

        let mut info32 = [0u8; ADDITIONAL_INFO_SIZE];
        info32.copy_from_slice(&rec[16..RECORD_BODY]);

        Some(Self {
            can_address: rec[4],
            board_type: rec[5],
            bootloader: FirmwareVersion {
                major: rec[6],
                minor: rec[7],
                build: 255,
            },
            application: FirmwareVersion {
                major: rec[8],
                minor: rec[9],
                build: rec[10],
            },
            protocol: ProtocolVersion {
                major: rec[11],
                minor: rec[12],
            },
            info32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The backing flash refused the erase or program.
    Write,
    /// Data read back differs from what was written.
    Verify,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "board info write failed"),
            Self::Verify => write!(f, "board info read-back mismatch"),
        }
    }
}

/// Persistent storage of the board identity.
///
/// Reads return values by copy, writes commit immediately.
pub trait BoardInfoStore {
    /// Current identity; the default identity if nothing valid is stored.
    fn get(&mut self) -> StoredInfo;

    fn set(&mut self, info: &StoredInfo) -> Result<(), StoreError>;

    /// Erase the application's user-data storage.
    fn erase_user_data(&mut self) -> Result<(), StoreError>;

    fn can_address(&mut self) -> u8 {
        self.get().can_address
    }

    fn set_can_address(&mut self, address: u8) -> Result<(), StoreError> {
        let mut info = self.get();
        info.can_address = address;
        self.set(&info)
    }
}
