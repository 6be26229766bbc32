// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN frame field codec.
//!
//! Identifier layout (11-bit standard id):
//!   bits[10:8] = message class
//!   bits[7:4]  = sender address
//!   bits[3:0]  = destination address, or command for periodic classes
//!
//! For polling classes payload byte 0 holds a sub-index in bit 7 and the
//! command in bits[6:0]. The bootloader class uses the whole byte 0 as command.
//! Periodic classes have no destination and carry data in the whole payload.

use serde::{Deserialize, Serialize};

use crate::protocol::BROADCAST_ADDRESS;

/// Maximum payload of a classic CAN frame.
pub const MAX_FRAME_DATA: usize = 8;

const CLAS_MASK: u32 = 0x0000_0700;
const SENDER_MASK: u32 = 0x0000_00F0;
const LOW_NIBBLE_MASK: u32 = 0x0000_000F;

/// Message class carried in identifier bits[10:8].
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Clas {
    PollingMotorControl = 0,
    PeriodicMotorControl = 1,
    PollingAnalogSensor = 2,
    PeriodicAnalogSensor = 3,
    PeriodicSkin = 4,
    PeriodicInertialSensor = 5,
    /// Value 6 is reserved and never used on the bus.
    None = 6,
    Bootloader = 7,
}

impl Clas {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::PollingMotorControl,
            1 => Self::PeriodicMotorControl,
            2 => Self::PollingAnalogSensor,
            3 => Self::PeriodicAnalogSensor,
            4 => Self::PeriodicSkin,
            5 => Self::PeriodicInertialSensor,
            7 => Self::Bootloader,
            _ => Self::None,
        }
    }

    pub fn is_periodic(self) -> bool {
        matches!(
            self,
            Self::PeriodicMotorControl
                | Self::PeriodicAnalogSensor
                | Self::PeriodicInertialSensor
                | Self::PeriodicSkin
        )
    }

    pub fn is_polling(self) -> bool {
        matches!(self, Self::PollingMotorControl | Self::PollingAnalogSensor)
    }
}

/// Raw CAN frame as seen by the protocol layer.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    pub id: u32,
    pub size: u8,
    pub data: [u8; MAX_FRAME_DATA],
}

impl CanFrame {
    /// Build a frame from its protocol fields.
    ///
    /// For addressable classes `cmd` goes in payload byte 0 and at most 7 bytes
    /// of `data` follow it; for periodic classes `cmd` replaces the destination
    /// and at most 8 bytes of `data` fill the payload. Returns `None` for
    /// [`Clas::None`].
    pub fn build(clas: Clas, cmd: u8, sender: u8, destination: u8, data: &[u8]) -> Option<Self> {
        Self::build_indexed(clas, cmd, sender, destination, data, 0)
    }

    /// Same as [`CanFrame::build`], with the motor-control sub-index bit.
    pub fn build_indexed(
        clas: Clas,
        cmd: u8,
        sender: u8,
        destination: u8,
        data: &[u8],
        mc_index: u8,
    ) -> Option<Self> {
        let mut frame = Self::default();
        frame.id = ((clas as u32) << 8) | ((sender as u32 & 0xF) << 4);

        match clas {
            Clas::None => return None,
            Clas::PollingMotorControl | Clas::PollingAnalogSensor | Clas::Bootloader => {
                frame.id |= destination as u32 & LOW_NIBBLE_MASK;
                frame.data[0] = match clas {
                    Clas::Bootloader => cmd,
                    Clas::PollingMotorControl => ((mc_index & 0x1) << 7) | (cmd & 0x7F),
                    _ => cmd & 0x7F,
                };
                let n = data.len().min(MAX_FRAME_DATA - 1);
                frame.data[1..1 + n].copy_from_slice(&data[..n]);
                frame.size = 1 + n as u8;
            }
            _ => {
                frame.id |= cmd as u32 & LOW_NIBBLE_MASK;
                let n = data.len().min(MAX_FRAME_DATA);
                frame.data[..n].copy_from_slice(&data[..n]);
                frame.size = n as u8;
            }
        }

        Some(frame)
    }

    pub fn clas(&self) -> Clas {
        Clas::from_bits(((self.id & CLAS_MASK) >> 8) as u8)
    }

    pub fn sender(&self) -> u8 {
        ((self.id & SENDER_MASK) >> 4) as u8
    }

    /// Destination nibble. Periodic frames are always broadcast.
    pub fn destination(&self) -> u8 {
        if self.clas().is_periodic() {
            return BROADCAST_ADDRESS;
        }
        (self.id & LOW_NIBBLE_MASK) as u8
    }

    /// Admission filter: true if this non-periodic frame is broadcast or
    /// addressed to `board_address`.
    pub fn is_for_board(&self, board_address: u8) -> bool {
        if self.clas().is_periodic() {
            return false;
        }
        let destination = (self.id & LOW_NIBBLE_MASK) as u8;
        destination == BROADCAST_ADDRESS || destination == (board_address & 0xF)
    }

    pub fn cmd(&self) -> u8 {
        match self.clas() {
            c if c.is_periodic() => (self.id & LOW_NIBBLE_MASK) as u8,
            Clas::Bootloader => self.data[0],
            _ => self.data[0] & 0x7F,
        }
    }

    /// Number of user data bytes (payload minus the command byte, if any).
    pub fn data_size(&self) -> usize {
        let size = (self.size as usize).min(MAX_FRAME_DATA);
        if size == 0 {
            return 0;
        }
        if self.clas().is_periodic() {
            size
        } else {
            size - 1
        }
    }

    /// User data bytes, `data_size()` long.
    pub fn payload(&self) -> &[u8] {
        let start = if self.clas().is_periodic() { 0 } else { 1 };
        &self.data[start..start + self.data_size()]
    }

    /// User data byte at `index`, past the declared size if needed.
    ///
    /// Short frames are read as the zero padding of the buffer.
    pub fn payload_byte(&self, index: usize) -> u8 {
        let start = if self.clas().is_periodic() { 0 } else { 1 };
        self.data.get(start + index).copied().unwrap_or(0)
    }

    /// Serialize as a COBS-framed postcard record, including the trailing delimiter.
    pub fn to_cobs<'b>(&self, buf: &'b mut [u8]) -> Option<&'b mut [u8]> {
        postcard::to_slice_cobs(self, buf).ok()
    }

    /// Decode one COBS-framed postcard record, without its delimiter.
    pub fn from_cobs(buf: &mut [u8]) -> Option<Self> {
        postcard::from_bytes_cobs(buf).ok()
    }
}
