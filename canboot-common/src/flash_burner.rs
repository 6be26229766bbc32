// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash programmer for the application region.
//!
//! [`FlashBurner`] stages bytes in a page-sized RAM buffer and writes them
//! through a [`FlashDevice`]. Each page of the application region is erased
//! exactly once, the first time a byte for it is staged. A staged page is
//! programmed when data for another page arrives or on [`FlashBurner::flush`].
//!
//! Coming back to a page that was already erased this session reloads it from
//! the device first, so the page is programmed again with its earlier bytes
//! plus the new ones.

use core::fmt;

/// Upper bound on pages tracked by the erase bitmap.
pub const MAX_PAGES: usize = 1024;

const BITMAP_WORDS: usize = MAX_PAGES / 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Bytes fall outside the application region.
    OutOfRange { address: u32, len: usize },
    /// The device failed to erase the page at `address`.
    Erase { address: u32 },
    /// The device failed to program the page at `address`.
    Program { address: u32 },
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { address, len } => {
                write!(f, "{} bytes at 0x{:08x} outside application region", len, address)
            }
            Self::Erase { address } => write!(f, "erase failed at 0x{:08x}", address),
            Self::Program { address } => write!(f, "program failed at 0x{:08x}", address),
        }
    }
}

/// Page-granular access to non-volatile memory, absolute addresses.
pub trait FlashDevice {
    /// Erase one page. `address` is page-aligned.
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Program one whole page. `address` is page-aligned, `data` is a full page.
    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Read `buf.len()` bytes starting at `address`.
    fn read(&self, address: u32, buf: &mut [u8]);
}

/// What the protocol state machine needs from a flash programmer.
pub trait FlashProgrammer {
    /// Stage `data` for `address`.
    fn add(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Write everything staged. Does nothing if nothing is staged.
    fn flush(&mut self) -> Result<(), FlashError>;
}

/// Flash programmer with a `PAGE`-byte staging buffer.
pub struct FlashBurner<F: FlashDevice, const PAGE: usize> {
    device: F,
    region_start: u32,
    region_len: u32,
    erased: [u32; BITMAP_WORDS],
    buffer: [u8; PAGE],
    /// Page currently held in `buffer`.
    staged: Option<u32>,
}

impl<F: FlashDevice, const PAGE: usize> FlashBurner<F, PAGE> {
    /// `region_start` must be page-aligned and the region at most [`MAX_PAGES`] pages.
    pub fn new(device: F, region_start: u32, region_len: u32) -> Self {
        debug_assert!(region_start as usize % PAGE == 0);
        debug_assert!(region_len as usize / PAGE <= MAX_PAGES);
        Self {
            device,
            region_start,
            region_len,
            erased: [0; BITMAP_WORDS],
            buffer: [0xFF; PAGE],
            staged: None,
        }
    }

    pub fn device(&self) -> &F {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut F {
        &mut self.device
    }

    /// True if the page holding `address` has been erased during this session.
    pub fn is_erased(&self, address: u32) -> bool {
        match self.page_index(address) {
            Some(i) => self.erased[i / 32] & (1 << (i % 32)) != 0,
            None => false,
        }
    }

    fn contains(&self, address: u32, len: usize) -> bool {
        let end = address as u64 + len as u64;
        address >= self.region_start && end <= self.region_start as u64 + self.region_len as u64
    }

    fn page_index(&self, address: u32) -> Option<usize> {
        if !self.contains(address, 1) {
            return None;
        }
        Some((address - self.region_start) as usize / PAGE)
    }

    fn page_base(address: u32) -> u32 {
        address - address % PAGE as u32
    }

    fn erase_once(&mut self, page: u32) -> Result<(), FlashError> {
        let Some(i) = self.page_index(page) else {
            return Err(FlashError::OutOfRange {
                address: page,
                len: PAGE,
            });
        };
        if self.erased[i / 32] & (1 << (i % 32)) != 0 {
            return Ok(());
        }
        self.device.erase_page(page)?;
        self.erased[i / 32] |= 1 << (i % 32);
        trace!("flash: erased page 0x{:08x}", page);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), FlashError> {
        if let Some(page) = self.staged.take() {
            self.device.program_page(page, &self.buffer)?;
            trace!("flash: programmed page 0x{:08x}", page);
        }
        self.buffer = [0xFF; PAGE];
        Ok(())
    }
}

impl<F: FlashDevice, const PAGE: usize> FlashProgrammer for FlashBurner<F, PAGE> {
    fn add(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if !self.contains(address, data.len()) {
            return Err(FlashError::OutOfRange {
                address,
                len: data.len(),
            });
        }

        let mut address = address;
        let mut rest = data;
        while !rest.is_empty() {
            let page = Self::page_base(address);
            let offset = (address - page) as usize;
            let n = rest.len().min(PAGE - offset);

            if self.staged != Some(page) {
                self.commit()?;
                if self.is_erased(page) {
                    self.device.read(page, &mut self.buffer);
                } else {
                    self.erase_once(page)?;
                }
                self.staged = Some(page);
            }

            self.buffer[offset..offset + n].copy_from_slice(&rest[..n]);
            address += n as u32;
            rest = &rest[n..];
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<(), FlashError> {
        self.commit()
    }
}
