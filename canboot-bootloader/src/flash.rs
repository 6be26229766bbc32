// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash read/write/erase wrappers using RP2040 ROM routines.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! We use `#[link_section = ".data"]` to place critical functions in RAM,
//! and pre-resolve all ROM function pointers at init time.
//!
//! On top of the ROM wrappers sit [`RomFlash`], the device behind the
//! application flash programmer, and [`FlashBoardInfo`], the board identity
//! kept in its own sector.

use canboot_common::board_info::{BoardInfoStore, StoreError, StoredInfo, RECORD_SIZE};
use canboot_common::flash_burner::{FlashDevice, FlashError};
use canboot_common::protocol::{
    FirmwareVersion, BOARD_INFO_ADDR, FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE,
    USER_DATA_ADDR,
};

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// ROM function pointers, resolved once at init from the ROM table.
/// Stored in static RAM so RAM-resident functions can call them without
/// accessing flash-based code.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// Look up a ROM function by its two-character tag.
/// ROM table pointer at 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Initialize ROM flash function pointers. Must be called once before any flash operations.
/// This performs ROM table lookups which require XIP to be active.
pub fn init() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE =
            core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
}

/// Convert an absolute XIP flash address to a flash-relative offset.
fn addr_to_offset(abs_addr: u32) -> u32 {
    abs_addr - FLASH_BASE
}

/// Erase flash at the given flash-relative offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_erase(offset: u32, size: u32) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, FLASH_SECTOR_SIZE, 0x20);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Program flash at the given flash-relative offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// The `init()` function must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn flash_program(offset: u32, data: *const u8, len: usize) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Read bytes from an absolute XIP flash address via volatile reads.
fn flash_read(abs_addr: u32, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = unsafe { ((abs_addr + i as u32) as *const u8).read_volatile() };
    }
}

fn flash_matches(abs_addr: u32, data: &[u8]) -> bool {
    data.iter()
        .enumerate()
        .all(|(i, &b)| unsafe { ((abs_addr + i as u32) as *const u8).read_volatile() } == b)
}

fn flash_is_erased(abs_addr: u32, len: u32) -> bool {
    (0..len).all(|i| unsafe { ((abs_addr + i) as *const u8).read_volatile() } == 0xFF)
}

// --- Application flash device ---

/// Sector-granular access to the on-board QSPI flash through the ROM.
///
/// The programmer decides where it writes; callers are expected to keep it
/// inside the application region.
pub struct RomFlash {
    _private: (),
}

impl RomFlash {
    pub fn new() -> Self {
        init();
        Self { _private: () }
    }
}

impl FlashDevice for RomFlash {
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        unsafe { flash_erase(addr_to_offset(address), FLASH_SECTOR_SIZE) };
        if !flash_is_erased(address, FLASH_SECTOR_SIZE) {
            defmt::warn!("Erase failed at 0x{:08x}", address);
            return Err(FlashError::Erase { address });
        }
        Ok(())
    }

    fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        unsafe { flash_program(addr_to_offset(address), data.as_ptr(), data.len()) };
        if !flash_matches(address, data) {
            defmt::warn!("Program failed at 0x{:08x}", address);
            return Err(FlashError::Program { address });
        }
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        flash_read(address, buf);
    }
}

// --- Board identity ---

/// Board identity record in the sector at [`BOARD_INFO_ADDR`].
///
/// The bootloader version is always that of the running bootloader, whatever
/// the record says.
pub struct FlashBoardInfo {
    defaults: StoredInfo,
}

impl FlashBoardInfo {
    /// `defaults` is the identity of a board that never stored one.
    pub fn new(defaults: StoredInfo) -> Self {
        init();
        Self { defaults }
    }

    fn bootloader_version(&self) -> FirmwareVersion {
        self.defaults.bootloader
    }
}

impl BoardInfoStore for FlashBoardInfo {
    fn get(&mut self) -> StoredInfo {
        let mut rec = [0u8; RECORD_SIZE];
        flash_read(BOARD_INFO_ADDR, &mut rec);

        let mut info = StoredInfo::from_record(&rec).unwrap_or(self.defaults);
        info.bootloader = self.bootloader_version();
        info
    }

    fn set(&mut self, info: &StoredInfo) -> Result<(), StoreError> {
        let offset = addr_to_offset(BOARD_INFO_ADDR);

        // Pad to a full 256-byte page
        let mut page = [0xFFu8; FLASH_PAGE_SIZE as usize];
        page[..RECORD_SIZE].copy_from_slice(&info.to_record());

        unsafe {
            flash_erase(offset, FLASH_SECTOR_SIZE);
            flash_program(offset, page.as_ptr(), page.len());
        }

        if !flash_matches(BOARD_INFO_ADDR, &page) {
            defmt::warn!("Board info not written");
            return Err(StoreError::Verify);
        }
        Ok(())
    }

    fn erase_user_data(&mut self) -> Result<(), StoreError> {
        unsafe { flash_erase(addr_to_offset(USER_DATA_ADDR), FLASH_SECTOR_SIZE) };
        if !flash_is_erased(USER_DATA_ADDR, FLASH_SECTOR_SIZE) {
            defmt::warn!("User data not erased");
            return Err(StoreError::Write);
        }
        defmt::println!("User data erased");
        Ok(())
    }
}
