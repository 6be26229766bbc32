// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot management: jump record, image validation and jump to the application.

use canboot_common::jumper::{JumpCommand, JumpRecord, VectorTable};
use canboot_common::protocol::JUMP_RECORD_ADDR;

/// Read the command left by the previous run and clear it, so that the next
/// reset is a plain boot unless someone writes a new one.
pub fn take_jump_command() -> JumpCommand {
    let record = unsafe { JumpRecord::read_from(JUMP_RECORD_ADDR) };
    unsafe {
        JumpRecord::cleared().write_to(JUMP_RECORD_ADDR);
    }
    record.command()
}

unsafe fn read_vector_table(addr: u32) -> VectorTable {
    VectorTable {
        initial_sp: (addr as *const u32).read_volatile(),
        reset_vector: (addr as *const u32).offset(1).read_volatile(),
    }
}

/// True if the image at `addr` lies in `[region_start, region_end)` and its
/// vector table looks bootable.
pub fn image_is_valid(addr: u32, region_start: u32, region_end: u32) -> bool {
    if !(region_start..region_end).contains(&addr) || addr % 256 != 0 {
        return false;
    }
    let vt = unsafe { read_vector_table(addr) };
    vt.is_valid_for(addr, region_end)
}

/// Prepare the system for the handoff: no interrupt may fire into the
/// bootloader's handlers once the vector table moves.
unsafe fn prepare_for_firmware_handoff() {
    // Disable all interrupts
    cortex_m::interrupt::disable();

    // Clear all pending interrupts in NVIC
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    // Disable all NVIC interrupts
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(base: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_firmware(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",  // Re-enable interrupts before jumping (SDK expects PRIMASK=0)
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}

/// Start the application whose vector table is at `addr`, executing in place.
///
/// # Safety
/// `addr` must hold a vector table accepted by [`image_is_valid`].
pub unsafe fn jump_to_application(addr: u32) -> ! {
    prepare_for_firmware_handoff();
    relocate_vector_table(addr);

    let vt = read_vector_table(addr);
    jump_to_firmware(vt.initial_sp, vt.reset_vector);
}
