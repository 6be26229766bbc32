// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader main loop over USB CDC.
//!
//! Every received frame goes through the [`CanParser`]: discovery, address
//! assignment, additional info and the row-by-row firmware update. The loop
//! also watches the countdown and restarts into the application once it
//! expires.

use canboot_common::app::restart_to_application;
use canboot_common::board_info::StoredInfo;
use canboot_common::config::BootConfig;
use canboot_common::countdown::{ClockedCountdown, CountdownTimer};
use canboot_common::flash_burner::FlashBurner;
use canboot_common::parser::{BootContext, CanParser, Replies};
use canboot_common::protocol::{Board, FirmwareVersion, APP_ADDR, APP_SIZE, FLASH_SECTOR_SIZE};
use embedded_hal::digital::OutputPin;
use rp2040_hal as hal;
use usb_device::class_prelude::UsbBusAllocator;

use crate::flash::{FlashBoardInfo, RomFlash};
use crate::peripherals::{self, Peripherals};
use crate::usb_transport::UsbTransport;

/// Version reported in BROADCAST replies.
const BOOTLOADER_VERSION: FirmwareVersion = FirmwareVersion {
    major: 1,
    minor: 0,
    build: 255,
};

/// Board type until one is stored.
const DEFAULT_BOARD: Board = Board::Unknown;

/// Erase granularity of the QSPI flash.
const PAGE: usize = FLASH_SECTOR_SIZE as usize;

/// Read by the main loop, armed and stopped by the parser.
static COUNTDOWN: CountdownTimer = CountdownTimer::new();

fn default_identity() -> StoredInfo {
    StoredInfo {
        board_type: DEFAULT_BOARD as u8,
        bootloader: BOOTLOADER_VERSION,
        ..StoredInfo::default()
    }
}

/// Enter the bootloader: initialize USB and run the protocol loop.
///
/// With `countdown_ms` the board restarts into the application unless a host
/// talks to it within that time.
pub fn enter_update_mode(mut p: Peripherals, config: BootConfig, countdown_ms: Option<u32>) -> ! {
    let Some(mut usb) = p.usb.take() else {
        defmt::panic!("USB peripherals already taken");
    };

    let usb_bus = UsbBusAllocator::new(hal::usb::UsbBus::new(
        usb.regs,
        usb.dpram,
        usb.clock,
        true,
        &mut usb.resets,
    ));
    let mut transport = UsbTransport::new(peripherals::store_usb_bus(usb_bus));
    defmt::println!("USB CDC initialized");

    let timer = p.timer;
    let now_ms = move || peripherals::millis(&timer);

    match countdown_ms {
        Some(ms) => {
            defmt::println!("Countdown {} ms", ms);
            COUNTDOWN.arm(now_ms(), ms);
        }
        None => defmt::println!("Staying in bootloader"),
    }

    let ctx = BootContext {
        store: FlashBoardInfo::new(default_identity()),
        programmer: FlashBurner::<RomFlash, PAGE>::new(RomFlash::new(), APP_ADDR, APP_SIZE),
        countdown: ClockedCountdown::new(&COUNTDOWN, &now_ms),
        random: p.random,
        config,
    };
    let mut parser = CanParser::new(ctx);
    defmt::println!("CAN address {}", parser.can_address());

    p.led_pin.set_high().ok();

    let mut replies = Replies::new();
    loop {
        transport.poll();

        if let Some(frame) = transport.try_receive() {
            let before = parser.state();
            if parser.process(&frame, &mut replies) {
                for reply in replies.iter() {
                    transport.send(reply);
                }
            }
            if parser.state() != before {
                defmt::println!("State {} -> {}", before, parser.state());
            }
        }

        if COUNTDOWN.take_expired(now_ms()) {
            defmt::println!("Countdown expired, starting application");
            restart_to_application(config.application_address);
        }
    }
}
