// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN bootloader for RP2040 joint and sensor boards.
//!
//! CAN frames reach the board over USB CDC. At power-up the jump record left
//! in RAM decides, before any hardware init, whether to start the application
//! or to run the bootloader protocol.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod update;
mod usb_transport;

use canboot_common::config::BootConfig;
use canboot_common::jumper::{self, BootAction};
use canboot_common::protocol::{APP_ADDR, APP_SIZE};
use defmt_rtt as _;
use panic_probe as _;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

#[entry]
fn main() -> ! {
    let config = BootConfig::default();

    let command = boot::take_jump_command();
    let target = match command {
        canboot_common::JumpCommand::Jump(address) => address,
        _ => config.application_address,
    };
    let app_valid = boot::image_is_valid(target, APP_ADDR, APP_ADDR + APP_SIZE);

    match jumper::decide(command, app_valid, &config) {
        BootAction::JumpToApplication(address) => unsafe { boot::jump_to_application(address) },
        BootAction::RunBootloader { countdown_ms } => {
            defmt::println!(
                "Bootloader init: command={}, app_valid={}",
                command,
                app_valid
            );

            let mut p = peripherals::init();
            peripherals::blink(&mut p.led_pin, &mut p.timer, 3, 200);

            update::enter_update_mode(p, config, countdown_ms)
        }
    }
}
