// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! CAN frames over USB CDC, one COBS-framed postcard record per frame.
//!
//! The RP2040 has no CAN controller: the host side of the USB link is the
//! bus attachment and relays frames both ways.

use canboot_common::frame::CanFrame;
use heapless::Vec;
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

/// Largest encoded frame is well below this.
const RX_BUF_SIZE: usize = 64;
const TX_BUF_SIZE: usize = 32;

pub struct UsbTransport {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    rx_buf: Vec<u8, RX_BUF_SIZE>,
}

impl UsbTransport {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>) -> Self {
        let serial = SerialPort::new(usb_bus);
        let builder = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A));
        let builder = match builder.strings(&[StringDescriptors::default()
            .manufacturer("ADNT")
            .product("CAN Bootloader")
            .serial_number("0001")])
        {
            Ok(builder) => builder,
            Err(_) => defmt::panic!("USB string descriptors rejected"),
        };
        let usb_dev = builder.device_class(usbd_serial::USB_CLASS_CDC).build();

        Self {
            serial,
            usb_dev,
            rx_buf: Vec::new(),
        }
    }

    /// Poll USB device. Must be called frequently.
    pub fn poll(&mut self) -> bool {
        self.usb_dev.poll(&mut [&mut self.serial])
    }

    /// Try to receive one complete frame.
    ///
    /// Reads at most one frame's worth of bytes per call so that nothing is
    /// dropped between frames.
    pub fn try_receive(&mut self) -> Option<CanFrame> {
        let mut byte = [0u8; 1];
        while let Ok(1) = self.serial.read(&mut byte) {
            if byte[0] == 0x00 {
                // COBS delimiter: decode the accumulated frame
                if self.rx_buf.is_empty() {
                    continue;
                }
                let frame = postcard::from_bytes_cobs::<CanFrame>(&mut self.rx_buf).ok();
                self.rx_buf.clear();
                if frame.is_none() {
                    defmt::warn!("Dropped malformed frame");
                }
                return frame;
            } else if self.rx_buf.push(byte[0]).is_err() {
                // Overflow: discard frame
                defmt::warn!("Receive overflow");
                self.rx_buf.clear();
            }
        }
        None
    }

    /// Send a frame as a COBS-framed postcard record.
    pub fn send(&mut self, frame: &CanFrame) {
        let mut buf = [0u8; TX_BUF_SIZE];
        if let Ok(encoded) = postcard::to_slice_cobs(frame, &mut buf) {
            let mut offset = 0;
            while offset < encoded.len() {
                match self.serial.write(&encoded[offset..]) {
                    Ok(n) => offset += n,
                    Err(UsbError::WouldBlock) => {
                        self.poll();
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
