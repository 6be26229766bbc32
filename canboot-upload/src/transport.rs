// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial transport: CAN frames to and from the bus attachment, one
//! COBS-framed postcard record per frame.

use anyhow::{bail, Context, Result};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use canboot_common::frame::CanFrame;

/// Default time to wait for a reply, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Poll interval of the serial port while waiting for a frame.
const READ_SLICE_MS: u64 = 20;

/// Longest record kept while waiting for its delimiter.
const RX_BUF_SIZE: usize = 64;

/// What one received byte completed.
#[derive(Debug, PartialEq)]
enum Received {
    Pending,
    Frame(CanFrame),
    /// A delimited record that did not decode, with its length.
    Malformed(usize),
    /// No delimiter within [`RX_BUF_SIZE`] bytes.
    Overflow,
}

/// Feed one byte of the COBS stream into `rx_buf`.
fn push_byte(rx_buf: &mut Vec<u8>, byte: u8) -> Received {
    if byte != 0 {
        if rx_buf.len() >= RX_BUF_SIZE {
            rx_buf.clear();
            return Received::Overflow;
        }
        rx_buf.push(byte);
        return Received::Pending;
    }
    if rx_buf.is_empty() {
        return Received::Pending;
    }
    let frame = CanFrame::from_cobs(rx_buf);
    let raw_len = rx_buf.len();
    rx_buf.clear();
    match frame {
        Some(frame) => Received::Frame(frame),
        None => Received::Malformed(raw_len),
    }
}

pub struct Transport {
    port: Box<dyn SerialPort>,
    rx_buf: Vec<u8>,
    timeout: Duration,
    verbose: bool,
}

impl Transport {
    /// Open the serial port of the bus attachment.
    pub fn new(port_name: &str, timeout_ms: u64, verbose: bool) -> Result<Self> {
        let port = serialport::new(port_name, 115200)
            .timeout(Duration::from_millis(READ_SLICE_MS))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            rx_buf: Vec::with_capacity(RX_BUF_SIZE),
            timeout: Duration::from_millis(timeout_ms),
            verbose,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Put a frame on the bus.
    pub fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if self.verbose {
            println!("  tx {}", format_frame(frame));
        }
        let mut buf = [0u8; 32];
        let encoded = frame
            .to_cobs(&mut buf)
            .context("Failed to serialize frame")?;
        self.port
            .write_all(encoded)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    /// Next frame from the bus, or `None` once `deadline` has passed.
    pub fn receive_until(&mut self, deadline: Instant) -> Result<Option<CanFrame>> {
        let mut byte = [0u8; 1];

        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.port.read(&mut byte) {
                Ok(1) => match push_byte(&mut self.rx_buf, byte[0]) {
                    Received::Pending => continue,
                    Received::Frame(frame) => {
                        if self.verbose {
                            println!("  rx {}", format_frame(&frame));
                        }
                        return Ok(Some(frame));
                    }
                    Received::Malformed(len) => eprintln!("Dropped malformed record ({} bytes)", len),
                    Received::Overflow => eprintln!("Receive overflow, record dropped"),
                },
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => bail!("Serial read error: {}", e),
            }
        }
    }

    /// Wait for the first frame accepted by `accept`, discarding others.
    pub fn wait_for<F>(&mut self, timeout: Duration, accept: F) -> Result<Option<CanFrame>>
    where
        F: Fn(&CanFrame) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while let Some(frame) = self.receive_until(deadline)? {
            if accept(&frame) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Collect every frame accepted by `accept` until `timeout` elapses.
    pub fn collect<F>(&mut self, timeout: Duration, accept: F) -> Result<Vec<CanFrame>>
    where
        F: Fn(&CanFrame) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut frames = Vec::new();
        while let Some(frame) = self.receive_until(deadline)? {
            if accept(&frame) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Discard anything already received.
    pub fn drain_rx(&mut self) {
        let mut buf = [0u8; 64];
        while self.port.read(&mut buf).unwrap_or(0) > 0 {}
        self.rx_buf.clear();
    }
}

/// `id [size] bytes`, as printed with `--verbose`.
pub fn format_frame(frame: &CanFrame) -> String {
    let size = (frame.size as usize).min(frame.data.len());
    format!(
        "0x{:03x} [{}] {:02x?}",
        frame.id,
        frame.size,
        &frame.data[..size]
    )
}
