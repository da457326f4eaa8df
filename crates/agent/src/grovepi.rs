//! GrovePi driver over I2C.
//!
//! The board firmware takes 4-byte command frames written to register 1
//! (`[cmd, pin, arg1, arg2]`) and answers reads from the same register.
//! Frame building and response decoding are plain functions so they can be
//! checked without hardware; the `grovepi` feature adds the `rppal` bus.
#![cfg_attr(not(feature = "grovepi"), allow(dead_code))]

use std::time::Duration;

// ── Protocol constants ──────────────────────────────────────────────────────

/// Default I2C slave address of the GrovePi.
pub const DEFAULT_ADDRESS: u16 = 0x04;

/// Register every command frame is written to and every response read from.
const REG_COMMAND: u8 = 1;

const CMD_DIGITAL_WRITE: u8 = 2;
const CMD_ANALOG_READ: u8 = 3;
const CMD_PIN_MODE: u8 = 5;
const CMD_DHT: u8 = 40;

/// Analog response: `[cmd echo, high byte, low byte]`.
const ANALOG_RESPONSE_LEN: usize = 3;
/// DHT response: `[cmd echo, temperature f32 LE, humidity f32 LE]`.
const DHT_RESPONSE_LEN: usize = 9;

/// Time the firmware needs to sample an analog port.
const ANALOG_WAIT: Duration = Duration::from_millis(10);
/// A DHT measurement takes ~0.5 s on the sensor side.
const DHT_WAIT: Duration = Duration::from_millis(600);

// ── Frames ──────────────────────────────────────────────────────────────────

fn analog_read_frame(pin: u8) -> [u8; 4] {
    [CMD_ANALOG_READ, pin, 0, 0]
}

fn digital_write_frame(pin: u8, high: bool) -> [u8; 4] {
    [CMD_DIGITAL_WRITE, pin, high as u8, 0]
}

fn pin_mode_frame(pin: u8, mode: crate::board::PinMode) -> [u8; 4] {
    let m = match mode {
        crate::board::PinMode::Output => 1,
        crate::board::PinMode::Input => 0,
    };
    [CMD_PIN_MODE, pin, m, 0]
}

fn dht_frame(pin: u8, module: crate::board::DhtModule) -> [u8; 4] {
    [CMD_DHT, pin, module.code(), 0]
}

// ── Responses ───────────────────────────────────────────────────────────────

fn decode_analog(buf: &[u8; ANALOG_RESPONSE_LEN]) -> u16 {
    u16::from(buf[1]) * 256 + u16::from(buf[2])
}

/// Decode a DHT response.  Pairs outside the sensor's physical range are
/// what the firmware returns for a missed measurement and become NaN.
fn decode_dht(buf: &[u8; DHT_RESPONSE_LEN]) -> (f32, f32) {
    let t = f32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let h = f32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    if t > -100.0 && t < 150.0 && (0.0..=100.0).contains(&h) {
        (t, h)
    } else {
        (f32::NAN, f32::NAN)
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "grovepi")]
pub use driver::GrovePi;

#[cfg(feature = "grovepi")]
mod driver {
    use super::*;
    use crate::board::{Board, DhtModule, PinMode};
    use anyhow::{Context, Result};
    use rppal::i2c::I2c;
    use std::thread;

    /// GrovePi board backed by `rppal::i2c`.
    pub struct GrovePi {
        i2c: I2c,
    }

    impl GrovePi {
        /// Open I2C bus 1 and address the GrovePi at `addr`.
        pub fn open(addr: u16) -> Result<Self> {
            let mut i2c = I2c::new().context("failed to open i2c bus")?;
            i2c.set_slave_address(addr)
                .with_context(|| format!("failed to address grovepi at 0x{addr:02x}"))?;

            tracing::info!(addr = format_args!("0x{addr:02x}"), "grovepi initialised");

            Ok(Self { i2c })
        }

        fn send(&mut self, frame: [u8; 4]) -> Result<()> {
            self.i2c.block_write(REG_COMMAND, &frame)?;
            Ok(())
        }
    }

    impl Board for GrovePi {
        fn analog_read(&mut self, pin: u8) -> Result<u16> {
            self.send(analog_read_frame(pin))?;
            thread::sleep(ANALOG_WAIT);
            let mut buf = [0u8; ANALOG_RESPONSE_LEN];
            self.i2c.block_read(REG_COMMAND, &mut buf)?;
            Ok(decode_analog(&buf))
        }

        fn dht(&mut self, pin: u8, module: DhtModule) -> Result<(f32, f32)> {
            self.send(dht_frame(pin, module))?;
            thread::sleep(DHT_WAIT);
            let mut buf = [0u8; DHT_RESPONSE_LEN];
            self.i2c.block_read(REG_COMMAND, &mut buf)?;
            Ok(decode_dht(&buf))
        }

        fn digital_write(&mut self, pin: u8, high: bool) -> Result<()> {
            self.send(digital_write_frame(pin, high))
        }

        fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
            self.send(pin_mode_frame(pin, mode))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
