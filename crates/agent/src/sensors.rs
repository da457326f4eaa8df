//! Sensor reader: one call per channel, each failing soft.
//!
//! Analog reads and the relay never surface bus errors to the caller; they
//! are logged and turned into `None` / `false`.  The DHT read retries while
//! the sensor reports a missed measurement.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::board::{Board, PinMode};
use crate::config::PinConfig;

/// Maximum number of DHT reads per measurement before giving up on NaN.
/// This counts every read, the first one included: the budget is 100 reads
/// in total, not one read plus 100 retries.
pub const DHT_MAX_ATTEMPTS: u32 = 100;

/// Reader shared between the publish loop and the command handler.  The
/// board bus must not be driven from two places at once.
pub type SharedReader<B> = Arc<Mutex<SensorReader<B>>>;

pub fn lock<B>(reader: &SharedReader<B>) -> MutexGuard<'_, SensorReader<B>> {
    reader.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Temperature (°C) and relative humidity (%).  Non-finite values from the
/// sensor are reported as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DhtReading {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
}

impl DhtReading {
    fn from_pair((t, h): (f32, f32)) -> Self {
        Self {
            temperature: t.is_finite().then_some(t),
            humidity: h.is_finite().then_some(h),
        }
    }
}

/// One pass over every sensor channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    pub moisture: Option<u16>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub sound: Option<u16>,
    pub light: Option<u16>,
}

/// Coarse interpretation of a raw soil moisture value.
///
/// Observed on the stock probe: 0 in open air, ~18 in dry soil, ~425 in
/// humid soil, ~690 in water.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoilCondition {
    OpenAir,
    Dry,
    Humid,
    InWater,
}

impl SoilCondition {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::OpenAir,
            1..=299 => Self::Dry,
            300..=699 => Self::Humid,
            _ => Self::InWater,
        }
    }
}

impl fmt::Display for SoilCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAir => write!(f, "open air"),
            Self::Dry => write!(f, "dry soil"),
            Self::Humid => write!(f, "humid soil"),
            Self::InWater => write!(f, "in water"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct SensorReader<B> {
    board: B,
    pins: PinConfig,
}

impl<B: Board> SensorReader<B> {
    pub fn new(board: B, pins: PinConfig) -> Self {
        Self { board, pins }
    }

    #[cfg(test)]
    pub fn board(&self) -> &B {
        &self.board
    }

    fn analog(&mut self, sensor: &'static str, pin: u8) -> Option<u16> {
        match self.board.analog_read(pin) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(sensor, pin, "analog read failed: {e:#}");
                None
            }
        }
    }

    pub fn read_moisture(&mut self) -> Option<u16> {
        self.analog("moisture", self.pins.moisture)
    }

    pub fn read_sound(&mut self) -> Option<u16> {
        self.analog("sound", self.pins.sound)
    }

    pub fn read_light(&mut self) -> Option<u16> {
        self.analog("light", self.pins.light)
    }

    /// Read the DHT, re-reading while both values come back NaN.  After
    /// [`DHT_MAX_ATTEMPTS`] reads in total (first read included) the last
    /// pair is accepted as-is.
    pub fn read_dht(&mut self) -> DhtReading {
        let (pin, module) = (self.pins.dht, self.pins.dht_module);

        let mut attempts = 0;
        let pair = loop {
            attempts += 1;
            let pair = match self.board.dht(pin, module) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(pin, attempts, "dht read failed: {e:#}");
                    return DhtReading::default();
                }
            };
            if !(pair.0.is_nan() && pair.1.is_nan()) {
                break pair;
            }
            if attempts >= DHT_MAX_ATTEMPTS {
                warn!(pin, "could not get dht in {DHT_MAX_ATTEMPTS} attempts");
                break pair;
            }
        };

        DhtReading::from_pair(pair)
    }

    /// Drive the relay.  Returns whether the board accepted the write.
    pub fn set_relay(&mut self, on: bool) -> bool {
        let pin = self.pins.relay;
        let result = self
            .board
            .pin_mode(pin, PinMode::Output)
            .and_then(|()| self.board.digital_write(pin, on));

        match result {
            Ok(()) => {
                info!(pin, "relay is now {}", if on { "on" } else { "off" });
                true
            }
            Err(e) => {
                warn!(pin, on, "relay write failed: {e:#}");
                false
            }
        }
    }

    pub fn read_all(&mut self) -> SensorSnapshot {
        let dht = self.read_dht();
        SensorSnapshot {
            moisture: self.read_moisture(),
            temperature: dht.temperature,
            humidity: dht.humidity,
            sound: self.read_sound(),
            light: self.read_light(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
