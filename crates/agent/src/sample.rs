//! Telemetry sample published once per cycle on the data topic.

use serde::Serialize;
use time::OffsetDateTime;

use crate::sensors::SensorSnapshot;

/// One telemetry object.  Every key is always present; absent readings
/// serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub moisture: Option<u16>,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub sound: Option<u16>,
    pub light: Option<u16>,
    pub irrigation: bool,
    pub target: i32,
}

impl Sample {
    pub fn new(timestamp: i64, readings: SensorSnapshot, irrigation: bool, target: i32) -> Self {
        Self {
            timestamp,
            moisture: readings.moisture,
            temperature: readings.temperature,
            humidity: readings.humidity,
            sound: readings.sound,
            light: readings.light,
            irrigation,
            target,
        }
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Millisecond timestamps that never go backwards, even if the wall clock
/// is stepped back (NTP sync after boot on a Pi without RTC).
#[derive(Debug, Default)]
pub struct SampleClock {
    last: i64,
}

impl SampleClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> i64 {
        self.advance(now_millis())
    }

    fn advance(&mut self, now: i64) -> i64 {
        self.last = self.last.max(now);
        self.last
    }
}

// ===========================================================================
// Tests
// ===========================================================================
