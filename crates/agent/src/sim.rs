//! Stateful GrovePi simulator for local development.
//!
//! Models the channels the agent reads:
//! - Soil moisture as a mean-reverting random walk that dries out slowly
//!   and rises while any digital output (the relay) is high
//! - Temperature and humidity following a diurnal cycle, with occasional
//!   missed DHT measurements reported as `(NaN, NaN)`
//! - Light following the same cycle, sound as noise with bursts
//! - Occasional bus errors in the flaky scenario

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Result};

use crate::board::{Board, DhtModule, PinMode};

/// GrovePi analog ports are 10-bit.
const ADC_MAX: f64 = 1023.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Hovers in humid soil with low noise and no faults.
    Stable,
    /// Starts in humid soil and drifts toward dry.  Occasional missed DHT
    /// measurements.
    Drying,
    /// High noise, frequent missed DHT measurements and bus errors.
    /// Exercises the absent-reading and DHT retry paths.
    Flaky,
    /// Starts with the probe close to standing water.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "drying" => Self::Drying,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drying => write!(f, "drying"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

struct Profile {
    start_moisture: f64,
    drift: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    dht_miss_prob: f64,
    io_error_prob: f64,
}

impl Profile {
    fn for_scenario(scenario: Scenario) -> Self {
        let (start_moisture, drift, walk_sigma, noise_sigma, dht_miss_prob, io_error_prob) =
            match scenario {
                Scenario::Stable => (450.0, 0.0, 3.0, 2.0, 0.0, 0.0),
                Scenario::Drying => (450.0, -4.0, 6.0, 4.0, 0.05, 0.0),
                Scenario::Flaky => (400.0, -2.0, 15.0, 25.0, 0.4, 0.1),
                Scenario::Wet => (690.0, -0.5, 4.0, 3.0, 0.02, 0.0),
            };
        Self {
            start_moisture,
            drift,
            walk_sigma,
            noise_sigma,
            dht_miss_prob,
            io_error_prob,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated board
// ---------------------------------------------------------------------------

/// In-memory board producing plausible readings on any port.
pub struct SimBoard {
    scenario: Scenario,
    profile: Profile,

    /// Current "true" soil moisture in ADC units.  Evolves per read.
    moisture: f64,
    /// Mean the moisture walk reverts to when the relay is closed.
    moisture_center: f64,
    mean_reversion: f64,
    /// ADC units gained per read while watering.
    wet_rate: f64,

    /// Seconds per simulated day.
    diurnal_period_s: f64,

    modes: HashMap<u8, PinMode>,
    outputs: HashMap<u8, bool>,
}

impl SimBoard {
    /// `diurnal_period_s` controls the day/night cycle length.  Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let profile = Profile::for_scenario(scenario);
        let moisture = profile.start_moisture;
        Self {
            scenario,
            profile,
            moisture,
            moisture_center: moisture,
            mean_reversion: 0.02,
            wet_rate: 25.0,
            diurnal_period_s,
            modes: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Any digital output driven high counts as an open valve.
    fn watering(&self) -> bool {
        self.outputs.values().any(|&on| on)
    }

    fn maybe_fail(&self, what: &str, pin: u8) -> Result<()> {
        if fastrand::f64() < self.profile.io_error_prob {
            bail!("simulated i2c error on {what} port {pin}");
        }
        Ok(())
    }

    /// Phase of the simulated day in [-1, 1]; peaks mid-afternoon.
    fn diurnal(&self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin()
    }

    fn sample_moisture(&mut self) -> u16 {
        let p = &self.profile;
        self.moisture_center += p.drift;

        let pull = self.mean_reversion * (self.moisture_center - self.moisture);
        let walk = gaussian(0.0, p.walk_sigma);
        let wet = if self.watering() { self.wet_rate } else { 0.0 };
        self.moisture = (self.moisture + pull + walk + wet).clamp(0.0, 950.0);
        if wet > 0.0 {
            self.moisture_center = self.moisture;
        }

        let noise = gaussian(0.0, p.noise_sigma);
        (self.moisture + noise).round().clamp(0.0, ADC_MAX) as u16
    }

    fn sample_sound(&self) -> u16 {
        let burst = if fastrand::f64() < 0.05 {
            gaussian(400.0, 100.0)
        } else {
            0.0
        };
        (gaussian(120.0, 20.0 + self.profile.noise_sigma) + burst)
            .round()
            .clamp(0.0, ADC_MAX) as u16
    }

    fn sample_light(&self) -> u16 {
        let level = 380.0 + 320.0 * self.diurnal() + gaussian(0.0, 10.0);
        level.round().clamp(0.0, ADC_MAX) as u16
    }
}

impl Board for SimBoard {
    fn analog_read(&mut self, pin: u8) -> Result<u16> {
        self.maybe_fail("analog", pin)?;
        // Port assignment follows the stock wiring: A0 soil, A1 sound, A2 light.
        let v = match pin {
            0 => self.sample_moisture(),
            1 => self.sample_sound(),
            2 => self.sample_light(),
            _ => fastrand::u16(0..=1023),
        };
        Ok(v)
    }

    fn dht(&mut self, pin: u8, module: DhtModule) -> Result<(f32, f32)> {
        self.maybe_fail("dht", pin)?;
        if fastrand::f64() < self.profile.dht_miss_prob {
            return Ok((f32::NAN, f32::NAN));
        }
        let phase = self.diurnal();
        let t = gaussian(22.0 + 6.0 * phase, 0.3);
        let h = gaussian(55.0 - 15.0 * phase, 1.0).clamp(0.0, 100.0);
        // The DHT11 only resolves whole units.
        let (t, h) = match module {
            DhtModule::Dht11 => (t.round(), h.round()),
            DhtModule::Dht22 => ((t * 10.0).round() / 10.0, (h * 10.0).round() / 10.0),
        };
        Ok((t as f32, h as f32))
    }

    fn digital_write(&mut self, pin: u8, high: bool) -> Result<()> {
        self.maybe_fail("digital", pin)?;
        if self.modes.get(&pin) != Some(&PinMode::Output) {
            tracing::debug!(pin, "[sim] digital write on a port not set to output");
        }
        self.outputs.insert(pin, high);
        tracing::debug!(pin, high, "[sim] digital write");
        Ok(())
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.modes.insert(pin, mode);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_moisture(board: &mut SimBoard, n: usize) -> f64 {
        (0..n)
            .map(|_| f64::from(board.analog_read(0).unwrap()))
            .sum::<f64>()
            / n as f64
    }

    #[test]
    fn analog_readings_within_adc_range() {
        let mut board = SimBoard::new(Scenario::Drying, 600.0);
        for _ in 0..300 {
            for pin in 0..3 {
                let v = board.analog_read(pin).unwrap();
                assert!(v <= 1023, "ADC out of range on A{pin}: {v}");
            }
        }
    }

    #[test]
    fn stable_scenario_never_fails() {
        let mut board = SimBoard::new(Scenario::Stable, 600.0);
        for _ in 0..200 {
            board.analog_read(0).unwrap();
            let (t, h) = board.dht(3, DhtModule::Dht11).unwrap();
            assert!(!t.is_nan() && !h.is_nan());
        }
    }

    #[test]
    fn dht_values_plausible() {
        let mut board = SimBoard::new(Scenario::Stable, 600.0);
        for _ in 0..100 {
            let (t, h) = board.dht(3, DhtModule::Dht22).unwrap();
            assert!((0.0..50.0).contains(&t), "temperature {t}");
            assert!((0.0..=100.0).contains(&h), "humidity {h}");
        }
    }

    #[test]
    fn flaky_scenario_produces_faults() {
        let mut board = SimBoard::new(Scenario::Flaky, 600.0);
        let mut errors = 0;
        let mut misses = 0;
        for _ in 0..500 {
            if board.analog_read(1).is_err() {
                errors += 1;
            }
            if let Ok((t, _)) = board.dht(3, DhtModule::Dht11) {
                if t.is_nan() {
                    misses += 1;
                }
            }
        }
        // p=0.1 and p≈0.36 over 500 draws; zero of either is vanishingly unlikely.
        assert!(errors > 0, "flaky board should report bus errors");
        assert!(misses > 0, "flaky board should miss DHT measurements");
    }

    #[test]
    fn relay_on_raises_moisture() {
        let mut board = SimBoard::new(Scenario::Drying, 600.0);
        let before = mean_moisture(&mut board, 20);

        board.pin_mode(4, PinMode::Output).unwrap();
        board.digital_write(4, true).unwrap();
        for _ in 0..30 {
            board.analog_read(0).unwrap();
        }
        let after = mean_moisture(&mut board, 20);

        assert!(
            after > before,
            "watering should raise moisture: before={before:.0} after={after:.0}"
        );
    }

    #[test]
    fn relay_off_stops_watering() {
        let mut board = SimBoard::new(Scenario::Stable, 600.0);
        board.digital_write(4, true).unwrap();
        assert!(board.watering());
        board.digital_write(4, false).unwrap();
        assert!(!board.watering());
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("DRYING"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Stable);
    }

    #[test]
    fn scenario_display_round_trips() {
        for s in [Scenario::Stable, Scenario::Drying, Scenario::Flaky, Scenario::Wet] {
            assert_eq!(Scenario::from_str_lossy(&s.to_string()), s);
        }
    }
}
