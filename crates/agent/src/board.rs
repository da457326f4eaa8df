//! GPIO expansion board abstraction.  The `grovepi` feature gates the real
//! I2C driver; without it, the simulator in `sim.rs` stands in.

use anyhow::Result;
use serde::Deserialize;

/// Direction of a digital port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Variant of the combined temperature/humidity sensor on the DHT port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhtModule {
    /// Blue module.
    Dht11,
    /// White module.
    Dht22,
}

impl DhtModule {
    /// Module code understood by the board firmware.
    pub fn code(self) -> u8 {
        match self {
            Self::Dht11 => 0,
            Self::Dht22 => 1,
        }
    }
}

/// The four primitive operations the agent needs from the board.
///
/// Every call is independently fallible; an `Err` means the bus transaction
/// failed, not that the value is implausible.
pub trait Board {
    /// 10-bit analog reading (0–1023) from port `A<pin>`.
    fn analog_read(&mut self, pin: u8) -> Result<u16>;

    /// `(temperature °C, relative humidity %)` from a DHT on port `D<pin>`.
    /// The firmware reports a failed measurement as `(NaN, NaN)`.
    fn dht(&mut self, pin: u8, module: DhtModule) -> Result<(f32, f32)>;

    fn digital_write(&mut self, pin: u8, high: bool) -> Result<()>;

    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        module: DhtModule,
    }

    #[test]
    fn dht_module_codes() {
        assert_eq!(DhtModule::Dht11.code(), 0);
        assert_eq!(DhtModule::Dht22.code(), 1);
    }

    #[test]
    fn dht_module_deserializes_lowercase() {
        let w: Wrapper = toml::from_str(r#"module = "dht22""#).unwrap();
        assert_eq!(w.module, DhtModule::Dht22);
        assert!(toml::from_str::<Wrapper>(r#"module = "DHT22""#).is_err());
    }
}
