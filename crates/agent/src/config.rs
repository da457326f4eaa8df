//! Agent configuration: compiled-in defaults, an optional TOML file, then
//! environment overrides, validated as a whole.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::board::DhtModule;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Kaa Cloud plain MQTT endpoint.
const DEFAULT_HOST: &str = "mqtt.cloud.kaaiot.com";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE_SEC: u64 = 60;

const DEFAULT_ENDPOINT_TOKEN: &str = "ilA2dAaXTD";
const DEFAULT_APPLICATION_VERSION: &str = "bvmq1ltbhnjc0btlkm7g-v1";

const DEFAULT_PUBLISH_INTERVAL_SEC: u64 = 3;
const DEFAULT_TARGET: i32 = 400;

/// GrovePi analog ports A0–A2.
const VALID_ANALOG_PINS: std::ops::RangeInclusive<u8> = 0..=2;
/// GrovePi digital ports D2–D8.
const VALID_DIGITAL_PINS: std::ops::RangeInclusive<u8> = 2..=8;

/// Shortest keep-alive accepted; anything lower floods the broker with pings.
const MIN_KEEP_ALIVE_SEC: u64 = 5;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub kaa: KaaConfig,
    pub agent: AgentConfig,
    pub board: BoardConfig,
    pub pins: PinConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KaaConfig {
    pub application_version: String,
    pub endpoint_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub publish_interval_sec: u64,
    pub initial_target: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub i2c_address: u16,
}

/// Board ports the sensors and the relay are plugged into.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Analog port of the soil moisture probe.
    pub moisture: u8,
    /// Analog port of the sound sensor.
    pub sound: u8,
    /// Analog port of the light sensor.
    pub light: u8,
    /// Digital port of the DHT temperature/humidity sensor.
    pub dht: u8,
    pub dht_module: DhtModule,
    /// Digital port of the irrigation relay.
    pub relay: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            keep_alive_sec: DEFAULT_KEEP_ALIVE_SEC,
        }
    }
}

impl Default for KaaConfig {
    fn default() -> Self {
        Self {
            application_version: DEFAULT_APPLICATION_VERSION.to_string(),
            endpoint_token: DEFAULT_ENDPOINT_TOKEN.to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            publish_interval_sec: DEFAULT_PUBLISH_INTERVAL_SEC,
            initial_target: DEFAULT_TARGET,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            i2c_address: crate::grovepi::DEFAULT_ADDRESS,
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            moisture: 0,
            sound: 1,
            light: 2,
            dht: 3,
            dht_module: DhtModule::Dht11,
            relay: 4,
        }
    }
}

impl AgentConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_sec)
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {name}: {value:?}"))
}

impl Config {
    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.mqtt.port = parse_var("MQTT_PORT", &v)?;
        }
        if let Some(v) = lookup("MQTT_KEEP_ALIVE_S") {
            self.mqtt.keep_alive_sec = parse_var("MQTT_KEEP_ALIVE_S", &v)?;
        }
        if let Some(v) = lookup("KAA_APP_VERSION") {
            self.kaa.application_version = v;
        }
        if let Some(v) = lookup("KAA_ENDPOINT_TOKEN") {
            self.kaa.endpoint_token = v;
        }
        if let Some(v) = lookup("PUBLISH_EVERY_S") {
            self.agent.publish_interval_sec = parse_var("PUBLISH_EVERY_S", &v)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_kaa(&mut errors);
        self.validate_pins(&mut errors);

        if self.agent.publish_interval_sec == 0 {
            errors.push("agent: publish_interval_sec must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if self.mqtt.keep_alive_sec < MIN_KEEP_ALIVE_SEC {
            errors.push(format!(
                "mqtt: keep_alive_sec {} is below the minimum of {MIN_KEEP_ALIVE_SEC}",
                self.mqtt.keep_alive_sec
            ));
        }
    }

    fn validate_kaa(&self, errors: &mut Vec<String>) {
        // Both values become MQTT topic levels.
        let check = |name: &str, value: &str, errors: &mut Vec<String>| {
            if value.is_empty() {
                errors.push(format!("kaa: {name} is empty"));
            } else if value
                .chars()
                .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
            {
                errors.push(format!(
                    "kaa: {name} {value:?} contains a topic separator, wildcard or whitespace"
                ));
            }
        };
        check("application_version", &self.kaa.application_version, errors);
        check("endpoint_token", &self.kaa.endpoint_token, errors);
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let p = &self.pins;

        for (name, pin) in [("moisture", p.moisture), ("sound", p.sound), ("light", p.light)] {
            if !VALID_ANALOG_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {name} {pin} is not a valid analog port (allowed: 0-2)"
                ));
            }
        }

        let mut seen_analog: HashSet<u8> = HashSet::new();
        for pin in [p.moisture, p.sound, p.light] {
            if !seen_analog.insert(pin) {
                errors.push(format!("pins: analog port {pin} is used by more than one sensor"));
            }
        }

        for (name, pin) in [("dht", p.dht), ("relay", p.relay)] {
            if !VALID_DIGITAL_PINS.contains(&pin) {
                errors.push(format!(
                    "pins: {name} {pin} is not a valid digital port (allowed: 2-8)"
                ));
            }
        }
        if p.dht == p.relay {
            errors.push(format!("pins: dht and relay both use digital port {}", p.dht));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Build the configuration from defaults, the optional TOML file at `path`
/// and the process environment, then validate it.
pub fn load(path: Option<&str>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            toml::from_str::<Config>(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        None => Config::default(),
    };

    config
        .apply_env(|name| std::env::var(name).ok())
        .context("invalid environment override")?;
    config.validate().context("invalid config")?;

    tracing::info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        publish_interval_sec = config.agent.publish_interval_sec,
        from_file = path.is_some(),
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
