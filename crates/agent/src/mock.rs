//! Test doubles for the board and the broker session.
//!
//! Both record every call so tests can assert on the full history without
//! touching I2C or a network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};

use crate::board::{Board, DhtModule, PinMode};
use crate::shutdown::Shutdown;
use crate::transport::{Publisher, Session};

// ── MockBoard ─────────────────────────────────────────────────

/// Scripted board.  Analog ports without a value fail; DHT responses are
/// consumed in order, then `dht_default` repeats.  `None` entries fail.
#[derive(Default)]
pub struct MockBoard {
    analog: HashMap<u8, u16>,
    dht_script: VecDeque<Option<(f32, f32)>>,
    dht_default: Option<(f32, f32)>,
    fail_writes: bool,
    /// Number of upcoming DHT reads that panic.
    dht_panics: usize,

    pub dht_calls: usize,
    pub modes: Vec<(u8, PinMode)>,
    pub writes: Vec<(u8, bool)>,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analog(mut self, pin: u8, value: u16) -> Self {
        self.analog.insert(pin, value);
        self
    }

    pub fn with_dht(mut self, script: Vec<Option<(f32, f32)>>) -> Self {
        self.dht_script = script.into();
        self
    }

    pub fn with_dht_default(mut self, pair: Option<(f32, f32)>) -> Self {
        self.dht_default = pair;
        self
    }

    pub fn panicking_dht(mut self, n: usize) -> Self {
        self.dht_panics = n;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Last level written to `pin`, if any.
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.writes
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, high)| *high)
    }
}

impl Board for MockBoard {
    fn analog_read(&mut self, pin: u8) -> Result<u16> {
        self.analog
            .get(&pin)
            .copied()
            .ok_or_else(|| anyhow!("mock i2c error on A{pin}"))
    }

    fn dht(&mut self, pin: u8, _module: DhtModule) -> Result<(f32, f32)> {
        self.dht_calls += 1;
        if self.dht_panics > 0 {
            self.dht_panics -= 1;
            panic!("mock board fault on D{pin}");
        }
        let next = self.dht_script.pop_front().unwrap_or(self.dht_default);
        next.ok_or_else(|| anyhow!("mock i2c error on D{pin}"))
    }

    fn digital_write(&mut self, pin: u8, high: bool) -> Result<()> {
        if self.fail_writes {
            bail!("mock i2c error on D{pin}");
        }
        self.writes.push((pin, high));
        Ok(())
    }

    fn pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        if self.fail_writes {
            bail!("mock i2c error on D{pin}");
        }
        self.modes.push((pin, mode));
        Ok(())
    }
}

// ── MockSession ───────────────────────────────────────────────

#[derive(Default)]
pub struct Recorded {
    pub published: Vec<(String, Vec<u8>)>,
    pub failed_publishes: usize,
    pub reconnects: usize,
    pub disconnects: usize,
    /// Number of upcoming publishes that fail.
    fail_next: usize,
    /// Trigger shutdown while handling the n-th publish (1-based).
    shutdown_at: Option<(usize, Shutdown)>,
    attempts: usize,
}

/// Broker session double.  Clones share one call record.
#[derive(Clone, Default)]
pub struct MockSession {
    inner: Arc<Mutex<Recorded>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.inner.lock().unwrap().fail_next = n;
    }

    pub fn shutdown_at(&self, publish: usize, shutdown: Shutdown) {
        self.inner.lock().unwrap().shutdown_at = Some((publish, shutdown));
    }

    pub fn record(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap()
    }

    /// Payloads published to `topic`, in order.
    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.record()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| serde_json::from_slice(p).unwrap())
            .collect()
    }
}

impl Publisher for MockSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut rec = self.inner.lock().unwrap();
        rec.attempts += 1;
        if let Some((n, shutdown)) = &rec.shutdown_at {
            if *n == rec.attempts {
                shutdown.trigger();
            }
        }
        if rec.fail_next > 0 {
            rec.fail_next -= 1;
            rec.failed_publishes += 1;
            bail!("mock broker: not connected");
        }
        rec.published.push((topic.to_string(), payload));
        Ok(())
    }
}

impl Session for MockSession {
    async fn reconnect(&mut self) -> Result<()> {
        self.inner.lock().unwrap().reconnects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.inner.lock().unwrap().disconnects += 1;
        Ok(())
    }
}
