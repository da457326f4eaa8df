//! Telemetry publish loop.
//!
//! ```text
//! ┌─▶ shutdown? ──yes──▶ disconnect
//! │      │no
//! │   read sensors ─▶ compose sample ─▶ publish ──err──▶ reconnect (once)
//! │                                        │ok               │
//! └──────────────── sleep(interval) ◀──────┴─────────────────┘
//! ```
//!
//! The shutdown flag is only checked at the top, so an iteration that has
//! started always finishes its publish and its sleep.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::board::Board;
use crate::mqtt::Topics;
use crate::sample::{Sample, SampleClock};
use crate::sensors::{self, SharedReader};
use crate::shutdown::Shutdown;
use crate::state::SharedState;
use crate::transport::Session;

pub struct Agent<S, B> {
    session: S,
    reader: SharedReader<B>,
    state: SharedState,
    topics: Topics,
    interval: Duration,
    clock: SampleClock,
}

impl<S, B> Agent<S, B>
where
    S: Session,
    B: Board + Send + 'static,
{
    pub fn new(
        session: S,
        reader: SharedReader<B>,
        state: SharedState,
        topics: Topics,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            reader,
            state,
            topics,
            interval,
            clock: SampleClock::new(),
        }
    }

    /// Read every sensor and combine the readings with the current state.
    pub async fn compose_sample(&mut self) -> Result<Sample> {
        let reader = self.reader.clone();
        let readings = tokio::task::spawn_blocking(move || sensors::lock(&reader).read_all())
            .await
            .context("sensor task panicked")?;

        Ok(Sample::new(
            self.clock.next(),
            readings,
            self.state.irrigation(),
            self.state.target(),
        ))
    }

    /// Publish one sample.  On failure, make exactly one reconnect attempt;
    /// its outcome is logged and otherwise ignored.
    async fn publish_once(&mut self) -> Result<()> {
        let sample = self.compose_sample().await?;
        let payload = serde_json::to_vec(&sample)?;

        match self.session.publish(&self.topics.data, payload).await {
            Ok(()) => {
                debug!(
                    topic = %self.topics.data,
                    timestamp = sample.timestamp,
                    moisture = ?sample.moisture,
                    irrigation = sample.irrigation,
                    "sent sample"
                );
            }
            Err(e) => {
                warn!("server connection lost, attempting to reconnect: {e:#}");
                match self.session.reconnect().await {
                    Ok(()) => info!("reconnected"),
                    Err(e) => warn!("reconnect failed: {e:#}"),
                }
            }
        }
        Ok(())
    }

    /// Run until `shutdown` is observed at the top of an iteration, then
    /// disconnect.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<()> {
        info!(
            topic = %self.topics.data,
            interval_ms = self.interval.as_millis() as u64,
            "publishing samples"
        );

        while !shutdown.is_triggered() {
            // A lost cycle is not fatal; the session must still be closed.
            if let Err(e) = self.publish_once().await {
                warn!("sample not sent: {e:#}");
            }
            tokio::time::sleep(self.interval).await;
        }

        info!("disconnecting from kaa server");
        self.session.disconnect().await?;
        info!("successfully disconnected");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
