//! On/off command handling.
//!
//! Each message on the command topic is acknowledged with one success result
//! per command, then the irrigation flag and the relay flip exactly once,
//! however many commands the message carried.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::board::Board;
use crate::mqtt::{compose_results, Topics};
use crate::sensors::{self, SharedReader};
use crate::state::SharedState;
use crate::transport::Publisher;

/// Everything the handler touches.
pub struct CommandHandler<P, B> {
    publisher: P,
    topics: Topics,
    state: SharedState,
    reader: SharedReader<B>,
}

impl<P, B> CommandHandler<P, B>
where
    P: Publisher,
    B: Board + Send + 'static,
{
    pub fn new(publisher: P, topics: Topics, state: SharedState, reader: SharedReader<B>) -> Self {
        Self {
            publisher,
            topics,
            state,
            reader,
        }
    }

    /// Serve commands until the channel closes.  The transport closes it on
    /// disconnect, so commands arriving during the last publish cycle before
    /// shutdown are still acknowledged.
    pub async fn serve(self, mut inbound: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(payload) = inbound.recv().await {
            // Malformed batches are skipped: no result, no toggle.
            if let Err(e) = self.handle_onoff(&payload).await {
                warn!(
                    payload = %String::from_utf8_lossy(&payload),
                    "on/off command skipped: {e:#}"
                );
            }
        }
        info!("command handler stopped");
    }

    /// Acknowledge one on/off message, then toggle irrigation.  Returns the
    /// new irrigation state.
    pub async fn handle_onoff(&self, payload: &[u8]) -> Result<bool> {
        let results = compose_results(payload).context("malformed on/off command payload")?;
        let body = serde_json::to_vec(&results)?;

        info!(
            commands = results.len(),
            result = %String::from_utf8_lossy(&body),
            "command result"
        );
        if let Err(e) = self.publisher.publish(&self.topics.result_onoff, body).await {
            warn!(topic = %self.topics.result_onoff, "failed to publish command result: {e:#}");
        }

        let on = self.state.toggle_irrigation();
        let reader = self.reader.clone();
        let accepted = tokio::task::spawn_blocking(move || sensors::lock(&reader).set_relay(on))
            .await
            .context("relay task panicked")?;
        if !accepted {
            warn!(irrigation = on, "relay did not follow irrigation state");
        }

        Ok(on)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
