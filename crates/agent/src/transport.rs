//! Broker session over `rumqttc`.
//!
//! A dispatch task owns the event loop.  It re-subscribes to the command
//! topic on every ConnAck, forwards command payloads to the command task,
//! and after a connection error parks until the publish loop asks for a
//! reconnect.  Reconnecting is therefore driven by the agent (one attempt
//! per failed publish), not by the event loop retrying on its own.
//!
//! The command channel is unbounded so no on/off message is dropped while
//! the handler waits on the board.  Its sender lives in the dispatch task,
//! so the channel closes once the session is disconnected.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::mqtt::Topics;

/// Capacity of the rumqttc request channel.
const REQUEST_CAP: usize = 10;

/// How long `disconnect` waits for the dispatch task to wind down.
const DISCONNECT_WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Outbound half of a broker session.  Cheap to clone into other tasks.
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`.  An error means the message was not
    /// handed to a live connection.
    fn publish(&self, topic: &str, payload: Vec<u8>)
        -> impl Future<Output = Result<()>> + Send;
}

/// Connection lifecycle, driven from the publish loop.
pub trait Session: Publisher {
    /// Make one connection attempt.  Returns once the attempt resolved.
    fn reconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Stop background dispatch and close the connection.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Link status
// ---------------------------------------------------------------------------

/// Connection status shared by the dispatch task.  `attempts` counts
/// resolved connection attempts so waiters can tell a fresh outcome from a
/// stale one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    up: bool,
    attempts: u64,
}

fn random_client_id() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..6)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    link: watch::Receiver<Link>,
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let up = self.link.borrow().up;
        if !up {
            bail!("not connected");
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("publish to {topic} failed"))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct MqttTransport {
    publisher: MqttPublisher,
    retry: Arc<Notify>,
    stopping: Arc<AtomicBool>,
    dispatch: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// Connect to the broker and start background dispatch.  Payloads
    /// received on the on/off command topic are forwarded to `commands`.
    ///
    /// Fails if the first connection attempt fails.
    pub async fn connect(
        cfg: &MqttConfig,
        topics: &Topics,
        commands: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<Self> {
        let client_id = random_client_id();
        let mut options = MqttOptions::new(client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAP);
        let (link_tx, mut link_rx) = watch::channel(Link::default());
        let retry = Arc::new(Notify::new());
        let stopping = Arc::new(AtomicBool::new(false));

        info!(
            host = %cfg.host,
            port = cfg.port,
            client_id = %client_id,
            "connecting to kaa server"
        );

        let dispatch = tokio::spawn(dispatch(
            eventloop,
            client.clone(),
            topics.command_onoff.clone(),
            commands,
            link_tx,
            Arc::clone(&retry),
            Arc::clone(&stopping),
        ));

        let first = *link_rx
            .wait_for(|l| l.attempts > 0)
            .await
            .context("mqtt dispatch ended before connecting")?;

        if !first.up {
            stopping.store(true, Ordering::Release);
            dispatch.abort();
            bail!("failed to connect to {}:{}", cfg.host, cfg.port);
        }

        info!("successfully connected");

        Ok(Self {
            publisher: MqttPublisher {
                client,
                link: link_rx,
            },
            retry,
            stopping,
            dispatch: Some(dispatch),
        })
    }

    /// Publisher handle for other tasks.
    pub fn publisher(&self) -> MqttPublisher {
        self.publisher.clone()
    }
}

impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.publisher.publish(topic, payload).await
    }
}

impl Session for MqttTransport {
    async fn reconnect(&mut self) -> Result<()> {
        let mut link = self.publisher.link.clone();
        let before = *link.borrow_and_update();
        if before.up {
            return Ok(());
        }

        self.retry.notify_one();
        let after = *link
            .wait_for(|l| l.attempts > before.attempts)
            .await
            .context("mqtt dispatch ended")?;

        if after.up {
            Ok(())
        } else {
            bail!("reconnect attempt failed")
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.publisher.client.disconnect().await {
            debug!("disconnect request not delivered: {e}");
        }
        // Wake the dispatch task if it is parked after a connection error.
        self.retry.notify_one();

        if let Some(handle) = self.dispatch.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DISCONNECT_WAIT, handle).await.is_err() {
                warn!("mqtt dispatch did not stop in time; aborting");
                abort.abort();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch task
// ---------------------------------------------------------------------------

async fn dispatch(
    mut eventloop: EventLoop,
    client: AsyncClient,
    command_topic: String,
    commands: mpsc::UnboundedSender<Vec<u8>>,
    link: watch::Sender<Link>,
    retry: Arc<Notify>,
    stopping: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                link.send_modify(|l| {
                    l.up = true;
                    l.attempts += 1;
                });
                // try_subscribe: awaiting here would stall the loop that
                // drains the request channel.
                if let Err(e) = client.try_subscribe(command_topic.as_str(), QoS::AtLeastOnce) {
                    warn!(topic = %command_topic, "subscribe request failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!(topic = %command_topic, "subscribed");
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                if p.topic == command_topic {
                    info!(topic = %p.topic, "received on/off command");
                    if commands.send(p.payload.to_vec()).is_err() {
                        warn!("command handler gone; dropping on/off command");
                    }
                } else {
                    debug!(
                        topic = %p.topic,
                        payload = %String::from_utf8_lossy(&p.payload),
                        "unhandled message"
                    );
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("mqtt disconnected");
                link.send_modify(|l| l.up = false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                warn!("mqtt connection error: {e}");
                link.send_modify(|l| {
                    l.up = false;
                    l.attempts += 1;
                });

                retry.notified().await;
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                debug!("mqtt reconnect requested");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
