//! Shutdown token flipped by SIGINT/SIGTERM and polled by the publish loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

/// Cloneable shutdown flag.  Every clone observes the same trigger.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that triggers `shutdown` on the first interrupt or terminate
/// signal.
pub fn listen_for_signals(shutdown: Shutdown) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => info!(signal = name, "shutting down..."),
            Err(e) => {
                error!("failed to install signal handler: {e}");
                return;
            }
        }
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        assert!(!Shutdown::new().is_triggered());
    }

    #[test]
    fn trigger_is_seen_by_clones() {
        let a = Shutdown::new();
        let b = a.clone();
        b.trigger();
        assert!(a.is_triggered());
        assert!(b.is_triggered());
    }
}
