mod agent;
mod board;
mod commands;
mod config;
mod grovepi;
#[cfg(test)]
mod mock;
mod mqtt;
mod sample;
mod sensors;
mod shutdown;
#[cfg(not(feature = "grovepi"))]
mod sim;
mod state;
mod transport;

use anyhow::Result;
use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agent::Agent;
use board::Board;
use commands::CommandHandler;
use config::Config;
use mqtt::Topics;
use sample::{Sample, SampleClock};
use sensors::{SensorReader, SoilCondition};
use shutdown::Shutdown;
use state::AgentState;
use transport::MqttTransport;

/// How long the command task gets to drain its queue after disconnect.
const COMMAND_DRAIN: Duration = Duration::from_secs(2);

#[cfg(feature = "grovepi")]
fn open_board(cfg: &Config) -> Result<impl Board + Send + 'static> {
    grovepi::GrovePi::open(cfg.board.i2c_address)
}

#[cfg(not(feature = "grovepi"))]
fn open_board(_cfg: &Config) -> Result<impl Board + Send + 'static> {
    let scenario =
        sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let board = sim::SimBoard::new(scenario, 600.0);
    info!(scenario = %board.scenario(), "using simulated board");
    Ok(board)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").ok();
    let cfg = config::load(config_path.as_deref())?;

    // ── Board ───────────────────────────────────────────────────────
    let board = open_board(&cfg)?;
    let reader = SensorReader::new(board, cfg.pins.clone());

    if env::args().nth(1).as_deref() == Some("probe") {
        return probe(reader, &cfg);
    }

    run(reader, cfg).await
}

/// Read every sensor once, log the readings and print the sample that would
/// have been published.
fn probe<B: Board>(mut reader: SensorReader<B>, cfg: &Config) -> Result<()> {
    let sample = probe_sample(&mut reader, cfg.agent.initial_target);
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}

fn probe_sample<B: Board>(reader: &mut SensorReader<B>, target: i32) -> Sample {
    let readings = reader.read_all();

    match readings.moisture {
        Some(raw) => info!(raw, condition = %SoilCondition::from_raw(raw), "moisture"),
        None => warn!("moisture unavailable"),
    }
    info!(
        temperature = ?readings.temperature,
        humidity = ?readings.humidity,
        "dht"
    );
    info!(sound = ?readings.sound, light = ?readings.light, "ambient");

    Sample::new(SampleClock::new().next(), readings, false, target)
}

async fn run<B: Board + Send + 'static>(reader: SensorReader<B>, cfg: Config) -> Result<()> {
    let topics = Topics::new(&cfg.kaa.application_version, &cfg.kaa.endpoint_token);
    let state = Arc::new(AgentState::new(cfg.agent.initial_target));
    let reader = Arc::new(Mutex::new(reader));

    info!(
        endpoint_token = %cfg.kaa.endpoint_token,
        application_version = %cfg.kaa.application_version,
        "kaa endpoint"
    );

    // ── MQTT ────────────────────────────────────────────────────────
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let transport = MqttTransport::connect(&cfg.mqtt, &topics, command_tx).await?;

    let shutdown = Shutdown::new();
    shutdown::listen_for_signals(shutdown.clone());

    // ── Command task ────────────────────────────────────────────────
    let handler = CommandHandler::new(
        transport.publisher(),
        topics.clone(),
        Arc::clone(&state),
        Arc::clone(&reader),
    );
    let mut command_task = tokio::spawn(handler.serve(command_rx));

    // ── Publish loop ────────────────────────────────────────────────
    let agent = Agent::new(
        transport,
        reader,
        state,
        topics,
        cfg.agent.publish_interval(),
    );
    let result = agent.run(shutdown).await;

    if tokio::time::timeout(COMMAND_DRAIN, &mut command_task)
        .await
        .is_err()
    {
        warn!("command handler did not stop in time; aborting");
        command_task.abort();
    }

    result
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinConfig;
    use crate::mock::MockBoard;

    #[test]
    fn probe_sample_reports_every_channel() {
        let board = MockBoard::new()
            .with_analog(0, 18)
            .with_analog(1, 90)
            .with_analog(2, 300)
            .with_dht_default(Some((19.5, 55.0)));
        let mut reader = SensorReader::new(board, PinConfig::default());

        let sample = probe_sample(&mut reader, 400);
        assert_eq!(sample.moisture, Some(18));
        assert_eq!(sample.sound, Some(90));
        assert_eq!(sample.light, Some(300));
        assert_eq!(sample.temperature, Some(19.5));
        assert_eq!(sample.humidity, Some(55.0));
        assert!(!sample.irrigation);
        assert_eq!(sample.target, 400);
        assert!(sample.timestamp > 0);
    }

    #[test]
    fn probe_sample_never_touches_the_relay() {
        let mut reader = SensorReader::new(MockBoard::new(), PinConfig::default());
        let sample = probe_sample(&mut reader, 250);
        assert_eq!(sample.moisture, None);
        assert_eq!(sample.target, 250);
        assert!(reader.board().writes.is_empty());
        assert!(reader.board().modes.is_empty());
    }

    #[cfg(not(feature = "grovepi"))]
    #[test]
    fn simulated_board_opens_with_defaults() {
        let board = open_board(&Config::default()).unwrap();
        let mut reader = SensorReader::new(board, PinConfig::default());
        let sample = probe_sample(&mut reader, 400);
        assert_eq!(sample.target, 400);
    }
}
