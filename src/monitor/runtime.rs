//! Async plumbing around the synchronous [`NodeMonitor`].
//!
//! Adapters run as their own tasks and talk to the monitor only through
//! unbounded channels. [`drive`] multiplexes those channels in a single
//! `tokio::select!` loop, so monitor state is only ever touched from one place.
//!
//! ```text
//!  btleplug task ──RadioEvent──────┐
//!  location backend ──LocationEvent┤
//!  HTTP tasks ──SubmissionOutcome──┼──▶ drive() ──▶ NodeMonitor ──▶ SinkEvent ──▶ console
//!  stdin ──text────────────────────┘
//! ```

use super::node::{NodeEvent, NodeMonitor};
use super::sink::SinkEvent;
use crate::location::{LocationBackend, LocationEvent};
use crate::radio::discovery::{DiscoveredPeer, DiscoveryRegistry};
use crate::radio::{PowerState, RadioCentral, RadioCommand, RadioEvent};
use crate::telemetry::collector::Submitter;
use crate::telemetry::submission::SubmissionOutcome;
use anyhow::Result;
use log::{debug, info, warn};
use std::future::Future;
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(feature = "ble")]
use crate::config::Config;

/// Receiving ends of every queue that feeds the monitor.
pub struct MonitorInputs {
    pub radio: mpsc::UnboundedReceiver<RadioEvent>,
    pub location: mpsc::UnboundedReceiver<LocationEvent>,
    pub outcomes: mpsc::UnboundedReceiver<SubmissionOutcome>,
    /// User commands; `None` when running without a console.
    pub commands: Option<mpsc::UnboundedReceiver<String>>,
}

/// Feed events to `monitor` until `shutdown` resolves or the radio adapter
/// goes away, then tear the monitor down.
pub async fn drive<C, L, S, F>(
    monitor: &mut NodeMonitor<C, L, S>,
    inputs: MonitorInputs,
    shutdown: F,
) -> Result<()>
where
    C: RadioCentral,
    L: LocationBackend,
    S: Submitter,
    F: Future<Output = ()>,
{
    let MonitorInputs {
        mut radio,
        mut location,
        mut outcomes,
        mut commands,
    } = inputs;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            radio_event = radio.recv() => {
                match radio_event {
                    Some(event) => monitor.handle(NodeEvent::Radio(event)),
                    None => {
                        warn!("Radio adapter stopped");
                        break;
                    }
                }
            }

            Some(event) = location.recv() => {
                monitor.handle(NodeEvent::Location(event));
            }

            Some(outcome) = outcomes.recv() => {
                monitor.handle(NodeEvent::Submission(outcome));
            }

            command = async {
                if let Some(ref mut rx) = commands {
                    rx.recv().await
                } else {
                    std::future::pending().await
                }
            } => {
                match command {
                    Some(text) => monitor.handle(NodeEvent::SendText(text)),
                    None => {
                        debug!("Command input closed");
                        commands = None;
                    }
                }
            }

            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }
    monitor.teardown();
    Ok(())
}

/// Scan and list matching peers until `shutdown` resolves. Scanning starts
/// once the radio reports power. `on_new` sees each peer once.
pub async fn browse_events<C, F, N>(
    registry: &mut DiscoveryRegistry,
    events: &mut mpsc::UnboundedReceiver<RadioEvent>,
    central: &mut C,
    shutdown: F,
    mut on_new: N,
) -> Result<()>
where
    C: RadioCentral,
    F: Future<Output = ()>,
    N: FnMut(&DiscoveredPeer),
{
    tokio::pin!(shutdown);
    let mut scanning = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Radio adapter stopped");
                    break;
                };
                match event {
                    RadioEvent::PowerStateChanged(PowerState::PoweredOn) => {
                        if !scanning {
                            central.send_command(RadioCommand::SetScanning(true));
                            scanning = true;
                        }
                    }
                    RadioEvent::PowerStateChanged(power) => {
                        info!("{}", power.status_text());
                        scanning = false;
                    }
                    RadioEvent::AdvertisementSeen { peer, name, advertisement } => {
                        if let Some(found) = registry.observe(&peer, name.as_deref(), &advertisement) {
                            on_new(found);
                        }
                    }
                    other => debug!("Browse ignoring {:?}", other),
                }
            }

            _ = &mut shutdown => break,
        }
    }
    if scanning {
        central.send_command(RadioCommand::SetScanning(false));
    }
    Ok(())
}

/// Print sink output to the terminal.
pub fn spawn_console(mut rx: mpsc::UnboundedReceiver<SinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SinkEvent::Line(line) => println!("{}", line),
                SinkEvent::Status(status) => println!("[{}]", status),
            }
        }
    })
}

/// Forward stdin lines as user commands until EOF. Uses a plain thread so a
/// pending read never holds up runtime shutdown.
pub fn spawn_stdin_commands(tx: mpsc::UnboundedSender<String>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg_attr(not(feature = "ble"), allow(dead_code))]
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Follow `target` until Ctrl-C: connect, stream readings, post them.
#[cfg(all(feature = "ble", feature = "http"))]
pub async fn run_node(config: &Config, target: crate::radio::PeerIdentity) -> Result<()> {
    use crate::location::ConfiguredLocation;
    use crate::metrics;
    use crate::radio::btle::BtleCentral;
    use crate::telemetry::collector::HttpCollector;
    use std::time::Duration;

    let (radio_tx, radio_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let adapter = BtleCentral::open(config.radio.adapter_index, radio_tx).await?;
    let adapter_task = tokio::spawn(adapter.run(command_rx));

    let (location_tx, location_rx) = mpsc::unbounded_channel();
    let locator = ConfiguredLocation::new(config.location.clone(), location_tx);
    locator.announce();

    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let submitter = HttpCollector::new(&config.collector, outcome_tx);

    info!("Following {} ({}), posting to {}", target.display_name(), target.id, config.collector.url());
    let mut monitor = NodeMonitor::new(
        target,
        config.collector.url(),
        command_tx.clone(),
        locator,
        submitter,
    );
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    monitor.sink_mut().subscribe(sink_tx);
    let console = spawn_console(sink_rx);

    let (text_tx, text_rx) = mpsc::unbounded_channel();
    spawn_stdin_commands(text_tx);

    monitor.set_cached_connect(config.radio.cached_connect);
    monitor.start();
    let inputs = MonitorInputs {
        radio: radio_rx,
        location: location_rx,
        outcomes: outcome_rx,
        commands: Some(text_rx),
    };
    drive(&mut monitor, inputs, ctrl_c()).await?;

    if command_tx.send(RadioCommand::Shutdown).is_err() {
        debug!("Radio adapter already stopped");
    }
    match tokio::time::timeout(Duration::from_secs(3), adapter_task).await {
        Ok(Ok(Err(e))) => warn!("Radio adapter error: {}", e),
        Ok(Err(e)) => warn!("Radio adapter task failed: {}", e),
        Err(_) => warn!("Radio adapter did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }
    drop(monitor);
    if let Err(e) = console.await {
        debug!("Console task ended abnormally: {}", e);
    }
    info!("Session stats: {}", metrics::snapshot());
    Ok(())
}

#[cfg(not(all(feature = "ble", feature = "http")))]
pub async fn run_node(
    _config: &crate::config::Config,
    _target: crate::radio::PeerIdentity,
) -> Result<()> {
    Err(anyhow::anyhow!(
        "`run` needs a build with the `ble` and `http` features"
    ))
}

/// List matching peers until Ctrl-C or `limit` elapses.
#[cfg(feature = "ble")]
pub async fn browse(config: &Config, limit: Option<std::time::Duration>) -> Result<DiscoveryRegistry> {
    use crate::radio::btle::BtleCentral;

    let (radio_tx, mut radio_rx) = mpsc::unbounded_channel();
    let (mut command_tx, command_rx) = mpsc::unbounded_channel();
    let adapter = BtleCentral::open(config.radio.adapter_index, radio_tx).await?;
    let adapter_task = tokio::spawn(adapter.run(command_rx));

    let mut registry = DiscoveryRegistry::new(config.radio.name_filter.clone());
    let shutdown = async move {
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {}
                    _ = ctrl_c() => {}
                }
            }
            None => ctrl_c().await,
        }
    };
    browse_events(&mut registry, &mut radio_rx, &mut command_tx, shutdown, |peer| {
        let rssi = peer
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "?".to_string());
        println!("{}  {}  {}", peer.identity.id, peer.identity.display_name(), rssi);
    })
    .await?;

    command_tx.send_command(RadioCommand::Shutdown);
    if tokio::time::timeout(std::time::Duration::from_secs(3), adapter_task)
        .await
        .is_err()
    {
        debug!("Radio adapter did not stop in time");
    }
    Ok(registry)
}

#[cfg(not(feature = "ble"))]
pub async fn browse(
    _config: &crate::config::Config,
    _limit: Option<std::time::Duration>,
) -> Result<DiscoveryRegistry> {
    Err(anyhow::anyhow!("`browse` needs a build with the `ble` feature"))
}
