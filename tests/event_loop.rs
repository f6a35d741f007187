//! The async loop multiplexing radio, location and collector queues.
mod common;

use clampa::config::LocationConfig;
use clampa::location::{Authorization, ConfiguredLocation};
use clampa::monitor::runtime::{drive, MonitorInputs};
use clampa::monitor::{NodeMonitor, SinkEvent};
use clampa::radio::session::SessionState;
use clampa::radio::{PeerIdentity, RadioCommand};
use clampa::telemetry::collector::{SubmissionRequest, Submitter};
use clampa::telemetry::submission::SubmissionOutcome;
use common::{frame, link_up_events, NAME, PEER};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Answers each request with the next scripted status and reports what it saw.
struct ScriptedCollector {
    statuses: Vec<u16>,
    outcomes: mpsc::UnboundedSender<SubmissionOutcome>,
    seen: mpsc::UnboundedSender<SubmissionRequest>,
}

impl Submitter for ScriptedCollector {
    fn submit(&mut self, request: SubmissionRequest) {
        let status = if self.statuses.is_empty() {
            200
        } else {
            self.statuses.remove(0)
        };
        let _ = self.seen.send(request);
        let _ = self.outcomes.send(SubmissionOutcome::Response {
            status,
            body: String::new(),
        });
    }
}

#[tokio::test]
async fn readings_flow_through_the_loop_and_teardown_runs() {
    let (radio_tx, radio_rx) = mpsc::unbounded_channel();
    let (location_tx, location_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let locator = ConfiguredLocation::new(
        LocationConfig {
            authorization: Authorization::AuthorizedAlways,
            latitude: Some(48.8566),
            longitude: Some(2.3522),
        },
        location_tx,
    );
    locator.announce();

    let collector = ScriptedCollector {
        statuses: vec![404, 201],
        outcomes: outcome_tx,
        seen: seen_tx,
    };
    let mut monitor = NodeMonitor::new(
        PeerIdentity::new(PEER, NAME),
        "http://collector.local/post",
        Vec::<RadioCommand>::new(),
        locator,
        collector,
    );
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    monitor.sink_mut().subscribe(sink_tx);
    monitor.start();

    let feeder = tokio::spawn(async move {
        for event in link_up_events() {
            radio_tx.send(event).unwrap();
        }
        radio_tx.send(frame("21,40,900")).unwrap();
        let first = seen_rx.recv().await.unwrap();
        radio_tx.send(frame("22,41,901")).unwrap();
        let second = seen_rx.recv().await.unwrap();
        let _ = stop_tx.send(());
        // Keep the radio queue open until the loop has stopped on its own signal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(radio_tx);
        (first, second)
    });

    let inputs = MonitorInputs {
        radio: radio_rx,
        location: location_rx,
        outcomes: outcome_rx,
        commands: None,
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        drive(&mut monitor, inputs, async {
            let _ = stop_rx.await;
        }),
    )
    .await
    .expect("loop did not stop")
    .unwrap();

    let (first, second) = feeder.await.unwrap();
    assert_eq!(first.payload.data.temp, [21]);
    assert_eq!(first.payload.latitude, 48.8566);
    assert_eq!(second.payload.data.temp, [22]);
    assert_eq!(second.payload.advertising_name, NAME);

    assert_eq!(monitor.last_error(), Some(404));
    assert_eq!(monitor.state(), SessionState::Idle);
    assert!(monitor.fix().is_none(), "teardown forgets the fix");
    assert!(matches!(
        monitor.central().last(),
        Some(RadioCommand::Disconnect(_))
    ));

    let mut saw_ready = false;
    while let Ok(event) = sink_rx.try_recv() {
        if event == SinkEvent::Status("Ready".to_string()) {
            saw_ready = true;
        }
    }
    assert!(saw_ready);
}

#[tokio::test]
async fn loop_ends_when_radio_adapter_goes_away() {
    let (radio_tx, radio_rx) = mpsc::unbounded_channel();
    let (_location_tx, location_rx) = mpsc::unbounded_channel();
    let (_outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let mut monitor = NodeMonitor::new(
        PeerIdentity::new(PEER, NAME),
        "http://collector.local/post",
        Vec::<RadioCommand>::new(),
        common::CountingLocator::default(),
        Vec::<SubmissionRequest>::new(),
    );
    monitor.start();
    command_tx.send("hello".to_string()).unwrap();
    drop(command_tx);
    drop(radio_tx);

    let inputs = MonitorInputs {
        radio: radio_rx,
        location: location_rx,
        outcomes: outcome_rx,
        commands: Some(command_rx),
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        drive(&mut monitor, inputs, std::future::pending::<()>()),
    )
    .await
    .expect("loop did not stop")
    .unwrap();
    assert_eq!(monitor.state(), SessionState::Idle);
    assert!(!monitor.session().is_active());
}
