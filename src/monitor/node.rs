//! The node monitor: one object that owns every piece of per-node state and
//! consumes [`NodeEvent`]s one at a time.

use super::sink::EventSink;
use crate::location::{GeoFix, LocationBackend, LocationCoordinator, LocationEvent, LocationOutcome};
use crate::metrics;
use crate::radio::session::{RadioSession, SessionEffect, SessionState};
use crate::radio::{PeerIdentity, RadioCentral, RadioError, RadioEvent};
use crate::telemetry::collector::{Method, SubmissionRequest, Submitter};
use crate::telemetry::submission::{
    OutcomeClass, SubmissionGate, SubmissionOutcome, SubmissionPayload, SubmissionRecord,
};
use crate::telemetry::{self, Reading};
use log::{debug, trace};

/// Everything the monitor reacts to, funnelled through a single queue.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Radio(RadioEvent),
    Location(LocationEvent),
    Submission(SubmissionOutcome),
    /// A command typed by the user, sent to the node over the write characteristic.
    SendText(String),
}

pub struct NodeMonitor<C, L, S> {
    session: RadioSession,
    location: LocationCoordinator,
    gate: SubmissionGate,
    sink: EventSink,
    central: C,
    locator: L,
    submitter: S,
    collector_url: String,
}

impl<C, L, S> NodeMonitor<C, L, S>
where
    C: RadioCentral,
    L: LocationBackend,
    S: Submitter,
{
    pub fn new(
        target: PeerIdentity,
        collector_url: impl Into<String>,
        central: C,
        locator: L,
        submitter: S,
    ) -> Self {
        Self {
            session: RadioSession::new(target),
            location: LocationCoordinator::new(),
            gate: SubmissionGate::new(),
            sink: EventSink::new(),
            central,
            locator,
            submitter,
            collector_url: collector_url.into(),
        }
    }

    pub fn start(&mut self) {
        let effects = self.session.start();
        self.apply(effects);
    }

    pub fn handle(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Radio(event) => {
                let effects = self.session.handle_event(event, &mut self.central);
                self.apply(effects);
            }
            NodeEvent::Location(event) => self.on_location(event),
            NodeEvent::Submission(outcome) => self.on_outcome(outcome),
            NodeEvent::SendText(text) => {
                // Failure is already on the log.
                let _ = self.send_text(&text);
            }
        }
    }

    /// Write a UTF-8 command to the node. Trailing line endings are stripped.
    pub fn send_text(&mut self, text: &str) -> Result<(), RadioError> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(());
        }
        match self.session.write(text.as_bytes(), &mut self.central) {
            Ok(()) => {
                self.sink.append(format!("➡️ {}", text));
                Ok(())
            }
            Err(e) => {
                self.sink
                    .append("⚠️ Unable to send: no active connection.".to_string());
                Err(e)
            }
        }
    }

    /// Stop the radio, forget the location and drop anything unsent.
    pub fn teardown(&mut self) {
        let effects = self.session.teardown(&mut self.central);
        self.apply(effects);
        self.location.reset();
        self.gate.reset();
    }

    /// See [`RadioSession::set_cached_connect`]. Takes effect before `start`.
    pub fn set_cached_connect(&mut self, enabled: bool) {
        self.session.set_cached_connect(enabled);
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &RadioSession {
        &self.session
    }

    pub fn fix(&self) -> Option<GeoFix> {
        self.location.fix()
    }

    pub fn location(&self) -> &LocationCoordinator {
        &self.location
    }

    pub fn gate(&self) -> &SubmissionGate {
        &self.gate
    }

    pub fn last_error(&self) -> Option<u16> {
        self.gate.last_error()
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut EventSink {
        &mut self.sink
    }

    pub fn central(&self) -> &C {
        &self.central
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    fn apply(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::StateChanged(state) => trace!("Session now {:?}", state),
                SessionEffect::Status(text) => self.sink.set_status(text),
                SessionEffect::Log(line) => self.sink.append(line),
                SessionEffect::Payload(bytes) => self.on_payload(&bytes),
            }
        }
    }

    fn on_payload(&mut self, bytes: &[u8]) {
        let Some(reading) = telemetry::decode(self.session.target(), bytes) else {
            return;
        };
        self.on_reading(reading);
    }

    fn on_reading(&mut self, reading: Reading) {
        self.sink.append(format!("⬅️ {}", reading.raw.trim_end()));
        if self.location.fix().is_none() {
            self.location.request_fix_once(&mut self.locator);
        }
        if let Some(record) = self.gate.on_reading_decoded(reading) {
            self.submit(record);
        }
    }

    fn on_location(&mut self, event: LocationEvent) {
        match self.location.handle_event(event, &mut self.locator) {
            LocationOutcome::Quiet => {}
            LocationOutcome::FixAcquired(fix) => {
                self.sink.append(format!(
                    "📍 Location {:.5}, {:.5}",
                    fix.latitude, fix.longitude
                ));
                if let Some(record) = self.gate.on_fix_acquired(fix) {
                    self.submit(record);
                }
            }
            LocationOutcome::Status(text) => {
                self.sink.append(text.clone());
                self.sink.set_status(text);
            }
        }
    }

    fn on_outcome(&mut self, outcome: SubmissionOutcome) {
        let (class, next) = self.gate.on_outcome(&outcome);
        match class {
            OutcomeClass::Success(_) => metrics::inc_submissions_ok(),
            OutcomeClass::TransportFailed { status: None } => metrics::inc_submissions_unknown(),
            _ => metrics::inc_submissions_failed(),
        }
        self.sink.append(class.describe());
        if let Some(record) = next {
            self.submit(record);
        }
    }

    fn submit(&mut self, record: SubmissionRecord) {
        debug!(
            "Submitting {:?} at {:.5}, {:.5}",
            record.reading.values, record.fix.latitude, record.fix.longitude
        );
        self.sink.append("ℹ️ Web POST in progress...".to_string());
        self.submitter.submit(SubmissionRequest {
            url: self.collector_url.clone(),
            method: Method::Post,
            payload: SubmissionPayload::from(&record),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{
        AdvertisementData, CharHandle, GattCharacteristic, GattService, PeerId, PowerState,
        RadioCommand, ServiceHandle, UART_NOTIFY_CHAR_UUID, UART_SERVICE_UUID,
        UART_WRITE_CHAR_UUID,
    };

    #[derive(Default)]
    struct FakeLocator {
        auth_requests: usize,
        fix_requests: usize,
    }

    impl LocationBackend for FakeLocator {
        fn request_authorization(&mut self) {
            self.auth_requests += 1;
        }
        fn request_one_time_location(&mut self) {
            self.fix_requests += 1;
        }
    }

    type Monitor = NodeMonitor<Vec<RadioCommand>, FakeLocator, Vec<SubmissionRequest>>;

    fn monitor() -> Monitor {
        NodeMonitor::new(
            PeerIdentity::new("peer-1", "RAK4631-A"),
            "http://collector/post",
            Vec::new(),
            FakeLocator::default(),
            Vec::new(),
        )
    }

    fn bring_up(m: &mut Monitor) {
        let peer = PeerId::from("peer-1");
        m.start();
        m.handle(NodeEvent::Radio(RadioEvent::PowerStateChanged(PowerState::PoweredOn)));
        m.handle(NodeEvent::Radio(RadioEvent::AdvertisementSeen {
            peer: peer.clone(),
            name: Some("RAK4631-A".into()),
            advertisement: AdvertisementData::default(),
        }));
        m.handle(NodeEvent::Radio(RadioEvent::Connected(peer.clone())));
        m.handle(NodeEvent::Radio(RadioEvent::ServicesDiscovered {
            peer: peer.clone(),
            result: Ok(vec![GattService {
                handle: ServiceHandle(1),
                uuid: UART_SERVICE_UUID,
            }]),
        }));
        m.handle(NodeEvent::Radio(RadioEvent::CharacteristicsDiscovered {
            peer,
            service: ServiceHandle(1),
            result: Ok(vec![
                GattCharacteristic {
                    handle: CharHandle(2),
                    uuid: UART_WRITE_CHAR_UUID,
                },
                GattCharacteristic {
                    handle: CharHandle(3),
                    uuid: UART_NOTIFY_CHAR_UUID,
                },
            ]),
        }));
        assert_eq!(m.state(), SessionState::Ready);
    }

    fn notify(m: &mut Monitor, text: &str) {
        m.handle(NodeEvent::Radio(RadioEvent::ValueUpdated {
            characteristic: CharHandle(3),
            result: Ok(text.as_bytes().to_vec()),
        }));
    }

    #[test]
    fn send_text_without_link_reports_no_connection() {
        let mut m = monitor();
        m.start();
        assert_eq!(m.send_text("status\n"), Err(RadioError::NotConnected));
        assert_eq!(
            m.sink().last_line(),
            Some("⚠️ Unable to send: no active connection.")
        );
    }

    #[test]
    fn send_text_when_ready_writes_to_tx() {
        let mut m = monitor();
        bring_up(&mut m);
        m.handle(NodeEvent::SendText("ping\r\n".into()));
        assert_eq!(m.sink().last_line(), Some("➡️ ping"));
        assert!(m.central().iter().any(|c| matches!(
            c,
            RadioCommand::WriteValue { characteristic: CharHandle(2), bytes, .. } if bytes == b"ping"
        )));
    }

    #[test]
    fn reading_requests_fix_then_submits_once_fix_arrives() {
        let mut m = monitor();
        bring_up(&mut m);
        m.handle(NodeEvent::Location(LocationEvent::AuthorizationChanged(
            crate::location::Authorization::AuthorizedWhenInUse,
        )));
        assert_eq!(m.locator().fix_requests, 1);

        notify(&mut m, "21,40\r\n");
        assert_eq!(m.locator().fix_requests, 1);
        assert!(m.submitter().is_empty());

        m.handle(NodeEvent::Location(LocationEvent::Updated(GeoFix {
            latitude: 1.0,
            longitude: 2.0,
        })));
        assert_eq!(m.submitter().len(), 1);
        let request = &m.submitter()[0];
        assert_eq!(request.url, "http://collector/post");
        assert_eq!(request.payload.data.temp, [21]);
        assert_eq!(request.payload.data.accel_z, [0]);
    }

    #[test]
    fn outcome_releases_reading_received_while_in_flight() {
        let mut m = monitor();
        bring_up(&mut m);
        m.handle(NodeEvent::Location(LocationEvent::AuthorizationChanged(
            crate::location::Authorization::AuthorizedAlways,
        )));
        m.handle(NodeEvent::Location(LocationEvent::Updated(GeoFix {
            latitude: 1.0,
            longitude: 2.0,
        })));
        notify(&mut m, "1,2,3,4,5,6");
        notify(&mut m, "7,8,9,10,11,12");
        assert_eq!(m.submitter().len(), 1);

        m.handle(NodeEvent::Submission(SubmissionOutcome::Response {
            status: 404,
            body: String::new(),
        }));
        assert_eq!(m.last_error(), Some(404));
        assert_eq!(m.submitter().len(), 2);
        assert_eq!(m.submitter()[1].payload.data.temp, [7]);
    }

    #[test]
    fn teardown_disconnects_and_clears_location() {
        let mut m = monitor();
        bring_up(&mut m);
        m.handle(NodeEvent::Location(LocationEvent::AuthorizationChanged(
            crate::location::Authorization::AuthorizedAlways,
        )));
        m.handle(NodeEvent::Location(LocationEvent::Updated(GeoFix {
            latitude: 1.0,
            longitude: 2.0,
        })));
        m.teardown();
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.fix().is_none());
        assert!(!m.location().request_outstanding());
        assert!(matches!(m.central().last(), Some(RadioCommand::Disconnect(_))));
    }
}
