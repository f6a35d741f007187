//! Single-slot gate between decoded readings and the collector.
//!
//! The gate holds at most one unpaired [`Reading`]. Newer readings replace
//! older ones. A [`SubmissionRecord`] is formed only when a reading and a
//! location fix are both present and no earlier record is still in flight.
//! Outcomes are classified once and never retried.

use super::{Reading, SENSOR_SLOTS};
use crate::location::GeoFix;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

/// A reading paired with the position it was taken at.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub reading: Reading,
    pub fix: GeoFix,
}

/// One-element arrays, as the collector expects per sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    pub temp: [i64; 1],
    pub humidity: [i64; 1],
    pub gas: [i64; 1],
    pub accel_x: [i64; 1],
    pub accel_y: [i64; 1],
    pub accel_z: [i64; 1],
}

/// JSON body posted to the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "advertisingName")]
    pub advertising_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub data: SensorData,
}

impl From<&SubmissionRecord> for SubmissionPayload {
    fn from(record: &SubmissionRecord) -> Self {
        let v: [i64; SENSOR_SLOTS] = record.reading.padded();
        SubmissionPayload {
            uuid: record.reading.peer_id.clone(),
            advertising_name: record.reading.peer_name.clone(),
            latitude: record.fix.latitude,
            longitude: record.fix.longitude,
            data: SensorData {
                temp: [v[0]],
                humidity: [v[1]],
                gas: [v[2]],
                accel_x: [v[3]],
                accel_y: [v[4]],
                accel_z: [v[5]],
            },
        }
    }
}

/// What the submitter reports back for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The collector answered.
    Response { status: u16, body: String },
    /// The exchange failed below HTTP; a status is present only if one was
    /// received before the failure.
    TransportError { status: Option<u16>, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeClass {
    Success(u16),
    /// 4xx.
    Rejected(u16),
    /// Any other non-2xx status.
    ServerError(u16),
    /// `status: None` is an unknown outcome.
    TransportFailed { status: Option<u16> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("collector rejected submission with status {0}")]
    Rejected(u16),
    #[error("collector failed with status {0}")]
    Server(u16),
    #[error("submission transport error: {0}")]
    Transport(String),
}

impl OutcomeClass {
    pub fn classify(outcome: &SubmissionOutcome) -> Self {
        match *outcome {
            SubmissionOutcome::Response { status, .. } => match status {
                200..=299 => OutcomeClass::Success(status),
                400..=499 => OutcomeClass::Rejected(status),
                _ => OutcomeClass::ServerError(status),
            },
            SubmissionOutcome::TransportError { status, .. } => {
                OutcomeClass::TransportFailed { status }
            }
        }
    }

    /// Status code to retain as the last error, if any.
    pub fn error_status(&self) -> Option<u16> {
        match *self {
            OutcomeClass::Success(_) => None,
            OutcomeClass::Rejected(s) | OutcomeClass::ServerError(s) => Some(s),
            OutcomeClass::TransportFailed { status } => status,
        }
    }

    /// Log line for the event sink.
    pub fn describe(&self) -> String {
        match self {
            OutcomeClass::Success(_) => "✅ Web POST success".to_string(),
            OutcomeClass::Rejected(s) => format!("⚠️ Web POST rejected ({})", s),
            OutcomeClass::ServerError(s) => format!("⚠️ Web POST failed: server error ({})", s),
            OutcomeClass::TransportFailed { status: Some(s) } => {
                format!("⚠️ Web POST transport failure (status {})", s)
            }
            OutcomeClass::TransportFailed { status: None } => {
                "⚠️ Web POST outcome unknown (no response)".to_string()
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SubmissionGate {
    pending: Option<Reading>,
    fix: Option<GeoFix>,
    in_flight: bool,
    last_error: Option<u16>,
    last_outcome: Option<OutcomeClass>,
    handed_off: u64,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&Reading> {
        self.pending.as_ref()
    }

    pub fn fix(&self) -> Option<GeoFix> {
        self.fix
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Most recent non-2xx status seen from the collector.
    pub fn last_error(&self) -> Option<u16> {
        self.last_error
    }

    pub fn last_outcome(&self) -> Option<&OutcomeClass> {
        self.last_outcome.as_ref()
    }

    /// Number of records handed to the submitter so far.
    pub fn handed_off(&self) -> u64 {
        self.handed_off
    }

    /// Store a new reading (replacing any unpaired one) and pair if possible.
    pub fn on_reading_decoded(&mut self, reading: Reading) -> Option<SubmissionRecord> {
        if let Some(old) = self.pending.replace(reading) {
            debug!("Replacing unpaired reading {:?}", old.values);
        }
        self.try_pair()
    }

    /// Latch the fix and pair a waiting reading, if any.
    pub fn on_fix_acquired(&mut self, fix: GeoFix) -> Option<SubmissionRecord> {
        if self.fix.is_none() {
            self.fix = Some(fix);
        }
        self.try_pair()
    }

    /// Record the outcome of the in-flight record. A reading that arrived in
    /// the meantime is paired straight away.
    pub fn on_outcome(
        &mut self,
        outcome: &SubmissionOutcome,
    ) -> (OutcomeClass, Option<SubmissionRecord>) {
        let class = OutcomeClass::classify(outcome);
        match &class {
            OutcomeClass::Success(status) => info!("Collector accepted reading ({})", status),
            other => {
                match (outcome, other) {
                    (SubmissionOutcome::Response { body, .. }, OutcomeClass::Rejected(s)) => {
                        warn!("{}: {}", SubmissionError::Rejected(*s), body)
                    }
                    (SubmissionOutcome::Response { status, body }, _) => {
                        warn!("{}: {}", SubmissionError::Server(*status), body)
                    }
                    (SubmissionOutcome::TransportError { error, .. }, _) => {
                        warn!("{}", SubmissionError::Transport(error.clone()))
                    }
                }
                if let Some(status) = other.error_status() {
                    self.last_error = Some(status);
                }
            }
        }
        if !self.in_flight {
            debug!("Outcome with nothing in flight");
        }
        self.in_flight = false;
        self.last_outcome = Some(class.clone());
        (class, self.try_pair())
    }

    /// Drop everything; used on session teardown.
    pub fn reset(&mut self) {
        self.pending = None;
        self.fix = None;
        self.in_flight = false;
    }

    fn try_pair(&mut self) -> Option<SubmissionRecord> {
        if self.in_flight {
            return None;
        }
        let fix = self.fix?;
        let reading = self.pending.take()?;
        self.in_flight = true;
        self.handed_off += 1;
        Some(SubmissionRecord { reading, fix })
    }
}
