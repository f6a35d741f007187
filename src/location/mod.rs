//! # Location Module
//!
//! One-shot position acquisition for tagging readings.
//!
//! The [`LocationCoordinator`] issues at most one request per session and
//! latches the first fix it receives. Requests are only made while the host
//! grants location access; a grant arriving later re-attempts the request.
//! Results come back through the monitor's event loop as [`LocationEvent`]s.
//!
//! ## Backends
//!
//! [`ConfiguredLocation`] answers from `[location]` in `config.toml`, which
//! suits a fixed sensor installation:
//!
//! ```toml
//! [location]
//! authorization = "when_in_use"
//! latitude = 42.3398
//! longitude = -71.0892
//! ```

use crate::config::LocationConfig;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Host permission for location access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    #[serde(alias = "when_in_use")]
    AuthorizedWhenInUse,
    #[serde(alias = "always")]
    AuthorizedAlways,
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        matches!(
            self,
            Authorization::AuthorizedWhenInUse | Authorization::AuthorizedAlways
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    AuthorizationChanged(Authorization),
    Updated(GeoFix),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,
    #[error("location fix failed: {0}")]
    Failed(String),
}

/// Source of positions. Calls return immediately; results arrive as events.
pub trait LocationBackend {
    fn request_authorization(&mut self);
    fn request_one_time_location(&mut self);
}

/// What the monitor should surface after a location event.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationOutcome {
    /// Nothing to report.
    Quiet,
    /// A fix was latched just now.
    FixAcquired(GeoFix),
    /// Status line text (permission problems, failures).
    Status(String),
}

#[derive(Debug, Default)]
pub struct LocationCoordinator {
    authorization: Authorization,
    request_issued: bool,
    fix_received: bool,
    fix: Option<GeoFix>,
}

impl LocationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fix(&self) -> Option<GeoFix> {
        self.fix
    }

    pub fn authorization(&self) -> Authorization {
        self.authorization
    }

    pub fn request_outstanding(&self) -> bool {
        self.request_issued && !self.fix_received
    }

    /// Ask for a position unless one is latched, pending, or not permitted.
    /// Returns whether a request went out.
    pub fn request_fix_once(&mut self, backend: &mut impl LocationBackend) -> bool {
        if !self.authorization.is_granted() {
            debug!("Location request skipped: {:?}", self.authorization);
            return false;
        }
        if self.request_issued || self.fix_received {
            return false;
        }
        self.request_issued = true;
        info!("Requesting one-time location fix");
        backend.request_one_time_location();
        true
    }

    pub fn handle_event(
        &mut self,
        event: LocationEvent,
        backend: &mut impl LocationBackend,
    ) -> LocationOutcome {
        match event {
            LocationEvent::AuthorizationChanged(status) => {
                self.authorization = status;
                match status {
                    Authorization::NotDetermined => {
                        backend.request_authorization();
                        LocationOutcome::Quiet
                    }
                    Authorization::Denied | Authorization::Restricted => {
                        warn!("{}", LocationError::Denied);
                        LocationOutcome::Status("Location permission denied.".to_string())
                    }
                    Authorization::AuthorizedWhenInUse | Authorization::AuthorizedAlways => {
                        self.request_fix_once(backend);
                        LocationOutcome::Quiet
                    }
                }
            }
            LocationEvent::Updated(fix) => {
                if self.fix_received {
                    debug!("Ignoring extra location update {:?}", fix);
                    return LocationOutcome::Quiet;
                }
                self.fix_received = true;
                self.fix = Some(fix);
                info!("Location fix {:.5}, {:.5}", fix.latitude, fix.longitude);
                LocationOutcome::FixAcquired(fix)
            }
            LocationEvent::Failed(err) => {
                // The next reading may try again.
                self.request_issued = false;
                let err = LocationError::Failed(err);
                warn!("{}", err);
                LocationOutcome::Status(format!("Location unavailable: {}", err))
            }
        }
    }

    /// Forget flags and fix so the next session starts clean.
    pub fn reset(&mut self) {
        self.request_issued = false;
        self.fix_received = false;
        self.fix = None;
    }
}

/// Location backend answering from configuration.
pub struct ConfiguredLocation {
    config: LocationConfig,
    events: mpsc::UnboundedSender<LocationEvent>,
}

impl ConfiguredLocation {
    pub fn new(config: LocationConfig, events: mpsc::UnboundedSender<LocationEvent>) -> Self {
        Self { config, events }
    }

    /// Report the initial permission state, as a platform manager does on creation.
    pub fn announce(&self) {
        self.emit(LocationEvent::AuthorizationChanged(self.config.authorization));
    }

    fn emit(&self, event: LocationEvent) {
        if self.events.send(event).is_err() {
            debug!("Location event dropped, monitor gone");
        }
    }
}

impl LocationBackend for ConfiguredLocation {
    fn request_authorization(&mut self) {
        // A static backend cannot prompt; the configured answer is final.
        let status = match self.config.authorization {
            Authorization::NotDetermined => Authorization::Denied,
            other => other,
        };
        self.emit(LocationEvent::AuthorizationChanged(status));
    }

    fn request_one_time_location(&mut self) {
        match (self.config.latitude, self.config.longitude) {
            (Some(latitude), Some(longitude)) => {
                self.emit(LocationEvent::Updated(GeoFix {
                    latitude,
                    longitude,
                }))
            }
            _ => self.emit(LocationEvent::Failed(
                "no position configured in [location]".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        auth_requests: usize,
        fix_requests: usize,
    }

    impl LocationBackend for Recorder {
        fn request_authorization(&mut self) {
            self.auth_requests += 1;
        }
        fn request_one_time_location(&mut self) {
            self.fix_requests += 1;
        }
    }

    const HERE: GeoFix = GeoFix {
        latitude: 42.34,
        longitude: -71.09,
    };

    #[test]
    fn no_request_without_permission() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        assert!(!loc.request_fix_once(&mut backend));
        loc.handle_event(LocationEvent::AuthorizationChanged(Authorization::Denied), &mut backend);
        assert!(!loc.request_fix_once(&mut backend));
        assert_eq!(backend.fix_requests, 0);
    }

    #[test]
    fn undetermined_permission_prompts() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::NotDetermined),
            &mut backend,
        );
        assert_eq!(backend.auth_requests, 1);
        assert_eq!(backend.fix_requests, 0);
    }

    #[test]
    fn grant_triggers_single_request() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedWhenInUse),
            &mut backend,
        );
        assert_eq!(backend.fix_requests, 1);
        // Still pending: suppressed.
        assert!(!loc.request_fix_once(&mut backend));
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedAlways),
            &mut backend,
        );
        assert_eq!(backend.fix_requests, 1);
        assert!(loc.request_outstanding());
    }

    #[test]
    fn first_fix_is_latched() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedWhenInUse),
            &mut backend,
        );
        assert_eq!(
            loc.handle_event(LocationEvent::Updated(HERE), &mut backend),
            LocationOutcome::FixAcquired(HERE)
        );
        let elsewhere = GeoFix {
            latitude: 0.0,
            longitude: 0.0,
        };
        assert_eq!(
            loc.handle_event(LocationEvent::Updated(elsewhere), &mut backend),
            LocationOutcome::Quiet
        );
        assert_eq!(loc.fix(), Some(HERE));
        assert!(!loc.request_fix_once(&mut backend));
    }

    #[test]
    fn failure_allows_a_later_attempt() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedWhenInUse),
            &mut backend,
        );
        let out = loc.handle_event(LocationEvent::Failed("no signal".into()), &mut backend);
        assert!(matches!(out, LocationOutcome::Status(s) if s.contains("no signal")));
        assert_eq!(backend.fix_requests, 1);
        assert!(loc.request_fix_once(&mut backend));
        assert_eq!(backend.fix_requests, 2);
    }

    #[test]
    fn reset_clears_flags() {
        let mut loc = LocationCoordinator::new();
        let mut backend = Recorder::default();
        loc.handle_event(
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedWhenInUse),
            &mut backend,
        );
        loc.handle_event(LocationEvent::Updated(HERE), &mut backend);
        loc.reset();
        assert_eq!(loc.fix(), None);
        assert!(loc.request_fix_once(&mut backend));
    }

    #[test]
    fn configured_backend_reports_position() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = ConfiguredLocation::new(
            LocationConfig {
                authorization: Authorization::AuthorizedAlways,
                latitude: Some(HERE.latitude),
                longitude: Some(HERE.longitude),
            },
            tx,
        );
        backend.announce();
        backend.request_one_time_location();
        assert_eq!(
            rx.try_recv().unwrap(),
            LocationEvent::AuthorizationChanged(Authorization::AuthorizedAlways)
        );
        assert_eq!(rx.try_recv().unwrap(), LocationEvent::Updated(HERE));
    }

    #[test]
    fn configured_backend_without_position_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backend = ConfiguredLocation::new(LocationConfig::default(), tx);
        backend.request_one_time_location();
        assert!(matches!(rx.try_recv().unwrap(), LocationEvent::Failed(_)));
        backend.request_authorization();
        assert_eq!(
            rx.try_recv().unwrap(),
            LocationEvent::AuthorizationChanged(Authorization::Denied)
        );
    }
}
