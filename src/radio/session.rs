//! Connection lifecycle for a single target peer.
//!
//! The session is a plain synchronous state machine: every call takes the
//! current event, issues zero or more [`RadioCommand`]s and returns the
//! [`SessionEffect`]s the monitor should apply (state changes, status and log
//! lines, notification payloads). It never blocks and never retries on a
//! timer; recovery is driven purely by the next event.
//!
//! ```text
//! Idle ──powered on──▶ Scanning ──target advertised──▶ Connecting
//!   Idle ──powered on, cached connect──▶ Connecting
//!   Connecting ──connected──▶ Connected ──▶ DiscoveringServices
//!   Connecting ──connect failed──▶ Scanning
//!   DiscoveringServices ──UART found──▶ DiscoveringCharacteristics
//!   DiscoveringCharacteristics ──TX+RX found──▶ Ready
//!   any linked state ──link lost──▶ Disconnected ──▶ Scanning
//!   Ready ──subscription failed──▶ Disconnected
//! ```

use super::{
    GattCharacteristic, GattService, PeerId, PeerIdentity, PowerState, RadioCentral, RadioCommand,
    RadioError, RadioEvent, ServiceHandle, CharHandle, UART_NOTIFY_CHAR_UUID, UART_SERVICE_UUID,
    UART_WRITE_CHAR_UUID,
};
use crate::metrics;
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnected,
}

impl SessionState {
    /// States in which the adapter may hold a link (or a pending link) to the target.
    pub fn holds_link(self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Connected
                | SessionState::DiscoveringServices
                | SessionState::DiscoveringCharacteristics
                | SessionState::Ready
        )
    }
}

/// Output of the session for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    StateChanged(SessionState),
    /// Replace the status line.
    Status(String),
    /// Append to the event log.
    Log(String),
    /// Raw notification payload from the notify characteristic.
    Payload(Vec<u8>),
}

pub struct RadioSession {
    target: PeerIdentity,
    state: SessionState,
    power: PowerState,
    active: bool,
    scanning: bool,
    cached_connect: bool,
    service: Option<ServiceHandle>,
    write_char: Option<CharHandle>,
    notify_char: Option<CharHandle>,
    effects: Vec<SessionEffect>,
}

impl RadioSession {
    pub fn new(target: PeerIdentity) -> Self {
        Self {
            target,
            state: SessionState::Idle,
            power: PowerState::Unknown,
            active: false,
            scanning: false,
            cached_connect: false,
            service: None,
            write_char: None,
            notify_char: None,
            effects: Vec::new(),
        }
    }

    pub fn target(&self) -> &PeerIdentity {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// On the first power-on, ask the adapter for the target directly
    /// instead of scanning. A failed attempt falls back to the scan.
    pub fn set_cached_connect(&mut self, enabled: bool) {
        self.cached_connect = enabled;
    }

    /// Arm the session. Nothing is sent to the radio until it reports power.
    pub fn start(&mut self) -> Vec<SessionEffect> {
        self.active = true;
        self.status("Initializing Bluetooth...".to_string());
        self.drain()
    }

    pub fn handle_event(
        &mut self,
        event: RadioEvent,
        central: &mut impl RadioCentral,
    ) -> Vec<SessionEffect> {
        if !self.active {
            debug!("Session inactive, ignoring {:?}", event);
            return Vec::new();
        }
        match event {
            RadioEvent::PowerStateChanged(power) => self.on_power(power, central),
            RadioEvent::AdvertisementSeen {
                peer,
                name,
                advertisement,
            } => {
                let name = name.or(advertisement.local_name);
                self.on_advertisement(peer, name, central)
            }
            RadioEvent::Connected(peer) => self.on_connected(peer, central),
            RadioEvent::ConnectFailed { peer, error } => self.on_connect_failed(peer, error, central),
            RadioEvent::Disconnected { peer, error } => self.on_disconnected(peer, error, central),
            RadioEvent::ServicesDiscovered { peer, result } => {
                self.on_services(peer, result, central)
            }
            RadioEvent::CharacteristicsDiscovered {
                peer,
                service,
                result,
            } => self.on_characteristics(peer, service, result, central),
            RadioEvent::ValueUpdated {
                characteristic,
                result,
            } => self.on_value(characteristic, result),
            RadioEvent::NotifyFailed {
                peer,
                characteristic,
                error,
            } => self.on_notify_failed(peer, characteristic, error, central),
            RadioEvent::WriteCompleted {
                characteristic,
                result,
            } => {
                if let Err(e) = result {
                    self.log(format!("⚠️ Write failed: {}", e));
                } else {
                    debug!("Write to {:?} acknowledged", characteristic);
                }
            }
        }
        self.drain()
    }

    /// Send a command to the peer. Completion arrives later as `WriteCompleted`.
    pub fn write(&mut self, bytes: &[u8], central: &mut impl RadioCentral) -> Result<(), RadioError> {
        let characteristic = match (self.state, self.write_char) {
            (SessionState::Ready, Some(ch)) => ch,
            _ => return Err(RadioError::NotConnected),
        };
        central.send_command(RadioCommand::WriteValue {
            peer: self.target.id.clone(),
            characteristic,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    /// Stop scanning, drop the link and go quiet. Later events are ignored.
    pub fn teardown(&mut self, central: &mut impl RadioCentral) -> Vec<SessionEffect> {
        if !self.active {
            return Vec::new();
        }
        if self.scanning {
            central.send_command(RadioCommand::SetScanning(false));
            self.scanning = false;
        }
        if self.state.holds_link() || self.state == SessionState::Disconnected {
            central.send_command(RadioCommand::Disconnect(self.target.id.clone()));
        }
        self.clear_handles();
        self.transition(SessionState::Idle);
        self.active = false;
        info!("Radio session for {} torn down", self.target.id);
        self.drain()
    }

    fn on_power(&mut self, power: PowerState, central: &mut impl RadioCentral) {
        self.power = power;
        if power == PowerState::PoweredOn {
            match self.state {
                SessionState::Idle if self.cached_connect => self.connect_cached(central),
                SessionState::Idle | SessionState::Scanning => self.enter_scanning(central),
                _ => {}
            }
            return;
        }
        warn!("Radio not usable: {:?}", power);
        self.status(power.status_text());
        // The adapter dropped any scan on its own.
        self.scanning = false;
        if self.state.holds_link() {
            self.link_lost(RadioError::Unavailable(power).to_string(), central);
        }
    }

    fn on_advertisement(
        &mut self,
        peer: PeerId,
        name: Option<String>,
        central: &mut impl RadioCentral,
    ) {
        if self.state != SessionState::Scanning || peer != self.target.id {
            return;
        }
        if self.scanning {
            central.send_command(RadioCommand::SetScanning(false));
            self.scanning = false;
        }
        self.transition(SessionState::Connecting);
        let label = name.unwrap_or_else(|| self.target.display_name().to_string());
        self.status(format!("Connecting to {}...", label));
        central.send_command(RadioCommand::Connect(peer));
    }

    fn connect_cached(&mut self, central: &mut impl RadioCentral) {
        debug!("Trying cached peer {} before scanning", self.target.id);
        self.transition(SessionState::Connecting);
        self.status(format!("Connecting to {}...", self.target.display_name()));
        central.send_command(RadioCommand::Connect(self.target.id.clone()));
    }

    fn on_connected(&mut self, peer: PeerId, central: &mut impl RadioCentral) {
        if peer != self.target.id || self.state != SessionState::Connecting {
            debug!("Ignoring connect of {} in {:?}", peer, self.state);
            return;
        }
        self.transition(SessionState::Connected);
        self.log_status("Connected. Discovering services...".to_string());
        self.transition(SessionState::DiscoveringServices);
        central.send_command(RadioCommand::DiscoverServices {
            peer,
            services: vec![UART_SERVICE_UUID],
        });
    }

    fn on_connect_failed(&mut self, peer: PeerId, error: String, central: &mut impl RadioCentral) {
        if peer != self.target.id || self.state != SessionState::Connecting {
            return;
        }
        debug!("{}", RadioError::ConnectFailed(error.clone()));
        self.log(format!("⚠️ Failed to connect: {}.", error));
        metrics::inc_reconnects();
        self.enter_scanning(central);
    }

    fn on_disconnected(
        &mut self,
        peer: PeerId,
        error: Option<String>,
        central: &mut impl RadioCentral,
    ) {
        if peer != self.target.id {
            return;
        }
        if !(self.state.holds_link() || self.state == SessionState::Disconnected) {
            debug!("Disconnect of {} while {:?}", peer, self.state);
            return;
        }
        let reason = error.unwrap_or_else(|| "Disconnected".to_string());
        self.link_lost(reason, central);
    }

    fn on_services(
        &mut self,
        peer: PeerId,
        result: Result<Vec<GattService>, String>,
        central: &mut impl RadioCentral,
    ) {
        if peer != self.target.id || self.state != SessionState::DiscoveringServices {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                self.log(format!("⚠️ Service discovery failed: {}", e));
                self.fail_discovery(central);
                return;
            }
        };
        let Some(uart) = services.iter().find(|s| s.uuid == UART_SERVICE_UUID) else {
            let missing = RadioError::ServiceOrCharacteristicMissing("UART service".to_string());
            self.log(format!("⚠️ Service discovery failed: {}", missing));
            self.fail_discovery(central);
            return;
        };
        self.service = Some(uart.handle);
        self.transition(SessionState::DiscoveringCharacteristics);
        central.send_command(RadioCommand::DiscoverCharacteristics {
            peer,
            service: uart.handle,
            characteristics: vec![UART_WRITE_CHAR_UUID, UART_NOTIFY_CHAR_UUID],
        });
    }

    fn on_characteristics(
        &mut self,
        peer: PeerId,
        service: ServiceHandle,
        result: Result<Vec<GattCharacteristic>, String>,
        central: &mut impl RadioCentral,
    ) {
        if peer != self.target.id
            || self.state != SessionState::DiscoveringCharacteristics
            || self.service != Some(service)
        {
            return;
        }
        let characteristics = match result {
            Ok(chars) => chars,
            Err(e) => {
                self.log(format!("⚠️ Characteristic discovery failed: {}", e));
                self.fail_discovery(central);
                return;
            }
        };
        for ch in &characteristics {
            if ch.uuid == UART_WRITE_CHAR_UUID {
                self.write_char = Some(ch.handle);
                self.log("✅ TX ready".to_string());
            } else if ch.uuid == UART_NOTIFY_CHAR_UUID {
                self.notify_char = Some(ch.handle);
                central.send_command(RadioCommand::SetNotify {
                    peer: peer.clone(),
                    characteristic: ch.handle,
                    enabled: true,
                });
                self.log("✅ RX ready".to_string());
            }
        }
        match (self.write_char, self.notify_char) {
            (Some(_), Some(_)) => {
                self.transition(SessionState::Ready);
                self.status("Ready".to_string());
            }
            (tx, rx) => {
                let what = match (tx, rx) {
                    (None, None) => "TX and RX characteristics",
                    (None, _) => "TX characteristic",
                    _ => "RX characteristic",
                };
                let missing = RadioError::ServiceOrCharacteristicMissing(what.to_string());
                self.log(format!("⚠️ Characteristic discovery failed: {}", missing));
                self.fail_discovery(central);
            }
        }
    }

    fn on_value(&mut self, characteristic: CharHandle, result: Result<Vec<u8>, String>) {
        if self.state != SessionState::Ready || self.notify_char != Some(characteristic) {
            return;
        }
        match result {
            Ok(bytes) => {
                metrics::inc_frames_received();
                self.effects.push(SessionEffect::Payload(bytes));
            }
            Err(e) => self.log(format!("⚠️ Update failed: {}", e)),
        }
    }

    fn on_notify_failed(
        &mut self,
        peer: PeerId,
        characteristic: CharHandle,
        error: String,
        central: &mut impl RadioCentral,
    ) {
        if peer != self.target.id
            || self.notify_char != Some(characteristic)
            || !matches!(
                self.state,
                SessionState::DiscoveringCharacteristics | SessionState::Ready
            )
        {
            return;
        }
        self.log(format!("⚠️ Notification subscription failed: {}", error));
        self.fail_discovery(central);
    }

    /// Discovery dead end: park in `Disconnected` and let the link-down
    /// event restart the scan.
    fn fail_discovery(&mut self, central: &mut impl RadioCentral) {
        self.clear_handles();
        self.transition(SessionState::Disconnected);
        central.send_command(RadioCommand::Disconnect(self.target.id.clone()));
    }

    fn link_lost(&mut self, reason: String, central: &mut impl RadioCentral) {
        self.log(format!("ℹ️ {}.", reason));
        debug!("{}", RadioError::LinkLost(reason));
        self.clear_handles();
        self.transition(SessionState::Disconnected);
        metrics::inc_reconnects();
        self.enter_scanning(central);
    }

    fn enter_scanning(&mut self, central: &mut impl RadioCentral) {
        self.transition(SessionState::Scanning);
        if self.power != PowerState::PoweredOn {
            debug!("Scan deferred until the adapter powers on");
            return;
        }
        if !self.scanning {
            central.send_command(RadioCommand::SetScanning(true));
            self.scanning = true;
        }
        self.status(format!("Scanning for {}...", self.target.display_name()));
    }

    fn clear_handles(&mut self) {
        self.service = None;
        self.write_char = None;
        self.notify_char = None;
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            debug!("Session {:?} -> {:?}", self.state, to);
            self.state = to;
            self.effects.push(SessionEffect::StateChanged(to));
        }
    }

    fn status(&mut self, text: String) {
        self.effects.push(SessionEffect::Status(text));
    }

    fn log(&mut self, text: String) {
        self.effects.push(SessionEffect::Log(text));
    }

    fn log_status(&mut self, text: String) {
        self.log(text.clone());
        self.status(text);
    }

    fn drain(&mut self) -> Vec<SessionEffect> {
        std::mem::take(&mut self.effects)
    }
}
