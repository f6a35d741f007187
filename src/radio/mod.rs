//! # Radio Module
//!
//! Everything that touches the short-range radio link to the sensor node.
//!
//! ## Components
//!
//! - [`session`] - connection lifecycle state machine for one target peer
//! - [`discovery`] - advertisement filter and deduplicating peer registry (browse mode)
//! - `btle` - btleplug-backed central adapter (feature `ble`)
//!
//! ## Boundary
//!
//! The state machine never talks to a Bluetooth stack directly. It issues
//! [`RadioCommand`]s through a [`RadioCentral`] and consumes [`RadioEvent`]s
//! delivered, one at a time, by the monitor's event loop:
//!
//! ```text
//!  RadioSession ──RadioCommand──▶ RadioCentral (btleplug task, test recorder, ...)
//!       ▲                                  │
//!       └──────────RadioEvent──────────────┘
//! ```
//!
//! Services and characteristics are referred to by [`ServiceHandle`] and
//! [`CharHandle`], indices into tables owned by the adapter.

use log::warn;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod discovery;
pub mod session;

#[cfg(feature = "ble")]
pub mod btle;

pub use discovery::{DiscoveredPeer, DiscoveryRegistry};
pub use session::{RadioSession, SessionEffect};

/// UART-over-BLE service exposed by the sensor firmware.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
/// Characteristic we write commands to.
pub const UART_WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
/// Characteristic the node pushes telemetry on.
pub const UART_NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Device-family substring used to filter advertisements.
pub const DEFAULT_NAME_FILTER: &str = "RAK4631";

/// Opaque, stable identifier of a physical peer as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId::new(s)
    }
}

/// A peer as first seen on the air. Identity is the `id`; names may collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub advertised_name: String,
}

impl PeerIdentity {
    pub fn new(id: impl Into<PeerId>, advertised_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertised_name: advertised_name.into(),
        }
    }

    /// Name used in status lines; falls back to "device" like the platform UI did.
    pub fn display_name(&self) -> &str {
        if self.advertised_name.is_empty() {
            "device"
        } else {
            &self.advertised_name
        }
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

/// Adapter power / availability as reported by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Unknown,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

impl PowerState {
    /// Human readable status line for the presentation layer.
    pub fn status_text(self) -> String {
        match self {
            PowerState::PoweredOn => "Bluetooth ready.".to_string(),
            PowerState::PoweredOff => "Please turn Bluetooth on.".to_string(),
            PowerState::Unauthorized => "Bluetooth permission denied.".to_string(),
            PowerState::Unsupported => "Bluetooth unsupported on this device.".to_string(),
            PowerState::Unknown => format!("Bluetooth unavailable (state: {:?}).", self),
        }
    }
}

/// Index of a discovered service in the adapter's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(pub u32);

/// Index of a discovered characteristic in the adapter's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub handle: ServiceHandle,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub handle: CharHandle,
    pub uuid: Uuid,
}

/// Raw advertising fields that accompany a sighting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<Uuid>,
}

/// Events produced by a radio adapter, delivered serially to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    PowerStateChanged(PowerState),
    AdvertisementSeen {
        peer: PeerId,
        /// Name the peer reports for itself (GAP device name), if known.
        name: Option<String>,
        advertisement: AdvertisementData,
    },
    Connected(PeerId),
    ConnectFailed {
        peer: PeerId,
        error: String,
    },
    Disconnected {
        peer: PeerId,
        error: Option<String>,
    },
    ServicesDiscovered {
        peer: PeerId,
        result: Result<Vec<GattService>, String>,
    },
    CharacteristicsDiscovered {
        peer: PeerId,
        service: ServiceHandle,
        result: Result<Vec<GattCharacteristic>, String>,
    },
    ValueUpdated {
        characteristic: CharHandle,
        result: Result<Vec<u8>, String>,
    },
    /// Subscribing to notifications failed; no telemetry will arrive.
    NotifyFailed {
        peer: PeerId,
        characteristic: CharHandle,
        error: String,
    },
    WriteCompleted {
        characteristic: CharHandle,
        result: Result<(), String>,
    },
}

/// Requests issued to the radio adapter. None of them block the caller;
/// completions come back as [`RadioEvent`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCommand {
    SetScanning(bool),
    Connect(PeerId),
    Disconnect(PeerId),
    DiscoverServices {
        peer: PeerId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peer: PeerId,
        service: ServiceHandle,
        characteristics: Vec<Uuid>,
    },
    WriteValue {
        peer: PeerId,
        characteristic: CharHandle,
        bytes: Vec<u8>,
    },
    SetNotify {
        peer: PeerId,
        characteristic: CharHandle,
        enabled: bool,
    },
    /// Stop the adapter task.
    Shutdown,
}

/// Sink for radio commands. Implementations must return immediately.
pub trait RadioCentral {
    fn send_command(&mut self, command: RadioCommand);
}

impl RadioCentral for mpsc::UnboundedSender<RadioCommand> {
    fn send_command(&mut self, command: RadioCommand) {
        if let Err(e) = self.send(command) {
            warn!("Radio adapter gone, dropping command {:?}", e.0);
        }
    }
}

/// Recording central used in tests and dry runs.
impl RadioCentral for Vec<RadioCommand> {
    fn send_command(&mut self, command: RadioCommand) {
        self.push(command);
    }
}

/// Radio failure taxonomy. Only `NotConnected` is ever returned to callers;
/// the rest describe what the session logs while it heals itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio unavailable: {0:?}")]
    Unavailable(PowerState),
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("link lost: {0}")]
    LinkLost(String),
    #[error("missing {0}")]
    ServiceOrCharacteristicMissing(String),
    #[error("no active connection")]
    NotConnected,
}
