//! btleplug-backed [`RadioCentral`](super::RadioCentral) adapter.
//!
//! The adapter runs as its own task. It receives [`RadioCommand`]s on a
//! channel, drives the host Bluetooth stack and reports everything back as
//! [`RadioEvent`]s. Services and characteristics found on the peer are kept
//! in tables owned here; the session only ever sees their indices.

use super::{
    AdvertisementData, CharHandle, GattCharacteristic, GattService, PeerId, PowerState,
    RadioCommand, RadioEvent, ServiceHandle,
};
use anyhow::{anyhow, Result};
use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct BtleCentral {
    adapter: Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
    peers: HashMap<PeerId, PeripheralId>,
    services: Vec<Service>,
    characteristics: Vec<Characteristic>,
    pumps: Vec<JoinHandle<()>>,
}

impl BtleCentral {
    /// Open host adapter number `index`.
    pub async fn open(index: usize, events: mpsc::UnboundedSender<RadioEvent>) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| anyhow!("Bluetooth unavailable: {}", e))?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("No Bluetooth adapter #{} ({} found)", index, adapters.len()))?;
        match adapter.adapter_info().await {
            Ok(desc) => info!("Using Bluetooth adapter {}", desc),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }
        Ok(Self {
            adapter,
            events,
            peers: HashMap::new(),
            services: Vec::new(),
            characteristics: Vec::new(),
            pumps: Vec::new(),
        })
    }

    /// Serve commands until `Shutdown` or the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RadioCommand>) -> Result<()> {
        let mut central_events = self.adapter.events().await?;
        let power = match self.adapter.adapter_state().await {
            Ok(state) => power_state(state),
            Err(e) => {
                debug!("Adapter state unavailable ({}), assuming powered on", e);
                PowerState::PoweredOn
            }
        };
        self.emit(RadioEvent::PowerStateChanged(power));

        loop {
            tokio::select! {
                event = central_events.next() => {
                    match event {
                        Some(event) => self.on_central_event(event).await,
                        None => {
                            warn!("Bluetooth event stream ended");
                            break;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(RadioCommand::Shutdown) | None => break,
                        Some(command) => self.execute(command).await,
                    }
                }
            }
        }

        self.stop_pumps();
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan on exit: {}", e);
        }
        debug!("Bluetooth adapter task stopped");
        Ok(())
    }

    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Radio event dropped, monitor gone");
        }
    }

    async fn on_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::StateUpdate(state) => {
                self.emit(RadioEvent::PowerStateChanged(power_state(state)));
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.on_sighting(id).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                let peer = PeerId::new(id.to_string());
                if self.peers.contains_key(&peer) {
                    self.stop_pumps();
                    self.emit(RadioEvent::Disconnected { peer, error: None });
                }
            }
            other => debug!("Bluetooth event {:?}", other),
        }
    }

    async fn on_sighting(&mut self, id: PeripheralId) {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                debug!("Sighting of {} vanished: {}", id, e);
                return;
            }
        };
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            Ok(None) => return,
            Err(e) => {
                debug!("No properties for {}: {}", id, e);
                return;
            }
        };
        let peer = PeerId::new(id.to_string());
        self.peers.insert(peer.clone(), id);
        self.emit(RadioEvent::AdvertisementSeen {
            peer,
            name: None,
            advertisement: AdvertisementData {
                local_name: props.local_name,
                rssi: props.rssi,
                service_uuids: props.services,
            },
        });
    }

    /// Peers not seen in this run are looked up in the host's device cache.
    async fn peripheral(&mut self, peer: &PeerId) -> Result<Peripheral> {
        if let Some(id) = self.peers.get(peer) {
            return Ok(self.adapter.peripheral(id).await?);
        }
        let known = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == peer.as_str())
            .ok_or_else(|| anyhow!("unknown peer {}", peer))?;
        debug!("Found {} in the host device cache", peer);
        self.peers.insert(peer.clone(), known.id());
        Ok(known)
    }

    async fn execute(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::SetScanning(true) => {
                if let Err(e) = self.adapter.start_scan(ScanFilter::default()).await {
                    warn!("Failed to start scan: {}", e);
                }
            }
            RadioCommand::SetScanning(false) => {
                if let Err(e) = self.adapter.stop_scan().await {
                    debug!("Failed to stop scan: {}", e);
                }
            }
            RadioCommand::Connect(peer) => self.connect(peer).await,
            RadioCommand::Disconnect(peer) => {
                self.stop_pumps();
                let result: Result<()> = match self.peripheral(&peer).await {
                    Ok(p) => p.disconnect().await.map_err(Into::into),
                    Err(e) => Err(e),
                };
                if let Some(event) = disconnect_report(peer, result) {
                    self.emit(event);
                }
            }
            RadioCommand::DiscoverServices { peer, services } => {
                let result = self
                    .discover_services(&peer, &services)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::ServicesDiscovered { peer, result });
            }
            RadioCommand::DiscoverCharacteristics {
                peer,
                service,
                characteristics,
            } => {
                let result = self
                    .discover_characteristics(service, &characteristics)
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    peer,
                    service,
                    result,
                });
            }
            RadioCommand::WriteValue {
                peer,
                characteristic,
                bytes,
            } => {
                let result = self
                    .write(&peer, characteristic, &bytes)
                    .await
                    .map_err(|e| e.to_string());
                self.emit(RadioEvent::WriteCompleted {
                    characteristic,
                    result,
                });
            }
            RadioCommand::SetNotify {
                peer,
                characteristic,
                enabled,
            } => {
                if let Err(e) = self.set_notify(&peer, characteristic, enabled).await {
                    self.emit(RadioEvent::NotifyFailed {
                        peer,
                        characteristic,
                        error: e.to_string(),
                    });
                }
            }
            RadioCommand::Shutdown => {}
        }
    }

    /// Connecting can take a while; it runs on its own task and reports back.
    async fn connect(&mut self, peer: PeerId) {
        self.services.clear();
        self.characteristics.clear();
        self.stop_pumps();
        let peripheral = match self.peripheral(&peer).await {
            Ok(p) => p,
            Err(e) => {
                self.emit(RadioEvent::ConnectFailed {
                    peer,
                    error: e.to_string(),
                });
                return;
            }
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => RadioEvent::Connected(peer),
                Err(e) => RadioEvent::ConnectFailed {
                    peer,
                    error: e.to_string(),
                },
            };
            if events.send(event).is_err() {
                debug!("Connect result dropped, monitor gone");
            }
        });
    }

    async fn discover_services(&mut self, peer: &PeerId, wanted: &[Uuid]) -> Result<Vec<GattService>> {
        let peripheral = self.peripheral(peer).await?;
        peripheral.discover_services().await?;
        let mut found = Vec::new();
        for service in peripheral.services() {
            if !wanted.is_empty() && !wanted.contains(&service.uuid) {
                continue;
            }
            let handle = ServiceHandle(self.services.len() as u32);
            found.push(GattService {
                handle,
                uuid: service.uuid,
            });
            self.services.push(service);
        }
        Ok(found)
    }

    fn discover_characteristics(
        &mut self,
        service: ServiceHandle,
        wanted: &[Uuid],
    ) -> Result<Vec<GattCharacteristic>> {
        let service = self
            .services
            .get(service.0 as usize)
            .ok_or_else(|| anyhow!("stale service handle {:?}", service))?;
        let mut found = Vec::new();
        let mut added = Vec::new();
        for ch in &service.characteristics {
            if !wanted.is_empty() && !wanted.contains(&ch.uuid) {
                continue;
            }
            let handle = CharHandle((self.characteristics.len() + added.len()) as u32);
            found.push(GattCharacteristic {
                handle,
                uuid: ch.uuid,
            });
            added.push(ch.clone());
        }
        self.characteristics.extend(added);
        Ok(found)
    }

    fn characteristic(&self, handle: CharHandle) -> Result<Characteristic> {
        self.characteristics
            .get(handle.0 as usize)
            .cloned()
            .ok_or_else(|| anyhow!("stale characteristic handle {:?}", handle))
    }

    async fn write(&mut self, peer: &PeerId, handle: CharHandle, bytes: &[u8]) -> Result<()> {
        let ch = self.characteristic(handle)?;
        let peripheral = self.peripheral(peer).await?;
        peripheral.write(&ch, bytes, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn set_notify(&mut self, peer: &PeerId, handle: CharHandle, enabled: bool) -> Result<()> {
        let ch = self.characteristic(handle)?;
        let peripheral = self.peripheral(peer).await?;
        if !enabled {
            peripheral.unsubscribe(&ch).await?;
            return Ok(());
        }
        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&ch).await?;
        let events = self.events.clone();
        let uuid = ch.uuid;
        self.pumps.push(tokio::spawn(async move {
            while let Some(note) = notifications.next().await {
                if note.uuid != uuid {
                    continue;
                }
                let event = RadioEvent::ValueUpdated {
                    characteristic: handle,
                    result: Ok(note.value),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn stop_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

/// A successful disconnect is reported later by the host as
/// `DeviceDisconnected`. A failed one never will be, so report it here or the
/// session waits forever.
fn disconnect_report(peer: PeerId, result: Result<()>) -> Option<RadioEvent> {
    match result {
        Ok(()) => None,
        Err(e) => {
            debug!("Disconnect from {} failed: {}", peer, e);
            Some(RadioEvent::Disconnected {
                peer,
                error: Some(format!("Disconnect failed: {}", e)),
            })
        }
    }
}

fn power_state(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}
