//! Browse mode: scan once powered, list each matching peer once.
mod common;

use clampa::radio::discovery::DiscoveryRegistry;
use clampa::radio::{AdvertisementData, PowerState, RadioCommand, RadioEvent};
use clampa::monitor::runtime::browse_events;
use tokio::sync::mpsc;

fn sighting(peer: &str, name: Option<&str>, local_name: Option<&str>, rssi: i16) -> RadioEvent {
    RadioEvent::AdvertisementSeen {
        peer: peer.into(),
        name: name.map(str::to_string),
        advertisement: AdvertisementData {
            local_name: local_name.map(str::to_string),
            rssi: Some(rssi),
            service_uuids: Vec::new(),
        },
    }
}

#[tokio::test]
async fn lists_matching_peers_once() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tx.send(sighting("A", None, Some("RAK4631-Field-1"), -60)).unwrap();
    tx.send(RadioEvent::PowerStateChanged(PowerState::PoweredOn)).unwrap();
    tx.send(sighting("B", Some("RAK4631-Field-2"), Some("ignored"), -70)).unwrap();
    tx.send(sighting("B", Some("RAK4631-Field-2"), None, -40)).unwrap();
    tx.send(sighting("C", None, Some("Thermostat"), -50)).unwrap();
    tx.send(sighting("D", None, None, -50)).unwrap();
    tx.send(sighting("A", None, Some("RAK4631-Field-1"), -55)).unwrap();
    drop(tx);

    let mut registry = DiscoveryRegistry::new("RAK4631");
    let mut central: Vec<RadioCommand> = Vec::new();
    let mut listed = Vec::new();
    browse_events(
        &mut registry,
        &mut rx,
        &mut central,
        std::future::pending::<()>(),
        |peer| listed.push(peer.identity.display_name().to_string()),
    )
    .await
    .unwrap();

    assert_eq!(listed, vec!["RAK4631-Field-1", "RAK4631-Field-2"]);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get(&"B".into()).unwrap().rssi, Some(-70));
    assert_eq!(
        central,
        vec![RadioCommand::SetScanning(true), RadioCommand::SetScanning(false)]
    );
}

#[tokio::test]
async fn stops_on_shutdown_signal() {
    let (_tx, mut rx) = mpsc::unbounded_channel::<RadioEvent>();
    let mut registry = DiscoveryRegistry::new(common::NAME);
    let mut central: Vec<RadioCommand> = Vec::new();
    browse_events(&mut registry, &mut rx, &mut central, async {}, |_| {})
        .await
        .unwrap();
    assert!(registry.is_empty());
    assert!(central.is_empty());
}
