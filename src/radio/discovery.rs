//! Advertisement filter and peer registry used in browse mode.
//!
//! Every sighting is offered to [`DiscoveryRegistry::observe`]. A peer is
//! listed once, under the first name it was seen with; later sightings of the
//! same identifier are ignored (name and RSSI are not refreshed).

use super::{AdvertisementData, PeerId, PeerIdentity};
use log::debug;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeer {
    pub identity: PeerIdentity,
    pub rssi: Option<i16>,
}

#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    required: String,
    peers: Vec<DiscoveredPeer>,
    index: HashMap<PeerId, usize>,
}

/// Self-reported name, else advertised local name, else empty.
pub fn display_name(name: Option<&str>, advertisement: &AdvertisementData) -> String {
    name.or(advertisement.local_name.as_deref())
        .unwrap_or("")
        .to_string()
}

impl DiscoveryRegistry {
    pub fn new(required: impl Into<String>) -> Self {
        Self {
            required: required.into(),
            ..Default::default()
        }
    }

    /// Record a sighting. Returns the entry when it is new to the registry.
    pub fn observe(
        &mut self,
        peer: &PeerId,
        name: Option<&str>,
        advertisement: &AdvertisementData,
    ) -> Option<&DiscoveredPeer> {
        let name = display_name(name, advertisement);
        if !name.contains(self.required.as_str()) {
            return None;
        }
        if self.index.contains_key(peer) {
            return None;
        }
        debug!("Registry: new peer {} '{}'", peer, name);
        self.index.insert(peer.clone(), self.peers.len());
        self.peers.push(DiscoveredPeer {
            identity: PeerIdentity::new(peer.clone(), name),
            rssi: advertisement.rssi,
        });
        self.peers.last()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&DiscoveredPeer> {
        self.index.get(peer).map(|&i| &self.peers[i])
    }

    /// Entries in first-seen order.
    pub fn peers(&self) -> &[DiscoveredPeer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
