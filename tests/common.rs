//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)] // each test crate uses a different subset

use clampa::location::LocationBackend;
use clampa::radio::{
    AdvertisementData, CharHandle, GattCharacteristic, GattService, PeerId, PowerState,
    RadioEvent, ServiceHandle, UART_NOTIFY_CHAR_UUID, UART_SERVICE_UUID, UART_WRITE_CHAR_UUID,
};

pub const PEER: &str = "E4:5F:01:2A:9B:11";
pub const NAME: &str = "RAK4631-Field-3";
pub const TX: CharHandle = CharHandle(4);
pub const RX: CharHandle = CharHandle(5);

pub fn peer() -> PeerId {
    PeerId::from(PEER)
}

pub fn advertisement(name: &str) -> RadioEvent {
    RadioEvent::AdvertisementSeen {
        peer: peer(),
        name: None,
        advertisement: AdvertisementData {
            local_name: Some(name.to_string()),
            rssi: Some(-61),
            service_uuids: vec![UART_SERVICE_UUID],
        },
    }
}

/// Events a healthy adapter produces from power-on to a subscribed link.
pub fn link_up_events() -> Vec<RadioEvent> {
    vec![
        RadioEvent::PowerStateChanged(PowerState::PoweredOn),
        advertisement(NAME),
        RadioEvent::Connected(peer()),
        RadioEvent::ServicesDiscovered {
            peer: peer(),
            result: Ok(vec![GattService {
                handle: ServiceHandle(0),
                uuid: UART_SERVICE_UUID,
            }]),
        },
        RadioEvent::CharacteristicsDiscovered {
            peer: peer(),
            service: ServiceHandle(0),
            result: Ok(vec![
                GattCharacteristic {
                    handle: TX,
                    uuid: UART_WRITE_CHAR_UUID,
                },
                GattCharacteristic {
                    handle: RX,
                    uuid: UART_NOTIFY_CHAR_UUID,
                },
            ]),
        },
    ]
}

pub fn frame(text: &str) -> RadioEvent {
    RadioEvent::ValueUpdated {
        characteristic: RX,
        result: Ok(text.as_bytes().to_vec()),
    }
}

/// Location backend that only counts requests.
#[derive(Default)]
pub struct CountingLocator {
    pub authorization_requests: usize,
    pub fix_requests: usize,
}

impl LocationBackend for CountingLocator {
    fn request_authorization(&mut self) {
        self.authorization_requests += 1;
    }

    fn request_one_time_location(&mut self) {
        self.fix_requests += 1;
    }
}
