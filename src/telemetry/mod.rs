//! # Telemetry Module
//!
//! Turns notification payloads from the sensor node into [`Reading`]s and
//! carries them to the remote collector.
//!
//! - [`decode`] - comma separated text frame → `Reading`
//! - [`submission`] - single-slot gate pairing a reading with a location fix
//! - [`collector`] - submission boundary and the HTTP collector client
//!
//! ## Frame format
//!
//! The firmware pushes one UTF-8 line per sample:
//!
//! ```text
//! 23, 41, 1200, -3, 12, 988
//! temp humidity gas accelX accelY accelZ
//! ```
//!
//! Short or noisy rows are accepted; whatever parses as an integer is kept.

use crate::logutil::payload_preview;
use crate::metrics;
use crate::radio::PeerIdentity;
use log::debug;

pub mod collector;
pub mod submission;

/// Number of sensor slots the collector expects.
pub const SENSOR_SLOTS: usize = 6;

/// One decoded telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub peer_id: String,
    pub peer_name: String,
    pub values: Vec<i64>,
    /// Frame text as received, for the event log.
    pub raw: String,
}

impl Reading {
    /// First six values, zero-filled when the frame was short.
    ///
    /// A zero here can mean "sensor reported 0" or "slot missing"; the
    /// collector cannot tell the two apart.
    pub fn padded(&self) -> [i64; SENSOR_SLOTS] {
        let mut out = [0; SENSOR_SLOTS];
        for (slot, v) in out.iter_mut().zip(self.values.iter()) {
            *slot = *v;
        }
        out
    }
}

/// Decode a notification payload. Non UTF-8 frames yield `None`.
pub fn decode(peer: &PeerIdentity, payload: &[u8]) -> Option<Reading> {
    let text = match std::str::from_utf8(payload) {
        Ok(t) => t,
        Err(e) => {
            debug!(
                "Dropping non UTF-8 frame from {} ({}): {}",
                peer.id,
                e,
                payload_preview(payload)
            );
            metrics::inc_frames_dropped();
            return None;
        }
    };
    let values = parse_values(text);
    metrics::inc_readings_decoded();
    Some(Reading {
        peer_id: peer.id.to_string(),
        peer_name: if peer.advertised_name.is_empty() {
            "Unknown".to_string()
        } else {
            peer.advertised_name.clone()
        },
        values,
        raw: text.to_string(),
    })
}

fn parse_values(text: &str) -> Vec<i64> {
    text.split(',')
        .filter_map(|tok| tok.trim().parse::<i64>().ok())
        .collect()
}
