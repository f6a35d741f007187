//! Process-wide counters for the telemetry pipeline.
//! Logged at shutdown; cheap enough to bump on every frame.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAMES_DROPPED: AtomicU64 = AtomicU64::new(0);
static READINGS_DECODED: AtomicU64 = AtomicU64::new(0);
static RECONNECTS: AtomicU64 = AtomicU64::new(0);
static SUBMISSIONS_OK: AtomicU64 = AtomicU64::new(0);
static SUBMISSIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static SUBMISSIONS_UNKNOWN: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_dropped() {
    FRAMES_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_readings_decoded() {
    READINGS_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconnects() {
    RECONNECTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_submissions_ok() {
    SUBMISSIONS_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_submissions_failed() {
    SUBMISSIONS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_submissions_unknown() {
    SUBMISSIONS_UNKNOWN.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub readings_decoded: u64,
    pub reconnects: u64,
    pub submissions_ok: u64,
    pub submissions_failed: u64,
    pub submissions_unknown: u64,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames={} dropped={} readings={} reconnects={} posts ok={} failed={} unknown={}",
            self.frames_received,
            self.frames_dropped,
            self.readings_decoded,
            self.reconnects,
            self.submissions_ok,
            self.submissions_failed,
            self.submissions_unknown
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        frames_dropped: FRAMES_DROPPED.load(Ordering::Relaxed),
        readings_decoded: READINGS_DECODED.load(Ordering::Relaxed),
        reconnects: RECONNECTS.load(Ordering::Relaxed),
        submissions_ok: SUBMISSIONS_OK.load(Ordering::Relaxed),
        submissions_failed: SUBMISSIONS_FAILED.load(Ordering::Relaxed),
        submissions_unknown: SUBMISSIONS_UNKNOWN.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are global and tests run in parallel, so only assert growth.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_frames_received();
        inc_submissions_unknown();
        let after = snapshot();
        assert!(after.frames_received > before.frames_received);
        assert!(after.submissions_unknown > before.submissions_unknown);
        assert!(after.to_string().contains("frames="));
    }
}
