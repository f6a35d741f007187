//! Ordered event log and status line shared with the presentation layer.

use crate::logutil::escape_log;
use log::{debug, info};
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Lines kept in memory before the oldest are dropped.
pub const DEFAULT_RETENTION: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Line(String),
    Status(String),
}

#[derive(Debug)]
pub struct EventSink {
    lines: VecDeque<String>,
    retention: usize,
    appended: u64,
    status: String,
    subscriber: Option<mpsc::UnboundedSender<SinkEvent>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            retention: retention.max(1),
            appended: 0,
            status: String::new(),
            subscriber: None,
        }
    }

    /// Forward every future line and status change to `tx`.
    pub fn subscribe(&mut self, tx: mpsc::UnboundedSender<SinkEvent>) {
        self.subscriber = Some(tx);
    }

    pub fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", escape_log(&line));
        if self.lines.len() == self.retention {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        self.appended += 1;
        self.notify(SinkEvent::Line(line));
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        if status == self.status {
            return;
        }
        debug!("Status: {}", status);
        self.status = status.clone();
        self.notify(SinkEvent::Status(status));
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Retained lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last_line(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    /// Total lines ever appended, including evicted ones.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    fn notify(&mut self, event: SinkEvent) {
        if let Some(tx) = &self.subscriber {
            if tx.send(event).is_err() {
                debug!("Sink subscriber gone");
                self.subscriber = None;
            }
        }
    }
}
