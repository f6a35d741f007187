//! # Monitor Module
//!
//! Ties the radio session, the location coordinator and the submission gate
//! together for one sensor node.
//!
//! - [`node`] - [`NodeMonitor`], the single owner of per-node state
//! - [`sink`] - ordered event log and status line for the front-end
//! - [`runtime`] - channel wiring, the event loop and the terminal front-end
//!
//! ## Data flow
//!
//! ```text
//! notification ──▶ decode ──▶ Reading ──┐
//!                                       ├──▶ SubmissionGate ──▶ Submitter ──▶ outcome
//! location request ──▶ GeoFix ──────────┘
//! ```
//!
//! A reading that arrives before a fix waits in the gate; the first reading
//! also triggers the one-shot location request. Only one record is in flight
//! at a time.

pub mod node;
pub mod runtime;
pub mod sink;

pub use node::{NodeEvent, NodeMonitor};
pub use sink::{EventSink, SinkEvent};
