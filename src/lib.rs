//! # Clampa - BLE sensor node bridge
//!
//! Clampa follows one battery-powered sensor node over Bluetooth Low Energy,
//! decodes the comma separated telemetry it pushes over a UART-style GATT
//! service, tags each reading with a location fix and posts it as JSON to a
//! web collector.
//!
//! ## Features
//!
//! - **Self-healing link**: the radio session rescans after every connect
//!   failure or link loss, without timers.
//! - **One-shot location**: a single fix is requested per session and reused
//!   for every reading.
//! - **Single-flight submission**: at most one record is in flight; newer
//!   readings replace older unsent ones.
//! - **Browse mode**: list nearby nodes whose advertised name matches a filter.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clampa::config::Config;
//! use clampa::monitor::runtime;
//! use clampa::radio::PeerIdentity;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let target = PeerIdentity::new("E4:5F:01:2A:9B:11", "RAK4631-Field-3");
//!     runtime::run_node(&config, target).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`radio`] - radio boundary, connection state machine, discovery registry
//! - [`telemetry`] - frame decoding, submission gate, HTTP collector
//! - [`location`] - one-shot location coordinator and backends
//! - [`monitor`] - per-node orchestration, event sink, async runtime
//! - [`config`] - configuration loading and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  NodeMonitor    │ ← single owner of session, location and gate state
//! └─────────────────┘
//!    │     │     │
//!  radio location collector  ← adapters, each reporting back as events
//! ```

pub mod config;
pub mod location;
pub mod logutil;
pub mod metrics;
pub mod monitor;
pub mod radio;
pub mod telemetry;
