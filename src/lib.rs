//! # Terralog - Durable Field Telemetry Node
//!
//! Terralog samples environmental sensors on a fixed cadence, records every
//! reading durably, and forwards readings to an MQTT broker over links that
//! are allowed to be bad. The interesting part is not sensing or transport
//! (both sit behind small collaborator traits) but reconciling a periodic
//! producer of records with an intermittently available consumer without
//! losing data, using nothing but flat append-only files.
//!
//! ## Features
//!
//! - **Write-first buffering**: every reading hits the disk before any
//!   delivery is attempted; the broker confirming a record is the only
//!   thing that removes it.
//! - **Crash-safe removal**: queue rewrites go through a temp file and an
//!   atomic rename, so power loss mid-operation leaves either the old or
//!   the new state, never a torn file.
//! - **Connectivity supervision**: independent exponential-backoff state
//!   machines for the local network and the broker session, with a retry
//!   ceiling that turns a hopeless link into a process restart.
//! - **Bounded reconciliation**: backlog flushes in FIFO order, stopping at
//!   the first failure, at most one bounded batch per tick.
//! - **Watchdog**: a stalled control loop terminates the process so the
//!   service manager can bring it back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use terralog::config::Config;
//! use terralog::node::Node;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("terralog.toml").await?;
//!     let mut node = Node::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`node`] - the orchestration loop, payload builders, reconciler
//! - [`storage`] - buffer queue and archive log persistence
//! - [`link`] - per-link connection state machines and backoff
//! - [`transport`] - broker session (MQTT) behind a capability trait
//! - [`sensors`] - reading model, bounds validation, simulated source
//! - [`clock`] - wall-clock/uptime source with unsynced fallbacks
//! - [`config`] - configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Node loop     │ ← cadence, watchdog, composition
//! └─────────────────┘
//!     │           │
//! ┌─────────┐ ┌─────────────┐
//! │ Storage │ │ Link + MQTT │ ← durability / delivery
//! └─────────┘ └─────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod link;
pub mod logutil;
pub mod node;
pub mod sensors;
pub mod storage;
pub mod transport;
