//! Tether - automatic camera acquisition for photo booths.
//!
//! This library exposes the core of the `tether` binary for use in tests and
//! embedding applications.
//!
//! # Modules
//!
//! - `camera`: gphoto2 gateway, output parsers, folder discovery, mock gateway
//! - `acquisition`: connection state machine, download ledger and pipeline
//! - `events`: `status` / `photo` / `error` events and their sinks
//! - `config`: configuration file handling
//! - `server`: HTTP status/control surface
//! - `error`: error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod acquisition;
pub mod camera;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod server;
