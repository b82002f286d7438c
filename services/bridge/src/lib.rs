//! Live Bridge API Library Crate
//!
//! This library contains all the core logic for the Live Bridge service,
//! including the application state, configuration, diagnostic probes and
//! handlers, WebSocket relay logic, and routing. The `bridge` binary is a
//! thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod probes;
pub mod router;
pub mod state;
pub mod ws;
