//! WebSocket Relay
//!
//! This module contains the core logic for relaying browser sessions to the
//! live inference service. It is structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON-based message format for client-relay communication.
//! - `relay`: The per-connection session state machine (queueing, translation, teardown).
//! - `session`: Manages the WebSocket connection lifecycle, from upgrade to termination.

pub mod protocol;
pub mod relay;
pub mod session;

pub use session::ws_handler;
