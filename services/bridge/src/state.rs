//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources passed to handlers and relay sessions.

use crate::config::Config;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}
