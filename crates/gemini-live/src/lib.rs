//! Client for the Gemini Live bidirectional streaming API.
//!
//! The crate owns the WebSocket transport and the `BidiGenerateContent`
//! framing, and exposes a channel-based session API:
//!
//! - [`start`] opens a session and returns a [`LiveSession`] handle plus a
//!   receiver of [`LiveEvent`]s.
//! - [`LiveSession::send`] submits a [`LiveDirective`]; [`LiveSession::close`]
//!   releases the session.
//!
//! Connection failures never surface as panics or hard errors from `start`;
//! they arrive on the event stream as [`LiveEvent::Error`] followed by
//! [`LiveEvent::Closed`].

mod client;
mod config;
mod wire;

pub use client::{
    LiveDirective, LiveError, LiveEvent, LiveResponse, LiveSession, ResponsePart, start,
};
pub use config::{
    INPUT_AUDIO_SAMPLE_RATE, LiveConfig, OUTPUT_AUDIO_SAMPLE_RATE, ResponseModality,
};
