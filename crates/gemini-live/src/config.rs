//! Session configuration for the live client.

use serde::Serialize;

/// Sample rate the service expects for PCM16 audio sent to it.
pub const INPUT_AUDIO_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of PCM16 audio the service produces.
pub const OUTPUT_AUDIO_SAMPLE_RATE: u32 = 24_000;

/// Response modalities a session may request from the service.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Immutable configuration for one live session.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub model: String,
    pub api_key: String,
    pub response_modalities: Vec<ResponseModality>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub session_resumption: bool,
    pub proactive_audio: bool,
}

impl LiveConfig {
    /// The standard relay configuration: text and audio responses, session
    /// resumption enabled, proactive audio disabled.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            response_modalities: vec![ResponseModality::Text, ResponseModality::Audio],
            input_sample_rate: INPUT_AUDIO_SAMPLE_RATE,
            output_sample_rate: OUTPUT_AUDIO_SAMPLE_RATE,
            session_resumption: true,
            proactive_audio: false,
        }
    }

    /// A minimal text-only configuration, used by short-lived probe sessions.
    pub fn text_only(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            response_modalities: vec![ResponseModality::Text],
            session_resumption: false,
            ..Self::new(model, api_key)
        }
    }
}

pub(crate) fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}
