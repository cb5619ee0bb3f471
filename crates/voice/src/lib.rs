//! Speech collaborator contracts.
//!
//! STT and TTS providers live outside the core; this crate pins down the
//! wire contracts the conversation façade consumes. Implementations
//! adapt a concrete vendor behind these traits.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use vox_domain::error::Result;
use vox_domain::stream::BoxStream;

/// Streaming synthesized audio, chunk by chunk.
pub type AudioStream = BoxStream<'static, Result<Bytes>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Speech-to-text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a recognition request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Transcription {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            success: false,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Speech-to-text collaborator. Input is PCM, 16 kHz, 16-bit, mono.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    async fn recognize(&self, pcm: &[u8]) -> Result<Transcription>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text-to-speech
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synthesis tuning knobs; each ranges 0–100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub voice: String,
    pub speed: u8,
    pub volume: u8,
    pub pitch: u8,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice: "xiaoyan".into(),
            speed: 50,
            volume: 50,
            pitch: 50,
        }
    }
}

/// Text-to-speech collaborator. The output codec is MP3 unless the
/// provider chooses otherwise.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize_stream(&self, text: &str, options: &SynthesisOptions)
        -> Result<AudioStream>;
}
