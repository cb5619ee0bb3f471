//! Conversation façade: one entry point per turn, composing the input
//! mode (text or audio) and output mode (text, audio, or both) around
//! the orchestrator and its session store.

use std::sync::Arc;

use futures_util::StreamExt;

use vox_agent::{Orchestrator, TurnInput, TurnReport};
use vox_domain::config::VoiceConfig;
use vox_domain::error::{Error, Result};
use vox_domain::message::Session;
use vox_voice::{AudioStream, SttProvider, SynthesisOptions, TtsProvider};

/// How the user's input arrives.
pub enum InputMode {
    Text(String),
    /// PCM, 16 kHz, 16-bit, mono; handed to the STT collaborator.
    Audio(Vec<u8>),
}

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Audio,
    Both,
}

/// Result of one façade turn.
#[derive(Debug)]
pub struct TurnEnvelope {
    pub session_id: String,
    pub text: Option<String>,
    /// Complete synthesized audio (for `Audio`/`Both` non-streaming).
    pub audio: Option<Vec<u8>>,
    pub report: TurnReport,
}

pub struct ConversationService {
    orchestrator: Arc<Orchestrator>,
    stt: Option<Arc<dyn SttProvider>>,
    tts: Option<Arc<dyn TtsProvider>>,
    voice: VoiceConfig,
}

impl ConversationService {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        stt: Option<Arc<dyn SttProvider>>,
        tts: Option<Arc<dyn TtsProvider>>,
        voice: VoiceConfig,
    ) -> Self {
        Self {
            orchestrator,
            stt,
            tts,
            voice,
        }
    }

    fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            voice: self.voice.voice.clone(),
            speed: self.voice.speed,
            volume: self.voice.volume,
            pitch: self.voice.pitch,
        }
    }

    /// Resolve the input mode to text, consulting STT for audio.
    async fn resolve_text(&self, input: InputMode) -> Result<String> {
        match input {
            InputMode::Text(text) => Ok(text),
            InputMode::Audio(pcm) => {
                let stt = self
                    .stt
                    .as_ref()
                    .ok_or_else(|| Error::Validation("no STT collaborator configured".into()))?;
                let transcription = stt.recognize(&pcm).await?;
                if !transcription.success {
                    return Err(Error::Upstream {
                        status: 502,
                        message: format!(
                            "speech recognition failed: {} ({})",
                            transcription.error_message.unwrap_or_default(),
                            transcription.error_code.unwrap_or_default(),
                        ),
                    });
                }
                tracing::debug!(text = %transcription.text, "speech recognized");
                Ok(transcription.text)
            }
        }
    }

    /// Run one turn end to end. Generates a session id when absent; the
    /// orchestrator loads history and persists the user and assistant
    /// messages on completion.
    pub async fn process_turn(
        &self,
        input: InputMode,
        output: OutputMode,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> Result<TurnEnvelope> {
        let session_id = session_id.unwrap_or_else(Session::generate_id);
        let text = self.resolve_text(input).await?;

        let report = self
            .orchestrator
            .process_message(TurnInput {
                session_id: session_id.clone(),
                user_id,
                text,
                model: None,
            })
            .await;

        let audio = match output {
            OutputMode::Text => None,
            OutputMode::Audio | OutputMode::Both => {
                Some(self.synthesize_complete(&report.response).await?)
            }
        };
        let text = match output {
            OutputMode::Audio => None,
            OutputMode::Text | OutputMode::Both => Some(report.response.clone()),
        };

        Ok(TurnEnvelope {
            session_id,
            text,
            audio,
            report,
        })
    }

    /// Run one turn and stream the synthesized reply as audio chunks.
    /// Used by the `message-stream` and `message-audio-stream` routes.
    pub async fn process_turn_audio_stream(
        &self,
        input: InputMode,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> Result<(String, AudioStream)> {
        let session_id = session_id.unwrap_or_else(Session::generate_id);
        let text = self.resolve_text(input).await?;

        let report = self
            .orchestrator
            .process_message(TurnInput {
                session_id: session_id.clone(),
                user_id,
                text,
                model: None,
            })
            .await;

        let tts = self.require_tts()?;
        let stream = tts
            .synthesize_stream(&report.response, &self.synthesis_options())
            .await?;
        Ok((session_id, stream))
    }

    fn require_tts(&self) -> Result<&Arc<dyn TtsProvider>> {
        self.tts
            .as_ref()
            .ok_or_else(|| Error::Validation("no TTS collaborator configured".into()))
    }

    async fn synthesize_complete(&self, text: &str) -> Result<Vec<u8>> {
        let tts = self.require_tts()?;
        let mut stream = tts.synthesize_stream(text, &self.synthesis_options()).await?;
        let mut audio = Vec::new();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }
        Ok(audio)
    }
}
