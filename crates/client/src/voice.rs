//! Voice capture: wraps a platform speech-to-text capability as a small
//! state machine that feeds finalized transcript segments into the composer.
//!
//! Recognizer callbacks never touch state directly. They go through a
//! `RecognitionSink`, which tags each result with the capture attempt that
//! produced it, and the owner feeds them back through `VoiceCapture::handle`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::composer::Composer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No audio input device available")]
    NoDevice,

    #[error("Speech recognition is not supported on this platform")]
    Unsupported,

    #[error("Speech recognition failed: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Partial hypothesis; observed, never committed
    Interim(String),
    /// Finalized segment at an utterance boundary
    Final(String),
    /// Platform stopped on its own (silence timeout, device released)
    Ended,
    Failed(CaptureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub attempt: u64,
    pub event: RecognitionEvent,
}

pub type DeliverFn = Arc<dyn Fn(Recognition) + Send + Sync>;

/// Handed to the recognizer on start; results flow back through it
#[derive(Clone)]
pub struct RecognitionSink {
    attempt: u64,
    deliver: DeliverFn,
}

impl fmt::Debug for RecognitionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionSink")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl RecognitionSink {
    fn emit(&self, event: RecognitionEvent) {
        (self.deliver)(Recognition {
            attempt: self.attempt,
            event,
        });
    }

    pub fn interim(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Interim(text.into()));
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Final(text.into()));
    }

    pub fn ended(&self) {
        self.emit(RecognitionEvent::Ended);
    }

    pub fn failed(&self, error: CaptureError) {
        self.emit(RecognitionEvent::Failed(error));
    }
}

/// Platform speech-to-text capability
pub trait SpeechRecognizer: Send {
    /// Acquire the device and begin streaming results into `sink`
    fn start(&mut self, sink: RecognitionSink) -> Result<(), CaptureError>;

    /// Release the device. Must be safe to call when not started.
    fn stop(&mut self);
}

/// Recognizer for platforms without speech input
#[derive(Debug, Default)]
pub struct UnsupportedRecognizer;

impl SpeechRecognizer for UnsupportedRecognizer {
    fn start(&mut self, _sink: RecognitionSink) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn stop(&mut self) {}
}

pub struct VoiceCapture {
    recognizer: Box<dyn SpeechRecognizer>,
    deliver: DeliverFn,
    state: VoiceState,
    attempt: u64,
    /// User stopped; the platform may still flush the last final result
    draining: bool,
    last_final: Option<String>,
    interim: String,
}

impl VoiceCapture {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>, deliver: DeliverFn) -> Self {
        Self {
            recognizer,
            deliver,
            state: VoiceState::Idle,
            attempt: 0,
            draining: false,
            last_final: None,
            interim: String::new(),
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Latest partial hypothesis of the current capture
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Start listening, or stop if already listening.
    ///
    /// A start failure leaves the capture idle and the composer untouched.
    pub fn toggle(&mut self) -> Result<VoiceState, CaptureError> {
        if self.state == VoiceState::Listening {
            self.stop();
            return Ok(VoiceState::Idle);
        }

        self.attempt += 1;
        self.draining = false;
        self.last_final = None;
        self.interim.clear();
        let sink = RecognitionSink {
            attempt: self.attempt,
            deliver: self.deliver.clone(),
        };

        match self.recognizer.start(sink) {
            Ok(()) => {
                self.state = VoiceState::Listening;
                info!(
                    component = "voice",
                    event = "voice.listening",
                    attempt = self.attempt,
                );
                Ok(VoiceState::Listening)
            }
            Err(err) => {
                self.state = VoiceState::Idle;
                warn!(
                    component = "voice",
                    event = "voice.start_failed",
                    attempt = self.attempt,
                    error = %err,
                );
                Err(err)
            }
        }
    }

    /// User-initiated stop; releases the capability. A final result for the
    /// utterance in progress is still committed if the platform delivers it.
    pub fn stop(&mut self) {
        if self.state != VoiceState::Listening {
            return;
        }
        self.release();
        self.draining = true;
        info!(
            component = "voice",
            event = "voice.stopped",
            attempt = self.attempt,
        );
    }

    fn release(&mut self) {
        self.recognizer.stop();
        self.state = VoiceState::Idle;
        self.interim.clear();
    }

    fn commit_final(&mut self, text: &str, composer: &mut Composer) {
        let segment = text.trim();
        if segment.is_empty() {
            return;
        }
        if self.last_final.as_deref() == Some(segment) {
            debug!(
                component = "voice",
                event = "voice.duplicate_final",
                "Dropping repeated final segment"
            );
            return;
        }
        composer.append_segment(segment);
        self.last_final = Some(segment.to_string());
    }

    /// Results trailing a user stop: finals still land, the platform's end
    /// or error closes the attempt, interims are ignored.
    fn handle_after_stop(
        &mut self,
        event: RecognitionEvent,
        composer: &mut Composer,
    ) -> Option<CaptureError> {
        match event {
            RecognitionEvent::Final(text) => self.commit_final(&text, composer),
            RecognitionEvent::Interim(_) => {}
            RecognitionEvent::Ended => self.draining = false,
            RecognitionEvent::Failed(err) => {
                self.draining = false;
                debug!(
                    component = "voice",
                    event = "voice.failed_after_stop",
                    attempt = self.attempt,
                    error = %err,
                );
            }
        }
        None
    }

    /// Apply one recognizer result. Returns a capability error to surface once.
    pub fn handle(
        &mut self,
        recognition: Recognition,
        composer: &mut Composer,
    ) -> Option<CaptureError> {
        let current = recognition.attempt == self.attempt;
        if !current || (self.state != VoiceState::Listening && !self.draining) {
            debug!(
                component = "voice",
                event = "voice.stale_result",
                attempt = recognition.attempt,
                current = self.attempt,
            );
            return None;
        }

        if self.draining {
            return self.handle_after_stop(recognition.event, composer);
        }

        match recognition.event {
            RecognitionEvent::Interim(text) => {
                self.interim = text;
                None
            }
            RecognitionEvent::Final(text) => {
                self.interim.clear();
                self.commit_final(&text, composer);
                None
            }
            RecognitionEvent::Ended => {
                self.release();
                info!(
                    component = "voice",
                    event = "voice.ended",
                    attempt = self.attempt,
                );
                None
            }
            RecognitionEvent::Failed(err) => {
                self.release();
                warn!(
                    component = "voice",
                    event = "voice.failed",
                    attempt = self.attempt,
                    error = %err,
                );
                Some(err)
            }
        }
    }
}
