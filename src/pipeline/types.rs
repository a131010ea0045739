//! Data types for the recognition and synthesis pipelines.

use crate::audio::vad::SegmentEnd;
use crate::error::SpeechflowError;
use crate::queue::RequestId;
use crate::stt::RecognizedText;
use crate::tts::Voice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Events emitted by a running recognition pipeline.
#[derive(Debug)]
pub enum RecognitionEvent {
    /// The detector saw speech start on this frame.
    VoiceDetected { frame_sequence: u64 },
    /// The detector finalized an utterance; its segment was submitted for recognition.
    VoiceEnded {
        first_frame: u64,
        last_frame: u64,
        frame_count: usize,
        end_reason: SegmentEnd,
    },
    /// Recognized text, released in utterance order.
    Text {
        sequence: u64,
        request_id: RequestId,
        result: RecognizedText,
    },
    /// A failure. Request failures carry the identity of the failed request.
    Error {
        cause: SpeechflowError,
        sequence: Option<u64>,
        request_id: Option<RequestId>,
    },
    /// Recognition requests are outstanding.
    NetworkActivityStarted,
    /// Every outstanding recognition request was released.
    NetworkActivityEnded,
}

/// Callback fired once an item's audio has been played.
pub type PlayedCallback = Box<dyn FnOnce() + Send>;

/// Text to speak, with an optional voice override and playback callback.
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Option<Voice>,
    pub on_played: Option<PlayedCallback>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            on_played: None,
        }
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn on_played(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_played = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for SynthesisRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisRequest")
            .field("text", &self.text)
            .field("voice", &self.voice)
            .field("on_played", &self.on_played.is_some())
            .finish()
    }
}

/// Events emitted by a running synthesis pipeline.
#[derive(Debug)]
pub enum SynthesisEvent {
    /// A request was accepted and assigned a sequence.
    Queued { sequence: u64, request_id: RequestId },
    /// Audio for this request finished playing.
    Played {
        sequence: u64,
        request_id: RequestId,
        duration: Duration,
    },
    /// A request failed to synthesize, decode or play.
    Error {
        cause: SpeechflowError,
        sequence: u64,
        request_id: RequestId,
    },
    /// Synthesis requests are outstanding.
    NetworkActivityStarted,
    /// Every outstanding synthesis request was released.
    NetworkActivityEnded,
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    capture: Option<std::thread::JoinHandle<()>>,
    stop_signal: Option<Arc<Notify>>,
}

impl PipelineHandle {
    pub(crate) fn new(
        running: Arc<AtomicBool>,
        tasks: Vec<JoinHandle<()>>,
        capture: Option<std::thread::JoinHandle<()>>,
    ) -> Self {
        Self {
            running,
            tasks,
            capture,
            stop_signal: None,
        }
    }

    /// Wakes a stage that waits on input rather than polling `running`.
    pub(crate) fn with_stop_signal(mut self, signal: Arc<Notify>) -> Self {
        self.stop_signal = Some(signal);
        self
    }

    /// Signals the pipeline to stop taking input. Work already accepted is still processed.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Pipeline stopping");
            if let Some(signal) = &self.stop_signal {
                signal.notify_one();
            }
        }
    }

    /// True until [`stop`](Self::stop) is called or the source is exhausted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits for every stage to finish.
    ///
    /// A request that never resolves keeps the pipeline alive unless a
    /// request timeout is configured.
    pub async fn wait(mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task failed");
            }
        }
        if let Some(capture) = self.capture.take() {
            let joined = tokio::task::spawn_blocking(move || capture.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Capture thread panicked");
            }
        }
    }

    /// Stops the pipeline and cancels in-flight work.
    pub fn abort(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
