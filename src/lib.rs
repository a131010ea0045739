//! speechflow - adaptive voice activity detection and ordered speech requests
//!
//! Splits a captured audio stream into utterances with an energy-based,
//! self-calibrating detector, sends them to a recognition service
//! concurrently and releases the results strictly in utterance order. The
//! same ordered station drives text-to-speech playback.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod audio;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod stt;
pub mod tts;

// Detector
pub use audio::frame::{AudioFrame, AudioFrameSource, FrameFormat};
pub use audio::vad::{SegmentEnd, SpeechSegment, VadConfig, VadEvent, VoiceActivityDetector};

// Ordered reassembly
pub use queue::ordered::{DeliverySink, ReassemblyQueue, Ticket};
pub use queue::station::{DispatchConfig, Operation, OrderedStation, QueueEvent, RequestId};

// Service boundaries
pub use stt::recognizer::{RecognizedText, Recognizer};
pub use tts::synthesizer::{OutputFormat, Synthesizer, Voice};

// Pipelines
pub use pipeline::{
    AudioPlayer, PipelineHandle, RecognitionEvent, RecognitionPipeline, SynthesisEvent,
    SynthesisHandle, SynthesisPipeline, SynthesisRequest,
};

// Error handling
pub use error::{Result, SpeechflowError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
