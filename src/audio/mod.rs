//! Audio frames, spectra and voice activity detection.

pub mod filter;
pub mod frame;
pub mod history;
pub mod source;
pub mod spectrum;
pub mod vad;
pub mod wav;

pub use frame::{AudioFrame, AudioFrameSource, FrameFormat, VecFrameSource};
pub use source::{PcmFrameSource, WavFrameSource};
pub use vad::{
    DetectorState, SegmentEnd, SpeechSegment, VadConfig, VadEvent, VadOutcome,
    VoiceActivityDetector,
};
pub use wav::{DecodedAudio, SegmentContainer};
