//! Text-to-speech service boundary.

pub mod ssml;
pub mod synthesizer;

pub use synthesizer::{Gender, MockSynthesizer, OutputFormat, Synthesizer, Voice};
