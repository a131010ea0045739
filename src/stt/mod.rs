//! Speech-to-text service boundary.

pub mod recognizer;

pub use recognizer::{MockRecognizer, RecognizedText, Recognizer};
