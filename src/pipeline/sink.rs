//! Playback boundary of the synthesis pipeline.

use crate::audio::wav::DecodedAudio;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pluggable audio output. Called once per released item, in order.
#[async_trait]
pub trait AudioPlayer: Send + 'static {
    /// Plays the audio, returning once playback finished.
    async fn play(&mut self, audio: &DecodedAudio) -> Result<()>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "player"
    }
}

/// Player that records audio instead of playing it (testing, offline rendering).
#[derive(Debug, Clone, Default)]
pub struct CollectorPlayer {
    played: Arc<Mutex<Vec<DecodedAudio>>>,
    playback_delay: Option<Duration>,
}

impl CollectorPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long per item to simulate playback time.
    pub fn with_playback_delay(mut self, delay: Duration) -> Self {
        self.playback_delay = Some(delay);
        self
    }

    /// Everything played so far, in order.
    pub fn played(&self) -> Vec<DecodedAudio> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn played_count(&self) -> usize {
        self.played.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AudioPlayer for CollectorPlayer {
    async fn play(&mut self, audio: &DecodedAudio) -> Result<()> {
        if let Some(delay) = self.playback_delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut played) = self.played.lock() {
            played.push(audio.clone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
