use crate::audio::wav::{SegmentContainer, encode_segment};
use crate::defaults;
use crate::error::{Result, SpeechflowError};
use crate::queue::RequestId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Audio format requested from a synthesis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "riff-16khz-16bit-mono-pcm")]
    Riff16Khz16BitMonoPcm,
    #[serde(rename = "raw-16khz-16bit-mono-pcm")]
    Raw16Khz16BitMonoPcm,
    #[serde(rename = "riff-8khz-8bit-mono-mulaw")]
    Riff8Khz8BitMonoMulaw,
    #[serde(rename = "raw-8khz-8bit-mono-mulaw")]
    Raw8Khz8BitMonoMulaw,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Riff16Khz16BitMonoPcm,
        OutputFormat::Raw16Khz16BitMonoPcm,
        OutputFormat::Riff8Khz8BitMonoMulaw,
        OutputFormat::Raw8Khz8BitMonoMulaw,
    ];

    /// Wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Riff16Khz16BitMonoPcm => "riff-16khz-16bit-mono-pcm",
            OutputFormat::Raw16Khz16BitMonoPcm => "raw-16khz-16bit-mono-pcm",
            OutputFormat::Riff8Khz8BitMonoMulaw => "riff-8khz-8bit-mono-mulaw",
            OutputFormat::Raw8Khz8BitMonoMulaw => "raw-8khz-8bit-mono-mulaw",
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            OutputFormat::Riff16Khz16BitMonoPcm | OutputFormat::Raw16Khz16BitMonoPcm => 16000,
            OutputFormat::Riff8Khz8BitMonoMulaw | OutputFormat::Raw8Khz8BitMonoMulaw => 8000,
        }
    }

    /// Whether responses in this format can be decoded for playback.
    pub fn is_playable(&self) -> bool {
        matches!(
            self,
            OutputFormat::Riff16Khz16BitMonoPcm | OutputFormat::Raw16Khz16BitMonoPcm
        )
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = SpeechflowError;

    fn from_str(s: &str) -> Result<Self> {
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SpeechflowError::UnsupportedOutputFormat {
                format: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
    #[default]
    #[serde(alias = "male")]
    Male,
    #[serde(alias = "female")]
    Female,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => f.write_str("Male"),
            Gender::Female => f.write_str("Female"),
        }
    }
}

/// Voice selection for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub locale: String,
    pub gender: Gender,
    pub name: String,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            locale: defaults::DEFAULT_VOICE_LOCALE.to_string(),
            gender: Gender::Male,
            name: defaults::DEFAULT_VOICE_NAME.to_string(),
        }
    }
}

/// Trait for text-to-speech services.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize an SSML document into audio bytes in `format`.
    async fn synthesize(
        &self,
        ssml: &str,
        format: OutputFormat,
        request_id: RequestId,
    ) -> Result<Vec<u8>>;

    /// Name of the backing service.
    fn name(&self) -> &str;
}

/// Mock synthesizer for testing.
///
/// Produces silent audio whose length grows with the document, 10 ms per
/// character.
#[derive(Debug)]
pub struct MockSynthesizer {
    name: String,
    failing_markers: Vec<String>,
    delays: Vec<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing_markers: Vec::new(),
            delays: Vec::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail any request whose document contains `marker`.
    pub fn with_failure_for(mut self, marker: &str) -> Self {
        self.failing_markers.push(marker.to_string());
        self
    }

    /// Delay the n-th call by the n-th duration.
    pub fn with_delays(mut self, delays: &[Duration]) -> Self {
        self.delays = delays.to_vec();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// SSML documents received, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(
        &self,
        ssml: &str,
        format: OutputFormat,
        _request_id: RequestId,
    ) -> Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(ssml.to_string());
        }

        if let Some(delay) = self.delays.get(call) {
            tokio::time::sleep(*delay).await;
        }

        if let Some(marker) = self.failing_markers.iter().find(|m| ssml.contains(m.as_str())) {
            return Err(SpeechflowError::Synthesis {
                message: format!("mock synthesis failure for '{}'", marker),
            });
        }

        let samples = ssml.chars().count() * format.sample_rate() as usize / 100;
        match format {
            OutputFormat::Riff16Khz16BitMonoPcm => {
                encode_segment(&[vec![0.0; samples]], format.sample_rate(), SegmentContainer::Riff)
            }
            OutputFormat::Raw16Khz16BitMonoPcm => {
                encode_segment(&[vec![0.0; samples]], format.sample_rate(), SegmentContainer::Raw)
            }
            OutputFormat::Riff8Khz8BitMonoMulaw | OutputFormat::Raw8Khz8BitMonoMulaw => {
                Ok(vec![0xFF; samples])
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
