use crate::audio::filter::{FilterBreakpoint, speech_band};
use crate::audio::wav::SegmentContainer;
use crate::defaults;
use crate::error::{Result, SpeechflowError};
use crate::tts::{Gender, OutputFormat, Voice};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub vad: VadSection,
    pub recognition: RecognitionConfig,
    pub synthesis: SynthesisConfig,
}

/// Frame geometry of the capture stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_len: usize,
    pub fft_size: usize,
    /// Spectrum smoothing time constant in `[0, 1)`.
    pub smoothing: f32,
}

/// Voice activity detector tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSection {
    pub energy_offset: f64,
    pub threshold_ratio_pos: f64,
    pub threshold_ratio_neg: f64,
    pub energy_integration: f64,
    pub trend_max: i32,
    pub trend_min: i32,
    pub trend_start: i32,
    pub trend_end: i32,
    pub pre_roll_frames: usize,
    /// 0 disables the bound.
    pub max_utterance_ms: u32,
    pub container: SegmentContainer,
    pub filter: Vec<FilterBreakpoint>,
}

/// Speech-to-text requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub locale: String,
    /// 0 = unlimited.
    pub max_in_flight: usize,
    /// Humantime duration such as "15s"; empty disables the timeout.
    pub request_timeout: String,
}

/// Text-to-speech requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub locale: String,
    pub gender: Gender,
    pub voice_name: String,
    pub output_format: OutputFormat,
    /// false = one request at a time.
    pub parallel_requests: bool,
    pub request_timeout: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            frame_len: defaults::FRAME_LEN,
            fft_size: defaults::FFT_SIZE,
            smoothing: defaults::SPECTRUM_SMOOTHING,
        }
    }
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            energy_offset: defaults::ENERGY_OFFSET,
            threshold_ratio_pos: defaults::THRESHOLD_RATIO_POS,
            threshold_ratio_neg: defaults::THRESHOLD_RATIO_NEG,
            energy_integration: defaults::ENERGY_INTEGRATION,
            trend_max: defaults::TREND_MAX,
            trend_min: defaults::TREND_MIN,
            trend_start: defaults::TREND_START,
            trend_end: defaults::TREND_END,
            pre_roll_frames: defaults::PRE_ROLL_FRAMES,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
            container: SegmentContainer::default(),
            filter: speech_band(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            locale: defaults::DEFAULT_LOCALE.to_string(),
            max_in_flight: 0,
            request_timeout: String::new(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            locale: defaults::DEFAULT_VOICE_LOCALE.to_string(),
            gender: Gender::default(),
            voice_name: defaults::DEFAULT_VOICE_NAME.to_string(),
            output_format: OutputFormat::default(),
            parallel_requests: true,
            request_timeout: String::new(),
        }
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Result<Option<Duration>> {
        parse_timeout("recognition.request_timeout", &self.request_timeout)
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Result<Option<Duration>> {
        parse_timeout("synthesis.request_timeout", &self.request_timeout)
    }

    /// Default voice for synthesis requests.
    pub fn voice(&self) -> Voice {
        Voice {
            locale: self.locale.clone(),
            gender: self.gender,
            name: self.voice_name.clone(),
        }
    }
}

fn parse_timeout(key: &str, value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let timeout =
        humantime::parse_duration(value).map_err(|e| SpeechflowError::ConfigInvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    Ok((!timeout.is_zero()).then_some(timeout))
}

fn invalid(key: &str, message: impl Into<String>) -> SpeechflowError {
    SpeechflowError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpeechflowError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SpeechflowError::Io(e)
            }
        })?;
        toml::from_str(&contents).map_err(|e| SpeechflowError::ConfigParse {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SpeechflowError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SPEECHFLOW_LOCALE → recognition.locale
    /// - SPEECHFLOW_VOICE → synthesis.voice_name
    /// - SPEECHFLOW_SAMPLE_RATE → capture.sample_rate
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(locale) = std::env::var("SPEECHFLOW_LOCALE")
            && !locale.is_empty()
        {
            self.recognition.locale = locale;
        }

        if let Ok(voice) = std::env::var("SPEECHFLOW_VOICE")
            && !voice.is_empty()
        {
            self.synthesis.voice_name = voice;
        }

        if let Ok(rate) = std::env::var("SPEECHFLOW_SAMPLE_RATE")
            && !rate.is_empty()
        {
            match rate.parse() {
                Ok(rate) => self.capture.sample_rate = rate,
                Err(_) => warn!(value = %rate, "Ignoring invalid SPEECHFLOW_SAMPLE_RATE"),
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/speechflow/config.toml on Linux, or `None` when the
    /// platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("speechflow").join("config.toml"))
    }

    /// Reject values the detector and stations cannot work with.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.sample_rate == 0 {
            return Err(invalid("capture.sample_rate", "must be greater than zero"));
        }
        if capture.channels == 0 {
            return Err(invalid("capture.channels", "must be greater than zero"));
        }
        if capture.frame_len == 0 {
            return Err(invalid("capture.frame_len", "must be greater than zero"));
        }
        if capture.fft_size < 2 || !capture.fft_size.is_power_of_two() {
            return Err(invalid("capture.fft_size", "must be a power of two"));
        }
        if !(0.0..1.0).contains(&capture.smoothing) {
            return Err(invalid("capture.smoothing", "must be in [0, 1)"));
        }

        let vad = &self.vad;
        if vad.energy_offset < 0.0 {
            return Err(invalid("vad.energy_offset", "must not be negative"));
        }
        for (key, value) in [
            ("vad.threshold_ratio_pos", vad.threshold_ratio_pos),
            ("vad.threshold_ratio_neg", vad.threshold_ratio_neg),
            ("vad.energy_integration", vad.energy_integration),
        ] {
            if value <= 0.0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if vad.trend_min >= vad.trend_max {
            return Err(invalid("vad.trend_min", "must be below vad.trend_max"));
        }
        // The trend starts at 0 and decays toward it
        if vad.trend_min > 0 {
            return Err(invalid("vad.trend_min", "must not be positive"));
        }
        if vad.trend_max < 0 {
            return Err(invalid("vad.trend_max", "must not be negative"));
        }
        for (key, value) in [("vad.trend_start", vad.trend_start), ("vad.trend_end", vad.trend_end)] {
            if value < vad.trend_min || value > vad.trend_max {
                return Err(invalid(
                    key,
                    format!("must lie within [{}, {}]", vad.trend_min, vad.trend_max),
                ));
            }
        }
        if let Some(bp) = vad.filter.iter().find(|bp| !(0.0..=1.0).contains(&bp.weight)) {
            return Err(invalid(
                "vad.filter",
                format!("weight {} at {} Hz is outside [0, 1]", bp.weight, bp.frequency_hz),
            ));
        }

        self.recognition.timeout()?;
        self.synthesis.timeout()?;
        Ok(())
    }
}
