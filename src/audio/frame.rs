//! Frame types and the frame source boundary.
//!
//! A frame is one captured block: `frame_len` samples per channel plus the
//! dB magnitude spectrum the source computed for that block.

use crate::config::Config;
use crate::error::{Result, SpeechflowError};
use std::collections::VecDeque;

/// Geometry shared by a frame source and the detector consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels per frame.
    pub channels: u16,
    /// Samples per channel in one frame.
    pub frame_len: usize,
    /// FFT size used for the spectrum; the spectrum has `fft_size / 2` bins.
    pub fft_size: usize,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::defaults::SAMPLE_RATE,
            channels: crate::defaults::CHANNELS,
            frame_len: crate::defaults::FRAME_LEN,
            fft_size: crate::defaults::FFT_SIZE,
        }
    }
}

impl FrameFormat {
    /// Creates the frame format from the `[capture]` section of the app config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.capture.sample_rate,
            channels: config.capture.channels,
            frame_len: config.capture.frame_len,
            fft_size: config.capture.fft_size,
        }
    }

    /// Number of spectrum bins per frame.
    pub fn spectrum_bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Width of one spectrum bin in Hz.
    pub fn hertz_per_bin(&self) -> f64 {
        self.sample_rate as f64 / self.fft_size as f64
    }

    /// Duration of one frame in seconds.
    pub fn frame_period_secs(&self) -> f64 {
        self.frame_len as f64 / self.sample_rate as f64
    }

    /// Frames delivered per second.
    pub fn frames_per_second(&self) -> f64 {
        self.sample_rate as f64 / self.frame_len as f64
    }
}

/// One captured block of audio with its magnitude spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sequence number in capture order.
    pub sequence: u64,
    /// Samples per channel, each `frame_len` long, in `[-1.0, 1.0]`.
    pub channels: Vec<Vec<f32>>,
    /// Magnitude spectrum in dB, one value per frequency bin.
    pub spectrum_db: Vec<f32>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, channels: Vec<Vec<f32>>, spectrum_db: Vec<f32>) -> Self {
        Self {
            sequence,
            channels,
            spectrum_db,
        }
    }

    /// Samples per channel (length of the first channel).
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Returns true if the frame carries no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the frame against the format the detector was configured for.
    pub fn validate(&self, format: &FrameFormat) -> Result<()> {
        if self.channels.len() != format.channels as usize {
            return Err(SpeechflowError::AudioFormatMismatch {
                expected: format!("{} channels", format.channels),
                actual: format!("{} channels", self.channels.len()),
            });
        }
        if let Some(ragged) = self
            .channels
            .iter()
            .find(|channel| channel.len() != format.frame_len)
        {
            return Err(SpeechflowError::AudioFormatMismatch {
                expected: format!("{} samples per channel", format.frame_len),
                actual: format!("{} samples per channel", ragged.len()),
            });
        }
        if self.spectrum_db.len() != format.spectrum_bins() {
            return Err(SpeechflowError::AudioFormatMismatch {
                expected: format!("{} spectrum bins", format.spectrum_bins()),
                actual: format!("{} spectrum bins", self.spectrum_db.len()),
            });
        }
        Ok(())
    }
}

/// Trait for frame producers feeding the detector.
///
/// Called once per block period, in capture order. Implementations compute
/// the spectrum themselves; the detector only consumes it.
pub trait AudioFrameSource: Send {
    /// Geometry of the frames this source produces.
    fn format(&self) -> FrameFormat;

    /// Returns the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<AudioFrame>>;
}

impl<S: AudioFrameSource + ?Sized> AudioFrameSource for Box<S> {
    fn format(&self) -> FrameFormat {
        (**self).format()
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        (**self).next_frame()
    }
}

/// Frame source replaying prepared frames (testing and offline replay).
#[derive(Debug, Clone)]
pub struct VecFrameSource {
    format: FrameFormat,
    frames: VecDeque<AudioFrame>,
    fail_after: Option<usize>,
    served: usize,
}

impl VecFrameSource {
    /// Creates a source that yields `frames` in order.
    pub fn new(format: FrameFormat, frames: Vec<AudioFrame>) -> Self {
        Self {
            format,
            frames: frames.into(),
            fail_after: None,
            served: 0,
        }
    }

    /// Builds frames whose channels are silent and whose spectrum is a flat
    /// `level_db` in every bin, for each `(frame_count, level_db)` run.
    pub fn from_levels(format: FrameFormat, runs: &[(usize, f32)]) -> Self {
        let mut frames = Vec::new();
        let mut sequence = 0u64;
        for &(count, level_db) in runs {
            for _ in 0..count {
                frames.push(flat_frame(&format, sequence, level_db));
                sequence += 1;
            }
        }
        Self::new(format, frames)
    }

    /// Configure the source to fail once `served` frames were produced.
    pub fn with_failure_after(mut self, served: usize) -> Self {
        self.fail_after = Some(served);
        self
    }

    /// Frames not yet produced.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl AudioFrameSource for VecFrameSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.fail_after.is_some_and(|limit| self.served >= limit) {
            return Err(SpeechflowError::Other(
                "mock frame source failure".to_string(),
            ));
        }
        self.served += 1;
        Ok(self.frames.pop_front())
    }
}

/// A frame of zero samples with a flat spectrum at `level_db`.
pub fn flat_frame(format: &FrameFormat, sequence: u64, level_db: f32) -> AudioFrame {
    AudioFrame::new(
        sequence,
        vec![vec![0.0; format.frame_len]; format.channels as usize],
        vec![level_db; format.spectrum_bins()],
    )
}
