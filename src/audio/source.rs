//! Frame sources built from PCM sample streams.

use crate::audio::frame::{AudioFrame, AudioFrameSource, FrameFormat};
use crate::audio::spectrum::SpectrumAnalyzer;
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, SpeechflowError};
use std::io::Read;
use std::path::Path;

/// Cuts interleaved `f32` samples into frames and computes their spectra.
///
/// The final partial block is zero-padded to `frame_len`.
#[derive(Debug)]
pub struct PcmFrameSource {
    format: FrameFormat,
    samples: Vec<f32>,
    position: usize,
    sequence: u64,
    analyzer: SpectrumAnalyzer,
}

impl PcmFrameSource {
    /// Creates a source over interleaved samples with the default smoothing.
    pub fn new(format: FrameFormat, samples: Vec<f32>) -> Result<Self> {
        Self::with_smoothing(format, samples, defaults::SPECTRUM_SMOOTHING)
    }

    /// Creates a source using the `[capture]` geometry and smoothing.
    pub fn from_config(config: &Config, samples: Vec<f32>) -> Result<Self> {
        Self::with_smoothing(FrameFormat::from_config(config), samples, config.capture.smoothing)
    }

    pub fn with_smoothing(format: FrameFormat, samples: Vec<f32>, smoothing: f32) -> Result<Self> {
        if format.channels == 0 || format.frame_len == 0 {
            return Err(SpeechflowError::AudioFormatMismatch {
                expected: "at least one channel and a non-empty frame".to_string(),
                actual: format!(
                    "{} channels, {} samples per frame",
                    format.channels, format.frame_len
                ),
            });
        }
        let analyzer = SpectrumAnalyzer::new(format.fft_size, smoothing)?;
        Ok(Self {
            format,
            samples,
            position: 0,
            sequence: 0,
            analyzer,
        })
    }

    /// Frames this source will produce in total.
    pub fn frame_count(&self) -> usize {
        let per_frame = self.format.frame_len * self.format.channels as usize;
        self.samples.len().div_ceil(per_frame)
    }
}

impl AudioFrameSource for PcmFrameSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }

        let channel_count = self.format.channels as usize;
        let frame_len = self.format.frame_len;
        let end = (self.position + frame_len * channel_count).min(self.samples.len());
        let block = &self.samples[self.position..end];
        self.position = end;

        let mut channels = vec![vec![0.0f32; frame_len]; channel_count];
        for (i, &sample) in block.iter().enumerate() {
            channels[i % channel_count][i / channel_count] = sample;
        }

        let mono: Vec<f32> = (0..frame_len)
            .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / channel_count as f32)
            .collect();
        self.analyzer.push_samples(&mono);
        let spectrum_db = self.analyzer.analyze();

        let frame = AudioFrame::new(self.sequence, channels, spectrum_db);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

/// Frame source reading a WAV stream, keeping its native rate and channels.
#[derive(Debug)]
pub struct WavFrameSource {
    inner: PcmFrameSource,
}

impl WavFrameSource {
    /// Parses 16-bit integer or 32-bit float WAV data from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>, frame_len: usize, fft_size: usize) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| SpeechflowError::AudioDecode {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

        let spec = wav_reader.spec();
        let samples = read_samples(wav_reader)?;
        let format = FrameFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            frame_len,
            fft_size,
        };

        Ok(Self {
            inner: PcmFrameSource::new(format, samples)?,
        })
    }

    /// Opens a WAV file.
    pub fn open(path: &Path, frame_len: usize, fft_size: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), frame_len, fft_size)
    }

    pub fn frame_count(&self) -> usize {
        self.inner.frame_count()
    }
}

impl AudioFrameSource for WavFrameSource {
    fn format(&self) -> FrameFormat {
        self.inner.format()
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        self.inner.next_frame()
    }
}

/// Reads every sample of a WAV stream as `f32` in `[-1.0, 1.0]`.
pub(crate) fn read_samples<R: Read>(mut reader: hound::WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let decode_err = |e: hound::Error| SpeechflowError::AudioDecode {
        message: format!("Failed to read WAV samples: {}", e),
    };

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0).map_err(decode_err))
            .collect(),
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map_err(decode_err))
            .collect(),
        (format, bits) => Err(SpeechflowError::AudioDecode {
            message: format!("unsupported WAV sample format {:?} with {} bits", format, bits),
        }),
    }
}
