//! PCM container encoding for detected segments and decoding of synthesized audio.

use crate::audio::source::read_samples;
use crate::error::{Result, SpeechflowError};
use crate::tts::OutputFormat;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Size of the canonical RIFF/WAVE header written for 16-bit mono or stereo PCM.
pub const RIFF_HEADER_LEN: usize = 44;

/// Container of an encoded speech segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentContainer {
    /// Self-describing RIFF/WAVE file.
    #[default]
    Riff,
    /// Bare little-endian 16-bit samples.
    Raw,
}

/// Encodes per-channel float samples as 16-bit PCM, interleaving channels.
pub fn encode_segment(
    channels: &[Vec<f32>],
    sample_rate: u32,
    container: SegmentContainer,
) -> Result<Vec<u8>> {
    let samples: Vec<i16> = interleave(channels).into_iter().map(float_to_i16).collect();

    match container {
        SegmentContainer::Raw => Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect()),
        SegmentContainer::Riff => {
            let spec = hound::WavSpec {
                channels: channels.len() as u16,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let encode_err = |e: hound::Error| SpeechflowError::AudioEncode {
                message: e.to_string(),
            };

            let mut cursor = Cursor::new(Vec::with_capacity(RIFF_HEADER_LEN + samples.len() * 2));
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
            for sample in samples {
                writer.write_sample(sample).map_err(encode_err)?;
            }
            writer.finalize().map_err(encode_err)?;
            Ok(cursor.into_inner())
        }
    }
}

/// Interleaves channels sample by sample. A single channel is returned as is.
pub fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [mono] => mono.clone(),
        _ => {
            let len = channels.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len * channels.len());
            for i in 0..len {
                out.extend(channels.iter().map(|c| c[i]));
            }
            out
        }
    }
}

/// Converts a float sample to i16 with asymmetric scaling, clamping to `[-1, 1]`.
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Audio decoded from a synthesis response.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Playback duration.
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return std::time::Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        std::time::Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

/// Decodes audio returned by a synthesizer in the given output format.
///
/// The mu-law formats are not playable and yield `UnsupportedOutputFormat`.
pub fn decode(bytes: &[u8], format: OutputFormat) -> Result<DecodedAudio> {
    match format {
        OutputFormat::Riff16Khz16BitMonoPcm => {
            let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| {
                SpeechflowError::AudioDecode {
                    message: format!("Failed to parse WAV data: {}", e),
                }
            })?;
            let spec = reader.spec();
            Ok(DecodedAudio {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                samples: read_samples(reader)?,
            })
        }
        OutputFormat::Raw16Khz16BitMonoPcm => {
            if bytes.len() % 2 != 0 {
                return Err(SpeechflowError::AudioDecode {
                    message: format!("raw 16-bit PCM has odd length {}", bytes.len()),
                });
            }
            Ok(DecodedAudio {
                sample_rate: format.sample_rate(),
                channels: 1,
                samples: bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .collect(),
            })
        }
        OutputFormat::Riff8Khz8BitMonoMulaw | OutputFormat::Raw8Khz8BitMonoMulaw => {
            Err(SpeechflowError::UnsupportedOutputFormat {
                format: format.to_string(),
            })
        }
    }
}
