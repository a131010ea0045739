//! Voice Activity Detection (VAD) module.
//!
//! Detects utterances with a band-weighted spectral energy measured against an
//! adaptive noise floor. A bounded trend accumulator provides hysteresis so a
//! single loud or quiet frame cannot flip the state.

use crate::audio::filter::{FilterBreakpoint, FilterWeights, speech_band};
use crate::audio::frame::{AudioFrame, FrameFormat};
use crate::audio::history::FrameHistory;
use crate::audio::wav::{SegmentContainer, encode_segment};
use crate::config::Config;
use crate::defaults;
use crate::error::{Result, SpeechflowError};
use std::time::Duration;
use tracing::{debug, trace};

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Initial energy floor.
    pub energy_offset: f64,
    /// Positive threshold as a multiple of the floor.
    pub threshold_ratio_pos: f64,
    /// Negative threshold as a multiple of the floor.
    pub threshold_ratio_neg: f64,
    /// Floor integration gain per second.
    pub energy_integration: f64,
    /// Multiplier on negative integration once an end is detected.
    pub floor_recovery_boost: f64,
    pub trend_max: i32,
    pub trend_min: i32,
    pub trend_start: i32,
    pub trend_end: i32,
    /// Frames kept from before the trigger frame.
    pub pre_roll_frames: usize,
    /// Longest utterance before a forced end (0 disables the bound).
    pub max_utterance_ms: u32,
    /// Container of emitted segments.
    pub container: SegmentContainer,
    /// Frequency weighting breakpoints.
    pub filter: Vec<FilterBreakpoint>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_offset: defaults::ENERGY_OFFSET,
            threshold_ratio_pos: defaults::THRESHOLD_RATIO_POS,
            threshold_ratio_neg: defaults::THRESHOLD_RATIO_NEG,
            energy_integration: defaults::ENERGY_INTEGRATION,
            floor_recovery_boost: defaults::FLOOR_RECOVERY_BOOST,
            trend_max: defaults::TREND_MAX,
            trend_min: defaults::TREND_MIN,
            trend_start: defaults::TREND_START,
            trend_end: defaults::TREND_END,
            pre_roll_frames: defaults::PRE_ROLL_FRAMES,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
            container: SegmentContainer::Riff,
            filter: speech_band(),
        }
    }
}

impl VadConfig {
    /// Creates a VadConfig from the `[vad]` section of the app config.
    pub fn from_config(config: &Config) -> Self {
        let vad = &config.vad;
        Self {
            energy_offset: vad.energy_offset,
            threshold_ratio_pos: vad.threshold_ratio_pos,
            threshold_ratio_neg: vad.threshold_ratio_neg,
            energy_integration: vad.energy_integration,
            floor_recovery_boost: defaults::FLOOR_RECOVERY_BOOST,
            trend_max: vad.trend_max,
            trend_min: vad.trend_min,
            trend_start: vad.trend_start,
            trend_end: vad.trend_end,
            pre_roll_frames: vad.pre_roll_frames,
            max_utterance_ms: vad.max_utterance_ms,
            container: vad.container,
            filter: vad.filter.clone(),
        }
    }
}

/// Adaptive detector state, updated once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorState {
    /// Adaptive noise floor, never negative.
    pub energy_offset: f64,
    pub threshold_pos: f64,
    pub threshold_neg: f64,
    /// Hysteresis accumulator within `[trend_min, trend_max]`.
    pub voice_trend: i32,
    /// An utterance is in progress.
    pub active: bool,
}

impl DetectorState {
    fn initial(config: &VadConfig) -> Self {
        let energy_offset = config.energy_offset.max(0.0);
        Self {
            energy_offset,
            threshold_pos: energy_offset * config.threshold_ratio_pos,
            threshold_neg: energy_offset * config.threshold_ratio_neg,
            voice_trend: 0,
            active: false,
        }
    }
}

/// Why a segment was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// The trend fell below the end threshold.
    Silence,
    /// The utterance reached the configured maximum length.
    MaxDuration,
    /// The source ran out of frames mid-utterance.
    EndOfStream,
}

/// A finalized utterance, encoded as 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Encoded audio (RIFF file or bare samples, per `container`).
    pub bytes: Vec<u8>,
    pub container: SegmentContainer,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames in the segment, pre-roll included.
    pub frame_count: usize,
    /// Frames captured before the trigger frame.
    pub pre_roll_frames: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub end_reason: SegmentEnd,
}

impl SpeechSegment {
    /// Duration of the audio in the segment.
    pub fn duration(&self, frame_len: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((self.frame_count * frame_len) as f64 / self.sample_rate as f64)
    }
}

/// Events emitted by the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// Speech started on the frame with this sequence number.
    SpeechStart { sequence: u64 },
    /// Speech ended; carries the finalized segment.
    SpeechEnd(SpeechSegment),
}

/// Detailed result of monitoring one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VadOutcome {
    pub event: Option<VadEvent>,
    /// Band-weighted energy of the frame.
    pub energy: f64,
    /// Energy above the floor (before the floor update).
    pub signal: f64,
    /// State after the update.
    pub state: DetectorState,
}

/// Energy-based voice activity detector over spectral frames.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    format: FrameFormat,
    weights: FilterWeights,
    state: DetectorState,
    history: FrameHistory,
    max_utterance_frames: Option<usize>,
}

impl VoiceActivityDetector {
    /// Creates a detector for frames of the given format.
    pub fn new(format: FrameFormat, config: VadConfig) -> Self {
        let weights = FilterWeights::from_breakpoints(
            &config.filter,
            format.spectrum_bins(),
            format.hertz_per_bin(),
        );
        let max_utterance_frames = (config.max_utterance_ms > 0).then(|| {
            defaults::frames_for_ms(config.max_utterance_ms, format.sample_rate, format.frame_len)
                .max(1)
        });
        let state = DetectorState::initial(&config);

        Self {
            config,
            format,
            weights,
            state,
            history: FrameHistory::new(),
            max_utterance_frames,
        }
    }

    /// Creates a detector from the app config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(FrameFormat::from_config(config), VadConfig::from_config(config))
    }

    /// Monitors one frame and returns the resulting event, if any.
    pub fn process(&mut self, frame: AudioFrame) -> Result<Option<VadEvent>> {
        Ok(self.process_with_info(frame)?.event)
    }

    /// Monitors one frame and returns the event with energy details.
    ///
    /// Frames must arrive in capture order and match the configured format.
    pub fn process_with_info(&mut self, frame: AudioFrame) -> Result<VadOutcome> {
        frame.validate(&self.format)?;

        let linear: Vec<f64> = frame
            .spectrum_db
            .iter()
            .map(|&db| 10f64.powf(db as f64 / 10.0))
            .collect();
        let energy = self.weights.energy(&linear);
        let signal = energy - self.state.energy_offset;

        let cfg = &self.config;
        let state = &mut self.state;
        if signal > state.threshold_pos {
            state.voice_trend = (state.voice_trend + 1).min(cfg.trend_max);
        } else if signal < -state.threshold_neg {
            state.voice_trend = (state.voice_trend - 1).max(cfg.trend_min);
        } else {
            state.voice_trend -= state.voice_trend.signum();
        }

        let start = state.voice_trend > cfg.trend_start;
        let end = state.voice_trend < cfg.trend_end;

        let integration = signal * self.format.frame_period_secs() * cfg.energy_integration;
        if integration > 0.0 || !end {
            state.energy_offset += integration;
        } else {
            state.energy_offset += integration * cfg.floor_recovery_boost;
        }
        state.energy_offset = state.energy_offset.max(0.0);
        state.threshold_pos = state.energy_offset * cfg.threshold_ratio_pos;
        state.threshold_neg = state.energy_offset * cfg.threshold_ratio_neg;

        trace!(
            sequence = frame.sequence,
            energy,
            energy_offset = state.energy_offset,
            threshold_pos = state.threshold_pos,
            threshold_neg = state.threshold_neg,
            signal,
            integration,
            voice_trend = state.voice_trend,
            start,
            end,
            "vad frame"
        );

        let sequence = frame.sequence;
        self.history.push(frame);
        if !self.state.active {
            self.history.trim_to(self.config.pre_roll_frames + 1);
        }

        let event = if start && !self.state.active {
            self.state.active = true;
            self.history.mark_start(self.config.pre_roll_frames);
            debug!(sequence, "Speech started");
            Some(VadEvent::SpeechStart { sequence })
        } else if end && self.state.active {
            Some(VadEvent::SpeechEnd(self.finish(SegmentEnd::Silence)?))
        } else if self.state.active
            && self
                .max_utterance_frames
                .is_some_and(|max| self.history.frames_since_start() >= max)
        {
            Some(VadEvent::SpeechEnd(self.finish(SegmentEnd::MaxDuration)?))
        } else {
            None
        };

        Ok(VadOutcome {
            event,
            energy,
            signal,
            state: self.state,
        })
    }

    /// Finalizes an utterance still in progress when the source is exhausted.
    pub fn flush(&mut self) -> Result<Option<SpeechSegment>> {
        if !self.state.active {
            return Ok(None);
        }
        self.finish(SegmentEnd::EndOfStream).map(Some)
    }

    /// Drops buffered frames and aborts an utterance without emitting it.
    ///
    /// The learned floor and trend are kept.
    pub fn clear(&mut self) {
        if self.state.active {
            debug!("Utterance aborted");
        }
        self.history.clear();
        self.state.active = false;
    }

    /// Restores the initial detector state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = DetectorState::initial(&self.config);
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Frames currently buffered.
    pub fn buffered_frames(&self) -> usize {
        self.history.len()
    }

    fn finish(&mut self, end_reason: SegmentEnd) -> Result<SpeechSegment> {
        self.state.active = false;
        let span = self
            .history
            .take_span()
            .ok_or_else(|| SpeechflowError::Other("no utterance in progress".to_string()))?;
        let bytes = encode_segment(&span.channels, self.format.sample_rate, self.config.container)?;

        debug!(
            first_sequence = span.first_sequence,
            last_sequence = span.last_sequence,
            frames = span.frame_count,
            reason = ?end_reason,
            "Speech ended"
        );

        Ok(SpeechSegment {
            bytes,
            container: self.config.container,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            frame_count: span.frame_count,
            pre_roll_frames: span.pre_roll_frames,
            first_sequence: span.first_sequence,
            last_sequence: span.last_sequence,
            end_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{AudioFrameSource, VecFrameSource, flat_frame};
    use crate::audio::wav::RIFF_HEADER_LEN;

    const NOISE_DB: f32 = -100.0;
    const SPEECH_DB: f32 = -30.0;

    fn mono_format() -> FrameFormat {
        FrameFormat {
            sample_rate: 16000,
            channels: 1,
            frame_len: 512,
            fft_size: 512,
        }
    }

    fn test_config() -> VadConfig {
        VadConfig {
            pre_roll_frames: 8,
            max_utterance_ms: 0,
            ..VadConfig::default()
        }
    }

    /// Feeds the runs through a detector, returning it and every emitted event.
    fn run(config: VadConfig, runs: &[(usize, f32)]) -> (VoiceActivityDetector, Vec<VadEvent>) {
        let format = mono_format();
        let mut detector = VoiceActivityDetector::new(format, config);
        let mut source = VecFrameSource::from_levels(format, runs);
        let mut events = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            if let Some(event) = detector.process(frame).unwrap() {
                events.push(event);
            }
        }
        (detector, events)
    }

    fn segment(event: &VadEvent) -> &SpeechSegment {
        match event {
            VadEvent::SpeechEnd(segment) => segment,
            other => panic!("Expected SpeechEnd, got {:?}", other),
        }
    }

    #[test]
    fn test_energy_of_flat_spectrum() {
        let format = mono_format();
        let mut detector = VoiceActivityDetector::new(format, test_config());
        let outcome = detector
            .process_with_info(flat_frame(&format, 0, SPEECH_DB))
            .unwrap();
        // 57 bins in band, each (10^-3)^2
        assert!((outcome.energy - 5.7e-5).abs() < 1e-9);
        assert!((outcome.signal - (5.7e-5 - 1e-8)).abs() < 1e-9);
        assert_eq!(outcome.state.voice_trend, 1);
    }

    #[test]
    fn test_noise_only_stays_idle() {
        let (detector, events) = run(test_config(), &[(150, NOISE_DB)]);
        assert!(events.is_empty());
        let state = detector.state();
        assert!(!state.active);
        assert_eq!(state.voice_trend, 0);
        assert!(state.energy_offset > 0.0);
        assert!(state.energy_offset < 1e-17);
        // idle history keeps the trigger candidate plus pre-roll
        assert_eq!(detector.buffered_frames(), 9);
    }

    #[test]
    fn test_single_utterance_is_segmented() {
        let (detector, events) = run(test_config(), &[(150, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], VadEvent::SpeechStart { sequence: 155 });

        let segment = segment(&events[1]);
        assert_eq!(segment.end_reason, SegmentEnd::Silence);
        assert_eq!(segment.first_sequence, 147);
        assert_eq!(segment.last_sequence, 185);
        assert_eq!(segment.frame_count, 39);
        assert_eq!(segment.pre_roll_frames, 8);
        assert_eq!(segment.channels, 1);
        assert_eq!(segment.bytes.len(), RIFF_HEADER_LEN + 39 * 512 * 2);
        assert_eq!(&segment.bytes[0..4], b"RIFF");

        let state = detector.state();
        assert!(!state.active);
        assert_eq!(state.voice_trend, -10);
    }

    #[test]
    fn test_two_utterances() {
        let (_, events) = run(
            test_config(),
            &[(150, NOISE_DB), (30, SPEECH_DB), (150, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)],
        );

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], VadEvent::SpeechStart { sequence: 155 });
        let first = segment(&events[1]);
        assert_eq!((first.first_sequence, first.last_sequence), (147, 185));
        assert_eq!(events[2], VadEvent::SpeechStart { sequence: 335 });
        let second = segment(&events[3]);
        assert_eq!((second.first_sequence, second.last_sequence), (327, 365));
        assert_eq!(second.frame_count, 39);
    }

    #[test]
    fn test_pre_roll_clamped_at_stream_start() {
        let (_, events) = run(test_config(), &[(3, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)]);

        assert_eq!(events[0], VadEvent::SpeechStart { sequence: 11 });
        let segment = segment(&events[1]);
        assert_eq!(segment.first_sequence, 3);
        assert_eq!(segment.last_sequence, 38);
        assert_eq!(segment.frame_count, 36);
    }

    #[test]
    fn test_default_pre_roll_of_128_frames() {
        let config = VadConfig {
            max_utterance_ms: 0,
            ..VadConfig::default()
        };
        let (_, events) = run(config, &[(150, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)]);

        let segment = segment(&events[1]);
        assert_eq!(segment.first_sequence, 27);
        assert_eq!(segment.last_sequence, 185);
        assert_eq!(segment.frame_count, 159);
        assert_eq!(segment.pre_roll_frames, 128);
    }

    #[test]
    fn test_max_utterance_forces_end() {
        // 640 ms = 20 frames of 32 ms
        let config = VadConfig {
            max_utterance_ms: 640,
            ..test_config()
        };
        let (detector, events) = run(config, &[(150, NOISE_DB), (200, SPEECH_DB)]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], VadEvent::SpeechStart { sequence: 155 });
        let segment = segment(&events[1]);
        assert_eq!(segment.end_reason, SegmentEnd::MaxDuration);
        assert_eq!((segment.first_sequence, segment.last_sequence), (147, 166));
        assert_eq!(segment.frame_count, 20);
        assert!(!detector.state().active);
    }

    #[test]
    fn test_flush_finalizes_open_utterance() {
        let (mut detector, events) = run(test_config(), &[(150, NOISE_DB), (30, SPEECH_DB)]);
        assert_eq!(events.len(), 1);
        assert!(detector.state().active);

        let segment = detector.flush().unwrap().unwrap();
        assert_eq!(segment.end_reason, SegmentEnd::EndOfStream);
        assert_eq!(segment.frame_count, 33);
        assert_eq!(segment.first_sequence, 147);
        assert!(!detector.state().active);

        assert!(detector.flush().unwrap().is_none());
    }

    #[test]
    fn test_flush_when_idle_is_none() {
        let (mut detector, _) = run(test_config(), &[(10, NOISE_DB)]);
        assert!(detector.flush().unwrap().is_none());
    }

    #[test]
    fn test_clear_aborts_without_segment() {
        let (mut detector, _) = run(test_config(), &[(150, NOISE_DB), (30, SPEECH_DB)]);
        let floor = detector.state().energy_offset;

        detector.clear();
        assert!(!detector.state().active);
        assert_eq!(detector.buffered_frames(), 0);
        assert_eq!(detector.state().energy_offset, floor);
        assert!(detector.flush().unwrap().is_none());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let (mut detector, _) = run(test_config(), &[(150, NOISE_DB), (30, SPEECH_DB)]);
        detector.reset();

        let fresh = VoiceActivityDetector::new(mono_format(), test_config());
        assert_eq!(detector.state(), fresh.state());
        assert_eq!(detector.buffered_frames(), 0);
    }

    #[test]
    fn test_raw_container_segment() {
        let config = VadConfig {
            container: SegmentContainer::Raw,
            ..test_config()
        };
        let (_, events) = run(config, &[(150, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)]);
        let segment = segment(&events[1]);
        assert_eq!(segment.container, SegmentContainer::Raw);
        assert_eq!(segment.bytes.len(), 39 * 512 * 2);
    }

    #[test]
    fn test_stereo_segment_is_interleaved() {
        let format = FrameFormat {
            channels: 2,
            ..mono_format()
        };
        let mut detector = VoiceActivityDetector::new(format, test_config());
        let mut sequence = 0u64;
        let mut segment = None;
        for &(count, db) in &[(150usize, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)] {
            for _ in 0..count {
                let frame = AudioFrame::new(
                    sequence,
                    vec![vec![0.5; 512], vec![-0.5; 512]],
                    vec![db; 256],
                );
                if let Some(VadEvent::SpeechEnd(s)) = detector.process(frame).unwrap() {
                    segment = Some(s);
                }
                sequence += 1;
            }
        }

        let segment = segment.unwrap();
        assert_eq!(segment.channels, 2);
        assert_eq!(segment.bytes.len(), RIFF_HEADER_LEN + 39 * 512 * 2 * 2);
        let left = i16::from_le_bytes([segment.bytes[44], segment.bytes[45]]);
        let right = i16::from_le_bytes([segment.bytes[46], segment.bytes[47]]);
        assert_eq!((left, right), (16383, -16384));
    }

    #[test]
    fn test_rejects_mismatched_spectrum() {
        let format = mono_format();
        let mut detector = VoiceActivityDetector::new(format, test_config());
        let frame = AudioFrame::new(0, vec![vec![0.0; 512]], vec![NOISE_DB; 128]);
        assert!(matches!(
            detector.process(frame),
            Err(SpeechflowError::AudioFormatMismatch { .. })
        ));
    }

    #[test]
    fn test_silent_spectrum_counts_as_zero_energy() {
        let format = mono_format();
        let mut detector = VoiceActivityDetector::new(format, test_config());
        let outcome = detector
            .process_with_info(flat_frame(&format, 0, f32::NEG_INFINITY))
            .unwrap();
        assert_eq!(outcome.energy, 0.0);
        assert_eq!(outcome.state.voice_trend, -1);
    }

    /// Deterministic pseudo-random dB levels between -120 and 0.
    fn noisy_levels(count: usize, mut seed: u64) -> Vec<f32> {
        (0..count)
            .map(|_| {
                seed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                -(((seed >> 33) % 120) as f32)
            })
            .collect()
    }

    #[test]
    fn test_floor_and_trend_stay_bounded() {
        let format = mono_format();
        for seed in [1u64, 7, 42, 1234] {
            let mut detector = VoiceActivityDetector::new(format, test_config());
            for (i, db) in noisy_levels(2000, seed).into_iter().enumerate() {
                let outcome = detector
                    .process_with_info(flat_frame(&format, i as u64, db))
                    .unwrap();
                assert!(outcome.state.energy_offset >= 0.0);
                assert!((-10..=10).contains(&outcome.state.voice_trend));
            }
        }
    }

    #[test]
    fn test_start_and_end_alternate() {
        let format = mono_format();
        let config = VadConfig {
            max_utterance_ms: 2000,
            ..test_config()
        };
        for seed in [3u64, 99] {
            let mut detector = VoiceActivityDetector::new(format, config.clone());
            let mut open = false;
            // bursts of loud and quiet frames so utterances actually occur
            let levels = noisy_levels(3000, seed)
                .into_iter()
                .enumerate()
                .map(|(i, db)| if (i / 200) % 2 == 1 { db.max(-40.0) } else { db.min(-90.0) });
            for (i, db) in levels.enumerate() {
                match detector.process(flat_frame(&format, i as u64, db)).unwrap() {
                    Some(VadEvent::SpeechStart { .. }) => {
                        assert!(!open, "nested SpeechStart at frame {}", i);
                        open = true;
                    }
                    Some(VadEvent::SpeechEnd(segment)) => {
                        assert!(open, "SpeechEnd without start at frame {}", i);
                        assert!(segment.frame_count > 0);
                        open = false;
                    }
                    None => {}
                }
            }
        }
    }

    #[test]
    fn test_segment_duration() {
        let (_, events) = run(test_config(), &[(150, NOISE_DB), (30, SPEECH_DB), (40, NOISE_DB)]);
        let segment = segment(&events[1]);
        assert!((segment.duration(512).as_secs_f64() - 1.248).abs() < 1e-6);
    }
}
