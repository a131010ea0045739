//! Default configuration constants for speechflow.
//!
//! Shared by the TOML configuration, the detector and the queue station so the
//! tuning lives in one place.

/// Default capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Default number of captured channels.
pub const CHANNELS: u16 = 2;

/// Samples per channel in one captured block.
pub const FRAME_LEN: usize = 512;

/// FFT size of the upstream spectrum. The spectrum has `FFT_SIZE / 2` bins.
pub const FFT_SIZE: usize = 512;

/// Time constant of the spectrum smoothing (0 = none, close to 1 = heavy).
pub const SPECTRUM_SMOOTHING: f32 = 0.99;

/// Initial adaptive energy floor.
pub const ENERGY_OFFSET: f64 = 1e-8;

/// Signal must exceed the floor times this ratio to count as voice.
pub const THRESHOLD_RATIO_POS: f64 = 2.0;

/// Signal must drop below minus the floor times this ratio to count as silence.
pub const THRESHOLD_RATIO_NEG: f64 = 0.5;

/// Floor integration gain, relative to the signal, per second.
pub const ENERGY_INTEGRATION: f64 = 1.0;

/// Floor recovery multiplier once the end of an utterance has been detected.
pub const FLOOR_RECOVERY_BOOST: f64 = 10.0;

/// Upper clamp of the hysteresis trend.
pub const TREND_MAX: i32 = 10;

/// Lower clamp of the hysteresis trend.
pub const TREND_MIN: i32 = -10;

/// Trend above which speech is considered started.
pub const TREND_START: i32 = 5;

/// Trend below which speech is considered ended.
pub const TREND_END: i32 = -5;

/// Frames kept from before the speech trigger so onsets are not clipped.
pub const PRE_ROLL_FRAMES: usize = 128;

/// Upper bound of a single utterance. Longer speech is split.
pub const MAX_UTTERANCE_MS: u32 = 30_000;

/// Band-pass breakpoints as `(frequency_hz, weight)`: 0 below 200 Hz, 1 up to 2 kHz.
pub const FILTER_BREAKPOINTS: [(f32, f32); 2] = [(200.0, 0.0), (2000.0, 1.0)];

/// Default recognition locale.
pub const DEFAULT_LOCALE: &str = "en-us";

/// Default synthesis voice locale.
pub const DEFAULT_VOICE_LOCALE: &str = "en-US";

/// Default synthesis voice name.
pub const DEFAULT_VOICE_NAME: &str = "Microsoft Server Speech Text to Speech Voice (en-US, BenjaminRUS)";

/// Buffer size of the channels connecting pipeline stages.
pub const CHANNEL_BUFFER_SIZE: usize = 100;

/// Number of frames covering `ms` milliseconds at the given geometry (rounded up).
pub fn frames_for_ms(ms: u32, sample_rate: u32, frame_len: usize) -> usize {
    if sample_rate == 0 || frame_len == 0 {
        return 0;
    }
    let samples = ms as u64 * sample_rate as u64 / 1000;
    samples.div_ceil(frame_len as u64) as usize
}
