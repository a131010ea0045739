//! Magnitude spectrum producer for frame sources.
//!
//! Mirrors what a real-time analyser node reports: Blackman-windowed FFT of
//! the most recent `fft_size` samples, normalized by the FFT size, smoothed
//! over time and converted to dB.

use crate::error::{Result, SpeechflowError};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

const BLACKMAN_ALPHA: f32 = 0.16;

/// Rolling FFT analyser producing one dB spectrum per call to [`analyze`].
///
/// [`analyze`]: SpectrumAnalyzer::analyze
pub struct SpectrumAnalyzer {
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    recent: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .finish_non_exhaustive()
    }
}

impl SpectrumAnalyzer {
    /// Creates an analyser. `fft_size` must be a power of two, `smoothing` in `[0, 1)`.
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(SpeechflowError::ConfigInvalidValue {
                key: "capture.fft_size".to_string(),
                message: format!("{} is not a power of two", fft_size),
            });
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(SpeechflowError::ConfigInvalidValue {
                key: "capture.smoothing".to_string(),
                message: format!("{} is outside [0, 1)", smoothing),
            });
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Ok(Self {
            fft_size,
            smoothing,
            window: blackman_window(fft_size),
            fft,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            recent: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins returned by [`analyze`](Self::analyze).
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Appends mono samples, keeping only the most recent `fft_size`.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.recent.len() == self.fft_size {
                self.recent.pop_front();
            }
            self.recent.push_back(sample);
        }
    }

    /// Computes the smoothed magnitude spectrum of the current window in dB.
    ///
    /// Bins with zero magnitude report `f32::NEG_INFINITY`.
    pub fn analyze(&mut self) -> Vec<f32> {
        for ((slot, &sample), &w) in self.scratch.iter_mut().zip(&self.recent).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        for (m, x) in self.smoothed.iter_mut().zip(&self.scratch) {
            let magnitude = x.norm() * scale;
            let next = tau * *m + (1.0 - tau) * magnitude;
            *m = if next.is_finite() { next } else { 0.0 };
        }

        self.smoothed.iter().map(|&m| 20.0 * m.log10()).collect()
    }

    /// Forgets buffered samples and smoothing history.
    pub fn reset(&mut self) {
        self.recent.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
