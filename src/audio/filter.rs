//! Frequency weighting applied to the spectrum before energy integration.

use serde::{Deserialize, Serialize};

/// One breakpoint of a piecewise-constant frequency response.
///
/// Every bin below `frequency_hz` (and at or above the previous breakpoint)
/// gets `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterBreakpoint {
    pub frequency_hz: f32,
    pub weight: f32,
}

impl FilterBreakpoint {
    pub const fn new(frequency_hz: f32, weight: f32) -> Self {
        Self {
            frequency_hz,
            weight,
        }
    }
}

/// Default speech band: 0 below 200 Hz, 1 up to 2 kHz, 0 above.
pub fn speech_band() -> Vec<FilterBreakpoint> {
    crate::defaults::FILTER_BREAKPOINTS
        .iter()
        .map(|&(frequency_hz, weight)| FilterBreakpoint::new(frequency_hz, weight))
        .collect()
}

/// Per-bin weights derived once from a breakpoint list.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterWeights {
    weights: Vec<f64>,
}

impl FilterWeights {
    /// Builds the weight table for `bins` bins of `hertz_per_bin` each.
    ///
    /// Bin `i` sits at `i * hertz_per_bin` and takes the weight of the first
    /// breakpoint whose frequency exceeds it; bins past the last breakpoint get 0.
    pub fn from_breakpoints(breakpoints: &[FilterBreakpoint], bins: usize, hertz_per_bin: f64) -> Self {
        let weights = (0..bins)
            .map(|i| {
                let frequency = i as f64 * hertz_per_bin;
                breakpoints
                    .iter()
                    .find(|bp| frequency < bp.frequency_hz as f64)
                    .map_or(0.0, |bp| bp.weight as f64)
            })
            .collect();
        Self { weights }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Weighted energy of a linear power spectrum: `Σ w[i] * p[i]²`.
    pub fn energy(&self, linear: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(linear)
            .map(|(w, p)| w * p * p)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_band_weights_at_16khz() {
        // 16kHz / 512 → 31.25 Hz per bin
        let weights = FilterWeights::from_breakpoints(&speech_band(), 256, 31.25);
        assert_eq!(weights.len(), 256);

        let w = weights.as_slice();
        // 6 * 31.25 = 187.5 < 200
        assert_eq!(w[0], 0.0);
        assert_eq!(w[6], 0.0);
        // 7 * 31.25 = 218.75
        assert_eq!(w[7], 1.0);
        // 63 * 31.25 = 1968.75 < 2000
        assert_eq!(w[63], 1.0);
        // 64 * 31.25 = 2000, not below the last breakpoint
        assert_eq!(w[64], 0.0);
        assert_eq!(w[255], 0.0);

        let passband = w.iter().filter(|&&x| x == 1.0).count();
        assert_eq!(passband, 57);
    }

    #[test]
    fn test_breakpoint_exactly_on_bin_goes_to_next_segment() {
        let breakpoints = [FilterBreakpoint::new(100.0, 0.25), FilterBreakpoint::new(300.0, 0.75)];
        let weights = FilterWeights::from_breakpoints(&breakpoints, 4, 100.0);
        assert_eq!(weights.as_slice(), &[0.25, 0.75, 0.75, 0.0]);
    }

    #[test]
    fn test_empty_breakpoints_give_zero_weights() {
        let weights = FilterWeights::from_breakpoints(&[], 8, 10.0);
        assert!(weights.as_slice().iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_energy_is_weighted_sum_of_squares() {
        let breakpoints = [FilterBreakpoint::new(20.0, 1.0), FilterBreakpoint::new(40.0, 0.5)];
        let weights = FilterWeights::from_breakpoints(&breakpoints, 4, 10.0);
        // weights: [1, 1, 0.5, 0.5]
        let energy = weights.energy(&[1.0, 2.0, 2.0, 4.0]);
        assert!((energy - (1.0 + 4.0 + 2.0 + 8.0)).abs() < 1e-12);
    }
}
