//! Background estimation (SNIP: statistics-sensitive non-linear iterative
//! peak clipping).
//!
//! Steps:
//!
//! - smooth the spectrum with a 5-channel boxcar
//! - compress it with `log(log(s + 1) + 1)` so peaks and continuum have
//!   comparable dynamic range
//! - clip every channel to the mean of its neighbours `±window` away, where
//!   the window follows the detector FWHM at that channel's energy; a few
//!   passes at full width, then the window shrinks by `decrease_factor`
//!   until it falls under `width_threshold` channels
//! - undo the compression; non-finite values become 0

use tracing::debug;

use crate::math::lineshapes::{Calibration, FWHM_TO_SIGMA};

/// Estimates a smooth continuum under a spectrum.
pub trait BackgroundEstimator: Send + Sync {
    /// `width` is the clipping window in units of the local peak FWHM.
    fn estimate(&self, spectrum: &[f64], calibration: Calibration, width: f64) -> Vec<f64>;
}

/// SNIP with an energy-dependent window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snip {
    /// Electron-hole pair energy used for the FWHM model (eV).
    pub epsilon: f64,
    /// Passes at full window width.
    pub full_width_passes: usize,
    pub decrease_factor: f64,
    /// Smallest window (channels) still applied.
    pub width_threshold: f64,
}

impl Default for Snip {
    fn default() -> Self {
        Self {
            epsilon: 2.96,
            full_width_passes: 2,
            decrease_factor: std::f64::consts::SQRT_2,
            width_threshold: 0.5,
        }
    }
}

impl BackgroundEstimator for Snip {
    fn estimate(&self, spectrum: &[f64], calibration: Calibration, width: f64) -> Vec<f64> {
        let n = spectrum.len();
        if n == 0 {
            return Vec::new();
        }

        let mut bg: Vec<f64> = boxcar5(spectrum)
            .into_iter()
            .map(|s| (s.max(0.0) + 1.0).ln().ln_1p())
            .collect();

        // Window half-width in channels, from the FWHM at each channel.
        let offset_term = (calibration.e_offset / FWHM_TO_SIGMA).powi(2);
        let mut window: Vec<f64> = (0..n)
            .map(|i| {
                let energy = calibration.energy(i as f64);
                let var = (offset_term + energy * self.epsilon * calibration.e_linear).max(0.0);
                let w = width * FWHM_TO_SIGMA * var.sqrt() / calibration.e_linear;
                // a degenerate calibration must not stall the shrinking loop
                if w.is_finite() { w } else { 0.0 }
            })
            .collect();

        for _ in 0..self.full_width_passes {
            clip_pass(&mut bg, &window);
        }

        let mut passes = self.full_width_passes;
        while window.iter().copied().fold(f64::NEG_INFINITY, f64::max) >= self.width_threshold {
            clip_pass(&mut bg, &window);
            for w in &mut window {
                *w /= self.decrease_factor;
            }
            passes += 1;
        }
        debug!(channels = n, passes, "snip background estimated");

        bg.into_iter()
            .map(|b| {
                let v = b.exp_m1().exp() - 1.0;
                if v.is_finite() { v } else { 0.0 }
            })
            .collect()
    }
}

/// One clipping pass; every channel compares against the previous pass.
fn clip_pass(bg: &mut [f64], window: &[f64]) {
    let last = (bg.len() - 1) as f64;
    let snapshot = bg.to_vec();
    for (i, value) in bg.iter_mut().enumerate() {
        let x = i as f64;
        let lo = (x - window[i]).clamp(0.0, last) as usize;
        let hi = (x + window[i]).clamp(0.0, last) as usize;
        let mean = 0.5 * (snapshot[lo] + snapshot[hi]);
        if *value > mean {
            *value = mean;
        }
    }
}

/// 5-point moving average, zero-padded at the ends.
fn boxcar5(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(2);
            let hi = (i + 2).min(n - 1);
            y[lo..=hi].iter().sum::<f64>() / 5.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::lineshapes::gaussian;

    fn calibration() -> Calibration {
        Calibration {
            e_offset: 0.0,
            e_linear: 0.01,
            e_quadratic: 0.0,
        }
    }

    #[test]
    fn removes_peak_and_keeps_continuum() {
        let spectrum: Vec<f64> = (0..1000)
            .map(|i| {
                let e = i as f64 * 0.01;
                50.0 + gaussian(e, 100.0, 5.0, 0.07)
            })
            .collect();
        let bg = Snip::default().estimate(&spectrum, calibration(), 0.5);

        assert_eq!(bg.len(), spectrum.len());
        assert!(bg.iter().all(|v| v.is_finite() && *v >= 0.0));
        // the peak (about 570 counts above continuum at 5 keV) is clipped away
        assert!(bg[500] < 60.0, "{}", bg[500]);
        // continuum away from the peak and the edges survives
        assert!((bg[250] - 50.0).abs() < 2.0, "{}", bg[250]);
        assert!((bg[750] - 50.0).abs() < 2.0, "{}", bg[750]);
    }

    #[test]
    fn background_never_exceeds_smoothed_spectrum() {
        let spectrum: Vec<f64> = (0..400).map(|i| ((i * 7919) % 97) as f64).collect();
        let bg = Snip::default().estimate(&spectrum, calibration(), 1.0);
        let smooth = boxcar5(&spectrum);
        for (b, s) in bg.iter().zip(&smooth) {
            assert!(*b <= s + 1e-9);
        }
    }

    #[test]
    fn zero_channel_width_terminates() {
        let flat = Calibration {
            e_offset: 0.1,
            e_linear: 0.0,
            e_quadratic: 0.0,
        };
        let bg = Snip::default().estimate(&[10.0; 200], flat, 0.5);
        assert_eq!(bg.len(), 200);
        assert!(bg.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn empty_spectrum_gives_empty_background() {
        assert!(Snip::default().estimate(&[], calibration(), 0.5).is_empty());
    }
}
