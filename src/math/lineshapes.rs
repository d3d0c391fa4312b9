//! Peak shapes evaluated on a channel axis.
//!
//! All shapes first map channels to energy with the quadratic calibration
//!
//! ```text
//! E(x) = e_offset + e_linear·x + e_quadratic·x²
//! ```
//!
//! and broaden lines with the detector model
//!
//! ```text
//! σ(E) = sqrt((fwhm_offset / 2.3548)² + E·epsilon·fwhm_fanoprime)
//! ```
//!
//! Areas are exact: a Gaussian with `area = A` integrates to `A` over energy.

use std::f64::consts::{PI, SQRT_2};

/// `2·sqrt(2·ln 2)`: FWHM of a unit-sigma Gaussian.
pub const FWHM_TO_SIGMA: f64 = 2.354_820_045_030_949_4;

/// Electron rest energy in keV.
const ELECTRON_REST_KEV: f64 = 511.0;

/// Channel → energy.
pub fn calibrate(x: f64, e_offset: f64, e_linear: f64, e_quadratic: f64) -> f64 {
    e_offset + e_linear * x + e_quadratic * x * x
}

/// Detector broadening at `energy`.
pub fn detector_sigma(energy: f64, fwhm_offset: f64, fwhm_fanoprime: f64, epsilon: f64) -> f64 {
    let s = fwhm_offset / FWHM_TO_SIGMA;
    (s * s + energy * epsilon * fwhm_fanoprime).sqrt()
}

/// Normalized-area Gaussian `area/(σ√(2π))·exp(-(x-c)²/(2σ²))`.
///
/// Non-positive or non-finite `sigma` evaluates to 0.
pub fn gaussian(x: f64, area: f64, center: f64, sigma: f64) -> f64 {
    if !(sigma > 0.0 && sigma.is_finite()) {
        return 0.0;
    }
    let z = (x - center) / sigma;
    area / (sigma * (2.0 * PI).sqrt()) * (-0.5 * z * z).exp()
}

/// Complementary error function (Abramowitz & Stegun 7.1.26, |ε| < 1.5e-7).
pub fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736
                + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    poly * (-x * x).exp()
}

/// Step below a peak: `area·erfc((x-c)/(√2σ)) / (2·peak_e)`.
pub fn gaussian_step(x: f64, area: f64, center: f64, sigma: f64, peak_e: f64) -> f64 {
    area * erfc((x - center) / (SQRT_2 * sigma)) / (2.0 * peak_e)
}

/// Exponential tail on the low-energy side of a peak.
///
/// A non-positive `gamma` or `sigma` has no tail and gives 0.
pub fn gaussian_tail(x: f64, area: f64, center: f64, sigma: f64, gamma: f64) -> f64 {
    if !(gamma > 0.0 && sigma > 0.0 && gamma.is_finite() && sigma.is_finite()) {
        return 0.0;
    }
    let dx = x - center;
    let norm = 2.0 * gamma * sigma * (-0.5 / (gamma * gamma)).exp();
    let decay = (dx.min(0.0) / (gamma * sigma)).exp();
    area / norm * decay * erfc(dx / (SQRT_2 * sigma) + 1.0 / (gamma * SQRT_2))
}

/// Energy calibration coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub e_offset: f64,
    pub e_linear: f64,
    pub e_quadratic: f64,
}

impl Calibration {
    pub fn energy(&self, x: f64) -> f64 {
        calibrate(x, self.e_offset, self.e_linear, self.e_quadratic)
    }

    pub fn energies(&self, channels: &[f64]) -> Vec<f64> {
        channels.iter().map(|&x| self.energy(x)).collect()
    }
}

/// Detector broadening coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Broadening {
    pub fwhm_offset: f64,
    pub fwhm_fanoprime: f64,
    pub epsilon: f64,
}

impl Broadening {
    pub fn sigma(&self, energy: f64) -> f64 {
        detector_sigma(energy, self.fwhm_offset, self.fwhm_fanoprime, self.epsilon)
    }
}

/// Arguments of [`element_peak`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParams {
    pub area: f64,
    pub center: f64,
    pub delta_center: f64,
    pub delta_sigma: f64,
    pub ratio: f64,
    pub ratio_adjust: f64,
    pub broadening: Broadening,
    pub calibration: Calibration,
}

/// One emission line: a Gaussian at `center + delta_center` of width
/// `delta_sigma + σ(center)`, scaled by `area·ratio·ratio_adjust`.
pub fn element_peak(channels: &[f64], p: &PeakParams) -> Vec<f64> {
    let sigma = p.delta_sigma + p.broadening.sigma(p.center);
    let area = p.area * p.ratio * p.ratio_adjust;
    let center = p.center + p.delta_center;
    channels
        .iter()
        .map(|&x| gaussian(p.calibration.energy(x), area, center, sigma))
        .collect()
}

/// Arguments of [`elastic_peak`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticParams {
    pub amplitude: f64,
    pub energy: f64,
    pub broadening: Broadening,
    pub calibration: Calibration,
}

/// Coherent scatter: a Gaussian at the beam energy.
pub fn elastic_peak(channels: &[f64], p: &ElasticParams) -> Vec<f64> {
    let sigma = p.broadening.sigma(p.energy);
    channels
        .iter()
        .map(|&x| gaussian(p.calibration.energy(x), p.amplitude, p.energy, sigma))
        .collect()
}

/// Arguments of [`compton_peak`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComptonParams {
    pub amplitude: f64,
    /// Incident (elastic) energy.
    pub energy: f64,
    /// Scattering angle in degrees.
    pub angle: f64,
    pub fwhm_corr: f64,
    pub f_step: f64,
    pub f_tail: f64,
    pub gamma: f64,
    pub hi_f_tail: f64,
    pub hi_gamma: f64,
    pub broadening: Broadening,
    pub calibration: Calibration,
}

impl ComptonParams {
    /// Energy after inelastic scattering through `angle`.
    pub fn shifted_energy(&self) -> f64 {
        let cos = (self.angle * PI / 180.0).cos();
        self.energy / (1.0 + self.energy / ELECTRON_REST_KEV * (1.0 - cos))
    }
}

/// Compton scatter: widened Gaussian core plus optional step and two tails.
pub fn compton_peak(channels: &[f64], p: &ComptonParams) -> Vec<f64> {
    let compton_e = p.shifted_energy();
    let sigma = p.broadening.sigma(compton_e);
    let factor = 1.0 / (1.0 + p.f_step + p.f_tail + p.hi_f_tail);
    let area = p.amplitude;

    channels
        .iter()
        .map(|&ch| {
            let x = p.calibration.energy(ch);
            let mut y = gaussian(x, area, compton_e, sigma * p.fwhm_corr);
            if p.f_step > 0.0 {
                y += p.f_step * gaussian_step(x, area, compton_e, sigma, compton_e);
            }
            if p.f_tail != 0.0 {
                y += p.f_tail * gaussian_tail(x, area, compton_e, sigma, p.gamma);
            }
            if p.hi_f_tail != 0.0 {
                y += p.hi_f_tail * gaussian_tail(-x, area, -compton_e, sigma, p.hi_gamma);
            }
            factor * y
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Calibration {
        Calibration {
            e_offset: 0.0,
            e_linear: 0.01,
            e_quadratic: 0.0,
        }
    }

    fn broadening() -> Broadening {
        Broadening {
            fwhm_offset: 0.12,
            fwhm_fanoprime: 1.1e-4,
            epsilon: 2.96,
        }
    }

    fn channels() -> Vec<f64> {
        (0..2000u32).map(f64::from).collect()
    }

    #[test]
    fn gaussian_integrates_to_area() {
        let dx = 0.001;
        let total: f64 = (0..20_000)
            .map(|i| gaussian(i as f64 * dx, 3.0, 10.0, 0.1) * dx)
            .sum();
        assert!((total - 3.0).abs() < 1e-9, "{total}");
        assert_eq!(gaussian(1.0, 1.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn erfc_matches_reference_points() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-7);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 2e-7);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 2e-7);
        assert!(erfc(6.0) < 1e-15);
    }

    #[test]
    fn element_peak_area_and_position() {
        let p = PeakParams {
            area: 500.0,
            center: 6.4,
            delta_center: 0.01,
            delta_sigma: 0.0,
            ratio: 0.5,
            ratio_adjust: 2.0,
            broadening: broadening(),
            calibration: identity(),
        };
        let y = element_peak(&channels(), &p);
        // channel spacing is 0.01 keV, so counts sum to area / 0.01
        let total: f64 = y.iter().sum::<f64>() * 0.01;
        assert!((total - 500.0).abs() < 1e-6, "{total}");
        let argmax = y
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax, 641);
    }

    #[test]
    fn compton_sits_below_elastic_and_keeps_area() {
        let p = ComptonParams {
            amplitude: 1000.0,
            energy: 12.0,
            angle: 90.0,
            fwhm_corr: 1.5,
            f_step: 0.0,
            f_tail: 0.1,
            gamma: 2.0,
            hi_f_tail: 0.01,
            hi_gamma: 1.0,
            broadening: broadening(),
            calibration: identity(),
        };
        let shifted = p.shifted_energy();
        assert!((shifted - 11.7247).abs() < 1e-3, "{shifted}");

        let y = compton_peak(&channels(), &p);
        assert!(y.iter().all(|v| v.is_finite() && *v >= 0.0));
        let total: f64 = y.iter().sum::<f64>() * 0.01;
        // the tails are truncated above the peak, so a little area is lost
        assert!(total > 990.0 && total < 1000.0, "{total}");
    }

    #[test]
    fn elastic_is_a_gaussian_at_beam_energy() {
        let p = ElasticParams {
            amplitude: 200.0,
            energy: 12.0,
            broadening: broadening(),
            calibration: identity(),
        };
        let y = elastic_peak(&channels(), &p);
        let sigma = broadening().sigma(12.0);
        assert!((y[1200] - gaussian(12.0, 200.0, 12.0, sigma)).abs() < 1e-12);
    }

    #[test]
    fn zero_gamma_tails_stay_finite() {
        assert_eq!(gaussian_tail(5.0, 100.0, 6.0, 0.1, 0.0), 0.0);
        let p = ComptonParams {
            amplitude: 1000.0,
            energy: 12.0,
            angle: 90.0,
            fwhm_corr: 1.5,
            f_step: 0.0,
            f_tail: 0.0,
            gamma: 0.0,
            hi_f_tail: 0.01,
            hi_gamma: 0.0,
            broadening: broadening(),
            calibration: identity(),
        };
        let y = compton_peak(&channels(), &p);
        assert!(y.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(y.iter().sum::<f64>() > 0.0);
    }
}
