//! On-axis MTF by direct pupil autocorrelation.

use crate::optics::{ForwardModel, MtfSamples, OpticsError, Pupil, SetupParameters, Wavefront};
use nalgebra::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Direction of the pupil shear for one MTF azimuth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Azimuth {
    /// Frequencies along y.
    #[serde(rename = "Tan", alias = "T", alias = "tan")]
    Tangential,
    /// Frequencies along x.
    #[serde(rename = "Sag", alias = "S", alias = "sag")]
    Sagittal,
}

/// Forward model computing the OTF as the normalized overlap integral of the
/// pupil function with a sheared copy of itself.
///
/// The shear for frequency ν is `2ν / ν_c` in normalized pupil radii, where
/// `ν_c = 1000 / (λ F#)` is the incoherent cutoff. The unsheared phase comes
/// from the sampled [`Pupil`]; the sheared phase is evaluated analytically so
/// any frequency can be sampled without interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutocorrelationModel;

impl AutocorrelationModel {
    /// Modulus of the OTF at one normalized shear.
    pub fn otf_modulus(pupil: &Pupil, wavefront: &Wavefront, shear: f64, azimuth: Azimuth) -> f64 {
        if shear >= 2.0 || pupil.aperture_count() == 0 {
            return 0.0;
        }
        let sum = pupil
            .aperture_points()
            .filter_map(|(x, y, phase)| {
                let (sx, sy) = match azimuth {
                    Azimuth::Tangential => (x, y - shear),
                    Azimuth::Sagittal => (x - shear, y),
                };
                (sx * sx + sy * sy <= 1.0).then(|| {
                    let delta = phase - wavefront.phase_at(sx, sy);
                    Complex::new((TAU * delta).cos(), (TAU * delta).sin())
                })
            })
            .fold(Complex::new(0.0, 0.0), |acc, value| acc + value);
        sum.norm() / pupil.aperture_count() as f64
    }
}

impl ForwardModel for AutocorrelationModel {
    fn mtf_ts(
        &self,
        setup: &SetupParameters,
        wavefront: &Wavefront,
    ) -> Result<MtfSamples, OpticsError> {
        let pupil = Pupil::from_wavefront(wavefront, setup.samples)?;
        let cutoff = setup.cutoff_frequency();
        let sample = |azimuth: Azimuth| -> Vec<f64> {
            setup
                .freqs
                .iter()
                .map(|freq| Self::otf_modulus(&pupil, wavefront, 2.0 * freq / cutoff, azimuth))
                .collect()
        };
        Ok(MtfSamples {
            tan: sample(Azimuth::Tangential),
            sag: sample(Azimuth::Sagittal),
        })
    }
}

/// Diffraction-limited MTF of a circular aperture at `freqs` (cy/mm).
pub fn diffraction_limited_mtf(fno: f64, wavelength: f64, freqs: &[f64]) -> Vec<f64> {
    let cutoff = 1000.0 / (wavelength * fno);
    freqs
        .iter()
        .map(|freq| {
            let x = (freq / cutoff).abs();
            if x >= 1.0 {
                0.0
            } else {
                2.0 / PI * (x.acos() - x * (1.0 - x * x).sqrt())
            }
        })
        .collect()
}
