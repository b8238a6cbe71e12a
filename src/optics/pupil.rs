//! Sampled circular pupil carrying a wavefront phase map.

use crate::optics::{OpticsError, Wavefront};
use nalgebra::DMatrix;

/// Phase (waves) sampled on a square grid spanning the unit circle.
///
/// Sample centres sit at `-1 + (i + 0.5) * 2 / samples`; points outside the
/// unit circle are masked out.
#[derive(Debug, Clone)]
pub struct Pupil {
    samples: usize,
    phase: DMatrix<f64>,
    mask: DMatrix<bool>,
    aperture_count: usize,
}

impl Pupil {
    /// Samples `wavefront` on a `samples × samples` grid.
    ///
    /// # Errors
    ///
    /// Returns [`OpticsError::InvalidSetup`] when `samples` is zero.
    pub fn from_wavefront(wavefront: &Wavefront, samples: usize) -> Result<Self, OpticsError> {
        if samples == 0 {
            return Err(OpticsError::InvalidSetup(
                "pupil needs at least one sample".to_string(),
            ));
        }
        let mask = DMatrix::from_fn(samples, samples, |row, col| {
            let (x, y) = (coordinate(col, samples), coordinate(row, samples));
            x * x + y * y <= 1.0
        });
        let phase = DMatrix::from_fn(samples, samples, |row, col| {
            if mask[(row, col)] {
                wavefront.phase_at(coordinate(col, samples), coordinate(row, samples))
            } else {
                0.0
            }
        });
        let aperture_count = mask.iter().filter(|inside| **inside).count();
        Ok(Pupil {
            samples,
            phase,
            mask,
            aperture_count,
        })
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Number of grid points inside the aperture.
    pub fn aperture_count(&self) -> usize {
        self.aperture_count
    }

    pub fn phase(&self) -> &DMatrix<f64> {
        &self.phase
    }

    /// Iterates `(x, y, phase)` over the points inside the aperture.
    pub fn aperture_points(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        let n = self.samples;
        (0..n).flat_map(move |row| {
            (0..n).filter_map(move |col| {
                self.mask[(row, col)].then(|| {
                    (
                        coordinate(col, n),
                        coordinate(row, n),
                        self.phase[(row, col)],
                    )
                })
            })
        })
    }

    /// Piston-removed RMS of the phase over the aperture, in waves.
    pub fn rms(&self) -> f64 {
        if self.aperture_count == 0 {
            return 0.0;
        }
        let count = self.aperture_count as f64;
        let mean = self.aperture_points().map(|(_, _, p)| p).sum::<f64>() / count;
        let variance = self
            .aperture_points()
            .map(|(_, _, p)| (p - mean).powi(2))
            .sum::<f64>()
            / count;
        variance.sqrt()
    }
}

fn coordinate(index: usize, samples: usize) -> f64 {
    -1.0 + (index as f64 + 0.5) * 2.0 / samples as f64
}
