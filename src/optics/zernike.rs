//! Fringe Zernike polynomials and wavefront coefficient sets.
//!
//! Terms follow the Fringe (University of Arizona) ordering Z1…Z25. Each term
//! is described by its radial order `n` and a signed azimuthal order `m`:
//! positive `m` selects the cosine branch, negative `m` the sine branch.
//! Coefficients are expressed in waves, either as plain Fringe weights or as
//! RMS-normalized weights (each term scaled to unit RMS over the unit circle).

use crate::optics::OpticsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single Fringe Zernike term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZernikeTerm {
    Z1,
    Z2,
    Z3,
    Z4,
    Z5,
    Z6,
    Z7,
    Z8,
    Z9,
    Z10,
    Z11,
    Z12,
    Z13,
    Z14,
    Z15,
    Z16,
    Z17,
    Z18,
    Z19,
    Z20,
    Z21,
    Z22,
    Z23,
    Z24,
    Z25,
}

use ZernikeTerm::*;

impl ZernikeTerm {
    /// All supported terms in Fringe order.
    pub const ALL: [ZernikeTerm; 25] = [
        Z1, Z2, Z3, Z4, Z5, Z6, Z7, Z8, Z9, Z10, Z11, Z12, Z13, Z14, Z15, Z16, Z17, Z18, Z19, Z20,
        Z21, Z22, Z23, Z24, Z25,
    ];

    /// The defocus term, which carries the per-plane focus diversity.
    pub const DEFOCUS: ZernikeTerm = Z4;

    /// One-based Fringe index of the term.
    pub fn fringe_index(self) -> usize {
        self as usize + 1
    }

    /// Looks up a term by its one-based Fringe index.
    pub fn from_fringe_index(index: usize) -> Option<Self> {
        index
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    /// Radial order `n` and signed azimuthal order `m`.
    pub fn orders(self) -> (u32, i32) {
        match self {
            Z1 => (0, 0),
            Z2 => (1, 1),
            Z3 => (1, -1),
            Z4 => (2, 0),
            Z5 => (2, 2),
            Z6 => (2, -2),
            Z7 => (3, 1),
            Z8 => (3, -1),
            Z9 => (4, 0),
            Z10 => (3, 3),
            Z11 => (3, -3),
            Z12 => (4, 2),
            Z13 => (4, -2),
            Z14 => (5, 1),
            Z15 => (5, -1),
            Z16 => (6, 0),
            Z17 => (4, 4),
            Z18 => (4, -4),
            Z19 => (5, 3),
            Z20 => (5, -3),
            Z21 => (6, 2),
            Z22 => (6, -2),
            Z23 => (7, 1),
            Z24 => (7, -1),
            Z25 => (8, 0),
        }
    }

    /// Human-readable aberration name.
    pub fn name(self) -> &'static str {
        match self {
            Z1 => "Piston",
            Z2 => "Tilt X",
            Z3 => "Tilt Y",
            Z4 => "Defocus",
            Z5 => "Primary Astigmatism 00°",
            Z6 => "Primary Astigmatism 45°",
            Z7 => "Primary Coma X",
            Z8 => "Primary Coma Y",
            Z9 => "Primary Spherical",
            Z10 => "Primary Trefoil X",
            Z11 => "Primary Trefoil Y",
            Z12 => "Secondary Astigmatism 00°",
            Z13 => "Secondary Astigmatism 45°",
            Z14 => "Secondary Coma X",
            Z15 => "Secondary Coma Y",
            Z16 => "Secondary Spherical",
            Z17 => "Primary Tetrafoil X",
            Z18 => "Primary Tetrafoil Y",
            Z19 => "Secondary Trefoil X",
            Z20 => "Secondary Trefoil Y",
            Z21 => "Tertiary Astigmatism 00°",
            Z22 => "Tertiary Astigmatism 45°",
            Z23 => "Tertiary Coma X",
            Z24 => "Tertiary Coma Y",
            Z25 => "Tertiary Spherical",
        }
    }

    /// True for terms without azimuthal dependence (piston and the sphericals).
    pub fn is_rotationally_symmetric(self) -> bool {
        self.orders().1 == 0
    }

    /// Scale factor that gives the term unit RMS over the unit circle.
    pub fn rms_norm(self) -> f64 {
        let (n, m) = self.orders();
        let n = f64::from(n);
        if m == 0 {
            (n + 1.0).sqrt()
        } else {
            (2.0 * (n + 1.0)).sqrt()
        }
    }

    /// Evaluates the un-normalized term at polar pupil coordinates.
    pub fn eval(self, rho: f64, theta: f64) -> f64 {
        let (n, m) = self.orders();
        let radial = radial_polynomial(n, m.unsigned_abs(), rho);
        let m_f = f64::from(m.abs());
        match m.signum() {
            0 => radial,
            1 => radial * (m_f * theta).cos(),
            _ => radial * (m_f * theta).sin(),
        }
    }
}

impl fmt::Display for ZernikeTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Z{}", self.fringe_index())
    }
}

impl FromStr for ZernikeTerm {
    type Err = OpticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .strip_prefix('Z')
            .or_else(|| trimmed.strip_prefix('z'))
            .and_then(|digits| digits.parse::<usize>().ok())
            .and_then(ZernikeTerm::from_fringe_index)
            .ok_or_else(|| OpticsError::UnknownTerm(s.to_string()))
    }
}

/// Zernike radial polynomial R_n^m(ρ).
fn radial_polynomial(n: u32, m: u32, rho: f64) -> f64 {
    if (n - m) % 2 != 0 {
        return 0.0;
    }
    let half_sum = (n + m) / 2;
    let half_diff = (n - m) / 2;
    (0..=half_diff)
        .map(|k| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let numerator = factorial(n - k);
            let denominator = factorial(k) * factorial(half_sum - k) * factorial(half_diff - k);
            sign * numerator / denominator * rho.powi((n - 2 * k) as i32)
        })
        .sum()
}

fn factorial(n: u32) -> f64 {
    (1..=n).map(f64::from).product()
}

/// A set of Zernike coefficients in waves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wavefront {
    coefficients: BTreeMap<ZernikeTerm, f64>,
    /// Coefficients are RMS-normalized weights when set.
    pub rms_norm: bool,
}

impl Wavefront {
    /// Creates an aberration-free wavefront.
    pub fn new(rms_norm: bool) -> Self {
        Wavefront {
            coefficients: BTreeMap::new(),
            rms_norm,
        }
    }

    /// Builder-style helper adding `value` waves of `term`.
    pub fn with(mut self, term: ZernikeTerm, value: f64) -> Self {
        self.add(term, value);
        self
    }

    /// Adds `value` waves of `term` on top of any existing content.
    pub fn add(&mut self, term: ZernikeTerm, value: f64) {
        *self.coefficients.entry(term).or_insert(0.0) += value;
    }

    pub fn coefficient(&self, term: ZernikeTerm) -> f64 {
        self.coefficients.get(&term).copied().unwrap_or(0.0)
    }

    pub fn terms(&self) -> impl Iterator<Item = (ZernikeTerm, f64)> + '_ {
        self.coefficients.iter().map(|(term, value)| (*term, *value))
    }

    /// Term-wise difference `self - other`.
    ///
    /// # Errors
    ///
    /// Returns [`OpticsError::InvalidSetup`] when the two wavefronts use
    /// different normalization conventions.
    pub fn difference(&self, other: &Wavefront) -> Result<Wavefront, OpticsError> {
        if self.rms_norm != other.rms_norm {
            return Err(OpticsError::InvalidSetup(
                "Cannot subtract wavefronts with different normalization".to_string(),
            ));
        }
        let mut result = self.clone();
        for (term, value) in other.terms() {
            result.add(term, -value);
        }
        Ok(result)
    }

    /// Optical path error in waves at cartesian pupil coordinates.
    pub fn phase_at(&self, x: f64, y: f64) -> f64 {
        let rho = x.hypot(y);
        let theta = y.atan2(x);
        self.coefficients
            .iter()
            .map(|(term, coef)| {
                let scale = if self.rms_norm { term.rms_norm() } else { 1.0 };
                coef * scale * term.eval(rho, theta)
            })
            .sum()
    }
}
