//! Cost primitives comparing truth and simulated MTF on one focus plane.
//!
//! A [`CostPipeline`] applies an ordered list of [`Transform`]s to a
//! tangential/sagittal [`DifferencePair`] and finishes with a single
//! [`Reducer`] that collapses the pair to a scalar. Transforms preserve the
//! shape of the pair; only the reducer changes it.

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("Length mismatch in {what}: expected {expected}, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Tangential and sagittal difference curves of one focus plane.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferencePair {
    pub tan: Vec<f64>,
    pub sag: Vec<f64>,
}

/// Elementwise `truth - simulated`.
pub fn raw_difference(truth: &[f64], simulated: &[f64]) -> Result<Vec<f64>, CostError> {
    check_len("simulated curve", truth.len(), simulated.len())?;
    Ok(truth.iter().zip(simulated).map(|(t, s)| t - s).collect())
}

impl DifferencePair {
    /// Differences `truth - simulated` for both azimuths.
    pub fn new(
        truth_tan: &[f64],
        truth_sag: &[f64],
        sim_tan: &[f64],
        sim_sag: &[f64],
    ) -> Result<Self, CostError> {
        Ok(DifferencePair {
            tan: raw_difference(truth_tan, sim_tan)?,
            sag: raw_difference(truth_sag, sim_sag)?,
        })
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.tan.iter().chain(&self.sag).copied()
    }
}

/// Divides both differences elementwise by the diffraction-limited MTF.
pub fn diffraction_normalize(
    pair: DifferencePair,
    diffraction: &[f64],
) -> Result<DifferencePair, CostError> {
    check_len("diffraction curve", pair.tan.len(), diffraction.len())?;
    check_len("diffraction curve", pair.sag.len(), diffraction.len())?;
    let scale = |values: Vec<f64>| -> Vec<f64> {
        values
            .into_iter()
            .zip(diffraction)
            .map(|(v, d)| v / d)
            .collect()
    };
    Ok(DifferencePair {
        tan: scale(pair.tan),
        sag: scale(pair.sag),
    })
}

/// Sum of absolute differences over both azimuths.
pub fn manhattan(pair: &DifferencePair) -> f64 {
    pair.values().map(f64::abs).sum()
}

/// Sum of `sqrt(d²)` over both azimuths. Numerically equal to [`manhattan`].
pub fn euclidean(pair: &DifferencePair) -> f64 {
    pair.values().map(|d| (d * d).sqrt()).sum()
}

/// Sum of squared differences over both azimuths.
pub fn sum_squared(pair: &DifferencePair) -> f64 {
    pair.values().map(|d| d * d).sum()
}

/// Shape-preserving stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    DiffractionNormalize,
}

/// Terminal stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    #[default]
    SumSquares,
    Manhattan,
    Euclidean,
}

impl Reducer {
    pub fn reduce(self, pair: &DifferencePair) -> f64 {
        match self {
            Reducer::SumSquares => sum_squared(pair),
            Reducer::Manhattan => manhattan(pair),
            Reducer::Euclidean => euclidean(pair),
        }
    }
}

/// Ordered transforms followed by one reducer. The default is a bare sum of squares.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostPipeline {
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub reducer: Reducer,
}

impl CostPipeline {
    /// Diffraction normalization followed by a sum of squares.
    pub fn diffraction_weighted() -> Self {
        CostPipeline {
            transforms: vec![Transform::DiffractionNormalize],
            reducer: Reducer::SumSquares,
        }
    }

    /// Runs every transform in order, then the reducer.
    pub fn apply(&self, pair: DifferencePair, diffraction: &[f64]) -> Result<f64, CostError> {
        let mut pair = pair;
        for transform in &self.transforms {
            pair = match transform {
                Transform::DiffractionNormalize => diffraction_normalize(pair, diffraction)?,
            };
        }
        Ok(self.reducer.reduce(&pair))
    }

    /// Compact label such as `diffraction_normalize>sum_squares`.
    pub fn describe(&self) -> String {
        self.transforms
            .iter()
            .map(|t| match t {
                Transform::DiffractionNormalize => "diffraction_normalize",
            })
            .chain(std::iter::once(match self.reducer {
                Reducer::SumSquares => "sum_squares",
                Reducer::Manhattan => "manhattan",
                Reducer::Euclidean => "euclidean",
            }))
            .collect::<Vec<_>>()
            .join(">")
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), CostError> {
    if expected == found {
        Ok(())
    } else {
        Err(CostError::LengthMismatch {
            what,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TRUTH_TAN: [f64; 4] = [0.9, 0.7, 0.45, 0.2];
    const TRUTH_SAG: [f64; 4] = [0.88, 0.69, 0.41, 0.18];
    const SIM_TAN: [f64; 4] = [0.85, 0.72, 0.4, 0.25];
    const SIM_SAG: [f64; 4] = [0.9, 0.6, 0.44, 0.1];
    const DIFFRACTION: [f64; 4] = [0.95, 0.85, 0.6, 0.3];

    #[test]
    fn test_zero_difference_gives_zero_cost() {
        let pair = DifferencePair::new(&TRUTH_TAN, &TRUTH_SAG, &TRUTH_TAN, &TRUTH_SAG).unwrap();
        for reducer in [Reducer::SumSquares, Reducer::Manhattan, Reducer::Euclidean] {
            assert_eq!(reducer.reduce(&pair), 0.0);
            let pipeline = CostPipeline {
                transforms: vec![Transform::DiffractionNormalize],
                reducer,
            };
            assert_eq!(pipeline.apply(pair.clone(), &DIFFRACTION).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_sum_squares_symmetric_in_inputs() {
        let forward = DifferencePair::new(&TRUTH_TAN, &TRUTH_SAG, &SIM_TAN, &SIM_SAG).unwrap();
        let backward = DifferencePair::new(&SIM_TAN, &SIM_SAG, &TRUTH_TAN, &TRUTH_SAG).unwrap();
        let pipeline = CostPipeline::default();
        assert_relative_eq!(
            pipeline.apply(forward, &DIFFRACTION).unwrap(),
            pipeline.apply(backward, &DIFFRACTION).unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_diffraction_normalization_scale_invariant() {
        let k: f64 = 3.7;
        let scaled = |v: &[f64]| v.iter().map(|x| x * k).collect::<Vec<_>>();
        let pipeline = CostPipeline::diffraction_weighted();

        let pair = DifferencePair::new(&TRUTH_TAN, &TRUTH_SAG, &SIM_TAN, &SIM_SAG).unwrap();
        let base = pipeline.apply(pair, &DIFFRACTION).unwrap();

        let scaled_pair = DifferencePair::new(
            &scaled(&TRUTH_TAN),
            &scaled(&TRUTH_SAG),
            &scaled(&SIM_TAN),
            &scaled(&SIM_SAG),
        )
        .unwrap();
        let rescaled = pipeline.apply(scaled_pair, &scaled(&DIFFRACTION)).unwrap();
        assert_relative_eq!(base, rescaled, max_relative = 1e-12);
    }

    #[test]
    fn test_reducer_values() {
        let pair = DifferencePair {
            tan: vec![0.1, -0.2],
            sag: vec![-0.3, 0.0],
        };
        assert_relative_eq!(sum_squared(&pair), 0.14, epsilon = 1e-15);
        assert_relative_eq!(manhattan(&pair), 0.6, epsilon = 1e-15);
        assert_relative_eq!(euclidean(&pair), manhattan(&pair), epsilon = 1e-15);
    }

    #[test]
    fn test_raw_difference_sign() {
        let diff = raw_difference(&[0.5, 0.4], &[0.3, 0.6]).unwrap();
        assert_relative_eq!(diff[0], 0.2, epsilon = 1e-15);
        assert_relative_eq!(diff[1], -0.2, epsilon = 1e-15);
    }

    #[test]
    fn test_length_mismatch_is_reported() {
        let err = DifferencePair::new(&TRUTH_TAN, &TRUTH_SAG, &SIM_TAN[..3], &SIM_SAG).unwrap_err();
        assert_eq!(
            err,
            CostError::LengthMismatch {
                what: "simulated curve",
                expected: 4,
                found: 3
            }
        );
        let pair = DifferencePair::new(&TRUTH_TAN, &TRUTH_SAG, &SIM_TAN, &SIM_SAG).unwrap();
        assert!(CostPipeline::diffraction_weighted()
            .apply(pair, &DIFFRACTION[..2])
            .is_err());
    }

    #[test]
    fn test_pipeline_description_and_serde() {
        assert_eq!(CostPipeline::default().describe(), "sum_squares");
        assert_eq!(
            CostPipeline::diffraction_weighted().describe(),
            "diffraction_normalize>sum_squares"
        );
        let json = serde_json::to_string(&CostPipeline::diffraction_weighted()).unwrap();
        let parsed: CostPipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, CostPipeline::diffraction_weighted());
        let defaulted: CostPipeline = serde_json::from_str("{}").unwrap();
        assert_eq!(defaulted, CostPipeline::default());
    }
}
