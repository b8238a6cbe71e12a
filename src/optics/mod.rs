//! Optical system description and the forward model consumed by the solvers.
//!
//! [`SetupParameters`] describes the imaging system and the through-focus
//! sampling. The [`ForwardModel`] trait is the only contract the optimization
//! core relies on: given a wavefront, produce tangential and sagittal MTF
//! samples at the configured frequencies.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

pub mod mtf;
pub mod pupil;
pub mod thinlens;
pub mod zernike;

pub use mtf::{diffraction_limited_mtf, AutocorrelationModel, Azimuth};
pub use pupil::Pupil;
pub use zernike::{Wavefront, ZernikeTerm};

#[derive(thiserror::Error, Debug)]
pub enum OpticsError {
    #[error("Invalid setup parameters: {0}")]
    InvalidSetup(String),
    #[error("Unknown Zernike term: {0}")]
    UnknownTerm(String),
    #[error("Invalid MTF records: {0}")]
    InvalidRecords(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("CSV Error: {0}")]
    CsvError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for OpticsError {
    fn from(err: std::io::Error) -> Self {
        OpticsError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for OpticsError {
    fn from(err: yaml_rust::ScanError) -> Self {
        OpticsError::YamlError(err.to_string())
    }
}

impl From<csv::Error> for OpticsError {
    fn from(err: csv::Error) -> Self {
        OpticsError::CsvError(err.to_string())
    }
}

/// Tangential and sagittal MTF sampled on the setup frequency grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtfSamples {
    pub tan: Vec<f64>,
    pub sag: Vec<f64>,
}

/// Pupil-to-MTF physics used by the objective.
///
/// Implementations must be pure: the same setup and wavefront always yield the
/// same samples, and they are called concurrently from worker threads.
pub trait ForwardModel: Send + Sync {
    /// Simulates the on-axis MTF of `wavefront` at `setup.freqs`.
    ///
    /// # Errors
    ///
    /// Returns an [`OpticsError`] if the setup cannot be realized by the model.
    fn mtf_ts(
        &self,
        setup: &SetupParameters,
        wavefront: &Wavefront,
    ) -> Result<MtfSamples, OpticsError>;
}

/// Immutable description of the optical system and the focus sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupParameters {
    /// Effective focal length in millimetres.
    pub efl: f64,
    /// Working f-number.
    pub fno: f64,
    /// Wavelength in microns.
    pub wavelength: f64,
    /// Pupil samples across the diameter.
    pub samples: usize,
    /// Spatial frequencies in cycles/mm.
    pub freqs: Vec<f64>,
    /// Half-width of the focus sweep, in the units selected by the flags below.
    pub focus_range_waves: f64,
    /// Focus range is expressed as Zernike Z4 rather than Hopkins W020.
    pub focus_zernike: bool,
    /// Zernike coefficients are RMS-normalized.
    pub focus_normed: bool,
    /// Number of focus planes in the sweep.
    pub focus_planes: usize,
}

impl Default for SetupParameters {
    /// Axial f/2 system used by the simulation studies.
    fn default() -> Self {
        let fno: f64 = 2.0;
        let wavelength: f64 = 0.55;
        let cutoff = (1000.0 / (fno * wavelength)).floor() as usize;
        SetupParameters {
            efl: 50.0,
            fno,
            wavelength,
            samples: 128,
            freqs: (10..cutoff).step_by(10).map(|f| f as f64).collect(),
            focus_range_waves: 0.5 * 3.0_f64.sqrt(),
            focus_zernike: true,
            focus_normed: true,
            focus_planes: 21,
        }
    }
}

impl SetupParameters {
    /// Entrance pupil diameter in millimetres.
    pub fn epd(&self) -> f64 {
        self.efl / self.fno
    }

    /// Incoherent cutoff frequency in cycles/mm.
    pub fn cutoff_frequency(&self) -> f64 {
        1000.0 / (self.wavelength * self.fno)
    }

    /// Spacing of the first two frequency samples.
    pub fn frequency_step(&self) -> f64 {
        match self.freqs.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    pub fn max_frequency(&self) -> f64 {
        self.freqs.last().copied().unwrap_or(0.0)
    }

    /// Defocus applied at each focus plane, in Z4 coefficient units.
    pub fn focus_diversity(&self) -> Vec<f64> {
        thinlens::focus_diversity(self)
    }

    /// Loads setup parameters from the `setup` section of a YAML file.
    ///
    /// The frequency grid is either listed explicitly (`freqs`) or given as a
    /// `freq_range` of `[start, stop, step]` with `stop` excluded.
    ///
    /// # Errors
    ///
    /// * [`OpticsError::IOError`] if the file cannot be read.
    /// * [`OpticsError::YamlError`] if it is not valid YAML.
    /// * [`OpticsError::InvalidSetup`] for missing fields or values that fail
    ///   [`SetupParameters::validate_params`].
    pub fn load_from_yaml(path: &str) -> Result<Self, OpticsError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| OpticsError::YamlError("Empty YAML document".to_string()))?;
        let setup = &doc["setup"];
        if setup.is_badvalue() {
            return Err(OpticsError::InvalidSetup(
                "YAML missing 'setup' section".to_string(),
            ));
        }

        let freqs = if let Some(list) = setup["freqs"].as_vec() {
            list.iter()
                .map(|v| yaml_f64(v, "freqs"))
                .collect::<Result<Vec<_>, _>>()?
        } else if let Some(range) = setup["freq_range"].as_vec() {
            if range.len() != 3 {
                return Err(OpticsError::InvalidSetup(
                    "'freq_range' must be [start, stop, step]".to_string(),
                ));
            }
            let start = yaml_f64(&range[0], "freq_range")?;
            let stop = yaml_f64(&range[1], "freq_range")?;
            let step = yaml_f64(&range[2], "freq_range")?;
            if step <= 0.0 {
                return Err(OpticsError::InvalidSetup(
                    "'freq_range' step must be positive".to_string(),
                ));
            }
            let count = ((stop - start) / step).ceil().max(0.0) as usize;
            (0..count).map(|i| start + step * i as f64).collect()
        } else {
            return Err(OpticsError::InvalidSetup(
                "YAML missing 'freqs' or 'freq_range'".to_string(),
            ));
        };

        let params = SetupParameters {
            efl: yaml_f64(&setup["efl"], "efl")?,
            fno: yaml_f64(&setup["fno"], "fno")?,
            wavelength: yaml_f64(&setup["wavelength"], "wavelength")?,
            samples: yaml_usize(&setup["samples"], "samples")?,
            freqs,
            focus_range_waves: yaml_f64(&setup["focus_range_waves"], "focus_range_waves")?,
            focus_zernike: setup["focus_zernike"].as_bool().ok_or_else(|| {
                OpticsError::InvalidSetup("Invalid focus_zernike: not a bool".to_string())
            })?,
            focus_normed: setup["focus_normed"].as_bool().ok_or_else(|| {
                OpticsError::InvalidSetup("Invalid focus_normed: not a bool".to_string())
            })?,
            focus_planes: yaml_usize(&setup["focus_planes"], "focus_planes")?,
        };

        params.validate_params()?;

        Ok(params)
    }

    /// Saves the parameters under a `setup` key, readable by
    /// [`SetupParameters::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), OpticsError> {
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("setup".to_string()),
            serde_yaml::to_value(self).map_err(|e| OpticsError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| OpticsError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| OpticsError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }

    /// Checks the invariants the forward model and the cost normalization rely on.
    pub fn validate_params(&self) -> Result<(), OpticsError> {
        if !(self.efl > 0.0 && self.fno > 0.0 && self.wavelength > 0.0) {
            return Err(OpticsError::InvalidSetup(
                "efl, fno and wavelength must be positive".to_string(),
            ));
        }
        if self.samples < 8 {
            return Err(OpticsError::InvalidSetup(format!(
                "samples must be at least 8, got {}",
                self.samples
            )));
        }
        if self.freqs.len() < 2 {
            return Err(OpticsError::InvalidSetup(
                "at least two spatial frequencies are required".to_string(),
            ));
        }
        if self.freqs.windows(2).any(|w| w[1] <= w[0]) || self.freqs[0] <= 0.0 {
            return Err(OpticsError::InvalidSetup(
                "frequencies must be positive and strictly increasing".to_string(),
            ));
        }
        let cutoff = self.cutoff_frequency();
        if self.max_frequency() >= cutoff {
            return Err(OpticsError::InvalidSetup(format!(
                "frequency {} is beyond the cutoff {:.2} cy/mm",
                self.max_frequency(),
                cutoff
            )));
        }
        if self.focus_planes == 0 {
            return Err(OpticsError::InvalidSetup(
                "at least one focus plane is required".to_string(),
            ));
        }
        if !self.focus_range_waves.is_finite() || self.focus_range_waves < 0.0 {
            return Err(OpticsError::InvalidSetup(
                "focus range must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn yaml_f64(value: &Yaml, field: &str) -> Result<f64, OpticsError> {
    match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        _ => None,
    }
    .ok_or_else(|| OpticsError::InvalidSetup(format!("Invalid {field}: not a number")))
}

fn yaml_usize(value: &Yaml, field: &str) -> Result<usize, OpticsError> {
    value
        .as_i64()
        .filter(|v| *v >= 0)
        .map(|v| v as usize)
        .ok_or_else(|| {
            OpticsError::InvalidSetup(format!("Invalid {field}: not a non-negative integer"))
        })
}
