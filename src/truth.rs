//! Through-focus truth MTF: simulated from a known wavefront or loaded from
//! measured records.

use crate::optics::thinlens::image_displacement_to_defocus;
use crate::optics::{Azimuth, ForwardModel, OpticsError, SetupParameters, Wavefront, ZernikeTerm};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-plane tangential and sagittal MTF together with the plane's defocus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthData {
    /// Defocus of each plane in Z4 coefficient units.
    pub focus_diversity: Vec<f64>,
    pub tan: Vec<Vec<f64>>,
    pub sag: Vec<Vec<f64>>,
}

impl TruthData {
    /// # Errors
    ///
    /// Returns [`OpticsError::InvalidRecords`] if the three per-plane lists
    /// disagree in length or are empty.
    pub fn new(
        focus_diversity: Vec<f64>,
        tan: Vec<Vec<f64>>,
        sag: Vec<Vec<f64>>,
    ) -> Result<Self, OpticsError> {
        if focus_diversity.is_empty() {
            return Err(OpticsError::InvalidRecords(
                "truth data has no focus planes".to_string(),
            ));
        }
        if tan.len() != focus_diversity.len() || sag.len() != focus_diversity.len() {
            return Err(OpticsError::InvalidRecords(format!(
                "{} focus planes but {} tangential and {} sagittal curves",
                focus_diversity.len(),
                tan.len(),
                sag.len()
            )));
        }
        Ok(TruthData {
            focus_diversity,
            tan,
            sag,
        })
    }

    /// Simulates the through-focus MTF of `wavefront` over the setup's focus sweep.
    pub fn simulate(
        model: &dyn ForwardModel,
        setup: &SetupParameters,
        wavefront: &Wavefront,
    ) -> Result<Self, OpticsError> {
        let focus_diversity = setup.focus_diversity();
        let mut tan = Vec::with_capacity(focus_diversity.len());
        let mut sag = Vec::with_capacity(focus_diversity.len());
        for defocus in &focus_diversity {
            let mut plane = wavefront.clone();
            plane.add(ZernikeTerm::DEFOCUS, *defocus);
            let mtf = model.mtf_ts(setup, &plane)?;
            tan.push(mtf.tan);
            sag.push(mtf.sag);
        }
        debug!("Simulated truth over {} focus planes", focus_diversity.len());
        TruthData::new(focus_diversity, tan, sag)
    }

    /// Builds truth data from measured on-axis records.
    ///
    /// Only records at field 0 are used. Focus positions (µm) become Z4
    /// diversity through the thin-lens relation. Every (focus, azimuth) group
    /// must cover exactly the setup frequency grid; nothing is interpolated.
    pub fn from_records(
        setup: &SetupParameters,
        records: &[MtfRecord],
    ) -> Result<Self, OpticsError> {
        let axial: Vec<&MtfRecord> = records.iter().filter(|r| r.field.abs() < 1e-9).collect();
        let mut positions: Vec<f64> = Vec::new();
        for record in &axial {
            if !positions.iter().any(|p| (p - record.focus).abs() < 1e-9) {
                positions.push(record.focus);
            }
        }
        positions.sort_by(f64::total_cmp);

        let curve = |focus: f64, azimuth: Azimuth| -> Result<Vec<f64>, OpticsError> {
            let mut points: Vec<(f64, f64)> = axial
                .iter()
                .filter(|r| (r.focus - focus).abs() < 1e-9 && r.azimuth == azimuth)
                .map(|r| (r.freq, r.mtf))
                .collect();
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            let matches_grid = points.len() == setup.freqs.len()
                && points
                    .iter()
                    .zip(&setup.freqs)
                    .all(|((freq, _), expected)| (freq - expected).abs() < 1e-6);
            if !matches_grid {
                return Err(OpticsError::InvalidRecords(format!(
                    "{azimuth:?} curve at focus {focus} µm does not match the frequency grid"
                )));
            }
            Ok(points.into_iter().map(|(_, mtf)| mtf).collect())
        };

        let mut tan = Vec::with_capacity(positions.len());
        let mut sag = Vec::with_capacity(positions.len());
        for focus in &positions {
            tan.push(curve(*focus, Azimuth::Tangential)?);
            sag.push(curve(*focus, Azimuth::Sagittal)?);
        }
        let focus_diversity = positions
            .iter()
            .map(|z| {
                image_displacement_to_defocus(*z, setup.fno, setup.wavelength, true, setup.focus_normed)
            })
            .collect();
        TruthData::new(focus_diversity, tan, sag)
    }

    pub fn planes(&self) -> usize {
        self.focus_diversity.len()
    }
}

/// One measured MTF sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtfRecord {
    /// Field position; 0 on axis.
    pub field: f64,
    /// Image-plane focus position in microns relative to best focus.
    pub focus: f64,
    pub azimuth: Azimuth,
    /// Spatial frequency in cycles/mm.
    pub freq: f64,
    pub mtf: f64,
}

/// Reads MTF records from a CSV file with a `field,focus,azimuth,freq,mtf` header.
pub fn load_mtf_records<P: AsRef<Path>>(path: P) -> Result<Vec<MtfRecord>, OpticsError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<MtfRecord>, csv::Error>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optics::testing::small_setup;
    use crate::optics::AutocorrelationModel;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn test_simulated_truth_shape() {
        let setup = small_setup();
        let wavefront = Wavefront::new(true).with(ZernikeTerm::Z9, 0.125);
        let truth = TruthData::simulate(&AutocorrelationModel, &setup, &wavefront).unwrap();
        assert_eq!(truth.planes(), setup.focus_planes);
        assert!(truth.tan.iter().all(|curve| curve.len() == setup.freqs.len()));
        assert!(truth.sag.iter().all(|curve| curve.len() == setup.freqs.len()));
    }

    #[test]
    fn test_mismatched_planes_rejected() {
        let result = TruthData::new(vec![0.0, 0.1], vec![vec![1.0]], vec![vec![1.0]]);
        assert!(result.is_err());
        assert!(TruthData::new(Vec::new(), Vec::new(), Vec::new()).is_err());
    }

    #[test]
    fn test_truth_from_records() {
        let mut setup = small_setup();
        setup.freqs = vec![100.0, 200.0];
        let mut records = Vec::new();
        for focus in [17.6, -17.6] {
            for azimuth in [Azimuth::Sagittal, Azimuth::Tangential] {
                for (freq, mtf) in [(200.0, 0.4), (100.0, 0.7)] {
                    records.push(MtfRecord {
                        field: 0.0,
                        focus,
                        azimuth,
                        freq,
                        mtf,
                    });
                }
            }
        }
        // Off-axis samples are ignored.
        records.push(MtfRecord {
            field: 1.0,
            focus: 0.0,
            azimuth: Azimuth::Tangential,
            freq: 100.0,
            mtf: 0.1,
        });

        let truth = TruthData::from_records(&setup, &records).unwrap();
        assert_eq!(truth.planes(), 2);
        assert_eq!(truth.tan[0], vec![0.7, 0.4]);
        assert_eq!(truth.sag[1], vec![0.7, 0.4]);
        let expected = 0.5 / 3.0_f64.sqrt();
        assert_relative_eq!(truth.focus_diversity[0], -expected, epsilon = 1e-12);
        assert_relative_eq!(truth.focus_diversity[1], expected, epsilon = 1e-12);

        records.retain(|r| r.freq != 200.0 || r.focus < 0.0);
        assert!(TruthData::from_records(&setup, &records).is_err());
    }

    #[test]
    fn test_load_mtf_records_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "field,focus,azimuth,freq,mtf").unwrap();
        writeln!(file, "0.0,-10.0,Tan,100.0,0.61").unwrap();
        writeln!(file, "0.0,-10.0,Sag,100.0,0.63").unwrap();
        file.flush().unwrap();

        let records = load_mtf_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].azimuth, Azimuth::Tangential);
        assert_eq!(records[1].azimuth, Azimuth::Sagittal);
        assert_relative_eq!(records[1].mtf, 0.63);
    }
}
