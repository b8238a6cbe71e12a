//! Decoder ring mapping parameter-vector slots to Zernike terms.

use crate::optics::{OpticsError, Wavefront, ZernikeTerm};
use serde::{Deserialize, Serialize};
use std::fs;
use yaml_rust::YamlLoader;

use ZernikeTerm::*;

/// Ordered, duplicate-free list of the aberration terms being solved for.
///
/// Slot `i` of a parameter vector is the coefficient of `terms()[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ZernikeTerm>", into = "Vec<ZernikeTerm>")]
pub struct Codex {
    terms: Vec<ZernikeTerm>,
}

impl Codex {
    /// Creates a codex from an ordered list of terms.
    ///
    /// # Errors
    ///
    /// Returns [`OpticsError::InvalidSetup`] if the list is empty or repeats a term.
    pub fn new(terms: Vec<ZernikeTerm>) -> Result<Self, OpticsError> {
        if terms.is_empty() {
            return Err(OpticsError::InvalidSetup("codex is empty".to_string()));
        }
        for (i, term) in terms.iter().enumerate() {
            if terms[..i].contains(term) {
                return Err(OpticsError::InvalidSetup(format!(
                    "codex lists {term} more than once"
                )));
            }
        }
        Ok(Codex { terms })
    }

    /// Rotationally symmetric terms: defocus and the three sphericals.
    pub fn spherical() -> Self {
        Codex {
            terms: vec![Z4, Z9, Z16, Z25],
        }
    }

    /// Defocus plus all astigmatism, coma and spherical terms up to Z25.
    pub fn full_field() -> Self {
        Codex {
            terms: vec![
                Z4, Z5, Z6, Z7, Z8, Z9, Z12, Z13, Z14, Z15, Z16, Z21, Z22, Z23, Z24, Z25,
            ],
        }
    }

    /// [`Codex::full_field`] with primary trefoil added.
    pub fn full_field_with_trefoil() -> Self {
        Codex {
            terms: vec![
                Z4, Z5, Z6, Z7, Z8, Z9, Z10, Z11, Z12, Z13, Z14, Z15, Z16, Z21, Z22, Z23, Z24,
                Z25,
            ],
        }
    }

    /// Reads a `codex: [Z4, Z9, ...]` entry from a YAML file.
    pub fn load_from_yaml(path: &str) -> Result<Self, OpticsError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let names = docs
            .first()
            .and_then(|doc| doc["codex"].as_vec())
            .ok_or_else(|| {
                OpticsError::InvalidSetup("YAML missing 'codex' or not an array".to_string())
            })?;
        let terms = names
            .iter()
            .map(|name| {
                name.as_str()
                    .ok_or_else(|| {
                        OpticsError::InvalidSetup("codex entries must be strings".to_string())
                    })
                    .and_then(|s| s.parse::<ZernikeTerm>())
            })
            .collect::<Result<Vec<ZernikeTerm>, _>>()?;
        Codex::new(terms)
    }

    pub fn terms(&self) -> &[ZernikeTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Slot of `term` in the parameter vector, if present.
    pub fn position(&self, term: ZernikeTerm) -> Option<usize> {
        self.terms.iter().position(|t| *t == term)
    }

    /// Checks that a parameter vector has exactly one value per codex slot.
    pub fn check_len(&self, params: &[f64]) -> Result<(), CodexMismatch> {
        if params.len() == self.terms.len() {
            Ok(())
        } else {
            Err(CodexMismatch {
                codex: self.terms.len(),
                params: params.len(),
            })
        }
    }

    /// Builds the wavefront for `params`, adding `defocus` on top of any Z4 content.
    pub fn to_wavefront(
        &self,
        params: &[f64],
        defocus: f64,
        rms_norm: bool,
    ) -> Result<Wavefront, CodexMismatch> {
        self.check_len(params)?;
        let mut wavefront = Wavefront::new(rms_norm);
        for (term, value) in self.terms.iter().zip(params) {
            wavefront.add(*term, *value);
        }
        if defocus != 0.0 {
            wavefront.add(ZernikeTerm::DEFOCUS, defocus);
        }
        Ok(wavefront)
    }

    /// Term labels in slot order, e.g. `["Z4", "Z9"]`.
    pub fn labels(&self) -> Vec<String> {
        self.terms.iter().map(ToString::to_string).collect()
    }
}

/// Length disagreement between a codex and a parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodexMismatch {
    pub codex: usize,
    pub params: usize,
}

impl TryFrom<Vec<ZernikeTerm>> for Codex {
    type Error = OpticsError;

    fn try_from(terms: Vec<ZernikeTerm>) -> Result<Self, Self::Error> {
        Codex::new(terms)
    }
}

impl From<Codex> for Vec<ZernikeTerm> {
    fn from(codex: Codex) -> Self {
        codex.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_presets() {
        assert_eq!(Codex::spherical().len(), 4);
        assert_eq!(Codex::full_field().len(), 16);
        assert_eq!(Codex::full_field_with_trefoil().len(), 18);
    }

    #[test]
    fn test_duplicates_rejected() {
        assert!(Codex::new(vec![Z4, Z9, Z4]).is_err());
        assert!(Codex::new(Vec::new()).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let codex = Codex::spherical();
        let err = codex.check_len(&[0.0, 0.1, 0.0]).unwrap_err();
        assert_eq!(err, CodexMismatch { codex: 4, params: 3 });
        assert!(codex.to_wavefront(&[0.0; 3], 0.0, true).is_err());
    }

    #[test]
    fn test_defocus_added_to_codex_defocus() {
        let codex = Codex::spherical();
        let wavefront = codex.to_wavefront(&[0.1, 0.125, 0.0, 0.0], 0.3, true).unwrap();
        assert_relative_eq!(wavefront.coefficient(Z4), 0.4, epsilon = 1e-15);
        assert_relative_eq!(wavefront.coefficient(Z9), 0.125);
        assert!(wavefront.rms_norm);
    }

    #[test]
    fn test_defocus_without_codex_slot() {
        let codex = Codex::new(vec![Z9]).unwrap();
        let wavefront = codex.to_wavefront(&[0.05], -0.2, false).unwrap();
        assert_relative_eq!(wavefront.coefficient(Z4), -0.2);
        assert_eq!(codex.position(Z4), None);
        assert_eq!(codex.position(Z9), Some(0));
    }

    #[test]
    fn test_codex_load_from_yaml() {
        let codex = Codex::load_from_yaml("samples/axial_f2.yaml").unwrap();
        assert_eq!(codex, Codex::spherical());
        assert_eq!(codex.labels(), vec!["Z4", "Z9", "Z16", "Z25"]);
    }

    #[test]
    fn test_codex_serde() {
        let json = serde_json::to_string(&Codex::spherical()).unwrap();
        assert_eq!(json, r#"["Z4","Z9","Z16","Z25"]"#);
        let parsed: Codex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Codex::spherical());
        assert!(serde_json::from_str::<Codex>(r#"["Z4","Z4"]"#).is_err());
    }
}
