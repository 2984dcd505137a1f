//! Engine configuration
//!
//! The defaults reproduce the product's published behaviour; a deployment may
//! override individual fields from a JSON document.

use crate::EpiError;
use serde::{Deserialize, Serialize};

/// Tunable constants shared by every analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Multiplier for 95% confidence limits
    pub confidence_z: f64,
    /// Threshold for the significance flag
    pub significance_level: f64,
    /// Replacement for zero cells in 2×2 tables
    pub continuity_correction: f64,
    /// Below this many observations an estimate is replaced by the neutral default
    pub min_observations: usize,
    /// Share of rows dropped by each positional trimming scenario
    pub trim_fraction: f64,
    /// Share of rows appended by the best/worst-case scenarios
    pub imputation_fraction: f64,
    pub fragility_max_iterations: u32,
    /// Attrition allowances reported alongside every sample size
    pub attrition_rates: Vec<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_z: 1.96,
            significance_level: 0.05,
            continuity_correction: 0.5,
            min_observations: 4,
            trim_fraction: 0.05,
            imputation_fraction: 0.05,
            fragility_max_iterations: 1000,
            attrition_rates: vec![0.15, 0.20],
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON document; absent fields keep their defaults
    pub fn from_json(text: &str) -> Result<Self, EpiError> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| EpiError::validation(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EpiError> {
        if !(self.confidence_z > 0.0) {
            return Err(EpiError::validation("confidence_z must be > 0"));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(EpiError::validation("significance_level must be in (0, 1)"));
        }
        if !(self.continuity_correction > 0.0) {
            return Err(EpiError::validation("continuity_correction must be > 0"));
        }
        for (name, f) in [("trim_fraction", self.trim_fraction), ("imputation_fraction", self.imputation_fraction)] {
            if !(0.0..0.5).contains(&f) {
                return Err(EpiError::validation(format!("{} must be in [0, 0.5)", name)));
            }
        }
        if self.attrition_rates.iter().any(|r| !(0.0..1.0).contains(r)) {
            return Err(EpiError::validation("attrition_rates must be in [0, 1)"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"fragility_max_iterations": 50}"#).unwrap();
        assert_eq!(config.fragility_max_iterations, 50);
        assert_eq!(config.confidence_z, 1.96);
        assert_eq!(config.attrition_rates, vec![0.15, 0.20]);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_json(r#"{"significance_level": 1.5}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"trim_fraction": 0.7}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
