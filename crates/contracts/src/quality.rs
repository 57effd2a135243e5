//! Per-image quality verdict and the assessor collaborator

use serde::{Deserialize, Serialize};

use crate::{CalibrationImage, PatternType};

/// Result of scoring one calibration image.
///
/// Only `overall_score` gates acceptance; the remaining fields are carried
/// through for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    #[serde(alias = "overall_quality_score")]
    pub overall_score: f64,
    #[serde(default)]
    pub pattern_found: bool,
    #[serde(default)]
    pub is_acceptable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl QualityResult {
    pub fn with_score(overall_score: f64) -> Self {
        Self {
            overall_score,
            pattern_found: true,
            is_acceptable: true,
            recommendations: Vec::new(),
        }
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.overall_score >= threshold
    }
}

/// External image-quality scorer
pub trait QualityAssessor: Send + Sync {
    fn assess(&self, image: &CalibrationImage, pattern: PatternType) -> QualityResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_and_defaults() {
        let q: QualityResult = serde_json::from_str(r#"{"overall_quality_score":0.8}"#).unwrap();
        assert_eq!(q.overall_score, 0.8);
        assert!(!q.pattern_found);
        assert!(q.passes(0.8));
        assert!(!q.passes(0.81));
    }
}
