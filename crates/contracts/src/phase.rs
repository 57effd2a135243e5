//! Calibration phases and calibration pattern descriptions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// Calibration session lifecycle phase.
///
/// The ordering is fixed; sessions only ever move to [`CalibrationPhase::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Initialization,
    PatternDetection,
    DataCollection,
    QualityValidation,
    StereoCalibration,
    ResultAggregation,
    Completion,
}

impl CalibrationPhase {
    pub const ALL: [CalibrationPhase; 7] = [
        Self::Initialization,
        Self::PatternDetection,
        Self::DataCollection,
        Self::QualityValidation,
        Self::StereoCalibration,
        Self::ResultAggregation,
        Self::Completion,
    ];

    /// Immediate successor, `None` for the terminal phase.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Initialization => Some(Self::PatternDetection),
            Self::PatternDetection => Some(Self::DataCollection),
            Self::DataCollection => Some(Self::QualityValidation),
            Self::QualityValidation => Some(Self::StereoCalibration),
            Self::StereoCalibration => Some(Self::ResultAggregation),
            Self::ResultAggregation => Some(Self::Completion),
            Self::Completion => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Completion
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::PatternDetection => "pattern_detection",
            Self::DataCollection => "data_collection",
            Self::QualityValidation => "quality_validation",
            Self::StereoCalibration => "stereo_calibration",
            Self::ResultAggregation => "result_aggregation",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calibration target printed on the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    #[default]
    Chessboard,
    CircleGrid,
    AsymmetricCircleGrid,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chessboard => "chessboard",
            Self::CircleGrid => "circle_grid",
            Self::AsymmetricCircleGrid => "asymmetric_circle_grid",
        }
    }

    /// Default board geometry for this pattern.
    pub fn geometry(self) -> PatternGeometry {
        match self {
            Self::Chessboard => PatternGeometry {
                pattern_type: self,
                rows: 6,
                cols: 9,
                spacing: 1.0,
            },
            Self::CircleGrid | Self::AsymmetricCircleGrid => PatternGeometry {
                pattern_type: self,
                rows: 4,
                cols: 11,
                spacing: 1.0,
            },
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chessboard" => Ok(Self::Chessboard),
            "circle_grid" => Ok(Self::CircleGrid),
            "asymmetric_circle_grid" => Ok(Self::AsymmetricCircleGrid),
            other => Err(ContractError::malformed(format!(
                "unknown pattern type '{other}'"
            ))),
        }
    }
}

/// Board layout handed to pattern detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternGeometry {
    pub pattern_type: PatternType,
    /// Inner corners / circles per column
    pub rows: u32,
    /// Inner corners / circles per row
    pub cols: u32,
    /// Distance between neighbouring features, in board units
    pub spacing: f64,
}

impl PatternGeometry {
    pub fn point_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    /// Object-point template in board coordinates (z = 0).
    ///
    /// Asymmetric grids shift every other row by half a spacing.
    pub fn object_points(&self) -> Vec<nalgebra::Point3<f64>> {
        let mut points = Vec::with_capacity(self.point_count());
        for r in 0..self.rows {
            for c in 0..self.cols {
                let point = match self.pattern_type {
                    PatternType::Chessboard | PatternType::CircleGrid => nalgebra::Point3::new(
                        c as f64 * self.spacing,
                        r as f64 * self.spacing,
                        0.0,
                    ),
                    PatternType::AsymmetricCircleGrid => nalgebra::Point3::new(
                        (2 * c + r % 2) as f64 * self.spacing,
                        r as f64 * self.spacing,
                        0.0,
                    ),
                };
                points.push(point);
            }
        }
        points
    }
}
