//! Analysis settings, loadable from a JSON file.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "reference": { "length": 25.4 }, "outlier_threshold": 1.5 }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correspondence::CorrespondenceTable;
use crate::error::Result;

/// The pair of ground-truth landmarks whose separation is a known physical
/// length, used to convert pixel distances into physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleReference {
    pub first: u32,
    pub second: u32,
    /// Physical distance between the two landmarks (millimetres for the ruler).
    pub length: f64,
}

impl Default for ScaleReference {
    fn default() -> Self {
        Self {
            first: 0,
            second: 1,
            length: 27.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub reference: ScaleReference,
    pub correspondence: CorrespondenceTable,
    /// Scaled magnitude above which a point is flagged in figures.
    pub outlier_threshold: f64,
    /// Bins used for magnitude and angle histograms.
    pub histogram_bins: usize,
    /// Samples per axis of the density grid.
    pub density_grid: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            reference: ScaleReference::default(),
            correspondence: CorrespondenceTable::default(),
            outlier_threshold: 1.0,
            histogram_bins: 10,
            density_grid: 100,
        }
    }
}

impl AnalysisConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }
}
