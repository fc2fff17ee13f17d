//! # landmark-eval
//!
//! Accuracy analysis and dataset tooling for landmark prediction on specimen
//! images (lizard X-rays and photographs).
//!
//! This crate provides:
//! - **Annotation I/O**: dlib imglab XML, TPS and JSON landmark files
//! - **Error Analysis**: remapping predicted landmark indices onto the
//!   ground-truth scheme, per-landmark displacement, and conversion to
//!   physical units using a per-image ruler
//! - **Reports**: pixel mean/std, per-landmark physical means, and full
//!   distributions with histograms and kernel density estimates
//! - **Rendering**: per-landmark accuracy figures and photo overlays
//! - **Dataset Housekeeping**: combining and subsetting TPS files
//!
//! ## Quick Start
//!
//! ```rust
//! use landmark_eval::{
//!     compute_displacements, compute_scale_factors, scaled_means, CorrespondenceTable,
//!     ImageLandmarks, LandmarkSet, Point, ScaleReference,
//! };
//!
//! let mut truth = LandmarkSet::new();
//! truth.insert(
//!     "a.jpg",
//!     ImageLandmarks::from([
//!         (0, Point::new(0.0, 0.0)),
//!         (1, Point::new(10.0, 0.0)),
//!         (2, Point::new(5.0, 5.0)),
//!     ]),
//! );
//!
//! let mut predicted = LandmarkSet::new();
//! predicted.insert(
//!     "./a.jpg",
//!     ImageLandmarks::from([
//!         (0, Point::new(1.0, 0.0)),
//!         (1, Point::new(10.0, 0.0)),
//!         (12, Point::new(4.0, 4.0)),
//!     ]),
//! );
//!
//! let table = CorrespondenceTable::lizard_dorsal();
//! let scales = compute_scale_factors(&truth, &ScaleReference::default()).unwrap();
//! let displacements = compute_displacements(&predicted, &truth, &table);
//! let means = scaled_means(&displacements, &scales).unwrap();
//!
//! // Landmark 2 is off by (1, 1) pixels; the ruler is 10 px for 27 mm.
//! assert!((means[&2] - 3.818).abs() < 1e-3);
//! ```

pub mod analysis;
pub mod annotations;
mod config;
mod correspondence;
mod error;
pub mod imglab;
pub mod overlay;
pub mod plot;
pub mod stats;
pub mod tps;
mod types;

pub use analysis::{
    aggregate, compute_displacements, compute_scale_factors, distributions, normalize_identifier,
    pixel_means, pixel_summary, scaled_means, AggregateMode, DisplacementRecord, Displacements,
    LandmarkDistribution, LookupMismatch, PixelSummary, Report, ScaleFactors, Source,
};
pub use annotations::{load_landmarks, write_landmarks};
pub use config::{AnalysisConfig, ScaleReference};
pub use correspondence::CorrespondenceTable;
pub use error::{Error, Result};
pub use types::{ImageLandmarks, LandmarkSet, Point};
