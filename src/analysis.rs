//! Landmark error analysis: joining predictions to ground truth, converting
//! pixel errors to physical units, and aggregating the results.
//!
//! The pipeline is a single pass over two read-only landmark sets:
//!
//! 1. [`compute_scale_factors`] derives a pixel → physical factor for every
//!    ground-truth image from its two ruler landmarks.
//! 2. [`compute_displacements`] joins the sets by normalized image name,
//!    remaps indices through a [`CorrespondenceTable`] and records the
//!    ground-truth minus predicted offset of every matched landmark.
//! 3. [`aggregate`] reduces the records to a [`Report`].
//!
//! Images or landmarks that cannot be matched are skipped. Each skip is kept
//! as a [`LookupMismatch`] so callers can report it, but it never changes the
//! aggregates.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ScaleReference;
use crate::correspondence::CorrespondenceTable;
use crate::error::{Error, Result};
use crate::stats::{self, DensityGrid, GaussianKde, Histogram};
use crate::types::{ImageLandmarks, LandmarkSet, Point};

/// Strip leading current-directory markers (`./` or `.\`) from an image
/// identifier.
pub fn normalize_identifier(id: &str) -> &str {
    let mut s = id;
    while let Some(rest) = s.strip_prefix("./").or_else(|| s.strip_prefix(".\\")) {
        s = rest;
    }
    s
}

/// Per-image conversion factors from pixels to physical units, keyed by
/// normalized image identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScaleFactors {
    factors: BTreeMap<String, f64>,
}

impl ScaleFactors {
    pub fn get(&self, image: &str) -> Option<f64> {
        self.factors.get(normalize_identifier(image)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.factors.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

fn reference_point(image: &str, landmarks: &ImageLandmarks, index: u32) -> Result<Point> {
    landmarks
        .get(&index)
        .copied()
        .ok_or_else(|| Error::MissingReference {
            image: image.to_string(),
            index,
        })
}

/// Compute `reference.length / distance(first, second)` for every image in
/// `ground_truth`.
///
/// Fails if an image lacks either reference landmark, or if the two
/// reference landmarks coincide.
pub fn compute_scale_factors(
    ground_truth: &LandmarkSet,
    reference: &ScaleReference,
) -> Result<ScaleFactors> {
    let mut factors = BTreeMap::new();
    for (image, landmarks) in ground_truth.iter() {
        let a = reference_point(image, landmarks, reference.first)?;
        let b = reference_point(image, landmarks, reference.second)?;
        let distance = a.distance(&b);
        if distance == 0.0 {
            return Err(Error::DegenerateReference {
                image: image.to_string(),
                first: reference.first,
                second: reference.second,
            });
        }
        factors.insert(
            normalize_identifier(image).to_string(),
            reference.length / distance,
        );
    }
    Ok(ScaleFactors { factors })
}

/// Offset between a ground-truth landmark and its remapped prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementRecord {
    /// Normalized image identifier.
    pub image: String,
    /// Ground-truth landmark index.
    pub landmark: u32,
    /// `ground_truth - predicted`, in pixels.
    pub offset: Point,
    /// Euclidean length of `offset`, in pixels.
    pub magnitude: f64,
}

impl DisplacementRecord {
    pub fn scaled_offset(&self, scale: f64) -> Point {
        self.offset * scale
    }

    pub fn scaled_magnitude(&self, scale: f64) -> f64 {
        self.magnitude * scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Predicted,
    GroundTruth,
}

/// A point of the join that had no counterpart and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookupMismatch {
    /// The image appears in only one of the two sets.
    UnmatchedImage { image: String, present_in: Source },
    /// The prediction for this image lacks the remapped landmark.
    MissingPrediction {
        image: String,
        landmark: u32,
        predicted_index: u32,
    },
    /// A second predicted entry normalizing to an image already joined.
    DuplicatePrediction { image: String, identifier: String },
}

/// Displacement records grouped by ground-truth landmark index.
///
/// Landmarks iterate in ascending index order; records within a landmark
/// follow the order in which images appear in the predicted set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Displacements {
    pub by_landmark: BTreeMap<u32, Vec<DisplacementRecord>>,
    pub mismatches: Vec<LookupMismatch>,
}

impl Displacements {
    pub fn records(&self) -> impl Iterator<Item = &DisplacementRecord> {
        self.by_landmark.values().flatten()
    }

    pub fn num_records(&self) -> usize {
        self.by_landmark.values().map(Vec::len).sum()
    }

    pub fn landmark(&self, index: u32) -> &[DisplacementRecord] {
        self.by_landmark
            .get(&index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Join predictions to ground truth and compute per-landmark offsets.
pub fn compute_displacements(
    predicted: &LandmarkSet,
    ground_truth: &LandmarkSet,
    correspondence: &CorrespondenceTable,
) -> Displacements {
    let truth_by_id: HashMap<&str, &ImageLandmarks> = ground_truth
        .iter()
        .map(|(id, lm)| (normalize_identifier(id), lm))
        .collect();

    let mut out = Displacements::default();
    let mut matched: HashSet<&str> = HashSet::new();

    for (raw_id, predicted_parts) in predicted.iter() {
        let image = normalize_identifier(raw_id);
        let Some(truth_parts) = truth_by_id.get(image) else {
            tracing::debug!(image, "no ground truth for predicted image, skipping");
            out.mismatches.push(LookupMismatch::UnmatchedImage {
                image: image.to_string(),
                present_in: Source::Predicted,
            });
            continue;
        };
        if !matched.insert(image) {
            tracing::debug!(image, identifier = raw_id, "image already predicted, skipping");
            out.mismatches.push(LookupMismatch::DuplicatePrediction {
                image: image.to_string(),
                identifier: raw_id.to_string(),
            });
            continue;
        }

        for (&landmark, truth_point) in truth_parts.iter() {
            let Some(predicted_index) = correspondence.predicted_index(landmark) else {
                continue;
            };
            let Some(predicted_point) = predicted_parts.get(&predicted_index) else {
                tracing::debug!(image, landmark, predicted_index, "prediction missing, skipping");
                out.mismatches.push(LookupMismatch::MissingPrediction {
                    image: image.to_string(),
                    landmark,
                    predicted_index,
                });
                continue;
            };

            let offset = *truth_point - *predicted_point;
            out.by_landmark
                .entry(landmark)
                .or_default()
                .push(DisplacementRecord {
                    image: image.to_string(),
                    landmark,
                    offset,
                    magnitude: offset.norm(),
                });
        }
    }

    for (raw_id, _) in ground_truth.iter() {
        let image = normalize_identifier(raw_id);
        if !matched.contains(image) {
            tracing::debug!(image, "no prediction for ground-truth image, skipping");
            out.mismatches.push(LookupMismatch::UnmatchedImage {
                image: image.to_string(),
                present_in: Source::GroundTruth,
            });
        }
    }

    tracing::info!(
        records = out.num_records(),
        skipped = out.mismatches.len(),
        "computed displacements"
    );
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    RawPixelMeanStd,
    ScaledPerLandmarkMean,
    FullDistribution,
}

/// Mean and population standard deviation of all pixel magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelSummary {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Unaggregated, scaled errors for one landmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LandmarkDistribution {
    pub images: Vec<String>,
    /// Scaled `(dx, dy)` offsets, one per image.
    pub offsets: Vec<Point>,
    /// Scaled magnitudes, one per image.
    pub magnitudes: Vec<f64>,
}

impl LandmarkDistribution {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Direction of every offset, `atan2(dy, dx)` in degrees.
    pub fn angles_degrees(&self) -> Vec<f64> {
        self.offsets.iter().map(Point::angle_degrees).collect()
    }

    pub fn magnitude_histogram(&self, bins: usize) -> Option<Histogram> {
        Histogram::new(&self.magnitudes, bins)
    }

    pub fn angle_histogram(&self, bins: usize) -> Option<Histogram> {
        Histogram::new(&self.angles_degrees(), bins)
    }

    /// Kernel density of the offsets on a square grid padded by one unit.
    pub fn density(&self, resolution: usize) -> Result<DensityGrid> {
        Ok(GaussianKde::new(&self.offsets)?.grid(resolution, 1.0))
    }

    /// Positions of samples whose magnitude exceeds `threshold`.
    pub fn outliers(&self, threshold: f64) -> Vec<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m > threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "result", rename_all = "snake_case")]
pub enum Report {
    RawPixelMeanStd(PixelSummary),
    ScaledPerLandmarkMean(BTreeMap<u32, f64>),
    FullDistribution(BTreeMap<u32, LandmarkDistribution>),
}

pub fn aggregate(
    displacements: &Displacements,
    scale_factors: &ScaleFactors,
    mode: AggregateMode,
) -> Result<Report> {
    Ok(match mode {
        AggregateMode::RawPixelMeanStd => Report::RawPixelMeanStd(pixel_summary(displacements)?),
        AggregateMode::ScaledPerLandmarkMean => {
            Report::ScaledPerLandmarkMean(scaled_means(displacements, scale_factors)?)
        }
        AggregateMode::FullDistribution => {
            Report::FullDistribution(distributions(displacements, scale_factors)?)
        }
    })
}

pub fn pixel_summary(displacements: &Displacements) -> Result<PixelSummary> {
    let magnitudes: Vec<f64> = displacements.records().map(|r| r.magnitude).collect();
    match (stats::mean(&magnitudes), stats::population_std(&magnitudes)) {
        (Some(mean), Some(std)) => Ok(PixelSummary {
            mean,
            std,
            count: magnitudes.len(),
        }),
        _ => Err(Error::NoMatches),
    }
}

/// Mean pixel magnitude per landmark.
pub fn pixel_means(displacements: &Displacements) -> BTreeMap<u32, f64> {
    displacements
        .by_landmark
        .iter()
        .filter_map(|(&landmark, records)| {
            let magnitudes: Vec<f64> = records.iter().map(|r| r.magnitude).collect();
            stats::mean(&magnitudes).map(|m| (landmark, m))
        })
        .collect()
}

fn scale_for(record: &DisplacementRecord, scale_factors: &ScaleFactors) -> Result<f64> {
    scale_factors
        .get(&record.image)
        .ok_or_else(|| Error::MissingReference {
            image: record.image.clone(),
            index: record.landmark,
        })
}

/// Mean physical-unit magnitude per landmark.
pub fn scaled_means(
    displacements: &Displacements,
    scale_factors: &ScaleFactors,
) -> Result<BTreeMap<u32, f64>> {
    let mut out = BTreeMap::new();
    for (&landmark, records) in &displacements.by_landmark {
        let scaled = records
            .iter()
            .map(|r| Ok(r.scaled_magnitude(scale_for(r, scale_factors)?)))
            .collect::<Result<Vec<f64>>>()?;
        if let Some(m) = stats::mean(&scaled) {
            out.insert(landmark, m);
        }
    }
    Ok(out)
}

/// Scaled offsets and magnitudes per landmark, unaggregated.
pub fn distributions(
    displacements: &Displacements,
    scale_factors: &ScaleFactors,
) -> Result<BTreeMap<u32, LandmarkDistribution>> {
    let mut out = BTreeMap::new();
    for (&landmark, records) in &displacements.by_landmark {
        let mut dist = LandmarkDistribution::default();
        for r in records {
            let scale = scale_for(r, scale_factors)?;
            let offset = r.scaled_offset(scale);
            dist.images.push(r.image.clone());
            dist.offsets.push(offset);
            dist.magnitudes.push(offset.norm());
        }
        out.insert(landmark, dist);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(points: &[(u32, f64, f64)]) -> ImageLandmarks {
        points
            .iter()
            .map(|&(i, x, y)| (i, Point::new(x, y)))
            .collect()
    }

    fn table(pairs: &[(u32, u32)]) -> CorrespondenceTable {
        CorrespondenceTable::new(pairs.iter().copied().collect()).unwrap()
    }

    fn scenario() -> (LandmarkSet, LandmarkSet, CorrespondenceTable) {
        let mut truth = LandmarkSet::new();
        truth.insert("a.jpg", image(&[(0, 0.0, 0.0), (1, 10.0, 0.0), (2, 5.0, 5.0)]));
        let mut predicted = LandmarkSet::new();
        predicted.insert("./a.jpg", image(&[(0, 1.0, 0.0), (1, 10.0, 0.0), (12, 4.0, 4.0)]));
        (predicted, truth, table(&[(0, 0), (1, 1), (2, 12)]))
    }

    #[test]
    fn normalize_strips_leading_markers_only() {
        assert_eq!(normalize_identifier("./a.jpg"), "a.jpg");
        assert_eq!(normalize_identifier("././a.jpg"), "a.jpg");
        assert_eq!(normalize_identifier(".\\test\\a.jpg"), "test\\a.jpg");
        assert_eq!(normalize_identifier("dir/./a.jpg"), "dir/./a.jpg");
        assert_eq!(normalize_identifier("../a.jpg"), "../a.jpg");

        for id in ["./x/./y.jpg", "a.jpg", "", "./", ".\\./z"] {
            let once = normalize_identifier(id);
            assert_eq!(normalize_identifier(once), once);
        }
    }

    #[test]
    fn worked_example() {
        let (predicted, truth, table) = scenario();

        let scales = compute_scale_factors(&truth, &ScaleReference::default()).unwrap();
        assert!((scales.get("a.jpg").unwrap() - 2.7).abs() < 1e-12);
        assert!((scales.get("./a.jpg").unwrap() - 2.7).abs() < 1e-12);

        let d = compute_displacements(&predicted, &truth, &table);
        assert!(d.mismatches.is_empty());
        let rec = &d.landmark(2)[0];
        assert_eq!(rec.image, "a.jpg");
        assert_eq!(rec.offset, Point::new(1.0, 1.0));
        assert!((rec.magnitude - 2f64.sqrt()).abs() < 1e-12);
        assert!((rec.scaled_magnitude(2.7) - 3.818).abs() < 1e-3);

        assert_eq!(d.landmark(0)[0].offset, Point::new(-1.0, 0.0));
        assert_eq!(d.landmark(1)[0].magnitude, 0.0);
    }

    #[test]
    fn displacement_ignores_point_insertion_order() {
        let (predicted, _, table) = scenario();
        let mut truth = LandmarkSet::new();
        let mut parts = ImageLandmarks::new();
        parts.insert(2, Point::new(5.0, 5.0));
        parts.insert(1, Point::new(10.0, 0.0));
        parts.insert(0, Point::new(0.0, 0.0));
        truth.insert("a.jpg", parts);

        let d = compute_displacements(&predicted, &truth, &table);
        assert_eq!(d.landmark(2)[0].offset, Point::new(1.0, 1.0));
        assert_eq!(d.num_records(), 3);
    }

    #[test]
    fn scale_factor_halves_when_coordinates_double() {
        let mut truth = LandmarkSet::new();
        truth.insert("a.jpg", image(&[(0, 3.0, 4.0), (1, 6.0, 8.0)]));
        truth.insert("b.jpg", image(&[(0, 6.0, 8.0), (1, 12.0, 16.0)]));

        let scales = compute_scale_factors(&truth, &ScaleReference::default()).unwrap();
        let a = scales.get("a.jpg").unwrap();
        let b = scales.get("b.jpg").unwrap();
        assert!((a * 5.0 - 27.0).abs() < 1e-12);
        assert!((b * 10.0 - 27.0).abs() < 1e-12);
        assert!((b - a / 2.0).abs() < 1e-12);
    }

    #[test]
    fn missing_and_degenerate_references() {
        let mut truth = LandmarkSet::new();
        truth.insert("a.jpg", image(&[(0, 0.0, 0.0), (2, 1.0, 1.0)]));
        match compute_scale_factors(&truth, &ScaleReference::default()) {
            Err(Error::MissingReference { image, index }) => {
                assert_eq!(image, "a.jpg");
                assert_eq!(index, 1);
            }
            other => panic!("expected missing reference, got {:?}", other),
        }

        let mut truth = LandmarkSet::new();
        truth.insert("b.jpg", image(&[(0, 2.0, 2.0), (1, 2.0, 2.0)]));
        assert!(matches!(
            compute_scale_factors(&truth, &ScaleReference::default()),
            Err(Error::DegenerateReference { ref image, .. }) if image == "b.jpg"
        ));
    }

    #[test]
    fn unmatched_images_are_skipped_and_reported() {
        let (mut predicted, mut truth, table) = scenario();
        predicted.insert("only_predicted.jpg", image(&[(0, 0.0, 0.0)]));
        truth.insert("only_truth.jpg", image(&[(0, 0.0, 0.0), (1, 1.0, 0.0)]));

        let d = compute_displacements(&predicted, &truth, &table);
        assert_eq!(d.num_records(), 3);
        assert!(d.records().all(|r| r.image == "a.jpg"));
        assert_eq!(
            d.mismatches,
            vec![
                LookupMismatch::UnmatchedImage {
                    image: "only_predicted.jpg".into(),
                    present_in: Source::Predicted,
                },
                LookupMismatch::UnmatchedImage {
                    image: "only_truth.jpg".into(),
                    present_in: Source::GroundTruth,
                },
            ]
        );
    }

    #[test]
    fn duplicate_prediction_is_joined_once() {
        let (mut predicted, truth, table) = scenario();
        predicted.insert("a.jpg", image(&[(0, 9.0, 9.0), (1, 9.0, 9.0), (12, 9.0, 9.0)]));

        let d = compute_displacements(&predicted, &truth, &table);
        assert_eq!(d.num_records(), 3);
        assert_eq!(d.landmark(0)[0].offset, Point::new(-1.0, 0.0));
        assert_eq!(
            d.mismatches,
            vec![LookupMismatch::DuplicatePrediction {
                image: "a.jpg".into(),
                identifier: "a.jpg".into(),
            }]
        );
    }

    #[test]
    fn missing_prediction_is_skipped_without_changing_aggregates() {
        let (mut predicted, truth, table) = scenario();
        predicted.insert("./a.jpg", image(&[(0, 1.0, 0.0), (1, 10.0, 0.0)]));

        let d = compute_displacements(&predicted, &truth, &table);
        assert!(d.landmark(2).is_empty());
        assert_eq!(
            d.mismatches,
            vec![LookupMismatch::MissingPrediction {
                image: "a.jpg".into(),
                landmark: 2,
                predicted_index: 12,
            }]
        );
        let summary = pixel_summary(&d).unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn raw_pixel_mean_and_population_std() {
        let mut d = Displacements::default();
        for (image, m) in [("a", 3.0), ("b", 4.0)] {
            d.by_landmark.entry(5).or_default().push(DisplacementRecord {
                image: image.into(),
                landmark: 5,
                offset: Point::new(m, 0.0),
                magnitude: m,
            });
        }
        match aggregate(&d, &ScaleFactors::default(), AggregateMode::RawPixelMeanStd).unwrap() {
            Report::RawPixelMeanStd(s) => {
                assert!((s.mean - 3.5).abs() < 1e-12);
                assert!((s.std - 0.5).abs() < 1e-12);
                assert_eq!(s.count, 2);
            }
            other => panic!("unexpected report {:?}", other),
        }

        assert!(matches!(
            pixel_summary(&Displacements::default()),
            Err(Error::NoMatches)
        ));
    }

    #[test]
    fn scaled_means_and_distribution() {
        let (predicted, truth, table) = scenario();
        let scales = compute_scale_factors(&truth, &ScaleReference::default()).unwrap();
        let d = compute_displacements(&predicted, &truth, &table);

        let means = scaled_means(&d, &scales).unwrap();
        assert!((means[&0] - 2.7).abs() < 1e-12);
        assert_eq!(means[&1], 0.0);
        assert!((means[&2] - 2.7 * 2f64.sqrt()).abs() < 1e-12);

        let dist = match aggregate(&d, &scales, AggregateMode::FullDistribution).unwrap() {
            Report::FullDistribution(dist) => dist,
            other => panic!("unexpected report {:?}", other),
        };
        let lm2 = &dist[&2];
        assert_eq!(lm2.images, vec!["a.jpg"]);
        assert!((lm2.offsets[0].x - 2.7).abs() < 1e-12);
        assert!((lm2.offsets[0].y - 2.7).abs() < 1e-12);
        assert!((lm2.magnitudes[0] - 3.818).abs() < 1e-3);
        assert!((lm2.angles_degrees()[0] - 45.0).abs() < 1e-9);
        assert_eq!(lm2.outliers(1.0), vec![0]);
        assert!(dist[&1].outliers(1.0).is_empty());
    }

    #[test]
    fn missing_scale_factor_is_an_error() {
        let (predicted, truth, table) = scenario();
        let d = compute_displacements(&predicted, &truth, &table);
        assert!(matches!(
            scaled_means(&d, &ScaleFactors::default()),
            Err(Error::MissingReference { .. })
        ));
    }
}
