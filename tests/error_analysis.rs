//! End-to-end checks of the error analysis over imglab XML fixtures.

use std::path::PathBuf;

use landmark_eval::{
    aggregate, compute_displacements, compute_scale_factors, imglab, load_landmarks, tps,
    AggregateMode, AnalysisConfig, Error, LandmarkSet, LookupMismatch, Point, Report, Source,
};

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

fn load_fixtures() -> (LandmarkSet, LandmarkSet) {
    let predicted = load_landmarks(data_dir().join("predicted.xml")).expect("predicted.xml");
    let truth = load_landmarks(data_dir().join("ground_truth.xml")).expect("ground_truth.xml");
    (predicted, truth)
}

#[test]
fn fixtures_load() {
    let (predicted, truth) = load_fixtures();
    assert_eq!(truth.len(), 3);
    assert_eq!(predicted.len(), 3);
    assert_eq!(truth.get("test\\s2.jpg").unwrap()[&1], Point::new(50.0, 104.0));
    assert!(predicted.get("./test\\s1.jpg").unwrap().contains_key(&23));
}

#[test]
fn pixel_summary_over_matched_landmarks() {
    let (predicted, truth) = load_fixtures();
    let config = AnalysisConfig::default();
    let d = compute_displacements(&predicted, &truth, &config.correspondence);

    // s1: 0, 0, 5, 0 and s2: 1, 0, 4 (landmark 3 has no prediction).
    assert_eq!(d.num_records(), 7);

    let report = aggregate(&d, &Default::default(), AggregateMode::RawPixelMeanStd).unwrap();
    let Report::RawPixelMeanStd(summary) = report else {
        panic!("unexpected report {:?}", report);
    };
    assert_eq!(summary.count, 7);
    assert!((summary.mean - 10.0 / 7.0).abs() < 1e-12);
    assert!((summary.std - 194f64.sqrt() / 7.0).abs() < 1e-12);
}

#[test]
fn skipped_points_are_reported_in_join_order() {
    let (predicted, truth) = load_fixtures();
    let config = AnalysisConfig::default();
    let d = compute_displacements(&predicted, &truth, &config.correspondence);

    assert_eq!(
        d.mismatches,
        vec![
            LookupMismatch::MissingPrediction {
                image: "test\\s2.jpg".into(),
                landmark: 3,
                predicted_index: 23,
            },
            LookupMismatch::UnmatchedImage {
                image: "extra.jpg".into(),
                present_in: Source::Predicted,
            },
            LookupMismatch::UnmatchedImage {
                image: "test\\s3.jpg".into(),
                present_in: Source::GroundTruth,
            },
        ]
    );

    let images: Vec<_> = d.landmark(2).iter().map(|r| r.image.as_str()).collect();
    assert_eq!(images, vec!["test\\s1.jpg", "test\\s2.jpg"]);
}

#[test]
fn scaled_errors_use_each_images_ruler() {
    let (predicted, truth) = load_fixtures();
    let config = AnalysisConfig::default();
    let scales = compute_scale_factors(&truth, &config.reference).unwrap();
    assert!((scales.get("test\\s1.jpg").unwrap() - 0.27).abs() < 1e-12);
    assert!((scales.get("test\\s2.jpg").unwrap() - 0.5).abs() < 1e-12);
    assert!((scales.get("test\\s3.jpg").unwrap() - 1.0).abs() < 1e-12);

    let d = compute_displacements(&predicted, &truth, &config.correspondence);

    let Report::ScaledPerLandmarkMean(means) =
        aggregate(&d, &scales, AggregateMode::ScaledPerLandmarkMean).unwrap()
    else {
        panic!("expected per-landmark means");
    };
    assert!((means[&0] - 0.25).abs() < 1e-12);
    assert_eq!(means[&1], 0.0);
    assert!((means[&2] - 1.675).abs() < 1e-12);
    assert_eq!(means[&3], 0.0);

    let Report::FullDistribution(dist) =
        aggregate(&d, &scales, AggregateMode::FullDistribution).unwrap()
    else {
        panic!("expected distributions");
    };
    let lm2 = &dist[&2];
    assert!((lm2.offsets[0].x + 0.81).abs() < 1e-12);
    assert!((lm2.offsets[0].y + 1.08).abs() < 1e-12);
    assert!((lm2.offsets[1].y - 2.0).abs() < 1e-12);
    assert_eq!(lm2.outliers(1.5), vec![1]);

    // Two samples always lie on a line, so no density can be estimated.
    assert!(matches!(lm2.density(100), Err(Error::SingularDensity(_))));
}

#[test]
fn report_serializes_with_mode_tag() {
    let (predicted, truth) = load_fixtures();
    let config = AnalysisConfig::default();
    let scales = compute_scale_factors(&truth, &config.reference).unwrap();
    let d = compute_displacements(&predicted, &truth, &config.correspondence);

    let report = aggregate(&d, &scales, AggregateMode::ScaledPerLandmarkMean).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["mode"], "scaled_per_landmark_mean");
    assert_eq!(json["result"]["1"], 0.0);
}

#[test]
fn tps_converts_to_trainer_xml() {
    let text = "LM=3\n0 0\n27 0\n5 5\nIMAGE=a.jpg\nLM=3\n1 1\n2 2\n3 4\nIMAGE=b.jpg\n";
    let records = tps::parse_tps(text).unwrap();
    let set = tps::tps_to_landmark_set(&records).unwrap();

    let path = std::env::temp_dir().join("landmark_eval_tps_to_xml.xml");
    imglab::write_xml(&set, "converted", &path).unwrap();
    let back = load_landmarks(&path).unwrap();
    assert_eq!(back, set);

    std::fs::remove_file(path).ok();
}
