//! CLI for landmark accuracy analysis and TPS dataset housekeeping.
//!
//! Usage:
//!   landmark-eval summary <predicted.xml> <truth.xml>            # pixel mean/std
//!   landmark-eval scaled <predicted.xml> <truth.xml> --json      # per-landmark mm
//!   landmark-eval distribution <predicted.xml> <truth.xml> out/  # figures + JSON
//!   landmark-eval overlay <predicted.xml> <truth.xml> 3 out.png  # photo overlay
//!   landmark-eval combine-tps data/ combined.tps
//!   landmark-eval tps-to-xml combined.tps train.xml
//!   landmark-eval convert predicted.tps predicted.json
//!   landmark-eval collect-images raw/ images/

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use landmark_eval::overlay::{self, OverlayStyle};
use landmark_eval::stats::Histogram;
use landmark_eval::{
    compute_displacements, compute_scale_factors, distributions, imglab, load_landmarks,
    pixel_means, pixel_summary, plot, scaled_means, tps, write_landmarks, AnalysisConfig, Displacements, Error,
    LandmarkSet, LookupMismatch, Point, ScaleFactors,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "landmark-eval")]
#[command(author, version, about = "Landmark prediction accuracy and TPS dataset tools", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Analysis config (JSON): scale reference, correspondence table, plot settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(short, long, global = true)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mean and standard deviation of the pixel error over all landmarks
    Summary {
        /// Predicted landmarks (.xml, .tps or .json)
        predicted: PathBuf,
        /// Ground-truth landmarks (.xml, .tps or .json)
        ground_truth: PathBuf,
    },

    /// Mean error per landmark in physical units
    Scaled {
        predicted: PathBuf,
        ground_truth: PathBuf,
    },

    /// Per-landmark error distributions: figures and distribution.json
    Distribution {
        predicted: PathBuf,
        ground_truth: PathBuf,
        /// Folder for landmark_<n>.png and distribution.json
        out_dir: PathBuf,
        /// Only this ground-truth landmark
        #[arg(long)]
        landmark: Option<u32>,
        /// Write distribution.json only
        #[arg(long)]
        no_plots: bool,
    },

    /// Draw ground truth and predictions over one specimen photo
    Overlay {
        predicted: PathBuf,
        ground_truth: PathBuf,
        /// Position of the image in the ground-truth file (0-based)
        index: usize,
        /// Output PNG
        out: PathBuf,
        /// Folder the image paths in the ground-truth file are relative to
        #[arg(long, default_value = ".")]
        image_root: PathBuf,
        /// Marker radius in pixels (0 = from image size)
        #[arg(long, default_value = "0")]
        radius: i32,
    },

    /// Concatenate every .tps file below a folder
    CombineTps { root: PathBuf, out: PathBuf },

    /// Keep only images of a given grade in the manual and automatic TPS files
    SubsetTps {
        /// Combined TPS of manually annotated (dorsal) images
        manual: PathBuf,
        /// Combined TPS of processed images
        auto: PathBuf,
        /// Lines of `processed,dorsal` image names
        #[arg(long, default_value = "image_mapping.txt")]
        mapping: PathBuf,
        /// Lines of `name,quality,note`
        #[arg(long, default_value = "graded_lizards.txt")]
        grades: PathBuf,
        #[arg(long, default_value = "good")]
        quality: String,
        #[arg(long, default_value = "subset_manual.tps")]
        manual_out: PathBuf,
        #[arg(long, default_value = "subset_auto.tps")]
        auto_out: PathBuf,
    },

    /// Convert a TPS file to imglab XML for the shape predictor trainer
    TpsToXml {
        tps: PathBuf,
        out: PathBuf,
        /// Dataset name written into the XML
        #[arg(long, default_value = "landmarks")]
        name: String,
    },

    /// Convert a landmark file to .xml or .json, chosen by the output extension
    Convert { input: PathBuf, out: PathBuf },

    /// Copy every .jpg below a folder into one flat folder
    CollectImages { root: PathBuf, out: PathBuf },
}

/// Output structure for `summary`
#[derive(Serialize)]
struct SummaryOutput {
    records: usize,
    mean_px: f64,
    std_px: f64,
    /// Mean pixel error per ground-truth landmark
    per_landmark_px: BTreeMap<u32, f64>,
    skipped: SkipOutput,
}

/// Output structure for `scaled`
#[derive(Serialize)]
struct ScaledOutput {
    images: usize,
    reference_length: f64,
    per_landmark: BTreeMap<u32, f64>,
    skipped: SkipOutput,
}

#[derive(Serialize, Default)]
struct SkipOutput {
    unmatched_images: usize,
    missing_predictions: usize,
    duplicate_predictions: usize,
}

impl SkipOutput {
    fn from_mismatches(mismatches: &[LookupMismatch]) -> Self {
        let mut out = Self::default();
        for m in mismatches {
            match m {
                LookupMismatch::UnmatchedImage { .. } => out.unmatched_images += 1,
                LookupMismatch::MissingPrediction { .. } => out.missing_predictions += 1,
                LookupMismatch::DuplicatePrediction { .. } => out.duplicate_predictions += 1,
            }
        }
        out
    }
}

/// Output structure for `overlay`
#[derive(Serialize)]
struct OverlayOutput {
    image: String,
    photo: String,
    output: String,
    predicted: bool,
}

/// One landmark in distribution.json
#[derive(Serialize)]
struct DistributionOutput {
    images: Vec<String>,
    offsets: Vec<Point>,
    magnitudes: Vec<f64>,
    angles_degrees: Vec<f64>,
    magnitude_histogram: Option<Histogram>,
    angle_histogram: Option<Histogram>,
    outliers: Vec<usize>,
    figure: Option<String>,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from {:?}", path);
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };

    match &args.command {
        Command::Summary {
            predicted,
            ground_truth,
        } => run_summary(args, &config, predicted, ground_truth),
        Command::Scaled {
            predicted,
            ground_truth,
        } => run_scaled(args, &config, predicted, ground_truth),
        Command::Distribution {
            predicted,
            ground_truth,
            out_dir,
            landmark,
            no_plots,
        } => run_distribution(
            args,
            &config,
            predicted,
            ground_truth,
            out_dir,
            *landmark,
            *no_plots,
        ),
        Command::Overlay {
            predicted,
            ground_truth,
            index,
            out,
            image_root,
            radius,
        } => run_overlay(
            args,
            &config,
            predicted,
            ground_truth,
            *index,
            out,
            image_root,
            *radius,
        ),
        Command::CombineTps { root, out } => {
            let count = tps::combine_tps_files(root, out)?;
            emit(args, &format!("Combined {} files into {}", count, out.display()))
        }
        Command::SubsetTps {
            manual,
            auto,
            mapping,
            grades,
            quality,
            manual_out,
            auto_out,
        } => {
            let mapping = tps::read_image_mapping(mapping)?;
            let grades = tps::read_grades(grades)?;
            let selection = tps::select_graded(&grades, &mapping, quality)?;

            let manual_names: HashSet<String> = selection.manual.into_iter().collect();
            let manual_subset = tps::subset_records(&tps::read_tps(manual)?, &manual_names);
            tps::write_tps(&manual_subset, manual_out)?;

            let auto_names: HashSet<String> = selection.processed.into_iter().collect();
            let auto_subset = tps::subset_records(&tps::read_tps(auto)?, &auto_names);
            tps::write_tps(&auto_subset, auto_out)?;

            emit(
                args,
                &format!(
                    "Kept {} manual and {} automatic records graded '{}'",
                    manual_subset.len(),
                    auto_subset.len(),
                    quality
                ),
            )
        }
        Command::TpsToXml { tps: path, out, name } => {
            let set = tps::tps_to_landmark_set(&tps::read_tps(path)?)?;
            imglab::write_xml(&set, name, out)?;
            emit(
                args,
                &format!("Wrote {} images to {}", set.len(), out.display()),
            )
        }
        Command::Convert { input, out } => {
            let set = load_landmarks(input)?;
            write_landmarks(&set, out)?;
            emit(
                args,
                &format!("Wrote {} images to {}", set.len(), out.display()),
            )
        }
        Command::CollectImages { root, out } => {
            let count = tps::collect_images(root, out)?;
            emit(args, &format!("Copied {} images into {}", count, out.display()))
        }
    }
}

fn load_pair(predicted: &Path, ground_truth: &Path) -> Result<(LandmarkSet, LandmarkSet), Error> {
    tracing::info!("Loading predictions from {:?}...", predicted);
    let predicted = load_landmarks(predicted)?;
    tracing::info!("Loading ground truth from {:?}...", ground_truth);
    let ground_truth = load_landmarks(ground_truth)?;
    Ok((predicted, ground_truth))
}

fn analyze(
    config: &AnalysisConfig,
    predicted: &Path,
    ground_truth: &Path,
) -> Result<(LandmarkSet, Displacements, ScaleFactors), Error> {
    let (predicted, ground_truth) = load_pair(predicted, ground_truth)?;
    let scales = compute_scale_factors(&ground_truth, &config.reference)?;
    let displacements = compute_displacements(&predicted, &ground_truth, &config.correspondence);
    Ok((ground_truth, displacements, scales))
}

fn run_summary(
    args: &Args,
    config: &AnalysisConfig,
    predicted: &Path,
    ground_truth: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (predicted, ground_truth) = load_pair(predicted, ground_truth)?;
    let displacements = compute_displacements(&predicted, &ground_truth, &config.correspondence);
    let summary = pixel_summary(&displacements)?;

    let output = SummaryOutput {
        records: summary.count,
        mean_px: summary.mean,
        std_px: summary.std,
        per_landmark_px: pixel_means(&displacements),
        skipped: SkipOutput::from_mismatches(&displacements.mismatches),
    };

    let text = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        let mut s = String::new();
        s.push_str(&format!("Average Difference: {:.2} pixels\n", output.mean_px));
        s.push_str(&format!("Average Deviation: {:.2} pixels\n", output.std_px));
        s.push_str(&format!("Matched landmarks: {}\n", output.records));
        s.push_str("\nPer landmark (pixels):\n");
        for (landmark, mean) in &output.per_landmark_px {
            s.push_str(&format!("  {:>3}: {:.2}\n", landmark, mean));
        }
        s.push_str(&format_skipped(&output.skipped));
        s
    };
    emit(args, &text)
}

fn run_scaled(
    args: &Args,
    config: &AnalysisConfig,
    predicted: &Path,
    ground_truth: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, displacements, scales) = analyze(config, predicted, ground_truth)?;

    let output = ScaledOutput {
        images: scales.len(),
        reference_length: config.reference.length,
        per_landmark: scaled_means(&displacements, &scales)?,
        skipped: SkipOutput::from_mismatches(&displacements.mismatches),
    };

    let text = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        let mut s = String::new();
        s.push_str(&format!(
            "Ground-truth images: {} (ruler = {} units)\n",
            output.images, output.reference_length
        ));
        s.push_str("\nMean error per landmark:\n");
        for (landmark, mean) in &output.per_landmark {
            s.push_str(&format!("  {:>3}: {:.3}\n", landmark, mean));
        }
        s.push_str(&format_skipped(&output.skipped));
        s
    };
    emit(args, &text)
}

fn run_distribution(
    args: &Args,
    config: &AnalysisConfig,
    predicted: &Path,
    ground_truth: &Path,
    out_dir: &Path,
    only: Option<u32>,
    no_plots: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, displacements, scales) = analyze(config, predicted, ground_truth)?;
    let mut dists = distributions(&displacements, &scales)?;
    if let Some(landmark) = only {
        dists.retain(|&k, _| k == landmark);
        if dists.is_empty() {
            return Err(format!("No matched samples for landmark {}", landmark).into());
        }
    }

    std::fs::create_dir_all(out_dir)?;

    let mut output = BTreeMap::new();
    let mut figures = 0usize;
    for (&landmark, dist) in &dists {
        let figure = if no_plots {
            None
        } else {
            let path = out_dir.join(format!("landmark_{}.png", landmark));
            match plot::render_landmark_figure(dist, config, &path) {
                Ok(()) => {
                    figures += 1;
                    Some(path.display().to_string())
                }
                Err(Error::SingularDensity(reason)) => {
                    tracing::warn!(landmark, %reason, "skipping figure");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        };

        output.insert(
            landmark,
            DistributionOutput {
                images: dist.images.clone(),
                offsets: dist.offsets.clone(),
                magnitudes: dist.magnitudes.clone(),
                angles_degrees: dist.angles_degrees(),
                magnitude_histogram: dist.magnitude_histogram(config.histogram_bins),
                angle_histogram: dist.angle_histogram(config.histogram_bins),
                outliers: dist.outliers(config.outlier_threshold),
                figure,
            },
        );
    }

    let json = serde_json::to_string_pretty(&output)?;
    let json_path = out_dir.join("distribution.json");
    std::fs::write(&json_path, &json)?;

    if args.json {
        emit(args, &json)
    } else {
        emit(
            args,
            &format!(
                "Wrote {} landmark distribution(s) to {} and {} figure(s) to {}",
                output.len(),
                json_path.display(),
                figures,
                out_dir.display()
            ),
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn run_overlay(
    args: &Args,
    config: &AnalysisConfig,
    predicted: &Path,
    ground_truth: &Path,
    index: usize,
    out: &Path,
    image_root: &Path,
    radius: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let (predicted, ground_truth) = load_pair(predicted, ground_truth)?;
    let pair = overlay::select_image(&ground_truth, &predicted, index)?;
    let photo = image_root.join(pair.image.replace('\\', "/"));
    tracing::info!("Drawing overlay for {:?}", photo);

    let style = OverlayStyle {
        radius,
        ..Default::default()
    };
    overlay::render_overlay(&photo, &pair, &config.correspondence, &style, out)?;

    let output = OverlayOutput {
        image: pair.image.to_string(),
        photo: photo.display().to_string(),
        output: out.display().to_string(),
        predicted: pair.predicted.is_some(),
    };
    let text = if args.json {
        serde_json::to_string_pretty(&output)?
    } else {
        format!("{} -> {}", output.image, output.output)
    };
    emit(args, &text)
}

fn format_skipped(skipped: &SkipOutput) -> String {
    if skipped.unmatched_images == 0
        && skipped.missing_predictions == 0
        && skipped.duplicate_predictions == 0
    {
        return String::new();
    }
    format!(
        "\nSkipped: {} unmatched image(s), {} missing prediction(s), {} duplicate prediction(s)\n",
        skipped.unmatched_images, skipped.missing_predictions, skipped.duplicate_predictions
    )
}

fn emit(args: &Args, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref path) = args.output {
        std::fs::write(path, text)?;
        tracing::info!("Output written to {:?}", path);
    } else {
        println!("{}", text);
    }
    Ok(())
}
