//! TPS landmark files: parsing, writing, and dataset housekeeping.
//!
//! A TPS file is a sequence of records:
//!
//! ```text
//! LM=3
//! 10.0 20.0
//! 11.5 22.0
//! 30.0 41.0
//! IMAGE=specimen_01.jpg
//! ID=17
//! SCALE=0.0254
//! ```
//!
//! Landmarks within a record are numbered by their position, starting at 0.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ImageLandmarks, LandmarkSet, Point};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TpsRecord {
    pub landmarks: Vec<Point>,
    pub image: Option<String>,
    pub id: Option<String>,
    pub scale: Option<f64>,
    pub comment: Option<String>,
}

pub fn read_tps<P: AsRef<Path>>(path: P) -> Result<Vec<TpsRecord>> {
    let text = fs::read_to_string(path)?;
    parse_tps(&text)
}

pub fn parse_tps(text: &str) -> Result<Vec<TpsRecord>> {
    let mut records: Vec<TpsRecord> = Vec::new();
    let mut pending = 0usize;

    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lineno = n + 1;
        let record = || format!("TPS line {}", lineno);

        if pending > 0 {
            let point = parse_point(line).ok_or_else(|| {
                Error::parse(record(), format!("expected 'x y' coordinates, got {:?}", line))
            })?;
            if let Some(current) = records.last_mut() {
                current.landmarks.push(point);
            }
            pending -= 1;
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::parse(record(), format!("unexpected line {:?}", line)));
        };
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim();

        if key == "LM" {
            pending = value
                .parse()
                .map_err(|_| Error::parse(record(), format!("bad landmark count {:?}", value)))?;
            records.push(TpsRecord {
                landmarks: Vec::new(),
                ..Default::default()
            });
            continue;
        }

        let Some(current) = records.last_mut() else {
            return Err(Error::parse(record(), format!("{} before the first LM=", key)));
        };
        match key.as_str() {
            "IMAGE" => current.image = Some(value.to_string()),
            "ID" => current.id = Some(value.to_string()),
            "COMMENT" => current.comment = Some(value.to_string()),
            "SCALE" => {
                let scale: f64 = value
                    .parse()
                    .map_err(|_| Error::parse(record(), format!("bad scale {:?}", value)))?;
                current.scale = Some(scale);
            }
            _ => tracing::debug!(line = lineno, key = %key, "ignoring unknown TPS field"),
        }
    }

    if pending > 0 {
        return Err(Error::parse(
            "TPS end of file",
            format!("{} landmark line(s) missing from the last record", pending),
        ));
    }

    Ok(records)
}

fn parse_point(line: &str) -> Option<Point> {
    let mut fields = line.split_whitespace();
    let x: f64 = fields.next()?.parse().ok()?;
    let y: f64 = fields.next()?.parse().ok()?;
    let p = Point::new(x, y);
    p.is_finite().then_some(p)
}

pub fn to_tps(records: &[TpsRecord]) -> String {
    let mut out = String::new();
    for r in records {
        let _ = writeln!(out, "LM={}", r.landmarks.len());
        for p in &r.landmarks {
            let _ = writeln!(out, "{} {}", p.x, p.y);
        }
        if let Some(image) = &r.image {
            let _ = writeln!(out, "IMAGE={}", image);
        }
        if let Some(id) = &r.id {
            let _ = writeln!(out, "ID={}", id);
        }
        if let Some(scale) = r.scale {
            let _ = writeln!(out, "SCALE={}", scale);
        }
        if let Some(comment) = &r.comment {
            let _ = writeln!(out, "COMMENT={}", comment);
        }
    }
    out
}

pub fn write_tps<P: AsRef<Path>>(records: &[TpsRecord], path: P) -> Result<()> {
    fs::write(path, to_tps(records))?;
    Ok(())
}

/// Convert TPS records into a landmark set keyed by `IMAGE=`.
///
/// A record without an image name cannot be joined against anything and is
/// rejected.
pub fn tps_to_landmark_set(records: &[TpsRecord]) -> Result<LandmarkSet> {
    let mut set = LandmarkSet::new();
    for (i, r) in records.iter().enumerate() {
        let image = r
            .image
            .as_deref()
            .ok_or_else(|| Error::parse(format!("TPS record #{}", i), "missing IMAGE="))?;
        let landmarks: ImageLandmarks = r
            .landmarks
            .iter()
            .enumerate()
            .map(|(idx, p)| (idx as u32, *p))
            .collect();
        set.insert(image, landmarks);
    }
    Ok(set)
}

/// Files below `dir` whose extension matches `extension`, ignoring case.
fn find_files_under(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let p = entry?.path();
        if p.is_dir() {
            out.extend(find_files_under(&p, extension)?);
            continue;
        }
        let matches = p
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            out.push(p);
        }
    }
    Ok(out)
}

/// Concatenate every `.tps` file below `root` into `output`.
///
/// Files are visited in sorted path order. Returns the number of files
/// combined.
pub fn combine_tps_files<P: AsRef<Path>, Q: AsRef<Path>>(root: P, output: Q) -> Result<usize> {
    let mut files = find_files_under(root.as_ref(), "tps")?;
    files.sort();

    let mut combined = String::new();
    for f in &files {
        let contents = fs::read_to_string(f)?;
        combined.push_str(&contents);
        if !contents.is_empty() && !contents.ends_with('\n') {
            combined.push('\n');
        }
    }
    fs::write(output, combined)?;

    tracing::info!(files = files.len(), "combined TPS files");
    Ok(files.len())
}

/// Copy every `.jpg` below `root` flat into `output`, creating it if needed.
///
/// Files with the same name in different folders overwrite each other; the
/// last in sorted path order wins. Returns the number of files copied.
pub fn collect_images<P: AsRef<Path>, Q: AsRef<Path>>(root: P, output: Q) -> Result<usize> {
    let output = output.as_ref();
    fs::create_dir_all(output)?;

    let mut files = find_files_under(root.as_ref(), "jpg")?;
    files.sort();
    for f in &files {
        let Some(name) = f.file_name() else {
            continue;
        };
        fs::copy(f, output.join(name))?;
        tracing::debug!(from = %f.display(), "copied image");
    }

    tracing::info!(files = files.len(), "collected images");
    Ok(files.len())
}

/// Keep the records whose image name is in `names`, in file order.
pub fn subset_records(records: &[TpsRecord], names: &HashSet<String>) -> Vec<TpsRecord> {
    records
        .iter()
        .filter(|r| r.image.as_ref().is_some_and(|img| names.contains(img)))
        .cloned()
        .collect()
}

fn read_csv_lines(path: &Path, fields: usize) -> Result<Vec<Vec<String>>> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Vec<String> = line.split(',').map(|s| s.trim().to_string()).collect();
        if row.len() != fields {
            return Err(Error::parse(
                format!("{} line {}", path.display(), n + 1),
                format!("expected {} comma-separated fields, got {}", fields, row.len()),
            ));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read `processed,dorsal` pairs mapping automatic image names to the
/// corresponding manually annotated image names.
pub fn read_image_mapping<P: AsRef<Path>>(path: P) -> Result<Vec<(String, String)>> {
    Ok(read_csv_lines(path.as_ref(), 2)?
        .into_iter()
        .map(|mut row| {
            let dorsal = row.pop().unwrap_or_default();
            let processed = row.pop().unwrap_or_default();
            (processed, dorsal)
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub name: String,
    pub quality: String,
    pub note: String,
}

/// Read `name,quality,note` image grades.
pub fn read_grades<P: AsRef<Path>>(path: P) -> Result<Vec<Grade>> {
    Ok(read_csv_lines(path.as_ref(), 3)?
        .into_iter()
        .map(|row| {
            let mut it = row.into_iter();
            Grade {
                name: it.next().unwrap_or_default(),
                quality: it.next().unwrap_or_default(),
                note: it.next().unwrap_or_default(),
            }
        })
        .collect())
}

/// Image names selected by grade: the manual (dorsal) names and their
/// processed counterparts, in grade-file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradedSelection {
    pub manual: Vec<String>,
    pub processed: Vec<String>,
}

/// Select the images graded `quality` and look up their processed names.
pub fn select_graded(
    grades: &[Grade],
    mapping: &[(String, String)],
    quality: &str,
) -> Result<GradedSelection> {
    let by_dorsal: HashMap<&str, &str> = mapping
        .iter()
        .map(|(processed, dorsal)| (dorsal.as_str(), processed.as_str()))
        .collect();

    let mut selection = GradedSelection::default();
    for g in grades.iter().filter(|g| g.quality == quality) {
        let processed = by_dorsal.get(g.name.as_str()).ok_or_else(|| {
            Error::parse(
                format!("grade for '{}'", g.name),
                "image is not present in the image mapping",
            )
        })?;
        selection.manual.push(g.name.clone());
        selection.processed.push((*processed).to_string());
    }
    Ok(selection)
}
