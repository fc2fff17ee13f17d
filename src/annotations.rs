//! Loading landmark sets from any supported annotation file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ImageLandmarks, LandmarkSet, Point};
use crate::{imglab, tps};

/// One image in the JSON annotation format.
///
/// ```json
/// [{ "file": "a.jpg", "parts": { "0": [12.0, 40.5], "1": [80.0, 41.0] } }]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonImage {
    file: String,
    parts: BTreeMap<String, [f64; 2]>,
}

/// Load a landmark set, choosing the parser from the file extension:
/// `.xml` (imglab), `.tps`, or `.json`.
pub fn load_landmarks<P: AsRef<Path>>(path: P) -> Result<LandmarkSet> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("xml") => imglab::load_xml(path),
        Some("tps") => tps::tps_to_landmark_set(&tps::read_tps(path)?),
        Some("json") => parse_json(&fs::read_to_string(path)?),
        _ => Err(Error::parse(
            path.display().to_string(),
            "unsupported annotation format (expected .xml, .tps or .json)",
        )),
    }
}

pub fn parse_json(text: &str) -> Result<LandmarkSet> {
    let images: Vec<JsonImage> = serde_json::from_str(text)?;
    let mut set = LandmarkSet::new();
    for image in images {
        let mut landmarks = ImageLandmarks::new();
        for (name, [x, y]) in &image.parts {
            let record = || format!("image '{}' part '{}'", image.file, name);
            let index: u32 = name
                .trim()
                .parse()
                .map_err(|_| Error::parse(record(), "part name is not a non-negative integer"))?;
            let point = Point::new(*x, *y);
            if !point.is_finite() {
                return Err(Error::parse(record(), "coordinate is not finite"));
            }
            if landmarks.insert(index, point).is_some() {
                tracing::debug!(image = %image.file, index, "duplicate part, keeping the last one");
            }
        }
        set.insert(image.file, landmarks);
    }
    Ok(set)
}

/// Write a landmark set, choosing the format from the file extension:
/// `.xml` (imglab, dataset named after the file stem) or `.json`.
pub fn write_landmarks<P: AsRef<Path>>(set: &LandmarkSet, path: P) -> Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("xml") => {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("landmarks");
            imglab::write_xml(set, name, path)
        }
        Some("json") => {
            fs::write(path, to_json(set)?)?;
            Ok(())
        }
        _ => Err(Error::parse(
            path.display().to_string(),
            "unsupported output format (expected .xml or .json)",
        )),
    }
}

pub fn to_json(set: &LandmarkSet) -> Result<String> {
    let images: Vec<JsonImage> = set
        .iter()
        .map(|(file, landmarks)| JsonImage {
            file: file.to_string(),
            parts: landmarks
                .iter()
                .map(|(idx, p)| (idx.to_string(), [p.x, p.y]))
                .collect(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&images)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let text = r#"[
            { "file": "./a.jpg", "parts": { "0": [1.0, 2.0], "12": [3.5, -4.0] } },
            { "file": "b.jpg", "parts": {} }
        ]"#;
        let set = parse_json(text).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("./a.jpg").unwrap()[&12], Point::new(3.5, -4.0));

        let back = parse_json(&to_json(&set).unwrap()).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn json_rejects_bad_part_name() {
        let text = r#"[{ "file": "a.jpg", "parts": { "-1": [1.0, 2.0] } }]"#;
        assert!(matches!(parse_json(text), Err(Error::Parse { .. })));
    }

    #[test]
    fn json_duplicate_index_keeps_one_point() {
        let text = r#"[{ "file": "a.jpg", "parts": { "01": [1.0, 2.0], "1": [3.0, 4.0] } }]"#;
        let set = parse_json(text).unwrap();
        let a = set.get("a.jpg").unwrap();
        assert_eq!(a.len(), 1);
        assert!(a.contains_key(&1));
    }

    #[test]
    fn written_files_load_back() {
        let mut set = LandmarkSet::new();
        set.insert(
            "./s1.jpg",
            ImageLandmarks::from([(0, Point::new(4.0, 8.0)), (7, Point::new(20.0, 16.0))]),
        );

        for ext in ["json", "xml"] {
            let path = std::env::temp_dir().join(format!("landmark_eval_convert.{}", ext));
            write_landmarks(&set, &path).unwrap();
            assert_eq!(load_landmarks(&path).unwrap(), set);
            fs::remove_file(path).ok();
        }

        assert!(matches!(
            write_landmarks(&set, "out.tps"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            load_landmarks("annotations.csv"),
            Err(Error::Parse { .. })
        ));
    }
}
