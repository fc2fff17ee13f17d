//! Reader and writer for dlib's imglab XML dataset format.
//!
//! The format is the one produced by `imglab` and consumed by dlib's
//! shape predictor trainer:
//!
//! ```xml
//! <dataset>
//!   <images>
//!     <image file='specimen_01.jpg'>
//!       <box top='10' left='12' width='300' height='200'>
//!         <part name='0' x='31' y='45'/>
//!       </box>
//!     </image>
//!   </images>
//! </dataset>
//! ```
//!
//! Parts are collected from anywhere below an `image` element, so files with
//! several boxes per image are flattened into one set of landmarks.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{Error, Result};
use crate::types::{ImageLandmarks, LandmarkSet, Point};

/// Load landmarks from an imglab XML file.
///
/// imglab writes `encoding='ISO-8859-1'` in its declaration; such files are
/// decoded as Latin-1 when they are not valid UTF-8.
pub fn load_xml<P: AsRef<Path>>(path: P) -> Result<LandmarkSet> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let text =
        decode_xml(bytes).map_err(|reason| Error::parse(path.display().to_string(), reason))?;
    parse_xml(&text)
}

/// UTF-8 as is, otherwise Latin-1 when the XML declaration names it.
fn decode_xml(bytes: Vec<u8>) -> std::result::Result<String, String> {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => return Ok(text),
        Err(e) => e.into_bytes(),
    };
    match declared_encoding(&bytes) {
        Some(enc) if is_latin1(&enc) => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        Some(enc) => Err(format!("unsupported encoding '{}'", enc)),
        None => Err("not valid UTF-8 and no encoding declared".to_string()),
    }
}

fn declared_encoding(bytes: &[u8]) -> Option<String> {
    if !bytes.starts_with(b"<?xml") {
        return None;
    }
    let end = bytes.windows(2).position(|w| w == b"?>")?;
    let decl = String::from_utf8_lossy(&bytes[..end]);
    let rest = &decl[decl.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let value = &rest[1..];
    Some(value[..value.find(quote)?].to_string())
}

fn is_latin1(encoding: &str) -> bool {
    matches!(
        encoding.to_ascii_lowercase().as_str(),
        "iso-8859-1" | "iso8859-1" | "latin-1" | "latin1" | "l1"
    )
}

/// Parse imglab XML text into a landmark set.
pub fn parse_xml(text: &str) -> Result<LandmarkSet> {
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    let doc = Document::parse_with_options(text, options)?;

    let mut set = LandmarkSet::new();
    for (i, image) in doc
        .descendants()
        .filter(|n| n.has_tag_name("image"))
        .enumerate()
    {
        let file = image
            .attribute("file")
            .ok_or_else(|| Error::parse(format!("image #{}", i), "missing 'file' attribute"))?;

        let mut landmarks = ImageLandmarks::new();
        for part in image.descendants().filter(|n| n.has_tag_name("part")) {
            let (index, point) = parse_part(file, &part)?;
            if landmarks.insert(index, point).is_some() {
                tracing::debug!(image = file, index, "duplicate part, keeping the last one");
            }
        }
        set.insert(file, landmarks);
    }

    tracing::info!(images = set.len(), points = set.num_points(), "parsed imglab XML");
    Ok(set)
}

fn parse_part(file: &str, part: &Node) -> Result<(u32, Point)> {
    let name = part.attribute("name").unwrap_or("");
    let record = || format!("image '{}' part '{}'", file, name);

    let index: u32 = name
        .trim()
        .parse()
        .map_err(|_| Error::parse(record(), "part name is not a non-negative integer"))?;

    let coord = |attr: &str| -> Result<f64> {
        let raw = part
            .attribute(attr)
            .ok_or_else(|| Error::parse(record(), format!("missing '{}' attribute", attr)))?;
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::parse(record(), format!("'{}' is not a number: {:?}", attr, raw)))?;
        if !value.is_finite() {
            return Err(Error::parse(record(), format!("'{}' is not finite", attr)));
        }
        Ok(value)
    };

    Ok((index, Point::new(coord("x")?, coord("y")?)))
}

/// Render a landmark set as imglab XML.
///
/// Each image gets a single box enclosing all of its points, which is what
/// the shape predictor trainer expects. Coordinates are rounded to whole
/// pixels.
pub fn to_xml(set: &LandmarkSet, name: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version='1.0' encoding='UTF-8'?>\n");
    out.push_str("<?xml-stylesheet type='text/xsl' href='image_metadata_stylesheet.xsl'?>\n");
    out.push_str("<dataset>\n");
    let _ = writeln!(out, "<name>{}</name>", escape(name));
    out.push_str("<images>\n");

    for (file, landmarks) in set.iter() {
        let _ = writeln!(out, "  <image file='{}'>", escape(file));
        if let Some((left, top, right, bottom)) = bounds(landmarks) {
            let _ = writeln!(
                out,
                "    <box top='{}' left='{}' width='{}' height='{}'>",
                top,
                left,
                right - left + 1,
                bottom - top + 1
            );
            for (index, p) in landmarks {
                let _ = writeln!(
                    out,
                    "      <part name='{}' x='{}' y='{}'/>",
                    index,
                    p.x.round() as i64,
                    p.y.round() as i64
                );
            }
            out.push_str("    </box>\n");
        }
        out.push_str("  </image>\n");
    }

    out.push_str("</images>\n");
    out.push_str("</dataset>\n");
    out
}

/// Write a landmark set to an imglab XML file.
pub fn write_xml<P: AsRef<Path>>(set: &LandmarkSet, name: &str, path: P) -> Result<()> {
    fs::write(path, to_xml(set, name))?;
    Ok(())
}

fn bounds(landmarks: &ImageLandmarks) -> Option<(i64, i64, i64, i64)> {
    let mut points = landmarks.values();
    let first = points.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((
        min_x.floor() as i64,
        min_y.floor() as i64,
        max_x.ceil() as i64,
        max_y.ceil() as i64,
    ))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
