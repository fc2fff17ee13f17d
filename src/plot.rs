//! Per-landmark accuracy figures.
//!
//! Each figure has three panels side by side:
//! - kernel density of the scaled offsets as a heat map, with every sample
//!   drawn on top, outliers enlarged, and the origin marked;
//! - histogram of scaled error magnitudes;
//! - rose diagram of offset directions (0° points right, angles grow
//!   counter-clockwise).

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use crate::analysis::LandmarkDistribution;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::stats::{DensityGrid, Histogram};

pub const FIGURE_SIZE: (u32, u32) = (1500, 500);
const MARGIN: i32 = 20;

const SAMPLE_COLOR: RGBColor = RGBColor(220, 30, 30);
const OUTLIER_COLOR: RGBColor = RGBColor(255, 140, 0);
const ORIGIN_COLOR: RGBColor = RGBColor(31, 119, 180);
const BAR_COLOR: RGBColor = RGBColor(70, 130, 180);
const AXIS_COLOR: RGBColor = RGBColor(160, 160, 160);

fn plot_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Plot(e.to_string())
}

/// Viridis colormap, linearly interpolated between five anchors.
fn viridis(t: f64) -> RGBColor {
    const STOPS: [(u8, u8, u8); 5] = [
        (68, 1, 84),
        (59, 82, 139),
        (33, 145, 140),
        (94, 201, 98),
        (253, 231, 37),
    ];
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (STOPS.len() - 1) as f64;
    let i = (pos.floor() as usize).min(STOPS.len() - 2);
    let f = pos - i as f64;
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    let (a, b) = (STOPS[i], STOPS[i + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// Maps a data rectangle onto a panel's pixel rectangle, y pointing up.
struct Frame {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    width: i32,
    height: i32,
}

impl Frame {
    fn new(area: &DrawingArea<BitMapBackend, Shift>, x: (f64, f64), y: (f64, f64)) -> Self {
        let (w, h) = area.dim_in_pixel();
        Self {
            x0: x.0,
            x1: x.1,
            y0: y.0,
            y1: y.1,
            width: w as i32,
            height: h as i32,
        }
    }

    fn to_pixel(&self, x: f64, y: f64) -> (i32, i32) {
        let inner_w = (self.width - 2 * MARGIN) as f64;
        let inner_h = (self.height - 2 * MARGIN) as f64;
        let fx = if self.x1 > self.x0 {
            (x - self.x0) / (self.x1 - self.x0)
        } else {
            0.5
        };
        let fy = if self.y1 > self.y0 {
            (y - self.y0) / (self.y1 - self.y0)
        } else {
            0.5
        };
        (
            MARGIN + (fx * inner_w).round() as i32,
            self.height - MARGIN - (fy * inner_h).round() as i32,
        )
    }
}

fn draw_density_panel(
    area: &DrawingArea<BitMapBackend, Shift>,
    dist: &LandmarkDistribution,
    density: &DensityGrid,
    outliers: &[usize],
) -> Result<()> {
    let (Some(&x0), Some(&x1)) = (density.xs.first(), density.xs.last()) else {
        return Ok(());
    };
    let (Some(&y0), Some(&y1)) = (density.ys.first(), density.ys.last()) else {
        return Ok(());
    };
    let frame = Frame::new(area, (x0, x1), (y0, y1));
    let peak = density.max_value();

    let nx = density.xs.len();
    let ny = density.ys.len();
    let half_dx = if nx > 1 { (x1 - x0) / (nx - 1) as f64 / 2.0 } else { 0.5 };
    let half_dy = if ny > 1 { (y1 - y0) / (ny - 1) as f64 / 2.0 } else { 0.5 };
    for (i, &x) in density.xs.iter().enumerate() {
        for (j, &y) in density.ys.iter().enumerate() {
            let color = viridis(density.values[i][j] / peak);
            let a = frame.to_pixel((x - half_dx).max(x0), (y + half_dy).min(y1));
            let b = frame.to_pixel((x + half_dx).min(x1), (y - half_dy).max(y0));
            area.draw(&Rectangle::new([a, b], color.filled()))
                .map_err(plot_err)?;
        }
    }

    let origin = frame.to_pixel(0.0, 0.0);
    area.draw(&Circle::new(origin, 5, ORIGIN_COLOR.filled()))
        .map_err(plot_err)?;

    for (i, p) in dist.offsets.iter().enumerate() {
        let pos = frame.to_pixel(p.x, p.y);
        if outliers.contains(&i) {
            area.draw(&Circle::new(pos, 5, OUTLIER_COLOR.stroke_width(2)))
                .map_err(plot_err)?;
        }
        area.draw(&Circle::new(pos, 2, SAMPLE_COLOR.filled()))
            .map_err(plot_err)?;
    }

    Ok(())
}

fn draw_histogram_panel(area: &DrawingArea<BitMapBackend, Shift>, hist: &Histogram) -> Result<()> {
    let (Some(&lo), Some(&hi)) = (hist.edges.first(), hist.edges.last()) else {
        return Ok(());
    };
    let peak = hist.max_count().max(1) as f64;
    let frame = Frame::new(area, (lo, hi), (0.0, peak));

    for (i, &count) in hist.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let a = frame.to_pixel(hist.edges[i], count as f64);
        let b = frame.to_pixel(hist.edges[i + 1], 0.0);
        area.draw(&Rectangle::new([a, b], BAR_COLOR.filled()))
            .map_err(plot_err)?;
        area.draw(&Rectangle::new([a, b], BLACK.stroke_width(1)))
            .map_err(plot_err)?;
    }

    let left = frame.to_pixel(lo, 0.0);
    let right = frame.to_pixel(hi, 0.0);
    area.draw(&PathElement::new(vec![left, right], BLACK))
        .map_err(plot_err)?;
    Ok(())
}

fn draw_rose_panel(area: &DrawingArea<BitMapBackend, Shift>, hist: &Histogram) -> Result<()> {
    let (w, h) = area.dim_in_pixel();
    let center = (w as i32 / 2, h as i32 / 2);
    let r_max = ((w.min(h) as i32) / 2 - MARGIN).max(1) as f64;
    let peak = hist.max_count().max(1) as f64;

    let at = |radius: f64, degrees: f64| -> (i32, i32) {
        let t = degrees.to_radians();
        (
            center.0 + (radius * t.cos()).round() as i32,
            center.1 - (radius * t.sin()).round() as i32,
        )
    };

    area.draw(&Circle::new(center, r_max as i32, AXIS_COLOR.stroke_width(1)))
        .map_err(plot_err)?;
    area.draw(&PathElement::new(vec![at(r_max, 180.0), at(r_max, 0.0)], AXIS_COLOR))
        .map_err(plot_err)?;
    area.draw(&PathElement::new(vec![at(r_max, 270.0), at(r_max, 90.0)], AXIS_COLOR))
        .map_err(plot_err)?;

    for (i, &count) in hist.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let radius = r_max * count as f64 / peak;
        let (start, end) = (hist.edges[i], hist.edges[i + 1]);
        let steps = ((end - start).abs().ceil() as usize).max(2);

        let mut sector = vec![center];
        for s in 0..=steps {
            let deg = start + (end - start) * s as f64 / steps as f64;
            sector.push(at(radius, deg));
        }
        area.draw(&Polygon::new(sector.clone(), BAR_COLOR.filled()))
            .map_err(plot_err)?;
        sector.push(center);
        area.draw(&PathElement::new(sector, BLACK))
            .map_err(plot_err)?;
    }

    Ok(())
}

/// Render one landmark's figure to a PNG file.
///
/// Fails with [`Error::SingularDensity`] when the offsets do not span two
/// dimensions (fewer than three images, or all offsets on one line).
pub fn render_landmark_figure<P: AsRef<Path>>(
    dist: &LandmarkDistribution,
    config: &AnalysisConfig,
    path: P,
) -> Result<()> {
    let density = dist.density(config.density_grid)?;
    let magnitudes = dist
        .magnitude_histogram(config.histogram_bins)
        .ok_or_else(|| Error::Plot("no samples to plot".to_string()))?;
    let angles = dist
        .angle_histogram(config.histogram_bins)
        .ok_or_else(|| Error::Plot("no samples to plot".to_string()))?;
    let outliers = dist.outliers(config.outlier_threshold);

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let panels = root.split_evenly((1, 3));
    draw_density_panel(&panels[0], dist, &density, &outliers)?;
    draw_histogram_panel(&panels[1], &magnitudes)?;
    draw_rose_panel(&panels[2], &angles)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
