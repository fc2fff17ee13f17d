//! Summary statistics and density estimation over landmark errors.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::Point;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// `n` evenly spaced samples from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Equal-width histogram. `edges` has one more entry than `counts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub counts: Vec<usize>,
    pub edges: Vec<f64>,
}

impl Histogram {
    /// Bin `values` into `bins` equal-width bins spanning their range.
    ///
    /// All bins are half-open except the last, which includes the maximum.
    /// A zero-width range is widened to `[v - 0.5, v + 0.5]`. Returns `None`
    /// for empty input or zero bins.
    pub fn new(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }
        let (mut lo, mut hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        let edges = linspace(lo, hi, bins + 1);
        let mut counts = vec![0usize; bins];
        let norm = bins as f64 / (hi - lo);
        for &v in values {
            let mut idx = (((v - lo) * norm) as usize).min(bins - 1);
            if v < edges[idx] {
                idx = idx.saturating_sub(1);
            } else if idx + 1 < bins && v >= edges[idx + 1] {
                idx += 1;
            }
            counts[idx] += 1;
        }

        Some(Self { counts, edges })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn max_count(&self) -> usize {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// Bivariate Gaussian kernel density estimate with Scott's bandwidth rule.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    points: Vec<Point>,
    inv_cov: [[f64; 2]; 2],
    norm: f64,
}

impl GaussianKde {
    pub fn new(points: &[Point]) -> Result<Self> {
        let n = points.len();
        if n < 2 {
            return Err(Error::SingularDensity(format!(
                "need at least 2 points, got {}",
                n
            )));
        }

        let nf = n as f64;
        let mx = points.iter().map(|p| p.x).sum::<f64>() / nf;
        let my = points.iter().map(|p| p.y).sum::<f64>() / nf;
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for p in points {
            let (dx, dy) = (p.x - mx, p.y - my);
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }

        // Scott's factor for two dimensions: n^(-1/(d+4)).
        let factor = nf.powf(-1.0 / 6.0);
        let scale = factor * factor / (nf - 1.0);
        let (cxx, cyy, cxy) = (sxx * scale, syy * scale, sxy * scale);

        let det = cxx * cyy - cxy * cxy;
        if !(det > 1e-12 * cxx * cyy) {
            return Err(Error::SingularDensity(
                "points are collinear or coincident".to_string(),
            ));
        }

        Ok(Self {
            points: points.to_vec(),
            inv_cov: [[cyy / det, -cxy / det], [-cxy / det, cxx / det]],
            norm: 1.0 / (nf * 2.0 * std::f64::consts::PI * det.sqrt()),
        })
    }

    pub fn evaluate(&self, at: Point) -> f64 {
        let [[a, b], [_, d]] = self.inv_cov;
        let sum: f64 = self
            .points
            .iter()
            .map(|p| {
                let (dx, dy) = (at.x - p.x, at.y - p.y);
                (-0.5 * (a * dx * dx + 2.0 * b * dx * dy + d * dy * dy)).exp()
            })
            .sum();
        sum * self.norm
    }

    /// Evaluate on a `resolution` × `resolution` grid spanning the data's
    /// bounding box padded by `margin` on every side.
    pub fn grid(&self, resolution: usize, margin: f64) -> DensityGrid {
        let (min_x, max_x) = min_max(self.points.iter().map(|p| p.x));
        let (min_y, max_y) = min_max(self.points.iter().map(|p| p.y));
        let xs = linspace(min_x - margin, max_x + margin, resolution);
        let ys = linspace(min_y - margin, max_y + margin, resolution);
        let values = xs
            .iter()
            .map(|&x| ys.iter().map(|&y| self.evaluate(Point::new(x, y))).collect())
            .collect();
        DensityGrid { xs, ys, values }
    }
}

/// Density sampled on a rectangular grid; `values[i][j]` is the density at
/// `(xs[i], ys[j])`.
#[derive(Debug, Clone, Serialize)]
pub struct DensityGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl DensityGrid {
    pub fn max_value(&self) -> f64 {
        self.values
            .iter()
            .flatten()
            .copied()
            .fold(0.0, f64::max)
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_population_std() {
        assert_eq!(mean(&[3.0, 4.0]), Some(3.5));
        assert!((population_std(&[3.0, 4.0]).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(mean(&[]), None);
        assert_eq!(population_std(&[]), None);
    }

    #[test]
    fn linspace_includes_endpoints() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn histogram_bins_like_numpy() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 10.0];
        let h = Histogram::new(&values, 10).unwrap();
        assert_eq!(h.edges.len(), 11);
        assert_eq!(h.edges[0], 0.0);
        assert_eq!(h.edges[10], 10.0);
        assert_eq!(h.counts, vec![1, 1, 1, 1, 1, 0, 0, 0, 0, 1]);
        assert_eq!(h.total(), values.len());

        let flat = Histogram::new(&[2.0, 2.0], 4).unwrap();
        assert_eq!(flat.edges, vec![1.5, 1.75, 2.0, 2.25, 2.5]);
        assert_eq!(flat.counts, vec![0, 0, 2, 0]);

        assert!(Histogram::new(&[], 10).is_none());
    }

    #[test]
    fn kde_integrates_to_one() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(0.8, 0.9),
        ];
        let kde = GaussianKde::new(&points).unwrap();

        let step = 0.05;
        let axis = linspace(-10.0, 10.0, 401);
        let mut total = 0.0;
        for &x in &axis {
            for &y in &axis {
                total += kde.evaluate(Point::new(x, y)) * step * step;
            }
        }
        assert!((total - 1.0).abs() < 1e-3, "integral was {}", total);
    }

    #[test]
    fn kde_grid_spans_padded_bounds() {
        let points = [Point::new(0.0, 0.0), Point::new(2.0, 1.0), Point::new(1.0, 3.0)];
        let kde = GaussianKde::new(&points).unwrap();
        let grid = kde.grid(100, 1.0);
        assert_eq!(grid.xs.len(), 100);
        assert_eq!(grid.values.len(), 100);
        assert_eq!(grid.values[0].len(), 100);
        assert_eq!(grid.xs[0], -1.0);
        assert_eq!(grid.xs[99], 3.0);
        assert_eq!(grid.ys[0], -1.0);
        assert_eq!(grid.ys[99], 4.0);
        assert!(grid.max_value() > 0.0);
    }

    #[test]
    fn kde_rejects_degenerate_input() {
        assert!(matches!(
            GaussianKde::new(&[Point::new(1.0, 1.0)]),
            Err(Error::SingularDensity(_))
        ));
        let collinear = [Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)];
        assert!(matches!(
            GaussianKde::new(&collinear),
            Err(Error::SingularDensity(_))
        ));
    }
}
