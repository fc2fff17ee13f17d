use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// A 2D point in pixel (or, after scaling, physical) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (*self - *other).norm()
    }

    /// Euclidean length of the point taken as a vector from the origin.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Direction of the vector in degrees, in `(-180, 180]`.
    pub fn angle_degrees(&self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// Landmarks of a single image, keyed by landmark index.
///
/// Iteration is always in ascending index order.
pub type ImageLandmarks = BTreeMap<u32, Point>;

/// Landmark coordinates for a collection of images.
///
/// Images keep the order in which they were first inserted. Inserting an
/// identifier that already exists replaces its landmarks in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    images: Vec<(String, ImageLandmarks)>,
    index: HashMap<String, usize>,
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the landmarks of `image`.
    pub fn insert(&mut self, image: impl Into<String>, landmarks: ImageLandmarks) {
        let image = image.into();
        match self.index.get(&image) {
            Some(&pos) => self.images[pos].1 = landmarks,
            None => {
                self.index.insert(image.clone(), self.images.len());
                self.images.push((image, landmarks));
            }
        }
    }

    pub fn get(&self, image: &str) -> Option<&ImageLandmarks> {
        self.index.get(image).map(|&pos| &self.images[pos].1)
    }

    pub fn contains(&self, image: &str) -> bool {
        self.index.contains_key(image)
    }

    /// Image at position `n` in insertion order.
    pub fn nth(&self, n: usize) -> Option<(&str, &ImageLandmarks)> {
        self.images.get(n).map(|(id, lm)| (id.as_str(), lm))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageLandmarks)> {
        self.images.iter().map(|(id, lm)| (id.as_str(), lm))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Total number of points across all images.
    pub fn num_points(&self) -> usize {
        self.images.iter().map(|(_, lm)| lm.len()).sum()
    }
}

impl FromIterator<(String, ImageLandmarks)> for LandmarkSet {
    fn from_iter<T: IntoIterator<Item = (String, ImageLandmarks)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (image, landmarks) in iter {
            set.insert(image, landmarks);
        }
        set
    }
}
