use std::path::Path;

use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};

use crate::cascade::HaarCascade;

/// Detected face rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip the box to an image of the given size.
    ///
    /// Returns `None` if nothing of the box lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceBox::new(self.x, self.y, w, h))
    }
}

/// Pluggable face detection backend.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a grayscale image, in the order the backend reports them.
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>>;
}

/// Multi-scale scan parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    /// Ratio between consecutive pyramid levels, must be > 1.
    pub scale_factor: f64,
    /// Candidates a cluster needs beyond this count to be reported.
    pub min_neighbors: i32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.3,
            min_neighbors: 5,
        }
    }
}

/// Haar cascade detector with fixed scan parameters
pub struct HaarDetector {
    cascade: HaarCascade,
    params: DetectorParams,
}

impl HaarDetector {
    pub fn new(cascade: HaarCascade, params: DetectorParams) -> Result<Self> {
        if !(params.scale_factor > 1.0) {
            anyhow::bail!(
                "scale factor must be greater than 1, got {}",
                params.scale_factor
            );
        }
        Ok(Self { cascade, params })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(HaarCascade::from_file(path)?, DetectorParams::default())
    }
}

impl FaceDetector for HaarDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        Ok(self.cascade.detect_multi_scale(
            gray,
            self.params.scale_factor,
            self.params.min_neighbors,
        ))
    }
}

/// Convert RGB to 8-bit luma with BT.601 weights.
///
/// Fixed-point in 14 bits with rounding, so results match the usual
/// `0.299 R + 0.587 G + 0.114 B` conversion bit for bit.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    let mut gray = GrayImage::new(img.width(), img.height());
    for (src, dst) in img.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        let v = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        *dst = Luma([v as u8]);
    }
    gray
}

/// Integer rectangle used while clustering raw detections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta =
        eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.width - b.x - b.width).abs() as f64) <= delta
        && ((a.y + a.height - b.y - b.height).abs() as f64) <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Label each rectangle with its cluster, numbering clusters by first appearance
fn partition(rects: &[Rect], eps: f64) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; rects.len()];
    let mut labels = Vec::with_capacity(rects.len());
    let mut classes = 0;
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = classes;
            classes += 1;
        }
        labels.push(class_of_root[root]);
    }
    (labels, classes)
}

/// Merge overlapping raw detections into averaged boxes.
///
/// A cluster survives if it holds more than `group_threshold` candidates and
/// is not nested inside a stronger surviving cluster.
pub fn group_rectangles(rects: &[Rect], group_threshold: i32, eps: f64) -> Vec<Rect> {
    if group_threshold <= 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let (labels, classes) = partition(rects, eps);

    let mut sums = vec![[0i64; 4]; classes];
    let mut weights = vec![0i32; classes];
    for (rect, &label) in rects.iter().zip(labels.iter()) {
        let s = &mut sums[label];
        s[0] += rect.x as i64;
        s[1] += rect.y as i64;
        s[2] += rect.width as i64;
        s[3] += rect.height as i64;
        weights[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(weights.iter())
        .map(|(s, &n)| {
            let n = n as f64;
            Rect::new(
                (s[0] as f64 / n).round() as i32,
                (s[1] as f64 / n).round() as i32,
                (s[2] as f64 / n).round() as i32,
                (s[3] as f64 / n).round() as i32,
            )
        })
        .collect();

    let mut keep = Vec::new();
    for i in 0..classes {
        let r1 = averaged[i];
        let n1 = weights[i];
        if n1 <= group_threshold {
            continue;
        }

        let nested = (0..classes).any(|j| {
            let n2 = weights[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            keep.push(r1);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_gray_weights() {
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        img.put_pixel(3, 0, Rgb([255, 255, 255]));
        let gray = to_gray(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
        assert_eq!(gray.get_pixel(3, 0).0[0], 255);
    }

    #[test]
    fn test_clamp_box() {
        let b = FaceBox::new(90, 80, 20, 40);
        assert_eq!(b.clamp_to(100, 100), Some(FaceBox::new(90, 80, 10, 20)));
        assert_eq!(b.clamp_to(90, 100), None);
        assert_eq!(
            FaceBox::new(0, 0, 10, 10).clamp_to(100, 100),
            Some(FaceBox::new(0, 0, 10, 10))
        );
    }

    #[test]
    fn test_rejects_non_growing_scale() {
        let cascade = HaarCascade::always_pass(24, 24);
        let params = DetectorParams {
            scale_factor: 1.0,
            min_neighbors: 5,
        };
        assert!(HaarDetector::new(cascade, params).is_err());
    }

    #[test]
    fn test_group_averages_cluster() {
        let rects: Vec<Rect> = (0..6).map(|i| Rect::new(100 + i, 100 - i, 50, 50)).collect();
        let grouped = group_rectangles(&rects, 5, 0.2);
        assert_eq!(grouped, vec![Rect::new(103, 98, 50, 50)]);
    }

    #[test]
    fn test_group_drops_weak_clusters() {
        let mut rects: Vec<Rect> = (0..6).map(|_| Rect::new(10, 10, 40, 40)).collect();
        // Far away and too few
        rects.extend((0..3).map(|_| Rect::new(300, 300, 40, 40)));
        let grouped = group_rectangles(&rects, 5, 0.2);
        assert_eq!(grouped, vec![Rect::new(10, 10, 40, 40)]);
    }

    #[test]
    fn test_group_keeps_first_appearance_order() {
        let mut rects = Vec::new();
        rects.extend((0..6).map(|_| Rect::new(300, 300, 40, 40)));
        rects.extend((0..6).map(|_| Rect::new(10, 10, 40, 40)));
        let grouped = group_rectangles(&rects, 5, 0.2);
        assert_eq!(
            grouped,
            vec![Rect::new(300, 300, 40, 40), Rect::new(10, 10, 40, 40)]
        );
    }

    #[test]
    fn test_group_suppresses_nested() {
        let mut rects = Vec::new();
        rects.extend((0..20).map(|_| Rect::new(0, 0, 200, 200)));
        rects.extend((0..6).map(|_| Rect::new(50, 50, 40, 40)));
        let grouped = group_rectangles(&rects, 5, 0.2);
        assert_eq!(grouped, vec![Rect::new(0, 0, 200, 200)]);
    }

    #[test]
    fn test_group_disabled_returns_input() {
        let rects = vec![Rect::new(1, 2, 3, 4), Rect::new(1, 2, 3, 4)];
        assert_eq!(group_rectangles(&rects, 0, 0.2), rects);
    }
}
