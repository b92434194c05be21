//! Color sampling and naming
//!
//! Skin and hair colors are estimated by averaging a small pixel window and
//! mapping the mean to a coarse name. The rules are evaluated top to bottom and
//! the first match wins, so a triple that satisfies several rules always gets
//! the earliest one.

use std::fmt;

use image::{Rgb, RgbImage};

use crate::face::FaceBox;

/// Side of the square skin sampling window.
const SKIN_WINDOW: u32 = 40;
/// Height of the band sampled above the face for hair.
const HAIR_BAND: u32 = 30;

/// Coarse color label for a mean RGB sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorName {
    Black,
    White,
    Blonde,
    Red,
    Brown,
    DarkBrown,
    Gray,
    /// No rule matched; displayed as `rgb(r,g,b)`.
    Other(Rgb<u8>),
}

impl ColorName {
    pub fn from_rgb(rgb: Rgb<u8>) -> Self {
        let Rgb([r, g, b]) = rgb;
        if r < 60 && g < 60 && b < 60 {
            return ColorName::Black;
        }
        if r > 200 && g > 200 && b > 200 {
            return ColorName::White;
        }
        if r > 150 && g > 100 && b < 80 {
            return ColorName::Blonde;
        }
        if r > 100 && g < 80 && b < 80 {
            return ColorName::Red;
        }
        if r > 80 && g > 60 && b > 40 {
            return ColorName::Brown;
        }
        if r < 120 && g < 120 && b < 120 {
            return ColorName::DarkBrown;
        }
        if b > r && b > g {
            return ColorName::Gray;
        }
        ColorName::Other(rgb)
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorName::Black => f.write_str("black"),
            ColorName::White => f.write_str("white"),
            ColorName::Blonde => f.write_str("blonde"),
            ColorName::Red => f.write_str("red"),
            ColorName::Brown => f.write_str("brown"),
            ColorName::DarkBrown => f.write_str("dark brown"),
            ColorName::Gray => f.write_str("gray"),
            ColorName::Other(Rgb([r, g, b])) => write!(f, "rgb({},{},{})", r, g, b),
        }
    }
}

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Region {
    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.x1 - self.x0) as u64 * (self.y1 - self.y0) as u64
        }
    }

    fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.min(width),
            y0: self.y0.min(height),
            x1: self.x1.min(width),
            y1: self.y1.min(height),
        }
    }
}

/// Window centered on the face, clipped to the face box and the image
pub fn skin_region(face: &FaceBox, width: u32, height: u32) -> Region {
    let half = SKIN_WINDOW / 2;
    let cx = face.width / 2;
    let cy = face.height / 2;

    Region {
        x0: face.x + cx.saturating_sub(half),
        y0: face.y + cy.saturating_sub(half),
        x1: face.x + (cx + half).min(face.width),
        y1: face.y + (cy + half).min(face.height),
    }
    .clamp_to(width, height)
}

/// Band directly above the face covering its middle half horizontally.
///
/// Empty when the face touches the top edge of the image.
pub fn hair_region(face: &FaceBox, width: u32, height: u32) -> Region {
    Region {
        x0: face.x + face.width / 4,
        y0: face.y.saturating_sub(HAIR_BAND),
        x1: face.x + 3 * face.width / 4,
        y1: face.y,
    }
    .clamp_to(width, height)
}

/// Per-channel mean of a region, truncated toward zero
pub fn mean_rgb(img: &RgbImage, region: Region) -> Option<Rgb<u8>> {
    let region = region.clamp_to(img.width(), img.height());
    if region.is_empty() {
        return None;
    }

    let mut sums = [0u64; 3];
    for y in region.y0..region.y1 {
        for x in region.x0..region.x1 {
            let Rgb(px) = img.get_pixel(x, y);
            for c in 0..3 {
                sums[c] += px[c] as u64;
            }
        }
    }

    let n = region.area();
    Some(Rgb([
        (sums[0] / n) as u8,
        (sums[1] / n) as u8,
        (sums[2] / n) as u8,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(r: u8, g: u8, b: u8) -> String {
        ColorName::from_rgb(Rgb([r, g, b])).to_string()
    }

    #[test]
    fn test_known_labels() {
        assert_eq!(name(30, 30, 30), "black");
        assert_eq!(name(210, 215, 220), "white");
        assert_eq!(name(10, 10, 200), "gray");
        assert_eq!(name(250, 100, 10), "rgb(250,100,10)");
        assert_eq!(name(200, 160, 50), "blonde");
        assert_eq!(name(160, 40, 40), "red");
        assert_eq!(name(140, 100, 70), "brown");
        assert_eq!(name(100, 70, 30), "dark brown");
    }

    #[test]
    fn test_first_rule_wins() {
        // Dark cube overlaps the "dark brown" bounds
        for r in 0..60u8 {
            for g in 0..60u8 {
                for b in 0..60u8 {
                    let c = ColorName::from_rgb(Rgb([r, g, b]));
                    assert_eq!(c, ColorName::Black, "rgb({},{},{})", r, g, b);
                }
            }
        }
        // Satisfies both blonde and brown bounds
        assert_eq!(name(180, 120, 60), "blonde");
        // Satisfies both red and dark brown bounds
        assert_eq!(name(110, 50, 50), "red");
        // Bright red never reaches the fallback
        assert_eq!(name(250, 10, 10), "red");
    }

    #[test]
    fn test_total_over_rgb_cube() {
        for r in 0..=255u8 {
            for g in 0..=255u8 {
                for b in 0..=255u8 {
                    // The fallback carries the sampled color itself
                    if let ColorName::Other(c) = ColorName::from_rgb(Rgb([r, g, b])) {
                        assert_eq!(c, Rgb([r, g, b]));
                    }
                }
            }
        }
    }

    #[test]
    fn test_skin_region_centered() {
        let face = FaceBox::new(100, 50, 120, 120);
        let r = skin_region(&face, 600, 400);
        assert_eq!(r, Region { x0: 140, y0: 90, x1: 180, y1: 130 });
        assert_eq!(r.area(), 1600);
    }

    #[test]
    fn test_skin_region_small_face_clamps_to_box() {
        let face = FaceBox::new(10, 10, 24, 24);
        let r = skin_region(&face, 100, 100);
        assert_eq!(r, Region { x0: 10, y0: 10, x1: 34, y1: 34 });
    }

    #[test]
    fn test_hair_region() {
        let face = FaceBox::new(100, 50, 120, 120);
        let r = hair_region(&face, 600, 400);
        assert_eq!(r, Region { x0: 130, y0: 20, x1: 190, y1: 50 });

        let near_top = FaceBox::new(100, 10, 120, 120);
        assert_eq!(hair_region(&near_top, 600, 400).y0, 0);
    }

    #[test]
    fn test_hair_region_empty_at_top_edge() {
        let face = FaceBox::new(100, 0, 120, 120);
        let r = hair_region(&face, 600, 400);
        assert!(r.is_empty());

        let img = RgbImage::from_pixel(600, 400, Rgb([1, 2, 3]));
        assert_eq!(mean_rgb(&img, r), None);
    }

    #[test]
    fn test_mean_truncates() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([11, 21, 32]));
        let region = Region { x0: 0, y0: 0, x1: 2, y1: 1 };
        assert_eq!(mean_rgb(&img, region), Some(Rgb([10, 20, 31])));
    }
}
