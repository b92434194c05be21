use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::attributes::{self, AgeBucket, Classifier, Gender, OnnxClassifier};
use crate::color::{self, ColorName};
use crate::face::{self, FaceBox, FaceDetector, HaarDetector};

/// Longest image side fed to the detector.
pub const MAX_DIM: u32 = 600;

pub const NO_FACE: &str = "No face detected.";

/// Model files loaded at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub cascade: PathBuf,
    pub age: PathBuf,
    pub gender: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            cascade: PathBuf::from("models/haarcascade_frontalface_default.xml"),
            age: PathBuf::from("models/age_net.onnx"),
            gender: PathBuf::from("models/gender_net.onnx"),
        }
    }
}

/// Everything derived from the analyzed face
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceAttributes {
    pub face: FaceBox,
    pub gender: Gender,
    pub age: AgeBucket,
    pub skin_tone: ColorName,
    /// `None` when there is no room above the face to sample.
    pub hair_color: Option<ColorName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceAnalysis {
    pub description: String,
    pub attributes: Option<FaceAttributes>,
}

impl FaceAnalysis {
    pub fn no_face() -> Self {
        Self {
            description: NO_FACE.to_string(),
            attributes: None,
        }
    }

    fn found(attrs: FaceAttributes) -> Self {
        let hair = attrs
            .hair_color
            .map(|c| c.to_string())
            .unwrap_or_else(|| "None".to_string());
        let description = format!(
            "Face @({},{}), size={}×{}; Gender: {}; Age: {}; Skin tone: {}; Hair color: {}.",
            attrs.face.x,
            attrs.face.y,
            attrs.face.width,
            attrs.face.height,
            attrs.gender,
            attrs.age,
            attrs.skin_tone,
            hair
        );
        Self {
            description,
            attributes: Some(attrs),
        }
    }
}

/// Full pipeline: downscale → detect → sample colors → classify
///
/// One instance serves any number of concurrent callers; only classifier
/// inference is serialized, per model.
pub struct Analyzer {
    detector: Box<dyn FaceDetector>,
    gender: Box<dyn Classifier>,
    age: Box<dyn Classifier>,
}

impl Analyzer {
    pub fn new(
        detector: impl FaceDetector + 'static,
        gender: impl Classifier + 'static,
        age: impl Classifier + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            gender: Box::new(gender),
            age: Box::new(age),
        }
    }

    pub fn load(paths: &ModelPaths) -> Result<Self> {
        let detector = HaarDetector::from_file(&paths.cascade).context("loading face detector")?;
        let gender = OnnxClassifier::load(&paths.gender).context("loading gender classifier")?;
        let age = OnnxClassifier::load(&paths.age).context("loading age classifier")?;
        Ok(Self::new(detector, gender, age))
    }

    pub fn analyze(&self, img: &DynamicImage) -> Result<FaceAnalysis> {
        let rgb = downscale(img);
        let (width, height) = rgb.dimensions();
        let gray = face::to_gray(&rgb);

        let faces = self.detector.detect(&gray).context("detecting faces")?;
        let Some(face) = faces.iter().find_map(|f| f.clamp_to(width, height)) else {
            log::debug!("no face in {}x{} image", width, height);
            return Ok(FaceAnalysis::no_face());
        };
        if faces.len() > 1 {
            log::debug!("{} faces detected, analyzing the first", faces.len());
        }

        let skin = color::mean_rgb(&rgb, color::skin_region(&face, width, height))
            .context("empty skin sample")?;
        let skin_tone = ColorName::from_rgb(skin);
        let hair_color = color::mean_rgb(&rgb, color::hair_region(&face, width, height))
            .map(ColorName::from_rgb);

        let blob = attributes::face_blob(&rgb, &face);

        let scores = self.gender.scores(&blob).context("running gender classifier")?;
        let gender = Gender::from_scores(&scores).with_context(|| {
            format!(
                "gender classifier returned {} scores, expected {}",
                scores.len(),
                Gender::ALL.len()
            )
        })?;

        let scores = self.age.scores(&blob).context("running age classifier")?;
        let age = AgeBucket::from_scores(&scores).with_context(|| {
            format!(
                "age classifier returned {} scores, expected {}",
                scores.len(),
                AgeBucket::ALL.len()
            )
        })?;

        Ok(FaceAnalysis::found(FaceAttributes {
            face,
            gender,
            age,
            skin_tone,
            hair_color,
        }))
    }
}

/// Convert to RGB and shrink so the longest side is at most [`MAX_DIM`]
pub fn downscale(img: &DynamicImage) -> RgbImage {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let longest = w.max(h);
    if longest <= MAX_DIM {
        return rgb;
    }

    let scale = MAX_DIM as f64 / longest as f64;
    let shrink = |side: u32| {
        if side == longest {
            MAX_DIM
        } else {
            ((side as f64 * scale) as u32).max(1)
        }
    };
    image::imageops::resize(&rgb, shrink(w), shrink(h), FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_keeps_small_images() {
        let img = DynamicImage::new_rgb8(600, 300);
        assert_eq!(downscale(&img).dimensions(), (600, 300));
    }

    #[test]
    fn test_downscale_preserves_aspect() {
        let img = DynamicImage::new_rgb8(1200, 800);
        assert_eq!(downscale(&img).dimensions(), (600, 400));

        let tall = DynamicImage::new_rgb8(500, 1000);
        assert_eq!(downscale(&tall).dimensions(), (300, 600));

        let odd = DynamicImage::new_rgb8(601, 7);
        assert_eq!(downscale(&odd).dimensions(), (600, 6));
    }

    #[test]
    fn test_downscale_converts_to_rgb() {
        let img = DynamicImage::new_luma8(10, 10);
        let rgb = downscale(&img);
        assert_eq!(rgb.dimensions(), (10, 10));
    }

    #[test]
    fn test_no_face_description() {
        let a = FaceAnalysis::no_face();
        assert_eq!(a.description, "No face detected.");
        assert!(a.attributes.is_none());
    }
}
