//! Age and gender classification
//!
//! Both networks take the same input: the face crop resized to 227x227, laid
//! out as NCHW in BGR order with the training-set channel means subtracted.
//! Each returns one score per label and the label with the highest score wins.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::face::FaceBox;

/// Side of the square classifier input.
pub const INPUT_SIZE: u32 = 227;

/// Per-channel means in B, G, R order.
pub const MEAN_BGR: [f32; 3] = [78.426_34, 87.768_91, 114.895_85];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    Age0To2,
    Age4To6,
    Age8To12,
    Age15To20,
    Age25To32,
    Age38To43,
    Age48To53,
    Age60To100,
}

impl AgeBucket {
    /// In classifier output order
    pub const ALL: [AgeBucket; 8] = [
        AgeBucket::Age0To2,
        AgeBucket::Age4To6,
        AgeBucket::Age8To12,
        AgeBucket::Age15To20,
        AgeBucket::Age25To32,
        AgeBucket::Age38To43,
        AgeBucket::Age48To53,
        AgeBucket::Age60To100,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AgeBucket::Age0To2 => "(0-2)",
            AgeBucket::Age4To6 => "(4-6)",
            AgeBucket::Age8To12 => "(8-12)",
            AgeBucket::Age15To20 => "(15-20)",
            AgeBucket::Age25To32 => "(25-32)",
            AgeBucket::Age38To43 => "(38-43)",
            AgeBucket::Age48To53 => "(48-53)",
            AgeBucket::Age60To100 => "(60-100)",
        }
    }

    /// `None` unless there is exactly one score per bucket
    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        if scores.len() != Self::ALL.len() {
            return None;
        }
        argmax(scores).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }

    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        if scores.len() != Self::ALL.len() {
            return None;
        }
        argmax(scores).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Index of the highest score; the lowest index wins ties
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if !(s > b) => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// Build the classifier input tensor for a face.
///
/// The box must lie inside the image.
pub fn face_blob(img: &RgbImage, face: &FaceBox) -> Array4<f32> {
    let crop = image::imageops::crop_imm(img, face.x, face.y, face.width, face.height).to_image();
    let resized = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut blob = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        let [r, g, b] = px.0;
        let (x, y) = (x as usize, y as usize);
        blob[[0, 0, y, x]] = b as f32 - MEAN_BGR[0];
        blob[[0, 1, y, x]] = g as f32 - MEAN_BGR[1];
        blob[[0, 2, y, x]] = r as f32 - MEAN_BGR[2];
    }
    blob
}

/// A network mapping a face blob to one score per label
pub trait Classifier: Send + Sync {
    fn scores(&self, blob: &Array4<f32>) -> Result<Vec<f32>>;
}

/// Classifier backed by an ONNX Runtime session.
///
/// Running a session needs exclusive access, so concurrent requests take
/// turns on the lock.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(crate::model::classifier_session(path)?))
    }
}

impl Classifier for OnnxClassifier {
    fn scores(&self, blob: &Array4<f32>) -> Result<Vec<f32>> {
        let input = Value::from_array(blob.clone())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("classifier session lock poisoned"))?;
        let outputs = session.run(ort::inputs![input])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_argmax_ties_pick_lowest() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_age_from_scores() {
        let mut scores = [0.0f32; 8];
        scores[4] = 0.9;
        assert_eq!(AgeBucket::from_scores(&scores), Some(AgeBucket::Age25To32));
        assert_eq!(AgeBucket::Age25To32.to_string(), "(25-32)");
        assert_eq!(AgeBucket::from_scores(&scores[..7]), None);
        assert_eq!(AgeBucket::from_scores(&[0.1; 9]), None);
    }

    #[test]
    fn test_gender_from_scores() {
        assert_eq!(Gender::from_scores(&[0.2, 0.8]), Some(Gender::Female));
        assert_eq!(Gender::from_scores(&[0.8, 0.2]), Some(Gender::Male));
        assert_eq!(Gender::from_scores(&[0.3, 0.3, 0.4]), None);
        assert_eq!(Gender::Female.to_string(), "Female");
    }

    #[test]
    fn test_labels_in_order() {
        let labels: Vec<&str> = AgeBucket::ALL.iter().map(|a| a.label()).collect();
        assert_eq!(
            labels,
            ["(0-2)", "(4-6)", "(8-12)", "(15-20)", "(25-32)", "(38-43)", "(48-53)", "(60-100)"]
        );
    }

    #[test]
    fn test_blob_is_bgr_mean_subtracted() {
        let img = RgbImage::from_pixel(100, 80, Rgb([200, 100, 50]));
        let face = FaceBox::new(10, 10, 60, 60);
        let blob = face_blob(&img, &face);

        assert_eq!(blob.shape(), &[1, 3, 227, 227]);
        let eps = 1e-3;
        assert!((blob[[0, 0, 0, 0]] - (50.0 - MEAN_BGR[0])).abs() < eps);
        assert!((blob[[0, 1, 113, 113]] - (100.0 - MEAN_BGR[1])).abs() < eps);
        assert!((blob[[0, 2, 226, 226]] - (200.0 - MEAN_BGR[2])).abs() < eps);
    }
}
