pub mod attributes;
pub mod cascade;
pub mod color;
pub mod face;
pub mod model;
pub mod pipeline;

// Re-export commonly used types
pub use attributes::{AgeBucket, Classifier, Gender, OnnxClassifier};
pub use cascade::HaarCascade;
pub use color::ColorName;
pub use face::{DetectorParams, FaceBox, FaceDetector, HaarDetector};
pub use pipeline::{Analyzer, FaceAnalysis, FaceAttributes, ModelPaths};
