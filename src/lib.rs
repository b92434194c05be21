pub mod config;
pub mod error;
pub mod profile;
pub mod server;

// Re-export vision types for convenience
pub use faceprofile_vision::{Analyzer, FaceAnalysis, ModelPaths};
pub use profile::{Profile, VerificationResult};
pub use server::{create_router, AppState};
