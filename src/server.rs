//! HTTP routes for creating and verifying profiles.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use faceprofile_vision::Analyzer;
use image::DynamicImage;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::profile::{self, Profile, VerificationResult};

/// Multipart field carrying the photo.
const FILE_FIELD: &str = "file";
/// Multipart field carrying the reference profile as JSON.
const PROFILE_FIELD: &str = "profile";

/// Shared application state.
///
/// The analyzer is loaded once before the server starts and only read after.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/create-profile", post(create_profile))
        .route("/verify-profile", post(verify_profile))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[derive(Default)]
struct Upload {
    file: Option<Bytes>,
    profile: Option<String>,
}

impl Upload {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut upload = Upload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some(FILE_FIELD) => {
                    upload.file = Some(field.bytes().await?);
                }
                Some(PROFILE_FIELD) => {
                    upload.profile = Some(field.text().await?);
                }
                other => log::debug!("ignoring multipart field {:?}", other),
            }
        }
        Ok(upload)
    }

    fn image(&self) -> ApiResult<DynamicImage> {
        let data = self
            .file
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("missing multipart field 'file'"))?;
        Ok(image::load_from_memory(data)?)
    }

    fn profile(&self) -> ApiResult<Profile> {
        let raw = self
            .profile
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("missing multipart field 'profile'"))?;
        Ok(serde_json::from_str(raw)?)
    }
}

/// Run CPU-bound analysis off the async workers
async fn run_blocking<T, F>(analyzer: Arc<Analyzer>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Analyzer) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&analyzer))
        .await
        .map_err(|e| ApiError::internal(format!("analysis task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// POST /create-profile
pub async fn create_profile(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Profile>> {
    let upload = Upload::read(multipart).await?;
    let img = upload.image()?;

    let profile = run_blocking(state.analyzer.clone(), move |analyzer| {
        profile::create_profile(analyzer, &img)
    })
    .await?;

    log::info!("created profile: {}", profile.description);
    Ok(Json(profile))
}

/// POST /verify-profile
pub async fn verify_profile(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<VerificationResult>> {
    let upload = Upload::read(multipart).await?;
    let reference = upload.profile()?;
    let img = upload.image()?;

    let result = run_blocking(state.analyzer.clone(), move |analyzer| {
        profile::verify_profile(analyzer, &img, &reference)
    })
    .await?;

    if result.is_match {
        log::info!("profile verified");
    } else {
        log::info!(
            "profile mismatch on {:?}",
            result.mismatches.keys().collect::<Vec<_>>()
        );
    }
    Ok(Json(result))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
