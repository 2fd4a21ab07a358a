use std::{fmt, sync::atomic::Ordering};

use axum::{Json, extract::State, http::StatusCode};
use canvas::{CodecError, ColorMode, ImageBuffer, TextEncodedImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{logging::category_matting, server::AppState};

pub trait MattingEngine: Send + Sync {
    fn segment(&self, image: &ImageBuffer, threshold: f32) -> Result<ImageBuffer, MattingError>;
}

// Deterministic stand-in for the external segmentation model: min-max
// normalized luminance, binarized when threshold > 0. Deployments swap in a
// real engine through the trait.
pub struct ThresholdMatting;

impl MattingEngine for ThresholdMatting {
    fn segment(&self, image: &ImageBuffer, threshold: f32) -> Result<ImageBuffer, MattingError> {
        let pixels = image.width() as usize * image.height() as usize;
        let mut luminance = Vec::with_capacity(pixels);
        match image.mode() {
            ColorMode::Rgb => {
                for pixel in image.data().chunks_exact(3) {
                    let value =
                        (299 * pixel[0] as u32 + 587 * pixel[1] as u32 + 114 * pixel[2] as u32)
                            / 1_000;
                    luminance.push(value as u8);
                }
            }
            ColorMode::Gray => luminance.extend_from_slice(image.data()),
        }

        let min = luminance.iter().copied().min().unwrap_or(0);
        let max = luminance.iter().copied().max().unwrap_or(0);
        let alpha = if max > min {
            let range = (max - min) as u32;
            luminance
                .iter()
                .map(|value| {
                    let normalized = ((*value - min) as u32 * 255 / range) as u8;
                    if threshold > 0.0 {
                        if f32::from(normalized) / 255.0 > threshold {
                            255
                        } else {
                            0
                        }
                    } else {
                        normalized
                    }
                })
                .collect()
        } else {
            vec![0u8; pixels]
        };

        ImageBuffer::from_raw(image.width(), image.height(), ColorMode::Gray, alpha)
            .map_err(|err| MattingError::Segmentation(err.to_string()))
    }
}

#[derive(Debug)]
pub enum MattingError {
    NotConfigured,
    Busy,
    InvalidImage(CodecError),
    Segmentation(String),
}

impl MattingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MattingError::NotConfigured => StatusCode::BAD_REQUEST,
            MattingError::Busy => StatusCode::TOO_MANY_REQUESTS,
            MattingError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            MattingError::Segmentation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_label(&self) -> &'static str {
        match self {
            MattingError::NotConfigured => "Dependency Not Found",
            MattingError::Busy => "Another matting operation is in progress",
            MattingError::InvalidImage(_) => "Invalid Image Payload",
            MattingError::Segmentation(_) => "Matting Model Error",
        }
    }

    fn details(&self) -> String {
        match self {
            MattingError::NotConfigured => {
                "no matting engine is configured; install one on the server state before \
                 requesting matting"
                    .to_string()
            }
            MattingError::Busy => {
                "please wait for the current operation to complete".to_string()
            }
            MattingError::InvalidImage(err) => err.to_string(),
            MattingError::Segmentation(message) => message.clone(),
        }
    }
}

impl fmt::Display for MattingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MattingError::NotConfigured => write!(f, "matting engine is not configured"),
            MattingError::Busy => write!(f, "another matting operation is in progress"),
            MattingError::InvalidImage(err) => write!(f, "invalid matting image: {err}"),
            MattingError::Segmentation(message) => write!(f, "matting failed: {message}"),
        }
    }
}

impl std::error::Error for MattingError {}

#[derive(Clone, Debug, Deserialize)]
pub struct MattingRequest {
    pub image: String,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_refinement")]
    pub refinement: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MattingResponse {
    pub matted_image: String,
    pub alpha_mask: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MattingErrorBody {
    pub error: String,
    pub details: String,
}

fn default_threshold() -> f32 {
    0.5
}

fn default_refinement() -> u32 {
    1
}

pub(crate) async fn matting_handler(
    State(state): State<AppState>,
    Json(request): Json<MattingRequest>,
) -> Result<Json<MattingResponse>, (StatusCode, Json<MattingErrorBody>)> {
    state
        .metrics
        .matting_requests_total
        .fetch_add(1, Ordering::Relaxed);

    let Some(engine) = state.matting_engine.clone() else {
        warn!("{} request rejected: engine not configured", category_matting());
        return Err(reject(&state, MattingError::NotConfigured));
    };
    let Some(_permit) = state.matting_gate.try_enter() else {
        state
            .metrics
            .matting_busy_total
            .fetch_add(1, Ordering::Relaxed);
        warn!("{} already in progress, rejecting request", category_matting());
        return Err(error_body(MattingError::Busy));
    };

    info!(
        "{} request accepted threshold={} refinement={}",
        category_matting(),
        request.threshold,
        request.refinement
    );
    let image = TextEncodedImage::from_string(request.image)
        .decode_rgb()
        .map_err(|err| reject(&state, MattingError::InvalidImage(err)))?;

    let alpha = engine
        .segment(&image, request.threshold)
        .map_err(|err| reject(&state, err))?;
    let matted = apply_alpha(&image, &alpha);

    let response = MattingResponse {
        matted_image: encode(&state, &matted)?,
        alpha_mask: encode(&state, &alpha)?,
    };
    info!("{} completed", category_matting());
    Ok(Json(response))
}

fn apply_alpha(image: &ImageBuffer, alpha: &ImageBuffer) -> ImageBuffer {
    let mut data = Vec::with_capacity(image.data().len());
    for (pixel, alpha_value) in image.data().chunks_exact(3).zip(alpha.data()) {
        for channel in pixel {
            data.push((*channel as u32 * *alpha_value as u32 / 255) as u8);
        }
    }
    ImageBuffer::from_raw(image.width(), image.height(), ColorMode::Rgb, data)
        .unwrap_or_else(|_| ImageBuffer::placeholder_image())
}

fn encode(
    state: &AppState,
    buffer: &ImageBuffer,
) -> Result<String, (StatusCode, Json<MattingErrorBody>)> {
    buffer
        .to_data_uri()
        .map(|text| text.as_str().to_string())
        .map_err(|err| reject(state, MattingError::Segmentation(err.to_string())))
}

fn reject(state: &AppState, error: MattingError) -> (StatusCode, Json<MattingErrorBody>) {
    state
        .metrics
        .matting_failures_total
        .fetch_add(1, Ordering::Relaxed);
    error_body(error)
}

fn error_body(error: MattingError) -> (StatusCode, Json<MattingErrorBody>) {
    (
        error.status_code(),
        Json(MattingErrorBody {
            error: error.error_label().to_string(),
            details: error.details(),
        }),
    )
}
