use std::{
    fs,
    path::{Path as FsPath, PathBuf},
    time::UNIX_EPOCH,
};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use canvas::{ColorMode, ImageBuffer};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::server::{AppState, ErrorResponse, bad_request, internal_error, not_found};

const OUTPUT_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".bmp", ".gif"];
const LOADABLE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".tiff", ".tif", ".ico", ".avif",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LatestOutputResponse {
    pub success: bool,
    pub image_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputsSinceResponse {
    pub success: bool,
    pub images: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoadImageRequest {
    pub file_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadImageResponse {
    pub success: bool,
    pub image_data: String,
    pub width: u32,
    pub height: u32,
}

pub(crate) async fn latest_output_handler(
    State(state): State<AppState>,
) -> Result<Json<LatestOutputResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut outputs = scan_outputs(&state.config.output_dir);
    outputs.sort_by_key(|(modified_unix_ms, _)| *modified_unix_ms);
    let Some((_, path)) = outputs.pop() else {
        return Err(not_found("no images found in output directory"));
    };
    let bytes = fs::read(&path)
        .map_err(|err| internal_error(format!("failed to read {}: {err}", path.display())))?;
    Ok(Json(LatestOutputResponse {
        success: true,
        image_data: format!("data:image/png;base64,{}", STANDARD.encode(bytes)),
    }))
}

pub(crate) async fn outputs_since_handler(
    State(state): State<AppState>,
    Path(since_unix_ms): Path<u64>,
) -> Result<Json<OutputsSinceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut outputs = scan_outputs(&state.config.output_dir);
    outputs.retain(|(modified_unix_ms, _)| *modified_unix_ms > since_unix_ms);
    outputs.sort_by_key(|(modified_unix_ms, _)| *modified_unix_ms);

    let mut images = Vec::with_capacity(outputs.len());
    for (_, path) in outputs {
        match fs::read(&path) {
            Ok(bytes) => images.push(format!(
                "data:image/png;base64,{}",
                STANDARD.encode(bytes)
            )),
            Err(err) => warn!("skipping unreadable output {}: {err}", path.display()),
        }
    }
    Ok(Json(OutputsSinceResponse {
        success: true,
        images,
    }))
}

pub(crate) async fn load_image_handler(
    State(_state): State<AppState>,
    Json(request): Json<LoadImageRequest>,
) -> Result<Json<LoadImageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let file_path = request.file_path.trim();
    if file_path.is_empty() {
        return Err(bad_request("file_path is required"));
    }
    let path = PathBuf::from(file_path);
    if !path.exists() {
        warn!("load-image file not found: {}", path.display());
        return Err(not_found(&format!("file not found: {file_path}")));
    }
    if !has_extension(&path, LOADABLE_EXTENSIONS) {
        return Err(bad_request(&format!(
            "invalid image file extension, supported: {}",
            LOADABLE_EXTENSIONS.join(", ")
        )));
    }

    info!("loading image from path {}", path.display());
    let bytes = fs::read(&path)
        .map_err(|err| internal_error(format!("failed to read {}: {err}", path.display())))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| internal_error(format!("error processing image file: {err}")))?
        .to_rgb8();
    let (width, height) = (decoded.width(), decoded.height());
    let buffer = ImageBuffer::from_raw(width, height, ColorMode::Rgb, decoded.into_raw())
        .map_err(|err| internal_error(format!("error processing image file: {err}")))?;
    let encoded = buffer
        .to_data_uri()
        .map_err(|err| internal_error(format!("error re-encoding image file: {err}")))?;

    Ok(Json(LoadImageResponse {
        success: true,
        image_data: encoded.as_str().to_string(),
        width,
        height,
    }))
}

fn scan_outputs(output_dir: &FsPath) -> Vec<(u64, PathBuf)> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "failed to read output directory {}: {err}",
                output_dir.display()
            );
            return Vec::new();
        }
    };

    let mut outputs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !has_extension(&path, OUTPUT_EXTENSIONS) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified_unix_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        outputs.push((modified_unix_ms, path));
    }
    outputs
}

fn has_extension(path: &FsPath, allowed: &[&str]) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let lowered = name.to_ascii_lowercase();
    allowed.iter().any(|extension| lowered.ends_with(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_extension(FsPath::new("/tmp/result.PNG"), OUTPUT_EXTENSIONS));
        assert!(has_extension(FsPath::new("shot.jpeg"), OUTPUT_EXTENSIONS));
        assert!(!has_extension(FsPath::new("notes.txt"), OUTPUT_EXTENSIONS));
        assert!(!has_extension(FsPath::new("archive.png.zip"), OUTPUT_EXTENSIONS));
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let outputs = scan_outputs(FsPath::new("/definitely/missing/layerbridge-outputs"));
        assert!(outputs.is_empty());
    }
}
