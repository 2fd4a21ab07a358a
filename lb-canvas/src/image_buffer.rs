use std::{fmt, io::Cursor};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_EDGE: u32 = 512;

const DATA_URI_IMAGE_PREFIX: &str = "data:image";
const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Rgb,
    Gray,
}

impl ColorMode {
    fn bytes_per_pixel(self) -> usize {
        match self {
            ColorMode::Rgb => 3,
            ColorMode::Gray => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    mode: ColorMode,
    data: Vec<u8>,
}

impl ImageBuffer {
    pub fn from_raw(
        width: u32,
        height: u32,
        mode: ColorMode,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * mode.bytes_per_pixel();
        if data.len() != expected {
            return Err(CodecError::Geometry {
                width,
                height,
                bytes: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            mode,
            data,
        })
    }

    pub fn blank_rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: ColorMode::Rgb,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn blank_gray(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: ColorMode::Gray,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn placeholder_image() -> Self {
        Self::blank_rgb(PLACEHOLDER_EDGE, PLACEHOLDER_EDGE)
    }

    pub fn placeholder_mask() -> Self {
        Self::blank_gray(PLACEHOLDER_EDGE, PLACEHOLDER_EDGE)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn to_data_uri(&self) -> Result<TextEncodedImage, CodecError> {
        let dynamic = match self.mode {
            ColorMode::Rgb => {
                let raw = image::RgbImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or(CodecError::Geometry {
                        width: self.width,
                        height: self.height,
                        bytes: self.data.len(),
                    })?;
                DynamicImage::ImageRgb8(raw)
            }
            ColorMode::Gray => {
                let raw = image::GrayImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or(CodecError::Geometry {
                        width: self.width,
                        height: self.height,
                        bytes: self.data.len(),
                    })?;
                DynamicImage::ImageLuma8(raw)
            }
        };
        let mut bytes = Vec::new();
        dynamic
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(CodecError::Encode)?;
        Ok(TextEncodedImage(format!(
            "{PNG_DATA_URI_PREFIX}{}",
            STANDARD.encode(bytes)
        )))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextEncodedImage(String);

impl TextEncodedImage {
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode_rgb(&self) -> Result<ImageBuffer, CodecError> {
        let dynamic = self.decode_dynamic()?;
        let rgb = dynamic.to_rgb8();
        Ok(ImageBuffer {
            width: rgb.width(),
            height: rgb.height(),
            mode: ColorMode::Rgb,
            data: rgb.into_raw(),
        })
    }

    pub fn decode_gray(&self) -> Result<ImageBuffer, CodecError> {
        let dynamic = self.decode_dynamic()?;
        let gray = dynamic.to_luma8();
        Ok(ImageBuffer {
            width: gray.width(),
            height: gray.height(),
            mode: ColorMode::Gray,
            data: gray.into_raw(),
        })
    }

    fn decode_dynamic(&self) -> Result<DynamicImage, CodecError> {
        if !self.0.starts_with(DATA_URI_IMAGE_PREFIX) {
            return Err(CodecError::MissingPrefix);
        }
        let Some((_, payload)) = self.0.split_once(',') else {
            return Err(CodecError::MissingPrefix);
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(CodecError::InvalidBase64)?;
        image::load_from_memory(&bytes).map_err(CodecError::Decode)
    }
}

#[derive(Debug)]
pub enum CodecError {
    MissingPrefix,
    InvalidBase64(base64::DecodeError),
    Decode(image::ImageError),
    Encode(image::ImageError),
    Geometry { width: u32, height: u32, bytes: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MissingPrefix => {
                write!(f, "image text is not a data:image/...;base64 uri")
            }
            CodecError::InvalidBase64(err) => write!(f, "invalid base64 payload: {err}"),
            CodecError::Decode(err) => write!(f, "failed to decode raster payload: {err}"),
            CodecError::Encode(err) => write!(f, "failed to encode png payload: {err}"),
            CodecError::Geometry {
                width,
                height,
                bytes,
            } => write!(
                f,
                "pixel buffer geometry mismatch: {width}x{height} with {bytes} bytes"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_round_trip_preserves_pixels() {
        let mut data = vec![0u8; 4 * 2 * 3];
        data[0] = 255;
        data[10] = 128;
        let source = ImageBuffer::from_raw(4, 2, ColorMode::Rgb, data).expect("valid geometry");

        let encoded = source.to_data_uri().expect("encode should succeed");
        assert!(encoded.as_str().starts_with("data:image/png;base64,"));

        let decoded = encoded.decode_rgb().expect("decode should succeed");
        assert_eq!(decoded, source);
    }

    #[test]
    fn gray_round_trip_preserves_pixels() {
        let source =
            ImageBuffer::from_raw(3, 3, ColorMode::Gray, vec![7u8; 9]).expect("valid geometry");
        let decoded = source
            .to_data_uri()
            .expect("encode should succeed")
            .decode_gray()
            .expect("decode should succeed");
        assert_eq!(decoded, source);
    }

    #[test]
    fn decode_rejects_text_without_data_uri_prefix() {
        let text = TextEncodedImage::from_string("iVBORw0KGgo=".to_string());
        assert!(matches!(text.decode_rgb(), Err(CodecError::MissingPrefix)));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let text = TextEncodedImage::from_string("data:image/png;base64,@@not-base64@@".to_string());
        assert!(matches!(
            text.decode_rgb(),
            Err(CodecError::InvalidBase64(_))
        ));
    }

    #[test]
    fn decode_rejects_non_raster_payload() {
        let text = TextEncodedImage::from_string(format!(
            "data:image/png;base64,{}",
            STANDARD.encode(b"definitely not a png")
        ));
        assert!(matches!(text.decode_rgb(), Err(CodecError::Decode(_))));
    }

    #[test]
    fn from_raw_rejects_geometry_mismatch() {
        assert!(matches!(
            ImageBuffer::from_raw(4, 4, ColorMode::Rgb, vec![0u8; 5]),
            Err(CodecError::Geometry { .. })
        ));
    }

    #[test]
    fn placeholders_are_fixed_size_and_zeroed() {
        let image = ImageBuffer::placeholder_image();
        let mask = ImageBuffer::placeholder_mask();
        assert_eq!((image.width(), image.height()), (512, 512));
        assert_eq!((mask.width(), mask.height()), (512, 512));
        assert!(image.data().iter().all(|byte| *byte == 0));
        assert_eq!(mask.mode(), ColorMode::Gray);
    }
}
