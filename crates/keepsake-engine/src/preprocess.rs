use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use keepsake_contracts::errors::CollageError;
use keepsake_contracts::events::EventLog;
use keepsake_contracts::images::{data_url, EncodedImage};
use keepsake_contracts::settings::CollageSettings;
use serde_json::json;

use crate::timestamp_millis;

pub const ENCODED_MEDIA_TYPE: &str = "image/jpeg";

/// A user photo as uploaded, before any decoding.
#[derive(Debug, Clone)]
pub struct RawPhoto {
    pub name: String,
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl RawPhoto {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("photo")
            .to_string();
        Ok(Self::new(name, bytes, guess_image_mime(path)))
    }
}

/// Longer edge capped at `max_dimension`, aspect preserved, never upscaled.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let longest = if width >= height { width } else { height };
    let scale = (f64::from(max_dimension) / f64::from(longest)).min(1.0);
    let scaled = |value: u32| ((f64::from(value) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Decodes, downsizes and re-encodes one photo as JPEG. The input is left untouched.
pub fn preprocess(photo: &RawPhoto, settings: &CollageSettings) -> Result<EncodedImage, CollageError> {
    let decode_error = |message: String| CollageError::Decode {
        name: photo.name.clone(),
        message,
    };
    let image = decode_upright(&photo.bytes).map_err(|err| decode_error(err.to_string()))?;
    let (width, height) = scaled_dimensions(image.width(), image.height(), settings.max_dimension);

    let flattened = flatten_onto_white(&image);
    let resized = if flattened.dimensions() == (width, height) {
        flattened
    } else {
        image::imageops::resize(&flattened, width, height, FilterType::Triangle)
    };

    let bytes = encode_jpeg(&resized, settings.jpeg_quality)
        .map_err(|err| decode_error(format!("re-encode failed: {err}")))?;

    let payload = BASE64.encode(&bytes);
    Ok(EncodedImage {
        id: format!("{}-{}", photo.name, timestamp_millis()),
        display_url: data_url(ENCODED_MEDIA_TYPE, &payload),
        payload,
        media_type: ENCODED_MEDIA_TYPE.to_string(),
        width,
        height,
    })
}

/// Encodes every readable photo; unreadable ones are logged and returned as errors.
pub fn preprocess_batch(
    photos: &[RawPhoto],
    settings: &CollageSettings,
    events: &EventLog,
) -> (Vec<EncodedImage>, Vec<CollageError>) {
    let mut encoded = Vec::with_capacity(photos.len());
    let mut rejected = Vec::new();
    for photo in photos {
        match preprocess(photo, settings) {
            Ok(image) => encoded.push(image),
            Err(err) => {
                let payload = json!({
                    "name": photo.name,
                    "media_type": photo.media_type,
                    "error": err.to_string(),
                });
                if let Err(log_err) = events.emit(
                    "photo_rejected",
                    payload.as_object().cloned().unwrap_or_default(),
                ) {
                    eprintln!("keepsake: failed to log photo_rejected: {log_err:#}");
                }
                rejected.push(err);
            }
        }
    }
    (encoded, rejected)
}

/// Decodes and applies the EXIF orientation, so camera photos come out the way they were shot.
/// An unreadable orientation tag is treated as upright.
fn decode_upright(bytes: &[u8]) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode_image(image)?;
    Ok(bytes)
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

pub fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}
