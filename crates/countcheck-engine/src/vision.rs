use std::path::Path;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

use crate::http::{mime_for_path, read_source_image};

pub(crate) const VISION_MAX_DIM: u32 = 1024;

/// Image payload prepared for a vision model.
#[derive(Debug, Clone)]
pub(crate) struct VisionImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl VisionImage {
    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Flattens alpha onto white, shrinks to `max_dim` and re-encodes as JPEG.
/// Files the `image` crate cannot decode are sent unchanged.
pub(crate) fn prepare_vision_image(path: &Path, max_dim: u32) -> Result<VisionImage> {
    let raw = read_source_image(path)?;
    if let Ok(decoded) = image::load_from_memory(&raw) {
        if let Some(bytes) = encode_for_vision(&decoded, max_dim.max(128)) {
            return Ok(VisionImage {
                bytes,
                mime_type: "image/jpeg".to_string(),
            });
        }
    }
    Ok(VisionImage {
        bytes: raw,
        mime_type: mime_for_path(path).unwrap_or("image/png").to_string(),
    })
}

fn encode_for_vision(image: &DynamicImage, max_dim: u32) -> Option<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let flattened = DynamicImage::ImageRgba8(flattened);
    let (width, height) = flattened.dimensions();
    let resized = if width.max(height) > max_dim {
        flattened.resize(max_dim, max_dim, FilterType::Triangle)
    } else {
        flattened
    };

    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(resized.to_rgb8()))
        .ok()?;
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::prepare_vision_image;

    #[test]
    fn large_images_are_downscaled_to_jpeg() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wide.png");
        RgbaImage::from_pixel(2048, 512, Rgba([200, 10, 10, 128])).save(&path)?;

        let prepared = prepare_vision_image(&path, 1024)?;
        assert_eq!(prepared.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!(decoded.dimensions(), (1024, 256));
        assert!(prepared.data_url().starts_with("data:image/jpeg;base64,"));
        Ok(())
    }

    #[test]
    fn small_images_keep_their_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("small.png");
        RgbaImage::from_pixel(64, 48, Rgba([0, 0, 0, 255])).save(&path)?;

        let prepared = prepare_vision_image(&path, 1024)?;
        let decoded = image::load_from_memory(&prepared.bytes)?;
        assert_eq!(decoded.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn undecodable_files_pass_through() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("notes.webp");
        std::fs::write(&path, b"not really an image")?;

        let prepared = prepare_vision_image(&path, 1024)?;
        assert_eq!(prepared.mime_type, "image/webp");
        assert_eq!(prepared.bytes, b"not really an image");
        Ok(())
    }

    #[test]
    fn missing_files_are_errors() {
        assert!(prepare_vision_image(std::path::Path::new("/missing/a.png"), 1024).is_err());
    }
}
