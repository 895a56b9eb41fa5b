use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::errors::{EditError, GenerationError};
use countcheck_contracts::evaluation::ObservedCount;
use countcheck_contracts::output::OutputPaths;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::BackendConfig;
use crate::http::{store_image, ImageBytes};
use crate::ports::{Analyzer, Editor, Generator};

const BACKEND: &str = "dryrun";
const MODEL: &str = "dryrun-image";
const SIZE: u32 = 512;
const MAX_DRYRUN_COUNT: u8 = 10;

/// Offline backend: solid-color images derived from the prompt, edits that
/// tint the source toward a color derived from the instruction, and counts
/// derived from the image bytes (stable for a given file, 0..10).
pub struct DryrunImages {
    output: OutputPaths,
}

impl DryrunImages {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            output: config.output.clone(),
        }
    }

    fn generate_image(&self, prompt: &str) -> Result<ImageArtifact> {
        let image = RgbImage::from_pixel(SIZE, SIZE, Rgb(color_from_text(prompt)));
        self.store(DynamicImage::ImageRgb8(image), "generated_dryrun")
    }

    fn edit_image(&self, source: &Path, instruction: &str) -> Result<ImageArtifact> {
        let mut image = image::open(source)
            .with_context(|| format!("source image unreadable: {}", source.display()))?
            .to_rgb8();
        let tint = color_from_text(instruction);
        for pixel in image.pixels_mut() {
            for (channel, target) in pixel.0.iter_mut().zip(tint) {
                *channel = ((u16::from(*channel) + u16::from(target)) / 2) as u8;
            }
        }
        let artifact = self.store(DynamicImage::ImageRgb8(image), "edited_dryrun")?;
        Ok(artifact.with_provenance("source", source.to_string_lossy().to_string()))
    }

    fn store(&self, image: DynamicImage, prefix: &str) -> Result<ImageArtifact> {
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .context("failed to encode dryrun image")?;
        let stored = store_image(
            &self.output,
            prefix,
            &ImageBytes {
                bytes: bytes.into_inner(),
                mime_type: Some("image/png".to_string()),
            },
        )?;
        Ok(ImageArtifact::new(stored.path, BACKEND, MODEL).with_provenance("sha256", stored.sha256))
    }
}

impl Generator for DryrunImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn generate(&self, prompt: &str) -> Result<ImageArtifact, GenerationError> {
        self.generate_image(prompt)
            .map_err(|err| GenerationError::new(BACKEND, err))
    }
}

impl Editor for DryrunImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn edit(&self, source: &Path, instruction: &str) -> Result<ImageArtifact, EditError> {
        self.edit_image(source, instruction)
            .map_err(|err| EditError::new(BACKEND, err))
    }
}

impl Analyzer for DryrunImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn analyze(&self, image: &Path, _instruction: &str) -> ObservedCount {
        match std::fs::read(image) {
            Ok(bytes) => ObservedCount::Detected(count_from_bytes(&bytes)),
            Err(err) => {
                warn!(backend = BACKEND, path = %image.display(), "analysis failed: {err}");
                ObservedCount::Unparseable
            }
        }
    }
}

fn count_from_bytes(bytes: &[u8]) -> u32 {
    u32::from(Sha256::digest(bytes)[0] % MAX_DRYRUN_COUNT)
}

fn color_from_text(text: &str) -> [u8; 3] {
    let digest = Sha256::digest(text.as_bytes());
    [digest[0], digest[1], digest[2]]
}
