use std::path::Path;

use anyhow::{bail, Context, Result};
use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::errors::{EditError, GenerationError};
use countcheck_contracts::output::OutputPaths;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Map, Value};

use crate::config::{api_base_from_env, first_non_empty_env, model_from_env, BackendConfig};
use crate::http::{path_to_data_url, response_json_or_error, store_image, HttpTransport};
use crate::ports::{Editor, Generator};

const BACKEND: &str = "fal";
const DEFAULT_MODEL: &str = "fal-ai/recraft-v3";

/// fal.run synchronous endpoints. Edits send the source image inline as a
/// data URL instead of uploading it first.
pub struct FalImages {
    api_base: String,
    generate_model: String,
    edit_model: String,
    transport: HttpTransport,
    output: OutputPaths,
}

impl FalImages {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api_base: api_base_from_env("FAL_API_BASE", "https://fal.run"),
            generate_model: model_from_env("COUNTCHECK_FAL_GENERATOR_MODEL", DEFAULT_MODEL),
            edit_model: model_from_env("COUNTCHECK_FAL_EDITOR_MODEL", DEFAULT_MODEL),
            transport: HttpTransport::new(config)?,
            output: config.output.clone(),
        })
    }

    fn api_key() -> Result<String> {
        first_non_empty_env(&["FAL_KEY", "FAL_API_KEY"]).context("FAL_KEY (or FAL_API_KEY) not set")
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        format!("{}/{}", self.api_base, trimmed.trim_start_matches('/'))
    }

    fn run_model(&self, model: &str, payload: &Map<String, Value>, prefix: &str) -> Result<ImageArtifact> {
        let api_key = Self::api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self.transport.send("Fal", |http| {
            Ok(http
                .post(&endpoint)
                .header(AUTHORIZATION, format!("Key {api_key}"))
                .json(payload))
        })?;
        let response_payload = response_json_or_error("Fal", response)?;
        let Some(url) = fal_image_urls(&response_payload).into_iter().next() else {
            bail!("Fal response returned no image URLs");
        };
        let image = self.transport.download_image("Fal", &url)?;
        let stored = store_image(&self.output, prefix, &image)?;

        let mut artifact = ImageArtifact::new(stored.path, BACKEND, model)
            .with_provenance("sha256", stored.sha256)
            .with_provenance("url", url);
        if let Some(request_id) = response_payload.get("request_id").cloned() {
            artifact = artifact.with_provenance("request_id", request_id);
        }
        Ok(artifact)
    }

    fn generate_image(&self, prompt: &str) -> Result<ImageArtifact> {
        let mut payload = Map::new();
        payload.insert("prompt".to_string(), json!(prompt));
        self.run_model(&self.generate_model, &payload, "generated_fal")
    }

    fn edit_image(&self, source: &Path, instruction: &str) -> Result<ImageArtifact> {
        let mut payload = Map::new();
        payload.insert("prompt".to_string(), json!(instruction));
        payload.insert("image_url".to_string(), json!(path_to_data_url(source)?));
        let artifact = self.run_model(&self.edit_model, &payload, "edited_fal")?;
        Ok(artifact.with_provenance("source", source.to_string_lossy().to_string()))
    }
}

impl Generator for FalImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn generate(&self, prompt: &str) -> Result<ImageArtifact, GenerationError> {
        self.generate_image(prompt)
            .map_err(|err| GenerationError::new(BACKEND, err))
    }
}

impl Editor for FalImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn edit(&self, source: &Path, instruction: &str) -> Result<ImageArtifact, EditError> {
        self.edit_image(source, instruction)
            .map_err(|err| EditError::new(BACKEND, err))
    }
}

/// Collects image URLs from the shapes fal models answer with:
/// `images[].url`, `image.url`, `output`, or bare strings.
pub(crate) fn fal_image_urls(value: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                    out.push(trimmed.to_string());
                }
            }
            Value::Array(rows) => {
                for row in rows {
                    walk(row, out);
                }
            }
            Value::Object(obj) => {
                for key in ["url", "images", "image", "output"] {
                    if let Some(inner) = obj.get(key) {
                        walk(inner, out);
                    }
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(value, &mut out);
    out
}
