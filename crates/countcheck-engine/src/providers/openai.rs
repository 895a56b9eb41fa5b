use std::path::Path;

use anyhow::{bail, Context, Result};
use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::errors::{EditError, GenerationError};
use countcheck_contracts::output::OutputPaths;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use serde_json::{json, Value};

use crate::config::{api_base_from_env, first_non_empty_env, model_from_env, BackendConfig};
use crate::http::{
    decode_base64_image, mime_for_path, read_source_image, response_json_or_error, store_image,
    HttpTransport, ImageSource,
};
use crate::ports::{Editor, Generator};

const BACKEND: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-image-1";
const IMAGE_SIZE: &str = "1024x1024";

/// OpenAI Images API: `images/generations` for new images and multipart
/// `images/edits` for edits.
pub struct OpenAiImages {
    api_base: String,
    generate_model: String,
    edit_model: String,
    transport: HttpTransport,
    output: OutputPaths,
}

impl OpenAiImages {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api_base: api_base_from_env("OPENAI_API_BASE", "https://api.openai.com/v1"),
            generate_model: model_from_env("COUNTCHECK_OPENAI_GENERATOR_MODEL", DEFAULT_MODEL),
            edit_model: model_from_env("COUNTCHECK_OPENAI_EDITOR_MODEL", DEFAULT_MODEL),
            transport: HttpTransport::new(config)?,
            output: config.output.clone(),
        })
    }

    fn api_key() -> Result<String> {
        first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"])
            .context("OPENAI_API_KEY (or OPENAI_API_KEY_BACKUP) not set")
    }

    fn generate_image(&self, prompt: &str) -> Result<ImageArtifact> {
        let api_key = Self::api_key()?;
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": self.generate_model,
            "prompt": prompt,
            "n": 1,
            "size": IMAGE_SIZE,
        });
        let response = self.transport.send("OpenAI", |http| {
            Ok(http.post(&endpoint).bearer_auth(&api_key).json(&payload))
        })?;
        let response_payload = response_json_or_error("OpenAI", response)?;
        self.store_first_image(&response_payload, "generated_openai", &self.generate_model)
    }

    fn edit_image(&self, source: &Path, instruction: &str) -> Result<ImageArtifact> {
        let api_key = Self::api_key()?;
        let endpoint = format!("{}/images/edits", self.api_base);
        let bytes = read_source_image(source)?;
        let file_name = source
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string();
        let mime = mime_for_path(source).unwrap_or("image/png");

        let response = self.transport.send("OpenAI edits", |http| {
            let part = MultipartPart::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(mime)
                .with_context(|| format!("invalid mime '{mime}' for {}", source.display()))?;
            let form = MultipartForm::new()
                .text("model", self.edit_model.clone())
                .text("prompt", instruction.to_string())
                .text("n", "1")
                .text("size", IMAGE_SIZE)
                .part("image", part);
            Ok(http.post(&endpoint).bearer_auth(&api_key).multipart(form))
        })?;
        let response_payload = response_json_or_error("OpenAI edits", response)?;
        let artifact =
            self.store_first_image(&response_payload, "edited_openai", &self.edit_model)?;
        Ok(artifact.with_provenance("source", source.to_string_lossy().to_string()))
    }

    fn store_first_image(
        &self,
        response_payload: &Value,
        prefix: &str,
        model: &str,
    ) -> Result<ImageArtifact> {
        let Some(source) = openai_image_sources(response_payload)?.into_iter().next() else {
            bail!("OpenAI response returned no images");
        };
        let image = self.transport.resolve_image("OpenAI", source)?;
        let stored = store_image(&self.output, prefix, &image)?;
        let mut artifact = ImageArtifact::new(stored.path, BACKEND, model)
            .with_provenance("sha256", stored.sha256);
        if let Some(created) = response_payload.get("created").cloned() {
            artifact = artifact.with_provenance("created", created);
        }
        Ok(artifact)
    }
}

impl Generator for OpenAiImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn generate(&self, prompt: &str) -> Result<ImageArtifact, GenerationError> {
        self.generate_image(prompt)
            .map_err(|err| GenerationError::new(BACKEND, err))
    }
}

impl Editor for OpenAiImages {
    fn name(&self) -> &str {
        BACKEND
    }

    fn edit(&self, source: &Path, instruction: &str) -> Result<ImageArtifact, EditError> {
        self.edit_image(source, instruction)
            .map_err(|err| EditError::new(BACKEND, err))
    }
}

/// Images in a `data[]` response, as inline base64 or as URLs to download.
pub(crate) fn openai_image_sources(response_payload: &Value) -> Result<Vec<ImageSource>> {
    let rows = response_payload
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if let Some(b64) = obj
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
        {
            out.push(ImageSource::Inline(decode_base64_image("OpenAI", b64, None)?));
            continue;
        }
        if let Some(url) = obj
            .get("url")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
        {
            out.push(ImageSource::Url(url.trim().to_string()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::openai_image_sources;
    use crate::http::ImageSource;

    #[test]
    fn b64_rows_are_decoded_inline() -> anyhow::Result<()> {
        let payload = json!({
            "created": 1760000000,
            "data": [{"b64_json": "aGVsbG8="}],
        });
        let sources = openai_image_sources(&payload)?;
        assert_eq!(sources.len(), 1);
        match &sources[0] {
            ImageSource::Inline(image) => assert_eq!(image.bytes, b"hello"),
            other => panic!("expected inline image, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn url_rows_are_downloaded_later() -> anyhow::Result<()> {
        let payload = json!({
            "data": [
                {"revised_prompt": "no image here"},
                {"url": " https://cdn.example/img.png "},
            ],
        });
        let sources = openai_image_sources(&payload)?;
        assert_eq!(sources.len(), 1);
        assert!(matches!(
            &sources[0],
            ImageSource::Url(url) if url == "https://cdn.example/img.png"
        ));
        Ok(())
    }

    #[test]
    fn missing_data_yields_nothing() -> anyhow::Result<()> {
        assert!(openai_image_sources(&json!({"error": {"message": "quota"}}))?.is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_base64_is_an_error() {
        let payload = json!({"data": [{"b64_json": "!!not base64!!"}]});
        assert!(openai_image_sources(&payload).is_err());
    }
}
