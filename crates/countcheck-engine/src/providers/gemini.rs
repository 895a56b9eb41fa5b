use std::path::Path;

use anyhow::{bail, Context, Result};
use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::errors::GenerationError;
use countcheck_contracts::evaluation::ObservedCount;
use countcheck_contracts::output::OutputPaths;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{api_base_from_env, first_non_empty_env, model_from_env, BackendConfig};
use crate::count::parse_count;
use crate::http::{
    decode_base64_image, response_json_or_error, store_image, truncate_text, HttpTransport,
    ImageBytes,
};
use crate::ports::{Analyzer, Generator};
use crate::vision::{prepare_vision_image, VISION_MAX_DIM};

const BACKEND: &str = "gemini";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_VISION_MODEL: &str = "gemini-3-pro";

/// `generateContent` transport shared by the Gemini generator and analyzer.
struct GeminiApi {
    api_base: String,
    transport: HttpTransport,
}

impl GeminiApi {
    fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api_base: api_base_from_env(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            transport: HttpTransport::new(config)?,
        })
    }

    fn api_key() -> Result<String> {
        first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"])
            .context("GEMINI_API_KEY (or GOOGLE_API_KEY) not set")
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let api_key = Self::api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self.transport.send("Gemini", |http| {
            Ok(http
                .post(&endpoint)
                .query(&[("key", api_key.as_str())])
                .json(payload))
        })?;
        response_json_or_error("Gemini", response)
    }
}

pub struct GeminiGenerator {
    api: GeminiApi,
    model: String,
    output: OutputPaths,
}

impl GeminiGenerator {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api: GeminiApi::from_env(config)?,
            model: model_from_env("COUNTCHECK_GEMINI_GENERATOR_MODEL", DEFAULT_IMAGE_MODEL),
            output: config.output.clone(),
        })
    }

    fn generate_image(&self, prompt: &str) -> Result<ImageArtifact> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        });
        let response_payload = self.api.generate_content(&self.model, &payload)?;
        let Some(image) = gemini_inline_images(&response_payload)?.into_iter().next() else {
            let reason = gemini_block_reason(&response_payload)
                .map(|reason| format!(" (blocked: {reason})"))
                .unwrap_or_default();
            bail!("Gemini returned no images{reason}");
        };
        let stored = store_image(&self.output, "generated_gemini", &image)?;
        Ok(ImageArtifact::new(stored.path, BACKEND, &self.model)
            .with_provenance("sha256", stored.sha256))
    }
}

impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        BACKEND
    }

    fn generate(&self, prompt: &str) -> Result<ImageArtifact, GenerationError> {
        self.generate_image(prompt)
            .map_err(|err| GenerationError::new(BACKEND, err))
    }
}

pub struct GeminiAnalyzer {
    api: GeminiApi,
    model: String,
}

impl GeminiAnalyzer {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api: GeminiApi::from_env(config)?,
            model: model_from_env("COUNTCHECK_GEMINI_ANALYZER_MODEL", DEFAULT_VISION_MODEL),
        })
    }

    fn request_answer(&self, image: &Path, instruction: &str) -> Result<String> {
        let prepared = prepare_vision_image(image, VISION_MAX_DIM)?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": instruction },
                    {
                        "inlineData": {
                            "mimeType": prepared.mime_type,
                            "data": prepared.base64(),
                        }
                    },
                ],
            }],
        });
        let response_payload = self.api.generate_content(&self.model, &payload)?;
        let text = gemini_text(&response_payload);
        if text.is_empty() {
            bail!("Gemini returned no text");
        }
        Ok(text)
    }
}

impl Analyzer for GeminiAnalyzer {
    fn name(&self) -> &str {
        BACKEND
    }

    fn analyze(&self, image: &Path, instruction: &str) -> ObservedCount {
        match self.request_answer(image, instruction) {
            Ok(text) => {
                debug!(answer = %truncate_text(&text, 200), "gemini analysis answer");
                parse_count(&text)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "gemini analysis failed");
                ObservedCount::Unparseable
            }
        }
    }
}

fn candidate_parts(response_payload: &Value) -> Vec<Value> {
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .cloned()
        .collect()
}

pub(crate) fn gemini_inline_images(response_payload: &Value) -> Result<Vec<ImageBytes>> {
    let mut out = Vec::new();
    for part in candidate_parts(response_payload) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(decode_base64_image("Gemini", data, mime_type)?);
    }
    Ok(out)
}

pub(crate) fn gemini_text(response_payload: &Value) -> String {
    candidate_parts(response_payload)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn gemini_block_reason(response_payload: &Value) -> Option<String> {
    response_payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
