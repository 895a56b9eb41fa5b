use std::path::Path;

use anyhow::{Context, Result};
use countcheck_contracts::evaluation::ObservedCount;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{api_base_from_env, model_from_env, non_empty_env, BackendConfig};
use crate::count::parse_count;
use crate::http::{response_json_or_error, truncate_text, HttpTransport};
use crate::ports::Analyzer;
use crate::vision::{prepare_vision_image, VISION_MAX_DIM};

const BACKEND: &str = "qwen";
const DEFAULT_MODEL: &str = "qwen/qwen3-vl-235b-a22b-instruct";

/// Qwen vision model reached through OpenRouter's chat completions API.
pub struct QwenAnalyzer {
    api_base: String,
    model: String,
    transport: HttpTransport,
}

impl QwenAnalyzer {
    pub fn from_env(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api_base: api_base_from_env("OPENROUTER_API_BASE", "https://openrouter.ai/api/v1"),
            model: model_from_env("COUNTCHECK_QWEN_ANALYZER_MODEL", DEFAULT_MODEL),
            transport: HttpTransport::new(config)?,
        })
    }

    fn request_answer(&self, image: &Path, instruction: &str) -> Result<String> {
        let api_key = non_empty_env("OPENROUTER_API_KEY").context("OPENROUTER_API_KEY not set")?;
        let prepared = prepare_vision_image(image, VISION_MAX_DIM)?;
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction },
                    { "type": "image_url", "image_url": { "url": prepared.data_url() } },
                ],
            }],
        });
        let response = self.transport.send("OpenRouter", |http| {
            Ok(http.post(&endpoint).bearer_auth(&api_key).json(&payload))
        })?;
        let response_payload = response_json_or_error("OpenRouter", response)?;
        chat_completion_text(&response_payload).context("OpenRouter returned no message content")
    }
}

impl Analyzer for QwenAnalyzer {
    fn name(&self) -> &str {
        BACKEND
    }

    fn analyze(&self, image: &Path, instruction: &str) -> ObservedCount {
        match self.request_answer(image, instruction) {
            Ok(text) => {
                debug!(answer = %truncate_text(&text, 200), "qwen analysis answer");
                parse_count(&text)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "qwen analysis failed");
                ObservedCount::Unparseable
            }
        }
    }
}

/// Text of `choices[0].message.content`, which may be a string or a list of
/// typed parts.
pub(crate) fn chat_completion_text(response_payload: &Value) -> Option<String> {
    let content = response_payload
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?;
    let text = match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    (!text.is_empty()).then_some(text)
}
