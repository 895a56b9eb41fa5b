use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use countcheck_contracts::output::OutputPaths;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::BackendConfig;

#[derive(Debug, Clone)]
pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// An image reference pulled out of a provider response.
#[derive(Debug, Clone)]
pub(crate) enum ImageSource {
    Inline(ImageBytes),
    Url(String),
}

#[derive(Debug, Clone)]
pub(crate) struct StoredImage {
    pub path: PathBuf,
    pub sha256: String,
}

/// Blocking HTTP client with linear-backoff retries on transport failures.
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    http: HttpClient,
    retries: usize,
    backoff: Duration,
}

impl HttpTransport {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            retries: config.transport_retries,
            backoff: config.retry_backoff,
        })
    }

    /// Sends the request built by `build`, rebuilding it for every attempt.
    ///
    /// Only connect/timeout/request failures are retried; an HTTP error status
    /// is a response and is returned as-is.
    pub fn send<F>(&self, label: &str, build: F) -> Result<HttpResponse>
    where
        F: Fn(&HttpClient) -> Result<RequestBuilder>,
    {
        let mut attempt = 0;
        loop {
            let request = build(&self.http)?;
            match request.send() {
                Ok(response) => return Ok(response),
                Err(raw) => {
                    let err = anyhow::Error::new(raw).context(format!("{label} request failed"));
                    if attempt >= self.retries || !is_retryable_transport_error(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = self.backoff.mul_f64(attempt as f64);
                    warn!(
                        label,
                        attempt,
                        max_retries = self.retries,
                        "transient transport failure, retrying in {delay:?}"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    pub fn download_image(&self, label: &str, url: &str) -> Result<ImageBytes> {
        let response = self
            .send(label, |http| Ok(http.get(url)))
            .with_context(|| format!("failed downloading {label} image ({url})"))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "{label} image download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading {label} image bytes"))?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }

    pub fn resolve_image(&self, label: &str, source: ImageSource) -> Result<ImageBytes> {
        match source {
            ImageSource::Inline(image) => Ok(image),
            ImageSource::Url(url) => self.download_image(label, &url),
        }
    }
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

pub(crate) fn decode_base64_image(
    provider: &str,
    data: &str,
    mime_type: Option<String>,
) -> Result<ImageBytes> {
    let bytes = BASE64
        .decode(data.trim().as_bytes())
        .with_context(|| format!("{provider} image base64 decode failed"))?;
    Ok(ImageBytes { bytes, mime_type })
}

/// Writes image bytes under a fresh name and returns the path and digest.
pub(crate) fn store_image(
    output: &OutputPaths,
    prefix: &str,
    image: &ImageBytes,
) -> Result<StoredImage> {
    if image.bytes.is_empty() {
        bail!("refusing to store an empty image");
    }
    let path = output.allocate(prefix, extension_for_mime(image.mime_type.as_deref()))?;
    fs::write(&path, &image.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(StoredImage {
        path,
        sha256: sha256_hex(&image.bytes),
    })
}

pub(crate) fn read_source_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("source image unreadable: {}", path.display()))
}

pub(crate) fn path_to_data_url(path: &Path) -> Result<String> {
    let bytes = read_source_image(path)?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub(crate) fn extension_for_mime(mime: Option<&str>) -> &'static str {
    let lowered = mime.unwrap_or_default().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        "jpg"
    } else if lowered.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use countcheck_contracts::output::OutputPaths;

    use super::{
        decode_base64_image, extension_for_mime, mime_for_path, path_to_data_url, sha256_hex,
        store_image, truncate_text, ImageBytes,
    };

    #[test]
    fn extension_follows_mime() {
        assert_eq!(extension_for_mime(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for_mime(Some("image/webp; charset=binary")), "webp");
        assert_eq!(extension_for_mime(Some("application/octet-stream")), "png");
        assert_eq!(extension_for_mime(None), "png");
        assert_eq!(mime_for_path(Path::new("a/b.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("a/b")), None);
    }

    #[test]
    fn store_image_writes_bytes_and_digest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = OutputPaths::new(temp.path());
        let image = decode_base64_image("test", "aGVsbG8=", Some("image/webp".to_string()))?;
        let stored = store_image(&output, "generated_test", &image)?;

        assert_eq!(std::fs::read(&stored.path)?, b"hello");
        assert_eq!(
            stored.path.extension().and_then(|ext| ext.to_str()),
            Some("webp")
        );
        assert_eq!(stored.sha256, sha256_hex(b"hello"));
        assert_eq!(stored.sha256.len(), 64);
        Ok(())
    }

    #[test]
    fn store_image_rejects_empty_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = OutputPaths::new(temp.path());
        let empty = ImageBytes {
            bytes: Vec::new(),
            mime_type: None,
        };
        assert!(store_image(&output, "generated_test", &empty).is_err());
        Ok(())
    }

    #[test]
    fn data_url_reports_unreadable_source() {
        let err = path_to_data_url(Path::new("/definitely/missing.png")).unwrap_err();
        assert!(err.to_string().contains("source image unreadable"));
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
