use std::env;
use std::time::Duration;

use countcheck_contracts::output::OutputPaths;

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;
const DEFAULT_TRANSPORT_RETRIES: f64 = 2.0;
const DEFAULT_RETRY_BACKOFF_S: f64 = 1.2;

/// Settings shared by every backend adapter.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub output: OutputPaths,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl BackendConfig {
    pub fn new(output: OutputPaths) -> Self {
        Self {
            output,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            transport_retries: DEFAULT_TRANSPORT_RETRIES as usize,
            retry_backoff: Duration::from_secs_f64(DEFAULT_RETRY_BACKOFF_S),
        }
    }

    /// Reads `COUNTCHECK_REQUEST_TIMEOUT`, `COUNTCHECK_TRANSPORT_RETRIES` and
    /// `COUNTCHECK_RETRY_BACKOFF` from the process environment.
    pub fn from_env(output: OutputPaths) -> Self {
        Self::from_lookup(output, non_empty_env)
    }

    pub fn from_lookup(output: OutputPaths, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str, default: f64, min: f64, max: f64| {
            clamped_f64(lookup(key).as_deref(), default, min, max)
        };
        Self {
            output,
            request_timeout: Duration::from_secs_f64(read(
                "COUNTCHECK_REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_S,
                5.0,
                600.0,
            )),
            transport_retries: read(
                "COUNTCHECK_TRANSPORT_RETRIES",
                DEFAULT_TRANSPORT_RETRIES,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff: Duration::from_secs_f64(read(
                "COUNTCHECK_RETRY_BACKOFF",
                DEFAULT_RETRY_BACKOFF_S,
                0.1,
                10.0,
            )),
        }
    }
}

fn clamped_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

pub(crate) fn api_base_from_env(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn model_from_env(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_string())
}
