use std::error::Error as StdError;
use std::fmt;

/// A generator backend could not produce a stored image.
///
/// Aborts the run: there is nothing to analyze without a first image.
#[derive(Debug)]
pub struct GenerationError {
    backend: String,
    source: anyhow::Error,
}

/// An editor backend could not produce a stored image from its source.
///
/// Ends the retry loop only; the last good image is still reported.
#[derive(Debug)]
pub struct EditError {
    backend: String,
    source: anyhow::Error,
}

impl GenerationError {
    pub fn new(backend: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            backend: backend.into(),
            source,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl EditError {
    pub fn new(backend: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            backend: backend.into(),
            source,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} generation failed", self.backend)
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} edit failed", self.backend)
    }
}

impl StdError for GenerationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + 'static) = self.source.as_ref();
        Some(cause)
    }
}

impl StdError for EditError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + 'static) = self.source.as_ref();
        Some(cause)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::{EditError, GenerationError};

    #[test]
    fn generation_error_keeps_cause_chain() {
        let err = GenerationError::new("fal", anyhow!("Fal response returned no image URLs"));
        let wrapped = anyhow::Error::new(err);
        let chain: Vec<String> = wrapped.chain().map(ToString::to_string).collect();
        assert_eq!(
            chain,
            vec![
                "fal generation failed".to_string(),
                "Fal response returned no image URLs".to_string(),
            ]
        );
        assert_eq!(
            format!("{wrapped:#}"),
            "fal generation failed: Fal response returned no image URLs"
        );
    }

    #[test]
    fn edit_error_names_backend() {
        let err = EditError::new(
            "openai",
            anyhow!("connection reset").context("OpenAI edits request failed"),
        );
        assert_eq!(err.backend(), "openai");
        assert_eq!(err.to_string(), "openai edit failed");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("OpenAI edits request failed"));
    }
}
