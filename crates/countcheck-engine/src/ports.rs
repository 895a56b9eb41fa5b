//! The three capabilities the evaluation loop drives.
//!
//! Failure contract for every backend adapter:
//! - [`Generator`] and [`Editor`] must return their typed error for any failure
//!   (missing credentials, transport, non-2xx status, no image in the response,
//!   unreadable source image). A generation error ends the run; an edit error
//!   ends the retry loop and keeps the last good image.
//! - [`Analyzer`] must never fail. Anything that prevents reading a count
//!   becomes [`ObservedCount::Unparseable`], which the loop treats as a mismatch.

use std::path::Path;

use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::errors::{EditError, GenerationError};
use countcheck_contracts::evaluation::ObservedCount;

pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &str) -> Result<ImageArtifact, GenerationError>;
}

pub trait Editor: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, source: &Path, instruction: &str) -> Result<ImageArtifact, EditError>;
}

pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image: &Path, instruction: &str) -> ObservedCount;
}
