//! Concrete backends and the factory that turns operator selections into ports.

mod dryrun;
mod fal;
mod gemini;
mod openai;
mod openrouter;

use anyhow::Result;
use countcheck_contracts::backends::{AnalyzerBackend, EditorBackend, GeneratorBackend};

pub use dryrun::DryrunImages;
pub use fal::FalImages;
pub use gemini::{GeminiAnalyzer, GeminiGenerator};
pub use openai::OpenAiImages;
pub use openrouter::QwenAnalyzer;

use crate::config::BackendConfig;
use crate::ports::{Analyzer, Editor, Generator};

/// The editor chosen for a run, plus why it differs from what was asked for.
pub struct EditorSelection {
    pub requested: EditorBackend,
    pub editor: Option<Box<dyn Editor>>,
    pub fallback_reason: Option<String>,
}

impl EditorSelection {
    pub fn editor_name(&self) -> Option<&str> {
        self.editor.as_ref().map(|editor| editor.name())
    }
}

pub fn build_generator(
    backend: GeneratorBackend,
    config: &BackendConfig,
) -> Result<Box<dyn Generator>> {
    let generator: Box<dyn Generator> = match backend {
        GeneratorBackend::Gemini => Box::new(GeminiGenerator::from_env(config)?),
        GeneratorBackend::OpenAi => Box::new(OpenAiImages::from_env(config)?),
        GeneratorBackend::Fal => Box::new(FalImages::from_env(config)?),
        GeneratorBackend::Dryrun => Box::new(DryrunImages::new(config)),
    };
    Ok(generator)
}

/// Gemini has no image edit endpoint wired up; asking for it substitutes the
/// OpenAI editor and reports the substitution.
pub fn build_editor(backend: EditorBackend, config: &BackendConfig) -> Result<EditorSelection> {
    let mut fallback_reason = None;
    let editor: Option<Box<dyn Editor>> = match backend {
        EditorBackend::Gemini => {
            fallback_reason = Some(
                "Gemini editor is not implemented; using the OpenAI editor instead.".to_string(),
            );
            Some(Box::new(OpenAiImages::from_env(config)?))
        }
        EditorBackend::OpenAi => Some(Box::new(OpenAiImages::from_env(config)?)),
        EditorBackend::Fal => Some(Box::new(FalImages::from_env(config)?)),
        EditorBackend::Dryrun => Some(Box::new(DryrunImages::new(config))),
        EditorBackend::None => None,
    };
    Ok(EditorSelection {
        requested: backend,
        editor,
        fallback_reason,
    })
}

pub fn build_analyzer(
    backend: AnalyzerBackend,
    config: &BackendConfig,
) -> Result<Box<dyn Analyzer>> {
    let analyzer: Box<dyn Analyzer> = match backend {
        AnalyzerBackend::Qwen => Box::new(QwenAnalyzer::from_env(config)?),
        AnalyzerBackend::Gemini => Box::new(GeminiAnalyzer::from_env(config)?),
        AnalyzerBackend::Dryrun => Box::new(DryrunImages::new(config)),
    };
    Ok(analyzer)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use countcheck_contracts::backends::{AnalyzerBackend, EditorBackend, GeneratorBackend};
    use countcheck_contracts::evaluation::ObservedCount;
    use countcheck_contracts::output::OutputPaths;

    use super::{build_analyzer, build_editor, build_generator};
    use crate::config::BackendConfig;

    fn config() -> BackendConfig {
        let mut config = BackendConfig::new(OutputPaths::new("output"));
        config.transport_retries = 0;
        config
    }

    #[test]
    fn every_generator_backend_builds() -> anyhow::Result<()> {
        for backend in GeneratorBackend::ALL {
            let generator = build_generator(*backend, &config())?;
            assert_eq!(generator.name(), backend.as_str());
        }
        Ok(())
    }

    #[test]
    fn gemini_editor_falls_back_to_openai() -> anyhow::Result<()> {
        let selection = build_editor(EditorBackend::Gemini, &config())?;
        assert_eq!(selection.requested, EditorBackend::Gemini);
        assert_eq!(selection.editor_name(), Some("openai"));
        assert!(selection
            .fallback_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("not implemented")));
        Ok(())
    }

    #[test]
    fn implemented_editors_have_no_fallback() -> anyhow::Result<()> {
        for backend in [EditorBackend::OpenAi, EditorBackend::Fal, EditorBackend::Dryrun] {
            let selection = build_editor(backend, &config())?;
            assert_eq!(selection.editor_name(), Some(backend.as_str()));
            assert_eq!(selection.fallback_reason, None);
        }
        Ok(())
    }

    #[test]
    fn none_editor_is_absent() -> anyhow::Result<()> {
        let selection = build_editor(EditorBackend::None, &config())?;
        assert!(selection.editor.is_none());
        assert_eq!(selection.fallback_reason, None);
        Ok(())
    }

    #[test]
    fn analyzers_turn_failures_into_the_sentinel() -> anyhow::Result<()> {
        for backend in AnalyzerBackend::ALL {
            let analyzer = build_analyzer(*backend, &config())?;
            assert_eq!(analyzer.name(), backend.as_str());
            let count = analyzer.analyze(
                Path::new("/definitely/missing/image.png"),
                "Count the number of apples in this image. Return only the number.",
            );
            assert_eq!(count, ObservedCount::Unparseable);
        }
        Ok(())
    }
}
