use std::path::Path;

use anyhow::{bail, Result};
use countcheck_contracts::artifacts::ImageArtifact;
use countcheck_contracts::backends::EvaluationMode;
use countcheck_contracts::evaluation::{
    EvaluationRequest, EvaluationResult, EvaluationStep, ObservedCount, StepAction,
};
use countcheck_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::ports::{Analyzer, Editor, Generator};

pub const DEFAULT_MAX_RETRIES: u32 = 2;

pub fn count_instruction(object: &str) -> String {
    format!("Count the number of {object} in this image. Return only the number.")
}

pub fn edit_instruction(target_count: u32, object: &str) -> String {
    format!("Make sure there are exactly {target_count} {object} in the image.")
}

/// Drives generate → analyze → (edit → analyze)* for one prompt.
///
/// The retry budget bounds edits, not analyses; every successful edit is
/// followed by exactly one analysis. Generation failures propagate, edit
/// failures stop the loop and keep the last good image.
pub struct EvaluationLoop {
    generator: Box<dyn Generator>,
    analyzer: Box<dyn Analyzer>,
    editor: Option<Box<dyn Editor>>,
    max_retries: u32,
    events: EventWriter,
}

impl EvaluationLoop {
    pub fn new(
        generator: Box<dyn Generator>,
        analyzer: Box<dyn Analyzer>,
        events: EventWriter,
    ) -> Self {
        Self {
            generator,
            analyzer,
            editor: None,
            max_retries: DEFAULT_MAX_RETRIES,
            events,
        }
    }

    pub fn with_editor(mut self, editor: Box<dyn Editor>) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn run(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
        let Some(object) = request.target_object().map(str::to_string) else {
            bail!("cannot tell what to count: prompt is empty and no object name was given");
        };
        let target = request.target_count;
        let analysis_prompt = count_instruction(&object);

        info!(
            mode = %request.mode,
            target_count = target,
            object = %object,
            generator = self.generator.name(),
            analyzer = self.analyzer.name(),
            "starting evaluation"
        );
        self.emit(
            "evaluation_started",
            json!({
                "prompt": request.prompt,
                "target_count": target,
                "object": object,
                "mode": request.mode,
                "generator": self.generator.name(),
                "analyzer": self.analyzer.name(),
                "editor": self.editor.as_ref().map(|editor| editor.name().to_string()),
                "max_retries": self.max_retries,
            }),
        )?;

        let mut current = match self.generator.generate(&request.prompt) {
            Ok(artifact) => artifact,
            Err(err) => {
                let err = anyhow::Error::new(err);
                self.emit(
                    "generation_failed",
                    json!({
                        "generator": self.generator.name(),
                        "error": format!("{err:#}"),
                    }),
                )?;
                return Err(err);
            }
        };
        info!(path = %current.path().display(), "image generated");
        self.emit_artifact("image_generated", &current)?;

        let mut count = self.analyze(current.path(), &analysis_prompt, StepAction::Generate)?;
        let mut steps = vec![EvaluationStep {
            action: StepAction::Generate,
            count,
        }];

        if request.mode == EvaluationMode::Loop {
            let mut retries_used = 0;
            while !count.matches(target) && retries_used < self.max_retries {
                let Some(editor) = self.editor.as_deref() else {
                    warn!("count mismatch but no editor is configured, stopping");
                    self.emit(
                        "edit_skipped",
                        json!({ "reason": "no editor configured", "detected_count": count }),
                    )?;
                    break;
                };

                let attempt = retries_used + 1;
                info!(
                    detected = %count,
                    target_count = target,
                    attempt,
                    max_retries = self.max_retries,
                    "count mismatch, attempting edit"
                );
                self.emit(
                    "edit_started",
                    json!({
                        "editor": editor.name(),
                        "attempt": attempt,
                        "max_retries": self.max_retries,
                        "detected_count": count,
                        "source": current.path().to_string_lossy(),
                    }),
                )?;

                let instruction = edit_instruction(target, &object);
                let edited = match editor.edit(current.path(), &instruction) {
                    Ok(artifact) => artifact,
                    Err(err) => {
                        let err = anyhow::Error::new(err);
                        warn!(
                            error = %format!("{err:#}"),
                            "edit failed, keeping last good image"
                        );
                        self.emit(
                            "edit_failed",
                            json!({
                                "editor": editor.name(),
                                "attempt": attempt,
                                "error": format!("{err:#}"),
                                "kept_image": current.path().to_string_lossy(),
                            }),
                        )?;
                        break;
                    }
                };
                self.emit_artifact("image_edited", &edited)?;
                current = edited;

                count = self.analyze(current.path(), &analysis_prompt, StepAction::Edit)?;
                steps.push(EvaluationStep {
                    action: StepAction::Edit,
                    count,
                });
                retries_used += 1;
            }
        }

        let result = EvaluationResult::new(current.path().to_path_buf(), target, count, steps);
        info!(
            matched = result.matched,
            detected = %result.detected_count,
            steps = result.steps.len(),
            "evaluation finished"
        );
        self.emit(
            "evaluation_finished",
            json!({
                "image_path": result.image_path.to_string_lossy(),
                "target_count": result.target_count,
                "detected_count": result.detected_count,
                "match": result.matched,
                "steps": result.steps,
            }),
        )?;
        Ok(result)
    }

    fn analyze(&self, image: &Path, instruction: &str, after: StepAction) -> Result<ObservedCount> {
        let count = self.analyzer.analyze(image, instruction);
        if count.is_unparseable() {
            warn!(path = %image.display(), "analyzer could not determine a count");
        } else {
            info!(count = %count, "analysis complete");
        }
        self.emit(
            "analysis_completed",
            json!({
                "analyzer": self.analyzer.name(),
                "after": after,
                "image_path": image.to_string_lossy(),
                "count": count,
                "unparseable": count.is_unparseable(),
            }),
        )?;
        Ok(count)
    }

    fn emit_artifact(&self, event_type: &str, artifact: &ImageArtifact) -> Result<()> {
        self.emit(
            event_type,
            json!({
                "image_path": artifact.path().to_string_lossy(),
                "provenance": artifact.provenance(),
            }),
        )
    }

    fn emit(&self, event_type: &str, payload: Value) -> Result<()> {
        let payload = match payload {
            Value::Object(object) => object,
            other => {
                let mut wrapped = EventPayload::new();
                wrapped.insert("payload".to_string(), other);
                wrapped
            }
        };
        self.events.emit(event_type, payload)?;
        Ok(())
    }
}
