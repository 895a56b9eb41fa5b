use std::path::Path;

use serde_json::{Map, Value};

use crate::evaluation::EvaluationResult;
use crate::events::now_utc_iso;

/// Writes the pretty-printed result of one evaluation run.
///
/// `extra` keys (run id, prompt, backends) are merged after the result
/// fields and win on collision.
pub fn write_evaluation_summary(
    path: &Path,
    result: &EvaluationResult,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(result)? {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    payload.insert(
        "edits".to_string(),
        Value::Number(result.edit_count().into()),
    );
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Map, Value};

    use super::write_evaluation_summary;
    use crate::evaluation::{EvaluationResult, EvaluationStep, ObservedCount, StepAction};

    #[test]
    fn summary_contains_result_and_extra_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("evaluation.json");
        let result = EvaluationResult::new(
            PathBuf::from("output/generated.png"),
            3,
            ObservedCount::Detected(2),
            vec![EvaluationStep {
                action: StepAction::Generate,
                count: ObservedCount::Detected(2),
            }],
        );
        let mut extra = Map::new();
        extra.insert("run_id".to_string(), json!("run-1"));
        extra.insert("mode".to_string(), json!("direct"));
        write_evaluation_summary(&path, &result, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["target_count"], json!(3));
        assert_eq!(parsed["detected_count"], json!(2));
        assert_eq!(parsed["match"], json!(false));
        assert_eq!(parsed["edits"], json!(0));
        assert_eq!(parsed["run_id"], json!("run-1"));
        assert_eq!(parsed["image_path"], json!("output/generated.png"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
