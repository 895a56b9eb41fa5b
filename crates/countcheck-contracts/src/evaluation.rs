use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backends::EvaluationMode;

/// Integer form of [`ObservedCount::Unparseable`] in printed and serialized output.
pub const UNPARSEABLE_COUNT: i64 = -1;

/// What an analyzer saw: a count, or the sentinel for "could not tell".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ObservedCount {
    Detected(u32),
    Unparseable,
}

impl ObservedCount {
    /// Exact equality with the target. The sentinel never matches.
    pub fn matches(self, target: u32) -> bool {
        self == ObservedCount::Detected(target)
    }

    pub fn is_unparseable(self) -> bool {
        self == ObservedCount::Unparseable
    }

    pub fn as_i64(self) -> i64 {
        match self {
            ObservedCount::Detected(count) => i64::from(count),
            ObservedCount::Unparseable => UNPARSEABLE_COUNT,
        }
    }
}

impl From<ObservedCount> for i64 {
    fn from(count: ObservedCount) -> Self {
        count.as_i64()
    }
}

impl TryFrom<i64> for ObservedCount {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw == UNPARSEABLE_COUNT {
            return Ok(ObservedCount::Unparseable);
        }
        u32::try_from(raw)
            .map(ObservedCount::Detected)
            .map_err(|_| format!("count {raw} is out of range"))
    }
}

impl fmt::Display for ObservedCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Generate,
    Edit,
}

impl StepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Generate => "generate",
            StepAction::Edit => "edit",
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationStep {
    pub action: StepAction,
    pub count: ObservedCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub prompt: String,
    pub target_count: u32,
    pub mode: EvaluationMode,
    pub object_override: Option<String>,
}

impl EvaluationRequest {
    pub fn new(prompt: impl Into<String>, target_count: u32, mode: EvaluationMode) -> Self {
        Self {
            prompt: prompt.into(),
            target_count,
            mode,
            object_override: None,
        }
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object_override = Some(object.into());
        self
    }

    /// The object to count: a non-blank override, else the prompt's last token.
    pub fn target_object(&self) -> Option<&str> {
        self.object_override
            .as_deref()
            .map(str::trim)
            .filter(|object| !object.is_empty())
            .or_else(|| self.prompt.split_whitespace().last())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub image_path: PathBuf,
    pub target_count: u32,
    pub detected_count: ObservedCount,
    #[serde(rename = "match")]
    pub matched: bool,
    pub steps: Vec<EvaluationStep>,
}

impl EvaluationResult {
    pub fn new(
        image_path: PathBuf,
        target_count: u32,
        detected_count: ObservedCount,
        steps: Vec<EvaluationStep>,
    ) -> Self {
        Self {
            image_path,
            target_count,
            detected_count,
            matched: detected_count.matches(target_count),
            steps,
        }
    }

    pub fn edit_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.action == StepAction::Edit)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::{
        EvaluationRequest, EvaluationResult, EvaluationStep, ObservedCount, StepAction,
    };
    use crate::backends::EvaluationMode;

    #[test]
    fn sentinel_never_matches() {
        assert!(ObservedCount::Detected(3).matches(3));
        assert!(!ObservedCount::Detected(2).matches(3));
        assert!(!ObservedCount::Unparseable.matches(0));
        assert!(!ObservedCount::Unparseable.matches(u32::MAX));
    }

    #[test]
    fn counts_serialize_as_integers() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(ObservedCount::Detected(4))?, json!(4));
        assert_eq!(serde_json::to_value(ObservedCount::Unparseable)?, json!(-1));
        let parsed: ObservedCount = serde_json::from_value(json!(-1))?;
        assert_eq!(parsed, ObservedCount::Unparseable);
        assert!(serde_json::from_value::<ObservedCount>(json!(-5)).is_err());
        Ok(())
    }

    #[test]
    fn override_wins_over_prompt_token() {
        let request = EvaluationRequest::new("a bowl with 3 apples", 3, EvaluationMode::Direct);
        assert_eq!(request.target_object(), Some("apples"));
        assert_eq!(request.target_object(), Some("apples"));

        let request = request.with_object("pears");
        assert_eq!(request.target_object(), Some("pears"));
    }

    #[test]
    fn blank_override_falls_back_to_prompt() {
        let request = EvaluationRequest::new("3 apples", 3, EvaluationMode::Direct).with_object("  ");
        assert_eq!(request.target_object(), Some("apples"));
        let empty = EvaluationRequest::new("   ", 3, EvaluationMode::Direct);
        assert_eq!(empty.target_object(), None);
    }

    #[test]
    fn result_derives_match_and_serializes_steps() -> anyhow::Result<()> {
        let result = EvaluationResult::new(
            PathBuf::from("output/edited.png"),
            3,
            ObservedCount::Detected(3),
            vec![
                EvaluationStep {
                    action: StepAction::Generate,
                    count: ObservedCount::Unparseable,
                },
                EvaluationStep {
                    action: StepAction::Edit,
                    count: ObservedCount::Detected(3),
                },
            ],
        );
        assert!(result.matched);
        assert_eq!(result.edit_count(), 1);

        let value = serde_json::to_value(&result)?;
        assert_eq!(value["match"], json!(true));
        assert_eq!(value["steps"][0], json!({"action": "generate", "count": -1}));
        assert_eq!(value["steps"][1], json!({"action": "edit", "count": 3}));
        Ok(())
    }
}
