//! Operator-facing names for run modes and backend selections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! named_choice {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let normalized = raw.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|choice| choice.as_str() == normalized)
                    .ok_or_else(|| {
                        let allowed = $name::ALL
                            .iter()
                            .map(|choice| choice.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("unknown {} '{}' (expected one of: {allowed})", $label, raw.trim())
                    })
            }
        }
    };
}

named_choice! {
    /// `direct` analyzes the first image only; `loop` edits until the count matches.
    EvaluationMode, "mode" {
        Direct => "direct",
        Loop => "loop",
    }
}

named_choice! {
    GeneratorBackend, "generator" {
        Gemini => "gemini",
        OpenAi => "openai",
        Fal => "fal",
        Dryrun => "dryrun",
    }
}

named_choice! {
    EditorBackend, "editor" {
        Gemini => "gemini",
        OpenAi => "openai",
        Fal => "fal",
        Dryrun => "dryrun",
        None => "none",
    }
}

named_choice! {
    AnalyzerBackend, "analyzer" {
        Qwen => "qwen",
        Gemini => "gemini",
        Dryrun => "dryrun",
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalyzerBackend, EditorBackend, EvaluationMode, GeneratorBackend};

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<GeneratorBackend>(), Ok(GeneratorBackend::OpenAi));
        assert_eq!(" loop ".parse::<EvaluationMode>(), Ok(EvaluationMode::Loop));
        assert_eq!("none".parse::<EditorBackend>(), Ok(EditorBackend::None));
    }

    #[test]
    fn unknown_choice_lists_allowed_values() {
        let err = "claude".parse::<AnalyzerBackend>().unwrap_err();
        assert_eq!(
            err,
            "unknown analyzer 'claude' (expected one of: qwen, gemini, dryrun)"
        );
    }

    #[test]
    fn display_matches_serialized_name() {
        for backend in GeneratorBackend::ALL {
            let serialized = serde_json::to_value(backend).unwrap();
            assert_eq!(serialized.as_str(), Some(backend.to_string().as_str()));
        }
    }
}
