pub mod config;
pub mod count;
pub mod evaluator;
mod http;
pub mod ports;
pub mod providers;
mod vision;

pub use config::BackendConfig;
pub use count::parse_count;
pub use evaluator::{count_instruction, edit_instruction, EvaluationLoop, DEFAULT_MAX_RETRIES};
pub use ports::{Analyzer, Editor, Generator};
pub use providers::{build_analyzer, build_editor, build_generator, EditorSelection};
