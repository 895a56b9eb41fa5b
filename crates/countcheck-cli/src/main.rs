use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use countcheck_contracts::backends::{
    AnalyzerBackend, EditorBackend, EvaluationMode, GeneratorBackend,
};
use countcheck_contracts::evaluation::{EvaluationRequest, EvaluationResult};
use countcheck_contracts::events::{new_run_id, EventPayload, EventWriter};
use countcheck_contracts::output::OutputPaths;
use countcheck_contracts::summary::write_evaluation_summary;
use countcheck_engine::{
    build_analyzer, build_editor, build_generator, BackendConfig, EvaluationLoop,
    DEFAULT_MAX_RETRIES,
};
use serde_json::{json, Map, Value};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "countcheck",
    version,
    about = "Generate an image and check that it shows the requested number of objects"
)]
struct Cli {
    /// Prompt sent to the image generator.
    #[arg(long)]
    prompt: String,
    /// Number of objects the final image should contain.
    #[arg(long)]
    count: u32,
    /// Object to count; defaults to the last word of the prompt.
    #[arg(long)]
    object: Option<String>,
    /// gemini | openai | fal | dryrun
    #[arg(long, default_value_t = GeneratorBackend::Gemini)]
    generator: GeneratorBackend,
    /// gemini | openai | fal | dryrun | none (only used in loop mode)
    #[arg(long, default_value_t = EditorBackend::OpenAi)]
    editor: EditorBackend,
    /// qwen | gemini | dryrun
    #[arg(long, default_value_t = AnalyzerBackend::Qwen)]
    analyzer: AnalyzerBackend,
    /// direct | loop
    #[arg(long, default_value_t = EvaluationMode::Direct)]
    mode: EvaluationMode,
    /// Maximum number of edits in loop mode.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    /// Directory for generated images and run summaries.
    #[arg(long, default_value = "output")]
    out: PathBuf,
    /// Event log path (defaults to <out>/events.jsonl).
    #[arg(long)]
    events: Option<PathBuf>,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("countcheck error: {err:#}");
        eprintln!("\nfailure trace:\n{err:?}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(args: Cli) -> Result<()> {
    let output = OutputPaths::new(&args.out);
    let config = BackendConfig::from_env(output.clone());
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::open(&events_path, new_run_id())?;

    let generator = build_generator(args.generator, &config)?;
    let analyzer = build_analyzer(args.analyzer, &config)?;
    let mut evaluation = EvaluationLoop::new(generator, analyzer, events.clone())
        .with_max_retries(args.max_retries);

    let mut editor_name: Option<String> = None;
    if args.mode == EvaluationMode::Loop {
        let selection = build_editor(args.editor, &config)?;
        editor_name = selection.editor_name().map(str::to_string);
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!("{reason}");
            let mut payload = EventPayload::new();
            payload.insert("requested".to_string(), json!(selection.requested));
            payload.insert("used".to_string(), json!(editor_name));
            payload.insert("reason".to_string(), json!(reason));
            events.emit("editor_fallback", payload)?;
        }
        if let Some(editor) = selection.editor {
            evaluation = evaluation.with_editor(editor);
        }
    }

    let mut request = EvaluationRequest::new(args.prompt.clone(), args.count, args.mode);
    if let Some(object) = args.object.clone() {
        request = request.with_object(object);
    }
    let result = evaluation.run(&request)?;

    let summary_path = output.allocate("evaluation", "json")?;
    let extra = summary_extra(&args, events.run_id(), editor_name.as_deref());
    write_evaluation_summary(&summary_path, &result, Some(&extra))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", format_result(&result));
        println!("Summary: {}", summary_path.display());
        println!("Events: {}", events.path().display());
    }
    Ok(())
}

fn summary_extra(args: &Cli, run_id: &str, editor: Option<&str>) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("run_id".to_string(), json!(run_id));
    extra.insert("prompt".to_string(), json!(args.prompt));
    extra.insert("object".to_string(), json!(args.object));
    extra.insert("mode".to_string(), json!(args.mode));
    extra.insert("generator".to_string(), json!(args.generator));
    extra.insert("editor".to_string(), json!(editor));
    extra.insert("analyzer".to_string(), json!(args.analyzer));
    extra.insert("max_retries".to_string(), json!(args.max_retries));
    extra
}

fn format_result(result: &EvaluationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n--- Result ---");
    let _ = writeln!(out, "Target Count: {}", result.target_count);
    let detected = if result.detected_count.is_unparseable() {
        format!("{} (unparseable)", result.detected_count)
    } else {
        result.detected_count.to_string()
    };
    let _ = writeln!(out, "Detected Count: {detected}");
    let _ = writeln!(out, "Match: {}", result.matched);
    let _ = writeln!(out, "Final Image: {}", result.image_path.display());
    let _ = writeln!(out, "Steps:");
    for step in &result.steps {
        let _ = writeln!(out, "  - {}: {}", step.action, step.count);
    }
    out
}
