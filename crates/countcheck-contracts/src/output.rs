use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use uuid::Uuid;

/// Allocates unique file names inside the run's output directory.
///
/// Names follow `{prefix}_{YYYYmmdd_HHMMSS}_{8 hex}.{ext}` so repeated runs
/// never overwrite earlier images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    dir: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn allocate(&self, prefix: &str, extension: &str) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let unique = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}_{}_{}.{}",
            sanitize_prefix(prefix),
            stamp,
            &unique[..8],
            extension.trim_start_matches('.')
        );
        Ok(self.dir.join(file_name))
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::OutputPaths;

    #[test]
    fn allocate_creates_dir_and_unique_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = OutputPaths::new(temp.path().join("output"));

        let first = output.allocate("generated_openai", "png")?;
        let second = output.allocate("generated_openai", "png")?;

        assert!(output.dir().is_dir());
        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(output.dir()));

        let name = first.file_name().and_then(|name| name.to_str()).unwrap_or("");
        let parts: Vec<&str> = name.trim_end_matches(".png").split('_').collect();
        assert_eq!(parts[0], "generated");
        assert_eq!(parts[1], "openai");
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3].len(), 6);
        assert_eq!(parts[4].len(), 8);
        assert!(name.ends_with(".png"));
        Ok(())
    }

    #[test]
    fn prefix_is_made_filename_safe() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = OutputPaths::new(temp.path());
        let path = output.allocate("generated_fal-ai/recraft v3", ".jpg")?;
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        assert!(name.starts_with("generated_fal-ai_recraft_v3_"));
        assert!(name.ends_with(".jpg"));
        Ok(())
    }
}
