use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Provenance = Map<String, Value>;

/// A stored image produced by a generate or edit call.
///
/// Fields are private: once an adapter hands the artifact back it is only
/// read, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageArtifact {
    path: PathBuf,
    #[serde(default)]
    provenance: Provenance,
}

impl ImageArtifact {
    pub fn new(path: impl Into<PathBuf>, backend: &str, model: &str) -> Self {
        let mut provenance = Provenance::new();
        provenance.insert("backend".to_string(), Value::String(backend.to_string()));
        provenance.insert("model".to_string(), Value::String(model.to_string()));
        Self {
            path: path.into(),
            provenance,
        }
    }

    pub fn with_provenance(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.provenance.insert(key.to_string(), value.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn backend(&self) -> Option<&str> {
        self.provenance.get("backend").and_then(Value::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.provenance.get("model").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ImageArtifact;

    #[test]
    fn new_records_backend_and_model() {
        let artifact = ImageArtifact::new("out/generated.png", "openai", "gpt-image-1")
            .with_provenance("sha256", "abc123");
        assert_eq!(artifact.backend(), Some("openai"));
        assert_eq!(artifact.model(), Some("gpt-image-1"));
        assert_eq!(artifact.provenance()["sha256"], json!("abc123"));
        assert_eq!(artifact.path().to_string_lossy(), "out/generated.png");
    }
}
