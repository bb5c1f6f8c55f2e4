use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::config::KonspectoConfig;

pub const DEFAULT_KEY_PREFIX: &str = "docx";
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(86_400);

/// Opaque handle of a stored document, `"<prefix>:<uuid>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStage {
    Init,
    Downloading,
    Extracting,
    Assembling,
    Persisting,
    Done,
    Failed,
}

impl ConversionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStage::Init => "init",
            ConversionStage::Downloading => "downloading",
            ConversionStage::Extracting => "extracting",
            ConversionStage::Assembling => "assembling",
            ConversionStage::Persisting => "persisting",
            ConversionStage::Done => "done",
            ConversionStage::Failed => "failed",
        }
    }
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConverterSettings {
    /// Parent of the per-run working directories.
    pub work_root: PathBuf,
    pub retention: Duration,
    pub key_prefix: String,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("konspecto").join("work"),
            retention: DEFAULT_RETENTION,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl ConverterSettings {
    pub fn from_config(config: &KonspectoConfig) -> Self {
        Self {
            work_root: config.paths.work_dir.clone(),
            retention: config.retention(),
            key_prefix: config.store.key_prefix.clone(),
        }
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn generated_keys_are_prefixed_uuids() {
        let pattern = Regex::new(r"^docx:[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .unwrap();
        let first = ArtifactKey::generate("docx");
        let second = ArtifactKey::generate("docx");
        assert!(pattern.is_match(first.as_str()), "{first}");
        assert_ne!(first, second);
        assert_eq!(serde_json::to_string(&first).unwrap(), format!("\"{first}\""));
    }

    #[test]
    fn settings_follow_configuration() {
        let mut config = KonspectoConfig::default();
        config.store.key_prefix = "notes".into();
        config.store.retention_seconds = 60;
        let settings = ConverterSettings::from_config(&config);
        assert_eq!(settings.key_prefix, "notes");
        assert_eq!(settings.retention, Duration::from_secs(60));
        assert_eq!(ConversionStage::Persisting.to_string(), "persisting");
    }
}
