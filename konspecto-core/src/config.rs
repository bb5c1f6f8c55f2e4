use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct KonspectoConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub document: DocumentSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub download: DownloadSection,
}

impl KonspectoConfig {
    pub fn validate(&self) -> Result<()> {
        let threshold = self.extraction.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "extraction.similarity_threshold",
                reason: format!("{threshold} is outside [-1, 1]"),
            });
        }
        if !(self.extraction.sample_interval_seconds > 0.0) {
            return Err(ConfigError::Invalid {
                field: "extraction.sample_interval_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if !(self.document.image_width_inches > 0.0) {
            return Err(ConfigError::Invalid {
                field: "document.image_width_inches",
                reason: "must be greater than zero".into(),
            });
        }
        if self.store.retention_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "store.retention_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.store.key_prefix.is_empty() || self.store.key_prefix.contains(':') {
            return Err(ConfigError::Invalid {
                field: "store.key_prefix",
                reason: "must be non-empty and must not contain ':'".into(),
            });
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.store.retention_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsSection {
    pub work_dir: PathBuf,
    pub store_path: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        let base = std::env::temp_dir().join("konspecto");
        Self {
            work_dir: base.join("work"),
            store_path: base.join("data").join("artifacts.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    #[default]
    Ssim,
    MeanDifference,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub sample_interval_seconds: f64,
    pub similarity_threshold: f64,
    pub checker: CheckerKind,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 5.0,
            similarity_threshold: 0.98,
            checker: CheckerKind::Ssim,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DocumentSection {
    pub image_width_inches: f64,
}

impl Default for DocumentSection {
    fn default() -> Self {
        Self {
            image_width_inches: 6.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSection {
    pub key_prefix: String,
    pub retention_seconds: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            key_prefix: "docx".into(),
            retention_seconds: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadSection {
    pub yt_dlp_path: PathBuf,
    pub format: String,
    pub user_agent: String,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            format: "best[ext=mp4]/best".into(),
            user_agent: "Konspecto-Converter/1.0".into(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<KonspectoConfig> {
    let config: KonspectoConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/konspecto.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.extraction.checker, CheckerKind::Ssim);
        assert_eq!(config.store.key_prefix, "docx");
        assert_eq!(config.retention(), Duration::from_secs(86_400));
        assert!((config.extraction.similarity_threshold - 0.98).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: KonspectoConfig = toml::from_str(
            "[extraction]\nchecker = \"mean_difference\"\nsimilarity_threshold = 0.9\n",
        )
        .unwrap();
        assert_eq!(config.extraction.checker, CheckerKind::MeanDifference);
        assert_eq!(config.extraction.sample_interval_seconds, 5.0);
        assert_eq!(config.document.image_width_inches, 6.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = KonspectoConfig::default();
        config.extraction.similarity_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "extraction.similarity_threshold",
                ..
            }
        ));
    }

    #[test]
    fn rejects_prefix_with_separator() {
        let mut config = KonspectoConfig::default();
        config.store.key_prefix = "doc:x".into();
        assert!(config.validate().is_err());
    }
}
