//! Runs one video locator through download, frame extraction, document
//! assembly and persistence, and hands back the key of the stored document.

mod error;
mod types;

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::KonspectoConfig;
use crate::document::DocumentAssembler;
use crate::extractor::{FfmpegDecoder, FrameExtractor, VideoDecoder};
use crate::similarity::build_checker;
use crate::source::{ResolveError, SourceReference, VideoResolver, YtDlpResolver};
use crate::store::{ArtifactStore, SqliteArtifactStore};

pub use error::{ConversionError, ConversionResult, FetchError, SetupError};
pub use types::{
    ArtifactKey, ConversionStage, ConverterSettings, DEFAULT_KEY_PREFIX, DEFAULT_RETENTION,
};

const WORK_DIR_PREFIX: &str = "konspecto-";
const FRAMES_DIR: &str = "frames";

#[derive(Clone)]
pub struct Converter {
    resolver: Arc<dyn VideoResolver>,
    decoder: Arc<dyn VideoDecoder>,
    extractor: FrameExtractor,
    assembler: DocumentAssembler,
    store: Arc<dyn ArtifactStore>,
    settings: ConverterSettings,
}

impl Converter {
    pub fn new(
        resolver: Arc<dyn VideoResolver>,
        decoder: Arc<dyn VideoDecoder>,
        extractor: FrameExtractor,
        assembler: DocumentAssembler,
        store: Arc<dyn ArtifactStore>,
        settings: ConverterSettings,
    ) -> Self {
        Self {
            resolver,
            decoder,
            extractor,
            assembler,
            store,
            settings,
        }
    }

    /// Wires the yt-dlp resolver, ffmpeg decoder and SQLite store described
    /// by `config`. The store schema is created eagerly.
    pub fn from_config(config: &KonspectoConfig) -> Result<Self, SetupError> {
        let resolver = YtDlpResolver::from_config(&config.download)?;
        let store = SqliteArtifactStore::new(&config.paths.store_path)?;
        store.initialize()?;
        let extractor = FrameExtractor::new(build_checker(&config.extraction))
            .with_sample_seconds(config.extraction.sample_interval_seconds);
        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(FfmpegDecoder::from_config(&config.extraction)),
            extractor,
            DocumentAssembler::from_config(&config.document),
            Arc::new(store),
            ConverterSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &ConverterSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Converts the video behind `url` into a stored DOCX.
    ///
    /// The per-run working directory is removed before this returns, whether
    /// the run succeeded or not.
    pub async fn convert(&self, url: &str) -> ConversionResult<ArtifactKey> {
        let source = SourceReference::parse(url).map_err(|err| {
            warn!(url, error = %err, "rejected video locator");
            ConversionError::InvalidSourceReference {
                reason: err.to_string(),
            }
        })?;
        info!(source = %source, stage = %ConversionStage::Init, "conversion started");

        let workspace = self.create_workspace().await?;
        let outcome = self.run(&source, workspace.path()).await;

        let work_dir = workspace.path().to_path_buf();
        if let Err(err) = workspace.close() {
            warn!(path = %work_dir.display(), error = %err, "failed to remove working directory");
        } else {
            debug!(path = %work_dir.display(), "working directory removed");
        }

        match &outcome {
            Ok(key) => info!(source = %source, key = %key, stage = %ConversionStage::Done, "conversion finished"),
            Err(err) => warn!(
                source = %source,
                failed_in = %err.stage(),
                stage = %ConversionStage::Failed,
                error = %err,
                "conversion failed"
            ),
        }
        outcome
    }

    /// Bytes stored under `key`, if it has not expired.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        match self.store.get(key).await? {
            Some(bytes) => {
                debug!(key, size_bytes = bytes.len(), "artifact fetched");
                Ok(bytes)
            }
            None => Err(FetchError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn create_workspace(&self) -> ConversionResult<TempDir> {
        let root = &self.settings.work_root;
        fs::create_dir_all(root).await.map_err(|err| {
            ConversionError::processing(
                ConversionStage::Downloading,
                format!("failed to create {}: {err}", root.display()),
            )
        })?;
        tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(root)
            .map_err(|err| {
                ConversionError::processing(
                    ConversionStage::Downloading,
                    format!("failed to create working directory in {}: {err}", root.display()),
                )
            })
    }

    async fn run(&self, source: &SourceReference, work_dir: &Path) -> ConversionResult<ArtifactKey> {
        enter(ConversionStage::Downloading, work_dir);
        let video = self
            .resolver
            .download(source, work_dir)
            .await
            .map_err(|err| match err {
                ResolveError::Malformed(reason) => {
                    ConversionError::InvalidSourceReference { reason }
                }
                ResolveError::AccessDenied(reason) => ConversionError::processing(
                    ConversionStage::Downloading,
                    format!("access denied: {reason}"),
                ),
                other => ConversionError::processing(ConversionStage::Downloading, other),
            })?;

        enter(ConversionStage::Extracting, work_dir);
        let frames_dir = work_dir.join(FRAMES_DIR);
        fs::create_dir_all(&frames_dir).await.map_err(|err| {
            ConversionError::processing(
                ConversionStage::Extracting,
                format!("failed to create {}: {err}", frames_dir.display()),
            )
        })?;
        let mut frames = self
            .decoder
            .open(&video.path)
            .await
            .map_err(|err| ConversionError::processing(ConversionStage::Extracting, err))?;
        let kept = self
            .extractor
            .extract(frames.as_mut(), &frames_dir)
            .await
            .map_err(|err| ConversionError::processing(ConversionStage::Extracting, err))?;
        drop(frames);

        enter(ConversionStage::Assembling, work_dir);
        let assembler = self.assembler.clone();
        let title = video.title;
        let artifact = task::spawn_blocking(move || assembler.assemble(&title, &kept))
            .await
            .map_err(|err| ConversionError::processing(ConversionStage::Assembling, err))?
            .map_err(|err| ConversionError::processing(ConversionStage::Assembling, err))?;

        enter(ConversionStage::Persisting, work_dir);
        let key = ArtifactKey::generate(&self.settings.key_prefix);
        match self
            .store
            .put(key.as_str(), &artifact.bytes, self.settings.retention)
            .await
        {
            Ok(true) => Ok(key),
            Ok(false) => Err(ConversionError::processing(
                ConversionStage::Persisting,
                format!("store did not acknowledge {key}"),
            )),
            Err(err) => Err(ConversionError::processing(ConversionStage::Persisting, err)),
        }
    }
}

fn enter(stage: ConversionStage, work_dir: &Path) {
    info!(stage = %stage, work_dir = %work_dir.display(), "conversion stage");
}
