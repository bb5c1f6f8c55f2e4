mod error;
mod ffmpeg;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use tokio::fs;
use tokio::task;
use tracing::{debug, info, warn};

use crate::similarity::DifferenceChecker;

pub use error::{ExtractError, ExtractResult};
pub use ffmpeg::{FfmpegDecoder, FfmpegFrameSource};

pub const DEFAULT_SAMPLE_SECONDS: f64 = 5.0;

/// A sequential stream of decoded RGB frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Path of the media the frames come from.
    fn origin(&self) -> &Path;

    /// Frames per second, when the container reports one.
    fn frame_rate(&self) -> Option<f64>;

    async fn next_frame(&mut self) -> ExtractResult<Option<RgbImage>>;
}

#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn open(&self, path: &Path) -> ExtractResult<Box<dyn FrameSource>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeptFrame {
    pub index: u64,
    pub timestamp: Duration,
    pub path: PathBuf,
}

/// Number of raw frames between two samples. Never zero.
pub fn frame_interval(fps: f64, sample_seconds: f64) -> u64 {
    ((fps * sample_seconds) as u64).max(1)
}

#[derive(Debug, Clone)]
pub struct FrameExtractor {
    checker: Arc<dyn DifferenceChecker>,
    sample_seconds: f64,
}

impl FrameExtractor {
    pub fn new(checker: Arc<dyn DifferenceChecker>) -> Self {
        Self {
            checker,
            sample_seconds: DEFAULT_SAMPLE_SECONDS,
        }
    }

    pub fn with_sample_seconds(mut self, seconds: f64) -> Self {
        self.sample_seconds = seconds;
        self
    }

    pub fn checker(&self) -> &Arc<dyn DifferenceChecker> {
        &self.checker
    }

    /// Samples `source` and writes the surviving frames into `out_dir` as
    /// `frame_<index>.png`. Discarded samples leave no file behind.
    pub async fn extract(
        &self,
        source: &mut dyn FrameSource,
        out_dir: &Path,
    ) -> ExtractResult<Vec<KeptFrame>> {
        let origin = source.origin().to_path_buf();
        let fps = match source.frame_rate() {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            _ => {
                warn!(path = %origin.display(), "video frame rate is unknown");
                return Err(ExtractError::FrameRateUnavailable { path: origin });
            }
        };
        let interval = frame_interval(fps, self.sample_seconds);
        debug!(fps, interval, "sampling video frames");

        let mut kept: Vec<KeptFrame> = Vec::new();
        let mut index = 0u64;
        while let Some(frame) = source.next_frame().await? {
            if index % interval == 0 {
                let path = out_dir.join(format!("frame_{index}.png"));
                save_frame(frame, path.clone()).await?;
                info!(index, path = %path.display(), "extracted frame");

                let keep = match kept.last() {
                    None => true,
                    Some(previous) => self.differs(&previous.path, &path).await,
                };
                if keep {
                    kept.push(KeptFrame {
                        index,
                        timestamp: Duration::try_from_secs_f64(index as f64 / fps)
                            .unwrap_or(Duration::MAX),
                        path,
                    });
                } else {
                    debug!(index, "frame similar to previous, discarded");
                    fs::remove_file(&path)
                        .await
                        .map_err(|source| ExtractError::Io { source, path })?;
                }
            }
            index += 1;
        }

        info!(decoded = index, kept = kept.len(), "frame extraction finished");
        if kept.is_empty() {
            return Err(ExtractError::NoFrames { path: origin });
        }
        Ok(kept)
    }

    /// Comparison failures count as "different" so content is never lost.
    async fn differs(&self, reference: &Path, candidate: &Path) -> bool {
        let checker = Arc::clone(&self.checker);
        let reference_path = reference.to_path_buf();
        let candidate_path = candidate.to_path_buf();
        let outcome =
            task::spawn_blocking(move || checker.compare(&reference_path, &candidate_path)).await;
        match outcome {
            Ok(Ok(comparison)) => comparison.is_different(),
            Ok(Err(err)) => {
                warn!(candidate = %candidate.display(), error = %err, "frame comparison failed, keeping frame");
                true
            }
            Err(err) => {
                warn!(candidate = %candidate.display(), error = %err, "frame comparison panicked, keeping frame");
                true
            }
        }
    }
}

async fn save_frame(frame: RgbImage, path: PathBuf) -> ExtractResult<()> {
    task::spawn_blocking(move || {
        frame
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| ExtractError::Encode { source, path })
    })
    .await?
}
