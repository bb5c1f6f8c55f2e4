use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::ExtractionSection;

use super::error::{ExtractError, ExtractResult};
use super::{FrameSource, VideoDecoder};

/// Decodes video through the `ffprobe` and `ffmpeg` executables.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(section: &ExtractionSection) -> Self {
        Self::new(&section.ffmpeg_path, &section.ffprobe_path)
    }

    async fn probe(&self, path: &Path) -> ExtractResult<StreamInfo> {
        let mut command = Command::new(&self.ffprobe);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-select_streams")
            .arg("v:0")
            .arg(path);
        let output = command.output().await.map_err(|err| {
            ExtractError::Decoder(format!(
                "failed to run {}: {err}",
                self.ffprobe.display()
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Decoder(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        StreamInfo::from_probe(&parsed).ok_or_else(|| ExtractError::MissingVideoStream {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn open(&self, path: &Path) -> ExtractResult<Box<dyn FrameSource>> {
        let info = self.probe(path).await?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "probed video stream"
        );

        let mut command = Command::new(&self.ffmpeg);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-map")
            .arg("0:v:0")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("pipe:1");
        let mut child = command.spawn().map_err(|err| {
            ExtractError::Decoder(format!("failed to run {}: {err}", self.ffmpeg.display()))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Decoder("ffmpeg stdout not captured".into()))?;

        Ok(Box::new(FfmpegFrameSource {
            origin: path.to_path_buf(),
            info,
            child,
            stdout,
            finished: false,
        }))
    }
}

/// Raw RGB frames streamed from an `ffmpeg` child process.
#[derive(Debug)]
pub struct FfmpegFrameSource {
    origin: PathBuf,
    info: StreamInfo,
    child: Child,
    stdout: ChildStdout,
    finished: bool,
}

impl FfmpegFrameSource {
    async fn finish(&mut self) {
        self.finished = true;
        match self.child.wait().await {
            Ok(status) if !status.success() => {
                warn!(path = %self.origin.display(), %status, "ffmpeg exited with failure status");
            }
            Err(err) => {
                warn!(path = %self.origin.display(), error = %err, "failed to wait for ffmpeg");
            }
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn origin(&self) -> &Path {
        &self.origin
    }

    fn frame_rate(&self) -> Option<f64> {
        self.info.fps
    }

    async fn next_frame(&mut self) -> ExtractResult<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let mut buffer = vec![0u8; self.info.frame_len()];
        let mut filled = 0;
        while filled < buffer.len() {
            let read = self
                .stdout
                .read(&mut buffer[filled..])
                .await
                .map_err(|source| ExtractError::Io {
                    source,
                    path: self.origin.clone(),
                })?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled < buffer.len() {
            if filled > 0 {
                warn!(path = %self.origin.display(), bytes = filled, "dropping truncated trailing frame");
            }
            self.finish().await;
            return Ok(None);
        }
        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| ExtractError::Decoder("frame buffer does not match dimensions".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
    width: u32,
    height: u32,
    fps: Option<f64>,
}

impl StreamInfo {
    fn from_probe(data: &FfprobeOutput) -> Option<Self> {
        let stream = data
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))?;
        let width = stream.width.filter(|w| *w > 0)?;
        let height = stream.height.filter(|h| *h > 0)?;
        let fps = parse_rate(stream.avg_frame_rate.as_deref())
            .filter(|fps| *fps > 0.0)
            .or_else(|| parse_rate(stream.r_frame_rate.as_deref()).filter(|fps| *fps > 0.0));
        Some(Self { width, height, fps })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

fn parse_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if rate.contains('/') {
        let mut parts = rate.split('/');
        let numerator = parts.next()?.parse::<f64>().ok()?;
        let denominator = parts.next()?.parse::<f64>().ok()?;
        if denominator == 0.0 {
            return None;
        }
        Some(numerator / denominator)
    } else {
        rate.parse::<f64>().ok()
    }
}
