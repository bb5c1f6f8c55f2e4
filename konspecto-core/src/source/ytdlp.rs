use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DownloadSection;

use super::error::{ResolveError, ResolveResult};
use super::{DownloadedVideo, SourceReference, VideoResolver, VIDEO_FILE_NAME};

const ACCESS_DENIED_MARKERS: [&str; 11] = [
    "private video",
    "sign in",
    "members-only",
    "confirm your age",
    "not available in your country",
    "video unavailable",
    "copyright",
    "blocked it",
    "forbidden",
    "http error 403",
    "http error 401",
];
const MALFORMED_MARKERS: [&str; 3] = [
    "unsupported url",
    "incomplete youtube id",
    "is not a valid url",
];

/// Resolves locators with `yt-dlp` and downloads the chosen stream over HTTP.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    yt_dlp: PathBuf,
    format: String,
    http_client: Client,
}

impl YtDlpResolver {
    pub fn new(
        yt_dlp: impl Into<PathBuf>,
        format: impl Into<String>,
        user_agent: &str,
    ) -> ResolveResult<Self> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| ResolveError::Network(err.to_string()))?;
        Ok(Self {
            yt_dlp: yt_dlp.into(),
            format: format.into(),
            http_client,
        })
    }

    pub fn from_config(section: &DownloadSection) -> ResolveResult<Self> {
        Self::new(&section.yt_dlp_path, &section.format, &section.user_agent)
    }

    async fn resolve_metadata(&self, source: &SourceReference) -> ResolveResult<MediaInfo> {
        let mut command = Command::new(&self.yt_dlp);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("-f")
            .arg(&self.format)
            .arg(source.canonical_url());
        let output = command.output().await.map_err(|err| {
            ResolveError::Tool(format!("failed to run {}: {err}", self.yt_dlp.display()))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(source = %source, status = %output.status, "yt-dlp rejected the video");
            return Err(classify_failure(stderr.trim()));
        }
        let info: MediaInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info)
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        path: &Path,
    ) -> ResolveResult<u64> {
        let response = self
            .http_client
            .get(url)
            .headers(forwarded_headers(headers))
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(path)
            .await
            .map_err(|source| ResolveError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| ResolveError::Io {
                    source,
                    path: path.to_path_buf(),
                })?;
            written += data.len() as u64;
        }
        file.flush().await.map_err(|source| ResolveError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(written)
    }
}

#[async_trait]
impl VideoResolver for YtDlpResolver {
    async fn download(
        &self,
        source: &SourceReference,
        dest_dir: &Path,
    ) -> ResolveResult<DownloadedVideo> {
        let info = self.resolve_metadata(source).await?;
        let media_url = info
            .media_url()
            .ok_or_else(|| ResolveError::NoStream(source.to_string()))?
            .to_string();
        let title = info.title.clone().unwrap_or_default();
        debug!(video_id = source.video_id(), title = %title, "resolved video metadata");

        fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| ResolveError::Io {
                source,
                path: dest_dir.to_path_buf(),
            })?;
        let path = dest_dir.join(VIDEO_FILE_NAME);
        let size_bytes = self
            .fetch_to_file(&media_url, &info.http_headers, &path)
            .await?;
        info!(
            video_id = source.video_id(),
            size_bytes,
            path = %path.display(),
            "video downloaded"
        );
        Ok(DownloadedVideo {
            title,
            path,
            size_bytes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    #[serde(default)]
    url: Option<String>,
}

impl MediaInfo {
    fn media_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or_else(|| {
                self.requested_downloads
                    .iter()
                    .find_map(|download| download.url.as_deref())
            })
            .filter(|url| !url.is_empty())
    }
}

fn forwarded_headers(headers: &HashMap<String, String>) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}

fn classify_failure(stderr: &str) -> ResolveError {
    let lowered = stderr.to_ascii_lowercase();
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("yt-dlp exited without output")
        .trim()
        .to_string();
    if MALFORMED_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        ResolveError::Malformed(message)
    } else if ACCESS_DENIED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        ResolveError::AccessDenied(message)
    } else {
        ResolveError::Tool(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    #[test]
    fn classifies_yt_dlp_failures() {
        assert!(matches!(
            classify_failure("ERROR: [youtube] abc: Private video. Sign in if you've been granted access"),
            ResolveError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_failure(
                "ERROR: [youtube] dQw4w9WgXcQ: Video unavailable. This video contains content from SME, who has blocked it on copyright grounds"
            ),
            ResolveError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: unable to download video data: HTTP Error 410: Forbidden"),
            ResolveError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Unsupported URL: https://example.com"),
            ResolveError::Malformed(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: unable to extract player response"),
            ResolveError::Tool(_)
        ));
        match classify_failure("") {
            ResolveError::Tool(message) => assert_eq!(message, "yt-dlp exited without output"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn media_url_falls_back_to_requested_downloads() {
        let payload = r#"{"title":"Talk","requested_downloads":[{"url":"https://cdn/v.mp4"}],
            "http_headers":{"User-Agent":"x","Bad Header":"y"}}"#;
        let info: MediaInfo = serde_json::from_str(payload).unwrap();
        assert_eq!(info.media_url(), Some("https://cdn/v.mp4"));
        let headers = forwarded_headers(&info.http_headers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("user-agent").unwrap(), "x");
    }

    #[test]
    fn empty_metadata_has_no_stream() {
        let info: MediaInfo = serde_json::from_str(r#"{"url":""}"#).unwrap();
        assert_eq!(info.media_url(), None);
        assert_eq!(info.title, None);
    }

    /// Answers a single HTTP request with `response` and hands back the
    /// lowercased request head.
    async fn serve_once(response: &'static [u8]) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/videoplayback", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_ascii_lowercase()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn streams_media_over_http_with_forwarded_headers() {
        let (url, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 10\r\nConnection: close\r\n\r\nfake video",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(VIDEO_FILE_NAME);
        let resolver = YtDlpResolver::from_config(&DownloadSection::default()).unwrap();
        let headers = HashMap::from([("X-Playback-Session".to_string(), "abc123".to_string())]);

        let written = resolver.fetch_to_file(&url, &headers, &target).await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&target).unwrap(), b"fake video");

        let request = server.await.unwrap();
        assert!(request.starts_with("get /videoplayback http/1.1"));
        assert!(request.contains("x-playback-session: abc123"));
    }

    #[tokio::test]
    async fn forbidden_stream_is_access_denied() {
        let (url, server) = serve_once(
            b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = YtDlpResolver::from_config(&DownloadSection::default()).unwrap();

        let err = resolver
            .fetch_to_file(&url, &HashMap::new(), &dir.path().join(VIDEO_FILE_NAME))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::AccessDenied(_)), "{err:?}");
        server.await.unwrap();
    }
}
