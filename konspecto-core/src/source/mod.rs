mod error;
mod ytdlp;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

pub use error::{ResolveError, ResolveResult};
pub use ytdlp::YtDlpResolver;

pub const VIDEO_FILE_NAME: &str = "video.mp4";

const WATCH_HOSTS: [&str; 4] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];
const SHORT_HOST: &str = "youtu.be";
const PATH_PREFIXES: [&str; 4] = ["shorts", "embed", "live", "v"];

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid regex"))
}

/// A validated YouTube video locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    url: Url,
    video_id: String,
}

impl SourceReference {
    pub fn parse(input: &str) -> ResolveResult<Self> {
        let trimmed = input.trim();
        let url = Url::parse(trimmed)
            .map_err(|err| ResolveError::Malformed(format!("{trimmed}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ResolveError::Malformed(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ResolveError::Malformed(format!("{trimmed}: missing host")))?;

        let mut segments = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();
        let candidate = if host == SHORT_HOST {
            segments.next().map(str::to_string)
        } else if WATCH_HOSTS.contains(&host.as_str()) {
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(name, _)| name == "v")
                    .map(|(_, value)| value.into_owned()),
                Some(prefix) if PATH_PREFIXES.contains(&prefix) => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        } else {
            return Err(ResolveError::Malformed(format!(
                "{host} is not a YouTube host"
            )));
        };

        let video_id = candidate
            .filter(|id| video_id_pattern().is_match(id))
            .ok_or_else(|| ResolveError::Malformed(format!("{trimmed}: no valid video id")))?;
        Ok(Self { url, video_id })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn canonical_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub title: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Turns a locator into a local media file plus its title.
#[async_trait]
pub trait VideoResolver: Send + Sync {
    async fn download(
        &self,
        source: &SourceReference,
        dest_dir: &Path,
    ) -> ResolveResult<DownloadedVideo>;
}

/// Whitespace becomes `_`; anything other than word characters, `-` and `.`
/// is dropped.
pub fn sanitize_filename(name: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    let disallowed = DISALLOWED.get_or_init(|| Regex::new(r"[^\w\-.]").expect("valid regex"));
    let underscored = whitespace.replace_all(name, "_");
    disallowed.replace_all(&underscored, "").into_owned()
}
