use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{GrayImage, Rgb, RgbImage};
use regex::Regex;
use tempfile::TempDir;
use zip::ZipArchive;

use konspecto_core::similarity::SimilarityResult;
use konspecto_core::{
    ArtifactStore, Comparison, ConversionError, ConversionStage, Converter, ConverterSettings,
    DifferenceChecker, DocumentAssembler, DownloadedVideo, ExtractError, ExtractResult,
    FetchError, FrameExtractor, FrameSource, MemoryArtifactStore, ResolveError, ResolveResult,
    SourceReference, SsimChecker, StoreError, StoreResult, VideoDecoder, VideoResolver,
};

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResolverMode {
    Succeed,
    Deny,
    Reject,
    Break,
}

struct StubResolver {
    mode: ResolverMode,
    seen: Mutex<Vec<PathBuf>>,
}

impl StubResolver {
    fn new(mode: ResolverMode) -> Self {
        Self {
            mode,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn work_dirs(&self) -> Vec<PathBuf> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoResolver for StubResolver {
    async fn download(
        &self,
        source: &SourceReference,
        dest_dir: &Path,
    ) -> ResolveResult<DownloadedVideo> {
        self.seen.lock().unwrap().push(dest_dir.to_path_buf());
        match self.mode {
            ResolverMode::Deny => return Err(ResolveError::AccessDenied("Private video".into())),
            ResolverMode::Reject => return Err(ResolveError::Malformed("Unsupported URL".into())),
            ResolverMode::Break => return Err(ResolveError::Network("connection reset".into())),
            ResolverMode::Succeed => {}
        }
        let path = dest_dir.join("video.mp4");
        std::fs::write(&path, source.video_id()).unwrap();
        Ok(DownloadedVideo {
            title: "Lecture 1: Ownership".into(),
            path,
            size_bytes: 11,
        })
    }
}

struct ScriptedSource {
    origin: PathBuf,
    fps: Option<f64>,
    frames: VecDeque<RgbImage>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn origin(&self) -> &Path {
        &self.origin
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    async fn next_frame(&mut self) -> ExtractResult<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

struct StubDecoder {
    fps: Option<f64>,
    frames: Vec<RgbImage>,
}

#[async_trait]
impl VideoDecoder for StubDecoder {
    async fn open(&self, path: &Path) -> ExtractResult<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(ExtractError::Decoder(format!("{} missing", path.display())));
        }
        Ok(Box::new(ScriptedSource {
            origin: path.to_path_buf(),
            fps: self.fps,
            frames: self.frames.clone().into(),
        }))
    }
}

#[derive(Default)]
struct CountingStore {
    inner: MemoryArtifactStore,
    puts: AtomicUsize,
    refuse: bool,
}

impl CountingStore {
    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for CountingStore {
    async fn put(&self, key: &str, bytes: &[u8], ttl: Duration) -> StoreResult<bool> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Ok(false);
        }
        self.inner.put(key, bytes, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.inner.purge_expired().await
    }
}

struct UnavailableStore;

#[async_trait]
impl ArtifactStore for UnavailableStore {
    async fn put(&self, _: &str, _: &[u8], _: Duration) -> StoreResult<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn get(&self, _: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn exists(&self, _: &str) -> StoreResult<bool> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Reports every pair as different and removes the reference frame, so
/// document assembly later finds a kept frame missing.
#[derive(Debug)]
struct VanishingChecker;

impl DifferenceChecker for VanishingChecker {
    fn name(&self) -> &'static str {
        "vanishing"
    }

    fn threshold(&self) -> f64 {
        0.98
    }

    fn score(&self, _: &GrayImage, _: &GrayImage) -> SimilarityResult<f64> {
        Ok(0.0)
    }

    fn compare(&self, reference: &Path, _: &Path) -> SimilarityResult<Comparison> {
        let _ = std::fs::remove_file(reference);
        Ok(Comparison {
            score: 0.0,
            threshold: self.threshold(),
        })
    }
}

/// SSIM that remembers each sampled candidate and how many frame files sat
/// in its directory when it was compared.
#[derive(Debug, Default)]
struct RecordingChecker {
    inner: SsimChecker,
    seen: Mutex<Vec<(String, usize)>>,
}

impl RecordingChecker {
    fn seen(&self) -> Vec<(String, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

impl DifferenceChecker for RecordingChecker {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn threshold(&self) -> f64 {
        self.inner.threshold()
    }

    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> SimilarityResult<f64> {
        self.inner.score(reference, candidate)
    }

    fn compare(&self, reference: &Path, candidate: &Path) -> SimilarityResult<Comparison> {
        let name = candidate.file_name().unwrap().to_string_lossy().into_owned();
        let files = std::fs::read_dir(candidate.parent().unwrap()).unwrap().count();
        self.seen.lock().unwrap().push((name, files));
        self.inner.compare(reference, candidate)
    }
}

fn slide(stripe: u32) -> RgbImage {
    RgbImage::from_fn(48, 27, |x, y| {
        if ((x + y) / stripe) % 2 == 0 {
            Rgb([250, 250, 245])
        } else {
            Rgb([20, 40, 90])
        }
    })
}

/// Twenty seconds at 30 fps with a scene change at twelve seconds.
fn lecture_frames() -> Vec<RgbImage> {
    let first = slide(3);
    let second = slide(9);
    (0..600)
        .map(|i| if i < 360 { first.clone() } else { second.clone() })
        .collect()
}

struct Harness {
    root: TempDir,
    resolver: Arc<StubResolver>,
}

impl Harness {
    fn new(mode: ResolverMode) -> Self {
        Self {
            root: TempDir::new().unwrap(),
            resolver: Arc::new(StubResolver::new(mode)),
        }
    }

    fn work_root(&self) -> PathBuf {
        self.root.path().join("work")
    }

    fn converter(
        &self,
        decoder: StubDecoder,
        checker: Arc<dyn DifferenceChecker>,
        store: Arc<dyn ArtifactStore>,
    ) -> Converter {
        let settings = ConverterSettings::default().with_work_root(self.work_root());
        Converter::new(
            self.resolver.clone(),
            Arc::new(decoder),
            FrameExtractor::new(checker),
            DocumentAssembler::default(),
            store,
            settings,
        )
    }

    fn assert_clean(&self) {
        for dir in self.resolver.work_dirs() {
            assert!(!dir.exists(), "{} was left behind", dir.display());
        }
        if self.work_root().exists() {
            let leftovers = std::fs::read_dir(self.work_root()).unwrap().count();
            assert_eq!(leftovers, 0);
        }
    }
}

fn lecture_decoder() -> StubDecoder {
    StubDecoder {
        fps: Some(30.0),
        frames: lecture_frames(),
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut contents = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    contents
}

#[tokio::test]
async fn converts_a_lecture_into_a_stored_document() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::default());
    let checker = Arc::new(RecordingChecker::default());
    let converter = harness.converter(lecture_decoder(), checker.clone(), store.clone());

    let key = converter.convert(VIDEO_URL).await.unwrap();

    // Raw samples at 0s, 5s, 10s and 15s; the first is kept without a
    // comparison and the two unchanged slides are deleted before the third.
    assert_eq!(
        checker.seen(),
        vec![
            ("frame_150.png".to_string(), 2),
            ("frame_300.png".to_string(), 2),
            ("frame_450.png".to_string(), 2),
        ]
    );

    let pattern = Regex::new(r"^docx:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .unwrap();
    assert!(pattern.is_match(key.as_str()), "{key}");
    assert_eq!(store.puts(), 1);
    assert_eq!(harness.resolver.work_dirs().len(), 1);
    harness.assert_clean();

    let bytes = converter.fetch(key.as_str()).await.unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let document = read_entry(&mut archive, "word/document.xml");
    assert_eq!(document.matches(r#"<w:pStyle w:val="Title"/>"#).count(), 1);
    assert!(document.contains("Lecture 1: Ownership"));
    assert_eq!(document.matches("<w:drawing>").count(), 2);
    assert!(archive.by_name("word/media/image2.png").is_ok());
    assert!(archive.by_name("word/media/image3.png").is_err());
}

#[tokio::test]
async fn each_run_gets_a_fresh_key() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::default());
    let converter = harness.converter(
        StubDecoder {
            fps: Some(1.0),
            frames: vec![slide(3); 3],
        },
        Arc::new(SsimChecker::default()),
        store.clone(),
    );

    let first = converter.convert(VIDEO_URL).await.unwrap();
    let second = converter.convert(VIDEO_URL).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(store.puts(), 2);
    harness.assert_clean();
}

#[tokio::test]
async fn malformed_locator_is_rejected_before_any_work() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::default());
    let converter = harness.converter(
        lecture_decoder(),
        Arc::new(SsimChecker::default()),
        store.clone(),
    );

    let err = converter.convert("invalid_url").await.unwrap_err();

    assert!(matches!(err, ConversionError::InvalidSourceReference { .. }));
    assert!(!err.is_retryable());
    assert_eq!(err.stage(), ConversionStage::Init);
    assert!(harness.resolver.work_dirs().is_empty());
    assert!(!harness.work_root().exists());
    assert_eq!(store.puts(), 0);
}

#[tokio::test]
async fn resolver_rejection_counts_as_invalid_input() {
    let harness = Harness::new(ResolverMode::Reject);
    let converter = harness.converter(
        lecture_decoder(),
        Arc::new(SsimChecker::default()),
        Arc::new(CountingStore::default()),
    );

    let err = converter.convert(VIDEO_URL).await.unwrap_err();

    assert!(matches!(err, ConversionError::InvalidSourceReference { .. }));
    harness.assert_clean();
}

#[tokio::test]
async fn download_failures_clean_up_and_are_retryable() {
    for (mode, expected) in [
        (ResolverMode::Deny, "access denied"),
        (ResolverMode::Break, "connection reset"),
    ] {
        let harness = Harness::new(mode);
        let store = Arc::new(CountingStore::default());
        let converter = harness.converter(
            lecture_decoder(),
            Arc::new(SsimChecker::default()),
            store.clone(),
        );

        let err = converter.convert(VIDEO_URL).await.unwrap_err();

        match &err {
            ConversionError::ProcessingFailure { stage, message } => {
                assert_eq!(*stage, ConversionStage::Downloading);
                assert!(message.contains(expected), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(harness.resolver.work_dirs().len(), 1);
        assert_eq!(store.puts(), 0);
        harness.assert_clean();
    }
}

#[tokio::test]
async fn unknown_frame_rate_fails_extraction() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::default());
    let converter = harness.converter(
        StubDecoder {
            fps: Some(0.0),
            frames: lecture_frames(),
        },
        Arc::new(SsimChecker::default()),
        store.clone(),
    );

    let err = converter.convert(VIDEO_URL).await.unwrap_err();

    assert_eq!(err.stage(), ConversionStage::Extracting);
    assert_eq!(store.puts(), 0);
    harness.assert_clean();
}

#[tokio::test]
async fn video_without_frames_fails_extraction() {
    let harness = Harness::new(ResolverMode::Succeed);
    let converter = harness.converter(
        StubDecoder {
            fps: Some(30.0),
            frames: Vec::new(),
        },
        Arc::new(SsimChecker::default()),
        Arc::new(CountingStore::default()),
    );

    let err = converter.convert(VIDEO_URL).await.unwrap_err();

    assert_eq!(err.stage(), ConversionStage::Extracting);
    harness.assert_clean();
}

#[tokio::test]
async fn missing_frame_file_fails_assembly() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::default());
    let converter = harness.converter(lecture_decoder(), Arc::new(VanishingChecker), store.clone());

    let err = converter.convert(VIDEO_URL).await.unwrap_err();

    assert_eq!(err.stage(), ConversionStage::Assembling);
    assert_eq!(store.puts(), 0);
    harness.assert_clean();
}

#[tokio::test]
async fn unacknowledged_write_fails_persisting() {
    let harness = Harness::new(ResolverMode::Succeed);
    let store = Arc::new(CountingStore::refusing());
    let converter = harness.converter(
        lecture_decoder(),
        Arc::new(SsimChecker::default()),
        store.clone(),
    );

    let err = converter.convert(VIDEO_URL).await.unwrap_err();

    assert_eq!(err.stage(), ConversionStage::Persisting);
    assert!(err.is_retryable());
    assert_eq!(store.puts(), 1);
    harness.assert_clean();
}

#[tokio::test]
async fn unavailable_store_fails_persisting_and_fetching() {
    let harness = Harness::new(ResolverMode::Succeed);
    let converter = harness.converter(
        lecture_decoder(),
        Arc::new(SsimChecker::default()),
        Arc::new(UnavailableStore),
    );

    let err = converter.convert(VIDEO_URL).await.unwrap_err();
    assert_eq!(err.stage(), ConversionStage::Persisting);
    harness.assert_clean();

    let fetched = converter.fetch("docx:any").await.unwrap_err();
    assert!(matches!(fetched, FetchError::Store(_)));
}

#[tokio::test]
async fn fetching_an_unknown_key_is_not_found() {
    let harness = Harness::new(ResolverMode::Succeed);
    let converter = harness.converter(
        lecture_decoder(),
        Arc::new(SsimChecker::default()),
        Arc::new(CountingStore::default()),
    );

    let err = converter.fetch("docx:00000000-0000-4000-8000-000000000000").await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }));
}
