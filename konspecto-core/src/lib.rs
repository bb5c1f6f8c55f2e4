pub mod config;
pub mod converter;
pub mod document;
pub mod error;
pub mod extractor;
pub mod similarity;
pub mod source;
pub mod store;

pub use config::{
    load_config, CheckerKind, DocumentSection, DownloadSection, ExtractionSection,
    KonspectoConfig, PathsSection, StoreSection,
};
pub use converter::{
    ArtifactKey, ConversionError, ConversionResult, ConversionStage, Converter,
    ConverterSettings, FetchError, SetupError,
};
pub use document::{Artifact, DocumentAssembler, DocumentError, DocumentResult};
pub use error::{ConfigError, Result};
pub use extractor::{
    frame_interval, ExtractError, ExtractResult, FfmpegDecoder, FrameExtractor, FrameSource,
    KeptFrame, VideoDecoder,
};
pub use similarity::{
    build_checker, Comparison, ComparisonError, DifferenceChecker, MeanDifferenceChecker,
    SsimChecker, Verdict,
};
pub use source::{
    sanitize_filename, DownloadedVideo, ResolveError, ResolveResult, SourceReference,
    VideoResolver, YtDlpResolver,
};
pub use store::{
    ArtifactStore, MemoryArtifactStore, SqliteArtifactStore, SqliteArtifactStoreBuilder,
    StoreError, StoreResult, StoredArtifact,
};
