use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use konspecto_core::document::DOCX_EXTENSION;
use konspecto_core::{
    build_checker, load_config, sanitize_filename, ArtifactStore, ConversionError, Converter,
    DifferenceChecker, FetchError, KonspectoConfig, SetupError, SqliteArtifactStore, StoreError,
    StoredArtifact, Verdict,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] konspecto_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to render configuration: {0}")]
    RenderConfig(#[from] toml::ser::Error),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("comparison failed: {0}")]
    Comparison(#[from] konspecto_core::ComparisonError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns lecture videos into slide documents", long_about = None)]
pub struct Cli {
    /// Path to konspecto.toml; built-in defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides paths.work_dir
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Overrides paths.store_path
    #[arg(long)]
    pub store: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log filter such as `info` or `konspecto_core=debug`; falls back to RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converts a video into a document and prints its key
    Convert(ConvertArgs),
    /// Writes a stored document to disk
    Fetch(FetchArgs),
    /// Lists documents that have not expired yet
    List(ListArgs),
    /// Removes expired documents
    Purge,
    /// Scores two images with the configured checker
    Compare(CompareArgs),
    /// Prints the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// YouTube video URL
    pub url: String,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub key: String,
    /// Destination file; defaults to `<key>.docx` in the current directory
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    pub reference: PathBuf,
    pub candidate: PathBuf,
}

/// Installs the stderr log subscriber. Safe to call more than once.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Convert(args) => {
            let outcome = context.convert(args)?;
            render(&outcome, cli.format)?;
        }
        Commands::Fetch(args) => {
            let outcome = context.fetch(args)?;
            render(&outcome, cli.format)?;
        }
        Commands::List(args) => {
            let list = context.list(args)?;
            render(&list, cli.format)?;
        }
        Commands::Purge => {
            let outcome = context.purge()?;
            render(&outcome, cli.format)?;
        }
        Commands::Compare(args) => {
            let outcome = context.compare(args)?;
            render(&outcome, cli.format)?;
        }
        Commands::Config => match cli.format {
            OutputFormat::Text => println!("{}", toml::to_string_pretty(&context.config)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&context.config)?),
        },
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: KonspectoConfig,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => load_config(path)?,
            None => KonspectoConfig::default(),
        };
        if let Some(work_dir) = &cli.work_dir {
            config.paths.work_dir = work_dir.clone();
        }
        if let Some(store) = &cli.store {
            config.paths.store_path = store.clone();
        }
        Ok(Self { config })
    }

    fn runtime(&self) -> Result<Runtime> {
        Ok(tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?)
    }

    fn store(&self) -> Result<SqliteArtifactStore> {
        let store = SqliteArtifactStore::new(&self.config.paths.store_path)?;
        store.initialize()?;
        Ok(store)
    }

    fn convert(&self, args: &ConvertArgs) -> Result<ConvertOutcome> {
        let converter = Converter::from_config(&self.config)?;
        let started = Instant::now();
        let key = self.runtime()?.block_on(converter.convert(&args.url))?;
        Ok(ConvertOutcome {
            key: key.into_string(),
            url: args.url.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn fetch(&self, args: &FetchArgs) -> Result<FetchOutcome> {
        let converter = Converter::from_config(&self.config)?;
        let bytes = self.runtime()?.block_on(converter.fetch(&args.key))?;
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(&args.key));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &bytes)?;
        Ok(FetchOutcome {
            key: args.key.clone(),
            path,
            size_bytes: bytes.len(),
        })
    }

    fn list(&self, args: &ListArgs) -> Result<ArtifactList> {
        let rows = self.store()?.entries(args.limit)?;
        Ok(ArtifactList { rows })
    }

    fn purge(&self) -> Result<PurgeOutcome> {
        let store = self.store()?;
        let removed = self.runtime()?.block_on(store.purge_expired())?;
        Ok(PurgeOutcome { removed })
    }

    fn compare(&self, args: &CompareArgs) -> Result<CompareOutcome> {
        let checker = build_checker(&self.config.extraction);
        let comparison = checker.compare(&args.reference, &args.candidate)?;
        Ok(CompareOutcome {
            checker: checker.name().to_string(),
            reference: args.reference.clone(),
            candidate: args.candidate.clone(),
            score: comparison.score,
            threshold: comparison.threshold,
            verdict: comparison.verdict(),
        })
    }
}

fn default_output_path(key: &str) -> PathBuf {
    Path::new(&sanitize_filename(key)).with_extension(DOCX_EXTENSION)
}

#[derive(Debug, Serialize)]
pub struct ConvertOutcome {
    pub key: String,
    pub url: String,
    pub elapsed_ms: u64,
}

impl DisplayFallback for ConvertOutcome {
    fn display(&self) -> String {
        self.key.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct FetchOutcome {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: usize,
}

impl DisplayFallback for FetchOutcome {
    fn display(&self) -> String {
        format!(
            "{} -> {} ({} bytes)",
            self.key,
            self.path.display(),
            self.size_bytes
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ArtifactList {
    pub rows: Vec<StoredArtifact>,
}

impl DisplayFallback for ArtifactList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No stored documents".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{} | {} bytes | created {} | expires {}",
                    row.key,
                    row.size_bytes,
                    row.created_at.format("%Y-%m-%d %H:%M:%S"),
                    row.expires_at.format("%Y-%m-%d %H:%M:%S")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeOutcome {
    pub removed: usize,
}

impl DisplayFallback for PurgeOutcome {
    fn display(&self) -> String {
        format!("Removed {} expired document(s)", self.removed)
    }
}

#[derive(Debug, Serialize)]
pub struct CompareOutcome {
    pub checker: String,
    pub reference: PathBuf,
    pub candidate: PathBuf,
    pub score: f64,
    pub threshold: f64,
    pub verdict: Verdict,
}

impl DisplayFallback for CompareOutcome {
    fn display(&self) -> String {
        format!(
            "{}: score={:.4} threshold={:.2} verdict={}",
            self.checker, self.score, self.threshold, self.verdict
        )
    }
}
