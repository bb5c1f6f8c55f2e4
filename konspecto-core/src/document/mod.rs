mod ooxml;

use std::io::{Cursor, Write};
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::DocumentSection;
use crate::extractor::KeptFrame;

use self::ooxml::Picture;

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DOCX_EXTENSION: &str = "docx";

const EMU_PER_INCH: f64 = 914_400.0;
const UNTITLED: &str = "Untitled video";

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document has no frames to embed")]
    Empty,
    #[error("failed to read frame {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to inspect frame {path}: {source}")]
    Image {
        source: image::ImageError,
        path: PathBuf,
    },
    #[error("failed to write document xml: {0}")]
    Xml(String),
    #[error("failed to write document package: {0}")]
    Package(#[from] zip::result::ZipError),
}

/// Generated document bytes with the title they were built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub title: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds a DOCX with a title heading followed by one picture per frame.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    image_width_emu: u64,
}

impl Default for DocumentAssembler {
    fn default() -> Self {
        Self::new(6.0)
    }
}

impl DocumentAssembler {
    pub fn new(image_width_inches: f64) -> Self {
        Self {
            image_width_emu: (image_width_inches * EMU_PER_INCH).round() as u64,
        }
    }

    pub fn from_config(section: &DocumentSection) -> Self {
        Self::new(section.image_width_inches)
    }

    pub fn image_width_emu(&self) -> u64 {
        self.image_width_emu
    }

    pub fn assemble(&self, title: &str, frames: &[KeptFrame]) -> DocumentResult<Artifact> {
        if frames.is_empty() {
            return Err(DocumentError::Empty);
        }
        let title = match title.trim() {
            "" => UNTITLED,
            trimmed => trimmed,
        };

        let mut pictures = Vec::with_capacity(frames.len());
        let mut media = Vec::with_capacity(frames.len());
        for (offset, frame) in frames.iter().enumerate() {
            let (width, height) =
                image::image_dimensions(&frame.path).map_err(|source| DocumentError::Image {
                    source,
                    path: frame.path.clone(),
                })?;
            let bytes = std::fs::read(&frame.path).map_err(|source| DocumentError::Io {
                source,
                path: frame.path.clone(),
            })?;
            pictures.push(Picture {
                number: offset + 1,
                cx: self.image_width_emu,
                cy: scaled_height(self.image_width_emu, width, height),
            });
            media.push(bytes);
        }

        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        writer.start_file("[Content_Types].xml", deflated)?;
        write_part(&mut writer, ooxml::CONTENT_TYPES.as_bytes())?;
        writer.start_file("_rels/.rels", deflated)?;
        write_part(&mut writer, ooxml::PACKAGE_RELS.as_bytes())?;
        writer.start_file("docProps/core.xml", deflated)?;
        write_part(&mut writer, &ooxml::core_properties(title, &created)?)?;
        writer.start_file("word/document.xml", deflated)?;
        write_part(&mut writer, &ooxml::document_xml(title, &pictures)?)?;
        writer.start_file("word/styles.xml", deflated)?;
        write_part(&mut writer, ooxml::STYLES.as_bytes())?;
        writer.start_file("word/_rels/document.xml.rels", deflated)?;
        write_part(&mut writer, &ooxml::document_rels(&pictures)?)?;
        for (picture, bytes) in pictures.iter().zip(&media) {
            writer.start_file(format!("word/media/{}", picture.media_name()), stored)?;
            write_part(&mut writer, bytes)?;
        }
        let bytes = writer.finish()?.into_inner();

        info!(
            title,
            images = pictures.len(),
            size_bytes = bytes.len(),
            "document assembled"
        );
        Ok(Artifact {
            title: title.to_string(),
            bytes,
        })
    }
}

fn write_part(writer: &mut ZipWriter<Cursor<Vec<u8>>>, bytes: &[u8]) -> DocumentResult<()> {
    writer
        .write_all(bytes)
        .map_err(|err| DocumentError::Package(err.into()))
}

fn scaled_height(width_emu: u64, width_px: u32, height_px: u32) -> u64 {
    if width_px == 0 {
        return width_emu;
    }
    (width_emu as f64 * f64::from(height_px) / f64::from(width_px)).round() as u64
}
