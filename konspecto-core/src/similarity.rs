//! Pairwise image comparison used to drop near-duplicate frames.
//!
//! A checker only scores; it never decides what happens when a comparison
//! fails. Callers receive a [`ComparisonError`] and apply their own policy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::GrayImage;
use serde::Serialize;
use thiserror::Error;

use crate::config::{CheckerKind, ExtractionSection};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.98;

const SSIM_WINDOW: u32 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

pub type SimilarityResult<T> = Result<T, ComparisonError>;

#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("failed to decode image {path}: {source}")]
    Decode {
        source: image::ImageError,
        path: PathBuf,
    },
    #[error("image {width}x{height} is smaller than the {window}x{window} comparison window")]
    TooSmall { width: u32, height: u32, window: u32 },
    #[error("image has no pixels")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Different,
    Same,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Different => f.write_str("different"),
            Verdict::Same => f.write_str("same"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub score: f64,
    pub threshold: f64,
}

impl Comparison {
    pub fn is_different(&self) -> bool {
        self.score < self.threshold
    }

    pub fn verdict(&self) -> Verdict {
        if self.is_different() {
            Verdict::Different
        } else {
            Verdict::Same
        }
    }
}

/// Scores how alike two images are. Higher means more similar.
pub trait DifferenceChecker: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn threshold(&self) -> f64;

    /// Both images have the same dimensions when this is called.
    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> SimilarityResult<f64>;

    fn compare_images(
        &self,
        reference: &GrayImage,
        candidate: &GrayImage,
    ) -> SimilarityResult<Comparison> {
        let aligned;
        let candidate = if candidate.dimensions() != reference.dimensions() {
            let (width, height) = reference.dimensions();
            aligned = image::imageops::resize(candidate, width, height, FilterType::CatmullRom);
            &aligned
        } else {
            candidate
        };
        let score = self.score(reference, candidate)?;
        Ok(Comparison {
            score,
            threshold: self.threshold(),
        })
    }

    fn compare(&self, reference: &Path, candidate: &Path) -> SimilarityResult<Comparison> {
        let reference_image = load_grayscale(reference)?;
        let candidate_image = load_grayscale(candidate)?;
        let comparison = self.compare_images(&reference_image, &candidate_image)?;
        tracing::debug!(
            checker = self.name(),
            reference = %reference.display(),
            candidate = %candidate.display(),
            score = comparison.score,
            "compared frames"
        );
        Ok(comparison)
    }
}

pub fn build_checker(section: &ExtractionSection) -> Arc<dyn DifferenceChecker> {
    match section.checker {
        CheckerKind::Ssim => Arc::new(SsimChecker::new(section.similarity_threshold)),
        CheckerKind::MeanDifference => {
            Arc::new(MeanDifferenceChecker::new(section.similarity_threshold))
        }
    }
}

pub fn load_grayscale(path: &Path) -> SimilarityResult<GrayImage> {
    let image = image::open(path).map_err(|source| ComparisonError::Decode {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(image.to_luma8())
}

/// Mean structural similarity over 7x7 uniform windows.
#[derive(Debug, Clone)]
pub struct SsimChecker {
    threshold: f64,
}

impl SsimChecker {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for SsimChecker {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl DifferenceChecker for SsimChecker {
    fn name(&self) -> &'static str {
        "ssim"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> SimilarityResult<f64> {
        mean_ssim(reference, candidate)
    }
}

/// `1 - mean(|a - b|) / 255` over luma values.
#[derive(Debug, Clone)]
pub struct MeanDifferenceChecker {
    threshold: f64,
}

impl MeanDifferenceChecker {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl DifferenceChecker for MeanDifferenceChecker {
    fn name(&self) -> &'static str {
        "mean_difference"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> SimilarityResult<f64> {
        let count = reference.as_raw().len();
        if count == 0 {
            return Err(ComparisonError::Empty);
        }
        let total: u64 = reference
            .as_raw()
            .iter()
            .zip(candidate.as_raw())
            .map(|(a, b)| u64::from(a.abs_diff(*b)))
            .sum();
        Ok(1.0 - (total as f64 / count as f64) / DATA_RANGE)
    }
}

fn mean_ssim(a: &GrayImage, b: &GrayImage) -> SimilarityResult<f64> {
    let (width, height) = a.dimensions();
    if width < SSIM_WINDOW || height < SSIM_WINDOW {
        return Err(ComparisonError::TooSmall {
            width,
            height,
            window: SSIM_WINDOW,
        });
    }

    let tables = MomentTables::build(a, b);
    let samples = f64::from(SSIM_WINDOW * SSIM_WINDOW);
    let cov_norm = samples / (samples - 1.0);
    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut windows = 0u64;
    for y in 0..=(height - SSIM_WINDOW) {
        for x in 0..=(width - SSIM_WINDOW) {
            let [sa, sb, saa, sbb, sab] = tables.window_sums(x, y, SSIM_WINDOW);
            let ux = sa / samples;
            let uy = sb / samples;
            let vx = cov_norm * (saa / samples - ux * ux);
            let vy = cov_norm * (sbb / samples - uy * uy);
            let vxy = cov_norm * (sab / samples - ux * uy);
            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            windows += 1;
        }
    }
    Ok(total / windows as f64)
}

/// Summed-area tables of a, b, a², b² and ab.
struct MomentTables {
    stride: usize,
    tables: [Vec<f64>; 5],
}

impl MomentTables {
    fn build(a: &GrayImage, b: &GrayImage) -> Self {
        let (width, height) = a.dimensions();
        let stride = width as usize + 1;
        let size = stride * (height as usize + 1);
        let mut tables: [Vec<f64>; 5] = std::array::from_fn(|_| vec![0.0; size]);
        for y in 0..height {
            let mut row = [0.0f64; 5];
            for x in 0..width {
                let pa = f64::from(a.get_pixel(x, y)[0]);
                let pb = f64::from(b.get_pixel(x, y)[0]);
                let values = [pa, pb, pa * pa, pb * pb, pa * pb];
                let above = y as usize * stride + x as usize + 1;
                let here = above + stride;
                for (table, (acc, value)) in tables.iter_mut().zip(row.iter_mut().zip(values)) {
                    *acc += value;
                    table[here] = table[above] + *acc;
                }
            }
        }
        Self { stride, tables }
    }

    fn window_sums(&self, x: u32, y: u32, size: u32) -> [f64; 5] {
        let x0 = x as usize;
        let y0 = y as usize;
        let x1 = x0 + size as usize;
        let y1 = y0 + size as usize;
        let at = |col: usize, row: usize| row * self.stride + col;
        std::array::from_fn(|i| {
            let t = &self.tables[i];
            t[at(x1, y1)] - t[at(x0, y1)] - t[at(x1, y0)] + t[at(x0, y0)]
        })
    }
}
