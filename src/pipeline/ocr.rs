//! OCR for extracted images: grayscale, contrast boost and sharpen, then the
//! local `tesseract` binary in single-block mode (`--psm 6`).

use std::process::Command;
use std::sync::OnceLock;

use image::{DynamicImage, GrayImage, Luma};
use thiserror::Error;
use tracing::debug;

use super::extraction::encode_png;
use super::types::{ExtractedImage, OcrEngine};

/// Contrast factor applied around the mean intensity.
pub const CONTRAST_FACTOR: f32 = 2.0;

/// 3x3 sharpen kernel: centre 32, neighbours -2, divided by 16.
const SHARPEN_CENTRE: i32 = 32;
const SHARPEN_NEIGHBOUR: i32 = -2;
const SHARPEN_SCALE: i32 = 16;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR engine not available: {0}")]
    NotAvailable(String),

    #[error("Image decoding failed: {0}")]
    Decode(String),

    #[error("OCR processing failed: {0}")]
    Processing(String),
}

/// Grayscale, contrast-enhance and sharpen an image for recognition.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let contrasted = enhance_contrast(&gray, CONTRAST_FACTOR);
    sharpen(&contrasted)
}

/// Apply the sharpen kernel with edge pixels clamped to the border.
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    GrayImage::from_fn(width, height, |x, y| {
        let mut acc = 0i32;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                let weight = if dx == 0 && dy == 0 {
                    SHARPEN_CENTRE
                } else {
                    SHARPEN_NEIGHBOUR
                };
                acc += weight * gray.get_pixel(nx, ny).0[0] as i32;
            }
        }
        Luma([(acc / SHARPEN_SCALE).clamp(0, 255) as u8])
    })
}

/// Scale each pixel's distance from the mean intensity by `factor`.
pub fn enhance_contrast(gray: &GrayImage, factor: f32) -> GrayImage {
    let pixel_count = (gray.width() as u64 * gray.height() as u64).max(1);
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let mean = (sum as f32 / pixel_count as f32).round();

    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        let value = mean + factor * (pixel.0[0] as f32 - mean);
        *pixel = Luma([value.round().clamp(0.0, 255.0) as u8]);
    }
    out
}

/// Tesseract via its command-line binary.
pub struct TesseractCli {
    binary: String,
    available: OnceLock<bool>,
}

impl TesseractCli {
    pub fn new() -> Self {
        Self::with_binary("tesseract")
    }

    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            available: OnceLock::new(),
        }
    }

    fn run(&self, png: &[u8]) -> Result<String, OcrError> {
        let file = tempfile::Builder::new()
            .prefix("sg-ocr-")
            .suffix(".png")
            .tempfile()?;
        std::fs::write(file.path(), png)?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .args(["--psm", "6"])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(OcrError::Processing(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::NotAvailable(
                format!("{} not found (install tesseract-ocr)", self.binary),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractCli {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            Command::new(&self.binary)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    fn recognize(&self, image: &ExtractedImage) -> Result<String, OcrError> {
        let decoded =
            image::load_from_memory(&image.bytes).map_err(|e| OcrError::Decode(e.to_string()))?;
        let prepared = DynamicImage::ImageLuma8(preprocess(&decoded));
        let png = encode_png(&prepared).map_err(|e| OcrError::Decode(e.to_string()))?;

        let recognized = self.run(&png)?;
        debug!(
            page = image.page_number,
            image = image.index,
            chars = recognized.chars().count(),
            "OCR complete"
        );
        Ok(recognized)
    }
}
