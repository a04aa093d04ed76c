//! PDF Core - template pages and drawing surfaces
//!
//! This crate provides functionality for:
//! - Opening a template PDF and reading its first page
//! - The [`Canvas`] drawing surface used by the compositor
//! - A vector canvas ([`PdfDocument`]) that writes a new single-page PDF
//! - Embedding TrueType/OpenType fonts and images (JPEG, PNG)
//!
//! # Example
//!
//! ```ignore
//! use pdf_core::{Canvas, Color, PdfDocument, TemplatePage};
//!
//! let page = TemplatePage::open("template.pdf")?;
//! let (width, height) = page.size();
//! let mut canvas = Box::new(PdfDocument::new(width, height));
//! canvas.paint(Color::white())?;
//! canvas.draw_page(&page)?;
//! let bytes = canvas.finish()?;
//! ```

pub mod canvas;
mod color;
mod document;
mod font;
mod geometry;
pub mod image;
pub mod template;
mod text;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use canvas::Canvas;
pub use color::Color;
pub use document::PdfDocument;
pub use font::{
    FontData, FontFace, FontFamily, FontFamilyBuilder, FontObjects, FontStyle, FontWeight,
};
pub use geometry::Matrix;
pub use image::RasterImage;
pub use template::TemplatePage;
pub use text::{GlyphRun, LayoutLine, PositionedGlyph, TextLayout};

use thiserror::Error;

/// Errors that can occur during PDF operations
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Failed to open PDF: {0}")]
    OpenError(String),

    #[error("Failed to save PDF: {0}")]
    SaveError(String),

    #[error("Template has no pages")]
    NoPages,

    #[error("Encrypted PDFs are not supported: {0}")]
    Encrypted(String),

    #[error("Font not found: {0}")]
    FontNotFound(String),

    #[error("Failed to parse font: {0}")]
    FontParseError(String),

    #[error("Font subset error: {0}")]
    FontSubsetError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("PDF parsing error: {0}")]
    ParseError(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Lopdf error: {0}")]
    LopdfError(#[from] lopdf::Error),
}

/// Result type for PDF operations
pub type Result<T> = std::result::Result<T, PdfError>;

/// Format a number for a content stream: at most four decimals, no trailing zeros
pub fn pdf_number(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == rounded.trunc() {
        // avoid "-0"
        return format!("{}", rounded.trunc() as i64);
    }
    let text = format!("{rounded:.4}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
