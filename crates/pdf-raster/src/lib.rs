//! PDF Raster - pixel output for pdf-overlay
//!
//! This crate provides:
//! - [`RasterCanvas`], a [`pdf_core::Canvas`] backed by a tiny-skia pixmap
//! - [`render_page`], a content stream interpreter that paints a template page
//!
//! # Example
//!
//! ```ignore
//! use pdf_core::{Canvas, Color, TemplatePage};
//! use pdf_raster::RasterCanvas;
//!
//! let page = TemplatePage::open("template.pdf")?;
//! let (width, height) = page.size();
//! let mut canvas = Box::new(RasterCanvas::new(width, height, 2.0)?);
//! canvas.paint(Color::white())?;
//! canvas.draw_page(&page)?;
//! let png = canvas.finish()?;
//! ```

mod canvas;
mod page;

pub use canvas::RasterCanvas;
pub use page::render_page;

use pdf_core::{Matrix, PdfError};
use thiserror::Error;

/// Errors that can occur while rasterizing
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Invalid surface size: {0} x {1} pixels")]
    InvalidSize(u32, u32),

    #[error("Invalid scale factor: {0}")]
    InvalidScale(f64),

    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error(transparent)]
    Pdf(#[from] PdfError),
}

impl From<RasterError> for PdfError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::Pdf(inner) => inner,
            other => PdfError::Render(other.to_string()),
        }
    }
}

/// Result type for raster operations
pub type Result<T> = std::result::Result<T, RasterError>;

/// Same affine map as a tiny-skia transform
pub(crate) fn to_transform(m: Matrix) -> tiny_skia::Transform {
    tiny_skia::Transform::from_row(
        m.a as f32, m.b as f32, m.c as f32, m.d as f32, m.e as f32, m.f as f32,
    )
}

/// Feeds `ttf-parser` glyph outlines into a tiny-skia path
pub(crate) struct OutlinePath(pub tiny_skia::PathBuilder);

impl ttf_parser::OutlineBuilder for OutlinePath {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.0.close();
    }
}

/// Outline of one glyph in font units, `None` for blank glyphs
pub(crate) fn glyph_path(face: &dyn pdf_core::FontFace, glyph_id: u16) -> Option<tiny_skia::Path> {
    let mut builder = OutlinePath(tiny_skia::PathBuilder::new());
    if !face.outline(glyph_id, &mut builder) {
        return None;
    }
    builder.0.finish()
}

/// Straight RGBA to the premultiplied layout tiny-skia expects
pub(crate) fn premultiply(rgba: &mut [u8]) {
    for pixel in rgba.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        if alpha == 255 {
            continue;
        }
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
}
