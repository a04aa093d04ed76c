//! Output surface creation per format

use crate::{OutputFormat, OverlayError, RenderConfig, Result};
use pdf_core::{Canvas, FontFace, FontStyle, FontWeight, PdfDocument};
use pdf_raster::RasterCanvas;
use std::sync::Arc;
use text_layout::{FontQuery, FontSource};

/// Empty canvas of `width` x `height` points for `format`
pub fn create_surface(
    format: OutputFormat,
    width: f64,
    height: f64,
    config: &RenderConfig,
    fonts: &mut dyn FontSource,
) -> Result<Box<dyn Canvas>> {
    match format {
        OutputFormat::Pdf => Ok(Box::new(
            PdfDocument::new(width, height).with_compression(config.compress),
        )),
        OutputFormat::Img => {
            let mut canvas = RasterCanvas::new(width, height, config.raster_scale)
                .map_err(|e| OverlayError::Render(e.into()))?;
            if let Some(face) = substitute_face(config, fonts) {
                canvas = canvas.with_substitute_font(face);
            }
            Ok(Box::new(canvas))
        }
    }
}

/// Face used for template text whose font is not embedded
fn substitute_face(config: &RenderConfig, fonts: &mut dyn FontSource) -> Option<Arc<dyn FontFace>> {
    let query = FontQuery::new(&config.default_font_family, FontWeight::NORMAL, FontStyle::Normal);
    match fonts.resolve(&query) {
        Ok(face) => Some(face),
        Err(err) => {
            log::warn!("no substitute font, non-embedded template text is skipped: {err}");
            None
        }
    }
}
