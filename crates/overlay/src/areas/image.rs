//! Image areas: decode, fit proportionally, draw

use super::{AreaContext, DrawArea};
use crate::schema::ImageArea;
use crate::{resolve_path, OverlayError, Result};
use pdf_core::image::fit_box_scale;
use pdf_core::{Canvas, RasterImage};
use std::path::Path;

impl DrawArea for ImageArea {
    fn draw(&self, canvas: &mut dyn Canvas, ctx: &mut AreaContext<'_>) -> Result<()> {
        let path = resolve_path(ctx.base_dir, &self.src);
        let image = load_image(&path)?;

        let (Some(width), Some(height)) = (self.width, self.height) else {
            return Err(OverlayError::invalid("width/height", "required for image areas"));
        };
        let scale = fit_scale(&path, &image, width, height)?;
        log::debug!(
            "image {} ({} x {} px) at ({}, {}) scale {scale}",
            path.display(),
            image.width(),
            image.height(),
            self.x,
            self.y
        );

        canvas.translate(self.x, self.y);
        canvas.scale(scale, scale);
        canvas.draw_image(&image).map_err(OverlayError::Render)
    }
}

fn load_image(path: &Path) -> Result<RasterImage> {
    if !path.is_file() {
        return Err(OverlayError::ImageNotFound(path.to_path_buf()));
    }
    RasterImage::open(path).map_err(|e| OverlayError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn fit_scale(path: &Path, image: &RasterImage, width: f64, height: f64) -> Result<f64> {
    if image.width() == 0 || image.height() == 0 {
        return Err(OverlayError::Image {
            path: path.to_path_buf(),
            message: "image has no pixels".to_string(),
        });
    }
    Ok(fit_box_scale(image.width(), image.height(), width, height))
}
