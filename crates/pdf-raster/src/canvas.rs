//! Raster drawing surface

use crate::{glyph_path, premultiply, render_page, to_transform, RasterError};
use pdf_core::{Canvas, Color, FontFace, Matrix, RasterImage, TemplatePage, TextLayout};
use std::sync::Arc;
use tiny_skia::{FillRule, FilterQuality, IntSize, Paint, PathBuilder, Pixmap, PixmapPaint, Rect};

/// A [`Canvas`] that paints into an RGBA pixmap.
///
/// The pixmap is `ceil(width * scale)` by `ceil(height * scale)` pixels;
/// user space is still in points.
pub struct RasterCanvas {
    pixmap: Pixmap,
    width: f64,
    height: f64,
    ctm: Matrix,
    stack: Vec<Matrix>,
    /// Face for template text whose font is not embedded
    substitute: Option<Arc<dyn FontFace>>,
}

impl RasterCanvas {
    /// Create a surface for a page of `width` x `height` points
    ///
    /// # Arguments
    /// * `width` - Page width in points
    /// * `height` - Page height in points
    /// * `scale` - Pixels per point
    pub fn new(width: f64, height: f64, scale: f64) -> crate::Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RasterError::InvalidScale(scale));
        }
        let pixel_width = (width * scale).ceil().max(0.0) as u32;
        let pixel_height = (height * scale).ceil().max(0.0) as u32;
        let pixmap = Pixmap::new(pixel_width, pixel_height)
            .ok_or(RasterError::InvalidSize(pixel_width, pixel_height))?;
        log::debug!("raster surface {pixel_width} x {pixel_height} px at {scale} px/pt");

        Ok(Self {
            pixmap,
            width,
            height,
            ctm: Matrix::scaling(scale, scale),
            stack: Vec::new(),
            substitute: None,
        })
    }

    /// Use `face` for template text set in fonts that are not embedded
    pub fn with_substitute_font(mut self, face: Arc<dyn FontFace>) -> Self {
        self.substitute = Some(face);
        self
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Current user space to pixel transform
    pub fn transform(&self) -> Matrix {
        self.ctm
    }

    /// PNG bytes of the current pixels
    pub fn encode_png(&self) -> crate::Result<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| RasterError::Encode(e.to_string()))
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64, color: Color) {
        let Some(rect) = Rect::from_xywh(x as f32, y as f32, width as f32, height as f32) else {
            return;
        };
        let paint = solid_paint(color, 1.0);
        self.pixmap.fill_rect(rect, &paint, to_transform(self.ctm), None);
    }
}

/// Opaque (or `alpha`) solid color paint
pub(crate) fn solid_paint(color: Color, alpha: f32) -> Paint<'static> {
    let [r, g, b] = color.to_rgb8();
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8);
    paint.anti_alias = true;
    paint
}

impl Canvas for RasterCanvas {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    fn save(&mut self) {
        self.stack.push(self.ctm);
    }

    fn restore(&mut self) {
        match self.stack.pop() {
            Some(ctm) => self.ctm = ctm,
            None => log::warn!("restore() without matching save() on the raster canvas"),
        }
    }

    fn translate(&mut self, tx: f64, ty: f64) {
        self.ctm = Matrix::translation(tx, ty).concat(self.ctm);
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        self.ctm = Matrix::scaling(sx, sy).concat(self.ctm);
    }

    fn paint(&mut self, color: Color) -> pdf_core::Result<()> {
        let [r, g, b] = color.to_rgb8();
        self.pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
        Ok(())
    }

    fn draw_page(&mut self, page: &TemplatePage) -> pdf_core::Result<()> {
        let transform = page.page_matrix().concat(self.ctm);
        render_page(&mut self.pixmap, page, transform, self.substitute.as_ref())?;
        Ok(())
    }

    fn draw_image(&mut self, image: &RasterImage) -> pdf_core::Result<()> {
        let mut data = image.pixels().as_raw().clone();
        premultiply(&mut data);
        let size = IntSize::from_wh(image.width(), image.height())
            .ok_or(RasterError::InvalidSize(image.width(), image.height()))?;
        let source = Pixmap::from_vec(data, size)
            .ok_or_else(|| RasterError::Image("pixel buffer does not match image size".to_string()))?;

        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, source.as_ref(), &paint, to_transform(self.ctm), None);
        Ok(())
    }

    fn draw_text(&mut self, layout: &TextLayout) -> pdf_core::Result<()> {
        for (line, run) in layout.runs() {
            if run.glyphs.is_empty() {
                continue;
            }
            let scale = run.scale();
            let baseline = line.baseline - run.rise;

            if let Some(background) = run.background {
                self.fill_rect(
                    run.x_start(),
                    line.top,
                    run.x_end() - run.x_start(),
                    line.height,
                    background,
                );
            }

            let paint = solid_paint(run.color, 1.0);
            for glyph in &run.glyphs {
                let Some(path) = glyph_path(run.face.as_ref(), glyph.glyph_id) else {
                    continue;
                };
                // font units, y up -> user space at the glyph origin
                let placement =
                    Matrix::new(scale, 0.0, 0.0, -scale, glyph.origin_x(), baseline - glyph.y_offset)
                        .concat(self.ctm);
                self.pixmap
                    .fill_path(&path, &paint, FillRule::Winding, to_transform(placement), None);
            }

            let mut decorations = Vec::new();
            if run.underline {
                decorations.push(run.face.underline_metrics());
            }
            if run.strikethrough {
                decorations.push(run.face.strikeout_metrics());
            }
            for (position, thickness) in decorations {
                let thickness = thickness as f64 * scale;
                let center = baseline - position as f64 * scale;
                self.fill_rect(
                    run.x_start(),
                    center - thickness / 2.0,
                    run.x_end() - run.x_start(),
                    thickness,
                    run.color,
                );
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> pdf_core::Result<Vec<u8>> {
        Ok(self.encode_png()?)
    }
}

/// Rectangle outline as a path, any sign of width and height
pub(crate) fn rect_path(x: f32, y: f32, width: f32, height: f32) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    builder.move_to(x, y);
    builder.line_to(x + width, y);
    builder.line_to(x + width, y + height);
    builder.line_to(x, y + height);
    builder.close();
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use pdf_core::testing::MonoFace;
    use pdf_core::{GlyphRun, LayoutLine, PositionedGlyph};
    use pretty_assertions::assert_eq;

    fn rgb_at(canvas: &RasterCanvas, x: u32, y: u32) -> [u8; 3] {
        let pixel = canvas.pixmap().pixel(x, y).unwrap().demultiply();
        [pixel.red(), pixel.green(), pixel.blue()]
    }

    fn white_canvas(width: f64, height: f64) -> RasterCanvas {
        let mut canvas = RasterCanvas::new(width, height, 1.0).unwrap();
        canvas.paint(Color::white()).unwrap();
        canvas
    }

    fn single_run_layout(text: &str, font_size: f32, color: Color) -> TextLayout {
        let face: Arc<dyn FontFace> = Arc::new(MonoFace::new("Mono"));
        let advance = face.advance_points('A' as u16, font_size);
        let glyphs: Vec<PositionedGlyph> = text
            .chars()
            .enumerate()
            .map(|(i, ch)| PositionedGlyph::new(ch as u16, i as f64 * advance, advance, ch))
            .collect();
        let width = glyphs.len() as f64 * advance;
        TextLayout {
            lines: vec![LayoutLine {
                top: 0.0,
                baseline: font_size as f64 * 0.8,
                height: font_size as f64,
                width,
                runs: vec![GlyphRun {
                    face,
                    font_size,
                    color,
                    background: None,
                    underline: false,
                    strikethrough: false,
                    rise: 0.0,
                    glyphs,
                }],
            }],
            width,
            height: font_size as f64,
        }
    }

    #[test]
    fn test_pixel_size_rounds_up() {
        let canvas = RasterCanvas::new(100.5, 50.0, 2.0).unwrap();
        assert_eq!((canvas.pixmap().width(), canvas.pixmap().height()), (201, 100));
        assert_eq!(canvas.size(), (100.5, 50.0));
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            RasterCanvas::new(0.0, 10.0, 1.0),
            Err(RasterError::InvalidSize(0, 10))
        ));
        assert!(matches!(
            RasterCanvas::new(10.0, 10.0, 0.0),
            Err(RasterError::InvalidScale(_))
        ));
    }

    #[test]
    fn test_paint_ignores_transform() {
        let mut canvas = RasterCanvas::new(20.0, 20.0, 1.0).unwrap();
        canvas.translate(50.0, 50.0);
        canvas.paint(Color::red()).unwrap();
        assert_eq!(rgb_at(&canvas, 0, 0), [255, 0, 0]);
        assert_eq!(rgb_at(&canvas, 19, 19), [255, 0, 0]);
    }

    #[test]
    fn test_save_restore_transform() {
        let mut canvas = white_canvas(10.0, 10.0);
        canvas.save();
        canvas.translate(5.0, 5.0);
        canvas.scale(2.0, 2.0);
        assert_eq!(canvas.transform(), Matrix::new(2.0, 0.0, 0.0, 2.0, 5.0, 5.0));
        canvas.restore();
        assert_eq!(canvas.transform(), Matrix::identity());
        // unbalanced restore leaves the transform alone
        canvas.restore();
        assert_eq!(canvas.transform(), Matrix::identity());
    }

    #[test]
    fn test_draw_image_scaled_into_box() {
        let mut canvas = white_canvas(200.0, 200.0);
        let pixels: RgbaImage = ImageBuffer::from_pixel(200, 100, Rgba([0, 0, 255, 255]));
        let image = RasterImage::from_rgba(pixels);

        canvas.save();
        canvas.translate(10.0, 20.0);
        canvas.scale(0.5, 0.5);
        canvas.draw_image(&image).unwrap();
        canvas.restore();

        // occupies 100 x 50 starting at (10, 20)
        assert_eq!(rgb_at(&canvas, 12, 22), [0, 0, 255]);
        assert_eq!(rgb_at(&canvas, 108, 68), [0, 0, 255]);
        assert_eq!(rgb_at(&canvas, 112, 40), [255, 255, 255]);
        assert_eq!(rgb_at(&canvas, 50, 72), [255, 255, 255]);
        assert_eq!(rgb_at(&canvas, 5, 5), [255, 255, 255]);
    }

    #[test]
    fn test_draw_image_blends_alpha() {
        let mut canvas = white_canvas(10.0, 10.0);
        let pixels: RgbaImage = ImageBuffer::from_pixel(10, 10, Rgba([0, 0, 0, 0]));
        canvas.draw_image(&RasterImage::from_rgba(pixels)).unwrap();
        assert_eq!(rgb_at(&canvas, 5, 5), [255, 255, 255]);
    }

    #[test]
    fn test_draw_text_fills_glyph_boxes() {
        let mut canvas = white_canvas(100.0, 40.0);
        canvas.translate(10.0, 10.0);
        canvas.draw_text(&single_run_layout("AB", 20.0, Color::red())).unwrap();

        // 20pt MonoFace: baseline at 16, boxes from x+1 to x+11 and 14pt tall
        assert_eq!(rgb_at(&canvas, 16, 20), [255, 0, 0]);
        assert_eq!(rgb_at(&canvas, 28, 20), [255, 0, 0]);
        // gap between the two boxes
        assert_eq!(rgb_at(&canvas, 22, 20), [255, 255, 255]);
        // below the baseline
        assert_eq!(rgb_at(&canvas, 16, 28), [255, 255, 255]);
    }

    #[test]
    fn test_draw_text_applies_shaping_offsets() {
        let mut canvas = white_canvas(60.0, 30.0);
        let mut layout = single_run_layout("A", 20.0, Color::red());
        let glyph = &mut layout.lines[0].runs[0].glyphs[0];
        glyph.x_offset = 20.0;
        glyph.y_offset = 10.0;
        canvas.draw_text(&layout).unwrap();

        // box moved to x 21..31 with its bottom at y 6
        assert_eq!(rgb_at(&canvas, 26, 3), [255, 0, 0]);
        assert_eq!(rgb_at(&canvas, 6, 10), [255, 255, 255]);
        assert_eq!(rgb_at(&canvas, 26, 10), [255, 255, 255]);
    }

    #[test]
    fn test_draw_text_background_and_underline() {
        let mut canvas = white_canvas(100.0, 40.0);
        let mut layout = single_run_layout("  ", 20.0, Color::black());
        layout.lines[0].runs[0].background = Some(Color::green());
        canvas.draw_text(&layout).unwrap();
        assert_eq!(rgb_at(&canvas, 5, 5), [0, 255, 0]);
        assert_eq!(rgb_at(&canvas, 5, 25), [255, 255, 255]);

        let mut canvas = white_canvas(100.0, 60.0);
        let mut layout = single_run_layout("  ", 40.0, Color::blue());
        layout.lines[0].runs[0].underline = true;
        canvas.draw_text(&layout).unwrap();
        // underline 100 units below the baseline and 50 thick: rows 35..37
        assert_eq!(rgb_at(&canvas, 10, 35), [0, 0, 255]);
        assert_eq!(rgb_at(&canvas, 10, 30), [255, 255, 255]);
    }

    #[test]
    fn test_finish_encodes_png() {
        let mut canvas: Box<dyn Canvas> = Box::new(RasterCanvas::new(30.0, 20.0, 1.0).unwrap());
        canvas.paint(Color::white()).unwrap();
        let bytes = canvas.finish().unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[test]
    fn test_rect_path_negative_extent() {
        let path = rect_path(10.0, 10.0, -5.0, -5.0).unwrap();
        let bounds = path.bounds();
        assert_eq!((bounds.left(), bounds.top(), bounds.right(), bounds.bottom()), (5.0, 5.0, 10.0, 10.0));
    }
}
