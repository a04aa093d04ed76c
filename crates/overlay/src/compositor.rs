//! Page compositor: background, template, then areas in order

use crate::areas::{AreaContext, DrawArea};
use crate::finalize::finalize;
use crate::surface::create_surface;
use crate::{Area, OutputFormat, OverlayError, RenderConfig, Result};
use pdf_core::{Canvas, TemplatePage};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use text_layout::FontSource;

/// Canvas state saved on creation and restored on drop
pub struct SavedState<'c> {
    canvas: &'c mut dyn Canvas,
}

impl<'c> SavedState<'c> {
    pub fn new(canvas: &'c mut dyn Canvas) -> Self {
        canvas.save();
        Self { canvas }
    }
}

impl<'c> Deref for SavedState<'c> {
    type Target = dyn Canvas + 'c;

    fn deref(&self) -> &Self::Target {
        self.canvas
    }
}

impl DerefMut for SavedState<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.canvas
    }
}

impl Drop for SavedState<'_> {
    fn drop(&mut self) {
        self.canvas.restore();
    }
}

/// Composites areas over a template page
pub struct Compositor<'a> {
    config: &'a RenderConfig,
    fonts: &'a mut dyn FontSource,
    base_dir: &'a Path,
}

impl<'a> Compositor<'a> {
    pub fn new(config: &'a RenderConfig, fonts: &'a mut dyn FontSource, base_dir: &'a Path) -> Self {
        Self {
            config,
            fonts,
            base_dir,
        }
    }

    /// Draw everything on a fresh surface of the template's size and
    /// return the finished PDF or PNG bytes
    pub fn composite(&mut self, template: &TemplatePage, areas: &[Area], format: OutputFormat) -> Result<Vec<u8>> {
        let (width, height) = template.size();
        let mut canvas = create_surface(format, width, height, self.config, &mut *self.fonts)?;
        self.paint(canvas.as_mut(), template, areas)?;

        let mut bytes = Vec::new();
        finalize(canvas, &mut bytes)?;
        log::info!("rendered {} areas to {} bytes of {format:?}", areas.len(), bytes.len());
        Ok(bytes)
    }

    /// Paint the background, the template and every area onto `canvas`
    pub fn paint(&mut self, canvas: &mut dyn Canvas, template: &TemplatePage, areas: &[Area]) -> Result<()> {
        canvas
            .paint(self.config.background_color()?)
            .map_err(OverlayError::Render)?;

        {
            let mut state = SavedState::new(&mut *canvas);
            state.draw_page(template).map_err(OverlayError::Render)?;
        }

        for (index, area) in areas.iter().enumerate() {
            if let Area::Unknown { kind } = area {
                log::warn!("skipping area {index}: unknown type {kind:?}");
                continue;
            }
            log::debug!("area {index}: {}", area.kind());

            let mut state = SavedState::new(&mut *canvas);
            let mut ctx = AreaContext {
                config: self.config,
                fonts: &mut *self.fonts,
                base_dir: self.base_dir,
            };
            match area {
                Area::Image(image) => image.draw(&mut *state, &mut ctx)?,
                Area::Text(text) => text.draw(&mut *state, &mut ctx)?,
                Area::Unknown { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FontSlant, FontWeightName, ImageArea, TextArea};
    use image::{ImageBuffer, Rgba, RgbaImage};
    use lopdf::{dictionary, Document, Object, Stream};
    use pdf_core::testing::MonoFace;
    use pdf_core::{Color, FontFamily, RasterImage, TextLayout};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use text_layout::FontBook;

    /// Canvas that records every call as text
    #[derive(Default)]
    struct RecordingCanvas {
        calls: Vec<String>,
    }

    impl Canvas for RecordingCanvas {
        fn size(&self) -> (f64, f64) {
            (200.0, 100.0)
        }
        fn save(&mut self) {
            self.calls.push("save".to_string());
        }
        fn restore(&mut self) {
            self.calls.push("restore".to_string());
        }
        fn translate(&mut self, tx: f64, ty: f64) {
            self.calls.push(format!("translate {tx} {ty}"));
        }
        fn scale(&mut self, sx: f64, sy: f64) {
            self.calls.push(format!("scale {sx} {sy}"));
        }
        fn paint(&mut self, color: Color) -> pdf_core::Result<()> {
            self.calls.push(format!("paint {:?}", color.to_rgb8()));
            Ok(())
        }
        fn draw_page(&mut self, _page: &TemplatePage) -> pdf_core::Result<()> {
            self.calls.push("page".to_string());
            Ok(())
        }
        fn draw_image(&mut self, image: &RasterImage) -> pdf_core::Result<()> {
            self.calls.push(format!("image {}x{}", image.width(), image.height()));
            Ok(())
        }
        fn draw_text(&mut self, layout: &TextLayout) -> pdf_core::Result<()> {
            self.calls.push(format!("text {:?}", layout.text()));
            Ok(())
        }
        fn finish(self: Box<Self>) -> pdf_core::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn template() -> TemplatePage {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        TemplatePage::from_bytes(&buffer).unwrap()
    }

    fn fonts() -> FontBook {
        let mut book = FontBook::new();
        book.register_family("Sans", FontFamily::single(Arc::new(MonoFace::new("Mono"))));
        book
    }

    fn text(x: f64, y: f64, content: &str) -> Area {
        Area::Text(TextArea {
            x,
            y,
            content: content.to_string(),
            font_family: None,
            font_size: None,
            font_weight: FontWeightName::Normal,
            font_slant: FontSlant::Normal,
            width: None,
            wrap: None,
            justify: false,
            allow_markup: false,
            style: None,
            color: None,
        })
    }

    fn record(areas: &[Area], base_dir: &Path) -> (Result<()>, Vec<String>) {
        let config = RenderConfig::default();
        let mut fonts = fonts();
        let mut canvas = RecordingCanvas::default();
        let result = Compositor::new(&config, &mut fonts, base_dir).paint(&mut canvas, &template(), areas);
        (result, canvas.calls)
    }

    #[test]
    fn test_saved_state_restores_on_drop() {
        let mut canvas = RecordingCanvas::default();
        {
            let mut state = SavedState::new(&mut canvas);
            state.translate(1.0, 2.0);
        }
        assert_eq!(canvas.calls, vec!["save", "translate 1 2", "restore"]);
    }

    #[test]
    fn test_template_only() {
        let (result, calls) = record(&[], Path::new("."));
        result.unwrap();
        assert_eq!(calls, vec!["paint [255, 255, 255]", "save", "page", "restore"]);
    }

    #[test]
    fn test_text_area_calls() {
        let (result, calls) = record(&[text(10.0, 20.0, "<b>Hi</b>")], Path::new("."));
        result.unwrap();
        assert_eq!(
            calls[4..],
            ["save", "translate 10 20", "text \"Hi\"", "restore"]
        );
    }

    #[test]
    fn test_image_fit_calls() {
        let dir = tempfile::tempdir().unwrap();
        let pixels: RgbaImage = ImageBuffer::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
        pixels.save(dir.path().join("wide.png")).unwrap();

        let area = Area::Image(ImageArea {
            x: 5.0,
            y: 6.0,
            src: "wide.png".to_string(),
            width: Some(100.0),
            height: Some(100.0),
        });
        let (result, calls) = record(&[area], dir.path());
        result.unwrap();
        assert_eq!(
            calls[4..],
            ["save", "translate 5 6", "scale 0.5 0.5", "image 200x100", "restore"]
        );
    }

    #[test]
    fn test_areas_painted_in_order() {
        let areas = [text(0.0, 0.0, "first"), text(0.0, 0.0, "second")];
        let (result, calls) = record(&areas, Path::new("."));
        result.unwrap();
        let texts: Vec<&String> = calls.iter().filter(|call| call.starts_with("text")).collect();
        assert_eq!(texts, ["text \"first\"", "text \"second\""]);
    }

    #[test]
    fn test_unknown_area_skipped() {
        let areas = [Area::Unknown { kind: "barcode".to_string() }, text(0.0, 0.0, "after")];
        let (result, calls) = record(&areas, Path::new("."));
        result.unwrap();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls[6], "text \"after\"");
    }

    #[test]
    fn test_state_restored_when_area_fails() {
        let Area::Text(mut broken) = text(3.0, 4.0, "<b>unclosed") else {
            unreachable!()
        };
        broken.allow_markup = true;
        let (result, calls) = record(&[Area::Text(broken), text(0.0, 0.0, "never")], Path::new("."));
        assert!(result.is_err());
        assert_eq!(calls.last().map(String::as_str), Some("restore"));
        assert!(!calls.iter().any(|call| call.contains("never")));
    }

    #[test]
    fn test_missing_image_stops_render() {
        let dir = tempfile::tempdir().unwrap();
        let area = Area::Image(ImageArea {
            x: 0.0,
            y: 0.0,
            src: "missing.png".to_string(),
            width: Some(10.0),
            height: Some(10.0),
        });
        let (result, calls) = record(&[area], dir.path());
        assert!(matches!(result, Err(OverlayError::ImageNotFound(_))));
        assert_eq!(calls[4..], ["save", "restore"]);
    }

    #[test]
    fn test_composite_formats() {
        let config = RenderConfig::default();
        let mut fonts = fonts();
        let template = template();
        let areas = [text(10.0, 10.0, "Hi")];
        let mut compositor = Compositor::new(&config, &mut fonts, Path::new("."));

        let pdf = compositor.composite(&template, &areas, OutputFormat::Pdf).unwrap();
        assert!(pdf.starts_with(b"%PDF"));

        let png = compositor.composite(&template, &areas, OutputFormat::Img).unwrap();
        let image = image::load_from_memory(&png).unwrap();
        assert_eq!((image.width(), image.height()), (200, 100));
    }
}
