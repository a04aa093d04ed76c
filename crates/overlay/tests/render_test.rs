//! End-to-end tests for overlay rendering
//!
//! Templates and images are written to a temporary directory; text uses the
//! synthetic `MonoFace` so no installed fonts are needed.

use image::{ImageBuffer, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};
use overlay::{
    parse_request, render_json, render_to, render_with_fonts, Compositor, ErrorKind, RenderConfig,
};
use pdf_core::testing::MonoFace;
use pdf_core::{Canvas, Color, FontFace, FontFamily, RasterImage, TemplatePage, TextLayout};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use text_layout::FontBook;

fn write_template(dir: &Path, name: &str, content: &str) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 100.into()],
        "Resources" => dictionary! {},
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![page_id.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(dir.join(name)).unwrap();
}

fn write_png(dir: &Path, name: &str, width: u32, height: u32, pixel: [u8; 4]) {
    let pixels: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba(pixel));
    pixels.save(dir.join(name)).unwrap();
}

fn workspace() -> (TempDir, RenderConfig) {
    let dir = tempfile::tempdir().unwrap();
    write_template(dir.path(), "template.pdf", "");
    let config = RenderConfig {
        system_fonts: false,
        base_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    (dir, config)
}

fn mono_fonts() -> FontBook {
    let mut book = FontBook::new();
    book.register_family(
        "Sans",
        FontFamily {
            regular: Some(Arc::new(MonoFace::new("Mono")) as Arc<dyn FontFace>),
            bold: Some(Arc::new(MonoFace::with_advance("MonoBold", 1000)) as Arc<dyn FontFace>),
            ..Default::default()
        },
    );
    book
}

fn render(json: serde_json::Value, config: &RenderConfig) -> Vec<u8> {
    let request = parse_request(&json.to_string()).unwrap();
    render_with_fonts(&request, config, &mut mono_fonts()).unwrap()
}

fn decode(png: &[u8]) -> RgbaImage {
    image::load_from_memory(png).unwrap().to_rgba8()
}

fn rgb(image: &RgbaImage, x: u32, y: u32) -> [u8; 3] {
    let pixel = image.get_pixel(x, y);
    [pixel[0], pixel[1], pixel[2]]
}

/// Canvas that keeps the text layouts it is asked to draw
#[derive(Default)]
struct LayoutCapture {
    layouts: Vec<TextLayout>,
}

impl Canvas for LayoutCapture {
    fn size(&self) -> (f64, f64) {
        (200.0, 100.0)
    }
    fn save(&mut self) {}
    fn restore(&mut self) {}
    fn translate(&mut self, _tx: f64, _ty: f64) {}
    fn scale(&mut self, _sx: f64, _sy: f64) {}
    fn paint(&mut self, _color: Color) -> pdf_core::Result<()> {
        Ok(())
    }
    fn draw_page(&mut self, _page: &TemplatePage) -> pdf_core::Result<()> {
        Ok(())
    }
    fn draw_image(&mut self, _image: &RasterImage) -> pdf_core::Result<()> {
        Ok(())
    }
    fn draw_text(&mut self, layout: &TextLayout) -> pdf_core::Result<()> {
        self.layouts.push(layout.clone());
        Ok(())
    }
    fn finish(self: Box<Self>) -> pdf_core::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn capture(json: serde_json::Value, dir: &Path, config: &RenderConfig) -> Vec<TextLayout> {
    let request = parse_request(&json.to_string()).unwrap();
    let template = TemplatePage::open(dir.join(&request.template)).unwrap();
    let mut fonts = mono_fonts();
    let mut canvas = LayoutCapture::default();
    Compositor::new(config, &mut fonts, dir)
        .paint(&mut canvas, &template, &request.areas)
        .unwrap();
    canvas.layouts
}

#[test]
fn test_repeated_renders_are_identical() {
    let (dir, config) = workspace();
    write_png(dir.path(), "logo.png", 20, 10, [0, 128, 255, 255]);
    for format in ["pdf", "img"] {
        let request = json!({
            "template": "template.pdf",
            "output_format": format,
            "areas": [
                { "type": "image", "x": 5, "y": 5, "src": "logo.png", "width": 40, "height": 40 },
                { "type": "text", "x": 10, "y": 50, "content": "Same text", "width": 60, "justify": true }
            ]
        });
        assert_eq!(render(request.clone(), &config), render(request, &config), "{format}");
    }
}

#[test]
fn test_later_area_paints_over_earlier() {
    let (_dir, config) = workspace();
    let area = |color: &str| json!({ "type": "text", "x": 10, "y": 10, "content": "HH", "font_size": 20, "color": color });
    let image = decode(&render(
        json!({ "template": "template.pdf", "output_format": "img", "areas": [area("255,0,0"), area("0,0,255")] }),
        &config,
    ));
    // glyph box of the first H: x 11..21, y 12..26
    assert_eq!(rgb(&image, 15, 20), [0, 0, 255]);

    let image = decode(&render(
        json!({ "template": "template.pdf", "output_format": "img", "areas": [area("0,0,255"), area("255,0,0")] }),
        &config,
    ));
    assert_eq!(rgb(&image, 15, 20), [255, 0, 0]);
}

#[test]
fn test_image_fitted_proportionally() {
    let (dir, config) = workspace();
    write_png(dir.path(), "wide.png", 200, 100, [0, 255, 0, 255]);
    let image = decode(&render(
        json!({
            "template": "template.pdf",
            "output_format": "img",
            "areas": [{ "type": "image", "x": 0, "y": 0, "src": "wide.png", "width": 100, "height": 100 }]
        }),
        &config,
    ));
    assert_eq!(rgb(&image, 50, 25), [0, 255, 0]);
    assert_eq!(rgb(&image, 95, 45), [0, 255, 0]);
    assert_eq!(rgb(&image, 50, 60), [255, 255, 255]);
    assert_eq!(rgb(&image, 110, 25), [255, 255, 255]);
}

#[test]
fn test_output_format_switch() {
    let (_dir, config) = workspace();
    let pdf = render(json!({ "template": "template.pdf" }), &config);
    assert!(pdf.starts_with(b"%PDF"));

    let png = render(json!({ "template": "template.pdf", "output_format": "img" }), &config);
    assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    assert_eq!(decode(&png).dimensions(), (200, 100));
}

#[test]
fn test_template_content_survives_in_both_formats() {
    let (dir, config) = workspace();
    write_template(dir.path(), "boxed.pdf", "1 0 0 rg 0 0 20 20 re f");

    let png = render(json!({ "template": "boxed.pdf", "output_format": "img" }), &config);
    let image = decode(&png);
    assert_eq!(rgb(&image, 10, 90), [255, 0, 0]);
    assert_eq!(rgb(&image, 100, 50), [255, 255, 255]);

    let pdf = render(json!({ "template": "boxed.pdf" }), &config);
    let doc = Document::load_mem(&pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
}

#[test]
fn test_missing_template_writes_nothing() {
    let (_dir, config) = workspace();
    let request = parse_request(r#"{ "template": "missing.pdf" }"#).unwrap();
    let mut out = Vec::new();
    let err = render_to(&request, &config, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(out.is_empty());
}

#[test]
fn test_missing_image_is_resource_error() {
    let (_dir, config) = workspace();
    let err = render_json(
        r#"{ "template": "template.pdf",
             "areas": [{ "type": "image", "x": 0, "y": 0, "src": "nope.png", "width": 1, "height": 1 }] }"#,
        &config,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
}

#[test]
fn test_render_json_with_images_only() {
    let (dir, config) = workspace();
    write_png(dir.path(), "dot.png", 1, 1, [0, 0, 0, 255]);
    let json = r#"{ "template": "template.pdf", "output_format": "img",
                    "areas": [{ "type": "image", "x": 10, "y": 10, "src": "dot.png", "width": 5, "height": 5 },
                              { "type": "stamp", "x": 0, "y": 0 }] }"#;
    let image = decode(&render_json(json, &config).unwrap());
    assert_eq!(rgb(&image, 12, 12), [0, 0, 0]);
    assert_eq!(rgb(&image, 20, 20), [255, 255, 255]);
}

#[test]
fn test_default_text_style() {
    let (_dir, config) = workspace();
    let image = decode(&render(
        json!({ "template": "template.pdf", "output_format": "img",
                "areas": [{ "type": "text", "x": 10, "y": 10, "content": "H" }] }),
        &config,
    ));
    // 12pt Mono, black: glyph box x 10.6..16.6, y 11.2..19.6
    assert_eq!(rgb(&image, 13, 15), [0, 0, 0]);
    assert_eq!(rgb(&image, 13, 22), [255, 255, 255]);
    assert_eq!(rgb(&image, 18, 15), [255, 255, 255]);
}

#[test]
fn test_markup_stripped_unless_allowed() {
    let (dir, config) = workspace();
    let area = |allow: bool| json!({ "type": "text", "x": 0, "y": 0, "content": "<b>Hi</b>", "allow_markup": allow });
    let layouts = capture(
        json!({ "template": "template.pdf", "areas": [area(false), area(true)] }),
        dir.path(),
        &config,
    );

    assert_eq!(layouts[0].text(), "Hi");
    assert_eq!(layouts[0].lines[0].runs[0].face.name(), "Mono");
    assert_eq!(layouts[1].text(), "Hi");
    assert_eq!(layouts[1].lines[0].runs[0].face.name(), "MonoBold");
    assert!(layouts[1].width > layouts[0].width);
}

#[test]
fn test_style_span_matches_inline_span() {
    let (dir, config) = workspace();
    let layouts = capture(
        json!({ "template": "template.pdf", "areas": [
            { "type": "text", "x": 0, "y": 0, "content": "Hi", "style": { "foreground": "red", "underline": "single" } },
            { "type": "text", "x": 0, "y": 0, "content": "<span foreground=\"red\" underline=\"single\">Hi</span>", "allow_markup": true }
        ]}),
        dir.path(),
        &config,
    );

    let styled = &layouts[0].lines[0].runs[0];
    let inline = &layouts[1].lines[0].runs[0];
    assert_eq!(styled.color, Color::red());
    assert_eq!(styled.color, inline.color);
    assert_eq!(styled.underline, inline.underline);
    assert_eq!(styled.glyphs, inline.glyphs);
}

#[test]
fn test_wrapped_text_breaks_lines() {
    let (dir, config) = workspace();
    let layouts = capture(
        json!({ "template": "template.pdf", "areas": [
            { "type": "text", "x": 0, "y": 0, "content": "aaa bbb ccc", "font_size": 10, "width": 40 }
        ]}),
        dir.path(),
        &config,
    );
    // 6pt per character: "aaa bbb" is 42pt, so every word gets its own line
    assert_eq!(layouts[0].text(), "aaa\nbbb\nccc");
}
