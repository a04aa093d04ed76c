//! Template page rasterizer: interprets the page's content stream into a pixmap
//!
//! Covers the operators common in form-like templates: paths, fills and
//! strokes, clipping, DeviceGray/RGB/CMYK colors, image and form XObjects and
//! text set in embedded TrueType fonts. Anything else is skipped.

use crate::canvas::{rect_path, solid_paint};
use crate::{glyph_path, premultiply, to_transform, RasterError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use pdf_core::template::resolve;
use pdf_core::{Color, FontData, FontFace, Matrix, TemplatePage};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, IntSize, LineCap, LineJoin, Mask, Path, PathBuilder, Pixmap,
    PixmapPaint, Stroke, StrokeDash,
};

/// Nested form XObjects are followed at most this deep
const MAX_FORM_DEPTH: usize = 12;

/// Paint `page` into `pixmap`.
///
/// # Arguments
/// * `pixmap` - Target pixels
/// * `page` - Template page to interpret
/// * `transform` - Map from PDF page space to pixels
/// * `substitute` - Face used for text whose font program is not embedded
pub fn render_page(
    pixmap: &mut Pixmap,
    page: &TemplatePage,
    transform: Matrix,
    substitute: Option<&Arc<dyn FontFace>>,
) -> Result<()> {
    let content = page.content()?;
    let resources = page.resources();

    let mut renderer = PageRenderer::new(page.document(), pixmap, transform, substitute.cloned());
    let [x0, y0, x1, y1] = page.media_box();
    if let Some(path) = rect_path(x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32) {
        renderer.clip(&path, FillRule::Winding);
    }
    renderer.run(&content, &resources, 0);
    log::debug!("template page rasterized");
    Ok(())
}

/// Color, line and text parameters saved by `q` and restored by `Q`
#[derive(Clone)]
struct GraphicsState {
    ctm: Matrix,
    clip: Option<Rc<Mask>>,
    fill: Color,
    stroke: Color,
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    dash: Option<(Vec<f32>, f32)>,
    font: Option<Rc<PdfFont>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scaling: f64,
    leading: f64,
    rise: f64,
    render_mode: i64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            clip: None,
            fill: Color::black(),
            stroke: Color::black(),
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            dash: None,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

/// How a font's character codes reach glyph ids
#[derive(Debug, Clone, PartialEq)]
enum GlyphMapping {
    /// Two-byte CIDs, glyph id equals CID
    Identity,
    /// Two-byte CIDs through a CIDToGIDMap stream
    CidMap(Vec<u16>),
    /// One-byte codes through the font's own cmap
    Cmap,
    /// Codes read as Unicode scalars in a substitute face
    Unicode { two_byte: bool },
}

/// A font resource prepared for drawing
#[derive(Debug)]
struct PdfFont {
    face: Option<Arc<dyn FontFace>>,
    mapping: GlyphMapping,
    /// Widths in glyph space (1/1000 em) by character code
    widths: HashMap<u16, f64>,
    default_width: Option<f64>,
}

impl PdfFont {
    fn two_byte(&self) -> bool {
        match &self.mapping {
            GlyphMapping::Identity | GlyphMapping::CidMap(_) => true,
            GlyphMapping::Cmap => false,
            GlyphMapping::Unicode { two_byte } => *two_byte,
        }
    }

    fn codes(&self, bytes: &[u8]) -> Vec<u16> {
        if self.two_byte() {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [high, low] => u16::from_be_bytes([*high, *low]),
                    [single] => *single as u16,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|byte| *byte as u16).collect()
        }
    }

    fn glyph(&self, code: u16) -> Option<u16> {
        let face = self.face.as_ref()?;
        match &self.mapping {
            GlyphMapping::Identity => Some(code),
            GlyphMapping::CidMap(map) => map.get(code as usize).copied(),
            GlyphMapping::Cmap => char::from_u32(code as u32)
                .and_then(|c| face.glyph_id(c))
                // symbolic fonts map their codes into the private use area
                .or_else(|| char::from_u32(0xF000 + code as u32).and_then(|c| face.glyph_id(c))),
            GlyphMapping::Unicode { .. } => char::from_u32(code as u32).and_then(|c| face.glyph_id(c)),
        }
    }

    /// Advance of `code` in glyph space units
    fn width(&self, code: u16, glyph: Option<u16>) -> f64 {
        if let Some(width) = self.widths.get(&code) {
            return *width;
        }
        if let Some(width) = self.default_width {
            return width;
        }
        match (&self.face, glyph) {
            (Some(face), Some(glyph)) => face.advance_points(glyph, 1000.0),
            _ => 0.0,
        }
    }
}

struct PageRenderer<'a> {
    document: &'a Document,
    pixmap: &'a mut Pixmap,
    substitute: Option<Arc<dyn FontFace>>,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    path: PathBuilder,
    /// Current point and start of the open subpath, for `v` and `h`
    current: Option<(f32, f32)>,
    subpath_start: Option<(f32, f32)>,
    pending_clip: Option<FillRule>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    fonts: HashMap<ObjectId, Rc<PdfFont>>,
}

impl<'a> PageRenderer<'a> {
    fn new(
        document: &'a Document,
        pixmap: &'a mut Pixmap,
        transform: Matrix,
        substitute: Option<Arc<dyn FontFace>>,
    ) -> Self {
        Self {
            document,
            pixmap,
            substitute,
            state: GraphicsState::new(transform),
            stack: Vec::new(),
            path: PathBuilder::new(),
            current: None,
            subpath_start: None,
            pending_clip: None,
            text_matrix: Matrix::identity(),
            line_matrix: Matrix::identity(),
            fonts: HashMap::new(),
        }
    }

    fn run(&mut self, content: &[u8], resources: &Dictionary, depth: usize) {
        let content = match Content::decode(content) {
            Ok(content) => content,
            Err(err) => {
                log::warn!("cannot decode template content stream: {err}");
                return;
            }
        };
        for op in &content.operations {
            if self.apply(op, resources, depth).is_none() {
                log::debug!("skipped malformed operator {} {:?}", op.operator, op.operands);
            }
        }
    }

    /// `None` when the operands do not fit the operator
    fn apply(&mut self, op: &Operation, resources: &Dictionary, depth: usize) -> Option<()> {
        match op.operator.as_str() {
            // graphics state
            "q" => self.stack.push(self.state.clone()),
            "Q" => match self.stack.pop() {
                Some(state) => self.state = state,
                None => log::debug!("unbalanced Q in template content"),
            },
            "cm" => {
                let m = Matrix::from_slice(&numbers(op, 6)?)?;
                self.state.ctm = m.concat(self.state.ctm);
            }
            "w" => self.state.line_width = number(op, 0)?.max(0.0) as f32,
            "J" => {
                self.state.line_cap = match number(op, 0)? as i64 {
                    1 => LineCap::Round,
                    2 => LineCap::Square,
                    _ => LineCap::Butt,
                }
            }
            "j" => {
                self.state.line_join = match number(op, 0)? as i64 {
                    1 => LineJoin::Round,
                    2 => LineJoin::Bevel,
                    _ => LineJoin::Miter,
                }
            }
            "M" => self.state.miter_limit = number(op, 0)?.max(1.0) as f32,
            "d" => {
                let pattern: Vec<f32> = op
                    .operands
                    .first()?
                    .as_array()
                    .ok()?
                    .iter()
                    .filter_map(object_number)
                    .map(|value| value.abs() as f32)
                    .collect();
                let phase = number(op, 1).unwrap_or(0.0) as f32;
                self.state.dash = (!pattern.is_empty()).then_some((pattern, phase));
            }
            "gs" => self.apply_ext_g_state(resources, name(op, 0)?),
            "i" | "ri" => {}

            // color
            "g" => self.state.fill = gray(number(op, 0)?),
            "G" => self.state.stroke = gray(number(op, 0)?),
            "rg" => self.state.fill = rgb(&numbers(op, 3)?),
            "RG" => self.state.stroke = rgb(&numbers(op, 3)?),
            "k" => self.state.fill = cmyk(&numbers(op, 4)?),
            "K" => self.state.stroke = cmyk(&numbers(op, 4)?),
            "cs" => self.state.fill = Color::black(),
            "CS" => self.state.stroke = Color::black(),
            "sc" | "scn" => {
                if let Some(color) = color_from_operands(op) {
                    self.state.fill = color;
                }
            }
            "SC" | "SCN" => {
                if let Some(color) = color_from_operands(op) {
                    self.state.stroke = color;
                }
            }

            // path construction
            "m" => {
                let [x, y] = point(op)?;
                self.move_to(x, y);
            }
            "l" => {
                let [x, y] = point(op)?;
                self.path.line_to(x, y);
                self.current = Some((x, y));
            }
            "c" => {
                let v: Vec<f32> = numbers(op, 6)?.into_iter().map(|v| v as f32).collect();
                self.curve_to([v[0], v[1]], [v[2], v[3]], [v[4], v[5]]);
            }
            "v" => {
                let v: Vec<f32> = numbers(op, 4)?.into_iter().map(|v| v as f32).collect();
                let (x, y) = self.current?;
                self.curve_to([x, y], [v[0], v[1]], [v[2], v[3]]);
            }
            "y" => {
                let v: Vec<f32> = numbers(op, 4)?.into_iter().map(|v| v as f32).collect();
                self.curve_to([v[0], v[1]], [v[2], v[3]], [v[2], v[3]]);
            }
            "h" => {
                self.path.close();
                self.current = self.subpath_start;
            }
            "re" => {
                let v: Vec<f32> = numbers(op, 4)?.into_iter().map(|v| v as f32).collect();
                let (x, y, w, h) = (v[0], v[1], v[2], v[3]);
                self.move_to(x, y);
                self.path.line_to(x + w, y);
                self.path.line_to(x + w, y + h);
                self.path.line_to(x, y + h);
                self.path.close();
            }

            // path painting
            "S" => self.paint_path(false, None, true),
            "s" => self.paint_path(true, None, true),
            "f" | "F" => self.paint_path(false, Some(FillRule::Winding), false),
            "f*" => self.paint_path(false, Some(FillRule::EvenOdd), false),
            "B" => self.paint_path(false, Some(FillRule::Winding), true),
            "B*" => self.paint_path(false, Some(FillRule::EvenOdd), true),
            "b" => self.paint_path(true, Some(FillRule::Winding), true),
            "b*" => self.paint_path(true, Some(FillRule::EvenOdd), true),
            "n" => self.paint_path(false, None, false),
            "W" => self.pending_clip = Some(FillRule::Winding),
            "W*" => self.pending_clip = Some(FillRule::EvenOdd),

            // xobjects
            "Do" => self.draw_xobject(resources, name(op, 0)?, depth),

            // text objects and state
            "BT" => {
                self.text_matrix = Matrix::identity();
                self.line_matrix = Matrix::identity();
            }
            "ET" => {}
            "Tf" => {
                let font_name = name(op, 0)?;
                self.state.font_size = number(op, 1)?;
                self.state.font = self.load_font(resources, font_name);
            }
            "Tc" => self.state.char_spacing = number(op, 0)?,
            "Tw" => self.state.word_spacing = number(op, 0)?,
            "Tz" => self.state.horizontal_scaling = number(op, 0)? / 100.0,
            "TL" => self.state.leading = number(op, 0)?,
            "Ts" => self.state.rise = number(op, 0)?,
            "Tr" => self.state.render_mode = number(op, 0)? as i64,
            "Td" => {
                let [tx, ty] = point(op)?;
                self.next_line(tx as f64, ty as f64);
            }
            "TD" => {
                let [tx, ty] = point(op)?;
                self.state.leading = -(ty as f64);
                self.next_line(tx as f64, ty as f64);
            }
            "Tm" => {
                self.text_matrix = Matrix::from_slice(&numbers(op, 6)?)?;
                self.line_matrix = self.text_matrix;
            }
            "T*" => self.next_line(0.0, -self.state.leading),

            // text showing
            "Tj" => self.show_text(string(op, 0)?),
            "'" => {
                self.next_line(0.0, -self.state.leading);
                self.show_text(string(op, 0)?);
            }
            "\"" => {
                self.state.word_spacing = number(op, 0)?;
                self.state.char_spacing = number(op, 1)?;
                self.next_line(0.0, -self.state.leading);
                self.show_text(string(op, 2)?);
            }
            "TJ" => {
                for item in op.operands.first()?.as_array().ok()? {
                    match item {
                        Object::String(bytes, _) => self.show_text(bytes),
                        other => {
                            if let Some(adjust) = object_number(other) {
                                let tx = -adjust / 1000.0
                                    * self.state.font_size
                                    * self.state.horizontal_scaling;
                                self.text_matrix = Matrix::translation(tx, 0.0).concat(self.text_matrix);
                            }
                        }
                    }
                }
            }

            other => log::trace!("ignoring operator {other}"),
        }
        Some(())
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(x, y);
        self.current = Some((x, y));
        self.subpath_start = Some((x, y));
    }

    fn curve_to(&mut self, c1: [f32; 2], c2: [f32; 2], end: [f32; 2]) {
        self.path.cubic_to(c1[0], c1[1], c2[0], c2[1], end[0], end[1]);
        self.current = Some((end[0], end[1]));
    }

    fn paint_path(&mut self, close: bool, fill: Option<FillRule>, stroke: bool) {
        let mut builder = std::mem::replace(&mut self.path, PathBuilder::new());
        if close {
            builder.close();
        }
        let clip_rule = self.pending_clip.take();
        self.current = None;
        self.subpath_start = None;
        let Some(path) = builder.finish() else {
            return;
        };

        let transform = to_transform(self.state.ctm);
        let mask = self.state.clip.clone();
        if let Some(rule) = fill {
            let paint = solid_paint(self.state.fill, self.state.fill_alpha);
            self.pixmap
                .fill_path(&path, &paint, rule, transform, mask.as_deref());
        }
        if stroke {
            let paint = solid_paint(self.state.stroke, self.state.stroke_alpha);
            let stroke = self.stroke_style();
            self.pixmap
                .stroke_path(&path, &paint, &stroke, transform, mask.as_deref());
        }
        if let Some(rule) = clip_rule {
            self.clip(&path, rule);
        }
    }

    fn stroke_style(&self) -> Stroke {
        let dash = self.state.dash.as_ref().and_then(|(pattern, phase)| {
            let mut pattern = pattern.clone();
            if pattern.len() % 2 == 1 {
                pattern.extend_from_within(..);
            }
            StrokeDash::new(pattern, *phase)
        });
        Stroke {
            width: self.state.line_width,
            miter_limit: self.state.miter_limit,
            line_cap: self.state.line_cap,
            line_join: self.state.line_join,
            dash,
        }
    }

    /// Intersect the clip region with `path` in current user space
    fn clip(&mut self, path: &Path, rule: FillRule) {
        let transform = to_transform(self.state.ctm);
        let mask = match &self.state.clip {
            Some(current) => {
                let mut mask = Mask::clone(current);
                mask.intersect_path(path, rule, true, transform);
                mask
            }
            None => {
                let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
                    return;
                };
                mask.fill_path(path, rule, true, transform);
                mask
            }
        };
        self.state.clip = Some(Rc::new(mask));
    }

    fn apply_ext_g_state(&mut self, resources: &Dictionary, key: &[u8]) {
        let Some(Object::Dictionary(params)) = lookup(self.document, resources, b"ExtGState", key) else {
            log::debug!("missing ExtGState {}", String::from_utf8_lossy(key));
            return;
        };
        let document = self.document;
        let value = |key: &[u8]| params.get(key).ok().and_then(|v| object_number(resolve(document, v)));
        if let Some(width) = value(b"LW") {
            self.state.line_width = width.max(0.0) as f32;
        }
        if let Some(alpha) = value(b"CA") {
            self.state.stroke_alpha = alpha.clamp(0.0, 1.0) as f32;
        }
        if let Some(alpha) = value(b"ca") {
            self.state.fill_alpha = alpha.clamp(0.0, 1.0) as f32;
        }
    }

    fn draw_xobject(&mut self, resources: &Dictionary, key: &[u8], depth: usize) {
        let Some(Object::Stream(stream)) = lookup(self.document, resources, b"XObject", key) else {
            log::debug!("missing XObject {}", String::from_utf8_lossy(key));
            return;
        };
        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => {
                if let Err(err) = self.draw_image(stream) {
                    log::debug!("skipped image {}: {err}", String::from_utf8_lossy(key));
                }
            }
            Ok(b"Form") => self.draw_form(stream, resources, depth),
            _ => log::debug!("unsupported XObject {}", String::from_utf8_lossy(key)),
        }
    }

    fn draw_form(&mut self, stream: &Stream, parent_resources: &Dictionary, depth: usize) {
        if depth >= MAX_FORM_DEPTH {
            log::warn!("form XObjects nested deeper than {MAX_FORM_DEPTH}, skipping");
            return;
        }
        let document = self.document;
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| resolve(document, m).as_array().ok())
            .and_then(|items| {
                let values: Vec<f64> = items.iter().filter_map(object_number).collect();
                Matrix::from_slice(&values)
            })
            .unwrap_or_default();
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve(document, r).as_dict().ok())
            .unwrap_or(parent_resources);
        let bbox: Option<Vec<f64>> = stream
            .dict
            .get(b"BBox")
            .ok()
            .and_then(|b| resolve(document, b).as_array().ok())
            .map(|items| items.iter().filter_map(object_number).collect());
        let content = stream_data(stream);

        let saved = self.state.clone();
        let saved_depth = self.stack.len();
        self.state.ctm = matrix.concat(self.state.ctm);
        if let Some([x0, y0, x1, y1]) = bbox.as_deref().and_then(|b| <[f64; 4]>::try_from(b).ok()) {
            if let Some(path) = rect_path(x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32) {
                self.clip(&path, FillRule::Winding);
            }
        }
        self.run(&content, resources, depth + 1);
        self.stack.truncate(saved_depth);
        self.state = saved;
    }

    fn draw_image(&mut self, stream: &Stream) -> Result<()> {
        let mut image = decode_image(self.document, stream)?;
        premultiply(&mut image.rgba);

        let size = IntSize::from_wh(image.width, image.height)
            .ok_or(RasterError::InvalidSize(image.width, image.height))?;
        let source = Pixmap::from_vec(image.rgba, size)
            .ok_or_else(|| RasterError::Image("sample buffer does not match image size".to_string()))?;

        // pixel grid (rows top down) onto the unit square
        let unit = Matrix::new(
            1.0 / image.width as f64,
            0.0,
            0.0,
            -1.0 / image.height as f64,
            0.0,
            1.0,
        );
        let paint = PixmapPaint {
            opacity: self.state.fill_alpha,
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let mask = self.state.clip.clone();
        self.pixmap.draw_pixmap(
            0,
            0,
            source.as_ref(),
            &paint,
            to_transform(unit.concat(self.state.ctm)),
            mask.as_deref(),
        );
        Ok(())
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translation(tx, ty).concat(self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show_text(&mut self, bytes: &[u8]) {
        let Some(font) = self.state.font.clone() else {
            log::debug!("text shown without a font");
            return;
        };
        let state = &self.state;
        let size = state.font_size;
        let scaling = state.horizontal_scaling;
        let fills = matches!(state.render_mode, 0 | 2 | 4 | 6);
        let strokes = matches!(state.render_mode, 1 | 2 | 5 | 6);
        let fill_paint = solid_paint(state.fill, state.fill_alpha);
        let stroke_paint = solid_paint(state.stroke, state.stroke_alpha);
        let stroke = self.stroke_style();
        let mask = self.state.clip.clone();

        for code in font.codes(bytes) {
            let glyph = font.glyph(code);
            if let (Some(face), Some(glyph_id)) = (&font.face, glyph) {
                if fills || strokes {
                    if let Some(path) = glyph_path(face.as_ref(), glyph_id) {
                        let units = 1.0 / face.units_per_em().max(1) as f64;
                        let placement = Matrix::scaling(units, units)
                            .concat(Matrix::new(size * scaling, 0.0, 0.0, size, 0.0, self.state.rise))
                            .concat(self.text_matrix)
                            .concat(self.state.ctm);
                        let transform = to_transform(placement);
                        if fills {
                            self.pixmap
                                .fill_path(&path, &fill_paint, FillRule::Winding, transform, mask.as_deref());
                        }
                        if strokes {
                            // glyph space is scaled; keep the line width in user space
                            let mut glyph_stroke = stroke.clone();
                            glyph_stroke.width = (stroke.width as f64 / (units * size).max(f64::EPSILON)) as f32;
                            self.pixmap
                                .stroke_path(&path, &stroke_paint, &glyph_stroke, transform, mask.as_deref());
                        }
                    }
                }
            }

            let mut advance = font.width(code, glyph) / 1000.0 * size + self.state.char_spacing;
            if code == 32 && !font.two_byte() {
                advance += self.state.word_spacing;
            }
            self.text_matrix = Matrix::translation(advance * scaling, 0.0).concat(self.text_matrix);
        }
    }

    fn load_font(&mut self, resources: &Dictionary, key: &[u8]) -> Option<Rc<PdfFont>> {
        let id = resources
            .get(b"Font")
            .ok()
            .map(|fonts| resolve(self.document, fonts))
            .and_then(|fonts| fonts.as_dict().ok())
            .and_then(|fonts| fonts.get(key).ok())
            .and_then(|font| font.as_reference().ok());
        if let Some(font) = id.and_then(|id| self.fonts.get(&id)) {
            return Some(Rc::clone(font));
        }

        let Some(Object::Dictionary(dict)) = lookup(self.document, resources, b"Font", key) else {
            log::debug!("missing font resource {}", String::from_utf8_lossy(key));
            return None;
        };
        let font = Rc::new(prepare_font(self.document, dict, self.substitute.as_ref()));
        if let Some(id) = id {
            self.fonts.insert(id, Rc::clone(&font));
        }
        Some(font)
    }
}

/// Build a drawable font from a font dictionary
fn prepare_font(document: &Document, dict: &Dictionary, substitute: Option<&Arc<dyn FontFace>>) -> PdfFont {
    let base_font = dict
        .get(b"BaseFont")
        .and_then(Object::as_name)
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_else(|_| "font".to_string());
    let subtype = dict.get(b"Subtype").and_then(Object::as_name).unwrap_or(&b"Type1"[..]);

    if subtype == b"Type0" {
        let descendant = dict
            .get(b"DescendantFonts")
            .ok()
            .and_then(|d| resolve(document, d).as_array().ok())
            .and_then(|items| items.first())
            .and_then(|d| resolve(document, d).as_dict().ok());
        let (widths, default_width) = descendant
            .map(|d| cid_widths(document, d))
            .unwrap_or_default();
        let embedded = descendant.and_then(|d| embedded_face(document, d, &base_font));
        return match embedded {
            Some(face) => {
                let mapping = descendant
                    .and_then(|d| d.get(b"CIDToGIDMap").ok())
                    .map(|m| resolve(document, m))
                    .and_then(|m| match m {
                        Object::Stream(stream) => Some(GlyphMapping::CidMap(
                            stream_data(stream)
                                .chunks_exact(2)
                                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                                .collect(),
                        )),
                        _ => None,
                    })
                    .unwrap_or(GlyphMapping::Identity);
                PdfFont {
                    face: Some(face),
                    mapping,
                    widths,
                    default_width: Some(default_width.unwrap_or(1000.0)),
                }
            }
            None => {
                log::debug!("font {base_font} is not embedded, substituting");
                PdfFont {
                    face: substitute.cloned(),
                    mapping: GlyphMapping::Unicode { two_byte: true },
                    widths,
                    default_width: default_width.or(Some(1000.0)),
                }
            }
        };
    }

    let widths = simple_widths(document, dict);
    match embedded_face(document, dict, &base_font) {
        Some(face) => PdfFont {
            face: Some(face),
            mapping: GlyphMapping::Cmap,
            widths,
            default_width: None,
        },
        None => {
            log::debug!("font {base_font} is not embedded, substituting");
            PdfFont {
                face: substitute.cloned(),
                mapping: GlyphMapping::Unicode { two_byte: false },
                widths,
                default_width: None,
            }
        }
    }
}

/// TrueType or OpenType program from the font descriptor
fn embedded_face(document: &Document, font: &Dictionary, name: &str) -> Option<Arc<dyn FontFace>> {
    let descriptor = font
        .get(b"FontDescriptor")
        .ok()
        .and_then(|d| resolve(document, d).as_dict().ok())?;
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        let Ok(file) = descriptor.get(key) else {
            continue;
        };
        let Object::Stream(stream) = resolve(document, file) else {
            continue;
        };
        match FontData::from_ttf(name, stream_data(stream)) {
            Ok(face) => return Some(Arc::new(face)),
            Err(err) => log::debug!("embedded font {name} unusable: {err}"),
        }
    }
    None
}

/// `/FirstChar` + `/Widths` of a simple font
fn simple_widths(document: &Document, dict: &Dictionary) -> HashMap<u16, f64> {
    let first = dict
        .get(b"FirstChar")
        .ok()
        .and_then(|v| object_number(resolve(document, v)))
        .unwrap_or(0.0) as u16;
    dict.get(b"Widths")
        .ok()
        .and_then(|w| resolve(document, w).as_array().ok())
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, w)| Some((first.checked_add(i as u16)?, object_number(resolve(document, w))?)))
                .collect()
        })
        .unwrap_or_default()
}

/// `/W` and `/DW` of a CIDFont
fn cid_widths(document: &Document, cid_font: &Dictionary) -> (HashMap<u16, f64>, Option<f64>) {
    let default_width = cid_font
        .get(b"DW")
        .ok()
        .and_then(|v| object_number(resolve(document, v)));
    let mut widths = HashMap::new();
    let Some(items) = cid_font
        .get(b"W")
        .ok()
        .and_then(|w| resolve(document, w).as_array().ok())
    else {
        return (widths, default_width);
    };

    let mut i = 0;
    while i < items.len() {
        let Some(start) = object_number(resolve(document, &items[i])) else {
            i += 1;
            continue;
        };
        let start = start as u16;
        match items.get(i + 1).map(|next| resolve(document, next)) {
            // c [w1 w2 ...]
            Some(Object::Array(list)) => {
                for (offset, width) in list.iter().enumerate() {
                    let Some(code) = start.checked_add(offset as u16) else {
                        break;
                    };
                    if let Some(width) = object_number(resolve(document, width)) {
                        widths.insert(code, width);
                    }
                }
                i += 2;
            }
            // c_first c_last w
            Some(last) => {
                let (Some(last), Some(width)) = (
                    object_number(last),
                    items.get(i + 2).and_then(|w| object_number(resolve(document, w))),
                ) else {
                    break;
                };
                for code in start..=(last as u16) {
                    widths.insert(code, width);
                }
                i += 3;
            }
            None => break,
        }
    }
    (widths, default_width)
}

/// Decoded image samples as straight RGBA
struct DecodedImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

fn decode_image(document: &Document, stream: &Stream) -> Result<DecodedImage> {
    let dict = &stream.dict;
    let flag = |key: &[u8]| matches!(dict.get(key).map(|v| resolve(document, v)), Ok(Object::Boolean(true)));
    if flag(b"ImageMask") {
        return Err(RasterError::Image("stencil masks are not supported".to_string()));
    }

    let (width, height, mut rgba) = if filter_names(document, dict).iter().any(|f| f == b"DCTDecode") {
        let decoded = image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
            .map_err(|e| RasterError::Image(e.to_string()))?
            .to_rgba8();
        (decoded.width(), decoded.height(), decoded.into_raw())
    } else {
        let width = dict_u32(document, dict, b"Width")?;
        let height = dict_u32(document, dict, b"Height")?;
        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|b| object_number(resolve(document, b)))
            .unwrap_or(8.0);
        if bits != 8.0 {
            return Err(RasterError::Image(format!("{bits} bits per component")));
        }
        let components = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|cs| color_components(document, cs))
            .ok_or_else(|| RasterError::Image("unsupported color space".to_string()))?;
        let samples = stream_data(stream);
        (width, height, to_rgba(&samples, components, width, height)?)
    };

    if let Ok(mask) = dict.get(b"SMask") {
        if let Object::Stream(mask) = resolve(document, mask) {
            match soft_mask(document, mask, width, height) {
                Ok(alpha) => {
                    for (pixel, a) in rgba.chunks_exact_mut(4).zip(alpha) {
                        pixel[3] = a;
                    }
                }
                Err(err) => log::debug!("ignoring soft mask: {err}"),
            }
        }
    }

    Ok(DecodedImage { width, height, rgba })
}

/// 8-bit gray soft mask resampled to `width` x `height`
fn soft_mask(document: &Document, stream: &Stream, width: u32, height: u32) -> Result<Vec<u8>> {
    let mask_width = dict_u32(document, &stream.dict, b"Width")?;
    let mask_height = dict_u32(document, &stream.dict, b"Height")?;
    let samples = stream_data(stream);
    let gray = image::GrayImage::from_raw(mask_width, mask_height, samples)
        .ok_or_else(|| RasterError::Image("soft mask size mismatch".to_string()))?;
    if (mask_width, mask_height) == (width, height) {
        return Ok(gray.into_raw());
    }
    Ok(image::imageops::resize(&gray, width, height, image::imageops::FilterType::Triangle).into_raw())
}

fn to_rgba(samples: &[u8], components: usize, width: u32, height: u32) -> Result<Vec<u8>> {
    let count = width as usize * height as usize;
    if samples.len() < count * components {
        return Err(RasterError::Image(format!(
            "expected {} samples, found {}",
            count * components,
            samples.len()
        )));
    }
    let mut rgba = Vec::with_capacity(count * 4);
    for pixel in samples.chunks_exact(components).take(count) {
        let [r, g, b] = match pixel {
            [v] => [*v, *v, *v],
            [r, g, b] => [*r, *g, *b],
            [c, m, y, k] => {
                let channel = |v: u8| ((255 - v as u16) * (255 - *k as u16) / 255) as u8;
                [channel(*c), channel(*m), channel(*y)]
            }
            _ => [0, 0, 0],
        };
        rgba.extend_from_slice(&[r, g, b, 255]);
    }
    Ok(rgba)
}

/// Number of color components for the supported color spaces
fn color_components(document: &Document, space: &Object) -> Option<usize> {
    match resolve(document, space) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        Object::Array(items) => match items.first().and_then(|n| n.as_name().ok())? {
            b"ICCBased" => {
                let Object::Stream(profile) = resolve(document, items.get(1)?) else {
                    return None;
                };
                profile
                    .dict
                    .get(b"N")
                    .ok()
                    .and_then(object_number)
                    .map(|n| n as usize)
                    .filter(|n| matches!(n, 1 | 3 | 4))
            }
            b"CalGray" => Some(1),
            b"CalRGB" => Some(3),
            _ => None,
        },
        _ => None,
    }
}

fn filter_names(document: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").map(|f| resolve(document, f)) {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|f| f.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn dict_u32(document: &Document, dict: &Dictionary, key: &[u8]) -> Result<u32> {
    dict.get(key)
        .ok()
        .and_then(|v| object_number(resolve(document, v)))
        .filter(|v| *v >= 1.0)
        .map(|v| v as u32)
        .ok_or_else(|| RasterError::Image(format!("missing /{}", String::from_utf8_lossy(key))))
}

/// Stream bytes with filters removed when lopdf can decode them
fn stream_data(stream: &Stream) -> Vec<u8> {
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}

/// Named entry of a resource category, references followed
fn lookup<'r>(document: &'r Document, resources: &'r Dictionary, category: &[u8], key: &[u8]) -> Option<&'r Object> {
    let entries = resolve(document, resources.get(category).ok()?).as_dict().ok()?;
    Some(resolve(document, entries.get(key).ok()?))
}

fn object_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

fn number(op: &Operation, index: usize) -> Option<f64> {
    object_number(op.operands.get(index)?)
}

fn numbers(op: &Operation, count: usize) -> Option<Vec<f64>> {
    if op.operands.len() < count {
        return None;
    }
    op.operands[..count].iter().map(object_number).collect()
}

fn point(op: &Operation) -> Option<[f32; 2]> {
    Some([number(op, 0)? as f32, number(op, 1)? as f32])
}

fn name<'o>(op: &'o Operation, index: usize) -> Option<&'o [u8]> {
    op.operands.get(index)?.as_name().ok()
}

fn string<'o>(op: &'o Operation, index: usize) -> Option<&'o [u8]> {
    match op.operands.get(index)? {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

fn gray(value: f64) -> Color {
    Color::rgb(value as f32, value as f32, value as f32)
}

fn rgb(values: &[f64]) -> Color {
    Color::rgb(values[0] as f32, values[1] as f32, values[2] as f32)
}

fn cmyk(values: &[f64]) -> Color {
    let k = values[3];
    Color::rgb(
        ((1.0 - values[0]) * (1.0 - k)) as f32,
        ((1.0 - values[1]) * (1.0 - k)) as f32,
        ((1.0 - values[2]) * (1.0 - k)) as f32,
    )
}

/// `sc`/`scn` operands read by count; pattern names are ignored
fn color_from_operands(op: &Operation) -> Option<Color> {
    let values: Vec<f64> = op.operands.iter().map_while(object_number).collect();
    match values.len() {
        1 => Some(gray(values[0])),
        3 => Some(rgb(&values)),
        4 => Some(cmyk(&values)),
        _ => None,
    }
}
