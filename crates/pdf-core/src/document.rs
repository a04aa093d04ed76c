//! Vector canvas: composes a new single-page PDF

use crate::font::{font_objects, postscript_name, subset_tag, EmbeddedGlyph};
use crate::image::{deflate, generate_image_operators, RasterImage};
use crate::text::{generate_rect_operators, generate_text_operators, GlyphCode, TextRenderContext};
use crate::{pdf_number, Canvas, Color, FontFace, Matrix, PdfError, Result, TemplatePage, TextLayout};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Content of the page in drawing order
///
/// Text cannot be encoded before the fonts are subset, so it is buffered in
/// place and encoded during `finish`.
#[derive(Debug)]
enum ContentSegment {
    Raw(Vec<u8>),
    Text(BufferedTextOp),
}

/// A buffered run of glyphs in the user space current when it was drawn
#[derive(Debug, Clone)]
struct BufferedTextOp {
    /// Index into `PdfDocument::fonts`
    font: usize,
    font_size: f32,
    color: Color,
    baseline: f64,
    /// (original glyph id, origin x, rise)
    glyphs: Vec<(u16, f64, f64)>,
}

/// A face used on the page, embedded at `finish`
#[derive(Debug)]
struct EmbeddedFont {
    face: Arc<dyn FontFace>,
    /// Resource name, e.g. `F1`
    resource: String,
    /// Original glyph id -> first cluster text drawn with it
    used: BTreeMap<u16, String>,
}

/// Font program and glyph mapping ready for embedding
struct PreparedFont {
    base_font: String,
    program: Vec<u8>,
    glyphs: BTreeMap<u16, EmbeddedGlyph>,
    remap: HashMap<u16, u16>,
}

/// PDF drawing surface producing a fresh single-page document.
///
/// The template page is embedded as a Form XObject, images as image
/// XObjects (each distinct image once) and fonts as subset Type0/CID fonts.
pub struct PdfDocument {
    inner: Document,
    width: f64,
    height: f64,
    segments: Vec<ContentSegment>,
    ctm: Matrix,
    stack: Vec<Matrix>,
    fonts: Vec<EmbeddedFont>,
    font_index: HashMap<String, usize>,
    /// XObject resources in insertion order
    xobjects: Vec<(String, ObjectId)>,
    /// Embedded images by content hash, compared in full before reuse
    image_index: HashMap<u64, Vec<(RasterImage, String)>>,
    image_count: usize,
    form_count: usize,
    compress: bool,
}

impl PdfDocument {
    /// Create an empty page of `width` x `height` points
    pub fn new(width: f64, height: f64) -> Self {
        let mut document = Self {
            inner: Document::with_version("1.7"),
            width,
            height,
            segments: Vec::new(),
            ctm: Matrix::identity(),
            stack: Vec::new(),
            fonts: Vec::new(),
            font_index: HashMap::new(),
            xobjects: Vec::new(),
            image_index: HashMap::new(),
            image_count: 0,
            form_count: 0,
            compress: true,
        };
        // PDF space is y-up from the bottom-left; user space is y-down from the top-left
        let flip = Matrix::new(1.0, 0.0, 0.0, -1.0, 0.0, height);
        document.push_raw(format!("{}\n", flip.to_operator("cm")).into_bytes());
        document
    }

    /// Flate-compress content, form and font streams (on by default)
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Current transform relative to the top-left page origin
    pub fn transform(&self) -> Matrix {
        self.ctm
    }

    fn encode_stream(&self, mut dict: Dictionary, raw: Vec<u8>) -> Result<Stream> {
        if !self.compress {
            return Ok(Stream::new(dict, raw));
        }
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        Ok(Stream::new(dict, deflate(&raw)?))
    }

    fn push_raw(&mut self, bytes: Vec<u8>) {
        if let Some(ContentSegment::Raw(last)) = self.segments.last_mut() {
            last.extend_from_slice(&bytes);
        } else {
            self.segments.push(ContentSegment::Raw(bytes));
        }
    }

    fn font_for(&mut self, face: &Arc<dyn FontFace>) -> usize {
        if let Some(index) = self.font_index.get(face.name()) {
            return *index;
        }
        let index = self.fonts.len();
        self.fonts.push(EmbeddedFont {
            face: Arc::clone(face),
            resource: format!("F{}", index + 1),
            used: BTreeMap::new(),
        });
        self.font_index.insert(face.name().to_string(), index);
        index
    }

    /// Import the template page as a Form XObject, returning its resource name
    fn import_page(&mut self, page: &TemplatePage) -> Result<String> {
        let resources = {
            let mut importer = ObjectImporter::new(page.document(), &mut self.inner);
            importer.import_dict(&page.resources())
        };
        let content = page.content()?;
        let [x0, y0, x1, y1] = page.media_box();

        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Form".to_vec()));
        dict.set(
            "BBox",
            vec![
                Object::Real(x0 as f32),
                Object::Real(y0 as f32),
                Object::Real(x1 as f32),
                Object::Real(y1 as f32),
            ],
        );
        dict.set("Resources", resources);
        let content_len = content.len();
        let form = self.encode_stream(dict, content)?;
        let form_id = self.inner.add_object(form);

        self.form_count += 1;
        let name = format!("Tpl{}", self.form_count);
        self.xobjects.push((name.clone(), form_id));
        log::debug!("template imported as /{name} ({content_len} content bytes)");
        Ok(name)
    }

    /// Embed an image once per distinct content, returning its resource name
    fn image_resource(&mut self, image: &RasterImage) -> Result<String> {
        let hash = image.content_hash();
        if let Some(embedded) = self.image_index.get(&hash) {
            if let Some((_, name)) = embedded.iter().find(|(seen, _)| seen.same_content(image)) {
                return Ok(name.clone());
            }
        }

        let xobject = image.to_xobject()?;
        let mut stream = xobject.to_pdf_stream();
        if let Some(mask) = xobject.soft_mask_stream() {
            let mask_id = self.inner.add_object(mask);
            stream.dict.set("SMask", Object::Reference(mask_id));
        }
        let image_id = self.inner.add_object(stream);

        self.image_count += 1;
        let name = format!("Im{}", self.image_count);
        self.xobjects.push((name.clone(), image_id));
        self.image_index
            .entry(hash)
            .or_default()
            .push((image.clone(), name.clone()));
        log::debug!(
            "embedded image /{name}: {}x{} {}",
            xobject.width,
            xobject.height,
            xobject.filter
        );
        Ok(name)
    }

    /// Subset a face to its used glyphs; falls back to the full program
    fn prepare_font(font: &EmbeddedFont) -> PreparedFont {
        let mut remapper = subsetter::GlyphRemapper::new();
        remapper.remap(0);
        for glyph_id in font.used.keys() {
            remapper.remap(*glyph_id);
        }

        let subset = subsetter::subset(font.face.data(), font.face.face_index(), &remapper);
        let (program, remap, subset) = match subset {
            Ok(program) => {
                let remap = font
                    .used
                    .keys()
                    .map(|id| (*id, remapper.get(*id).unwrap_or(0)))
                    .collect::<HashMap<_, _>>();
                (program, remap, true)
            }
            Err(err) => {
                log::warn!(
                    "subsetting {} failed ({err:?}), embedding the full font",
                    font.face.name()
                );
                let identity = font.used.keys().map(|id| (*id, *id)).collect();
                (font.face.data().to_vec(), identity, false)
            }
        };

        let glyphs: BTreeMap<u16, EmbeddedGlyph> = font
            .used
            .iter()
            .map(|(original_id, text)| {
                let embedded_id = remap.get(original_id).copied().unwrap_or(0);
                (
                    embedded_id,
                    EmbeddedGlyph {
                        original_id: *original_id,
                        embedded_id,
                        text: text.clone(),
                    },
                )
            })
            .collect();

        let name = postscript_name(font.face.name());
        let base_font = if subset {
            format!("{}+{name}", subset_tag(&glyphs))
        } else {
            name
        };

        PreparedFont {
            base_font,
            program,
            glyphs,
            remap,
        }
    }

    /// Add the font objects to the document, returning the Type0 font id
    fn embed_font(&mut self, font_index: usize, prepared: &PreparedFont) -> Result<ObjectId> {
        let face = Arc::clone(&self.fonts[font_index].face);
        let original_size = prepared.program.len();
        let mut objects = font_objects(
            face.as_ref(),
            &prepared.base_font,
            prepared.program.clone(),
            &prepared.glyphs,
        );

        let font_file = self.encode_stream(
            objects.font_file_stream.dict.clone(),
            std::mem::take(&mut objects.font_file_stream.content),
        )?;
        let font_file_id = self.inner.add_object(font_file);

        objects
            .font_descriptor
            .set(objects.font_file_key, Object::Reference(font_file_id));
        let descriptor_id = self.inner.add_object(objects.font_descriptor);

        objects
            .cid_font
            .set("FontDescriptor", Object::Reference(descriptor_id));
        let cid_font_id = self.inner.add_object(objects.cid_font);

        let tounicode_id = self.inner.add_object(objects.tounicode_stream);

        objects
            .type0_font
            .set("DescendantFonts", vec![Object::Reference(cid_font_id)]);
        objects
            .type0_font
            .set("ToUnicode", Object::Reference(tounicode_id));
        let font_id = self.inner.add_object(objects.type0_font);

        log::debug!(
            "embedded font {} ({} glyphs, {original_size} bytes)",
            prepared.base_font,
            prepared.glyphs.len()
        );
        Ok(font_id)
    }

    /// Encode all segments, embed fonts and serialize the document
    pub fn to_bytes(mut self) -> Result<Vec<u8>> {
        if !self.stack.is_empty() {
            log::warn!("{} unbalanced save() on the PDF canvas", self.stack.len());
            for _ in 0..self.stack.len() {
                self.push_raw(b"Q\n".to_vec());
            }
            self.stack.clear();
        }

        let prepared: Vec<PreparedFont> = self.fonts.iter().map(Self::prepare_font).collect();
        let mut font_resources = Dictionary::new();
        for (index, font) in prepared.iter().enumerate() {
            let font_id = self.embed_font(index, font)?;
            font_resources.set(self.fonts[index].resource.clone(), Object::Reference(font_id));
        }

        let mut content = Vec::new();
        for segment in &self.segments {
            match segment {
                ContentSegment::Raw(bytes) => content.extend_from_slice(bytes),
                ContentSegment::Text(op) => {
                    let font = &self.fonts[op.font];
                    let remap = &prepared[op.font].remap;
                    let codes: Vec<GlyphCode> = op
                        .glyphs
                        .iter()
                        .map(|(glyph_id, x, rise)| GlyphCode {
                            code: remap.get(glyph_id).copied().unwrap_or(0),
                            x: *x,
                            natural_advance: font.face.advance_points(*glyph_id, op.font_size),
                            rise: *rise,
                        })
                        .collect();
                    let ctx = TextRenderContext {
                        font_name: font.resource.clone(),
                        font_size: op.font_size,
                        color: op.color,
                    };
                    content.extend_from_slice(&generate_text_operators(&codes, op.baseline, &ctx));
                }
            }
        }

        let content_stream = self.encode_stream(Dictionary::new(), content)?;
        let content_id = self.inner.add_object(content_stream);

        let mut resources = Dictionary::new();
        if !font_resources.is_empty() {
            resources.set("Font", font_resources);
        }
        if !self.xobjects.is_empty() {
            let mut xobjects = Dictionary::new();
            for (name, id) in &self.xobjects {
                xobjects.set(name.clone(), Object::Reference(*id));
            }
            resources.set("XObject", xobjects);
        }

        let pages_id = self.inner.new_object_id();
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set(
            "MediaBox",
            vec![
                0.into(),
                0.into(),
                Object::Real(self.width as f32),
                Object::Real(self.height as f32),
            ],
        );
        page.set("Resources", resources);
        page.set("Contents", Object::Reference(content_id));
        let page_id = self.inner.add_object(page);

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Kids", vec![Object::Reference(page_id)]);
        pages.set("Count", 1);
        self.inner.objects.insert(pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = self.inner.add_object(catalog);
        self.inner.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        self.inner
            .save_to(&mut buffer)
            .map_err(|e| PdfError::SaveError(e.to_string()))?;
        log::info!(
            "PDF written: {} bytes, {} fonts, {} xobjects",
            buffer.len(),
            self.fonts.len(),
            self.xobjects.len()
        );
        Ok(buffer)
    }
}

impl Canvas for PdfDocument {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    fn save(&mut self) {
        self.stack.push(self.ctm);
        self.push_raw(b"q\n".to_vec());
    }

    fn restore(&mut self) {
        match self.stack.pop() {
            Some(ctm) => {
                self.ctm = ctm;
                self.push_raw(b"Q\n".to_vec());
            }
            None => log::warn!("restore() without matching save() on the PDF canvas"),
        }
    }

    fn translate(&mut self, tx: f64, ty: f64) {
        let m = Matrix::translation(tx, ty);
        self.ctm = m.concat(self.ctm);
        self.push_raw(format!("{}\n", m.to_operator("cm")).into_bytes());
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        let m = Matrix::scaling(sx, sy);
        self.ctm = m.concat(self.ctm);
        self.push_raw(format!("{}\n", m.to_operator("cm")).into_bytes());
    }

    fn paint(&mut self, color: Color) -> Result<()> {
        let mut ops = String::from("q\n");
        match self.ctm.invert() {
            Some(inverse) if !inverse.is_identity() => {
                ops.push_str(&inverse.to_operator("cm"));
                ops.push('\n');
            }
            Some(_) => {}
            None => log::warn!("singular transform, painting in current user space"),
        }
        ops.push_str(&format!(
            "{}\n0 0 {} {} re\nf\nQ\n",
            color.fill_operator(),
            pdf_number(self.width),
            pdf_number(self.height)
        ));
        self.push_raw(ops.into_bytes());
        Ok(())
    }

    fn draw_page(&mut self, page: &TemplatePage) -> Result<()> {
        let name = self.import_page(page)?;
        let ops = format!("q\n{}\n/{name} Do\nQ\n", page.page_matrix().to_operator("cm"));
        self.push_raw(ops.into_bytes());
        Ok(())
    }

    fn draw_image(&mut self, image: &RasterImage) -> Result<()> {
        let name = self.image_resource(image)?;
        let ops = generate_image_operators(&name, image.width() as f64, image.height() as f64);
        self.push_raw(ops);
        Ok(())
    }

    fn draw_text(&mut self, layout: &TextLayout) -> Result<()> {
        for (line, run) in layout.runs() {
            if run.glyphs.is_empty() {
                continue;
            }
            let scale = run.scale();
            let baseline = line.baseline - run.rise;

            if let Some(background) = run.background {
                let rect = generate_rect_operators(
                    run.x_start(),
                    line.top,
                    run.x_end() - run.x_start(),
                    line.height,
                    background,
                );
                self.push_raw(rect);
            }

            let font = self.font_for(&run.face);
            for glyph in &run.glyphs {
                let text = self.fonts[font].used.entry(glyph.glyph_id).or_default();
                if text.is_empty() {
                    text.push_str(&glyph.text);
                }
            }
            self.segments.push(ContentSegment::Text(BufferedTextOp {
                font,
                font_size: run.font_size,
                color: run.color,
                baseline,
                glyphs: run
                    .glyphs
                    .iter()
                    .map(|glyph| (glyph.glyph_id, glyph.origin_x(), glyph.y_offset))
                    .collect(),
            }));

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
                let rect = generate_rect_operators(
                    run.x_start(),
                    center - thickness / 2.0,
                    run.x_end() - run.x_start(),
                    thickness,
                    run.color,
                );
                self.push_raw(rect);
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        (*self).to_bytes()
    }
}

/// Copies objects from a template document into the output document,
/// renumbering references. Page tree back links (`/Parent`) are dropped.
struct ObjectImporter<'a> {
    source: &'a Document,
    target: &'a mut Document,
    mapped: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectImporter<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            mapped: HashMap::new(),
        }
    }

    fn import(&mut self, object: &Object) -> Object {
        match object {
            Object::Reference(id) => self.import_reference(*id),
            Object::Array(items) => Object::Array(items.iter().map(|item| self.import(item)).collect()),
            Object::Dictionary(dict) => Object::Dictionary(self.import_dict(dict)),
            Object::Stream(stream) => {
                let mut copy = stream.clone();
                copy.dict = self.import_dict(&stream.dict);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn import_reference(&mut self, id: ObjectId) -> Object {
        if let Some(new_id) = self.mapped.get(&id) {
            return Object::Reference(*new_id);
        }
        let Ok(source_object) = self.source.get_object(id) else {
            log::debug!("dangling reference {} {} R in template", id.0, id.1);
            return Object::Null;
        };
        let new_id = self.target.new_object_id();
        // mapped before recursing so cycles terminate
        self.mapped.insert(id, new_id);
        let imported = self.import(source_object);
        self.target.objects.insert(new_id, imported);
        Object::Reference(new_id)
    }

    fn import_dict(&mut self, dict: &Dictionary) -> Dictionary {
        let mut imported = Dictionary::new();
        for (key, value) in dict.iter() {
            if key.as_slice() == b"Parent" {
                continue;
            }
            imported.set(key.clone(), self.import(value));
        }
        imported
    }
}
