//! Font handling: the face abstraction, font families and PDF embedding objects

use crate::{PdfError, Result};
use lopdf::{Dictionary, Object, Stream};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Font weight on the usual 100-900 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const THIN: FontWeight = FontWeight(100);
    pub const LIGHT: FontWeight = FontWeight(300);
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const MEDIUM: FontWeight = FontWeight(500);
    pub const SEMIBOLD: FontWeight = FontWeight(600);
    pub const BOLD: FontWeight = FontWeight(700);
    pub const HEAVY: FontWeight = FontWeight(900);

    /// Whether a bold face should be preferred
    pub fn is_bold(self) -> bool {
        self.0 >= 600
    }
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Font style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

/// A loaded font face: metrics, cmap, advances and outlines.
///
/// Layout measures with it, the raster canvas fills its outlines and the
/// PDF canvas embeds its program.
pub trait FontFace: Send + Sync + fmt::Debug {
    /// Unique name, used as the embedding key and PDF BaseFont
    fn name(&self) -> &str;

    /// Raw font program bytes
    fn data(&self) -> &[u8];

    /// Index inside a font collection
    fn face_index(&self) -> u32 {
        0
    }

    fn units_per_em(&self) -> u16;

    fn ascender(&self) -> i16;

    fn descender(&self) -> i16;

    fn line_gap(&self) -> i16 {
        0
    }

    /// Glyph for a character, `None` when the cmap has no entry
    fn glyph_id(&self, c: char) -> Option<u16>;

    /// Horizontal advance in font units
    fn advance(&self, glyph_id: u16) -> Option<u16>;

    /// Feed the glyph outline (font units, y up) into `builder`.
    /// Returns false when the glyph has no outline.
    fn outline(&self, glyph_id: u16, builder: &mut dyn ttf_parser::OutlineBuilder) -> bool;

    /// Underline (position, thickness) in font units
    fn underline_metrics(&self) -> (i16, i16) {
        let upem = self.units_per_em() as i32;
        (-(upem / 10) as i16, (upem / 20).max(1) as i16)
    }

    /// Strikeout (position, thickness) in font units
    fn strikeout_metrics(&self) -> (i16, i16) {
        let upem = self.units_per_em() as i32;
        ((upem * 3 / 10) as i16, (upem / 20).max(1) as i16)
    }

    fn italic_angle(&self) -> f32 {
        0.0
    }

    /// CFF outlines (embedded as FontFile3/OpenType instead of FontFile2)
    fn is_cff(&self) -> bool {
        false
    }

    /// Check if font has a glyph for the given character
    fn has_glyph(&self, c: char) -> bool {
        self.glyph_id(c).map(|id| id != 0).unwrap_or(false)
    }

    /// Advance width in points for a glyph at `font_size`
    fn advance_points(&self, glyph_id: u16, font_size: f32) -> f64 {
        let advance = self.advance(glyph_id).unwrap_or(0) as f64;
        advance * font_size as f64 / self.units_per_em().max(1) as f64
    }
}

/// TrueType/OpenType face backed by `ttf-parser`
#[derive(Clone)]
pub struct FontData {
    name: String,
    data: Arc<Vec<u8>>,
    index: u32,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    line_gap: i16,
    underline: Option<(i16, i16)>,
    strikeout: Option<(i16, i16)>,
    cff: bool,
}

impl fmt::Debug for FontData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontData")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("bytes", &self.data.len())
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontData {
    /// Create font data from TTF/OTF bytes
    ///
    /// # Arguments
    /// * `name` - Font identifier
    /// * `ttf_data` - Font file bytes
    pub fn from_ttf(name: &str, ttf_data: Vec<u8>) -> Result<Self> {
        Self::from_collection(name, ttf_data, 0)
    }

    /// Create font data for face `index` of a font file or collection
    pub fn from_collection(name: &str, data: Vec<u8>, index: u32) -> Result<Self> {
        let (metrics, underline, strikeout, cff) = {
            let face = ttf_parser::Face::parse(&data, index)
                .map_err(|e| PdfError::FontParseError(format!("{name}: {e}")))?;
            (
                (
                    face.units_per_em(),
                    face.ascender(),
                    face.descender(),
                    face.line_gap(),
                ),
                face.underline_metrics()
                    .map(|metrics| (metrics.position, metrics.thickness)),
                face.strikeout_metrics()
                    .map(|metrics| (metrics.position, metrics.thickness)),
                face.tables().cff.is_some(),
            )
        };
        let (units_per_em, ascender, descender, line_gap) = metrics;

        Ok(Self {
            name: name.to_string(),
            data: Arc::new(data),
            index,
            units_per_em,
            ascender,
            descender,
            line_gap,
            underline,
            strikeout,
            cff,
        })
    }

    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index).ok()
    }
}

impl FontFace for FontData {
    fn name(&self) -> &str {
        &self.name
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn face_index(&self) -> u32 {
        self.index
    }

    fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    fn ascender(&self) -> i16 {
        self.ascender
    }

    fn descender(&self) -> i16 {
        self.descender
    }

    fn line_gap(&self) -> i16 {
        self.line_gap
    }

    fn glyph_id(&self, c: char) -> Option<u16> {
        self.face()
            .and_then(|face| face.glyph_index(c))
            .map(|id| id.0)
    }

    fn advance(&self, glyph_id: u16) -> Option<u16> {
        self.face()
            .and_then(|face| face.glyph_hor_advance(ttf_parser::GlyphId(glyph_id)))
    }

    fn outline(&self, glyph_id: u16, builder: &mut dyn ttf_parser::OutlineBuilder) -> bool {
        self.face()
            .and_then(|face| face.outline_glyph(ttf_parser::GlyphId(glyph_id), builder))
            .is_some()
    }

    fn underline_metrics(&self) -> (i16, i16) {
        let upem = self.units_per_em as i32;
        self.underline
            .unwrap_or((-(upem / 10) as i16, (upem / 20).max(1) as i16))
    }

    fn strikeout_metrics(&self) -> (i16, i16) {
        let upem = self.units_per_em as i32;
        self.strikeout
            .unwrap_or(((upem * 3 / 10) as i16, (upem / 20).max(1) as i16))
    }

    fn is_cff(&self) -> bool {
        self.cff
    }
}

/// Font family with variants
#[derive(Debug, Clone, Default)]
pub struct FontFamily {
    /// Regular variant (required)
    pub regular: Option<Arc<dyn FontFace>>,
    /// Bold variant
    pub bold: Option<Arc<dyn FontFace>>,
    /// Italic variant
    pub italic: Option<Arc<dyn FontFace>>,
    /// Bold italic variant
    pub bold_italic: Option<Arc<dyn FontFace>>,
}

impl FontFamily {
    /// Family with a single face used for every variant
    pub fn single(face: Arc<dyn FontFace>) -> Self {
        Self {
            regular: Some(face),
            ..Self::default()
        }
    }

    /// Get the face for the specified weight and style
    /// Falls back to regular if requested variant is not available
    pub fn get_variant(&self, weight: FontWeight, style: FontStyle) -> Option<&Arc<dyn FontFace>> {
        let slanted = style != FontStyle::Normal;
        match (weight.is_bold(), slanted) {
            (true, true) => self
                .bold_italic
                .as_ref()
                .or(self.bold.as_ref())
                .or(self.italic.as_ref())
                .or(self.regular.as_ref()),
            (true, false) => self.bold.as_ref().or(self.regular.as_ref()),
            (false, true) => self.italic.as_ref().or(self.regular.as_ref()),
            (false, false) => self.regular.as_ref(),
        }
    }
}

/// Builder for registering font families
#[derive(Default)]
pub struct FontFamilyBuilder {
    regular: Option<Vec<u8>>,
    bold: Option<Vec<u8>>,
    italic: Option<Vec<u8>>,
    bold_italic: Option<Vec<u8>>,
}

impl FontFamilyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regular(mut self, ttf_data: Vec<u8>) -> Self {
        self.regular = Some(ttf_data);
        self
    }

    pub fn bold(mut self, ttf_data: Vec<u8>) -> Self {
        self.bold = Some(ttf_data);
        self
    }

    pub fn italic(mut self, ttf_data: Vec<u8>) -> Self {
        self.italic = Some(ttf_data);
        self
    }

    pub fn bold_italic(mut self, ttf_data: Vec<u8>) -> Self {
        self.bold_italic = Some(ttf_data);
        self
    }

    /// Build the FontFamily from the provided font data
    pub fn build(self, family_name: &str) -> Result<FontFamily> {
        let Some(regular) = self.regular else {
            return Err(PdfError::FontParseError(
                "FontFamily must have at least a regular variant".to_string(),
            ));
        };

        let load = |suffix: &str, data: Vec<u8>| -> Result<Arc<dyn FontFace>> {
            let face = FontData::from_ttf(&format!("{family_name}-{suffix}"), data)?;
            Ok(Arc::new(face))
        };

        Ok(FontFamily {
            regular: Some(load("regular", regular)?),
            bold: self.bold.map(|data| load("bold", data)).transpose()?,
            italic: self.italic.map(|data| load("italic", data)).transpose()?,
            bold_italic: self
                .bold_italic
                .map(|data| load("bold-italic", data))
                .transpose()?,
        })
    }
}

/// PDF objects generated for font embedding
pub struct FontObjects {
    /// Type0 font dictionary
    pub type0_font: Dictionary,
    /// CIDFont dictionary (Type2 for TrueType outlines, Type0 for CFF)
    pub cid_font: Dictionary,
    /// Font descriptor dictionary
    pub font_descriptor: Dictionary,
    /// Font file stream
    pub font_file_stream: Stream,
    /// Key of the font file in the descriptor (`FontFile2` or `FontFile3`)
    pub font_file_key: &'static str,
    /// ToUnicode CMap stream
    pub tounicode_stream: Stream,
}

/// A glyph placed in an embedded font: new (possibly subset) id plus source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedGlyph {
    pub original_id: u16,
    pub embedded_id: u16,
    /// Characters the glyph stands for; empty when it has no text of its own
    pub text: String,
}

/// Generate all PDF objects needed to embed a face.
///
/// # Arguments
/// * `face` - The face being embedded
/// * `base_font` - BaseFont name (with subset tag when subset)
/// * `program` - Font program bytes to embed
/// * `glyphs` - Used glyphs, keyed by embedded id
///
/// References between the objects are left as `(0, 0)` placeholders and are
/// patched when the objects are added to the document.
pub fn font_objects(
    face: &dyn FontFace,
    base_font: &str,
    program: Vec<u8>,
    glyphs: &BTreeMap<u16, EmbeddedGlyph>,
) -> FontObjects {
    let font_name = Object::Name(base_font.as_bytes().to_vec());
    let scale = 1000.0 / face.units_per_em().max(1) as f64;
    let to_pdf_units = |value: i16| -> Object { Object::Real((value as f64 * scale) as f32) };

    let tounicode_content = generate_tounicode_cmap(glyphs);
    let tounicode_stream = Stream::new(Dictionary::new(), tounicode_content.into_bytes());

    let (font_file_key, font_file_stream) = if face.is_cff() {
        let dict = Dictionary::from_iter(vec![("Subtype", Object::Name(b"OpenType".to_vec()))]);
        ("FontFile3", Stream::new(dict, program))
    } else {
        let dict = Dictionary::from_iter(vec![("Length1", (program.len() as i64).into())]);
        ("FontFile2", Stream::new(dict, program))
    };

    let ascender = face.ascender();
    let descender = face.descender();
    let font_bbox = vec![
        0.into(),
        to_pdf_units(descender),
        1000.into(),
        to_pdf_units(ascender),
    ];

    // Symbolic, plus Italic when slanted
    let mut flags = 4;
    if face.italic_angle() != 0.0 {
        flags |= 64;
    }

    let font_descriptor = Dictionary::from_iter(vec![
        ("Type", "FontDescriptor".into()),
        ("FontName", font_name.clone()),
        ("Flags", flags.into()),
        ("FontBBox", font_bbox.into()),
        ("ItalicAngle", Object::Real(face.italic_angle())),
        ("Ascent", to_pdf_units(ascender)),
        ("Descent", to_pdf_units(descender)),
        ("CapHeight", to_pdf_units(ascender)),
        ("StemV", 80.into()),
        (font_file_key, Object::Reference((0, 0))),
    ]);

    let mut widths = Vec::new();
    for glyph in glyphs.values() {
        let advance = glyph_space_width(face, glyph.original_id);
        widths.push(Object::Integer(glyph.embedded_id as i64));
        widths.push(Object::Array(vec![Object::Real(advance as f32)]));
    }

    let cid_system_info = Dictionary::from_iter(vec![
        ("Registry", Object::string_literal("Adobe")),
        ("Ordering", Object::string_literal("Identity")),
        ("Supplement", 0.into()),
    ]);

    let subtype = if face.is_cff() {
        "CIDFontType0"
    } else {
        "CIDFontType2"
    };
    let mut cid_font = Dictionary::from_iter(vec![
        ("Type", "Font".into()),
        ("Subtype", Object::Name(subtype.as_bytes().to_vec())),
        ("BaseFont", font_name.clone()),
        ("CIDSystemInfo", cid_system_info.into()),
        ("FontDescriptor", Object::Reference((0, 0))),
        ("W", widths.into()),
        ("DW", 1000.into()),
    ]);
    if !face.is_cff() {
        cid_font.set("CIDToGIDMap", Object::Name(b"Identity".to_vec()));
    }

    let type0_font = Dictionary::from_iter(vec![
        ("Type", "Font".into()),
        ("Subtype", "Type0".into()),
        ("BaseFont", font_name),
        ("Encoding", "Identity-H".into()),
        ("DescendantFonts", vec![Object::Reference((0, 0))].into()),
        ("ToUnicode", Object::Reference((0, 0))),
    ]);

    FontObjects {
        type0_font,
        cid_font,
        font_descriptor,
        font_file_stream,
        font_file_key,
        tounicode_stream,
    }
}

/// PostScript-safe version of a face name
pub fn postscript_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "Font".to_string()
    } else {
        cleaned
    }
}

/// Six-letter subset tag derived from the glyph set, e.g. `KQZBEA`
pub fn subset_tag(glyphs: &BTreeMap<u16, EmbeddedGlyph>) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for glyph in glyphs.values() {
        glyph.original_id.hash(&mut hasher);
    }
    let mut value = hasher.finish();
    (0..6)
        .map(|_| {
            let letter = (b'A' + (value % 26) as u8) as char;
            value /= 26;
            letter
        })
        .collect()
}

/// Advance of a glyph in PDF glyph space (1000 units per em)
fn glyph_space_width(face: &dyn FontFace, glyph_id: u16) -> f64 {
    face.advance(glyph_id).unwrap_or(0) as f64 * 1000.0 / face.units_per_em().max(1) as f64
}

/// Generate ToUnicode CMap stream content
fn generate_tounicode_cmap(glyphs: &BTreeMap<u16, EmbeddedGlyph>) -> String {
    let mut cmap = String::new();

    cmap.push_str("/CIDInit /ProcSet findresource begin\n");
    cmap.push_str("12 dict begin\n");
    cmap.push_str("begincmap\n");
    cmap.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    cmap.push_str("/CMapName /Adobe-Identity-UCS def\n");
    cmap.push_str("/CMapType 2 def\n");

    cmap.push_str("1 begincodespacerange\n");
    cmap.push_str("<0000> <FFFF>\n");
    cmap.push_str("endcodespacerange\n");

    let entries: Vec<&EmbeddedGlyph> = glyphs.values().filter(|glyph| !glyph.text.is_empty()).collect();
    // bfchar sections are limited to 100 entries
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for glyph in chunk {
            let unicode: String = glyph
                .text
                .encode_utf16()
                .map(|unit| format!("{unit:04X}"))
                .collect();
            cmap.push_str(&format!("<{:04X}> <{unicode}>\n", glyph.embedded_id));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\n");
    cmap.push_str("CMapName currentdict /CMap defineresource pop\n");
    cmap.push_str("end\n");
    cmap.push_str("end\n");

    cmap
}
