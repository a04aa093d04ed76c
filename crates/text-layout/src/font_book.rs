//! Font resolution: registered families, then fontdb, then sans-serif

use crate::{LayoutError, Result};
use pdf_core::{FontData, FontFace, FontFamily, FontStyle, FontWeight};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// What a piece of text asks for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontQuery {
    /// Comma separated family list, tried in order
    pub families: String,
    pub weight: FontWeight,
    pub style: FontStyle,
}

impl FontQuery {
    pub fn new(families: &str, weight: FontWeight, style: FontStyle) -> Self {
        Self {
            families: families.to_string(),
            weight,
            style,
        }
    }

    /// Individual family names, trimmed and without quotes
    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families
            .split(',')
            .map(|name| name.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|name| !name.is_empty())
    }
}

/// Source of font faces for layout
pub trait FontSource {
    /// Face for a query; fails when nothing at all can be found
    fn resolve(&mut self, query: &FontQuery) -> Result<Arc<dyn FontFace>>;

    /// Another face covering `c` when the resolved one does not
    fn fallback_for(&mut self, query: &FontQuery, c: char) -> Option<Arc<dyn FontFace>>;
}

/// Font registry backed by explicitly registered families and a fontdb database
pub struct FontBook {
    db: fontdb::Database,
    /// Registered families, keyed by lowercase name
    families: HashMap<String, FontFamily>,
    fallback_families: Vec<String>,
    faces: HashMap<fontdb::ID, Arc<dyn FontFace>>,
    resolved: HashMap<FontQuery, Arc<dyn FontFace>>,
}

impl Default for FontBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FontBook {
    /// Empty book: no system fonts, no registered families
    pub fn new() -> Self {
        Self {
            db: fontdb::Database::new(),
            families: HashMap::new(),
            fallback_families: Vec::new(),
            faces: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// Scan the platform font directories
    pub fn load_system_fonts(&mut self) {
        self.db.load_system_fonts();
        log::debug!("font database: {} faces after system scan", self.db.len());
    }

    /// Add every font file under `dir`
    pub fn load_fonts_dir<P: AsRef<Path>>(&mut self, dir: P) {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            log::warn!("font directory {} does not exist", dir.display());
            return;
        }
        self.db.load_fonts_dir(dir);
        log::debug!("font database: {} faces after {}", self.db.len(), dir.display());
    }

    /// Add a font file or collection held in memory
    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
    }

    /// Register a family under `name`; it takes precedence over the database
    pub fn register_family(&mut self, name: &str, family: FontFamily) {
        self.families.insert(name.to_lowercase(), family);
        self.resolved.clear();
    }

    /// Families tried, in order, for characters the resolved face lacks
    pub fn set_fallback_families(&mut self, families: Vec<String>) {
        self.fallback_families = families;
    }

    /// Number of faces known to the database
    pub fn database_len(&self) -> usize {
        self.db.len()
    }

    fn registered(&self, family: &str, weight: FontWeight, style: FontStyle) -> Option<Arc<dyn FontFace>> {
        self.families
            .get(&family.to_lowercase())
            .and_then(|registered| registered.get_variant(weight, style))
            .cloned()
    }

    fn query_database(
        &mut self,
        families: &[fontdb::Family<'_>],
        weight: FontWeight,
        style: FontStyle,
    ) -> Option<Arc<dyn FontFace>> {
        let query = fontdb::Query {
            families,
            weight: fontdb::Weight(weight.0),
            stretch: fontdb::Stretch::Normal,
            style: map_style(style),
        };
        let id = self.db.query(&query)?;
        self.load_face(id)
    }

    fn load_face(&mut self, id: fontdb::ID) -> Option<Arc<dyn FontFace>> {
        if let Some(face) = self.faces.get(&id) {
            return Some(Arc::clone(face));
        }

        let name = self
            .db
            .face(id)
            .map(|info| {
                if info.post_script_name.is_empty() {
                    format!("font-{}", info.index)
                } else {
                    info.post_script_name.clone()
                }
            })
            .unwrap_or_else(|| "font".to_string());

        let loaded = self
            .db
            .with_face_data(id, |data, index| FontData::from_collection(&name, data.to_vec(), index))?;
        match loaded {
            Ok(face) => {
                log::debug!("loaded face {name}");
                let face: Arc<dyn FontFace> = Arc::new(face);
                self.faces.insert(id, Arc::clone(&face));
                Some(face)
            }
            Err(err) => {
                log::warn!("cannot load face {name}: {err}");
                None
            }
        }
    }

    /// Registered family first, then the database (generic aliases included)
    fn lookup_family(&mut self, family: &str, weight: FontWeight, style: FontStyle) -> Option<Arc<dyn FontFace>> {
        if let Some(face) = self.registered(family, weight, style) {
            return Some(face);
        }
        match generic_family(family) {
            Some(generic) => {
                let mut families: Vec<fontdb::Family<'_>> = common_names(generic)
                    .iter()
                    .map(|name| fontdb::Family::Name(*name))
                    .collect();
                families.push(generic);
                self.query_database(&families, weight, style)
            }
            None => self.query_database(&[fontdb::Family::Name(family)], weight, style),
        }
    }

    fn sans_serif_fallback(&mut self, weight: FontWeight, style: FontStyle) -> Option<Arc<dyn FontFace>> {
        if let Some(face) = self.registered("sans", weight, style) {
            return Some(face);
        }
        if let Some(face) = self.lookup_family("sans-serif", weight, style) {
            return Some(face);
        }
        // any face beats no text at all
        let first = self.db.faces().next().map(|info| info.id)?;
        self.load_face(first)
    }
}

impl FontSource for FontBook {
    fn resolve(&mut self, query: &FontQuery) -> Result<Arc<dyn FontFace>> {
        if let Some(face) = self.resolved.get(query) {
            return Ok(Arc::clone(face));
        }

        let names: Vec<String> = query.family_names().map(str::to_string).collect();
        let mut found = None;
        for name in &names {
            if let Some(face) = self.lookup_family(name, query.weight, query.style) {
                found = Some(face);
                break;
            }
        }

        let face = match found {
            Some(face) => face,
            None => {
                let face = self
                    .sans_serif_fallback(query.weight, query.style)
                    .ok_or_else(|| LayoutError::FontNotFound(query.families.clone()))?;
                log::warn!(
                    "no font for {:?}, using {}",
                    query.families,
                    face.name()
                );
                face
            }
        };

        log::debug!(
            "font {:?} weight {} {:?} -> {}",
            query.families,
            query.weight.0,
            query.style,
            face.name()
        );
        self.resolved.insert(query.clone(), Arc::clone(&face));
        Ok(face)
    }

    fn fallback_for(&mut self, query: &FontQuery, c: char) -> Option<Arc<dyn FontFace>> {
        let families = self.fallback_families.clone();
        for family in families {
            if let Some(face) = self.lookup_family(&family, query.weight, query.style) {
                if face.has_glyph(c) {
                    return Some(face);
                }
            }
        }
        None
    }
}

/// CSS/fontconfig style generic names
fn generic_family(name: &str) -> Option<fontdb::Family<'static>> {
    match name.to_ascii_lowercase().as_str() {
        "sans" | "sans-serif" | "sans serif" => Some(fontdb::Family::SansSerif),
        "serif" => Some(fontdb::Family::Serif),
        "monospace" | "mono" => Some(fontdb::Family::Monospace),
        "cursive" => Some(fontdb::Family::Cursive),
        "fantasy" => Some(fontdb::Family::Fantasy),
        _ => None,
    }
}

/// Widely installed faces for a generic family, preferred over fontdb's defaults
fn common_names(generic: fontdb::Family<'_>) -> &'static [&'static str] {
    match generic {
        fontdb::Family::SansSerif => &["DejaVu Sans", "Liberation Sans", "Noto Sans", "Arial", "Helvetica"],
        fontdb::Family::Serif => &["DejaVu Serif", "Liberation Serif", "Noto Serif", "Times New Roman", "Times"],
        fontdb::Family::Monospace => &["DejaVu Sans Mono", "Liberation Mono", "Noto Sans Mono", "Courier New", "Courier"],
        _ => &[],
    }
}

fn map_style(style: FontStyle) -> fontdb::Style {
    match style {
        FontStyle::Normal => fontdb::Style::Normal,
        FontStyle::Italic => fontdb::Style::Italic,
        FontStyle::Oblique => fontdb::Style::Oblique,
    }
}
