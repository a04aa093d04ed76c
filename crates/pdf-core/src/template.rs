//! Template loading: the first page of a source PDF

use crate::{Matrix, PdfError, Result};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;

/// A4 in points, used when no MediaBox can be found
const A4: [f64; 4] = [0.0, 0.0, 595.28, 841.89];

/// Inherited page attributes are looked up at most this many levels up
const MAX_INHERITANCE_DEPTH: usize = 10;

/// The first page of a template PDF, with its geometry resolved
#[derive(Debug, Clone)]
pub struct TemplatePage {
    document: Document,
    page_id: ObjectId,
    media_box: [f64; 4],
    rotation: i64,
}

impl TemplatePage {
    /// Open a PDF file and select its first page
    ///
    /// # Arguments
    /// * `path` - Path to the template file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PdfError::OpenError(format!(
                "{}: no such file",
                path.display()
            )));
        }
        let document = Document::load(path)
            .map_err(|e| PdfError::OpenError(format!("{}: {e}", path.display())))?;
        Self::from_document(document)
    }

    /// Open a PDF held in memory
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|e| PdfError::OpenError(e.to_string()))?;
        Self::from_document(document)
    }

    fn from_document(document: Document) -> Result<Self> {
        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(PdfError::Encrypted(
                "template declares an /Encrypt dictionary".to_string(),
            ));
        }

        let page_id = *document
            .get_pages()
            .get(&1)
            .ok_or(PdfError::NoPages)?;

        let media_box = match inherited_attribute(&document, page_id, b"MediaBox") {
            Some(object) => parse_box(&document, object)?,
            None => {
                log::warn!("template page has no MediaBox, assuming A4");
                A4
            }
        };

        let rotation = inherited_attribute(&document, page_id, b"Rotate")
            .and_then(|object| number(&document, object))
            .map(|degrees| (degrees as i64).rem_euclid(360) / 90 * 90)
            .unwrap_or(0);

        let page = Self {
            document,
            page_id,
            media_box,
            rotation,
        };
        let (width, height) = page.size();
        log::info!("template page: {width} x {height} pt, rotation {rotation}");
        Ok(page)
    }

    /// Underlying document
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn page_id(&self) -> ObjectId {
        self.page_id
    }

    /// MediaBox as `[x0, y0, x1, y1]`, normalized so x0 <= x1 and y0 <= y1
    pub fn media_box(&self) -> [f64; 4] {
        self.media_box
    }

    /// Page rotation in degrees: 0, 90, 180 or 270
    pub fn rotation(&self) -> i64 {
        self.rotation
    }

    /// Displayed page size in points (width, height)
    pub fn size(&self) -> (f64, f64) {
        let [x0, y0, x1, y1] = self.media_box;
        let (width, height) = (x1 - x0, y1 - y0);
        if self.rotation % 180 == 0 {
            (width, height)
        } else {
            (height, width)
        }
    }

    /// Map from PDF page space (y up) to the displayed page with a top-left
    /// origin and y growing downward
    pub fn page_matrix(&self) -> Matrix {
        let [x0, y0, x1, y1] = self.media_box;
        match self.rotation {
            90 => Matrix::new(0.0, 1.0, 1.0, 0.0, -y0, -x0),
            180 => Matrix::new(-1.0, 0.0, 0.0, 1.0, x1, -y0),
            270 => Matrix::new(0.0, -1.0, -1.0, 0.0, y1, x1),
            _ => Matrix::new(1.0, 0.0, 0.0, -1.0, -x0, y1),
        }
    }

    /// Decoded content of the page, all content streams joined
    pub fn content(&self) -> Result<Vec<u8>> {
        let page = self.page_dict()?;
        let contents = match page.get(b"Contents") {
            Ok(contents) => contents,
            Err(_) => return Ok(Vec::new()),
        };

        let mut combined = Vec::new();
        let parts: Vec<&Object> = match self.resolve(contents) {
            Object::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for part in parts {
            if let Object::Stream(stream) = self.resolve(part) {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                combined.extend_from_slice(&data);
                combined.push(b'\n');
            }
        }
        Ok(combined)
    }

    /// Resources dictionary of the page, inherited from the page tree if needed
    pub fn resources(&self) -> Dictionary {
        inherited_attribute(&self.document, self.page_id, b"Resources")
            .and_then(|object| self.resolve(object).as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    /// Follow a reference (one level) inside the template document
    pub fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        resolve(&self.document, object)
    }

    fn page_dict(&self) -> Result<&Dictionary> {
        self.document
            .get_object(self.page_id)?
            .as_dict()
            .map_err(|_| PdfError::ParseError("Page object is not a dictionary".to_string()))
    }
}

/// Follow references until a direct object is reached
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        match current {
            Object::Reference(id) => match document.get_object(*id) {
                Ok(next) => current = next,
                Err(_) => return &Object::Null,
            },
            _ => return current,
        }
    }
    current
}

/// Integer or real operand as f64
pub fn number(document: &Document, object: &Object) -> Option<f64> {
    match resolve(document, object) {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(*value as f64),
        _ => None,
    }
}

/// Look up a page attribute, following the /Parent chain
fn inherited_attribute<'a>(document: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current_id = page_id;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        let dict = document.get_object(current_id).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => current_id = *parent_id,
            _ => return None,
        }
    }
    None
}

fn parse_box(document: &Document, object: &Object) -> Result<[f64; 4]> {
    let values = resolve(document, object)
        .as_array()
        .map_err(|_| PdfError::ParseError("MediaBox is not an array".to_string()))?;
    if values.len() < 4 {
        return Err(PdfError::ParseError("Invalid MediaBox format".to_string()));
    }
    let mut coords = [0.0; 4];
    for (slot, value) in coords.iter_mut().zip(values) {
        *slot = number(document, value)
            .ok_or_else(|| PdfError::ParseError("Invalid MediaBox entry".to_string()))?;
    }
    let [ax, ay, bx, by] = coords;
    Ok([ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};
    use pretty_assertions::assert_eq;

    /// Build a one-page PDF; `media_box` on the page or on the Pages node
    fn build_pdf(media_box: Vec<Object>, on_parent: bool, rotate: Option<i64>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 0 1 rg 0 0 10 10 re f".to_vec()));

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        if !on_parent {
            page.set("MediaBox", media_box.clone());
        }
        if let Some(degrees) = rotate {
            page.set("Rotate", degrees);
        }
        let page_id = doc.add_object(page);

        let mut pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => dictionary! { "Font" => dictionary! {} },
        };
        if on_parent {
            pages.set("MediaBox", media_box);
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn letter() -> Vec<Object> {
        vec![0.into(), 0.into(), 612.into(), 792.into()]
    }

    #[test]
    fn test_open_from_bytes_size() {
        let page = TemplatePage::from_bytes(&build_pdf(letter(), false, None)).unwrap();
        assert_eq!(page.size(), (612.0, 792.0));
        assert_eq!(page.rotation(), 0);
    }

    #[test]
    fn test_media_box_inherited_from_parent() {
        let page = TemplatePage::from_bytes(&build_pdf(letter(), true, None)).unwrap();
        assert_eq!(page.media_box(), [0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn test_resources_inherited_from_parent() {
        let page = TemplatePage::from_bytes(&build_pdf(letter(), true, None)).unwrap();
        assert!(page.resources().get(b"Font").is_ok());
    }

    #[test]
    fn test_rotated_page_swaps_size() {
        let page = TemplatePage::from_bytes(&build_pdf(letter(), false, Some(90))).unwrap();
        assert_eq!(page.rotation(), 90);
        assert_eq!(page.size(), (792.0, 612.0));

        let page = TemplatePage::from_bytes(&build_pdf(letter(), false, Some(-90))).unwrap();
        assert_eq!(page.rotation(), 270);
    }

    #[test]
    fn test_page_matrix_maps_corners() {
        let media_box = vec![10.into(), 20.into(), 110.into(), 220.into()];
        let page = TemplatePage::from_bytes(&build_pdf(media_box.clone(), false, None)).unwrap();
        let m = page.page_matrix();
        // top-left of the MediaBox is the display origin
        assert_eq!(m.transform_point(10.0, 220.0), (0.0, 0.0));
        assert_eq!(m.transform_point(110.0, 20.0), (100.0, 200.0));

        let page = TemplatePage::from_bytes(&build_pdf(media_box, false, Some(90))).unwrap();
        let m = page.page_matrix();
        // bottom-left goes to the top-left when turned clockwise
        assert_eq!(m.transform_point(10.0, 20.0), (0.0, 0.0));
        assert_eq!(m.transform_point(10.0, 220.0), (200.0, 0.0));
    }

    #[test]
    fn test_content_is_decoded() {
        let page = TemplatePage::from_bytes(&build_pdf(letter(), false, None)).unwrap();
        let content = String::from_utf8(page.content().unwrap()).unwrap();
        assert!(content.contains("0 0 10 10 re"));
    }

    #[test]
    fn test_open_missing_file() {
        let result = TemplatePage::open("/no/such/template.pdf");
        assert!(matches!(result, Err(PdfError::OpenError(_))));
    }

    #[test]
    fn test_garbage_is_open_error() {
        let result = TemplatePage::from_bytes(b"%PDF-1.4 garbage");
        assert!(matches!(result, Err(PdfError::OpenError(_))));
    }

    #[test]
    fn test_no_pages() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.add_object(dictionary! { "Type" => "Pages", "Kids" => Vec::<Object>::new(), "Count" => 0 });
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();

        let result = TemplatePage::from_bytes(&buffer);
        assert!(matches!(result, Err(PdfError::NoPages)));
    }
}
