//! Overlay - text and image areas composited onto a PDF template
//!
//! This crate provides:
//! - The JSON request schema ([`RenderRequest`], [`Area`]) and its validation
//! - Rendering configuration with defaults ([`RenderConfig`])
//! - The page compositor, drawing the template's first page and then each area
//! - PDF output through `pdf-core` and PNG output through `pdf-raster`
//!
//! # Example
//!
//! ```ignore
//! use overlay::{render_json, RenderConfig};
//!
//! let json = r#"{
//!     "template": "invoice.pdf",
//!     "output_format": "pdf",
//!     "areas": [
//!         { "type": "text", "x": 72, "y": 72, "content": "Paid", "font_size": 24 }
//!     ]
//! }"#;
//!
//! let bytes = render_json(json, &RenderConfig::default())?;
//! std::fs::write("out.pdf", bytes)?;
//! ```

mod areas;
mod compositor;
mod config;
mod finalize;
mod parser;
mod schema;
mod surface;

pub use areas::{build_markup, strip_markup};
pub use compositor::{Compositor, SavedState};
pub use config::{FontFiles, RenderConfig};
pub use finalize::finalize;
pub use parser::{parse_request, value_to_string};
pub use schema::{Area, FontSlant, FontWeightName, ImageArea, OutputFormat, RenderRequest, TextArea};

use pdf_core::{PdfError, TemplatePage};
use std::io::Write;
use std::path::{Path, PathBuf};
use text_layout::{FontSource, LayoutError};
use thiserror::Error;

/// Errors that can occur while rendering a request
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{field}: {message}")]
    InvalidRequest { field: String, message: String },

    #[error("Template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Cannot load template: {0}")]
    Template(#[source] PdfError),

    #[error("Cannot load image {}: {message}", .path.display())]
    Image { path: PathBuf, message: String },

    #[error("Font error: {0}")]
    Font(String),

    #[error("{field}: {message}")]
    InvalidColor { field: String, message: String },

    #[error("{field}: {message}")]
    InvalidStyle { field: String, message: String },

    #[error("Text layout failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("Rendering failed: {0}")]
    Render(#[source] PdfError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure class, used by the CLI for its exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or incomplete request
    Input,
    /// Template, image or font cannot be found or loaded
    Resource,
    /// Request is well formed but its content cannot be drawn
    Content,
    /// The surface could not be produced or written
    Output,
}

impl ErrorKind {
    /// Process exit code for this class
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Input => 2,
            ErrorKind::Resource => 3,
            ErrorKind::Content => 4,
            ErrorKind::Output => 5,
        }
    }
}

impl OverlayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OverlayError::Json(_) | OverlayError::InvalidRequest { .. } => ErrorKind::Input,
            OverlayError::TemplateNotFound(_)
            | OverlayError::ImageNotFound(_)
            | OverlayError::Template(_)
            | OverlayError::Image { .. }
            | OverlayError::Font(_) => ErrorKind::Resource,
            OverlayError::InvalidColor { .. }
            | OverlayError::InvalidStyle { .. }
            | OverlayError::Layout(_) => ErrorKind::Content,
            OverlayError::Render(_) | OverlayError::Io(_) => ErrorKind::Output,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        OverlayError::InvalidRequest {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for overlay operations
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Validate a request and render it to PDF or PNG bytes
pub fn render(request: &RenderRequest, config: &RenderConfig) -> Result<Vec<u8>> {
    request.validate()?;
    config.validate()?;
    let mut fonts = config.font_book()?;
    compose(request, config, &mut fonts)
}

/// Like [`render`], resolving fonts through a caller-provided source
pub fn render_with_fonts(
    request: &RenderRequest,
    config: &RenderConfig,
    fonts: &mut dyn FontSource,
) -> Result<Vec<u8>> {
    request.validate()?;
    config.validate()?;
    compose(request, config, fonts)
}

fn compose(request: &RenderRequest, config: &RenderConfig, fonts: &mut dyn FontSource) -> Result<Vec<u8>> {
    let base_dir = config.base_dir()?;
    let template = load_template(&base_dir, &request.template)?;

    let mut compositor = Compositor::new(config, fonts, &base_dir);
    compositor.composite(&template, &request.areas, request.output_format)
}

/// Parse a JSON request and render it
pub fn render_json(json: &str, config: &RenderConfig) -> Result<Vec<u8>> {
    let request = parse_request(json)?;
    render(&request, config)
}

/// Render a request and write the bytes to `sink`; nothing is written on failure
pub fn render_to(request: &RenderRequest, config: &RenderConfig, sink: &mut dyn Write) -> Result<()> {
    let bytes = render(request, config)?;
    sink.write_all(&bytes)?;
    sink.flush()?;
    Ok(())
}

/// `path` as given when absolute, otherwise under `base_dir`
pub(crate) fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn load_template(base_dir: &Path, template: &str) -> Result<TemplatePage> {
    let path = resolve_path(base_dir, template);
    if !path.is_file() {
        return Err(OverlayError::TemplateNotFound(path));
    }
    let page = TemplatePage::open(&path).map_err(OverlayError::Template)?;
    let (width, height) = page.size();
    log::info!("template {} is {width} x {height} pt", path.display());
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_kinds() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(OverlayError::from(json_err).kind(), ErrorKind::Input);
        assert_eq!(OverlayError::invalid("template", "missing").kind(), ErrorKind::Input);
        assert_eq!(
            OverlayError::TemplateNotFound(PathBuf::from("a.pdf")).kind(),
            ErrorKind::Resource
        );
        assert_eq!(OverlayError::Template(PdfError::NoPages).kind(), ErrorKind::Resource);
        assert_eq!(
            OverlayError::Layout(LayoutError::Markup("bad".into())).kind(),
            ErrorKind::Content
        );
        assert_eq!(
            OverlayError::Render(PdfError::Render("x".into())).kind(),
            ErrorKind::Output
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ErrorKind::Input.exit_code(), 2);
        assert_eq!(ErrorKind::Resource.exit_code(), 3);
        assert_eq!(ErrorKind::Content.exit_code(), 4);
        assert_eq!(ErrorKind::Output.exit_code(), 5);
    }

    #[test]
    fn test_error_message_names_field() {
        let err = OverlayError::invalid("areas[2].width", "must be >= 0");
        assert_eq!(err.to_string(), "areas[2].width: must be >= 0");
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/srv/forms");
        assert_eq!(resolve_path(base, "a.pdf"), PathBuf::from("/srv/forms/a.pdf"));
        assert_eq!(resolve_path(base, "/tmp/b.pdf"), PathBuf::from("/tmp/b.pdf"));
    }

    #[test]
    fn test_missing_template_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_template(dir.path(), "nope.pdf").unwrap_err();
        assert!(matches!(err, OverlayError::TemplateNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::Resource);
    }
}
