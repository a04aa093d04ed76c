//! Text Layout - styled text to positioned glyph lines
//!
//! This crate provides:
//! - A Pango-compatible markup parser (`<b>`, `<span foreground="red">`, ...)
//! - Font resolution over registered families and system fonts ([`FontBook`])
//! - Shaping with rustybuzz (kerning, ligatures, mark positioning)
//! - Line breaking (word, word_char, char) and justification
//!
//! # Example
//!
//! ```ignore
//! use text_layout::{layout_text, parse_markup, FontBook, LayoutOptions, TextStyle};
//!
//! let mut fonts = FontBook::new();
//! fonts.load_system_fonts();
//!
//! let base = TextStyle::default();
//! let spans = parse_markup("Hello <b>world</b>", &base)?;
//! let layout = layout_text(&spans, &base, &LayoutOptions::default(), &mut fonts)?;
//! ```

mod font_book;
mod layout;
mod markup;

pub use font_book::{FontBook, FontQuery, FontSource};
pub use layout::{layout_text, LayoutOptions, WrapMode};
pub use markup::{
    escape_attribute, escape_text, parse_color, parse_markup, parse_weight, StyledSpan, TextStyle,
};

use thiserror::Error;

/// Errors that can occur during text layout
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Invalid markup: {0}")]
    Markup(String),

    #[error("No font found for {0:?}")]
    FontNotFound(String),

    #[error("Font error: {0}")]
    Font(#[from] pdf_core::PdfError),
}

/// Result type for layout operations
pub type Result<T> = std::result::Result<T, LayoutError>;
