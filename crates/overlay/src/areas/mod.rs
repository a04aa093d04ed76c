//! Area renderers
//!
//! Each area kind draws itself onto a [`Canvas`] whose state the compositor
//! has already saved; renderers only translate and scale from there.

mod image;
mod text;

pub use text::{build_markup, strip_markup};

use crate::{RenderConfig, Result};
use pdf_core::Canvas;
use std::path::Path;
use text_layout::FontSource;

/// What an area needs besides the canvas
pub struct AreaContext<'a> {
    pub config: &'a RenderConfig,
    pub fonts: &'a mut dyn FontSource,
    pub base_dir: &'a Path,
}

/// An area that can be drawn
pub trait DrawArea {
    fn draw(&self, canvas: &mut dyn Canvas, ctx: &mut AreaContext<'_>) -> Result<()>;
}
