//! The drawing surface both output formats implement

use crate::{Color, Result, TemplatePage, TextLayout};
use crate::image::RasterImage;

/// A single-page drawing surface.
///
/// User space starts at the top-left corner of the page with y growing
/// downward, in points. `translate` and `scale` modify the current transform;
/// `save` and `restore` push and pop it.
pub trait Canvas {
    /// Page size in points
    fn size(&self) -> (f64, f64);

    fn save(&mut self);

    /// Pop the transform pushed by the matching `save`.
    /// An unbalanced call is logged and ignored.
    fn restore(&mut self);

    fn translate(&mut self, tx: f64, ty: f64);

    fn scale(&mut self, sx: f64, sy: f64);

    /// Fill the whole surface, ignoring the current transform
    fn paint(&mut self, color: Color) -> Result<()>;

    /// Draw the template page at the current transform, displayed size
    fn draw_page(&mut self, page: &TemplatePage) -> Result<()>;

    /// Draw an image with its top-left corner at the origin, one unit per pixel
    fn draw_image(&mut self, image: &RasterImage) -> Result<()>;

    /// Draw laid out text with the box's top-left corner at the origin
    fn draw_text(&mut self, layout: &TextLayout) -> Result<()>;

    /// Serialize the surface (PDF bytes or PNG bytes)
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}
