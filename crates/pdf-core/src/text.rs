//! Positioned glyph runs and PDF text operators

use crate::{pdf_number, Color, FontFace};
use std::sync::Arc;

/// A glyph placed on a line, x relative to the layout origin
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedGlyph {
    pub glyph_id: u16,
    /// Pen position in points
    pub x: f64,
    /// Advance in points (letter spacing and justification included)
    pub advance: f64,
    /// Shaping offset from the pen position in points
    pub x_offset: f64,
    /// Shaping offset in points, positive raises the glyph
    pub y_offset: f64,
    /// Source text of the glyph's cluster, used for ToUnicode.
    /// Empty for the second and later glyphs of a cluster.
    pub text: String,
}

impl PositionedGlyph {
    /// Glyph for a single character with no shaping offsets
    pub fn new(glyph_id: u16, x: f64, advance: f64, ch: char) -> Self {
        Self {
            glyph_id,
            x,
            advance,
            x_offset: 0.0,
            y_offset: 0.0,
            text: ch.to_string(),
        }
    }

    /// Where the glyph origin is drawn
    pub fn origin_x(&self) -> f64 {
        self.x + self.x_offset
    }
}

/// Consecutive glyphs sharing face, size and paint attributes
#[derive(Debug, Clone)]
pub struct GlyphRun {
    pub face: Arc<dyn FontFace>,
    /// Font size in points
    pub font_size: f32,
    pub color: Color,
    pub background: Option<Color>,
    pub underline: bool,
    pub strikethrough: bool,
    /// Baseline shift in points, positive raises the glyphs
    pub rise: f64,
    pub glyphs: Vec<PositionedGlyph>,
}

impl GlyphRun {
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|glyph| glyph.text.as_str()).collect()
    }

    pub fn x_start(&self) -> f64 {
        self.glyphs.first().map(|glyph| glyph.x).unwrap_or(0.0)
    }

    pub fn x_end(&self) -> f64 {
        self.glyphs
            .last()
            .map(|glyph| glyph.x + glyph.advance)
            .unwrap_or(0.0)
    }

    /// Font units to points for this run
    pub fn scale(&self) -> f64 {
        self.font_size as f64 / self.face.units_per_em().max(1) as f64
    }
}

/// One laid out line; coordinates grow downward from the layout top
#[derive(Debug, Clone)]
pub struct LayoutLine {
    pub top: f64,
    pub baseline: f64,
    pub height: f64,
    pub width: f64,
    pub runs: Vec<GlyphRun>,
}

impl LayoutLine {
    pub fn text(&self) -> String {
        self.runs.iter().map(GlyphRun::text).collect()
    }
}

/// Result of laying out a block of text; origin is the top-left of the box
#[derive(Debug, Clone, Default)]
pub struct TextLayout {
    pub lines: Vec<LayoutLine>,
    pub width: f64,
    pub height: f64,
}

impl TextLayout {
    /// Visible text, lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(LayoutLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn runs(&self) -> impl Iterator<Item = (&LayoutLine, &GlyphRun)> {
        self.lines
            .iter()
            .flat_map(|line| line.runs.iter().map(move |run| (line, run)))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.runs.is_empty())
    }
}

/// Context for rendering a run as PDF text
pub struct TextRenderContext {
    /// PDF font resource name (e.g., "F1")
    pub font_name: String,
    /// Font size in points
    pub font_size: f32,
    /// Text color (RGB)
    pub color: Color,
}

/// A glyph code ready for a `TJ` array
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphCode {
    /// Two-byte code (embedded glyph id)
    pub code: u16,
    /// Glyph origin in points
    pub x: f64,
    /// Advance the viewer applies from the font widths, in points
    pub natural_advance: f64,
    /// Text rise in points
    pub rise: f64,
}

/// Generate PDF operators for one run in a y-down user space
///
/// The text matrix flips y back so glyphs stand upright. Positions that differ
/// from the font's natural advances (justification, letter spacing, kerning,
/// fallback widths) are expressed as `TJ` adjustments. Vertical shaping
/// offsets split the array and set `Ts`.
///
/// # Arguments
/// * `glyphs` - Codes with their target pen positions
/// * `baseline` - Baseline y in user space
/// * `ctx` - Text rendering context
///
/// # Returns
/// Vector of bytes containing the PDF operators
pub fn generate_text_operators(glyphs: &[GlyphCode], baseline: f64, ctx: &TextRenderContext) -> Vec<u8> {
    let Some(first) = glyphs.first() else {
        return Vec::new();
    };

    let mut ops = String::new();
    ops.push_str("BT\n");
    ops.push_str(&ctx.color.fill_operator());
    ops.push('\n');
    ops.push_str(&format!("/{} {} Tf\n", ctx.font_name, pdf_number(ctx.font_size as f64)));
    ops.push_str(&format!(
        "1 0 0 -1 {} {} Tm\n",
        pdf_number(first.x),
        pdf_number(baseline)
    ));

    let mut rise = 0.0;
    if first.rise.abs() > 1e-4 {
        rise = first.rise;
        ops.push_str(&format!("{} Ts\n", pdf_number(rise)));
    }

    ops.push('[');
    let mut pending = String::new();
    let mut pen = first.x;
    for glyph in glyphs {
        if (glyph.rise - rise).abs() > 1e-4 {
            if !pending.is_empty() {
                ops.push_str(&format!("<{pending}>"));
                pending.clear();
            }
            rise = glyph.rise;
            ops.push_str(&format!("] TJ\n{} Ts\n[", pdf_number(rise)));
        }
        let delta = glyph.x - pen;
        if delta.abs() > 1e-4 && ctx.font_size > 0.0 {
            if !pending.is_empty() {
                ops.push_str(&format!("<{pending}>"));
                pending.clear();
            }
            let adjustment = -delta * 1000.0 / ctx.font_size as f64;
            ops.push_str(&format!(" {} ", pdf_number(adjustment)));
        }
        pending.push_str(&format!("{:04X}", glyph.code));
        pen = glyph.x + glyph.natural_advance;
    }
    if !pending.is_empty() {
        ops.push_str(&format!("<{pending}>"));
    }
    ops.push_str("] TJ\n");
    // text state outlives ET
    if rise.abs() > 1e-4 {
        ops.push_str("0 Ts\n");
    }
    ops.push_str("ET\n");

    ops.into_bytes()
}

/// Generate a filled rectangle in the current user space
pub fn generate_rect_operators(x: f64, y: f64, width: f64, height: f64, color: Color) -> Vec<u8> {
    format!(
        "q\n{}\n{} {} {} {} re\nf\nQ\n",
        color.fill_operator(),
        pdf_number(x),
        pdf_number(y),
        pdf_number(width),
        pdf_number(height)
    )
    .into_bytes()
}
