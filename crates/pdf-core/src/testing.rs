//! Synthetic fonts for tests that must not depend on installed fonts

use crate::FontFace;

/// Fixed-pitch face: every glyph advances 600 units on a 1000 unit em and
/// visible glyphs are solid boxes from (50, 0) to (550, 700).
///
/// Glyph ids are the character's code point (BMP only); combining marks
/// (U+0300..U+036F) have zero advance.
#[derive(Debug, Clone)]
pub struct MonoFace {
    name: String,
    missing: Vec<char>,
    advance: u16,
}

impl MonoFace {
    pub const UNITS_PER_EM: u16 = 1000;
    pub const ADVANCE: u16 = 600;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            missing: Vec::new(),
            advance: Self::ADVANCE,
        }
    }

    /// Same face without glyphs for the given characters
    pub fn without(name: &str, missing: &str) -> Self {
        Self {
            missing: missing.chars().collect(),
            ..Self::new(name)
        }
    }

    /// Same face with a different fixed advance
    pub fn with_advance(name: &str, advance: u16) -> Self {
        Self {
            advance,
            ..Self::new(name)
        }
    }

    fn is_mark(glyph_id: u16) -> bool {
        (0x0300..=0x036F).contains(&glyph_id)
    }
}

impl FontFace for MonoFace {
    fn name(&self) -> &str {
        &self.name
    }

    fn data(&self) -> &[u8] {
        &[]
    }

    fn units_per_em(&self) -> u16 {
        Self::UNITS_PER_EM
    }

    fn ascender(&self) -> i16 {
        800
    }

    fn descender(&self) -> i16 {
        -200
    }

    fn glyph_id(&self, c: char) -> Option<u16> {
        if c.is_control() || self.missing.contains(&c) {
            return None;
        }
        u16::try_from(c as u32).ok()
    }

    fn advance(&self, glyph_id: u16) -> Option<u16> {
        if glyph_id == 0 || Self::is_mark(glyph_id) {
            Some(0)
        } else {
            Some(self.advance)
        }
    }

    fn outline(&self, glyph_id: u16, builder: &mut dyn ttf_parser::OutlineBuilder) -> bool {
        let visible = char::from_u32(glyph_id as u32)
            .map(|c| !c.is_whitespace())
            .unwrap_or(false);
        if glyph_id == 0 || !visible || Self::is_mark(glyph_id) {
            return false;
        }
        builder.move_to(50.0, 0.0);
        builder.line_to(550.0, 0.0);
        builder.line_to(550.0, 700.0);
        builder.line_to(50.0, 700.0);
        builder.close();
        true
    }
}
