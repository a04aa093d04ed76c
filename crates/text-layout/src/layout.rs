//! Shaping, line breaking, justification and glyph positioning

use crate::{FontQuery, FontSource, Result, StyledSpan, TextStyle};
use pdf_core::{FontFace, GlyphRun, LayoutLine, PositionedGlyph, TextLayout};
use rustybuzz::ttf_parser::Tag;
use rustybuzz::{Direction, Feature, UnicodeBuffer};
use std::sync::{Arc, OnceLock};

/// Overflow tolerance in points
const EPSILON: f64 = 1e-6;

static FEATURES: OnceLock<Vec<Feature>> = OnceLock::new();

fn shaping_features() -> &'static [Feature] {
    FEATURES.get_or_init(|| {
        vec![
            Feature::new(Tag::from_bytes(b"liga"), 1, ..),
            Feature::new(Tag::from_bytes(b"kern"), 1, ..),
        ]
    })
}

/// Where lines may break when a width is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    /// Between words; a word wider than the line overflows
    #[default]
    Word,
    /// Between words, or between characters when a word does not fit
    WordChar,
    /// Between any two characters
    Char,
}

impl WrapMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "word" => Some(WrapMode::Word),
            "word_char" => Some(WrapMode::WordChar),
            "char" => Some(WrapMode::Char),
            _ => None,
        }
    }
}

/// Options for [`layout_text`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutOptions {
    /// Line width budget in points; `None` only breaks at newlines
    pub width: Option<f64>,
    pub wrap: WrapMode,
    /// Stretch inter-word spaces to fill `width` (not on a paragraph's last line)
    pub justify: bool,
}

/// A glyph from the shaper, in points
#[derive(Debug, Clone, Copy)]
struct ShapedGlyph {
    glyph_id: u16,
    advance: f64,
    x_offset: f64,
    y_offset: f64,
}

/// A cluster: characters that are broken and drawn together
#[derive(Clone)]
struct Item {
    text: String,
    first: char,
    last: char,
    /// Glyphs in drawing order
    glyphs: Vec<ShapedGlyph>,
    /// Total advance, letter spacing included
    advance: f64,
    /// Index into the span list
    span: usize,
    face: Arc<dyn FontFace>,
    /// Shaped right to left
    rtl: bool,
}

impl Item {
    fn is_whitespace(&self) -> bool {
        self.first.is_whitespace()
    }
}

/// Vertical metrics of a line in points
#[derive(Debug, Clone, Copy, Default)]
struct LineMetrics {
    ascent: f64,
    height: f64,
}

impl LineMetrics {
    fn of(face: &dyn FontFace, size: f32) -> Self {
        let upem = face.units_per_em().max(1) as f64;
        let to_points = |units: i16| units as f64 * size as f64 / upem;
        let ascent = to_points(face.ascender());
        let descent = to_points(face.descender());
        let gap = to_points(face.line_gap().max(0));
        Self {
            ascent,
            height: ascent - descent + gap,
        }
    }

    fn max(self, other: Self) -> Self {
        Self {
            ascent: self.ascent.max(other.ascent),
            height: self.height.max(other.height),
        }
    }
}

/// Lay out styled spans into positioned lines.
///
/// The origin is the top-left of the layout box; the first baseline sits at
/// the first line's ascent. Paragraphs split on `\n`.
///
/// # Arguments
/// * `spans` - Styled text in order
/// * `base` - Style used for empty lines
/// * `options` - Width budget, wrap mode and justification
/// * `fonts` - Font source for faces and per-character fallback
pub fn layout_text(
    spans: &[StyledSpan],
    base: &TextStyle,
    options: &LayoutOptions,
    fonts: &mut dyn FontSource,
) -> Result<TextLayout> {
    let base_face = fonts.resolve(&base.query())?;
    let base_metrics = LineMetrics::of(base_face.as_ref(), base.size);
    let paragraphs = itemize(spans, fonts)?;
    let budget = options.width.filter(|width| *width > 0.0);

    let mut layout = TextLayout::default();
    let mut top = 0.0;
    for items in &paragraphs {
        if items.is_empty() {
            layout.lines.push(empty_line(top, base_metrics));
            top += base_metrics.height;
            continue;
        }

        let mut start = 0;
        while start < items.len() {
            let end = find_line_end(items, start, budget, options.wrap).max(start + 1);
            let last_in_paragraph = end >= items.len();
            let justify_to = match budget {
                Some(width) if options.justify && !last_in_paragraph => Some(width),
                _ => None,
            };

            let line = build_line(&items[start..end], spans, top, justify_to, base_metrics);
            top += line.height;
            layout.width = layout.width.max(line.width);
            layout.lines.push(line);
            start = end;
        }
    }
    layout.height = top;

    log::debug!(
        "laid out {} lines, {:.2} x {:.2} pt",
        layout.lines.len(),
        layout.width,
        layout.height
    );
    Ok(layout)
}

/// Resolve faces and shape, splitting into paragraphs.
///
/// Each run of characters sharing a span and a face is shaped as one
/// segment, so kerning, ligatures and mark positioning apply within it.
fn itemize(spans: &[StyledSpan], fonts: &mut dyn FontSource) -> Result<Vec<Vec<Item>>> {
    let mut paragraphs = vec![Vec::new()];

    for (index, span) in spans.iter().enumerate() {
        let query = span.style.query();
        let primary = fonts.resolve(&query)?;
        let mut segment = String::new();
        let mut segment_face: Option<Arc<dyn FontFace>> = None;

        for ch in span.text.chars() {
            match ch {
                '\r' => continue,
                '\n' => {
                    flush_segment(&mut paragraphs, &mut segment, segment_face.as_ref(), index, &span.style);
                    paragraphs.push(Vec::new());
                    continue;
                }
                _ => {}
            }

            let face = face_for(ch, &primary, segment_face.as_ref(), &query, fonts);
            if let Some(current) = &segment_face {
                if !Arc::ptr_eq(current, &face) {
                    flush_segment(&mut paragraphs, &mut segment, Some(current), index, &span.style);
                }
            }
            segment_face = Some(face);
            segment.push(ch);
        }
        flush_segment(&mut paragraphs, &mut segment, segment_face.as_ref(), index, &span.style);
    }

    Ok(paragraphs)
}

/// Face for one character: the primary face, the face of the current
/// segment for combining marks, or a fallback family
fn face_for(
    ch: char,
    primary: &Arc<dyn FontFace>,
    current: Option<&Arc<dyn FontFace>>,
    query: &FontQuery,
    fonts: &mut dyn FontSource,
) -> Arc<dyn FontFace> {
    let lookup = if ch == '\t' { ' ' } else { ch };
    if is_combining(ch) {
        if let Some(face) = current.filter(|face| face.has_glyph(ch)) {
            return Arc::clone(face);
        }
    }
    if lookup.is_whitespace() || primary.has_glyph(lookup) {
        return Arc::clone(primary);
    }
    match fonts.fallback_for(query, lookup) {
        Some(face) => face,
        None => {
            log::debug!("no glyph for {ch:?} in {}", primary.name());
            Arc::clone(primary)
        }
    }
}

fn flush_segment(
    paragraphs: &mut [Vec<Item>],
    segment: &mut String,
    face: Option<&Arc<dyn FontFace>>,
    span: usize,
    style: &TextStyle,
) {
    if segment.is_empty() {
        return;
    }
    if let (Some(face), Some(paragraph)) = (face, paragraphs.last_mut()) {
        paragraph.extend(shape_segment(segment, face, span, style));
    }
    segment.clear();
}

/// Shape one segment; faces the shaper cannot read fall back to cmap advances
fn shape_segment(text: &str, face: &Arc<dyn FontFace>, span: usize, style: &TextStyle) -> Vec<Item> {
    match shape_clusters(text, face, span, style) {
        Some(items) => items,
        None => text.chars().map(|ch| unshaped_item(ch, face, span, style)).collect(),
    }
}

fn shape_clusters(text: &str, face: &Arc<dyn FontFace>, span: usize, style: &TextStyle) -> Option<Vec<Item>> {
    let shaper = rustybuzz::Face::from_slice(face.data(), face.face_index())?;
    let mut buffer = UnicodeBuffer::new();
    // same byte length, so clusters still index `text`
    buffer.push_str(&text.replace('\t', " "));
    buffer.guess_segment_properties();
    let rtl = buffer.direction() == Direction::RightToLeft;
    let shaped = rustybuzz::shape(&shaper, shaping_features(), buffer);
    let scale = style.size as f64 / face.units_per_em().max(1) as f64;

    // (cluster byte offset, glyphs) in visual order
    let mut clusters: Vec<(usize, Vec<ShapedGlyph>)> = Vec::new();
    for (info, position) in shaped.glyph_infos().iter().zip(shaped.glyph_positions()) {
        let glyph = ShapedGlyph {
            glyph_id: u16::try_from(info.glyph_id).unwrap_or(0),
            advance: position.x_advance as f64 * scale,
            x_offset: position.x_offset as f64 * scale,
            y_offset: position.y_offset as f64 * scale,
        };
        let cluster = info.cluster as usize;
        match clusters.last_mut() {
            Some((start, glyphs)) if *start == cluster => glyphs.push(glyph),
            _ => clusters.push((cluster, vec![glyph])),
        }
    }
    if rtl {
        clusters.reverse();
    }

    let mut items = Vec::with_capacity(clusters.len());
    for (index, (start, mut glyphs)) in clusters.iter().cloned().enumerate() {
        let end = clusters.get(index + 1).map(|(next, _)| *next).unwrap_or(text.len());
        let source = text.get(start..end)?;
        let first = source.chars().next()?;
        let last = source.chars().last()?;

        let mut advance: f64 = glyphs.iter().map(|glyph| glyph.advance).sum();
        if !is_combining(first) {
            advance += style.letter_spacing;
            if let Some(glyph) = glyphs.last_mut() {
                glyph.advance += style.letter_spacing;
            }
        }
        items.push(Item {
            text: source.to_string(),
            first,
            last,
            glyphs,
            advance,
            span,
            face: Arc::clone(face),
            rtl,
        });
    }
    Some(items)
}

/// One character, one glyph, advance from the face's metrics
fn unshaped_item(ch: char, face: &Arc<dyn FontFace>, span: usize, style: &TextStyle) -> Item {
    let lookup = if ch == '\t' { ' ' } else { ch };
    let glyph_id = face.glyph_id(lookup).unwrap_or(0);
    let mut advance = face.advance_points(glyph_id, style.size);
    if !is_combining(ch) {
        advance += style.letter_spacing;
    }
    Item {
        text: ch.to_string(),
        first: ch,
        last: ch,
        glyphs: vec![ShapedGlyph {
            glyph_id,
            advance,
            x_offset: 0.0,
            y_offset: 0.0,
        }],
        advance,
        span,
        face: Arc::clone(face),
        rtl: false,
    }
}

/// Greedy fill: index one past the last item of the line starting at `start`
fn find_line_end(items: &[Item], start: usize, budget: Option<f64>, mode: WrapMode) -> usize {
    let Some(budget) = budget else {
        return items.len();
    };

    let mut width = 0.0;
    let mut last_break = None;
    for i in start..items.len() {
        if i > start && can_break_before(items[i - 1].last, items[i].first, mode) {
            last_break = Some(i);
        }
        width += items[i].advance;
        // trailing whitespace never overflows
        if items[i].is_whitespace() || i == start {
            continue;
        }
        if width > budget + EPSILON {
            if let Some(end) = last_break {
                return end;
            }
            return match mode {
                WrapMode::Word => next_break(items, i, mode).unwrap_or(items.len()),
                WrapMode::WordChar | WrapMode::Char => char_break(items, start, i),
            };
        }
    }
    items.len()
}

fn next_break(items: &[Item], from: usize, mode: WrapMode) -> Option<usize> {
    (from + 1..items.len()).find(|&i| can_break_before(items[i - 1].last, items[i].first, mode))
}

/// Break before `at`, moved back so no combining mark starts the next line
fn char_break(items: &[Item], start: usize, at: usize) -> usize {
    let mut end = at;
    while end > start + 1 && is_combining(items[end].first) {
        end -= 1;
    }
    end
}

/// Whether a line may break between `prev` and `next`
fn can_break_before(prev: char, next: char, mode: WrapMode) -> bool {
    if next.is_whitespace() || is_combining(next) {
        return false;
    }
    match mode {
        WrapMode::Char => true,
        WrapMode::Word | WrapMode::WordChar => {
            prev.is_whitespace()
                || prev == '\u{200B}'
                || prev == '-'
                || is_cjk(prev)
                || is_cjk(next)
        }
    }
}

/// Combining marks that belong to the preceding character
fn is_combining(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}' |
        '\u{0483}'..='\u{0489}' |
        '\u{0591}'..='\u{05BD}' |
        '\u{064B}'..='\u{065F}' |
        '\u{0E31}' |
        '\u{0E34}'..='\u{0E3A}' |
        '\u{0E47}'..='\u{0E4E}' |
        '\u{1AB0}'..='\u{1AFF}' |
        '\u{1DC0}'..='\u{1DFF}' |
        '\u{20D0}'..='\u{20FF}' |
        '\u{FE20}'..='\u{FE2F}'
    )
}

/// Ideographic scripts where any two characters may break
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{4E00}'..='\u{9FFF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{20000}'..='\u{2FA1F}'
    )
}

fn empty_line(top: f64, metrics: LineMetrics) -> LayoutLine {
    LayoutLine {
        top,
        baseline: top + metrics.ascent,
        height: metrics.height,
        width: 0.0,
        runs: Vec::new(),
    }
}

fn build_line(
    items: &[Item],
    spans: &[StyledSpan],
    top: f64,
    justify_to: Option<f64>,
    base_metrics: LineMetrics,
) -> LayoutLine {
    let metrics = items
        .iter()
        .map(|item| LineMetrics::of(item.face.as_ref(), spans[item.span].style.size))
        .reduce(LineMetrics::max)
        .unwrap_or(base_metrics);

    let visible_len = items
        .iter()
        .rposition(|item| !item.is_whitespace())
        .map(|index| index + 1)
        .unwrap_or(0);
    let visible = &items[..visible_len];

    let natural: f64 = visible.iter().map(|item| item.advance).sum();
    let spaces = visible.iter().filter(|item| item.is_whitespace()).count();
    let extra_per_space = match justify_to {
        Some(width) if spaces > 0 && width > natural => (width - natural) / spaces as f64,
        _ => 0.0,
    };

    let mut runs: Vec<GlyphRun> = Vec::new();
    let mut x = 0.0;
    for item in visual_order(visible) {
        let style = &spans[item.span].style;
        let count = item.glyphs.len();
        for (index, shaped) in item.glyphs.iter().enumerate() {
            let mut advance = shaped.advance;
            if item.is_whitespace() && index + 1 == count {
                advance += extra_per_space;
            }
            let glyph = PositionedGlyph {
                glyph_id: shaped.glyph_id,
                x,
                advance,
                x_offset: shaped.x_offset,
                y_offset: shaped.y_offset,
                text: if index == 0 { item.text.clone() } else { String::new() },
            };
            x += advance;

            match runs.last_mut() {
                Some(run) if same_run(run, item, style) => run.glyphs.push(glyph),
                _ => runs.push(GlyphRun {
                    face: Arc::clone(&item.face),
                    font_size: style.size,
                    color: style.color,
                    background: style.background,
                    underline: style.underline,
                    strikethrough: style.strikethrough,
                    rise: style.rise,
                    glyphs: vec![glyph],
                }),
            }
        }
    }

    LayoutLine {
        top,
        baseline: top + metrics.ascent,
        height: metrics.height,
        width: x,
        runs,
    }
}

/// Logical order with each right-to-left stretch reversed
fn visual_order(items: &[Item]) -> Vec<&Item> {
    let mut ordered = Vec::with_capacity(items.len());
    let mut start = 0;
    while start < items.len() {
        let rtl = items[start].rtl;
        let end = items[start..]
            .iter()
            .position(|item| item.rtl != rtl)
            .map(|offset| start + offset)
            .unwrap_or(items.len());
        if rtl {
            ordered.extend(items[start..end].iter().rev());
        } else {
            ordered.extend(items[start..end].iter());
        }
        start = end;
    }
    ordered
}

fn same_run(run: &GlyphRun, item: &Item, style: &TextStyle) -> bool {
    Arc::ptr_eq(&run.face, &item.face)
        && run.font_size == style.size
        && run.color == style.color
        && run.background == style.background
        && run.underline == style.underline
        && run.strikethrough == style.strikethrough
        && run.rise == style.rise
}
