//! Pango-style markup: tags, span attributes and entities

use crate::{FontQuery, LayoutError, Result};
use pdf_core::{Color, FontStyle, FontWeight};

/// Pango units per point
const PANGO_SCALE: f64 = 1024.0;

/// Size ratio of `<big>`, `<small>` and one step of the named sizes
const SCALE_STEP: f32 = 1.2;

/// Baseline shift of `<sub>` and `<sup>` in Pango units
const SCRIPT_RISE: f64 = 5000.0;

/// Attributes that are accepted and have no effect on the output
const INERT_ATTRIBUTES: &[&str] = &[
    "variant",
    "stretch",
    "font_stretch",
    "font_variant",
    "lang",
    "fallback",
    "gravity",
    "gravity_hint",
    "font_features",
    "alpha",
    "fgalpha",
    "bgalpha",
    "underline_color",
    "strikethrough_color",
    "insert_hyphens",
    "allow_breaks",
    "show",
    "line_height",
    "text_transform",
    "segment",
    "overline",
    "overline_color",
    "baseline_shift",
    "font_scale",
];

/// Resolved style of a piece of text
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Family list, comma separated (e.g. `"DejaVu Sans, Sans"`)
    pub families: String,
    /// Size in points
    pub size: f32,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub color: Color,
    pub background: Option<Color>,
    pub underline: bool,
    pub strikethrough: bool,
    /// Baseline shift in points, positive raises
    pub rise: f64,
    /// Extra space after each character in points
    pub letter_spacing: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            families: "Sans".to_string(),
            size: 12.0,
            weight: FontWeight::NORMAL,
            style: FontStyle::Normal,
            color: Color::black(),
            background: None,
            underline: false,
            strikethrough: false,
            rise: 0.0,
            letter_spacing: 0.0,
        }
    }
}

impl TextStyle {
    /// Font lookup key for this style
    pub fn query(&self) -> FontQuery {
        FontQuery {
            families: self.families.clone(),
            weight: self.weight,
            style: self.style,
        }
    }
}

/// A run of text sharing one style
#[derive(Debug, Clone, PartialEq)]
pub struct StyledSpan {
    pub text: String,
    pub style: TextStyle,
}

impl StyledSpan {
    /// Text taken literally, without markup
    pub fn plain(text: &str, style: &TextStyle) -> Vec<StyledSpan> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![StyledSpan {
            text: text.to_string(),
            style: style.clone(),
        }]
    }
}

/// Escape text so it parses back as the same literal characters
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape a value for use inside a double-quoted attribute
pub fn escape_attribute(value: &str) -> String {
    escape_text(value)
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

struct Frame {
    tag: String,
    style: TextStyle,
}

struct MarkupParser<'a> {
    base: &'a TextStyle,
    stack: Vec<Frame>,
    spans: Vec<StyledSpan>,
    pending: String,
}

/// Parse markup into styled spans.
///
/// `base` is the style outside any tag; relative sizes (`larger`, `<big>`,
/// percentages) apply to the enclosing span, named sizes to `base`.
pub fn parse_markup(markup: &str, base: &TextStyle) -> Result<Vec<StyledSpan>> {
    let mut parser = MarkupParser {
        base,
        stack: Vec::new(),
        spans: Vec::new(),
        pending: String::new(),
    };

    let mut rest = markup;
    while let Some(pos) = rest.find(['<', '&']) {
        parser.pending.push_str(&rest[..pos]);
        rest = &rest[pos..];
        if rest.starts_with('<') {
            let end = find_tag_end(rest)
                .ok_or_else(|| markup_error(format!("unterminated tag in {rest:?}")))?;
            parser.tag(&rest[1..end])?;
            rest = &rest[end + 1..];
        } else {
            let end = rest
                .find(';')
                .ok_or_else(|| markup_error(format!("unterminated entity in {rest:?}")))?;
            let c = decode_entity(&rest[1..end])?;
            parser.pending.push(c);
            rest = &rest[end + 1..];
        }
    }
    parser.pending.push_str(rest);

    if let Some(frame) = parser.stack.last() {
        return Err(markup_error(format!("unclosed <{}>", frame.tag)));
    }
    parser.flush();
    Ok(parser.spans)
}

impl MarkupParser<'_> {
    fn current(&self) -> &TextStyle {
        self.stack
            .last()
            .map(|frame| &frame.style)
            .unwrap_or(self.base)
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        let style = self.current().clone();
        match self.spans.last_mut() {
            Some(last) if last.style == style => last.text.push_str(&text),
            _ => self.spans.push(StyledSpan { text, style }),
        }
    }

    fn tag(&mut self, inner: &str) -> Result<()> {
        let inner = inner.trim();
        if let Some(name) = inner.strip_prefix('/') {
            return self.close(name.trim());
        }

        let (inner, self_closing) = match inner.strip_suffix('/') {
            Some(stripped) => (stripped.trim_end(), true),
            None => (inner, false),
        };
        let name_end = inner
            .find(char::is_whitespace)
            .unwrap_or(inner.len());
        let name = &inner[..name_end];
        let attributes = parse_attributes(&inner[name_end..])?;

        let mut style = self.current().clone();
        match name {
            "markup" | "span" => {}
            "b" => style.weight = FontWeight::BOLD,
            "i" => style.style = FontStyle::Italic,
            "s" => style.strikethrough = true,
            "u" => style.underline = true,
            "tt" => style.families = "Monospace".to_string(),
            "big" => style.size *= SCALE_STEP,
            "small" => style.size /= SCALE_STEP,
            "sub" => {
                style.size /= SCALE_STEP;
                style.rise -= SCRIPT_RISE / PANGO_SCALE;
            }
            "sup" => {
                style.size /= SCALE_STEP;
                style.rise += SCRIPT_RISE / PANGO_SCALE;
            }
            "" => return Err(markup_error("empty tag".to_string())),
            other => return Err(markup_error(format!("unknown tag <{other}>"))),
        }

        if name != "span" && !attributes.is_empty() {
            return Err(markup_error(format!("<{name}> does not take attributes")));
        }
        for (key, value) in &attributes {
            apply_attribute(&mut style, key, value, self.base)?;
        }

        if self_closing {
            return Ok(());
        }
        self.flush();
        self.stack.push(Frame {
            tag: name.to_string(),
            style,
        });
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<()> {
        match self.stack.last() {
            Some(frame) if frame.tag == name => {
                self.flush();
                self.stack.pop();
                Ok(())
            }
            Some(frame) => Err(markup_error(format!(
                "</{name}> closes <{}>",
                frame.tag
            ))),
            None => Err(markup_error(format!("</{name}> without opening tag"))),
        }
    }
}

fn markup_error(message: String) -> LayoutError {
    LayoutError::Markup(message)
}

/// Index of the `>` closing the tag at the start of `s`, skipping quoted values
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (index, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if open == c => quote = None,
            (None, '>') => return Some(index),
            (None, '<') => return None,
            _ => {}
        }
    }
    None
}

fn decode_entity(name: &str) -> Result<char> {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(decimal) = name.strip_prefix('#') {
                decimal.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    };
    decoded.ok_or_else(|| markup_error(format!("unknown entity &{name};")))
}

fn decode_entities(value: &str) -> Result<String> {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        decoded.push_str(&rest[..pos]);
        let end = rest[pos..]
            .find(';')
            .ok_or_else(|| markup_error(format!("unterminated entity in {value:?}")))?;
        decoded.push(decode_entity(&rest[pos + 1..pos + end])?);
        rest = &rest[pos + end + 1..];
    }
    decoded.push_str(rest);
    Ok(decoded)
}

/// `name="value"` pairs in source order
fn parse_attributes(source: &str) -> Result<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    let mut rest = source.trim_start();

    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_end == 0 {
            return Err(markup_error(format!("malformed attribute at {rest:?}")));
        }
        let name = &rest[..name_end];
        rest = rest[name_end..].trim_start();

        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| markup_error(format!("attribute {name} has no value")))?
            .trim_start();

        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| markup_error(format!("attribute {name} value must be quoted")))?;
        let value_end = rest[1..]
            .find(quote)
            .ok_or_else(|| markup_error(format!("attribute {name} value is not terminated")))?;
        let value = decode_entities(&rest[1..1 + value_end])?;
        attributes.push((name.to_string(), value));
        rest = rest[value_end + 2..].trim_start();
    }

    Ok(attributes)
}

fn apply_attribute(style: &mut TextStyle, name: &str, value: &str, base: &TextStyle) -> Result<()> {
    match name {
        "font" | "font_desc" => apply_font_description(style, value, base)?,
        "font_family" | "face" => style.families = value.trim().to_string(),
        "size" | "font_size" => style.size = parse_size(value, style.size, base.size)?,
        "style" | "font_style" => {
            style.style = parse_slant(value)
                .ok_or_else(|| markup_error(format!("invalid style {value:?}")))?
        }
        "weight" | "font_weight" => {
            style.weight = parse_weight(value)
                .ok_or_else(|| markup_error(format!("invalid weight {value:?}")))?
        }
        "foreground" | "fgcolor" | "color" => style.color = parse_color(value)?,
        "background" | "bgcolor" => style.background = Some(parse_color(value)?),
        "underline" => {
            style.underline = match value {
                "none" => false,
                "single" | "double" | "low" | "error" => true,
                _ => return Err(markup_error(format!("invalid underline {value:?}"))),
            }
        }
        "strikethrough" => {
            style.strikethrough = match value {
                "true" => true,
                "false" => false,
                _ => return Err(markup_error(format!("invalid strikethrough {value:?}"))),
            }
        }
        "rise" => style.rise = parse_pango_units(value)?,
        "letter_spacing" => style.letter_spacing = parse_pango_units(value)?,
        inert if INERT_ATTRIBUTES.contains(&inert) => {
            log::debug!("ignoring span attribute {inert}={value:?}");
        }
        other => return Err(markup_error(format!("unknown span attribute {other:?}"))),
    }
    Ok(())
}

/// Size value: 1024ths of a point, `Npt`, `N%`, a named size, `smaller` or `larger`
fn parse_size(value: &str, current: f32, base: f32) -> Result<f32> {
    let value = value.trim();
    let named_step = match value {
        "xx-small" => Some(-3),
        "x-small" => Some(-2),
        "small" => Some(-1),
        "medium" => Some(0),
        "large" => Some(1),
        "x-large" => Some(2),
        "xx-large" => Some(3),
        _ => None,
    };
    let size = if let Some(step) = named_step {
        base * SCALE_STEP.powi(step)
    } else if value == "smaller" {
        current / SCALE_STEP
    } else if value == "larger" {
        current * SCALE_STEP
    } else if let Some(points) = value.strip_suffix("pt") {
        parse_number(points)? as f32
    } else if let Some(percent) = value.strip_suffix('%') {
        current * parse_number(percent)? as f32 / 100.0
    } else {
        (parse_number(value)? / PANGO_SCALE) as f32
    };

    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(markup_error(format!("invalid size {value:?}")))
    }
}

/// Rise and spacing values: Pango units or `Npt`, returned in points
fn parse_pango_units(value: &str) -> Result<f64> {
    let value = value.trim();
    match value.strip_suffix("pt") {
        Some(points) => parse_number(points),
        None => Ok(parse_number(value)? / PANGO_SCALE),
    }
}

fn parse_number(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| markup_error(format!("invalid number {value:?}")))
}

fn parse_slant(value: &str) -> Option<FontStyle> {
    match value.trim().to_ascii_lowercase().as_str() {
        "normal" | "roman" => Some(FontStyle::Normal),
        "italic" => Some(FontStyle::Italic),
        "oblique" => Some(FontStyle::Oblique),
        _ => None,
    }
}

/// Named (`bold`, `ultralight`, ...) or numeric weight
pub fn parse_weight(value: &str) -> Option<FontWeight> {
    let value = value.trim().to_ascii_lowercase();
    let weight = match value.as_str() {
        "thin" => 100,
        "ultralight" | "extralight" => 200,
        "light" => 300,
        "semilight" => 350,
        "book" => 380,
        "normal" | "regular" => 400,
        "medium" => 500,
        "semibold" | "demibold" => 600,
        "bold" => 700,
        "ultrabold" | "extrabold" => 800,
        "heavy" | "black" => 900,
        "ultraheavy" => 1000,
        numeric => numeric
            .parse::<u16>()
            .ok()
            .filter(|n| (100..=1000).contains(n))?,
    };
    Some(FontWeight(weight))
}

/// `#rgb`, `#rrggbb`, `#rrrrggggbbbb` or a color name
pub fn parse_color(value: &str) -> Result<Color> {
    let value = value.trim();
    let invalid = || markup_error(format!("invalid color {value:?}"));

    if let Some(hex) = value.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let digits = match hex.len() {
            3 => 1,
            6 => 2,
            12 => 4,
            _ => return Err(invalid()),
        };
        let component = |index: usize| -> Result<u8> {
            let part = &hex[index * digits..(index + 1) * digits];
            let raw = u32::from_str_radix(part, 16).map_err(|_| invalid())?;
            Ok(match digits {
                1 => (raw * 17) as u8,
                2 => raw as u8,
                _ => (raw >> 8) as u8,
            })
        };
        return Ok(Color::from_rgb(component(0)?, component(1)?, component(2)?));
    }

    let rgb = match value.to_ascii_lowercase().as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" | "lime" => (0, 255, 0),
        "blue" => (0, 0, 255),
        "yellow" => (255, 255, 0),
        "cyan" | "aqua" => (0, 255, 255),
        "magenta" | "fuchsia" => (255, 0, 255),
        "gray" | "grey" => (190, 190, 190),
        "darkgray" | "darkgrey" => (169, 169, 169),
        "lightgray" | "lightgrey" => (211, 211, 211),
        "orange" => (255, 165, 0),
        "purple" => (160, 32, 240),
        "brown" => (165, 42, 42),
        "pink" => (255, 192, 203),
        "navy" => (0, 0, 128),
        "maroon" => (176, 48, 96),
        "olive" => (128, 128, 0),
        "teal" => (0, 128, 128),
        "silver" => (192, 192, 192),
        "gold" => (255, 215, 0),
        _ => return Err(invalid()),
    };
    Ok(Color::from_rgb(rgb.0, rgb.1, rgb.2))
}

/// `font="Sans Bold Italic 12"`: family words, then style, weight and size words
fn apply_font_description(style: &mut TextStyle, value: &str, base: &TextStyle) -> Result<()> {
    let mut words: Vec<&str> = value.split_whitespace().collect();

    while let Some(word) = words.last().copied() {
        let lower = word.to_ascii_lowercase();
        if let Some(slant) = parse_slant(&lower).filter(|_| lower != "normal") {
            style.style = slant;
        } else if let Some(weight) = parse_weight(&lower).filter(|_| lower.parse::<u16>().is_err()) {
            style.weight = weight;
        } else if let Ok(size) = lower.trim_end_matches("px").parse::<f32>() {
            if !(size.is_finite() && size > 0.0) {
                return Err(markup_error(format!("invalid size in font {value:?}")));
            }
            style.size = size;
        } else if lower == "normal" {
            style.style = FontStyle::Normal;
            style.weight = base.weight;
        } else {
            break;
        }
        words.pop();
    }

    let family = words.join(" ");
    let family = family.trim().trim_end_matches(',').trim();
    if !family.is_empty() {
        style.families = family.to_string();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(markup: &str) -> Vec<StyledSpan> {
        parse_markup(markup, &TextStyle::default()).unwrap()
    }

    fn texts(spans: &[StyledSpan]) -> Vec<&str> {
        spans.iter().map(|span| span.text.as_str()).collect()
    }

    #[test]
    fn test_plain_text_is_one_span() {
        let spans = parse("Hello world");
        assert_eq!(texts(&spans), vec!["Hello world"]);
        assert_eq!(spans[0].style, TextStyle::default());
    }

    #[test]
    fn test_bold_and_italic_tags() {
        let spans = parse("a<b>b<i>c</i></b>d");
        assert_eq!(texts(&spans), vec!["a", "b", "c", "d"]);
        assert_eq!(spans[1].style.weight, FontWeight::BOLD);
        assert_eq!(spans[2].style.weight, FontWeight::BOLD);
        assert_eq!(spans[2].style.style, FontStyle::Italic);
        assert_eq!(spans[3].style, TextStyle::default());
    }

    #[test]
    fn test_span_attributes() {
        let spans = parse(
            r##"<span foreground="#ff0000" background="blue" size="20pt" underline="single" strikethrough="true">x</span>"##,
        );
        let style = &spans[0].style;
        assert_eq!(style.color, Color::from_rgb(255, 0, 0));
        assert_eq!(style.background, Some(Color::from_rgb(0, 0, 255)));
        assert_eq!(style.size, 20.0);
        assert!(style.underline);
        assert!(style.strikethrough);
    }

    #[test]
    fn test_attribute_aliases_match() {
        assert_eq!(
            parse(r#"<span color="red" font_size="10pt">x</span>"#),
            parse(r#"<span foreground="red" size="10pt">x</span>"#)
        );
    }

    #[test]
    fn test_size_units() {
        let size = |markup: &str| parse(markup)[0].style.size;
        assert_eq!(size(r#"<span size="10240">x</span>"#), 10.0);
        assert_eq!(size(r#"<span size="50%">x</span>"#), 6.0);
        assert!((size("<big>x</big>") - 14.4).abs() < 1e-4);
        assert!((size(r#"<span size="large">x</span>"#) - 14.4).abs() < 1e-4);
        assert!((size(r#"<span size="smaller">x</span>"#) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_sub_and_sup_rise() {
        let spans = parse("H<sub>2</sub>O<sup>+</sup>");
        assert!(spans[1].style.rise < 0.0);
        assert!(spans[3].style.rise > 0.0);
        assert!(spans[1].style.size < 12.0);
    }

    #[test]
    fn test_tt_selects_monospace() {
        let spans = parse("<tt>code</tt>");
        assert_eq!(spans[0].style.families, "Monospace");
    }

    #[test]
    fn test_font_description() {
        let spans = parse(r#"<span font="DejaVu Serif Bold Italic 9">x</span>"#);
        let style = &spans[0].style;
        assert_eq!(style.families, "DejaVu Serif");
        assert_eq!(style.weight, FontWeight::BOLD);
        assert_eq!(style.style, FontStyle::Italic);
        assert_eq!(style.size, 9.0);

        let spans = parse(r#"<span font="14">x</span>"#);
        assert_eq!(spans[0].style.families, "Sans");
        assert_eq!(spans[0].style.size, 14.0);
    }

    #[test]
    fn test_weights() {
        assert_eq!(parse_weight("ultralight"), Some(FontWeight(200)));
        assert_eq!(parse_weight("600"), Some(FontWeight::SEMIBOLD));
        assert_eq!(parse_weight("1200"), None);
        assert_eq!(parse_weight("fat"), None);
    }

    #[test]
    fn test_colors() {
        assert_eq!(parse_color("#fff").unwrap(), Color::white());
        assert_eq!(parse_color("#00ff00").unwrap(), Color::from_rgb(0, 255, 0));
        assert_eq!(parse_color("#ffff00000000").unwrap(), Color::from_rgb(255, 0, 0));
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("mauve-ish").is_err());
    }

    #[test]
    fn test_entities() {
        let spans = parse("a &amp; b &lt;&gt; &#65;&#x42; &quot;&apos;");
        assert_eq!(spans[0].text, "a & b <> AB \"'");
        assert!(parse_markup("&bogus;", &TextStyle::default()).is_err());
        assert!(parse_markup("a & b", &TextStyle::default()).is_err());
    }

    #[test]
    fn test_inert_attributes_ignored() {
        let spans = parse(r#"<span lang="th" variant="smallcaps">x</span>"#);
        assert_eq!(spans[0].style, TextStyle::default());
    }

    #[test]
    fn test_errors() {
        let fails = |markup: &str| {
            matches!(
                parse_markup(markup, &TextStyle::default()),
                Err(LayoutError::Markup(_))
            )
        };
        assert!(fails("<blink>x</blink>"));
        assert!(fails(r#"<span bogus="1">x</span>"#));
        assert!(fails(r#"<span weight="fat">x</span>"#));
        assert!(fails("<b>x"));
        assert!(fails("<b>x</i>"));
        assert!(fails("x</b>"));
        assert!(fails("<b x"));
        assert!(fails(r#"<b class="x">y</b>"#));
        assert!(fails(r#"<span size="0">x</span>"#));
    }

    #[test]
    fn test_markup_root_and_adjacent_merge() {
        let spans = parse("<markup>a<span>b</span></markup>");
        assert_eq!(texts(&spans), vec!["ab"]);
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let spans = parse(r#"<span font_family="A>B">x</span>"#);
        assert_eq!(spans[0].style.families, "A>B");
    }

    #[test]
    fn test_escape_round_trip() {
        let text = r#"1 < 2 & "x" > 'y'"#;
        let markup = format!(
            r#"<span font_family="{}">{}</span>"#,
            escape_attribute(text),
            escape_text(text)
        );
        let spans = parse(&markup);
        assert_eq!(spans[0].text, text);
        assert_eq!(spans[0].style.families, text);
    }
}
