//! Text areas: sanitize, wrap in a style span, lay out, draw

use super::{AreaContext, DrawArea};
use crate::parser::{parse_rgb, value_to_string, MAX_FONT_SIZE};
use crate::schema::TextArea;
use crate::{OverlayError, RenderConfig, Result};
use pdf_core::Canvas;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use text_layout::{
    escape_attribute, escape_text, layout_text, parse_markup, LayoutOptions, TextStyle, WrapMode,
};

static TAG_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn tag_regex() -> Option<&'static Regex> {
    TAG_REGEX.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

/// Remove anything that looks like a tag
pub fn strip_markup(content: &str) -> String {
    match tag_regex() {
        Some(re) => re.replace_all(content, "").into_owned(),
        None => content.to_string(),
    }
}

/// Markup string for a text area.
///
/// Without `allow_markup` the content is stripped of tags and escaped, so it
/// reads back literally. A `style` map wraps the result in one span whose
/// attributes are emitted in key order.
pub fn build_markup(content: &str, allow_markup: bool, style: Option<&BTreeMap<String, Value>>) -> String {
    let body = if allow_markup {
        content.to_string()
    } else {
        escape_text(&strip_markup(content))
    };

    let Some(style) = style.filter(|style| !style.is_empty()) else {
        return body;
    };

    let mut attributes = String::new();
    for (key, value) in style {
        if let Some(value) = value_to_string(value) {
            attributes.push_str(&format!(" {key}=\"{}\"", escape_attribute(&value)));
        }
    }
    format!("<span{attributes}>{body}</span>")
}

impl TextArea {
    /// Style outside any markup: config defaults overridden by the area
    pub fn base_style(&self, config: &RenderConfig) -> Result<TextStyle> {
        let color = match &self.color {
            Some(color) => parse_rgb(color).map_err(|message| OverlayError::InvalidColor {
                field: "color".to_string(),
                message,
            })?,
            None => config.default_color()?,
        };
        let size = self.font_size.unwrap_or(config.default_font_size) * config.font_scale;
        if !size.is_finite() || size <= 0.0 || size > MAX_FONT_SIZE {
            return Err(OverlayError::InvalidStyle {
                field: "font_size".to_string(),
                message: format!("scaled size {size} is outside 0..={MAX_FONT_SIZE}"),
            });
        }

        Ok(TextStyle {
            families: self
                .font_family
                .clone()
                .unwrap_or_else(|| config.default_font_family.clone()),
            size: size as f32,
            weight: self.font_weight.to_weight(),
            style: self.font_slant.to_style(),
            color,
            ..TextStyle::default()
        })
    }

    pub fn layout_options(&self) -> Result<LayoutOptions> {
        let wrap = match &self.wrap {
            Some(name) => WrapMode::from_name(name).ok_or_else(|| OverlayError::InvalidStyle {
                field: "wrap".to_string(),
                message: format!("unknown wrap mode {name:?}"),
            })?,
            None => WrapMode::Word,
        };
        Ok(LayoutOptions {
            width: self.width,
            wrap,
            justify: self.justify,
        })
    }
}

impl DrawArea for TextArea {
    fn draw(&self, canvas: &mut dyn Canvas, ctx: &mut AreaContext<'_>) -> Result<()> {
        let base = self.base_style(ctx.config)?;
        let markup = build_markup(&self.content, self.allow_markup, self.style.as_ref());
        let spans = parse_markup(&markup, &base)?;
        let layout = layout_text(&spans, &base, &self.layout_options()?, ctx.fonts)?;

        log::debug!(
            "text at ({}, {}): {} lines, {:.2} x {:.2} pt",
            self.x,
            self.y,
            layout.lines.len(),
            layout.width,
            layout.height
        );

        canvas.translate(self.x, self.y);
        canvas.draw_text(&layout).map_err(OverlayError::Render)
    }
}
