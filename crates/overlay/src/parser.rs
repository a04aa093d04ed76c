//! Request JSON parsing and validation

use crate::schema::{Area, ImageArea, RenderRequest, TextArea};
use crate::{OverlayError, Result};
use pdf_core::Color;
use serde_json::Value;
use text_layout::WrapMode;

/// Largest accepted font size in points
pub const MAX_FONT_SIZE: f64 = 10_000.0;

/// Parse a request from a JSON string and validate it
pub fn parse_request(json: &str) -> Result<RenderRequest> {
    let request: RenderRequest = serde_json::from_str(json)?;
    request.validate()?;
    Ok(request)
}

/// Convert a scalar style value to its attribute string
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parse `"r,g,b"` with each component in 0..=255
pub(crate) fn parse_rgb(value: &str) -> std::result::Result<Color, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected \"r,g,b\", got {value:?}"));
    }

    let mut components = [0.0f32; 3];
    for (slot, part) in components.iter_mut().zip(&parts) {
        let component: f64 = part
            .parse()
            .map_err(|_| format!("invalid color component {part:?} in {value:?}"))?;
        if !component.is_finite() || !(0.0..=255.0).contains(&component) {
            return Err(format!("color component {part} is outside 0..=255"));
        }
        *slot = (component / 255.0) as f32;
    }
    Ok(Color::rgb(components[0], components[1], components[2]))
}

impl RenderRequest {
    /// Check everything that can be checked without opening a file
    pub fn validate(&self) -> Result<()> {
        if self.template.trim().is_empty() {
            return Err(OverlayError::invalid("template", "must not be empty"));
        }
        for (index, area) in self.areas.iter().enumerate() {
            let field = |name: &str| format!("areas[{index}].{name}");
            if let Some((x, y)) = area.position() {
                check_finite(&field("x"), x)?;
                check_finite(&field("y"), y)?;
            }
            match area {
                Area::Image(image) => validate_image(image, &field)?,
                Area::Text(text) => validate_text(text, &field)?,
                Area::Unknown { .. } => {}
            }
        }
        Ok(())
    }
}

fn check_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OverlayError::invalid(field, "must be a finite number"))
    }
}

fn validate_image(image: &ImageArea, field: &dyn Fn(&str) -> String) -> Result<()> {
    if image.src.trim().is_empty() {
        return Err(OverlayError::invalid(field("src"), "must not be empty"));
    }
    for (name, value) in [("width", image.width), ("height", image.height)] {
        let value = value.ok_or_else(|| OverlayError::invalid(field(name), "is required for image areas"))?;
        check_finite(&field(name), value)?;
        if value < 0.0 {
            return Err(OverlayError::invalid(field(name), format!("must be >= 0, got {value}")));
        }
    }
    Ok(())
}

fn validate_text(text: &TextArea, field: &dyn Fn(&str) -> String) -> Result<()> {
    if let Some(size) = text.font_size {
        if !size.is_finite() || size <= 0.0 {
            return Err(OverlayError::invalid(field("font_size"), format!("must be > 0, got {size}")));
        }
        if size > MAX_FONT_SIZE {
            return Err(OverlayError::InvalidStyle {
                field: field("font_size"),
                message: format!("{size} exceeds the maximum of {MAX_FONT_SIZE}"),
            });
        }
    }
    if let Some(width) = text.width {
        if !width.is_finite() || width <= 0.0 {
            return Err(OverlayError::invalid(field("width"), format!("must be > 0, got {width}")));
        }
    }
    if let Some(color) = &text.color {
        parse_rgb(color).map_err(|message| OverlayError::InvalidColor {
            field: field("color"),
            message,
        })?;
    }
    if let Some(wrap) = &text.wrap {
        if WrapMode::from_name(wrap).is_none() {
            return Err(OverlayError::InvalidStyle {
                field: field("wrap"),
                message: format!("unknown wrap mode {wrap:?}"),
            });
        }
    }
    if let Some(style) = &text.style {
        for (key, value) in style {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(OverlayError::InvalidStyle {
                    field: field("style"),
                    message: format!("invalid attribute name {key:?}"),
                });
            }
            if value_to_string(value).is_none() {
                return Err(OverlayError::InvalidStyle {
                    field: field(&format!("style.{key}")),
                    message: format!("expected a string, number or boolean, got {value}"),
                });
            }
        }
    }
    Ok(())
}
