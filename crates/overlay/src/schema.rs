//! Request schema definitions

use pdf_core::{FontStyle, FontWeight};
use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One compositing request: a template and the areas drawn over it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderRequest {
    /// Template PDF path, relative paths resolve against the base directory
    pub template: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Areas in paint order
    #[serde(default)]
    pub areas: Vec<Area>,
}

/// Output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    /// PNG at the template's size
    Img,
}

/// An overlay area, tagged on `type`
#[derive(Debug, Clone, PartialEq)]
pub enum Area {
    Image(ImageArea),
    Text(TextArea),
    /// A `type` this version does not draw; skipped at render time
    Unknown { kind: String },
}

impl Area {
    /// The `type` tag
    pub fn kind(&self) -> &str {
        match self {
            Area::Image(_) => "image",
            Area::Text(_) => "text",
            Area::Unknown { kind } => kind,
        }
    }

    /// Top-left corner in points
    pub fn position(&self) -> Option<(f64, f64)> {
        match self {
            Area::Image(image) => Some((image.x, image.y)),
            Area::Text(text) => Some((text.x, text.y)),
            Area::Unknown { .. } => None,
        }
    }
}

impl<'de> Deserialize<'de> for Area {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        let kind = match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(de::Error::custom(format!("area type must be a string, got {other}")))
            }
            None => return Err(de::Error::missing_field("type")),
        };

        let body = Value::Object(map);
        match kind.as_str() {
            "image" => ImageArea::deserialize(body)
                .map(Area::Image)
                .map_err(de::Error::custom),
            "text" => TextArea::deserialize(body)
                .map(Area::Text)
                .map_err(de::Error::custom),
            _ => Ok(Area::Unknown { kind }),
        }
    }
}

/// Image fitted proportionally into a box
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageArea {
    pub x: f64,
    pub y: f64,
    /// Image path (PNG or JPEG)
    pub src: String,
    /// Box width in points; required by validation
    pub width: Option<f64>,
    /// Box height in points; required by validation
    pub height: Option<f64>,
}

/// Text block laid out from its top-left corner
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextArea {
    pub x: f64,
    pub y: f64,
    pub content: String,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    #[serde(default)]
    pub font_weight: FontWeightName,
    #[serde(default)]
    pub font_slant: FontSlant,
    /// Wrap budget in points
    pub width: Option<f64>,
    /// `word`, `word_char` or `char`
    pub wrap: Option<String>,
    #[serde(default)]
    pub justify: bool,
    #[serde(default)]
    pub allow_markup: bool,
    /// Span attributes applied to the whole content
    pub style: Option<BTreeMap<String, Value>>,
    /// `"r,g,b"` with components in 0..=255
    pub color: Option<String>,
}

/// `font_weight` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontWeightName {
    #[default]
    Normal,
    Bold,
}

impl FontWeightName {
    /// Known names, anything else falls back to normal
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal" => FontWeightName::Normal,
            "bold" => FontWeightName::Bold,
            other => {
                log::warn!("unknown font_weight {other:?}, using normal");
                FontWeightName::Normal
            }
        }
    }

    pub fn to_weight(self) -> FontWeight {
        match self {
            FontWeightName::Normal => FontWeight::NORMAL,
            FontWeightName::Bold => FontWeight::BOLD,
        }
    }
}

impl<'de> Deserialize<'de> for FontWeightName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(name)) => Self::from_name(&name),
            None | Some(Value::Null) => FontWeightName::Normal,
            Some(other) => {
                log::warn!("unknown font_weight {other}, using normal");
                FontWeightName::Normal
            }
        })
    }
}

/// `font_slant` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
    Oblique,
}

impl FontSlant {
    /// Known names, anything else falls back to normal
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal" => FontSlant::Normal,
            "italic" => FontSlant::Italic,
            "oblique" => FontSlant::Oblique,
            other => {
                log::warn!("unknown font_slant {other:?}, using normal");
                FontSlant::Normal
            }
        }
    }

    pub fn to_style(self) -> FontStyle {
        match self {
            FontSlant::Normal => FontStyle::Normal,
            FontSlant::Italic => FontStyle::Italic,
            FontSlant::Oblique => FontStyle::Oblique,
        }
    }
}

impl<'de> Deserialize<'de> for FontSlant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(name)) => Self::from_name(&name),
            None | Some(Value::Null) => FontSlant::Normal,
            Some(other) => {
                log::warn!("unknown font_slant {other}, using normal");
                FontSlant::Normal
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_request() {
        let request: RenderRequest = serde_json::from_str(r#"{ "template": "a.pdf" }"#).unwrap();
        assert_eq!(request.template, "a.pdf");
        assert_eq!(request.output_format, OutputFormat::Pdf);
        assert!(request.areas.is_empty());
    }

    #[test]
    fn test_parse_output_format() {
        let request: RenderRequest =
            serde_json::from_str(r#"{ "template": "a.pdf", "output_format": "img" }"#).unwrap();
        assert_eq!(request.output_format, OutputFormat::Img);

        let err = serde_json::from_str::<RenderRequest>(r#"{ "template": "a.pdf", "output_format": "gif" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_image_area() {
        let json = r#"{ "type": "image", "x": 10, "y": 20.5, "src": "logo.png", "width": 100, "height": 50 }"#;
        let area: Area = serde_json::from_str(json).unwrap();
        assert_eq!(
            area,
            Area::Image(ImageArea {
                x: 10.0,
                y: 20.5,
                src: "logo.png".to_string(),
                width: Some(100.0),
                height: Some(50.0),
            })
        );
        assert_eq!(area.kind(), "image");
        assert_eq!(area.position(), Some((10.0, 20.5)));
    }

    #[test]
    fn test_parse_text_area_defaults() {
        let json = r#"{ "type": "text", "x": 1, "y": 2, "content": "Hi" }"#;
        let area: Area = serde_json::from_str(json).unwrap();
        let Area::Text(text) = area else {
            panic!("expected text area");
        };
        assert_eq!(text.content, "Hi");
        assert_eq!(text.font_family, None);
        assert_eq!(text.font_size, None);
        assert_eq!(text.font_weight, FontWeightName::Normal);
        assert_eq!(text.font_slant, FontSlant::Normal);
        assert!(!text.justify);
        assert!(!text.allow_markup);
        assert_eq!(text.style, None);
    }

    #[test]
    fn test_parse_text_area_style() {
        let json = r#"{
            "type": "text", "x": 0, "y": 0, "content": "x",
            "font_weight": "bold", "font_slant": "italic",
            "style": { "foreground": "red", "underline": "single" }
        }"#;
        let Area::Text(text) = serde_json::from_str::<Area>(json).unwrap() else {
            panic!("expected text area");
        };
        assert_eq!(text.font_weight, FontWeightName::Bold);
        assert_eq!(text.font_slant, FontSlant::Italic);
        let style = text.style.unwrap();
        assert_eq!(style.keys().collect::<Vec<_>>(), vec!["foreground", "underline"]);
    }

    #[test]
    fn test_unknown_weight_and_slant_fall_back() {
        assert_eq!(FontWeightName::from_name("heavy"), FontWeightName::Normal);
        assert_eq!(FontWeightName::from_name("BOLD"), FontWeightName::Bold);
        assert_eq!(FontSlant::from_name("slanted"), FontSlant::Normal);
        assert_eq!(FontSlant::Oblique.to_style(), FontStyle::Oblique);
        assert_eq!(FontWeightName::Bold.to_weight(), FontWeight::BOLD);
    }

    #[test]
    fn test_non_string_weight_and_slant_fall_back() {
        for value in ["null", "700", "true", "[\"bold\"]"] {
            let json = format!(
                r#"{{ "type": "text", "x": 0, "y": 0, "content": "a", "font_weight": {value}, "font_slant": {value} }}"#
            );
            let Area::Text(text) = serde_json::from_str::<Area>(&json).unwrap() else {
                panic!("expected text area");
            };
            assert_eq!(text.font_weight, FontWeightName::Normal, "{value}");
            assert_eq!(text.font_slant, FontSlant::Normal, "{value}");
        }
    }

    #[test]
    fn test_unknown_area_type_is_kept() {
        let area: Area = serde_json::from_str(r#"{ "type": "barcode", "x": 0, "y": 0 }"#).unwrap();
        assert_eq!(area, Area::Unknown { kind: "barcode".to_string() });
        assert_eq!(area.position(), None);
    }

    #[test]
    fn test_area_type_required() {
        assert!(serde_json::from_str::<Area>(r#"{ "x": 0, "y": 0 }"#).is_err());
        assert!(serde_json::from_str::<Area>(r#"{ "type": 3, "x": 0, "y": 0 }"#).is_err());
    }

    #[test]
    fn test_text_area_requires_position_and_content() {
        assert!(serde_json::from_str::<Area>(r#"{ "type": "text", "y": 0, "content": "a" }"#).is_err());
        assert!(serde_json::from_str::<Area>(r#"{ "type": "text", "x": 0, "y": 0 }"#).is_err());
        assert!(serde_json::from_str::<Area>(r#"{ "type": "image", "x": 0, "y": 0 }"#).is_err());
    }
}
