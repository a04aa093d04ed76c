//! Rendering configuration

use crate::parser::{parse_rgb, MAX_FONT_SIZE};
use crate::{OverlayError, Result};
use pdf_core::{Color, FontFamilyBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use text_layout::FontBook;

/// Defaults and environment for a render call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_font_family")]
    pub default_font_family: String,

    #[serde(default = "default_font_size")]
    pub default_font_size: f64,

    /// `"r,g,b"` used when a text area has no color
    #[serde(default = "default_color")]
    pub default_color: String,

    /// `"r,g,b"` painted under the template
    #[serde(default = "default_background")]
    pub background: String,

    /// Multiplier applied to every font size
    #[serde(default = "default_scale")]
    pub font_scale: f64,

    /// Pixels per point for image output
    #[serde(default = "default_scale")]
    pub raster_scale: f64,

    /// Scan the platform font directories
    #[serde(default = "default_true")]
    pub system_fonts: bool,

    #[serde(default)]
    pub font_dirs: Vec<PathBuf>,

    /// Families registered from font files, by family name
    #[serde(default)]
    pub fonts: BTreeMap<String, FontFiles>,

    /// Families tried for characters the selected font lacks
    #[serde(default)]
    pub fallback_families: Vec<String>,

    /// Directory relative paths resolve against; the working directory when unset
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Flate-compress PDF content streams
    #[serde(default = "default_true")]
    pub compress: bool,
}

/// Font files of one registered family
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FontFiles {
    pub regular: PathBuf,
    #[serde(default)]
    pub bold: Option<PathBuf>,
    #[serde(default)]
    pub italic: Option<PathBuf>,
    #[serde(default)]
    pub bold_italic: Option<PathBuf>,
}

fn default_font_family() -> String {
    "Sans".to_string()
}

fn default_font_size() -> f64 {
    12.0
}

fn default_color() -> String {
    "0,0,0".to_string()
}

fn default_background() -> String {
    "255,255,255".to_string()
}

fn default_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_font_family: default_font_family(),
            default_font_size: default_font_size(),
            default_color: default_color(),
            background: default_background(),
            font_scale: default_scale(),
            raster_scale: default_scale(),
            system_fonts: true,
            font_dirs: Vec::new(),
            fonts: BTreeMap::new(),
            fallback_families: Vec::new(),
            base_dir: None,
            compress: true,
        }
    }
}

impl RenderConfig {
    /// Parse a configuration from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RenderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check numeric ranges and colors
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("default_font_size", self.default_font_size),
            ("font_scale", self.font_scale),
            ("raster_scale", self.raster_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(OverlayError::invalid(name, format!("must be > 0, got {value}")));
            }
        }
        if self.default_font_size > MAX_FONT_SIZE {
            return Err(OverlayError::invalid(
                "default_font_size",
                format!("must be <= {MAX_FONT_SIZE}, got {}", self.default_font_size),
            ));
        }
        self.default_color()?;
        self.background_color()?;
        Ok(())
    }

    pub fn default_color(&self) -> Result<Color> {
        parse_rgb(&self.default_color).map_err(|message| OverlayError::InvalidColor {
            field: "default_color".to_string(),
            message,
        })
    }

    pub fn background_color(&self) -> Result<Color> {
        parse_rgb(&self.background).map_err(|message| OverlayError::InvalidColor {
            field: "background".to_string(),
            message,
        })
    }

    /// Directory relative request paths resolve against
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.base_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Font book with system fonts, font directories and registered families
    pub fn font_book(&self) -> Result<FontBook> {
        let mut book = FontBook::new();
        if self.system_fonts {
            book.load_system_fonts();
        }
        for dir in &self.font_dirs {
            book.load_fonts_dir(dir);
        }
        for (family, files) in &self.fonts {
            let mut builder = FontFamilyBuilder::new().regular(read_font(&files.regular)?);
            if let Some(path) = &files.bold {
                builder = builder.bold(read_font(path)?);
            }
            if let Some(path) = &files.italic {
                builder = builder.italic(read_font(path)?);
            }
            if let Some(path) = &files.bold_italic {
                builder = builder.bold_italic(read_font(path)?);
            }
            let built = builder
                .build(family)
                .map_err(|e| OverlayError::Font(format!("family {family}: {e}")))?;
            book.register_family(family, built);
            log::debug!("registered font family {family}");
        }
        book.set_fallback_families(self.fallback_families.clone());
        Ok(book)
    }
}

fn read_font(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| OverlayError::Font(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.default_font_family, "Sans");
        assert_eq!(config.default_font_size, 12.0);
        assert_eq!(config.default_color().unwrap(), Color::black());
        assert_eq!(config.background_color().unwrap(), Color::white());
        assert_eq!(config.font_scale, 1.0);
        assert_eq!(config.raster_scale, 1.0);
        assert!(config.system_fonts);
        assert!(config.compress);
    }

    #[test]
    fn test_empty_json_matches_default() {
        assert_eq!(RenderConfig::from_json("{}").unwrap(), RenderConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = RenderConfig::from_json(
            r#"{ "default_font_family": "Serif", "raster_scale": 2, "system_fonts": false,
                 "fonts": { "Brand": { "regular": "brand.ttf", "bold": "brand-bold.ttf" } } }"#,
        )
        .unwrap();
        assert_eq!(config.default_font_family, "Serif");
        assert_eq!(config.raster_scale, 2.0);
        assert!(!config.system_fonts);
        assert_eq!(config.fonts["Brand"].bold, Some(PathBuf::from("brand-bold.ttf")));
        assert_eq!(config.default_font_size, 12.0);
    }

    #[test]
    fn test_invalid_values() {
        let err = RenderConfig::from_json(r#"{ "raster_scale": 0 }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        let err = RenderConfig::from_json(r#"{ "background": "white" }"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Content);
        let err = RenderConfig::from_json(r#"{ "default_font_size": 1e39 }"#).unwrap_err();
        assert!(err.to_string().starts_with("default_font_size: must be <= 10000"));
    }

    #[test]
    fn test_base_dir() {
        let config = RenderConfig {
            base_dir: Some(PathBuf::from("/srv/forms")),
            ..Default::default()
        };
        assert_eq!(config.base_dir().unwrap(), PathBuf::from("/srv/forms"));
        assert_eq!(
            RenderConfig::default().base_dir().unwrap(),
            std::env::current_dir().unwrap()
        );
    }

    #[test]
    fn test_missing_font_file_is_resource_error() {
        let mut config = RenderConfig {
            system_fonts: false,
            ..Default::default()
        };
        config.fonts.insert(
            "Brand".to_string(),
            FontFiles {
                regular: PathBuf::from("/nonexistent/brand.ttf"),
                bold: None,
                italic: None,
                bold_italic: None,
            },
        );
        let Err(err) = config.font_book() else {
            panic!("expected a missing font file error");
        };
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_font_book_without_system_fonts() {
        let config = RenderConfig {
            system_fonts: false,
            ..Default::default()
        };
        assert_eq!(config.font_book().unwrap().database_len(), 0);
    }
}
