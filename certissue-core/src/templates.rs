//! Template System - Layout Contracts
//!
//! The layout says where each field goes on the certificate template.
//! Coordinates are template pixels. A disabled field is never drawn.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

fn default_true() -> bool { true }

fn default_font_family() -> String { "Arial".to_string() }

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(PathBuf),

    #[error("Template {path} could not be decoded: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid color '{0}', expected #rrggbb")]
    InvalidColor(String),
}

/// A positioned text field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextField {
    pub x: i32,
    pub y: i32,
    pub font_size: u32,
    pub color: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TextField {
    fn new(x: i32, y: i32, font_size: u32, color: &str) -> Self {
        Self {
            x,
            y,
            font_size,
            color: color.to_string(),
            font_family: default_font_family(),
            enabled: true,
        }
    }
}

/// QR code placement. `x`/`y` is the top-left corner, `size` the edge length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrField {
    pub x: i32,
    pub y: i32,
    pub size: u32,
    #[serde(default)]
    pub enabled: bool,
}

impl Default for QrField {
    fn default() -> Self {
        Self { x: 2100, y: 3000, size: 200, enabled: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_name_field")]
    pub name: TextField,
    #[serde(default = "default_event_field")]
    pub event: TextField,
    #[serde(default = "default_certificate_id_field")]
    pub certificate_id: TextField,
    #[serde(default)]
    pub qr: QrField,
}

fn default_name_field() -> TextField { TextField::new(1240, 1400, 80, "#1a1a1a") }
fn default_event_field() -> TextField { TextField::new(1240, 1600, 50, "#4a4a4a") }
fn default_certificate_id_field() -> TextField { TextField::new(200, 3200, 30, "#888888") }

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            name: default_name_field(),
            event: default_event_field(),
            certificate_id: default_certificate_id_field(),
            qr: QrField::default(),
        }
    }
}

/// Share of the template width the participant name may occupy.
pub const NAME_MAX_WIDTH_RATIO: f64 = 0.7;

/// Parse `#rrggbb` (or `rrggbb`) into an opaque RGBA pixel.
pub fn parse_color(value: &str) -> Result<image::Rgba<u8>, TemplateError> {
    let hex_part = value.trim().trim_start_matches('#');
    if hex_part.len() != 6 {
        return Err(TemplateError::InvalidColor(value.to_string()));
    }
    let bytes = hex::decode(hex_part).map_err(|_| TemplateError::InvalidColor(value.to_string()))?;
    Ok(image::Rgba([bytes[0], bytes[1], bytes[2], 255]))
}

/// Load and decode the certificate template.
pub fn load_template(path: &Path) -> Result<RgbaImage, TemplateError> {
    if !path.is_file() {
        return Err(TemplateError::NotFound(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|source| TemplateError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgba8())
}
