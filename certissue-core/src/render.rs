//! Certificate Renderer
//!
//! Draws the participant's fields onto the template and packages the result
//! as a PDF. The renderer holds no participant state: the same assignment,
//! layout and template always produce the same raster.

use ab_glyph::{point, Font, FontVec, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use qrcode::types::{Color, QrError};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::identifier::CertificateAssignment;
use crate::print::{package_pdf, DocumentError};
use crate::templates::{parse_color, LayoutConfig, TemplateError, TextField, NAME_MAX_WIDTH_RATIO};

/// Average glyph width as a share of the font size, used for fitting.
pub const CHAR_WIDTH_FACTOR: f64 = 0.6;

/// Quiet zone around the QR symbol, in modules.
pub const QR_QUIET_ZONE: usize = 1;

const QR_DARK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const QR_LIGHT: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Layout error: {0}")]
    Layout(#[from] TemplateError),

    #[error("QR encoding failed: {0}")]
    Qr(#[from] QrError),

    #[error("Document packaging failed: {0}")]
    Document(#[from] DocumentError),
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("Font {path} not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Font {path} is not a valid TrueType/OpenType font")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ab_glyph::InvalidFont,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Event,
    CertificateId,
}

/// Where and how a text field ended up on the certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPlacement {
    pub field: FieldKind,
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub font_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPlacement {
    pub url: String,
    pub x: i32,
    pub y: i32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct RenderedCertificate {
    pub raster: RgbaImage,
    pub document: Vec<u8>,
    pub texts: Vec<TextPlacement>,
    pub qr: Option<QrPlacement>,
}

impl RenderedCertificate {
    pub fn text(&self, field: FieldKind) -> Option<&TextPlacement> {
        self.texts.iter().find(|t| t.field == field)
    }
}

/// Font size after fitting `text` into `max_width`. Never below 1.
///
/// Computed in `f64`: with `f32` an exact fit such as 20 chars at 80px into
/// 480px lands a hair under 0.5 and floors one point low.
pub fn effective_font_size(text: &str, font_size: u32, max_width: Option<f64>) -> u32 {
    let size = font_size.max(1);
    let Some(max_width) = max_width else {
        return size;
    };

    let estimated = text.chars().count() as f64 * (size as f64 * CHAR_WIDTH_FACTOR);
    if estimated <= max_width {
        return size;
    }

    let scaled = (size as f64 * (max_width / estimated)).floor();
    (scaled as u32).max(1)
}

/// Load the TrueType/OpenType font used for all text fields.
pub fn load_font(path: &Path) -> Result<FontVec, FontError> {
    let bytes = std::fs::read(path).map_err(|source| FontError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let font = FontVec::try_from_vec(bytes).map_err(|source| FontError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "font loaded");
    Ok(font)
}

pub struct Renderer {
    font: FontVec,
    verification_url: String,
}

impl Renderer {
    pub fn new(font: FontVec, verification_url: impl Into<String>) -> Self {
        Self {
            font,
            verification_url: verification_url.into(),
        }
    }

    pub fn verification_link(&self, certificate_id: &str) -> String {
        format!("{}{}", self.verification_url, certificate_id)
    }

    pub fn render(
        &self,
        assignment: &CertificateAssignment,
        layout: &LayoutConfig,
        template: &RgbaImage,
    ) -> Result<RenderedCertificate, RenderError> {
        let mut canvas = template.clone();
        let mut texts = vec![];
        let name_max_width = canvas.width() as f64 * NAME_MAX_WIDTH_RATIO;

        let fields = [
            (FieldKind::Name, &layout.name, assignment.participant.name.as_str(), Some(name_max_width)),
            (FieldKind::Event, &layout.event, assignment.participant.event.as_str(), None),
            (FieldKind::CertificateId, &layout.certificate_id, assignment.certificate_id.as_str(), None),
        ];

        for (kind, field, text, max_width) in fields {
            if !field.enabled {
                continue;
            }
            texts.push(self.place_text(&mut canvas, kind, field, text, max_width)?);
        }

        let qr = if layout.qr.enabled {
            let url = self.verification_link(&assignment.certificate_id);
            draw_qr(&mut canvas, &url, layout.qr.x, layout.qr.y, layout.qr.size)?;
            Some(QrPlacement {
                url,
                x: layout.qr.x,
                y: layout.qr.y,
                size: layout.qr.size,
            })
        } else {
            None
        };

        let document = package_pdf(&canvas)?;
        debug!(
            certificate_id = %assignment.certificate_id,
            bytes = document.len(),
            "certificate rendered"
        );

        Ok(RenderedCertificate {
            raster: canvas,
            document,
            texts,
            qr,
        })
    }

    fn place_text(
        &self,
        canvas: &mut RgbaImage,
        kind: FieldKind,
        field: &TextField,
        text: &str,
        max_width: Option<f64>,
    ) -> Result<TextPlacement, RenderError> {
        let color = parse_color(&field.color)?;
        let font_size = effective_font_size(text, field.font_size, max_width);
        draw_centered_text(canvas, &self.font, text, field.x, field.y, font_size, color);

        Ok(TextPlacement {
            field: kind,
            text: text.to_string(),
            x: field.x,
            y: field.y,
            font_size,
        })
    }
}

/// Draw `text` centered horizontally and vertically on `(x, y)`.
fn draw_centered_text(
    canvas: &mut RgbaImage,
    font: &FontVec,
    text: &str,
    x: i32,
    y: i32,
    font_size: u32,
    color: Rgba<u8>,
) {
    let scale = PxScale::from(font_size as f32);
    let scaled = font.as_scaled(scale);

    let mut glyphs: Vec<(GlyphId, f32)> = Vec::with_capacity(text.len());
    let mut caret = 0.0f32;
    let mut previous: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push((id, caret));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }

    let left = x as f32 - caret / 2.0;
    // descent is negative; this puts the middle of the line box on y
    let baseline = y as f32 + (scaled.ascent() + scaled.descent()) / 2.0;

    for (id, offset) in glyphs {
        let glyph = id.with_scale_and_position(scale, point(left + offset, baseline));
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let px = bounds.min.x as i32 + gx as i32;
            let py = bounds.min.y as i32 + gy as i32;
            blend(canvas, px, py, color, coverage);
        });
    }
}

fn blend(canvas: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= canvas.width() || y as u32 >= canvas.height() {
        return;
    }
    let c = coverage.clamp(0.0, 1.0);
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    for i in 0..3 {
        dst.0[i] = (color.0[i] as f32 * c + dst.0[i] as f32 * (1.0 - c)).round() as u8;
    }
    dst.0[3] = dst.0[3].max((255.0 * c).round() as u8);
}

/// Paint an opaque QR symbol with its top-left corner at `(x, y)`.
fn draw_qr(canvas: &mut RgbaImage, url: &str, x: i32, y: i32, size: u32) -> Result<(), QrError> {
    let code = QrCode::new(url.as_bytes())?;
    let modules = code.width();
    let colors = code.to_colors();
    let total = modules + 2 * QR_QUIET_ZONE;
    let size = size.max(1) as usize;

    let is_dark = |mx: usize, my: usize| {
        if mx < QR_QUIET_ZONE || my < QR_QUIET_ZONE {
            return false;
        }
        let (cx, cy) = (mx - QR_QUIET_ZONE, my - QR_QUIET_ZONE);
        cx < modules && cy < modules && colors[cy * modules + cx] == Color::Dark
    };

    for dy in 0..size {
        let py = y + dy as i32;
        if py < 0 || py as u32 >= canvas.height() {
            continue;
        }
        let my = dy * total / size;
        for dx in 0..size {
            let px = x + dx as i32;
            if px < 0 || px as u32 >= canvas.width() {
                continue;
            }
            let mx = dx * total / size;
            let pixel = if is_dark(mx, my) { QR_DARK } else { QR_LIGHT };
            canvas.put_pixel(px as u32, py as u32, pixel);
        }
    }

    Ok(())
}
