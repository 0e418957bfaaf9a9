//! Print Packaging - Single-Page PDF
//!
//! The rendered raster becomes the only content of one page whose MediaBox
//! matches the raster's pixel size (1 pixel = 1 PDF unit).

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use thiserror::Error;

const IMAGE_RESOURCE: &str = "Im0";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Cannot package an empty raster")]
    EmptyRaster,

    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Flatten RGBA onto a white page and return packed RGB samples.
fn flatten_on_white(raster: &RgbaImage) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(raster.width() as usize * raster.height() as usize * 3);
    for pixel in raster.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        for channel in [r, g, b] {
            rgb.push(((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        }
    }
    rgb
}

pub fn package_pdf(raster: &RgbaImage) -> Result<Vec<u8>, DocumentError> {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Err(DocumentError::EmptyRaster);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&flatten_on_white(raster))?;
    let samples = encoder.finish()?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        samples,
    ));

    // Scale the unit image square up to the full page.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width as i64),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height as i64),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! { IMAGE_RESOURCE => image_id },
    });

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width as i64),
            Object::Integer(height as i64),
        ],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_single_page_sized_to_raster() {
        let raster = RgbaImage::from_pixel(320, 180, Rgba([10, 20, 30, 255]));
        let bytes = package_pdf(&raster).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = *pages.values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let media_box: Vec<i64> = page
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(media_box, vec![0, 0, 320, 180]);
    }

    #[test]
    fn test_transparency_flattens_to_white() {
        let raster = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert_eq!(flatten_on_white(&raster), vec![255, 255, 255]);
    }

    #[test]
    fn test_empty_raster_rejected() {
        let raster = RgbaImage::new(0, 0);
        assert!(matches!(package_pdf(&raster), Err(DocumentError::EmptyRaster)));
    }
}
