//! Image decoding and PDF image XObjects

use crate::{PdfError, Result};
use image::{DynamicImage, ImageReader, RgbaImage};
use lopdf::{Dictionary, Object, Stream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Write};
use std::path::Path;

impl From<image::ImageError> for PdfError {
    fn from(err: image::ImageError) -> Self {
        PdfError::ImageError(err.to_string())
    }
}

/// Detected image format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Other,
}

/// Uniform scale that fits an image inside a box without distortion.
///
/// `min(box_height / image_height, box_width / image_width)`; the result may
/// leave one dimension of the box unfilled.
pub fn fit_box_scale(image_width: u32, image_height: u32, box_width: f64, box_height: f64) -> f64 {
    let width_ratio = box_width / image_width as f64;
    let height_ratio = box_height / image_height as f64;
    height_ratio.min(width_ratio)
}

/// Detect image format from magic bytes
pub fn detect_format(data: &[u8]) -> ImageFormat {
    if data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
        return ImageFormat::Jpeg;
    }
    if data.len() >= 8 && data[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return ImageFormat::Png;
    }
    ImageFormat::Other
}

/// A decoded raster image ready for either canvas
#[derive(Clone)]
pub struct RasterImage {
    pixels: RgbaImage,
    format: ImageFormat,
    /// Original file bytes, kept for JPEG passthrough
    encoded: Option<Vec<u8>>,
    has_alpha: bool,
    hash: u64,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format)
            .field("has_alpha", &self.has_alpha)
            .finish()
    }
}

impl RasterImage {
    /// Read and decode an image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(&data)
    }

    /// Decode image bytes (PNG, JPEG)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let format = detect_format(data);
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        let image = reader.decode()?;
        let has_alpha = image.color().has_alpha();

        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);

        Ok(Self {
            pixels: image.to_rgba8(),
            format,
            encoded: (format == ImageFormat::Jpeg).then(|| data.to_vec()),
            has_alpha,
            hash: hasher.finish(),
        })
    }

    /// Wrap already decoded pixels
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        let mut hasher = DefaultHasher::new();
        pixels.dimensions().hash(&mut hasher);
        pixels.as_raw().hash(&mut hasher);
        let has_alpha = pixels.pixels().any(|pixel| pixel[3] != 255);
        Self {
            pixels,
            format: ImageFormat::Other,
            encoded: None,
            has_alpha,
            hash: hasher.finish(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Straight (non-premultiplied) RGBA pixels
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Hash of the source bytes, used to embed identical images once
    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// Same dimensions, pixels and JPEG source; confirms a `content_hash` match
    pub fn same_content(&self, other: &RasterImage) -> bool {
        self.hash == other.hash
            && self.format == other.format
            && self.pixels.dimensions() == other.pixels.dimensions()
            && self.encoded == other.encoded
            && self.pixels.as_raw() == other.pixels.as_raw()
    }

    #[cfg(test)]
    pub(crate) fn with_content_hash(mut self, hash: u64) -> Self {
        self.hash = hash;
        self
    }

    /// Build the XObject for PDF embedding
    pub fn to_xobject(&self) -> Result<ImageXObject> {
        if let Some(encoded) = &self.encoded {
            match ImageXObject::from_jpeg(encoded) {
                Ok(xobject) => return Ok(xobject),
                Err(err) => log::debug!("re-encoding JPEG as Flate: {err}"),
            }
        }
        ImageXObject::from_rgba(&self.pixels, self.has_alpha)
    }
}

/// JPEG info including dimensions and color components
#[derive(Debug, Clone, Copy)]
struct JpegInfo {
    width: u32,
    height: u32,
    num_components: u8,
}

/// Image XObject for PDF embedding
#[derive(Debug, Clone)]
pub struct ImageXObject {
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
    /// Color space ("DeviceRGB", "DeviceGray")
    pub color_space: String,
    /// Bits per component
    pub bits_per_component: u8,
    /// PDF filter ("DCTDecode" for JPEG, "FlateDecode" otherwise)
    pub filter: String,
    /// Raw image data (compressed)
    pub data: Vec<u8>,
    /// Flate-compressed 8-bit alpha channel
    pub soft_mask: Option<Vec<u8>>,
}

/// Get JPEG info including dimensions and color components
fn get_jpeg_info(data: &[u8]) -> Result<JpegInfo> {
    // SOF segment: marker (2), length (2), precision (1), height (2), width (2), components (1)
    let mut i = 2;
    while i + 10 < data.len() {
        if data[i] != 0xFF {
            i += 1;
            continue;
        }

        let marker = data[i + 1];

        if (0xC0..=0xCF).contains(&marker) && marker != 0xC4 && marker != 0xC8 && marker != 0xCC {
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            let num_components = data[i + 9];
            return Ok(JpegInfo {
                width,
                height,
                num_components,
            });
        }

        if i + 4 < data.len() {
            let length = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
            if length < 2 {
                break;
            }
            i += 2 + length;
        } else {
            break;
        }
    }

    Err(PdfError::ImageError("Could not parse JPEG info".to_string()))
}

pub(crate) fn deflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

impl ImageXObject {
    /// Create XObject from JPEG data
    ///
    /// Gray and RGB JPEG images are embedded directly with DCTDecode.
    pub fn from_jpeg(data: &[u8]) -> Result<Self> {
        let info = get_jpeg_info(data)?;

        let color_space = match info.num_components {
            1 => "DeviceGray",
            3 => "DeviceRGB",
            other => {
                return Err(PdfError::ImageError(format!(
                    "unsupported JPEG component count {other}"
                )))
            }
        };

        Ok(Self {
            width: info.width,
            height: info.height,
            color_space: color_space.to_string(),
            bits_per_component: 8,
            filter: "DCTDecode".to_string(),
            data: data.to_vec(),
            soft_mask: None,
        })
    }

    /// Create XObject from decoded pixels as Flate RGB, alpha kept as a soft mask
    pub fn from_rgba(pixels: &RgbaImage, with_alpha: bool) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
        let soft_mask = if with_alpha {
            let alpha: Vec<u8> = pixels.pixels().map(|pixel| pixel[3]).collect();
            Some(deflate(&alpha)?)
        } else {
            None
        };

        Ok(Self {
            width,
            height,
            color_space: "DeviceRGB".to_string(),
            bits_per_component: 8,
            filter: "FlateDecode".to_string(),
            data: deflate(rgb.as_raw())?,
            soft_mask,
        })
    }

    /// Convert to lopdf Stream object
    pub fn to_pdf_stream(&self) -> Stream {
        let mut dict = Dictionary::new();

        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Width", self.width as i64);
        dict.set("Height", self.height as i64);
        dict.set("ColorSpace", Object::Name(self.color_space.as_bytes().to_vec()));
        dict.set("BitsPerComponent", self.bits_per_component as i64);
        dict.set("Filter", Object::Name(self.filter.as_bytes().to_vec()));

        Stream::new(dict, self.data.clone())
    }

    /// Soft mask stream, referenced from the image's `/SMask`
    pub fn soft_mask_stream(&self) -> Option<Stream> {
        let data = self.soft_mask.as_ref()?;
        let mut dict = Dictionary::new();
        dict.set("Type", Object::Name(b"XObject".to_vec()));
        dict.set("Subtype", Object::Name(b"Image".to_vec()));
        dict.set("Width", self.width as i64);
        dict.set("Height", self.height as i64);
        dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
        dict.set("BitsPerComponent", 8i64);
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        Some(Stream::new(dict, data.clone()))
    }
}

/// Generate operators to draw an image in a y-down user space
///
/// The image covers `width` x `height` units from the current origin with
/// its first row at the top.
///
/// # Arguments
/// * `image_name` - Image resource name (e.g., "Im1")
/// * `width` - Image width in user units
/// * `height` - Image height in user units
pub fn generate_image_operators(image_name: &str, width: f64, height: f64) -> Vec<u8> {
    let w = crate::pdf_number(width);
    let h = crate::pdf_number(height);
    format!("q\n{w} 0 0 -{h} 0 {h} cm\n/{image_name} Do\nQ\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};
    use pretty_assertions::assert_eq;

    fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba(pixel));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .expect("Failed to create PNG");
        buffer
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
            .expect("Failed to create JPEG");
        buffer
    }

    #[test]
    fn test_fit_box_scale_wide_image() {
        // 200x100 into 100x100: min(100/100, 100/200)
        assert_eq!(fit_box_scale(200, 100, 100.0, 100.0), 0.5);
    }

    #[test]
    fn test_fit_box_scale_tall_image() {
        assert_eq!(fit_box_scale(50, 200, 100.0, 100.0), 0.5);
        assert_eq!(fit_box_scale(10, 10, 30.0, 40.0), 3.0);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(
            detect_format(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            ImageFormat::Png
        );
        assert_eq!(detect_format(&[0u8; 8]), ImageFormat::Other);
    }

    #[test]
    fn test_decode_png() {
        let image = RasterImage::from_bytes(&png_bytes(200, 100, [0, 0, 255, 255])).unwrap();
        assert_eq!(image.width(), 200);
        assert_eq!(image.height(), 100);
        assert_eq!(image.format(), ImageFormat::Png);
        assert!(image.has_alpha());
        assert_eq!(image.pixels().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = RasterImage::from_bytes(b"not an image at all");
        assert!(matches!(result, Err(PdfError::ImageError(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = RasterImage::open("/definitely/not/here.png");
        assert!(matches!(result, Err(PdfError::IoError(_))));
    }

    #[test]
    fn test_jpeg_passthrough() {
        let data = jpeg_bytes(16, 8);
        let image = RasterImage::from_bytes(&data).unwrap();
        let xobject = image.to_xobject().unwrap();
        assert_eq!(xobject.filter, "DCTDecode");
        assert_eq!(xobject.width, 16);
        assert_eq!(xobject.height, 8);
        assert_eq!(xobject.data, data);
        assert!(xobject.soft_mask.is_none());
    }

    #[test]
    fn test_png_with_alpha_gets_soft_mask() {
        let image = RasterImage::from_bytes(&png_bytes(4, 4, [255, 0, 0, 128])).unwrap();
        let xobject = image.to_xobject().unwrap();
        assert_eq!(xobject.filter, "FlateDecode");
        assert_eq!(xobject.color_space, "DeviceRGB");
        let mask = xobject.soft_mask_stream().expect("soft mask");
        assert_eq!(mask.dict.get(b"ColorSpace").unwrap(), &Object::Name(b"DeviceGray".to_vec()));
    }

    #[test]
    fn test_identical_bytes_share_hash() {
        let data = png_bytes(3, 3, [1, 2, 3, 255]);
        let a = RasterImage::from_bytes(&data).unwrap();
        let b = RasterImage::from_bytes(&data).unwrap();
        let c = RasterImage::from_bytes(&png_bytes(3, 3, [9, 9, 9, 255])).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_same_content_checks_pixels() {
        let data = png_bytes(3, 3, [1, 2, 3, 255]);
        let a = RasterImage::from_bytes(&data).unwrap();
        let b = RasterImage::from_bytes(&data).unwrap();
        let c = RasterImage::from_bytes(&png_bytes(3, 3, [9, 9, 9, 255]))
            .unwrap()
            .with_content_hash(a.content_hash());
        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn test_generate_image_operators() {
        let ops = String::from_utf8(generate_image_operators("Im1", 200.0, 100.0)).unwrap();
        assert_eq!(ops, "q\n200 0 0 -100 0 100 cm\n/Im1 Do\nQ\n");
    }

    #[test]
    fn test_image_xobject_to_pdf_stream() {
        let xobject = ImageXObject {
            width: 100,
            height: 50,
            color_space: "DeviceRGB".to_string(),
            bits_per_component: 8,
            filter: "DCTDecode".to_string(),
            data: vec![1, 2, 3, 4, 5],
            soft_mask: None,
        };
        let stream = xobject.to_pdf_stream();
        assert_eq!(stream.dict.get(b"Width").unwrap(), &Object::Integer(100));
        assert_eq!(stream.dict.get(b"Filter").unwrap(), &Object::Name(b"DCTDecode".to_vec()));
        assert_eq!(stream.content, vec![1, 2, 3, 4, 5]);
    }
}
