//! Raster image to single-page PDF.
//!
//! The page is sized to the image in points, one point per pixel, and the
//! image is drawn over the full page rectangle. Alpha channels become a soft
//! mask so transparent PNGs keep their transparency.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{DynamicImage, ImageReader};
use lopdf::{Dictionary, Document, Object, Stream};
use tracing::debug;

use super::{Converter, expected_output};
use crate::error::{Error, Result};
use crate::pdf::save_atomically;

/// Converts images on the blocking worker pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

#[async_trait]
impl Converter for ImageConverter {
    fn name(&self) -> &'static str {
        "image"
    }

    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf> {
        let source = source.to_path_buf();
        let out_dir = out_dir.to_path_buf();

        tokio::task::spawn_blocking(move || image_to_pdf(&source, &out_dir))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("image conversion task failed: {e}"))))?
    }
}

/// Decode `source` and write `{stem}.pdf` into `out_dir`.
pub fn image_to_pdf(source: &Path, out_dir: &Path) -> Result<PathBuf> {
    let img = ImageReader::open(source)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::CorruptInput(format!("{}: {e}", source.display())))?;

    debug!(
        "Decoded {} ({}x{}, {:?})",
        source.display(),
        img.width(),
        img.height(),
        img.color()
    );

    let mut doc = image_document(&img);
    let output = expected_output(source, out_dir);
    save_atomically(&mut doc, &output)?;
    Ok(output)
}

/// Build a one-page document whose page is exactly the image.
pub(crate) fn image_document(img: &DynamicImage) -> Document {
    let (width, height) = (img.width(), img.height());
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let smask_id = img.color().has_alpha().then(|| {
        let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
        doc.add_object(image_stream(width, height, "DeviceGray", alpha, None))
    });

    let (color_space, samples) = if is_grayscale(img) && smask_id.is_none() {
        ("DeviceGray", img.to_luma8().into_raw())
    } else {
        ("DeviceRGB", img.to_rgb8().into_raw())
    };
    let image_id = doc.add_object(image_stream(width, height, color_space, samples, smask_id));

    let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()).with_compression(true));

    let resources = Dictionary::from_iter([(
        "XObject",
        Object::Dictionary(Dictionary::from_iter([("Im0", Object::Reference(image_id))])),
    )]);

    let page_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        ("Contents", Object::Reference(content_id)),
        ("Resources", Object::Dictionary(resources)),
        (
            "MediaBox",
            Object::Array(vec![
                0.into(),
                0.into(),
                Object::Integer(i64::from(width)),
                Object::Integer(i64::from(height)),
            ]),
        ),
    ]));

    let pages = Dictionary::from_iter([
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(vec![Object::Reference(page_id)])),
        ("Count", Object::Integer(1)),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    doc
}

fn is_grayscale(img: &DynamicImage) -> bool {
    matches!(
        img,
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_)
    )
}

fn image_stream(
    width: u32,
    height: u32,
    color_space: &str,
    samples: Vec<u8>,
    smask: Option<lopdf::ObjectId>,
) -> Stream {
    let mut dict = Dictionary::from_iter([
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Image".to_vec())),
        ("Width", Object::Integer(i64::from(width))),
        ("Height", Object::Integer(i64::from(height))),
        ("ColorSpace", Object::Name(color_space.as_bytes().to_vec())),
        ("BitsPerComponent", Object::Integer(8)),
    ]);
    if let Some(smask_id) = smask {
        dict.set("SMask", Object::Reference(smask_id));
    }
    Stream::new(dict, samples).with_compression(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::{FormatKind, classify_extension};
    use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};

    fn page_media_box(doc: &Document) -> Vec<i64> {
        let pages = doc.get_pages();
        let page_id = *pages.get(&1).unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        page.get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_png_page_matches_pixel_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.png");
        RgbImage::from_pixel(800, 600, Rgb([200, 10, 10])).save(&source).unwrap();

        let output = image_to_pdf(&source, dir.path()).unwrap();
        assert_eq!(output, dir.path().join("scan.pdf"));

        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(page_media_box(&doc), vec![0, 0, 800, 600]);
    }

    #[test]
    fn test_supported_encodings_roundtrip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"] {
            assert_eq!(classify_extension(ext), FormatKind::Image, "{ext}");

            let source = dir.path().join(format!("photo_{ext}.{ext}"));
            RgbImage::from_pixel(31, 17, Rgb([1, 2, 3])).save(&source).unwrap();

            let output = image_to_pdf(&source, dir.path()).unwrap();
            assert_eq!(output, dir.path().join(format!("photo_{ext}.pdf")));
            let doc = Document::load(&output).unwrap();
            assert_eq!(doc.get_pages().len(), 1, "{ext}");
            assert_eq!(page_media_box(&doc), vec![0, 0, 31, 17], "{ext}");
        }
    }

    #[test]
    fn test_alpha_becomes_soft_mask() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([0, 0, 0, 128])));
        let doc = image_document(&img);

        let smasks = doc
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| s.dict.get(b"SMask").is_ok())
            .count();
        assert_eq!(smasks, 1);
    }

    #[test]
    fn test_grayscale_uses_device_gray() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(5, 5));
        let doc = image_document(&img);

        let gray = doc
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| matches!(s.dict.get(b"ColorSpace"), Ok(Object::Name(n)) if n == b"DeviceGray"))
            .count();
        assert_eq!(gray, 1);
    }

    #[test]
    fn test_corrupt_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"\x89PNG\r\n\x1a\nnot really a png").unwrap();

        let err = image_to_pdf(&source, dir.path()).unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)), "{err}");
        assert!(!dir.path().join("broken.pdf").exists());
    }

    #[tokio::test]
    async fn test_missing_image_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageConverter
            .convert(&dir.path().join("absent.png"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
