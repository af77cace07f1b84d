//! Document assembly: captured frames in, one paged document out.

use crate::content::{BinaryDocument, RawImage};
use crate::{Error, Result};
use async_trait::async_trait;
use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// Turns an ordered list of frames into a single document.
///
/// Page order must follow input order. Empty input and undecodable images
/// are [`Error::AssemblyError`]s.
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(&self, frames: Vec<RawImage>) -> Result<BinaryDocument>;
}

/// One PDF page per frame, each page sized to its image.
#[derive(Debug, Default, Clone)]
pub struct PdfAssembler;

impl PdfAssembler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Assembler for PdfAssembler {
    async fn assemble(&self, frames: Vec<RawImage>) -> Result<BinaryDocument> {
        let bytes = tokio::task::spawn_blocking(move || build_pdf(&frames))
            .await
            .map_err(|e| Error::AssemblyError(format!("assembly task failed: {}", e)))??;
        Ok(BinaryDocument::new("application/pdf", bytes))
    }
}

fn assembly_err(e: impl std::fmt::Display) -> Error {
    Error::AssemblyError(e.to_string())
}

/// Build a PDF with one page per frame.
pub fn build_pdf(frames: &[RawImage]) -> Result<Vec<u8>> {
    if frames.is_empty() {
        return Err(Error::AssemblyError("no images to assemble".into()));
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(frames.len());

    for (index, frame) in frames.iter().enumerate() {
        let rgb = image::load_from_memory(&frame.data)
            .map_err(|e| Error::AssemblyError(format!("frame {}: {}", index, e)))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let (w, h) = (i64::from(width), i64::from(height));

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w,
                "Height" => h,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb.into_raw(),
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(assembly_err)?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
        debug!("page {}: {}x{}", index + 1, width, height);
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(assembly_err)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::raster::encode_png;
    use image::RgbaImage;

    fn frame(width: u32, height: u32) -> RawImage {
        RawImage::png(encode_png(&RgbaImage::new(width, height)).unwrap())
    }

    fn media_box_widths(pdf: &[u8]) -> Vec<i64> {
        let doc = Document::load_mem(pdf).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_object(*id).unwrap().as_dict().unwrap();
                page.get(b"MediaBox").unwrap().as_array().unwrap()[2]
                    .as_i64()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn pages_follow_frame_order() {
        let pdf = build_pdf(&[frame(10, 5), frame(20, 5), frame(30, 5)]).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));
        assert_eq!(media_box_widths(&pdf), vec![10, 20, 30]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(build_pdf(&[]), Err(Error::AssemblyError(_))));
    }

    #[tokio::test]
    async fn malformed_image_is_rejected() {
        let bad = RawImage::png(b"not a png".to_vec());
        let err = PdfAssembler::new()
            .assemble(vec![frame(4, 4), bad])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssemblyError(ref m) if m.starts_with("frame 1")));
    }
}
