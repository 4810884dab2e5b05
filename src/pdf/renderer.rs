//! Page rasterization and bitmap encoding
//!
//! A [`DocumentEngine`] parses raw bytes and opens [`Rasterizer`]s over
//! them. Rasterizers are not required to be `Send` (mupdf documents are
//! not), so every thread that renders opens its own through the engine.

use std::sync::Arc;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;

use super::request::{RenderError, RenderParams, RenderedPage};

/// JPEG quality used for rendered bitmaps
pub const JPEG_QUALITY: u8 = 80;

/// Largest raster an engine will allocate for one page
pub const MAX_RASTER_PIXELS: u64 = 64 * 1024 * 1024;

/// Parsed document metadata
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentInfo {
    pub page_count: usize,
    /// Intrinsic (width, height) per page, in points
    pub page_sizes: Vec<(f32, f32)>,
}

/// Errors from the underlying document engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("{0}")]
    Generic(String),
}

impl EngineError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic(message.into())
    }
}

/// Uncompressed RGB pixels, 3 bytes per pixel, no row padding
#[derive(Clone, Debug)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Parses documents and opens per-thread rasterizers
pub trait DocumentEngine: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<DocumentInfo, EngineError>;

    fn open(&self, bytes: Arc<[u8]>) -> Result<Box<dyn Rasterizer>, EngineError>;
}

/// Rasterizes pages of one opened document
pub trait Rasterizer {
    fn page_count(&self) -> usize;

    /// Render `page` (1-based) into raw RGB pixels
    fn rasterize(&self, page: usize, params: &RenderParams) -> Result<Raster, EngineError>;
}

/// Output dimensions of a page with intrinsic size `page_size` under `params`
#[must_use]
pub fn viewport_size(page_size: (f32, f32), params: &RenderParams) -> (u32, u32) {
    let width = (page_size.0 * params.scale).ceil().max(1.0) as u32;
    let height = (page_size.1 * params.scale).ceil().max(1.0) as u32;
    if params.rotation.is_sideways() {
        (height, width)
    } else {
        (width, height)
    }
}

/// Render and encode one page, validating the page number first
pub fn render_page(
    rasterizer: &dyn Rasterizer,
    page: usize,
    params: &RenderParams,
) -> Result<RenderedPage, RenderError> {
    let total = rasterizer.page_count();
    if page == 0 || page > total {
        return Err(RenderError::InvalidPage { page, total });
    }

    let raster = rasterizer
        .rasterize(page, params)
        .map_err(|e| RenderError::render(page, e.to_string()))?;
    let bitmap = encode_jpeg(&raster).map_err(|e| RenderError::render(page, e.to_string()))?;

    Ok(RenderedPage {
        page,
        bitmap,
        width: raster.width,
        height: raster.height,
        params: *params,
    })
}

fn encode_jpeg(raster: &Raster) -> Result<Vec<u8>, EngineError> {
    let expected = raster.width as usize * raster.height as usize * 3;
    if raster.rgb.len() != expected {
        return Err(EngineError::generic(format!(
            "raster buffer is {} bytes, expected {expected}",
            raster.rgb.len()
        )));
    }

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(
            &raster.rgb,
            raster.width,
            raster.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| EngineError::generic(format!("JPEG encoding failed: {e}")))?;
    Ok(out)
}

#[cfg(feature = "pdf")]
pub use mupdf_engine::MupdfEngine;

#[cfg(feature = "pdf")]
mod mupdf_engine {
    use std::sync::Arc;

    use mupdf::{Colorspace, Document, Matrix, Pixmap};

    use super::{
        DocumentEngine, DocumentInfo, EngineError, MAX_RASTER_PIXELS, Raster, Rasterizer,
        viewport_size,
    };
    use crate::pdf::request::{RenderParams, Rotation};

    const PDF_MIME: &str = "application/pdf";

    /// Document engine backed by MuPDF
    #[derive(Clone, Copy, Debug, Default)]
    pub struct MupdfEngine;

    impl DocumentEngine for MupdfEngine {
        fn parse(&self, bytes: &[u8]) -> Result<DocumentInfo, EngineError> {
            let doc = Document::from_bytes(bytes, PDF_MIME)?;
            let page_count = usize::try_from(doc.page_count()?)
                .map_err(|_| EngineError::generic("negative page count"))?;
            if page_count == 0 {
                return Err(EngineError::generic("document has no pages"));
            }

            let mut page_sizes = Vec::with_capacity(page_count);
            for index in 0..page_count {
                let bounds = doc.load_page(index as i32)?.bounds()?;
                page_sizes.push((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0));
            }

            Ok(DocumentInfo {
                page_count,
                page_sizes,
            })
        }

        fn open(&self, bytes: Arc<[u8]>) -> Result<Box<dyn Rasterizer>, EngineError> {
            let doc = Document::from_bytes(&bytes, PDF_MIME)?;
            let page_count = usize::try_from(doc.page_count()?)
                .map_err(|_| EngineError::generic("negative page count"))?;
            Ok(Box::new(MupdfRasterizer { doc, page_count }))
        }
    }

    struct MupdfRasterizer {
        doc: Document,
        page_count: usize,
    }

    impl Rasterizer for MupdfRasterizer {
        fn page_count(&self) -> usize {
            self.page_count
        }

        fn rasterize(&self, page: usize, params: &RenderParams) -> Result<Raster, EngineError> {
            let page = self.doc.load_page((page - 1) as i32)?;
            let bounds = page.bounds()?;
            let (width, height) = viewport_size((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0), params);
            if u64::from(width) * u64::from(height) > MAX_RASTER_PIXELS {
                return Err(EngineError::generic(format!(
                    "{width}x{height} raster exceeds the pixel budget"
                )));
            }
            let transform = transform(params);
            let pixmap = page.to_pixmap(&transform, &Colorspace::device_rgb(), false, false)?;
            pixmap_to_raster(&pixmap)
        }
    }

    /// Scale then rotate clockwise; to_pixmap re-origins the transformed bounds
    fn transform(params: &RenderParams) -> Matrix {
        let s = params.scale;
        let (cos, sin) = match params.rotation {
            Rotation::Deg0 => (1.0, 0.0),
            Rotation::Deg90 => (0.0, 1.0),
            Rotation::Deg180 => (-1.0, 0.0),
            Rotation::Deg270 => (0.0, -1.0),
        };
        Matrix::new(s * cos, s * sin, -s * sin, s * cos, 0.0, 0.0)
    }

    fn pixmap_to_raster(pixmap: &Pixmap) -> Result<Raster, EngineError> {
        let n = pixmap.n() as usize;
        if n < 3 {
            return Err(EngineError::generic(format!(
                "Unsupported pixmap format: {n} channels"
            )));
        }

        let width = pixmap.width() as usize;
        let height = pixmap.height() as usize;
        let stride = pixmap.stride() as usize;
        let samples = pixmap.samples();
        let row_bytes = width * n;
        if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
            return Err(EngineError::generic("Pixmap buffer size mismatch"));
        }

        let mut rgb = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            let row = &samples[y * stride..y * stride + row_bytes];
            if n == 3 {
                rgb.extend_from_slice(row);
            } else {
                for px in row.chunks_exact(n) {
                    rgb.extend_from_slice(&px[..3]);
                }
            }
        }

        Ok(Raster {
            width: width as u32,
            height: height as u32,
            rgb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::request::Rotation;

    struct SolidRasterizer {
        pages: usize,
    }

    impl Rasterizer for SolidRasterizer {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn rasterize(&self, _page: usize, params: &RenderParams) -> Result<Raster, EngineError> {
            let (width, height) = viewport_size((40.0, 60.0), params);
            Ok(Raster {
                width,
                height,
                rgb: vec![200; (width * height * 3) as usize],
            })
        }
    }

    struct BrokenRasterizer;

    impl Rasterizer for BrokenRasterizer {
        fn page_count(&self) -> usize {
            3
        }

        fn rasterize(&self, _page: usize, _params: &RenderParams) -> Result<Raster, EngineError> {
            Err(EngineError::generic("surface lost"))
        }
    }

    #[test]
    fn viewport_swaps_sides_when_rotated() {
        let upright = RenderParams::new(1.5, Rotation::Deg0);
        let sideways = RenderParams::new(1.5, Rotation::Deg90);
        assert_eq!(viewport_size((100.0, 200.0), &upright), (150, 300));
        assert_eq!(viewport_size((100.0, 200.0), &sideways), (300, 150));
        assert_eq!(
            viewport_size((100.0, 200.0), &RenderParams::new(1.5, Rotation::Deg180)),
            (150, 300)
        );
    }

    #[test]
    fn render_page_rejects_out_of_range() {
        let rasterizer = SolidRasterizer { pages: 3 };
        let params = RenderParams::default();
        assert_eq!(
            render_page(&rasterizer, 0, &params),
            Err(RenderError::InvalidPage { page: 0, total: 3 })
        );
        assert_eq!(
            render_page(&rasterizer, 4, &params),
            Err(RenderError::InvalidPage { page: 4, total: 3 })
        );
    }

    #[test]
    fn render_page_encodes_jpeg() {
        let rasterizer = SolidRasterizer { pages: 3 };
        let params = RenderParams::new(2.0, Rotation::Deg270);
        let page = render_page(&rasterizer, 2, &params).unwrap();

        assert_eq!(page.page, 2);
        assert_eq!((page.width, page.height), (120, 80));
        assert_eq!(page.params, params);
        // JPEG SOI marker
        assert_eq!(&page.bitmap[..2], &[0xFF, 0xD8]);
        assert!(page.bitmap.len() < (page.width * page.height * 3) as usize);
    }

    #[test]
    fn rasterizer_failure_is_render_error() {
        let err = render_page(&BrokenRasterizer, 1, &RenderParams::default()).unwrap_err();
        assert_eq!(err, RenderError::render(1, "surface lost"));
    }
}
