use image::DynamicImage;

use crate::error::{AskPdfError, Result};

#[cfg(feature = "pdfium")]
use pdfium_render::prelude::*;

/// Text and raster access to a PDF held in memory. Pages are 1-based.
pub trait PdfBackend: Send + Sync {
    /// Extracted text of every page, in page order.
    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>>;

    /// Renders `page` at `scale` times its natural size.
    fn render_page(&self, pdf: &[u8], page: u32, scale: f32) -> Result<DynamicImage>;
}

/// `pdf-extract` for text; `pdfium` for text and rendering when that feature is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPdfBackend;

impl PdfBackend for DefaultPdfBackend {
    fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>> {
        #[cfg(feature = "pdfium")]
        {
            match pdfium_page_texts(pdf) {
                Ok(pages) => return Ok(pages),
                Err(err) => {
                    tracing::warn!("pdfium text extraction failed: {err}");
                }
            }
        }
        pdf_extract::extract_text_from_mem_by_pages(pdf)
            .map_err(|e| AskPdfError::PdfText(e.to_string()))
    }

    #[cfg(feature = "pdfium")]
    fn render_page(&self, pdf: &[u8], page: u32, scale: f32) -> Result<DynamicImage> {
        pdfium_render_page(pdf, page, scale)
    }

    #[cfg(not(feature = "pdfium"))]
    fn render_page(&self, _pdf: &[u8], _page: u32, _scale: f32) -> Result<DynamicImage> {
        Err(AskPdfError::RendererUnavailable)
    }
}

/// Fails with `PageNotFound` unless `1 <= page <= page_count`.
pub fn check_page(page: u32, page_count: u32) -> Result<()> {
    if page == 0 || page > page_count {
        return Err(AskPdfError::PageNotFound { page, page_count });
    }
    Ok(())
}

#[cfg(feature = "pdfium")]
fn bind_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| AskPdfError::Render(format!("pdfium binding failed: {e}")))?;
    Ok(Pdfium::new(bindings))
}

#[cfg(feature = "pdfium")]
fn pdfium_page_texts(pdf: &[u8]) -> Result<Vec<String>> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| AskPdfError::PdfText(format!("pdfium load failed: {e}")))?;
    let mut texts = Vec::new();
    for page in document.pages().iter() {
        texts.push(page.text().ok().map(|t| t.all()).unwrap_or_default());
    }
    Ok(texts)
}

#[cfg(feature = "pdfium")]
fn pdfium_render_page(pdf: &[u8], page: u32, scale: f32) -> Result<DynamicImage> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| AskPdfError::Render(format!("pdfium load failed: {e}")))?;
    let pages = document.pages();
    check_page(page, u32::from(pages.len()))?;
    let index = u16::try_from(page - 1)
        .map_err(|_| AskPdfError::Render(format!("page index {page} exceeds u16::MAX")))?;
    let pdf_page = pages
        .get(index)
        .map_err(|e| AskPdfError::Render(format!("pdfium page load failed: {e}")))?;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let render = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| AskPdfError::Render(format!("pdf render failed: {e}")))?;
    Ok(render.as_image())
}
