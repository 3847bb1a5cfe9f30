use thiserror::Error;

use crate::edn::EdnError;

#[derive(Error, Debug)]
pub enum AskPdfError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("edn syntax error: {0}")]
    Edn(#[from] EdnError),
    #[error("annotation document has no highlights sequence")]
    MissingHighlights,
    #[error("highlight #{index} has no id")]
    MissingHighlightId { index: usize },
    #[error("highlight #{index} is malformed: {reason}")]
    InvalidHighlight { index: usize, reason: String },
    #[error("page {page} not found (document has {page_count} pages)")]
    PageNotFound { page: u32, page_count: u32 },
    #[error("pdf rendering not enabled (build with the `pdfium` feature)")]
    RendererUnavailable,
    #[error("pdf render failed: {0}")]
    Render(String),
    #[error("pdf text extraction failed: {0}")]
    PdfText(String),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AskPdfError>;

impl From<anyhow::Error> for AskPdfError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
