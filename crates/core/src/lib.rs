mod answer;
mod chunk;
mod edn;
mod embedding;
mod error;
mod highlight;
mod pdf;
mod reference;
mod region;

pub use answer::answer_lines;
pub use chunk::{count_tokens, ChunkConfig, Chunker, PageChunk};
pub use edn::{parse_edn, EdnError};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{AskPdfError, Result};
pub use highlight::{AnnotationSet, BoundingBox, Highlight, HighlightContent, HighlightPosition};
pub use pdf::{check_page, DefaultPdfBackend, PdfBackend};
pub use reference::{find_reference_id, resolve_reference};
pub use region::{
    crop_rect, extract_region, extract_region_with, fit_within_budget, CropRect, RegionOptions,
    RenderedRegion, JPEG_QUALITY, MAX_IMAGE_PIXELS, RENDER_SCALE,
};
