pub mod cache;
pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod prompt;

pub use askpdf_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse};
pub use cache::{IndexCache, IndexKey};
pub use embedding::{EmbeddingBackend, EmbeddingClient};
pub use index::{IndexedChunk, ScoredChunk, VectorIndex};
pub use pipeline::{
    describe_image, execute_rag_query, RagAnswer, RagMetrics, RagQuery, DEFAULT_TOP_K,
    IMAGE_DESCRIPTION_PROMPT,
};
pub use prompt::{
    PromptTemplate, TemplateError, DEFAULT_IMAGE_TEMPLATE, DEFAULT_TEXT_TEMPLATE,
};
