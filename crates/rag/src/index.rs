use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use askpdf_core::{ChunkConfig, Chunker, PageChunk, PdfBackend};

use crate::embedding::EmbeddingClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub page: u32,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub page: u32,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

/// In-memory similarity index over the text of one PDF.
#[derive(Debug)]
pub struct VectorIndex {
    source: String,
    model: String,
    chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new(source: impl Into<String>, model: impl Into<String>, chunks: Vec<IndexedChunk>) -> Self {
        Self {
            source: source.into(),
            model: model.into(),
            chunks,
        }
    }

    /// Extracts page text off the async runtime, chunks it and embeds every chunk.
    pub async fn from_pdf(
        source: &str,
        pdf: Vec<u8>,
        backend: Arc<dyn PdfBackend>,
        chunk_config: ChunkConfig,
        embeddings: &EmbeddingClient,
    ) -> Result<Self> {
        let chunks = tokio::task::spawn_blocking(move || -> Result<Vec<PageChunk>> {
            let pages = backend.page_texts(&pdf)?;
            Ok(Chunker::new(chunk_config).chunk_pages(&pages)?)
        })
        .await
        .map_err(|err| anyhow!("text extraction task failed: {err}"))??;
        Self::from_chunks(source, chunks, embeddings).await
    }

    pub async fn from_pages(
        source: &str,
        pages: &[String],
        chunk_config: ChunkConfig,
        embeddings: &EmbeddingClient,
    ) -> Result<Self> {
        let chunks = Chunker::new(chunk_config).chunk_pages(pages)?;
        Self::from_chunks(source, chunks, embeddings).await
    }

    async fn from_chunks(
        source: &str,
        chunks: Vec<PageChunk>,
        embeddings: &EmbeddingClient,
    ) -> Result<Self> {
        if chunks.is_empty() {
            tracing::warn!(source, "no extractable text; retrieval context will be empty");
        }
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embeddings.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(anyhow!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }
        let indexed = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexedChunk {
                page: chunk.page,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                embedding,
            })
            .collect::<Vec<_>>();
        tracing::info!(source, chunks = indexed.len(), "built vector index");
        Ok(Self::new(source, embeddings.model(), indexed))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `top_k` chunks by cosine similarity. Equal scores keep index order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut hits = self
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                page: chunk.page,
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                score: cosine_similarity(query, &chunk.embedding),
            })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use askpdf_core::{AskPdfError, Result as CoreResult};
    use image::DynamicImage;

    fn chunk(index: usize, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            page: index as u32 + 1,
            chunk_index: index,
            text: format!("chunk {index}"),
            embedding,
        }
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = VectorIndex::new(
            "paper.pdf",
            "test",
            vec![
                chunk(0, vec![0.0, 1.0]),
                chunk(1, vec![1.0, 0.0]),
                chunk(2, vec![1.0, 1.0]),
            ],
        );
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_index, 1);
        assert_eq!(hits[1].chunk_index, 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = VectorIndex::new(
            "paper.pdf",
            "test",
            vec![
                chunk(0, vec![1.0, 0.0]),
                chunk(1, vec![2.0, 0.0]),
                chunk(2, vec![3.0, 0.0]),
            ],
        );
        let order: Vec<usize> = index
            .search(&[1.0, 0.0], 4)
            .iter()
            .map(|hit| hit.chunk_index)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn builds_from_pages_with_hash_embeddings() {
        let embeddings = EmbeddingClient::hash();
        let pages = vec![
            "Attention weights are computed with softmax.".to_string(),
            "The decoder is autoregressive.".to_string(),
        ];
        let index = VectorIndex::from_pages("paper.pdf", &pages, ChunkConfig::default(), &embeddings)
            .await
            .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.model(), "hash-256");
        let query = embeddings.embed("softmax attention").await.unwrap();
        let hits = index.search(&query, 1);
        assert_eq!(hits[0].page, 1);
    }

    struct TextBackend(Vec<String>);

    impl PdfBackend for TextBackend {
        fn page_texts(&self, _pdf: &[u8]) -> CoreResult<Vec<String>> {
            Ok(self.0.clone())
        }

        fn render_page(&self, _pdf: &[u8], _page: u32, _scale: f32) -> CoreResult<DynamicImage> {
            Err(AskPdfError::RendererUnavailable)
        }
    }

    #[tokio::test]
    async fn builds_from_pdf_backend() {
        let backend = Arc::new(TextBackend(vec![String::new(), "second page".to_string()]));
        let index = VectorIndex::from_pdf(
            "paper.pdf",
            Vec::new(),
            backend,
            ChunkConfig::default(),
            &EmbeddingClient::hash(),
        )
        .await
        .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.source(), "paper.pdf");
        assert_eq!(index.search(&[], 4)[0].page, 2);
    }
}
