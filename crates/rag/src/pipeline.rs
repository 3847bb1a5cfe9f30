use anyhow::{anyhow, Result};

use askpdf_core::count_tokens;

use crate::embedding::EmbeddingClient;
use crate::index::{ScoredChunk, VectorIndex};
use crate::prompt::PromptTemplate;
use crate::{LlmClient, LlmRequest, LlmResponse};

pub const DEFAULT_TOP_K: usize = 4;
pub const IMAGE_DESCRIPTION_PROMPT: &str = "Please describe the image below:";

const CONTEXT_SEPARATOR: &str = "\n\n";

pub struct RagQuery<'a> {
    pub input: &'a str,
    pub template: &'a PromptTemplate,
    pub top_k: usize,
}

pub struct RagAnswer {
    pub answer: String,
    pub used_chunks: Vec<ScoredChunk>,
    pub metrics: RagMetrics,
    pub response: LlmResponse,
    pub prompt: String,
}

pub struct RagMetrics {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub context_tokens_estimate: u32,
}

/// Retrieves the closest chunks for `query.input`, renders the template and
/// asks the chat model. Chunks are joined in score order.
pub async fn execute_rag_query(
    index: &VectorIndex,
    embeddings: &EmbeddingClient,
    client: &LlmClient,
    query: &RagQuery<'_>,
) -> Result<RagAnswer> {
    let input = query.input.trim();
    if input.is_empty() {
        return Err(anyhow!("query text is empty"));
    }
    let input_embedding = embeddings.embed(input).await?;
    let used_chunks = index.search(&input_embedding, query.top_k);
    let context = used_chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    tracing::debug!(
        source = index.source(),
        retrieved = used_chunks.len(),
        pages = ?used_chunks.iter().map(|chunk| chunk.page).collect::<Vec<_>>(),
        "retrieved context"
    );
    let prompt = query.template.render(&context, input);
    let response = client.chat(&LlmRequest::text(prompt.clone())).await?;
    let metrics = RagMetrics {
        prompt_tokens: response.prompt_tokens,
        completion_tokens: response.completion_tokens,
        context_tokens_estimate: count_tokens(&context)? as u32,
    };
    Ok(RagAnswer {
        answer: response.content.clone(),
        used_chunks,
        metrics,
        response,
        prompt,
    })
}

/// Asks a vision-capable model for a textual description of an image.
pub async fn describe_image(client: &LlmClient, data_uri: &str) -> Result<String> {
    let request = LlmRequest::text(IMAGE_DESCRIPTION_PROMPT).with_image(data_uri);
    let response = client.chat(&request).await?;
    let description = response.content.trim();
    if description.is_empty() {
        return Err(anyhow!("vision model returned an empty description"));
    }
    Ok(description.to_string())
}
