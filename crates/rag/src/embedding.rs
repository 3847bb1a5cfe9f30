use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;

use askpdf_core::{HashEmbedder, HashEmbedderConfig};
use askpdf_llm::DEFAULT_OPENAI_BASE_URL;

const MAX_BATCH: usize = 512;

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn openai(api_key: &str, base_url: Option<&str>, model: &str) -> Result<Self> {
        Ok(Self {
            backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                api_key, base_url, model,
            )?),
        })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }

    pub fn backend(&self) -> &EmbeddingBackend {
        &self.backend
    }

    /// Identifier of the embedding space; vectors are only comparable within one.
    pub fn model(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => format!("hash-{}", embedder.dimensions()),
            EmbeddingBackend::OpenAi(client) => client.model.clone(),
        }
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs).await,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs).await?;
        output
            .pop()
            .ok_or_else(|| anyhow!("embedding provider returned no vector"))
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("an API key is required for openai embeddings"));
        }
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(MAX_BATCH) {
            out.extend(self.embed_request(batch).await?);
        }
        Ok(out)
    }

    async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        tracing::debug!(model = %self.model, inputs = inputs.len(), "embedding request");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("embedding request to {url} failed"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "embeddings request failed (status {}): {}",
                status,
                body
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embeddings response")?;
        ordered_vectors(parsed, inputs.len())
    }
}

fn ordered_vectors(parsed: OpenAiEmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut data = parsed.data;
    data.sort_by_key(|item| item.index);
    if data.len() != expected {
        return Err(anyhow!(
            "embeddings response has {} vectors for {} inputs",
            data.len(),
            expected
        ));
    }
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
