use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use askpdf_core::ChunkConfig;
use askpdf_llm::LlmProvider;
use askpdf_rag::{
    EmbeddingClient, LlmClient, PromptTemplate, TemplateError, DEFAULT_IMAGE_TEMPLATE,
    DEFAULT_TEXT_TEMPLATE, DEFAULT_TOP_K,
};

pub const DEFAULT_CONFIG_FILE: &str = "askpdf.toml";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// User settings as stored on disk. Keys mirror the settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub prompt_template_for_text: String,
    pub prompt_template_for_image: String,
    pub embedding_model_host: Option<String>,
    pub embedding_model: String,
    pub llm_model_host: Option<String>,
    pub llm_model: String,
    pub embedding_provider: String,
    pub llm_provider: String,
    pub top_k: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let chunk = ChunkConfig::default();
        Self {
            openai_api_key: None,
            prompt_template_for_text: DEFAULT_TEXT_TEMPLATE.to_string(),
            prompt_template_for_image: DEFAULT_IMAGE_TEMPLATE.to_string(),
            embedding_model_host: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            llm_model_host: None,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            embedding_provider: EmbeddingProvider::OpenAi.as_str().to_string(),
            llm_provider: LlmProvider::OpenAi.as_str().to_string(),
            top_k: DEFAULT_TOP_K,
            chunk_max_tokens: chunk.max_tokens,
            chunk_overlap_tokens: chunk.overlap_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    Hash,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::Hash => "hash",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(EmbeddingProvider::OpenAi),
            "hash" => Some(EmbeddingProvider::Hash),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OpenAI API key is not set. Please set it in the plugin settings.")]
    MissingApiKey,
    #[error("unknown {kind} provider `{name}`")]
    UnknownProvider { kind: &'static str, name: String },
    #[error("invalid `{key}` template: {source}")]
    InvalidTemplate {
        key: &'static str,
        #[source]
        source: TemplateError,
    },
    #[error("invalid `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Validated, defaults-applied view of [`Settings`] used by every invocation.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub api_key: Option<String>,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_host: Option<String>,
    pub embedding_model: String,
    pub llm_provider: LlmProvider,
    pub llm_host: Option<String>,
    pub llm_model: String,
    pub text_template: PromptTemplate,
    pub image_template: PromptTemplate,
    pub top_k: usize,
    pub chunk: ChunkConfig,
}

impl QueryContext {
    pub fn embedding_client(&self) -> Result<EmbeddingClient> {
        match self.embedding_provider {
            EmbeddingProvider::Hash => Ok(EmbeddingClient::hash()),
            EmbeddingProvider::OpenAi => EmbeddingClient::openai(
                self.api_key.as_deref().unwrap_or_default(),
                self.embedding_host.as_deref(),
                &self.embedding_model,
            ),
        }
    }

    pub fn llm_client(&self) -> Result<LlmClient> {
        match self.llm_provider {
            LlmProvider::Local => Ok(LlmClient::local(self.llm_model.clone())),
            LlmProvider::OpenAi => LlmClient::openai(
                self.api_key.clone().unwrap_or_default(),
                self.llm_host.as_deref(),
                self.llm_model.clone(),
            ),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<QueryContext, ConfigError> {
        let embedding_provider = EmbeddingProvider::from_str(self.embedding_provider.trim())
            .ok_or_else(|| ConfigError::UnknownProvider {
                kind: "embedding",
                name: self.embedding_provider.clone(),
            })?;
        let llm_provider = LlmProvider::from_str(self.llm_provider.trim()).ok_or_else(|| {
            ConfigError::UnknownProvider {
                kind: "llm",
                name: self.llm_provider.clone(),
            }
        })?;
        let api_key = non_blank(self.openai_api_key.as_deref());
        let needs_key =
            embedding_provider == EmbeddingProvider::OpenAi || llm_provider == LlmProvider::OpenAi;
        if needs_key && api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "topK",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunkMaxTokens",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_overlap_tokens >= self.chunk_max_tokens {
            return Err(ConfigError::InvalidValue {
                key: "chunkOverlapTokens",
                reason: format!("must be smaller than chunkMaxTokens ({})", self.chunk_max_tokens),
            });
        }
        Ok(QueryContext {
            api_key,
            embedding_provider,
            embedding_host: non_blank(self.embedding_model_host.as_deref()),
            embedding_model: non_blank(Some(&self.embedding_model))
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            llm_provider,
            llm_host: non_blank(self.llm_model_host.as_deref()),
            llm_model: non_blank(Some(&self.llm_model))
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            text_template: parse_template(
                "promptTemplateForText",
                &self.prompt_template_for_text,
                DEFAULT_TEXT_TEMPLATE,
            )?,
            image_template: parse_template(
                "promptTemplateForImage",
                &self.prompt_template_for_image,
                DEFAULT_IMAGE_TEMPLATE,
            )?,
            top_k: self.top_k,
            chunk: ChunkConfig {
                max_tokens: self.chunk_max_tokens,
                overlap_tokens: self.chunk_overlap_tokens,
            },
        })
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlays values from `lookup`; blank values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| non_blank(lookup(name).as_deref()))
        };
        if let Some(key) = get(&["ASKPDF_OPENAI_API_KEY", "OPENAI_API_KEY"]) {
            self.openai_api_key = Some(key);
        }
        if let Some(model) = get(&["ASKPDF_EMBEDDING_MODEL"]) {
            self.embedding_model = model;
        }
        if let Some(host) = get(&["ASKPDF_EMBEDDING_MODEL_HOST"]) {
            self.embedding_model_host = Some(host);
        }
        if let Some(model) = get(&["ASKPDF_LLM_MODEL"]) {
            self.llm_model = model;
        }
        if let Some(host) = get(&["ASKPDF_LLM_MODEL_HOST"]) {
            self.llm_model_host = Some(host);
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_template(
    key: &'static str,
    text: &str,
    fallback: &str,
) -> Result<PromptTemplate, ConfigError> {
    let text = if text.trim().is_empty() { fallback } else { text };
    PromptTemplate::parse(text).map_err(|source| ConfigError::InvalidTemplate { key, source })
}

/// Reads settings from `path` (defaults when the file is absent) and overlays the environment.
pub fn load_config(path: &Path) -> Result<Settings> {
    let mut settings = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Settings::default()
    };
    settings.apply_env();
    Ok(settings)
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingSchema {
    pub key: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub default: Value,
    #[serde(rename = "inputAs", skip_serializing_if = "Option::is_none")]
    pub input_as: Option<&'static str>,
}

pub fn settings_schema() -> Vec<SettingSchema> {
    let defaults = Settings::default();
    let entry = |key, kind, title, description, default: Value, input_as| SettingSchema {
        key,
        kind,
        title,
        description,
        default,
        input_as,
    };
    vec![
        entry(
            "openaiApiKey",
            "string",
            "OpenAI API Key",
            "To ask your pdf to gpt, you need to enter the openai api key",
            json!(""),
            None,
        ),
        entry(
            "promptTemplateForText",
            "string",
            "Prompt template for text highlights",
            "Uses {context} for retrieved passages and {input} for the highlighted text",
            json!(defaults.prompt_template_for_text),
            Some("textarea"),
        ),
        entry(
            "promptTemplateForImage",
            "string",
            "Prompt template for image highlights",
            "Uses {context} for retrieved passages and {input} for the image description",
            json!(defaults.prompt_template_for_image),
            Some("textarea"),
        ),
        entry(
            "embeddingModelHost",
            "string",
            "Embedding model host",
            "Base URL of an OpenAI-compatible embeddings endpoint; empty for api.openai.com",
            json!(""),
            None,
        ),
        entry(
            "embeddingModel",
            "string",
            "Embedding model",
            "Model used to index the pdf",
            json!(defaults.embedding_model),
            None,
        ),
        entry(
            "llmModelHost",
            "string",
            "LLM model host",
            "Base URL of an OpenAI-compatible chat endpoint; empty for api.openai.com",
            json!(""),
            None,
        ),
        entry(
            "llmModel",
            "string",
            "LLM model",
            "Chat model used for answers and image descriptions",
            json!(defaults.llm_model),
            None,
        ),
        entry(
            "embeddingProvider",
            "enum",
            "Embedding provider",
            "openai, or hash for offline keyword embeddings",
            json!(defaults.embedding_provider),
            None,
        ),
        entry(
            "llmProvider",
            "enum",
            "LLM provider",
            "openai, or local for an offline digest of the prompt",
            json!(defaults.llm_provider),
            None,
        ),
        entry(
            "topK",
            "number",
            "Retrieved passages",
            "Number of pdf passages placed in {context}",
            json!(defaults.top_k),
            None,
        ),
        entry(
            "chunkMaxTokens",
            "number",
            "Chunk size",
            "Maximum tokens per indexed passage",
            json!(defaults.chunk_max_tokens),
            None,
        ),
        entry(
            "chunkOverlapTokens",
            "number",
            "Chunk overlap",
            "Tokens shared between consecutive passages of a page",
            json!(defaults.chunk_overlap_tokens),
            None,
        ),
    ]
}
