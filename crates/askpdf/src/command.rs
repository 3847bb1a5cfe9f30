//! The "ask pdf" command: explain the highlight referenced on a block.

use std::sync::Arc;

use thiserror::Error;

use askpdf_core::{
    answer_lines, extract_region, find_reference_id, AskPdfError, DefaultPdfBackend, Highlight,
    PdfBackend, RenderedRegion,
};
use askpdf_rag::{
    describe_image, execute_rag_query, EmbeddingClient, IndexCache, IndexKey, LlmClient,
    RagQuery, VectorIndex,
};

use crate::config::{ConfigError, QueryContext, Settings};
use crate::host::{BlockId, EditorHost, HostError, MessageLevel};
use crate::store::{load_pdf_with_annotations, PdfAsset, StoreError};

pub const PDF_PATH_PROPERTY: &str = "askPdfPath";
pub const LOADING_PLACEHOLDER: &str = "LOADING.....";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("Before using the plugin, set 'ask-pdf-path' property.")]
    MissingPdfPath,
    #[error("Please check whether the pdfPath is valid.")]
    PdfNotFound(#[source] StoreError),
    #[error("Please check whether the pdfPath is valid. ({0})")]
    InvalidAnnotations(#[source] StoreError),
    #[error("Please check whether the highlight uuid is on current line.")]
    MissingReference,
    #[error("Please check whether the highlight uuid is on current line.")]
    UnknownHighlight { id: String },
    #[error("The highlight {id} has no text to ask about.")]
    EmptyQuery { id: String },
    #[error("Page {page} does not exist in the pdf ({page_count} pages).")]
    PageNotFound { page: u32, page_count: u32 },
    #[error("Failed to capture the highlighted image: {0}")]
    Extraction(#[source] AskPdfError),
    #[error("Failed to index the pdf. Please retry")]
    Indexing(anyhow::Error),
    #[error("Please retry")]
    Provider(anyhow::Error),
    #[error("Failed to update the page: {0}")]
    Host(#[from] HostError),
}

impl CommandError {
    pub fn severity(&self) -> MessageLevel {
        match self {
            CommandError::MissingPdfPath
            | CommandError::PdfNotFound(_)
            | CommandError::InvalidAnnotations(_)
            | CommandError::MissingReference
            | CommandError::UnknownHighlight { .. }
            | CommandError::EmptyQuery { .. }
            | CommandError::PageNotFound { .. } => MessageLevel::Warning,
            CommandError::Config(_)
            | CommandError::Extraction(_)
            | CommandError::Indexing(_)
            | CommandError::Provider(_)
            | CommandError::Host(_) => MessageLevel::Error,
        }
    }

    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => CommandError::PdfNotFound(err),
            StoreError::InvalidAnnotations { .. } => CommandError::InvalidAnnotations(err),
        }
    }

    fn from_extraction(err: AskPdfError) -> Self {
        match err {
            AskPdfError::PageNotFound { page, page_count } => {
                CommandError::PageNotFound { page, page_count }
            }
            other => CommandError::Extraction(other),
        }
    }

    /// Full cause chain for logs; the display text is what the user sees.
    fn detail(&self) -> String {
        match self {
            CommandError::Indexing(err) | CommandError::Provider(err) => format!("{err:#}"),
            CommandError::PdfNotFound(err) | CommandError::InvalidAnnotations(err) => {
                err.to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Shows `err` to the user exactly once and logs its cause.
pub fn report(host: &dyn EditorHost, err: &CommandError) {
    let level = err.severity();
    match level {
        MessageLevel::Error => tracing::error!(error = %err.detail(), "ask pdf failed"),
        _ => tracing::warn!(error = %err.detail(), "ask pdf stopped"),
    }
    host.show_msg(&err.to_string(), level);
}

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub highlight_id: String,
    pub query: String,
    pub answer_blocks: Vec<BlockId>,
    pub pages: Vec<u32>,
}

pub struct AskPdf {
    context: QueryContext,
    embeddings: EmbeddingClient,
    llm: LlmClient,
    backend: Arc<dyn PdfBackend>,
    cache: IndexCache,
    http: reqwest::Client,
}

impl AskPdf {
    /// Validates `settings` once; every later invocation reuses the result.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_context(settings.validate()?)
    }

    pub fn from_context(context: QueryContext) -> Result<Self, ConfigError> {
        let embeddings = context
            .embedding_client()
            .map_err(|_| ConfigError::MissingApiKey)?;
        let llm = context.llm_client().map_err(|_| ConfigError::MissingApiKey)?;
        tracing::info!(
            embedding_model = %embeddings.model(),
            llm_provider = llm.provider().as_str(),
            llm_model = llm.model(),
            "settings validated"
        );
        Ok(Self {
            context,
            embeddings,
            llm,
            backend: Arc::new(DefaultPdfBackend),
            cache: IndexCache::global(),
            http: reqwest::Client::new(),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cache(mut self, cache: IndexCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Runs the command for `block`. Failures are reported through `host`
    /// and leave no answer blocks behind.
    pub async fn invoke(
        &self,
        host: &dyn EditorHost,
        block: BlockId,
    ) -> Result<AskOutcome, CommandError> {
        let result = self.run(host, block).await;
        if let Err(err) = &result {
            report(host, err);
        }
        result
    }

    async fn run(&self, host: &dyn EditorHost, block_id: BlockId) -> Result<AskOutcome, CommandError> {
        let block = host
            .block(block_id)
            .ok_or(CommandError::Host(HostError::UnknownBlock(block_id)))?;
        let pdf_path = host
            .page_property(block_id, PDF_PATH_PROPERTY)
            .ok_or(CommandError::MissingPdfPath)?;
        let asset = load_pdf_with_annotations(host, &self.http, &pdf_path)
            .await
            .map_err(CommandError::from_store)?;

        let id = find_reference_id(&block.content).ok_or(CommandError::MissingReference)?;
        let highlight = asset
            .highlights
            .find(id)
            .ok_or_else(|| CommandError::UnknownHighlight { id: id.to_string() })?;
        tracing::info!(
            highlight = %highlight.id,
            page = highlight.position.page,
            image = highlight.is_image(),
            "highlight resolved"
        );
        if !highlight.is_image() && highlight.content.text.trim().is_empty() {
            return Err(CommandError::EmptyQuery {
                id: highlight.id.clone(),
            });
        }

        let index = self.index_for(&asset).await?;
        let placeholder = host.insert_block(block_id, LOADING_PLACEHOLDER)?;
        let answered = self.answer(&asset, highlight, &index).await;
        let removed = host.remove_block(placeholder);
        let (query, answer, pages) = answered?;
        removed?;

        let answer_blocks = write_answer(host, block_id, &answer_lines(&answer))?;
        tracing::info!(
            highlight = %highlight.id,
            lines = answer_blocks.len(),
            "answer written"
        );
        Ok(AskOutcome {
            highlight_id: highlight.id.clone(),
            query,
            answer_blocks,
            pages,
        })
    }

    async fn index_for(&self, asset: &PdfAsset) -> Result<Arc<VectorIndex>, CommandError> {
        let key = IndexKey::new(asset.cache_path(), self.embeddings.model());
        if self.cache.contains(&key) {
            tracing::debug!(path = %key.path, "index cache hit");
        }
        let source = key.path.clone();
        self.cache
            .get_or_create(key, || {
                VectorIndex::from_pdf(
                    &source,
                    asset.bytes.clone(),
                    Arc::clone(&self.backend),
                    self.context.chunk,
                    &self.embeddings,
                )
            })
            .await
            .map_err(CommandError::Indexing)
    }

    /// Returns the query text, the raw answer and the pages it drew on.
    async fn answer(
        &self,
        asset: &PdfAsset,
        highlight: &Highlight,
        index: &VectorIndex,
    ) -> Result<(String, String, Vec<u32>), CommandError> {
        let (query, template) = if highlight.is_image() {
            let region = self.extract_image(asset, highlight).await?;
            tracing::info!(
                width = region.width,
                height = region.height,
                "image region extracted"
            );
            let description = describe_image(&self.llm, &region.data_uri())
                .await
                .map_err(CommandError::Provider)?;
            (description, &self.context.image_template)
        } else {
            (highlight.content.text.clone(), &self.context.text_template)
        };
        let rag = RagQuery {
            input: &query,
            template,
            top_k: self.context.top_k,
        };
        let answer = execute_rag_query(index, &self.embeddings, &self.llm, &rag)
            .await
            .map_err(CommandError::Provider)?;
        tracing::debug!(
            prompt_tokens = answer.metrics.prompt_tokens,
            completion_tokens = answer.metrics.completion_tokens,
            context_tokens = answer.metrics.context_tokens_estimate,
            "answer received"
        );
        let pages = answer.used_chunks.iter().map(|chunk| chunk.page).collect();
        Ok((query, answer.answer, pages))
    }

    pub async fn extract_image(
        &self,
        asset: &PdfAsset,
        highlight: &Highlight,
    ) -> Result<RenderedRegion, CommandError> {
        extract_highlight_region(Arc::clone(&self.backend), asset, highlight).await
    }
}

/// Inserts `lines` under `parent`. If an insert fails, the lines already
/// written are removed again so the page never holds a partial answer.
fn write_answer(
    host: &dyn EditorHost,
    parent: BlockId,
    lines: &[String],
) -> Result<Vec<BlockId>, CommandError> {
    let mut written = Vec::with_capacity(lines.len());
    for line in lines {
        match host.insert_block(parent, line) {
            Ok(id) => written.push(id),
            Err(err) => {
                for id in written.into_iter().rev() {
                    if let Err(cleanup) = host.remove_block(id) {
                        tracing::warn!(block = id, error = %cleanup, "failed to remove partial answer");
                    }
                }
                return Err(err.into());
            }
        }
    }
    Ok(written)
}

/// Renders and crops `highlight` off the async runtime.
pub async fn extract_highlight_region(
    backend: Arc<dyn PdfBackend>,
    asset: &PdfAsset,
    highlight: &Highlight,
) -> Result<RenderedRegion, CommandError> {
    let pdf = asset.bytes.clone();
    let position = highlight.position.clone();
    tokio::task::spawn_blocking(move || extract_region(backend.as_ref(), &pdf, &position))
        .await
        .map_err(|err| CommandError::Extraction(AskPdfError::Render(err.to_string())))?
        .map_err(CommandError::from_extraction)
}

/// Validates `settings` and runs one invocation, reporting configuration
/// errors through `host` like any other failure.
pub async fn ask_pdf(
    settings: &Settings,
    host: &dyn EditorHost,
    block: BlockId,
) -> Result<AskOutcome, CommandError> {
    match AskPdf::from_settings(settings) {
        Ok(command) => command.invoke(host, block).await,
        Err(err) => {
            let err = CommandError::from(err);
            report(host, &err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use crate::graph::GraphHost;
    use crate::host::{AssetLocation, Block};

    /// Page host whose inserts start failing after `allowed` successes.
    struct FlakyHost {
        inner: GraphHost,
        allowed: usize,
        inserts: AtomicUsize,
    }

    impl EditorHost for FlakyHost {
        fn block(&self, id: BlockId) -> Option<Block> {
            self.inner.block(id)
        }

        fn page_property(&self, block: BlockId, name: &str) -> Option<String> {
            self.inner.page_property(block, name)
        }

        fn insert_block(&self, parent: BlockId, content: &str) -> Result<BlockId, HostError> {
            if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
                return Err(HostError::Io(err));
            }
            self.inner.insert_block(parent, content)
        }

        fn remove_block(&self, id: BlockId) -> Result<(), HostError> {
            self.inner.remove_block(id)
        }

        fn show_msg(&self, message: &str, level: MessageLevel) {
            self.inner.show_msg(message, level)
        }

        fn resolve_asset(&self, path: &str) -> AssetLocation {
            self.inner.resolve_asset(path)
        }
    }

    const PAGE: &str = "- question ((aaaa-0001))\n";

    fn flaky(allowed: usize) -> (TempDir, FlakyHost) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        fs::write(&path, PAGE).unwrap();
        let host = FlakyHost {
            inner: GraphHost::open(&path).unwrap(),
            allowed,
            inserts: AtomicUsize::new(0),
        };
        (dir, host)
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn failed_insert_rolls_back_written_lines() {
        let (_dir, host) = flaky(2);
        let parent = host.inner.block_at_line(1).unwrap().id;
        let err = write_answer(&host, parent, &lines("first line\nsecond line\nthird line"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Host(HostError::Io(_))));
        assert_eq!(err.severity(), MessageLevel::Error);
        assert!(host.inner.children(parent).is_empty());
        assert_eq!(fs::read_to_string(host.inner.path()).unwrap(), PAGE);
    }

    #[test]
    fn all_lines_are_written_in_order() {
        let (_dir, host) = flaky(usize::MAX);
        let parent = host.inner.block_at_line(1).unwrap().id;
        let written = write_answer(&host, parent, &lines("first line\nsecond line")).unwrap();
        let children = host.inner.children(parent);
        assert_eq!(children.iter().map(|block| block.id).collect::<Vec<_>>(), written);
        assert_eq!(children[0].content, "first line");
        assert_eq!(children[1].content, "second line");
    }
}
