use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use askpdf::{
    ask_pdf, AskPdf, AssetLocation, Block, BlockId, CommandError, EditorHost, GraphHost,
    HostError, MessageLevel, Settings, LOADING_PLACEHOLDER,
};
use askpdf_core::{check_page, PdfBackend, Result as CoreResult};
use askpdf_rag::IndexCache;

const PAGE: &str = "\
ask-pdf-path:: ![paper.pdf](../assets/paper.pdf)

- text ((aaaa-0001))
- image ((aaaa-0002))
- missing ((zzzz-9999))
- no marker here
- far image ((aaaa-0003))
- empty ((aaaa-0004))
";

const EDN: &str = r#"
{:highlights
 [{:id #uuid "aaaa-0001"
   :page 1
   :position {:bounding {:x1 10 :y1 10 :x2 200 :y2 40 :width 600 :height 800} :rects () :page 1}
   :content {:text "self-attention"}}
  {:id #uuid "aaaa-0002"
   :page 2
   :position {:bounding {:x1 150 :y1 200 :x2 450 :y2 600 :width 600 :height 800} :rects () :page 2}
   :content {:text "[:span]" :image 1690000000000}}
  {:id #uuid "aaaa-0003"
   :page 9
   :position {:bounding {:x1 0 :y1 0 :x2 100 :y2 100 :width 600 :height 800} :rects () :page 9}
   :content {:text "" :image 1690000000001}}
  {:id #uuid "aaaa-0004"
   :page 1
   :position {:bounding {:x1 0 :y1 0 :x2 100 :y2 100 :width 600 :height 800} :rects () :page 1}
   :content {:text "   "}}]}
"#;

/// Two-page document with fixed text and a gradient raster.
#[derive(Default)]
struct FakeBackend {
    text_calls: AtomicUsize,
}

impl PdfBackend for FakeBackend {
    fn page_texts(&self, _pdf: &[u8]) -> CoreResult<Vec<String>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            "Attention is all you need.\nSelf-attention relates positions of a sequence.".to_string(),
            "Figure 2 shows multi-head attention.".to_string(),
        ])
    }

    fn render_page(&self, _pdf: &[u8], page: u32, scale: f32) -> CoreResult<DynamicImage> {
        check_page(page, 2)?;
        let width = (612.0 * scale) as u32;
        let height = (792.0 * scale) as u32;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })))
    }
}

struct Fixture {
    _dir: TempDir,
    page: PathBuf,
    host: GraphHost,
}

impl Fixture {
    fn new() -> Self {
        Self::with_assets(true)
    }

    fn with_assets(write_assets: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let pages = dir.path().join("pages");
        let assets = dir.path().join("assets");
        fs::create_dir_all(&pages).unwrap();
        fs::create_dir_all(&assets).unwrap();
        if write_assets {
            fs::write(assets.join("paper.pdf"), b"%PDF-1.4 fake").unwrap();
            fs::write(assets.join("paper.edn"), EDN).unwrap();
        }
        let page = pages.join("paper.md");
        fs::write(&page, PAGE).unwrap();
        let host = GraphHost::open(&page).unwrap();
        Self {
            _dir: dir,
            page,
            host,
        }
    }

    fn block(&self, line: usize) -> BlockId {
        self.host.block_at_line(line).unwrap().id
    }

    fn page_text(&self) -> String {
        fs::read_to_string(&self.page).unwrap()
    }
}

fn offline_settings() -> Settings {
    Settings {
        embedding_provider: "hash".to_string(),
        llm_provider: "local".to_string(),
        ..Settings::default()
    }
}

fn command(backend: Arc<FakeBackend>, cache: IndexCache) -> AskPdf {
    AskPdf::from_settings(&offline_settings())
        .unwrap()
        .with_backend(backend)
        .with_cache(cache)
}

fn assert_single_message(host: &GraphHost, level: MessageLevel, text: &str) {
    assert_eq!(host.messages(), vec![(level, text.to_string())]);
}

#[tokio::test]
async fn missing_api_key_reports_one_error_and_writes_nothing() {
    let fixture = Fixture::new();
    let block = fixture.block(3);
    let err = ask_pdf(&Settings::default(), &fixture.host, block)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Config(_)));
    assert_eq!(err.severity(), MessageLevel::Error);
    assert_single_message(
        &fixture.host,
        MessageLevel::Error,
        "OpenAI API key is not set. Please set it in the plugin settings.",
    );
    assert_eq!(fixture.page_text(), PAGE);
}

#[tokio::test]
async fn text_highlight_is_answered_under_its_block() {
    let fixture = Fixture::new();
    let backend = Arc::new(FakeBackend::default());
    let command = command(Arc::clone(&backend), IndexCache::new());
    let block = fixture.block(3);

    let outcome = command.invoke(&fixture.host, block).await.unwrap();
    assert_eq!(outcome.highlight_id, "aaaa-0001");
    assert_eq!(outcome.query, "self-attention");
    assert_eq!(outcome.pages[0], 1);
    assert!(fixture.host.messages().is_empty());

    let children = fixture.host.children(block);
    assert_eq!(children.len(), outcome.answer_blocks.len());
    assert!(!children.is_empty());
    assert!(children[0].content.starts_with("Context:"));
    assert!(children[0].content.contains("self-attention"));

    let written = fixture.page_text();
    assert!(!written.contains(LOADING_PLACEHOLDER));
    assert!(written.starts_with("ask-pdf-path:: ![paper.pdf](../assets/paper.pdf)\n\n- text ((aaaa-0001))\n\t- Context:"));
}

#[tokio::test]
async fn image_highlight_is_described_then_answered() {
    let fixture = Fixture::new();
    let command = command(Arc::new(FakeBackend::default()), IndexCache::new());
    let block = fixture.block(4);

    let outcome = command.invoke(&fixture.host, block).await.unwrap();
    assert_eq!(outcome.highlight_id, "aaaa-0002");
    assert!(outcome.query.starts_with("An image region (1 attachment)"));
    let children = fixture.host.children(block);
    assert_eq!(children.len(), 1);
    assert!(children[0]
        .content
        .contains("Explain following described image and write in markdown format"));
}

#[tokio::test]
async fn lookup_misses_are_warnings() {
    let cases = [
        (5, "Please check whether the highlight uuid is on current line."),
        (6, "Please check whether the highlight uuid is on current line."),
        (8, "The highlight aaaa-0004 has no text to ask about."),
        (7, "Page 9 does not exist in the pdf (2 pages)."),
    ];
    for (line, message) in cases {
        let fixture = Fixture::new();
        let command = command(Arc::new(FakeBackend::default()), IndexCache::new());
        let err = command
            .invoke(&fixture.host, fixture.block(line))
            .await
            .unwrap_err();
        assert_eq!(err.severity(), MessageLevel::Warning, "line {line}");
        assert_single_message(&fixture.host, MessageLevel::Warning, message);
        assert_eq!(fixture.page_text(), PAGE, "line {line}");
    }
}

#[tokio::test]
async fn missing_property_and_missing_pdf_are_warnings() {
    let fixture = Fixture::with_assets(false);
    let command = command(Arc::new(FakeBackend::default()), IndexCache::new());
    let err = command
        .invoke(&fixture.host, fixture.block(3))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::PdfNotFound(_)));
    assert_single_message(
        &fixture.host,
        MessageLevel::Warning,
        "Please check whether the pdfPath is valid.",
    );

    let dir = TempDir::new().unwrap();
    let page = dir.path().join("bare.md");
    fs::write(&page, "- ((aaaa-0001))\n").unwrap();
    let host = GraphHost::open(&page).unwrap();
    let block = host.block_at_line(1).unwrap().id;
    let err = command.invoke(&host, block).await.unwrap_err();
    assert!(matches!(err, CommandError::MissingPdfPath));
    assert_single_message(
        &host,
        MessageLevel::Warning,
        "Before using the plugin, set 'ask-pdf-path' property.",
    );
}

#[tokio::test]
async fn provider_failure_removes_placeholder_and_asks_to_retry() {
    let fixture = Fixture::new();
    let settings = Settings {
        openai_api_key: Some("sk-test".to_string()),
        embedding_provider: "hash".to_string(),
        llm_model_host: Some("http://127.0.0.1:9/v1".to_string()),
        ..Settings::default()
    };
    let command = AskPdf::from_settings(&settings)
        .unwrap()
        .with_backend(Arc::new(FakeBackend::default()))
        .with_cache(IndexCache::new());
    let block = fixture.block(3);
    let err = command.invoke(&fixture.host, block).await.unwrap_err();
    assert!(matches!(err, CommandError::Provider(_)));
    assert_single_message(&fixture.host, MessageLevel::Error, "Please retry");
    assert!(fixture.host.children(block).is_empty());
    assert_eq!(fixture.page_text(), PAGE);
}

/// Forwards to a page host but fails every insert after the first.
struct FailingWrites<'a> {
    inner: &'a GraphHost,
    inserts: AtomicUsize,
}

impl EditorHost for FailingWrites<'_> {
    fn block(&self, id: BlockId) -> Option<Block> {
        self.inner.block(id)
    }

    fn page_property(&self, block: BlockId, name: &str) -> Option<String> {
        self.inner.page_property(block, name)
    }

    fn insert_block(&self, parent: BlockId, content: &str) -> Result<BlockId, HostError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) > 0 {
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

#[tokio::test]
async fn failed_answer_write_leaves_the_page_untouched() {
    let fixture = Fixture::new();
    let command = command(Arc::new(FakeBackend::default()), IndexCache::new());
    let host = FailingWrites {
        inner: &fixture.host,
        inserts: AtomicUsize::new(0),
    };
    let block = fixture.block(3);
    let err = command.invoke(&host, block).await.unwrap_err();
    assert!(matches!(err, CommandError::Host(HostError::Io(_))));
    assert_single_message(
        &fixture.host,
        MessageLevel::Error,
        "Failed to update the page: failed to write page: disk full",
    );
    assert!(fixture.host.children(block).is_empty());
    assert_eq!(fixture.page_text(), PAGE);
}

#[tokio::test]
async fn index_is_built_once_per_pdf() {
    let fixture = Fixture::new();
    let backend = Arc::new(FakeBackend::default());
    let cache = IndexCache::new();
    let command = command(Arc::clone(&backend), cache.clone());

    let first = fixture.block(3);
    command.invoke(&fixture.host, first).await.unwrap();
    command.invoke(&fixture.host, first).await.unwrap();
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(fixture.host.children(first).len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_share_one_build() {
    let fixture = Fixture::new();
    let backend = Arc::new(FakeBackend::default());
    let command = command(Arc::clone(&backend), IndexCache::new());
    let blocks = [fixture.block(3), fixture.block(4)];

    let results = join_all(blocks.iter().map(|block| command.invoke(&fixture.host, *block))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.text_calls.load(Ordering::SeqCst), 1);
    for block in blocks {
        assert_eq!(fixture.host.children(block).len(), 1);
    }
    assert!(!fixture.page_text().contains(LOADING_PLACEHOLDER));
}
