pub mod command;
pub mod config;
pub mod graph;
pub mod host;
pub mod store;

pub use command::{
    ask_pdf, extract_highlight_region, report, AskOutcome, AskPdf, CommandError,
    LOADING_PLACEHOLDER, PDF_PATH_PROPERTY,
};
pub use config::{
    load_config, settings_schema, ConfigError, EmbeddingProvider, QueryContext, SettingSchema,
    Settings, DEFAULT_CONFIG_FILE,
};
pub use graph::GraphHost;
pub use host::{AssetLocation, Block, BlockId, EditorHost, HostError, MessageLevel};
pub use store::{asset_path_from_property, load_pdf_with_annotations, PdfAsset, StoreError};
