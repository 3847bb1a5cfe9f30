use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type BlockId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        }
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an asset path points after resolution against the current graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    Local(PathBuf),
    Remote(String),
}

impl AssetLocation {
    /// The sidecar annotation file next to this PDF.
    pub fn sidecar(&self) -> AssetLocation {
        match self {
            AssetLocation::Local(path) => AssetLocation::Local(path.with_extension("edn")),
            AssetLocation::Remote(url) => {
                let path_end = url.find(['?', '#']).unwrap_or(url.len());
                let (path, suffix) = url.split_at(path_end);
                let split = path.len().saturating_sub(4);
                let stem = match path.get(split..) {
                    Some(ext) if ext.eq_ignore_ascii_case(".pdf") => &path[..split],
                    _ => path,
                };
                AssetLocation::Remote(format!("{stem}.edn{suffix}"))
            }
        }
    }
}

impl fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLocation::Local(path) => write!(f, "{}", path.display()),
            AssetLocation::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("block {0} does not exist")]
    UnknownBlock(BlockId),
    #[error("failed to write page: {0}")]
    Io(#[from] std::io::Error),
}

/// The editor operations the "ask pdf" command relies on.
pub trait EditorHost: Send + Sync {
    fn block(&self, id: BlockId) -> Option<Block>;

    /// Property of the page containing `block`, looked up by normalized name.
    fn page_property(&self, block: BlockId, name: &str) -> Option<String>;

    /// Appends a child block as the last child of `parent`.
    fn insert_block(&self, parent: BlockId, content: &str) -> Result<BlockId, HostError>;

    fn remove_block(&self, id: BlockId) -> Result<(), HostError>;

    fn show_msg(&self, message: &str, level: MessageLevel);

    fn resolve_asset(&self, path: &str) -> AssetLocation;
}

/// Property names match regardless of case, `-` and `_`.
pub fn normalize_property_name(name: &str) -> String {
    name.chars()
        .filter(|ch| *ch != '-' && *ch != '_')
        .flat_map(char::to_lowercase)
        .collect()
}
