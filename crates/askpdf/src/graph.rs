//! File-backed editor host over one outline-markdown page.
//!
//! A page is an optional preamble of `key:: value` property lines followed by
//! `- ` blocks nested with tabs or two spaces. Lines that are neither belong to
//! the block above them and are kept verbatim. Every mutation rewrites the file.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::host::{
    normalize_property_name, AssetLocation, Block, BlockId, EditorHost, HostError, MessageLevel,
};

static PROPERTY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_\-]+)::\s*(.*?)\s*$").expect("valid property regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indent {
    Tab,
    Spaces,
}

impl Indent {
    fn unit(&self) -> &'static str {
        match self {
            Indent::Tab => "\t",
            Indent::Spaces => "  ",
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: BlockId,
    depth: usize,
    first: String,
    rest: Vec<String>,
    /// Source text of the first line for blocks read from the file.
    source: Option<String>,
}

impl Node {
    fn content(&self) -> String {
        std::iter::once(self.first.as_str())
            .chain(self.rest.iter().map(|line| line.trim_start()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn line_count(&self) -> usize {
        1 + self.rest.len()
    }
}

#[derive(Debug)]
struct Page {
    preamble: Vec<String>,
    nodes: Vec<Node>,
    indent: Indent,
    next_id: BlockId,
}

impl Page {
    fn parse(text: &str) -> Self {
        let mut page = Page {
            preamble: Vec::new(),
            nodes: Vec::new(),
            indent: Indent::Tab,
            next_id: 1,
        };
        let mut detected = None;
        for line in text.lines() {
            if let Some((depth, content, unit)) = block_line(line) {
                detected = detected.or(unit);
                let id = page.allocate_id();
                page.nodes.push(Node {
                    id,
                    depth,
                    first: content.to_string(),
                    rest: Vec::new(),
                    source: Some(line.to_string()),
                });
            } else if let Some(node) = page.nodes.last_mut() {
                node.rest.push(line.to_string());
            } else {
                page.preamble.push(line.to_string());
            }
        }
        page.indent = detected.unwrap_or(Indent::Tab);
        page
    }

    fn allocate_id(&mut self) -> BlockId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for node in &self.nodes {
            if let Some(source) = &node.source {
                out.push_str(source);
            } else {
                out.push_str(&self.indent.unit().repeat(node.depth));
                if node.first.is_empty() {
                    out.push('-');
                } else {
                    out.push_str("- ");
                    out.push_str(&node.first);
                }
            }
            out.push('\n');
            for line in &node.rest {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    fn position(&self, id: BlockId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == id)
    }

    /// Index one past the last descendant of the node at `idx`.
    fn subtree_end(&self, idx: usize) -> usize {
        let depth = self.nodes[idx].depth;
        self.nodes[idx + 1..]
            .iter()
            .position(|node| node.depth <= depth)
            .map(|offset| idx + 1 + offset)
            .unwrap_or(self.nodes.len())
    }

    fn properties(&self) -> Vec<(String, String)> {
        let mut props = property_lines(self.preamble.iter().map(String::as_str));
        if let Some(first) = self.nodes.first() {
            let lines: Vec<&str> = std::iter::once(first.first.as_str())
                .chain(first.rest.iter().map(|line| line.trim()))
                .filter(|line| !line.is_empty())
                .collect();
            if !lines.is_empty() && lines.iter().all(|line| PROPERTY_LINE.is_match(line)) {
                props.extend(property_lines(lines.into_iter()));
            }
        }
        props
    }
}

fn property_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .filter_map(|line| {
            let caps = PROPERTY_LINE.captures(line.trim())?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
        .collect()
}

fn block_line(line: &str) -> Option<(usize, &str, Option<Indent>)> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let lead = &line[..line.len() - trimmed.len()];
    let content = if trimmed.trim_end() == "-" {
        ""
    } else {
        trimmed.strip_prefix("- ")?
    };
    let tabs = lead.matches('\t').count();
    let spaces = lead.matches(' ').count();
    let unit = if tabs > 0 {
        Some(Indent::Tab)
    } else if spaces > 0 {
        Some(Indent::Spaces)
    } else {
        None
    };
    Some((tabs + spaces / 2, content, unit))
}

pub struct GraphHost {
    path: PathBuf,
    page: Mutex<Page>,
    messages: Mutex<Vec<(MessageLevel, String)>>,
}

impl GraphHost {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path)?;
        Ok(Self {
            page: Mutex::new(Page::parse(&text)),
            path,
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The block that contains 1-based `line` of the page file.
    pub fn block_at_line(&self, line: usize) -> Option<Block> {
        let page = self.page.lock();
        let mut end = page.preamble.len();
        if line <= end {
            return None;
        }
        for node in &page.nodes {
            end += node.line_count();
            if line <= end {
                return Some(Block {
                    id: node.id,
                    content: node.content(),
                });
            }
        }
        None
    }

    pub fn children(&self, parent: BlockId) -> Vec<Block> {
        let page = self.page.lock();
        let Some(idx) = page.position(parent) else {
            return Vec::new();
        };
        let depth = page.nodes[idx].depth;
        page.nodes[idx + 1..page.subtree_end(idx)]
            .iter()
            .filter(|node| node.depth == depth + 1)
            .map(|node| Block {
                id: node.id,
                content: node.content(),
            })
            .collect()
    }

    /// Page property by normalized name; empty values count as unset.
    pub fn property(&self, name: &str) -> Option<String> {
        let wanted = normalize_property_name(name);
        self.page
            .lock()
            .properties()
            .into_iter()
            .find(|(key, _)| normalize_property_name(key) == wanted)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages.lock().clone()
    }

    fn persist(&self, page: &Page) -> Result<(), HostError> {
        fs::write(&self.path, page.render())?;
        Ok(())
    }
}

impl EditorHost for GraphHost {
    fn block(&self, id: BlockId) -> Option<Block> {
        let page = self.page.lock();
        let idx = page.position(id)?;
        Some(Block {
            id,
            content: page.nodes[idx].content(),
        })
    }

    fn page_property(&self, block: BlockId, name: &str) -> Option<String> {
        self.page.lock().position(block)?;
        self.property(name)
    }

    fn insert_block(&self, parent: BlockId, content: &str) -> Result<BlockId, HostError> {
        let mut page = self.page.lock();
        let idx = page.position(parent).ok_or(HostError::UnknownBlock(parent))?;
        let depth = page.nodes[idx].depth + 1;
        let at = page.subtree_end(idx);
        let continuation = format!("{}  ", page.indent.unit().repeat(depth));
        let mut lines = content.lines();
        let first = lines.next().unwrap_or_default().to_string();
        let rest = lines.map(|line| format!("{continuation}{line}")).collect();
        let id = page.allocate_id();
        page.nodes.insert(
            at,
            Node {
                id,
                depth,
                first,
                rest,
                source: None,
            },
        );
        self.persist(&page)?;
        Ok(id)
    }

    fn remove_block(&self, id: BlockId) -> Result<(), HostError> {
        let mut page = self.page.lock();
        let idx = page.position(id).ok_or(HostError::UnknownBlock(id))?;
        let end = page.subtree_end(idx);
        page.nodes.drain(idx..end);
        self.persist(&page)
    }

    fn show_msg(&self, message: &str, level: MessageLevel) {
        eprintln!("[askpdf] {level}: {message}");
        self.messages.lock().push((level, message.to_string()));
    }

    fn resolve_asset(&self, path: &str) -> AssetLocation {
        let path = path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return AssetLocation::Remote(path.to_string());
        }
        let path = Path::new(path.strip_prefix("file://").unwrap_or(path));
        if path.is_absolute() {
            return AssetLocation::Local(path.to_path_buf());
        }
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));
        AssetLocation::Local(base.join(path))
    }
}
