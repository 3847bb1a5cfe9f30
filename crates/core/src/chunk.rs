use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{AskPdfError, Result};

static TOKENIZER: OnceCell<CoreBPE> = OnceCell::new();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            overlap_tokens: 80,
        }
    }
}

/// A retrievable piece of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageChunk {
    /// 1-based page number.
    pub page: u32,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
}

/// Splits page text into token-bounded windows of whole lines.
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn chunk_pages(&self, pages: &[String]) -> Result<Vec<PageChunk>> {
        let mut chunks = Vec::new();
        for (idx, text) in pages.iter().enumerate() {
            let page = u32::try_from(idx + 1)
                .map_err(|_| AskPdfError::Other("page count exceeds u32::MAX".to_string()))?;
            self.chunk_page(page, text, &mut chunks)?;
        }
        Ok(chunks)
    }

    fn chunk_page(&self, page: u32, text: &str, out: &mut Vec<PageChunk>) -> Result<()> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .collect();
        if lines.is_empty() {
            return Ok(());
        }
        let tokens_per_line = lines
            .iter()
            .map(|line| count_tokens(line))
            .collect::<Result<Vec<_>>>()?;
        let max_tokens = self.config.max_tokens.max(1);
        let overlap_tokens = self.config.overlap_tokens.min(max_tokens.saturating_sub(1));
        let mut start = 0usize;
        while start < lines.len() {
            let mut end = start;
            let mut used_tokens = 0usize;
            while end < lines.len() {
                let line_tokens = tokens_per_line[end].max(1);
                if end > start && used_tokens + line_tokens > max_tokens {
                    break;
                }
                used_tokens += line_tokens;
                end += 1;
            }
            out.push(PageChunk {
                page,
                chunk_index: out.len(),
                text: lines[start..end].join("\n"),
                token_count: used_tokens,
            });
            if end == lines.len() {
                break;
            }
            start = if overlap_tokens == 0 {
                end
            } else {
                let mut back_tokens = 0usize;
                let mut new_start = end;
                while new_start > start + 1 {
                    new_start -= 1;
                    back_tokens += tokens_per_line[new_start].max(1);
                    if back_tokens >= overlap_tokens {
                        break;
                    }
                }
                new_start
            };
        }
        Ok(())
    }
}

pub fn count_tokens(text: &str) -> Result<usize> {
    let tokenizer = TOKENIZER
        .get_or_try_init(|| {
            tiktoken_rs::cl100k_base().map_err(|e| AskPdfError::Tokenizer(e.to_string()))
        })?;
    Ok(tokenizer.encode_with_special_tokens(text).len())
}
