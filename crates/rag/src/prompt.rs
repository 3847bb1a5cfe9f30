//! Prompt templates with `{context}` and `{input}` placeholders.
//!
//! Syntax follows Python f-strings: `{{` and `}}` are literal braces, any
//! other `{name}` must be one of the two known variables.

use std::fmt;

use thiserror::Error;

pub const DEFAULT_TEXT_TEMPLATE: &str =
    "Context:\n{context}\n---\nExplain following concept and write in markdown format: {input}";
pub const DEFAULT_IMAGE_TEMPLATE: &str = "Context:\n{context}\n---\nExplain following described image and write in markdown format: {input}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template variable `{{{0}}}`; expected `{{context}}` or `{{input}}`")]
    UnknownVariable(String),
    #[error("unclosed `{{` at byte {0}")]
    Unclosed(usize),
    #[error("single `}}` at byte {0}; write `}}}}` for a literal brace")]
    UnmatchedClose(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Context,
    Input,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Variable),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, next) in chars.by_ref() {
                        if next == '}' {
                            closed = true;
                            break;
                        }
                        name.push(next);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(offset));
                    }
                    let variable = match name.as_str() {
                        "context" => Variable::Context,
                        "input" => Variable::Input,
                        _ => return Err(TemplateError::UnknownVariable(name)),
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(variable));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(TemplateError::UnmatchedClose(offset));
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn default_text() -> Self {
        Self::parse(DEFAULT_TEXT_TEMPLATE).unwrap_or_else(|_| Self::literal(DEFAULT_TEXT_TEMPLATE))
    }

    pub fn default_image() -> Self {
        Self::parse(DEFAULT_IMAGE_TEMPLATE)
            .unwrap_or_else(|_| Self::literal(DEFAULT_IMAGE_TEMPLATE))
    }

    fn literal(text: &str) -> Self {
        Self {
            source: text.to_string(),
            segments: vec![Segment::Literal(text.to_string())],
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn uses_input(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| *segment == Segment::Var(Variable::Input))
    }

    pub fn render(&self, context: &str, input: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + context.len() + input.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(Variable::Context) => out.push_str(context),
                Segment::Var(Variable::Input) => out.push_str(input),
            }
        }
        out
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
