//! Minimal EDN reader.
//!
//! Decodes an EDN document into a [`serde_json::Value`] using the
//! "map-as-object, keyword-as-string" convention: maps become objects keyed by
//! the printed form of their keys, keywords lose their leading colon, every
//! sequential collection (vector, list, set) becomes an array and tagged
//! literals become `{"tag": <tag>, "val": <value>}`. A `#uuid "..."` id is
//! therefore addressed as `id.val` by downstream code.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at byte {offset}")]
pub struct EdnError {
    pub offset: usize,
    pub message: String,
}

pub fn parse_edn(input: &str) -> Result<Value, EdnError> {
    let mut reader = Reader { text: input, pos: 0 };
    let value = match reader.next_form()? {
        Form::Value(value) => value,
        Form::Close(_) => return Err(reader.error("unexpected closing delimiter")),
        Form::Eof => return Err(reader.error("empty document")),
    };
    match reader.next_form()? {
        Form::Eof => Ok(value),
        _ => Err(reader.error("unexpected content after top-level form")),
    }
}

enum Form {
    Value(Value),
    Close(u8),
    Eof,
}

struct Reader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next_form(&mut self) -> Result<Form, EdnError> {
        self.skip_whitespace();
        let Some(byte) = self.peek() else {
            return Ok(Form::Eof);
        };
        let value = match byte {
            b')' | b']' | b'}' => {
                self.pos += 1;
                return Ok(Form::Close(byte));
            }
            b'(' => {
                self.pos += 1;
                Value::Array(self.read_seq(b')')?)
            }
            b'[' => {
                self.pos += 1;
                Value::Array(self.read_seq(b']')?)
            }
            b'{' => {
                self.pos += 1;
                self.read_map()?
            }
            b'"' => Value::String(self.read_string()?),
            b'\\' => Value::String(self.read_char()?.to_string()),
            b':' => {
                self.pos += 1;
                let name = self.read_token();
                if name.is_empty() {
                    return Err(self.error("empty keyword"));
                }
                Value::String(name.to_string())
            }
            b'#' => return self.read_dispatch(),
            _ => self.read_atom()?,
        };
        Ok(Form::Value(value))
    }

    fn read_dispatch(&mut self) -> Result<Form, EdnError> {
        let start = self.pos;
        self.pos += 1;
        match self.peek() {
            Some(b'{') => {
                self.pos += 1;
                Ok(Form::Value(Value::Array(self.read_seq(b'}')?)))
            }
            Some(b'_') => {
                self.pos += 1;
                match self.next_form()? {
                    Form::Value(_) => self.next_form(),
                    _ => Err(self.error_at(start, "discard without a form")),
                }
            }
            Some(b'#') => {
                // ##Inf, ##-Inf and ##NaN have no JSON counterpart.
                self.pos += 1;
                self.read_token();
                Ok(Form::Value(Value::Null))
            }
            _ => {
                let tag = self.read_token().to_string();
                if tag.is_empty() {
                    return Err(self.error_at(start, "invalid dispatch character"));
                }
                match self.next_form()? {
                    Form::Value(val) => {
                        let mut object = Map::new();
                        object.insert("tag".to_string(), Value::String(tag));
                        object.insert("val".to_string(), val);
                        Ok(Form::Value(Value::Object(object)))
                    }
                    _ => Err(self.error_at(start, "tag without a value")),
                }
            }
        }
    }

    fn read_seq(&mut self, close: u8) -> Result<Vec<Value>, EdnError> {
        let start = self.pos.saturating_sub(1);
        let mut items = Vec::new();
        loop {
            match self.next_form()? {
                Form::Value(value) => items.push(value),
                Form::Close(found) if found == close => return Ok(items),
                Form::Close(found) => {
                    return Err(self.error(format!(
                        "mismatched delimiter: expected '{}', found '{}'",
                        close as char, found as char
                    )))
                }
                Form::Eof => return Err(self.error_at(start, "unterminated collection")),
            }
        }
    }

    fn read_map(&mut self) -> Result<Value, EdnError> {
        let start = self.pos.saturating_sub(1);
        let items = self.read_seq(b'}')?;
        if items.len() % 2 != 0 {
            return Err(self.error_at(start, "map literal has an odd number of forms"));
        }
        let mut object = Map::new();
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            object.insert(key_to_string(key), value);
        }
        Ok(Value::Object(object))
    }

    fn read_string(&mut self) -> Result<String, EdnError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let ch = self
                .next_char()
                .ok_or_else(|| self.error_at(start, "unterminated string"))?;
            match ch {
                '"' => return Ok(out),
                '\\' => {
                    let escaped = self
                        .next_char()
                        .ok_or_else(|| self.error_at(start, "unterminated string"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        'u' => out.push(self.read_unicode_escape()?),
                        other => {
                            return Err(self.error(format!("invalid string escape '\\{other}'")))
                        }
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> Result<char, EdnError> {
        let text = self.text;
        let end = self.pos + 4;
        let hex = text
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated unicode escape"))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| self.error(format!("invalid unicode escape '{hex}'")))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error(format!("invalid code point {code:#x}")))
    }

    fn read_char(&mut self) -> Result<char, EdnError> {
        let start = self.pos;
        self.pos += 1;
        let first = self
            .next_char()
            .ok_or_else(|| self.error_at(start, "character literal without a character"))?;
        if !first.is_ascii_alphanumeric() {
            return Ok(first);
        }
        let rest = self.read_token();
        if rest.is_empty() {
            return Ok(first);
        }
        let name = format!("{first}{rest}");
        match name.as_str() {
            "newline" => Ok('\n'),
            "space" => Ok(' '),
            "tab" => Ok('\t'),
            "return" => Ok('\r'),
            "formfeed" => Ok('\u{c}'),
            "backspace" => Ok('\u{8}'),
            _ if first == 'u' && rest.len() == 4 => u32::from_str_radix(rest, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| self.error_at(start, format!("invalid character \\{name}"))),
            _ => Err(self.error_at(start, format!("unknown character literal \\{name}"))),
        }
    }

    fn read_atom(&mut self) -> Result<Value, EdnError> {
        let start = self.pos;
        let token = self.read_token();
        if token.is_empty() {
            // A lone non-delimiter byte that cannot start a token.
            return Err(self.error_at(start, "unexpected character"));
        }
        match token {
            "nil" => Ok(Value::Null),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ if looks_numeric(token) => parse_number(token)
                .ok_or_else(|| self.error_at(start, format!("invalid number '{token}'"))),
            symbol => Ok(Value::String(symbol.to_string())),
        }
    }

    fn read_token(&mut self) -> &'a str {
        let text = self.text;
        let start = self.pos;
        let bytes = text.as_bytes();
        while self.pos < bytes.len() && !is_delimiter(bytes[self.pos]) {
            self.pos += 1;
        }
        &text[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b',' => self.pos += 1,
                b';' => {
                    while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.text[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> EdnError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> EdnError {
        EdnError {
            offset,
            message: message.into(),
        }
    }
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace()
        || matches!(
            byte,
            b',' | b'(' | b')' | b'[' | b']' | b'{' | b'}' | b'"' | b';'
        )
}

fn looks_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') => chars.next().map_or(false, |c| c.is_ascii_digit()),
        _ => false,
    }
}

fn parse_number(token: &str) -> Option<Value> {
    if let Some((num, den)) = token.split_once('/') {
        let ratio = num.parse::<f64>().ok()? / den.parse::<f64>().ok()?;
        return Number::from_f64(ratio).map(Value::Number);
    }
    let (body, exact_decimal) = match token.strip_suffix('M') {
        Some(body) => (body, true),
        None => (token.strip_suffix('N').unwrap_or(token), false),
    };
    let is_float = exact_decimal || body.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(int) = body.parse::<i64>() {
            return Some(Value::Number(int.into()));
        }
    }
    body.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn key_to_string(key: Value) -> String {
    match key {
        Value::String(text) => text,
        Value::Null => "nil".to_string(),
        other => other.to_string(),
    }
}
