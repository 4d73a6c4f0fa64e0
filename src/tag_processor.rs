//! Incremental line-at-a-time builder of tag trees from compilation log text.

use std::collections::BTreeMap;

use tracing::trace;

use crate::dictionary::ParseDictionary;
use crate::error::ParseError;
use crate::tag::{Tag, TagId, TagKind, TagTree};

/// A completed top-level record together with its declarations.
#[derive(Debug, Default)]
pub struct Document {
    pub tree: TagTree,
    pub dictionary: ParseDictionary,
}

impl Document {
    pub fn root(&self) -> &Tag {
        self.tree.get(self.tree.root())
    }
}

/// Builds [`Document`]s from log lines, one top-level record at a time.
#[derive(Debug, Default)]
pub struct TagProcessor {
    current: Document,
    open: Vec<TagId>,
    line_number: usize,
}

enum Line<'a> {
    Open(&'a str),
    SelfClosing(&'a str),
    Close(&'a str),
}

impl TagProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth of the currently open tag stack.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Consumes one entity-decoded line.
    ///
    /// Returns the finished document when a top-level tag has just been closed.
    pub fn process_line(&mut self, line: &str) -> Result<Option<Document>, ParseError> {
        self.line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if !trimmed.starts_with('<') {
            if let Some(open) = self.open.last().copied() {
                self.current.tree.get_mut(open).text.push(trimmed.to_string());
            }
            return Ok(None);
        }
        if trimmed.starts_with("<?") || trimmed.starts_with("<!") {
            return Ok(None);
        }

        match classify(trimmed).ok_or_else(|| self.malformed(trimmed))? {
            Line::Close(name) => self.close(name.trim()),
            Line::Open(body) => {
                let id = self.open_tag(body, false, trimmed)?;
                self.open.push(id);
                Ok(None)
            }
            Line::SelfClosing(body) => {
                self.open_tag(body, true, trimmed)?;
                if self.open.is_empty() {
                    Ok(Some(std::mem::take(&mut self.current)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn open_tag(&mut self, body: &str, self_closing: bool, line: &str) -> Result<TagId, ParseError> {
        let (name, attributes) = parse_tag_body(body).ok_or_else(|| self.malformed(line))?;
        let tag = Tag {
            kind: TagKind::from_name(&name),
            name,
            attributes,
            children: Vec::new(),
            parent: self.open.last().copied(),
            self_closing,
            text: Vec::new(),
        };
        let id = self.current.tree.push(tag);
        self.current.dictionary.declare(&self.current.tree, id);
        Ok(id)
    }

    fn close(&mut self, name: &str) -> Result<Option<Document>, ParseError> {
        let Some(open) = self.open.pop() else {
            return Err(ParseError::UnbalancedClose {
                line: self.line_number,
                name: name.to_string(),
            });
        };
        let expected = &self.current.tree.get(open).name;
        if expected != name {
            return Err(ParseError::MismatchedClose {
                line: self.line_number,
                expected: expected.clone(),
                found: name.to_string(),
            });
        }
        if self.open.is_empty() {
            let document = std::mem::take(&mut self.current);
            trace!(tag = %name, tags = document.tree.len(), "completed top-level tag");
            Ok(Some(document))
        } else {
            Ok(None)
        }
    }

    fn malformed(&self, line: &str) -> ParseError {
        ParseError::MalformedTag {
            line: self.line_number,
            text: line.to_string(),
        }
    }
}

fn classify(line: &str) -> Option<Line<'_>> {
    if let Some(rest) = line.strip_prefix("</") {
        return rest.strip_suffix('>').map(Line::Close);
    }
    let inner = line.strip_prefix('<')?;
    if let Some(body) = inner.strip_suffix("/>") {
        return Some(Line::SelfClosing(body));
    }
    inner.strip_suffix('>').map(Line::Open)
}

fn parse_tag_body(body: &str) -> Option<(String, BTreeMap<String, String>)> {
    let body = body.trim();
    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() || !name.chars().all(is_name_char) {
        return None;
    }
    let attributes = parse_attributes(&body[name_end..])?;
    Some((name.to_string(), attributes))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}

/// Parses `key='value'` pairs. A quote only ends a value when it is followed by
/// whitespace or the end of the tag, so decoded apostrophes inside values survive.
fn parse_attributes(text: &str) -> Option<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let equals = rest.find('=')?;
        let key = rest[..equals].trim();
        if key.is_empty() || !key.chars().all(is_name_char) {
            return None;
        }
        let after = rest[equals + 1..].trim_start();
        let quote = after.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let value_text = &after[1..];
        let end = closing_quote(value_text, quote)?;
        attributes.insert(key.to_string(), value_text[..end].to_string());
        rest = value_text[end + 1..].trim_start();
    }
    Some(attributes)
}

fn closing_quote(text: &str, quote: char) -> Option<usize> {
    let mut fallback = None;
    for (index, c) in text.char_indices() {
        if c != quote {
            continue;
        }
        let next = text[index + 1..].chars().next();
        match next {
            None => return Some(index),
            Some(next) if next.is_whitespace() => return Some(index),
            _ => {
                if fallback.is_none() {
                    fallback = Some(index);
                }
            }
        }
    }
    fallback
}

/// Decodes the XML entities HotSpot escapes in log output.
pub fn decode_entities(line: &str) -> String {
    if !line.contains('&') {
        return line.to_string();
    }
    line.replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
