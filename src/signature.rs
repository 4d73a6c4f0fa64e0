//! Normalization of member signatures from the disassembler and from the compilation log.
//!
//! Both dialects end up as [`MemberSignatureParts`] using dotted Java type names, `T[]`
//! arrays, `<init>` for constructors and `<clinit>` for static initializers.

use std::str::FromStr;

use jdescriptor::{MethodDescriptor, TypeDescriptor};
use serde::Serialize;

use crate::error::ParseError;
use crate::member::MemberKey;
use crate::tag_processor::Document;

pub const CONSTRUCTOR_NAME: &str = "<init>";
pub const STATIC_INITIALIZER_NAME: &str = "<clinit>";

const MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "static",
    "final",
    "synchronized",
    "native",
    "abstract",
    "strictfp",
    "default",
    "transient",
    "volatile",
    "bridge",
    "synthetic",
];

/// Normalized pieces of a member signature.
///
/// Identity (`==`) compares the member name and the parameter types only, as exact strings.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MemberSignatureParts {
    pub modifiers: Vec<String>,
    pub generics: Vec<(String, String)>,
    pub return_type: String,
    pub member_name: String,
    pub param_types: Vec<String>,
}

impl PartialEq for MemberSignatureParts {
    fn eq(&self, other: &Self) -> bool {
        self.member_name == other.member_name && self.param_types == other.param_types
    }
}

impl Eq for MemberSignatureParts {}

impl MemberSignatureParts {
    pub fn is_constructor(&self) -> bool {
        self.member_name == CONSTRUCTOR_NAME
    }

    pub fn is_static_initializer(&self) -> bool {
        self.member_name == STATIC_INITIALIZER_NAME
    }

    /// Parses a `javap` member header such as
    /// `public static <T extends java.lang.Number> T max(java.util.List<T>) throws java.io.IOException;`.
    pub fn from_disassembly(text: &str) -> Result<Self, ParseError> {
        let signature = text.trim().trim_end_matches(';').trim();
        if signature == "static {}" || signature == "static" {
            return Ok(Self {
                modifiers: vec!["static".to_string()],
                return_type: "void".to_string(),
                member_name: STATIC_INITIALIZER_NAME.to_string(),
                ..Self::default()
            });
        }

        let open = find_top_level(signature, '(')
            .ok_or_else(|| ParseError::signature(text, "missing parameter list"))?;
        let close = signature[open..]
            .find(')')
            .map(|index| open + index)
            .ok_or_else(|| ParseError::signature(text, "unterminated parameter list"))?;

        let head = split_top_level(&signature[..open], char::is_whitespace);
        let mut tokens = head.iter().map(|token| token.trim()).peekable();
        let mut parts = Self::default();
        while let Some(token) = tokens.next_if(|token| MODIFIERS.contains(token)) {
            parts.modifiers.push(token.to_string());
        }
        if let Some(clause) = tokens.next_if(|token| token.starts_with('<')) {
            parts.generics = parse_generic_clause(clause);
        }
        let rest: Vec<&str> = tokens.collect();
        match rest.as_slice() {
            [_class_name] => {
                parts.return_type = "void".to_string();
                parts.member_name = CONSTRUCTOR_NAME.to_string();
            }
            [return_type, name] => {
                parts.return_type = normalize_source_type(return_type);
                parts.member_name = (*name).to_string();
            }
            _ => return Err(ParseError::signature(text, "cannot find return type and name")),
        }

        parts.param_types = split_top_level(&signature[open + 1..close], |c| c == ',')
            .into_iter()
            .map(|param| param.trim())
            .filter(|param| !param.is_empty())
            .map(normalize_source_type)
            .collect();
        Ok(parts)
    }

    /// Parses the log dialect `holder name (descriptor)return`, ignoring the holder.
    pub fn from_log(text: &str) -> Result<Self, ParseError> {
        parse_log_signature(text).map(|(_, parts)| parts)
    }
}

/// Parses `java/lang/String indexOf (Ljava/lang/String;I)I` into holder class and parts.
pub fn parse_log_signature(text: &str) -> Result<(String, MemberSignatureParts), ParseError> {
    let trimmed = text.trim();
    let (holder, rest) = trimmed
        .split_once(char::is_whitespace)
        .ok_or_else(|| ParseError::signature(text, "missing member name"))?;
    let rest = rest.trim();
    let open = rest
        .find('(')
        .ok_or_else(|| ParseError::signature(text, "missing descriptor"))?;
    let name = rest[..open].trim();
    if name.is_empty() {
        return Err(ParseError::signature(text, "missing member name"));
    }
    let descriptor = MethodDescriptor::from_str(rest[open..].trim())
        .map_err(|err| ParseError::signature(text, err.to_string()))?;

    let parts = MemberSignatureParts {
        modifiers: Vec::new(),
        generics: Vec::new(),
        return_type: java_type_name(descriptor.return_type()),
        member_name: name.to_string(),
        param_types: descriptor
            .parameter_types()
            .iter()
            .map(java_type_name)
            .collect(),
    };
    Ok((holder.replace('/', "."), parts))
}

/// A `method` declaration resolved through its dictionary.
#[derive(Clone, Debug)]
pub struct ResolvedMethod {
    pub holder: String,
    pub parts: MemberSignatureParts,
}

impl ResolvedMethod {
    pub fn key(&self) -> MemberKey {
        MemberKey::new(&self.holder, &self.parts)
    }
}

/// Builds the signature of the method declared as `method_id`, resolving its holder,
/// return and argument IDs through the same dictionary.
pub fn from_dictionary(document: &Document, method_id: &str) -> Option<ResolvedMethod> {
    let tree = &document.tree;
    let dictionary = &document.dictionary;
    let method = tree.get(dictionary.method(method_id)?);

    let holder_id = method.attribute("holder")?;
    let holder = tree.get(dictionary.klass(holder_id)?).attribute("name")?;
    let resolve = |id: &str| {
        dictionary
            .type_or_klass(id)
            .and_then(|tag| tree.get(tag).attribute("name"))
            .map(log_type_name)
    };
    let return_type = match method.attribute("return") {
        Some(id) => resolve(id)?,
        None => "void".to_string(),
    };
    let mut param_types = Vec::new();
    for id in method.attribute("arguments").unwrap_or("").split_whitespace() {
        param_types.push(resolve(id)?);
    }

    Some(ResolvedMethod {
        holder: log_type_name(holder),
        parts: MemberSignatureParts {
            modifiers: Vec::new(),
            generics: Vec::new(),
            return_type,
            member_name: method.attribute("name")?.to_string(),
            param_types,
        },
    })
}

/// Whether the dictionary's `method_id` denotes `member`.
pub fn matches(member: &MemberKey, document: &Document, method_id: &str) -> bool {
    match from_dictionary(document, method_id) {
        Some(resolved) => {
            resolved.holder == member.class_name
                && resolved.parts.member_name == member.member_name
                && resolved.parts.param_types == member.param_types
        }
        None => false,
    }
}

/// Converts a log `klass`/`type` name (`java/lang/String`, `[Ljava/lang/String;`, `[I`,
/// `int`) into a dotted Java type name.
pub fn log_type_name(name: &str) -> String {
    let dimensions = name.chars().take_while(|c| *c == '[').count();
    if dimensions == 0 {
        return name.replace('/', ".");
    }
    let component = &name[dimensions..];
    let base = match component {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        other => other
            .strip_prefix('L')
            .and_then(|value| value.strip_suffix(';'))
            .unwrap_or(other)
            .replace('/', "."),
    };
    format!("{base}{}", "[]".repeat(dimensions))
}

fn java_type_name(descriptor: &TypeDescriptor) -> String {
    match descriptor {
        TypeDescriptor::Object(name) => name.replace('/', "."),
        TypeDescriptor::Array(component, dimensions) => {
            let mut name = java_type_name(component);
            for _ in 0..*dimensions {
                name.push_str("[]");
            }
            name
        }
        TypeDescriptor::Byte => "byte".to_string(),
        TypeDescriptor::Char => "char".to_string(),
        TypeDescriptor::Double => "double".to_string(),
        TypeDescriptor::Float => "float".to_string(),
        TypeDescriptor::Integer => "int".to_string(),
        TypeDescriptor::Long => "long".to_string(),
        TypeDescriptor::Short => "short".to_string(),
        TypeDescriptor::Boolean => "boolean".to_string(),
        TypeDescriptor::Void => "void".to_string(),
    }
}

fn normalize_source_type(text: &str) -> String {
    let text = text.trim();
    match text.strip_suffix("...") {
        Some(component) => format!("{}[]", component.trim()),
        None => text.to_string(),
    }
}

/// `<K, V extends java.lang.Comparable<V>>` into ordered name/bound pairs.
fn parse_generic_clause(clause: &str) -> Vec<(String, String)> {
    let inner = clause
        .strip_prefix('<')
        .and_then(|value| value.strip_suffix('>'))
        .unwrap_or(clause);
    split_top_level(inner, |c| c == ',')
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(" extends ") {
            Some((name, bound)) => (name.trim().to_string(), bound.trim().to_string()),
            None => (entry.to_string(), "java.lang.Object".to_string()),
        })
        .collect()
}

fn find_top_level(text: &str, target: char) -> Option<usize> {
    let mut depth = 0usize;
    for (index, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if c == target && depth == 0 => return Some(index),
            _ => {}
        }
    }
    None
}

/// Splits on separator characters that are not nested inside `<...>`.
pub(crate) fn split_top_level(text: &str, is_separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 && is_separator(c) => {
                if index > start {
                    pieces.push(&text[start..index]);
                }
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}
