//! Class-level decoding of `javap -c -l -p -s -v` listings.

use tracing::debug;

use crate::bytecode;
use crate::error::ParseError;
use crate::ir::{
    ClassBytecode, ClassVersion, ExceptionTable, ExceptionTableEntry, LineTable, LineTableEntry,
    MemberBytecode,
};
use crate::signature::MemberSignatureParts;

const CLASS_KEYWORDS: &[&str] = &["class", "interface", "enum", "@interface", "record"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Section {
    Header,
    ConstantPool,
    Member,
    Code,
    LineNumbers,
    Exceptions,
    Skipped,
    Trailer,
    InnerClasses,
}

/// Member being collected; its code lines are decoded when the member ends.
struct PendingMember {
    signature: MemberSignatureParts,
    code: Vec<(usize, String)>,
    lines: Vec<LineTableEntry>,
    exceptions: Vec<ExceptionTableEntry>,
}

/// Decodes a whole class listing.
pub fn decode_class(text: &str) -> Result<ClassBytecode, ParseError> {
    let mut class = ClassBytecode {
        name: String::new(),
        source_file: None,
        version: None,
        generics: Vec::new(),
        inner_classes: Vec::new(),
        members: Vec::new(),
    };
    let mut minor = None;
    let mut major = None;
    let mut section = Section::Header;
    let mut pending: Option<PendingMember> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        if matches!(section, Section::Header | Section::ConstantPool) {
            if let Some(value) = trimmed.strip_prefix("minor version:") {
                minor = Some(parse_version(value, line_number)?);
            } else if let Some(value) = trimmed.strip_prefix("major version:") {
                major = Some(parse_version(value, line_number)?);
            } else if trimmed == "Constant pool:" {
                section = Section::ConstantPool;
            } else if let Some(value) = trimmed.strip_prefix("Compiled from") {
                class.source_file = Some(value.trim().trim_matches('"').to_string());
            } else if trimmed == "{" {
                section = Section::Member;
            } else if section == Section::Header {
                if let Some(name) = class_name(trimmed) {
                    class.name = name;
                    if trimmed.ends_with('{') {
                        section = Section::Member;
                    }
                }
            }
            continue;
        }

        // Only the class body's closing brace starts in the first column.
        if section != Section::Trailer && section != Section::InnerClasses && raw.trim_end() == "}" {
            finish_member(&mut class, pending.take())?;
            section = Section::Trailer;
            continue;
        }

        if matches!(section, Section::Trailer | Section::InnerClasses) {
            if let Some(comment) = trimmed.strip_prefix("Signature:") {
                if let Some((_, signature)) = comment.split_once("//") {
                    class.generics = parse_generics_map(signature.trim());
                }
                section = Section::Trailer;
            } else if let Some(value) = trimmed.strip_prefix("SourceFile:") {
                class.source_file = Some(value.trim().trim_matches('"').to_string());
                section = Section::Trailer;
            } else if trimmed == "InnerClasses:" {
                section = Section::InnerClasses;
            } else if section == Section::InnerClasses {
                if let Some((name, outer)) = inner_class_name(trimmed) {
                    let nested = match outer {
                        Some(outer) => outer == class.name,
                        None => name.starts_with(&format!("{}$", class.name)),
                    };
                    if nested && name != class.name && !class.inner_classes.contains(&name) {
                        class.inner_classes.push(name);
                    }
                }
            }
            continue;
        }

        if is_member_header(raw) {
            finish_member(&mut class, pending.take())?;
            section = Section::Member;
            if trimmed.contains('(') || trimmed.starts_with("static {}") {
                let signature = MemberSignatureParts::from_disassembly(trimmed)?;
                pending = Some(PendingMember {
                    signature,
                    code: Vec::new(),
                    lines: Vec::new(),
                    exceptions: Vec::new(),
                });
            }
            continue;
        }

        if let Some(next) = section_header(trimmed) {
            section = next;
            continue;
        }

        let Some(member) = pending.as_mut() else {
            continue;
        };
        match section {
            Section::Code => member.code.push((line_number, trimmed.to_string())),
            Section::LineNumbers => {
                if let Some(entry) = parse_line_number(trimmed, line_number)? {
                    member.lines.push(entry);
                }
            }
            Section::Exceptions => {
                if let Some(entry) = parse_exception_entry(trimmed, line_number)? {
                    member.exceptions.push(entry);
                }
            }
            _ => {}
        }
    }

    finish_member(&mut class, pending.take())?;
    if let (Some(major), Some(minor)) = (major, minor) {
        class.version = Some(ClassVersion { major, minor });
    }
    if class.name.is_empty() {
        return Err(ParseError::bytecode(0, "no class declaration found"));
    }
    debug!(class = %class.name, members = class.members.len(), "decoded class listing");
    Ok(class)
}

fn finish_member(class: &mut ClassBytecode, pending: Option<PendingMember>) -> Result<(), ParseError> {
    let Some(member) = pending else {
        return Ok(());
    };
    let first_line = member.code.first().map(|(line, _)| *line).unwrap_or(0);
    let code = member
        .code
        .iter()
        .map(|(_, line)| line.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let instructions = bytecode::decode(&code).map_err(|err| match err {
        ParseError::Bytecode { line, message } => ParseError::Bytecode {
            line: first_line + line.saturating_sub(1),
            message,
        },
        other => other,
    })?;
    class.members.push(MemberBytecode {
        signature: member.signature,
        instructions,
        line_table: LineTable::new(member.lines),
        exception_table: ExceptionTable {
            entries: member.exceptions,
        },
    });
    Ok(())
}

/// Member declarations are indented by exactly two spaces inside the class body.
fn is_member_header(raw: &str) -> bool {
    let indent = raw.len() - raw.trim_start().len();
    indent == 2 && raw.trim_end().ends_with(';')
}

fn section_header(trimmed: &str) -> Option<Section> {
    match trimmed {
        "Code:" => Some(Section::Code),
        "LineNumberTable:" => Some(Section::LineNumbers),
        "Exception table:" => Some(Section::Exceptions),
        "LocalVariableTable:"
        | "LocalVariableTypeTable:"
        | "RuntimeVisibleAnnotations:"
        | "RuntimeInvisibleAnnotations:"
        | "RuntimeVisibleParameterAnnotations:"
        | "AnnotationDefault:"
        | "MethodParameters:"
        | "Exceptions:" => Some(Section::Skipped),
        _ if trimmed.starts_with("StackMapTable:") => Some(Section::Skipped),
        _ if trimmed.starts_with("descriptor:")
            || trimmed.starts_with("flags:")
            || trimmed.starts_with("Signature:")
            || trimmed.starts_with("Deprecated:") =>
        {
            Some(Section::Member)
        }
        _ => None,
    }
}

fn class_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        if CLASS_KEYWORDS.contains(&token) {
            let name = tokens.next()?;
            let name = name.split('<').next().unwrap_or(name);
            return Some(name.trim_end_matches('{').to_string());
        }
    }
    None
}

fn parse_version(value: &str, line_number: usize) -> Result<u16, ParseError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| ParseError::bytecode(line_number, format!("invalid class version: {value}")))
}

/// `line 12: 4` into an entry for offset 4.
fn parse_line_number(trimmed: &str, line_number: usize) -> Result<Option<LineTableEntry>, ParseError> {
    let Some(rest) = trimmed.strip_prefix("line ") else {
        return Ok(None);
    };
    let (line, offset) = rest
        .split_once(':')
        .ok_or_else(|| ParseError::bytecode(line_number, format!("invalid line number row: {trimmed}")))?;
    let parse = |value: &str| {
        value.trim().parse::<u32>().map_err(|_| {
            ParseError::bytecode(line_number, format!("invalid line number row: {trimmed}"))
        })
    };
    Ok(Some(LineTableEntry {
        offset: parse(offset)?,
        line: parse(line)?,
    }))
}

/// `0  5  8  Class java/lang/Exception` rows; the column header row is skipped.
fn parse_exception_entry(
    trimmed: &str,
    line_number: usize,
) -> Result<Option<ExceptionTableEntry>, ParseError> {
    if trimmed.starts_with("from") {
        return Ok(None);
    }
    let mut columns = trimmed.split_whitespace();
    let mut next_offset = || {
        columns
            .next()
            .and_then(|value| value.parse::<u32>().ok())
            .ok_or_else(|| {
                ParseError::bytecode(line_number, format!("invalid exception table row: {trimmed}"))
            })
    };
    let from = next_offset()?;
    let to = next_offset()?;
    let target = next_offset()?;
    let exception_type = columns.collect::<Vec<_>>().join(" ");
    Ok(Some(ExceptionTableEntry {
        from,
        to,
        target,
        exception_type,
    }))
}

/// Inner class name and declaring class from an `InnerClasses:` row comment, e.g.
/// `// Inner=class com/example/Foo$Inner of class com/example/Foo`.
/// Anonymous and local classes carry no declaring class.
fn inner_class_name(trimmed: &str) -> Option<(String, Option<String>)> {
    let (_, comment) = trimmed.split_once("//")?;
    let start = comment.find("class ")? + "class ".len();
    let rest = &comment[start..];
    let (name, outer) = match rest.split_once(" of ") {
        Some((name, outer)) => (name, outer.trim().strip_prefix("class ")),
        None => (rest, None),
    };
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((
        name.replace('/', "."),
        outer.map(|outer| outer.trim().replace('/', ".")),
    ))
}

/// Parses a generic signature prefix such as
/// `<K:Ljava/lang/Object;V::Ljava/lang/Comparable<TV;>;>Ljava/lang/Object;`.
pub fn parse_generics_map(signature: &str) -> Vec<(String, String)> {
    let Some(body) = signature.strip_prefix('<') else {
        return Vec::new();
    };
    let mut generics = Vec::new();
    let mut rest = body;
    while !rest.is_empty() && !rest.starts_with('>') {
        let Some(colon) = rest.find(':') else {
            break;
        };
        let name = rest[..colon].to_string();
        rest = &rest[colon..];
        let mut bounds = Vec::new();
        while let Some(after) = rest.strip_prefix(':') {
            rest = after;
            if rest.starts_with(':') {
                continue;
            }
            let length = field_signature_length(rest);
            if length == 0 {
                break;
            }
            bounds.push(signature_to_java(&rest[..length]));
            rest = &rest[length..];
        }
        if bounds.is_empty() {
            bounds.push("java.lang.Object".to_string());
        }
        generics.push((name, bounds.join(" & ")));
    }
    generics
}

/// Length of the field type signature at the start of `text`.
fn field_signature_length(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() && bytes[index] == b'[' {
        index += 1;
    }
    match bytes.get(index) {
        Some(b'L') | Some(b'T') => {
            let mut depth = 0usize;
            for (offset, byte) in bytes[index..].iter().enumerate() {
                match byte {
                    b'<' => depth += 1,
                    b'>' => depth = depth.saturating_sub(1),
                    b';' if depth == 0 => return index + offset + 1,
                    _ => {}
                }
            }
            0
        }
        Some(_) => index + 1,
        None => 0,
    }
}

/// `Ljava/util/List<TT;>;` into `java.util.List<T>`.
fn signature_to_java(signature: &str) -> String {
    let dimensions = signature.chars().take_while(|c| *c == '[').count();
    let component = &signature[dimensions..];
    let base = if let Some(variable) = component.strip_prefix('T') {
        variable.trim_end_matches(';').to_string()
    } else if let Some(class) = component.strip_prefix('L') {
        let class = class.strip_suffix(';').unwrap_or(class);
        match class.split_once('<') {
            Some((outer, arguments)) => {
                let arguments = arguments.strip_suffix('>').unwrap_or(arguments);
                format!(
                    "{}<{}>",
                    outer.replace('/', "."),
                    type_arguments(arguments).join(", ")
                )
            }
            None => class.replace('/', "."),
        }
    } else {
        crate::signature::log_type_name(&format!("[{component}"))
            .trim_end_matches("[]")
            .to_string()
    };
    format!("{base}{}", "[]".repeat(dimensions))
}

fn type_arguments(text: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('*') {
            arguments.push("?".to_string());
            rest = after;
            continue;
        }
        let (prefix, body) = match rest.as_bytes()[0] {
            b'+' => ("? extends ", &rest[1..]),
            b'-' => ("? super ", &rest[1..]),
            _ => ("", rest),
        };
        let length = field_signature_length(body);
        if length == 0 {
            break;
        }
        arguments.push(format!("{prefix}{}", signature_to_java(&body[..length])));
        rest = &body[length..];
    }
    arguments
}
