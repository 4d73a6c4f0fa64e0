/// Errors raised while turning log or disassembly text into structured data.
///
/// Any of these is fatal for the document being parsed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: malformed tag: {text}")]
    MalformedTag { line: usize, text: String },

    #[error("line {line}: closing tag </{name}> has no matching open tag")]
    UnbalancedClose { line: usize, name: String },

    #[error("line {line}: closing tag </{found}> does not match open tag <{expected}>")]
    MismatchedClose {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("<{tag}>: attribute {attribute}='{value}' is not a valid number")]
    InvalidNumber {
        tag: String,
        attribute: String,
        value: String,
    },

    #[error("bytecode line {line}: {message}")]
    Bytecode { line: usize, message: String },

    #[error("signature '{text}': {message}")]
    Signature { text: String, message: String },
}

impl ParseError {
    pub(crate) fn bytecode(line: usize, message: impl Into<String>) -> Self {
        ParseError::Bytecode {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn signature(text: &str, message: impl Into<String>) -> Self {
        ParseError::Signature {
            text: text.to_string(),
            message: message.into(),
        }
    }
}

/// Errors that abort the analysis of a single member.
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    /// The log describes an instruction kind the supplied bytecode does not have at that
    /// offset, which means the bytecode and the log do not belong together.
    #[error("{kind} at bci {offset} does not match bytecode instruction {instruction}")]
    SanityCheck {
        offset: u32,
        instruction: String,
        kind: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),
}
