use std::fmt;

use crate::opcodes::Opcode;
use crate::signature::MemberSignatureParts;

/// Decoded view of one class listing.
#[derive(Clone, Debug)]
pub struct ClassBytecode {
    pub name: String,
    pub source_file: Option<String>,
    pub version: Option<ClassVersion>,
    pub generics: Vec<(String, String)>,
    pub inner_classes: Vec<String>,
    pub members: Vec<MemberBytecode>,
}

impl ClassBytecode {
    pub fn member(&self, name: &str, param_types: &[String]) -> Option<&MemberBytecode> {
        self.members.iter().find(|member| {
            member.signature.member_name == name && member.signature.param_types == param_types
        })
    }
}

/// Bytecode of a single method, constructor or static initializer.
#[derive(Clone, Debug)]
pub struct MemberBytecode {
    pub signature: MemberSignatureParts,
    pub instructions: Vec<BytecodeInstruction>,
    pub line_table: LineTable,
    pub exception_table: ExceptionTable,
}

impl MemberBytecode {
    pub fn instruction_at(&self, offset: u32) -> Option<&BytecodeInstruction> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
            .map(|index| &self.instructions[index])
    }
}

/// Classfile major/minor version pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClassVersion {
    pub major: u16,
    pub minor: u16,
}

impl ClassVersion {
    /// Java release that introduced this major version.
    pub fn release_name(&self) -> &'static str {
        match self.major {
            45 => "1.1",
            46 => "1.2",
            47 => "1.3",
            48 => "1.4",
            49 => "1.5",
            50 => "1.6",
            51 => "1.7",
            52 => "1.8",
            53 => "9",
            _ => "Unknown",
        }
    }
}

/// One decoded instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BytecodeInstruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub parameters: Vec<Parameter>,
    pub comment: Option<String>,
}

impl BytecodeInstruction {
    pub fn new(offset: u32, opcode: Opcode) -> Self {
        Self {
            offset,
            opcode,
            parameters: Vec::new(),
            comment: None,
        }
    }

    pub fn switch_table(&self) -> Option<&SwitchTable> {
        self.parameters.iter().find_map(|parameter| match parameter {
            Parameter::Switch(table) => Some(table),
            _ => None,
        })
    }

    /// Number of listing lines the instruction occupies.
    pub fn display_lines(&self) -> usize {
        match self.switch_table() {
            Some(table) => 1 + 2 + table.cases.len(),
            None => 1,
        }
    }
}

impl fmt::Display for BytecodeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.offset, self.opcode)?;
        if let Some(table) = self.switch_table() {
            writeln!(f, " {{")?;
            for (value, target) in &table.cases {
                writeln!(f, "  {value}: {target}")?;
            }
            writeln!(f, "  default: {}", table.default)?;
            return write!(f, "}}");
        }
        let parameters = self
            .parameters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if !parameters.is_empty() {
            write!(f, " {}", parameters.join(", "))?;
        }
        if let Some(comment) = &self.comment {
            write!(f, " // {comment}")?;
        }
        Ok(())
    }
}

/// Typed instruction operand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Parameter {
    Numeric(i64),
    ConstantPool(u32),
    Text(String),
    Switch(SwitchTable),
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Numeric(value) => write!(f, "{value}"),
            Parameter::ConstantPool(index) => write!(f, "#{index}"),
            Parameter::Text(text) => f.write_str(text),
            Parameter::Switch(table) => write!(f, "{{ {} cases }}", table.cases.len()),
        }
    }
}

/// Case value to target offset pairs of a `tableswitch`/`lookupswitch`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SwitchTable {
    pub cases: Vec<(i32, u32)>,
    pub default: u32,
}

/// Bytecode offset to source line mapping of one member, ordered by offset.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineTable {
    entries: Vec<LineTableEntry>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineTableEntry {
    pub offset: u32,
    pub line: u32,
}

impl LineTable {
    pub fn new(mut entries: Vec<LineTableEntry>) -> Self {
        entries.sort_by_key(|entry| entry.offset);
        Self { entries }
    }

    pub fn entries(&self) -> &[LineTableEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source line of the nearest entry at or before `offset`.
    pub fn line_for_offset(&self, offset: u32) -> Option<u32> {
        self.entries
            .iter()
            .take_while(|entry| entry.offset <= offset)
            .last()
            .map(|entry| entry.line)
    }

    /// Lowest bytecode offset attributed to `line`.
    pub fn offset_for_line(&self, line: u32) -> Option<u32> {
        self.entries
            .iter()
            .filter(|entry| entry.line == line)
            .map(|entry| entry.offset)
            .min()
    }

    pub fn line_range(&self) -> Option<(u32, u32)> {
        let min = self.entries.iter().map(|entry| entry.line).min()?;
        let max = self.entries.iter().map(|entry| entry.line).max()?;
        Some((min, max))
    }
}

/// Exception handler ranges of one member in declaration order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExceptionTable {
    pub entries: Vec<ExceptionTableEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionTableEntry {
    pub from: u32,
    pub to: u32,
    pub target: u32,
    pub exception_type: String,
}

impl ExceptionTable {
    pub fn entry_covering(&self, offset: u32) -> Option<&ExceptionTableEntry> {
        self.entries
            .iter()
            .find(|entry| entry.from <= offset && offset <= entry.to)
    }
}
