//! Decoding of `javap -c` instruction listings into typed instructions.

use crate::error::ParseError;
use crate::ir::{BytecodeInstruction, Parameter, SwitchTable};
use crate::opcodes::Opcode;

/// Decodes the instruction lines of one member's `Code:` block.
pub fn decode(text: &str) -> Result<Vec<BytecodeInstruction>, ParseError> {
    let mut instructions: Vec<BytecodeInstruction> = Vec::new();
    let mut open_switch: Option<BytecodeInstruction> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(mut switch) = open_switch.take() {
            if line == "}" {
                push_instruction(&mut instructions, switch, line_number)?;
            } else {
                add_switch_case(&mut switch, line, line_number)?;
                open_switch = Some(switch);
            }
            continue;
        }

        if line.starts_with("stack=") {
            continue;
        }

        let instruction = parse_instruction(line, line_number)?;
        if instruction.opcode.is_switch() {
            open_switch = Some(instruction);
        } else {
            push_instruction(&mut instructions, instruction, line_number)?;
        }
    }

    if open_switch.is_some() {
        return Err(ParseError::bytecode(
            text.lines().count(),
            "unterminated switch table",
        ));
    }
    Ok(instructions)
}

fn push_instruction(
    instructions: &mut Vec<BytecodeInstruction>,
    instruction: BytecodeInstruction,
    line_number: usize,
) -> Result<(), ParseError> {
    if let Some(previous) = instructions.last() {
        if instruction.offset <= previous.offset {
            return Err(ParseError::bytecode(
                line_number,
                format!(
                    "offset {} does not follow offset {}",
                    instruction.offset, previous.offset
                ),
            ));
        }
    }
    instructions.push(instruction);
    Ok(())
}

fn parse_instruction(line: &str, line_number: usize) -> Result<BytecodeInstruction, ParseError> {
    let (offset_text, rest) = line
        .split_once(':')
        .ok_or_else(|| ParseError::bytecode(line_number, format!("not an instruction: {line}")))?;
    let offset = offset_text
        .trim()
        .parse::<u32>()
        .map_err(|_| ParseError::bytecode(line_number, format!("invalid offset: {offset_text}")))?;

    let (body, comment) = match rest.split_once("//") {
        Some((body, comment)) => (body.trim(), Some(comment.trim().to_string())),
        None => (rest.trim(), None),
    };
    let (mnemonic, operands) = match body.split_once(char::is_whitespace) {
        Some((mnemonic, operands)) => (mnemonic, operands.trim()),
        None => (body, ""),
    };
    let opcode = Opcode::from_mnemonic(mnemonic)
        .ok_or_else(|| ParseError::bytecode(line_number, format!("unknown mnemonic: {mnemonic}")))?;

    let parameters = if opcode.is_switch() {
        if !operands.starts_with('{') {
            return Err(ParseError::bytecode(line_number, "switch without case table"));
        }
        vec![Parameter::Switch(SwitchTable::default())]
    } else {
        parse_operands(opcode, operands, line_number)?
    };

    Ok(BytecodeInstruction {
        offset,
        opcode,
        parameters,
        comment: comment.filter(|comment| !comment.is_empty()),
    })
}

fn parse_operands(
    opcode: Opcode,
    operands: &str,
    line_number: usize,
) -> Result<Vec<Parameter>, ParseError> {
    let tokens: Vec<&str> = operands
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .collect();

    if opcode == Opcode::Newarray {
        return Ok(tokens
            .iter()
            .map(|token| Parameter::Text((*token).to_string()))
            .collect());
    }

    let mut parameters = Vec::with_capacity(tokens.len());
    for token in &tokens {
        let parameter = if let Some(index) = token.strip_prefix('#') {
            let index = index.parse::<u32>().map_err(|_| {
                ParseError::bytecode(line_number, format!("invalid constant pool index: {token}"))
            })?;
            Parameter::ConstantPool(index)
        } else if let Ok(value) = token.parse::<i64>() {
            Parameter::Numeric(value)
        } else {
            Parameter::Text((*token).to_string())
        };
        parameters.push(parameter);
    }

    let numeric = parameters
        .iter()
        .filter(|parameter| matches!(parameter, Parameter::Numeric(_)))
        .count();
    if opcode == Opcode::Iinc && (parameters.len() != 2 || numeric != 2) {
        return Err(ParseError::bytecode(
            line_number,
            format!("iinc expects slot and delta, found '{operands}'"),
        ));
    }
    if opcode.is_branch() && (parameters.len() != 1 || numeric != 1) {
        return Err(ParseError::bytecode(
            line_number,
            format!("{opcode} expects one target offset, found '{operands}'"),
        ));
    }
    if opcode.is_constant_pool_load()
        && !matches!(parameters.first(), Some(Parameter::ConstantPool(_)))
    {
        return Err(ParseError::bytecode(
            line_number,
            format!("{opcode} expects a constant pool index, found '{operands}'"),
        ));
    }
    Ok(parameters)
}

fn add_switch_case(
    switch: &mut BytecodeInstruction,
    line: &str,
    line_number: usize,
) -> Result<(), ParseError> {
    let (key, target) = line
        .split_once(':')
        .ok_or_else(|| ParseError::bytecode(line_number, format!("invalid switch case: {line}")))?;
    let target = target
        .trim()
        .parse::<u32>()
        .map_err(|_| ParseError::bytecode(line_number, format!("invalid switch target: {line}")))?;
    let Some(Parameter::Switch(table)) = switch.parameters.first_mut() else {
        return Err(ParseError::bytecode(line_number, "switch table missing"));
    };
    let key = key.trim();
    if key == "default" {
        table.default = target;
    } else {
        let value = key
            .parse::<i32>()
            .map_err(|_| ParseError::bytecode(line_number, format!("invalid switch case: {line}")))?;
        table.cases.push((value, target));
    }
    Ok(())
}
