//! The instruction decoder.
//!
//! Four encodings exist: long (2OP with operand kinds packed into the
//! opcode byte), short (0OP/1OP with the kind in bits 5-4), variable
//! (operand kinds in one or two trailing type bytes), and extended (V5+,
//! marker byte 0xBE then the real opcode). After the operands come an
//! optional store byte, an optional one- or two-byte branch specifier,
//! and for the two print opcodes an inline Z-string.

use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::opcode_tables::{self, OpcodeQuery};
use crate::text;
use std::fmt::{Display, Error as FmtError, Formatter, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    LargeConstant,
    SmallConstant,
    Variable,
    Omitted,
}

impl OperandType {
    pub fn from_bits(bits: u8) -> OperandType {
        match bits & 0x03 {
            0b00 => OperandType::LargeConstant,
            0b01 => OperandType::SmallConstant,
            0b10 => OperandType::Variable,
            _ => OperandType::Omitted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Variable,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandCount {
    OP0,
    OP1,
    OP2,
    VAR,
}

/// Branch polarity and target. Offsets 0 and 1 encode "return false" and
/// "return true"; anything else is relative to the byte after the branch
/// specifier, minus 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchInfo {
    pub on_true: bool,
    pub offset: i16,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: u8,
    pub ext_opcode: Option<u8>,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub operand_types: Vec<OperandType>,
    pub operands: Vec<u16>,
    pub store_var: Option<u8>,
    pub branch: Option<BranchInfo>,
    /// Decoded inline string for `print` / `print_ret`.
    pub text: Option<String>,
    /// Address the instruction was decoded from.
    pub addr: usize,
    /// Total encoded size in bytes.
    pub size: usize,
    version: u8,
}

impl Instruction {
    pub fn decode(mem: &Memory, addr: usize) -> Result<Instruction> {
        let version = mem.version();
        let mut offset = addr;
        let opcode_byte = mem.get_byte(offset)?;
        offset += 1;

        let form = match opcode_byte >> 6 {
            0b11 => {
                if opcode_byte == 0xBE && version >= 5 {
                    InstructionForm::Extended
                } else {
                    InstructionForm::Variable
                }
            }
            0b10 => InstructionForm::Short,
            _ => InstructionForm::Long,
        };

        let (opcode, ext_opcode, operand_count) = match form {
            InstructionForm::Long => (opcode_byte & 0x1F, None, OperandCount::OP2),
            InstructionForm::Short => {
                let count = if (opcode_byte >> 4) & 0x03 == 0x03 {
                    OperandCount::OP0
                } else {
                    OperandCount::OP1
                };
                (opcode_byte & 0x0F, None, count)
            }
            InstructionForm::Variable => {
                let count = if opcode_byte & 0x20 == 0 {
                    OperandCount::OP2
                } else {
                    OperandCount::VAR
                };
                (opcode_byte & 0x1F, None, count)
            }
            InstructionForm::Extended => {
                let ext = mem.get_byte(offset)?;
                offset += 1;
                (opcode_byte, Some(ext), OperandCount::VAR)
            }
        };

        let query = OpcodeQuery {
            opcode,
            ext_opcode,
            form,
            operand_count,
            version,
        };
        if !opcode_tables::is_known(&query) {
            return Err(Error::decode(
                addr,
                format!(
                    "unknown opcode {opcode:#04x} (form {form:?}, {operand_count:?}, ext {ext_opcode:?}) for V{version}"
                ),
            ));
        }

        // Operand kinds.
        let mut operand_types: Vec<OperandType> = Vec::new();
        match form {
            InstructionForm::Long => {
                for bit in [0x40, 0x20] {
                    operand_types.push(if opcode_byte & bit != 0 {
                        OperandType::Variable
                    } else {
                        OperandType::SmallConstant
                    });
                }
            }
            InstructionForm::Short => {
                if operand_count == OperandCount::OP1 {
                    operand_types.push(OperandType::from_bits((opcode_byte >> 4) & 0x03));
                }
            }
            InstructionForm::Variable | InstructionForm::Extended => {
                let type_byte_count =
                    if opcode_tables::has_double_type_byte(opcode, operand_count)
                        && form == InstructionForm::Variable
                    {
                        2
                    } else {
                        1
                    };
                let mut done = false;
                for _ in 0..type_byte_count {
                    let type_byte = mem.get_byte(offset)?;
                    offset += 1;
                    for slot in 0..4 {
                        let op_type = OperandType::from_bits(type_byte >> (6 - slot * 2));
                        if op_type == OperandType::Omitted {
                            done = true;
                        }
                        if done {
                            // Operand fetch halts at the first omitted slot.
                            continue;
                        }
                        operand_types.push(op_type);
                    }
                }
            }
        }

        // Operand values.
        let mut operands = Vec::with_capacity(operand_types.len());
        for op_type in &operand_types {
            match op_type {
                OperandType::LargeConstant => {
                    operands.push(mem.get_word(offset)?);
                    offset += 2;
                }
                OperandType::SmallConstant | OperandType::Variable => {
                    operands.push(mem.get_byte(offset)? as u16);
                    offset += 1;
                }
                OperandType::Omitted => unreachable!("omitted kinds are never recorded"),
            }
        }

        let store_var = if opcode_tables::stores_result(&query) {
            let var = mem.get_byte(offset)?;
            offset += 1;
            Some(var)
        } else {
            None
        };

        let branch = if opcode_tables::has_branch(&query) {
            let first = mem.get_byte(offset)?;
            offset += 1;
            let on_true = first & 0x80 != 0;
            let branch_offset = if first & 0x40 != 0 {
                // Single byte: 6-bit unsigned offset.
                (first & 0x3F) as i16
            } else {
                // Two bytes: 14-bit signed offset.
                let second = mem.get_byte(offset)?;
                offset += 1;
                let raw = (((first & 0x3F) as i16) << 8) | second as i16;
                if raw & 0x2000 != 0 {
                    raw | 0xC000u16 as i16
                } else {
                    raw
                }
            };
            Some(BranchInfo {
                on_true,
                offset: branch_offset,
            })
        } else {
            None
        };

        let inline_text = if opcode_tables::has_text(&query) {
            let (string, len) = text::decode_string(mem, offset)?;
            offset += len;
            Some(string)
        } else {
            None
        };

        Ok(Instruction {
            opcode,
            ext_opcode,
            form,
            operand_count,
            operand_types,
            operands,
            store_var,
            branch,
            text: inline_text,
            addr,
            size: offset - addr,
            version,
        })
    }

    pub fn name(&self) -> &'static str {
        opcode_tables::name(&OpcodeQuery {
            opcode: self.opcode,
            ext_opcode: self.ext_opcode,
            form: self.form,
            operand_count: self.operand_count,
            version: self.version,
        })
    }

    /// The effective opcode family once Variable-form 2OP encoding is
    /// unwrapped; the executor dispatches on this.
    pub fn family(&self) -> OperandCount {
        match self.form {
            InstructionForm::Long => OperandCount::OP2,
            InstructionForm::Extended => OperandCount::VAR,
            _ => self.operand_count,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), FmtError> {
        let mut line = String::from(self.name());
        for (i, op) in self.operands.iter().enumerate() {
            line.push_str(if i == 0 { " " } else { ", " });
            match self.operand_types[i] {
                OperandType::Variable => write!(line, "V{op:02x}")?,
                _ => write!(line, "#{op:04x}")?,
            }
        }
        if let Some(var) = self.store_var {
            write!(line, " -> V{var:02x}")?;
        }
        if let Some(branch) = &self.branch {
            write!(
                line,
                " [{}{}]",
                if branch.on_true { "TRUE" } else { "FALSE" },
                match branch.offset {
                    0 => " RFALSE".to_string(),
                    1 => " RTRUE".to_string(),
                    n => format!(" {n:+}"),
                }
            )?;
        }
        f.write_str(&line)
    }
}
