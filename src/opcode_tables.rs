//! Per-version opcode classification tables.
//!
//! The decoder needs four facts about an opcode before it can finish
//! reading an instruction: its name, whether it stores a result, whether
//! a branch specifier follows, and whether inline text follows. All four
//! depend on the story version; opcodes that exist only in some versions
//! are unknown elsewhere and decoding them is a fatal error.

use crate::instruction::{InstructionForm, OperandCount};

/// Classify one opcode query. `opcode` is the masked opcode number,
/// `ext_opcode` the byte after 0xBE for extended instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeQuery {
    pub opcode: u8,
    pub ext_opcode: Option<u8>,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub version: u8,
}

impl OpcodeQuery {
    /// A Variable-form instruction with bit 5 clear executes a 2OP-family
    /// opcode; this resolves which family table applies.
    fn family(&self) -> OperandCount {
        match self.form {
            InstructionForm::Long => OperandCount::OP2,
            InstructionForm::Extended => OperandCount::VAR,
            _ => self.operand_count,
        }
    }
}

pub fn name(q: &OpcodeQuery) -> &'static str {
    if q.form == InstructionForm::Extended {
        return ext_name(q.ext_opcode.unwrap_or(0xFF), q.version);
    }
    match q.family() {
        OperandCount::OP0 => zerop_name(q.opcode, q.version),
        OperandCount::OP1 => oneop_name(q.opcode, q.version),
        OperandCount::OP2 => twoop_name(q.opcode, q.version),
        OperandCount::VAR => var_name(q.opcode, q.version),
    }
}

pub fn is_known(q: &OpcodeQuery) -> bool {
    name(q) != UNKNOWN
}

const UNKNOWN: &str = "?";

fn zerop_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "rtrue",
        0x01 => "rfalse",
        0x02 => "print",
        0x03 => "print_ret",
        0x04 => "nop",
        0x05 if version <= 4 => "save",
        0x06 if version <= 4 => "restore",
        0x07 => "restart",
        0x08 => "ret_popped",
        0x09 if version <= 4 => "pop",
        0x09 => "catch",
        0x0A => "quit",
        0x0B => "new_line",
        0x0C if version == 3 => "show_status",
        0x0D if version >= 3 => "verify",
        0x0F if version >= 5 => "piracy",
        _ => UNKNOWN,
    }
}

fn oneop_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => "jz",
        0x01 => "get_sibling",
        0x02 => "get_child",
        0x03 => "get_parent",
        0x04 => "get_prop_len",
        0x05 => "inc",
        0x06 => "dec",
        0x07 => "print_addr",
        0x08 if version >= 4 => "call_1s",
        0x09 => "remove_obj",
        0x0A => "print_obj",
        0x0B => "ret",
        0x0C => "jump",
        0x0D => "print_paddr",
        0x0E => "load",
        0x0F if version <= 4 => "not",
        0x0F => "call_1n",
        _ => UNKNOWN,
    }
}

fn twoop_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x01 => "je",
        0x02 => "jl",
        0x03 => "jg",
        0x04 => "dec_chk",
        0x05 => "inc_chk",
        0x06 => "jin",
        0x07 => "test",
        0x08 => "or",
        0x09 => "and",
        0x0A => "test_attr",
        0x0B => "set_attr",
        0x0C => "clear_attr",
        0x0D => "store",
        0x0E => "insert_obj",
        0x0F => "loadw",
        0x10 => "loadb",
        0x11 => "get_prop",
        0x12 => "get_prop_addr",
        0x13 => "get_next_prop",
        0x14 => "add",
        0x15 => "sub",
        0x16 => "mul",
        0x17 => "div",
        0x18 => "mod",
        0x19 if version >= 4 => "call_2s",
        0x1A if version >= 5 => "call_2n",
        0x1B if version >= 5 => "set_colour",
        0x1C if version >= 5 => "throw",
        _ => UNKNOWN,
    }
}

fn var_name(opcode: u8, version: u8) -> &'static str {
    match opcode {
        0x00 => {
            if version <= 3 {
                "call"
            } else {
                "call_vs"
            }
        }
        0x01 => "storew",
        0x02 => "storeb",
        0x03 => "put_prop",
        0x04 => {
            if version <= 4 {
                "sread"
            } else {
                "aread"
            }
        }
        0x05 => "print_char",
        0x06 => "print_num",
        0x07 => "random",
        0x08 => "push",
        0x09 => "pull",
        0x0A if version >= 3 => "split_window",
        0x0B if version >= 3 => "set_window",
        0x0C if version >= 4 => "call_vs2",
        0x0D if version >= 4 => "erase_window",
        0x0E if version >= 4 => "erase_line",
        0x0F if version >= 4 => "set_cursor",
        0x10 if version >= 4 => "get_cursor",
        0x11 if version >= 4 => "set_text_style",
        0x12 if version >= 4 => "buffer_mode",
        0x13 if version >= 3 => "output_stream",
        0x14 if version >= 3 => "input_stream",
        0x15 if version >= 3 => "sound_effect",
        0x16 if version >= 4 => "read_char",
        0x17 if version >= 4 => "scan_table",
        0x18 if version >= 5 => "not",
        0x19 if version >= 5 => "call_vn",
        0x1A if version >= 5 => "call_vn2",
        0x1B if version >= 5 => "tokenise",
        0x1C if version >= 5 => "encode_text",
        0x1D if version >= 5 => "copy_table",
        0x1E if version >= 5 => "print_table",
        0x1F if version >= 5 => "check_arg_count",
        _ => UNKNOWN,
    }
}

fn ext_name(ext_opcode: u8, version: u8) -> &'static str {
    if version < 5 {
        return UNKNOWN;
    }
    match ext_opcode {
        0x00 => "save",
        0x01 => "restore",
        0x02 => "log_shift",
        0x03 => "art_shift",
        0x04 => "set_font",
        0x09 => "save_undo",
        0x0A => "restore_undo",
        0x0B => "print_unicode",
        0x0C => "check_unicode",
        _ => UNKNOWN,
    }
}

pub fn stores_result(q: &OpcodeQuery) -> bool {
    if q.form == InstructionForm::Extended {
        return matches!(
            q.ext_opcode,
            Some(0x00..=0x04) | Some(0x09) | Some(0x0A) | Some(0x0C)
        );
    }
    match q.family() {
        OperandCount::OP0 => match q.opcode {
            // save/restore store in V4 and branch earlier.
            0x05 | 0x06 => q.version == 4,
            0x09 => q.version >= 5, // catch
            _ => false,
        },
        OperandCount::OP1 => match q.opcode {
            0x01..=0x04 => true, // get_sibling/child/parent, get_prop_len
            0x08 => true,        // call_1s
            0x0E => true,        // load
            0x0F => q.version <= 4, // not; call_1n discards
            _ => false,
        },
        OperandCount::OP2 => matches!(q.opcode, 0x08 | 0x09 | 0x0F..=0x19),
        OperandCount::VAR => match q.opcode {
            0x00 | 0x0C => true, // call_vs, call_vs2
            0x04 => q.version >= 5, // aread
            0x07 => true,        // random
            0x09 => q.version == 6, // pull stores in V6 only
            0x16 | 0x17 => true, // read_char, scan_table
            0x18 => true,        // not
            _ => false,
        },
    }
}

pub fn has_branch(q: &OpcodeQuery) -> bool {
    if q.form == InstructionForm::Extended {
        return false;
    }
    match q.family() {
        OperandCount::OP0 => match q.opcode {
            0x05 | 0x06 => q.version <= 3, // save/restore branch in V1-3
            0x0D | 0x0F => true,           // verify, piracy
            _ => false,
        },
        OperandCount::OP1 => matches!(q.opcode, 0x00..=0x02),
        OperandCount::OP2 => matches!(q.opcode, 0x01..=0x07 | 0x0A),
        OperandCount::VAR => matches!(q.opcode, 0x17 | 0x1F),
    }
}

pub fn has_text(q: &OpcodeQuery) -> bool {
    q.form == InstructionForm::Short
        && q.operand_count == OperandCount::OP0
        && matches!(q.opcode, 0x02 | 0x03)
}

/// VAR-family opcodes taking a second operand-types byte (up to eight
/// operands).
pub fn has_double_type_byte(opcode: u8, operand_count: OperandCount) -> bool {
    operand_count == OperandCount::VAR && matches!(opcode, 0x0C | 0x1A)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(
        opcode: u8,
        form: InstructionForm,
        operand_count: OperandCount,
        version: u8,
    ) -> OpcodeQuery {
        OpcodeQuery {
            opcode,
            ext_opcode: None,
            form,
            operand_count,
            version,
        }
    }

    #[test]
    fn save_changes_shape_across_versions() {
        let v3 = q(0x05, InstructionForm::Short, OperandCount::OP0, 3);
        assert!(has_branch(&v3) && !stores_result(&v3));
        let v4 = q(0x05, InstructionForm::Short, OperandCount::OP0, 4);
        assert!(!has_branch(&v4) && stores_result(&v4));
        let v5 = q(0x05, InstructionForm::Short, OperandCount::OP0, 5);
        assert!(!is_known(&v5)); // moved to EXT:0
    }

    #[test]
    fn pop_becomes_catch() {
        let v3 = q(0x09, InstructionForm::Short, OperandCount::OP0, 3);
        assert_eq!(name(&v3), "pop");
        assert!(!stores_result(&v3));
        let v5 = q(0x09, InstructionForm::Short, OperandCount::OP0, 5);
        assert_eq!(name(&v5), "catch");
        assert!(stores_result(&v5));
    }

    #[test]
    fn not_becomes_call_1n() {
        let v3 = q(0x0F, InstructionForm::Short, OperandCount::OP1, 3);
        assert_eq!(name(&v3), "not");
        assert!(stores_result(&v3));
        let v5 = q(0x0F, InstructionForm::Short, OperandCount::OP1, 5);
        assert_eq!(name(&v5), "call_1n");
        assert!(!stores_result(&v5));
    }

    #[test]
    fn var_form_2op_uses_2op_table() {
        let je = q(0x01, InstructionForm::Variable, OperandCount::OP2, 3);
        assert_eq!(name(&je), "je");
        assert!(has_branch(&je));
    }

    #[test]
    fn extended_table() {
        let undo = OpcodeQuery {
            opcode: 0xBE,
            ext_opcode: Some(0x09),
            form: InstructionForm::Extended,
            operand_count: OperandCount::VAR,
            version: 5,
        };
        assert_eq!(name(&undo), "save_undo");
        assert!(stores_result(&undo));
        let bogus = OpcodeQuery {
            ext_opcode: Some(0x1F),
            ..undo
        };
        assert!(!is_known(&bogus));
    }

    #[test]
    fn version_gates_are_fatal_unknowns() {
        assert!(!is_known(&q(0x19, InstructionForm::Long, OperandCount::OP2, 3))); // call_2s
        assert!(is_known(&q(0x19, InstructionForm::Long, OperandCount::OP2, 4)));
        assert!(!is_known(&q(0x1F, InstructionForm::Variable, OperandCount::VAR, 3))); // check_arg_count
        assert!(!is_known(&q(0x00, InstructionForm::Long, OperandCount::OP2, 3))); // 2OP:0
    }

    #[test]
    fn inline_text_only_for_prints() {
        assert!(has_text(&q(0x02, InstructionForm::Short, OperandCount::OP0, 3)));
        assert!(has_text(&q(0x03, InstructionForm::Short, OperandCount::OP0, 3)));
        assert!(!has_text(&q(0x04, InstructionForm::Short, OperandCount::OP0, 3)));
    }

    #[test]
    fn double_type_bytes() {
        assert!(has_double_type_byte(0x0C, OperandCount::VAR));
        assert!(has_double_type_byte(0x1A, OperandCount::VAR));
        assert!(!has_double_type_byte(0x00, OperandCount::VAR));
        assert!(!has_double_type_byte(0x0C, OperandCount::OP2));
    }
}
