//! The executor: a synchronous decode-execute loop over the full V1-8
//! opcode set, with cooperative suspension for the input opcodes.
//!
//! Each cycle decodes at the PC, advances past the instruction, and
//! dispatches by opcode family. Handlers either finish (possibly moving
//! the PC again for branches, calls and returns) or park an
//! `InputRequest` and report `AwaitingInput`; the outer driver collects
//! input from the host and re-enters through `resume_with_input` /
//! `resume_with_char`.

use crate::config::InterpreterConfig;
use crate::dictionary::{self, Dictionary};
use crate::error::{Error, Result};
use crate::header::H_FLAGS1;
use crate::input::InputRequest;
use crate::instruction::{Instruction, OperandCount, OperandType};
use crate::machine::Machine;
use crate::memory::PackedKind;
use crate::saveformat::SaveFormat;
use crate::screen::{Screen, ZColor};
use crate::snapshot::Snapshot;
use crate::storage::Storage;
use crate::text;
use crate::undo::UndoRing;
use crate::util::{to_i16, to_u16};
use log::{debug, info, warn};

/// Outcome of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Fall through to the next instruction.
    Continue,
    /// Branch taken; PC already moved.
    Branched,
    /// Routine entered; PC already moved.
    Called,
    /// Routine returned with this value.
    Returned(u16),
    /// An input opcode parked a request and suspended.
    AwaitingInput,
    /// `quit` executed.
    Quit,
}

/// What the outer driver sees from `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineState {
    Running,
    AwaitingInput(InputRequest),
    Halted,
}

/// Nesting limit for stream-3 memory redirection.
const STREAM3_DEPTH: usize = 16;

pub struct Interpreter {
    pub machine: Machine,
    screen: Box<dyn Screen>,
    storage: Box<dyn Storage>,
    save_format: Box<dyn SaveFormat>,
    config: InterpreterConfig,
    undo: UndoRing,
    pending_input: Option<InputRequest>,
    /// Stack of (table address, buffered ZSCII bytes) for output stream 3.
    stream3: Vec<(usize, Vec<u8>)>,
    instruction_count: u64,
}

impl Interpreter {
    pub fn new(
        mut machine: Machine,
        screen: Box<dyn Screen>,
        storage: Box<dyn Storage>,
        save_format: Box<dyn SaveFormat>,
        config: InterpreterConfig,
    ) -> Interpreter {
        machine.memory.apply_capabilities(&screen.capabilities());
        if let Some(seed) = config.rng_seed {
            machine.rng.reseed(seed);
        }
        let undo = UndoRing::new(config.undo_slots);
        Interpreter {
            machine,
            screen,
            storage,
            save_format,
            config,
            undo,
            pending_input: None,
            stream3: Vec::new(),
            instruction_count: 0,
        }
    }

    /// Headless interpreter with in-memory storage and Quetzal saves;
    /// what most tests want.
    pub fn with_defaults(machine: Machine) -> Interpreter {
        Interpreter::new(
            machine,
            Box::new(crate::screen::NullScreen),
            Box::new(crate::storage::InMemoryStorage::new()),
            Box::new(crate::saveformat::QuetzalFormat),
            InterpreterConfig::default(),
        )
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn pending_input(&self) -> Option<&InputRequest> {
        self.pending_input.as_ref()
    }

    // ------------------------------------------------------------------
    // Outer loop
    // ------------------------------------------------------------------

    /// Pump instructions until the story quits or asks for input.
    pub fn run(&mut self) -> Result<MachineState> {
        loop {
            if let Some(request) = &self.pending_input {
                return Ok(MachineState::AwaitingInput(request.clone()));
            }
            if let Some(limit) = self.config.max_instructions {
                if self.instruction_count >= limit {
                    warn!("instruction limit {limit} reached, halting");
                    return Ok(MachineState::Halted);
                }
            }
            match self.step()? {
                ExecutionResult::Quit => return Ok(MachineState::Halted),
                _ => continue,
            }
        }
    }

    /// Decode and execute one instruction.
    pub fn step(&mut self) -> Result<ExecutionResult> {
        let inst = Instruction::decode(&self.machine.memory, self.machine.pc)?;
        debug!("{:#07x}: {inst}", inst.addr);
        self.machine.pc = inst.addr + inst.size;
        self.instruction_count += 1;
        self.execute(&inst)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub fn execute(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let operands = self.resolve_operands(inst)?;
        match inst.family() {
            OperandCount::OP0 => self.execute_0op(inst),
            OperandCount::OP1 => self.execute_1op(inst, &operands),
            OperandCount::OP2 => self.execute_2op(inst, &operands),
            OperandCount::VAR => {
                if inst.ext_opcode.is_some() {
                    self.execute_ext(inst, &operands)
                } else {
                    self.execute_var(inst, &operands)
                }
            }
        }
    }

    /// Fetch operand values; `Variable` operands read through the normal
    /// variable rules (variable 0 pops).
    fn resolve_operands(&mut self, inst: &Instruction) -> Result<Vec<u16>> {
        let mut values = Vec::with_capacity(inst.operands.len());
        for (i, &raw) in inst.operands.iter().enumerate() {
            let value = match inst.operand_types[i] {
                OperandType::Variable => self.machine.read_variable(raw as u8)?,
                _ => raw,
            };
            values.push(value);
        }
        Ok(values)
    }

    fn op(inst: &Instruction, operands: &[u16], index: usize) -> Result<u16> {
        operands.get(index).copied().ok_or_else(|| {
            Error::decode(
                inst.addr,
                format!("{} needs operand {index}", inst.name()),
            )
        })
    }

    /// The target variable number of an indirect-reference opcode. By the
    /// time operands are resolved this is simply the first operand's
    /// value: a constant names the variable directly, and a `Variable`
    /// operand was resolved to the number it holds.
    fn indirect_target(inst: &Instruction, operands: &[u16]) -> Result<u8> {
        Ok(Self::op(inst, operands, 0)? as u8)
    }

    // ------------------------------------------------------------------
    // 0OP
    // ------------------------------------------------------------------

    fn execute_0op(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let version = self.machine.version();
        match inst.opcode {
            0x00 => self.do_return(1),
            0x01 => self.do_return(0),
            0x02 => {
                // print
                if let Some(text) = &inst.text {
                    self.print_text(text);
                }
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // print_ret
                if let Some(text) = &inst.text {
                    self.print_text(text);
                }
                self.print_text("\n");
                self.do_return(1)
            }
            0x04 => Ok(ExecutionResult::Continue), // nop
            0x05 => self.do_save(inst),
            0x06 => self.do_restore(inst),
            0x07 => {
                // restart
                self.machine.restart()?;
                self.machine
                    .memory
                    .apply_capabilities(&self.screen.capabilities());
                self.stream3.clear();
                self.pending_input = None;
                Ok(ExecutionResult::Branched)
            }
            0x08 => {
                // ret_popped
                let value = self.machine.pop()?;
                self.do_return(value)
            }
            0x09 => {
                if version <= 4 {
                    // pop
                    self.machine.pop()?;
                    Ok(ExecutionResult::Continue)
                } else {
                    // catch
                    let token = self.machine.catch_frame();
                    self.store(inst, token)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            0x0A => Ok(ExecutionResult::Quit),
            0x0B => {
                self.print_text("\n");
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // show_status
                self.update_status_line()?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // verify
                let genuine = self.machine.memory.verify();
                self.do_branch(inst, genuine)
            }
            0x0F => {
                // piracy: be gullible
                self.do_branch(inst, true)
            }
            _ => Err(Error::decode(
                inst.addr,
                format!("unhandled 0OP opcode {:#04x}", inst.opcode),
            )),
        }
    }

    // ------------------------------------------------------------------
    // 1OP
    // ------------------------------------------------------------------

    fn execute_1op(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let version = self.machine.version();
        let op0 = Self::op(inst, operands, 0)?;
        match inst.opcode {
            0x00 => self.do_branch(inst, op0 == 0), // jz
            0x01 => {
                // get_sibling
                let sibling = self.machine.objects.sibling(&self.machine.memory, op0)?;
                self.store(inst, sibling)?;
                self.do_branch(inst, sibling != 0)
            }
            0x02 => {
                // get_child
                let child = self.machine.objects.child(&self.machine.memory, op0)?;
                self.store(inst, child)?;
                self.do_branch(inst, child != 0)
            }
            0x03 => {
                // get_parent
                let parent = self.machine.objects.parent(&self.machine.memory, op0)?;
                self.store(inst, parent)?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // get_prop_len
                let len = self
                    .machine
                    .objects
                    .get_property_length(&self.machine.memory, op0 as usize)?;
                self.store(inst, len as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x05 | 0x06 => {
                // inc / dec
                let target = Self::indirect_target(inst, operands)?;
                let value = self.machine.read_variable_in_place(target)?;
                let new = if inst.opcode == 0x05 {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.machine.write_variable_in_place(target, new)?;
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                // print_addr
                let (string, _) = text::decode_string(&self.machine.memory, op0 as usize)?;
                self.print_text(&string);
                Ok(ExecutionResult::Continue)
            }
            0x08 => self.do_call(op0, &[], inst.store_var), // call_1s
            0x09 => {
                // remove_obj
                self.machine
                    .objects
                    .unlink(&mut self.machine.memory, op0)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                // print_obj
                let name = self.machine.objects.name(&self.machine.memory, op0)?;
                self.print_text(&name);
                Ok(ExecutionResult::Continue)
            }
            0x0B => self.do_return(op0), // ret
            0x0C => {
                // jump: signed offset relative to the next instruction,
                // minus 2.
                self.relocate_pc(to_i16(op0))?;
                Ok(ExecutionResult::Branched)
            }
            0x0D => {
                // print_paddr
                let string = text::decode_packed(&self.machine.memory, op0)?;
                self.print_text(&string);
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                // load
                let target = Self::indirect_target(inst, operands)?;
                let value = self.machine.read_variable_in_place(target)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                if version <= 4 {
                    // not
                    self.store(inst, !op0)?;
                    Ok(ExecutionResult::Continue)
                } else {
                    // call_1n
                    self.do_call(op0, &[], None)
                }
            }
            _ => Err(Error::decode(
                inst.addr,
                format!("unhandled 1OP opcode {:#04x}", inst.opcode),
            )),
        }
    }

    // ------------------------------------------------------------------
    // 2OP (long form and its Variable-form encoding)
    // ------------------------------------------------------------------

    fn execute_2op(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let op0 = Self::op(inst, operands, 0)?;
        // je accepts 2-4 operands; everything else takes exactly two.
        if inst.opcode == 0x01 {
            if operands.len() < 2 {
                return Err(Error::decode(inst.addr, "je needs at least two operands"));
            }
            let equal = operands[1..].iter().any(|&v| v == op0);
            return self.do_branch(inst, equal);
        }
        let op1 = Self::op(inst, operands, 1)?;

        match inst.opcode {
            0x02 => self.do_branch(inst, to_i16(op0) < to_i16(op1)), // jl
            0x03 => self.do_branch(inst, to_i16(op0) > to_i16(op1)), // jg
            0x04 | 0x05 => {
                // dec_chk / inc_chk
                let target = Self::indirect_target(inst, operands)?;
                let value = self.machine.read_variable_in_place(target)?;
                let new = if inst.opcode == 0x05 {
                    value.wrapping_add(1)
                } else {
                    value.wrapping_sub(1)
                };
                self.machine.write_variable_in_place(target, new)?;
                let taken = if inst.opcode == 0x05 {
                    to_i16(new) > to_i16(op1)
                } else {
                    to_i16(new) < to_i16(op1)
                };
                self.do_branch(inst, taken)
            }
            0x06 => {
                // jin
                let parent = self.machine.objects.parent(&self.machine.memory, op0)?;
                self.do_branch(inst, parent == op1)
            }
            0x07 => self.do_branch(inst, op0 & op1 == op1), // test
            0x08 => {
                self.store(inst, op0 | op1)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                self.store(inst, op0 & op1)?;
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                // test_attr
                let set = self
                    .machine
                    .objects
                    .has_attr(&self.machine.memory, op0, op1)?;
                self.do_branch(inst, set)
            }
            0x0B => {
                // set_attr
                self.machine
                    .objects
                    .set_attr(&mut self.machine.memory, op0, op1, true)?;
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // clear_attr
                self.machine
                    .objects
                    .set_attr(&mut self.machine.memory, op0, op1, false)?;
                Ok(ExecutionResult::Continue)
            }
            0x0D => {
                // store (indirect reference, in-place on the stack)
                let target = Self::indirect_target(inst, operands)?;
                self.machine.write_variable_in_place(target, op1)?;
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                // insert_obj
                self.machine
                    .objects
                    .insert(&mut self.machine.memory, op0, op1)?;
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                // loadw
                let addr = op0.wrapping_add(op1.wrapping_mul(2)) as usize;
                let value = self.machine.memory.get_word(addr)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                // loadb
                let addr = op0.wrapping_add(op1) as usize;
                let value = self.machine.memory.get_byte(addr)? as u16;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                // get_prop
                let value = self
                    .machine
                    .objects
                    .get_property(&self.machine.memory, op0, op1 as u8)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                // get_prop_addr
                let addr = self
                    .machine
                    .objects
                    .get_property_address(&self.machine.memory, op0, op1 as u8)?;
                self.store(inst, addr as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                // get_next_prop
                let next = self
                    .machine
                    .objects
                    .get_next_property(&self.machine.memory, op0, op1 as u8)?;
                self.store(inst, next as u16)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                self.store(inst, to_u16(to_i16(op0).wrapping_add(to_i16(op1))))?;
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                self.store(inst, to_u16(to_i16(op0).wrapping_sub(to_i16(op1))))?;
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                self.store(inst, to_u16(to_i16(op0).wrapping_mul(to_i16(op1))))?;
                Ok(ExecutionResult::Continue)
            }
            0x17 => {
                // div: truncates toward zero
                let value = self.checked_divide(inst, op0, op1, false)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x18 => {
                // mod
                let value = self.checked_divide(inst, op0, op1, true)?;
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 => self.do_call(op0, &operands[1..], inst.store_var), // call_2s
            0x1A => self.do_call(op0, &operands[1..], None),           // call_2n
            0x1B => {
                // set_colour
                self.set_colours(op0, op1, 0);
                Ok(ExecutionResult::Continue)
            }
            0x1C => {
                // throw
                self.machine.throw_to_frame(op0, op1)?;
                Ok(ExecutionResult::Returned(op0))
            }
            _ => Err(Error::decode(
                inst.addr,
                format!("unhandled 2OP opcode {:#04x}", inst.opcode),
            )),
        }
    }

    fn checked_divide(
        &mut self,
        inst: &Instruction,
        op0: u16,
        op1: u16,
        modulo: bool,
    ) -> Result<u16> {
        if op1 == 0 {
            if self.config.strict_arithmetic {
                return Err(Error::Stack(format!(
                    "division by zero at {:#07x}",
                    inst.addr
                )));
            }
            warn!(
                "division by zero at {:#07x}; storing 0 (legacy behaviour)",
                inst.addr
            );
            return Ok(0);
        }
        let a = to_i16(op0);
        let b = to_i16(op1);
        Ok(to_u16(if modulo {
            a.wrapping_rem(b)
        } else {
            a.wrapping_div(b)
        }))
    }

    // ------------------------------------------------------------------
    // VAR
    // ------------------------------------------------------------------

    fn execute_var(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let version = self.machine.version();
        match inst.opcode {
            0x00 => {
                // call / call_vs
                let packed = Self::op(inst, operands, 0)?;
                self.do_call(packed, &operands[1..], inst.store_var)
            }
            0x01 => {
                // storew
                let addr = Self::op(inst, operands, 0)?
                    .wrapping_add(Self::op(inst, operands, 1)?.wrapping_mul(2))
                    as usize;
                self.machine
                    .memory
                    .set_word(addr, Self::op(inst, operands, 2)?)?;
                Ok(ExecutionResult::Continue)
            }
            0x02 => {
                // storeb
                let addr = Self::op(inst, operands, 0)?
                    .wrapping_add(Self::op(inst, operands, 1)?) as usize;
                self.machine
                    .memory
                    .set_byte(addr, Self::op(inst, operands, 2)? as u8)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // put_prop
                self.machine.objects.put_property(
                    &mut self.machine.memory,
                    Self::op(inst, operands, 0)?,
                    Self::op(inst, operands, 1)? as u8,
                    Self::op(inst, operands, 2)?,
                )?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => self.do_read(inst, operands),
            0x05 => {
                // print_char
                let code = Self::op(inst, operands, 0)?;
                if let Some(ch) = self.machine.memory.zscii_to_unicode(code) {
                    self.print_text(&ch.to_string());
                }
                Ok(ExecutionResult::Continue)
            }
            0x06 => {
                // print_num
                let value = to_i16(Self::op(inst, operands, 0)?);
                self.print_text(&value.to_string());
                Ok(ExecutionResult::Continue)
            }
            0x07 => {
                // random
                let range = to_i16(Self::op(inst, operands, 0)?);
                let value = self.machine.rng.opcode_random(range);
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x08 => {
                // push
                self.machine.push(Self::op(inst, operands, 0)?)?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => {
                // pull
                let value = self.machine.pop()?;
                if version == 6 {
                    self.store(inst, value)?;
                } else {
                    let target = Self::indirect_target(inst, operands)?;
                    if target == 0 {
                        return Err(Error::Stack(format!(
                            "pull with indirect target 0 at {:#07x}",
                            inst.addr
                        )));
                    }
                    self.machine.write_variable_in_place(target, value)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x0A => {
                self.screen.split_window(Self::op(inst, operands, 0)?);
                Ok(ExecutionResult::Continue)
            }
            0x0B => {
                self.screen.set_window(Self::op(inst, operands, 0)?);
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // call_vs2
                let packed = Self::op(inst, operands, 0)?;
                self.do_call(packed, &operands[1..], inst.store_var)
            }
            0x0D => {
                self.screen
                    .erase_window(to_i16(Self::op(inst, operands, 0)?));
                Ok(ExecutionResult::Continue)
            }
            0x0E => {
                // erase_line (operand 1 = "from cursor to end")
                if Self::op(inst, operands, 0)? == 1 {
                    self.screen.erase_line();
                }
                Ok(ExecutionResult::Continue)
            }
            0x0F => {
                // set_cursor
                let line = Self::op(inst, operands, 0)?;
                let column = Self::op(inst, operands, 1)?;
                let window = operands.get(2).copied().unwrap_or(0xFFFF);
                self.screen.set_cursor(line, column, window);
                Ok(ExecutionResult::Continue)
            }
            0x10 => {
                // get_cursor: write (row, column) words into the array.
                let array = Self::op(inst, operands, 0)? as usize;
                let (line, column) = self.screen.get_cursor(0xFFFF);
                self.machine.memory.set_word(array, line)?;
                self.machine.memory.set_word(array + 2, column)?;
                Ok(ExecutionResult::Continue)
            }
            0x11 => {
                self.screen.set_text_style(Self::op(inst, operands, 0)?);
                Ok(ExecutionResult::Continue)
            }
            0x12 => {
                self.screen
                    .buffer_mode(Self::op(inst, operands, 0)? != 0);
                Ok(ExecutionResult::Continue)
            }
            0x13 => {
                // output_stream
                let stream = to_i16(Self::op(inst, operands, 0)?);
                let table = operands.get(1).copied().unwrap_or(0) as usize;
                self.select_output_stream(stream, table)?;
                Ok(ExecutionResult::Continue)
            }
            0x14 => {
                self.screen.input_stream(Self::op(inst, operands, 0)?);
                Ok(ExecutionResult::Continue)
            }
            0x15 => {
                // sound_effect: audio rendering is out of scope; bleeps
                // are acknowledged and forgotten.
                debug!("sound_effect {:?}", operands);
                Ok(ExecutionResult::Continue)
            }
            0x16 => {
                // read_char
                let store_var = inst.store_var.ok_or_else(|| {
                    Error::decode(inst.addr, "read_char without a store variable")
                })?;
                let time = operands.get(1).copied().unwrap_or(0);
                let routine = operands.get(2).copied().unwrap_or(0);
                self.pending_input = Some(InputRequest::Char {
                    time,
                    routine,
                    store_var,
                });
                Ok(ExecutionResult::AwaitingInput)
            }
            0x17 => {
                // scan_table
                let value = Self::op(inst, operands, 0)?;
                let table = Self::op(inst, operands, 1)? as usize;
                let len = Self::op(inst, operands, 2)?;
                let form = operands.get(3).copied().unwrap_or(0x82);
                let stride = (form & 0x7F) as usize;
                let word_compare = form & 0x80 != 0;

                let mut found = 0usize;
                let mut addr = table;
                for _ in 0..len {
                    let entry = if word_compare {
                        self.machine.memory.get_word(addr)?
                    } else {
                        self.machine.memory.get_byte(addr)? as u16
                    };
                    if entry == value {
                        found = addr;
                        break;
                    }
                    addr += stride;
                }
                self.store(inst, found as u16)?;
                self.do_branch(inst, found != 0)
            }
            0x18 => {
                // not (V5+)
                self.store(inst, !Self::op(inst, operands, 0)?)?;
                Ok(ExecutionResult::Continue)
            }
            0x19 | 0x1A => {
                // call_vn / call_vn2
                let packed = Self::op(inst, operands, 0)?;
                self.do_call(packed, &operands[1..], None)
            }
            0x1B => {
                // tokenise
                let text_buffer = Self::op(inst, operands, 0)? as usize;
                let parse_buffer = Self::op(inst, operands, 1)? as usize;
                let dict_addr = operands.get(2).copied().unwrap_or(0) as usize;
                let skip_unknown = operands.get(3).copied().unwrap_or(0) != 0;
                if dict_addr != 0 {
                    let custom = Dictionary::from_memory(&self.machine.memory, dict_addr)?;
                    dictionary::tokenise_buffer(
                        &mut self.machine.memory,
                        &custom,
                        text_buffer,
                        parse_buffer,
                        skip_unknown,
                    )?;
                } else {
                    dictionary::tokenise_buffer(
                        &mut self.machine.memory,
                        &self.machine.dictionary,
                        text_buffer,
                        parse_buffer,
                        skip_unknown,
                    )?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1C => {
                // encode_text
                let text_addr = Self::op(inst, operands, 0)? as usize;
                let length = Self::op(inst, operands, 1)? as usize;
                let from = Self::op(inst, operands, 2)? as usize;
                let coded = Self::op(inst, operands, 3)? as usize;
                let raw = self
                    .machine
                    .memory
                    .get_bytes(text_addr + from, length)?
                    .to_vec();
                let word: String = raw.iter().map(|&b| b as char).collect();
                let encoded = text::encode_word(&self.machine.memory, &word);
                for (i, w) in encoded.iter().enumerate() {
                    self.machine.memory.set_word(coded + i * 2, *w)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1D => {
                // copy_table
                let first = Self::op(inst, operands, 0)? as usize;
                let second = Self::op(inst, operands, 1)? as usize;
                let size = to_i16(Self::op(inst, operands, 2)?);
                if second == 0 {
                    self.machine
                        .memory
                        .zero_block(first, size.unsigned_abs() as usize)?;
                } else if size < 0 {
                    // Forced forward copy; games use the overlap smear
                    // deliberately.
                    for i in 0..size.unsigned_abs() as usize {
                        let byte = self.machine.memory.get_byte(first + i)?;
                        self.machine.memory.set_byte(second + i, byte)?;
                    }
                } else {
                    self.machine
                        .memory
                        .copy_block(first, second, size as usize)?;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1E => {
                // print_table
                let addr = Self::op(inst, operands, 0)? as usize;
                let width = Self::op(inst, operands, 1)? as usize;
                let height = operands.get(2).copied().unwrap_or(1) as usize;
                let skip = operands.get(3).copied().unwrap_or(0) as usize;
                let mut cursor = addr;
                for row in 0..height {
                    if row > 0 {
                        self.print_text("\n");
                    }
                    let mut line = String::new();
                    for i in 0..width {
                        let code = self.machine.memory.get_byte(cursor + i)? as u16;
                        if let Some(ch) = self.machine.memory.zscii_to_unicode(code) {
                            line.push(ch);
                        }
                    }
                    self.print_text(&line);
                    cursor += width + skip;
                }
                Ok(ExecutionResult::Continue)
            }
            0x1F => {
                // check_arg_count
                let wanted = Self::op(inst, operands, 0)?;
                let supplied = self.machine.current_frame()?.arg_count as u16;
                self.do_branch(inst, wanted <= supplied)
            }
            _ => Err(Error::decode(
                inst.addr,
                format!("unhandled VAR opcode {:#04x}", inst.opcode),
            )),
        }
    }

    // ------------------------------------------------------------------
    // EXT
    // ------------------------------------------------------------------

    fn execute_ext(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        match inst.ext_opcode.unwrap_or(0xFF) {
            0x00 => self.do_save(inst),
            0x01 => self.do_restore(inst),
            0x02 => {
                // log_shift
                let number = Self::op(inst, operands, 0)?;
                let places = to_i16(Self::op(inst, operands, 1)?);
                let value = if places >= 0 {
                    number.wrapping_shl(places as u32)
                } else {
                    number.wrapping_shr(places.unsigned_abs() as u32)
                };
                self.store(inst, value)?;
                Ok(ExecutionResult::Continue)
            }
            0x03 => {
                // art_shift: right shifts preserve the sign
                let number = to_i16(Self::op(inst, operands, 0)?);
                let places = to_i16(Self::op(inst, operands, 1)?);
                let value = if places >= 0 {
                    number.wrapping_shl(places as u32)
                } else {
                    number.wrapping_shr(places.unsigned_abs() as u32)
                };
                self.store(inst, to_u16(value))?;
                Ok(ExecutionResult::Continue)
            }
            0x04 => {
                // set_font: only the normal font exists here. Requesting
                // font 1 (or a status query with 0) reports it; anything
                // else is unavailable.
                let font = Self::op(inst, operands, 0)?;
                self.store(inst, if font <= 1 { 1 } else { 0 })?;
                Ok(ExecutionResult::Continue)
            }
            0x09 => self.do_save_undo(inst),
            0x0A => self.do_restore_undo(inst),
            0x0B => {
                // print_unicode
                let code = Self::op(inst, operands, 0)?;
                let ch = char::from_u32(code as u32).unwrap_or('?');
                self.print_text(&ch.to_string());
                Ok(ExecutionResult::Continue)
            }
            0x0C => {
                // check_unicode: bit 0 = can print, bit 1 = can receive
                let code = Self::op(inst, operands, 0)?;
                let printable = match char::from_u32(code as u32) {
                    Some(ch) => self.machine.memory.unicode_to_zscii(ch) != b'?' || ch == '?',
                    None => false,
                };
                self.store(inst, if printable { 3 } else { 0 })?;
                Ok(ExecutionResult::Continue)
            }
            other => Err(Error::decode(
                inst.addr,
                format!("unhandled EXT opcode {other:#04x}"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    fn store(&mut self, inst: &Instruction, value: u16) -> Result<()> {
        if let Some(var) = inst.store_var {
            self.machine.write_variable(var, value)?;
        }
        Ok(())
    }

    /// Move the PC by a branch/jump offset: relative to the byte after
    /// the instruction, minus 2.
    fn relocate_pc(&mut self, offset: i16) -> Result<()> {
        let new_pc = self.machine.pc as i64 + offset as i64 - 2;
        if new_pc < 0 || new_pc as usize >= self.machine.memory.len() {
            return Err(Error::Bounds(new_pc.unsigned_abs() as usize));
        }
        self.machine.pc = new_pc as usize;
        Ok(())
    }

    fn do_branch(&mut self, inst: &Instruction, condition: bool) -> Result<ExecutionResult> {
        let Some(branch) = &inst.branch else {
            return Ok(ExecutionResult::Continue);
        };
        if condition != branch.on_true {
            return Ok(ExecutionResult::Continue);
        }
        match branch.offset {
            0 => self.do_return(0),
            1 => self.do_return(1),
            offset => {
                self.relocate_pc(offset)?;
                Ok(ExecutionResult::Branched)
            }
        }
    }

    fn do_return(&mut self, value: u16) -> Result<ExecutionResult> {
        self.machine.return_value(value)?;
        Ok(ExecutionResult::Returned(value))
    }

    fn do_call(
        &mut self,
        packed: u16,
        args: &[u16],
        result_var: Option<u8>,
    ) -> Result<ExecutionResult> {
        // Calling packed address 0 legally returns false.
        if packed == 0 {
            if let Some(var) = result_var {
                self.machine.write_variable(var, 0)?;
            }
            return Ok(ExecutionResult::Continue);
        }
        let addr = self
            .machine
            .memory
            .packed_to_byte(packed, PackedKind::Routine);
        self.machine.call_routine(addr, args, result_var)?;
        Ok(ExecutionResult::Called)
    }

    /// Route text to the active output: a stream-3 table when one is
    /// selected, the screen otherwise.
    fn print_text(&mut self, text: &str) {
        if self.stream3.is_empty() {
            self.screen.print(text);
            return;
        }
        let bytes: Vec<u8> = text
            .chars()
            .map(|ch| self.machine.memory.unicode_to_zscii(ch))
            .collect();
        if let Some((_, buffer)) = self.stream3.last_mut() {
            buffer.extend_from_slice(&bytes);
        }
    }

    fn select_output_stream(&mut self, stream: i16, table: usize) -> Result<()> {
        match stream {
            0 => {}
            3 => {
                if self.stream3.len() >= STREAM3_DEPTH {
                    return Err(Error::Stack(
                        "output stream 3 nested more than 16 deep".into(),
                    ));
                }
                self.stream3.push((table, Vec::new()));
            }
            -3 => {
                if let Some((addr, bytes)) = self.stream3.pop() {
                    self.machine.memory.set_word(addr, bytes.len() as u16)?;
                    self.machine.memory.set_bytes(addr + 2, &bytes)?;
                } else {
                    warn!("output stream -3 with no stream 3 selected");
                }
            }
            other => self.screen.output_stream(other),
        }
        Ok(())
    }

    fn set_colours(&mut self, foreground: u16, background: u16, window: u16) {
        let (Some(fg), Some(bg)) = (ZColor::from_code(foreground), ZColor::from_code(background))
        else {
            warn!("set_colour with unknown colours {foreground}/{background}");
            return;
        };
        self.screen.set_text_colors(window, fg, bg);
    }

    /// V1-3 status line: the short name of the object in G0, plus
    /// score/moves (or hours/minutes) from G1/G2.
    fn update_status_line(&mut self) -> Result<()> {
        let location_obj = self.machine.read_global(16)?;
        let location = self
            .machine
            .objects
            .name(&self.machine.memory, location_obj)?;
        let v1 = to_i16(self.machine.read_global(17)?);
        let v2 = self.machine.read_global(18)?;
        let flags1 = self.machine.memory.get_byte(H_FLAGS1)?;
        let time_mode = self.machine.memory.header.status_time_mode(flags1);
        self.screen.update_status_bar(&location, v1, v2, time_mode);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading input
    // ------------------------------------------------------------------

    fn do_read(&mut self, inst: &Instruction, operands: &[u16]) -> Result<ExecutionResult> {
        let version = self.machine.version();
        let text_buffer = Self::op(inst, operands, 0)? as usize;
        let parse_buffer = operands.get(1).copied().unwrap_or(0) as usize;
        let time = operands.get(2).copied().unwrap_or(0);
        let routine = operands.get(3).copied().unwrap_or(0);

        if version <= 3 {
            self.update_status_line()?;
        }

        let first = self.machine.memory.get_byte(text_buffer)? as usize;
        let (max_length, preloaded) = if version <= 4 {
            (first.saturating_sub(1), String::new())
        } else {
            let existing = self.machine.memory.get_byte(text_buffer + 1)? as usize;
            let mut prefix = String::new();
            for i in 0..existing {
                let code = self.machine.memory.get_byte(text_buffer + 2 + i)? as u16;
                if let Some(ch) = self.machine.memory.zscii_to_unicode(code) {
                    prefix.push(ch);
                }
            }
            (first, prefix)
        };

        self.pending_input = Some(InputRequest::Line {
            text_buffer,
            parse_buffer,
            max_length,
            preloaded,
            time,
            routine,
            store_var: inst.store_var,
        });
        Ok(ExecutionResult::AwaitingInput)
    }

    /// Complete a pending line read with the newly typed text and pick
    /// the execution back up with `run`. For a V5+ continued read the
    /// buffer's existing text is part of the line; the host supplies only
    /// what was typed after it.
    pub fn resume_with_input(&mut self, line: &str) -> Result<()> {
        let Some(InputRequest::Line {
            text_buffer,
            parse_buffer,
            max_length,
            preloaded,
            store_var,
            ..
        }) = self.pending_input.take()
        else {
            return Err(Error::Input(
                "resume_with_input without a pending line read".into(),
            ));
        };

        let typed: String = line
            .trim_end_matches(['\r', '\n'])
            .chars()
            .flat_map(|c| c.to_lowercase())
            .collect();
        let line: String = preloaded
            .chars()
            .chain(typed.chars())
            .take(max_length)
            .collect();
        self.write_text_buffer(text_buffer, &line)?;
        // The preloaded prefix is already on screen; echo the new part.
        self.screen.echo_input(&format!("{typed}\n"));

        if parse_buffer != 0 {
            dictionary::tokenise_buffer(
                &mut self.machine.memory,
                &self.machine.dictionary,
                text_buffer,
                parse_buffer,
                false,
            )?;
        }

        // V5+ stores the terminating character; plain newline is 13.
        if let Some(var) = store_var {
            self.machine.write_variable(var, 13)?;
        }
        Ok(())
    }

    /// Complete a pending character read.
    pub fn resume_with_char(&mut self, ch: char) -> Result<()> {
        let Some(InputRequest::Char { store_var, .. }) = self.pending_input.take() else {
            return Err(Error::Input(
                "resume_with_char without a pending character read".into(),
            ));
        };
        let code = self.machine.memory.unicode_to_zscii(ch);
        self.machine.write_variable(store_var, code as u16)?;
        Ok(())
    }

    fn write_text_buffer(&mut self, text_buffer: usize, line: &str) -> Result<()> {
        let bytes: Vec<u8> = line
            .chars()
            .map(|ch| self.machine.memory.unicode_to_zscii(ch))
            .collect();
        if self.machine.version() <= 4 {
            self.machine.memory.set_bytes(text_buffer + 1, &bytes)?;
            self.machine
                .memory
                .set_byte(text_buffer + 1 + bytes.len(), 0)?;
        } else {
            self.machine
                .memory
                .set_byte(text_buffer + 1, bytes.len() as u8)?;
            self.machine.memory.set_bytes(text_buffer + 2, &bytes)?;
        }
        Ok(())
    }

    /// Timer tick during a timed read: runs the story's timer routine to
    /// completion. A non-zero return aborts the read with an empty buffer
    /// and a zero terminator; the caller should then stop collecting
    /// input and call `run` again.
    pub fn handle_timer_tick(&mut self) -> Result<bool> {
        let Some(request) = self.pending_input.clone() else {
            return Err(Error::Input("timer tick with no pending read".into()));
        };
        let Some((_, routine)) = request.timer() else {
            return Err(Error::Input("timer tick on an untimed read".into()));
        };

        let result = self.run_routine_inline(routine)?;
        if result == 0 {
            return Ok(false);
        }

        info!("timer routine aborted the read");
        match self.pending_input.take() {
            Some(InputRequest::Line {
                text_buffer,
                store_var,
                ..
            }) => {
                self.write_text_buffer(text_buffer, "")?;
                if let Some(var) = store_var {
                    self.machine.write_variable(var, 0)?;
                }
            }
            Some(InputRequest::Char { store_var, .. }) => {
                self.machine.write_variable(store_var, 0)?;
            }
            None => {}
        }
        Ok(true)
    }

    /// Call a routine and pump instructions until it returns, giving back
    /// its return value. Used for timer callbacks, which run atomically
    /// between "real" instructions.
    fn run_routine_inline(&mut self, packed: u16) -> Result<u16> {
        let depth = self.machine.call_depth();
        let addr = self
            .machine
            .memory
            .packed_to_byte(packed, PackedKind::Routine);
        self.machine.call_routine(addr, &[], Some(0))?;

        let mut steps: u64 = 0;
        while self.machine.call_depth() > depth {
            steps += 1;
            if steps > 1_000_000 {
                return Err(Error::Input("timer routine did not return".into()));
            }
            let inst = Instruction::decode(&self.machine.memory, self.machine.pc)?;
            self.machine.pc = inst.addr + inst.size;
            match self.execute(&inst)? {
                ExecutionResult::Quit => {
                    return Err(Error::Input("timer routine executed quit".into()))
                }
                ExecutionResult::AwaitingInput => {
                    return Err(Error::Input("timer routine asked for input".into()))
                }
                _ => {}
            }
        }
        self.machine.pop()
    }

    // ------------------------------------------------------------------
    // Saving and restoring
    // ------------------------------------------------------------------

    /// Capture a snapshot whose resume path already reflects a successful
    /// restore: the restored-state outcome (branch taken, or result 2) is
    /// applied first, snapshotted, then rolled back so the current path
    /// can report plain success or failure.
    fn snapshot_for_save(&mut self, inst: &Instruction) -> Result<Snapshot> {
        let before = self.machine.capture_snapshot();
        if inst.branch.is_some() {
            self.do_branch(inst, true)?;
        } else if inst.store_var.is_some() {
            self.store(inst, 2)?;
        }
        let snapshot = self.machine.capture_snapshot();
        self.machine.restore_snapshot(&before)?;
        Ok(snapshot)
    }

    fn do_save(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let snapshot = self.snapshot_for_save(inst)?;
        let outcome = self
            .save_format
            .to_bytes(&snapshot, &self.machine.memory)
            .and_then(|bytes| self.storage.save_snapshot(&bytes, "story save"));

        match outcome {
            Ok(()) => {
                if inst.branch.is_some() {
                    self.do_branch(inst, true)
                } else {
                    self.store(inst, 1)?;
                    Ok(ExecutionResult::Continue)
                }
            }
            Err(e) => {
                warn!("save failed: {e}");
                if inst.branch.is_some() {
                    self.do_branch(inst, false)
                } else {
                    self.store(inst, 0)?;
                    Ok(ExecutionResult::Continue)
                }
            }
        }
    }

    fn do_restore(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        let outcome = self
            .storage
            .load_snapshot()
            .and_then(|bytes| self.save_format.from_bytes(&bytes, &self.machine.memory));

        match outcome {
            Ok(snapshot) => {
                self.machine.restore_snapshot(&snapshot)?;
                self.stream3.clear();
                // The restored PC continues from the save instruction's
                // success path; nothing more to do here.
                Ok(ExecutionResult::Branched)
            }
            Err(e) => {
                warn!("restore failed: {e}");
                if inst.branch.is_some() {
                    self.do_branch(inst, false)
                } else {
                    self.store(inst, 0)?;
                    Ok(ExecutionResult::Continue)
                }
            }
        }
    }

    fn do_save_undo(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        if !self.undo.is_enabled() {
            self.store(inst, 0)?;
            return Ok(ExecutionResult::Continue);
        }
        let snapshot = self.snapshot_for_save(inst)?;
        self.undo.push(snapshot);
        self.store(inst, 1)?;
        Ok(ExecutionResult::Continue)
    }

    fn do_restore_undo(&mut self, inst: &Instruction) -> Result<ExecutionResult> {
        match self.undo.pop() {
            Some(snapshot) => {
                self.machine.restore_snapshot(&snapshot)?;
                Ok(ExecutionResult::Branched)
            }
            None => {
                self.store(inst, 0)?;
                Ok(ExecutionResult::Continue)
            }
        }
    }
}
