//! The `Code` attribute and offset-preserving code edits.

use std::collections::BTreeMap;

use crate::attribute::{
    self, LINE_NUMBER_TABLE, LOCAL_VARIABLE_TABLE, LOCAL_VARIABLE_TYPE_TABLE, RawAttribute,
    STACK_MAP_TABLE, parse_attributes, write_attributes,
};
use crate::constant::ConstantPool;
use crate::error::{ClassfileError, Result};
use crate::opcode::{self, LOOKUPSWITCH, TABLESWITCH, read_i32, switch_padding};
use crate::reader::{ClassReader, WriteBe, checked_u2, checked_u4};
use crate::stackmap::{self, VerificationType};

/// Largest legal `code_length`.
pub const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<RawAttribute>,
}

/// Position and size of one decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    pub length: usize,
}

impl Instruction {
    /// The first u2 operand, i.e. the constant pool index for field, method
    /// and type instructions.
    pub fn u2_operand(&self, code: &[u8]) -> u16 {
        u16::from_be_bytes([code[self.offset + 1], code[self.offset + 2]])
    }
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            code,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut reader = ClassReader::new(info);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()? as usize;
        let code = reader.read_slice(code_length)?.to_vec();
        let handlers = reader.read_u2()?;
        let mut exception_table = Vec::with_capacity(handlers as usize);
        for _ in 0..handlers {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u2()?,
                end_pc: reader.read_u2()?,
                handler_pc: reader.read_u2()?,
                catch_type: reader.read_u2()?,
            });
        }
        let attributes = parse_attributes(&mut reader)?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.len() > MAX_CODE_LENGTH {
            return Err(ClassfileError::LimitExceeded { what: "code length" });
        }
        let mut out = Vec::with_capacity(self.code.len() + 16);
        out.put_u2(self.max_stack);
        out.put_u2(self.max_locals);
        out.put_u4(checked_u4(self.code.len(), "code length")?);
        out.extend_from_slice(&self.code);
        out.put_u2(checked_u2(self.exception_table.len(), "exception table")?);
        for handler in &self.exception_table {
            out.put_u2(handler.start_pc);
            out.put_u2(handler.end_pc);
            out.put_u2(handler.handler_pc);
            out.put_u2(handler.catch_type);
        }
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    pub fn instructions(&self) -> Result<Vec<Instruction>> {
        decode(&self.code)
    }

    /// Returns a copy of this code with `insertions[offset]` placed directly
    /// before the instruction at `offset`.
    ///
    /// Inserted snippets must be straight-line code. Branches that targeted
    /// an instruction with an insertion now target the start of the inserted
    /// snippet, so every path runs it. Branch offsets, switch padding, the
    /// exception table and the offset-carrying debug and verification
    /// attributes are relocated; type annotations on code are dropped
    /// because their offsets cannot be carried over reliably.
    pub fn insert_before(
        &self,
        insertions: &BTreeMap<usize, Vec<u8>>,
        pool: &ConstantPool,
    ) -> Result<CodeAttribute> {
        let instructions = self.instructions()?;
        let layout = Layout::compute(&instructions, insertions, self.code.len())?;

        let mut code = Vec::with_capacity(layout.code_length);
        for (index, insn) in instructions.iter().enumerate() {
            if let Some(snippet) = insertions.get(&insn.offset) {
                code.extend_from_slice(snippet);
            }
            let new_offset = layout.instruction_offsets[index];
            debug_assert_eq!(code.len(), new_offset);
            self.relocate_instruction(insn, new_offset, &layout, &mut code)?;
        }
        if code.len() > MAX_CODE_LENGTH {
            return Err(ClassfileError::LimitExceeded { what: "code length" });
        }

        let exception_table = self
            .exception_table
            .iter()
            .map(|handler| {
                Ok(ExceptionHandler {
                    start_pc: layout.map_u2(handler.start_pc as usize)?,
                    end_pc: layout.map_u2(handler.end_pc as usize)?,
                    handler_pc: layout.map_u2(handler.handler_pc as usize)?,
                    catch_type: handler.catch_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut attributes = Vec::with_capacity(self.attributes.len());
        for raw in &self.attributes {
            let name = raw.name(pool)?;
            let info = match name {
                LINE_NUMBER_TABLE => relocate_line_numbers(&raw.info, &layout)?,
                LOCAL_VARIABLE_TABLE | LOCAL_VARIABLE_TYPE_TABLE => {
                    relocate_local_variables(&raw.info, &layout)?
                }
                STACK_MAP_TABLE => relocate_stack_map(&raw.info, &layout)?,
                attribute::RUNTIME_VISIBLE_TYPE_ANNOTATIONS
                | attribute::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => continue,
                _ => raw.info.clone(),
            };
            attributes.push(RawAttribute {
                name_index: raw.name_index,
                info,
            });
        }

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn relocate_instruction(
        &self,
        insn: &Instruction,
        new_offset: usize,
        layout: &Layout,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let old = insn.offset;
        let bytes = &self.code[old..old + insn.length];
        let target = |relative: i64| -> Result<i64> {
            let absolute = old as i64 + relative;
            if absolute < 0 {
                return Err(ClassfileError::InvalidOffset { offset: old });
            }
            Ok(layout.map(absolute as usize)? as i64 - new_offset as i64)
        };

        match insn.opcode {
            op if opcode::is_short_branch(op) => {
                let relative = i16::from_be_bytes([bytes[1], bytes[2]]) as i64;
                let moved = i16::try_from(target(relative)?)
                    .map_err(|_| ClassfileError::LimitExceeded { what: "branch offset" })?;
                out.push(op);
                out.extend_from_slice(&moved.to_be_bytes());
            }
            op if opcode::is_wide_branch(op) => {
                let relative = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as i64;
                let moved = i32::try_from(target(relative)?)
                    .map_err(|_| ClassfileError::LimitExceeded { what: "branch offset" })?;
                out.push(op);
                out.extend_from_slice(&moved.to_be_bytes());
            }
            op @ (TABLESWITCH | LOOKUPSWITCH) => {
                let base = old + 1 + switch_padding(old);
                out.push(op);
                out.extend(std::iter::repeat_n(0u8, switch_padding(new_offset)));
                let default = read_i32(&self.code, base, old)? as i64;
                out.extend_from_slice(&(target(default)? as i32).to_be_bytes());
                if op == TABLESWITCH {
                    let low = read_i32(&self.code, base + 4, old)?;
                    let high = read_i32(&self.code, base + 8, old)?;
                    out.extend_from_slice(&low.to_be_bytes());
                    out.extend_from_slice(&high.to_be_bytes());
                    let entries = (high as i64 - low as i64 + 1) as usize;
                    for i in 0..entries {
                        let relative = read_i32(&self.code, base + 12 + i * 4, old)? as i64;
                        out.extend_from_slice(&(target(relative)? as i32).to_be_bytes());
                    }
                } else {
                    let pairs = read_i32(&self.code, base + 4, old)?;
                    out.extend_from_slice(&pairs.to_be_bytes());
                    for i in 0..pairs as usize {
                        let key = read_i32(&self.code, base + 8 + i * 8, old)?;
                        let relative = read_i32(&self.code, base + 12 + i * 8, old)? as i64;
                        out.extend_from_slice(&key.to_be_bytes());
                        out.extend_from_slice(&(target(relative)? as i32).to_be_bytes());
                    }
                }
            }
            _ => out.extend_from_slice(bytes),
        }
        Ok(())
    }
}

/// Splits a code array into instructions.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let length = opcode::instruction_length(code, offset)?;
        instructions.push(Instruction {
            offset,
            opcode: code[offset],
            length,
        });
        offset += length;
    }
    Ok(instructions)
}

/// Old-offset to new-offset mapping for an edited code array.
struct Layout {
    /// Old instruction offset (and the old code end) to the new position
    /// control flow arrives at, i.e. the start of any inserted snippet.
    offsets: BTreeMap<usize, usize>,
    /// Old instruction offset to where the instruction itself now starts.
    exact: BTreeMap<usize, usize>,
    instruction_offsets: Vec<usize>,
    code_length: usize,
}

impl Layout {
    fn compute(
        instructions: &[Instruction],
        insertions: &BTreeMap<usize, Vec<u8>>,
        old_length: usize,
    ) -> Result<Self> {
        let mut offsets = BTreeMap::new();
        let mut exact = BTreeMap::new();
        let mut instruction_offsets = Vec::with_capacity(instructions.len());
        let mut cursor = 0usize;

        for insn in instructions {
            // Offsets that pointed at the instruction now point at the
            // snippet in front of it.
            offsets.insert(insn.offset, cursor);
            if let Some(snippet) = insertions.get(&insn.offset) {
                cursor += snippet.len();
            }
            instruction_offsets.push(cursor);
            exact.insert(insn.offset, cursor);
            cursor += match insn.opcode {
                TABLESWITCH | LOOKUPSWITCH => {
                    insn.length - switch_padding(insn.offset) + switch_padding(cursor)
                }
                _ => insn.length,
            };
        }
        offsets.insert(old_length, cursor);

        if let Some(stray) = insertions.keys().find(|offset| {
            !instructions.iter().any(|insn| insn.offset == **offset)
        }) {
            return Err(ClassfileError::InvalidOffset { offset: *stray });
        }

        Ok(Self {
            offsets,
            exact,
            instruction_offsets,
            code_length: cursor,
        })
    }

    fn map(&self, old: usize) -> Result<usize> {
        self.offsets
            .get(&old)
            .copied()
            .ok_or(ClassfileError::InvalidOffset { offset: old })
    }

    fn map_u2(&self, old: usize) -> Result<u16> {
        checked_u2(self.map(old)?, "code offset")
    }

    fn map_exact_u2(&self, old: usize) -> Result<u16> {
        let new = self
            .exact
            .get(&old)
            .copied()
            .ok_or(ClassfileError::InvalidOffset { offset: old })?;
        checked_u2(new, "code offset")
    }
}

fn relocate_line_numbers(info: &[u8], layout: &Layout) -> Result<Vec<u8>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u2()?;
    let mut out = Vec::with_capacity(info.len());
    out.put_u2(count);
    for _ in 0..count {
        let start_pc = reader.read_u2()?;
        let line = reader.read_u2()?;
        out.put_u2(layout.map_u2(start_pc as usize)?);
        out.put_u2(line);
    }
    Ok(out)
}

fn relocate_local_variables(info: &[u8], layout: &Layout) -> Result<Vec<u8>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u2()?;
    let mut out = Vec::with_capacity(info.len());
    out.put_u2(count);
    for _ in 0..count {
        let start = reader.read_u2()? as usize;
        let length = reader.read_u2()? as usize;
        let new_start = layout.map(start)?;
        let new_end = layout.map(start + length)?;
        out.put_u2(checked_u2(new_start, "code offset")?);
        out.put_u2(checked_u2(new_end - new_start, "local variable range")?);
        // name, descriptor/signature, slot
        out.extend_from_slice(reader.read_slice(6)?);
    }
    Ok(out)
}

fn relocate_stack_map(info: &[u8], layout: &Layout) -> Result<Vec<u8>> {
    let mut frames = stackmap::parse(info)?;
    for frame in &mut frames {
        frame.offset = layout.map(frame.offset)?;
        for vt in frame.verification_types_mut() {
            if let VerificationType::Uninitialized(offset) = vt {
                // Points at the `new` instruction itself, not at control flow.
                *offset = layout.map_exact_u2(*offset as usize)?;
            }
        }
    }
    stackmap::encode(&frames)
}
