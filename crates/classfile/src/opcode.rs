//! Opcode constants used by the transform and the instruction length table.

use crate::error::{ClassfileError, Result};

pub const ACONST_NULL: u8 = 0x01;
pub const ALOAD_0: u8 = 0x2a;
pub const ICONST_0: u8 = 0x03;
pub const POP: u8 = 0x57;
pub const DUP: u8 = 0x59;
pub const IINC: u8 = 0x84;
pub const IFEQ: u8 = 0x99;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const ANEWARRAY: u8 = 0xbd;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;

/// Padding after a switch opcode so that its operands are 4-byte aligned.
pub fn switch_padding(opcode_offset: usize) -> usize {
    (4 - (opcode_offset + 1) % 4) % 4
}

/// Whether the opcode carries a signed 16-bit branch offset.
pub fn is_short_branch(opcode: u8) -> bool {
    matches!(opcode, IFEQ..=JSR | IFNULL | IFNONNULL)
}

/// Whether the opcode carries a signed 32-bit branch offset.
pub fn is_wide_branch(opcode: u8) -> bool {
    matches!(opcode, GOTO_W | JSR_W)
}

/// Byte length of the instruction starting at `offset`.
pub fn instruction_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let fixed = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        LDC => 2,
        LDC_W | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        IFEQ..=JSR => 3,
        0xa9 => 2,
        TABLESWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let low = read_i32(code, base + 4, offset)?;
            let high = read_i32(code, base + 8, offset)?;
            if high < low {
                return Err(ClassfileError::TruncatedInstruction { offset });
            }
            let entries = (high as i64 - low as i64 + 1) as usize;
            base + 12 + entries * 4 - offset
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let pairs = read_i32(code, base + 4, offset)?;
            if pairs < 0 {
                return Err(ClassfileError::TruncatedInstruction { offset });
            }
            base + 8 + pairs as usize * 8 - offset
        }
        0xac..=0xb1 => 1,
        GETSTATIC..=INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        NEW => 3,
        0xbc => 2,
        ANEWARRAY => 3,
        0xbe | 0xbf => 1,
        CHECKCAST | INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        WIDE => match code.get(offset + 1) {
            Some(&IINC) => 6,
            Some(_) => 4,
            None => return Err(ClassfileError::TruncatedInstruction { offset }),
        },
        MULTIANEWARRAY => 4,
        IFNULL | IFNONNULL => 3,
        GOTO_W | JSR_W => 5,
        other => {
            return Err(ClassfileError::UnknownOpcode {
                opcode: other,
                offset,
            });
        }
    };
    if offset + fixed > code.len() {
        return Err(ClassfileError::TruncatedInstruction { offset });
    }
    Ok(fixed)
}

pub(crate) fn read_i32(code: &[u8], at: usize, insn_offset: usize) -> Result<i32> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ClassfileError::TruncatedInstruction {
            offset: insn_offset,
        })
}
