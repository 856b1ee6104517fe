//! Instruction encoding and decoding for the MTMC-16.
//!
//! Every instruction is one 16-bit word, optionally followed by a second
//! data word. The top nibble selects the class:
//! - `0000` misc (sys, mv, inc, dec, seti, mcp, debug, nop)
//! - `0001` ALU
//! - `0010` stack
//! - `0011` test
//! - `01xx` load/store through registers
//! - `1000` load/store through an absolute address
//! - `1001` jump through a register
//! - `11xx` absolute jumps
//!
//! `1010` and `1011` are unassigned.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use super::isa::{AluOp, JumpKind, LoadStoreOp, RegisterLoadStoreOp, StackOp, TestOp};
use super::registers::Register;

/// Highest address an absolute jump can encode.
pub const MAX_JUMP_TARGET: u16 = 0x0FFF;

/// Decoded MTMC-16 instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Misc ====================

    /// Hand an 8-bit selector to the operating system.
    Sys { call: u8 },

    /// `to := from`
    Mv { to: Register, from: Register },

    /// `target := target + amount`
    Inc { target: Register, amount: u8 },

    /// `target := target - amount`
    Dec { target: Register, amount: u8 },

    /// `target := value`
    Seti { target: Register, value: u8 },

    /// Copy `size` bytes from `[from]` to `[to]`.
    Mcp { from: Register, to: Register, size: u16 },

    /// Emit a debug string from the executable's debug info.
    Debug { index: u8 },

    /// Do nothing.
    Nop,

    // ==================== ALU ====================

    /// `target := target op source`. Unary operations ignore `source`.
    Alu { op: AluOp, target: Register, source: Register },

    /// `target := target op value`
    AluImm { op: AluOp, target: Register, value: i16 },

    // ==================== Stack ====================

    Push { source: Register, stack: Register },

    Pop { target: Register, stack: Register },

    Stack { op: StackOp, stack: Register },

    /// Apply an ALU operation to the top of the stack.
    Sop { op: AluOp, stack: Register },

    PushImm { value: i16, stack: Register },

    // ==================== Test ====================

    Test { op: TestOp, lhs: Register, rhs: Register },

    TestImm { op: TestOp, lhs: Register, value: u8 },

    // ==================== Load/Store ====================

    /// Absolute address, optionally plus an offset register.
    LoadStore { op: LoadStoreOp, reg: Register, offset: Option<Register>, address: u16 },

    /// Address from `base`, optionally plus an offset register.
    LoadStoreReg { op: RegisterLoadStoreOp, reg: Register, base: Register, offset: Option<Register> },

    // ==================== Jumps ====================

    JumpReg { reg: Register },

    Jump { kind: JumpKind, target: u16 },
}

impl Instruction {
    /// Encoded size in bytes.
    pub fn size(&self) -> u16 {
        match self {
            Instruction::Mcp { .. }
            | Instruction::AluImm { .. }
            | Instruction::PushImm { .. }
            | Instruction::LoadStore { .. } => 4,
            _ => 2,
        }
    }
}

/// Does this instruction word carry a second data word?
pub fn is_double_word(word: u16) -> bool {
    word >> 12 == 0x8 || matches!(word >> 8, 0x1F | 0x2F | 0x05)
}

#[inline]
fn nibble(word: u16, index: u16) -> u16 {
    (word >> (index * 4)) & 0xF
}

#[inline]
fn reg(word: u16, index: u16) -> Register {
    Register::from_nibble(nibble(word, index))
}

/// Decode an instruction word. `data` is the following word for
/// double-word instructions and is ignored otherwise.
pub fn decode(word: u16, data: u16) -> Result<Instruction, DecodeError> {
    let invalid = DecodeError::InvalidOpcode(word);

    let instruction = match nibble(word, 3) {
        0x0 => match nibble(word, 2) {
            0x0 => Instruction::Sys { call: (word & 0xFF) as u8 },
            0x1 => Instruction::Mv { to: reg(word, 1), from: reg(word, 0) },
            0x2 => Instruction::Inc { target: reg(word, 1), amount: nibble(word, 0) as u8 },
            0x3 => Instruction::Dec { target: reg(word, 1), amount: nibble(word, 0) as u8 },
            0x4 => Instruction::Seti { target: reg(word, 1), value: nibble(word, 0) as u8 },
            0x5 => Instruction::Mcp { from: reg(word, 1), to: reg(word, 0), size: data },
            0x8 => Instruction::Debug { index: (word & 0xFF) as u8 },
            0xF => Instruction::Nop,
            _ => return Err(invalid),
        },
        0x1 => {
            let target = reg(word, 1);
            if nibble(word, 2) == AluOp::IMM_CODE {
                let op = AluOp::from_code(nibble(word, 0)).ok_or(invalid)?;
                Instruction::AluImm { op, target, value: data as i16 }
            } else {
                let op = AluOp::from_code(nibble(word, 2)).ok_or(invalid)?;
                let source = if op.is_unary() { target } else { reg(word, 0) };
                Instruction::Alu { op, target, source }
            }
        }
        0x2 => {
            let stack = reg(word, 0);
            match nibble(word, 2) {
                StackOp::PUSH_CODE => Instruction::Push { source: reg(word, 1), stack },
                StackOp::POP_CODE => Instruction::Pop { target: reg(word, 1), stack },
                StackOp::SOP_CODE => {
                    let op = AluOp::from_code(nibble(word, 1)).ok_or(invalid)?;
                    Instruction::Sop { op, stack }
                }
                StackOp::PUSHI_CODE => Instruction::PushImm { value: data as i16, stack },
                code => {
                    let op = StackOp::from_code(code).ok_or(invalid)?;
                    Instruction::Stack { op, stack }
                }
            }
        }
        0x3 => {
            let (op, immediate) = TestOp::from_code(nibble(word, 2)).ok_or(invalid)?;
            let lhs = reg(word, 1);
            if immediate {
                Instruction::TestImm { op, lhs, value: nibble(word, 0) as u8 }
            } else {
                Instruction::Test { op, lhs, rhs: reg(word, 0) }
            }
        }
        0x4..=0x7 => {
            let op = RegisterLoadStoreOp::from_code(word >> 12);
            let offset = match reg(word, 0) {
                Register::Pc => None,
                r => Some(r),
            };
            Instruction::LoadStoreReg { op, reg: reg(word, 2), base: reg(word, 1), offset }
        }
        0x8 => {
            let (op, has_offset) = LoadStoreOp::from_code(nibble(word, 2)).ok_or(invalid)?;
            let offset = has_offset.then(|| reg(word, 0));
            Instruction::LoadStore { op, reg: reg(word, 1), offset, address: data }
        }
        0x9 => Instruction::JumpReg { reg: reg(word, 0) },
        0xC..=0xF => Instruction::Jump {
            kind: JumpKind::from_code(word >> 12),
            target: word & MAX_JUMP_TARGET,
        },
        _ => return Err(invalid),
    };

    Ok(instruction)
}

/// Build a word from four nibbles, most significant first.
#[inline]
fn word(n3: u16, n2: u16, n1: u16, n0: u16) -> u16 {
    (n3 & 0xF) << 12 | (n2 & 0xF) << 8 | (n1 & 0xF) << 4 | (n0 & 0xF)
}

#[inline]
fn r(reg: Register) -> u16 {
    reg.index() as u16
}

/// Encode an instruction as its instruction word and optional data word.
pub fn encode_words(instr: &Instruction) -> (u16, Option<u16>) {
    match *instr {
        Instruction::Sys { call } => (call as u16, None),
        Instruction::Mv { to, from } => (word(0, 0x1, r(to), r(from)), None),
        Instruction::Inc { target, amount } => (word(0, 0x2, r(target), amount as u16), None),
        Instruction::Dec { target, amount } => (word(0, 0x3, r(target), amount as u16), None),
        Instruction::Seti { target, value } => (word(0, 0x4, r(target), value as u16), None),
        Instruction::Mcp { from, to, size } => (word(0, 0x5, r(from), r(to)), Some(size)),
        Instruction::Debug { index } => (0x0800 | index as u16, None),
        Instruction::Nop => (0x0FFF, None),

        Instruction::Alu { op, target, source } => {
            let source = if op.is_unary() { 0 } else { r(source) };
            (word(0x1, op.code(), r(target), source), None)
        }
        Instruction::AluImm { op, target, value } => {
            (word(0x1, AluOp::IMM_CODE, r(target), op.code()), Some(value as u16))
        }

        Instruction::Push { source, stack } => (word(0x2, StackOp::PUSH_CODE, r(source), r(stack)), None),
        Instruction::Pop { target, stack } => (word(0x2, StackOp::POP_CODE, r(target), r(stack)), None),
        Instruction::Stack { op, stack } => (word(0x2, op.code(), 0, r(stack)), None),
        Instruction::Sop { op, stack } => (word(0x2, StackOp::SOP_CODE, op.code(), r(stack)), None),
        Instruction::PushImm { value, stack } => {
            (word(0x2, StackOp::PUSHI_CODE, 0, r(stack)), Some(value as u16))
        }

        Instruction::Test { op, lhs, rhs } => (word(0x3, op.code(), r(lhs), r(rhs)), None),
        Instruction::TestImm { op, lhs, value } => {
            (word(0x3, op.code() | TestOp::IMMEDIATE_BIT, r(lhs), value as u16), None)
        }

        Instruction::LoadStore { op, reg, offset, address } => {
            let (code, offset) = match offset {
                Some(o) => (op.code() | LoadStoreOp::OFFSET_BIT, r(o)),
                None => (op.code(), 0),
            };
            (word(0x8, code, r(reg), offset), Some(address))
        }
        Instruction::LoadStoreReg { op, reg, base, offset } => {
            let offset = offset.map_or(r(Register::Pc), r);
            (word(0x4 | op.code(), r(reg), r(base), offset), None)
        }

        Instruction::JumpReg { reg } => (word(0x9, 0, 0, r(reg)), None),
        Instruction::Jump { kind, target } => {
            ((0xC | kind.code()) << 12 | (target & MAX_JUMP_TARGET), None)
        }
    }
}

/// Encode an instruction to its big-endian byte form.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let (first, second) = encode_words(instr);
    let mut bytes = first.to_be_bytes().to_vec();
    if let Some(data) = second {
        bytes.extend_from_slice(&data.to_be_bytes());
    }
    bytes
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid instruction: {0:#06x}")]
    InvalidOpcode(u16),
}
