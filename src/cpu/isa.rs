//! Operation tables for the MTMC-16 instruction set.
//!
//! Each enum maps a mnemonic to the numeric code the encoder places in an
//! instruction field. The assembler and the decoder both go through these
//! tables.

use serde::{Serialize, Deserialize};
use std::fmt;

/// ALU operations, encoded in a 4-bit field.
///
/// `Imm` (0xF) is not an operation; in the ALU class it marks the
/// immediate form, and it is never valid elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Min,
    Max,
    Not,
    Lnot,
    Neg,
}

impl AluOp {
    pub const ALL: [AluOp; 15] = [
        AluOp::Add, AluOp::Sub, AluOp::Mul, AluOp::Div, AluOp::Mod,
        AluOp::And, AluOp::Or, AluOp::Xor, AluOp::Shl, AluOp::Shr,
        AluOp::Min, AluOp::Max, AluOp::Not, AluOp::Lnot, AluOp::Neg,
    ];

    /// Nibble marking the immediate form of an ALU instruction.
    pub const IMM_CODE: u16 = 0xF;

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<AluOp> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Mul => "mul",
            AluOp::Div => "div",
            AluOp::Mod => "mod",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::Shl => "shl",
            AluOp::Shr => "shr",
            AluOp::Min => "min",
            AluOp::Max => "max",
            AluOp::Not => "not",
            AluOp::Lnot => "lnot",
            AluOp::Neg => "neg",
        }
    }

    pub fn from_name(name: &str) -> Option<AluOp> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Unary operations read and write only the target.
    pub fn is_unary(self) -> bool {
        matches!(self, AluOp::Not | AluOp::Lnot | AluOp::Neg)
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparisons. The immediate variants share a code with their register
/// form plus 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl TestOp {
    pub const ALL: [TestOp; 6] = [
        TestOp::Eq, TestOp::Neq, TestOp::Gt, TestOp::Gte, TestOp::Lt, TestOp::Lte,
    ];

    /// Added to the code of the immediate form.
    pub const IMMEDIATE_BIT: u16 = 0x8;

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Split a 4-bit test field into the comparison and the immediate bit.
    pub fn from_code(code: u16) -> Option<(TestOp, bool)> {
        let immediate = code & Self::IMMEDIATE_BIT != 0;
        Self::ALL
            .get((code & 0x7) as usize)
            .map(|&op| (op, immediate))
    }

    pub fn name(self) -> &'static str {
        match self {
            TestOp::Eq => "eq",
            TestOp::Neq => "neq",
            TestOp::Gt => "gt",
            TestOp::Gte => "gte",
            TestOp::Lt => "lt",
            TestOp::Lte => "lte",
        }
    }

    /// Parse `eq` style or `eqi` style mnemonics.
    /// Returns the comparison and whether the immediate form was named.
    pub fn from_mnemonic(name: &str) -> Option<(TestOp, bool)> {
        if let Some(op) = Self::ALL.iter().copied().find(|op| op.name() == name) {
            return Some((op, false));
        }
        let stem = name.strip_suffix('i')?;
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name() == stem)
            .map(|op| (op, true))
    }

    pub fn evaluate(self, lhs: i16, rhs: i16) -> bool {
        match self {
            TestOp::Eq => lhs == rhs,
            TestOp::Neq => lhs != rhs,
            TestOp::Gt => lhs > rhs,
            TestOp::Gte => lhs >= rhs,
            TestOp::Lt => lhs < rhs,
            TestOp::Lte => lhs <= rhs,
        }
    }
}

/// Stack manipulation primitives that take no register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackOp {
    Dup,
    Swap,
    Drop,
    Over,
    Rot,
}

impl StackOp {
    pub const ALL: [StackOp; 5] = [
        StackOp::Dup, StackOp::Swap, StackOp::Drop, StackOp::Over, StackOp::Rot,
    ];

    pub const PUSH_CODE: u16 = 0x0;
    pub const POP_CODE: u16 = 0x1;
    pub const SOP_CODE: u16 = 0x7;
    pub const PUSHI_CODE: u16 = 0xF;

    pub fn code(self) -> u16 {
        self as u16 + 2
    }

    pub fn from_code(code: u16) -> Option<StackOp> {
        code.checked_sub(2)
            .and_then(|i| Self::ALL.get(i as usize).copied())
    }

    pub fn name(self) -> &'static str {
        match self {
            StackOp::Dup => "dup",
            StackOp::Swap => "swap",
            StackOp::Drop => "drop",
            StackOp::Over => "over",
            StackOp::Rot => "rot",
        }
    }

    pub fn from_name(name: &str) -> Option<StackOp> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }
}

/// Load/store through an absolute address word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStoreOp {
    /// Load word.
    Lw,
    /// Load byte, sign extended.
    Lb,
    /// Store word.
    Sw,
    /// Store low byte.
    Sb,
    /// Load the address word itself.
    Li,
}

impl LoadStoreOp {
    pub const OFFSET_BIT: u16 = 0x1;
    pub const LI_CODE: u16 = 0xF;

    /// Base code; the offset form sets [`Self::OFFSET_BIT`].
    pub fn code(self) -> u16 {
        match self {
            LoadStoreOp::Lw => 0x0,
            LoadStoreOp::Lb => 0x2,
            LoadStoreOp::Sw => 0x4,
            LoadStoreOp::Sb => 0x6,
            LoadStoreOp::Li => Self::LI_CODE,
        }
    }

    /// Returns the operation and whether an offset register is used.
    pub fn from_code(code: u16) -> Option<(LoadStoreOp, bool)> {
        let offset = code & Self::OFFSET_BIT != 0;
        let op = match code {
            0x0 | 0x1 => LoadStoreOp::Lw,
            0x2 | 0x3 => LoadStoreOp::Lb,
            0x4 | 0x5 => LoadStoreOp::Sw,
            0x6 | 0x7 => LoadStoreOp::Sb,
            Self::LI_CODE => return Some((LoadStoreOp::Li, false)),
            _ => return None,
        };
        Some((op, offset))
    }

    pub fn name(self) -> &'static str {
        match self {
            LoadStoreOp::Lw => "lw",
            LoadStoreOp::Lb => "lb",
            LoadStoreOp::Sw => "sw",
            LoadStoreOp::Sb => "sb",
            LoadStoreOp::Li => "li",
        }
    }

    /// Parse `lw`/`lwo` style mnemonics.
    pub fn from_mnemonic(name: &str) -> Option<(LoadStoreOp, bool)> {
        match name {
            "lw" => Some((LoadStoreOp::Lw, false)),
            "lwo" => Some((LoadStoreOp::Lw, true)),
            "lb" => Some((LoadStoreOp::Lb, false)),
            "lbo" => Some((LoadStoreOp::Lb, true)),
            "sw" => Some((LoadStoreOp::Sw, false)),
            "swo" => Some((LoadStoreOp::Sw, true)),
            "sb" => Some((LoadStoreOp::Sb, false)),
            "sbo" => Some((LoadStoreOp::Sb, true)),
            "li" => Some((LoadStoreOp::Li, false)),
            _ => None,
        }
    }

    pub fn is_store(self) -> bool {
        matches!(self, LoadStoreOp::Sw | LoadStoreOp::Sb)
    }
}

/// Load/store with both address and offset in registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterLoadStoreOp {
    Lwr,
    Lbr,
    Swr,
    Sbr,
}

impl RegisterLoadStoreOp {
    pub const ALL: [RegisterLoadStoreOp; 4] = [
        RegisterLoadStoreOp::Lwr,
        RegisterLoadStoreOp::Lbr,
        RegisterLoadStoreOp::Swr,
        RegisterLoadStoreOp::Sbr,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> RegisterLoadStoreOp {
        Self::ALL[(code & 0x3) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            RegisterLoadStoreOp::Lwr => "lwr",
            RegisterLoadStoreOp::Lbr => "lbr",
            RegisterLoadStoreOp::Swr => "swr",
            RegisterLoadStoreOp::Sbr => "sbr",
        }
    }

    pub fn from_name(name: &str) -> Option<RegisterLoadStoreOp> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn is_store(self) -> bool {
        matches!(self, RegisterLoadStoreOp::Swr | RegisterLoadStoreOp::Sbr)
    }
}

/// Absolute jumps, encoded in bits 13-12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpKind {
    /// Unconditional.
    J,
    /// Taken when the test flag is clear.
    Jz,
    /// Taken when the test flag is set.
    Jnz,
    /// Call: saves the return address in `ra`.
    Jal,
}

impl JumpKind {
    pub const ALL: [JumpKind; 4] = [JumpKind::J, JumpKind::Jz, JumpKind::Jnz, JumpKind::Jal];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> JumpKind {
        Self::ALL[(code & 0x3) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            JumpKind::J => "j",
            JumpKind::Jz => "jz",
            JumpKind::Jnz => "jnz",
            JumpKind::Jal => "jal",
        }
    }

    pub fn from_name(name: &str) -> Option<JumpKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alu_codes() {
        assert_eq!(AluOp::Add.code(), 0x0);
        assert_eq!(AluOp::Shr.code(), 0x9);
        assert_eq!(AluOp::Neg.code(), 0xE);
        assert_eq!(AluOp::from_code(AluOp::IMM_CODE), None);
        for op in AluOp::ALL {
            assert_eq!(AluOp::from_code(op.code()), Some(op));
            assert_eq!(AluOp::from_name(op.name()), Some(op));
        }
    }

    #[test]
    fn test_test_mnemonics() {
        assert_eq!(TestOp::from_mnemonic("gte"), Some((TestOp::Gte, false)));
        assert_eq!(TestOp::from_mnemonic("ltei"), Some((TestOp::Lte, true)));
        assert_eq!(TestOp::from_mnemonic("addi"), None);
        assert_eq!(TestOp::from_code(0xA), Some((TestOp::Gt, true)));
        assert_eq!(TestOp::from_code(0x6), None);
    }

    #[test]
    fn test_stack_codes() {
        assert_eq!(StackOp::Dup.code(), 2);
        assert_eq!(StackOp::Rot.code(), 6);
        assert_eq!(StackOp::from_code(StackOp::POP_CODE), None);
        assert_eq!(StackOp::from_code(4), Some(StackOp::Drop));
    }

    #[test]
    fn test_load_store_codes() {
        assert_eq!(LoadStoreOp::from_code(0x5), Some((LoadStoreOp::Sw, true)));
        assert_eq!(LoadStoreOp::from_code(0xF), Some((LoadStoreOp::Li, false)));
        assert_eq!(LoadStoreOp::from_code(0x9), None);
        assert_eq!(LoadStoreOp::from_mnemonic("lbo"), Some((LoadStoreOp::Lb, true)));
    }
}
