//! Instruction elements.
//!
//! Most instructions are fully known once their line is parsed and are
//! stored as a ready-to-encode [`Instruction`]. Absolute load/store and
//! jump instructions may name a label, so their address stays symbolic
//! until the label table is resolved.

use std::collections::BTreeMap;

use crate::cpu::decode::{encode, Instruction};
use crate::cpu::isa::{JumpKind, LoadStoreOp};
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::Register;

use super::element::ProgramElement;
use super::lexer::Token;

/// Highest address a jump or absolute load/store can name.
pub const ADDRESS_MAX: i32 = MEMORY_SIZE as i32 - 1;

/// Instruction families, as selected by the mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionClass {
    Misc,
    Alu,
    Stack,
    StackImmediate,
    Test,
    LoadStore,
    LoadStoreRegister,
    Jump,
    JumpRegister,
}

impl InstructionClass {
    /// Classify a (rewritten, lowercase) mnemonic.
    pub fn of(mnemonic: &str) -> Option<InstructionClass> {
        use InstructionClass::*;

        let class = match mnemonic {
            "sys" | "mv" | "inc" | "dec" | "seti" | "mcp" | "debug" | "nop" => Misc,
            "imm" | "add" | "sub" | "mul" | "div" | "mod" | "and" | "or" | "xor" | "shl"
            | "shr" | "min" | "max" | "not" | "lnot" | "neg" => Alu,
            "push" | "pop" | "dup" | "swap" | "drop" | "over" | "rot" | "sop" => Stack,
            "pushi" => StackImmediate,
            "eq" | "neq" | "gt" | "gte" | "lt" | "lte" | "eqi" | "neqi" | "gti" | "gtei"
            | "lti" | "ltei" => Test,
            "lw" | "lwo" | "lb" | "lbo" | "sw" | "swo" | "sb" | "sbo" | "li" => LoadStore,
            "lwr" | "lbr" | "swr" | "sbr" => LoadStoreRegister,
            "j" | "jz" | "jnz" | "jal" => Jump,
            "jr" => JumpRegister,
            _ => return None,
        };
        Some(class)
    }
}

/// An address given either as a number or as a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOperand {
    Value(u16),
    Label(Token),
}

impl AddressOperand {
    pub fn resolve(&self, labels: &BTreeMap<String, i32>) -> Option<u16> {
        match self {
            AddressOperand::Value(v) => Some(*v),
            AddressOperand::Label(token) => labels.get(&token.text).map(|&loc| loc as u16),
        }
    }
}

/// Zero-size directives that only feed debug info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaDirective {
    /// `@file "name"`: the original source file.
    File(String),
    /// `@line N`: the original source line of the following code.
    Line(u32),
    /// `@global "name" location "type"`
    Global { name: String, location: i32, type_name: String },
    /// `@local "name" offset "type"`: a frame-relative local comes into scope.
    Local { name: String, offset: i32, type_name: String },
    /// `@endlocal "name"`: a local goes out of scope.
    EndLocal(String),
}

/// What an instruction element will emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Fully determined at parse time.
    Encoded(Instruction),
    LoadStore { op: LoadStoreOp, reg: Register, offset: Option<Register>, address: AddressOperand },
    Jump { kind: JumpKind, target: AddressOperand },
    Meta(MetaDirective),
    /// The mnemonic was not recognized. Emits nothing.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionElement {
    pub element: ProgramElement,
    pub mnemonic: Token,
    pub operation: Operation,
}

impl InstructionElement {
    pub fn new(element: ProgramElement, mnemonic: Token, operation: Operation) -> Self {
        Self { element, mnemonic, operation }
    }

    /// Encoded size in bytes. Depends only on the operation's form.
    pub fn size(&self) -> u16 {
        match &self.operation {
            Operation::Encoded(instr) => instr.size(),
            Operation::LoadStore { .. } => 4,
            Operation::Jump { .. } => 2,
            Operation::Meta(_) | Operation::Invalid => 0,
        }
    }

    /// Check that any label operand names a known label whose address fits
    /// the instruction. `li` loads a value, so any location is accepted.
    pub fn validate_labels(&mut self, labels: &BTreeMap<String, i32>) {
        let (token, checks_range) = match &self.operation {
            Operation::LoadStore { op, address: AddressOperand::Label(token), .. } => {
                (token.clone(), *op != LoadStoreOp::Li)
            }
            Operation::Jump { target: AddressOperand::Label(token), .. } => (token.clone(), true),
            _ => return,
        };

        match labels.get(&token.text) {
            None => self
                .element
                .add_error(&token, format!("Unresolved label: {}", token.text)),
            Some(&location) if checks_range && !(0..=ADDRESS_MAX).contains(&location) => self
                .element
                .add_error(&token, format!("Integer value out of range: 0-{}", ADDRESS_MAX)),
            Some(_) => {}
        }
    }

    /// The concrete instruction, once labels are known.
    pub fn resolve(&self, labels: &BTreeMap<String, i32>) -> Option<Instruction> {
        match &self.operation {
            Operation::Encoded(instr) => Some(*instr),
            Operation::LoadStore { op, reg, offset, address } => Some(Instruction::LoadStore {
                op: *op,
                reg: *reg,
                offset: *offset,
                address: address.resolve(labels)?,
            }),
            Operation::Jump { kind, target } => Some(Instruction::Jump {
                kind: *kind,
                target: target.resolve(labels)?,
            }),
            Operation::Meta(_) | Operation::Invalid => None,
        }
    }

    /// Encoded bytes. Empty for meta directives.
    pub fn encode(&self, labels: &BTreeMap<String, i32>) -> Vec<u8> {
        self.resolve(labels).map(|instr| encode(&instr)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::{tokenize, TokenKind};

    fn element(operation: Operation) -> InstructionElement {
        let token = tokenize("x").remove(0);
        InstructionElement::new(ProgramElement::new(Vec::new(), 1), token, operation)
    }

    fn label(name: &str) -> Token {
        let token = tokenize(name).remove(0);
        assert_eq!(token.kind, TokenKind::Identifier);
        token
    }

    #[test]
    fn test_classify() {
        assert_eq!(InstructionClass::of("sys"), Some(InstructionClass::Misc));
        assert_eq!(InstructionClass::of("imm"), Some(InstructionClass::Alu));
        assert_eq!(InstructionClass::of("sop"), Some(InstructionClass::Stack));
        assert_eq!(InstructionClass::of("pushi"), Some(InstructionClass::StackImmediate));
        assert_eq!(InstructionClass::of("ltei"), Some(InstructionClass::Test));
        assert_eq!(InstructionClass::of("sbo"), Some(InstructionClass::LoadStore));
        assert_eq!(InstructionClass::of("lbr"), Some(InstructionClass::LoadStoreRegister));
        assert_eq!(InstructionClass::of("jal"), Some(InstructionClass::Jump));
        assert_eq!(InstructionClass::of("jr"), Some(InstructionClass::JumpRegister));
        assert_eq!(InstructionClass::of("frob"), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(element(Operation::Encoded(Instruction::Nop)).size(), 2);
        assert_eq!(
            element(Operation::Jump { kind: JumpKind::J, target: AddressOperand::Value(0) }).size(),
            2
        );
        let li = Operation::LoadStore {
            op: LoadStoreOp::Li,
            reg: Register::T0,
            offset: None,
            address: AddressOperand::Label(label("msg")),
        };
        assert_eq!(element(li).size(), 4);
        assert_eq!(element(Operation::Meta(MetaDirective::Line(3))).size(), 0);
        assert_eq!(element(Operation::Invalid).size(), 0);
    }

    #[test]
    fn test_label_resolution() {
        let mut labels = BTreeMap::new();
        labels.insert("end".to_string(), 12);

        let mut jump = element(Operation::Jump { kind: JumpKind::Jz, target: AddressOperand::Label(label("end")) });
        jump.validate_labels(&labels);
        assert!(!jump.element.has_errors());
        assert_eq!(jump.encode(&labels), vec![0xD0, 0x0C]);

        let mut missing = element(Operation::Jump { kind: JumpKind::J, target: AddressOperand::Label(label("nowhere")) });
        missing.validate_labels(&labels);
        assert_eq!(missing.element.errors.len(), 1);
        assert_eq!(missing.element.errors[0].message, "Unresolved label: nowhere");
        assert!(missing.encode(&labels).is_empty());
    }

    #[test]
    fn test_label_past_memory_is_out_of_range() {
        let mut labels = BTreeMap::new();
        labels.insert("far".to_string(), 4104);

        let mut jump = element(Operation::Jump { kind: JumpKind::J, target: AddressOperand::Label(label("far")) });
        jump.validate_labels(&labels);
        assert_eq!(jump.element.errors.len(), 1);
        assert_eq!(jump.element.errors[0].message, "Integer value out of range: 0-4095");

        let load = |op: LoadStoreOp| Operation::LoadStore {
            op,
            reg: Register::T0,
            offset: None,
            address: AddressOperand::Label(label("far")),
        };
        let mut lw = element(load(LoadStoreOp::Lw));
        lw.validate_labels(&labels);
        assert!(lw.element.has_errors());

        let mut li = element(load(LoadStoreOp::Li));
        li.validate_labels(&labels);
        assert!(!li.element.has_errors());
    }
}
