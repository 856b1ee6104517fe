//! Disassembler for MTMC-16 programs.
//!
//! Converts machine code back to assembly text. The text for any
//! instruction the assembler accepts assembles back to the same bytes.

use std::fmt::Write;

use crate::cpu::decode::{decode, is_double_word, Instruction};
use crate::cpu::isa::LoadStoreOp;
use crate::cpu::registers::Register;
use crate::executable::Executable;
use crate::os::syscall::SysCall;

/// Disassemble one instruction word. `data` is the following word, used
/// only by double-word instructions.
pub fn disassemble_instruction(word: u16, data: u16) -> String {
    match decode(word, data) {
        Ok(instr) => format_instruction(&instr),
        Err(_) => format!("??? {:#06x}", word),
    }
}

/// Read the instruction at `addr` in `bytes`. Returns its text and size.
pub fn disassemble_at(bytes: &[u8], addr: usize) -> (String, usize) {
    let word_at = |i: usize| match (bytes.get(i), bytes.get(i + 1)) {
        (Some(&hi), Some(&lo)) => Some(u16::from_be_bytes([hi, lo])),
        _ => None,
    };
    let Some(word) = word_at(addr) else {
        return ("??".to_string(), 1);
    };
    if is_double_word(word) {
        let data = word_at(addr + 2).unwrap_or(0);
        (disassemble_instruction(word, data), 4)
    } else {
        (disassemble_instruction(word, 0), 2)
    }
}

/// Disassemble a code segment into an address/hex/mnemonic listing.
pub fn disassemble(code: &[u8]) -> String {
    let mut output = String::new();
    let mut addr = 0;
    while addr < code.len() {
        let (text, size) = disassemble_at(code, addr);
        let end = (addr + size).min(code.len());
        let hex: Vec<String> = code[addr..end].iter().map(|b| format!("{:02x}", b)).collect();
        let _ = writeln!(output, "{:04x}: {:<12} {}", addr, hex.join(" "), text);
        addr += size;
    }
    output
}

/// Listing of a whole executable: code annotated with source lines when
/// debug info is present, then a hex dump of the data segment.
pub fn disassemble_executable(exe: &Executable) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# {} ({} code bytes, {} data bytes)", exe.source_name, exe.code.len(), exe.data.len());

    let mut addr = 0;
    while addr < exe.code.len() {
        let (text, size) = disassemble_at(&exe.code, addr);
        let line = exe
            .debug_info
            .as_ref()
            .and_then(|info| info.assembly_line(addr as u16));
        match line {
            Some(line) => {
                let _ = writeln!(output, "{:04x}: {:<24} # line {}", addr, text, line);
            }
            None => {
                let _ = writeln!(output, "{:04x}: {}", addr, text);
            }
        }
        addr += size;
    }

    if !exe.data.is_empty() {
        let _ = writeln!(output, ".data");
        for (i, chunk) in exe.data.chunks(8).enumerate() {
            let start = exe.code.len() + i * 8;
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            let _ = writeln!(output, "{:04x}: {:<24} {}", start, hex.join(" "), ascii);
        }
    }
    output
}

/// Trailing stack operand, omitted for the default `sp`.
fn stack_suffix(stack: Register) -> String {
    if stack == Register::Sp {
        String::new()
    } else {
        format!(" {}", stack)
    }
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        // Misc
        Instruction::Sys { call } => match SysCall::from_selector(call) {
            Some(call) => format!("sys {}", call),
            None => format!("sys {:#04x}", call),
        },
        Instruction::Mv { to, from } => format!("mv {} {}", to, from),
        Instruction::Inc { target, amount } => format!("inc {} {}", target, amount),
        Instruction::Dec { target, amount } => format!("dec {} {}", target, amount),
        Instruction::Seti { target, value } => format!("seti {} {}", target, value),
        Instruction::Mcp { from, to, size } => format!("mcp {} {} {}", from, to, size),
        Instruction::Debug { index } => format!("debug {}", index),
        Instruction::Nop => "nop".to_string(),

        // ALU
        Instruction::Alu { op, target, .. } if op.is_unary() => format!("{} {}", op, target),
        Instruction::Alu { op, target, source } => format!("{} {} {}", op, target, source),
        Instruction::AluImm { op, target, value } => format!("imm {} {} {}", op, target, value),

        // Stack
        Instruction::Push { source, stack } => format!("push {}{}", source, stack_suffix(stack)),
        Instruction::Pop { target, stack } => format!("pop {}{}", target, stack_suffix(stack)),
        Instruction::Stack { op, stack } => format!("{}{}", op.name(), stack_suffix(stack)),
        Instruction::Sop { op, stack } => format!("sop {}{}", op, stack_suffix(stack)),
        Instruction::PushImm { value, stack } => format!("pushi {}{}", value, stack_suffix(stack)),

        // Test
        Instruction::Test { op, lhs, rhs } => format!("{} {} {}", op.name(), lhs, rhs),
        Instruction::TestImm { op, lhs, value } => format!("{}i {} {}", op.name(), lhs, value),

        // Load/store
        Instruction::LoadStore { op, reg, offset, address } => match offset {
            Some(offset) => format!("{}o {} {} {}", op.name(), reg, offset, address),
            None if op == LoadStoreOp::Li => format!("li {} {}", reg, address as i16),
            None => format!("{} {} {}", op.name(), reg, address),
        },
        Instruction::LoadStoreReg { op, reg, base, offset } => match offset {
            Some(offset) => format!("{} {} {} {}", op.name(), reg, base, offset),
            None => format!("{} {} {}", op.name(), reg, base),
        },

        // Jumps
        Instruction::JumpReg { reg } => format!("jr {}", reg),
        Instruction::Jump { kind, target } => format!("{} {}", kind.name(), target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::Assembler;
    use crate::cpu::decode::encode;
    use crate::cpu::isa::AluOp;
    use proptest::prelude::*;

    #[test]
    fn test_format_examples() {
        assert_eq!(disassemble_instruction(0x0000, 0), "sys exit");
        assert_eq!(disassemble_instruction(0x0FFF, 0), "nop");
        assert_eq!(disassemble_instruction(0x1001, 0), "add t0 t1");
        assert_eq!(disassemble_instruction(0x1E30, 0), "neg t3");
        assert_eq!(disassemble_instruction(0x1F00, 0xFFFB), "imm add t0 -5");
        assert_eq!(disassemble_instruction(0x2115, 0), "pop t1 t5");
        assert_eq!(disassemble_instruction(0x2F0D, 7), "pushi 7");
        assert_eq!(disassemble_instruction(0x3A05, 0), "gti t0 5");
        assert_eq!(disassemble_instruction(0x406F, 0), "lwr t0 a0");
        assert_eq!(disassemble_instruction(0x8101, 100), "lwo t0 t1 100");
        assert_eq!(disassemble_instruction(0x8F00, 0xFFFF), "li t0 -1");
        assert_eq!(disassemble_instruction(0xF123, 0), "jal 291");
        assert_eq!(disassemble_instruction(0xA000, 0), "??? 0xa000");
    }

    #[test]
    fn test_listing_walks_double_words() {
        let code = [0x8F, 0x00, 0x00, 0x0A, 0x00, 0x00];
        let listing = disassemble(&code);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 8f 00 00 0a"));
        assert!(lines[0].ends_with("li t0 10"));
        assert!(lines[1].starts_with("0004:"));
        assert!(lines[1].ends_with("sys exit"));
    }

    #[test]
    fn test_truncated_code() {
        assert_eq!(disassemble_at(&[0x0F], 0), ("??".to_string(), 1));
        assert_eq!(disassemble_at(&[0x8F, 0x00], 0).1, 4);
    }

    #[test]
    fn test_executable_listing() {
        let exe = Assembler::new()
            .with_source_name("t.asm")
            .assemble(".data\nmsg: \"ok\"\n.text\nli a0 msg\nsys wstr\nsys exit")
            .into_result()
            .unwrap();
        let listing = disassemble_executable(&exe);
        assert!(listing.contains("# t.asm (8 code bytes, 3 data bytes)"));
        assert!(listing.contains("# line 4"));
        assert!(listing.contains(".data"));
        assert!(listing.contains("ok."));
    }

    #[test]
    fn test_reassembles_known_instructions() {
        let cases = [
            Instruction::Sop { op: AluOp::Max, stack: Register::T5 },
            Instruction::Alu { op: AluOp::Lnot, target: Register::A2, source: Register::A2 },
            Instruction::Mcp { from: Register::A0, to: Register::A1, size: 12 },
            Instruction::Inc { target: Register::T0, amount: 0 },
        ];
        for instr in cases {
            let text = format_instruction(&instr);
            let exe = Assembler::new().assemble(&text).into_result().unwrap();
            assert_eq!(exe.code, encode(&instr), "{}", text);
        }
    }

    proptest! {
        #[test]
        fn test_disassembly_reassembles(word in any::<u16>(), data in any::<u16>()) {
            let instr = decode(word, data);
            prop_assume!(instr.is_ok());
            let instr = instr.unwrap();
            let text = format_instruction(&instr);
            let result = Assembler::new().assemble(&text);
            prop_assume!(result.is_ok());
            prop_assert_eq!(&result.executable.unwrap().code, &encode(&instr), "{}", text);
        }
    }
}
