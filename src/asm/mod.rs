//! Assembler and disassembler for MTMC-16 programs.
//!
//! This module provides:
//! - A tokenizer for the assembly language
//! - A two-pass assembler (text → [`Executable`](crate::executable::Executable))
//! - A disassembler (machine code → readable text)

pub mod assembler;
pub mod data;
pub mod disasm;
pub mod element;
pub mod instruction;
pub mod labels;
pub mod lexer;

pub use assembler::{assemble, Assembler, AssemblyErrors, AssemblyResult};
pub use disasm::{disassemble, disassemble_executable, format_instruction};
pub use element::AssemblyError;
pub use labels::LabelTable;
pub use lexer::{tokenize, tokenize_with, Token, TokenKind};
