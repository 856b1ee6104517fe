//! # MTMC-16 Emulator
//!
//! An assembler and emulator for the MonTana Mini Computer, a small 16-bit
//! teaching machine.
//!
//! The assembler turns textual mnemonics into an [`Executable`], and the
//! [`Cpu`] runs that executable cycle by cycle. Both sides share one
//! [`Instruction`] type, so the encoding cannot drift between them.

pub mod asm;
pub mod cpu;
pub mod executable;
pub mod os;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use asm::{assemble, disassemble, Assembler, AssemblyError, AssemblyErrors, AssemblyResult};
pub use cpu::{ComputerStatus, Cpu, CpuError, Instruction, Memory, Observer, Register, Registers};
pub use executable::{DebugInfo, Executable, ExecutableError};
pub use os::{Console, Mtos, SysCall, SysCallHandler, SysCallOutcome};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
