//! CPU emulation for the MTMC-16.
//!
//! This module implements the complete machine:
//! - 4096 bytes of byte-addressable, big-endian memory
//! - 16 user registers plus 6 machine registers, all 16-bit
//! - a 16-bit instruction set with 2- and 4-byte encodings
//! - an observer bus for tracing and UI

pub mod decode;
pub mod execute;
pub mod isa;
pub mod memory;
pub mod observer;
pub mod registers;

pub use decode::{decode, encode, DecodeError, Instruction};
pub use execute::{alu, ComputerStatus, Cpu, CpuError};
pub use isa::{AluOp, JumpKind, LoadStoreOp, RegisterLoadStoreOp, StackOp, TestOp};
pub use memory::{Memory, MemoryError, FRAME_BUFFER_START, MEMORY_SIZE};
pub use observer::{EventBus, ListenerId, Observer};
pub use registers::{Register, Registers};
