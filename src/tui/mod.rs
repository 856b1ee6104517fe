//! Terminal debugger for MTMC-16 programs.
//!
//! Provides an interactive debugger with:
//! - Register and status view
//! - Hex memory view highlighting the PC, stack and frame buffer
//! - Step/run/pause/breakpoint controls
//! - Disassembly annotated with source lines
//! - Console output and line input for programs waiting on `rint`/`rstr`

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
