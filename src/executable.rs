//! Executable artifact for MTMC-16 programs.
//!
//! An executable is a JSON document:
//! - `format`: encoding tag, always `"orc1"`
//! - `code`, `data`: byte arrays loaded back to back at address 0
//! - `graphics`: optional image blobs referenced from the data segment
//! - `sourceName`: where the program came from
//! - `debugInfo`: optional maps from addresses back to source lines

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::cpu::registers::{Register, Registers};

/// The only encoding tag this crate reads and writes.
pub const FORMAT_ORC1: &str = "orc1";

/// A global variable recorded with `@global`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalInfo {
    pub name: String,
    pub location: i32,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A frame-relative local recorded with `@local`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInfo {
    pub name: String,
    pub offset: i32,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Source correlation data. Per-byte vectors are indexed by code address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub assembly_file: String,
    pub assembly_source: String,
    pub assembly_line_numbers: Vec<u32>,
    pub original_file: String,
    pub original_line_numbers: Vec<u32>,
    pub globals: Vec<GlobalInfo>,
    pub locals: Vec<Vec<LocalInfo>>,
    pub debug_strings: Vec<String>,
}

impl DebugInfo {
    /// Assembly source line of the instruction at `addr`.
    pub fn assembly_line(&self, addr: u16) -> Option<u32> {
        self.assembly_line_numbers.get(addr as usize).copied()
    }

    /// Line in the original (pre-assembly) source, if one was recorded.
    pub fn original_line(&self, addr: u16) -> Option<u32> {
        self.original_line_numbers
            .get(addr as usize)
            .copied()
            .filter(|&line| line > 0)
    }

    /// Render debug string `index`, replacing `$reg` with register values.
    pub fn format_debug_string(&self, index: u8, regs: &Registers) -> Option<String> {
        let template = self.debug_strings.get(index as usize)?;
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let name_len = after
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(after.len());
            match Register::from_name(&after[..name_len]).filter(|r| r.is_readable()) {
                Some(reg) => {
                    out.push_str(&regs.get(reg).to_string());
                    rest = &after[name_len..];
                }
                None => {
                    out.push('$');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Some(out)
    }
}

/// An assembled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Executable {
    pub format: String,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    #[serde(default)]
    pub graphics: Vec<Vec<u8>>,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

impl Executable {
    pub fn new(code: Vec<u8>, data: Vec<u8>, source_name: impl Into<String>) -> Self {
        Self {
            format: FORMAT_ORC1.to_string(),
            code,
            data,
            graphics: Vec::new(),
            source_name: source_name.into(),
            debug_info: None,
        }
    }

    pub fn with_graphics(mut self, graphics: Vec<Vec<u8>>) -> Self {
        self.graphics = graphics;
        self
    }

    pub fn with_debug_info(mut self, debug_info: DebugInfo) -> Self {
        self.debug_info = Some(debug_info);
        self
    }

    /// Bytes occupied once loaded.
    pub fn image_size(&self) -> usize {
        self.code.len() + self.data.len()
    }

    pub fn to_json(&self) -> Result<String, ExecutableError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ExecutableError> {
        let exe: Executable = serde_json::from_str(json)?;
        if exe.format != FORMAT_ORC1 {
            return Err(ExecutableError::UnsupportedFormat(exe.format));
        }
        Ok(exe)
    }

    /// Load an executable from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExecutableError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Save an executable to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ExecutableError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Errors that can occur reading or writing executables.
#[derive(Debug, Error)]
pub enum ExecutableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed executable: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported executable format: {0:?}")]
    UnsupportedFormat(String),
}
