//! Label table for the assembler.
//!
//! Labels are bound to program elements while parsing, before any
//! element has a location. Once layout is done the table resolves every
//! name to an address.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::cpu::memory::FRAME_BUFFER_START;

/// Built-in label for the start of the frame buffer.
pub const FRAME_BUFFER_LABEL: &str = "FRAME_BUFFER";

/// What a label names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelTarget {
    /// Index into the instruction list.
    Instruction(usize),
    /// Index into the data list.
    Data(usize),
    /// A fixed address.
    Address(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("Label already defined: {0}")]
    AlreadyDefined(String),
}

/// Name to element bindings. Each name is bound at most once.
#[derive(Debug, Clone)]
pub struct LabelTable {
    entries: HashMap<String, LabelTarget>,
}

impl LabelTable {
    /// A table holding only the built-in labels.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(FRAME_BUFFER_LABEL.to_string(), LabelTarget::Address(FRAME_BUFFER_START as u16));
        Self { entries }
    }

    pub fn define(&mut self, name: &str, target: LabelTarget) -> Result<(), LabelError> {
        if self.entries.contains_key(name) {
            return Err(LabelError::AlreadyDefined(name.to_string()));
        }
        self.entries.insert(name.to_string(), target);
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<LabelTarget> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve every label using `locate` to find element addresses.
    pub fn resolve(&self, mut locate: impl FnMut(LabelTarget) -> i32) -> BTreeMap<String, i32> {
        self.entries
            .iter()
            .map(|(name, &target)| {
                let address = match target {
                    LabelTarget::Address(addr) => addr as i32,
                    other => locate(other),
                };
                (name.clone(), address)
            })
            .collect()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new()
    }
}
