//! State shared by every program element.

use thiserror::Error;

use super::lexer::Token;

/// An assembly error attached to the token that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}:{column}: {message}", line = .token.line, column = .token.line_offset + 1)]
pub struct AssemblyError {
    pub token: Token,
    pub message: String,
}

impl AssemblyError {
    pub fn new(token: &Token, message: impl Into<String>) -> Self {
        Self { token: token.clone(), message: message.into() }
    }

    pub fn line(&self) -> u32 {
        self.token.line
    }
}

/// Labels, source line, location and errors of one instruction or
/// data element.
///
/// `location` is -1 until the assembler lays the program out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramElement {
    pub labels: Vec<Token>,
    pub line: u32,
    pub location: i32,
    pub errors: Vec<AssemblyError>,
}

impl ProgramElement {
    pub fn new(labels: Vec<Token>, line: u32) -> Self {
        Self { labels, line, location: -1, errors: Vec::new() }
    }

    pub fn add_error(&mut self, token: &Token, message: impl Into<String>) {
        self.errors.push(AssemblyError::new(token, message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
