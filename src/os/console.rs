//! Text console device.
//!
//! Output accumulates in a buffer that callers may drain; input is a queue
//! of characters fed from outside the machine.

use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct Console {
    output: String,
    input: VecDeque<char>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Everything printed since the last [`Console::take_output`].
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Queue input for the running program.
    pub fn provide_input(&mut self, text: &str) {
        self.input.extend(text.chars());
    }

    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Take one line of queued input, without its newline.
    /// Returns `None` when nothing is queued.
    pub fn read_line(&mut self) -> Option<String> {
        if self.input.is_empty() {
            return None;
        }
        let mut line = String::new();
        while let Some(c) = self.input.pop_front() {
            if c == '\n' {
                break;
            }
            line.push(c);
        }
        Some(line.trim_end_matches('\r').to_string())
    }

    pub fn read_char(&mut self) -> Option<char> {
        self.input.pop_front()
    }

    pub fn clear(&mut self) {
        self.output.clear();
        self.input.clear();
    }
}
