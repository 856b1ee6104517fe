//! Two-pass assembler for MTMC-16 programs.
//!
//! Syntax:
//! ```text
//! # Comment
//! .data
//! msg:   "hello"          # NUL-terminated string
//! count: 3                # 16-bit word
//! buf:   .int 8           # 8 zeroed words
//!
//! .text
//! main:
//!     li   a0 msg         # load the address of a label
//!     sys  wstr
//!     addi t0 1           # rewritten to `imm add t0 1`
//!     smax                # rewritten to `sop max`
//!     jnz  main
//!     sys  exit
//! ```
//!
//! The first pass parses every line into instruction and data elements,
//! binding labels to elements. The second pass lays the program out
//! (code first, then data) and checks every label reference. Errors are
//! collected rather than returned early, so one run reports all of them;
//! machine code is only generated when there are none.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;

use crate::cpu::decode::Instruction;
use crate::cpu::isa::{AluOp, JumpKind, LoadStoreOp, RegisterLoadStoreOp, StackOp, TestOp};
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::Register;
use crate::executable::{DebugInfo, Executable, GlobalInfo, LocalInfo};
use crate::os::syscall::SysCall;

use super::data::{DataElement, DataValue};
use super::element::{AssemblyError, ProgramElement};
use super::instruction::{
    AddressOperand, InstructionClass, InstructionElement, MetaDirective, Operation, ADDRESS_MAX,
};
use super::labels::{LabelTable, LabelTarget};
use super::lexer::{tokenize_with, Token, TokenKind, DEFAULT_COMMENT};

const WORD_MIN: i32 = i16::MIN as i32;
const WORD_MAX: i32 = u16::MAX as i32;

/// Assemble source with default settings.
pub fn assemble(source: &str) -> Result<Executable, AssemblyErrors> {
    Assembler::new().assemble(source).into_result()
}

/// Assembler settings.
#[derive(Debug, Clone)]
pub struct Assembler {
    source_name: String,
    base_dir: Option<PathBuf>,
    comment_leader: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            source_name: "<source>".to_string(),
            base_dir: None,
            comment_leader: DEFAULT_COMMENT.to_string(),
        }
    }

    /// Name recorded in the executable and its debug info.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Directory that `.image` paths are relative to.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_comment_leader(mut self, leader: impl Into<String>) -> Self {
        self.comment_leader = leader.into();
        self
    }

    pub fn assemble(&self, source: &str) -> AssemblyResult {
        let span = tracing::debug_span!("assemble", source = %self.source_name);
        let _enter = span.enter();

        let tokens = tokenize_with(source, &self.comment_leader);
        let mut program = ProgramBuilder::new(self);
        for line in split_lines(tokens) {
            program.parse_line(line);
        }
        program.finish(source)
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an assembly run produced.
#[derive(Debug, Clone)]
pub struct AssemblyResult {
    /// Present only when there were no errors.
    pub executable: Option<Executable>,
    /// All errors, ordered by source position.
    pub errors: Vec<AssemblyError>,
    /// Final address of every label.
    pub labels: BTreeMap<String, i32>,
}

impl AssemblyResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn executable(&self) -> Option<&Executable> {
        self.executable.as_ref()
    }

    pub fn into_result(self) -> Result<Executable, AssemblyErrors> {
        match self.executable {
            Some(exe) if self.errors.is_empty() => Ok(exe),
            _ => Err(AssemblyErrors(self.errors)),
        }
    }
}

/// Every error from a failed assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyErrors(pub Vec<AssemblyError>);

impl std::error::Error for AssemblyErrors {}

impl fmt::Display for AssemblyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.0.len();
        write!(f, "{} assembly error{}", count, if count == 1 { "" } else { "s" })?;
        for error in &self.0 {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

/// Group tokens by source line, dropping the end marker.
fn split_lines(tokens: Vec<Token>) -> Vec<VecDeque<Token>> {
    let mut lines: Vec<VecDeque<Token>> = Vec::new();
    for token in tokens.into_iter().filter(|t| t.kind != TokenKind::Eof) {
        match lines.last_mut() {
            Some(line) if line.front().map(|t| t.line) == Some(token.line) => line.push_back(token),
            _ => lines.push(VecDeque::from([token])),
        }
    }
    lines
}

/// If the line starts with `lead` immediately followed by an identifier,
/// return the identifier in lowercase.
fn directive_name(line: &VecDeque<Token>, lead: TokenKind) -> Option<String> {
    let first = line.front()?;
    let second = line.get(1)?;
    (first.kind == lead && second.kind == TokenKind::Identifier && first.is_adjacent_to(second))
        .then(|| second.text.to_ascii_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Text,
    Data,
}

/// First-pass state.
struct ProgramBuilder<'a> {
    settings: &'a Assembler,
    segment: Segment,
    instructions: Vec<InstructionElement>,
    data: Vec<DataElement>,
    labels: LabelTable,
    pending_labels: Vec<Token>,
    graphics: Vec<Vec<u8>>,
    debug_strings: Vec<String>,
    /// Errors on lines that produce no element, such as `.data extra`.
    stray_errors: Vec<AssemblyError>,
}

impl<'a> ProgramBuilder<'a> {
    fn new(settings: &'a Assembler) -> Self {
        Self {
            settings,
            segment: Segment::Text,
            instructions: Vec::new(),
            data: Vec::new(),
            labels: LabelTable::new(),
            pending_labels: Vec::new(),
            graphics: Vec::new(),
            debug_strings: Vec::new(),
            stray_errors: Vec::new(),
        }
    }

    fn parse_line(&mut self, mut line: VecDeque<Token>) {
        let segment = match directive_name(&line, TokenKind::Dot).as_deref() {
            Some("data") => Some(Segment::Data),
            Some("text") => Some(Segment::Text),
            _ => None,
        };
        if let Some(segment) = segment {
            self.segment = segment;
            line.drain(..2);
            if let Some(extra) = line.front() {
                self.stray_errors
                    .push(AssemblyError::new(extra, format!("Unexpected Token: {}", extra)));
            }
            return;
        }

        let mut labels = Vec::new();
        while line.front().map_or(false, |t| t.kind == TokenKind::Label) {
            labels.extend(line.pop_front());
        }
        if line.is_empty() {
            self.pending_labels.extend(labels);
            return;
        }

        // Meta directives take up no space, so held labels wait for the
        // next real element.
        if directive_name(&line, TokenKind::At).is_some() {
            self.pending_labels.extend(labels);
            self.parse_meta(line);
            return;
        }

        let mut all_labels = std::mem::take(&mut self.pending_labels);
        all_labels.extend(labels);
        match self.segment {
            Segment::Text => self.parse_instruction(all_labels, line),
            Segment::Data => self.parse_data(all_labels, line),
        }
    }

    fn define_labels(&mut self, element: &mut ProgramElement, target: LabelTarget) {
        for label in &element.labels {
            if let Err(e) = self.labels.define(&label.text, target) {
                element.errors.push(AssemblyError::new(label, e.to_string()));
            }
        }
    }

    // ==================== Instructions ====================

    fn parse_instruction(&mut self, labels: Vec<Token>, mut line: VecDeque<Token>) {
        let Some(first) = line.pop_front() else { return };
        let mut element = ProgramElement::new(labels, first.line);
        self.define_labels(&mut element, LabelTarget::Instruction(self.instructions.len()));

        if first.kind != TokenKind::Identifier {
            element.add_error(&first, format!("Unexpected Token: {}", first));
            self.instructions
                .push(InstructionElement::new(element, first, Operation::Invalid));
            return;
        }

        let mnemonic = rewrite_mnemonic(&first, &mut line);
        let Some(class) = InstructionClass::of(&mnemonic) else {
            element.add_error(&first, format!("Unknown instruction: {}", first.text));
            self.instructions
                .push(InstructionElement::new(element, first, Operation::Invalid));
            return;
        };

        let mut operands = OperandParser::new(first.clone(), line);
        let operation = match class {
            InstructionClass::Misc => operands.misc(&mnemonic, &mut self.debug_strings),
            InstructionClass::Alu => operands.alu(&mnemonic),
            InstructionClass::Stack => operands.stack(&mnemonic),
            InstructionClass::StackImmediate => operands.stack_immediate(),
            InstructionClass::Test => operands.test(&mnemonic),
            InstructionClass::LoadStore => operands.load_store(&mnemonic),
            InstructionClass::LoadStoreRegister => operands.load_store_register(&mnemonic),
            InstructionClass::Jump => operands.jump(&mnemonic),
            InstructionClass::JumpRegister => operands.jump_register(),
        };
        element.errors.extend(operands.finish());

        tracing::trace!(line = element.line, mnemonic = %mnemonic, ?operation, "parsed instruction");
        self.instructions
            .push(InstructionElement::new(element, first, operation));
    }

    fn parse_meta(&mut self, mut line: VecDeque<Token>) {
        let (Some(at), Some(name)) = (line.pop_front(), line.pop_front()) else { return };
        let mut element = ProgramElement::new(Vec::new(), at.line);
        let mut operands = OperandParser::new(name.clone(), line);

        let directive = match name.text.to_ascii_lowercase().as_str() {
            "file" => Some(MetaDirective::File(operands.string())),
            "line" => Some(MetaDirective::Line(operands.integer(0, i32::MAX) as u32)),
            "global" => {
                let name = operands.string();
                let location = operands.integer(0, WORD_MAX);
                let type_name = operands.string();
                Some(MetaDirective::Global { name, location, type_name })
            }
            "local" => {
                let name = operands.string();
                let offset = operands.integer(WORD_MIN, i16::MAX as i32);
                let type_name = operands.string();
                Some(MetaDirective::Local { name, offset, type_name })
            }
            "endlocal" => Some(MetaDirective::EndLocal(operands.string())),
            other => {
                element.add_error(&name, format!("Unknown meta directive: @{}", other));
                None
            }
        };
        if directive.is_some() {
            element.errors.extend(operands.finish());
        }

        let operation = directive.map_or(Operation::Invalid, Operation::Meta);
        self.instructions.push(InstructionElement::new(element, name, operation));
    }

    // ==================== Data ====================

    fn parse_data(&mut self, labels: Vec<Token>, mut line: VecDeque<Token>) {
        let Some(first) = line.front().cloned() else { return };
        let mut element = ProgramElement::new(labels, first.line);
        self.define_labels(&mut element, LabelTarget::Data(self.data.len()));

        let is_directive = directive_name(&line, TokenKind::Dot);
        let mut operands = OperandParser::new(first.clone(), line);

        let value = match (first.kind, is_directive) {
            (TokenKind::String, _) => {
                operands.next();
                if !first.text.is_ascii() {
                    element.add_error(&first, "String must be ASCII");
                }
                DataValue::String(first.text.clone())
            }
            (TokenKind::Integer | TokenKind::Hex | TokenKind::Binary | TokenKind::Char, _) => {
                DataValue::Integer(operands.integer(WORD_MIN, WORD_MAX) as i16)
            }
            (TokenKind::Dot, Some(directive)) => {
                operands.next();
                operands.next();
                match directive.as_str() {
                    "int" => DataValue::Words(operands.integer(0, MEMORY_SIZE as i32) as u16),
                    "byte" => DataValue::Bytes(operands.integer(0, MEMORY_SIZE as i32) as u16),
                    "image" => {
                        let path = operands.string();
                        DataValue::Image(self.load_image(&path, &first, &mut element))
                    }
                    other => {
                        element.add_error(&first, format!("Unknown directive: .{}", other));
                        operands.discard_rest();
                        DataValue::Empty
                    }
                }
            }
            _ => {
                operands.next();
                element.add_error(&first, format!("Unexpected Token: {}", first));
                DataValue::Empty
            }
        };
        element.errors.extend(operands.finish());

        self.data.push(DataElement::new(element, first, value));
    }

    /// Read an image file into the graphics list and return its index.
    fn load_image(&mut self, path: &str, token: &Token, element: &mut ProgramElement) -> u16 {
        let full = match &self.settings.base_dir {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };
        match std::fs::read(&full) {
            Ok(bytes) => {
                tracing::debug!(path = %full.display(), size = bytes.len(), "loaded image");
                self.graphics.push(bytes);
                (self.graphics.len() - 1) as u16
            }
            Err(e) => {
                element.add_error(token, format!("Unable to load image {}: {}", path, e));
                0
            }
        }
    }

    // ==================== Second pass ====================

    fn finish(mut self, source: &str) -> AssemblyResult {
        if let Some(last) = self.pending_labels.last().cloned() {
            let labels = std::mem::take(&mut self.pending_labels);
            let mut element = ProgramElement::new(labels, last.line);
            self.define_labels(&mut element, LabelTarget::Data(self.data.len()));
            self.data.push(DataElement::new(element, last, DataValue::Empty));
        }

        let mut offset = 0i32;
        let mut overflow = None;
        for instr in &mut self.instructions {
            instr.element.location = offset;
            offset += instr.size() as i32;
            if offset > MEMORY_SIZE as i32 && overflow.is_none() {
                overflow = Some(instr.mnemonic.clone());
            }
        }
        for data in &mut self.data {
            data.element.location = offset;
            offset += data.size() as i32;
            if offset > MEMORY_SIZE as i32 && overflow.is_none() {
                overflow = Some(data.token.clone());
            }
        }
        if let Some(token) = overflow {
            self.stray_errors.push(AssemblyError::new(
                &token,
                format!("Program does not fit in memory: {} bytes, limit {}", offset, MEMORY_SIZE),
            ));
        }

        let instructions = &self.instructions;
        let data = &self.data;
        let labels = self.labels.resolve(|target| match target {
            LabelTarget::Instruction(i) => instructions[i].element.location,
            LabelTarget::Data(i) => data[i].element.location,
            LabelTarget::Address(addr) => addr as i32,
        });

        for instr in &mut self.instructions {
            instr.validate_labels(&labels);
        }

        let mut errors: Vec<AssemblyError> = self
            .instructions
            .iter()
            .flat_map(|i| i.element.errors.iter().cloned())
            .chain(self.data.iter().flat_map(|d| d.element.errors.iter().cloned()))
            .chain(self.stray_errors.iter().cloned())
            .collect();
        errors.sort_by_key(|e| (e.token.line, e.token.line_offset));

        tracing::debug!(
            instructions = self.instructions.len(),
            data = self.data.len(),
            size = offset,
            errors = errors.len(),
            "assembly finished"
        );

        let executable = if errors.is_empty() {
            let code: Vec<u8> = self.instructions.iter().flat_map(|i| i.encode(&labels)).collect();
            let bytes: Vec<u8> = self.data.iter().flat_map(DataElement::bytes).collect();
            let debug_info = self.debug_info(source);
            let graphics = std::mem::take(&mut self.graphics);
            Some(
                Executable::new(code, bytes, self.settings.source_name.clone())
                    .with_graphics(graphics)
                    .with_debug_info(debug_info),
            )
        } else {
            None
        };

        AssemblyResult { executable, errors, labels }
    }

    fn debug_info(&self, source: &str) -> DebugInfo {
        let mut info = DebugInfo {
            assembly_file: self.settings.source_name.clone(),
            assembly_source: source.to_string(),
            debug_strings: self.debug_strings.clone(),
            ..DebugInfo::default()
        };

        let mut original_line = 0u32;
        let mut locals: Vec<LocalInfo> = Vec::new();
        for instr in &self.instructions {
            if let Operation::Meta(meta) = &instr.operation {
                match meta {
                    MetaDirective::File(file) => info.original_file = file.clone(),
                    MetaDirective::Line(line) => original_line = *line,
                    MetaDirective::Global { name, location, type_name } => {
                        info.globals.push(GlobalInfo {
                            name: name.clone(),
                            location: *location,
                            type_name: type_name.clone(),
                        });
                    }
                    MetaDirective::Local { name, offset, type_name } => {
                        locals.push(LocalInfo {
                            name: name.clone(),
                            offset: *offset,
                            type_name: type_name.clone(),
                        });
                    }
                    MetaDirective::EndLocal(name) => locals.retain(|l| &l.name != name),
                }
            }
            for _ in 0..instr.size() {
                info.assembly_line_numbers.push(instr.element.line);
                info.original_line_numbers.push(original_line);
                info.locals.push(locals.clone());
            }
        }
        info
    }
}

/// Apply aliases and shorthand forms to a mnemonic, pushing any
/// synthesized operands onto the front of `operands`.
fn rewrite_mnemonic(first: &Token, operands: &mut VecDeque<Token>) -> String {
    let name = first.text.to_ascii_lowercase();
    let name = match name.as_str() {
        "mov" => "mv".to_string(),
        "ldi" | "la" => "li".to_string(),
        "noop" => "nop".to_string(),
        "ret" => {
            operands.push_front(first.synthesized(TokenKind::Identifier, "ra"));
            "jr".to_string()
        }
        _ => name,
    };
    if InstructionClass::of(&name).is_some() {
        return name;
    }

    if let Some(op) = name.strip_suffix('i').and_then(AluOp::from_name) {
        operands.push_front(first.synthesized(TokenKind::Identifier, op.name()));
        return "imm".to_string();
    }
    if let Some(op) = name.strip_prefix('s').and_then(AluOp::from_name) {
        operands.push_front(first.synthesized(TokenKind::Identifier, op.name()));
        return "sop".to_string();
    }
    name
}

/// Operand helpers. Each one consumes what it needs, records an error
/// when the operand is missing or malformed, and returns a placeholder
/// so parsing can continue.
struct OperandParser {
    mnemonic: Token,
    tokens: VecDeque<Token>,
    errors: Vec<AssemblyError>,
}

impl OperandParser {
    fn new(mnemonic: Token, tokens: VecDeque<Token>) -> Self {
        Self { mnemonic, tokens, errors: Vec::new() }
    }

    fn error(&mut self, token: &Token, message: impl Into<String>) {
        self.errors.push(AssemblyError::new(token, message));
    }

    fn missing(&mut self, message: &str) {
        let anchor = self.mnemonic.clone();
        self.error(&anchor, message);
    }

    fn next(&mut self) -> Option<Token> {
        self.tokens.pop_front()
    }

    fn peek_is_register(&self) -> bool {
        self.tokens
            .front()
            .map_or(false, |t| t.kind == TokenKind::Identifier && Register::from_name(&t.text).is_some())
    }

    fn peek_is_number(&self) -> bool {
        self.tokens
            .front()
            .map_or(false, |t| t.is_number() || t.kind == TokenKind::Char)
    }

    fn register(&mut self, writeable: bool) -> Register {
        let Some(token) = self.next() else {
            self.missing("Register required");
            return Register::T0;
        };
        let reg = if token.kind == TokenKind::Identifier { Register::from_name(&token.text) } else { None };
        let Some(reg) = reg else {
            self.error(&token, format!("Invalid Register : {}", token));
            return Register::T0;
        };
        if writeable && !reg.is_writeable() {
            self.error(&token, format!("Register not writeable : {}", token));
        } else if !writeable && !reg.is_readable() {
            self.error(&token, format!("Register not readable : {}", token));
        }
        reg
    }

    fn writeable(&mut self) -> Register {
        self.register(true)
    }

    fn readable(&mut self) -> Register {
        self.register(false)
    }

    /// Optional trailing stack register, `sp` by default.
    fn stack_register(&mut self) -> Register {
        if self.peek_is_register() {
            self.writeable()
        } else {
            Register::Sp
        }
    }

    fn integer(&mut self, min: i32, max: i32) -> i32 {
        let Some(token) = self.next() else {
            self.missing("Integer value required");
            return 0;
        };
        let value = match token.kind {
            TokenKind::Char => token.text.chars().next().map(|c| c as i32),
            _ if token.is_number() => token.int_value(),
            _ => {
                self.error(&token, format!("Integer value required: {}", token));
                return 0;
            }
        };
        match value {
            Some(v) if (min..=max).contains(&v) => v,
            _ => {
                self.error(&token, format!("Integer value out of range: {}-{}", min, max));
                0
            }
        }
    }

    fn optional_integer(&mut self, min: i32, max: i32) -> Option<i32> {
        self.peek_is_number().then(|| self.integer(min, max))
    }

    fn address(&mut self, min: i32, max: i32) -> AddressOperand {
        if self.peek_is_number() {
            return AddressOperand::Value(self.integer(min, max) as u16);
        }
        match self.next() {
            Some(token) if token.kind == TokenKind::Identifier => AddressOperand::Label(token),
            Some(token) => {
                self.error(&token, format!("Integer or label required: {}", token));
                AddressOperand::Value(0)
            }
            None => {
                self.missing("Integer or label required");
                AddressOperand::Value(0)
            }
        }
    }

    fn alu_op(&mut self) -> AluOp {
        let Some(token) = self.next() else {
            self.missing("ALU operation required");
            return AluOp::Add;
        };
        match AluOp::from_name(&token.text.to_ascii_lowercase()) {
            Some(op) if token.kind == TokenKind::Identifier => op,
            _ => {
                self.error(&token, format!("ALU operation required: {}", token));
                AluOp::Add
            }
        }
    }

    fn syscall(&mut self) -> u8 {
        let Some(token) = self.next() else {
            self.missing("Syscall required");
            return 0;
        };
        match SysCall::from_name(&token.text) {
            Some(call) if token.kind == TokenKind::Identifier => call.selector(),
            _ => {
                self.error(&token, format!("Unknown syscall : {}", token));
                0
            }
        }
    }

    fn string(&mut self) -> String {
        match self.next() {
            Some(token) if token.kind == TokenKind::String => token.text,
            Some(token) => {
                self.error(&token, format!("String required: {}", token));
                String::new()
            }
            None => {
                self.missing("String required");
                String::new()
            }
        }
    }

    fn discard_rest(&mut self) {
        self.tokens.clear();
    }

    /// Report leftover tokens and hand back every error recorded.
    fn finish(mut self) -> Vec<AssemblyError> {
        if let Some(extra) = self.tokens.pop_front() {
            self.error(&extra, format!("Unexpected Token: {}", extra));
        }
        self.errors
    }

    // ==================== Per-class grammars ====================

    fn misc(&mut self, mnemonic: &str, debug_strings: &mut Vec<String>) -> Operation {
        let instr = match mnemonic {
            "sys" => Instruction::Sys { call: self.syscall() },
            "mv" => {
                let to = self.writeable();
                let from = self.readable();
                Instruction::Mv { to, from }
            }
            "inc" | "dec" => {
                let target = self.writeable();
                let amount = self.optional_integer(0, 15).unwrap_or(1) as u8;
                if mnemonic == "inc" {
                    Instruction::Inc { target, amount }
                } else {
                    Instruction::Dec { target, amount }
                }
            }
            "seti" => {
                let target = self.writeable();
                let value = self.integer(0, 15) as u8;
                Instruction::Seti { target, value }
            }
            "mcp" => {
                let from = self.readable();
                let to = self.readable();
                let size = self.integer(0, MEMORY_SIZE as i32) as u16;
                Instruction::Mcp { from, to, size }
            }
            "debug" => {
                let text = self.string();
                let index = debug_strings.len();
                if index > u8::MAX as usize {
                    self.missing("Too many debug strings");
                }
                debug_strings.push(text);
                Instruction::Debug { index: index as u8 }
            }
            _ => Instruction::Nop,
        };
        Operation::Encoded(instr)
    }

    fn alu(&mut self, mnemonic: &str) -> Operation {
        if mnemonic == "imm" {
            let op_token = self.tokens.front().cloned();
            let op = self.alu_op();
            if op.is_unary() {
                if let Some(token) = op_token {
                    self.error(&token, format!("Unary operation cannot take an immediate: {}", op));
                }
            }
            let target = self.writeable();
            let value = self.integer(WORD_MIN, WORD_MAX) as i16;
            return Operation::Encoded(Instruction::AluImm { op, target, value });
        }

        let Some(op) = AluOp::from_name(mnemonic) else { return Operation::Invalid };
        let target = self.writeable();
        let source = if op.is_unary() { target } else { self.readable() };
        Operation::Encoded(Instruction::Alu { op, target, source })
    }

    fn stack(&mut self, mnemonic: &str) -> Operation {
        let instr = match mnemonic {
            "push" => {
                let source = self.readable();
                let stack = self.stack_register();
                Instruction::Push { source, stack }
            }
            "pop" => {
                let target = self.writeable();
                let stack = self.stack_register();
                Instruction::Pop { target, stack }
            }
            "sop" => {
                let op = self.alu_op();
                let stack = self.stack_register();
                Instruction::Sop { op, stack }
            }
            other => {
                let Some(op) = StackOp::from_name(other) else { return Operation::Invalid };
                let stack = self.stack_register();
                Instruction::Stack { op, stack }
            }
        };
        Operation::Encoded(instr)
    }

    fn stack_immediate(&mut self) -> Operation {
        let value = self.integer(WORD_MIN, WORD_MAX) as i16;
        let stack = self.stack_register();
        Operation::Encoded(Instruction::PushImm { value, stack })
    }

    fn test(&mut self, mnemonic: &str) -> Operation {
        let Some((op, immediate)) = TestOp::from_mnemonic(mnemonic) else { return Operation::Invalid };
        let lhs = self.readable();
        let instr = if immediate {
            let value = self.integer(0, 15) as u8;
            Instruction::TestImm { op, lhs, value }
        } else {
            let rhs = self.readable();
            Instruction::Test { op, lhs, rhs }
        };
        Operation::Encoded(instr)
    }

    fn load_store(&mut self, mnemonic: &str) -> Operation {
        let Some((op, has_offset)) = LoadStoreOp::from_mnemonic(mnemonic) else {
            return Operation::Invalid;
        };
        let reg = if op.is_store() { self.readable() } else { self.writeable() };
        let offset = if has_offset { Some(self.readable()) } else { None };
        let address = if op == LoadStoreOp::Li {
            self.address(WORD_MIN, WORD_MAX)
        } else {
            self.address(0, ADDRESS_MAX)
        };
        Operation::LoadStore { op, reg, offset, address }
    }

    fn load_store_register(&mut self, mnemonic: &str) -> Operation {
        let Some(op) = RegisterLoadStoreOp::from_name(mnemonic) else { return Operation::Invalid };
        let reg = if op.is_store() { self.readable() } else { self.writeable() };
        let base = self.readable();
        let offset = if self.peek_is_register() {
            let token = self.tokens.front().cloned();
            match self.readable() {
                Register::Pc => {
                    if let Some(token) = token {
                        self.error(&token, format!("Register not usable as an offset : {}", token));
                    }
                    None
                }
                reg => Some(reg),
            }
        } else {
            None
        };
        Operation::Encoded(Instruction::LoadStoreReg { op, reg, base, offset })
    }

    fn jump(&mut self, mnemonic: &str) -> Operation {
        let Some(kind) = JumpKind::from_name(mnemonic) else { return Operation::Invalid };
        let target = self.address(0, ADDRESS_MAX);
        Operation::Jump { kind, target }
    }

    fn jump_register(&mut self) -> Operation {
        let reg = self.readable();
        Operation::Encoded(Instruction::JumpReg { reg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn code(source: &str) -> Vec<u8> {
        match assemble(source) {
            Ok(exe) => exe.code,
            Err(e) => panic!("{}", e),
        }
    }

    fn messages(source: &str) -> Vec<String> {
        Assembler::new()
            .assemble(source)
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_sys_exit() {
        assert_eq!(code("sys exit"), vec![0x00, 0x00]);
    }

    #[test]
    fn test_empty_program() {
        let exe = assemble("# nothing here\n").unwrap();
        assert!(exe.code.is_empty());
        assert!(exe.data.is_empty());
        assert_eq!(exe.format, "orc1");
    }

    #[test]
    fn test_forward_label() {
        let result = Assembler::new().assemble("j end\nnop\nend: sys exit");
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.labels["end"], 4);
        assert_eq!(result.executable().unwrap().code, vec![0xC0, 0x04, 0x0F, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn test_label_only_line_attaches_to_next_element() {
        let result = Assembler::new().assemble("nop\nhere:\n\n  nop");
        assert_eq!(result.labels["here"], 2);
    }

    #[test]
    fn test_unresolved_label() {
        let result = Assembler::new().assemble("j missing");
        assert!(result.executable.is_none());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "Unresolved label: missing");
        assert_eq!(result.errors[0].token.text, "missing");
    }

    #[test]
    fn test_duplicate_label() {
        let result = Assembler::new().assemble("a: nop\na: nop");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "Label already defined: a");
        assert_eq!(result.errors[0].line(), 2);
        assert_eq!(result.labels["a"], 0);
    }

    #[test]
    fn test_trailing_labels_attach_to_end_of_data() {
        let result = Assembler::new().assemble(".data\nx: 7\nend:");
        assert!(result.is_ok());
        assert_eq!(result.labels["x"], 0);
        assert_eq!(result.labels["end"], 2);
    }

    #[test]
    fn test_frame_buffer_label() {
        assert_eq!(code("li t0 FRAME_BUFFER"), vec![0x8F, 0x00, 0x0C, 0x00]);
    }

    #[test]
    fn test_data_follows_code() {
        let exe = assemble(".data\nhello: \"hi\"\nn: -2\nbuf: .int 2\nb: .byte 1\n.text\nli a0 hello\nlw t0 n\nsys exit").unwrap();
        assert_eq!(exe.code.len(), 10);
        assert_eq!(exe.data, vec![b'h', b'i', 0, 0xFF, 0xFE, 0, 0, 0, 0, 0]);
        // li a0 10; lw t0 13
        assert_eq!(&exe.code[..4], &[0x8F, 0x60, 0x00, 0x0A]);
        assert_eq!(&exe.code[4..8], &[0x80, 0x00, 0x00, 0x0D]);
    }

    #[test]
    fn test_line_numbers() {
        let exe = assemble("pushi 1\npushi 2\nsmax\npop t0").unwrap();
        let info = exe.debug_info.unwrap();
        assert_eq!(info.assembly_line_numbers, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 4, 4]);
        assert_eq!(info.assembly_source, "pushi 1\npushi 2\nsmax\npop t0");
    }

    #[test]
    fn test_synthetic_instructions() {
        assert_eq!(code("addi t0 10"), code("imm add t0 10"));
        assert_eq!(code("shli t1 3"), code("imm shl t1 3"));
        assert_eq!(code("smax"), code("sop max"));
        assert_eq!(code("ssub t5"), code("sop sub t5"));
        assert_eq!(code("ret"), code("jr ra"));
        assert_eq!(code("la t0 3"), code("li t0 3"));
        assert_eq!(code("ldi t0 3"), code("li t0 3"));
        assert_eq!(code("mov t0 t1"), code("mv t0 t1"));
        assert_eq!(code("noop"), code("nop"));
    }

    #[test]
    fn test_encodings() {
        assert_eq!(code("mv t0 a0"), vec![0x01, 0x06]);
        assert_eq!(code("add t0 t1"), vec![0x10, 0x01]);
        assert_eq!(code("neg t3"), vec![0x1E, 0x30]);
        assert_eq!(code("push t0"), vec![0x20, 0x0D]);
        assert_eq!(code("pop t1 t5"), vec![0x21, 0x15]);
        assert_eq!(code("pushi -1"), vec![0x2F, 0x0D, 0xFF, 0xFF]);
        assert_eq!(code("eq t0 t1"), vec![0x30, 0x01]);
        assert_eq!(code("gti t0 5"), vec![0x3A, 0x05]);
        assert_eq!(code("lwr t0 a0"), vec![0x40, 0x6F]);
        assert_eq!(code("sbr t0 a0 a1"), vec![0x70, 0x67]);
        assert_eq!(code("lwo t0 t1 100"), vec![0x81, 0x01, 0x00, 0x64]);
        assert_eq!(code("jr ra"), vec![0x90, 0x0B]);
        assert_eq!(code("jal 0x123"), vec![0xF1, 0x23]);
        assert_eq!(code("inc t0"), vec![0x02, 0x01]);
        assert_eq!(code("dec t0 4"), vec![0x03, 0x04]);
        assert_eq!(code("seti t2 9"), vec![0x04, 0x29]);
        assert_eq!(code("mcp a0 a1 16"), vec![0x05, 0x67, 0x00, 0x10]);
        assert_eq!(code("sys wint"), vec![0x00, 0x02]);
    }

    #[test]
    fn test_case_insensitive_mnemonics_and_registers() {
        assert_eq!(code("ADD T0 T1"), code("add t0 t1"));
    }

    #[test]
    fn test_register_errors() {
        assert_eq!(messages("mv"), vec!["Register required", "Register required"]);
        assert_eq!(messages("mv t0 zz"), vec!["Invalid Register : zz"]);
        assert_eq!(messages("mv pc t0"), vec!["Register not writeable : pc"]);
        assert_eq!(messages("mv t0 ir"), vec!["Register not readable : ir"]);
        assert_eq!(messages("lwr t0 a0 pc"), vec!["Register not usable as an offset : pc"]);
    }

    #[test]
    fn test_range_errors() {
        assert_eq!(messages("seti t0 16"), vec!["Integer value out of range: 0-15"]);
        assert_eq!(messages("j 4096"), vec!["Integer value out of range: 0-4095"]);
        assert_eq!(messages("pushi 65536"), vec!["Integer value out of range: -32768-65535"]);
        assert!(messages("pushi 65535").is_empty());
        assert!(messages("pushi -32768").is_empty());
    }

    #[test]
    fn test_label_addresses_must_fit_memory() {
        // code is 12 bytes, so `end` lands at 4096
        let source = "j end\nlw t0 end\nla t1 end\nsys exit\n.data\n.byte 4084\nend:";
        let result = Assembler::new().assemble(source);
        assert_eq!(result.labels.get("end"), Some(&4096));
        let errors: Vec<(u32, String)> =
            result.errors.iter().map(|e| (e.line(), e.message.clone())).collect();
        assert_eq!(
            errors,
            vec![
                (1, "Integer value out of range: 0-4095".to_string()),
                (2, "Integer value out of range: 0-4095".to_string()),
            ]
        );

        let fits = "j end\nsys exit\n.data\n.byte 4090\nend: 1";
        assert!(messages(fits).is_empty());
    }

    #[test]
    fn test_program_larger_than_memory() {
        let source = ".data\nbuf: .byte 4096\nfar: 1\n.text\nj far\nlw t0 far\nsys exit";
        let result = Assembler::new().assemble(source);
        assert!(result.executable.is_none());
        let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Program does not fit in memory: 4106 bytes, limit 4096",
                "Integer value out of range: 0-4095",
                "Integer value out of range: 0-4095",
            ]
        );
    }

    #[test]
    fn test_other_errors() {
        assert_eq!(messages("frob t0"), vec!["Unknown instruction: frob"]);
        assert_eq!(messages("nop t0"), vec!["Unexpected Token: t0"]);
        assert_eq!(messages("sys nope"), vec!["Unknown syscall : nope"]);
        assert!(messages("imm t0 1").contains(&"ALU operation required: t0".to_string()));
        assert_eq!(messages("imm neg t0 1"), vec!["Unary operation cannot take an immediate: neg"]);
        assert_eq!(messages("j 'x"), vec!["Integer or label required: <Unterminated char: 'x>"]);
    }

    #[test]
    fn test_errors_are_collected() {
        let result = Assembler::new().assemble("frob\nmv t0 zz\nj nowhere\nsys exit");
        let lines: Vec<u32> = result.errors.iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec![1, 2, 3]);
        assert!(result.executable.is_none());
        assert!(assemble("frob").unwrap_err().to_string().starts_with("1 assembly error"));
    }

    #[test]
    fn test_meta_directives_feed_debug_info() {
        let source = "@file \"prog.c\"\n@line 7\n@global \"g\" 100 \"int\"\nnop\n@local \"x\" -2 \"int\"\n@line 8\nnop\n@endlocal \"x\"\nsys exit";
        let exe = Assembler::new().with_source_name("prog.asm").assemble(source).into_result().unwrap();
        assert_eq!(exe.code.len(), 6);
        assert_eq!(exe.source_name, "prog.asm");

        let info = exe.debug_info.unwrap();
        assert_eq!(info.assembly_file, "prog.asm");
        assert_eq!(info.original_file, "prog.c");
        assert_eq!(info.original_line_numbers, vec![7, 7, 8, 8, 8, 8]);
        assert_eq!(info.globals, vec![GlobalInfo { name: "g".into(), location: 100, type_name: "int".into() }]);
        assert!(info.locals[0].is_empty());
        assert_eq!(info.locals[2][0].name, "x");
        assert_eq!(info.locals[2][0].offset, -2);
        assert!(info.locals[4].is_empty());
    }

    #[test]
    fn test_labels_skip_meta_directives() {
        let result = Assembler::new().assemble("nop\nhere:\n@line 3\nnop");
        assert_eq!(result.labels["here"], 2);
    }

    #[test]
    fn test_debug_strings() {
        let exe = assemble("debug \"t0=$t0\"\ndebug \"again\"").unwrap();
        assert_eq!(exe.code, vec![0x08, 0x00, 0x08, 0x01]);
        assert_eq!(exe.debug_info.unwrap().debug_strings, vec!["t0=$t0", "again"]);
    }

    #[test]
    fn test_image_directive() {
        let dir = std::env::temp_dir().join(format!("mtmc-asm-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("pic.bin"), [1u8, 2, 3]).unwrap();

        let exe = Assembler::new()
            .with_base_dir(&dir)
            .assemble(".data\npic: .image \"pic.bin\"")
            .into_result()
            .unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(exe.data, vec![0, 0]);
        assert_eq!(exe.graphics, vec![vec![1, 2, 3]]);

        let missing = messages(".data\n.image \"no/such/file.png\"");
        assert_eq!(missing.len(), 1);
        assert!(missing[0].starts_with("Unable to load image"));
    }

    #[test]
    fn test_segment_directive_errors() {
        assert_eq!(messages(".data junk"), vec!["Unexpected Token: junk"]);
        assert_eq!(messages(".data\n.word 3"), vec!["Unknown directive: .word"]);
    }

    #[test]
    fn test_custom_comment_leader() {
        let exe = Assembler::new()
            .with_comment_leader(";")
            .assemble("nop ; trailing\n; whole line\nsys exit")
            .into_result()
            .unwrap();
        assert_eq!(exe.code, vec![0x0F, 0xFF, 0x00, 0x00]);
    }

    proptest! {
        #[test]
        fn test_assembly_is_deterministic(values in proptest::collection::vec(any::<i16>(), 1..20)) {
            let source: String = values
                .iter()
                .map(|v| format!("pushi {}\npop t0\n", v))
                .collect();
            let first = assemble(&source).unwrap();
            let second = assemble(&source).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn test_any_word_value_assembles(value in -32768i32..=65535) {
            let bytes = code(&format!("li t0 {}", value));
            prop_assert_eq!(bytes.len(), 4);
            prop_assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), value as u16);
        }
    }
}
