//! CPU execution engine for the MTMC-16.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//!
//! Arithmetic wraps at 16 bits. Two cases are pinned down explicitly:
//! - division or modulo by zero is a fault and stops the machine
//! - `shl`/`shr` by 16 or more (as an unsigned amount) yields 0

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::cpu::decode::{self, DecodeError, Instruction};
use crate::cpu::isa::{AluOp, JumpKind, LoadStoreOp, RegisterLoadStoreOp, StackOp};
use crate::cpu::memory::{Memory, MemoryError, MEMORY_SIZE};
use crate::cpu::observer::{EventBus, ListenerId, Observer};
use crate::cpu::registers::{Register, Registers};
use crate::executable::{DebugInfo, Executable};
use crate::os::{Console, Mtos, SysCallHandler, SysCallOutcome};

/// Machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputerStatus {
    /// Loaded or paused; `step` and `run` may start it.
    Ready,
    /// Running instructions.
    Executing,
    /// The program exited.
    Finished,
    /// A fault stopped the machine until the next reset.
    PermanentError,
    /// Blocked on console input; resumes after a pause.
    Waiting,
    /// Stopped on a breakpoint; `step` and `run` resume it.
    Breakpoint,
}

impl ComputerStatus {
    /// Can `step`/`run` execute instructions from this status?
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            ComputerStatus::Ready | ComputerStatus::Executing | ComputerStatus::Breakpoint
        )
    }
}

/// Compute an ALU operation on 16-bit values.
pub fn alu(op: AluOp, lhs: i16, rhs: i16) -> Result<i16, CpuError> {
    let result = match op {
        AluOp::Add => lhs.wrapping_add(rhs),
        AluOp::Sub => lhs.wrapping_sub(rhs),
        AluOp::Mul => lhs.wrapping_mul(rhs),
        AluOp::Div => {
            if rhs == 0 {
                return Err(CpuError::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        AluOp::Mod => {
            if rhs == 0 {
                return Err(CpuError::DivisionByZero);
            }
            lhs.wrapping_rem(rhs)
        }
        AluOp::And => lhs & rhs,
        AluOp::Or => lhs | rhs,
        AluOp::Xor => lhs ^ rhs,
        AluOp::Shl => (lhs as u16).checked_shl(rhs as u16 as u32).unwrap_or(0) as i16,
        AluOp::Shr => (lhs as u16).checked_shr(rhs as u16 as u32).unwrap_or(0) as i16,
        AluOp::Min => lhs.min(rhs),
        AluOp::Max => lhs.max(rhs),
        AluOp::Not => !lhs,
        AluOp::Lnot => (lhs == 0) as i16,
        AluOp::Neg => lhs.wrapping_neg(),
    };
    Ok(result)
}

/// 16-bit address arithmetic, widened for the range check in [`Memory`].
#[inline]
fn addr(base: i16, offset: i16) -> i32 {
    (base as u16).wrapping_add(offset as u16) as i32
}

/// The MTMC-16 computer: CPU, memory, console and operating system.
pub struct Cpu {
    /// Register file. Writes made here directly are not observed.
    pub regs: Registers,
    /// Main memory. Writes made here directly are not observed.
    pub mem: Memory,
    /// Instruction count.
    pub cycles: u64,
    status: ComputerStatus,
    /// Instructions per second; 0 runs unthrottled.
    speed: u32,
    console: Console,
    bus: EventBus,
    /// Taken out while a system call runs.
    os: Option<Box<dyn SysCallHandler>>,
    pause_requested: Arc<AtomicBool>,
    breakpoints: BTreeSet<u16>,
    debug_info: Option<DebugInfo>,
    fault: Option<CpuError>,
}

impl Cpu {
    /// Create a new computer running the default operating system.
    pub fn new() -> Self {
        Self::with_os(Box::new(Mtos::new()))
    }

    /// Create a new computer with a custom system call handler.
    pub fn with_os(os: Box<dyn SysCallHandler>) -> Self {
        let mut cpu = Self {
            regs: Registers::new(),
            mem: Memory::new(),
            cycles: 0,
            status: ComputerStatus::Ready,
            speed: 0,
            console: Console::new(),
            bus: EventBus::new(),
            os: Some(os),
            pause_requested: Arc::new(AtomicBool::new(false)),
            breakpoints: BTreeSet::new(),
            debug_info: None,
            fault: None,
        };
        cpu.init_registers();
        cpu
    }

    fn init_registers(&mut self) {
        self.regs.reset();
        // Stack starts at the top of memory and grows down
        self.regs.set(Register::Sp, MEMORY_SIZE as i16);
    }

    /// Reinitialize registers, memory and console. Breakpoints survive.
    pub fn reset(&mut self) {
        self.init_registers();
        self.mem.clear();
        self.console.clear();
        self.cycles = 0;
        self.fault = None;
        self.debug_info = None;
        self.pause_requested.store(false, Ordering::SeqCst);
        if let Some(os) = self.os.as_mut() {
            os.reset();
        }
        self.set_status(ComputerStatus::Ready);
        self.bus.dispatch(|o| o.computer_reset());
    }

    /// Reset, then load code at address 0 followed by data.
    pub fn load(&mut self, exe: &Executable) -> Result<(), CpuError> {
        self.reset();

        let code_len = exe.code.len();
        let data_len = exe.data.len();
        self.mem.load_image(0, &exe.code)?;
        self.mem.load_image(code_len, &exe.data)?;

        self.regs.set(Register::Cb, code_len as i16 - 1);
        self.regs.set(Register::Db, (code_len + data_len) as i16 - 1);
        self.regs.set(Register::Bp, (code_len + data_len) as i16);

        self.debug_info = exe.debug_info.clone();

        tracing::debug!(
            source = %exe.source_name,
            code = code_len,
            data = data_len,
            "program loaded"
        );
        Ok(())
    }

    // ==================== Status & control ====================

    pub fn status(&self) -> ComputerStatus {
        self.status
    }

    /// The fault that moved the machine to `PermanentError`, if any.
    pub fn fault(&self) -> Option<&CpuError> {
        self.fault.as_ref()
    }

    fn set_status(&mut self, status: ComputerStatus) {
        let old = self.status;
        if old == status {
            return;
        }
        self.status = status;
        tracing::debug!(from = ?old, to = ?status, "status changed");
        self.bus.dispatch(|o| o.status_changed(old, status));
    }

    /// Return an executing, waiting or breakpoint-stopped machine to `Ready`.
    pub fn pause(&mut self) {
        if matches!(
            self.status,
            ComputerStatus::Executing | ComputerStatus::Waiting | ComputerStatus::Breakpoint
        ) {
            self.set_status(ComputerStatus::Ready);
        }
    }

    /// A flag another thread can set to pause [`Cpu::run`] at the top of
    /// the next cycle.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pause_requested)
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Instructions per second for [`Cpu::run`]; 0 disables throttling.
    pub fn set_speed(&mut self, speed: u32) {
        self.speed = speed;
    }

    pub fn add_breakpoint(&mut self, addr: u16) {
        self.breakpoints.insert(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u16) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u16> + '_ {
        self.breakpoints.iter().copied()
    }

    pub fn subscribe(&mut self, observer: Box<dyn Observer>) -> ListenerId {
        self.bus.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> Option<Box<dyn Observer>> {
        self.bus.unsubscribe(id)
    }

    pub fn debug_info(&self) -> Option<&DebugInfo> {
        self.debug_info.as_ref()
    }

    // ==================== Observed state access ====================

    #[inline]
    pub fn register(&self, reg: Register) -> i16 {
        self.regs.get(reg)
    }

    pub fn set_register(&mut self, reg: Register, value: i16) {
        self.regs.set(reg, value);
        self.bus.dispatch(|o| o.register_updated(reg, value));
    }

    pub fn read_byte(&self, addr: i32) -> Result<u8, MemoryError> {
        self.mem.read_byte(addr)
    }

    pub fn write_byte(&mut self, addr: i32, value: u8) -> Result<(), MemoryError> {
        self.mem.write_byte(addr, value)?;
        self.bus.dispatch(|o| o.memory_updated(addr as u16, value));
        Ok(())
    }

    pub fn read_word(&self, addr: i32) -> Result<i16, MemoryError> {
        self.mem.read_word(addr)
    }

    pub fn write_word(&mut self, addr: i32, value: i16) -> Result<(), MemoryError> {
        self.mem.write_word(addr, value)?;
        let [hi, lo] = value.to_be_bytes();
        self.bus.dispatch(|o| {
            o.memory_updated(addr as u16, hi);
            o.memory_updated((addr + 1) as u16, lo);
        });
        Ok(())
    }

    pub fn read_c_string(&self, addr: i32) -> Result<String, MemoryError> {
        self.mem.read_c_string(addr)
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Write program output to the console and tell observers.
    pub fn print(&mut self, text: &str) {
        self.console.print(text);
        self.bus.dispatch(|o| o.console_printed(text));
    }

    fn set_test_flag(&mut self, value: bool) {
        self.regs.set_flag_test(value);
        let flags = self.regs.get(Register::Flags);
        self.bus.dispatch(|o| o.register_updated(Register::Flags, flags));
    }

    // ==================== Execution ====================

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed. A fault moves the machine
    /// to `PermanentError` and is returned as well as recorded.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if !self.status.is_resumable() {
            return Err(CpuError::NotRunnable(self.status));
        }
        self.set_status(ComputerStatus::Executing);
        self.cycle()
    }

    /// Run until the status leaves `Executing`.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> u64 {
        self.run_until(None)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> u64 {
        self.run_until(Some(max_cycles))
    }

    fn run_until(&mut self, limit: Option<u64>) -> u64 {
        if !self.status.is_resumable() {
            return 0;
        }
        self.set_status(ComputerStatus::Executing);

        let span = tracing::debug_span!("run", speed = self.speed);
        let _guard = span.enter();

        let start = Instant::now();
        let mut executed: u64 = 0;

        while self.status == ComputerStatus::Executing {
            if self.pause_requested.swap(false, Ordering::SeqCst) {
                self.set_status(ComputerStatus::Ready);
                break;
            }
            if limit.is_some_and(|max| executed >= max) {
                break;
            }

            // Faults are recorded by cycle() and end the loop via status
            let _ = self.cycle();
            executed += 1;

            if self.status == ComputerStatus::Executing
                && self.breakpoints.contains(&self.regs.pc())
            {
                self.set_status(ComputerStatus::Breakpoint);
            }

            if self.speed > 0 {
                self.throttle(start, executed);
            }
        }

        tracing::debug!(executed, status = ?self.status, "run stopped");
        executed
    }

    /// Sleep until wall time catches up with `executed` instructions.
    fn throttle(&self, start: Instant, executed: u64) {
        let expected = Duration::from_secs_f64(executed as f64 / self.speed as f64);
        let elapsed = start.elapsed();
        if expected > elapsed {
            std::thread::sleep(expected - elapsed);
        }
    }

    /// One fetch/decode/execute cycle.
    fn cycle(&mut self) -> Result<Instruction, CpuError> {
        match self.fetch_and_execute() {
            Ok(instr) => Ok(instr),
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: CpuError) {
        tracing::error!(pc = self.regs.pc(), %error, "machine fault");
        self.regs.set_flag_error(true);
        self.fault = Some(error);
        self.set_status(ComputerStatus::PermanentError);
    }

    fn fetch_and_execute(&mut self) -> Result<Instruction, CpuError> {
        let pc = self.regs.pc();

        // Fetch
        let word = self.read_word(pc as i32)? as u16;
        self.set_register(Register::Ir, word as i16);
        let data = if decode::is_double_word(word) {
            self.read_word(pc as i32 + 2)? as u16
        } else {
            0
        };
        self.set_register(Register::Dr, data as i16);
        self.bus.dispatch(|o| o.instruction_fetched(pc, word));

        // Decode
        let instr = decode::decode(word, data)?;

        // Advance PC before execute (jumps will override)
        let next = pc.wrapping_add(instr.size());
        self.set_register(Register::Pc, next as i16);

        tracing::trace!(pc, word, ?instr, "execute");
        self.bus.dispatch(|o| o.before_execution(word));
        self.execute(instr)?;
        self.bus.dispatch(|o| o.after_execution(word));

        self.cycles += 1;
        Ok(instr)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        match instr {
            // ==================== Misc ====================

            Instruction::Sys { call } => self.syscall(call)?,

            Instruction::Mv { to, from } => {
                let value = self.register(from);
                self.set_register(to, value);
            }

            Instruction::Inc { target, amount } => {
                let value = self.register(target).wrapping_add(amount as i16);
                self.set_register(target, value);
            }

            Instruction::Dec { target, amount } => {
                let value = self.register(target).wrapping_sub(amount as i16);
                self.set_register(target, value);
            }

            Instruction::Seti { target, value } => self.set_register(target, value as i16),

            Instruction::Mcp { from, to, size } => {
                let src = self.register(from);
                let dst = self.register(to);
                for i in 0..size {
                    let b = self.read_byte(addr(src, i as i16))?;
                    self.write_byte(addr(dst, i as i16), b)?;
                }
            }

            Instruction::Debug { index } => {
                let text = self
                    .debug_info
                    .as_ref()
                    .and_then(|info| info.format_debug_string(index, &self.regs));
                match text {
                    Some(text) => tracing::info!(target: "mtmc::debug", "{}", text),
                    None => tracing::warn!(index, "no debug string"),
                }
            }

            Instruction::Nop => {}

            // ==================== ALU ====================

            Instruction::Alu { op, target, source } => {
                let result = alu(op, self.register(target), self.register(source))?;
                self.set_register(target, result);
                self.set_test_flag(result != 0);
            }

            Instruction::AluImm { op, target, value } => {
                let result = alu(op, self.register(target), value)?;
                self.set_register(target, result);
                self.set_test_flag(result != 0);
            }

            // ==================== Stack ====================

            Instruction::Push { source, stack } => {
                let value = self.register(source);
                self.push(stack, value)?;
            }

            Instruction::Pop { target, stack } => {
                let value = self.read_word(addr(self.register(stack), 0))?;
                self.set_register(target, value);
                let sp = self.register(stack).wrapping_add(2);
                self.set_register(stack, sp);
            }

            Instruction::Stack { op, stack } => self.stack_op(op, stack)?,

            Instruction::Sop { op, stack } => {
                let sp = self.register(stack);
                let top = self.read_word(addr(sp, 0))?;
                if op.is_unary() {
                    let result = alu(op, top, top)?;
                    self.write_word(addr(sp, 0), result)?;
                } else {
                    let next = self.read_word(addr(sp, 2))?;
                    let result = alu(op, next, top)?;
                    let sp = sp.wrapping_add(2);
                    self.set_register(stack, sp);
                    self.write_word(addr(sp, 0), result)?;
                }
            }

            Instruction::PushImm { value, stack } => self.push(stack, value)?,

            // ==================== Test ====================

            Instruction::Test { op, lhs, rhs } => {
                let result = op.evaluate(self.register(lhs), self.register(rhs));
                self.set_test_flag(result);
            }

            Instruction::TestImm { op, lhs, value } => {
                let result = op.evaluate(self.register(lhs), value as i16);
                self.set_test_flag(result);
            }

            // ==================== Load/Store ====================

            Instruction::LoadStore { op, reg, offset, address } => {
                let offset = offset.map_or(0, |o| self.register(o));
                let ea = addr(address as i16, offset);
                match op {
                    LoadStoreOp::Lw => {
                        let value = self.read_word(ea)?;
                        self.set_register(reg, value);
                    }
                    LoadStoreOp::Lb => {
                        let value = self.read_byte(ea)? as i8 as i16;
                        self.set_register(reg, value);
                    }
                    LoadStoreOp::Sw => self.write_word(ea, self.register(reg))?,
                    LoadStoreOp::Sb => self.write_byte(ea, self.register(reg) as u8)?,
                    LoadStoreOp::Li => self.set_register(reg, address as i16),
                }
            }

            Instruction::LoadStoreReg { op, reg, base, offset } => {
                let offset = offset.map_or(0, |o| self.register(o));
                let ea = addr(self.register(base), offset);
                match op {
                    RegisterLoadStoreOp::Lwr => {
                        let value = self.read_word(ea)?;
                        self.set_register(reg, value);
                    }
                    RegisterLoadStoreOp::Lbr => {
                        let value = self.read_byte(ea)? as i8 as i16;
                        self.set_register(reg, value);
                    }
                    RegisterLoadStoreOp::Swr => self.write_word(ea, self.register(reg))?,
                    RegisterLoadStoreOp::Sbr => self.write_byte(ea, self.register(reg) as u8)?,
                }
            }

            // ==================== Jumps ====================

            Instruction::JumpReg { reg } => {
                let target = self.register(reg);
                self.set_register(Register::Pc, target);
            }

            Instruction::Jump { kind, target } => {
                let taken = match kind {
                    JumpKind::J => true,
                    JumpKind::Jz => !self.regs.is_flag_test_set(),
                    JumpKind::Jnz => self.regs.is_flag_test_set(),
                    JumpKind::Jal => {
                        let ret = self.register(Register::Pc);
                        self.set_register(Register::Ra, ret);
                        true
                    }
                };
                if taken {
                    self.set_register(Register::Pc, target as i16);
                }
            }
        }

        Ok(())
    }

    fn push(&mut self, stack: Register, value: i16) -> Result<(), CpuError> {
        let sp = self.register(stack).wrapping_sub(2);
        self.set_register(stack, sp);
        self.write_word(addr(sp, 0), value)?;
        Ok(())
    }

    fn stack_op(&mut self, op: StackOp, stack: Register) -> Result<(), CpuError> {
        let sp = self.register(stack);
        match op {
            StackOp::Dup => {
                let top = self.read_word(addr(sp, 0))?;
                self.push(stack, top)?;
            }
            StackOp::Swap => {
                let top = self.read_word(addr(sp, 0))?;
                let next = self.read_word(addr(sp, 2))?;
                self.write_word(addr(sp, 0), next)?;
                self.write_word(addr(sp, 2), top)?;
            }
            StackOp::Drop => self.set_register(stack, sp.wrapping_add(2)),
            StackOp::Over => {
                let next = self.read_word(addr(sp, 2))?;
                self.push(stack, next)?;
            }
            StackOp::Rot => {
                let top = self.read_word(addr(sp, 0))?;
                let next = self.read_word(addr(sp, 2))?;
                let third = self.read_word(addr(sp, 4))?;
                self.write_word(addr(sp, 0), third)?;
                self.write_word(addr(sp, 2), top)?;
                self.write_word(addr(sp, 4), next)?;
            }
        }
        Ok(())
    }

    fn syscall(&mut self, selector: u8) -> Result<(), CpuError> {
        let Some(mut os) = self.os.take() else {
            return Err(CpuError::SysCall("system call made while one is in progress".into()));
        };
        let outcome = os.handle(selector, self);
        self.os = Some(os);

        match outcome? {
            SysCallOutcome::Continue => {}
            SysCallOutcome::Exit => self.set_status(ComputerStatus::Finished),
            SysCallOutcome::NeedsInput => {
                // Re-run this sys once input arrives and the machine resumes
                let pc = self.regs.pc().wrapping_sub(2);
                self.set_register(Register::Pc, pc as i16);
                self.set_status(ComputerStatus::Waiting);
            }
        }
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("status", &self.status)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("computer cannot execute from status {0:?}")]
    NotRunnable(ComputerStatus),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("division by zero")]
    DivisionByZero,

    #[error("system call failed: {0}")]
    SysCall(String),
}
