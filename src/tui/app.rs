//! Debugger application state and logic.

use crate::asm::disasm::disassemble_at;
use crate::cpu::{ComputerStatus, Cpu, Register, MEMORY_SIZE};
use crate::executable::Executable;

/// Instructions executed per UI tick while running.
const CYCLES_PER_TICK: u64 = 1_000;

/// Bytes shown per memory row.
pub const MEMORY_ROW: usize = 8;

/// Debugger application state.
pub struct DebuggerApp {
    /// The computer being debugged.
    pub cpu: Cpu,
    /// Program to reload on reset.
    pub program: Executable,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
    /// Console line being typed while the program waits for input.
    pub input: String,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Executable) -> Self {
        let mut cpu = Cpu::new();
        let status = match cpu.load(&program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".to_string(),
            Err(e) => format!("Load failed: {}", e),
        };

        Self {
            cpu,
            program,
            running: false,
            should_quit: false,
            status,
            mem_scroll: 0,
            input: String::new(),
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.status().is_resumable() {
            self.status = format!("Cannot step: {:?}", self.cpu.status());
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc();
        match self.cpu.step() {
            Ok(_) => {
                let (text, _) = disassemble_at(self.cpu.mem.dump(0, MEMORY_SIZE), pc as usize);
                self.status = format!("PC={:04x}: {}", pc, text);
                self.after_execution();
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until exit, breakpoint, fault or pause.
    pub fn run(&mut self) {
        if self.cpu.status() == ComputerStatus::Waiting {
            self.status = "Waiting for input. Type a line and press Enter.".into();
            return;
        }
        self.running = true;
        self.status = "Running...".into();
    }

    pub fn pause(&mut self) {
        self.running = false;
        self.cpu.pause();
        self.status = "Paused.".into();
    }

    /// Run one batch of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }
        self.cpu.run_limited(CYCLES_PER_TICK);
        self.after_execution();
    }

    /// Report whatever stopped the machine.
    fn after_execution(&mut self) {
        match self.cpu.status() {
            ComputerStatus::Executing | ComputerStatus::Ready => {}
            ComputerStatus::Finished => {
                self.running = false;
                self.status = format!("Finished after {} cycles", self.cpu.cycles);
            }
            ComputerStatus::PermanentError => {
                self.running = false;
                self.status = match self.cpu.fault() {
                    Some(fault) => format!("Fault: {}", fault),
                    None => "Fault".into(),
                };
            }
            ComputerStatus::Breakpoint => {
                self.running = false;
                self.status = format!("Breakpoint at PC={:04x}", self.cpu.regs.pc());
            }
            ComputerStatus::Waiting => {
                self.status = "Waiting for input. Type a line and press Enter.".into();
            }
        }
    }

    /// Is the program blocked on console input?
    pub fn is_waiting(&self) -> bool {
        self.cpu.status() == ComputerStatus::Waiting
    }

    /// Hand the typed line to the console and resume.
    pub fn submit_input(&mut self) {
        let line = std::mem::take(&mut self.input);
        self.cpu.console_mut().provide_input(&format!("{}\n", line));
        self.cpu.pause();
        if self.running {
            self.status = "Running...".into();
        } else {
            self.status = "Input accepted. Ready.".into();
        }
    }

    /// Toggle a breakpoint at the current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc();
        if self.cpu.remove_breakpoint(pc) {
            self.status = format!("Removed breakpoint at PC={:04x}", pc);
        } else {
            self.cpu.add_breakpoint(pc);
            self.status = format!("Set breakpoint at PC={:04x}", pc);
        }
    }

    pub fn has_breakpoint(&self, addr: u16) -> bool {
        self.cpu.breakpoints().any(|bp| bp == addr)
    }

    /// Reload the program. Breakpoints are kept.
    pub fn reset(&mut self) {
        self.running = false;
        self.input.clear();
        self.status = match self.cpu.load(&self.program) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Load failed: {}", e),
        };
    }

    pub fn scroll_memory(&mut self, delta: isize) {
        let max = MEMORY_SIZE / MEMORY_ROW - 1;
        self.mem_scroll = self.mem_scroll.saturating_add_signed(delta).min(max);
    }

    /// Disassembly of the code segment around the current PC.
    ///
    /// Returns `(address, text, is_current)` triples.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u16, String, bool)> {
        let pc = self.cpu.regs.pc() as usize;
        let code_len = self.program.code.len();
        let memory = self.cpu.mem.dump(0, MEMORY_SIZE);

        // Walk from the start of code so double-word instructions stay
        // aligned, keeping the window around the PC.
        let mut listing = Vec::new();
        let mut addr = 0;
        while addr < code_len {
            let (text, size) = disassemble_at(memory, addr);
            listing.push((addr as u16, text, addr == pc));
            addr += size;
        }

        let current = listing.iter().position(|(_, _, cur)| *cur).unwrap_or(0);
        let start = current.saturating_sub(lines / 2);
        listing.into_iter().skip(start).take(lines).collect()
    }

    /// Named register values for display.
    pub fn register_values(&self) -> Vec<(Register, i16)> {
        Register::ALL.iter().map(|&r| (r, self.cpu.register(r))).collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Executable) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if app.is_waiting() {
                        match key.code {
                            KeyCode::Enter => app.submit_input(),
                            KeyCode::Backspace => {
                                app.input.pop();
                            }
                            KeyCode::Esc => app.pause(),
                            KeyCode::Char(c) => app.input.push(c),
                            _ => {}
                        }
                    } else {
                        match key.code {
                            KeyCode::Char('q') => app.should_quit = true,
                            KeyCode::Char('s') => {
                                app.running = false;
                                app.step();
                            }
                            KeyCode::Char('r') => app.run(),
                            KeyCode::Char('p') => app.pause(),
                            KeyCode::Char('b') => app.toggle_breakpoint(),
                            KeyCode::Char('x') => app.reset(),
                            KeyCode::Up => app.scroll_memory(-1),
                            KeyCode::Down => app.scroll_memory(1),
                            KeyCode::PageUp => app.scroll_memory(-16),
                            KeyCode::PageDown => app.scroll_memory(16),
                            _ => {}
                        }
                    }
                }
            }
        }

        if app.running && !app.is_waiting() {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
