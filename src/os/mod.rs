//! Operating system collaborator.
//!
//! The CPU hands every `sys` instruction to a [`SysCallHandler`]. Arguments
//! arrive in `a0`-`a3` and results go back in `rv`. [`Mtos`] is the default
//! handler and implements the console and utility calls; filesystem and
//! display calls are reported as unsupported.

pub mod console;
pub mod syscall;

pub use console::Console;
pub use syscall::SysCall;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::cpu::registers::Register;
use crate::cpu::{Cpu, CpuError};

/// What the CPU should do after a system call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysCallOutcome {
    /// Carry on with the next instruction.
    Continue,
    /// The program asked to stop.
    Exit,
    /// The call needs console input that has not arrived yet.
    /// The CPU retries the same instruction once it is resumed.
    NeedsInput,
}

/// Dispatch target for `sys` instructions.
pub trait SysCallHandler: Send {
    fn handle(&mut self, selector: u8, cpu: &mut Cpu) -> Result<SysCallOutcome, CpuError>;

    /// Called when the computer is reset or a new program is loaded.
    fn reset(&mut self) {}
}

/// The default operating system.
#[derive(Debug, Clone)]
pub struct Mtos {
    started: Instant,
    rng: XorShift,
}

impl Mtos {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5EED);
        Self::with_seed(seed)
    }

    /// Use a fixed seed for `rnd`, for reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            started: Instant::now(),
            rng: XorShift::new(seed),
        }
    }

    fn unsupported(&self, call: SysCall, cpu: &mut Cpu) -> SysCallOutcome {
        tracing::warn!(syscall = %call, "system call not supported by this machine");
        cpu.set_register(Register::Rv, -1);
        SysCallOutcome::Continue
    }
}

impl Default for Mtos {
    fn default() -> Self {
        Self::new()
    }
}

/// Treat a register as an unsigned 16-bit address.
fn address(cpu: &Cpu, reg: Register) -> i32 {
    cpu.register(reg) as u16 as i32
}

impl SysCallHandler for Mtos {
    fn handle(&mut self, selector: u8, cpu: &mut Cpu) -> Result<SysCallOutcome, CpuError> {
        let call = SysCall::from_selector(selector)
            .ok_or_else(|| CpuError::SysCall(format!("unknown system call {:#04x}", selector)))?;
        tracing::trace!(syscall = %call, "system call");

        match call {
            SysCall::Exit => return Ok(SysCallOutcome::Exit),

            SysCall::Rint => {
                let Some(line) = cpu.console_mut().read_line() else {
                    return Ok(SysCallOutcome::NeedsInput);
                };
                let value = match line.trim().parse::<i32>() {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::debug!(input = %line.trim(), "rint input is not an integer, reading 0");
                        0
                    }
                };
                cpu.set_register(Register::Rv, value as i16);
            }
            SysCall::Wint => {
                let value = cpu.register(Register::A0);
                cpu.print(&value.to_string());
            }
            SysCall::Rstr => {
                let Some(line) = cpu.console_mut().read_line() else {
                    return Ok(SysCallOutcome::NeedsInput);
                };
                let pointer = address(cpu, Register::A0);
                let max = cpu.register(Register::A1).max(0) as usize;
                let bytes: Vec<u8> = line.bytes().take(max).collect();
                for (i, b) in bytes.iter().enumerate() {
                    cpu.write_byte(pointer + i as i32, *b)?;
                }
                cpu.set_register(Register::Rv, bytes.len() as i16);
            }
            SysCall::Wchr => {
                let c = cpu.register(Register::A0) as u8 as char;
                cpu.print(&c.to_string());
            }
            SysCall::Rchr => {
                let Some(c) = cpu.console_mut().read_char() else {
                    return Ok(SysCallOutcome::NeedsInput);
                };
                cpu.set_register(Register::Rv, c as u32 as i16);
            }
            SysCall::Wstr => {
                let text = cpu.read_c_string(address(cpu, Register::A0))?;
                cpu.print(&text);
            }
            SysCall::Printf => {
                let format = cpu.read_c_string(address(cpu, Register::A0))?;
                let text = printf(cpu, &format)?;
                cpu.print(&text);
            }
            SysCall::Atoi => {
                let text = cpu.read_c_string(address(cpu, Register::A0))?;
                cpu.set_register(Register::Rv, atoi(&text));
            }

            SysCall::Rnd => {
                let low = cpu.register(Register::A0) as i32;
                let high = cpu.register(Register::A1) as i32;
                let (low, high) = if low <= high { (low, high) } else { (high, low) };
                let span = (high - low + 1) as u64;
                let value = low + (self.rng.next() % span) as i32;
                cpu.set_register(Register::Rv, value as i16);
            }
            SysCall::Sleep => {
                let millis = cpu.register(Register::A0).max(0) as u64;
                sleep_unless_paused(cpu, Duration::from_millis(millis));
            }
            SysCall::Timer => {
                let elapsed = self.started.elapsed().as_millis().min(i16::MAX as u128);
                cpu.set_register(Register::Rv, elapsed as i16);
            }
            SysCall::Joystick => {
                let state = cpu.register(Register::Io);
                cpu.set_register(Register::Rv, state);
            }
            SysCall::Memcpy => {
                let from = address(cpu, Register::A0);
                let to = address(cpu, Register::A1);
                let len = cpu.register(Register::A2).max(0) as i32;
                for i in 0..len {
                    let b = cpu.read_byte(from + i)?;
                    cpu.write_byte(to + i, b)?;
                }
            }
            SysCall::Error => {
                let message = cpu.read_c_string(address(cpu, Register::A0))?;
                cpu.print(&message);
                return Err(CpuError::SysCall(message));
            }

            SysCall::Rfile
            | SysCall::Wfile
            | SysCall::Cwd
            | SysCall::Chdir
            | SysCall::Dirent
            | SysCall::Dfile
            | SysCall::Fbreset
            | SysCall::Fbstat
            | SysCall::Fbset
            | SysCall::Fbline
            | SysCall::Fbrect
            | SysCall::Fbflush
            | SysCall::Scolor
            | SysCall::Drawimg
            | SysCall::Drawimgsz
            | SysCall::Drawimgclip => return Ok(self.unsupported(call, cpu)),
        }

        Ok(SysCallOutcome::Continue)
    }

    fn reset(&mut self) {
        self.started = Instant::now();
    }
}

/// Longest uninterrupted stretch of a `sleep` call.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Sleep in short slices, returning early once a pause is requested. The
/// request stays set so the run loop stops at the next cycle.
fn sleep_unless_paused(cpu: &Cpu, total: Duration) {
    let pause = cpu.pause_handle();
    let deadline = Instant::now() + total;
    loop {
        if pause.load(Ordering::SeqCst) {
            tracing::debug!("sleep interrupted by a pause request");
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// Expand `%d`, `%c`, `%s` and `%%`, taking arguments from `a1`-`a3`.
fn printf(cpu: &Cpu, format: &str) -> Result<String, CpuError> {
    let mut args = [Register::A1, Register::A2, Register::A3].into_iter();
    let mut out = String::new();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(conv @ ('d' | 'c' | 's')) => {
                let Some(reg) = args.next() else {
                    out.push('%');
                    out.push(conv);
                    continue;
                };
                let value = cpu.register(reg);
                match conv {
                    'd' => out.push_str(&value.to_string()),
                    'c' => out.push(value as u8 as char),
                    _ => out.push_str(&cpu.read_c_string(value as u16 as i32)?),
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(out)
}

/// Parse a leading decimal integer, ignoring leading whitespace.
/// Anything unparseable yields 0.
fn atoi(text: &str) -> i16 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let value = digits
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .fold(0i32, |acc, c| acc.wrapping_mul(10).wrapping_add(c as i32 - '0' as i32));
    let value = if negative { value.wrapping_neg() } else { value };
    value as i16
}

/// Small xorshift generator for `rnd`.
#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoi() {
        assert_eq!(atoi("42"), 42);
        assert_eq!(atoi("  -17xyz"), -17);
        assert_eq!(atoi("+5"), 5);
        assert_eq!(atoi("abc"), 0);
    }

    #[test]
    fn test_xorshift_is_deterministic() {
        let mut a = XorShift::new(7);
        let mut b = XorShift::new(7);
        for _ in 0..10 {
            assert_eq!(a.next(), b.next());
        }
        assert_ne!(XorShift::new(0).next(), 0);
    }

    #[test]
    fn test_printf() {
        let mut cpu = Cpu::new();
        cpu.regs.set(Register::A1, -3);
        cpu.regs.set(Register::A2, 'x' as i16);
        cpu.regs.set(Register::A3, 100);
        cpu.mem.load_image(100, b"ok\0").unwrap();

        let text = printf(&cpu, "%d %c %s 100%% %q").unwrap();
        assert_eq!(text, "-3 x ok 100% %q");
    }

    #[test]
    fn test_rnd_stays_in_range() {
        let mut os = Mtos::with_seed(42);
        let mut cpu = Cpu::new();
        cpu.regs.set(Register::A0, 10);
        cpu.regs.set(Register::A1, 3);
        for _ in 0..100 {
            let outcome = os.handle(SysCall::Rnd.selector(), &mut cpu).unwrap();
            assert_eq!(outcome, SysCallOutcome::Continue);
            let value = cpu.register(Register::Rv);
            assert!((3..=10).contains(&value));
        }
    }

    #[test]
    fn test_unsupported_call_sets_rv() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        let outcome = os.handle(SysCall::Fbflush.selector(), &mut cpu).unwrap();
        assert_eq!(outcome, SysCallOutcome::Continue);
        assert_eq!(cpu.register(Register::Rv), -1);
    }

    #[test]
    fn test_unknown_selector_is_an_error() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        assert!(matches!(os.handle(0x09, &mut cpu), Err(CpuError::SysCall(_))));
    }

    #[test]
    fn test_read_calls_wait_for_input() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        let outcome = os.handle(SysCall::Rint.selector(), &mut cpu).unwrap();
        assert_eq!(outcome, SysCallOutcome::NeedsInput);

        cpu.console_mut().provide_input("-12\n");
        let outcome = os.handle(SysCall::Rint.selector(), &mut cpu).unwrap();
        assert_eq!(outcome, SysCallOutcome::Continue);
        assert_eq!(cpu.register(Register::Rv), -12);
    }

    #[test]
    fn test_rint_reads_garbage_as_zero() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        cpu.regs.set(Register::Rv, 7);
        cpu.console_mut().provide_input("twelve\n");
        let outcome = os.handle(SysCall::Rint.selector(), &mut cpu).unwrap();
        assert_eq!(outcome, SysCallOutcome::Continue);
        assert_eq!(cpu.register(Register::Rv), 0);
    }

    #[test]
    fn test_sleep_returns_when_paused() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        cpu.regs.set(Register::A0, i16::MAX);
        cpu.pause_handle().store(true, Ordering::SeqCst);

        let start = Instant::now();
        let outcome = os.handle(SysCall::Sleep.selector(), &mut cpu).unwrap();
        assert_eq!(outcome, SysCallOutcome::Continue);
        assert!(start.elapsed() < Duration::from_secs(1));
        // The request is left for the run loop
        assert!(cpu.pause_handle().load(Ordering::SeqCst));
    }

    #[test]
    fn test_sleep_waits_when_running() {
        let mut os = Mtos::with_seed(1);
        let mut cpu = Cpu::new();
        cpu.regs.set(Register::A0, 25);

        let start = Instant::now();
        os.handle(SysCall::Sleep.selector(), &mut cpu).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
