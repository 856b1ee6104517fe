//! MTMC-16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `mtmc run <program>` - Run an executable (`.json`) or assembly source
//! - `mtmc debug <program>` - Interactive terminal debugger
//! - `mtmc asm <source>` - Assemble to an executable
//! - `mtmc disasm <program>` - Disassemble an executable

use std::io::{BufRead, Write};
use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mtmc::asm::disasm::{disassemble_executable, format_instruction};
use mtmc::asm::lexer::DEFAULT_COMMENT;
use mtmc::{Assembler, ComputerStatus, Cpu, Executable, Mtos, Observer, Register};

#[derive(Parser)]
#[command(name = "mtmc")]
#[command(version)]
#[command(about = "Assembler and emulator for the MTMC-16 teaching computer")]
struct Cli {
    /// Increase log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Line comment leader for assembly sources
    #[arg(long, global = true, default_value = DEFAULT_COMMENT)]
    comment: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it exits
    Run {
        /// Executable (.json) or assembly source to run
        program: String,
        /// Maximum number of instructions to execute
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Instructions per second (0 = unthrottled)
        #[arg(short, long, default_value = "0")]
        speed: u32,
        /// Console input given to the program before it starts
        #[arg(short, long)]
        input: Option<String>,
        /// Seed for the `rnd` system call
        #[arg(long)]
        seed: Option<u64>,
        /// Print each executed instruction
        #[arg(short, long)]
        trace: bool,
    },
    /// Interactive debugger
    Debug {
        /// Executable (.json) or assembly source to debug
        program: String,
    },
    /// Assemble source to an executable
    Asm {
        /// Path to the source file
        source: String,
        /// Output executable (defaults to the source name with .json)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an executable to readable text
    Disasm {
        /// Executable (.json) or assembly source
        program: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run { program, max_cycles, speed, input, seed, trace } => {
            let exe = load_or_exit(&program, &cli.comment);
            run_program(&exe, RunOptions { max_cycles, speed, input, seed, trace });
        }
        Commands::Debug { program } => {
            let exe = load_or_exit(&program, &cli.comment);
            debug_program(exe);
        }
        Commands::Asm { source, output } => {
            assemble_file(&source, output, &cli.comment);
        }
        Commands::Disasm { program } => {
            let exe = load_or_exit(&program, &cli.comment);
            print!("{}", disassemble_executable(&exe));
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "mtmc=debug",
        _ => "mtmc=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Assemble a source file, reporting every error.
fn assemble_source(path: &str, comment: &str) -> Result<Executable, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
    let file = Path::new(path);
    let mut assembler = Assembler::new()
        .with_source_name(file.file_name().map_or(path.into(), |n| n.to_string_lossy().into_owned()))
        .with_comment_leader(comment);
    if let Some(dir) = file.parent() {
        assembler = assembler.with_base_dir(dir);
    }

    assembler
        .assemble(&source)
        .into_result()
        .map_err(|errors| format!("{}: {}", path, errors))
}

/// Load an executable, assembling `.asm` (or any non-JSON) sources on the fly.
fn load_program(path: &str, comment: &str) -> Result<Executable, String> {
    if path.ends_with(".json") {
        Executable::load(path).map_err(|e| format!("Failed to load {}: {}", path, e))
    } else {
        assemble_source(path, comment)
    }
}

fn load_or_exit(path: &str, comment: &str) -> Executable {
    match load_program(path, comment) {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

/// Echoes program output to stdout as it is printed.
struct StdoutEcho;

impl Observer for StdoutEcho {
    fn console_printed(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

struct RunOptions {
    max_cycles: u64,
    speed: u32,
    input: Option<String>,
    seed: Option<u64>,
    trace: bool,
}

fn run_program(exe: &Executable, opts: RunOptions) {
    let os = match opts.seed {
        Some(seed) => Mtos::with_seed(seed),
        None => Mtos::new(),
    };
    let mut cpu = Cpu::with_os(Box::new(os));
    if let Err(e) = cpu.load(exe) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }
    cpu.set_speed(opts.speed);
    cpu.subscribe(Box::new(StdoutEcho));
    if let Some(input) = &opts.input {
        cpu.console_mut().provide_input(input);
    }

    let mut remaining = opts.max_cycles;
    let stdin = std::io::stdin();
    loop {
        remaining -= execute(&mut cpu, remaining, opts.trace);

        match cpu.status() {
            ComputerStatus::Finished => break,
            ComputerStatus::PermanentError => {
                let fault = cpu.fault().map(|f| f.to_string()).unwrap_or_default();
                eprintln!();
                eprintln!("❌ CPU fault at PC={:04x}: {}", cpu.regs.pc(), fault);
                std::process::exit(1);
            }
            ComputerStatus::Waiting => {
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        eprintln!();
                        eprintln!("❌ Program is waiting for input but stdin is closed");
                        std::process::exit(1);
                    }
                    Ok(_) => {
                        cpu.console_mut().provide_input(&line);
                        cpu.pause();
                    }
                }
            }
            _ if remaining == 0 => {
                eprintln!();
                eprintln!(
                    "⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.",
                    opts.max_cycles
                );
                std::process::exit(2);
            }
            _ => {}
        }
    }

    tracing::info!(cycles = cpu.cycles, rv = cpu.register(Register::Rv), "program finished");
}

/// Run up to `limit` instructions, printing each one when tracing.
/// Returns the number executed.
fn execute(cpu: &mut Cpu, limit: u64, trace: bool) -> u64 {
    if !trace {
        return cpu.run_limited(limit);
    }

    let mut executed = 0;
    while executed < limit && cpu.status().is_resumable() {
        let pc = cpu.regs.pc();
        match cpu.step() {
            Ok(instr) => {
                eprintln!(
                    "{:04x}: {:<20} t0={} sp={} flags={:02b}",
                    pc,
                    format_instruction(&instr),
                    cpu.register(Register::T0),
                    cpu.register(Register::Sp),
                    cpu.register(Register::Flags),
                );
            }
            Err(_) => {
                executed += 1;
                break;
            }
        }
        executed += 1;
    }
    executed
}

#[cfg(feature = "tui")]
fn debug_program(exe: Executable) {
    use mtmc::tui::run_debugger;

    if let Err(e) = run_debugger(exe) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_exe: Executable) {
    eprintln!("❌ This build has no debugger; rebuild with the `tui` feature");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>, comment: &str) {
    let out_path = output.unwrap_or_else(|| {
        Path::new(source_path)
            .with_extension("json")
            .to_string_lossy()
            .into_owned()
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let exe = match assemble_source(source_path, comment) {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} code bytes, {} data bytes", exe.code.len(), exe.data.len());

    if let Err(e) = exe.save(&out_path) {
        eprintln!("❌ Failed to save executable: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}
