//! Assemble-and-run tests covering the whole toolchain.

use std::sync::{Arc, Mutex};

use mtmc::cpu::{alu, AluOp, TestOp};
use mtmc::{assemble, Assembler, ComputerStatus, Cpu, Executable, Observer, Register};
use proptest::prelude::*;

/// Collects everything the program prints.
#[derive(Clone, Default)]
struct Transcript(Arc<Mutex<String>>);

impl Transcript {
    fn text(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

impl Observer for Transcript {
    fn console_printed(&mut self, text: &str) {
        self.0.lock().unwrap().push_str(text);
    }
}

fn boot(source: &str) -> Cpu {
    let exe = match assemble(source) {
        Ok(exe) => exe,
        Err(e) => panic!("{}", e),
    };
    let mut cpu = Cpu::new();
    cpu.load(&exe).unwrap();
    cpu
}

fn run(source: &str) -> Cpu {
    let mut cpu = boot(source);
    cpu.run_limited(10_000);
    cpu
}

#[test]
fn test_exit_program() {
    let exe = assemble("sys exit").unwrap();
    assert_eq!(exe.code, vec![0x00, 0x00]);

    let mut cpu = Cpu::new();
    cpu.load(&exe).unwrap();
    cpu.run();
    assert_eq!(cpu.status(), ComputerStatus::Finished);
}

#[test]
fn test_binary_alu_suite() {
    let (a, b) = (100i16, 7i16);
    for op in AluOp::ALL.iter().filter(|op| !op.is_unary()) {
        let source = format!("li t0 {}\nli t1 {}\n{} t0 t1\nsys exit", a, b, op);
        let cpu = run(&source);
        assert_eq!(cpu.status(), ComputerStatus::Finished, "{}", op);
        assert_eq!(cpu.register(Register::T0), alu(*op, a, b).unwrap(), "{}", op);
        assert_eq!(cpu.register(Register::T1), b, "{}", op);
    }
}

#[test]
fn test_unary_alu_suite() {
    for op in AluOp::ALL.iter().filter(|op| op.is_unary()) {
        let cpu = run(&format!("li t0 -12\n{} t0\nsys exit", op));
        assert_eq!(cpu.register(Register::T0), alu(*op, -12, 0).unwrap(), "{}", op);
    }
}

#[test]
fn test_comparisons_only_touch_flag() {
    for (a, b) in [(3i16, 3i16), (2, 9), (9, 2), (-4, 4)] {
        for op in TestOp::ALL {
            let source = format!("li t0 {}\nli t1 {}\n{} t0 t1\nsys exit", a, b, op.name());
            let cpu = run(&source);
            assert_eq!(cpu.regs.is_flag_test_set(), op.evaluate(a, b), "{} {} {}", a, op.name(), b);
            assert_eq!(cpu.register(Register::T0), a);
            assert_eq!(cpu.register(Register::T1), b);
        }
    }
}

#[test]
fn test_division_by_zero_faults() {
    let cpu = run("li t0 5\nli t1 0\ndiv t0 t1\nsys exit");
    assert_eq!(cpu.status(), ComputerStatus::PermanentError);
}

proptest! {
    #[test]
    fn test_push_pop_identity(value in any::<i16>()) {
        let cpu = run(&format!("li t0 {}\npush t0\npop t1\nsys exit", value));
        prop_assert_eq!(cpu.register(Register::T1), value);
        prop_assert_eq!(cpu.register(Register::Sp), 4096);
    }

    #[test]
    fn test_push_pop_identity_custom_stack(value in any::<i16>()) {
        let source = format!("li t5 3000\nli t0 {}\npush t0 t5\npop t1 t5\nsys exit", value);
        let cpu = run(&source);
        prop_assert_eq!(cpu.register(Register::T1), value);
        prop_assert_eq!(cpu.register(Register::T5), 3000);
        prop_assert_eq!(cpu.register(Register::Sp), 4096);
    }

    #[test]
    fn test_assembly_is_deterministic(a in any::<i16>(), b in 0u8..16) {
        let source = format!("li t0 {}\ninc t0 {}\nprint: push t0\njz print\nsys exit", a, b);
        prop_assert_eq!(assemble(&source).unwrap(), assemble(&source).unwrap());
    }
}

#[test]
fn test_forward_label_resolves() {
    let exe = assemble("j end\nnop\nnop\nend: sys exit").unwrap();
    // j end, nop, nop -> end at offset 6
    assert_eq!(exe.code[..2], [0xC0, 0x06]);

    let mut cpu = Cpu::new();
    cpu.load(&exe).unwrap();
    cpu.run();
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(cpu.cycles, 2);
}

#[test]
fn test_unresolved_label_produces_no_code() {
    let result = Assembler::new().assemble("j nowhere\nsys exit");
    assert!(result.executable.is_none());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].message, "Unresolved label: nowhere");
}

#[test]
fn test_duplicate_label_single_error() {
    let errors = assemble("a: nop\na: nop\nsys exit").unwrap_err();
    assert_eq!(errors.0.len(), 1);
    assert_eq!(errors.0[0].line(), 2);
}

#[test]
fn test_print_data_string() {
    let transcript = Transcript::default();
    let mut cpu = boot(".data\n hello: \"hi\"\n.text\n ldi t0 hello\n mv a0 t0\n sys wstr");
    cpu.subscribe(Box::new(transcript.clone()));
    cpu.run_limited(100);
    assert_eq!(transcript.text(), "hi");
    assert_eq!(cpu.console().output(), "hi");
}

#[test]
fn test_hello_world() {
    let transcript = Transcript::default();
    let mut cpu = boot(".data\nmsg: \"Hello, world!\\n\"\n.text\nla a0 msg\nsys wstr\nsys exit");
    cpu.subscribe(Box::new(transcript.clone()));
    cpu.run();
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(transcript.text(), "Hello, world!\n");
}

#[test]
fn test_stack_max() {
    let cpu = run("pushi 1\npushi 2\nsmax\npop t0\nsys exit");
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(cpu.register(Register::T0), 2);
    assert_eq!(cpu.register(Register::Sp), 4096);
}

#[test]
fn test_conditional_jumps() {
    let source = "
        li t0 0
        eqi t0 0
        jz skipped
        li t1 1
    skipped:
        jnz taken
        li t2 1
    taken:
        sys exit
    ";
    let cpu = run(source);
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    // jz falls through when the test flag is set; jnz then jumps
    assert_eq!(cpu.register(Register::T1), 1);
    assert_eq!(cpu.register(Register::T2), 0);
}

#[test]
fn test_call_and_return() {
    let source = "
        li a0 20
        jal double
        mv t0 rv
        sys exit
    double:
        mv rv a0
        add rv a0
        ret
    ";
    let cpu = run(source);
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(cpu.register(Register::T0), 40);
}

#[test]
fn test_load_word_from_data_label() {
    let cpu = run(".data\nvalue: 1234\n.text\nlw t0 value\nsys exit");
    assert_eq!(cpu.register(Register::T0), 1234);
}

#[test]
fn test_register_load_store() {
    let source = "
        li t0 -300
        li t1 2000
        li t2 6
        swr t0 t1 t2
        lwr t3 t1 t2
        sys exit
    ";
    let cpu = run(source);
    assert_eq!(cpu.register(Register::T3), -300);
    assert_eq!(cpu.read_word(2006).unwrap(), -300);
}

#[test]
fn test_memory_copy() {
    let source = "
        .data
        src: \"abc\"
        .text
        la t0 src
        li t1 1000
        mcp t0 t1 4
        li a0 1000
        sys wstr
        sys exit
    ";
    let cpu = run(source);
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(cpu.console().output(), "abc");
}

#[test]
fn test_small_immediates() {
    let cpu = run("seti t0 9\ninc t0\ninc t0 4\ndec t0 2\nsys exit");
    assert_eq!(cpu.register(Register::T0), 12);
}

#[test]
fn test_nop_changes_only_pc() {
    // ir and dr latch the fetched words
    fn visible(cpu: &Cpu) -> Vec<i16> {
        Register::ALL
            .iter()
            .filter(|r| !matches!(r, Register::Pc | Register::Ir | Register::Dr))
            .map(|&r| cpu.register(r))
            .collect()
    }

    let mut cpu = boot("nop\nsys exit");
    let before = visible(&cpu);
    cpu.step().unwrap();
    let after = visible(&cpu);
    assert_eq!(before, after);
    assert_eq!(cpu.regs.pc(), 2);
}

#[test]
fn test_invalid_instruction_halts() {
    let exe = Executable::new(vec![0xA0, 0x00], Vec::new(), "bad");
    let mut cpu = Cpu::new();
    cpu.load(&exe).unwrap();
    assert!(cpu.step().is_err());
    assert_eq!(cpu.status(), ComputerStatus::PermanentError);
    assert!(cpu.step().is_err());
}

#[test]
fn test_executable_survives_json() {
    let exe = assemble(".data\nmsg: \"x\"\n.text\nla a0 msg\nsys wstr\nsys exit").unwrap();
    let restored = Executable::from_json(&exe.to_json().unwrap()).unwrap();
    assert_eq!(restored, exe);

    let mut cpu = Cpu::new();
    cpu.load(&restored).unwrap();
    cpu.run();
    assert_eq!(cpu.console().output(), "x");
}

#[test]
fn test_read_int_waits_for_input() {
    let mut cpu = boot("sys rint\nmv t0 rv\nsys exit");
    cpu.run_limited(100);
    assert_eq!(cpu.status(), ComputerStatus::Waiting);

    cpu.console_mut().provide_input("42\n");
    cpu.pause();
    cpu.run_limited(100);
    assert_eq!(cpu.status(), ComputerStatus::Finished);
    assert_eq!(cpu.register(Register::T0), 42);
}
