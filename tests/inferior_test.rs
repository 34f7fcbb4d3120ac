// Live-process tests for the tracee and breakpoint layers. Each test
// spawns its own /bin/true under PTRACE_TRACEME, which stops with SIGTRAP
// at exec; from there the tracee can be poked while it is quiescent.

use nix::sys::signal::Signal;

use unbug::breakpoint::Breakpoint;
use unbug::inferior::{Inferior, Status};
use unbug::registers::Reg;

const TARGET: &str = "/bin/true";

/// Spawn a traced child and wait for the exec stop; returns the inferior
/// and the instruction pointer it stopped at.
fn spawn_stopped() -> (Inferior, u64) {
    let inferior = Inferior::new(TARGET).expect("could not spawn traced child");
    let status = inferior.wait(None).expect("wait on fresh tracee failed");
    match status {
        Status::Stopped(signal, rip) => {
            assert_eq!(signal, Signal::SIGTRAP, "exec stop should be SIGTRAP");
            (inferior, rip)
        }
        other => panic!("expected exec stop, got: {}", other),
    }
}

#[test]
fn test_breakpoint_word_round_trip() {
    let (mut inferior, pc) = spawn_stopped();
    let original = inferior.read_word(pc).expect("peek at pc failed");

    let mut bp = Breakpoint::new(pc);
    assert!(!bp.is_enabled());

    bp.enable(&inferior).expect("enable failed");
    assert!(bp.is_enabled());
    assert_eq!(bp.saved_byte(), (original & 0xff) as u8);

    let patched = inferior.read_word(pc).expect("peek after enable failed");
    assert_eq!(patched & 0xff, 0xcc, "low byte should be int3");
    assert_eq!(
        patched & !0xff,
        original & !0xff,
        "upper bytes must be untouched"
    );

    bp.disable(&inferior).expect("disable failed");
    assert!(!bp.is_enabled());
    let restored = inferior.read_word(pc).expect("peek after disable failed");
    assert_eq!(restored, original, "disable must restore the whole word");

    inferior.kill().expect("kill failed");
}

#[test]
fn test_register_write_read_round_trip() {
    let (mut inferior, _pc) = spawn_stopped();

    let mut regs = inferior.regs().expect("getregs failed");
    Reg::Rax.write(&mut regs, 42);
    inferior.set_regs(regs).expect("setregs failed");

    let regs = inferior.regs().expect("getregs after setregs failed");
    assert_eq!(Reg::Rax.read(&regs), 42);

    inferior.kill().expect("kill failed");
}

#[test]
fn test_memory_word_round_trip() {
    let (mut inferior, _pc) = spawn_stopped();

    // The stack is writable; scribble a word below the stack pointer.
    let regs = inferior.regs().expect("getregs failed");
    let addr = Reg::Rsp.read(&regs) - 64;
    inferior
        .write_word(addr, 0xdead_beef_cafe_f00d)
        .expect("poke failed");
    assert_eq!(inferior.read_word(addr).expect("peek failed"), 0xdead_beef_cafe_f00d);

    inferior.kill().expect("kill failed");
}

#[test]
fn test_single_step_advances_the_pc() {
    let (mut inferior, pc) = spawn_stopped();

    inferior.single_step().expect("single step failed");
    let status = inferior.wait(None).expect("wait after step failed");
    match status {
        Status::Stopped(signal, rip) => {
            assert_eq!(signal, Signal::SIGTRAP);
            assert_ne!(rip, pc, "one instruction should have executed");
        }
        other => panic!("expected a stop after single step, got: {}", other),
    }

    inferior.kill().expect("kill failed");
}

#[test]
fn test_continue_runs_to_exit() {
    let (inferior, _pc) = spawn_stopped();

    inferior.cont().expect("continue failed");
    match inferior.wait(None).expect("wait after continue failed") {
        Status::Exited(code) => assert_eq!(code, 0, "/bin/true exits 0"),
        other => panic!("expected exit, got: {}", other),
    }
}
