//! The inferior: the process being debugged, plus thin wrappers over the
//! ptrace requests the engine needs.
//!
//! Every wrapper is a single syscall and requires the tracee to be stopped;
//! the engine guarantees that by following each resumption with a blocking
//! [`Inferior::wait`].

use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::Child;
use std::process::Command;

use nix::sys::ptrace;
use nix::sys::signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Status of the child process after a wait.
pub enum Status {
    /// The inferior stopped. Contains the signal that stopped the process
    /// and the instruction pointer it is stopped at.
    Stopped(signal::Signal, u64),

    /// The inferior exited normally. Contains the exit status code.
    Exited(i32),

    /// The inferior was terminated by a signal.
    Signaled(signal::Signal),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Stopped(signal, rip) => {
                write!(f, "stopped (signal {}, rip {:#x})", signal, rip)
            }
            Status::Exited(exit_code) => write!(f, "exited with status {}", exit_code),
            Status::Signaled(signal) => write!(f, "terminated by signal {}", signal),
        }
    }
}

/// This function calls ptrace with PTRACE_TRACEME to enable debugging on a
/// process. Use with pre_exec to call this in the child process.
fn child_traceme() -> Result<(), std::io::Error> {
    ptrace::traceme().or(Err(std::io::Error::new(
        std::io::ErrorKind::Other,
        "ptrace TRACEME failed",
    )))
}

pub struct Inferior {
    child: Child,
}

impl Inferior {
    /// Attempts to start a new inferior process. The child requests
    /// self-trace and execs the target with no arguments, so by the time
    /// the exec completes it is stopped with SIGTRAP. Returns None if the
    /// process could not be spawned.
    pub fn new(target: &str) -> Option<Inferior> {
        let mut cmd = Command::new(target);
        unsafe {
            cmd.pre_exec(child_traceme);
        }
        let child = cmd.spawn().ok()?;
        Some(Inferior { child })
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Calls waitpid on this inferior and returns a Status to indicate the
    /// state of the process after the call.
    pub fn wait(&self, options: Option<WaitPidFlag>) -> Result<Status, nix::Error> {
        Ok(match waitpid(self.pid(), options)? {
            WaitStatus::Exited(_pid, exit_code) => Status::Exited(exit_code),
            WaitStatus::Signaled(_pid, signal, _core_dumped) => Status::Signaled(signal),
            WaitStatus::Stopped(_pid, signal) => {
                let regs = ptrace::getregs(self.pid())?;
                Status::Stopped(signal, regs.rip)
            }
            other => panic!("waitpid returned unexpected status: {:?}", other),
        })
    }

    /// Resume the tracee until the next signal delivery.
    pub fn cont(&self) -> Result<(), nix::Error> {
        ptrace::cont(self.pid(), None)
    }

    /// Execute exactly one instruction; the tracee stops with TRAP_TRACE.
    pub fn single_step(&self) -> Result<(), nix::Error> {
        ptrace::step(self.pid(), None)
    }

    /// Read the 8-byte word at `addr` in the tracee's address space.
    pub fn read_word(&self, addr: u64) -> Result<u64, nix::Error> {
        Ok(ptrace::read(self.pid(), addr as ptrace::AddressType)? as u64)
    }

    /// Write an 8-byte word at `addr` in the tracee's address space.
    pub fn write_word(&self, addr: u64, word: u64) -> Result<(), nix::Error> {
        ptrace::write(
            self.pid(),
            addr as ptrace::AddressType,
            word as *mut std::ffi::c_void,
        )
    }

    pub fn regs(&self) -> Result<libc::user_regs_struct, nix::Error> {
        ptrace::getregs(self.pid())
    }

    pub fn set_regs(&self, regs: libc::user_regs_struct) -> Result<(), nix::Error> {
        ptrace::setregs(self.pid(), regs)
    }

    /// Details of the signal that stopped the tracee.
    pub fn siginfo(&self) -> Result<libc::siginfo_t, nix::Error> {
        ptrace::getsiginfo(self.pid())
    }

    /// Kill the process and reap it.
    pub fn kill(&mut self) -> Result<(), nix::Error> {
        let _ = self.child.kill();
        self.wait(None)?;
        Ok(())
    }
}
