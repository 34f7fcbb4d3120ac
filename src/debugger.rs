//! The debugger engine: owns the breakpoint map and the load-address
//! offset, drives the tracee, and implements the trap handling and the
//! source-level stepping on top of the line table.

use std::collections::HashMap;
use std::fs;
use std::process;

use log::debug;
use nix::sys::signal::Signal;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use thiserror::Error;

use crate::breakpoint::Breakpoint;
use crate::debugger_command::DebuggerCommand;
use crate::dwarf_data::{DwarfData, Error as DwarfError, Line};
use crate::inferior::{Inferior, Status};
use crate::registers::{self, Reg};
use crate::source;

// si_code values for SIGTRAP and SIGSEGV, from the kernel's siginfo.h.
const SI_KERNEL: i32 = 0x80;
const TRAP_BRKPT: i32 = 1;
const TRAP_TRACE: i32 = 2;
const SEGV_MAPERR: i32 = 1;
const SEGV_ACCERR: i32 = 2;

/// Source lines printed either side of the stop location.
const SOURCE_CONTEXT_LINES: u64 = 2;

#[derive(Debug, Error)]
pub enum DebugError {
    /// A ptrace request failed; there is no recovery at this level.
    #[error("tracee request failed: {0}")]
    Tracee(#[from] nix::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("no line table entry for address {0:#x}")]
    NoLineInfo(u64),
    #[error("no enclosing function for address {0:#x}")]
    NoFunctionInfo(u64),
    #[error("no such register: {0}")]
    UnknownRegister(String),
    #[error("could not parse load address from /proc maps")]
    LoadAddress,
}

impl DebugError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DebugError::Tracee(_))
    }
}

/// Temporary breakpoints installed by step-over/step-out. Only addresses
/// this helper installed are recorded, so a user breakpoint at the same
/// address survives the cleanup.
struct TempBreakpoints {
    installed: Vec<u64>,
}

impl TempBreakpoints {
    fn new() -> TempBreakpoints {
        TempBreakpoints { installed: Vec::new() }
    }

    fn ensure(&mut self, debugger: &mut Debugger, addr: u64) -> Result<(), DebugError> {
        if !debugger.breakpoints.contains_key(&addr) {
            debugger.install_breakpoint(addr)?;
            self.installed.push(addr);
        }
        Ok(())
    }

    /// Remove everything this helper installed, attempting every address
    /// even if one removal fails.
    fn remove_all(self, debugger: &mut Debugger) -> Result<(), DebugError> {
        let mut first_err = None;
        for addr in self.installed {
            if let Err(e) = debugger.remove_breakpoint(addr) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct Debugger {
    target: String,
    inferior: Inferior,
    debug_data: DwarfData,
    load_address: u64,
    breakpoints: HashMap<u64, Breakpoint>,
    readline: Editor<()>,
    running: bool,
}

impl Debugger {
    /// Load the target's debug info and launch it stopped under trace.
    /// Failures here are unrecoverable and exit directly, before the REPL
    /// ever starts.
    pub fn new(target: &str) -> Debugger {
        let debug_data = match DwarfData::from_file(target) {
            Ok(data) => data,
            Err(DwarfError::ErrorOpeningFile) => {
                eprintln!("Could not open file {}", target);
                process::exit(1);
            }
            Err(DwarfError::DwarfFormatError(err)) => {
                eprintln!("Could not load debugging symbols from {}: {}", target, err);
                process::exit(1);
            }
        };

        let inferior = match Inferior::new(target) {
            Some(inferior) => inferior,
            None => {
                eprintln!("Error starting {}", target);
                process::exit(1);
            }
        };
        println!("Started debugging process {}", inferior.pid());

        Debugger {
            target: target.to_string(),
            inferior,
            debug_data,
            load_address: 0,
            breakpoints: HashMap::new(),
            readline: Editor::<()>::new(),
            running: true,
        }
    }

    /// Block until the exec trap, learn the load address, then loop on user
    /// commands until quit. History lives in the editor only; nothing is
    /// written to disk.
    pub fn run(&mut self) -> Result<(), DebugError> {
        self.inferior.wait(None)?;
        self.initialise_load_address()?;

        loop {
            let command = self.get_next_command();
            if let DebuggerCommand::Quit = command {
                if self.running {
                    println!("Killing inferior (pid {})", self.inferior.pid());
                    self.inferior.kill()?;
                }
                return Ok(());
            }
            match self.dispatch(command) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => println!("{}", e),
            }
        }
    }

    fn get_next_command(&mut self) -> DebuggerCommand {
        loop {
            match self.readline.readline("unbug> ") {
                Err(ReadlineError::Interrupted) => {
                    // User pressed ctrl+c; keep the prompt.
                    println!("Type \"quit\" to exit");
                }
                Err(ReadlineError::Eof) => {
                    // ctrl+d is the equivalent of quit.
                    return DebuggerCommand::Quit;
                }
                Err(err) => {
                    panic!("Unexpected I/O error: {:?}", err);
                }
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.readline.add_history_entry(line.as_str());
                    let tokens: Vec<&str> = line.split_whitespace().collect();
                    match DebuggerCommand::from_tokens(&tokens) {
                        Ok(command) => return command,
                        Err(err) => println!("{}", err),
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, command: DebuggerCommand) -> Result<(), DebugError> {
        if !self.running {
            println!("The program is not being run.");
            return Ok(());
        }
        match command {
            DebuggerCommand::Continue => self.continue_execution(),
            DebuggerCommand::Break(addr) => self.set_breakpoint_at_address(addr),
            DebuggerCommand::RegisterDump => self.dump_registers(),
            DebuggerCommand::RegisterRead(name) => self.read_register(&name),
            DebuggerCommand::RegisterWrite(name, value) => self.write_register(&name, value),
            DebuggerCommand::MemoryRead(addr) => {
                let word = self.inferior.read_word(addr)?;
                println!("{:#x}", word);
                Ok(())
            }
            DebuggerCommand::MemoryWrite(addr, value) => {
                self.inferior.write_word(addr, value)?;
                Ok(())
            }
            DebuggerCommand::Step => self.step_in(),
            DebuggerCommand::Next => self.step_over(),
            DebuggerCommand::Finish => self.step_out(),
            DebuggerCommand::StepInstruction => {
                self.single_step_instruction_with_breakpoint_check()?;
                if self.running {
                    self.print_source_for_pc()?;
                }
                Ok(())
            }
            DebuggerCommand::Backtrace => self.print_backtrace(),
            DebuggerCommand::Quit => unreachable!("quit is handled by the REPL loop"),
        }
    }

    /// For PIE images, the base the loader picked: the first dash-delimited
    /// token of the first line of the maps pseudo-file. Fixed-address
    /// images keep offset zero.
    fn initialise_load_address(&mut self) -> Result<(), DebugError> {
        if !self.debug_data.is_position_independent() {
            return Ok(());
        }
        let maps = fs::read_to_string(format!("/proc/{}/maps", self.inferior.pid()))?;
        let base = maps
            .lines()
            .next()
            .and_then(|line| line.split('-').next())
            .ok_or(DebugError::LoadAddress)?;
        self.load_address =
            u64::from_str_radix(base, 16).map_err(|_| DebugError::LoadAddress)?;
        debug!("load address for {} is {:#x}", self.target, self.load_address);
        Ok(())
    }

    /// Runtime address to DWARF address.
    fn offset_load_address(&self, addr: u64) -> u64 {
        addr - self.load_address
    }

    /// DWARF address to runtime address.
    fn offset_dwarf_address(&self, addr: u64) -> u64 {
        addr + self.load_address
    }

    fn get_pc(&self) -> Result<u64, DebugError> {
        Ok(Reg::Rip.read(&self.inferior.regs()?))
    }

    fn get_offset_pc(&self) -> Result<u64, DebugError> {
        Ok(self.offset_load_address(self.get_pc()?))
    }

    fn set_pc(&self, pc: u64) -> Result<(), DebugError> {
        let mut regs = self.inferior.regs()?;
        Reg::Rip.write(&mut regs, pc);
        self.inferior.set_regs(regs)?;
        Ok(())
    }

    /// Install and enable a breakpoint without announcing it; shared by the
    /// user-facing path and the temporary breakpoints of step-over/out.
    fn install_breakpoint(&mut self, addr: u64) -> Result<(), DebugError> {
        let mut breakpoint = Breakpoint::new(addr);
        breakpoint.enable(&self.inferior)?;
        debug!("installed breakpoint at {:#x}", addr);
        self.breakpoints.insert(addr, breakpoint);
        Ok(())
    }

    /// Disable a breakpoint and drop it from the map. If the tracee is
    /// gone the map entry is still dropped.
    fn remove_breakpoint(&mut self, addr: u64) -> Result<(), DebugError> {
        if let Some(mut breakpoint) = self.breakpoints.remove(&addr) {
            if self.running && breakpoint.is_enabled() {
                breakpoint.disable(&self.inferior)?;
            }
            debug!("removed breakpoint at {:#x}", addr);
        }
        Ok(())
    }

    fn set_breakpoint_at_address(&mut self, addr: u64) -> Result<(), DebugError> {
        if self.breakpoints.contains_key(&addr) {
            println!("Breakpoint already set at address {:#x}", addr);
            return Ok(());
        }
        println!("Set breakpoint at address {:#x}", addr);
        self.install_breakpoint(addr)
    }

    /// Block until the tracee changes state and handle what stopped it.
    fn wait_for_signal(&mut self) -> Result<(), DebugError> {
        match self.inferior.wait(None)? {
            Status::Exited(exit_code) => {
                println!("Program exited (status {})", exit_code);
                self.running = false;
                Ok(())
            }
            Status::Signaled(signal) => {
                println!("Program terminated by signal {}", signal);
                self.running = false;
                Ok(())
            }
            Status::Stopped(_, _) => {
                let info = self.inferior.siginfo()?;
                match info.si_signo {
                    libc::SIGTRAP => self.handle_sigtrap(info),
                    libc::SIGSEGV => {
                        println!("Caught segfault, reason: {}", segv_reason(info.si_code));
                        Ok(())
                    }
                    signo => {
                        match Signal::try_from(signo) {
                            Ok(signal) => println!("Got signal {}", signal),
                            Err(_) => println!("Got signal {}", signo),
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    /// Breakpoint traps leave the PC one past the int3; rewind it so the
    /// original instruction is the next to execute, then show where we are.
    fn handle_sigtrap(&mut self, info: libc::siginfo_t) -> Result<(), DebugError> {
        match info.si_code {
            SI_KERNEL | TRAP_BRKPT => {
                let pc = self.get_pc()? - 1;
                self.set_pc(pc)?;
                println!("Hit breakpoint at {:#x}", pc);
                self.print_source_for_pc()
            }
            TRAP_TRACE => Ok(()),
            code => {
                println!("Unknown SIGTRAP code {}", code);
                Ok(())
            }
        }
    }

    /// The line entry covering the current DWARF-space PC.
    fn current_line_entry(&self) -> Result<Line, DebugError> {
        let pc = self.get_offset_pc()?;
        self.debug_data
            .line_entry_for_pc(pc)
            .cloned()
            .ok_or(DebugError::NoLineInfo(pc))
    }

    fn print_source_for_pc(&self) -> Result<(), DebugError> {
        let entry = self.current_line_entry()?;
        source::print_source(&entry.file, entry.number, SOURCE_CONTEXT_LINES)?;
        Ok(())
    }

    /// If the tracee sits on one of our enabled breakpoints, let the
    /// original instruction execute: lift the patch, step once, re-arm.
    fn step_over_breakpoint(&mut self) -> Result<(), DebugError> {
        let pc = self.get_pc()?;
        let armed = self
            .breakpoints
            .get(&pc)
            .map(|bp| bp.is_enabled())
            .unwrap_or(false);
        if !armed {
            return Ok(());
        }
        if let Some(bp) = self.breakpoints.get_mut(&pc) {
            bp.disable(&self.inferior)?;
        }
        self.inferior.single_step()?;
        self.wait_for_signal()?;
        if self.running {
            if let Some(bp) = self.breakpoints.get_mut(&pc) {
                bp.enable(&self.inferior)?;
            }
        }
        Ok(())
    }

    fn single_step_instruction(&mut self) -> Result<(), DebugError> {
        self.inferior.single_step()?;
        self.wait_for_signal()
    }

    fn single_step_instruction_with_breakpoint_check(&mut self) -> Result<(), DebugError> {
        let pc = self.get_pc()?;
        let armed = self
            .breakpoints
            .get(&pc)
            .map(|bp| bp.is_enabled())
            .unwrap_or(false);
        if armed {
            self.step_over_breakpoint()
        } else {
            self.single_step_instruction()
        }
    }

    fn continue_execution(&mut self) -> Result<(), DebugError> {
        self.step_over_breakpoint()?;
        if !self.running {
            return Ok(());
        }
        self.inferior.cont()?;
        self.wait_for_signal()
    }

    /// Step into the next source line: single-step until the line table
    /// says we are somewhere else, then show it.
    fn step_in(&mut self) -> Result<(), DebugError> {
        let start_line = self.current_line_entry()?.number;
        loop {
            self.single_step_instruction_with_breakpoint_check()?;
            if !self.running {
                return Ok(());
            }
            if self.current_line_entry()?.number != start_line {
                break;
            }
        }
        self.print_source_for_pc()
    }

    /// The saved return address of the current frame, at `[rbp + 8]` in a
    /// standard System V prologue.
    fn return_address(&self) -> Result<u64, DebugError> {
        let frame_pointer = Reg::Rbp.read(&self.inferior.regs()?);
        Ok(self.inferior.read_word(frame_pointer + 8)?)
    }

    /// Run until the current function returns, via a temporary breakpoint
    /// on the saved return address.
    fn step_out(&mut self) -> Result<(), DebugError> {
        let return_address = self.return_address()?;
        let mut temps = TempBreakpoints::new();
        temps.ensure(self, return_address)?;
        let result = self.continue_execution();
        let cleanup = temps.remove_all(self);
        result?;
        cleanup
    }

    /// Advance to the next source line without entering calls: breakpoint
    /// every other line of the current function plus the return address,
    /// continue, then drop whatever we installed.
    fn step_over(&mut self) -> Result<(), DebugError> {
        let mut temps = TempBreakpoints::new();
        let result = self.step_over_with_temps(&mut temps);
        let cleanup = temps.remove_all(self);
        result?;
        cleanup
    }

    fn step_over_with_temps(&mut self, temps: &mut TempBreakpoints) -> Result<(), DebugError> {
        let pc = self.get_offset_pc()?;
        let (low_pc, high_pc) = {
            let func = self
                .debug_data
                .function_containing(pc)
                .ok_or(DebugError::NoFunctionInfo(pc))?;
            (func.low_pc, func.high_pc)
        };
        let start_address = self
            .debug_data
            .line_entry_for_pc(pc)
            .ok_or(DebugError::NoLineInfo(pc))?
            .address;

        let line_addresses = self.debug_data.line_addresses_in_range(low_pc, high_pc);
        for addr in line_addresses {
            if addr != start_address {
                let runtime_addr = self.offset_dwarf_address(addr);
                temps.ensure(self, runtime_addr)?;
            }
        }
        let return_address = self.return_address()?;
        temps.ensure(self, return_address)?;

        self.continue_execution()
    }

    fn dump_registers(&self) -> Result<(), DebugError> {
        let regs = self.inferior.regs()?;
        for desc in registers::REGISTERS.iter() {
            println!("{:<8} {:#018x}", desc.name, desc.reg.read(&regs));
        }
        Ok(())
    }

    fn read_register(&self, name: &str) -> Result<(), DebugError> {
        let desc = registers::lookup(name)
            .ok_or_else(|| DebugError::UnknownRegister(name.to_string()))?;
        let value = desc.reg.read(&self.inferior.regs()?);
        println!("{}", value);
        Ok(())
    }

    fn write_register(&self, name: &str, value: u64) -> Result<(), DebugError> {
        let desc = registers::lookup(name)
            .ok_or_else(|| DebugError::UnknownRegister(name.to_string()))?;
        let mut regs = self.inferior.regs()?;
        desc.reg.write(&mut regs, value);
        self.inferior.set_regs(regs)?;
        Ok(())
    }

    /// Walk the saved-RBP chain, printing a frame per line until main (or
    /// until the debug info runs out).
    fn print_backtrace(&self) -> Result<(), DebugError> {
        let regs = self.inferior.regs()?;
        let mut pc = regs.rip;
        let mut frame_pointer = regs.rbp;

        loop {
            let dwarf_pc = self.offset_load_address(pc);
            let function = self.debug_data.function_name_for_pc(dwarf_pc);
            let line = self.debug_data.line_entry_for_pc(dwarf_pc);
            match (&function, &line) {
                (None, None) => println!("?? (no debug info for {:#x})", pc),
                (None, Some(line)) => println!("?? ({})", line),
                (Some(function), None) => println!("{} (source not found)", function),
                (Some(function), Some(line)) => println!("{} ({})", function, line),
            }

            match function {
                Some(name) if name == "main" || name.ends_with("::main") => break,
                Some(_) => {}
                None => break,
            }
            pc = self.inferior.read_word(frame_pointer + 8)?;
            frame_pointer = self.inferior.read_word(frame_pointer)?;
        }
        Ok(())
    }
}

fn segv_reason(code: i32) -> String {
    match code {
        SEGV_MAPERR => String::from("SEGV_MAPERR (address not mapped)"),
        SEGV_ACCERR => String::from("SEGV_ACCERR (invalid permissions)"),
        code => format!("code {}", code),
    }
}
