//! The x86-64 register file as exposed through `PTRACE_GETREGS`.
//!
//! The descriptor table mirrors the layout of the kernel's
//! `user_regs_struct`; dump output and name lookup both follow its declared
//! order.

use libc::user_regs_struct;

use crate::utils::is_prefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    R15,
    R14,
    R13,
    R12,
    Rbp,
    Rbx,
    R11,
    R10,
    R9,
    R8,
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    OrigRax,
    Rip,
    Cs,
    Eflags,
    Rsp,
    Ss,
    FsBase,
    GsBase,
    Ds,
    Es,
    Fs,
    Gs,
}

/// One row of the register descriptor table: the register, its DWARF
/// register number (-1 where DWARF assigns none), and the user-visible name.
pub struct RegDescriptor {
    pub reg: Reg,
    pub dwarf_r: i32,
    pub name: &'static str,
}

pub const REGISTER_COUNT: usize = 27;

pub const REGISTERS: [RegDescriptor; REGISTER_COUNT] = [
    RegDescriptor { reg: Reg::R15, dwarf_r: 15, name: "r15" },
    RegDescriptor { reg: Reg::R14, dwarf_r: 14, name: "r14" },
    RegDescriptor { reg: Reg::R13, dwarf_r: 13, name: "r13" },
    RegDescriptor { reg: Reg::R12, dwarf_r: 12, name: "r12" },
    RegDescriptor { reg: Reg::Rbp, dwarf_r: 6, name: "rbp" },
    RegDescriptor { reg: Reg::Rbx, dwarf_r: 3, name: "rbx" },
    RegDescriptor { reg: Reg::R11, dwarf_r: 11, name: "r11" },
    RegDescriptor { reg: Reg::R10, dwarf_r: 10, name: "r10" },
    RegDescriptor { reg: Reg::R9, dwarf_r: 9, name: "r9" },
    RegDescriptor { reg: Reg::R8, dwarf_r: 8, name: "r8" },
    RegDescriptor { reg: Reg::Rax, dwarf_r: 0, name: "rax" },
    RegDescriptor { reg: Reg::Rcx, dwarf_r: 2, name: "rcx" },
    RegDescriptor { reg: Reg::Rdx, dwarf_r: 1, name: "rdx" },
    RegDescriptor { reg: Reg::Rsi, dwarf_r: 4, name: "rsi" },
    RegDescriptor { reg: Reg::Rdi, dwarf_r: 5, name: "rdi" },
    RegDescriptor { reg: Reg::OrigRax, dwarf_r: -1, name: "orig_rax" },
    RegDescriptor { reg: Reg::Rip, dwarf_r: -1, name: "rip" },
    RegDescriptor { reg: Reg::Cs, dwarf_r: 51, name: "cs" },
    RegDescriptor { reg: Reg::Eflags, dwarf_r: 49, name: "eflags" },
    RegDescriptor { reg: Reg::Rsp, dwarf_r: 7, name: "rsp" },
    RegDescriptor { reg: Reg::Ss, dwarf_r: 52, name: "ss" },
    RegDescriptor { reg: Reg::FsBase, dwarf_r: 58, name: "fs_base" },
    RegDescriptor { reg: Reg::GsBase, dwarf_r: 59, name: "gs_base" },
    RegDescriptor { reg: Reg::Ds, dwarf_r: 53, name: "ds" },
    RegDescriptor { reg: Reg::Es, dwarf_r: 50, name: "es" },
    RegDescriptor { reg: Reg::Fs, dwarf_r: 54, name: "fs" },
    RegDescriptor { reg: Reg::Gs, dwarf_r: 55, name: "gs" },
];

impl Reg {
    /// Read this register out of a fetched register block.
    pub fn read(self, regs: &user_regs_struct) -> u64 {
        match self {
            Reg::R15 => regs.r15,
            Reg::R14 => regs.r14,
            Reg::R13 => regs.r13,
            Reg::R12 => regs.r12,
            Reg::Rbp => regs.rbp,
            Reg::Rbx => regs.rbx,
            Reg::R11 => regs.r11,
            Reg::R10 => regs.r10,
            Reg::R9 => regs.r9,
            Reg::R8 => regs.r8,
            Reg::Rax => regs.rax,
            Reg::Rcx => regs.rcx,
            Reg::Rdx => regs.rdx,
            Reg::Rsi => regs.rsi,
            Reg::Rdi => regs.rdi,
            Reg::OrigRax => regs.orig_rax,
            Reg::Rip => regs.rip,
            Reg::Cs => regs.cs,
            Reg::Eflags => regs.eflags,
            Reg::Rsp => regs.rsp,
            Reg::Ss => regs.ss,
            Reg::FsBase => regs.fs_base,
            Reg::GsBase => regs.gs_base,
            Reg::Ds => regs.ds,
            Reg::Es => regs.es,
            Reg::Fs => regs.fs,
            Reg::Gs => regs.gs,
        }
    }

    /// Write this register into a register block; the block still has to be
    /// pushed back to the tracee with a set-regs call.
    pub fn write(self, regs: &mut user_regs_struct, value: u64) {
        match self {
            Reg::R15 => regs.r15 = value,
            Reg::R14 => regs.r14 = value,
            Reg::R13 => regs.r13 = value,
            Reg::R12 => regs.r12 = value,
            Reg::Rbp => regs.rbp = value,
            Reg::Rbx => regs.rbx = value,
            Reg::R11 => regs.r11 = value,
            Reg::R10 => regs.r10 = value,
            Reg::R9 => regs.r9 = value,
            Reg::R8 => regs.r8 = value,
            Reg::Rax => regs.rax = value,
            Reg::Rcx => regs.rcx = value,
            Reg::Rdx => regs.rdx = value,
            Reg::Rsi => regs.rsi = value,
            Reg::Rdi => regs.rdi = value,
            Reg::OrigRax => regs.orig_rax = value,
            Reg::Rip => regs.rip = value,
            Reg::Cs => regs.cs = value,
            Reg::Eflags => regs.eflags = value,
            Reg::Rsp => regs.rsp = value,
            Reg::Ss => regs.ss = value,
            Reg::FsBase => regs.fs_base = value,
            Reg::GsBase => regs.gs_base = value,
            Reg::Ds => regs.ds = value,
            Reg::Es => regs.es = value,
            Reg::Fs => regs.fs = value,
            Reg::Gs => regs.gs = value,
        }
    }
}

/// Resolve a register by case-sensitive prefix match against the canonical
/// names, ties broken by table order.
pub fn lookup(name: &str) -> Option<&'static RegDescriptor> {
    if name.is_empty() {
        return None;
    }
    REGISTERS.iter().find(|desc| is_prefix(name, desc.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_user_regs_struct() {
        assert_eq!(REGISTERS.len(), REGISTER_COUNT);
        assert_eq!(REGISTERS[0].name, "r15");
        assert_eq!(REGISTERS[REGISTER_COUNT - 1].name, "gs");
    }

    #[test]
    fn lookup_exact_names() {
        let rax = lookup("rax").expect("rax is canonical");
        assert_eq!(rax.reg, Reg::Rax);
        assert_eq!(rax.dwarf_r, 0);
        assert_eq!(lookup("rip").unwrap().reg, Reg::Rip);
        assert_eq!(lookup("fs_base").unwrap().reg, Reg::FsBase);
    }

    #[test]
    fn lookup_by_prefix_breaks_ties_in_table_order() {
        // "r" prefixes many registers; r15 is declared first.
        assert_eq!(lookup("r").unwrap().reg, Reg::R15);
        assert_eq!(lookup("fs_b").unwrap().reg, Reg::FsBase);
        assert_eq!(lookup("e").unwrap().reg, Reg::Eflags);
        // "fs" matches fs_base before fs.
        assert_eq!(lookup("fs").unwrap().reg, Reg::FsBase);
    }

    #[test]
    fn lookup_rejects_unknown_and_empty() {
        assert!(lookup("xyzzy").is_none());
        assert!(lookup("RAX").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn read_write_round_trip() {
        let mut regs: user_regs_struct = unsafe { std::mem::zeroed() };
        Reg::Rax.write(&mut regs, 42);
        Reg::Rip.write(&mut regs, 0x5555_5555_5149);
        assert_eq!(Reg::Rax.read(&regs), 42);
        assert_eq!(Reg::Rip.read(&regs), 0x5555_5555_5149);
        assert_eq!(Reg::Rbx.read(&regs), 0);
    }
}
