//! Debug-info facade: the only DWARF/ELF surface the engine consumes.
//!
//! All addresses here are in DWARF space (as the compiler emitted them);
//! the engine translates to and from runtime addresses with its load-address
//! offset.

use std::fmt;
use std::fs;

use addr2line::Context;
use object::{Object, ObjectKind};
use thiserror::Error;

use crate::gimli_wrapper;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not open target binary")]
    ErrorOpeningFile,
    #[error("bad debug info: {0}")]
    DwarfFormatError(#[from] gimli_wrapper::Error),
}

/// A subprogram with a resolvable code range; `[low_pc, high_pc)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub low_pc: u64,
    pub high_pc: u64,
}

/// One line-table row. Rows with `end_sequence` set carry no source
/// position; they mark the first address past a run of contiguous entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub file: String,
    pub number: u64,
    pub address: u64,
    pub end_sequence: bool,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.number)
    }
}

/// One compilation unit: its subprograms and its address-sorted line table.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub name: String,
    pub functions: Vec<Function>,
    pub lines: Vec<Line>,
}

pub struct DwarfData {
    files: Vec<File>,
    addr2line: Context<gimli_wrapper::Reader>,
    kind: ObjectKind,
}

impl DwarfData {
    /// Map the binary, parse its DWARF, and build the lookup tables. The
    /// mapping is dropped before returning; everything the queries need is
    /// owned.
    pub fn from_file(path: &str) -> Result<DwarfData, Error> {
        let file = fs::File::open(path).or(Err(Error::ErrorOpeningFile))?;
        let mmap = unsafe { memmap::Mmap::map(&file).or(Err(Error::ErrorOpeningFile))? };
        let object = object::File::parse(&*mmap)
            .map_err(|e| gimli_wrapper::Error::ObjectError(e.to_string()))?;
        let kind = object.kind();
        let dwarf = gimli_wrapper::load_dwarf(&object)?;
        let files = gimli_wrapper::load_file(&dwarf)?;
        let addr2line =
            Context::from_dwarf(dwarf).map_err(gimli_wrapper::Error::DwarfError)?;
        Ok(DwarfData {
            files,
            addr2line,
            kind,
        })
    }

    /// Whether the image is position-independent (ET_DYN), in which case a
    /// nonzero load address applies at runtime.
    pub fn is_position_independent(&self) -> bool {
        self.kind == ObjectKind::Dynamic
    }

    /// The subprogram whose code range contains `pc`.
    pub fn function_containing(&self, pc: u64) -> Option<&Function> {
        function_containing_pc(&self.files, pc)
    }

    /// The line-table entry covering `pc`, i.e. the nearest entry at or
    /// below it within the same sequence.
    pub fn line_entry_for_pc(&self, pc: u64) -> Option<&Line> {
        line_entry_covering(&self.files, pc)
    }

    /// Addresses of every real line entry in `[low, high)`, sorted and
    /// deduplicated. This is the work list for stepping over a source line.
    pub fn line_addresses_in_range(&self, low: u64, high: u64) -> Vec<u64> {
        line_addresses_between(&self.files, low, high)
    }

    /// Symbolicated name of the function containing `pc`, if any.
    pub fn function_name_for_pc(&self, pc: u64) -> Option<String> {
        let frame = self.addr2line.find_frames(pc).ok()?.next().ok()??;
        Some(frame.function?.raw_name().ok()?.to_string())
    }
}

impl fmt::Debug for DwarfData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DwarfData {{ files: {:?} }}", self.files)
    }
}

fn function_containing_pc(files: &[File], pc: u64) -> Option<&Function> {
    files.iter().find_map(|file| {
        file.functions
            .iter()
            .find(|func| func.low_pc <= pc && pc < func.high_pc)
    })
}

fn line_entry_covering(files: &[File], pc: u64) -> Option<&Line> {
    let mut best: Option<&Line> = None;
    for file in files.iter() {
        // Last entry at or below pc; an end marker there means pc falls in
        // the gap after a sequence.
        let idx = file.lines.partition_point(|line| line.address <= pc);
        if idx == 0 {
            continue;
        }
        let candidate = &file.lines[idx - 1];
        if candidate.end_sequence {
            continue;
        }
        if best.map_or(true, |b| candidate.address > b.address) {
            best = Some(candidate);
        }
    }
    best
}

fn line_addresses_between(files: &[File], low: u64, high: u64) -> Vec<u64> {
    let mut addrs: Vec<u64> = files
        .iter()
        .flat_map(|file| file.lines.iter())
        .filter(|line| !line.end_sequence && low <= line.address && line.address < high)
        .map(|line| line.address)
        .collect();
    addrs.sort_unstable();
    addrs.dedup();
    addrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(address: u64, number: u64) -> Line {
        Line {
            file: String::from("demo.c"),
            number,
            address,
            end_sequence: false,
        }
    }

    fn end_marker(address: u64) -> Line {
        Line {
            file: String::new(),
            number: 0,
            address,
            end_sequence: true,
        }
    }

    fn demo_files() -> Vec<File> {
        vec![File {
            name: String::from("demo.c"),
            functions: vec![
                Function {
                    name: String::from("helper"),
                    low_pc: 0x1130,
                    high_pc: 0x1149,
                },
                Function {
                    name: String::from("main"),
                    low_pc: 0x1149,
                    high_pc: 0x1180,
                },
            ],
            lines: vec![
                entry(0x1130, 3),
                entry(0x1138, 4),
                entry(0x1149, 8),
                entry(0x1151, 9),
                entry(0x1160, 10),
                entry(0x1170, 11),
                end_marker(0x1180),
            ],
        }]
    }

    #[test]
    fn function_bounds_are_half_open() {
        let files = demo_files();
        assert_eq!(function_containing_pc(&files, 0x1130).unwrap().name, "helper");
        assert_eq!(function_containing_pc(&files, 0x1148).unwrap().name, "helper");
        assert_eq!(function_containing_pc(&files, 0x1149).unwrap().name, "main");
        assert_eq!(function_containing_pc(&files, 0x117f).unwrap().name, "main");
        assert!(function_containing_pc(&files, 0x1180).is_none());
        assert!(function_containing_pc(&files, 0x100).is_none());
    }

    #[test]
    fn line_entry_covers_up_to_the_next_entry() {
        let files = demo_files();
        assert_eq!(line_entry_covering(&files, 0x1149).unwrap().number, 8);
        // Mid-entry addresses resolve to the entry below them.
        assert_eq!(line_entry_covering(&files, 0x1150).unwrap().number, 8);
        assert_eq!(line_entry_covering(&files, 0x1151).unwrap().number, 9);
        assert_eq!(line_entry_covering(&files, 0x117f).unwrap().number, 11);
    }

    #[test]
    fn line_entry_respects_sequence_boundaries() {
        let files = demo_files();
        // Before the first entry and past the end marker there is no line.
        assert!(line_entry_covering(&files, 0x1000).is_none());
        assert!(line_entry_covering(&files, 0x1180).is_none());
        assert!(line_entry_covering(&files, 0x2000).is_none());
    }

    #[test]
    fn sequence_start_wins_over_a_marker_at_the_same_address() {
        let mut files = demo_files();
        files[0].lines.push(entry(0x1180, 20));
        files[0].lines.push(end_marker(0x11a0));
        files[0]
            .lines
            .sort_by_key(|line| (line.address, !line.end_sequence));
        assert_eq!(line_entry_covering(&files, 0x1180).unwrap().number, 20);
        assert_eq!(line_entry_covering(&files, 0x1190).unwrap().number, 20);
        assert!(line_entry_covering(&files, 0x11a0).is_none());
    }

    #[test]
    fn in_range_addresses_exclude_markers_and_out_of_range_entries() {
        let files = demo_files();
        let addrs = line_addresses_between(&files, 0x1149, 0x1180);
        assert_eq!(addrs, vec![0x1149, 0x1151, 0x1160, 0x1170]);
        assert!(line_addresses_between(&files, 0x2000, 0x3000).is_empty());
    }
}
