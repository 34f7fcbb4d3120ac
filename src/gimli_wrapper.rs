//! DWARF extraction: loads the debug sections of an object file into gimli
//! and flattens what the engine needs — subprogram PC ranges and per-unit
//! line tables.

use std::borrow::Cow;
use std::path::PathBuf;
use std::rc::Rc;

use gimli::Reader as _;
use object::{Object, ObjectSection};
use thiserror::Error;

use crate::dwarf_data::{File, Function, Line};

/// Reader over reference-counted section data, so the tables and the
/// addr2line context stay valid after the file mapping is dropped.
pub type Reader = gimli::EndianRcSlice<gimli::RunTimeEndian>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not parse object file: {0}")]
    ObjectError(String),
    #[error("could not parse debug info: {0}")]
    DwarfError(#[from] gimli::Error),
}

/// Load every DWARF section of `object` into gimli readers. Missing
/// sections become empty slices, which gimli treats as absent.
pub fn load_dwarf(object: &object::File) -> Result<gimli::Dwarf<Reader>, Error> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };
    let load_section = |id: gimli::SectionId| -> Result<Reader, gimli::Error> {
        let data = match object.section_by_name(id.name()) {
            Some(section) => section
                .uncompressed_data()
                .unwrap_or(Cow::Borrowed(&[][..])),
            None => Cow::Borrowed(&[][..]),
        };
        Ok(gimli::EndianRcSlice::new(Rc::from(&*data), endian))
    };
    Ok(gimli::Dwarf::load(load_section)?)
}

/// Walk every compilation unit and collect its subprograms and line table.
pub fn load_file(dwarf: &gimli::Dwarf<Reader>) -> Result<Vec<File>, Error> {
    let mut files = Vec::new();
    let mut iter = dwarf.units();
    while let Some(header) = iter.next()? {
        let unit = dwarf.unit(header)?;
        let name = match &unit.name {
            Some(name) => name.to_string_lossy()?.into_owned(),
            None => String::from("<unknown>"),
        };
        files.push(File {
            name,
            functions: load_functions(dwarf, &unit)?,
            lines: load_line_table(dwarf, &unit)?,
        });
    }
    Ok(files)
}

fn load_functions(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
) -> Result<Vec<Function>, Error> {
    let mut functions = Vec::new();
    let mut entries = unit.entries();
    while let Some((_, entry)) = entries.next_dfs()? {
        if entry.tag() != gimli::DW_TAG_subprogram {
            continue;
        }
        // Declarations and fully inlined instances carry no code range.
        let low_pc = match entry.attr_value(gimli::DW_AT_low_pc)? {
            Some(gimli::AttributeValue::Addr(addr)) => addr,
            Some(gimli::AttributeValue::DebugAddrIndex(index)) => dwarf.address(unit, index)?,
            _ => continue,
        };
        let high_pc = match entry.attr_value(gimli::DW_AT_high_pc)? {
            Some(gimli::AttributeValue::Addr(addr)) => addr,
            Some(attr) => match attr.udata_value() {
                Some(size) => low_pc + size,
                None => continue,
            },
            None => continue,
        };
        let name = match entry.attr_value(gimli::DW_AT_name)? {
            Some(value) => dwarf.attr_string(unit, value)?.to_string_lossy()?.into_owned(),
            None => String::from("<unknown>"),
        };
        functions.push(Function {
            name,
            low_pc,
            high_pc,
        });
    }
    Ok(functions)
}

fn load_line_table(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
) -> Result<Vec<Line>, Error> {
    let mut lines = Vec::new();
    let program = match unit.line_program.clone() {
        Some(program) => program,
        None => return Ok(lines),
    };
    let comp_dir = match &unit.comp_dir {
        Some(dir) => Some(dir.to_string_lossy()?.into_owned()),
        None => None,
    };
    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        if row.end_sequence() {
            // Keep the marker: addresses past it are not covered by the
            // preceding entry.
            lines.push(Line {
                file: String::new(),
                number: 0,
                address: row.address(),
                end_sequence: true,
            });
            continue;
        }
        let number = match row.line() {
            Some(number) => number.get(),
            None => continue,
        };
        let file = match row.file(header) {
            Some(file_entry) => {
                render_file_path(dwarf, unit, header, file_entry, comp_dir.as_deref())?
            }
            None => String::new(),
        };
        lines.push(Line {
            file,
            number,
            address: row.address(),
            end_sequence: false,
        });
    }
    // Sequences arrive in program order, not address order. Sort, keeping
    // end markers ahead of a real entry at the same address so that a
    // covering-entry search at a sequence boundary picks the real entry.
    lines.sort_by_key(|line| (line.address, !line.end_sequence));
    Ok(lines)
}

fn render_file_path(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    header: &gimli::LineProgramHeader<Reader>,
    file: &gimli::FileEntry<Reader>,
    comp_dir: Option<&str>,
) -> Result<String, Error> {
    let mut path = PathBuf::new();
    if let Some(dir) = comp_dir {
        path.push(dir);
    }
    // An absolute directory or file name replaces what came before it.
    if file.directory_index() != 0 {
        if let Some(dir) = file.directory(header) {
            path.push(dwarf.attr_string(unit, dir)?.to_string_lossy()?.as_ref());
        }
    }
    path.push(
        dwarf
            .attr_string(unit, file.path_name())?
            .to_string_lossy()?
            .as_ref(),
    );
    Ok(path.to_string_lossy().into_owned())
}
