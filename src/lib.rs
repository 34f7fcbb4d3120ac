//! unbug: a small source-level debugger for Linux x86-64.
//!
//! The library exposes the layers the binary composes: a traced child
//! process ([`inferior`]), int3 breakpoints ([`breakpoint`]), a DWARF
//! facade ([`dwarf_data`]), and the engine plus REPL ([`debugger`]).

pub mod breakpoint;
pub mod debugger;
pub mod debugger_command;
pub mod dwarf_data;
pub mod gimli_wrapper;
pub mod inferior;
pub mod registers;
pub mod source;
pub mod utils;
