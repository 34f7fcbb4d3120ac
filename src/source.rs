//! Printing a window of source text around the line the tracee stopped on.

use std::fs;
use std::io::{self, BufRead, BufReader};

/// Print `n_context` lines either side of `line` from `path`, marking the
/// current line with `>`. Line numbers are 1-based.
pub fn print_source(path: &str, line: u64, n_context: u64) -> io::Result<()> {
    let file = fs::File::open(path)?;
    let start = line.saturating_sub(n_context).max(1);
    let end = line + n_context;
    for (idx, text) in BufReader::new(file).lines().enumerate() {
        let number = idx as u64 + 1;
        if number < start {
            continue;
        }
        if number > end {
            break;
        }
        let marker = if number == line { '>' } else { ' ' };
        println!("{} {}", marker, text?);
    }
    Ok(())
}
