//! Parsing a tokenized REPL line into a debugger command.
//!
//! The first token is matched by prefix against the command list, first
//! match wins; subcommands under `register` and `memory` resolve the same
//! way. Wrong arity is an unknown command; a malformed hex argument gets
//! its own diagnostic.

use thiserror::Error;

use crate::utils::{is_prefix, parse_hex};

/// Canonical commands in resolution order; a tie between two commands with
/// a shared prefix goes to the earlier one (`s` is `step`, not `stepi`).
const COMMANDS: [&str; 10] = [
    "continue",
    "break",
    "register",
    "memory",
    "step",
    "next",
    "finish",
    "stepi",
    "backtrace",
    "quit",
];

const REGISTER_SUBCOMMANDS: [&str; 3] = ["dump", "read", "write"];
const MEMORY_SUBCOMMANDS: [&str; 2] = ["read", "write"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerCommand {
    Continue,
    Break(u64),
    RegisterDump,
    RegisterRead(String),
    RegisterWrite(String, u64),
    MemoryRead(u64),
    MemoryWrite(u64, u64),
    Step,
    Next,
    Finish,
    StepInstruction,
    Backtrace,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Bad hex value given")]
    BadHex,
    #[error("Unknown command")]
    Unknown,
}

fn resolve<'a>(token: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|candidate| is_prefix(token, candidate))
}

impl DebuggerCommand {
    pub fn from_tokens(tokens: &[&str]) -> Result<DebuggerCommand, ParseError> {
        let command = tokens.first().ok_or(ParseError::Unknown)?;
        match resolve(command, &COMMANDS) {
            Some("continue") => Ok(DebuggerCommand::Continue),
            Some("break") => match tokens {
                [_, addr] => parse_hex(addr)
                    .map(DebuggerCommand::Break)
                    .ok_or(ParseError::BadHex),
                _ => Err(ParseError::Unknown),
            },
            Some("register") => {
                let sub = tokens.get(1).ok_or(ParseError::Unknown)?;
                match resolve(sub, &REGISTER_SUBCOMMANDS) {
                    Some("dump") if tokens.len() == 2 => Ok(DebuggerCommand::RegisterDump),
                    Some("read") => match tokens {
                        [_, _, name] => Ok(DebuggerCommand::RegisterRead(name.to_string())),
                        _ => Err(ParseError::Unknown),
                    },
                    Some("write") => match tokens {
                        [_, _, name, value] => parse_hex(value)
                            .map(|value| DebuggerCommand::RegisterWrite(name.to_string(), value))
                            .ok_or(ParseError::BadHex),
                        _ => Err(ParseError::Unknown),
                    },
                    _ => Err(ParseError::Unknown),
                }
            }
            Some("memory") => {
                let sub = tokens.get(1).ok_or(ParseError::Unknown)?;
                match resolve(sub, &MEMORY_SUBCOMMANDS) {
                    Some("read") => match tokens {
                        [_, _, addr] => parse_hex(addr)
                            .map(DebuggerCommand::MemoryRead)
                            .ok_or(ParseError::BadHex),
                        _ => Err(ParseError::Unknown),
                    },
                    Some("write") => match tokens {
                        [_, _, addr, value] => match (parse_hex(addr), parse_hex(value)) {
                            (Some(addr), Some(value)) => {
                                Ok(DebuggerCommand::MemoryWrite(addr, value))
                            }
                            _ => Err(ParseError::BadHex),
                        },
                        _ => Err(ParseError::Unknown),
                    },
                    _ => Err(ParseError::Unknown),
                }
            }
            Some("step") => Ok(DebuggerCommand::Step),
            Some("next") => Ok(DebuggerCommand::Next),
            Some("finish") => Ok(DebuggerCommand::Finish),
            Some("stepi") => Ok(DebuggerCommand::StepInstruction),
            Some("backtrace") => Ok(DebuggerCommand::Backtrace),
            Some("quit") => Ok(DebuggerCommand::Quit),
            _ => Err(ParseError::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<DebuggerCommand, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        DebuggerCommand::from_tokens(&tokens)
    }

    #[test]
    fn single_letter_prefixes_resolve_in_declared_order() {
        assert_eq!(parse("c"), Ok(DebuggerCommand::Continue));
        assert_eq!(parse("b 0x400080"), Ok(DebuggerCommand::Break(0x400080)));
        assert_eq!(parse("n"), Ok(DebuggerCommand::Next));
        assert_eq!(parse("f"), Ok(DebuggerCommand::Finish));
        assert_eq!(parse("q"), Ok(DebuggerCommand::Quit));
    }

    #[test]
    fn step_wins_the_tie_with_stepi() {
        assert_eq!(parse("s"), Ok(DebuggerCommand::Step));
        assert_eq!(parse("st"), Ok(DebuggerCommand::Step));
        assert_eq!(parse("step"), Ok(DebuggerCommand::Step));
        assert_eq!(parse("stepi"), Ok(DebuggerCommand::StepInstruction));
    }

    #[test]
    fn break_wins_the_tie_with_backtrace() {
        assert_eq!(parse("b 0x1"), Ok(DebuggerCommand::Break(1)));
        assert_eq!(parse("ba"), Ok(DebuggerCommand::Backtrace));
        assert_eq!(parse("backtrace"), Ok(DebuggerCommand::Backtrace));
    }

    #[test]
    fn register_subcommands_resolve_by_prefix() {
        assert_eq!(parse("register dump"), Ok(DebuggerCommand::RegisterDump));
        assert_eq!(parse("r d"), Ok(DebuggerCommand::RegisterDump));
        assert_eq!(
            parse("r r rax"),
            Ok(DebuggerCommand::RegisterRead("rax".to_string()))
        );
        assert_eq!(
            parse("register write rax 0x2a"),
            Ok(DebuggerCommand::RegisterWrite("rax".to_string(), 42))
        );
    }

    #[test]
    fn memory_subcommands_resolve_by_prefix() {
        assert_eq!(
            parse("memory read 0x400080"),
            Ok(DebuggerCommand::MemoryRead(0x400080))
        );
        assert_eq!(
            parse("m w 0x400080 0xff"),
            Ok(DebuggerCommand::MemoryWrite(0x400080, 0xff))
        );
    }

    #[test]
    fn bad_hex_is_distinguished_from_unknown() {
        assert_eq!(parse("break 400080"), Err(ParseError::BadHex));
        assert_eq!(parse("break 0x"), Err(ParseError::BadHex));
        assert_eq!(parse("memory read 12"), Err(ParseError::BadHex));
        assert_eq!(parse("register write rax 2a"), Err(ParseError::BadHex));
        assert_eq!(ParseError::BadHex.to_string(), "Bad hex value given");
    }

    #[test]
    fn wrong_arity_and_junk_are_unknown() {
        assert_eq!(parse("break"), Err(ParseError::Unknown));
        assert_eq!(parse("break 0x1 0x2"), Err(ParseError::Unknown));
        assert_eq!(parse("register"), Err(ParseError::Unknown));
        assert_eq!(parse("register read"), Err(ParseError::Unknown));
        assert_eq!(parse("register dump extra"), Err(ParseError::Unknown));
        assert_eq!(parse("memory peek 0x1"), Err(ParseError::Unknown));
        assert_eq!(parse("flounder"), Err(ParseError::Unknown));
        assert_eq!(parse(""), Err(ParseError::Unknown));
        assert_eq!(ParseError::Unknown.to_string(), "Unknown command");
    }
}
