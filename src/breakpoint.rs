//! Software breakpoints: a one-byte `int3` patched over the low byte of the
//! word at the target address, with the original byte saved for restore.

use crate::inferior::Inferior;
use crate::utils::{bottom_byte, set_bottom_byte};

/// x86 `int $3`, the single-byte trap instruction.
pub const INT3: u8 = 0xcc;

/// A breakpoint at one virtual address in the tracee. Constructed disabled;
/// while enabled, the byte at `addr` is `0xcc` and `saved_byte` holds the
/// pre-patch value.
pub struct Breakpoint {
    addr: u64,
    enabled: bool,
    saved_byte: u8,
}

impl Breakpoint {
    pub fn new(addr: u64) -> Breakpoint {
        Breakpoint {
            addr,
            enabled: false,
            saved_byte: 0,
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The original low byte at `addr`, valid while enabled.
    pub fn saved_byte(&self) -> u8 {
        self.saved_byte
    }

    /// Save the low byte of the word at `addr` and replace it with `int3`.
    /// Only the bottom byte of the word is touched, so the surrounding
    /// instruction bytes survive enable/disable cycles.
    pub fn enable(&mut self, inferior: &Inferior) -> Result<(), nix::Error> {
        let word = inferior.read_word(self.addr)?;
        self.saved_byte = bottom_byte(word);
        inferior.write_word(self.addr, set_bottom_byte(word, INT3))?;
        self.enabled = true;
        Ok(())
    }

    /// Restore the saved byte into the word at `addr`.
    pub fn disable(&mut self, inferior: &Inferior) -> Result<(), nix::Error> {
        let word = inferior.read_word(self.addr)?;
        inferior.write_word(self.addr, set_bottom_byte(word, self.saved_byte))?;
        self.enabled = false;
        Ok(())
    }
}
