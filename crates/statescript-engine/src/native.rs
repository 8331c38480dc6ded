//! Native dispatch table
//!
//! Opcode bytes `0x70..=0xFF` call straight into this table; the
//! extended-prefix bytes `0x60..=0x6F` combine with their follower into a
//! 12-bit index, so the table holds [`MAX_NATIVES`] slots. Dispatch is a
//! direct indexed call into a Vec, no hash lookup at runtime.
//!
//! Registration is open to the host. Claiming an occupied slot is not an
//! error: the newest handler wins and the collision is recorded so the
//! host can assert on it after setup. Unclaimed slots fall through to a
//! stub in the interpreter that drains the argument list and reports a
//! critical diagnostic, keeping the byte stream in sync.

use thiserror::Error;

use crate::error::ExecResult;
use crate::frame::Frame;
use crate::opcode::MAX_NATIVES;
use crate::vm::Vm;

/// A registered native handler.
///
/// The handler owns its argument list: it evaluates arguments off the
/// caller's frame (through [`Vm::eval`]) until it consumes the terminator
/// with [`Vm::consume_end_parms`], then writes its result into the sink.
pub type NativeFn = fn(&mut Vm, &mut Frame, Option<&mut [u8]>) -> ExecResult<()>;

/// Native registration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NativeError {
    /// Index outside the 12-bit dispatch space.
    #[error("native index {0} out of range")]
    IndexOutOfRange(u16),
}

/// The engine-side native dispatch table.
pub struct NativeTable {
    slots: Vec<Option<NativeFn>>,
    duplicate: Option<u16>,
    registered: usize,
}

impl std::fmt::Debug for NativeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTable")
            .field("registered", &self.registered)
            .field("duplicate", &self.duplicate)
            .finish()
    }
}

impl Default for NativeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeTable {
    /// Create a table with every slot unclaimed.
    pub fn new() -> Self {
        NativeTable {
            slots: vec![None; MAX_NATIVES],
            duplicate: None,
            registered: 0,
        }
    }

    /// Claim `index` for `handler`. A second claim on the same slot
    /// replaces the handler and records the collision.
    pub fn register(&mut self, index: u16, handler: NativeFn) -> Result<(), NativeError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(NativeError::IndexOutOfRange(index))?;
        match slot {
            Some(_) => {
                if self.duplicate.is_none() {
                    self.duplicate = Some(index);
                }
            }
            None => self.registered += 1,
        }
        *slot = Some(handler);
        Ok(())
    }

    /// The handler claimed at `index`, if any.
    pub fn get(&self, index: u16) -> Option<NativeFn> {
        self.slots.get(index as usize).copied().flatten()
    }

    /// First slot that was claimed twice, if any. Hosts check this after
    /// wiring their natives.
    pub fn duplicate(&self) -> Option<u16> {
        self.duplicate
    }

    /// Number of claimed slots.
    pub fn registered(&self) -> usize {
        self.registered
    }
}
