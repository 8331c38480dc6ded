//! Engine errors
//!
//! Two tiers. Recoverable script mistakes (bad indices, null contexts,
//! missing labels) never appear here: they are reported through the
//! diagnostics sink at the point of detection and execution continues.
//! `FatalError` is the other tier: malformed bytecode and tripped safety
//! ceilings, which unwind the whole dispatch via `Result`.

use statescript_core::Name;
use thiserror::Error;

/// Unrecoverable execution failure. Terminates the current top-level
/// dispatch; engine-owned storage stays consistent, shared descriptors are
/// never mutated.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Opcode byte below the native range with no decoding.
    #[error("unknown opcode 0x{0:02X} in '{1}' at offset {2}")]
    UnknownOpcode(u8, Name, u32),

    /// Conversion code with no decoding.
    #[error("unknown conversion 0x{0:02X} in '{1}' at offset {2}")]
    UnknownConversion(u8, Name, u32),

    /// The cursor ran past the end of the descriptor's code.
    #[error("bytecode ended unexpectedly in '{0}' at offset {1}")]
    UnexpectedEnd(Name, u32),

    /// An operand referenced a descriptor slot that does not exist.
    #[error("bad operand in '{0}' at offset {1}: {2}")]
    BadOperand(Name, u32, String),

    /// A call target could not be bound.
    #[error("missing function '{0}'")]
    MissingFunction(Name),

    /// A class id immediate named no registered class.
    #[error("unregistered class id {0}")]
    BadClassId(u16),

    /// A struct id immediate named no registered struct.
    #[error("unregistered struct id {0}")]
    BadStructId(u16),

    /// The per-dispatch recursion ceiling was exceeded.
    #[error("script recursion exceeded {0} frames")]
    RecursionLimit(u32),

    /// The runaway-loop counter tripped with escalation configured.
    #[error("runaway script loop after {0} iterations")]
    RunawayLoop(u32),

    /// A critical diagnostic with escalation configured.
    #[error("critical script error: {0}")]
    Critical(String),
}

/// Engine-wide result alias.
pub type ExecResult<T> = Result<T, FatalError>;
