//! Statescript execution engine
//!
//! This crate executes the bytecode described by `statescript-core`:
//! - **Dispatch**: the expression evaluator and its closed opcode set
//!   (`interp`, `opcode`, `cast` modules)
//! - **Calling convention**: frames, argument packing, out-parameter
//!   copy-back and native dispatch (`frame`, `call`, `native` modules)
//! - **State machine**: per-instance script states, transitions, labels
//!   and the state-code pump (`state` module)
//! - **Safety rails**: recursion and iteration ceilings, diagnostics
//!   for recoverable script mistakes, fatal errors for malformed code
//!   (`vm`, `error` modules)
//! - **Assembly**: a small bytecode writer used by tests and hosts that
//!   generate code at runtime (`writer` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use statescript_core::{ClassBuilder, FunctionBuilder, Name};
//! use statescript_engine::{ScriptValue, Vm};
//!
//! let class = ClassBuilder::new(Name::new("Door"))
//!     .var(Name::new("OpenCount"), PropKind::Int)
//!     .function(trigger_handler) // FunctionBuilder output
//!     .build();
//!
//! let mut vm = Vm::new();
//! let id = vm.register_class(class)?;
//! let door = vm.create_instance(id, Name::new("FrontDoor")).unwrap();
//! vm.call_event(door, Name::new("Trigger"), &[ScriptValue::Int(1)])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod call;
mod cast;
pub mod error;
pub mod frame;
mod interp;
pub mod native;
pub mod opcode;
pub mod place;
pub mod state;
pub mod vm;
pub mod writer;

pub use call::{EventOutcome, ScriptValue};
pub use error::{ExecResult, FatalError};
pub use frame::{Frame, NodeRef};
pub use native::{NativeError, NativeFn, NativeTable};
pub use opcode::{
    extended_native_index, Conversion, Opcode, CASE_DEFAULT, EXTENDED_NATIVE_FIRST,
    EXTENDED_NATIVE_LAST, MAX_NATIVES, NATIVE_FIRST,
};
pub use place::{Place, StoreRoot, ValuePlace};
pub use state::GotoOutcome;
pub use vm::{LocalOnly, ReplicationHook, Vm, VmOptions};
pub use writer::{BytecodeWriter, Fixup};
