//! Statescript object model
//!
//! This crate provides the data the engine executes against:
//! - Interned names
//! - Property, class, function and state descriptors
//! - Script instances and their state records
//! - The script heap (strings, dynamic arrays) and descriptor-driven
//!   deep copy / teardown
//! - The runtime diagnostics boundary
//!
//! Descriptors are immutable after build and shared behind `Arc`; all
//! mutable storage (instances, heap) is owned by the engine crate's `Vm`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod class;
pub mod diag;
pub mod heap;
pub mod name;
pub mod object;
pub mod property;
pub mod storage;

pub use builder::{probe_bit, ClassBuilder, FunctionBuilder, StateBuilder, StructBuilder, PROBE_NAMES};
pub use class::{
    func_flags, state_flags, ClassDef, ClassId, ClassRegistry, FunctionDef, RegistryError,
    ScriptScope, StateDef, MAX_FUNC_PARMS,
};
pub use diag::{CollectSink, DiagnosticSink, ScriptDiagnostic, Severity, TracingSink};
pub use heap::{DynArray, HeapValue, ScriptHeap};
pub use name::Name;
pub use object::{instance_flags, Instance, InstanceTable, ObjHandle, StateRecord};
pub use property::{flags, PropKind, PropertyDef, StructDef};
