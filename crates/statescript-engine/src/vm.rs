//! The virtual machine
//!
//! [`Vm`] owns everything mutable: live instances, the script heap,
//! hydrated per-class default blocks, the native dispatch table and the
//! safety counters. Descriptors stay shared and immutable behind `Arc`;
//! execution never writes through them.
//!
//! Execution entry points live in sibling modules and hang off `Vm` in
//! their own impl blocks: external events in `call`, state transitions
//! and the state-code pump in `state`, operand evaluation in `interp`.

use std::sync::Arc;

use statescript_core::{
    storage, ClassId, ClassRegistry, DiagnosticSink, Instance, InstanceTable, Name, ObjHandle,
    PropKind, PropertyDef, RegistryError, ScriptDiagnostic, ScriptHeap, Severity, StateRecord,
    StructDef, TracingSink,
};
use tracing::debug;

use crate::error::{ExecResult, FatalError};
use crate::frame::Frame;
use crate::native::NativeTable;

/// Decides whether a routed call leaves the machine.
///
/// Every call to a function marked `NET` is offered here before the local
/// body runs. Returning `true` consumes the call: the arguments are still
/// evaluated, the local body is skipped.
pub trait ReplicationHook: Send + Sync {
    /// Offered once per routed call.
    fn intercept(&self, instance: ObjHandle, instance_name: Name, function: Name) -> bool;
}

/// Keeps every call local.
#[derive(Debug, Default)]
pub struct LocalOnly;

impl ReplicationHook for LocalOnly {
    fn intercept(&self, _instance: ObjHandle, _instance_name: Name, _function: Name) -> bool {
        false
    }
}

/// Tunable execution limits and policies.
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Master switch. When off, external events are rejected before any
    /// argument is evaluated.
    pub scripting_enabled: bool,
    /// Nested script frames above which a dispatch fails.
    pub max_recursion: u32,
    /// Jumps inside one dispatch before the runaway diagnostic fires.
    pub runaway_limit: u32,
    /// Fail the dispatch when the runaway counter trips, instead of
    /// diagnosing and resetting it.
    pub fatal_runaway: bool,
    /// Fail the dispatch on critical diagnostics (failed assertions,
    /// unclaimed native slots).
    pub fatal_critical: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            scripting_enabled: true,
            max_recursion: 250,
            runaway_limit: 1_000_000,
            fatal_runaway: false,
            fatal_critical: false,
        }
    }
}

/// A script execution machine.
pub struct Vm {
    /// Registered classes, by id and name.
    pub(crate) classes: ClassRegistry,
    /// Registered struct layouts, indexed by the ids bytecode carries.
    pub(crate) structs: Vec<Arc<StructDef>>,
    /// Live instances.
    pub(crate) objects: InstanceTable,
    /// Strings and dynamic arrays owned by script values.
    pub(crate) heap: ScriptHeap,
    /// Per-class default blocks with string defaults hydrated into heap
    /// handles, indexed by `ClassId`.
    pub(crate) class_defaults: Vec<Vec<u8>>,
    /// Native dispatch table.
    pub(crate) natives: NativeTable,
    /// Network interception for routed calls.
    pub(crate) replication: Box<dyn ReplicationHook>,
    /// Where script diagnostics go.
    pub(crate) diag: Arc<dyn DiagnosticSink>,
    /// Limits and policies.
    pub(crate) options: VmOptions,
    /// Jumps taken in the current dispatch.
    pub(crate) runaway: u32,
    /// Script frames currently on the Rust stack.
    pub(crate) recursion: u32,
}

impl Vm {
    /// Machine with default options, logging diagnostics through `tracing`.
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Machine with explicit options.
    pub fn with_options(options: VmOptions) -> Self {
        Vm {
            classes: ClassRegistry::new(),
            structs: Vec::new(),
            objects: InstanceTable::new(),
            heap: ScriptHeap::new(),
            class_defaults: Vec::new(),
            natives: NativeTable::new(),
            replication: Box::new(LocalOnly),
            diag: Arc::new(TracingSink),
            options,
            runaway: 0,
            recursion: 0,
        }
    }

    /// Replace the diagnostics sink.
    pub fn set_diag_sink(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.diag = sink;
    }

    /// Replace the replication hook.
    pub fn set_replication_hook(&mut self, hook: Box<dyn ReplicationHook>) {
        self.replication = hook;
    }

    /// Current options.
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Mutable options, for switching policies at runtime.
    pub fn options_mut(&mut self) -> &mut VmOptions {
        &mut self.options
    }

    /// The class registry.
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// The live instance table.
    pub fn objects(&self) -> &InstanceTable {
        &self.objects
    }

    /// The script heap.
    pub fn heap(&self) -> &ScriptHeap {
        &self.heap
    }

    /// Mutable script heap, for natives producing owned values.
    pub fn heap_mut(&mut self) -> &mut ScriptHeap {
        &mut self.heap
    }

    /// The native dispatch table.
    pub fn natives(&self) -> &NativeTable {
        &self.natives
    }

    /// Mutable native table, for host registration.
    pub fn natives_mut(&mut self) -> &mut NativeTable {
        &mut self.natives
    }

    // ===== Registration =====

    /// Register a class and hydrate its default block: string defaults
    /// become heap handles owned by the machine.
    pub fn register_class(
        &mut self,
        class: Arc<statescript_core::ClassDef>,
    ) -> Result<ClassId, RegistryError> {
        let id = self.classes.register(class.clone())?;
        let mut block = class.defaults.clone();
        for (offset, text) in &class.default_text {
            let handle = self.heap.alloc_string(text.clone());
            storage::write_u32(&mut block, *offset as usize, handle);
        }
        self.class_defaults.push(block);
        debug!(class = %class.name, id, "class registered");
        Ok(id)
    }

    /// Register a struct layout, returning the id bytecode refers to it by.
    pub fn register_struct(&mut self, def: Arc<StructDef>) -> u16 {
        self.structs.push(def);
        (self.structs.len() - 1) as u16
    }

    pub(crate) fn struct_def(&self, id: u16) -> ExecResult<Arc<StructDef>> {
        self.structs
            .get(id as usize)
            .cloned()
            .ok_or(FatalError::BadStructId(id))
    }

    // ===== Instance lifecycle =====

    /// Create an instance of a registered class, seeded from its hydrated
    /// defaults. The instance starts outside any state.
    pub fn create_instance(&mut self, class_id: ClassId, name: Name) -> Option<ObjHandle> {
        let class = self.classes.get(class_id)?.clone();
        let defaults = self.class_defaults.get(class_id as usize)?;
        let mut props = vec![0u8; class.instance_size as usize];
        for prop in &class.properties {
            storage::copy_property(&mut self.heap, prop, defaults, &mut props);
        }
        debug!(class = %class.name, instance = %name, "instance created");
        let instance = Instance {
            name,
            state: StateRecord::new(class.clone()),
            class,
            class_id,
            props,
            flags: 0,
        };
        Some(self.objects.insert(instance))
    }

    /// Remove an instance and tear down every owned value in its property
    /// block. The handle goes stale; it is never reused.
    pub fn destroy_instance(&mut self, handle: ObjHandle) -> bool {
        match self.objects.remove(handle) {
            Some(mut inst) => {
                debug!(instance = %inst.name, "instance destroyed");
                storage::destroy_block(&mut self.heap, &inst.class.properties, &mut inst.props);
                true
            }
            None => false,
        }
    }

    /// Flag an instance so future external events are rejected. The
    /// instance stays readable until [`Vm::destroy_instance`].
    pub fn mark_pending_destroy(&mut self, handle: ObjHandle) {
        if let Some(inst) = self.objects.get_mut(handle) {
            inst.flags |= statescript_core::instance_flags::PENDING_DESTROY;
        }
    }

    /// The instance behind `handle`, if alive.
    pub fn instance(&self, handle: ObjHandle) -> Option<&Instance> {
        self.objects.get(handle)
    }

    /// The active state of an instance, `None` name when outside any state.
    pub fn state_of(&self, handle: ObjHandle) -> Option<Name> {
        self.objects.get(handle).map(|i| i.state.state_name())
    }

    // ===== Host property access =====

    fn prop_of(&self, handle: ObjHandle, name: Name) -> Option<(&Instance, &PropertyDef)> {
        let inst = self.objects.get(handle)?;
        let prop = inst.class.find_property(name)?;
        Some((inst, prop))
    }

    /// Read an int property.
    pub fn prop_i32(&self, handle: ObjHandle, name: Name) -> Option<i32> {
        self.prop_i32_at(handle, name, 0)
    }

    /// Read one element of a fixed-size int array property.
    pub fn prop_i32_at(&self, handle: ObjHandle, name: Name, index: u32) -> Option<i32> {
        let (inst, prop) = self.prop_of(handle, name)?;
        if !matches!(prop.kind, PropKind::Int) || index >= prop.array_dim {
            return None;
        }
        let off = (prop.offset + index * prop.elem_size()) as usize;
        Some(storage::read_i32(&inst.props, off))
    }

    /// Read a float property.
    pub fn prop_f32(&self, handle: ObjHandle, name: Name) -> Option<f32> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Float).then(|| storage::read_f32(&inst.props, prop.offset as usize))
    }

    /// Read a bool property through its bitfield mask.
    pub fn prop_bool(&self, handle: ObjHandle, name: Name) -> Option<bool> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Bool)
            .then(|| storage::read_bit(&inst.props, prop.offset as usize, prop.bool_mask))
    }

    /// Read a name property.
    pub fn prop_name(&self, handle: ObjHandle, name: Name) -> Option<Name> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Name).then(|| storage::read_name(&inst.props, prop.offset as usize))
    }

    /// Read an object-reference property.
    pub fn prop_obj(&self, handle: ObjHandle, name: Name) -> Option<ObjHandle> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Object)
            .then(|| ObjHandle::from_raw(storage::read_u32(&inst.props, prop.offset as usize)))
    }

    /// Read a string property. Copies the text out of the heap.
    pub fn prop_str(&self, handle: ObjHandle, name: Name) -> Option<String> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Str).then(|| {
            self.heap
                .string(storage::read_u32(&inst.props, prop.offset as usize))
                .to_owned()
        })
    }

    /// Length of a dynamic-array property. `Some(0)` when unallocated.
    pub fn array_len(&self, handle: ObjHandle, name: Name) -> Option<u32> {
        let (inst, prop) = self.prop_of(handle, name)?;
        matches!(prop.kind, PropKind::Array(_)).then(|| {
            self.heap
                .array(storage::read_u32(&inst.props, prop.offset as usize))
                .map(|a| a.len())
                .unwrap_or(0)
        })
    }

    /// Element of a dynamic int-array property.
    pub fn array_i32(&self, handle: ObjHandle, name: Name, index: u32) -> Option<i32> {
        let (inst, prop) = self.prop_of(handle, name)?;
        let PropKind::Array(elem) = &prop.kind else { return None };
        if !matches!(**elem, PropKind::Int) {
            return None;
        }
        let arr = self
            .heap
            .array(storage::read_u32(&inst.props, prop.offset as usize))?;
        (index < arr.len()).then(|| storage::read_i32(&arr.data, index as usize * 4))
    }

    fn scalar_slot(&mut self, handle: ObjHandle, name: Name) -> Option<(usize, PropKind, u32)> {
        let (_, prop) = self.prop_of(handle, name)?;
        Some((prop.offset as usize, prop.kind.clone(), prop.bool_mask))
    }

    /// Write an int property.
    pub fn set_prop_i32(&mut self, handle: ObjHandle, name: Name, value: i32) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Int, _)) => {
                if let Some(inst) = self.objects.get_mut(handle) {
                    storage::write_i32(&mut inst.props, off, value);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Write a float property.
    pub fn set_prop_f32(&mut self, handle: ObjHandle, name: Name, value: f32) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Float, _)) => {
                if let Some(inst) = self.objects.get_mut(handle) {
                    storage::write_f32(&mut inst.props, off, value);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Write a bool property through its bitfield mask, leaving the other
    /// bits of the word alone.
    pub fn set_prop_bool(&mut self, handle: ObjHandle, name: Name, value: bool) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Bool, mask)) => {
                if let Some(inst) = self.objects.get_mut(handle) {
                    storage::write_bit(&mut inst.props, off, mask, value);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Write a name property.
    pub fn set_prop_name(&mut self, handle: ObjHandle, name: Name, value: Name) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Name, _)) => {
                if let Some(inst) = self.objects.get_mut(handle) {
                    storage::write_name(&mut inst.props, off, value);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Write an object-reference property.
    pub fn set_prop_obj(&mut self, handle: ObjHandle, name: Name, value: ObjHandle) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Object, _)) => {
                if let Some(inst) = self.objects.get_mut(handle) {
                    storage::write_u32(&mut inst.props, off, value.raw());
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Write a string property, replacing the owned text.
    pub fn set_prop_str(&mut self, handle: ObjHandle, name: Name, text: &str) -> bool {
        match self.scalar_slot(handle, name) {
            Some((off, PropKind::Str, _)) => {
                let new = self.heap.alloc_string(text);
                let Some(inst) = self.objects.get_mut(handle) else {
                    self.heap.free(new);
                    return false;
                };
                let old = storage::read_u32(&inst.props, off);
                storage::write_u32(&mut inst.props, off, new);
                self.heap.free(old);
                true
            }
            _ => false,
        }
    }

    // ===== Diagnostics =====

    fn emit(&self, severity: Severity, frame: &Frame, message: String) {
        let instance_name = self
            .objects
            .get(frame.object)
            .map(|i| i.name)
            .unwrap_or(Name::NONE);
        self.diag.script_log(ScriptDiagnostic {
            severity,
            instance: frame.object,
            instance_name,
            node: frame.node.name(),
            offset: frame.ip as u32,
            message,
        });
    }

    /// Report a recoverable script mistake and keep executing.
    pub(crate) fn script_warn(&self, frame: &Frame, message: impl Into<String>) {
        self.emit(Severity::Warning, frame, message.into());
    }

    /// Warning variant for mistakes caught outside any frame, such as a
    /// transition requested by the host.
    pub(crate) fn script_warn_obj(&self, object: ObjHandle, node: Name, message: impl Into<String>) {
        let instance_name = self.objects.get(object).map(|i| i.name).unwrap_or(Name::NONE);
        self.diag.script_log(ScriptDiagnostic {
            severity: Severity::Warning,
            instance: object,
            instance_name,
            node,
            offset: 0,
            message: message.into(),
        });
    }

    /// Report a critical script failure; fails the dispatch when the
    /// machine is configured to escalate.
    pub(crate) fn script_critical(
        &mut self,
        frame: &Frame,
        message: impl Into<String>,
    ) -> ExecResult<()> {
        let message = message.into();
        self.emit(Severity::Critical, frame, message.clone());
        if self.options.fatal_critical {
            return Err(FatalError::Critical(message));
        }
        Ok(())
    }

    // ===== Safety counters =====

    /// Reset both counters. Called by every top-level entry point, which
    /// also clears any residue a failed dispatch left behind.
    pub(crate) fn begin_dispatch(&mut self) {
        self.runaway = 0;
        self.recursion = 0;
    }

    /// Count one jump; diagnose or fail once the limit trips.
    pub(crate) fn check_runaway(&mut self, frame: &Frame) -> ExecResult<()> {
        self.runaway += 1;
        if self.runaway > self.options.runaway_limit {
            if self.options.fatal_runaway {
                return Err(FatalError::RunawayLoop(self.runaway));
            }
            let count = self.runaway;
            self.runaway = 0;
            self.script_critical(frame, format!("runaway loop detected after {count} iterations"))?;
        }
        Ok(())
    }

    /// Count one frame in; fail past the ceiling.
    pub(crate) fn enter_call(&mut self) -> ExecResult<()> {
        self.recursion += 1;
        if self.recursion > self.options.max_recursion {
            return Err(FatalError::RecursionLimit(self.options.max_recursion));
        }
        Ok(())
    }

    /// Count one frame out.
    pub(crate) fn exit_call(&mut self) {
        self.recursion = self.recursion.saturating_sub(1);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statescript_core::ClassBuilder;

    #[test]
    fn test_instances_are_seeded_from_hydrated_defaults() {
        let class = ClassBuilder::new(Name::new("Widget"))
            .var(Name::new("Count"), PropKind::Int)
            .var(Name::new("Label"), PropKind::Str)
            .default_int(Name::new("Count"), 7)
            .default_str(Name::new("Label"), "ready")
            .build();
        let mut vm = Vm::new();
        let id = vm.register_class(class).unwrap();
        let a = vm.create_instance(id, Name::new("A")).unwrap();
        let b = vm.create_instance(id, Name::new("B")).unwrap();
        assert_eq!(vm.prop_i32(a, Name::new("Count")), Some(7));
        assert_eq!(vm.prop_str(a, Name::new("Label")).as_deref(), Some("ready"));

        // Each instance owns its copy of the default text.
        assert!(vm.set_prop_str(a, Name::new("Label"), "changed"));
        assert_eq!(vm.prop_str(b, Name::new("Label")).as_deref(), Some("ready"));
    }

    #[test]
    fn test_destroy_tears_down_owned_values() {
        let class = ClassBuilder::new(Name::new("Widget"))
            .var(Name::new("Label"), PropKind::Str)
            .default_str(Name::new("Label"), "owned")
            .build();
        let mut vm = Vm::new();
        let id = vm.register_class(class).unwrap();
        let live_before = vm.heap().live_count();
        let h = vm.create_instance(id, Name::new("A")).unwrap();
        assert_eq!(vm.heap().live_count(), live_before + 1);
        assert!(vm.destroy_instance(h));
        assert_eq!(vm.heap().live_count(), live_before);
        assert!(vm.instance(h).is_none());
        assert!(!vm.destroy_instance(h));
    }

    #[test]
    fn test_runaway_counter_diagnoses_and_resets() {
        let mut vm = Vm::with_options(VmOptions {
            runaway_limit: 3,
            ..VmOptions::default()
        });
        let sink = Arc::new(statescript_core::CollectSink::new());
        vm.set_diag_sink(sink.clone());
        let class = ClassBuilder::new(Name::new("Thing")).build();
        let frame = Frame::for_scope(
            ObjHandle::NONE,
            &statescript_core::ScriptScope::Class(class),
            0,
        );
        for _ in 0..3 {
            vm.check_runaway(&frame).unwrap();
        }
        assert_eq!(sink.count(), 0);
        vm.check_runaway(&frame).unwrap();
        assert!(sink.any("runaway loop"));
        assert_eq!(vm.runaway, 0);
    }

    #[test]
    fn test_recursion_ceiling_is_fatal() {
        let mut vm = Vm::with_options(VmOptions {
            max_recursion: 2,
            ..VmOptions::default()
        });
        vm.enter_call().unwrap();
        vm.enter_call().unwrap();
        assert!(matches!(vm.enter_call(), Err(FatalError::RecursionLimit(2))));
        vm.begin_dispatch();
        assert_eq!(vm.recursion, 0);
    }
}
