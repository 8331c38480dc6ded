//! Function calls
//!
//! Two entry paths share one calling convention. Script-internal call
//! sites ([`Vm::call_function`]) evaluate each argument in the caller's
//! frame and move the value into the callee's parameter slot, recording
//! the caller-side place of every out argument. Host dispatch
//! ([`Vm::call_event`]) packs typed [`ScriptValue`]s instead. Either
//! way the callee frame owns its parameter values: after the body runs,
//! out parameters are copied back in reverse declaration order, the
//! return expression (if the body reached one) has been delivered to
//! the caller's sink, and every constructible frame slot is torn down.
//!
//! Native targets never get a frame here; they pull their own arguments
//! from the caller's stream via [`Vm::eval`] and
//! [`Vm::consume_end_parms`]. A call landing on an unclaimed native
//! slot is reported and its argument list drained so the stream stays
//! in sync.

use std::sync::Arc;

use statescript_core::{
    instance_flags, probe_bit, storage, FunctionDef, Name, ObjHandle, PropKind, PropertyDef,
    MAX_FUNC_PARMS,
};
use tracing::trace;

use crate::error::{ExecResult, FatalError};
use crate::frame::Frame;
use crate::opcode::Opcode;
use crate::place::{self, Place};
use crate::vm::Vm;

/// A typed argument for host-initiated dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// 32-bit integer.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// Truth value.
    Bool(bool),
    /// Unsigned byte.
    Byte(u8),
    /// Interned name.
    Name(Name),
    /// Instance reference.
    Obj(ObjHandle),
    /// String, copied into the script heap for the call.
    Str(String),
}

/// How [`Vm::call_event`] disposed of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The body ran to completion.
    Ran,
    /// Script execution is globally disabled.
    Disabled,
    /// The instance is dead.
    Gone,
    /// The instance is marked for destruction.
    PendingDestroy,
    /// The name is a probe the instance is not listening for.
    Ignored,
    /// Nothing with this name exists on the instance.
    NoFunction,
    /// The target is natively implemented or has no body to interpret.
    Native,
    /// A singular call is already in flight on the instance.
    Singular,
}

impl Vm {
    /// Dispatch a named event on an instance. This is a top-level entry:
    /// it resets the safety counters, applies the rejection gates, binds
    /// through the active state chain and runs the body. The return
    /// value, if the function has one, is discarded.
    pub fn call_event(
        &mut self,
        object: ObjHandle,
        name: Name,
        args: &[ScriptValue],
    ) -> ExecResult<EventOutcome> {
        self.begin_dispatch();
        if !self.options.scripting_enabled {
            return Ok(EventOutcome::Disabled);
        }
        let Some(inst) = self.objects.get(object) else {
            return Ok(EventOutcome::Gone);
        };
        if inst.is_pending_destroy() {
            return Ok(EventOutcome::PendingDestroy);
        }
        // The probe gate comes before binding: a muted probe is ignored
        // even when no handler exists at all.
        if !inst.state.is_probing(probe_bit(name)) {
            return Ok(EventOutcome::Ignored);
        }
        let Ok(function) = self.bind_virtual(object, name) else {
            return Ok(EventOutcome::NoFunction);
        };
        if function.is_native() || !function.has_body() {
            return Ok(EventOutcome::Native);
        }
        if function.is_singular() {
            let busy = self.objects.get(object).map(|i| i.in_singular()).unwrap_or(false);
            if busy {
                return Ok(EventOutcome::Singular);
            }
        }
        trace!(?object, function = %name, "event dispatch");
        self.run_event_body(object, &function, args)?;
        Ok(EventOutcome::Ran)
    }

    fn run_event_body(
        &mut self,
        object: ObjHandle,
        function: &Arc<FunctionDef>,
        args: &[ScriptValue],
    ) -> ExecResult<()> {
        let mut frame = Frame::for_function(object, function.clone());
        let declared: Vec<PropertyDef> = function.parms().cloned().collect();
        if args.len() != declared.len() {
            self.script_warn(
                &frame,
                format!(
                    "argument count mismatch for '{}': declared {}, got {}",
                    function.name,
                    declared.len(),
                    args.len()
                ),
            );
        }
        for (parm, value) in declared.iter().zip(args) {
            self.pack_argument(&mut frame, parm, value);
        }

        let singular = function.is_singular();
        if singular {
            if let Some(inst) = self.objects.get_mut(object) {
                inst.flags |= instance_flags::IN_SINGULAR;
            }
        }
        let ran = self.run_body(&mut frame, None);
        if singular {
            if let Some(inst) = self.objects.get_mut(object) {
                inst.flags &= !instance_flags::IN_SINGULAR;
            }
        }
        ran?;
        self.teardown_frame(&mut frame);
        Ok(())
    }

    /// Move one host value into its parameter slot. The frame owns the
    /// copy; mismatched kinds are diagnosed and leave the slot zeroed.
    fn pack_argument(&mut self, frame: &mut Frame, parm: &PropertyDef, value: &ScriptValue) {
        let off = parm.offset as usize;
        match (&parm.kind, value) {
            (PropKind::Int, ScriptValue::Int(v)) => storage::write_i32(&mut frame.locals, off, *v),
            (PropKind::Float, ScriptValue::Float(v)) => {
                storage::write_f32(&mut frame.locals, off, *v)
            }
            (PropKind::Byte, ScriptValue::Byte(v)) => storage::write_u8(&mut frame.locals, off, *v),
            (PropKind::Bool, ScriptValue::Bool(v)) => {
                storage::write_bit(&mut frame.locals, off, parm.bool_mask, *v)
            }
            (PropKind::Name, ScriptValue::Name(v)) => {
                storage::write_name(&mut frame.locals, off, *v)
            }
            (PropKind::Object, ScriptValue::Obj(v)) => {
                storage::write_u32(&mut frame.locals, off, v.raw())
            }
            (PropKind::Str, ScriptValue::Str(v)) => {
                let handle = self.heap.alloc_string(v.clone());
                storage::write_u32(&mut frame.locals, off, handle);
            }
            _ => self.script_warn(frame, format!("argument type mismatch for '{}'", parm.name)),
        }
    }

    /// Run a no-argument notification (BeginState, EndState) if the
    /// instance defines a scripted handler for it. Probe gating is the
    /// caller's job. Counts against the recursion ceiling, since a
    /// handler can start another transition.
    pub(crate) fn notify(&mut self, object: ObjHandle, event: Name) -> ExecResult<()> {
        let Ok(function) = self.bind_virtual(object, event) else {
            return Ok(());
        };
        if function.is_native() || !function.has_body() {
            return Ok(());
        }
        self.enter_call()?;
        let mut frame = Frame::for_function(object, function.clone());
        let ran = self.run_body(&mut frame, None);
        self.exit_call();
        ran?;
        self.teardown_frame(&mut frame);
        Ok(())
    }

    /// Resolve a by-name call: the active state chain first, then the
    /// class chain.
    pub(crate) fn bind_virtual(&self, object: ObjHandle, name: Name) -> ExecResult<Arc<FunctionDef>> {
        let Some(inst) = self.objects.get(object) else {
            return Err(FatalError::MissingFunction(name));
        };
        if let Some(state) = inst.state.scope.state() {
            if let Some(function) = state.find_function(name) {
                return Ok(function);
            }
        }
        inst.class.find_function(name).ok_or(FatalError::MissingFunction(name))
    }

    /// Resolve a by-name call skipping state overrides.
    pub(crate) fn bind_global(&self, object: ObjHandle, name: Name) -> ExecResult<Arc<FunctionDef>> {
        let Some(inst) = self.objects.get(object) else {
            return Err(FatalError::MissingFunction(name));
        };
        inst.class.find_function(name).ok_or(FatalError::MissingFunction(name))
    }

    /// Invoke a bound function from a call site in `caller`. The cursor
    /// sits on the first argument; on return it has passed the argument
    /// list's terminator and `sink`, when present, holds the return
    /// value.
    pub(crate) fn call_function(
        &mut self,
        caller: &mut Frame,
        target: Arc<FunctionDef>,
        sink: Option<&mut [u8]>,
    ) -> ExecResult<()> {
        // Natives run against the caller's frame and do their own
        // argument handling.
        if target.is_native() {
            if let Some(index) = target.native_index {
                return self.call_native(caller, index, sink);
            }
            self.script_critical(caller, format!("native '{}' has no dispatch slot", target.name))?;
            return self.drain_call_site(caller);
        }

        if target.is_net() {
            let instance_name =
                self.objects.get(caller.object).map(|i| i.name).unwrap_or(Name::NONE);
            if self.replication.intercept(caller.object, instance_name, target.name) {
                // Consumed remotely; arguments are still evaluated for
                // their side effects and the sink stays zeroed.
                return self.drain_call_site(caller);
            }
        }

        if target.is_singular() {
            let busy = self.objects.get(caller.object).map(|i| i.in_singular()).unwrap_or(false);
            if busy {
                return self.drain_call_site(caller);
            }
        }

        let declared: Vec<PropertyDef> = target.parms().cloned().collect();
        if declared.len() > MAX_FUNC_PARMS {
            return Err(FatalError::BadOperand(
                caller.node.name(),
                caller.ip as u32,
                format!(
                    "'{}' declares {} parameters, limit is {MAX_FUNC_PARMS}",
                    target.name,
                    declared.len()
                ),
            ));
        }

        self.enter_call()?;
        let mut frame = Frame::for_function(caller.object, target.clone());

        // Arguments evaluate in the caller's frame; each value moves into
        // its parameter slot, so the callee owns it from here on. Out
        // arguments record their caller-side place for copy-back.
        for parm in &declared {
            if self.next_is_end_parms(caller) {
                // Remaining (optional) parameters keep their zeroed slots.
                break;
            }
            let mut scratch = vec![0u8; parm.elem_size() as usize];
            let argp = self.eval(caller, Some(&mut scratch))?;
            frame.out_places.push(if parm.is_out_parm() { argp } else { None });
            let off = parm.offset as usize;
            if matches!(parm.kind, PropKind::Bool) {
                let truth = storage::read_i32(&scratch, 0) != 0;
                storage::write_bit(&mut frame.locals, off, parm.bool_mask, truth);
            } else {
                let size = parm.elem_size() as usize;
                frame.locals[off..off + size].copy_from_slice(&scratch);
            }
        }
        self.consume_end_parms(caller)?;

        let singular = target.is_singular();
        if singular {
            if let Some(inst) = self.objects.get_mut(frame.object) {
                inst.flags |= instance_flags::IN_SINGULAR;
            }
        }
        let ran = self.run_body(&mut frame, sink);
        if singular {
            if let Some(inst) = self.objects.get_mut(frame.object) {
                inst.flags &= !instance_flags::IN_SINGULAR;
            }
        }
        ran?;

        self.copy_out(caller, &mut frame, &declared);
        self.teardown_frame(&mut frame);
        self.exit_call();
        Ok(())
    }

    /// Interpret a function body until it returns or runs out. A return
    /// expression is delivered straight into `sink`.
    fn run_body(&mut self, frame: &mut Frame, sink: Option<&mut [u8]>) -> ExecResult<()> {
        loop {
            match frame.peek() {
                None => return Ok(()),
                Some(byte) if byte == Opcode::Return as u8 => {
                    frame.read_u8()?;
                    self.eval(frame, sink)?;
                    return Ok(());
                }
                Some(_) => {
                    self.eval(frame, None)?;
                }
            }
        }
    }

    /// Write out-parameter final values back to their caller-side places,
    /// in reverse declaration order. Ownership of each value moves out of
    /// the callee slot.
    fn copy_out(&mut self, caller: &mut Frame, frame: &mut Frame, declared: &[PropertyDef]) {
        for (i, parm) in declared.iter().enumerate().rev() {
            if !parm.is_out_parm() {
                continue;
            }
            let Some(dest) = frame.out_places.get(i).cloned().flatten() else {
                continue;
            };
            let off = parm.offset as usize;
            match dest {
                Place::Value(p) => {
                    if p.bool_mask != 0 {
                        let truth = storage::read_bit(&frame.locals, off, parm.bool_mask);
                        place::write_bit(self, caller, &p, truth);
                    } else {
                        let size = parm.elem_size() as usize;
                        let mut moved = frame.locals[off..off + size].to_vec();
                        storage::zero(&mut frame.locals, off, size);
                        place::store_value(self, caller, &p, &mut moved);
                    }
                }
                Place::ArrayLength(slot) => {
                    let len = storage::read_i32(&frame.locals, off);
                    place::resize_array_at(self, caller, &slot, len);
                }
            }
        }
    }

    /// Destroy every constructible slot in a function frame, parameters
    /// included; the frame owns all of them.
    fn teardown_frame(&mut self, frame: &mut Frame) {
        let Some(function) = frame.node.function().cloned() else {
            return;
        };
        for prop in &function.locals {
            if prop.is_constructible() {
                storage::destroy_property(&mut self.heap, prop, &mut frame.locals);
            }
        }
    }

    /// Dispatch through the native table. An unclaimed slot is reported
    /// and its argument list drained so execution can continue.
    pub(crate) fn call_native(
        &mut self,
        frame: &mut Frame,
        index: u16,
        sink: Option<&mut [u8]>,
    ) -> ExecResult<()> {
        match self.natives.get(index) {
            Some(handler) => handler(self, frame, sink),
            None => {
                self.script_critical(frame, format!("unclaimed native slot {index}"))?;
                self.drain_call_site(frame)
            }
        }
    }

    /// Evaluate and discard every remaining argument, then consume the
    /// terminator. Discarded evaluation allocates nothing, so there is
    /// nothing to tear down.
    fn drain_call_site(&mut self, frame: &mut Frame) -> ExecResult<()> {
        while !self.next_is_end_parms(frame) {
            self.eval(frame, None)?;
        }
        self.consume_end_parms(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use statescript_core::{func_flags, ClassBuilder, CollectSink, FunctionBuilder};

    use crate::vm::ReplicationHook;
    use crate::writer::BytecodeWriter;

    fn setup(class: Arc<statescript_core::ClassDef>) -> (Vm, ObjHandle) {
        let mut vm = Vm::new();
        let id = vm.register_class(class).unwrap();
        let h = vm.create_instance(id, Name::new("Subject")).unwrap();
        (vm, h)
    }

    #[test]
    fn test_event_body_writes_instance_state() {
        let mut w = BytecodeWriter::new();
        w.assign();
        w.instance_var(0);
        w.int_const(42);
        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(FunctionBuilder::new(Name::new("Bump")).code(w.finish()).build())
            .build();
        let (mut vm, h) = setup(class);
        let outcome = vm.call_event(h, Name::new("Bump"), &[]).unwrap();
        assert_eq!(outcome, EventOutcome::Ran);
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(42));
    }

    #[test]
    fn test_host_arguments_pack_into_parameter_slots() {
        let mut w = BytecodeWriter::new();
        w.assign();
        w.instance_var(0);
        w.local(0);
        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(
                FunctionBuilder::new(Name::new("Absorb"))
                    .param(Name::new("Amount"), PropKind::Int)
                    .code(w.finish())
                    .build(),
            )
            .build();
        let (mut vm, h) = setup(class);
        vm.call_event(h, Name::new("Absorb"), &[ScriptValue::Int(7)]).unwrap();
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(7));
    }

    #[test]
    fn test_argument_count_mismatch_warns_and_zero_fills() {
        let mut w = BytecodeWriter::new();
        w.assign();
        w.instance_var(0);
        w.local(0);
        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(
                FunctionBuilder::new(Name::new("Absorb"))
                    .param(Name::new("Amount"), PropKind::Int)
                    .code(w.finish())
                    .build(),
            )
            .build();
        let (mut vm, h) = setup(class);
        vm.set_prop_i32(h, Name::new("Value"), 99);
        let sink = Arc::new(CollectSink::new());
        vm.set_diag_sink(sink.clone());
        let outcome = vm.call_event(h, Name::new("Absorb"), &[]).unwrap();
        assert_eq!(outcome, EventOutcome::Ran);
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(0));
        assert!(sink.any("argument count mismatch"));
    }

    #[test]
    fn test_out_parameters_copy_back_on_early_return() {
        // Fill(out X): X = 10; return; X = 99 (never reached)
        let mut wb = BytecodeWriter::new();
        wb.assign();
        wb.local(0);
        wb.int_const(10);
        wb.ret();
        wb.nothing();
        wb.assign();
        wb.local(0);
        wb.int_const(99);
        let callee = FunctionBuilder::new(Name::new("Fill"))
            .out_param(Name::new("X"), PropKind::Int)
            .code(wb.finish())
            .build();

        // Go(): Tmp = 5; Fill(Tmp); Value = Tmp
        let mut wc = BytecodeWriter::new();
        wc.assign();
        wc.local(0);
        wc.int_const(5);
        wc.virtual_call(Name::new("Fill"));
        wc.local(0);
        wc.end_parms();
        wc.assign();
        wc.instance_var(0);
        wc.local(0);
        let caller = FunctionBuilder::new(Name::new("Go"))
            .local(Name::new("Tmp"), PropKind::Int)
            .code(wc.finish())
            .build();

        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(callee)
            .function(caller)
            .build();
        let (mut vm, h) = setup(class);
        let outcome = vm.call_event(h, Name::new("Go"), &[]).unwrap();
        assert_eq!(outcome, EventOutcome::Ran);
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(10));
    }

    #[test]
    fn test_singular_blocks_reentry_on_the_same_instance() {
        // Once(): Once(); Value = 7
        let mut w = BytecodeWriter::new();
        w.virtual_call(Name::new("Once"));
        w.end_parms();
        w.assign();
        w.instance_var(0);
        w.int_const(7);
        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(
                FunctionBuilder::new(Name::new("Once"))
                    .flag(func_flags::SINGULAR)
                    .code(w.finish())
                    .build(),
            )
            .build();
        let (mut vm, h) = setup(class);
        let outcome = vm.call_event(h, Name::new("Once"), &[]).unwrap();
        assert_eq!(outcome, EventOutcome::Ran);
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(7));
        // The flag is released once the outer call finishes.
        assert!(!vm.instance(h).unwrap().in_singular());
    }

    struct ConsumeNamed(Name, Arc<Mutex<Vec<Name>>>);

    impl ReplicationHook for ConsumeNamed {
        fn intercept(&self, _instance: ObjHandle, _instance_name: Name, function: Name) -> bool {
            self.1.lock().unwrap().push(function);
            function == self.0
        }
    }

    #[test]
    fn test_replication_hook_consumes_net_calls() {
        // Send(): Value = 1  (net)
        let mut ws = BytecodeWriter::new();
        ws.assign();
        ws.instance_var(0);
        ws.int_const(1);
        let send = FunctionBuilder::new(Name::new("Send"))
            .flag(func_flags::NET)
            .code(ws.finish())
            .build();

        // Go(): Send()
        let mut wg = BytecodeWriter::new();
        wg.virtual_call(Name::new("Send"));
        wg.end_parms();
        let go = FunctionBuilder::new(Name::new("Go")).code(wg.finish()).build();

        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(send)
            .function(go)
            .build();
        let (mut vm, h) = setup(class);
        let seen = Arc::new(Mutex::new(Vec::new()));
        vm.set_replication_hook(Box::new(ConsumeNamed(Name::new("Send"), seen.clone())));

        vm.call_event(h, Name::new("Go"), &[]).unwrap();
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(0));
        assert_eq!(seen.lock().unwrap().as_slice(), &[Name::new("Send")]);
    }

    #[test]
    fn test_unclaimed_native_slot_reports_and_drains() {
        // Value = 5; <native 0x73>("junk")
        let mut w = BytecodeWriter::new();
        w.assign();
        w.instance_var(0);
        w.int_const(5);
        w.native_call(0x73);
        w.string_const("junk");
        w.end_parms();
        let class = ClassBuilder::new(Name::new("Counter"))
            .var(Name::new("Value"), PropKind::Int)
            .function(FunctionBuilder::new(Name::new("Go")).code(w.finish()).build())
            .build();
        let (mut vm, h) = setup(class);
        let sink = Arc::new(CollectSink::new());
        vm.set_diag_sink(sink.clone());

        let outcome = vm.call_event(h, Name::new("Go"), &[]).unwrap();
        assert_eq!(outcome, EventOutcome::Ran);
        assert_eq!(vm.prop_i32(h, Name::new("Value")), Some(5));
        assert!(sink.any("unclaimed native slot"));
        // The drained string argument was never allocated.
        assert_eq!(vm.heap().live_count(), 0);
    }

    #[test]
    fn test_rejection_gates_precede_binding() {
        let class = ClassBuilder::new(Name::new("Quiet")).build();
        let (mut vm, h) = setup(class);

        // A muted probe is ignored even though no handler exists.
        assert_eq!(vm.call_event(h, Name::new("Trigger"), &[]).unwrap(), EventOutcome::Ignored);
        // A non-probe unknown name reports the missing function instead.
        assert_eq!(vm.call_event(h, Name::new("Nonsense"), &[]).unwrap(), EventOutcome::NoFunction);

        vm.options_mut().scripting_enabled = false;
        assert_eq!(vm.call_event(h, Name::new("Nonsense"), &[]).unwrap(), EventOutcome::Disabled);
        vm.options_mut().scripting_enabled = true;

        vm.mark_pending_destroy(h);
        assert_eq!(
            vm.call_event(h, Name::new("Nonsense"), &[]).unwrap(),
            EventOutcome::PendingDestroy
        );
        vm.destroy_instance(h);
        assert_eq!(vm.call_event(h, Name::new("Nonsense"), &[]).unwrap(), EventOutcome::Gone);
    }

    #[test]
    fn test_string_argument_ownership_moves_through_the_frame() {
        // Keep(T): Text = T
        let mut w = BytecodeWriter::new();
        w.assign();
        w.instance_var(0);
        w.local(0);
        let class = ClassBuilder::new(Name::new("Holder"))
            .var(Name::new("Text"), PropKind::Str)
            .function(
                FunctionBuilder::new(Name::new("Keep"))
                    .param(Name::new("T"), PropKind::Str)
                    .code(w.finish())
                    .build(),
            )
            .build();
        let (mut vm, h) = setup(class);
        vm.call_event(h, Name::new("Keep"), &[ScriptValue::Str("payload".into())]).unwrap();
        assert_eq!(vm.prop_str(h, Name::new("Text")), Some("payload".into()));
        // Only the instance's copy survives; the parameter copy was torn
        // down with the frame.
        assert_eq!(vm.heap().live_count(), 1);
    }

    #[test]
    fn test_parameter_ceiling_is_fatal() {
        let mut wide = FunctionBuilder::new(Name::new("Wide"));
        for i in 0..=MAX_FUNC_PARMS {
            wide = wide.param(Name::new(&format!("P{i}")), PropKind::Int);
        }
        let mut w = BytecodeWriter::new();
        w.virtual_call(Name::new("Wide"));
        w.end_parms();
        let class = ClassBuilder::new(Name::new("Counter"))
            .function(wide.code(vec![Opcode::Nothing as u8]).build())
            .function(FunctionBuilder::new(Name::new("Go")).code(w.finish()).build())
            .build();
        let (mut vm, h) = setup(class);
        assert!(matches!(
            vm.call_event(h, Name::new("Go"), &[]),
            Err(FatalError::BadOperand(_, _, _))
        ));
    }
}
