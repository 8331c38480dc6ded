//! The dispatch loop
//!
//! One entry, [`Vm::eval`], serves statements and expressions alike: it
//! decodes the opcode at the frame's cursor, executes it, and returns the
//! operand's [`Place`] when the opcode was addressable. Callers that want
//! the value pass a sink; addressable operands deliver into it as well as
//! returning their place, so argument evaluation captures both in one
//! pass.
//!
//! Core bytes decode through the closed [`Opcode`] set; anything
//! undecodable below the native range is fatal. Bytes in the native
//! ranges dispatch through the claimed-slot table, falling back to a stub
//! that drains the argument list and reports the unclaimed slot.

use statescript_core::{storage, ObjHandle, PropKind};

use crate::error::{ExecResult, FatalError};
use crate::frame::Frame;
use crate::opcode::{
    extended_native_index, Conversion, Opcode, CASE_DEFAULT, EXTENDED_NATIVE_FIRST,
    EXTENDED_NATIVE_LAST, NATIVE_FIRST,
};
use crate::place::{self, Place, StoreRoot, ValuePlace};
use crate::vm::Vm;

impl Vm {
    /// Execute the opcode at the cursor.
    ///
    /// `sink` receives a deep copy of the value for expression opcodes; it
    /// must be zeroed and exactly the expression's size. The returned
    /// place, when present, addresses the storage the operand resolved to.
    /// It is only valid until the next evaluation against this machine.
    pub fn eval(&mut self, frame: &mut Frame, sink: Option<&mut [u8]>) -> ExecResult<Option<Place>> {
        let at = frame.ip as u32;
        let byte = frame.read_u8()?;

        if byte >= NATIVE_FIRST {
            self.call_native(frame, byte as u16, sink)?;
            return Ok(None);
        }
        if (EXTENDED_NATIVE_FIRST..=EXTENDED_NATIVE_LAST).contains(&byte) {
            let follower = frame.read_u8()?;
            self.call_native(frame, extended_native_index(byte, follower), sink)?;
            return Ok(None);
        }

        let Some(op) = Opcode::from_u8(byte) else {
            return Err(FatalError::UnknownOpcode(byte, frame.node.name(), at));
        };

        match op {
            // ===== Operand addressing =====
            Opcode::LocalVariable => {
                let index = frame.read_u16()?;
                let prop = frame
                    .node
                    .function()
                    .and_then(|f| f.local(index))
                    .ok_or_else(|| {
                        FatalError::BadOperand(
                            frame.node.name(),
                            at,
                            format!("no local at index {index}"),
                        )
                    })?;
                let p = ValuePlace {
                    root: StoreRoot::Locals,
                    offset: prop.offset,
                    kind: prop.kind.clone(),
                    array_dim: prop.array_dim,
                    bool_mask: prop.bool_mask,
                    owner: frame.object,
                    prop_name: prop.name,
                };
                self.deliver(frame, &p, sink);
                Ok(Some(Place::Value(p)))
            }
            Opcode::InstanceVariable => {
                let index = frame.read_u16()?;
                let Some(inst) = self.objects.get(frame.object) else {
                    self.script_warn(frame, "instance variable access on a dead instance");
                    zero_sink(sink);
                    return Ok(None);
                };
                let prop = inst.class.property(index).ok_or_else(|| {
                    FatalError::BadOperand(
                        frame.node.name(),
                        at,
                        format!("no instance property at index {index}"),
                    )
                })?;
                let p = ValuePlace {
                    root: StoreRoot::Instance(frame.object),
                    offset: prop.offset,
                    kind: prop.kind.clone(),
                    array_dim: prop.array_dim,
                    bool_mask: prop.bool_mask,
                    owner: frame.object,
                    prop_name: prop.name,
                };
                self.deliver(frame, &p, sink);
                Ok(Some(Place::Value(p)))
            }
            Opcode::DefaultVariable => {
                let index = frame.read_u16()?;
                let Some(inst) = self.objects.get(frame.object) else {
                    self.script_warn(frame, "default variable access on a dead instance");
                    zero_sink(sink);
                    return Ok(None);
                };
                let class_id = inst.class_id;
                let prop = inst.class.property(index).ok_or_else(|| {
                    FatalError::BadOperand(
                        frame.node.name(),
                        at,
                        format!("no instance property at index {index}"),
                    )
                })?;
                let p = ValuePlace {
                    root: StoreRoot::Defaults(class_id),
                    offset: prop.offset,
                    kind: prop.kind.clone(),
                    array_dim: prop.array_dim,
                    bool_mask: prop.bool_mask,
                    owner: frame.object,
                    prop_name: prop.name,
                };
                self.deliver(frame, &p, sink);
                Ok(Some(Place::Value(p)))
            }
            Opcode::StructMember => self.eval_struct_member(frame, at, sink),
            Opcode::ArrayElement => {
                let mut index_buf = [0u8; 4];
                self.eval(frame, Some(&mut index_buf))?;
                let index = i32::from_le_bytes(index_buf);
                let base = self.eval(frame, None)?.and_then(Place::value);
                let Some(base) = base else {
                    self.script_warn(frame, "indexed operand is not a variable");
                    zero_sink(sink);
                    return Ok(None);
                };
                let dim = base.array_dim.max(1) as i32;
                let clamped = index.clamp(0, dim - 1);
                if clamped != index {
                    self.script_warn(
                        frame,
                        format!(
                            "index {index} out of bounds for '{}' ({dim} elements)",
                            base.prop_name
                        ),
                    );
                }
                let p = ValuePlace {
                    offset: base.offset + clamped as u32 * base.kind.elem_size(),
                    array_dim: 1,
                    ..base
                };
                self.deliver(frame, &p, sink);
                Ok(Some(Place::Value(p)))
            }
            Opcode::DynArrayElement => self.eval_dyn_array_element(frame, sink),
            Opcode::DynArrayLength => {
                let slot = self.eval(frame, None)?.and_then(Place::value);
                let Some(slot) = slot else {
                    self.script_warn(frame, "length of a non-array operand");
                    zero_sink(sink);
                    return Ok(None);
                };
                if !matches!(slot.kind, PropKind::Array(_)) {
                    self.script_warn(frame, format!("'{}' is not a dynamic array", slot.prop_name));
                    zero_sink(sink);
                    return Ok(None);
                }
                if let Some(out) = sink {
                    let handle = place::array_handle_at(self, frame, &slot);
                    let len = self.heap.array(handle).map(|a| a.len()).unwrap_or(0);
                    storage::write_i32(out, 0, len as i32);
                }
                Ok(Some(Place::ArrayLength(slot)))
            }
            Opcode::BoolVariable => {
                let inner = self.eval(frame, None)?.and_then(Place::value);
                let Some(p) = inner else {
                    self.script_warn(frame, "bool operand is not a variable");
                    zero_sink(sink);
                    return Ok(None);
                };
                if let Some(out) = sink {
                    let bit = place::read_bit(self, frame, &p);
                    storage::write_i32(out, 0, bit as i32);
                }
                Ok(Some(Place::Value(p)))
            }

            // ===== Control flow and assignment =====
            Opcode::Return => Err(FatalError::BadOperand(
                frame.node.name(),
                at,
                "'return' in expression position".into(),
            )),
            Opcode::Stop => Err(FatalError::BadOperand(
                frame.node.name(),
                at,
                "'stop' in expression position".into(),
            )),
            Opcode::Jump => {
                let dest = frame.read_u16()?;
                self.check_runaway(frame)?;
                frame.jump_to(dest);
                Ok(None)
            }
            Opcode::JumpIfNot => {
                let dest = frame.read_u16()?;
                let mut cond = [0u8; 4];
                self.eval(frame, Some(&mut cond))?;
                if i32::from_le_bytes(cond) == 0 {
                    self.check_runaway(frame)?;
                    frame.jump_to(dest);
                }
                Ok(None)
            }
            Opcode::Switch => self.eval_switch(frame),
            Opcode::Case => {
                // Reached by falling off the end of a matched arm: hop to
                // the next arm's target, skipping this arm's match
                // expression unevaluated.
                let next = frame.read_u16()?;
                if next != CASE_DEFAULT {
                    self.check_runaway(frame)?;
                    frame.jump_to(next);
                }
                Ok(None)
            }
            Opcode::GotoLabel => {
                let mut buf = [0u8; 4];
                self.eval(frame, Some(&mut buf))?;
                let label = storage::read_name(&buf, 0);
                self.check_runaway(frame)?;
                self.redirect_to_label(frame, label);
                Ok(None)
            }
            Opcode::Assert => {
                let line = frame.read_u16()?;
                let mut cond = [0u8; 4];
                self.eval(frame, Some(&mut cond))?;
                if i32::from_le_bytes(cond) == 0 {
                    self.script_critical(frame, format!("assertion failed, line {line}"))?;
                }
                Ok(None)
            }
            Opcode::Nothing => Ok(None),
            Opcode::LineNumber => {
                frame.line = frame.read_u16()?;
                Ok(None)
            }
            Opcode::EndFunctionParms => Err(FatalError::BadOperand(
                frame.node.name(),
                at,
                "unexpected end of argument list".into(),
            )),
            Opcode::Skip => {
                // Wrapper a short-circuiting native can jump over; plain
                // evaluation passes straight through.
                let _skip = frame.read_u16()?;
                self.eval(frame, sink)
            }
            Opcode::Context => self.eval_context(frame, sink),
            Opcode::SelfObject => {
                if let Some(out) = sink {
                    storage::write_u32(out, 0, frame.object.raw());
                }
                Ok(None)
            }
            Opcode::Let => {
                let target = self.eval(frame, None)?;
                match target {
                    Some(Place::Value(p)) => {
                        let mut scratch = vec![0u8; p.kind.elem_size() as usize];
                        self.eval(frame, Some(&mut scratch))?;
                        if p.bool_mask != 0 {
                            let value = storage::read_i32(&scratch, 0) != 0;
                            place::write_bit(self, frame, &p, value);
                        } else {
                            place::store_value(self, frame, &p, &mut scratch);
                        }
                    }
                    Some(Place::ArrayLength(slot)) => {
                        let mut scratch = [0u8; 4];
                        self.eval(frame, Some(&mut scratch))?;
                        let new_len = i32::from_le_bytes(scratch);
                        place::resize_array_at(self, frame, &slot, new_len);
                    }
                    None => {
                        self.script_warn(frame, "assignment target is not a variable");
                        // The right-hand side still has to be consumed.
                        self.eval(frame, None)?;
                    }
                }
                Ok(None)
            }
            Opcode::LetBool => {
                let target = self.eval(frame, None)?.and_then(Place::value);
                let mut scratch = [0u8; 4];
                self.eval(frame, Some(&mut scratch))?;
                match target {
                    Some(p) if p.bool_mask != 0 => {
                        place::write_bit(self, frame, &p, i32::from_le_bytes(scratch) != 0);
                    }
                    Some(p) => {
                        self.script_warn(frame, format!("'{}' is not a bool", p.prop_name));
                    }
                    None => self.script_warn(frame, "assignment target is not a variable"),
                }
                Ok(None)
            }

            // ===== Constants =====
            Opcode::IntZero => {
                put_i32(sink, 0);
                Ok(None)
            }
            Opcode::IntOne => {
                put_i32(sink, 1);
                Ok(None)
            }
            Opcode::True => {
                put_i32(sink, 1);
                Ok(None)
            }
            Opcode::False => {
                put_i32(sink, 0);
                Ok(None)
            }
            Opcode::IntConst => {
                let value = frame.read_i32()?;
                put_i32(sink, value);
                Ok(None)
            }
            Opcode::IntConstByte => {
                let value = frame.read_u8()?;
                put_i32(sink, value as i32);
                Ok(None)
            }
            Opcode::ByteConst => {
                let value = frame.read_u8()?;
                if let Some(out) = sink {
                    storage::write_u8(out, 0, value);
                }
                Ok(None)
            }
            Opcode::FloatConst => {
                let value = frame.read_f32()?;
                if let Some(out) = sink {
                    storage::write_f32(out, 0, value);
                }
                Ok(None)
            }
            Opcode::StringConst => {
                let text = frame.read_string()?;
                if let Some(out) = sink {
                    let handle = self.heap.alloc_string(text);
                    storage::write_u32(out, 0, handle);
                }
                Ok(None)
            }
            Opcode::UnicodeStringConst => {
                let text = frame.read_unicode_string()?;
                if let Some(out) = sink {
                    let handle = self.heap.alloc_string(text);
                    storage::write_u32(out, 0, handle);
                }
                Ok(None)
            }
            Opcode::NameConst => {
                let name = frame.read_name()?;
                if let Some(out) = sink {
                    storage::write_name(out, 0, name);
                }
                Ok(None)
            }
            Opcode::VectorConst | Opcode::RotatorConst => {
                let mut words = [0u8; 12];
                for i in 0..3 {
                    let w = frame.read_u32()?;
                    words[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
                }
                if let Some(out) = sink {
                    out[..12].copy_from_slice(&words);
                }
                Ok(None)
            }
            Opcode::ObjectConst => {
                let raw = frame.read_u32()?;
                if let Some(out) = sink {
                    storage::write_u32(out, 0, raw);
                }
                Ok(None)
            }
            Opcode::NoObject => {
                if let Some(out) = sink {
                    storage::write_u32(out, 0, 0);
                }
                Ok(None)
            }

            // ===== Calls, casts and array mutation =====
            Opcode::VirtualFunction => {
                let name = frame.read_name()?;
                let target = self.bind_virtual(frame.object, name)?;
                self.call_function(frame, target, sink)?;
                Ok(None)
            }
            Opcode::FinalFunction => {
                let class_id = frame.read_u16()?;
                let fn_index = frame.read_u16()?;
                let class = self
                    .classes
                    .get(class_id as u32)
                    .ok_or(FatalError::BadClassId(class_id))?;
                let target = class.function(fn_index).cloned().ok_or_else(|| {
                    FatalError::BadOperand(
                        frame.node.name(),
                        at,
                        format!("no function at index {fn_index} in '{}'", class.name),
                    )
                })?;
                self.call_function(frame, target, sink)?;
                Ok(None)
            }
            Opcode::GlobalFunction => {
                let name = frame.read_name()?;
                let target = self.bind_global(frame.object, name)?;
                self.call_function(frame, target, sink)?;
                Ok(None)
            }
            Opcode::PrimitiveCast => {
                let code = frame.read_u8()?;
                let conv = Conversion::from_u8(code).ok_or(FatalError::UnknownConversion(
                    code,
                    frame.node.name(),
                    at,
                ))?;
                self.eval_cast(frame, conv, sink)?;
                Ok(None)
            }
            Opcode::DynamicCast => {
                let class_id = frame.read_u16()?;
                let target = self
                    .classes
                    .get(class_id as u32)
                    .ok_or(FatalError::BadClassId(class_id))?
                    .clone();
                let mut buf = [0u8; 4];
                self.eval(frame, Some(&mut buf))?;
                let handle = ObjHandle::from_raw(u32::from_le_bytes(buf));
                let passes = self
                    .objects
                    .get(handle)
                    .map(|inst| inst.class.is_child_of(&target))
                    .unwrap_or(false);
                if let Some(out) = sink {
                    storage::write_u32(out, 0, if passes { handle.raw() } else { 0 });
                }
                Ok(None)
            }
            Opcode::StructCmpEq | Opcode::StructCmpNe => {
                let struct_id = frame.read_u16()?;
                let def = self.struct_def(struct_id)?;
                let kind = PropKind::Struct(def.clone());
                let size = kind.elem_size() as usize;
                let mut a = vec![0u8; size];
                self.eval(frame, Some(&mut a))?;
                let mut b = vec![0u8; size];
                self.eval(frame, Some(&mut b))?;
                let equal = storage::values_equal(&self.heap, &kind, &a, 0, &b, 0);
                storage::destroy_value(&mut self.heap, &kind, &mut a, 0);
                storage::destroy_value(&mut self.heap, &kind, &mut b, 0);
                let result = if op == Opcode::StructCmpEq { equal } else { !equal };
                put_i32(sink, result as i32);
                Ok(None)
            }
            Opcode::DynArrayInsert | Opcode::DynArrayRemove => {
                let slot = self.eval(frame, None)?.and_then(Place::value);
                let mut index_buf = [0u8; 4];
                self.eval(frame, Some(&mut index_buf))?;
                let mut count_buf = [0u8; 4];
                self.eval(frame, Some(&mut count_buf))?;
                let index = i32::from_le_bytes(index_buf);
                let count = i32::from_le_bytes(count_buf);
                let Some(slot) = slot else {
                    self.script_warn(frame, "array operand is not a variable");
                    return Ok(None);
                };
                if index < 0 || count < 0 {
                    self.script_warn(
                        frame,
                        format!(
                            "bad span (index {index}, count {count}) for '{}'",
                            slot.prop_name
                        ),
                    );
                    return Ok(None);
                }
                if op == Opcode::DynArrayInsert {
                    place::insert_array_at(self, frame, &slot, index as u32, count as u32);
                } else {
                    place::remove_array_at(self, frame, &slot, index as u32, count as u32);
                }
                Ok(None)
            }
        }
    }

    /// Member access through a struct value. Resolving the owner to a
    /// place narrows it to the member; an unaddressable owner is read into
    /// scratch and the member copied out of it.
    fn eval_struct_member(
        &mut self,
        frame: &mut Frame,
        at: u32,
        sink: Option<&mut [u8]>,
    ) -> ExecResult<Option<Place>> {
        let struct_id = frame.read_u16()?;
        let member_index = frame.read_u16()?;
        let def = self.struct_def(struct_id)?;
        let member = def.members.get(member_index as usize).ok_or_else(|| {
            FatalError::BadOperand(
                frame.node.name(),
                at,
                format!("no member at index {member_index} in '{}'", def.name),
            )
        })?;

        let kind = PropKind::Struct(def.clone());
        let mut scratch = vec![0u8; kind.elem_size() as usize];
        let owner = self.eval(frame, Some(&mut scratch))?.and_then(Place::value);

        match owner {
            Some(p) if matches!(p.kind, PropKind::Struct(_)) => {
                // The scratch copy is redundant once the owner has a place.
                storage::destroy_value(&mut self.heap, &kind, &mut scratch, 0);
                let member_place = ValuePlace {
                    offset: p.offset + member.offset,
                    kind: member.kind.clone(),
                    array_dim: member.array_dim,
                    bool_mask: member.bool_mask,
                    prop_name: member.name,
                    ..p
                };
                self.deliver(frame, &member_place, sink);
                Ok(Some(Place::Value(member_place)))
            }
            _ => {
                // Transient owner: the member value is lifted out of the
                // scratch copy and there is nothing assignable to return.
                if let Some(out) = sink {
                    storage::copy_value(
                        &mut self.heap,
                        &member.kind,
                        &scratch,
                        member.offset as usize,
                        out,
                        0,
                    );
                }
                storage::destroy_value(&mut self.heap, &kind, &mut scratch, 0);
                Ok(None)
            }
        }
    }

    /// Dynamic-array element access. Reads reject an out-of-range index;
    /// writes grow the array through it.
    fn eval_dyn_array_element(
        &mut self,
        frame: &mut Frame,
        sink: Option<&mut [u8]>,
    ) -> ExecResult<Option<Place>> {
        let mut index_buf = [0u8; 4];
        self.eval(frame, Some(&mut index_buf))?;
        let index = i32::from_le_bytes(index_buf);

        let slot = self.eval(frame, None)?.and_then(Place::value);
        let Some(slot) = slot else {
            self.script_warn(frame, "array operand is not a variable");
            zero_sink(sink);
            return Ok(None);
        };
        let PropKind::Array(elem) = &slot.kind else {
            self.script_warn(frame, format!("'{}' is not a dynamic array", slot.prop_name));
            zero_sink(sink);
            return Ok(None);
        };
        let elem = (**elem).clone();

        if index < 0 {
            self.script_warn(
                frame,
                format!("negative index {index} into '{}'", slot.prop_name),
            );
            zero_sink(sink);
            return Ok(None);
        }
        let index = index as u32;

        let mut handle = place::array_handle_at(self, frame, &slot);
        let len = self.heap.array(handle).map(|a| a.len()).unwrap_or(0);
        if index >= len {
            match sink {
                Some(out) => {
                    // Read access: reject and leave the sink zeroed.
                    self.script_warn(
                        frame,
                        format!(
                            "index {index} out of bounds for '{}' ({len} elements)",
                            slot.prop_name
                        ),
                    );
                    storage::zero(out, 0, out.len());
                    return Ok(None);
                }
                None => {
                    // Write access: grow through the index, zero-filled.
                    place::resize_array_at(self, frame, &slot, index as i32 + 1);
                    handle = place::array_handle_at(self, frame, &slot);
                }
            }
        }

        let p = ValuePlace {
            root: StoreRoot::Array(handle),
            offset: index * elem.elem_size(),
            kind: elem,
            array_dim: 1,
            bool_mask: 0,
            owner: slot.owner,
            prop_name: slot.prop_name,
        };
        self.deliver(frame, &p, sink);
        Ok(Some(Place::Value(p)))
    }

    /// The switch statement: evaluate the scrutinee, then walk the case
    /// arms until one matches or the default arm is reached.
    fn eval_switch(&mut self, frame: &mut Frame) -> ExecResult<Option<Place>> {
        let size = frame.read_u8()?;
        // Size 0 marks a string scrutinee, compared by text.
        let is_string = size == 0;
        let buf_size = if is_string { 4 } else { size as usize };

        let mut scrutinee = vec![0u8; buf_size];
        self.eval(frame, Some(&mut scrutinee))?;

        loop {
            let arm_at = frame.ip as u32;
            let byte = frame.read_u8()?;
            if Opcode::from_u8(byte) != Some(Opcode::Case) {
                return Err(FatalError::BadOperand(
                    frame.node.name(),
                    arm_at,
                    format!("malformed switch: expected a case arm, found 0x{byte:02X}"),
                ));
            }
            let next = frame.read_u16()?;
            if next == CASE_DEFAULT {
                break;
            }
            let mut candidate = vec![0u8; buf_size];
            self.eval(frame, Some(&mut candidate))?;
            let matched = if is_string {
                let a = storage::read_u32(&scrutinee, 0);
                let b = storage::read_u32(&candidate, 0);
                self.heap.string(a) == self.heap.string(b)
            } else {
                scrutinee == candidate
            };
            if is_string {
                self.heap.free(storage::read_u32(&candidate, 0));
            }
            if matched {
                break;
            }
            self.check_runaway(frame)?;
            frame.jump_to(next);
        }
        if is_string {
            self.heap.free(storage::read_u32(&scrutinee, 0));
        }
        Ok(None)
    }

    /// Member evaluation against another instance. A null or dead context
    /// is diagnosed; the member expression is skipped over and the result
    /// zeroed.
    fn eval_context(&mut self, frame: &mut Frame, sink: Option<&mut [u8]>) -> ExecResult<Option<Place>> {
        let mut buf = [0u8; 4];
        self.eval(frame, Some(&mut buf))?;
        let context = ObjHandle::from_raw(u32::from_le_bytes(buf));
        let skip = frame.read_u16()?;
        let _result_size = frame.read_u8()?;

        if self.objects.get(context).is_none() {
            self.script_warn(frame, "accessed a none context");
            frame.ip += skip as usize;
            zero_sink(sink);
            return Ok(None);
        }

        // The member expression sees the context as its instance; places
        // it resolves carry the context as owner.
        let saved = frame.object;
        frame.object = context;
        let result = self.eval(frame, sink);
        frame.object = saved;
        result
    }

    /// Copy the value at `place` into the sink, if one was passed. Bools
    /// deliver their bit as a whole word.
    fn deliver(&mut self, frame: &mut Frame, p: &ValuePlace, sink: Option<&mut [u8]>) {
        let Some(out) = sink else { return };
        if p.bool_mask != 0 {
            let bit = place::read_bit(self, frame, p);
            storage::write_i32(out, 0, bit as i32);
        } else {
            place::read_value(self, frame, p, out);
        }
    }

    /// True when the cursor sits on the argument-list terminator.
    pub fn next_is_end_parms(&self, frame: &Frame) -> bool {
        frame.peek() == Some(Opcode::EndFunctionParms as u8)
    }

    /// Consume the argument-list terminator. Native handlers call this
    /// after pulling their arguments.
    pub fn consume_end_parms(&mut self, frame: &mut Frame) -> ExecResult<()> {
        let at = frame.ip as u32;
        let byte = frame.read_u8()?;
        if byte != Opcode::EndFunctionParms as u8 {
            return Err(FatalError::BadOperand(
                frame.node.name(),
                at,
                format!("expected end of argument list, found 0x{byte:02X}"),
            ));
        }
        Ok(())
    }

    /// Jump over a `Skip`-wrapped argument without evaluating it, for
    /// short-circuiting natives.
    pub fn skip_argument(&mut self, frame: &mut Frame) -> ExecResult<()> {
        let at = frame.ip as u32;
        let byte = frame.read_u8()?;
        if Opcode::from_u8(byte) != Some(Opcode::Skip) {
            return Err(FatalError::BadOperand(
                frame.node.name(),
                at,
                format!("expected a skip-wrapped argument, found 0x{byte:02X}"),
            ));
        }
        let skip = frame.read_u16()?;
        frame.ip += skip as usize;
        Ok(())
    }
}

fn put_i32(sink: Option<&mut [u8]>, value: i32) {
    if let Some(out) = sink {
        storage::write_i32(out, 0, value);
    }
}

fn zero_sink(sink: Option<&mut [u8]>) {
    if let Some(out) = sink {
        storage::zero(out, 0, out.len());
    }
}
