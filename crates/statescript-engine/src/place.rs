//! Resolved operands
//!
//! Evaluating an addressable operand produces a [`Place`]: which storage
//! block, at what offset, holding what kind, owned by which instance. The
//! immediately following consumer (assignment, out-parameter capture, bool
//! mutation) commits through it and then drops it; a place is never held
//! across another evaluation without re-checking, so storage that moved or
//! shrank in between (a resized array, a removed instance) is caught at
//! commit time and diagnosed instead of corrupting memory.
//!
//! Sinks obey one ownership rule everywhere: a value read into a sink is a
//! deep copy the sink owns, and a value stored from a scratch buffer is
//! moved out of it (the scratch's handles are nulled).

use statescript_core::{storage, ClassId, Name, ObjHandle, PropKind};

use crate::frame::Frame;
use crate::vm::Vm;

/// The storage block a place addresses into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRoot {
    /// The executing frame's locals block.
    Locals,
    /// A live instance's property block.
    Instance(ObjHandle),
    /// A class's hydrated defaults block. Read-only.
    Defaults(ClassId),
    /// A dynamic array's element storage.
    Array(u32),
}

/// A typed storage location.
#[derive(Debug, Clone)]
pub struct ValuePlace {
    /// Block the offset indexes into.
    pub root: StoreRoot,
    /// Byte offset of the element.
    pub offset: u32,
    /// Element kind at the location.
    pub kind: PropKind,
    /// Declared element count when the place names a whole fixed array;
    /// 1 once an index has been applied.
    pub array_dim: u32,
    /// Bit inside the storage word, when addressing a bool.
    pub bool_mask: u32,
    /// Instance owning the storage, when there is one.
    pub owner: ObjHandle,
    /// Resolved property name, for diagnostics.
    pub prop_name: Name,
}

/// What an addressable operand resolved to.
#[derive(Debug, Clone)]
pub enum Place {
    /// An element slot.
    Value(ValuePlace),
    /// A dynamic array's length pseudo-property. The inner place is the
    /// slot holding the array handle; assigning resizes the array.
    ArrayLength(ValuePlace),
}

impl Place {
    /// The element slot, when this is one.
    pub fn value(self) -> Option<ValuePlace> {
        match self {
            Place::Value(p) => Some(p),
            Place::ArrayLength(_) => None,
        }
    }
}

/// Deep-copy the element at `place` into `out` (which arrives zeroed and
/// owns the result). Stale or short storage is diagnosed and leaves `out`
/// zeroed.
pub(crate) fn read_value(vm: &mut Vm, frame: &mut Frame, place: &ValuePlace, out: &mut [u8]) {
    let size = place.kind.elem_size() as usize;
    let off = place.offset as usize;
    match &place.root {
        StoreRoot::Locals => {
            if off + size <= frame.locals.len() {
                storage::copy_value(&mut vm.heap, &place.kind, &frame.locals, off, out, 0);
                return;
            }
        }
        StoreRoot::Instance(handle) => {
            if let Some(inst) = vm.objects.get_mut(*handle) {
                if off + size <= inst.props.len() {
                    storage::copy_value(&mut vm.heap, &place.kind, &inst.props, off, out, 0);
                    return;
                }
            }
        }
        StoreRoot::Defaults(class_id) => {
            if let Some(block) = vm.class_defaults.get(*class_id as usize) {
                if off + size <= block.len() {
                    storage::copy_value(&mut vm.heap, &place.kind, block, off, out, 0);
                    return;
                }
            }
        }
        StoreRoot::Array(handle) => {
            if let Some(arr) = vm.heap.array_mut(*handle) {
                let mut data = std::mem::take(&mut arr.data);
                let ok = off + size <= data.len();
                if ok {
                    storage::copy_value(&mut vm.heap, &place.kind, &data, off, out, 0);
                }
                if let Some(arr) = vm.heap.array_mut(*handle) {
                    arr.data = data;
                }
                if ok {
                    return;
                }
            }
        }
    }
    vm.script_warn(frame, format!("stale access reading '{}'", place.prop_name));
}

/// Move the element in `src` into `place`: the place's old value is torn
/// down, the bytes are copied, and `src`'s handles are nulled so the caller
/// can discard the scratch without a double free. Writes into defaults and
/// into storage that went stale are diagnosed; the value in `src` is torn
/// down instead of leaking.
pub(crate) fn store_value(vm: &mut Vm, frame: &mut Frame, place: &ValuePlace, src: &mut [u8]) {
    let size = place.kind.elem_size() as usize;
    let off = place.offset as usize;
    let stored = match &place.root {
        StoreRoot::Locals => {
            if off + size <= frame.locals.len() {
                storage::destroy_value(&mut vm.heap, &place.kind, &mut frame.locals, off);
                frame.locals[off..off + size].copy_from_slice(&src[..size]);
                true
            } else {
                false
            }
        }
        StoreRoot::Instance(handle) => match vm.objects.get_mut(*handle) {
            Some(inst) if off + size <= inst.props.len() => {
                storage::destroy_value(&mut vm.heap, &place.kind, &mut inst.props, off);
                inst.props[off..off + size].copy_from_slice(&src[..size]);
                true
            }
            _ => false,
        },
        StoreRoot::Defaults(_) => {
            let name = place.prop_name;
            storage::destroy_value(&mut vm.heap, &place.kind, src, 0);
            vm.script_warn(frame, format!("default property '{name}' is read-only"));
            return;
        }
        StoreRoot::Array(handle) => {
            let handle = *handle;
            match vm.heap.array_mut(handle) {
                Some(arr) => {
                    let mut data = std::mem::take(&mut arr.data);
                    let ok = off + size <= data.len();
                    if ok {
                        storage::destroy_value(&mut vm.heap, &place.kind, &mut data, off);
                        data[off..off + size].copy_from_slice(&src[..size]);
                    }
                    if let Some(arr) = vm.heap.array_mut(handle) {
                        arr.data = data;
                    }
                    ok
                }
                None => false,
            }
        }
    };
    if stored {
        // Ownership moved into the place.
        storage::zero(src, 0, size);
    } else {
        storage::destroy_value(&mut vm.heap, &place.kind, src, 0);
        vm.script_warn(frame, format!("stale access writing '{}'", place.prop_name));
    }
}

/// Test the bool bit at `place`.
pub(crate) fn read_bit(vm: &mut Vm, frame: &mut Frame, place: &ValuePlace) -> bool {
    let off = place.offset as usize;
    match &place.root {
        StoreRoot::Locals => {
            if off + 4 <= frame.locals.len() {
                return storage::read_bit(&frame.locals, off, place.bool_mask);
            }
        }
        StoreRoot::Instance(handle) => {
            if let Some(inst) = vm.objects.get(*handle) {
                if off + 4 <= inst.props.len() {
                    return storage::read_bit(&inst.props, off, place.bool_mask);
                }
            }
        }
        StoreRoot::Defaults(class_id) => {
            if let Some(block) = vm.class_defaults.get(*class_id as usize) {
                if off + 4 <= block.len() {
                    return storage::read_bit(block, off, place.bool_mask);
                }
            }
        }
        StoreRoot::Array(handle) => {
            if let Some(arr) = vm.heap.array(*handle) {
                if off + 4 <= arr.data.len() {
                    return storage::read_bit(&arr.data, off, place.bool_mask);
                }
            }
        }
    }
    vm.script_warn(frame, format!("stale access reading '{}'", place.prop_name));
    false
}

/// Set or clear the bool bit at `place`, touching no other bit of the word.
pub(crate) fn write_bit(vm: &mut Vm, frame: &mut Frame, place: &ValuePlace, value: bool) {
    let off = place.offset as usize;
    match &place.root {
        StoreRoot::Locals => {
            if off + 4 <= frame.locals.len() {
                storage::write_bit(&mut frame.locals, off, place.bool_mask, value);
                return;
            }
        }
        StoreRoot::Instance(handle) => {
            if let Some(inst) = vm.objects.get_mut(*handle) {
                if off + 4 <= inst.props.len() {
                    storage::write_bit(&mut inst.props, off, place.bool_mask, value);
                    return;
                }
            }
        }
        StoreRoot::Defaults(_) => {
            let name = place.prop_name;
            vm.script_warn(frame, format!("default property '{name}' is read-only"));
            return;
        }
        StoreRoot::Array(handle) => {
            if let Some(arr) = vm.heap.array_mut(*handle) {
                if off + 4 <= arr.data.len() {
                    storage::write_bit(&mut arr.data, off, place.bool_mask, value);
                    return;
                }
            }
        }
    }
    vm.script_warn(frame, format!("stale access writing '{}'", place.prop_name));
}

/// Run `op` against the block holding an array slot (a place whose kind is
/// `Array`). Stages the borrows per root; diagnoses writes into defaults
/// and stale storage.
fn with_array_slot<F>(vm: &mut Vm, frame: &mut Frame, slot: &ValuePlace, op: F)
where
    F: FnOnce(&mut statescript_core::ScriptHeap, &mut [u8], usize, &PropKind),
{
    let PropKind::Array(elem) = &slot.kind else {
        vm.script_warn(frame, format!("'{}' is not a dynamic array", slot.prop_name));
        return;
    };
    let elem = (**elem).clone();
    let off = slot.offset as usize;
    match &slot.root {
        StoreRoot::Locals => {
            if off + 4 <= frame.locals.len() {
                op(&mut vm.heap, &mut frame.locals, off, &elem);
                return;
            }
        }
        StoreRoot::Instance(handle) => {
            let handle = *handle;
            if let Some(inst) = vm.objects.get_mut(handle) {
                if off + 4 <= inst.props.len() {
                    let mut block = std::mem::take(&mut inst.props);
                    op(&mut vm.heap, &mut block, off, &elem);
                    if let Some(inst) = vm.objects.get_mut(handle) {
                        inst.props = block;
                    }
                    return;
                }
            }
        }
        StoreRoot::Defaults(_) => {
            let name = slot.prop_name;
            vm.script_warn(frame, format!("default property '{name}' is read-only"));
            return;
        }
        StoreRoot::Array(handle) => {
            let handle = *handle;
            if let Some(arr) = vm.heap.array_mut(handle) {
                let mut data = std::mem::take(&mut arr.data);
                let ok = off + 4 <= data.len();
                if ok {
                    op(&mut vm.heap, &mut data, off, &elem);
                }
                if let Some(arr) = vm.heap.array_mut(handle) {
                    arr.data = data;
                }
                if ok {
                    return;
                }
            }
        }
    }
    vm.script_warn(frame, format!("stale access writing '{}'", slot.prop_name));
}

/// Resize the dynamic array whose handle lives at `slot`, allocating it on
/// first growth.
pub(crate) fn resize_array_at(vm: &mut Vm, frame: &mut Frame, slot: &ValuePlace, new_len: i32) {
    if new_len < 0 {
        let name = slot.prop_name;
        vm.script_warn(frame, format!("negative length {new_len} for '{name}'"));
        return;
    }
    with_array_slot(vm, frame, slot, |heap, block, off, elem| {
        storage::array_resize(heap, block, off, elem, new_len as u32);
    });
}

/// Splice `count` zeroed elements into the array at `slot`, in front of
/// `index` (clamped to the current length).
pub(crate) fn insert_array_at(vm: &mut Vm, frame: &mut Frame, slot: &ValuePlace, index: u32, count: u32) {
    with_array_slot(vm, frame, slot, |heap, block, off, elem| {
        storage::array_insert(heap, block, off, elem, index, count);
    });
}

/// Remove `count` elements from the array at `slot`, tearing each down.
/// The span is clamped to the current length.
pub(crate) fn remove_array_at(vm: &mut Vm, frame: &mut Frame, slot: &ValuePlace, index: u32, count: u32) {
    with_array_slot(vm, frame, slot, |heap, block, off, elem| {
        storage::array_remove(heap, block, off, elem, index, count);
    });
}

/// The current handle stored in an array slot place (0 when unallocated or
/// stale).
pub(crate) fn array_handle_at(vm: &Vm, frame: &Frame, slot: &ValuePlace) -> u32 {
    let off = slot.offset as usize;
    match &slot.root {
        StoreRoot::Locals => {
            if off + 4 <= frame.locals.len() {
                return storage::read_u32(&frame.locals, off);
            }
        }
        StoreRoot::Instance(handle) => {
            if let Some(inst) = vm.objects.get(*handle) {
                if off + 4 <= inst.props.len() {
                    return storage::read_u32(&inst.props, off);
                }
            }
        }
        StoreRoot::Defaults(class_id) => {
            if let Some(block) = vm.class_defaults.get(*class_id as usize) {
                if off + 4 <= block.len() {
                    return storage::read_u32(block, off);
                }
            }
        }
        StoreRoot::Array(handle) => {
            if let Some(arr) = vm.heap.array(*handle) {
                if off + 4 <= arr.data.len() {
                    return storage::read_u32(&arr.data, off);
                }
            }
        }
    }
    0
}
