//! Script heap
//!
//! Strings and dynamic arrays live outside property blocks, in an
//! engine-owned slot arena. Blocks reference them by 4-byte handles; handle
//! 0 is the null value (the empty string, the empty array) and is never
//! allocated. Freed slots are recycled through a free list.
//!
//! The heap itself is untyped bookkeeping. Descriptor-driven construction,
//! deep copy and teardown of the values stored here live in
//! [`crate::storage`].

use crate::property::PropKind;

/// A dynamic array value: element kind plus packed element bytes.
#[derive(Debug, Clone)]
pub struct DynArray {
    /// Element type, fixing the element stride.
    pub elem: PropKind,
    /// `len * elem_size` bytes of packed elements.
    pub data: Vec<u8>,
}

impl DynArray {
    /// Element byte stride.
    pub fn elem_size(&self) -> u32 {
        self.elem.elem_size()
    }

    /// Element count.
    pub fn len(&self) -> u32 {
        debug_assert_eq!(self.data.len() as u32 % self.elem_size(), 0);
        self.data.len() as u32 / self.elem_size()
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A heap-resident value.
#[derive(Debug, Clone)]
pub enum HeapValue {
    /// Script string.
    Str(String),
    /// Script dynamic array.
    Array(DynArray),
}

/// Slot arena for heap values.
///
/// Slot 0 is permanently reserved so that 0 can serve as the null handle.
#[derive(Debug)]
pub struct ScriptHeap {
    slots: Vec<Option<HeapValue>>,
    free: Vec<u32>,
}

impl Default for ScriptHeap {
    fn default() -> Self {
        ScriptHeap {
            slots: vec![None],
            free: Vec::new(),
        }
    }
}

impl ScriptHeap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, value: HeapValue) -> u32 {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(value);
            slot
        } else {
            self.slots.push(Some(value));
            (self.slots.len() - 1) as u32
        }
    }

    /// Store a string, returning its handle. The empty string is canonically
    /// handle 0 and allocates nothing.
    pub fn alloc_string(&mut self, text: impl Into<String>) -> u32 {
        let text = text.into();
        if text.is_empty() {
            0
        } else {
            self.alloc(HeapValue::Str(text))
        }
    }

    /// Store a dynamic array, returning its handle.
    pub fn alloc_array(&mut self, elem: PropKind, data: Vec<u8>) -> u32 {
        self.alloc(HeapValue::Array(DynArray { elem, data }))
    }

    /// The string behind `handle`; handle 0 and stale handles read as empty.
    pub fn string(&self, handle: u32) -> &str {
        match self.get(handle) {
            Some(HeapValue::Str(s)) => s,
            _ => "",
        }
    }

    /// The array behind `handle`, if it is a live array slot.
    pub fn array(&self, handle: u32) -> Option<&DynArray> {
        match self.get(handle) {
            Some(HeapValue::Array(a)) => Some(a),
            _ => None,
        }
    }

    /// Mutable access to the array behind `handle`.
    pub fn array_mut(&mut self, handle: u32) -> Option<&mut DynArray> {
        match self.get_mut(handle) {
            Some(HeapValue::Array(a)) => Some(a),
            _ => None,
        }
    }

    /// The value behind `handle`.
    pub fn get(&self, handle: u32) -> Option<&HeapValue> {
        if handle == 0 {
            return None;
        }
        self.slots.get(handle as usize).and_then(|s| s.as_ref())
    }

    /// Mutable value behind `handle`.
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut HeapValue> {
        if handle == 0 {
            return None;
        }
        self.slots.get_mut(handle as usize).and_then(|s| s.as_mut())
    }

    /// Release a slot, returning its value. The slot becomes reusable.
    pub fn free(&mut self, handle: u32) -> Option<HeapValue> {
        if handle == 0 {
            return None;
        }
        let value = self.slots.get_mut(handle as usize).and_then(|s| s.take());
        if value.is_some() {
            self.free.push(handle);
        }
        value
    }

    /// Duplicate a string slot (shallow clone of the text).
    pub fn dup_string(&mut self, handle: u32) -> u32 {
        match self.get(handle) {
            Some(HeapValue::Str(s)) => {
                let copy = s.clone();
                self.alloc(HeapValue::Str(copy))
            }
            _ => 0,
        }
    }

    /// Number of live (occupied) slots. Useful for leak accounting.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
