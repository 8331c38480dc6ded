//! Raw property-block operations
//!
//! Property blocks are plain little-endian byte buffers. The helpers here
//! read and write scalars at descriptor offsets and implement the three
//! descriptor-driven deep operations the engine is built on: construct
//! (zeroed bytes are a valid value of every kind), deep copy, and explicit
//! teardown. Strings and dynamic arrays are owned through heap handles, so
//! copy duplicates handles and teardown releases them; shrinking an array
//! destroys the removed elements in descending index order.
//!
//! Callers guarantee offsets lie inside the block. Place resolution
//! validates that once per access; these helpers index directly.

use crate::heap::{HeapValue, ScriptHeap};
use crate::name::Name;
use crate::property::{PropKind, PropertyDef};

/// Read one byte.
#[inline]
pub fn read_u8(block: &[u8], off: usize) -> u8 {
    block[off]
}

/// Write one byte.
#[inline]
pub fn write_u8(block: &mut [u8], off: usize, value: u8) {
    block[off] = value;
}

/// Read a little-endian i32.
#[inline]
pub fn read_i32(block: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

/// Write a little-endian i32.
#[inline]
pub fn write_i32(block: &mut [u8], off: usize, value: i32) {
    block[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read a little-endian u32.
#[inline]
pub fn read_u32(block: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

/// Write a little-endian u32.
#[inline]
pub fn write_u32(block: &mut [u8], off: usize, value: u32) {
    block[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read a little-endian f32.
#[inline]
pub fn read_f32(block: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

/// Write a little-endian f32.
#[inline]
pub fn write_f32(block: &mut [u8], off: usize, value: f32) {
    block[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read a stored name index. Corrupt indices read as `None`.
#[inline]
pub fn read_name(block: &[u8], off: usize) -> Name {
    Name::from_index(read_u32(block, off)).unwrap_or(Name::NONE)
}

/// Write a name index.
#[inline]
pub fn write_name(block: &mut [u8], off: usize, name: Name) {
    write_u32(block, off, name.index());
}

/// Test a bool bit inside its storage word.
#[inline]
pub fn read_bit(block: &[u8], off: usize, mask: u32) -> bool {
    read_u32(block, off) & mask != 0
}

/// Set or clear a bool bit, leaving every other bit of the word untouched.
#[inline]
pub fn write_bit(block: &mut [u8], off: usize, mask: u32, value: bool) {
    let word = read_u32(block, off);
    let word = if value { word | mask } else { word & !mask };
    write_u32(block, off, word);
}

/// Zero a byte range.
#[inline]
pub fn zero(block: &mut [u8], off: usize, size: usize) {
    block[off..off + size].fill(0);
}

/// Tear down one element of `kind` at `off`, releasing any heap state it
/// owns and nulling its handles. Scalars are left as they are.
pub fn destroy_value(heap: &mut ScriptHeap, kind: &PropKind, block: &mut [u8], off: usize) {
    match kind {
        PropKind::Str => {
            let handle = read_u32(block, off);
            if handle != 0 {
                heap.free(handle);
                write_u32(block, off, 0);
            }
        }
        PropKind::Array(elem) => {
            let handle = read_u32(block, off);
            if handle != 0 {
                if let Some(HeapValue::Array(mut arr)) = heap.free(handle) {
                    if elem.is_constructible() {
                        let esz = arr.elem_size() as usize;
                        let count = arr.len() as usize;
                        for i in (0..count).rev() {
                            destroy_value(heap, elem, &mut arr.data, i * esz);
                        }
                    }
                }
                write_u32(block, off, 0);
            }
        }
        PropKind::Struct(def) => {
            for member in &def.members {
                if member.is_constructible() {
                    let base = off + member.offset as usize;
                    let esz = member.elem_size() as usize;
                    for d in 0..member.array_dim as usize {
                        destroy_value(heap, &member.kind, block, base + d * esz);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Tear down every element of a property slot.
pub fn destroy_property(heap: &mut ScriptHeap, prop: &PropertyDef, block: &mut [u8]) {
    if !prop.is_constructible() {
        return;
    }
    let esz = prop.elem_size() as usize;
    for d in 0..prop.array_dim as usize {
        destroy_value(heap, &prop.kind, block, prop.offset as usize + d * esz);
    }
}

/// Tear down every constructible property of a block.
pub fn destroy_block(heap: &mut ScriptHeap, props: &[PropertyDef], block: &mut [u8]) {
    for prop in props {
        destroy_property(heap, prop, block);
    }
}

fn dup_array(heap: &mut ScriptHeap, handle: u32) -> u32 {
    let (elem, mut data) = match heap.array(handle) {
        Some(arr) => (arr.elem.clone(), arr.data.clone()),
        None => return 0,
    };
    if elem.is_constructible() {
        let esz = elem.elem_size() as usize;
        let count = data.len() / esz;
        for i in 0..count {
            redup_in_place(heap, &elem, &mut data, i * esz);
        }
    }
    heap.alloc_array(elem, data)
}

/// Replace owned handles inside freshly memcpy'd bytes with duplicates, so
/// the bytes no longer alias the source value.
fn redup_in_place(heap: &mut ScriptHeap, kind: &PropKind, block: &mut [u8], off: usize) {
    match kind {
        PropKind::Str => {
            let handle = read_u32(block, off);
            if handle != 0 {
                let dup = heap.dup_string(handle);
                write_u32(block, off, dup);
            }
        }
        PropKind::Array(_) => {
            let handle = read_u32(block, off);
            if handle != 0 {
                let dup = dup_array(heap, handle);
                write_u32(block, off, dup);
            }
        }
        PropKind::Struct(def) => {
            for member in &def.members {
                if member.is_constructible() {
                    let base = off + member.offset as usize;
                    let esz = member.elem_size() as usize;
                    for d in 0..member.array_dim as usize {
                        redup_in_place(heap, &member.kind, block, base + d * esz);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Deep-assign one element from `src` into `dst`: the destination's old
/// value is torn down, and owned handles are duplicated rather than shared.
/// Safe when source and destination are the same slot.
pub fn copy_value(
    heap: &mut ScriptHeap,
    kind: &PropKind,
    src: &[u8],
    src_off: usize,
    dst: &mut [u8],
    dst_off: usize,
) {
    match kind {
        PropKind::Str => {
            let dup = heap.dup_string(read_u32(src, src_off));
            destroy_value(heap, kind, dst, dst_off);
            write_u32(dst, dst_off, dup);
        }
        PropKind::Array(_) => {
            let dup = dup_array(heap, read_u32(src, src_off));
            destroy_value(heap, kind, dst, dst_off);
            write_u32(dst, dst_off, dup);
        }
        PropKind::Struct(def) => {
            for member in &def.members {
                let esz = member.elem_size() as usize;
                for d in 0..member.array_dim as usize {
                    let rel = member.offset as usize + d * esz;
                    copy_value(heap, &member.kind, src, src_off + rel, dst, dst_off + rel);
                }
            }
        }
        _ => {
            let size = kind.elem_size() as usize;
            dst[dst_off..dst_off + size].copy_from_slice(&src[src_off..src_off + size]);
        }
    }
}

/// Deep-assign a whole property slot.
pub fn copy_property(heap: &mut ScriptHeap, prop: &PropertyDef, src: &[u8], dst: &mut [u8]) {
    let esz = prop.elem_size() as usize;
    for d in 0..prop.array_dim as usize {
        let off = prop.offset as usize + d * esz;
        copy_value(heap, &prop.kind, src, off, dst, off);
    }
}

/// Structural equality of two elements. Strings compare by text, arrays by
/// length and elements, structs member by member; scalars by bytes.
pub fn values_equal(
    heap: &ScriptHeap,
    kind: &PropKind,
    a: &[u8],
    a_off: usize,
    b: &[u8],
    b_off: usize,
) -> bool {
    match kind {
        PropKind::Str => heap.string(read_u32(a, a_off)) == heap.string(read_u32(b, b_off)),
        PropKind::Array(elem) => {
            let (la, lb) = (heap.array(read_u32(a, a_off)), heap.array(read_u32(b, b_off)));
            let (da, db) = (
                la.map(|x| x.data.as_slice()).unwrap_or(&[]),
                lb.map(|x| x.data.as_slice()).unwrap_or(&[]),
            );
            if da.len() != db.len() {
                return false;
            }
            let esz = elem.elem_size() as usize;
            (0..da.len() / esz).all(|i| values_equal(heap, elem, da, i * esz, db, i * esz))
        }
        PropKind::Struct(def) => def.members.iter().all(|member| {
            let esz = member.elem_size() as usize;
            (0..member.array_dim as usize).all(|d| {
                let rel = member.offset as usize + d * esz;
                values_equal(heap, &member.kind, a, a_off + rel, b, b_off + rel)
            })
        }),
        _ => {
            let size = kind.elem_size() as usize;
            a[a_off..a_off + size] == b[b_off..b_off + size]
        }
    }
}

/// Resize the dynamic array referenced by the handle at `block[off..]`,
/// allocating it on first growth. New elements are zeroed; removed elements
/// are destroyed in descending index order.
pub fn array_resize(
    heap: &mut ScriptHeap,
    block: &mut [u8],
    off: usize,
    elem: &PropKind,
    new_len: u32,
) {
    let mut handle = read_u32(block, off);
    if handle == 0 {
        if new_len == 0 {
            return;
        }
        handle = heap.alloc_array(elem.clone(), Vec::new());
        write_u32(block, off, handle);
    }
    let esz = elem.elem_size() as usize;
    let Some(arr) = heap.array_mut(handle) else { return };
    let old_len = arr.len();
    if new_len > old_len {
        arr.data.resize(new_len as usize * esz, 0);
    } else if new_len < old_len {
        let mut removed = arr.data.split_off(new_len as usize * esz);
        if elem.is_constructible() {
            let count = removed.len() / esz;
            for i in (0..count).rev() {
                destroy_value(heap, elem, &mut removed, i * esz);
            }
        }
    }
}

/// Splice `count` zeroed elements in front of `index`, clamping `index` to
/// the current length.
pub fn array_insert(
    heap: &mut ScriptHeap,
    block: &mut [u8],
    off: usize,
    elem: &PropKind,
    index: u32,
    count: u32,
) {
    if count == 0 {
        return;
    }
    let mut handle = read_u32(block, off);
    if handle == 0 {
        handle = heap.alloc_array(elem.clone(), Vec::new());
        write_u32(block, off, handle);
    }
    let esz = elem.elem_size() as usize;
    if let Some(arr) = heap.array_mut(handle) {
        let at = index.min(arr.len()) as usize * esz;
        arr.data.splice(at..at, std::iter::repeat(0u8).take(count as usize * esz));
    }
}

/// Remove up to `count` elements starting at `index`, destroying them in
/// descending index order. Out-of-range spans are clamped.
pub fn array_remove(
    heap: &mut ScriptHeap,
    block: &mut [u8],
    off: usize,
    elem: &PropKind,
    index: u32,
    count: u32,
) {
    let handle = read_u32(block, off);
    if handle == 0 || count == 0 {
        return;
    }
    let esz = elem.elem_size() as usize;
    let mut removed = match heap.array_mut(handle) {
        Some(arr) => {
            let len = arr.len();
            if index >= len {
                return;
            }
            let count = count.min(len - index);
            let start = index as usize * esz;
            let end = start + count as usize * esz;
            arr.data.drain(start..end).collect::<Vec<u8>>()
        }
        None => return,
    };
    if elem.is_constructible() {
        let count = removed.len() / esz;
        for i in (0..count).rev() {
            destroy_value(heap, elem, &mut removed, i * esz);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::StructDef;
    use std::sync::Arc;

    fn str_prop(name: &str, offset: u32) -> PropertyDef {
        PropertyDef {
            name: Name::new(name),
            kind: PropKind::Str,
            offset,
            array_dim: 1,
            flags: 0,
            bool_mask: 0,
        }
    }

    #[test]
    fn test_scalar_round_trips() {
        let mut block = vec![0u8; 16];
        write_i32(&mut block, 0, -77);
        write_f32(&mut block, 4, 2.5);
        write_name(&mut block, 8, Name::new("Idle"));
        assert_eq!(read_i32(&block, 0), -77);
        assert_eq!(read_f32(&block, 4), 2.5);
        assert_eq!(read_name(&block, 8), Name::new("Idle"));
    }

    #[test]
    fn test_bit_writes_leave_other_bits_alone() {
        let mut block = vec![0u8; 4];
        write_u32(&mut block, 0, 0xDEAD_0000);
        write_bit(&mut block, 0, 0x0000_0004, true);
        assert!(read_bit(&block, 0, 0x0000_0004));
        assert_eq!(read_u32(&block, 0) & 0xFFFF_0000, 0xDEAD_0000);
        write_bit(&mut block, 0, 0x0000_0004, false);
        assert!(!read_bit(&block, 0, 0x0000_0004));
        assert_eq!(read_u32(&block, 0), 0xDEAD_0000);
    }

    #[test]
    fn test_string_copy_is_deep() {
        let mut heap = ScriptHeap::new();
        let mut src = vec![0u8; 4];
        let mut dst = vec![0u8; 4];
        write_u32(&mut src, 0, heap.alloc_string("hello"));

        copy_value(&mut heap, &PropKind::Str, &src, 0, &mut dst, 0);
        assert_ne!(read_u32(&dst, 0), read_u32(&src, 0));

        destroy_value(&mut heap, &PropKind::Str, &mut src, 0);
        assert_eq!(heap.string(read_u32(&dst, 0)), "hello");
        assert_eq!(read_u32(&src, 0), 0);
    }

    #[test]
    fn test_self_copy_is_safe() {
        let mut heap = ScriptHeap::new();
        let mut block = vec![0u8; 4];
        write_u32(&mut block, 0, heap.alloc_string("same"));
        let snapshot = block.clone();
        copy_value(&mut heap, &PropKind::Str, &snapshot, 0, &mut block, 0);
        assert_eq!(heap.string(read_u32(&block, 0)), "same");
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_destroy_nested_array_of_strings_frees_everything() {
        let mut heap = ScriptHeap::new();
        let kind = PropKind::Array(Box::new(PropKind::Str));
        let mut block = vec![0u8; 4];

        let mut data = vec![0u8; 8];
        write_u32(&mut data, 0, heap.alloc_string("one"));
        write_u32(&mut data, 4, heap.alloc_string("two"));
        let arr = heap.alloc_array(PropKind::Str, data);
        write_u32(&mut block, 0, arr);
        assert_eq!(heap.live_count(), 3);

        destroy_value(&mut heap, &kind, &mut block, 0);
        assert_eq!(heap.live_count(), 0);
        assert_eq!(read_u32(&block, 0), 0);
    }

    #[test]
    fn test_struct_copy_duplicates_member_strings() {
        let mut heap = ScriptHeap::new();
        let def = Arc::new(StructDef {
            name: Name::new("Tag"),
            members: vec![str_prop("Label", 0)],
            size: 4,
        });
        let kind = PropKind::Struct(def);

        let mut src = vec![0u8; 4];
        let mut dst = vec![0u8; 4];
        write_u32(&mut src, 0, heap.alloc_string("tagged"));
        copy_value(&mut heap, &kind, &src, 0, &mut dst, 0);

        destroy_value(&mut heap, &kind, &mut src, 0);
        assert_eq!(heap.string(read_u32(&dst, 0)), "tagged");
    }

    #[test]
    fn test_resize_shrink_destroys_removed_strings() {
        let mut heap = ScriptHeap::new();
        let elem = PropKind::Str;
        let mut block = vec![0u8; 4];

        array_resize(&mut heap, &mut block, 0, &elem, 3);
        let handle = read_u32(&block, 0);
        let s = heap.alloc_string("tail");
        if let Some(arr) = heap.array_mut(handle) {
            write_u32(&mut arr.data, 8, s);
        }
        assert_eq!(heap.live_count(), 2);

        array_resize(&mut heap, &mut block, 0, &elem, 1);
        assert_eq!(heap.array(handle).unwrap().len(), 1);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_resize_zero_on_null_allocates_nothing() {
        let mut heap = ScriptHeap::new();
        let mut block = vec![0u8; 4];
        array_resize(&mut heap, &mut block, 0, &PropKind::Int, 0);
        assert_eq!(read_u32(&block, 0), 0);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_insert_and_remove_splice_elements() {
        let mut heap = ScriptHeap::new();
        let elem = PropKind::Int;
        let mut block = vec![0u8; 4];

        array_resize(&mut heap, &mut block, 0, &elem, 2);
        let handle = read_u32(&block, 0);
        if let Some(arr) = heap.array_mut(handle) {
            write_i32(&mut arr.data, 0, 10);
            write_i32(&mut arr.data, 4, 20);
        }

        array_insert(&mut heap, &mut block, 0, &elem, 1, 2);
        {
            let arr = heap.array(handle).unwrap();
            assert_eq!(arr.len(), 4);
            assert_eq!(read_i32(&arr.data, 0), 10);
            assert_eq!(read_i32(&arr.data, 4), 0);
            assert_eq!(read_i32(&arr.data, 8), 0);
            assert_eq!(read_i32(&arr.data, 12), 20);
        }

        array_remove(&mut heap, &mut block, 0, &elem, 0, 3);
        let arr = heap.array(handle).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(read_i32(&arr.data, 0), 20);
    }

    #[test]
    fn test_values_equal_compares_string_text() {
        let mut heap = ScriptHeap::new();
        let mut a = vec![0u8; 4];
        let mut b = vec![0u8; 4];
        write_u32(&mut a, 0, heap.alloc_string("same"));
        write_u32(&mut b, 0, heap.alloc_string("same"));
        assert!(values_equal(&heap, &PropKind::Str, &a, 0, &b, 0));
        destroy_value(&mut heap, &PropKind::Str, &mut b, 0);
        assert!(!values_equal(&heap, &PropKind::Str, &a, 0, &b, 0));
    }
}
