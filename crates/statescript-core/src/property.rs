//! Property descriptors
//!
//! A property descriptor names a typed slot inside some storage block: an
//! instance's variables, a function's parameters and locals, or a struct's
//! members. Descriptors carry everything the interpreter needs to address
//! raw bytes at runtime: byte offset, element kind (which fixes the element
//! size), fixed-array dimension and flag bits. Values are stored
//! little-endian inside plain byte blocks; strings and dynamic arrays are
//! stored as 4-byte handles into the script heap.

use std::sync::Arc;

use crate::name::Name;

/// Property flag bits.
pub mod flags {
    /// Declared as a function parameter.
    pub const PARM: u32 = 0x0001;
    /// Parameter whose final value is copied back to the caller on return.
    pub const OUT_PARM: u32 = 0x0002;
    /// Parameter holding the function's return value.
    pub const RETURN_PARM: u32 = 0x0004;
    /// Parameter the caller may omit.
    pub const OPTIONAL_PARM: u32 = 0x0008;
    /// Variable participates in replication.
    pub const NET: u32 = 0x0010;
    /// Not assignable from script.
    pub const CONST: u32 = 0x0020;
}

/// The element type of a property.
///
/// Each kind has a fixed element byte size; fixed-size arrays multiply it by
/// the descriptor's dimension.
#[derive(Debug, Clone)]
pub enum PropKind {
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 32-bit integer.
    Int,
    /// One bit inside a shared 32-bit word; see [`PropertyDef::bool_mask`].
    Bool,
    /// 32-bit IEEE float.
    Float,
    /// Interned name index.
    Name,
    /// Instance handle (0 = none).
    Object,
    /// Script-heap string handle (0 = empty).
    Str,
    /// Three packed floats (x, y, z).
    Vector,
    /// Three packed 32-bit angle words (pitch, yaw, roll).
    Rotator,
    /// Inline aggregate of member properties.
    Struct(Arc<StructDef>),
    /// Script-heap dynamic array handle; the boxed kind describes elements.
    Array(Box<PropKind>),
}

impl PropKind {
    /// Byte size of a single element of this kind.
    pub fn elem_size(&self) -> u32 {
        match self {
            PropKind::Byte => 1,
            PropKind::Int | PropKind::Bool | PropKind::Float => 4,
            PropKind::Name | PropKind::Object | PropKind::Str => 4,
            PropKind::Vector | PropKind::Rotator => 12,
            PropKind::Struct(def) => def.size,
            PropKind::Array(_) => 4,
        }
    }

    /// Required alignment when laying the kind out in a block.
    pub fn alignment(&self) -> u32 {
        match self {
            PropKind::Byte => 1,
            _ => 4,
        }
    }

    /// True when values of this kind own heap state that must be explicitly
    /// constructed, deep-copied and destroyed (directly or via a member).
    pub fn is_constructible(&self) -> bool {
        match self {
            PropKind::Str | PropKind::Array(_) => true,
            PropKind::Struct(def) => def.members.iter().any(|m| m.kind.is_constructible()),
            _ => false,
        }
    }
}

/// A typed slot inside a storage block.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    /// Declared identifier.
    pub name: Name,
    /// Element type.
    pub kind: PropKind,
    /// Byte offset of element 0 inside the owning block.
    pub offset: u32,
    /// Fixed-array dimension; 1 for ordinary variables.
    pub array_dim: u32,
    /// Bits from [`flags`].
    pub flags: u32,
    /// For [`PropKind::Bool`]: the single set bit inside the storage word.
    /// Zero for every other kind.
    pub bool_mask: u32,
}

impl PropertyDef {
    /// Byte size of one element.
    pub fn elem_size(&self) -> u32 {
        self.kind.elem_size()
    }

    /// Byte size of the whole slot (element size times dimension).
    pub fn total_size(&self) -> u32 {
        self.kind.elem_size() * self.array_dim
    }

    /// True when the slot owns heap state needing explicit teardown.
    pub fn is_constructible(&self) -> bool {
        self.kind.is_constructible()
    }

    /// True when the given flag bits are all present.
    pub fn has_flag(&self, bits: u32) -> bool {
        self.flags & bits == bits
    }

    /// Declared as a parameter.
    pub fn is_parm(&self) -> bool {
        self.has_flag(flags::PARM)
    }

    /// Copied back to the caller after the body runs.
    pub fn is_out_parm(&self) -> bool {
        self.has_flag(flags::PARM | flags::OUT_PARM)
    }

    /// Holds the function's return value.
    pub fn is_return_parm(&self) -> bool {
        self.has_flag(flags::PARM | flags::RETURN_PARM)
    }

    /// May be omitted at the call site.
    pub fn is_optional(&self) -> bool {
        self.has_flag(flags::OPTIONAL_PARM)
    }
}

/// An inline aggregate type.
///
/// Member offsets are relative to the struct's own base; `size` is the
/// aligned total, so structs nest and array over cleanly.
#[derive(Debug)]
pub struct StructDef {
    /// Declared identifier.
    pub name: Name,
    /// Members in declaration order, offsets precomputed.
    pub members: Vec<PropertyDef>,
    /// Aligned total byte size.
    pub size: u32,
}

impl StructDef {
    /// Find a member by name.
    pub fn find_member(&self, name: Name) -> Option<&PropertyDef> {
        self.members.iter().find(|m| m.name == name)
    }

    /// True when any member owns heap state.
    pub fn is_constructible(&self) -> bool {
        self.members.iter().any(|m| m.kind.is_constructible())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: &str, kind: PropKind, offset: u32) -> PropertyDef {
        PropertyDef {
            name: Name::new(name),
            kind,
            offset,
            array_dim: 1,
            flags: 0,
            bool_mask: 0,
        }
    }

    #[test]
    fn test_elem_sizes() {
        assert_eq!(PropKind::Byte.elem_size(), 1);
        assert_eq!(PropKind::Int.elem_size(), 4);
        assert_eq!(PropKind::Bool.elem_size(), 4);
        assert_eq!(PropKind::Name.elem_size(), 4);
        assert_eq!(PropKind::Vector.elem_size(), 12);
        assert_eq!(PropKind::Rotator.elem_size(), 12);
        assert_eq!(PropKind::Array(Box::new(PropKind::Vector)).elem_size(), 4);
    }

    #[test]
    fn test_total_size_multiplies_dimension() {
        let mut prop = plain("Slots", PropKind::Int, 0);
        prop.array_dim = 8;
        assert_eq!(prop.total_size(), 32);
    }

    #[test]
    fn test_constructible_propagates_through_structs() {
        let inner = Arc::new(StructDef {
            name: Name::new("Inner"),
            members: vec![plain("Text", PropKind::Str, 0)],
            size: 4,
        });
        let holder = Arc::new(StructDef {
            name: Name::new("Holder"),
            members: vec![plain("Nested", PropKind::Struct(inner), 0)],
            size: 4,
        });
        assert!(PropKind::Struct(holder).is_constructible());

        let flat = Arc::new(StructDef {
            name: Name::new("Flat"),
            members: vec![plain("X", PropKind::Float, 0), plain("Y", PropKind::Float, 4)],
            size: 8,
        });
        assert!(!PropKind::Struct(flat).is_constructible());
    }

    #[test]
    fn test_parm_flag_helpers() {
        let mut prop = plain("Amount", PropKind::Int, 0);
        prop.flags = flags::PARM | flags::OUT_PARM;
        assert!(prop.is_parm());
        assert!(prop.is_out_parm());
        assert!(!prop.is_return_parm());
        assert!(!prop.is_optional());
    }
}
