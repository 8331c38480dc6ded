//! Bytecode tokens
//!
//! A statement or expression starts with one opcode byte. Multi-byte
//! immediates are little-endian; string immediates are NUL-terminated; jump
//! targets are absolute 16-bit offsets into the owning descriptor's code.
//!
//! The byte space is split in three:
//! - `0x00..=0x2F`: the closed core set below, decoded via [`Opcode::from_u8`].
//!   Anything undecodable in this range is a fatal error.
//! - `0x60..=0x6F`: extended-native prefix, combining with the following
//!   byte into a 12-bit native index.
//! - `0x70..=0xFF`: direct native dispatch, index = the byte itself.

/// First byte of the extended-native prefix range.
pub const EXTENDED_NATIVE_FIRST: u8 = 0x60;
/// Last byte of the extended-native prefix range.
pub const EXTENDED_NATIVE_LAST: u8 = 0x6F;
/// First directly-encodable native index.
pub const NATIVE_FIRST: u8 = 0x70;
/// Size of the native dispatch table (12-bit index space).
pub const MAX_NATIVES: usize = 0x1000;
/// `Case` immediate marking the default arm.
pub const CASE_DEFAULT: u16 = 0xFFFF;

/// Core opcode set.
///
/// Organized by category:
/// - 0x00-0x07: Operand addressing
/// - 0x08-0x17: Control flow and assignment
/// - 0x18-0x26: Constants
/// - 0x27-0x2F: Calls, casts and array mutation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Operand addressing (0x00-0x07) =====
    /// Frame variable. `[prop: u16]`
    LocalVariable = 0x00,
    /// Instance variable of the context object. `[prop: u16]`
    InstanceVariable = 0x01,
    /// Read-only view of the class defaults. `[prop: u16]`
    DefaultVariable = 0x02,
    /// Member of a struct value. `[struct: u16][member: u16][owner expr]`
    StructMember = 0x03,
    /// Fixed-array element, index clamped into range. `[index expr][base operand]`
    ArrayElement = 0x04,
    /// Dynamic-array element. `[index expr][array operand]`
    DynArrayElement = 0x05,
    /// Dynamic-array length pseudo-property. `[array operand]`
    DynArrayLength = 0x06,
    /// Bool bitfield wrapper around a variable operand. `[inner operand]`
    BoolVariable = 0x07,

    // ===== Control flow and assignment (0x08-0x17) =====
    /// End the body, evaluating the return expression. `[expr]`
    Return = 0x08,
    /// Clear the state cursor; state code stops.
    Stop = 0x09,
    /// Unconditional jump. `[dest: u16]`
    Jump = 0x0A,
    /// Jump when the condition is false. `[dest: u16][cond expr]`
    JumpIfNot = 0x0B,
    /// Evaluate the scrutinee into a compare buffer. `[size: u8][expr]`
    Switch = 0x0C,
    /// One switch arm. `[next: u16][match expr]`; `next` = 0xFFFF is default.
    Case = 0x0D,
    /// Redirect the state cursor to a label. `[name expr]`
    GotoLabel = 0x0E,
    /// Diagnose when the condition is false. `[line: u16][cond expr]`
    Assert = 0x0F,
    /// No effect; also the empty expression.
    Nothing = 0x10,
    /// Update the frame's diagnostic line. `[line: u16]`
    LineNumber = 0x11,
    /// Terminates a call's argument list.
    EndFunctionParms = 0x12,
    /// Short-circuit marker: offset past the wrapped expression. `[skip: u16][expr]`
    Skip = 0x13,
    /// Evaluate a member expression against another instance.
    /// `[object expr][skip: u16][size: u8][member expr]`
    Context = 0x14,
    /// The frame's own instance.
    SelfObject = 0x15,
    /// Assignment. `[place operand][rhs expr]`
    Let = 0x16,
    /// Bool assignment through the bitfield mask. `[bool operand][rhs expr]`
    LetBool = 0x17,

    // ===== Constants (0x18-0x26) =====
    /// Integer literal 0.
    IntZero = 0x18,
    /// Integer literal 1.
    IntOne = 0x19,
    /// Bool literal true.
    True = 0x1A,
    /// Bool literal false.
    False = 0x1B,
    /// Integer literal. `[value: i32]`
    IntConst = 0x1C,
    /// Small integer literal. `[value: u8]`
    IntConstByte = 0x1D,
    /// Byte literal. `[value: u8]`
    ByteConst = 0x1E,
    /// Float literal. `[value: f32]`
    FloatConst = 0x1F,
    /// String literal. `[bytes…, 0x00]`
    StringConst = 0x20,
    /// UTF-16 string literal. `[u16s…, 0x0000]`
    UnicodeStringConst = 0x21,
    /// Name literal. `[index: u32]`
    NameConst = 0x22,
    /// Vector literal. `[x: f32][y: f32][z: f32]`
    VectorConst = 0x23,
    /// Rotator literal. `[pitch: i32][yaw: i32][roll: i32]`
    RotatorConst = 0x24,
    /// Instance reference literal. `[handle: u32]`
    ObjectConst = 0x25,
    /// The null instance reference.
    NoObject = 0x26,

    // ===== Calls, casts and array mutation (0x27-0x2F) =====
    /// Call by name through state and class overrides. `[name: u32][args…]`
    VirtualFunction = 0x27,
    /// Call a directly-bound function. `[class: u16][fn: u16][args…]`
    FinalFunction = 0x28,
    /// Call by name skipping state overrides. `[name: u32][args…]`
    GlobalFunction = 0x29,
    /// Value conversion. `[conv: u8][expr]`
    PrimitiveCast = 0x2A,
    /// Class-checked instance conversion. `[class: u16][expr]`
    DynamicCast = 0x2B,
    /// Struct equality. `[struct: u16][a expr][b expr]`
    StructCmpEq = 0x2C,
    /// Struct inequality. `[struct: u16][a expr][b expr]`
    StructCmpNe = 0x2D,
    /// Insert zeroed elements. `[array operand][index expr][count expr]`
    DynArrayInsert = 0x2E,
    /// Remove elements. `[array operand][index expr][count expr]`
    DynArrayRemove = 0x2F,
}

impl Opcode {
    /// Decode a core opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Opcode::LocalVariable),
            0x01 => Some(Opcode::InstanceVariable),
            0x02 => Some(Opcode::DefaultVariable),
            0x03 => Some(Opcode::StructMember),
            0x04 => Some(Opcode::ArrayElement),
            0x05 => Some(Opcode::DynArrayElement),
            0x06 => Some(Opcode::DynArrayLength),
            0x07 => Some(Opcode::BoolVariable),
            0x08 => Some(Opcode::Return),
            0x09 => Some(Opcode::Stop),
            0x0A => Some(Opcode::Jump),
            0x0B => Some(Opcode::JumpIfNot),
            0x0C => Some(Opcode::Switch),
            0x0D => Some(Opcode::Case),
            0x0E => Some(Opcode::GotoLabel),
            0x0F => Some(Opcode::Assert),
            0x10 => Some(Opcode::Nothing),
            0x11 => Some(Opcode::LineNumber),
            0x12 => Some(Opcode::EndFunctionParms),
            0x13 => Some(Opcode::Skip),
            0x14 => Some(Opcode::Context),
            0x15 => Some(Opcode::SelfObject),
            0x16 => Some(Opcode::Let),
            0x17 => Some(Opcode::LetBool),
            0x18 => Some(Opcode::IntZero),
            0x19 => Some(Opcode::IntOne),
            0x1A => Some(Opcode::True),
            0x1B => Some(Opcode::False),
            0x1C => Some(Opcode::IntConst),
            0x1D => Some(Opcode::IntConstByte),
            0x1E => Some(Opcode::ByteConst),
            0x1F => Some(Opcode::FloatConst),
            0x20 => Some(Opcode::StringConst),
            0x21 => Some(Opcode::UnicodeStringConst),
            0x22 => Some(Opcode::NameConst),
            0x23 => Some(Opcode::VectorConst),
            0x24 => Some(Opcode::RotatorConst),
            0x25 => Some(Opcode::ObjectConst),
            0x26 => Some(Opcode::NoObject),
            0x27 => Some(Opcode::VirtualFunction),
            0x28 => Some(Opcode::FinalFunction),
            0x29 => Some(Opcode::GlobalFunction),
            0x2A => Some(Opcode::PrimitiveCast),
            0x2B => Some(Opcode::DynamicCast),
            0x2C => Some(Opcode::StructCmpEq),
            0x2D => Some(Opcode::StructCmpNe),
            0x2E => Some(Opcode::DynArrayInsert),
            0x2F => Some(Opcode::DynArrayRemove),
            _ => None,
        }
    }
}

/// Conversion codes, the immediate of [`Opcode::PrimitiveCast`].
///
/// A distinct byte space from opcodes. The set is closed at build time;
/// undecodable codes are fatal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// byte -> int
    ByteToInt = 0x01,
    /// byte -> bool
    ByteToBool = 0x02,
    /// byte -> float
    ByteToFloat = 0x03,
    /// int -> byte (truncating)
    IntToByte = 0x04,
    /// int -> bool
    IntToBool = 0x05,
    /// int -> float
    IntToFloat = 0x06,
    /// bool -> byte
    BoolToByte = 0x07,
    /// bool -> int
    BoolToInt = 0x08,
    /// bool -> float
    BoolToFloat = 0x09,
    /// float -> byte (truncating)
    FloatToByte = 0x0A,
    /// float -> int (truncating)
    FloatToInt = 0x0B,
    /// float -> bool
    FloatToBool = 0x0C,
    /// object -> bool (non-null test)
    ObjectToBool = 0x0D,
    /// name -> bool (non-'None' test)
    NameToBool = 0x0E,
    /// string -> byte (parse)
    StringToByte = 0x0F,
    /// string -> int (parse)
    StringToInt = 0x10,
    /// string -> bool (parse)
    StringToBool = 0x11,
    /// string -> float (parse)
    StringToFloat = 0x12,
    /// string -> name (intern)
    StringToName = 0x13,
    /// byte -> string
    ByteToString = 0x14,
    /// int -> string
    IntToString = 0x15,
    /// bool -> string
    BoolToString = 0x16,
    /// float -> string
    FloatToString = 0x17,
    /// object -> string (instance name)
    ObjectToString = 0x18,
    /// name -> string (spelling)
    NameToString = 0x19,
    /// vector -> bool (non-zero test)
    VectorToBool = 0x1A,
    /// vector -> string
    VectorToString = 0x1B,
    /// vector -> rotator
    VectorToRotator = 0x1C,
    /// rotator -> bool (non-zero test)
    RotatorToBool = 0x1D,
    /// rotator -> string
    RotatorToString = 0x1E,
    /// rotator -> vector
    RotatorToVector = 0x1F,
    /// string -> vector (parse)
    StringToVector = 0x20,
    /// string -> rotator (parse)
    StringToRotator = 0x21,
}

impl Conversion {
    /// Decode a conversion code.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Conversion::ByteToInt),
            0x02 => Some(Conversion::ByteToBool),
            0x03 => Some(Conversion::ByteToFloat),
            0x04 => Some(Conversion::IntToByte),
            0x05 => Some(Conversion::IntToBool),
            0x06 => Some(Conversion::IntToFloat),
            0x07 => Some(Conversion::BoolToByte),
            0x08 => Some(Conversion::BoolToInt),
            0x09 => Some(Conversion::BoolToFloat),
            0x0A => Some(Conversion::FloatToByte),
            0x0B => Some(Conversion::FloatToInt),
            0x0C => Some(Conversion::FloatToBool),
            0x0D => Some(Conversion::ObjectToBool),
            0x0E => Some(Conversion::NameToBool),
            0x0F => Some(Conversion::StringToByte),
            0x10 => Some(Conversion::StringToInt),
            0x11 => Some(Conversion::StringToBool),
            0x12 => Some(Conversion::StringToFloat),
            0x13 => Some(Conversion::StringToName),
            0x14 => Some(Conversion::ByteToString),
            0x15 => Some(Conversion::IntToString),
            0x16 => Some(Conversion::BoolToString),
            0x17 => Some(Conversion::FloatToString),
            0x18 => Some(Conversion::ObjectToString),
            0x19 => Some(Conversion::NameToString),
            0x1A => Some(Conversion::VectorToBool),
            0x1B => Some(Conversion::VectorToString),
            0x1C => Some(Conversion::VectorToRotator),
            0x1D => Some(Conversion::RotatorToBool),
            0x1E => Some(Conversion::RotatorToString),
            0x1F => Some(Conversion::RotatorToVector),
            0x20 => Some(Conversion::StringToVector),
            0x21 => Some(Conversion::StringToRotator),
            _ => None,
        }
    }
}

/// Split an extended-native prefix byte and its follower into a native index.
#[inline]
pub fn extended_native_index(prefix: u8, follower: u8) -> u16 {
    (((prefix & 0x0F) as u16) << 8) | follower as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_core_opcodes() {
        for byte in 0x00..=0x2Fu8 {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn test_gap_bytes_do_not_decode() {
        for byte in 0x30..EXTENDED_NATIVE_FIRST {
            assert!(Opcode::from_u8(byte).is_none());
        }
    }

    #[test]
    fn test_extended_native_index_combines_nibble_and_byte() {
        assert_eq!(extended_native_index(0x60, 0x05), 0x005);
        assert_eq!(extended_native_index(0x61, 0x00), 0x100);
        assert_eq!(extended_native_index(0x6F, 0xFF), 0xFFF);
        assert_eq!(usize::from(extended_native_index(0x6F, 0xFF)) + 1, MAX_NATIVES);
    }

    #[test]
    fn test_conversion_round_trip() {
        for byte in 0x01..=0x21u8 {
            let conv = Conversion::from_u8(byte).unwrap();
            assert_eq!(conv as u8, byte);
        }
        assert!(Conversion::from_u8(0x00).is_none());
        assert!(Conversion::from_u8(0x22).is_none());
    }
}
