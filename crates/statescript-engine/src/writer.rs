//! Bytecode assembly
//!
//! A thin assembler over the statement encoding: scalar emitters for
//! immediates, composed emitters for operands and statements, and
//! placeholder jump targets patched once the destination is known.
//! Hosts use it to build function bodies and state code for the
//! descriptor builders; the tests in this crate assemble their fixtures
//! with it.

use statescript_core::{Name, ObjHandle};

use crate::opcode::{Conversion, Opcode, CASE_DEFAULT, MAX_NATIVES, NATIVE_FIRST};

/// An unresolved u16 code offset returned by the jump emitters. Resolve
/// with [`BytecodeWriter::patch`] (absolute targets) or
/// [`BytecodeWriter::end_skip`] (lengths of a wrapped expression).
#[derive(Debug, Clone, Copy)]
#[must_use = "an unpatched placeholder jumps to 0xFFFF"]
pub struct Fixup {
    at: usize,
    base: usize,
}

/// Statement-stream assembler.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    code: Vec<u8>,
    labels: Vec<(Name, u32)>,
}

impl BytecodeWriter {
    /// Start an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// The assembled bytes.
    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    /// The assembled bytes together with the marked label table, for
    /// state and class code.
    pub fn into_parts(self) -> (Vec<u8>, Vec<(Name, u32)>) {
        (self.code, self.labels)
    }

    /// Current offset, the target of the next emitted byte.
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Record a label at the current offset.
    pub fn mark(&mut self, name: Name) -> u32 {
        let at = self.here();
        self.labels.push((name, at));
        at
    }

    // ===== Scalar emitters =====

    /// Emit a bare opcode byte.
    pub fn op(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    /// Emit a raw byte.
    pub fn raw_u8(&mut self, value: u8) {
        self.code.push(value);
    }

    /// Emit a raw little-endian u16.
    pub fn raw_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a raw little-endian u32.
    pub fn raw_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a raw little-endian i32.
    pub fn raw_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a name index immediate.
    pub fn raw_name(&mut self, name: Name) {
        self.raw_u32(name.index());
    }

    // ===== Operands =====

    /// Local or parameter operand by frame property index.
    pub fn local(&mut self, index: u16) {
        self.op(Opcode::LocalVariable);
        self.raw_u16(index);
    }

    /// Instance property operand by class property index.
    pub fn instance_var(&mut self, index: u16) {
        self.op(Opcode::InstanceVariable);
        self.raw_u16(index);
    }

    /// Class-default property operand by class property index.
    pub fn default_var(&mut self, index: u16) {
        self.op(Opcode::DefaultVariable);
        self.raw_u16(index);
    }

    /// Struct member access; the owner expression follows.
    pub fn struct_member(&mut self, struct_id: u16, member: u16) {
        self.op(Opcode::StructMember);
        self.raw_u16(struct_id);
        self.raw_u16(member);
    }

    /// Fixed-array element; the index expression then the base operand
    /// follow.
    pub fn array_element(&mut self) {
        self.op(Opcode::ArrayElement);
    }

    /// Dynamic-array element; the index expression then the array operand
    /// follow.
    pub fn dyn_element(&mut self) {
        self.op(Opcode::DynArrayElement);
    }

    /// Dynamic-array length pseudo-variable; the array operand follows.
    pub fn array_len(&mut self) {
        self.op(Opcode::DynArrayLength);
    }

    /// Bool wrapper; the wrapped operand follows.
    pub fn bool_var(&mut self) {
        self.op(Opcode::BoolVariable);
    }

    // ===== Constants =====

    /// Integer constant in its smallest encoding.
    pub fn int_const(&mut self, value: i32) {
        match value {
            0 => self.op(Opcode::IntZero),
            1 => self.op(Opcode::IntOne),
            2..=255 => {
                self.op(Opcode::IntConstByte);
                self.raw_u8(value as u8);
            }
            _ => {
                self.op(Opcode::IntConst);
                self.raw_i32(value);
            }
        }
    }

    /// Byte constant.
    pub fn byte_const(&mut self, value: u8) {
        self.op(Opcode::ByteConst);
        self.raw_u8(value);
    }

    /// Float constant.
    pub fn float_const(&mut self, value: f32) {
        self.op(Opcode::FloatConst);
        self.raw_u32(value.to_bits());
    }

    /// Bool constant.
    pub fn bool_const(&mut self, value: bool) {
        self.op(if value { Opcode::True } else { Opcode::False });
    }

    /// Name constant.
    pub fn name_const(&mut self, name: Name) {
        self.op(Opcode::NameConst);
        self.raw_name(name);
    }

    /// 8-bit string constant, NUL-terminated in the stream.
    pub fn string_const(&mut self, text: &str) {
        self.op(Opcode::StringConst);
        self.code.extend_from_slice(text.as_bytes());
        self.code.push(0);
    }

    /// UTF-16 string constant, NUL-terminated in the stream.
    pub fn unicode_const(&mut self, text: &str) {
        self.op(Opcode::UnicodeStringConst);
        for unit in text.encode_utf16() {
            self.raw_u16(unit);
        }
        self.raw_u16(0);
    }

    /// Object reference constant; the null handle encodes as `NoObject`.
    pub fn object_const(&mut self, handle: ObjHandle) {
        if handle.is_none() {
            self.op(Opcode::NoObject);
        } else {
            self.op(Opcode::ObjectConst);
            self.raw_u32(handle.raw());
        }
    }

    /// The executing instance.
    pub fn self_object(&mut self) {
        self.op(Opcode::SelfObject);
    }

    /// Vector constant.
    pub fn vector_const(&mut self, x: f32, y: f32, z: f32) {
        self.op(Opcode::VectorConst);
        for part in [x, y, z] {
            self.raw_u32(part.to_bits());
        }
    }

    /// Rotator constant.
    pub fn rotator_const(&mut self, pitch: i32, yaw: i32, roll: i32) {
        self.op(Opcode::RotatorConst);
        for part in [pitch, yaw, roll] {
            self.raw_i32(part);
        }
    }

    // ===== Statements =====

    /// Assignment; the target expression then the value expression follow.
    pub fn assign(&mut self) {
        self.op(Opcode::Let);
    }

    /// Bool assignment; target then value follow.
    pub fn assign_bool(&mut self) {
        self.op(Opcode::LetBool);
    }

    /// Return; the value expression (or `nothing` for void) follows.
    pub fn ret(&mut self) {
        self.op(Opcode::Return);
    }

    /// Stop state code.
    pub fn stop(&mut self) {
        self.op(Opcode::Stop);
    }

    /// No-op.
    pub fn nothing(&mut self) {
        self.op(Opcode::Nothing);
    }

    /// Source line marker.
    pub fn line(&mut self, line: u16) {
        self.op(Opcode::LineNumber);
        self.raw_u16(line);
    }

    /// Assertion; the condition expression follows.
    pub fn assert_line(&mut self, line: u16) {
        self.op(Opcode::Assert);
        self.raw_u16(line);
    }

    /// Label jump; the label name expression follows.
    pub fn goto_label(&mut self) {
        self.op(Opcode::GotoLabel);
    }

    // ===== Jumps =====

    /// Unconditional jump to a placeholder target.
    pub fn jump(&mut self) -> Fixup {
        self.op(Opcode::Jump);
        self.placeholder(0)
    }

    /// Unconditional jump to a known offset.
    pub fn jump_back(&mut self, dest: u32) {
        self.op(Opcode::Jump);
        self.raw_u16(checked_u16(dest));
    }

    /// Conditional jump to a placeholder target; the condition expression
    /// follows.
    pub fn jump_if_not(&mut self) -> Fixup {
        self.op(Opcode::JumpIfNot);
        self.placeholder(0)
    }

    /// Resolve a placeholder to the current offset.
    pub fn patch(&mut self, fixup: Fixup) {
        let dest = checked_u16(self.here());
        self.code[fixup.at..fixup.at + 2].copy_from_slice(&dest.to_le_bytes());
    }

    /// Resolve a placeholder to an explicit offset.
    pub fn patch_to(&mut self, fixup: Fixup, dest: u32) {
        let dest = checked_u16(dest);
        self.code[fixup.at..fixup.at + 2].copy_from_slice(&dest.to_le_bytes());
    }

    /// Close a skip-style placeholder: the stored count becomes the number
    /// of bytes between the placeholder's operand area and the current
    /// offset.
    pub fn end_skip(&mut self, fixup: Fixup) {
        let span = checked_u16((self.code.len() - fixup.base) as u32);
        self.code[fixup.at..fixup.at + 2].copy_from_slice(&span.to_le_bytes());
    }

    // ===== Switch =====

    /// Switch statement; `size` is the scrutinee's byte size, 0 for
    /// string scrutinees. The scrutinee expression follows.
    pub fn switch(&mut self, size: u8) {
        self.op(Opcode::Switch);
        self.raw_u8(size);
    }

    /// Case arm with a placeholder next-arm target; the match expression
    /// then the arm's statements follow. Patch to the next arm's offset.
    pub fn case(&mut self) -> Fixup {
        self.op(Opcode::Case);
        self.placeholder(0)
    }

    /// The default arm.
    pub fn case_default(&mut self) {
        self.op(Opcode::Case);
        self.raw_u16(CASE_DEFAULT);
    }

    // ===== Calls and casts =====

    /// By-name call bound through the active state chain; arguments and
    /// [`BytecodeWriter::end_parms`] follow.
    pub fn virtual_call(&mut self, name: Name) {
        self.op(Opcode::VirtualFunction);
        self.raw_name(name);
    }

    /// By-name call skipping state overrides.
    pub fn global_call(&mut self, name: Name) {
        self.op(Opcode::GlobalFunction);
        self.raw_name(name);
    }

    /// Direct-bound call by class id and function index.
    pub fn final_call(&mut self, class: u16, function: u16) {
        self.op(Opcode::FinalFunction);
        self.raw_u16(class);
        self.raw_u16(function);
    }

    /// Native call in its smallest encoding: one byte for slots in the
    /// single-byte range, a prefixed pair otherwise.
    pub fn native_call(&mut self, index: u16) {
        assert!((index as usize) < MAX_NATIVES, "native slot {index} out of range");
        if index >= NATIVE_FIRST as u16 && index <= 0xFF {
            self.raw_u8(index as u8);
        } else {
            self.raw_u8(0x60 | (index >> 8) as u8);
            self.raw_u8((index & 0xFF) as u8);
        }
    }

    /// Argument-list terminator.
    pub fn end_parms(&mut self) {
        self.op(Opcode::EndFunctionParms);
    }

    /// Skip wrapper for a short-circuitable argument; the wrapped
    /// expression follows, closed with [`BytecodeWriter::end_skip`].
    pub fn skip_arg(&mut self) -> Fixup {
        self.op(Opcode::Skip);
        self.placeholder(0)
    }

    /// Member evaluation against another instance. The context object
    /// expression precedes this; the member expression follows, closed
    /// with [`BytecodeWriter::end_skip`] so a null context can hop it.
    pub fn context_member(&mut self, result_size: u8) -> Fixup {
        let fixup = self.placeholder(1);
        self.raw_u8(result_size);
        fixup
    }

    /// Context operator; the object expression follows, then
    /// [`BytecodeWriter::context_member`].
    pub fn context(&mut self) {
        self.op(Opcode::Context);
    }

    /// Primitive conversion; the source expression follows.
    pub fn cast(&mut self, conv: Conversion) {
        self.op(Opcode::PrimitiveCast);
        self.raw_u8(conv as u8);
    }

    /// Checked downcast to a class by registry id; the object expression
    /// follows.
    pub fn dynamic_cast(&mut self, class: u16) {
        self.op(Opcode::DynamicCast);
        self.raw_u16(class);
    }

    /// Struct equality; both operand expressions follow.
    pub fn struct_eq(&mut self, struct_id: u16) {
        self.op(Opcode::StructCmpEq);
        self.raw_u16(struct_id);
    }

    /// Struct inequality; both operand expressions follow.
    pub fn struct_ne(&mut self, struct_id: u16) {
        self.op(Opcode::StructCmpNe);
        self.raw_u16(struct_id);
    }

    /// Dynamic-array insert; the array operand, index expression and
    /// count expression follow.
    pub fn dyn_insert(&mut self) {
        self.op(Opcode::DynArrayInsert);
    }

    /// Dynamic-array remove; the array operand, index expression and
    /// count expression follow.
    pub fn dyn_remove(&mut self) {
        self.op(Opcode::DynArrayRemove);
    }

    fn placeholder(&mut self, trailing: usize) -> Fixup {
        let at = self.code.len();
        self.raw_u16(0xFFFF);
        Fixup { at, base: at + 2 + trailing }
    }
}

fn checked_u16(value: u32) -> u16 {
    assert!(value <= u16::MAX as u32, "code offset {value} exceeds the u16 jump range");
    value as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_const_picks_smallest_encoding() {
        let mut w = BytecodeWriter::new();
        w.int_const(0);
        w.int_const(1);
        w.int_const(200);
        w.int_const(-5);
        let code = w.finish();
        assert_eq!(code[0], Opcode::IntZero as u8);
        assert_eq!(code[1], Opcode::IntOne as u8);
        assert_eq!(code[2], Opcode::IntConstByte as u8);
        assert_eq!(code[3], 200);
        assert_eq!(code[4], Opcode::IntConst as u8);
        assert_eq!(i32::from_le_bytes(code[5..9].try_into().unwrap()), -5);
    }

    #[test]
    fn test_jump_patching_targets_the_resolved_offset() {
        let mut w = BytecodeWriter::new();
        let skip = w.jump_if_not();
        w.bool_const(true);
        w.nothing();
        w.patch(skip);
        let end = w.here();
        let code = w.finish();
        assert_eq!(u16::from_le_bytes(code[1..3].try_into().unwrap()), end as u16);
    }

    #[test]
    fn test_end_skip_measures_the_wrapped_expression() {
        let mut w = BytecodeWriter::new();
        let arg = w.skip_arg();
        w.int_const(0);
        w.end_skip(arg);
        let code = w.finish();
        // [Skip][u16 = 1][IntZero]
        assert_eq!(u16::from_le_bytes(code[1..3].try_into().unwrap()), 1);
        assert_eq!(code[3], Opcode::IntZero as u8);
    }

    #[test]
    fn test_context_skip_excludes_the_size_byte() {
        let mut w = BytecodeWriter::new();
        w.context();
        w.self_object();
        let member = w.context_member(4);
        w.instance_var(0);
        w.end_skip(member);
        let code = w.finish();
        // [Context][SelfObject][skip u16][size u8][InstanceVariable u16]
        assert_eq!(u16::from_le_bytes(code[2..4].try_into().unwrap()), 3);
        assert_eq!(code[4], 4);
    }

    #[test]
    fn test_native_call_encodings() {
        let mut w = BytecodeWriter::new();
        w.native_call(0x72);
        w.native_call(0x0005);
        w.native_call(0x0234);
        let code = w.finish();
        assert_eq!(code[0], 0x72);
        assert_eq!(&code[1..3], &[0x60, 0x05]);
        assert_eq!(&code[3..5], &[0x62, 0x34]);
    }

    #[test]
    fn test_marked_labels_record_offsets() {
        let mut w = BytecodeWriter::new();
        w.nothing();
        let at = w.mark(Name::new("Begin"));
        w.stop();
        let (code, labels) = w.into_parts();
        assert_eq!(at, 1);
        assert_eq!(labels, vec![(Name::new("Begin"), 1)]);
        assert_eq!(code.len(), 2);
    }
}
