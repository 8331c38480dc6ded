//! Execution frames
//!
//! A frame is one call's context: the instance the code runs against, the
//! descriptor owning the code, the byte cursor, and for function frames a
//! zeroed locals block holding parameters and locals at their declared
//! offsets. Frames nest through ordinary Rust recursion; the caller's frame
//! is the caller's stack slot, not a stored link.
//!
//! All stream reads bounds-check against the code and fail with
//! [`FatalError::UnexpectedEnd`] rather than reading past the descriptor.

use std::sync::Arc;

use statescript_core::{ClassDef, FunctionDef, Name, ObjHandle, ScriptScope, StateDef};

use crate::error::{ExecResult, FatalError};
use crate::place::Place;

/// The descriptor owning the code a frame executes.
#[derive(Debug, Clone)]
pub enum NodeRef {
    /// A function body.
    Function(Arc<FunctionDef>),
    /// A state's label-addressed code.
    State(Arc<StateDef>),
    /// The class fallback scope's label-addressed code.
    Class(Arc<ClassDef>),
}

impl NodeRef {
    /// Build a node for a state-machine scope.
    pub fn from_scope(scope: &ScriptScope) -> NodeRef {
        match scope {
            ScriptScope::State(s) => NodeRef::State(s.clone()),
            ScriptScope::Class(c) => NodeRef::Class(c.clone()),
        }
    }

    /// Descriptor name, for diagnostics.
    pub fn name(&self) -> Name {
        match self {
            NodeRef::Function(f) => f.name,
            NodeRef::State(s) => s.name,
            NodeRef::Class(c) => c.name,
        }
    }

    /// The bytecode this node owns.
    pub fn code(&self) -> &[u8] {
        match self {
            NodeRef::Function(f) => &f.code,
            NodeRef::State(s) => &s.code,
            NodeRef::Class(c) => &c.code,
        }
    }

    /// The function descriptor, for function frames.
    pub fn function(&self) -> Option<&Arc<FunctionDef>> {
        match self {
            NodeRef::Function(f) => Some(f),
            _ => None,
        }
    }
}

/// One call's execution context.
#[derive(Debug)]
pub struct Frame {
    /// Instance whose code is running.
    pub object: ObjHandle,
    /// Descriptor owning the code `ip` indexes.
    pub node: NodeRef,
    /// Byte cursor into the node's code.
    pub ip: usize,
    /// Parameters and locals at their declared offsets; empty for
    /// state-scope frames.
    pub locals: Vec<u8>,
    /// Caller-side destinations of out parameters, by parameter position.
    /// Filled during argument evaluation, consumed by copy-out.
    pub out_places: Vec<Option<Place>>,
    /// Source line last seen, for diagnostics.
    pub line: u16,
}

impl Frame {
    /// Frame for a function body, with a zeroed locals block.
    pub fn for_function(object: ObjHandle, function: Arc<FunctionDef>) -> Frame {
        let locals = vec![0u8; function.frame_size as usize];
        Frame {
            object,
            node: NodeRef::Function(function),
            ip: 0,
            locals,
            out_places: Vec::new(),
            line: 0,
        }
    }

    /// Frame for state code, cursor already positioned.
    pub fn for_scope(object: ObjHandle, scope: &ScriptScope, ip: u32) -> Frame {
        Frame {
            object,
            node: NodeRef::from_scope(scope),
            ip: ip as usize,
            locals: Vec::new(),
            out_places: Vec::new(),
            line: 0,
        }
    }

    fn end_error(&self) -> FatalError {
        FatalError::UnexpectedEnd(self.node.name(), self.ip as u32)
    }

    /// Opcode byte at the cursor, without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.node.code().get(self.ip).copied()
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> ExecResult<u8> {
        let code = self.node.code();
        if self.ip >= code.len() {
            return Err(self.end_error());
        }
        let value = code[self.ip];
        self.ip += 1;
        Ok(value)
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> ExecResult<u16> {
        let code = self.node.code();
        if self.ip + 1 >= code.len() {
            return Err(self.end_error());
        }
        let value = u16::from_le_bytes([code[self.ip], code[self.ip + 1]]);
        self.ip += 2;
        Ok(value)
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> ExecResult<u32> {
        let code = self.node.code();
        if self.ip + 3 >= code.len() {
            return Err(self.end_error());
        }
        let value = u32::from_le_bytes([
            code[self.ip],
            code[self.ip + 1],
            code[self.ip + 2],
            code[self.ip + 3],
        ]);
        self.ip += 4;
        Ok(value)
    }

    /// Read a little-endian i32.
    pub fn read_i32(&mut self) -> ExecResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a little-endian f32.
    pub fn read_f32(&mut self) -> ExecResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Read a name immediate, validating the index.
    pub fn read_name(&mut self) -> ExecResult<Name> {
        let at = self.ip as u32;
        let index = self.read_u32()?;
        Name::from_index(index).ok_or_else(|| {
            FatalError::BadOperand(self.node.name(), at, format!("bad name index {index}"))
        })
    }

    /// Read a NUL-terminated 8-bit string immediate.
    pub fn read_string(&mut self) -> ExecResult<String> {
        let code = self.node.code();
        let start = self.ip;
        let Some(nul) = code[start..].iter().position(|&b| b == 0) else {
            return Err(self.end_error());
        };
        let text = String::from_utf8_lossy(&code[start..start + nul]).into_owned();
        self.ip = start + nul + 1;
        Ok(text)
    }

    /// Read a NUL-terminated UTF-16 string immediate.
    pub fn read_unicode_string(&mut self) -> ExecResult<String> {
        let mut units = Vec::new();
        loop {
            let unit = self.read_u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Redirect the cursor to an absolute offset. Out-of-range targets are
    /// caught by the next bounds-checked read.
    pub fn jump_to(&mut self, dest: u16) {
        self.ip = dest as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statescript_core::FunctionBuilder;

    fn frame_with(code: Vec<u8>) -> Frame {
        let f = FunctionBuilder::new(Name::new("Probe")).code(code).build();
        Frame::for_function(ObjHandle::NONE, f)
    }

    #[test]
    fn test_scalar_reads_advance_the_cursor() {
        let mut frame = frame_with(vec![0x2A, 0x10, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.read_u8().unwrap(), 0x2A);
        assert_eq!(frame.read_u16().unwrap(), 0x0010);
        assert_eq!(frame.read_i32().unwrap(), -1);
        assert_eq!(frame.ip, 7);
    }

    #[test]
    fn test_reads_past_the_end_fail() {
        let mut frame = frame_with(vec![0x01]);
        assert_eq!(frame.read_u8().unwrap(), 0x01);
        assert!(matches!(frame.read_u8(), Err(FatalError::UnexpectedEnd(_, 1))));
        let mut frame = frame_with(vec![0x01, 0x02]);
        assert!(matches!(frame.read_u32(), Err(FatalError::UnexpectedEnd(_, 0))));
    }

    #[test]
    fn test_string_reads_stop_at_nul() {
        let mut code = b"hi".to_vec();
        code.push(0);
        code.push(0x77);
        let mut frame = frame_with(code);
        assert_eq!(frame.read_string().unwrap(), "hi");
        assert_eq!(frame.read_u8().unwrap(), 0x77);
    }

    #[test]
    fn test_unterminated_string_fails() {
        let mut frame = frame_with(b"oops".to_vec());
        assert!(frame.read_string().is_err());
    }

    #[test]
    fn test_unicode_string_round_trip() {
        let mut code = Vec::new();
        for unit in "héllo".encode_utf16() {
            code.extend_from_slice(&unit.to_le_bytes());
        }
        code.extend_from_slice(&[0, 0]);
        let mut frame = frame_with(code);
        assert_eq!(frame.read_unicode_string().unwrap(), "héllo");
    }

    #[test]
    fn test_name_immediate_validates_index() {
        let good = Name::new("Target");
        let mut code = good.index().to_le_bytes().to_vec();
        code.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut frame = frame_with(code);
        assert_eq!(frame.read_name().unwrap(), good);
        assert!(matches!(frame.read_name(), Err(FatalError::BadOperand(_, 4, _))));
    }
}
