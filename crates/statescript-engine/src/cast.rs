//! Primitive conversions
//!
//! `PrimitiveCast` evaluates its source expression into a scratch of the
//! source kind's size, converts, and writes the destination kind into
//! the sink. String sources are read and freed here; string results are
//! only allocated when a sink is present. With no sink the source
//! expression is still evaluated for its side effects and the
//! conversion itself is skipped, so discarded casts allocate nothing.
//!
//! Numeric narrowing is truncating. String parsing takes the longest
//! numeric prefix and yields zero when there is none, and string
//! rendering matches the formatting scripts historically relied on
//! (floats with six decimals, `True`/`False` for bools).

use statescript_core::{storage, Name, ObjHandle};

use crate::error::ExecResult;
use crate::frame::Frame;
use crate::opcode::Conversion;
use crate::vm::Vm;

const ANGLE_UNITS_PER_RADIAN: f32 = 32768.0 / std::f32::consts::PI;

impl Vm {
    pub(crate) fn eval_cast(
        &mut self,
        frame: &mut Frame,
        conv: Conversion,
        sink: Option<&mut [u8]>,
    ) -> ExecResult<()> {
        let Some(out) = sink else {
            self.eval(frame, None)?;
            return Ok(());
        };

        match conv {
            Conversion::ByteToInt => {
                let v = self.arg_byte(frame)?;
                storage::write_i32(out, 0, v as i32);
            }
            Conversion::ByteToBool => {
                let v = self.arg_byte(frame)?;
                storage::write_i32(out, 0, (v != 0) as i32);
            }
            Conversion::ByteToFloat => {
                let v = self.arg_byte(frame)?;
                storage::write_f32(out, 0, v as f32);
            }
            Conversion::IntToByte => {
                let v = self.arg_int(frame)?;
                storage::write_u8(out, 0, v as u8);
            }
            Conversion::IntToBool => {
                let v = self.arg_int(frame)?;
                storage::write_i32(out, 0, (v != 0) as i32);
            }
            Conversion::IntToFloat => {
                let v = self.arg_int(frame)?;
                storage::write_f32(out, 0, v as f32);
            }
            Conversion::BoolToByte => {
                let v = self.arg_int(frame)?;
                storage::write_u8(out, 0, (v != 0) as u8);
            }
            Conversion::BoolToInt => {
                let v = self.arg_int(frame)?;
                storage::write_i32(out, 0, (v != 0) as i32);
            }
            Conversion::BoolToFloat => {
                let v = self.arg_int(frame)?;
                storage::write_f32(out, 0, if v != 0 { 1.0 } else { 0.0 });
            }
            Conversion::FloatToByte => {
                let v = self.arg_float(frame)?;
                storage::write_u8(out, 0, v as u8);
            }
            Conversion::FloatToInt => {
                let v = self.arg_float(frame)?;
                storage::write_i32(out, 0, v as i32);
            }
            Conversion::FloatToBool => {
                let v = self.arg_float(frame)?;
                storage::write_i32(out, 0, (v != 0.0) as i32);
            }
            Conversion::ObjectToBool => {
                let handle = self.arg_word(frame)?;
                let alive = self.objects.get(ObjHandle::from_raw(handle)).is_some();
                storage::write_i32(out, 0, alive as i32);
            }
            Conversion::NameToBool => {
                let word = self.arg_word(frame)?;
                storage::write_i32(out, 0, (word != 0) as i32);
            }
            Conversion::StringToByte => {
                let text = self.arg_string(frame)?;
                storage::write_u8(out, 0, parse_int_prefix(&text) as u8);
            }
            Conversion::StringToInt => {
                let text = self.arg_string(frame)?;
                storage::write_i32(out, 0, parse_int_prefix(&text));
            }
            Conversion::StringToBool => {
                let text = self.arg_string(frame)?;
                let truth = if text.eq_ignore_ascii_case("true") {
                    true
                } else if text.eq_ignore_ascii_case("false") {
                    false
                } else {
                    parse_int_prefix(&text) != 0
                };
                storage::write_i32(out, 0, truth as i32);
            }
            Conversion::StringToFloat => {
                let text = self.arg_string(frame)?;
                storage::write_f32(out, 0, parse_float_prefix(&text));
            }
            Conversion::StringToName => {
                let text = self.arg_string(frame)?;
                storage::write_name(out, 0, Name::new(&text));
            }
            Conversion::ByteToString => {
                let v = self.arg_byte(frame)?;
                self.put_string(out, format!("{v}"));
            }
            Conversion::IntToString => {
                let v = self.arg_int(frame)?;
                self.put_string(out, format!("{v}"));
            }
            Conversion::BoolToString => {
                let v = self.arg_int(frame)?;
                self.put_string(out, if v != 0 { "True" } else { "False" });
            }
            Conversion::FloatToString => {
                let v = self.arg_float(frame)?;
                self.put_string(out, format!("{v:.6}"));
            }
            Conversion::ObjectToString => {
                let handle = self.arg_word(frame)?;
                let text = self
                    .objects
                    .get(ObjHandle::from_raw(handle))
                    .map(|i| i.name.as_str().to_owned())
                    .unwrap_or_else(|| "None".to_owned());
                self.put_string(out, text);
            }
            Conversion::NameToString => {
                let word = self.arg_word(frame)?;
                let name = Name::from_index(word).unwrap_or(Name::NONE);
                self.put_string(out, name.as_str());
            }
            Conversion::VectorToBool => {
                let v = self.arg_triple(frame)?;
                let [x, y, z] = read_floats(&v);
                storage::write_i32(out, 0, (x != 0.0 || y != 0.0 || z != 0.0) as i32);
            }
            Conversion::VectorToString => {
                let v = self.arg_triple(frame)?;
                let [x, y, z] = read_floats(&v);
                self.put_string(out, format!("{x:.6},{y:.6},{z:.6}"));
            }
            Conversion::VectorToRotator => {
                let v = self.arg_triple(frame)?;
                let [x, y, z] = read_floats(&v);
                let pitch = (z.atan2((x * x + y * y).sqrt()) * ANGLE_UNITS_PER_RADIAN) as i32;
                let yaw = (y.atan2(x) * ANGLE_UNITS_PER_RADIAN) as i32;
                write_ints(out, [pitch, yaw, 0]);
            }
            Conversion::RotatorToBool => {
                let v = self.arg_triple(frame)?;
                let [p, y, r] = read_ints(&v);
                storage::write_i32(out, 0, (p != 0 || y != 0 || r != 0) as i32);
            }
            Conversion::RotatorToString => {
                let v = self.arg_triple(frame)?;
                let [p, y, r] = read_ints(&v);
                self.put_string(out, format!("{p},{y},{r}"));
            }
            Conversion::RotatorToVector => {
                let v = self.arg_triple(frame)?;
                let [p, y, _] = read_ints(&v);
                let pitch = p as f32 / ANGLE_UNITS_PER_RADIAN;
                let yaw = y as f32 / ANGLE_UNITS_PER_RADIAN;
                let cp = pitch.cos();
                write_floats(out, [cp * yaw.cos(), cp * yaw.sin(), pitch.sin()]);
            }
            Conversion::StringToVector => {
                let text = self.arg_string(frame)?;
                let mut parts = text.split(',');
                let mut next = || parse_float_prefix(parts.next().unwrap_or(""));
                write_floats(out, [next(), next(), next()]);
            }
            Conversion::StringToRotator => {
                let text = self.arg_string(frame)?;
                let mut parts = text.split(',');
                let mut next = || parse_int_prefix(parts.next().unwrap_or(""));
                write_ints(out, [next(), next(), next()]);
            }
        }
        Ok(())
    }

    fn arg_byte(&mut self, frame: &mut Frame) -> ExecResult<u8> {
        let mut buf = [0u8; 1];
        self.eval(frame, Some(&mut buf))?;
        Ok(buf[0])
    }

    fn arg_int(&mut self, frame: &mut Frame) -> ExecResult<i32> {
        let mut buf = [0u8; 4];
        self.eval(frame, Some(&mut buf))?;
        Ok(i32::from_le_bytes(buf))
    }

    fn arg_word(&mut self, frame: &mut Frame) -> ExecResult<u32> {
        let mut buf = [0u8; 4];
        self.eval(frame, Some(&mut buf))?;
        Ok(u32::from_le_bytes(buf))
    }

    fn arg_float(&mut self, frame: &mut Frame) -> ExecResult<f32> {
        let mut buf = [0u8; 4];
        self.eval(frame, Some(&mut buf))?;
        Ok(f32::from_le_bytes(buf))
    }

    fn arg_triple(&mut self, frame: &mut Frame) -> ExecResult<[u8; 12]> {
        let mut buf = [0u8; 12];
        self.eval(frame, Some(&mut buf))?;
        Ok(buf)
    }

    /// Read and free a string operand's scratch handle.
    fn arg_string(&mut self, frame: &mut Frame) -> ExecResult<String> {
        let handle = self.arg_word(frame)?;
        let text = self.heap.string(handle).to_owned();
        self.heap.free(handle);
        Ok(text)
    }

    fn put_string(&mut self, out: &mut [u8], text: impl Into<String>) {
        let handle = self.heap.alloc_string(text);
        storage::write_u32(out, 0, handle);
    }
}

fn read_floats(buf: &[u8; 12]) -> [f32; 3] {
    [
        storage::read_f32(buf, 0),
        storage::read_f32(buf, 4),
        storage::read_f32(buf, 8),
    ]
}

fn write_floats(out: &mut [u8], values: [f32; 3]) {
    for (i, v) in values.into_iter().enumerate() {
        storage::write_f32(out, i * 4, v);
    }
}

fn read_ints(buf: &[u8; 12]) -> [i32; 3] {
    [
        storage::read_i32(buf, 0),
        storage::read_i32(buf, 4),
        storage::read_i32(buf, 8),
    ]
}

fn write_ints(out: &mut [u8], values: [i32; 3]) {
    for (i, v) in values.into_iter().enumerate() {
        storage::write_i32(out, i * 4, v);
    }
}

/// Longest leading integer, `atoi`-style: optional sign, digits, stop at
/// the first non-digit. No digits parses as zero.
fn parse_int_prefix(text: &str) -> i32 {
    let s = text.trim_start();
    let mut chars = s.chars().peekable();
    let negative = match chars.peek() {
        Some('-') => {
            chars.next();
            true
        }
        Some('+') => {
            chars.next();
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    for c in chars {
        let Some(digit) = c.to_digit(10) else { break };
        value = value * 10 + digit as i64;
        if value > i32::MAX as i64 + 1 {
            value = i32::MAX as i64 + 1;
            break;
        }
    }
    let signed = if negative { -value } else { value };
    signed.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Longest leading float, `atof`-style. No parseable prefix yields zero.
fn parse_float_prefix(text: &str) -> f32 {
    let s = text.trim_start();
    let limit = s
        .find(|c: char| !matches!(c, '0'..='9' | '+' | '-' | '.' | 'e' | 'E'))
        .unwrap_or(s.len());
    let mut end = limit;
    while end > 0 {
        if let Ok(v) = s[..end].parse::<f32>() {
            return v;
        }
        end -= 1;
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use statescript_core::{ClassBuilder, FunctionBuilder};

    use crate::writer::BytecodeWriter;

    fn eval_into(vm: &mut Vm, code: Vec<u8>, out: &mut [u8]) {
        let f = FunctionBuilder::new(Name::new("CastProbe")).code(code).build();
        let mut frame = Frame::for_function(ObjHandle::NONE, f);
        vm.eval(&mut frame, Some(out)).unwrap();
    }

    fn read_back_string(vm: &mut Vm, out: &[u8]) -> String {
        let handle = storage::read_u32(out, 0);
        let text = vm.heap.string(handle).to_owned();
        vm.heap.free(handle);
        text
    }

    #[test]
    fn test_numeric_narrowing_truncates() {
        let mut vm = Vm::new();
        let mut out = [0u8; 1];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::IntToByte);
        w.int_const(300);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(out[0], 44);

        let mut out = [0u8; 4];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::FloatToInt);
        w.float_const(3.9);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(i32::from_le_bytes(out), 3);
    }

    #[test]
    fn test_object_truthiness_tracks_liveness() {
        let mut vm = Vm::new();
        let id = vm.register_class(ClassBuilder::new(Name::new("Thing")).build()).unwrap();
        let h = vm.create_instance(id, Name::new("T")).unwrap();

        let mut out = [0u8; 4];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::ObjectToBool);
        w.object_const(h);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(i32::from_le_bytes(out), 1);

        vm.destroy_instance(h);
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::ObjectToBool);
        w.object_const(h);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(i32::from_le_bytes(out), 0);
    }

    #[test]
    fn test_string_parsing_takes_numeric_prefixes() {
        assert_eq!(parse_int_prefix("  42abc"), 42);
        assert_eq!(parse_int_prefix("-17"), -17);
        assert_eq!(parse_int_prefix("none"), 0);
        assert_eq!(parse_int_prefix("99999999999999999999"), i32::MAX);
        assert_eq!(parse_float_prefix("3.5x"), 3.5);
        assert_eq!(parse_float_prefix("-2e2,"), -200.0);
        assert_eq!(parse_float_prefix("abc"), 0.0);

        let mut vm = Vm::new();
        let mut out = [0u8; 4];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::StringToInt);
        w.string_const(" 42abc");
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(i32::from_le_bytes(out), 42);
        // The scratch string was freed after parsing.
        assert_eq!(vm.heap().live_count(), 0);
    }

    #[test]
    fn test_string_to_bool_accepts_literals_and_numbers() {
        let mut vm = Vm::new();
        for (text, expected) in [("True", 1), ("FALSE", 0), ("7", 1), ("0", 0), ("gibberish", 0)] {
            let mut out = [0u8; 4];
            let mut w = BytecodeWriter::new();
            w.cast(Conversion::StringToBool);
            w.string_const(text);
            eval_into(&mut vm, w.finish(), &mut out);
            assert_eq!(i32::from_le_bytes(out), expected, "for {text:?}");
        }
    }

    #[test]
    fn test_value_rendering() {
        let mut vm = Vm::new();

        let mut out = [0u8; 4];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::IntToString);
        w.int_const(-7);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_back_string(&mut vm, &out), "-7");

        let mut w = BytecodeWriter::new();
        w.cast(Conversion::BoolToString);
        w.bool_const(true);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_back_string(&mut vm, &out), "True");

        let mut w = BytecodeWriter::new();
        w.cast(Conversion::FloatToString);
        w.float_const(2.5);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_back_string(&mut vm, &out), "2.500000");

        let mut w = BytecodeWriter::new();
        w.cast(Conversion::NameToString);
        w.name_const(Name::new("Alpha"));
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_back_string(&mut vm, &out), "Alpha");

        // A dead reference renders as the null spelling.
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::ObjectToString);
        w.object_const(ObjHandle::NONE);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_back_string(&mut vm, &out), "None");
        assert_eq!(vm.heap().live_count(), 0);
    }

    #[test]
    fn test_vector_rotator_conversions() {
        let mut vm = Vm::new();

        let mut out = [0u8; 12];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::VectorToRotator);
        w.vector_const(0.0, 1.0, 0.0);
        eval_into(&mut vm, w.finish(), &mut out);
        let [pitch, yaw, roll] = read_ints(&out);
        assert_eq!(pitch, 0);
        assert_eq!(yaw, 16384);
        assert_eq!(roll, 0);

        let mut w = BytecodeWriter::new();
        w.cast(Conversion::RotatorToVector);
        w.rotator_const(0, 16384, 0);
        eval_into(&mut vm, w.finish(), &mut out);
        let [x, y, z] = read_floats(&out);
        assert!(x.abs() < 1e-4);
        assert!((y - 1.0).abs() < 1e-4);
        assert!(z.abs() < 1e-4);

        let mut w = BytecodeWriter::new();
        w.cast(Conversion::StringToVector);
        w.string_const("1.5,2,3");
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(read_floats(&out), [1.5, 2.0, 3.0]);

        let mut out = [0u8; 4];
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::RotatorToBool);
        w.rotator_const(0, 0, 1);
        eval_into(&mut vm, w.finish(), &mut out);
        assert_eq!(i32::from_le_bytes(out), 1);
    }

    #[test]
    fn test_discarded_cast_allocates_nothing() {
        let mut vm = Vm::new();
        let mut w = BytecodeWriter::new();
        w.cast(Conversion::IntToString);
        w.int_const(5);
        let f = FunctionBuilder::new(Name::new("CastProbe")).code(w.finish()).build();
        let mut frame = Frame::for_function(ObjHandle::NONE, f);
        vm.eval(&mut frame, None).unwrap();
        assert_eq!(vm.heap().live_count(), 0);
    }
}
