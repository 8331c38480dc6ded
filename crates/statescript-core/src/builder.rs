//! Descriptor builders
//!
//! The engine consumes descriptors but never produces them; that is the
//! metadata layer's job. These builders stand in for it: they lay out
//! property offsets (packing adjacent bools into shared words), size frames
//! and instances, assign probe bits, compose probe masks, and hydrate
//! default blocks. Hosts and the test suites build classes through them.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::class::{func_flags, state_flags, ClassDef, FunctionDef, StateDef};
use crate::name::Name;
use crate::property::{flags, PropKind, PropertyDef, StructDef};

/// Canonical probe notification names. The bit of a probe function is its
/// index in this table; functions named anything else carry no probe bit
/// and are always heard.
pub const PROBE_NAMES: [&str; 32] = [
    "Spawned",
    "Destroyed",
    "GainedChild",
    "LostChild",
    "Trigger",
    "UnTrigger",
    "Timer",
    "HitWall",
    "Falling",
    "Landed",
    "ZoneChange",
    "Touch",
    "UnTouch",
    "Bump",
    "BeginState",
    "EndState",
    "BaseChange",
    "Attach",
    "Detach",
    "ActorEntered",
    "ActorLeaving",
    "KillCredit",
    "AnimEnd",
    "EndedRotation",
    "InterpolateEnd",
    "EncroachingOn",
    "EncroachedBy",
    "FootZoneChange",
    "HeadZoneChange",
    "PainTimer",
    "SpeechTimer",
    "MayFall",
];

/// Probe bit for a function name, when the name is a canonical probe.
pub fn probe_bit(name: Name) -> Option<u8> {
    PROBE_NAMES.iter().position(|&p| p == name.as_str()).map(|i| i as u8)
}

/// Offset cursor with bool word packing.
struct Layout {
    offset: u32,
    bool_word: Option<(u32, u32)>,
}

fn round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

impl Layout {
    fn new(start: u32) -> Self {
        Layout { offset: start, bool_word: None }
    }

    /// Place a slot, returning (offset, bool mask). Consecutive bools share
    /// a 32-bit word until its bits run out.
    fn place(&mut self, kind: &PropKind, array_dim: u32) -> (u32, u32) {
        if matches!(kind, PropKind::Bool) && array_dim == 1 {
            if let Some((word, mask)) = self.bool_word {
                if mask != 0 {
                    self.bool_word = Some((word, mask << 1));
                    return (word, mask);
                }
            }
            let off = round_up(self.offset, 4);
            self.offset = off + 4;
            self.bool_word = Some((off, 2));
            return (off, 1);
        }
        self.bool_word = None;
        let off = round_up(self.offset, kind.alignment());
        self.offset = off + kind.elem_size() * array_dim;
        (off, 0)
    }

    fn total(&self) -> u32 {
        round_up(self.offset, 4)
    }
}

fn make_prop(name: Name, kind: PropKind, layout: &mut Layout, array_dim: u32, prop_flags: u32) -> PropertyDef {
    let (offset, bool_mask) = layout.place(&kind, array_dim);
    PropertyDef { name, kind, offset, array_dim, flags: prop_flags, bool_mask }
}

/// Builds a [`StructDef`].
pub struct StructBuilder {
    name: Name,
    members: Vec<PropertyDef>,
    layout: Layout,
}

impl StructBuilder {
    /// Start a struct.
    pub fn new(name: Name) -> Self {
        StructBuilder { name, members: Vec::new(), layout: Layout::new(0) }
    }

    /// Add a member.
    pub fn member(mut self, name: Name, kind: PropKind) -> Self {
        let prop = make_prop(name, kind, &mut self.layout, 1, 0);
        self.members.push(prop);
        self
    }

    /// Add a fixed-array member.
    pub fn member_array(mut self, name: Name, kind: PropKind, dim: u32) -> Self {
        let prop = make_prop(name, kind, &mut self.layout, dim, 0);
        self.members.push(prop);
        self
    }

    /// Finish the struct.
    pub fn build(self) -> Arc<StructDef> {
        Arc::new(StructDef { name: self.name, members: self.members, size: self.layout.total() })
    }
}

/// Builds a [`FunctionDef`]: parameters first, then locals, then code.
pub struct FunctionBuilder {
    name: Name,
    code: Vec<u8>,
    locals: Vec<PropertyDef>,
    layout: Layout,
    flags: u32,
    native_index: Option<u16>,
    probe: Option<u8>,
}

impl FunctionBuilder {
    /// Start a function.
    pub fn new(name: Name) -> Self {
        FunctionBuilder {
            name,
            code: Vec::new(),
            locals: Vec::new(),
            layout: Layout::new(0),
            flags: 0,
            native_index: None,
            probe: None,
        }
    }

    fn add(&mut self, name: Name, kind: PropKind, dim: u32, prop_flags: u32) {
        let prop = make_prop(name, kind, &mut self.layout, dim, prop_flags);
        self.locals.push(prop);
    }

    /// Declare a by-value parameter.
    pub fn param(mut self, name: Name, kind: PropKind) -> Self {
        self.add(name, kind, 1, flags::PARM);
        self
    }

    /// Declare an out parameter (copied back to the caller).
    pub fn out_param(mut self, name: Name, kind: PropKind) -> Self {
        self.add(name, kind, 1, flags::PARM | flags::OUT_PARM);
        self
    }

    /// Declare an optional parameter.
    pub fn optional_param(mut self, name: Name, kind: PropKind) -> Self {
        self.add(name, kind, 1, flags::PARM | flags::OPTIONAL_PARM);
        self
    }

    /// Declare the return-value slot.
    pub fn returns(mut self, kind: PropKind) -> Self {
        self.add(Name::new("ReturnValue"), kind, 1, flags::PARM | flags::RETURN_PARM);
        self
    }

    /// Declare a local variable.
    pub fn local(mut self, name: Name, kind: PropKind) -> Self {
        self.add(name, kind, 1, 0);
        self
    }

    /// Declare a fixed-array local.
    pub fn local_array(mut self, name: Name, kind: PropKind, dim: u32) -> Self {
        self.add(name, kind, dim, 0);
        self
    }

    /// Attach the bytecode body.
    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Add function flags.
    pub fn flag(mut self, bits: u32) -> Self {
        self.flags |= bits;
        self
    }

    /// Bind to a native dispatch slot.
    pub fn native(mut self, index: u16) -> Self {
        self.flags |= func_flags::NATIVE;
        self.native_index = Some(index);
        self
    }

    /// Force a probe bit (otherwise derived from the name).
    pub fn probe(mut self, bit: u8) -> Self {
        self.probe = Some(bit);
        self
    }

    /// Finish the function.
    pub fn build(self) -> Arc<FunctionDef> {
        let parms_size = self
            .locals
            .iter()
            .filter(|p| p.is_parm())
            .map(|p| p.offset + p.total_size())
            .max()
            .unwrap_or(0);
        let mut flags = self.flags;
        if !self.code.is_empty() {
            flags |= func_flags::DEFINED;
        }
        let probe = self.probe.or_else(|| probe_bit(self.name));
        Arc::new(FunctionDef {
            name: self.name,
            code: self.code,
            locals: self.locals,
            parms_size,
            frame_size: self.layout.total(),
            flags,
            native_index: self.native_index,
            probe_bit: probe,
        })
    }
}

/// Builds a [`StateDef`].
pub struct StateBuilder {
    name: Name,
    super_state: Option<Arc<StateDef>>,
    code: Vec<u8>,
    labels: Vec<(Name, u32)>,
    functions: Vec<Arc<FunctionDef>>,
    ignores: u64,
    flags: u32,
}

impl StateBuilder {
    /// Start a state.
    pub fn new(name: Name) -> Self {
        StateBuilder {
            name,
            super_state: None,
            code: Vec::new(),
            labels: Vec::new(),
            functions: Vec::new(),
            ignores: 0,
            flags: 0,
        }
    }

    /// Chain to the state this one extends or overrides.
    pub fn extends_state(mut self, super_state: Arc<StateDef>) -> Self {
        self.super_state = Some(super_state);
        self
    }

    /// Attach label-addressed state code.
    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Record a label at a byte offset into the state code.
    pub fn label(mut self, name: Name, offset: u32) -> Self {
        self.labels.push((name, offset));
        self
    }

    /// (Re)define a function inside this state.
    pub fn function(mut self, function: Arc<FunctionDef>) -> Self {
        self.functions.push(function);
        self
    }

    /// Ignore a probe notification while in this state.
    pub fn ignores(mut self, bit: u8) -> Self {
        self.ignores |= 1u64 << bit;
        self
    }

    /// Mark as the startup state.
    pub fn auto(mut self) -> Self {
        self.flags |= state_flags::AUTO;
        self
    }

    /// Finish the state.
    pub fn build(self) -> Arc<StateDef> {
        let mut fn_index = FxHashMap::default();
        let mut probe_mask = 0u64;
        for (i, f) in self.functions.iter().enumerate() {
            fn_index.insert(f.name, i as u16);
            if let Some(bit) = f.probe_bit {
                probe_mask |= 1u64 << bit;
            }
        }
        Arc::new(StateDef {
            name: self.name,
            super_state: self.super_state,
            code: self.code,
            labels: self.labels,
            functions: self.functions,
            fn_index,
            probe_mask,
            ignores: self.ignores,
            flags: self.flags,
        })
    }
}

enum DefaultValue {
    Bytes(Vec<u8>),
    Bit(bool),
    Text(String),
}

/// Builds a [`ClassDef`], inheriting layout and defaults from a super class.
pub struct ClassBuilder {
    name: Name,
    super_class: Option<Arc<ClassDef>>,
    own_props: Vec<(Name, PropKind, u32, u32)>,
    functions: Vec<Arc<FunctionDef>>,
    states: Vec<Arc<StateDef>>,
    defaults: Vec<(Name, DefaultValue)>,
    code: Vec<u8>,
    labels: Vec<(Name, u32)>,
}

impl ClassBuilder {
    /// Start a class.
    pub fn new(name: Name) -> Self {
        ClassBuilder {
            name,
            super_class: None,
            own_props: Vec::new(),
            functions: Vec::new(),
            states: Vec::new(),
            defaults: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Set the parent class.
    pub fn extends(mut self, super_class: Arc<ClassDef>) -> Self {
        self.super_class = Some(super_class);
        self
    }

    /// Declare an instance variable.
    pub fn var(mut self, name: Name, kind: PropKind) -> Self {
        self.own_props.push((name, kind, 1, 0));
        self
    }

    /// Declare a fixed-array instance variable.
    pub fn var_array(mut self, name: Name, kind: PropKind, dim: u32) -> Self {
        self.own_props.push((name, kind, dim, 0));
        self
    }

    /// Declare an instance variable with property flags.
    pub fn var_flags(mut self, name: Name, kind: PropKind, prop_flags: u32) -> Self {
        self.own_props.push((name, kind, 1, prop_flags));
        self
    }

    /// Declare a class-scope function.
    pub fn function(mut self, function: Arc<FunctionDef>) -> Self {
        self.functions.push(function);
        self
    }

    /// Declare a state.
    pub fn state(mut self, state: Arc<StateDef>) -> Self {
        self.states.push(state);
        self
    }

    /// Default value for an int variable.
    pub fn default_int(mut self, name: Name, value: i32) -> Self {
        self.defaults.push((name, DefaultValue::Bytes(value.to_le_bytes().to_vec())));
        self
    }

    /// Default value for a float variable.
    pub fn default_float(mut self, name: Name, value: f32) -> Self {
        self.defaults.push((name, DefaultValue::Bytes(value.to_le_bytes().to_vec())));
        self
    }

    /// Default value for a byte variable.
    pub fn default_byte(mut self, name: Name, value: u8) -> Self {
        self.defaults.push((name, DefaultValue::Bytes(vec![value])));
        self
    }

    /// Default value for a name variable.
    pub fn default_name(mut self, name: Name, value: Name) -> Self {
        self.defaults.push((name, DefaultValue::Bytes(value.index().to_le_bytes().to_vec())));
        self
    }

    /// Default value for a bool variable.
    pub fn default_bool(mut self, name: Name, value: bool) -> Self {
        self.defaults.push((name, DefaultValue::Bit(value)));
        self
    }

    /// Default value for a string variable, hydrated at registration.
    pub fn default_str(mut self, name: Name, value: impl Into<String>) -> Self {
        self.defaults.push((name, DefaultValue::Text(value.into())));
        self
    }

    /// Attach class-scope label code.
    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Record a label into the class-scope code.
    pub fn label(mut self, name: Name, offset: u32) -> Self {
        self.labels.push((name, offset));
        self
    }

    /// Finish the class.
    pub fn build(self) -> Arc<ClassDef> {
        let (mut properties, start, mut defaults_block, mut default_text, mut probe_mask) =
            match &self.super_class {
                Some(sup) => (
                    sup.properties.clone(),
                    sup.instance_size,
                    sup.defaults.clone(),
                    sup.default_text.clone(),
                    sup.probe_mask,
                ),
                None => (Vec::new(), 0, Vec::new(), Vec::new(), 0),
            };

        let mut layout = Layout::new(start);
        for (name, kind, dim, prop_flags) in self.own_props {
            properties.push(make_prop(name, kind, &mut layout, dim, prop_flags));
        }
        let instance_size = layout.total();
        defaults_block.resize(instance_size as usize, 0);

        for (name, value) in self.defaults {
            let Some(prop) = properties.iter().find(|p| p.name == name) else { continue };
            let off = prop.offset as usize;
            match value {
                DefaultValue::Bytes(bytes) => {
                    defaults_block[off..off + bytes.len()].copy_from_slice(&bytes);
                }
                DefaultValue::Bit(bit) => {
                    crate::storage::write_bit(&mut defaults_block, off, prop.bool_mask, bit);
                }
                DefaultValue::Text(text) => {
                    default_text.retain(|(o, _)| *o != prop.offset);
                    default_text.push((prop.offset, text));
                }
            }
        }

        let mut fn_index = FxHashMap::default();
        for (i, f) in self.functions.iter().enumerate() {
            fn_index.insert(f.name, i as u16);
            if let Some(bit) = f.probe_bit {
                probe_mask |= 1u64 << bit;
            }
        }
        let mut state_index = FxHashMap::default();
        for (i, s) in self.states.iter().enumerate() {
            state_index.insert(s.name, i as u16);
        }

        Arc::new(ClassDef {
            name: self.name,
            super_class: self.super_class,
            properties,
            instance_size,
            defaults: defaults_block,
            default_text,
            functions: self.functions,
            fn_index,
            states: self.states,
            state_index,
            probe_mask,
            code: self.code,
            labels: self.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[test]
    fn test_function_layout_places_parms_before_locals() {
        let f = FunctionBuilder::new(Name::new("Compute"))
            .param(Name::new("A"), PropKind::Int)
            .param(Name::new("B"), PropKind::Byte)
            .returns(PropKind::Int)
            .local(Name::new("Tmp"), PropKind::Float)
            .build();
        assert_eq!(f.locals[0].offset, 0);
        assert_eq!(f.locals[1].offset, 4);
        assert_eq!(f.locals[2].offset, 8); // return slot, aligned past the byte
        assert_eq!(f.locals[3].offset, 12);
        assert_eq!(f.parms_size, 12);
        assert_eq!(f.frame_size, 16);
        assert!(f.return_parm().is_some());
        assert_eq!(f.parms().count(), 2);
    }

    #[test]
    fn test_adjacent_bools_share_a_word() {
        let class = ClassBuilder::new(Name::new("Flags"))
            .var(Name::new("A"), PropKind::Bool)
            .var(Name::new("B"), PropKind::Bool)
            .var(Name::new("N"), PropKind::Int)
            .var(Name::new("C"), PropKind::Bool)
            .build();
        let a = class.find_property(Name::new("A")).unwrap();
        let b = class.find_property(Name::new("B")).unwrap();
        let c = class.find_property(Name::new("C")).unwrap();
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.bool_mask, 1);
        assert_eq!(b.bool_mask, 2);
        assert_ne!(c.offset, a.offset);
        assert_eq!(c.bool_mask, 1);
    }

    #[test]
    fn test_subclass_layout_extends_super() {
        let base = ClassBuilder::new(Name::new("BaseThing"))
            .var(Name::new("Health"), PropKind::Int)
            .default_int(Name::new("Health"), 100)
            .build();
        let derived = ClassBuilder::new(Name::new("DerivedThing"))
            .extends(base.clone())
            .var(Name::new("Armor"), PropKind::Int)
            .build();

        assert_eq!(base.instance_size, 4);
        assert_eq!(derived.instance_size, 8);
        let armor = derived.find_property(Name::new("Armor")).unwrap();
        assert_eq!(armor.offset, 4);
        // Inherited default carries over.
        assert_eq!(storage::read_i32(&derived.defaults, 0), 100);
    }

    #[test]
    fn test_probe_bits_derive_from_canonical_names() {
        let begin = FunctionBuilder::new(Name::new("BeginState")).build();
        let plain = FunctionBuilder::new(Name::new("DoWork")).build();
        assert_eq!(begin.probe_bit, probe_bit(Name::new("BeginState")));
        assert!(begin.probe_bit.is_some());
        assert!(plain.probe_bit.is_none());
    }

    #[test]
    fn test_state_probe_mask_and_ignores() {
        let timer = FunctionBuilder::new(Name::new("Timer")).build();
        let bit = timer.probe_bit.unwrap();
        let state = StateBuilder::new(Name::new("Watching"))
            .function(timer)
            .ignores(bit)
            .build();
        assert_eq!(state.probe_mask, 1u64 << bit);
        assert_eq!(state.ignores, 1u64 << bit);
    }

    #[test]
    fn test_string_defaults_become_hydration_entries() {
        let class = ClassBuilder::new(Name::new("Sign"))
            .var(Name::new("Text"), PropKind::Str)
            .default_str(Name::new("Text"), "welcome")
            .build();
        let prop = class.find_property(Name::new("Text")).unwrap();
        assert_eq!(class.default_text, vec![(prop.offset, "welcome".to_string())]);
        // The template block itself keeps a null handle.
        assert_eq!(storage::read_u32(&class.defaults, prop.offset as usize), 0);
    }
}
