//! Class, function and state descriptors
//!
//! Descriptors are built once (by the host's metadata layer or the builders
//! in this crate), shared behind `Arc`, and never mutated afterward. Name
//! lookup walks the super chains: a state first, then its super states, then
//! the owning class and its super classes. The class itself is the fallback
//! scope an instance executes against when no state is active.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::name::Name;
use crate::property::PropertyDef;

/// Index of a registered class inside a [`ClassRegistry`].
pub type ClassId = u32;

/// Hard ceiling on declared parameters per function. Out-parameter capture
/// records are sized to this.
pub const MAX_FUNC_PARMS: usize = 16;

/// Function flag bits.
pub mod func_flags {
    /// May not be overridden; call sites bind directly.
    pub const FINAL: u32 = 0x0001;
    /// Has a bytecode body.
    pub const DEFINED: u32 = 0x0002;
    /// Drives a foreach-style iteration protocol.
    pub const ITERATOR: u32 = 0x0004;
    /// May suspend state code until the host completes it.
    pub const LATENT: u32 = 0x0008;
    /// Re-entry on the same instance is skipped while a call is in flight.
    pub const SINGULAR: u32 = 0x0010;
    /// Offered to the replication hook before local execution.
    pub const NET: u32 = 0x0020;
    /// Implemented by a registered native; `native_index` names the slot.
    pub const NATIVE: u32 = 0x0040;
    /// Notification entry point callable from the host by name.
    pub const EVENT: u32 = 0x0080;
    /// Takes no instance context; lookup skips state overrides.
    pub const STATIC: u32 = 0x0100;
    /// Runs on remote copies as well as the authoritative one.
    pub const SIMULATED: u32 = 0x0200;
}

/// State flag bits.
pub mod state_flags {
    /// Entered automatically when an instance starts up.
    pub const AUTO: u32 = 0x0001;
    /// Runs on remote copies as well as the authoritative one.
    pub const SIMULATED: u32 = 0x0002;
}

/// A callable routine: bytecode body, frame layout, binding metadata.
#[derive(Debug)]
pub struct FunctionDef {
    /// Declared identifier.
    pub name: Name,
    /// Statement stream; empty for routines implemented natively.
    pub code: Vec<u8>,
    /// Frame properties in declaration order: parameters first (flagged
    /// `PARM`), then locals. Offsets are into the frame's locals block.
    pub locals: Vec<PropertyDef>,
    /// Byte size of the leading parameter region of the frame block.
    pub parms_size: u32,
    /// Byte size of the whole frame block (parameters plus locals).
    pub frame_size: u32,
    /// Bits from [`func_flags`].
    pub flags: u32,
    /// Dispatch-table slot for natives.
    pub native_index: Option<u16>,
    /// Notification-mask bit, when this routine is a probe (< 64).
    pub probe_bit: Option<u8>,
}

impl FunctionDef {
    /// Parameters in declaration order.
    pub fn parms(&self) -> impl Iterator<Item = &PropertyDef> {
        self.locals.iter().filter(|p| p.is_parm() && !p.is_return_parm())
    }

    /// The return-value slot, when the function returns one.
    pub fn return_parm(&self) -> Option<&PropertyDef> {
        self.locals.iter().find(|p| p.is_return_parm())
    }

    /// Frame property by operand index.
    pub fn local(&self, index: u16) -> Option<&PropertyDef> {
        self.locals.get(index as usize)
    }

    fn has(&self, bits: u32) -> bool {
        self.flags & bits != 0
    }

    /// Implemented by a registered native.
    pub fn is_native(&self) -> bool {
        self.has(func_flags::NATIVE)
    }

    /// Has a bytecode body to interpret.
    pub fn has_body(&self) -> bool {
        self.has(func_flags::DEFINED) && !self.code.is_empty()
    }

    /// Skips state overrides during lookup.
    pub fn is_static(&self) -> bool {
        self.has(func_flags::STATIC)
    }

    /// Never overridden.
    pub fn is_final(&self) -> bool {
        self.has(func_flags::FINAL)
    }

    /// Skipped while already executing on the same instance.
    pub fn is_singular(&self) -> bool {
        self.has(func_flags::SINGULAR)
    }

    /// Offered to the replication hook first.
    pub fn is_net(&self) -> bool {
        self.has(func_flags::NET)
    }

    /// May suspend state code.
    pub fn is_latent(&self) -> bool {
        self.has(func_flags::LATENT)
    }

    /// Host-callable notification.
    pub fn is_event(&self) -> bool {
        self.has(func_flags::EVENT)
    }
}

/// A named state: override functions, label-addressed code, probe filtering.
#[derive(Debug)]
pub struct StateDef {
    /// Declared identifier.
    pub name: Name,
    /// State this one extends (same class, or the override chain across
    /// super classes). Label and function lookup continue through it.
    pub super_state: Option<Arc<StateDef>>,
    /// Label-addressed statement stream.
    pub code: Vec<u8>,
    /// Label table: name to byte offset into `code`.
    pub labels: Vec<(Name, u32)>,
    /// Functions (re)defined inside this state.
    pub functions: Vec<Arc<FunctionDef>>,
    pub(crate) fn_index: FxHashMap<Name, u16>,
    /// Union of the probe bits of functions defined here.
    pub probe_mask: u64,
    /// Probe bits explicitly ignored while in this state (set bit = ignored).
    pub ignores: u64,
    /// Bits from [`state_flags`].
    pub flags: u32,
}

impl StateDef {
    /// Find a function here or in a super state.
    pub fn find_function(&self, name: Name) -> Option<Arc<FunctionDef>> {
        let mut scope = Some(self);
        while let Some(state) = scope {
            if let Some(&i) = state.fn_index.get(&name) {
                return Some(state.functions[i as usize].clone());
            }
            scope = state.super_state.as_deref();
        }
        None
    }

    /// Entered automatically at startup.
    pub fn is_auto(&self) -> bool {
        self.flags & state_flags::AUTO != 0
    }
}

/// A class: flattened instance layout, defaults, functions, states.
#[derive(Debug)]
pub struct ClassDef {
    /// Declared identifier.
    pub name: Name,
    /// Parent class, if any.
    pub super_class: Option<Arc<ClassDef>>,
    /// Instance properties including inherited ones, offsets absolute.
    pub properties: Vec<PropertyDef>,
    /// Byte size of an instance's property block.
    pub instance_size: u32,
    /// Default property block template, `instance_size` bytes. String and
    /// array slots in it are null; `default_text` lists the string values to
    /// hydrate into an engine's own copy at registration time. Instances are
    /// deep copies of the hydrated block; scripts may read it but never
    /// write it.
    pub defaults: Vec<u8>,
    /// String defaults as (block offset, text), applied when an engine
    /// registers the class.
    pub default_text: Vec<(u32, String)>,
    /// Functions declared by this class (not inherited ones).
    pub functions: Vec<Arc<FunctionDef>>,
    pub(crate) fn_index: FxHashMap<Name, u16>,
    /// States declared by this class (not inherited ones).
    pub states: Vec<Arc<StateDef>>,
    pub(crate) state_index: FxHashMap<Name, u16>,
    /// Union of probe bits of class-scope probe functions, own and inherited.
    pub probe_mask: u64,
    /// Class-scope label-addressed code, for instances outside any state.
    pub code: Vec<u8>,
    /// Label table for `code`.
    pub labels: Vec<(Name, u32)>,
}

impl ClassDef {
    /// Find a class-scope function, walking the super chain.
    pub fn find_function(&self, name: Name) -> Option<Arc<FunctionDef>> {
        let mut scope = Some(self);
        while let Some(class) = scope {
            if let Some(&i) = class.fn_index.get(&name) {
                return Some(class.functions[i as usize].clone());
            }
            scope = class.super_class.as_deref();
        }
        None
    }

    /// Function by declaration index, for direct-bound call sites.
    pub fn function(&self, index: u16) -> Option<&Arc<FunctionDef>> {
        self.functions.get(index as usize)
    }

    /// Find a state by name, walking the super chain.
    pub fn find_state(&self, name: Name) -> Option<Arc<StateDef>> {
        let mut scope = Some(self);
        while let Some(class) = scope {
            if let Some(&i) = class.state_index.get(&name) {
                return Some(class.states[i as usize].clone());
            }
            scope = class.super_class.as_deref();
        }
        None
    }

    /// The startup state: the first auto-flagged state found walking from
    /// this class upward.
    pub fn auto_state(&self) -> Option<Arc<StateDef>> {
        let mut scope = Some(self);
        while let Some(class) = scope {
            if let Some(state) = class.states.iter().find(|s| s.is_auto()) {
                return Some(state.clone());
            }
            scope = class.super_class.as_deref();
        }
        None
    }

    /// Instance property by operand index.
    pub fn property(&self, index: u16) -> Option<&PropertyDef> {
        self.properties.get(index as usize)
    }

    /// Instance property by name.
    pub fn find_property(&self, name: Name) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// True when `self` is `ancestor` or derives from it.
    pub fn is_child_of(self: &Arc<Self>, ancestor: &Arc<ClassDef>) -> bool {
        let mut scope = Some(self.clone());
        while let Some(class) = scope {
            if Arc::ptr_eq(&class, ancestor) {
                return true;
            }
            scope = class.super_class.clone();
        }
        false
    }
}

/// The scope a cursor executes against: a state, or the class fallback.
#[derive(Debug, Clone)]
pub enum ScriptScope {
    /// Inside a named state.
    State(Arc<StateDef>),
    /// No state active; the class is the scope.
    Class(Arc<ClassDef>),
}

impl ScriptScope {
    /// Scope name: the state's name, or `None` for class scope.
    pub fn state_name(&self) -> Name {
        match self {
            ScriptScope::State(s) => s.name,
            ScriptScope::Class(_) => Name::NONE,
        }
    }

    /// The label-addressed code this scope executes.
    pub fn code(&self) -> &[u8] {
        match self {
            ScriptScope::State(s) => &s.code,
            ScriptScope::Class(c) => &c.code,
        }
    }

    /// The active state, when there is one.
    pub fn state(&self) -> Option<&Arc<StateDef>> {
        match self {
            ScriptScope::State(s) => Some(s),
            ScriptScope::Class(_) => None,
        }
    }

    /// Resolve a label here or in a super state, returning the scope that
    /// owns the matching code together with the byte offset.
    pub fn find_label(&self, label: Name) -> Option<(ScriptScope, u32)> {
        match self {
            ScriptScope::Class(class) => class
                .labels
                .iter()
                .find(|(n, _)| *n == label)
                .map(|&(_, off)| (self.clone(), off)),
            ScriptScope::State(state) => {
                let mut scope = Some(state.clone());
                while let Some(s) = scope {
                    if let Some(&(_, off)) = s.labels.iter().find(|(n, _)| *n == label) {
                        return Some((ScriptScope::State(s), off));
                    }
                    scope = s.super_state.clone();
                }
                None
            }
        }
    }
}

/// Registration error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A class with the same name already exists.
    #[error("class '{0}' is already registered")]
    DuplicateClass(Name),
}

/// All registered classes, indexed densely by [`ClassId`] with a name map.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Arc<ClassDef>>,
    by_name: FxHashMap<Name, ClassId>,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, assigning the next id.
    pub fn register(&mut self, class: Arc<ClassDef>) -> Result<ClassId, RegistryError> {
        if self.by_name.contains_key(&class.name) {
            return Err(RegistryError::DuplicateClass(class.name));
        }
        let id = self.classes.len() as ClassId;
        self.by_name.insert(class.name, id);
        self.classes.push(class);
        Ok(id)
    }

    /// Class by id.
    pub fn get(&self, id: ClassId) -> Option<&Arc<ClassDef>> {
        self.classes.get(id as usize)
    }

    /// Class by name.
    pub fn find(&self, name: Name) -> Option<&Arc<ClassDef>> {
        self.by_name.get(&name).map(|&id| &self.classes[id as usize])
    }

    /// Id of a registered class.
    pub fn id_of(&self, name: Name) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
