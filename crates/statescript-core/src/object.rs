//! Script instances
//!
//! Instances are owned by the engine in a slot table and addressed by
//! handle. Handles are never recycled: a destroyed instance leaves a dead
//! slot behind, so stale object references stored in script variables
//! resolve to nothing instead of to an unrelated newcomer. Only the host
//! creates and destroys instances; no opcode allocates.

use std::sync::Arc;

use crate::class::{ClassDef, ClassId, ScriptScope};
use crate::name::Name;

/// Handle naming a script instance. Handle 0 is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjHandle(u32);

impl ObjHandle {
    /// The null reference.
    pub const NONE: ObjHandle = ObjHandle(0);

    /// True for the null reference.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Raw handle bits, as stored in object properties.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild a handle from stored bits.
    pub fn from_raw(raw: u32) -> ObjHandle {
        ObjHandle(raw)
    }
}

impl Default for ObjHandle {
    fn default() -> Self {
        ObjHandle::NONE
    }
}

/// Instance flag bits.
pub mod instance_flags {
    /// Marked for destruction; rejects incoming dispatch.
    pub const PENDING_DESTROY: u32 = 0x0001;
    /// A singular function is on the stack for this instance.
    pub const IN_SINGULAR: u32 = 0x0002;
}

/// Persistent state-machine bookkeeping for one instance.
#[derive(Debug, Clone)]
pub struct StateRecord {
    /// Active scope: the current state, or the class when no state is set.
    pub scope: ScriptScope,
    /// Scope owning the code `cursor` indexes into. Differs from `scope`
    /// when a label resolved into a super state.
    pub code_scope: ScriptScope,
    /// Resume offset for state code; `None` means stopped.
    pub cursor: Option<u32>,
    /// Installed notification mask: `(state | class) & !ignores`.
    pub probe_mask: u64,
    /// Latent action claimed by a native; state code stays suspended until
    /// the host clears it.
    pub latent_action: Option<u32>,
    /// Bumped on every transition or cursor redirect. Lets in-flight
    /// execution notice it was pre-empted.
    pub epoch: u32,
}

impl StateRecord {
    /// Fresh record for an instance outside any state.
    pub fn new(class: Arc<ClassDef>) -> Self {
        let probe_mask = class.probe_mask;
        let scope = ScriptScope::Class(class);
        StateRecord {
            code_scope: scope.clone(),
            scope,
            cursor: None,
            probe_mask,
            latent_action: None,
            epoch: 0,
        }
    }

    /// Whether a probe function with `bit` is currently listened for.
    /// Functions without a probe bit are always heard.
    pub fn is_probing(&self, bit: Option<u8>) -> bool {
        match bit {
            Some(b) => self.probe_mask & (1u64 << b) != 0,
            None => true,
        }
    }

    /// Name of the active state, `None` outside any state.
    pub fn state_name(&self) -> Name {
        self.scope.state_name()
    }
}

/// A live script instance.
#[derive(Debug)]
pub struct Instance {
    /// Diagnostic identifier the host gave the instance.
    pub name: Name,
    /// The instance's class.
    pub class: Arc<ClassDef>,
    /// Registry id of `class`, for default-block addressing.
    pub class_id: ClassId,
    /// Property block, `class.instance_size` bytes.
    pub props: Vec<u8>,
    /// State-machine record.
    pub state: StateRecord,
    /// Bits from [`instance_flags`].
    pub flags: u32,
}

impl Instance {
    /// Marked for destruction.
    pub fn is_pending_destroy(&self) -> bool {
        self.flags & instance_flags::PENDING_DESTROY != 0
    }

    /// Currently inside a singular call.
    pub fn in_singular(&self) -> bool {
        self.flags & instance_flags::IN_SINGULAR != 0
    }
}

/// Slot table of live instances.
#[derive(Debug, Default)]
pub struct InstanceTable {
    slots: Vec<Option<Instance>>,
}

impl InstanceTable {
    /// Create an empty table. Slot 0 is reserved for the null handle.
    pub fn new() -> Self {
        InstanceTable { slots: vec![None] }
    }

    /// Insert an instance, assigning a fresh handle.
    pub fn insert(&mut self, instance: Instance) -> ObjHandle {
        self.slots.push(Some(instance));
        ObjHandle((self.slots.len() - 1) as u32)
    }

    /// The instance behind `handle`, if still alive.
    pub fn get(&self, handle: ObjHandle) -> Option<&Instance> {
        if handle.is_none() {
            return None;
        }
        self.slots.get(handle.0 as usize).and_then(|s| s.as_ref())
    }

    /// Mutable instance behind `handle`.
    pub fn get_mut(&mut self, handle: ObjHandle) -> Option<&mut Instance> {
        if handle.is_none() {
            return None;
        }
        self.slots.get_mut(handle.0 as usize).and_then(|s| s.as_mut())
    }

    /// Remove an instance, leaving a permanently dead slot.
    pub fn remove(&mut self, handle: ObjHandle) -> Option<Instance> {
        if handle.is_none() {
            return None;
        }
        self.slots.get_mut(handle.0 as usize).and_then(|s| s.take())
    }

    /// Handles of all live instances, in creation order.
    pub fn handles(&self) -> impl Iterator<Item = ObjHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| ObjHandle(i as u32))
    }

    /// Number of live instances.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
