//! The state machine
//!
//! Each instance carries one state record: an active scope (a state, or
//! the class itself when no state is set), a cursor into that scope's
//! label-addressed code, the installed probe mask and a latent-action
//! marker. Transitions follow a fixed order: end-notification, install,
//! begin-notification, and every mutation of the record bumps its epoch
//! so in-flight execution (including the notifications themselves) can
//! detect that it was pre-empted.

use once_cell::sync::Lazy;
use statescript_core::{probe_bit, Name, ObjHandle, ScriptScope};
use tracing::debug;

use crate::error::ExecResult;
use crate::frame::Frame;
use crate::opcode::Opcode;
use crate::vm::Vm;

static AUTO: Lazy<Name> = Lazy::new(|| Name::new("Auto"));
static BEGIN: Lazy<Name> = Lazy::new(|| Name::new("Begin"));
static BEGIN_STATE: Lazy<Name> = Lazy::new(|| Name::new("BeginState"));
static END_STATE: Lazy<Name> = Lazy::new(|| Name::new("EndState"));

/// How a state transition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoOutcome {
    /// The instance is in the requested state.
    Success,
    /// The target did not resolve (or was the explicit no-state name);
    /// the instance fell back to the class scope.
    NotFound,
    /// A notification handler started its own transition; the original
    /// one stopped without completing.
    Preempted,
    /// The instance is dead.
    Gone,
}

impl Vm {
    /// Send the instance to a state, optionally starting at `label`
    /// instead of the start label.
    ///
    /// The transition order is: end-notification for the old state,
    /// install (scope, probe mask, cursor; the latent marker is cleared),
    /// begin-notification for the new state. A transition to the current
    /// state is a label jump only and fires no notifications. The
    /// sentinel name `Auto` selects the class's auto-enter state.
    pub fn goto_state(
        &mut self,
        object: ObjHandle,
        target: Name,
        label: Option<Name>,
    ) -> ExecResult<GotoOutcome> {
        let Some(inst) = self.objects.get(object) else {
            return Ok(GotoOutcome::Gone);
        };
        let class = inst.class.clone();
        let current = inst.state.state_name();

        let new_scope = if target.is_none() {
            ScriptScope::Class(class.clone())
        } else if target == *AUTO {
            match class.auto_state() {
                Some(state) => ScriptScope::State(state),
                None => ScriptScope::Class(class.clone()),
            }
        } else {
            match class.find_state(target) {
                Some(state) => ScriptScope::State(state),
                None => {
                    self.script_warn_obj(object, class.name, format!("state '{target}' not found"));
                    ScriptScope::Class(class.clone())
                }
            }
        };
        let new_name = new_scope.state_name();

        // A same-state transition repositions the cursor and nothing else.
        if current == new_name {
            self.install_cursor(object, label.unwrap_or(*BEGIN), label.is_some());
            return Ok(outcome_for(new_name));
        }

        // End-notification for the state being left.
        let has_old_state = inst.state.scope.state().is_some();
        let epoch = inst.state.epoch;
        if has_old_state && inst.state.is_probing(probe_bit(*END_STATE)) {
            self.notify(object, *END_STATE)?;
            match self.objects.get(object) {
                None => return Ok(GotoOutcome::Gone),
                Some(inst) if inst.state.epoch != epoch => return Ok(GotoOutcome::Preempted),
                Some(_) => {}
            }
        }

        // Install the new scope, probe mask and cursor.
        debug!(from = %current, to = %new_name, "state transition");
        let has_new_state = new_scope.state().is_some();
        let Some(inst) = self.objects.get_mut(object) else {
            return Ok(GotoOutcome::Gone);
        };
        inst.state.probe_mask = match &new_scope {
            ScriptScope::State(state) => (state.probe_mask | class.probe_mask) & !state.ignores,
            ScriptScope::Class(_) => class.probe_mask,
        };
        inst.state.code_scope = new_scope.clone();
        inst.state.scope = new_scope;
        inst.state.cursor = None;
        inst.state.latent_action = None;
        inst.state.epoch += 1;
        self.install_cursor(object, label.unwrap_or(*BEGIN), label.is_some());

        // Begin-notification for the state being entered.
        let Some(inst) = self.objects.get(object) else {
            return Ok(GotoOutcome::Gone);
        };
        let epoch = inst.state.epoch;
        if has_new_state && inst.state.is_probing(probe_bit(*BEGIN_STATE)) {
            self.notify(object, *BEGIN_STATE)?;
            match self.objects.get(object) {
                None => return Ok(GotoOutcome::Gone),
                Some(inst) if inst.state.epoch != epoch => return Ok(GotoOutcome::Preempted),
                Some(_) => {}
            }
        }
        Ok(outcome_for(new_name))
    }

    /// Reposition the state cursor at a label in the active scope's
    /// chain. A miss nulls the cursor and reports not-found; the active
    /// state stays as it is.
    pub fn goto_label(&mut self, object: ObjHandle, label: Name) -> bool {
        self.install_cursor(object, label, true)
    }

    /// The `GotoLabel` opcode: same as [`Vm::goto_label`], diagnosing
    /// against the executing frame.
    pub(crate) fn redirect_to_label(&mut self, frame: &Frame, label: Name) {
        let Some(inst) = self.objects.get_mut(frame.object) else {
            self.script_warn(frame, "label jump on a dead instance");
            return;
        };
        match inst.state.scope.find_label(label) {
            Some((owning, offset)) => {
                inst.state.code_scope = owning;
                inst.state.cursor = Some(offset);
                inst.state.latent_action = None;
                inst.state.epoch += 1;
            }
            None => {
                inst.state.cursor = None;
                inst.state.epoch += 1;
                self.script_warn(frame, format!("label '{label}' not found"));
            }
        }
    }

    /// Shared cursor install. Returns whether the label resolved;
    /// `explicit` controls whether a miss is diagnosed (entering a state
    /// with no start label is routine and stays silent).
    fn install_cursor(&mut self, object: ObjHandle, label: Name, explicit: bool) -> bool {
        let Some(inst) = self.objects.get_mut(object) else {
            return false;
        };
        let node = inst.state.scope.state_name();
        match inst.state.scope.find_label(label) {
            Some((owning, offset)) => {
                inst.state.code_scope = owning;
                inst.state.cursor = Some(offset);
                inst.state.latent_action = None;
                inst.state.epoch += 1;
                true
            }
            None => {
                inst.state.cursor = None;
                inst.state.epoch += 1;
                if explicit {
                    let node = if node.is_none() {
                        inst.class.name
                    } else {
                        node
                    };
                    self.script_warn_obj(object, node, format!("label '{label}' not found"));
                }
                false
            }
        }
    }

    /// Run the instance's state code until it stops, suspends on a latent
    /// action, or the instance goes away. Transitions and label jumps
    /// performed by the code itself are followed.
    pub fn tick_state(&mut self, object: ObjHandle) -> ExecResult<()> {
        self.begin_dispatch();
        loop {
            let Some(inst) = self.objects.get(object) else {
                return Ok(());
            };
            if inst.is_pending_destroy() || inst.state.latent_action.is_some() {
                return Ok(());
            }
            let Some(cursor) = inst.state.cursor else {
                return Ok(());
            };
            let epoch = inst.state.epoch;
            let scope = inst.state.code_scope.clone();
            let mut frame = Frame::for_scope(object, &scope, cursor);

            match frame.peek() {
                // Falling off the end, an explicit stop, or a return in
                // state code all clear the cursor.
                None => {
                    self.clear_cursor(object);
                    return Ok(());
                }
                Some(byte) if byte == Opcode::Stop as u8 || byte == Opcode::Return as u8 => {
                    self.clear_cursor(object);
                    return Ok(());
                }
                Some(_) => {
                    self.eval(&mut frame, None)?;
                    if let Some(inst) = self.objects.get_mut(object) {
                        if inst.state.epoch == epoch {
                            inst.state.cursor = Some(frame.ip as u32);
                        }
                    }
                }
            }
        }
    }

    fn clear_cursor(&mut self, object: ObjHandle) {
        if let Some(inst) = self.objects.get_mut(object) {
            inst.state.cursor = None;
        }
    }

    /// Suspend state code on a latent action. The pump idles until the
    /// host clears it.
    pub fn set_latent(&mut self, object: ObjHandle, action: u32) {
        if let Some(inst) = self.objects.get_mut(object) {
            inst.state.latent_action = Some(action);
        }
    }

    /// Release a latent action; state code resumes on the next tick.
    pub fn clear_latent(&mut self, object: ObjHandle) {
        if let Some(inst) = self.objects.get_mut(object) {
            inst.state.latent_action = None;
        }
    }

    /// The pending latent action, if any.
    pub fn latent_action(&self, object: ObjHandle) -> Option<u32> {
        self.objects.get(object).and_then(|i| i.state.latent_action)
    }
}

fn outcome_for(new_name: Name) -> GotoOutcome {
    if new_name.is_none() {
        GotoOutcome::NotFound
    } else {
        GotoOutcome::Success
    }
}
