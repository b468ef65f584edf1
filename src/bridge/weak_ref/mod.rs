//! Script-visible weak references.
//!
//! `new WeakRef(target)` returns a holder object. The holder keeps only a pair
//! id in a private field; the target is reachable solely through a weak
//! handle in the pair arena, so the holder never keeps it alive. Both objects
//! carry a finalizer and the pair cell is released by whichever runs last.

pub mod state;

use super::attach::{get_private, set_private};
use super::state::BridgeState;
use crate::error::{BridgeError, invariant_violation};
use state::{CallbackState, Outcome, TransitionError};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Private field on the holder: the pair id, or null once cleared.
const TARGET_KEY: &str = "native-bridge::weak-target";

struct PairCell {
    machine: CallbackState,
    target: Option<v8::Weak<v8::Object>>,
    holder: Option<v8::Weak<v8::Object>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairCounts {
    pub created: u64,
    pub released: u64,
    pub live: usize,
}

/// Every live pair of an isolate, keyed by pair id.
#[derive(Default)]
pub struct PairArena {
    next_id: Cell<u64>,
    pairs: RefCell<HashMap<u64, PairCell>>,
    created: Cell<u64>,
    released: Cell<u64>,
}

impl PairArena {
    fn reserve_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn insert(&self, id: u64, target: v8::Weak<v8::Object>, holder: v8::Weak<v8::Object>) {
        let cell = PairCell {
            machine: CallbackState::new(),
            target: Some(target),
            holder: Some(holder),
        };

        self.pairs.borrow_mut().insert(id, cell);
        self.created.set(self.created.get() + 1);
    }

    fn on_target_finalized(&self, id: u64) {
        let (outcome, handle) = {
            let mut pairs = self.pairs.borrow_mut();
            let Some(cell) = pairs.get_mut(&id) else {
                invariant_violation(format!("weak pair #{id} missing at target finalization"));
            };
            (cell.machine.on_target_finalized(), cell.target.take())
        };
        drop(handle);

        self.settle(id, "target", outcome);
    }

    fn on_holder_finalized(&self, id: u64) {
        let (outcome, handle) = {
            let mut pairs = self.pairs.borrow_mut();
            let Some(cell) = pairs.get_mut(&id) else {
                invariant_violation(format!("weak pair #{id} missing at holder finalization"));
            };
            (cell.machine.on_holder_finalized(), cell.holder.take())
        };
        drop(handle);

        self.settle(id, "holder", outcome);
    }

    fn settle(&self, id: u64, side: &str, outcome: Result<Outcome, TransitionError>) {
        match outcome {
            Ok(Outcome::Keep) => {
                tracing::trace!("Weak pair #{}: {} collected", id, side);
            }
            Ok(Outcome::Deferred) => {
                tracing::trace!("Weak pair #{}: holder collected first, cleanup deferred", id);
            }
            Ok(Outcome::Release) => {
                let cell = self.pairs.borrow_mut().remove(&id);
                drop(cell);
                self.released.set(self.released.get() + 1);
                tracing::trace!("Weak pair #{}: released after {} finalizer", id, side);
            }
            Err(err) => invariant_violation(format!("weak pair #{id}: {err}")),
        }
    }

    fn mark_cleared(&self, id: u64) {
        if let Some(cell) = self.pairs.borrow_mut().get_mut(&id) {
            cell.machine.clear();
        }
    }

    fn target<'s>(&self, scope: &mut v8::PinScope<'s, '_>, id: u64) -> Option<v8::Local<'s, v8::Object>> {
        let pairs = self.pairs.borrow();
        let cell = pairs.get(&id)?;

        if cell.machine.is_cleared() {
            return None;
        }

        cell.target.as_ref()?.to_local(scope)
    }

    pub fn counts(&self) -> PairCounts {
        PairCounts {
            created: self.created.get(),
            released: self.released.get(),
            live: self.pairs.borrow().len(),
        }
    }

    /// Drop every pair. Cancels the pending finalizers.
    pub fn clear(&self) {
        let cells: Vec<_> = self.pairs.borrow_mut().drain().map(|(_, cell)| cell).collect();
        drop(cells);
    }
}

/// Install the weak reference constructor on `global` under `name`.
pub fn install(scope: &mut v8::PinScope, global: v8::Local<v8::Object>, name: &str) {
    let template = v8::FunctionTemplate::new(scope, construct);
    let class_name = v8::String::new(scope, name).unwrap();
    template.set_class_name(class_name);

    let proto = template.prototype_template(scope);

    let get_fn = v8::FunctionTemplate::new(scope, get);
    for method in ["get", "deref"] {
        let key = v8::String::new(scope, method).unwrap();
        proto.set(key.into(), get_fn.into());
    }

    let clear_fn = v8::FunctionTemplate::new(scope, clear);
    let key = v8::String::new(scope, "clear").unwrap();
    proto.set(key.into(), clear_fn.into());

    let constructor = template.get_function(scope).unwrap();
    global.set(scope, class_name.into(), constructor.into());
}

fn construct(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    if args.new_target().is_undefined() {
        BridgeError::invalid_argument("WeakRef constructor requires 'new'").throw(scope);
        return;
    }

    let Ok(target) = v8::Local::<v8::Object>::try_from(args.get(0)) else {
        BridgeError::invalid_argument("WeakRef target must be an object").throw(scope);
        return;
    };

    let state = match BridgeState::current(scope) {
        Ok(state) => state,
        Err(err) => {
            err.throw(scope);
            return;
        }
    };

    let holder = args.this();
    let arena = &state.weak_pairs;
    let id = arena.reserve_id();

    let slot = v8::Number::new(scope, id as f64);
    set_private(scope, holder, TARGET_KEY, slot.into());

    let on_target: Weak<PairArena> = Rc::downgrade(arena);
    let target_handle = v8::Weak::with_finalizer(
        scope,
        target,
        Box::new(move |_isolate: &mut v8::Isolate| {
            if let Some(arena) = on_target.upgrade() {
                arena.on_target_finalized(id);
            }
        }),
    );

    let on_holder: Weak<PairArena> = Rc::downgrade(arena);
    let holder_handle = v8::Weak::with_finalizer(
        scope,
        holder,
        Box::new(move |_isolate: &mut v8::Isolate| {
            if let Some(arena) = on_holder.upgrade() {
                arena.on_holder_finalized(id);
            }
        }),
    );

    arena.insert(id, target_handle, holder_handle);

    tracing::trace!("Created weak pair #{}", id);
}

/// Pair id stored on `holder`, `None` once cleared or for foreign receivers.
fn pair_id<'s>(scope: &mut v8::PinScope<'s, '_>, holder: v8::Local<'s, v8::Object>) -> Option<u64> {
    let stored = get_private(scope, holder, TARGET_KEY)?;
    let id = v8::Local::<v8::Number>::try_from(stored).ok()?;
    Some(id.value() as u64)
}

fn get<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    rv.set_null();

    let Some(id) = pair_id(scope, args.this()) else {
        return;
    };

    let Ok(state) = BridgeState::current(scope) else {
        return;
    };

    if let Some(target) = state.weak_pairs.target(scope, id) {
        rv.set(target.into());
    }
}

fn clear<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, _rv: v8::ReturnValue<'s>) {
    let holder = args.this();

    let Some(id) = pair_id(scope, holder) else {
        return;
    };

    let null = v8::null(scope);
    set_private(scope, holder, TARGET_KEY, null.into());

    if let Ok(state) = BridgeState::current(scope) {
        state.weak_pairs.mark_cleared(id);
    }

    tracing::trace!("Cleared weak pair #{}", id);
}
