//! Cross-heap object bridge.
//!
//! Script objects proxy native memory and native payloads through three
//! pieces: an attachment slot on the object ([`attach`]), a payload whose
//! lifetime follows the object ([`wrapper`]), and weak references that can
//! observe collection ([`weak_ref`]). [`reference`] and [`pointer`] build the
//! script-visible classes on top.

pub mod attach;
pub mod coerce;
pub mod interop;
pub mod memory;
pub mod pointer;
pub mod reference;
pub mod state;
pub mod types;
pub mod weak_ref;
pub mod wrapper;

pub use state::{BridgeState, BridgeStats};
pub use types::{ElementKind, StructLayout, TypeDescriptor, TypeMetadata, TypeRegistry};
pub use wrapper::{DataWrapper, ReferenceData, WrapperRegistry};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use std::ffi::c_void;
use std::rc::Rc;

/// Address passed as the sole constructor argument when the bridge
/// instantiates a class itself. Scripts cannot forge an `External`.
static INTERNAL_CONSTRUCT: u8 = 0;

fn internal_construct_marker() -> *mut c_void {
    &INTERNAL_CONSTRUCT as *const u8 as *mut c_void
}

pub(crate) fn is_internal_construct(args: &v8::FunctionCallbackArguments) -> bool {
    v8::Local::<v8::External>::try_from(args.get(0))
        .is_ok_and(|marker| marker.value() == internal_construct_marker())
}

/// Instantiate `template` without running its script-facing constructor logic.
pub(crate) fn instantiate<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    template: v8::Local<'s, v8::FunctionTemplate>,
) -> Result<v8::Local<'s, v8::Object>> {
    let constructor = template
        .get_function(scope)
        .ok_or_else(|| BridgeError::Script("failed to instantiate class".to_string()))?;
    let marker = v8::External::new(scope, internal_construct_marker());

    constructor
        .new_instance(scope, &[marker.into()])
        .ok_or_else(|| BridgeError::Script("constructor threw during instantiation".to_string()))
}

/// Install `Reference`, `Pointer`, the weak reference class and the interop
/// namespace into the current context.
pub fn install(scope: &mut v8::PinScope, state: &Rc<BridgeState>, config: &BridgeConfig) {
    state.install(scope);

    let global = scope.get_current_context().global(scope);

    let reference = reference::install(scope, global, state);
    let pointer = pointer::install(scope, global, state);
    weak_ref::install(scope, global, &config.weak_ref_name);
    interop::install(scope, global, state, &config.interop_name, reference, pointer);

    tracing::debug!(
        "Bridge installed ({:?}, {} type tags)",
        state.attach_mode,
        state.metadata.tags().len()
    );
}
