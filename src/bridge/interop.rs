//! The `interop` namespace: type objects, `sizeof` and `handleof`.

use super::attach::pin_parent;
use super::pointer;
use super::reference::resolve_type;
use super::state::BridgeState;
use super::types::TypeDescriptor;
use super::wrapper::{self, DataWrapper};
use crate::error::{BridgeError, Result};

pub fn install(
    scope: &mut v8::PinScope,
    global: v8::Local<v8::Object>,
    state: &BridgeState,
    name: &str,
    reference: v8::Local<v8::Function>,
    pointer: v8::Local<v8::Function>,
) {
    let interop = v8::Object::new(scope);
    let types = v8::Object::new(scope);

    for tag in state.metadata.tags() {
        let Some(descriptor) = state.metadata.lookup(&tag) else {
            continue;
        };

        let entry = type_object(scope, state, descriptor);
        let key = v8::String::new(scope, &tag).unwrap();
        types.set(scope, key.into(), entry.into());
    }

    set_property(scope, interop, "types", types.into());
    set_property(scope, interop, "Reference", reference.into());
    set_property(scope, interop, "Pointer", pointer.into());

    let sizeof_fn = v8::Function::new(scope, size_of).unwrap();
    set_property(scope, interop, "sizeof", sizeof_fn.into());

    let handleof_fn = v8::Function::new(scope, handle_of).unwrap();
    set_property(scope, interop, "handleof", handleof_fn.into());

    let key = v8::String::new(scope, name).unwrap();
    global.set(scope, key.into(), interop.into());
}

fn set_property(
    scope: &mut v8::PinScope,
    object: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) {
    let key = v8::String::new(scope, name).unwrap();
    object.set(scope, key.into(), value);
}

/// Plain object carrying a type descriptor. Has no internal fields, so the
/// descriptor is attached through the private key.
fn type_object<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    descriptor: TypeDescriptor,
) -> v8::Local<'s, v8::Object> {
    let object = v8::Object::new(scope);

    let name = v8::String::new(scope, descriptor.name()).unwrap();
    set_property(scope, object, "name", name.into());

    let size = v8::Number::new(scope, descriptor.size() as f64);
    set_property(scope, object, "size", size.into());

    state
        .wrappers
        .adopt(scope, object, DataWrapper::Type(descriptor));
    object
}

fn size_of_value<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Result<usize> {
    let state = BridgeState::current(scope)?;

    if let Some(wrapper) = wrapper::resolve(scope, value) {
        // SAFETY: `value` is an argument of the running call.
        match unsafe { wrapper.as_ref() } {
            DataWrapper::Type(descriptor) => return Ok(descriptor.size()),
            DataWrapper::Reference(data) => return Ok(data.element.size()),
            DataWrapper::Pointer(_) => return Ok(std::mem::size_of::<usize>()),
            DataWrapper::Opaque(_) => {}
        }
    }

    resolve_type(scope, &state, value).map(|descriptor| descriptor.size())
}

fn size_of<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    match size_of_value(scope, args.get(0)) {
        Ok(size) => rv.set_uint32(size as u32),
        Err(err) => err.throw(scope),
    }
}

fn handle_of<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    let value = args.get(0);

    let address = wrapper::resolve(scope, value).and_then(|wrapper| {
        // SAFETY: `value` is an argument of the running call.
        match unsafe { wrapper.as_ref() } {
            DataWrapper::Pointer(_) => Some(None),
            DataWrapper::Reference(data) => Some(Some(data.address())),
            DataWrapper::Type(_) | DataWrapper::Opaque(_) => None,
        }
    });

    let result = match address {
        // Already a pointer.
        Some(None) => Ok(value),
        Some(Some(address)) => BridgeState::current(scope)
            .and_then(|state| pointer::new_pointer(scope, &state, address))
            .map(|handle| {
                pin_parent(scope, handle, value);
                handle.into()
            }),
        None => Err(BridgeError::invalid_argument(
            "handleof expects a Reference or a Pointer",
        )),
    };

    match result {
        Ok(handle) => rv.set(handle),
        Err(err) => err.throw(scope),
    }
}
