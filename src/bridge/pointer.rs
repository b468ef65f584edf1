//! `Pointer`: an untyped native address exposed to script.
//!
//! Pointers derived from a `Reference` (through `interop.handleof` or
//! arithmetic on such a pointer) keep that reference alive. Pointers built
//! from a bare number or BigInt root nothing.

use super::attach::pin_parent;
use super::coerce::{to_integer_bits, to_number};
use super::state::BridgeState;
use super::wrapper::{self, DataWrapper};
use super::{instantiate, is_internal_construct};
use crate::error::{BridgeError, Result};

pub fn install<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    global: v8::Local<v8::Object>,
    state: &BridgeState,
) -> v8::Local<'s, v8::Function> {
    let template = v8::FunctionTemplate::new(scope, construct);
    let name = v8::String::new(scope, "Pointer").unwrap();
    template.set_class_name(name);
    template
        .instance_template(scope)
        .set_internal_field_count(state.internal_field_count());

    let proto = template.prototype_template(scope);

    macro_rules! method {
        ($name:literal, $callback:expr) => {{
            let key = v8::String::new(scope, $name).unwrap();
            let function = v8::FunctionTemplate::new(scope, $callback);
            proto.set(key.into(), function.into());
        }};
    }

    method!("add", add);
    method!("subtract", subtract);
    method!("toNumber", to_number_method);
    method!("toBigInt", to_big_int);
    method!("toString", to_string);

    state.set_pointer_template(v8::Global::new(scope, template));

    let constructor = template.get_function(scope).unwrap();
    global.set(scope, name.into(), constructor.into());
    constructor
}

/// A fresh `Pointer` object for `address`.
pub fn new_pointer<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    address: usize,
) -> Result<v8::Local<'s, v8::Object>> {
    let template = state.pointer_template(scope)?;
    let object = instantiate(scope, template)?;
    state
        .wrappers
        .adopt(scope, object, DataWrapper::Pointer(address));
    Ok(object)
}

/// Native address carried by a `Pointer`, a `Reference` or a BigInt.
pub fn address_of<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Option<usize> {
    if let Ok(big) = v8::Local::<v8::BigInt>::try_from(value) {
        let (address, _lossless) = big.u64_value();
        return Some(address as usize);
    }

    let wrapper = wrapper::resolve(scope, value)?;

    // SAFETY: `value` is held by the caller's scope, which keeps its wrapper alive.
    match unsafe { wrapper.as_ref() } {
        DataWrapper::Pointer(address) => Some(*address),
        DataWrapper::Reference(data) => Some(data.address()),
        DataWrapper::Type(_) | DataWrapper::Opaque(_) => None,
    }
}

/// Like [`address_of`], but also accepts plain numbers.
pub fn to_address<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Result<usize> {
    if value.is_number() || value.is_number_object() {
        return Ok(to_integer_bits(to_number(scope, value)) as usize);
    }

    address_of(scope, value).ok_or_else(|| {
        BridgeError::invalid_argument("expected a number, a BigInt, a Pointer or a Reference")
    })
}

fn this_address<'s>(scope: &mut v8::PinScope<'s, '_>, args: &v8::FunctionCallbackArguments<'s>) -> Result<usize> {
    let wrapper =
        wrapper::resolve(scope, args.this().into()).ok_or(BridgeError::DetachedAccess("pointer"))?;

    // SAFETY: the receiver is rooted for the duration of the call.
    match unsafe { wrapper.as_ref() } {
        DataWrapper::Pointer(address) => Ok(*address),
        _ => Err(BridgeError::DetachedAccess("pointer")),
    }
}

fn construct<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, _rv: v8::ReturnValue<'s>) {
    if args.new_target().is_undefined() {
        BridgeError::invalid_argument("Pointer constructor requires 'new'").throw(scope);
        return;
    }

    if is_internal_construct(&args) {
        return;
    }

    let result = to_address(scope, args.get(0)).and_then(|address| {
        let state = BridgeState::current(scope)?;
        state
            .wrappers
            .adopt(scope, args.this(), DataWrapper::Pointer(address));
        Ok(())
    });

    if let Err(err) = result {
        err.throw(scope);
    }
}

fn offset_by<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    args: &v8::FunctionCallbackArguments<'s>,
    rv: &mut v8::ReturnValue<'s>,
    step: fn(usize, usize) -> usize,
) {
    let result = this_address(scope, args).and_then(|address| {
        let delta = to_integer_bits(to_number(scope, args.get(0))) as usize;
        let state = BridgeState::current(scope)?;
        let derived = new_pointer(scope, &state, step(address, delta))?;
        pin_parent(scope, derived, args.this().into());
        Ok(derived)
    });

    match result {
        Ok(pointer) => rv.set(pointer.into()),
        Err(err) => err.throw(scope),
    }
}

fn add<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    offset_by(scope, &args, &mut rv, usize::wrapping_add);
}

fn subtract<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    offset_by(scope, &args, &mut rv, usize::wrapping_sub);
}

fn to_number_method<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    args: v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue<'s>,
) {
    match this_address(scope, &args) {
        Ok(address) => rv.set_double(address as f64),
        Err(err) => err.throw(scope),
    }
}

fn to_big_int<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    match this_address(scope, &args) {
        Ok(address) => {
            let big = v8::BigInt::new_from_u64(scope, address as u64);
            rv.set(big.into());
        }
        Err(err) => err.throw(scope),
    }
}

fn to_string<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    let text = match this_address(scope, &args) {
        Ok(address) => format!("<Pointer: {address:#x}>"),
        Err(_) => "<Pointer: detached>".to_string(),
    };

    if let Some(text) = v8::String::new(scope, &text) {
        rv.set(text.into());
    }
}
