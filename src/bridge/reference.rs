//! `Reference`: a typed view of native memory.
//!
//! ```js
//! const bytes = new Reference(interop.types.uint8, 4); // owned, zeroed
//! bytes[0] = 300;                                       // stored as 44
//! const alias = new Reference("uint8", bytes);          // borrowed, unchecked
//! ```
//!
//! Element access goes through indexed interceptors, `value` and struct
//! field names through a named interceptor. Owned memory is freed when the
//! proxy's wrapper is finalized; borrowed memory never is.

use super::attach::pin_parent;
use super::coerce::{to_bool, to_native_string, to_number, to_utf16_buffer};
use super::memory::{NativeRegion, NativeScalar, OwnedBlock, read_scalar, write_scalar};
use super::pointer;
use super::state::BridgeState;
use super::types::{ElementKind, StructField, StructLayout, TypeDescriptor};
use super::wrapper::{self, DataWrapper, ReferenceData};
use super::{instantiate, is_internal_construct};
use crate::error::{BridgeError, Result};
use crate::gc::Tracked;
use std::ptr::NonNull;

const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

pub fn install<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    global: v8::Local<v8::Object>,
    state: &BridgeState,
) -> v8::Local<'s, v8::Function> {
    let template = v8::FunctionTemplate::new(scope, construct);
    let name = v8::String::new(scope, "Reference").unwrap();
    template.set_class_name(name);

    let instance = template.instance_template(scope);
    instance.set_internal_field_count(state.internal_field_count());
    instance.set_indexed_property_handler(
        v8::IndexedPropertyHandlerConfiguration::new()
            .getter(index_get)
            .setter(index_set),
    );
    instance.set_named_property_handler(
        v8::NamedPropertyHandlerConfiguration::new()
            .getter(named_get)
            .setter(named_set),
    );

    let proto = template.prototype_template(scope);
    let key = v8::String::new(scope, "toString").unwrap();
    let to_string_fn = v8::FunctionTemplate::new(scope, to_string);
    proto.set(key.into(), to_string_fn.into());

    state.set_reference_template(v8::Global::new(scope, template));

    let constructor = template.get_function(scope).unwrap();
    global.set(scope, name.into(), constructor.into());
    constructor
}

/// A fresh `Reference` object over `data`.
pub fn new_reference<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    data: ReferenceData,
) -> Result<v8::Local<'s, v8::Object>> {
    let template = state.reference_template(scope)?;
    let object = instantiate(scope, template)?;
    state
        .wrappers
        .adopt(scope, object, DataWrapper::Reference(data));
    Ok(object)
}

/// Zeroed owned memory for `count` elements.
pub fn allocate(state: &BridgeState, element: TypeDescriptor, count: usize) -> Result<ReferenceData> {
    let block = element
        .size()
        .checked_mul(count)
        .and_then(|size| OwnedBlock::zeroed(size, element.align(), state.ledger.clone()))
        .ok_or_else(|| {
            BridgeError::invalid_argument(format!(
                "cannot allocate {} element(s) of {}",
                count,
                element.name()
            ))
        })?;

    Ok(ReferenceData {
        region: NativeRegion::Owned(Tracked::new(block)),
        element,
        count: Some(count),
    })
}

/// View over memory owned by someone else.
pub fn borrow(address: usize, element: TypeDescriptor, count: Option<usize>) -> Result<ReferenceData> {
    let base = NonNull::new(address as *mut u8)
        .ok_or_else(|| BridgeError::invalid_argument("cannot wrap a null address"))?;

    Ok(ReferenceData {
        region: NativeRegion::Borrowed(base),
        element,
        count,
    })
}

fn construct<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, _rv: v8::ReturnValue<'s>) {
    if args.new_target().is_undefined() {
        BridgeError::invalid_argument("Reference constructor requires 'new'").throw(scope);
        return;
    }

    if is_internal_construct(&args) {
        return;
    }

    if let Err(err) = construct_from_script(scope, &args) {
        err.throw(scope);
    }
}

fn construct_from_script<'s>(scope: &mut v8::PinScope<'s, '_>, args: &v8::FunctionCallbackArguments<'s>) -> Result<()> {
    let state = BridgeState::current(scope)?;
    let element = resolve_type(scope, &state, args.get(0))?;
    let size_or_address = args.get(1);

    let data = if size_or_address.is_undefined() {
        allocate(&state, element, 1)?
    } else if size_or_address.is_number() || size_or_address.is_number_object() {
        let count = element_count(to_number(scope, size_or_address))?;
        allocate(&state, element, count)?
    } else {
        let address = pointer::address_of(scope, size_or_address).ok_or_else(|| {
            BridgeError::invalid_argument(
                "Reference size must be an element count, a Pointer, a Reference or a BigInt",
            )
        })?;
        borrow(address, element, None)?
    };

    let this = args.this();
    let borrowed = !data.region.owns_memory();
    state
        .wrappers
        .adopt(scope, this, DataWrapper::Reference(data));

    // An alias of another Reference (or of a Pointer into one) must not
    // outlive the memory it views.
    if borrowed {
        pin_parent(scope, this, size_or_address);
    }
    Ok(())
}

fn element_count(size: f64) -> Result<usize> {
    if size.is_finite() && size >= 1.0 && size.fract() == 0.0 && size <= u32::MAX as f64 {
        Ok(size as usize)
    } else {
        Err(BridgeError::invalid_argument(format!(
            "Reference size must be a positive integer, got {size}"
        )))
    }
}

/// Descriptor named by an `interop.types` entry or a type name string.
pub fn resolve_type<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    state: &BridgeState,
    value: v8::Local<'s, v8::Value>,
) -> Result<TypeDescriptor> {
    if value.is_string() || value.is_string_object() {
        let tag = to_native_string(scope, value);
        return state
            .metadata
            .lookup(&tag)
            .ok_or_else(|| BridgeError::invalid_argument(format!("unknown type '{tag}'")));
    }

    if let Some(wrapper) = wrapper::resolve(scope, value) {
        // SAFETY: `value` is an argument of the running call.
        if let DataWrapper::Type(descriptor) = unsafe { wrapper.as_ref() } {
            return Ok(descriptor.clone());
        }
    }

    Err(BridgeError::invalid_argument(
        "Reference type must be an interop.types entry or a type name",
    ))
}

/// The reference data behind `this`.
///
/// The returned borrow is not tied to `scope`: it stays valid while `this` is
/// rooted by the running callback, since wrappers are only freed by
/// finalization or an explicit detach, and neither can happen mid-call.
fn reference_data<'s, 'a>(scope: &mut v8::PinScope<'s, '_>, this: v8::Local<'s, v8::Object>) -> Result<&'a ReferenceData> {
    let wrapper =
        wrapper::resolve(scope, this.into()).ok_or(BridgeError::DetachedAccess("reference"))?;

    // SAFETY: see above.
    match unsafe { wrapper.as_ref() } {
        DataWrapper::Reference(data) => Ok(data),
        _ => Err(BridgeError::DetachedAccess("reference")),
    }
}

fn scalar_to_value<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    scalar: NativeScalar,
) -> Result<v8::Local<'s, v8::Value>> {
    let value: v8::Local<v8::Value> = match scalar {
        NativeScalar::Signed(v) if v.unsigned_abs() <= MAX_SAFE_INTEGER => {
            v8::Number::new(scope, v as f64).into()
        }
        NativeScalar::Signed(v) => v8::BigInt::new_from_i64(scope, v).into(),
        NativeScalar::Unsigned(v) if v <= MAX_SAFE_INTEGER => v8::Number::new(scope, v as f64).into(),
        NativeScalar::Unsigned(v) => v8::BigInt::new_from_u64(scope, v).into(),
        NativeScalar::Float(v) => v8::Number::new(scope, v).into(),
        NativeScalar::Bool(v) => v8::Boolean::new(scope, v).into(),
        NativeScalar::Unichar(unit) => {
            v8::String::new_from_two_byte(scope, &[unit], v8::NewStringType::Normal)
                .ok_or_else(|| BridgeError::Script("failed to create string".to_string()))?
                .into()
        }
        NativeScalar::Pointer(0) => v8::null(scope).into(),
        NativeScalar::Pointer(address) => {
            let state = BridgeState::current(scope)?;
            pointer::new_pointer(scope, &state, address)?.into()
        }
    };

    Ok(value)
}

fn value_to_scalar<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>, kind: ElementKind) -> NativeScalar {
    if let Ok(big) = v8::Local::<v8::BigInt>::try_from(value) {
        let (bits, _lossless) = big.u64_value();
        return NativeScalar::Unsigned(bits);
    }

    match kind {
        ElementKind::Bool if !value.is_number() => NativeScalar::Bool(to_bool(value)),
        ElementKind::Unichar if value.is_string() || value.is_string_object() => {
            let units = to_utf16_buffer(scope, value);
            NativeScalar::Unichar(units.first().copied().unwrap_or(0))
        }
        ElementKind::Pointer if value.is_null_or_undefined() => NativeScalar::Pointer(0),
        ElementKind::Pointer if value.is_object() => match pointer::address_of(scope, value) {
            Some(address) => NativeScalar::Pointer(address),
            None => NativeScalar::Float(to_number(scope, value)),
        },
        _ => NativeScalar::Float(to_number(scope, value)),
    }
}

fn read_element<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    owner: v8::Local<v8::Object>,
    data: &ReferenceData,
    index: u32,
) -> Result<v8::Local<'s, v8::Value>> {
    let address = data.element_address(index)?;

    match &data.element {
        TypeDescriptor::Primitive(kind) => {
            // SAFETY: owned regions were bounds-checked above; borrowed
            // regions are valid for as long as their creator promised.
            let scalar = unsafe { read_scalar(address, *kind) };
            scalar_to_value(scope, scalar)
        }
        TypeDescriptor::Struct(layout) => {
            let state = BridgeState::current(scope)?;
            let view = new_reference(
                scope,
                &state,
                borrow(address as usize, TypeDescriptor::Struct(layout.clone()), Some(1))?,
            )?;
            pin_parent(scope, view, owner.into());
            Ok(view.into())
        }
    }
}

fn write_element<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    data: &ReferenceData,
    index: u32,
    value: v8::Local<'s, v8::Value>,
) -> Result<()> {
    let address = data.element_address(index)?;

    match &data.element {
        TypeDescriptor::Primitive(kind) => {
            let scalar = value_to_scalar(scope, value, *kind);
            // SAFETY: as in read_element.
            unsafe { write_scalar(address, *kind, scalar) };
            Ok(())
        }
        TypeDescriptor::Struct(layout) => write_struct(scope, layout, address, value),
    }
}

fn struct_field(data: &ReferenceData, name: &str) -> Option<StructField> {
    match &data.element {
        TypeDescriptor::Struct(layout) => layout.field_named(name).cloned(),
        TypeDescriptor::Primitive(_) => None,
    }
}

fn read_struct<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    layout: &StructLayout,
    base: *mut u8,
) -> Result<v8::Local<'s, v8::Value>> {
    let snapshot = v8::Object::new(scope);

    for field in layout.fields() {
        // SAFETY: the field lies inside element 0.
        let scalar = unsafe { read_scalar(base.wrapping_add(field.offset), field.kind) };
        let value = scalar_to_value(scope, scalar)?;
        let key = v8::String::new(scope, &field.name)
            .ok_or_else(|| BridgeError::Script("failed to create field name".to_string()))?;
        snapshot.set(scope, key.into(), value);
    }

    Ok(snapshot.into())
}

fn write_struct(
    scope: &mut v8::PinScope,
    layout: &StructLayout,
    base: *mut u8,
    value: v8::Local<v8::Value>,
) -> Result<()> {
    let Ok(source) = v8::Local::<v8::Object>::try_from(value) else {
        return Err(BridgeError::invalid_argument(format!(
            "expected an object to assign to struct {}",
            layout.name()
        )));
    };

    for field in layout.fields() {
        let Some(key) = v8::String::new(scope, &field.name) else {
            continue;
        };

        // A throwing getter leaves its exception pending; stop there.
        let Some(field_value) = source.get(scope, key.into()) else {
            return Ok(());
        };

        if field_value.is_undefined() {
            continue;
        }

        let scalar = value_to_scalar(scope, field_value, field.kind);
        // SAFETY: the field lies inside the element at `base`.
        unsafe { write_scalar(base.wrapping_add(field.offset), field.kind, scalar) };
    }

    Ok(())
}

fn read_value<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    owner: v8::Local<v8::Object>,
    data: &ReferenceData,
) -> Result<v8::Local<'s, v8::Value>> {
    match &data.element {
        TypeDescriptor::Primitive(_) => read_element(scope, owner, data, 0),
        TypeDescriptor::Struct(layout) => read_struct(scope, layout, data.element_address(0)?),
    }
}

fn write_value<'s>(scope: &mut v8::PinScope<'s, '_>, data: &ReferenceData, value: v8::Local<'s, v8::Value>) -> Result<()> {
    match &data.element {
        TypeDescriptor::Primitive(ElementKind::Unichar)
            if value.is_string() || value.is_string_object() =>
        {
            write_utf16(scope, data, value)
        }
        TypeDescriptor::Primitive(_) => write_element(scope, data, 0, value),
        TypeDescriptor::Struct(layout) => {
            write_struct(scope, layout, data.element_address(0)?, value)
        }
    }
}

/// Copy a whole string into a unichar buffer, NUL-terminated when it fits.
fn write_utf16(scope: &mut v8::PinScope, data: &ReferenceData, value: v8::Local<v8::Value>) -> Result<()> {
    let units = to_utf16_buffer(scope, value);
    let capacity = data.count.unwrap_or(units.len() + 1);
    let base = data.element_address(0)?;
    let unit_size = ElementKind::Unichar.size();

    let written = units.len().min(capacity);
    for (i, unit) in units.iter().take(written).enumerate() {
        // SAFETY: i < capacity, the element count of the region.
        unsafe {
            write_scalar(
                base.wrapping_add(i * unit_size),
                ElementKind::Unichar,
                NativeScalar::Unichar(*unit),
            )
        };
    }

    if written < capacity {
        // SAFETY: written < capacity.
        unsafe {
            write_scalar(
                base.wrapping_add(written * unit_size),
                ElementKind::Unichar,
                NativeScalar::Unichar(0),
            )
        };
    }

    if written < units.len() {
        tracing::debug!(
            "Truncated string of {} code units to a {} unit buffer",
            units.len(),
            capacity
        );
    }

    Ok(())
}

fn index_get<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    index: u32,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    let this = args.this();

    match reference_data(scope, this).and_then(|data| read_element(scope, this, data, index)) {
        Ok(value) => rv.set(value),
        Err(err) => err.throw(scope),
    }

    v8::Intercepted::Yes
}

fn index_set<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    index: u32,
    value: v8::Local<'s, v8::Value>,
    args: v8::PropertyCallbackArguments<'s>,
    _rv: v8::ReturnValue<()>,
) -> v8::Intercepted {
    let result = reference_data(scope, args.this())
        .and_then(|data| write_element(scope, data, index, value));

    if let Err(err) = result {
        err.throw(scope);
    }

    v8::Intercepted::Yes
}

/// Named properties the interceptor owns on `data`, or `None` to fall through.
enum NamedSlot {
    Value,
    Field(StructField),
}

fn named_slot(data: &ReferenceData, name: &str) -> Option<NamedSlot> {
    if name == "value" {
        return Some(NamedSlot::Value);
    }

    struct_field(data, name).map(NamedSlot::Field)
}

fn named_get<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    key: v8::Local<'s, v8::Name>,
    args: v8::PropertyCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
) -> v8::Intercepted {
    let Ok(key) = v8::Local::<v8::String>::try_from(key) else {
        return v8::Intercepted::No;
    };

    let name = key.to_rust_string_lossy(scope);
    let this = args.this();

    let data = match reference_data(scope, this) {
        Ok(data) => data,
        // Detached: `value` reads as undefined, everything else falls through.
        Err(_) if name == "value" => return v8::Intercepted::Yes,
        Err(_) => return v8::Intercepted::No,
    };

    let result = match named_slot(data, &name) {
        Some(NamedSlot::Value) => read_value(scope, this, data),
        Some(NamedSlot::Field(field)) => data.element_address(0).and_then(|base| {
            // SAFETY: the field lies inside element 0.
            let scalar = unsafe { read_scalar(base.wrapping_add(field.offset), field.kind) };
            scalar_to_value(scope, scalar)
        }),
        None => return v8::Intercepted::No,
    };

    match result {
        Ok(value) => rv.set(value),
        Err(err) => err.throw(scope),
    }

    v8::Intercepted::Yes
}

fn named_set<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    key: v8::Local<'s, v8::Name>,
    value: v8::Local<'s, v8::Value>,
    args: v8::PropertyCallbackArguments<'s>,
    _rv: v8::ReturnValue<()>,
) -> v8::Intercepted {
    let Ok(key) = v8::Local::<v8::String>::try_from(key) else {
        return v8::Intercepted::No;
    };

    let name = key.to_rust_string_lossy(scope);

    let data = match reference_data(scope, args.this()) {
        Ok(data) => data,
        Err(_) if name == "value" => return v8::Intercepted::Yes,
        Err(_) => return v8::Intercepted::No,
    };

    let result = match named_slot(data, &name) {
        Some(NamedSlot::Value) => write_value(scope, data, value),
        Some(NamedSlot::Field(field)) => data.element_address(0).map(|base| {
            let scalar = value_to_scalar(scope, value, field.kind);
            // SAFETY: the field lies inside element 0.
            unsafe { write_scalar(base.wrapping_add(field.offset), field.kind, scalar) };
        }),
        None => return v8::Intercepted::No,
    };

    if let Err(err) = result {
        err.throw(scope);
    }

    v8::Intercepted::Yes
}

fn to_string<'s>(scope: &mut v8::PinScope<'s, '_>, args: v8::FunctionCallbackArguments<'s>, mut rv: v8::ReturnValue<'s>) {
    let this = args.this();

    let text = match reference_data(scope, this) {
        Ok(data) => describe(scope, this, data),
        Err(_) => "<Reference: detached>".to_string(),
    };

    if let Some(text) = v8::String::new(scope, &text) {
        rv.set(text.into());
    }
}

fn describe(scope: &mut v8::PinScope, this: v8::Local<v8::Object>, data: &ReferenceData) -> String {
    if let (TypeDescriptor::Primitive(_), Some(1)) = (&data.element, data.count)
        && let Ok(value) = read_element(scope, this, data, 0)
    {
        return to_native_string(scope, value);
    }

    format!("<Reference: {:#x} {}>", data.address(), data.element.name())
}
