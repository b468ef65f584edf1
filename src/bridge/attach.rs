//! Locating a native payload from a script object.
//!
//! Two encodings exist. Objects created from a template with an internal
//! field keep the payload pointer in field 0. Every other object gets a
//! private (script-invisible) property under a fixed key. Callers never pick
//! one: [`attach`] and [`resolve`] try the internal field first and fall back
//! to the private key only when the object has no internal fields.
//!
//! The stored pointer does not own anything. Lifetime is handled by
//! [`crate::bridge::wrapper::WrapperRegistry`].

use super::wrapper::WrapperCell;
use std::ffi::c_void;
use std::ptr::NonNull;

/// Private key name standing in for the internal field.
pub const PAYLOAD_KEY: &str = "native-bridge::payload";

/// Private key linking a derived object to the object whose memory it views.
pub const PARENT_KEY: &str = "native-bridge::parent";

/// Result of looking at one encoding.
pub enum Probe<'s> {
    /// The object cannot use this encoding.
    Unsupported,
    /// The encoding is available but holds no payload.
    Empty,
    Found(v8::Local<'s, v8::External>),
}

/// One physical encoding of the attachment record.
pub trait AttachStrategy {
    /// Store `payload`, returning `false` when the object does not support this encoding.
    fn try_attach(
        &self,
        scope: &mut v8::PinScope,
        object: v8::Local<v8::Object>,
        payload: v8::Local<v8::External>,
    ) -> bool;

    fn probe<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        object: v8::Local<'s, v8::Object>,
    ) -> Probe<'s>;

    /// Remove whatever is stored. Returns `false` when unsupported.
    fn clear(&self, scope: &mut v8::PinScope, object: v8::Local<v8::Object>) -> bool;
}

/// Fast path: internal field 0.
pub struct InternalFieldSlot;

impl AttachStrategy for InternalFieldSlot {
    fn try_attach(
        &self,
        _scope: &mut v8::PinScope,
        object: v8::Local<v8::Object>,
        payload: v8::Local<v8::External>,
    ) -> bool {
        object.internal_field_count() > 0 && object.set_internal_field(0, payload.into())
    }

    fn probe<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        object: v8::Local<'s, v8::Object>,
    ) -> Probe<'s> {
        if object.internal_field_count() == 0 {
            return Probe::Unsupported;
        }

        object
            .get_internal_field(scope, 0)
            .and_then(|data| v8::Local::<v8::Value>::try_from(data).ok())
            .and_then(|value| v8::Local::<v8::External>::try_from(value).ok())
            .map_or(Probe::Empty, Probe::Found)
    }

    fn clear(&self, scope: &mut v8::PinScope, object: v8::Local<v8::Object>) -> bool {
        if object.internal_field_count() == 0 {
            return false;
        }

        let undefined = v8::undefined(scope);
        object.set_internal_field(0, undefined.into())
    }
}

/// Fallback: a private property keyed by [`PAYLOAD_KEY`].
pub struct PrivateKeySlot;

impl AttachStrategy for PrivateKeySlot {
    fn try_attach(
        &self,
        scope: &mut v8::PinScope,
        object: v8::Local<v8::Object>,
        payload: v8::Local<v8::External>,
    ) -> bool {
        set_private(scope, object, PAYLOAD_KEY, payload.into())
    }

    fn probe<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        object: v8::Local<'s, v8::Object>,
    ) -> Probe<'s> {
        get_private(scope, object, PAYLOAD_KEY)
            .and_then(|value| v8::Local::<v8::External>::try_from(value).ok())
            .map_or(Probe::Empty, Probe::Found)
    }

    fn clear(&self, scope: &mut v8::PinScope, object: v8::Local<v8::Object>) -> bool {
        delete_private(scope, object, PAYLOAD_KEY)
    }
}

/// Attach `cell` to `value`. Last write wins; null, undefined and primitives
/// are ignored.
pub fn attach(scope: &mut v8::PinScope, value: v8::Local<v8::Value>, cell: NonNull<WrapperCell>) {
    let Ok(object) = v8::Local::<v8::Object>::try_from(value) else {
        return;
    };

    let payload = v8::External::new(scope, cell.as_ptr() as *mut c_void);

    if InternalFieldSlot.try_attach(scope, object, payload) {
        return;
    }

    if !PrivateKeySlot.try_attach(scope, object, payload) {
        tracing::warn!("Failed to attach native payload through the private key");
    }
}

/// Locate the cell attached to `value`, if any. Never throws and never attaches.
pub fn resolve<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Option<NonNull<WrapperCell>> {
    let object = v8::Local::<v8::Object>::try_from(value).ok()?;

    let external = match InternalFieldSlot.probe(scope, object) {
        Probe::Found(external) => external,
        Probe::Empty => return None,
        Probe::Unsupported => match PrivateKeySlot.probe(scope, object) {
            Probe::Found(external) => external,
            Probe::Empty | Probe::Unsupported => return None,
        },
    };

    NonNull::new(external.value() as *mut WrapperCell)
}

/// Remove the attachment from `value`. Returns `true` if an encoding was cleared.
pub fn detach(scope: &mut v8::PinScope, value: v8::Local<v8::Value>) -> bool {
    let Ok(object) = v8::Local::<v8::Object>::try_from(value) else {
        return false;
    };

    InternalFieldSlot.clear(scope, object) || PrivateKeySlot.clear(scope, object)
}

fn private_key<'s>(scope: &mut v8::PinScope<'s, '_>, name: &str) -> Option<v8::Local<'s, v8::Private>> {
    let name = v8::String::new(scope, name)?;
    Some(v8::Private::for_api(scope, Some(name)))
}

/// Store `value` under the private key `name`.
pub fn set_private(
    scope: &mut v8::PinScope,
    object: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) -> bool {
    let Some(key) = private_key(scope, name) else {
        return false;
    };

    object.set_private(scope, key, value).unwrap_or(false)
}

/// Keep `parent` reachable for as long as `dependent` is.
///
/// Views and handles derived from a `Reference` borrow its owned memory, so
/// they must root it. Non-object parents (BigInt addresses) are ignored.
pub fn pin_parent(scope: &mut v8::PinScope, dependent: v8::Local<v8::Object>, parent: v8::Local<v8::Value>) {
    if !parent.is_object() {
        return;
    }

    if !set_private(scope, dependent, PARENT_KEY, parent) {
        tracing::warn!("Failed to link a derived object to its parent");
    }
}

/// Read the private key `name`. `None` when the key was never set.
pub fn get_private<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    object: v8::Local<'s, v8::Object>,
    name: &str,
) -> Option<v8::Local<'s, v8::Value>> {
    let key = private_key(scope, name)?;

    if !object.has_private(scope, key)? {
        return None;
    }

    object.get_private(scope, key)
}

fn delete_private(scope: &mut v8::PinScope, object: v8::Local<v8::Object>, name: &str) -> bool {
    let Some(key) = private_key(scope, name) else {
        return false;
    };

    object.delete_private(scope, key).unwrap_or(false)
}
