//! Native payloads exposed to script and the registry that ties their
//! lifetime to the owning script object.
//!
//! A payload is boxed into a [`WrapperCell`] and handed to a weak finalizer on
//! the owning object. Whoever runs or drops that finalizer frees the cell:
//! the engine when the object is collected, [`WrapperRegistry::detach`] when
//! the embedder lets go early, or the registry itself on teardown. The
//! attachment only carries a borrowed pointer to the cell, and that pointer
//! is only followed once the registry confirms it handed it out.

use super::attach;
use super::memory::NativeRegion;
use super::state::BridgeState;
use super::types::TypeDescriptor;
use crate::error::{BridgeError, Result, invariant_violation};
use crate::gc::GcTraceable;
use crate::DeriveGcTraceable;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

const WRAPPER_MAGIC: u64 = 0x4e42_5752_4150_5052;

/// Native value or pointer currently exposed to script.
#[derive(DeriveGcTraceable)]
#[gc(crate_path = "crate")]
pub enum DataWrapper {
    /// Bare native address behind a `Pointer` object.
    Pointer(usize),
    /// Typed memory behind a `Reference` proxy.
    Reference(#[gc(track)] ReferenceData),
    /// Type descriptor behind an `interop.types` entry.
    Type(TypeDescriptor),
    /// Embedder payload the bridge never interprets.
    Opaque(Box<dyn Any>),
}

impl DataWrapper {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataWrapper::Pointer(_) => "pointer",
            DataWrapper::Reference(_) => "reference",
            DataWrapper::Type(_) => "type",
            DataWrapper::Opaque(_) => "opaque",
        }
    }
}

impl std::fmt::Debug for DataWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataWrapper::Pointer(address) => write!(f, "Pointer({address:#x})"),
            DataWrapper::Reference(data) => f.debug_tuple("Reference").field(data).finish(),
            DataWrapper::Type(descriptor) => write!(f, "Type({})", descriptor.name()),
            DataWrapper::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// Memory, element type and optional element count of a `Reference`.
#[derive(Debug, DeriveGcTraceable)]
#[gc(crate_path = "crate")]
pub struct ReferenceData {
    #[gc(track)]
    pub region: NativeRegion,
    pub element: TypeDescriptor,
    /// `None` when wrapping foreign memory of unknown extent.
    pub count: Option<usize>,
}

impl ReferenceData {
    /// Address of element `index`.
    ///
    /// Bounds are only checked when the element count is known; for borrowed
    /// memory of unknown extent the caller owns the risk.
    pub fn element_address(&self, index: u32) -> Result<*mut u8> {
        if let Some(count) = self.count
            && index as usize >= count
        {
            return Err(BridgeError::OutOfRange { index, count });
        }

        Ok(self
            .region
            .base()
            .wrapping_add(index as usize * self.element.size()))
    }

    pub fn address(&self) -> usize {
        self.region.address()
    }
}

/// Heap cell a script object's attachment points at.
#[repr(C)]
pub struct WrapperCell {
    magic: u64,
    id: u64,
    wrapper: DataWrapper,
}

impl WrapperCell {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wrapper(&self) -> &DataWrapper {
        &self.wrapper
    }
}

/// Frees its cell when dropped. Owned by the finalizer closure.
struct CellOwner(NonNull<WrapperCell>);

impl Drop for CellOwner {
    fn drop(&mut self) {
        // SAFETY: the pointer came from Box::into_raw in adopt() and this is
        // its only owner.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Live wrapper counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrapperCounts {
    pub adopted: u64,
    pub finalized: u64,
    pub detached: u64,
    pub live: usize,
}

/// Per-isolate table of adopted wrappers, keyed by cell address.
#[derive(Default)]
pub struct WrapperRegistry {
    next_id: Cell<u64>,
    live: RefCell<HashMap<usize, v8::Weak<v8::Object>>>,
    adopted: Cell<u64>,
    finalized: Cell<u64>,
    detached: Cell<u64>,
}

impl WrapperRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Attach `wrapper` to `object` and bind its lifetime to the object.
    ///
    /// A wrapper previously adopted by `object` is freed first.
    pub fn adopt<'s>(
        self: &Rc<Self>,
        scope: &mut v8::PinScope<'s, '_>,
        object: v8::Local<'s, v8::Object>,
        wrapper: DataWrapper,
    ) -> NonNull<WrapperCell> {
        self.detach(scope, object.into());

        let id = self.next_id.get() + 1;
        self.next_id.set(id);

        let kind = wrapper.kind_name();
        let cell = Box::new(WrapperCell {
            magic: WRAPPER_MAGIC,
            id,
            wrapper,
        });
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(cell)) };
        let address = ptr.as_ptr() as usize;
        let owner = CellOwner(ptr);

        attach::attach(scope, object.into(), ptr);

        let registry: Weak<WrapperRegistry> = Rc::downgrade(self);
        let weak = v8::Weak::with_finalizer(
            scope,
            object,
            Box::new(move |_isolate: &mut v8::Isolate| {
                // SAFETY: `owner` is still alive, so the cell is too.
                let bytes = unsafe { owner.0.as_ref() }.wrapper.external_memory_size();
                tracing::trace!("Finalizing {} wrapper #{} ({} external bytes)", kind, id, bytes);

                if let Some(registry) = registry.upgrade() {
                    let handle = registry.live.borrow_mut().remove(&address);
                    drop(handle);
                    registry.finalized.set(registry.finalized.get() + 1);
                }

                drop(owner);
            }),
        );

        self.live.borrow_mut().insert(address, weak);
        self.adopted.set(self.adopted.get() + 1);

        tracing::trace!("Adopted {} wrapper #{}", kind, id);

        ptr
    }

    /// Clear the attachment on `value` and free its wrapper now.
    ///
    /// Returns `false` when nothing adopted was attached.
    pub fn detach<'s>(&self, scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> bool {
        let Some(cell) = self.resolve_cell(scope, value) else {
            return false;
        };

        // SAFETY: the cell stays alive until its handle is removed below.
        let id = unsafe { cell.as_ref() }.id;
        attach::detach(scope, value);

        // Dropping the weak handle drops the finalizer and with it the cell.
        // Keep the map borrow released while that happens.
        let handle = self.live.borrow_mut().remove(&(cell.as_ptr() as usize));
        let found = handle.is_some();
        drop(handle);

        if found {
            self.detached.set(self.detached.get() + 1);
            tracing::trace!("Detached wrapper #{}", id);
        }

        found
    }

    /// Free every wrapper still alive. Must run while the isolate exists.
    pub fn clear(&self) {
        let handles: Vec<_> = self.live.borrow_mut().drain().map(|(_, weak)| weak).collect();

        if !handles.is_empty() {
            tracing::debug!("Releasing {} wrapper(s) on teardown", handles.len());
        }

        drop(handles);
    }

    /// Locate the wrapper this registry attached to `value`.
    ///
    /// The pointer is valid while `value` is reachable and not detached.
    pub fn resolve<'s>(&self, scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Option<NonNull<DataWrapper>> {
        self.resolve_cell(scope, value).map(|cell| {
            // SAFETY: resolve_cell validated the cell.
            NonNull::from(unsafe { &cell.as_ref().wrapper })
        })
    }

    /// Cell attached to `value`, if this registry adopted it.
    ///
    /// Externals the registry never handed out (an embedder's own pointer in
    /// field 0, or a stale copy of a detached one) are not dereferenced.
    fn resolve_cell<'s>(&self, scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Option<NonNull<WrapperCell>> {
        let cell = attach::resolve(scope, value)?;

        if !self.live.borrow().contains_key(&(cell.as_ptr() as usize)) {
            tracing::debug!("Ignoring an attachment that was not adopted here");
            return None;
        }

        // SAFETY: the live entry owns the cell through its finalizer.
        let magic = unsafe { cell.as_ref() }.magic;
        if magic != WRAPPER_MAGIC {
            invariant_violation(format!("adopted cell lost its magic ({magic:#x})"));
        }

        Some(cell)
    }

    pub fn counts(&self) -> WrapperCounts {
        WrapperCounts {
            adopted: self.adopted.get(),
            finalized: self.finalized.get(),
            detached: self.detached.get(),
            live: self.live.borrow().len(),
        }
    }
}

/// Locate the wrapper attached to `value` in the current context.
pub fn resolve<'s>(scope: &mut v8::PinScope<'s, '_>, value: v8::Local<'s, v8::Value>) -> Option<NonNull<DataWrapper>> {
    let state = BridgeState::current(scope).ok()?;
    state.wrappers.resolve(scope, value)
}
