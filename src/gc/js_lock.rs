//! Thread-local record of the isolate currently driven by this thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};

/// Memory delta accumulated while no isolate was current.
/// Drained by the next `JsLock::new()`.
static PENDING_MEMORY_DELTA: AtomicI64 = AtomicI64::new(0);

thread_local! {
    static CURRENT_ISOLATE: Cell<Option<*mut v8::Isolate>> = const { Cell::new(None) };
}

/// RAII marker that an isolate is entered on this thread.
///
/// `Runtime` creates one around every evaluation, collection and dispatched
/// task, so buffers allocated by script callbacks report their size to V8
/// immediately. Buffers released inside GC finalizers or after the runtime is
/// gone fall back to the deferred path.
///
/// Nesting is supported: the previous isolate is restored on drop.
pub struct JsLock {
    isolate: *mut v8::Isolate,
    previous: Option<*mut v8::Isolate>,
}

impl JsLock {
    /// Enter `isolate`, applying memory adjustments deferred since the last lock.
    pub fn new(isolate: &mut v8::Isolate) -> Self {
        let isolate_ptr = isolate as *mut _;

        let pending = PENDING_MEMORY_DELTA.swap(0, Ordering::SeqCst);

        if pending != 0 {
            isolate.adjust_amount_of_external_allocated_memory(pending);
            log::trace!("Applied deferred external memory adjustment: {} bytes", pending);
        }

        let previous = CURRENT_ISOLATE.with(|c| c.replace(Some(isolate_ptr)));

        Self {
            isolate: isolate_ptr,
            previous,
        }
    }

    /// The lock held by this thread, if any.
    pub fn try_current() -> Option<JsLockRef> {
        CURRENT_ISOLATE.with(|c| c.get().map(|ptr| JsLockRef { isolate: ptr }))
    }

    pub fn adjust_external_memory(&self, delta: i64) {
        JsLockRef {
            isolate: self.isolate,
        }
        .adjust_external_memory(delta);
    }
}

impl Drop for JsLock {
    fn drop(&mut self) {
        CURRENT_ISOLATE.with(|c| c.set(self.previous));
    }
}

/// Lightweight copy of the current lock, returned by `JsLock::try_current()`.
#[derive(Clone, Copy)]
pub struct JsLockRef {
    isolate: *mut v8::Isolate,
}

impl JsLockRef {
    /// Report `delta` bytes of external memory (negative when freed).
    pub fn adjust_external_memory(&self, delta: i64) {
        if delta != 0 {
            // SAFETY: the pointer is registered only while the owning JsLock
            // is alive, and the JsLock borrows a live isolate.
            unsafe {
                (*self.isolate).adjust_amount_of_external_allocated_memory(delta);
            }
            log::trace!("Adjusted external memory: {} bytes", delta);
        }
    }
}

/// Record an adjustment to apply when the next JsLock is taken.
pub(crate) fn defer_memory_adjustment(delta: i64) {
    if delta != 0 {
        PENDING_MEMORY_DELTA.fetch_add(delta, Ordering::SeqCst);
        log::trace!("Deferred external memory adjustment: {} bytes", delta);
    }
}
