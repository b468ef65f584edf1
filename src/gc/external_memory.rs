//! RAII reporting of native bytes to the V8 collector.

use super::js_lock::{JsLock, defer_memory_adjustment};

/// Reports `amount` bytes to V8 on creation and withdraws them on drop.
///
/// Owned `Reference` regions carry one of these, so the heap pressure of a
/// tiny proxy object reflects the native buffer behind it.
pub struct ExternalMemoryGuard {
    amount: i64,
}

impl ExternalMemoryGuard {
    pub fn new(amount: i64) -> Self {
        report(amount);
        Self { amount }
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }
}

fn report(delta: i64) {
    if delta == 0 {
        return;
    }

    match JsLock::try_current() {
        Some(lock) => lock.adjust_external_memory(delta),
        None => defer_memory_adjustment(delta),
    }
}

impl Drop for ExternalMemoryGuard {
    fn drop(&mut self) {
        report(-self.amount);
    }
}

impl std::fmt::Debug for ExternalMemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMemoryGuard")
            .field("amount", &self.amount)
            .finish()
    }
}
