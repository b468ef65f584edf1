//! Size reporting for values that own native memory.

use super::ExternalMemoryGuard;

/// Types that can report how much memory they hold outside the V8 heap.
///
/// Implement it by hand for raw allocations, or derive it with
/// `#[derive(DeriveGcTraceable)]` and mark the owning fields `#[gc(track)]`:
///
/// ```ignore
/// #[derive(DeriveGcTraceable)]
/// struct Staging {
///     #[gc(track)]
///     bytes: Vec<u8>,
///     generation: u64,
/// }
/// ```
pub trait GcTraceable {
    /// Bytes owned outside the V8 heap, excluding `size_of::<Self>()`.
    fn external_memory_size(&self) -> usize;
}

impl GcTraceable for Vec<u8> {
    fn external_memory_size(&self) -> usize {
        self.capacity()
    }
}

impl GcTraceable for String {
    fn external_memory_size(&self) -> usize {
        self.capacity()
    }
}

impl<T: GcTraceable> GcTraceable for Option<T> {
    fn external_memory_size(&self) -> usize {
        self.as_ref().map(|v| v.external_memory_size()).unwrap_or(0)
    }
}

/// A guard pre-loaded with `value`'s current size.
pub fn tracked_guard<T: GcTraceable>(value: &T) -> ExternalMemoryGuard {
    ExternalMemoryGuard::new(value.external_memory_size() as i64)
}

/// A value bundled with the guard that reports its size.
///
/// The size is taken once, at construction; the value is read-only after. The
/// report is withdrawn when the `Tracked` is dropped, which for owned
/// reference regions happens inside the wrapper finalizer.
pub struct Tracked<T: GcTraceable> {
    value: T,
    guard: ExternalMemoryGuard,
}

impl<T: GcTraceable> Tracked<T> {
    pub fn new(value: T) -> Self {
        let guard = tracked_guard(&value);
        Self { value, guard }
    }

    pub fn tracked_bytes(&self) -> i64 {
        self.guard.amount()
    }
}

impl<T: GcTraceable> std::ops::Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: GcTraceable + std::fmt::Debug> std::fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("value", &self.value)
            .field("tracked_bytes", &self.guard.amount())
            .finish()
    }
}
