//! Native memory behind `Reference` proxies.
//!
//! A region is either owned (allocated for the proxy, freed exactly once when
//! the region is dropped) or borrowed (someone else's memory, never freed).

use super::coerce::to_integer_bits;
use super::types::ElementKind;
use crate::gc::{GcTraceable, Tracked};
use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

/// Per-isolate counters for owned regions.
#[derive(Debug, Default)]
pub struct RegionLedger {
    allocated: Cell<u64>,
    freed: Cell<u64>,
    live_bytes: Cell<usize>,
}

impl RegionLedger {
    pub fn allocated(&self) -> u64 {
        self.allocated.get()
    }

    pub fn freed(&self) -> u64 {
        self.freed.get()
    }

    pub fn live(&self) -> u64 {
        self.allocated.get() - self.freed.get()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }
}

/// Zeroed heap block with a fixed layout.
pub struct OwnedBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    ledger: Rc<RegionLedger>,
}

impl OwnedBlock {
    /// Allocate `size` zeroed bytes aligned to `align`.
    ///
    /// Returns `None` for a zero size or an invalid alignment; aborts through
    /// `handle_alloc_error` when the allocator fails, like `Vec` does.
    pub fn zeroed(size: usize, align: usize, ledger: Rc<RegionLedger>) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let layout = Layout::from_size_align(size, align).ok()?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout);
        };

        ledger.allocated.set(ledger.allocated.get() + 1);
        ledger.live_bytes.set(ledger.live_bytes.get() + size);

        Some(Self {
            ptr,
            layout,
            ledger,
        })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl GcTraceable for OwnedBlock {
    fn external_memory_size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for OwnedBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout and
        // Drop runs once.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };

        self.ledger.freed.set(self.ledger.freed.get() + 1);
        self.ledger
            .live_bytes
            .set(self.ledger.live_bytes.get() - self.layout.size());

        tracing::trace!("Freed owned region of {} bytes", self.layout.size());
    }
}

/// Memory a `Reference` reads and writes.
pub enum NativeRegion {
    Owned(Tracked<OwnedBlock>),
    Borrowed(NonNull<u8>),
}

impl NativeRegion {
    pub fn base(&self) -> *mut u8 {
        match self {
            NativeRegion::Owned(block) => block.as_ptr(),
            NativeRegion::Borrowed(ptr) => ptr.as_ptr(),
        }
    }

    pub fn address(&self) -> usize {
        self.base() as usize
    }

    pub fn owns_memory(&self) -> bool {
        matches!(self, NativeRegion::Owned(_))
    }
}

impl GcTraceable for NativeRegion {
    fn external_memory_size(&self) -> usize {
        match self {
            NativeRegion::Owned(block) => block.external_memory_size(),
            NativeRegion::Borrowed(_) => 0,
        }
    }
}

impl std::fmt::Debug for NativeRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeRegion::Owned(block) => f
                .debug_struct("Owned")
                .field("base", &block.as_ptr())
                .field("len", &block.len())
                .field("tracked", &block.tracked_bytes())
                .finish(),
            NativeRegion::Borrowed(ptr) => f.debug_tuple("Borrowed").field(ptr).finish(),
        }
    }
}

/// A native value in transit between script and memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeScalar {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
    Unichar(u16),
    Pointer(usize),
}

impl NativeScalar {
    /// Two's complement bits, wrapping like a C cast.
    fn bits(self) -> u64 {
        match self {
            NativeScalar::Signed(v) => v as u64,
            NativeScalar::Unsigned(v) => v,
            NativeScalar::Float(v) => to_integer_bits(v),
            NativeScalar::Bool(v) => v as u64,
            NativeScalar::Unichar(v) => v as u64,
            NativeScalar::Pointer(v) => v as u64,
        }
    }

    fn float(self) -> f64 {
        match self {
            NativeScalar::Signed(v) => v as f64,
            NativeScalar::Unsigned(v) => v as f64,
            NativeScalar::Float(v) => v,
            NativeScalar::Bool(v) => v as u8 as f64,
            NativeScalar::Unichar(v) => v as f64,
            NativeScalar::Pointer(v) => v as f64,
        }
    }

    fn truthy(self) -> bool {
        match self {
            NativeScalar::Bool(v) => v,
            NativeScalar::Float(v) => v != 0.0 && !v.is_nan(),
            other => other.bits() != 0,
        }
    }
}

/// Load one element of `kind` from `address`.
///
/// # Safety
///
/// `address` must be valid for reading `kind.size()` bytes. No alignment is
/// required.
pub unsafe fn read_scalar(address: *const u8, kind: ElementKind) -> NativeScalar {
    // SAFETY: guaranteed by the caller; every load is unaligned.
    unsafe {
        match kind {
            ElementKind::Int8 => NativeScalar::Signed(address.cast::<i8>().read_unaligned() as i64),
            ElementKind::UInt8 => {
                NativeScalar::Unsigned(address.cast::<u8>().read_unaligned() as u64)
            }
            ElementKind::Int16 => {
                NativeScalar::Signed(address.cast::<i16>().read_unaligned() as i64)
            }
            ElementKind::UInt16 => {
                NativeScalar::Unsigned(address.cast::<u16>().read_unaligned() as u64)
            }
            ElementKind::Int32 => {
                NativeScalar::Signed(address.cast::<i32>().read_unaligned() as i64)
            }
            ElementKind::UInt32 => {
                NativeScalar::Unsigned(address.cast::<u32>().read_unaligned() as u64)
            }
            ElementKind::Int64 => NativeScalar::Signed(address.cast::<i64>().read_unaligned()),
            ElementKind::UInt64 => NativeScalar::Unsigned(address.cast::<u64>().read_unaligned()),
            ElementKind::Float32 => {
                NativeScalar::Float(address.cast::<f32>().read_unaligned() as f64)
            }
            ElementKind::Float64 => NativeScalar::Float(address.cast::<f64>().read_unaligned()),
            ElementKind::Bool => NativeScalar::Bool(address.read() != 0),
            ElementKind::Unichar => NativeScalar::Unichar(address.cast::<u16>().read_unaligned()),
            ElementKind::Pointer => {
                NativeScalar::Pointer(address.cast::<usize>().read_unaligned())
            }
        }
    }
}

/// Store `value` as one element of `kind` at `address`, narrowing as C would.
///
/// # Safety
///
/// `address` must be valid for writing `kind.size()` bytes. No alignment is
/// required.
pub unsafe fn write_scalar(address: *mut u8, kind: ElementKind, value: NativeScalar) {
    let bits = value.bits();

    // SAFETY: guaranteed by the caller; every store is unaligned.
    unsafe {
        match kind {
            ElementKind::Int8 | ElementKind::UInt8 => address.write(bits as u8),
            ElementKind::Int16 | ElementKind::UInt16 | ElementKind::Unichar => {
                address.cast::<u16>().write_unaligned(bits as u16)
            }
            ElementKind::Int32 | ElementKind::UInt32 => {
                address.cast::<u32>().write_unaligned(bits as u32)
            }
            ElementKind::Int64 | ElementKind::UInt64 => address.cast::<u64>().write_unaligned(bits),
            ElementKind::Float32 => address.cast::<f32>().write_unaligned(value.float() as f32),
            ElementKind::Float64 => address.cast::<f64>().write_unaligned(value.float()),
            ElementKind::Bool => address.write(value.truthy() as u8),
            ElementKind::Pointer => address.cast::<usize>().write_unaligned(bits as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(kind: ElementKind, value: NativeScalar) -> NativeScalar {
        let mut slot = [0u8; 16];
        // Offset by one so every access is misaligned.
        let address = unsafe { slot.as_mut_ptr().add(1) };
        unsafe {
            write_scalar(address, kind, value);
            read_scalar(address, kind)
        }
    }

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(
            round_trip(ElementKind::UInt8, NativeScalar::Float(300.0)),
            NativeScalar::Unsigned(44)
        );
        assert_eq!(
            round_trip(ElementKind::Int8, NativeScalar::Float(200.0)),
            NativeScalar::Signed(-56)
        );
        assert_eq!(
            round_trip(ElementKind::UInt16, NativeScalar::Float(-1.0)),
            NativeScalar::Unsigned(65535)
        );
        assert_eq!(
            round_trip(ElementKind::Int32, NativeScalar::Float(-7.9)),
            NativeScalar::Signed(-7)
        );
    }

    #[test]
    fn test_wide_values() {
        assert_eq!(
            round_trip(ElementKind::Int64, NativeScalar::Signed(i64::MIN)),
            NativeScalar::Signed(i64::MIN)
        );
        assert_eq!(
            round_trip(ElementKind::UInt64, NativeScalar::Unsigned(u64::MAX)),
            NativeScalar::Unsigned(u64::MAX)
        );
        assert_eq!(
            round_trip(ElementKind::Pointer, NativeScalar::Pointer(0xdead_beef)),
            NativeScalar::Pointer(0xdead_beef)
        );
    }

    #[test]
    fn test_floats_and_bools() {
        assert_eq!(
            round_trip(ElementKind::Float64, NativeScalar::Float(1.5)),
            NativeScalar::Float(1.5)
        );
        assert_eq!(
            round_trip(ElementKind::Float32, NativeScalar::Float(0.1)),
            NativeScalar::Float(0.1f32 as f64)
        );
        assert_eq!(
            round_trip(ElementKind::Bool, NativeScalar::Float(2.0)),
            NativeScalar::Bool(true)
        );
        assert_eq!(
            round_trip(ElementKind::Bool, NativeScalar::Bool(false)),
            NativeScalar::Bool(false)
        );
        assert_eq!(
            round_trip(ElementKind::Unichar, NativeScalar::Unichar(0x00e9)),
            NativeScalar::Unichar(0x00e9)
        );
    }

    #[test]
    fn test_owned_block_is_freed_once() {
        let ledger = Rc::new(RegionLedger::default());

        let block = OwnedBlock::zeroed(64, 8, ledger.clone()).unwrap();
        assert_eq!(block.len(), 64);
        assert_eq!(block.as_ptr() as usize % 8, 0);
        assert_eq!(ledger.live(), 1);
        assert_eq!(ledger.live_bytes(), 64);

        let region = NativeRegion::Owned(Tracked::new(block));
        assert!(region.owns_memory());
        assert_eq!(region.external_memory_size(), 64);
        assert!(format!("{:?}", region).contains("tracked: 64"));

        drop(region);
        assert_eq!(ledger.allocated(), 1);
        assert_eq!(ledger.freed(), 1);
        assert_eq!(ledger.live_bytes(), 0);
    }

    #[test]
    fn test_zero_sized_block_is_rejected() {
        let ledger = Rc::new(RegionLedger::default());
        assert!(OwnedBlock::zeroed(0, 8, ledger.clone()).is_none());
        assert_eq!(ledger.allocated(), 0);
    }

    #[test]
    fn test_borrowed_region_reports_nothing() {
        let mut backing = [0u32; 4];
        let region = NativeRegion::Borrowed(NonNull::new(backing.as_mut_ptr().cast()).unwrap());

        assert!(!region.owns_memory());
        assert_eq!(region.external_memory_size(), 0);
        assert_eq!(region.address(), backing.as_ptr() as usize);
    }
}
