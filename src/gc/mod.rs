//! External memory accounting for native allocations owned by script objects.
//!
//! `Reference` proxies can own native buffers that V8 knows nothing about.
//! Reporting those bytes lets the collector weigh a small proxy object by the
//! memory it actually keeps alive, so owned buffers get finalized promptly.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  JsLock (RAII, entered by every Runtime call)               │
//! │  ├── Registers the isolate in a thread-local                │
//! │  └── Applies deferred memory updates on construction        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ExternalMemoryGuard (RAII)                                 │
//! │  ├── If a JsLock is current → immediate adjust              │
//! │  └── Otherwise (finalizers, teardown) → deferred via atomic │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  GcTraceable / Tracked<T> / #[derive(GcTraceable)]          │
//! │  └── external_memory_size() → usize                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod external_memory;
mod js_lock;
mod traceable;

pub use external_memory::ExternalMemoryGuard;
pub use js_lock::{JsLock, JsLockRef};
pub use traceable::{GcTraceable, Tracked, tracked_guard};
