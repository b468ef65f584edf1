//! V8 embedding with a cross-heap object bridge.
//!
//! Scripts get `Reference` (typed views of native memory), `Pointer`,
//! `WeakRef` and the `interop` namespace. Native payloads attached to script
//! objects live exactly as long as those objects.
//!
//! ```ignore
//! use native_bridge_v8::{BridgeConfig, Runtime};
//!
//! let mut runtime = Runtime::new(BridgeConfig::default());
//! let text = runtime.eval_to_string(
//!     "const r = new Reference(interop.types.uint8, 1); r[0] = 300; String(r[0])",
//! )?;
//! assert_eq!(text, "44");
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gc;
pub mod platform;
pub mod runtime;

// Core API
pub use bridge::{BridgeStats, ElementKind, StructLayout, TypeDescriptor, TypeMetadata, TypeRegistry};
pub use config::{AttachMode, BridgeConfig, ConsoleCallback, ConsoleLevel};
pub use dispatch::{DispatchError, MainThreadDispatcher};
pub use error::{BridgeError, Result};
pub use runtime::Runtime;

// GC tracking
pub use gc::GcTraceable;
pub use native_bridge_gc_derive::GcTraceable as DeriveGcTraceable;
