//! Runtime configuration.

use crate::bridge::types::StructLayout;
use std::sync::Arc;

/// Receives `console.*` output in addition to the tracing events.
pub type ConsoleCallback = Arc<dyn Fn(ConsoleLevel, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl ConsoleLevel {
    pub(crate) fn from_code(code: i32) -> Self {
        match code {
            0 => ConsoleLevel::Error,
            1 => ConsoleLevel::Warn,
            3 => ConsoleLevel::Debug,
            4 => ConsoleLevel::Trace,
            _ => ConsoleLevel::Info,
        }
    }
}

/// Where payload pointers are stored on proxy objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    /// Proxy templates reserve an internal field; plain objects use a private key.
    #[default]
    PreferInternalField,
    /// Proxy templates reserve nothing, so every attachment goes through the private key.
    PrivateKeyOnly,
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Clone)]
pub struct BridgeConfig {
    /// Initial V8 heap size in MB (default: 1MB)
    pub heap_initial_mb: usize,
    /// Maximum V8 heap size in MB (default: 128MB)
    pub heap_max_mb: usize,
    pub attach_mode: AttachMode,
    /// Install `__collect()` for scripts (default: true)
    pub expose_collect: bool,
    /// Global name of the weak reference constructor (default: `WeakRef`)
    pub weak_ref_name: String,
    /// Global name of the interop namespace (default: `interop`)
    pub interop_name: String,
    /// Struct layouts registered with the built-in type registry
    pub structs: Vec<StructLayout>,
    pub console: Option<ConsoleCallback>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heap_initial_mb: 1,
            heap_max_mb: 128,
            attach_mode: AttachMode::default(),
            expose_collect: true,
            weak_ref_name: "WeakRef".to_string(),
            interop_name: "interop".to_string(),
            structs: Vec::new(),
            console: None,
        }
    }
}

impl BridgeConfig {
    pub fn with_attach_mode(mut self, mode: AttachMode) -> Self {
        self.attach_mode = mode;
        self
    }

    pub fn with_struct(mut self, layout: StructLayout) -> Self {
        self.structs.push(layout);
        self
    }

    pub fn with_heap_limits(mut self, initial_mb: usize, max_mb: usize) -> Self {
        self.heap_initial_mb = initial_mb;
        self.heap_max_mb = max_mb;
        self
    }

    pub fn with_console(mut self, callback: ConsoleCallback) -> Self {
        self.console = Some(callback);
        self
    }

    pub fn without_collect(mut self) -> Self {
        self.expose_collect = false;
        self
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("heap_initial_mb", &self.heap_initial_mb)
            .field("heap_max_mb", &self.heap_max_mb)
            .field("attach_mode", &self.attach_mode)
            .field("expose_collect", &self.expose_collect)
            .field("weak_ref_name", &self.weak_ref_name)
            .field("interop_name", &self.interop_name)
            .field("structs", &self.structs.len())
            .field("console", &self.console.is_some())
            .finish()
    }
}
