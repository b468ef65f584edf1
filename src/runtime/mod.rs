pub mod bindings;

use crate::bridge::coerce::{to_native_string, to_number};
use crate::bridge::reference::{borrow, new_reference};
use crate::bridge::wrapper::{self, DataWrapper};
use crate::bridge::{self, BridgeState, BridgeStats, TypeMetadata, TypeRegistry};
use crate::config::BridgeConfig;
use crate::dispatch::{self, MainThreadDispatcher, MainThreadTask};
use crate::error::{BridgeError, Result};
use crate::gc::JsLock;
use crate::platform::get_platform;
use std::any::Any;
use std::path::Path;
use std::pin::pin;
use std::rc::Rc;
use tokio::sync::mpsc;

const MB: usize = 1024 * 1024;

/// Message of the exception caught by `$tc`, or `$fallback`.
macro_rules! exception_text {
    ($tc:expr, $fallback:literal) => {
        $tc.exception()
            .and_then(|e| e.to_string(&$tc).map(|s| s.to_rust_string_lossy(&$tc)))
            .unwrap_or_else(|| $fallback.to_string())
    };
}

/// One isolate, one context, with the bridge installed.
///
/// A `Runtime` is bound to the thread that created it. Other threads reach it
/// through [`Runtime::dispatcher`].
pub struct Runtime {
    context: v8::Global<v8::Context>,
    state: Rc<BridgeState>,
    dispatcher: MainThreadDispatcher,
    tasks: mpsc::UnboundedReceiver<MainThreadTask>,
    // Declared last so every handle above is released before the isolate.
    isolate: v8::OwnedIsolate,
}

impl Runtime {
    /// Runtime with the built-in type registry plus `config.structs`.
    pub fn new(config: BridgeConfig) -> Self {
        let mut registry = TypeRegistry::new();

        for layout in &config.structs {
            registry.register_struct(layout.clone());
        }

        Self::with_metadata(config, registry)
    }

    /// Runtime resolving type tags through `metadata`.
    ///
    /// `config.structs` is ignored; register layouts with `metadata` instead.
    pub fn with_metadata(config: BridgeConfig, metadata: impl TypeMetadata + 'static) -> Self {
        get_platform();

        let params = v8::CreateParams::default()
            .heap_limits(config.heap_initial_mb * MB, config.heap_max_mb * MB);
        let mut isolate = v8::Isolate::new(params);

        let state = BridgeState::new(Box::new(metadata), config.attach_mode);
        let (dispatcher, tasks) = dispatch::channel();

        let context = {
            let _lock = JsLock::new(&mut isolate);
            let scope = pin!(v8::HandleScope::new(&mut isolate));
            let mut scope = scope.init();
            let context = v8::Context::new(&scope, Default::default());
            let scope = &mut v8::ContextScope::new(&mut scope, context);

            bindings::setup_console(scope, config.console.clone());
            bindings::setup_performance(scope);
            bindings::setup_runtime_globals(scope, config.expose_collect);
            bridge::install(scope, &state, &config);

            v8::Global::new(scope.as_ref(), context)
        };

        tracing::debug!(
            "Runtime created (heap {}MB..{}MB, {:?})",
            config.heap_initial_mb,
            config.heap_max_mb,
            config.attach_mode
        );

        Self {
            context,
            state,
            dispatcher,
            tasks,
            isolate,
        }
    }

    /// Run `code` and return the completion value converted by `convert`.
    fn run<R>(
        &mut self,
        code: &str,
        convert: impl FnOnce(&mut v8::PinScope, v8::Local<v8::Value>) -> R,
    ) -> Result<R> {
        let _lock = JsLock::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &self.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let source = v8::String::new(scope, code)
            .ok_or_else(|| BridgeError::Script("Failed to create V8 string".to_string()))?;

        let tc = pin!(v8::TryCatch::new(scope));
        let mut tc = tc.init();

        let script = v8::Script::compile(&tc, source, None)
            .ok_or_else(|| BridgeError::Script(exception_text!(tc, "Compile error")))?;

        let value = script
            .run(&tc)
            .ok_or_else(|| BridgeError::Script(exception_text!(tc, "Runtime error")))?;

        Ok(convert(&mut tc, value))
    }

    /// Run `code`, discarding its completion value.
    pub fn evaluate(&mut self, code: &str) -> Result<()> {
        self.run(code, |_, _| ())
    }

    /// Run `code` and return its completion value as native text.
    pub fn eval_to_string(&mut self, code: &str) -> Result<String> {
        self.run(code, to_native_string)
    }

    pub fn eval_number(&mut self, code: &str) -> Result<f64> {
        self.run(code, to_number)
    }

    /// `true` only when the completion value is `true`.
    pub fn eval_bool(&mut self, code: &str) -> Result<bool> {
        self.run(code, |_, value| value.is_true())
    }

    /// Read a script file and run it.
    pub fn run_script_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let code = std::fs::read_to_string(path)?;

        tracing::debug!("Running {} ({} bytes)", path.display(), code.len());

        self.evaluate(&code)
    }

    /// Run `f` inside a handle scope entered in this runtime's context.
    pub fn with_scope<R>(&mut self, f: impl FnOnce(&mut v8::PinScope, &Rc<BridgeState>) -> R) -> R {
        let _lock = JsLock::new(&mut self.isolate);
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &self.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        f(scope, &self.state)
    }

    /// Expose `count` elements of `type_tag` at `address` as the global
    /// `name`, without taking ownership.
    ///
    /// # Safety
    ///
    /// `address` must stay valid for reads and writes of the whole region for
    /// as long as script can reach the reference.
    pub unsafe fn expose_borrowed(
        &mut self,
        name: &str,
        type_tag: &str,
        address: *mut u8,
        count: Option<usize>,
    ) -> Result<()> {
        self.with_scope(|scope, state| {
            let element = state
                .metadata
                .lookup(type_tag)
                .ok_or_else(|| BridgeError::invalid_argument(format!("unknown type '{type_tag}'")))?;

            let data = borrow(address as usize, element, count)?;
            let reference = new_reference(scope, state, data)?;
            set_global(scope, name, reference.into())
        })
    }

    /// Attach an embedder payload to the global object `name`, replacing any
    /// previous one. Returns `false` when `name` is not an object.
    pub fn attach_opaque(&mut self, name: &str, payload: impl Any) -> bool {
        self.with_scope(|scope, state| {
            let Some(object) = global_value(scope, name)
                .and_then(|value| v8::Local::<v8::Object>::try_from(value).ok())
            else {
                return false;
            };

            state
                .wrappers
                .adopt(scope, object, DataWrapper::Opaque(Box::new(payload)));
            true
        })
    }

    /// Borrow the embedder payload attached to the global `name`.
    pub fn with_opaque<T: 'static, R>(&mut self, name: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.with_scope(|scope, _state| {
            let value = global_value(scope, name)?;
            let wrapper = wrapper::resolve(scope, value)?;

            // SAFETY: `value` is held by this scope, and nothing below can
            // finalize or detach it.
            match unsafe { wrapper.as_ref() } {
                DataWrapper::Opaque(payload) => (**payload).downcast_ref::<T>().map(f),
                _ => None,
            }
        })
    }

    /// Free the payload attached to the global `name` right away.
    pub fn detach(&mut self, name: &str) -> bool {
        self.with_scope(|scope, state| {
            global_value(scope, name).is_some_and(|value| state.wrappers.detach(scope, value))
        })
    }

    /// Force a full, synchronous collection. Finalizers have run on return.
    pub fn collect_garbage(&mut self) {
        let _lock = JsLock::new(&mut self.isolate);
        self.isolate
            .request_garbage_collection_for_testing(v8::GarbageCollectionType::Full);
        self.pump_platform_tasks();
    }

    pub fn stats(&self) -> BridgeStats {
        self.state.stats()
    }

    pub fn dispatcher(&self) -> MainThreadDispatcher {
        self.dispatcher.clone()
    }

    /// Run every queued task without waiting. Returns how many ran.
    pub fn run_pending_tasks(&mut self) -> usize {
        let mut ran = 0;

        while let Ok(task) = self.tasks.try_recv() {
            let _lock = JsLock::new(&mut self.isolate);
            task(self);
            ran += 1;
        }

        self.isolate.perform_microtask_checkpoint();
        self.pump_platform_tasks();

        ran
    }

    /// Wait for the next queued task and run it.
    pub async fn run_next_task(&mut self) {
        // The runtime holds a sender itself, so the queue never closes here.
        if let Some(task) = self.tasks.recv().await {
            let _lock = JsLock::new(&mut self.isolate);
            task(self);
        }

        self.isolate.perform_microtask_checkpoint();
    }

    /// Run foreground tasks V8 posted, such as deferred weak callbacks.
    fn pump_platform_tasks(&mut self) {
        while v8::Platform::pump_message_loop(get_platform(), &self.isolate, false) {}
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _lock = JsLock::new(&mut self.isolate);
        self.state.teardown();

        let stats = self.state.stats();
        tracing::debug!(
            "Runtime dropped ({} wrappers adopted, {} owned regions freed)",
            stats.wrappers_adopted,
            stats.regions_freed
        );
    }
}

fn global_value<'s>(scope: &mut v8::PinScope<'s, '_>, name: &str) -> Option<v8::Local<'s, v8::Value>> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name)?;
    global.get(scope, key.into())
}

fn set_global(scope: &mut v8::PinScope, name: &str, value: v8::Local<v8::Value>) -> Result<()> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name)
        .ok_or_else(|| BridgeError::Script("Failed to create V8 string".to_string()))?;
    global.set(scope, key.into(), value);
    Ok(())
}
